use crate::domain::payment::MethodKind;
use crate::domain::ports::PaymentProcessorRef;
use crate::error::{PaymentError, Result};
use std::collections::HashMap;

/// The set of settlement capabilities the ledger can use, one per method.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<MethodKind, PaymentProcessorRef>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: MethodKind, processor: PaymentProcessorRef) -> Self {
        self.register(kind, processor);
        self
    }

    pub fn register(&mut self, kind: MethodKind, processor: PaymentProcessorRef) {
        self.processors.insert(kind, processor);
    }

    /// Fails with `UnknownMethod` when no processor handles `kind`.
    pub fn resolve(&self, kind: MethodKind) -> Result<PaymentProcessorRef> {
        self.processors
            .get(&kind)
            .cloned()
            .ok_or_else(|| PaymentError::UnknownMethod(kind.to_string()))
    }
}
