//! Single-slot operation gate: at most one externally triggered
//! mutating operation may touch the store/snapshot pair at a time. A
//! second caller is rejected immediately with [`CoreError::Busy`],
//! never queued. The guard releases on every exit path, including
//! error returns and unwinds.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::CoreError;

#[derive(Debug, Default)]
pub struct OperationGate {
    busy: AtomicBool,
}

impl OperationGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the single operation slot.
    ///
    /// # Errors
    /// [`CoreError::Busy`] when another operation holds the slot.
    pub fn try_acquire(&self) -> Result<GateGuard<'_>, CoreError> {
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(CoreError::Busy);
        }
        Ok(GateGuard { gate: self })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Scoped claim on the operation slot.
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a OperationGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}
