//! Memory accounting for resident PCM buffers

use crate::backend::MemoryProbe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running total of PCM bytes held by an engine's assets
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    bytes: Arc<AtomicU64>,
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently resident
    pub fn resident_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    pub(crate) fn add(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    pub(crate) fn sub(&self, bytes: u64) {
        let _ = self
            .bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(bytes))
            });
    }
}

/// Fixed budget minus whatever the ledger says is resident
#[derive(Debug, Clone)]
pub struct BudgetProbe {
    budget: u64,
    ledger: MemoryLedger,
}

impl BudgetProbe {
    /// Probe reporting `budget` minus the ledger's resident bytes
    pub fn new(budget: u64, ledger: MemoryLedger) -> Self {
        BudgetProbe { budget, ledger }
    }

    /// Configured budget
    pub fn budget(&self) -> u64 {
        self.budget
    }
}

impl MemoryProbe for BudgetProbe {
    fn free_budget_bytes(&self) -> u64 {
        self.budget.saturating_sub(self.ledger.resident_bytes())
    }
}

/// Probe that never reports pressure
#[derive(Debug, Clone, Copy, Default)]
pub struct UnboundedMemory;

impl MemoryProbe for UnboundedMemory {
    fn free_budget_bytes(&self) -> u64 {
        u64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_shared_between_clones() {
        let ledger = MemoryLedger::new();
        let view = ledger.clone();
        ledger.add(1_000);
        assert_eq!(view.resident_bytes(), 1_000);
        view.sub(400);
        assert_eq!(ledger.resident_bytes(), 600);
    }

    #[test]
    fn test_ledger_never_underflows() {
        let ledger = MemoryLedger::new();
        ledger.add(10);
        ledger.sub(50);
        assert_eq!(ledger.resident_bytes(), 0);
    }

    #[test]
    fn test_budget_probe() {
        let ledger = MemoryLedger::new();
        let probe = BudgetProbe::new(4_096, ledger.clone());
        assert_eq!(probe.free_budget_bytes(), 4_096);
        ledger.add(4_000);
        assert_eq!(probe.free_budget_bytes(), 96);
        ledger.add(1_000);
        assert_eq!(probe.free_budget_bytes(), 0);
    }
}
