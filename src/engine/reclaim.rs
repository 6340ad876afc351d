//! Reclamation sweep over idle assets

use crate::asset::AssetCore;
use std::fmt;
use std::sync::Arc;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Assets whose buffer was dropped
    pub released_assets: usize,
    /// Bytes returned to the budget
    pub released_bytes: u64,
    /// Loaded assets kept because voices were still playing them
    pub skipped_busy: usize,
}

impl fmt::Display for ReclaimReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "released {} assets ({} bytes), {} busy",
            self.released_assets, self.released_bytes, self.skipped_busy
        )
    }
}

/// Release every idle buffer among `assets`
pub(crate) fn sweep(assets: &[Arc<AssetCore>]) -> ReclaimReport {
    let mut report = ReclaimReport::default();
    for asset in assets {
        match asset.release_memory() {
            Some(freed) => {
                report.released_assets += 1;
                report.released_bytes += freed;
            }
            None if asset.is_loaded() && asset.active_instances() > 0 => {
                report.skipped_busy += 1;
            }
            None => {}
        }
    }
    report
}
