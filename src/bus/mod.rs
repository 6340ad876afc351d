//! Mixing-Bus Domain
//!
//! A strictly tree-shaped graph of gain/mute nodes. Every sound in the
//! engine ends up on a bus; the sound's output volume is the sum of the
//! gains from its bus up to master, or silence if any bus on the way is
//! muted.
//!
//! Gains are in decibels and add up along the chain. Stored gains are
//! clamped to [`MIN_GAIN`]..=[`MAX_GAIN`]; the cumulative value is not, and
//! output lines fit it into their own device range before use.

mod graph;
pub mod mixer;

pub use mixer::{Bus, Mixer};

use std::fmt;

/// Highest gain a single bus may store (dB)
pub const MAX_GAIN: f64 = 6.0;

/// Lowest gain a single bus may store (dB)
pub const MIN_GAIN: f64 = -80.0;

/// Effective gain reported for anything in a muted chain (dB)
pub const MUTED_GAIN: f64 = -10_000.0;

/// Stable identifier of a bus inside one [`Mixer`]
///
/// Ids are never reused within a mixer, so a stale id can only ever miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusId(pub(crate) u64);

impl BusId {
    /// The master bus of every mixer
    pub const MASTER: BusId = BusId(0);

    /// Raw numeric id
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == BusId::MASTER {
            write!(f, "bus#master")
        } else {
            write!(f, "bus#{}", self.0)
        }
    }
}

/// Observer of gain/mute changes on a bus or anything above it
///
/// Listeners are held weakly by the graph and are called on the thread that
/// made the change, after the graph lock has been released, so they may read
/// the mixer freely.
pub trait BusListener: Send + Sync {
    /// Something affecting the effective gain of the observed bus changed
    ///
    /// `origin` is the bus whose own state was modified.
    fn bus_changed(&self, origin: BusId);
}
