//! Shared mixer and owning bus handles
//!
//! [`Mixer`] wraps the bus graph in a single reader/writer lock, so the gain
//! and mute flag of every node are always observed together. Mutations
//! collect the listeners of the affected subtree while holding the write
//! lock and notify them after it is released.

use super::graph::BusGraph;
use super::{BusId, BusListener};
use crate::{AudioError, Result};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};

lazy_static! {
    /// Process-wide mixer; its master bus lives until process exit
    static ref GLOBAL_MIXER: Mixer = Mixer::new();
}

/// Shared handle to one bus tree
#[derive(Clone)]
pub struct Mixer {
    graph: Arc<RwLock<BusGraph>>,
}

impl Mixer {
    /// Create an independent tree holding only its master bus
    ///
    /// Application code should route everything through [`Mixer::global`],
    /// which owns the one process-wide master. A tree built here shares
    /// nothing with it: its master is a separate root, useful only for
    /// isolated tests or a host embedding several engines that must never
    /// mix into each other.
    pub fn new() -> Self {
        Mixer {
            graph: Arc::new(RwLock::new(BusGraph::new())),
        }
    }

    /// The process-wide mixer
    ///
    /// Created on first use and never torn down; exactly one master bus
    /// exists through this accessor for the life of the process.
    pub fn global() -> &'static Mixer {
        &GLOBAL_MIXER
    }

    /// Handle to the master bus
    pub fn master(&self) -> Bus {
        Bus {
            id: BusId::MASTER,
            mixer: self.clone(),
            owned: false,
        }
    }

    /// Create a bus routed to `output` (master when `None`)
    ///
    /// The gain is clamped, never rejected. The returned handle owns the
    /// node: dropping it detaches the bus from the tree.
    pub fn create_bus(&self, output: Option<&Bus>, gain: f64) -> Bus {
        let parent = output.and_then(|bus| self.local_id(bus));
        let id = self.graph.write().insert(parent, gain);
        log::debug!("created {id} (output {:?}, gain {gain} dB)", parent);
        Bus {
            id,
            mixer: self.clone(),
            owned: true,
        }
    }

    /// Number of buses in the tree, master included
    pub fn bus_count(&self) -> usize {
        self.graph.read().len()
    }

    /// Whether two handles point at the same tree
    pub fn same_mixer(&self, other: &Mixer) -> bool {
        Arc::ptr_eq(&self.graph, &other.graph)
    }

    /// Effective gain of any bus by id
    pub fn effective_gain(&self, id: BusId) -> f64 {
        self.graph.read().effective_gain(id)
    }

    /// Id of `bus` if it belongs to this mixer
    fn local_id(&self, bus: &Bus) -> Option<BusId> {
        if self.same_mixer(&bus.mixer) {
            Some(bus.id)
        } else {
            log::warn!("{} belongs to another mixer; using master instead", bus.id);
            None
        }
    }

    pub(crate) fn subscribe(&self, id: BusId, listener: Weak<dyn BusListener>) {
        self.graph.write().add_listener(id, listener);
    }

    /// Apply `change` under the write lock and notify the subtree if it
    /// reports a modification
    fn mutate<F>(&self, id: BusId, change: F) -> Result<bool>
    where
        F: FnOnce(&mut BusGraph) -> Result<bool>,
    {
        let listeners = {
            let mut graph = self.graph.write();
            if !change(&mut graph)? {
                return Ok(false);
            }
            graph.subtree_listeners(id)
        };
        for listener in listeners {
            listener.bus_changed(id);
        }
        Ok(true)
    }

    fn remove(&self, id: BusId) {
        let listeners = {
            let mut graph = self.graph.write();
            let Some(orphans) = graph.remove(id) else {
                return;
            };
            orphans
                .into_iter()
                .flat_map(|child| graph.subtree_listeners(child))
                .collect::<Vec<_>>()
        };
        log::debug!("removed {id}");
        for listener in listeners {
            listener.bus_changed(id);
        }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mixer")
            .field("buses", &self.bus_count())
            .finish()
    }
}

/// Handle to one bus
///
/// Handles returned by [`Mixer::create_bus`] own their node and detach it on
/// drop; any children are re-routed to the dropped bus's own output. Master
/// handles from [`Mixer::master`] own nothing.
pub struct Bus {
    id: BusId,
    mixer: Mixer,
    owned: bool,
}

impl Bus {
    /// Identifier inside the owning mixer
    pub fn id(&self) -> BusId {
        self.id
    }

    /// The mixer this bus lives in
    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// Set the gain in dB, clamped to the bus range
    ///
    /// Re-setting the stored value is a no-op and notifies nobody.
    pub fn set_gain(&self, gain: f64) {
        // The closure cannot fail
        let _ = self
            .mixer
            .mutate(self.id, |g| Ok(g.set_gain(self.id, gain)));
    }

    /// Stored gain of this bus alone
    pub fn gain(&self) -> f64 {
        self.mixer.graph.read().gain(self.id).unwrap_or(0.0)
    }

    /// Mute or unmute this bus
    pub fn set_muted(&self, muted: bool) {
        let _ = self
            .mixer
            .mutate(self.id, |g| Ok(g.set_muted(self.id, muted)));
    }

    /// Own mute flag (not the chain)
    pub fn is_muted(&self) -> bool {
        self.mixer.graph.read().is_muted(self.id).unwrap_or(false)
    }

    /// Route this bus into `output` (master when `None`)
    ///
    /// Does nothing for master. Fails with [`AudioError::BusCycle`] when
    /// `output` is this bus or one of its descendants, and with
    /// [`AudioError::Other`] when `output` belongs to another mixer.
    pub fn set_output(&self, output: Option<&Bus>) -> Result<()> {
        let target = match output {
            Some(bus) if !self.mixer.same_mixer(&bus.mixer) => {
                return Err(AudioError::Other(format!(
                    "{} belongs to another mixer",
                    bus.id
                )));
            }
            Some(bus) => Some(bus.id),
            None => None,
        };
        self.mixer
            .mutate(self.id, |g| g.set_output(self.id, target))?;
        Ok(())
    }

    /// Current output bus, `None` for master
    pub fn output(&self) -> Option<BusId> {
        self.mixer.graph.read().parent(self.id)
    }

    /// Buses routed into this one
    pub fn children(&self) -> Vec<BusId> {
        self.mixer.graph.read().children(self.id)
    }

    /// Cumulative gain up to master, or [`super::MUTED_GAIN`] in a muted chain
    pub fn effective_gain(&self) -> f64 {
        self.mixer.effective_gain(self.id)
    }

    /// Whether this bus or anything above it is muted
    pub fn is_in_muted_chain(&self) -> bool {
        self.mixer.graph.read().is_in_muted_chain(self.id)
    }

    /// Whether this is the master bus
    pub fn is_master(&self) -> bool {
        self.id == BusId::MASTER
    }

    /// Register a listener for changes affecting this bus
    ///
    /// The graph keeps only a weak reference; dropping the last strong
    /// reference unsubscribes.
    pub fn subscribe(&self, listener: Weak<dyn BusListener>) {
        self.mixer.subscribe(self.id, listener);
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("id", &self.id)
            .field("owned", &self.owned)
            .finish()
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        if self.owned {
            self.mixer.remove(self.id);
        }
    }
}
