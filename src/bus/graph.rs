//! Arena storage for the bus tree
//!
//! Nodes are addressed by [`BusId`]. Parent and child links are plain id
//! relations; the arena owns every node, so there is no reference counting
//! between nodes and no way to leak a cycle. All mutation goes through
//! [`BusGraph`], which keeps `children` equal to the inverse of `parent`.

use super::{BusId, BusListener, MAX_GAIN, MIN_GAIN, MUTED_GAIN};
use crate::bounds::Bounds;
use crate::{AudioError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

/// One node of the mixing tree
pub(crate) struct BusNode {
    gain: f64,
    muted: bool,
    parent: Option<BusId>,
    children: HashSet<BusId>,
    listeners: Vec<Weak<dyn BusListener>>,
}

impl BusNode {
    fn new(parent: Option<BusId>, gain: f64) -> Self {
        BusNode {
            gain,
            muted: false,
            parent,
            children: HashSet::new(),
            listeners: Vec::new(),
        }
    }
}

/// The bus tree; master is created with the graph and never removed
pub(crate) struct BusGraph {
    nodes: HashMap<BusId, BusNode>,
    next_id: u64,
    gain_bounds: Bounds<f64>,
}

impl BusGraph {
    /// Create a graph holding only the master bus at 0 dB
    pub(crate) fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(BusId::MASTER, BusNode::new(None, 0.0));
        BusGraph {
            nodes,
            next_id: BusId::MASTER.raw() + 1,
            gain_bounds: Bounds::from_sorted(MIN_GAIN, MAX_GAIN),
        }
    }

    /// Number of live nodes, master included
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn contains(&self, id: BusId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Map `None` and ids that are not in this graph to master
    fn resolve(&self, id: Option<BusId>) -> BusId {
        match id {
            Some(id) if self.contains(id) => id,
            Some(id) => {
                log::warn!("{id} is not part of this mixer; routing to master");
                BusId::MASTER
            }
            None => BusId::MASTER,
        }
    }

    /// Add a node under `parent` (master when absent)
    pub(crate) fn insert(&mut self, parent: Option<BusId>, gain: f64) -> BusId {
        let parent = self.resolve(parent);
        let id = BusId(self.next_id);
        self.next_id += 1;

        let gain = if gain.is_nan() {
            log::warn!("{id}: NaN gain, using 0 dB");
            0.0
        } else {
            self.gain_bounds.fit(gain)
        };
        self.nodes.insert(id, BusNode::new(Some(parent), gain));
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.insert(id);
        }
        id
    }

    /// Detach and drop a node
    ///
    /// Its children are spliced onto its parent so the tree stays connected.
    /// Returns the spliced children, or `None` when nothing was removed
    /// (master or an unknown id).
    pub(crate) fn remove(&mut self, id: BusId) -> Option<Vec<BusId>> {
        if id == BusId::MASTER {
            return None;
        }
        let node = self.nodes.remove(&id)?;
        let parent = node.parent.unwrap_or(BusId::MASTER);

        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.remove(&id);
            p.children.extend(node.children.iter().copied());
        }
        let orphans: Vec<BusId> = node.children.into_iter().collect();
        for child in &orphans {
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent = Some(parent);
            }
        }
        Some(orphans)
    }

    /// Store a clamped gain; returns whether the stored value changed
    ///
    /// NaN leaves the node untouched.
    pub(crate) fn set_gain(&mut self, id: BusId, gain: f64) -> bool {
        if gain.is_nan() {
            log::warn!("{id}: ignoring NaN gain");
            return false;
        }
        let gain = self.gain_bounds.fit(gain);
        match self.nodes.get_mut(&id) {
            Some(node) if node.gain != gain => {
                node.gain = gain;
                true
            }
            _ => false,
        }
    }

    /// Store the mute flag; returns whether it changed
    pub(crate) fn set_muted(&mut self, id: BusId, muted: bool) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) if node.muted != muted => {
                node.muted = muted;
                true
            }
            _ => false,
        }
    }

    /// Move `id` under `target` (master when absent)
    ///
    /// Returns `Ok(false)` when nothing changed: master never gets a parent,
    /// and re-targeting the current parent is a no-op.
    pub(crate) fn set_output(&mut self, id: BusId, target: Option<BusId>) -> Result<bool> {
        if self.is_master(id) || !self.contains(id) {
            return Ok(false);
        }
        let target = self.resolve(target);
        let current = self.parent(id);
        if current == Some(target) {
            return Ok(false);
        }
        if target == id || self.is_ancestor(id, target) {
            return Err(AudioError::BusCycle { child: id, target });
        }

        if let Some(old) = current.and_then(|p| self.nodes.get_mut(&p)) {
            old.children.remove(&id);
        }
        if let Some(new) = self.nodes.get_mut(&target) {
            new.children.insert(id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = Some(target);
        }
        Ok(true)
    }

    /// Check whether `ancestor` lies on the path from `id` up to master
    fn is_ancestor(&self, ancestor: BusId, id: BusId) -> bool {
        let mut cursor = self.parent(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub(crate) fn gain(&self, id: BusId) -> Option<f64> {
        self.nodes.get(&id).map(|n| n.gain)
    }

    pub(crate) fn is_muted(&self, id: BusId) -> Option<bool> {
        self.nodes.get(&id).map(|n| n.muted)
    }

    pub(crate) fn parent(&self, id: BusId) -> Option<BusId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    pub(crate) fn is_master(&self, id: BusId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.parent.is_none())
    }

    /// Child ids in ascending order
    pub(crate) fn children(&self, id: BusId) -> Vec<BusId> {
        let mut children: Vec<BusId> = self
            .nodes
            .get(&id)
            .map(|n| n.children.iter().copied().collect())
            .unwrap_or_default();
        children.sort_unstable();
        children
    }

    /// Muted here or anywhere above
    pub(crate) fn is_in_muted_chain(&self, id: BusId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.nodes.get(&current) {
                Some(node) if node.muted => return true,
                Some(node) => cursor = node.parent,
                None => return false,
            }
        }
        false
    }

    /// Sum of gains from `id` up to master, or [`MUTED_GAIN`] in a muted chain
    ///
    /// Not clamped: callers fit the result into their device's own range.
    pub(crate) fn effective_gain(&self, id: BusId) -> f64 {
        if !self.contains(id) || self.is_in_muted_chain(id) {
            return MUTED_GAIN;
        }
        let mut total = 0.0;
        let mut cursor = Some(id);
        while let Some(node) = cursor.and_then(|c| self.nodes.get(&c)) {
            total += node.gain;
            cursor = node.parent;
        }
        total
    }

    pub(crate) fn add_listener(&mut self, id: BusId, listener: Weak<dyn BusListener>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.listeners.push(listener);
        }
    }

    /// Live listeners of `id` and every node below it, depth first
    ///
    /// Listeners whose owner has gone away are pruned on the way.
    pub(crate) fn subtree_listeners(&mut self, id: BusId) -> Vec<Arc<dyn BusListener>> {
        let mut found = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&current) else {
                continue;
            };
            node.listeners.retain(|l| l.strong_count() > 0);
            found.extend(node.listeners.iter().filter_map(Weak::upgrade));
            stack.extend(node.children.iter().copied());
        }
        found
    }
}
