//! Main tier: the reader-facing graph plus changes not yet handed to disk

use super::graph::{ChangeSet, ObjectGraph};

#[derive(Debug, Default)]
pub(crate) struct MainTier {
    graph: ObjectGraph,
    pending: ChangeSet,
}

impl MainTier {
    pub(crate) fn new(graph: ObjectGraph) -> Self {
        Self {
            graph,
            pending: ChangeSet::default(),
        }
    }

    pub(crate) fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    /// Take changes saved by the Background tier
    pub(crate) fn receive(&mut self, changes: ChangeSet) {
        self.graph.apply(&changes);
        self.pending.merge(changes);
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn take_pending(&mut self) -> ChangeSet {
        std::mem::take(&mut self.pending)
    }

    /// Put back changes the persisting tier could not accept
    ///
    /// Anything received since the take is newer and wins.
    pub(crate) fn restore_pending(&mut self, older: ChangeSet) {
        let newer = std::mem::replace(&mut self.pending, older);
        self.pending.merge(newer);
    }

    pub(crate) fn reset(&mut self) {
        self.graph = ObjectGraph::default();
        self.pending = ChangeSet::default();
    }
}
