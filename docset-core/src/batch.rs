//! Pending write batch of a unit of work.

use std::collections::HashMap;

use bson::Document;

use crate::backend::{WriteKind, WriteOp};

/// Ordered writes keyed by `(collection, id)`.
///
/// A later write for a key replaces the earlier one in place, so the batch keeps the
/// order in which keys were first staged.
#[derive(Debug, Default)]
pub struct PendingBatch {
    ops: Vec<WriteOp>,
    index: HashMap<(String, String), usize>,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages `op`. The last write for a key wins.
    pub fn stage(&mut self, op: WriteOp) {
        let key = (op.collection.clone(), op.id.clone());

        match self.index.get(&key) {
            Some(&position) => self.ops[position] = op,
            None => {
                self.index.insert(key, self.ops.len());
                self.ops.push(op);
            }
        }
    }

    /// Stages the write-back of a mutated tracked entity.
    ///
    /// A pending delete of the same document is kept. A pending set receives the new
    /// document instead of being downgraded to an update. Returns whether anything
    /// was staged.
    pub fn stage_tracked_update(&mut self, collection: &str, id: &str, document: Document) -> bool {
        let key = (collection.to_string(), id.to_string());

        match self.index.get(&key).map(|&position| &mut self.ops[position]) {
            Some(op) if op.kind == WriteKind::Delete => false,
            Some(op) => {
                op.document = document;
                true
            }
            None => {
                self.stage(WriteOp::update(collection, id, document));
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Takes every staged write, leaving the batch empty.
    pub fn take(&mut self) -> Vec<WriteOp> {
        self.index.clear();
        std::mem::take(&mut self.ops)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.ops.clear();
    }
}
