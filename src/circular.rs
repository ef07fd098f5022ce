//! Detection of reference cycles while resolving `ref` inheritance chains.

use dashmap::DashMap;
use tracing::debug;

use crate::diagnostics::{Diagnostic, DiagnosticExtra, Diagnostics, SourceRange};
use crate::template::BlockId;

/// Tracks blocks whose resolution is in progress.
///
/// One tracker is created per load and passed down the resolution recursion. A block
/// is added before its base is resolved and removed afterwards, whatever the outcome.
#[derive(Debug, Default)]
pub struct RefTracker {
    in_progress: DashMap<BlockId, SourceRange>,
}

impl RefTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `id` is currently being resolved, meaning a cycle was found.
    pub fn check(&self, id: BlockId) -> bool {
        self.in_progress.contains_key(&id)
    }

    pub fn add(&self, id: BlockId, range: SourceRange) {
        self.in_progress.insert(id, range);
    }

    /// Unregisters `id`. If `diags` carries an open circular-reference traceback, the
    /// block's location is appended; the traceback closes once it reaches the block
    /// that started the cycle.
    pub fn remove(&self, id: BlockId, diags: &mut Diagnostics) {
        let Some((_, range)) = self.in_progress.remove(&id) else {
            return;
        };
        if let Some(diag) = diags.open_circular_ref_mut() {
            if let Some(DiagnosticExtra::CircularRef {
                origin,
                traceback,
                closed,
            }) = &mut diag.extra
            {
                traceback.push(range);
                if *origin == id {
                    debug!(block = %id, depth = traceback.len(), "closed circular reference traceback");
                    *closed = true;
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.in_progress.is_empty()
    }
}

/// The diagnostic reported when `origin` is reached a second time.
pub fn circular_error(origin: BlockId, range: &SourceRange) -> Diagnostic {
    Diagnostic::error("Circular reference detected")
        .with_detail("the block refers back to itself through its base chain")
        .with_range(range.clone())
        .with_extra(DiagnosticExtra::CircularRef {
            origin,
            traceback: Vec::new(),
            closed: false,
        })
}
