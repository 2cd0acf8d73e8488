//! Error taxonomy for the frame pipeline.
//!
//! Tree-consistency violations (double adopt, mismatched drop, layout before
//! attach) are programmer errors and panic at the call site. Per-node layout
//! and paint failures are recoverable: the flush loops capture them here and
//! leave the node's dirty bit set so it is retried next frame.

use thiserror::Error;

use crate::tree::NodeId;

/// Error type returned by user [`Render`](crate::object::Render) code.
pub type NodeError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The frame phase a failure was captured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Layout,
    CompositingBits,
    Paint,
}

impl std::fmt::Display for FramePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramePhase::Layout => f.write_str("layout"),
            FramePhase::CompositingBits => f.write_str("compositing-bits"),
            FramePhase::Paint => f.write_str("paint"),
        }
    }
}

/// A single node's failure during one flush phase.
#[derive(Debug, Error)]
#[error("{phase} failed for {node:?}: {source}")]
pub struct NodeFailure {
    pub node: NodeId,
    pub phase: FramePhase,
    #[source]
    pub source: NodeError,
}

/// Collected per-node failures for one frame. An empty report means the
/// frame completed cleanly; a non-empty one means the listed nodes are still
/// dirty and will be retried next frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub failures: Vec<NodeFailure>,
}

impl FrameReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn had_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn push(&mut self, failure: NodeFailure) {
        self.failures.push(failure);
    }

    pub fn merge(&mut self, other: FrameReport) {
        self.failures.extend(other.failures);
    }
}
