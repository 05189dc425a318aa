//! Errors reported by the triangulation engine and by whole-mesh producers.

use crate::utils::types::VertexIdx;

/// Errors that can occur while building a constrained triangulation.
///
/// Every error is terminal for the call that raised it. The engine validates before it mutates
/// its buffers, so the triangulation stays consistent and can still be read after an error.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum CdtError {
    /// The point does not lie strictly inside the triangulation's bounding rectangle.
    #[error("Point ({x}, {y}) is not strictly inside the triangulation bounds")]
    OutOfBounds {
        /// x coordinate of the rejected point
        x: f64,
        /// y coordinate of the rejected point
        y: f64,
    },
    /// The point is inside the bounds but no triangle around it can be split to insert it.
    #[error("Point ({x}, {y}) could not be inserted: no valid split around it")]
    UnresolvedPoint {
        /// x coordinate of the rejected point
        x: f64,
        /// y coordinate of the rejected point
        y: f64,
    },
    /// An edge was requested between a vertex and itself.
    #[error("Cannot constrain an edge from vertex {index} to itself")]
    DegenerateEdge {
        /// The vertex index used for both endpoints
        index: VertexIdx,
    },
    /// The constraint walk crossed more triangles than any valid input can produce.
    #[error("Probable infinite loop: constraint crossed {crossed} triangles")]
    InfiniteLoop {
        /// Number of triangles crossed when the walk was aborted
        crossed: usize,
    },
    /// An external whole-mesh triangulator reported a negative status.
    #[error("External triangulation failed with status {code}")]
    ExternalDelegateFailure {
        /// The negative status code returned by the delegate
        code: i32,
    },
    /// The bounding rectangle is empty or not finite.
    #[error("Invalid bounds: left {left}, right {right}, bottom {bottom}, top {top}")]
    InvalidBounds {
        /// Left bound
        left: f64,
        /// Right bound
        right: f64,
        /// Bottom bound
        bottom: f64,
        /// Top bound
        top: f64,
    },
    /// More points were inserted than the triangulation was sized for.
    #[error("Triangulation was sized for {capacity} points and is full")]
    CapacityExceeded {
        /// Declared point capacity
        capacity: usize,
    },
    /// A vertex index does not refer to an inserted vertex.
    #[error("Vertex index {index} is out of range ({num_vertices} vertices)")]
    InvalidVertex {
        /// The offending index
        index: VertexIdx,
        /// Number of vertices currently in the triangulation
        num_vertices: usize,
    },
    /// An internal invariant was found broken before any buffer was modified.
    #[error("Triangulation is inconsistent: {reason}")]
    Corrupted {
        /// What was found to be inconsistent
        reason: &'static str,
    },
}

impl CdtError {
    /// Negative status code for this error, as reported across a whole-mesh producer boundary.
    #[must_use]
    pub const fn status_code(&self) -> i32 {
        match self {
            Self::OutOfBounds { .. } => -1,
            Self::DegenerateEdge { .. } => -2,
            Self::InfiniteLoop { .. } => -3,
            Self::InvalidBounds { .. } => -4,
            Self::CapacityExceeded { .. } => -5,
            Self::InvalidVertex { .. } => -6,
            Self::Corrupted { .. } => -7,
            Self::UnresolvedPoint { .. } => -8,
            Self::ExternalDelegateFailure { code } => *code,
        }
    }

    /// Interprets the status returned by a whole-mesh producer.
    ///
    /// A non-negative status is the number of output vertices; a negative one is a failure.
    pub fn check_status(status: i32) -> Result<usize, Self> {
        usize::try_from(status).map_err(|_| Self::ExternalDelegateFailure { code: status })
    }
}
