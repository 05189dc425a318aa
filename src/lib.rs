//! # cdt2d
//!
//! A 2D constrained Delaunay triangulation inside a fixed rectangle, built incrementally.
//!
//! Points are inserted one at a time and legalized by edge flips; constraint edges are forced in
//! afterwards by retriangulating the triangles they cross.
#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::missing_const_for_fn)]

pub use error::CdtError;
pub use mesh::{triangulate, DelegateProducer, IncrementalProducer, MeshProducer, TriangleMesh};
pub use tolerances::Tolerances;
pub use triangulation::{Bounds, Triangulation};
pub use trids::edge_iterator::EdgeIterator;
pub use utils::types::{EdgeIdx, TriIdx, Triangle2, Vertex2, VertexIdx};

pub mod error;
pub mod mesh;
pub mod predicates;
pub mod tolerances;
pub mod triangulation;
pub mod trids;
mod utils;
