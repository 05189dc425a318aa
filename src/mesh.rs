//! Whole-mesh triangulation: points and edges in, a finished triangle mesh out.
//!
//! [`MeshProducer`] is the seam for alternative triangulators. [`IncrementalProducer`] runs the
//! in-crate engine, [`DelegateProducer`] wraps an external one speaking a flat-buffer protocol.

use crate::{
    error::CdtError,
    triangulation::{Bounds, Triangulation},
    trids::tri_data_structure::TriDataStructure,
    utils::types::{Vertex2, VertexIdx},
};

/// The output of a whole-mesh triangulation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    /// Output vertices; the four corners of the bounds first.
    pub vertices: Vec<Vertex2>,
    /// For every input point, the index of the output vertex it ended up as.
    ///
    /// Near-duplicate input points map to the same output vertex.
    pub src_to_dst: Vec<VertexIdx>,
    /// Clockwise triangles.
    pub triangles: Vec<[VertexIdx; 3]>,
}

/// Something that turns points and edges inside a rectangle into a triangle mesh.
pub trait MeshProducer {
    /// Triangulate `points` inside `bounds`, constraining `edges`, which index into `points`.
    fn produce(
        &self,
        bounds: Bounds,
        points: &[Vertex2],
        edges: &[[VertexIdx; 2]],
    ) -> Result<TriangleMesh, CdtError>;
}

/// Produces meshes with the incremental [`Triangulation`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementalProducer;

impl MeshProducer for IncrementalProducer {
    fn produce(
        &self,
        bounds: Bounds,
        points: &[Vertex2],
        edges: &[[VertexIdx; 2]],
    ) -> Result<TriangleMesh, CdtError> {
        let mut triangulation = Triangulation::with_tolerances(
            bounds,
            points.len(),
            crate::tolerances::Tolerances::default(),
        )?;

        let src_to_dst = triangulation.insert_vertices(points)?;

        for &[a, b] in edges {
            if a == b {
                return Err(CdtError::DegenerateEdge { index: a });
            }
            let [dst_a, dst_b] = [a, b].map(|src| {
                src_to_dst
                    .get(src)
                    .copied()
                    .ok_or(CdtError::InvalidVertex {
                        index: src,
                        num_vertices: points.len(),
                    })
            });
            let (dst_a, dst_b) = (dst_a?, dst_b?);

            // both ends were merged into the same vertex
            if dst_a == dst_b {
                log::debug!("Skipping edge {a} - {b}, its ends collapsed to vertex {dst_a}");
                continue;
            }

            triangulation.add_edge(dst_a, dst_b)?;
        }

        Ok(TriangleMesh {
            vertices: triangulation.vertices().to_vec(),
            src_to_dst,
            triangles: triangulation.tris(),
        })
    }
}

/// Produces meshes with an external triangulator behind a flat-buffer protocol.
///
/// The delegate is called as `f(bounds, points, edges, vertices, src_to_dst, triangles)`:
/// `points` and `edges` are flattened pairs, the three output buffers are pre-sized for the worst
/// case (`points.len() / 2 + 4` vertices). It returns the number of output vertices, or a negative
/// status on failure.
pub struct DelegateProducer<F> {
    delegate: F,
}

impl<F> DelegateProducer<F>
where
    F: Fn(&Bounds, &[f64], &[i32], &mut [f64], &mut [i32], &mut [i32]) -> i32,
{
    pub const fn new(delegate: F) -> Self {
        Self { delegate }
    }
}

fn to_index(value: i32, num_vertices: usize) -> Result<VertexIdx, CdtError> {
    usize::try_from(value)
        .ok()
        .filter(|&idx| idx < num_vertices)
        .ok_or(CdtError::Corrupted {
            reason: "delegate returned an index outside its vertices",
        })
}

impl<F> MeshProducer for DelegateProducer<F>
where
    F: Fn(&Bounds, &[f64], &[i32], &mut [f64], &mut [i32], &mut [i32]) -> i32,
{
    fn produce(
        &self,
        bounds: Bounds,
        points: &[Vertex2],
        edges: &[[VertexIdx; 2]],
    ) -> Result<TriangleMesh, CdtError> {
        let flat_points: Vec<f64> = points.iter().flatten().copied().collect();
        let flat_edges = edges
            .iter()
            .flatten()
            .map(|&idx| {
                i32::try_from(idx).map_err(|_| CdtError::InvalidVertex {
                    index: idx,
                    num_vertices: points.len(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let max_vertices = points.len() + 4;
        let (_, max_tris) = TriDataStructure::max_sizes(max_vertices);
        let mut vertices = vec![0.0; 2 * max_vertices];
        let mut src_to_dst = vec![0; points.len()];
        let mut triangles = vec![0; 3 * max_tris];

        let status = (self.delegate)(
            &bounds,
            &flat_points,
            &flat_edges,
            &mut vertices,
            &mut src_to_dst,
            &mut triangles,
        );
        let num_vertices = CdtError::check_status(status)?;
        if num_vertices > max_vertices {
            return Err(CdtError::Corrupted {
                reason: "delegate returned more vertices than it was given room for",
            });
        }

        // the buffers were sized for unique points, cut them down to what was produced
        let (_, num_tris) = TriDataStructure::max_sizes(num_vertices);

        Ok(TriangleMesh {
            vertices: vertices[..2 * num_vertices]
                .chunks_exact(2)
                .map(|v| [v[0], v[1]])
                .collect(),
            src_to_dst: src_to_dst
                .iter()
                .map(|&idx| to_index(idx, num_vertices))
                .collect::<Result<_, _>>()?,
            triangles: triangles[..3 * num_tris]
                .chunks_exact(3)
                .map(|t| -> Result<[VertexIdx; 3], CdtError> {
                    Ok([
                        to_index(t[0], num_vertices)?,
                        to_index(t[1], num_vertices)?,
                        to_index(t[2], num_vertices)?,
                    ])
                })
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Triangulate `points` inside `bounds` with the incremental engine, constraining `edges`.
///
/// ```
/// use cdt2d::{triangulate, Bounds};
///
/// let points = [[1.0, 1.0], [3.0, 1.0], [2.0, 3.0]];
/// let mesh = triangulate(Bounds::new(0.0, 4.0, 0.0, 4.0), &points, &[[0, 2]]).unwrap();
///
/// assert_eq!(mesh.vertices.len(), 7);
/// assert_eq!(mesh.triangles.len(), 8);
/// assert_eq!(mesh.src_to_dst, vec![4, 5, 6]);
/// ```
pub fn triangulate(
    bounds: Bounds,
    points: &[Vertex2],
    edges: &[[VertexIdx; 2]],
) -> Result<TriangleMesh, CdtError> {
    IncrementalProducer.produce(bounds, points, edges)
}
