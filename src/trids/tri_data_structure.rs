use std::collections::{HashMap, HashSet};

use super::{edge_iterator::EdgeIterator, tri_iterator::TriIterator};
use crate::utils::types::{EdgeIdx, TriIdx, VertexIdx};

use anyhow::{bail, ensure, Ok as HowOk, Result as HowResult};

/// Returns the edge with the smaller vertex index first.
#[inline]
pub fn canonical(a: VertexIdx, b: VertexIdx) -> [VertexIdx; 2] {
    if a < b {
        [a, b]
    } else {
        [b, a]
    }
}

/// A flat 2D triangulation data structure.
///
/// Triangles are stored as consecutive vertex triples, edges as canonical vertex pairs with a
/// parallel `fixed` flag. Both are addressed by slot index, and slots are overwritten in place
/// when triangles are split or flipped; nothing is ever removed.
///
/// ```ignore
/// tri0                  tri1
///   |                     |
///   v                     v
/// [node0, node1, node2, node3, node4, node5, ... ]
/// ```
#[derive(Debug, Clone)]
pub struct TriDataStructure {
    /// Three nodes per triangle, clockwise.
    pub(crate) tri_nodes: Vec<VertexIdx>,
    /// Smaller vertex index first.
    pub(crate) edge_nodes: Vec<[VertexIdx; 2]>,
    pub(crate) fixed: Vec<bool>,
}

impl Default for TriDataStructure {
    fn default() -> Self {
        Self::new()
    }
}

impl TriDataStructure {
    pub const fn new() -> Self {
        Self {
            tri_nodes: Vec::new(),
            edge_nodes: Vec::new(),
            fixed: Vec::new(),
        }
    }

    /// Create an empty data structure with room for a full triangulation of `num_vertices`
    /// vertices, four of which are on the convex hull.
    pub fn with_capacity(num_vertices: usize) -> Self {
        let (max_edges, max_tris) = Self::max_sizes(num_vertices);

        Self {
            tri_nodes: Vec::with_capacity(3 * max_tris),
            edge_nodes: Vec::with_capacity(max_edges),
            fixed: Vec::with_capacity(max_edges),
        }
    }

    /// Maximum number of edges and triangles of a triangulation with `num_vertices` vertices and
    /// a four-vertex hull (Euler: `E = 3V - 7`, `T = 2V - 6`).
    pub const fn max_sizes(num_vertices: usize) -> (usize, usize) {
        (
            (3 * num_vertices).saturating_sub(7),
            (2 * num_vertices).saturating_sub(6),
        )
    }

    /// Insert the two triangles covering a rectangle given by its corners
    /// (bottom-left, top-left, bottom-right, top-right).
    ///
    /// The hull edges are fixed, the diagonal is not.
    pub fn add_init_tris(&mut self, corners: [VertexIdx; 4]) -> HowResult<[TriIdx; 2]> {
        if self.num_tris() > 0 {
            bail!("Triangulation already contains triangles!");
        }
        let [bl, tl, br, tr] = corners;

        let t0 = self.add_tri([bl, tl, br]);
        let t1 = self.add_tri([br, tl, tr]);

        self.add_edge([bl, tl], true);
        self.add_edge([bl, br], true);
        self.add_edge([tl, br], false);
        self.add_edge([tl, tr], true);
        self.add_edge([br, tr], true);

        HowOk([t0, t1])
    }

    /// Add a triangle and retrieve its index.
    pub fn add_tri(&mut self, nodes: [VertexIdx; 3]) -> TriIdx {
        let idx = self.num_tris();
        self.tri_nodes.extend_from_slice(&nodes);
        idx
    }

    /// Overwrite the triangle stored at `idx`.
    pub fn replace_tri(&mut self, idx: TriIdx, nodes: [VertexIdx; 3]) {
        self.tri_nodes[idx * 3..idx * 3 + 3].copy_from_slice(&nodes);
    }

    /// Add an edge, stored canonically, and retrieve its index.
    pub fn add_edge(&mut self, nodes: [VertexIdx; 2], fixed: bool) -> EdgeIdx {
        let idx = self.edge_nodes.len();
        self.edge_nodes.push(canonical(nodes[0], nodes[1]));
        self.fixed.push(fixed);
        idx
    }

    /// Overwrite the edge stored at `idx`.
    pub fn replace_edge(&mut self, idx: EdgeIdx, nodes: [VertexIdx; 2], fixed: bool) {
        self.edge_nodes[idx] = canonical(nodes[0], nodes[1]);
        self.fixed[idx] = fixed;
    }

    pub fn set_fixed(&mut self, idx: EdgeIdx, fixed: bool) {
        self.fixed[idx] = fixed;
    }

    /// The nodes of the triangle at `idx`.
    #[inline]
    pub fn tri_nodes(&self, idx: TriIdx) -> [VertexIdx; 3] {
        [
            self.tri_nodes[idx * 3],
            self.tri_nodes[idx * 3 + 1],
            self.tri_nodes[idx * 3 + 2],
        ]
    }

    /// Find the index of the edge between `a` and `b`, in any order.
    pub fn find_edge(&self, a: VertexIdx, b: VertexIdx) -> Option<EdgeIdx> {
        let edge = canonical(a, b);
        self.edge_nodes.iter().position(|&e| e == edge)
    }

    /// Find a triangle, other than `skip`, that contains the directed edge `from -> to`.
    ///
    /// Returns the triangle and the node opposite to the edge.
    pub fn find_tri_with_hedge(
        &self,
        from: VertexIdx,
        to: VertexIdx,
        skip: Option<TriIdx>,
    ) -> Option<(TriIdx, VertexIdx)> {
        self.tri_nodes
            .chunks_exact(3)
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != skip)
            .find_map(|(idx, nodes)| {
                (0..3)
                    .find(|&i| nodes[i] == from && nodes[(i + 1) % 3] == to)
                    .map(|i| (idx, nodes[(i + 2) % 3]))
            })
    }

    /// Returns the quad `a, b, c, d` spanned by two triangles `abd` and `cdb` sharing the edge `bd`.
    ///
    /// `quad[0]` is the node of `tri_a` not in `tri_b`, `quad[2]` the node of `tri_b` not in
    /// `tri_a`; the shared edge is `quad[1] - quad[3]`. With clockwise triangles the quad is
    /// clockwise as well. Returns `None` if the triangles do not share exactly one edge.
    pub fn shared_quad(&self, tri_a: TriIdx, tri_b: TriIdx) -> Option<[VertexIdx; 4]> {
        let nodes_a = self.tri_nodes(tri_a);
        let nodes_b = self.tri_nodes(tri_b);

        let mut quad = [0; 4];
        for (n, (this, other)) in [(nodes_a, nodes_b), (nodes_b, nodes_a)]
            .into_iter()
            .enumerate()
        {
            let mut unshared = (0..3).filter(|&j| !other.contains(&this[j]));
            let j = unshared.next()?;
            if unshared.next().is_some() {
                return None;
            }
            quad[n * 2] = this[j];
            quad[n * 2 + 1] = this[(j + 1) % 3];
        }

        // the nodes following the unshared ones must be the two ends of the same edge
        if quad[1] == quad[3] {
            return None;
        }

        Some(quad)
    }

    /// Insert a vertex `d` into an existing triangle `abc`; called the `1 -> 3 flip`.
    ///
    /// `abc` is replaced by `abd` in place, `bcd` and `cad` are appended, as are the three new
    /// non-fixed edges to `d`.
    pub fn flip_1_to_3(&mut self, idx_to_split: TriIdx, d: VertexIdx) -> [TriIdx; 3] {
        let [a, b, c] = self.tri_nodes(idx_to_split);

        self.replace_tri(idx_to_split, [a, b, d]);
        let t1 = self.add_tri([b, c, d]);
        let t2 = self.add_tri([c, a, d]);

        self.add_edge([b, d], false);
        self.add_edge([c, d], false);
        self.add_edge([a, d], false);

        [idx_to_split, t1, t2]
    }

    /// Insert a vertex `v` on the shared edge `bd` of the quad `abcd`; called the `2 -> 4 flip`.
    ///
    /// `tris` must be the triangles the quad was computed from, in the same order.
    /// The shared edge slot is reused for `bv`; if it was fixed, both of its halves stay fixed.
    pub fn flip_2_to_4(
        &mut self,
        tris: [TriIdx; 2],
        quad: [VertexIdx; 4],
        shared_edge: EdgeIdx,
        v: VertexIdx,
    ) -> [TriIdx; 4] {
        let [a, b, c, d] = quad;
        let fixed = self.fixed[shared_edge];

        self.replace_tri(tris[0], [a, b, v]);
        self.replace_tri(tris[1], [b, c, v]);
        let t2 = self.add_tri([c, d, v]);
        let t3 = self.add_tri([d, a, v]);

        self.replace_edge(shared_edge, [b, v], fixed);
        self.add_edge([c, v], false);
        self.add_edge([d, v], fixed);
        self.add_edge([a, v], false);

        [tris[0], tris[1], t2, t3]
    }

    /// Flips the shared edge `bd` of the quad `abcd` to `ac`; called the `2 -> 2 flip`.
    pub fn flip_2_to_2(&mut self, tris: [TriIdx; 2], quad: [VertexIdx; 4], shared_edge: EdgeIdx) {
        let [a, b, c, d] = quad;

        self.replace_tri(tris[0], [a, b, c]);
        self.replace_tri(tris[1], [a, c, d]);
        self.replace_edge(shared_edge, [a, c], false);
    }

    /// Retrieve a triangle iterator by index.
    pub fn get_tri(&self, idx: TriIdx) -> HowResult<TriIterator<'_>> {
        if idx >= self.num_tris() {
            bail!("Tri index out of bounds!");
        }

        HowOk(TriIterator::new(self, idx))
    }

    /// Retrieve an edge iterator by index.
    pub fn get_edge(&self, idx: EdgeIdx) -> HowResult<EdgeIterator<'_>> {
        if idx >= self.num_edges() {
            bail!("Edge index out of bounds!");
        }

        HowOk(EdgeIterator::new(self, idx))
    }

    /// Iterate over all triangles.
    pub fn tris(&self) -> impl Iterator<Item = TriIterator<'_>> {
        (0..self.num_tris()).map(move |idx| TriIterator::new(self, idx))
    }

    /// Iterate over all edges.
    pub fn edges(&self) -> impl Iterator<Item = EdgeIterator<'_>> {
        (0..self.num_edges()).map(move |idx| EdgeIterator::new(self, idx))
    }

    /// Get the number of triangles in the triangulation.
    pub fn num_tris(&self) -> usize {
        self.tri_nodes.len() / 3
    }

    /// Get the number of edges in the triangulation.
    pub fn num_edges(&self) -> usize {
        self.edge_nodes.len()
    }

    /// Map every directed triangle edge `(from, to)` to the triangle it belongs to.
    pub fn hedge_map(&self) -> HashMap<(VertexIdx, VertexIdx), TriIdx> {
        let mut hedges = HashMap::with_capacity(self.tri_nodes.len());
        for tri in self.tris() {
            for [from, to] in tri.hedges() {
                hedges.insert((from, to), tri.idx);
            }
        }
        hedges
    }

    /// Check the topology: canonical and unique edges, consistently oriented triangles, and an
    /// edge entry for every triangle side, bordering one or two triangles.
    pub fn check_topology(&self, num_vertices: usize) -> HowResult<()> {
        let mut hedges = HashSet::with_capacity(self.tri_nodes.len());

        for tri in self.tris() {
            let [a, b, c] = tri.nodes();
            ensure!(
                a < num_vertices && b < num_vertices && c < num_vertices,
                "{tri} references a missing vertex"
            );
            ensure!(a != b && b != c && c != a, "{tri} repeats a vertex");

            for hedge in tri.hedges() {
                // two triangles with the same directed edge overlap or disagree on winding
                ensure!(
                    hedges.insert((hedge[0], hedge[1])),
                    "Directed edge {} -> {} appears twice",
                    hedge[0],
                    hedge[1]
                );
            }
        }

        let mut seen = HashSet::with_capacity(self.num_edges());
        for edge in self.edges() {
            let [a, b] = edge.nodes();
            ensure!(a < b, "{edge} is not canonical");
            ensure!(seen.insert([a, b]), "{edge} is stored twice");
            if !hedges.contains(&(a, b)) && !hedges.contains(&(b, a)) {
                bail!("{edge} borders no triangle");
            }
        }

        for &(from, to) in &hedges {
            if !seen.contains(&canonical(from, to)) {
                bail!("Triangle side {from} -> {to} has no edge entry");
            }
        }

        HowOk(())
    }

    /// Check if the data structure is sound, see [`Self::check_topology`].
    pub fn is_sound(&self, num_vertices: usize) -> bool {
        match self.check_topology(num_vertices) {
            Ok(()) => true,
            Err(e) => {
                log::error!("{e}");
                false
            }
        }
    }
}
