use core::fmt;

use crate::utils::types::{TriIdx, VertexIdx};

use super::tri_data_structure::TriDataStructure;

pub struct TriIterator<'a> {
    pub tds: &'a TriDataStructure,
    pub idx: TriIdx,
}

impl<'a> TriIterator<'a> {
    pub const fn new(tds: &'a TriDataStructure, idx: TriIdx) -> Self {
        Self { tds, idx }
    }

    /// Returns the index of this.
    pub const fn idx(&self) -> TriIdx {
        self.idx
    }

    /// Get the nodes of this triangle.
    // Since the nodes are stored index-wise like this in the tds:
    //
    //  tri0                  tri1
    //    |                     |
    //    v                     v
    // [node0, node1, node2, node3, node4, node5, ... ]
    //
    // the indices of the nodes can be retrieved by multiplying the triangle index by 3
    pub fn nodes(&self) -> [VertexIdx; 3] {
        self.tds.tri_nodes(self.idx)
    }

    /// Get the directed edges of this triangle, in winding order.
    pub fn hedges(&self) -> [[VertexIdx; 2]; 3] {
        let [a, b, c] = self.nodes();
        [[a, b], [b, c], [c, a]]
    }

    /// Check if the triangle has `node` as one of its corners.
    pub fn contains(&self, node: VertexIdx) -> bool {
        self.nodes().contains(&node)
    }

    /// Get the neighbor across the `i`-th directed edge, together with its node opposite to it.
    pub fn neighbor(&self, i: usize) -> Option<(TriIdx, VertexIdx)> {
        let [from, to] = self.hedges()[i % 3];
        self.tds.find_tri_with_hedge(to, from, Some(self.idx))
    }
}

impl fmt::Display for TriIterator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.nodes();
        write!(f, "Triangle {}: {} -> {} -> {}", self.idx(), a, b, c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_and_hedges() {
        let mut tds = TriDataStructure::new();
        tds.add_init_tris([0, 1, 2, 3]).unwrap();
        let tri = tds.get_tri(1).unwrap();

        assert_eq!(tri.nodes(), [2, 1, 3]);
        assert_eq!(tri.hedges(), [[2, 1], [1, 3], [3, 2]]);
        assert!(tri.contains(3));
        assert!(!tri.contains(0));
        assert_eq!(tri.to_string(), "Triangle 1: 2 -> 1 -> 3");
    }

    #[test]
    fn test_neighbor() {
        let mut tds = TriDataStructure::new();
        tds.add_init_tris([0, 1, 2, 3]).unwrap();
        let tri = tds.get_tri(0).unwrap();

        // 0 -> 1 is on the hull
        assert_eq!(tri.neighbor(0), None);
        assert_eq!(tri.neighbor(1), Some((1, 3)));
        assert_eq!(tri.neighbor(2), None);
    }
}
