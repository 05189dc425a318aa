use core::fmt;

use crate::utils::types::{EdgeIdx, VertexIdx};

use super::tri_data_structure::TriDataStructure;

pub struct EdgeIterator<'a> {
    pub tds: &'a TriDataStructure,
    pub idx: EdgeIdx,
}

impl<'a> EdgeIterator<'a> {
    pub const fn new(tds: &'a TriDataStructure, idx: EdgeIdx) -> Self {
        Self { tds, idx }
    }

    /// Returns the index of this.
    pub const fn idx(&self) -> EdgeIdx {
        self.idx
    }

    /// The two nodes of this edge, smaller index first.
    pub fn nodes(&self) -> [VertexIdx; 2] {
        self.tds.edge_nodes[self.idx]
    }

    /// Whether this edge is a constraint (or on the hull) and must never be flipped.
    pub fn is_fixed(&self) -> bool {
        self.tds.fixed[self.idx]
    }
}

impl fmt::Display for EdgeIterator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b] = self.nodes();
        write!(
            f,
            "Edge {}: {} - {}{}",
            self.idx(),
            a,
            b,
            if self.is_fixed() { " (fixed)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_iterator() {
        let mut tds = TriDataStructure::new();
        tds.add_init_tris([0, 1, 2, 3]).unwrap();

        let hull = tds.get_edge(0).unwrap();
        assert_eq!(hull.nodes(), [0, 1]);
        assert!(hull.is_fixed());
        assert_eq!(hull.to_string(), "Edge 0: 0 - 1 (fixed)");

        let diagonal = tds.get_edge(2).unwrap();
        assert_eq!(diagonal.nodes(), [1, 2]);
        assert!(!diagonal.is_fixed());

        assert!(tds.get_edge(5).is_err());
    }
}
