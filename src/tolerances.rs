//! Numerical tolerances of the triangulation engine.
//!
//! All values are empirical. They must stay below the smallest feature size expected in the
//! input, otherwise distinct points merge or valid triangles are rejected.

/// Tolerances and limits used by point location, constraint insertion and legalization.
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    /// Points closer than this distance to an existing vertex reuse its index.
    pub dedup: f64,
    /// Slack on barycentric coordinates for the point-in-triangle and point-in-angle tests.
    pub barycentric: f64,
    /// A vertex whose doubled signed area w.r.t. a constraint is within this value lies on it.
    pub collinear: f64,
    /// Minimum incircle determinant that triggers an edge flip.
    ///
    /// Near-cocircular quads below this value are left alone, which keeps legalization from
    /// flipping the same edge back and forth.
    pub flip: f64,
    /// Triangles a single constraint may cross before its insertion is aborted with
    /// [`crate::CdtError::InfiniteLoop`].
    pub max_crossed_tris: usize,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self::new()
    }
}

impl Tolerances {
    pub const fn new() -> Self {
        Self {
            dedup: 1e-6,
            barycentric: 4e-6,
            collinear: 1e-12,
            flip: 1e-7,
            max_crossed_tris: 100_000,
        }
    }

    /// Set the deduplication distance.
    #[must_use]
    pub const fn with_dedup(mut self, dedup: f64) -> Self {
        self.dedup = dedup;
        self
    }

    /// Set the barycentric slack.
    #[must_use]
    pub const fn with_barycentric(mut self, barycentric: f64) -> Self {
        self.barycentric = barycentric;
        self
    }

    /// Set the collinearity threshold.
    #[must_use]
    pub const fn with_collinear(mut self, collinear: f64) -> Self {
        self.collinear = collinear;
        self
    }

    /// Set the flip threshold.
    #[must_use]
    pub const fn with_flip(mut self, flip: f64) -> Self {
        self.flip = flip;
        self
    }

    /// Set the crossed-triangle limit of a constraint walk.
    #[must_use]
    pub const fn with_max_crossed_tris(mut self, max_crossed_tris: usize) -> Self {
        self.max_crossed_tris = max_crossed_tris;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let tolerances = Tolerances::default();
        assert_eq!(tolerances.dedup, 1e-6);
        assert_eq!(tolerances.barycentric, 4e-6);
        assert_eq!(tolerances.collinear, 1e-12);
        assert_eq!(tolerances.flip, 1e-7);
        assert_eq!(tolerances.max_crossed_tris, 100_000);
    }

    #[test]
    fn test_builder() {
        let tolerances = Tolerances::new().with_dedup(1e-3).with_flip(0.0);
        assert_eq!(tolerances.dedup, 1e-3);
        assert_eq!(tolerances.flip, 0.0);
        assert_eq!(tolerances.barycentric, 4e-6);

        let tolerances = tolerances.with_max_crossed_tris(8);
        assert_eq!(tolerances.max_crossed_tris, 8);
        assert_eq!(tolerances.dedup, 1e-3);
    }
}
