//! utils for cdt2d tests and fuzzing
#![forbid(unsafe_code)]
#![deny(unused)]
#![warn(clippy::all, clippy::missing_const_for_fn)]

use rand::{distr::Uniform, prelude::Distribution};
use rand_distr::Normal;
use std::ops::RangeInclusive;

pub type Vertex2 = [f64; 2];

/// Samples `n` vertices in 2D space from the [Uniform] distribution.
///
/// If no range is specified, the unit-square centered around the origin is used, `[-0.5, 0.5]`.
pub fn sample_vertices_2d(n: usize, range: Option<RangeInclusive<f64>>) -> Vec<Vertex2> {
    let mut rng = rand::rng();
    let range = range.unwrap_or(-0.5..=0.5);
    let uniform = Uniform::try_from(range).expect("Expected range with a greater start then end");

    let mut vertices: Vec<[f64; 2]> = Vec::with_capacity(n);
    for _ in 0..n {
        let x = uniform.sample(&mut rng);
        let y = uniform.sample(&mut rng);
        vertices.push([x, y]);
    }

    vertices
}

/// Samples `n` vertices around `num_clusters` uniformly placed centers, each spread by a [Normal]
/// distribution.
///
/// All vertices lie strictly inside the rectangle spanned by `min` and `max`.
pub fn sample_clustered_vertices_2d(
    n: usize,
    num_clusters: usize,
    min: Vertex2,
    max: Vertex2,
) -> Vec<Vertex2> {
    let mut rng = rand::rng();
    let extent = [max[0] - min[0], max[1] - min[1]];
    let margin = [extent[0] * 1e-3, extent[1] * 1e-3];

    let centers: Vec<Vertex2> = (0..num_clusters.max(1))
        .map(|_| {
            let x = Uniform::new(min[0] + margin[0], max[0] - margin[0])
                .expect("Expected a non-empty rectangle")
                .sample(&mut rng);
            let y = Uniform::new(min[1] + margin[1], max[1] - margin[1])
                .expect("Expected a non-empty rectangle")
                .sample(&mut rng);
            [x, y]
        })
        .collect();

    let spread = Normal::new(0.0, extent[0].min(extent[1]) * 0.05).unwrap();

    let mut vertices: Vec<Vertex2> = Vec::with_capacity(n);
    for i in 0..n {
        let center = centers[i % centers.len()];
        let x = (center[0] + spread.sample(&mut rng)).clamp(min[0] + margin[0], max[0] - margin[0]);
        let y = (center[1] + spread.sample(&mut rng)).clamp(min[1] + margin[1], max[1] - margin[1]);
        vertices.push([x, y]);
    }

    vertices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_vertices_2d() {
        let vertices = sample_vertices_2d(100, Some(1.0..=2.0));

        assert_eq!(vertices.len(), 100);
        assert!(vertices
            .iter()
            .all(|v| (1.0..=2.0).contains(&v[0]) && (1.0..=2.0).contains(&v[1])));
    }

    #[test]
    fn test_sample_clustered_vertices_2d() {
        let vertices = sample_clustered_vertices_2d(500, 4, [0.0, 0.0], [10.0, 5.0]);

        assert_eq!(vertices.len(), 500);
        assert!(vertices
            .iter()
            .all(|v| v[0] > 0.0 && v[0] < 10.0 && v[1] > 0.0 && v[1] < 5.0));
    }
}
