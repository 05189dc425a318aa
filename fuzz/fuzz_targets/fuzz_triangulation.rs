#![no_main]

use cdt2d::{Bounds, Triangulation};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (Bounds, Vec<[f64; 2]>, Vec<(u8, u8)>)| {
    let (bounds, points, edges) = data;

    let Ok(mut triangulation) =
        Triangulation::with_tolerances(bounds, points.len(), Default::default())
    else {
        return;
    };

    let idxs: Vec<usize> = points
        .iter()
        .filter_map(|&[x, y]| triangulation.add_point(x, y).ok())
        .collect();

    for (a, b) in edges {
        if let (Some(&a), Some(&b)) = (idxs.get(a as usize), idxs.get(b as usize)) {
            let _ = triangulation.add_edge(a, b);
        }
    }

    assert!(triangulation.is_sound().unwrap());
});
