use anyhow::{bail, ensure, Ok as HowOk, Result as HowResult};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::{
    error::CdtError,
    predicates::{
        barycentric, depth_in_triangle, dist_sq, is_clockwise, lifted_det, orient_2d,
        point_in_angle, point_in_triangle, side_of_line,
    },
    tolerances::Tolerances,
    trids::{
        edge_iterator::EdgeIterator,
        tri_data_structure::{canonical, TriDataStructure},
        tri_iterator::TriIterator,
    },
    utils::{
        helper::DisplayWrapper,
        types::{EdgeIdx, TriIdx, Triangle2, Vertex2, VertexIdx},
    },
};

/// The axis-aligned rectangle a triangulation covers.
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
    pub top: f64,
}

impl Bounds {
    pub const fn new(left: f64, right: f64, bottom: f64, top: f64) -> Self {
        Self {
            left,
            right,
            bottom,
            top,
        }
    }

    /// Finite and non-empty.
    pub fn is_valid(&self) -> bool {
        [self.left, self.right, self.bottom, self.top]
            .iter()
            .all(|b| b.is_finite())
            && self.left < self.right
            && self.bottom < self.top
    }

    /// Returns `true` if `p` is strictly inside, i.e. not on the border. `NaN` is never inside.
    pub fn contains_strictly(&self, p: &Vertex2) -> bool {
        p[0] > self.left && p[0] < self.right && p[1] > self.bottom && p[1] < self.top
    }

    /// The corners in vertex order: bottom-left, top-left, bottom-right, top-right.
    pub const fn corners(&self) -> [Vertex2; 4] {
        [
            [self.left, self.bottom],
            [self.left, self.top],
            [self.right, self.bottom],
            [self.right, self.top],
        ]
    }
}

/// Where a new point falls in the current triangulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Outside,
    Inside(TriIdx),
    OnEdge([TriIdx; 2]),
    /// More than two triangles claim the point, see [`PointScratch::hits`].
    Degenerate,
}

#[derive(Debug, Clone, Copy)]
enum Split {
    OneToThree(TriIdx),
    TwoToFour {
        tris: [TriIdx; 2],
        quad: [VertexIdx; 4],
        edge: EdgeIdx,
    },
}

/// How far a single tunnel walk got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    /// The constraint is in place.
    Done,
    /// A vertex lies on the constraint next to its start; constrain both halves.
    SplitAt(VertexIdx),
    /// The constraint is in place up to this vertex; the rest still has to be inserted.
    ContinueFrom(VertexIdx),
}

/// Buffers reused by every point insertion.
#[derive(Debug, Clone, Default)]
struct PointScratch {
    /// Triangles that contain the point being located, within the barycentric slack.
    hits: Vec<TriIdx>,
    by_distance: Vec<VertexIdx>,
    /// Legalization worklist.
    check_tris: Vec<TriIdx>,
}

impl PointScratch {
    fn clear(&mut self) {
        self.hits.clear();
        self.by_distance.clear();
        self.check_tris.clear();
    }
}

/// Buffers reused by every constraint insertion.
#[derive(Debug, Clone, Default)]
struct ConstraintScratch {
    upper: Vec<VertexIdx>,
    lower: Vec<VertexIdx>,
    dead_tris: Vec<TriIdx>,
    crossed_edges: Vec<[VertexIdx; 2]>,
    dead_edge_slots: Vec<EdgeIdx>,
    new_tris: Vec<[VertexIdx; 3]>,
    new_edges: Vec<[VertexIdx; 2]>,
}

impl ConstraintScratch {
    fn clear(&mut self) {
        self.upper.clear();
        self.lower.clear();
        self.dead_tris.clear();
        self.crossed_edges.clear();
        self.dead_edge_slots.clear();
        self.new_tris.clear();
        self.new_edges.clear();
    }
}

/// A 2D constrained Delaunay triangulation inside a fixed rectangle.
///
/// The four corners of the rectangle are vertices `0..4`; every point added afterwards gets the
/// next index. Triangles are wound clockwise (y-up), edges added with [`Self::add_edge`] are never
/// flipped.
///
/// ```
/// use cdt2d::Triangulation;
///
/// let mut triangulation = Triangulation::new(0.0, 10.0, 0.0, 10.0, 16).unwrap();
///
/// let a = triangulation.add_point(2.0, 2.0).unwrap();
/// let b = triangulation.add_point(8.0, 7.0).unwrap();
/// triangulation.add_point(3.0, 7.0).unwrap();
/// triangulation.add_point(7.0, 2.5).unwrap();
/// triangulation.add_edge(a, b).unwrap();
///
/// assert!(triangulation.is_fixed(a, b));
/// assert!(triangulation.is_sound().unwrap());
/// assert_eq!(triangulation.num_tris(), 2 * triangulation.num_vertices() - 6);
/// ```
#[derive(Debug, Clone)]
pub struct Triangulation {
    pub tds: TriDataStructure,
    vertices: Vec<Vertex2>,
    bounds: Bounds,
    capacity: usize,
    tolerances: Tolerances,
    point_scratch: PointScratch,
    scratch: ConstraintScratch,
    time_locating: u128,
    time_inserting: u128,
    time_flipping: u128,
    time_constraining: u128,
}

impl Triangulation {
    /// Create a triangulation of the rectangle `[left, right] x [bottom, top]` with room for
    /// `capacity` points besides the four corners.
    pub fn new(
        left: f64,
        right: f64,
        bottom: f64,
        top: f64,
        capacity: usize,
    ) -> Result<Self, CdtError> {
        Self::with_tolerances(
            Bounds::new(left, right, bottom, top),
            capacity,
            Tolerances::default(),
        )
    }

    pub fn with_tolerances(
        bounds: Bounds,
        capacity: usize,
        tolerances: Tolerances,
    ) -> Result<Self, CdtError> {
        if !bounds.is_valid() {
            return Err(CdtError::InvalidBounds {
                left: bounds.left,
                right: bounds.right,
                bottom: bounds.bottom,
                top: bounds.top,
            });
        }

        let num_vertices = capacity + 4;
        let mut vertices = Vec::with_capacity(num_vertices);
        vertices.extend_from_slice(&bounds.corners());

        let mut tds = TriDataStructure::with_capacity(num_vertices);
        tds.add_init_tris([0, 1, 2, 3])
            .map_err(|_| CdtError::Corrupted {
                reason: "fresh triangulation already had triangles",
            })?;

        Ok(Self {
            tds,
            vertices,
            bounds,
            capacity,
            tolerances,
            point_scratch: PointScratch::default(),
            scratch: ConstraintScratch::default(),
            time_locating: 0,
            time_inserting: 0,
            time_flipping: 0,
            time_constraining: 0,
        })
    }

    /// Insert a point and retrieve its vertex index.
    ///
    /// A point within the dedup distance of an existing vertex is not inserted; the existing
    /// index is returned instead. A point no triangle can be split for, even with exact
    /// orientation tests, fails with [`CdtError::UnresolvedPoint`] and leaves the triangulation
    /// untouched. The triangulation is Delaunay again afterwards, except across fixed edges.
    pub fn add_point(&mut self, x: f64, y: f64) -> Result<VertexIdx, CdtError> {
        let p = [x, y];
        if !self.bounds.contains_strictly(&p) {
            return Err(CdtError::OutOfBounds { x, y });
        }

        let now = std::time::Instant::now();

        let (nearest, nearest_dist_sq) = self.nearest_vertex(&p);
        if nearest_dist_sq < self.tolerances.dedup * self.tolerances.dedup {
            log::trace!(
                "{} duplicates vertex {nearest}, skipping",
                DisplayWrapper(p)
            );
            return Ok(nearest);
        }

        if self.vertices.len() >= self.capacity + 4 {
            return Err(CdtError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let mut scratch = std::mem::take(&mut self.point_scratch);
        scratch.clear();
        let result = self.insert_point(&mut scratch, p, nearest, now);
        scratch.clear();
        self.point_scratch = scratch;

        result
    }

    /// Locate `p`, split the triangulation there and legalize.
    fn insert_point(
        &mut self,
        scratch: &mut PointScratch,
        p: Vertex2,
        nearest: VertexIdx,
        now: std::time::Instant,
    ) -> Result<VertexIdx, CdtError> {
        let [x, y] = p;

        let location = self.locate(&p, nearest, scratch);
        self.time_locating += now.elapsed().as_micros();

        let split = match location {
            Location::Outside => return Err(CdtError::OutOfBounds { x, y }),
            Location::Inside(tri) => self.plan_1_to_3(tri, &p),
            Location::OnEdge(tris) => self.plan_split_on_edge(tris, &p),
            Location::Degenerate => None,
        }
        .or_else(|| self.plan_among(&scratch.hits, &p));

        let Some(split) = split else {
            log::debug!(
                "No valid split for {} ({location:?}, {} candidate triangles)",
                DisplayWrapper(p),
                scratch.hits.len()
            );
            return Err(CdtError::UnresolvedPoint { x, y });
        };

        let now = std::time::Instant::now();

        let idx = self.vertices.len();
        self.vertices.push(p);

        match split {
            Split::OneToThree(tri) => {
                log::trace!("1->3 split of {} by vertex {idx}", tri);
                let touched = self.tds.flip_1_to_3(tri, idx);
                scratch.check_tris.extend_from_slice(&touched);
            }
            Split::TwoToFour { tris, quad, edge } => {
                log::trace!("2->4 split of {:?} by vertex {idx}", tris);
                let touched = self.tds.flip_2_to_4(tris, quad, edge, idx);
                scratch.check_tris.extend_from_slice(&touched);
            }
        }

        self.time_inserting += now.elapsed().as_micros();

        let now = std::time::Instant::now();
        self.legalize(&mut scratch.check_tris);
        self.time_flipping += now.elapsed().as_micros();

        Ok(idx)
    }

    /// Insert a set of points, retrieving the vertex index of each.
    pub fn insert_vertices(&mut self, vertices: &[Vertex2]) -> Result<Vec<VertexIdx>, CdtError> {
        log::debug!("Inserting {} vertices", vertices.len());

        let idxs = vertices
            .iter()
            .map(|&[x, y]| self.add_point(x, y))
            .collect::<Result<Vec<_>, _>>()?;

        self.log_time();

        Ok(idxs)
    }

    /// Force the segment between two existing vertices into the triangulation and fix it.
    ///
    /// Non-fixed edges crossing the segment are removed and the two sides are retriangulated.
    /// A segment running through other vertices is split there, each piece ends up fixed.
    /// Crossing an earlier constraint removes it.
    pub fn add_edge(&mut self, a: VertexIdx, b: VertexIdx) -> Result<(), CdtError> {
        if a == b {
            return Err(CdtError::DegenerateEdge { index: a });
        }
        for index in [a, b] {
            if index >= self.vertices.len() {
                return Err(CdtError::InvalidVertex {
                    index,
                    num_vertices: self.vertices.len(),
                });
            }
        }

        let now = std::time::Instant::now();
        let result = self.insert_constraint(a, b);
        self.time_constraining += now.elapsed().as_micros();

        result
    }

    /// Insert a set of constraints.
    pub fn insert_edges(&mut self, edges: &[[VertexIdx; 2]]) -> Result<(), CdtError> {
        log::debug!("Inserting {} edges", edges.len());

        for &[a, b] in edges {
            self.add_edge(a, b)?;
        }

        self.log_time();

        Ok(())
    }

    /// Returns the quad `a, b, c, d` of two triangles sharing the edge `bd`.
    ///
    /// `a` belongs to `tri_a` only, `c` to `tri_b` only; both triangles are clockwise, so is the
    /// quad. `None` if the triangles do not share exactly one edge.
    pub fn shared_quad(&self, tri_a: TriIdx, tri_b: TriIdx) -> Option<[VertexIdx; 4]> {
        if tri_a >= self.num_tris() || tri_b >= self.num_tris() {
            return None;
        }
        self.tds.shared_quad(tri_a, tri_b)
    }

    fn nearest_vertex(&self, p: &Vertex2) -> (VertexIdx, f64) {
        self.vertices
            .iter()
            .enumerate()
            .map(|(idx, v)| (idx, dist_sq(p, v)))
            .fold((0, f64::INFINITY), |best, candidate| {
                if candidate.1 < best.1 {
                    candidate
                } else {
                    best
                }
            })
    }

    /// Collect the triangles incident to `v` that contain `p`.
    fn containing_tris_at(&self, p: &Vertex2, v: VertexIdx, hits: &mut Vec<TriIdx>) {
        let eps = self.tolerances.barycentric;

        hits.extend(
            self.tds
                .tris()
                .filter(|tri| tri.contains(v))
                .filter(|tri| {
                    let [a, b, c] = tri.nodes().map(|n| self.vertices[n]);
                    point_in_triangle(p, &a, &b, &c, eps)
                })
                .map(|tri| tri.idx()),
        );
    }

    /// Locate `p`, starting at the triangles around its nearest vertex.
    ///
    /// Every containing triangle ends up in `scratch.hits`.
    fn locate(&self, p: &Vertex2, nearest: VertexIdx, scratch: &mut PointScratch) -> Location {
        self.containing_tris_at(p, nearest, &mut scratch.hits);

        if scratch.hits.is_empty() {
            scratch
                .by_distance
                .extend((0..self.vertices.len()).filter(|&v| v != nearest));
            scratch.by_distance.sort_by(|&i, &j| {
                dist_sq(p, &self.vertices[i]).total_cmp(&dist_sq(p, &self.vertices[j]))
            });

            for &v in &scratch.by_distance {
                self.containing_tris_at(p, v, &mut scratch.hits);
                if !scratch.hits.is_empty() {
                    break;
                }
            }
        }

        // a point on an edge whose far side does not touch the nearest vertex
        if scratch.hits.len() == 1 {
            let eps = self.tolerances.barycentric;
            let tri = TriIterator::new(&self.tds, scratch.hits[0]);
            for i in 0..3 {
                if let Some((neighbor, _)) = tri.neighbor(i) {
                    let [a, b, c] = self.tds.tri_nodes(neighbor).map(|n| self.vertices[n]);
                    if point_in_triangle(p, &a, &b, &c, eps) && !scratch.hits.contains(&neighbor) {
                        scratch.hits.push(neighbor);
                    }
                }
            }
        }

        match scratch.hits[..] {
            [] => Location::Outside,
            [tri] => Location::Inside(tri),
            [t0, t1] => Location::OnEdge([t0, t1]),
            _ => Location::Degenerate,
        }
    }

    fn plan_1_to_3(&self, tri: TriIdx, p: &Vertex2) -> Option<Split> {
        let [a, b, c] = self.tds.tri_nodes(tri).map(|n| self.vertices[n]);

        (is_clockwise(&a, &b, p) && is_clockwise(&b, &c, p) && is_clockwise(&c, &a, p))
            .then_some(Split::OneToThree(tri))
    }

    fn plan_2_to_4(&self, tris: [TriIdx; 2], p: &Vertex2) -> Option<Split> {
        let quad = self.tds.shared_quad(tris[0], tris[1])?;
        let edge = self.tds.find_edge(quad[1], quad[3])?;
        let [a, b, c, d] = quad.map(|n| self.vertices[n]);

        (is_clockwise(&a, &b, p)
            && is_clockwise(&b, &c, p)
            && is_clockwise(&c, &d, p)
            && is_clockwise(&d, &a, p))
        .then_some(Split::TwoToFour { tris, quad, edge })
    }

    fn plan_split_on_edge(&self, tris: [TriIdx; 2], p: &Vertex2) -> Option<Split> {
        self.plan_2_to_4(tris, p).or_else(|| {
            // not exactly on the edge, split the triangle the point is deepest in
            let deepest = if self.depth_of(tris[0], p) >= self.depth_of(tris[1], p) {
                tris[0]
            } else {
                tris[1]
            };
            self.plan_1_to_3(deepest, p)
        })
    }

    /// Split for a point several triangles claim: the triangle it lies deepest in, otherwise an
    /// edge shared by two of them.
    fn plan_among(&self, hits: &[TriIdx], p: &Vertex2) -> Option<Split> {
        let deepest = hits
            .iter()
            .copied()
            .max_by(|&s, &t| self.depth_of(s, p).total_cmp(&self.depth_of(t, p)))?;
        if let Some(split) = self.plan_1_to_3(deepest, p) {
            return Some(split);
        }

        hits.iter().enumerate().find_map(|(i, &t0)| {
            hits[i + 1..]
                .iter()
                .find_map(|&t1| self.plan_2_to_4([t0, t1], p))
        })
    }

    fn depth_of(&self, tri: TriIdx, p: &Vertex2) -> f64 {
        let [a, b, c] = self.tds.tri_nodes(tri).map(|n| self.vertices[n]);
        depth_in_triangle(p, &a, &b, &c)
    }

    /// Returns `true` if the quad `abcd` should have its diagonal `bd` flipped to `ac`.
    fn should_flip(&self, quad: [VertexIdx; 4]) -> bool {
        let [a, b, c, d] = quad.map(|n| self.vertices[n]);
        lifted_det(&d, &c, &b, &a) > self.tolerances.flip
    }

    /// Restore the Delaunay property by flipping non-fixed edges, starting at the given triangles.
    fn legalize(&mut self, stack: &mut Vec<TriIdx>) {
        let mut num_flips = 0;

        while let Some(tri) = stack.pop() {
            let nodes = self.tds.tri_nodes(tri);

            for i in 0..3 {
                let (from, to) = (nodes[(i + 1) % 3], nodes[i]);

                let Some(edge) = self.tds.find_edge(from, to) else {
                    continue;
                };
                if self.tds.fixed[edge] {
                    continue;
                }
                let Some((neighbor, _)) = self.tds.find_tri_with_hedge(from, to, Some(tri)) else {
                    continue;
                };
                let Some(quad) = self.tds.shared_quad(tri, neighbor) else {
                    continue;
                };

                if self.should_flip(quad) {
                    self.tds.flip_2_to_2([tri, neighbor], quad, edge);
                    num_flips += 1;

                    stack.push(tri);
                    stack.push(neighbor);
                    break;
                }
            }
        }

        log::trace!("Legalized with {num_flips} flips");
    }

    /// Insert the constraint `a - b`, which may span several tunnels.
    fn insert_constraint(&mut self, a: VertexIdx, b: VertexIdx) -> Result<(), CdtError> {
        if let Some(edge) = self.tds.find_edge(a, b) {
            self.tds.set_fixed(edge, true);
            return Ok(());
        }

        let [start, end] = canonical(a, b);

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        let segment = self.constrain_segment(&mut scratch, start, end);
        scratch.clear();
        self.scratch = scratch;

        match segment? {
            Segment::Done => Ok(()),
            Segment::SplitAt(v) => {
                log::trace!("Constraint {start} - {end} runs through vertex {v}");
                self.insert_constraint(start, v)?;
                self.insert_constraint(v, end)
            }
            Segment::ContinueFrom(v) => {
                log::trace!("Constraint {start} - {end} runs through vertex {v}");
                self.insert_constraint(v, end)
            }
        }
    }

    /// Find the triangle at `start` whose wedge the constraint leaves through, rotated so that
    /// `start` comes first.
    fn first_crossed_tri(&self, start: VertexIdx, end: VertexIdx) -> Option<(TriIdx, [VertexIdx; 3])> {
        let eps = self.tolerances.barycentric;
        let p_start = self.vertices[start];
        let p_end = self.vertices[end];

        let mut best: Option<(f64, TriIdx, [VertexIdx; 3])> = None;

        for tri in self.tds.tris().filter(|tri| tri.contains(start)) {
            let nodes = tri.nodes();
            let Some(pos) = nodes.iter().position(|&n| n == start) else {
                continue;
            };
            let rotated = [nodes[pos], nodes[(pos + 1) % 3], nodes[(pos + 2) % 3]];
            let [_, x1, x2] = rotated.map(|n| self.vertices[n]);

            if !point_in_angle(&p_end, &p_start, &x1, &x2, eps) {
                continue;
            }

            let (u, v) = barycentric(&p_end, &p_start, &x1, &x2);
            let score = u.min(v);
            if best.map_or(true, |(best_score, _, _)| score > best_score) {
                best = Some((score, tri.idx(), rotated));
            }
        }

        best.map(|(_, tri, rotated)| (tri, rotated))
    }

    /// Returns `true` if `v` lies on the open segment `start - end`, within the collinear tolerance.
    fn is_on_segment(&self, start: VertexIdx, end: VertexIdx, v: VertexIdx) -> bool {
        let [a, b, p] = [start, end, v].map(|n| self.vertices[n]);

        if side_of_line(&a, &b, &p).abs() > self.tolerances.collinear {
            return false;
        }

        let along = (p[0] - a[0]) * (b[0] - a[0]) + (p[1] - a[1]) * (b[1] - a[1]);
        along > 0.0 && along < dist_sq(&a, &b)
    }

    /// Walk the tunnel of triangles crossed by `start - end`, then replace them.
    fn constrain_segment(
        &mut self,
        scratch: &mut ConstraintScratch,
        start: VertexIdx,
        end: VertexIdx,
    ) -> Result<Segment, CdtError> {
        let (first, [_, x1, x2]) =
            self.first_crossed_tri(start, end)
                .ok_or(CdtError::Corrupted {
                    reason: "no triangle at the constraint start faces its end",
                })?;

        for x in [x1, x2] {
            if x == end {
                return Err(CdtError::Corrupted {
                    reason: "constraint endpoints are adjacent but share no edge",
                });
            }
            if self.is_on_segment(start, end, x) {
                return Ok(Segment::SplitAt(x));
            }
        }

        let hit = self.walk_tunnel(scratch, first, start, end, x1, x2)?;
        let tunnel_end = hit.unwrap_or(end);

        log::trace!(
            "Constraint {start} - {tunnel_end} crosses {} triangles",
            scratch.dead_tris.len()
        );

        self.retriangulate_tunnel(scratch, start, tunnel_end)?;

        Ok(hit.map_or(Segment::Done, Segment::ContinueFrom))
    }

    /// Collect the crossed triangles and edges and the vertices on either side of the constraint.
    ///
    /// Returns the vertex the walk stopped at if it lies on the constraint before `end`.
    fn walk_tunnel(
        &self,
        scratch: &mut ConstraintScratch,
        first: TriIdx,
        start: VertexIdx,
        end: VertexIdx,
        x1: VertexIdx,
        x2: VertexIdx,
    ) -> Result<Option<VertexIdx>, CdtError> {
        let p_start = self.vertices[start];
        let p_end = self.vertices[end];

        let (mut up, mut low) = (x1, x2);
        let mut tri = first;

        scratch.dead_tris.push(first);
        scratch.upper.push(x1);
        scratch.lower.push(x2);

        loop {
            scratch.crossed_edges.push([up, low]);

            if let Some(edge) = self.tds.find_edge(up, low) {
                if self.tds.fixed[edge] {
                    log::warn!("Constraint {start} - {end} removes fixed edge {up} - {low}");
                }
            }

            let (next, apex) = self
                .tds
                .find_tri_with_hedge(low, up, Some(tri))
                .ok_or(CdtError::Corrupted {
                    reason: "constraint leaves the triangulation",
                })?;

            scratch.dead_tris.push(next);
            if scratch.dead_tris.len() > self.tolerances.max_crossed_tris {
                return Err(CdtError::InfiniteLoop {
                    crossed: scratch.dead_tris.len(),
                });
            }

            if apex == end {
                return Ok(None);
            }

            let side = side_of_line(&p_start, &p_end, &self.vertices[apex]);
            if side > self.tolerances.collinear {
                scratch.upper.push(apex);
                up = apex;
            } else if side < -self.tolerances.collinear {
                scratch.lower.push(apex);
                low = apex;
            } else {
                return Ok(Some(apex));
            }

            tri = next;
        }
    }

    /// Fill both sides of the walked tunnel and splice the result into the dead slots.
    fn retriangulate_tunnel(
        &mut self,
        scratch: &mut ConstraintScratch,
        start: VertexIdx,
        end: VertexIdx,
    ) -> Result<(), CdtError> {
        retriangulate(
            &self.vertices,
            &scratch.upper,
            [start, end],
            true,
            &mut scratch.new_tris,
            &mut scratch.new_edges,
        );
        scratch.lower.reverse();
        retriangulate(
            &self.vertices,
            &scratch.lower,
            [end, start],
            true,
            &mut scratch.new_tris,
            &mut scratch.new_edges,
        );
        scratch.new_edges.push([start, end]);

        if scratch.new_tris.len() != scratch.dead_tris.len() {
            return Err(CdtError::Corrupted {
                reason: "retriangulated tunnel has a different number of triangles",
            });
        }
        if scratch.new_edges.len() != scratch.crossed_edges.len() {
            return Err(CdtError::Corrupted {
                reason: "retriangulated tunnel has a different number of edges",
            });
        }

        for &[u, v] in &scratch.crossed_edges {
            let slot = self.tds.find_edge(u, v).ok_or(CdtError::Corrupted {
                reason: "crossed edge is missing from the edge buffer",
            })?;
            scratch.dead_edge_slots.push(slot);
        }

        for (&slot, &nodes) in scratch.dead_tris.iter().zip(&scratch.new_tris) {
            self.tds.replace_tri(slot, nodes);
        }

        let constraint = canonical(start, end);
        for (&slot, &[u, v]) in scratch.dead_edge_slots.iter().zip(&scratch.new_edges) {
            self.tds
                .replace_edge(slot, [u, v], canonical(u, v) == constraint);
        }

        Ok(())
    }

    /// All vertex coordinates, the four corners first.
    pub fn vertices(&self) -> &[Vertex2] {
        &self.vertices
    }

    /// Iterate over all edges.
    pub fn edges(&self) -> impl Iterator<Item = EdgeIterator<'_>> {
        self.tds.edges()
    }

    /// All triangles as clockwise vertex index triples.
    pub fn tris(&self) -> Vec<[VertexIdx; 3]> {
        self.tds.tris().map(|tri| tri.nodes()).collect()
    }

    /// All triangles as clockwise coordinate triples.
    pub fn tri_coords(&self) -> Vec<Triangle2> {
        self.tds
            .tris()
            .map(|tri| tri.nodes().map(|n| self.vertices[n]))
            .collect()
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.tds.num_edges()
    }

    pub fn num_tris(&self) -> usize {
        self.tds.num_tris()
    }

    /// Returns `true` if the edge `a - b` exists and is fixed.
    pub fn is_fixed(&self, a: VertexIdx, b: VertexIdx) -> bool {
        self.tds
            .find_edge(a, b)
            .is_some_and(|edge| self.tds.fixed[edge])
    }

    /// Index of the edge `a - b`, in any order.
    pub fn find_edge(&self, a: VertexIdx, b: VertexIdx) -> Option<EdgeIdx> {
        self.tds.find_edge(a, b)
    }

    pub const fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Number of points that can be inserted besides the four corners.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub const fn tolerances(&self) -> Tolerances {
        self.tolerances
    }

    /// Check topology, winding and the Euler counts, failing on the first violation.
    pub fn check_invariants(&self) -> HowResult<()> {
        let num_vertices = self.num_vertices();
        self.tds.check_topology(num_vertices)?;

        for tri in self.tds.tris() {
            let [a, b, c] = tri.nodes().map(|n| self.vertices[n]);
            match orient_2d(&a, &b, &c) {
                -1 => {}
                0 => bail!("Flat triangle: {tri}"),
                _ => bail!("Counter-clockwise triangle: {tri}"),
            }
        }

        let (max_edges, max_tris) = TriDataStructure::max_sizes(num_vertices);
        ensure!(
            self.num_tris() == max_tris,
            "Expected {max_tris} triangles for {num_vertices} vertices, found {}",
            self.num_tris()
        );
        ensure!(
            self.num_edges() == max_edges,
            "Expected {max_edges} edges for {num_vertices} vertices, found {}",
            self.num_edges()
        );

        HowOk(())
    }

    pub fn is_sound(&self) -> HowResult<bool> {
        match self.check_invariants() {
            Ok(()) => HowOk(true),
            Err(e) => {
                log::error!("Triangulation is not sound: {e}");
                HowOk(false)
            }
        }
    }

    /// Returns `None` for fixed and hull edges, otherwise whether the edge is locally Delaunay.
    fn is_edge_legal(
        &self,
        edge: EdgeIdx,
        hedges: &std::collections::HashMap<(VertexIdx, VertexIdx), TriIdx>,
    ) -> Option<bool> {
        if self.tds.fixed[edge] {
            return None;
        }
        let [u, v] = self.tds.edge_nodes[edge];
        let tri_a = *hedges.get(&(u, v))?;
        let tri_b = *hedges.get(&(v, u))?;
        let quad = self.tds.shared_quad(tri_a, tri_b)?;

        Some(!self.should_flip(quad))
    }

    /// Check that every non-fixed interior edge is locally Delaunay.
    ///
    /// Returns whether all are, and the ratio of legal edges.
    pub fn is_delaunay(&self) -> HowResult<(bool, f64)> {
        let hedges = self.tds.hedge_map();
        let mut num_checked = 0;
        let mut num_illegal = 0;

        for edge in 0..self.num_edges() {
            match self.is_edge_legal(edge, &hedges) {
                None => {}
                Some(true) => num_checked += 1,
                Some(false) => {
                    log::error!("Illegal edge: {}", self.tds.get_edge(edge)?);
                    num_checked += 1;
                    num_illegal += 1;
                }
            }
        }

        if num_checked == 0 {
            return HowOk((true, 1.0));
        }

        HowOk((
            num_illegal == 0,
            1.0 - num_illegal as f64 / num_checked as f64,
        ))
    }

    /// Checks the Delaunay property in a parallel manner using `rayon`s `into_par_iter()`.
    ///
    /// Returns the ratio of legal non-fixed interior edges.
    #[must_use]
    pub fn is_delaunay_p(&self) -> f64 {
        let hedges = self.tds.hedge_map();

        let (num_checked, num_illegal) = (0..self.num_edges())
            .into_par_iter()
            .map(|edge| match self.is_edge_legal(edge, &hedges) {
                None => (0, 0),
                Some(true) => (1, 0),
                Some(false) => (1, 1),
            })
            .reduce(|| (0usize, 0usize), |a, b| (a.0 + b.0, a.1 + b.1));

        if num_checked == 0 {
            return 1.0;
        }

        1.0 - num_illegal as f64 / num_checked as f64
    }

    fn log_time(&self) {
        log::debug!("-------------------------------------------");
        log::debug!("Time elapsed:");
        log::debug!("Locates computed in {} μs", self.time_locating);
        log::debug!("Inserts computed in {} μs", self.time_inserting);
        log::debug!("Flips computed in {} μs", self.time_flipping);
        log::debug!("Constraints computed in {} μs", self.time_constraining);
    }
}

/// Triangulate the pseudo-polygon formed by `chain` and the base edge `e0 - e1`.
///
/// The chain runs from `e0` to `e1` and lies to the left of `e0 -> e1`. The root call does not
/// emit its base edge.
fn retriangulate(
    vertices: &[Vertex2],
    chain: &[VertexIdx],
    [e0, e1]: [VertexIdx; 2],
    is_root: bool,
    new_tris: &mut Vec<[VertexIdx; 3]>,
    new_edges: &mut Vec<[VertexIdx; 2]>,
) {
    if chain.is_empty() {
        return;
    }

    let a = vertices[e0];
    let b = vertices[e1];

    let mut apex_pos = 0;
    for (pos, &candidate) in chain.iter().enumerate().skip(1) {
        if lifted_det(&a, &b, &vertices[chain[apex_pos]], &vertices[candidate]) > 0.0 {
            apex_pos = pos;
        }
    }
    let apex = chain[apex_pos];

    retriangulate(
        vertices,
        &chain[..apex_pos],
        [e0, apex],
        false,
        new_tris,
        new_edges,
    );
    retriangulate(
        vertices,
        &chain[apex_pos + 1..],
        [apex, e1],
        false,
        new_tris,
        new_edges,
    );

    new_tris.push([e1, e0, apex]);
    if !is_root {
        new_edges.push([e0, e1]);
    }
}

impl PartialEq for Triangulation {
    fn eq(&self, other: &Self) -> bool {
        self.vertices == other.vertices
            && self.tds.tri_nodes == other.tds.tri_nodes
            && self.tds.edge_nodes == other.tds.edge_nodes
            && self.tds.fixed == other.tds.fixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdt_test_utils::{sample_clustered_vertices_2d, sample_vertices_2d};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn square(capacity: usize) -> Triangulation {
        Triangulation::new(0.0, 10.0, 0.0, 10.0, capacity).unwrap()
    }

    fn verify_triangulation(triangulation: &Triangulation) {
        triangulation.check_invariants().unwrap();
        assert!(triangulation.is_sound().unwrap());

        for tri in triangulation.tri_coords() {
            assert!(is_clockwise(&tri[0], &tri[1], &tri[2]));
        }
    }

    fn verify_delaunay(triangulation: &Triangulation) {
        let (delaunay, ratio) = triangulation.is_delaunay().unwrap();
        assert!(delaunay);
        assert_eq!(ratio, 1.0);
        assert_eq!(triangulation.is_delaunay_p(), 1.0);
    }

    const NUM_VERTICES_LIST: [usize; 5] = [3, 10, 50, 100, 500];

    #[test]
    fn test_new() {
        let triangulation = square(4);

        assert_eq!(triangulation.num_vertices(), 4);
        assert_eq!(triangulation.num_tris(), 2);
        assert_eq!(triangulation.num_edges(), 5);
        assert_eq!(
            triangulation.vertices(),
            &[[0.0, 0.0], [0.0, 10.0], [10.0, 0.0], [10.0, 10.0]]
        );
        assert_eq!(triangulation.tris(), vec![[0, 1, 2], [2, 1, 3]]);

        assert!(triangulation.is_fixed(0, 1));
        assert!(triangulation.is_fixed(2, 0));
        assert!(triangulation.is_fixed(1, 3));
        assert!(triangulation.is_fixed(3, 2));
        assert!(!triangulation.is_fixed(1, 2));

        verify_triangulation(&triangulation);
    }

    #[test]
    fn test_invalid_bounds() {
        for (l, r, b, t) in [
            (10.0, 0.0, 0.0, 10.0),
            (0.0, 10.0, 5.0, 5.0),
            (0.0, f64::INFINITY, 0.0, 10.0),
            (f64::NAN, 10.0, 0.0, 10.0),
        ] {
            assert!(matches!(
                Triangulation::new(l, r, b, t, 1),
                Err(CdtError::InvalidBounds { .. })
            ));
        }
    }

    #[test]
    fn test_interior_point() {
        init_logger();
        let mut triangulation = square(4);

        let idx = triangulation.add_point(2.0, 3.0).unwrap();

        assert_eq!(idx, 4);
        assert_eq!(triangulation.num_vertices(), 5);
        assert_eq!(triangulation.num_tris(), 4);
        assert_eq!(triangulation.num_edges(), 8);
        // the circle through 1, 2 and the new point contains 3
        assert!(triangulation.find_edge(1, 2).is_none());
        assert!(triangulation.find_edge(3, 4).is_some());

        verify_triangulation(&triangulation);
        verify_delaunay(&triangulation);
    }

    #[test]
    fn test_point_on_diagonal() {
        init_logger();
        let mut triangulation = square(4);

        let idx = triangulation.add_point(5.0, 5.0).unwrap();

        assert_eq!(idx, 4);
        assert_eq!(triangulation.num_tris(), 4);
        assert!(triangulation.find_edge(1, 2).is_none());
        for corner in 0..4 {
            assert!(triangulation.find_edge(corner, 4).is_some());
            assert!(!triangulation.is_fixed(corner, 4));
        }

        verify_triangulation(&triangulation);
        verify_delaunay(&triangulation);
    }

    #[test]
    fn test_point_on_fixed_edge_keeps_halves_fixed() {
        let mut triangulation = square(4);
        let a = triangulation.add_point(2.0, 2.0).unwrap();
        let b = triangulation.add_point(8.0, 8.0).unwrap();
        triangulation.add_edge(a, b).unwrap();
        assert!(triangulation.is_fixed(a, b));

        let mid = triangulation.add_point(5.0, 5.0).unwrap();

        assert!(triangulation.find_edge(a, b).is_none());
        assert!(triangulation.is_fixed(a, mid));
        assert!(triangulation.is_fixed(mid, b));
        verify_triangulation(&triangulation);
    }

    #[test]
    fn test_duplicate_point() {
        let mut triangulation = square(4);

        let idx = triangulation.add_point(5.0, 5.0).unwrap();
        let num_tris = triangulation.num_tris();

        assert_eq!(triangulation.add_point(5.0 + 5e-7, 5.0).unwrap(), idx);
        assert_eq!(triangulation.add_point(5.0, 5.0).unwrap(), idx);
        assert_eq!(triangulation.num_vertices(), 5);
        assert_eq!(triangulation.num_tris(), num_tris);

        // corners are deduplicated too
        assert_eq!(triangulation.add_point(1e-7, 1e-7).unwrap(), 0);
    }

    #[test]
    fn test_point_near_vertex_is_inserted() {
        init_logger();
        let mut triangulation = square(8);
        assert_eq!(triangulation.add_point(5.0, 5.0).unwrap(), 4);

        let p = [5.0 + 1e-5, 5.0 + 3e-6];
        let idx = triangulation.add_point(p[0], p[1]).unwrap();

        assert_eq!(idx, 5);
        assert_eq!(triangulation.vertices()[idx], p);
        assert_eq!(triangulation.num_tris(), 6);
        verify_triangulation(&triangulation);

        // just outside the dedup distance, well inside the barycentric slack of the star
        for d in [2e-6, 5e-6, 1e-5, 2e-5, 5e-5] {
            let mut triangulation = square(8);
            let center = triangulation.add_point(5.0, 5.0).unwrap();

            let p = [5.0 + d, 5.0 + 0.3 * d];
            let idx = triangulation.add_point(p[0], p[1]).unwrap();

            assert_ne!(idx, center, "offset {d}");
            assert_eq!(triangulation.vertices()[idx], p);
            assert_eq!(triangulation.num_vertices(), 6);
            verify_triangulation(&triangulation);
        }
    }

    #[test]
    fn test_point_scratch_is_reused() {
        let mut triangulation = square(64);
        let vertices = sample_vertices_2d(50, Some(0.5..=9.5));
        triangulation.insert_vertices(&vertices).unwrap();

        let scratch = &triangulation.point_scratch;
        assert!(scratch.hits.is_empty());
        assert!(scratch.check_tris.is_empty());
        assert!(scratch.hits.capacity() > 0);
        assert!(scratch.check_tris.capacity() > 0);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut triangulation = square(4);
        let before = triangulation.clone();

        for (x, y) in [(10.0, 5.0), (0.0, 5.0), (5.0, -1.0), (11.0, 11.0), (f64::NAN, 5.0)] {
            assert!(matches!(
                triangulation.add_point(x, y),
                Err(CdtError::OutOfBounds { .. })
            ));
        }

        assert_eq!(triangulation, before);
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut triangulation = square(2);

        triangulation.add_point(2.0, 3.0).unwrap();
        triangulation.add_point(7.0, 6.0).unwrap();
        // duplicates still resolve
        assert_eq!(triangulation.add_point(7.0, 6.0).unwrap(), 5);

        assert_eq!(
            triangulation.add_point(4.0, 4.0),
            Err(CdtError::CapacityExceeded { capacity: 2 })
        );
        verify_triangulation(&triangulation);
    }

    #[test]
    fn test_shared_quad() {
        let triangulation = square(4);

        assert_eq!(triangulation.shared_quad(0, 1), Some([0, 1, 3, 2]));
        assert_eq!(triangulation.shared_quad(0, 0), None);
        assert_eq!(triangulation.shared_quad(0, 7), None);
    }

    #[test]
    fn test_edge_across_flipped_diagonal() {
        init_logger();
        let mut triangulation = square(4);
        let idx = triangulation.add_point(3.0, 6.0).unwrap();
        assert_eq!(
            triangulation.tris(),
            vec![[0, 1, 4], [4, 3, 2], [4, 1, 3], [2, 0, 4]]
        );

        triangulation.add_edge(0, 3).unwrap();

        assert!(triangulation.is_fixed(0, 3));
        assert!(triangulation.find_edge(2, idx).is_none());
        assert_eq!(triangulation.num_tris(), 4);
        assert_eq!(
            triangulation.tris(),
            vec![[0, 1, 4], [0, 3, 2], [4, 1, 3], [3, 0, 4]]
        );
        verify_triangulation(&triangulation);
    }

    #[test]
    fn test_edge_through_vertex() {
        let mut triangulation = square(4);
        let mid = triangulation.add_point(5.0, 5.0).unwrap();

        triangulation.add_edge(0, 3).unwrap();

        assert!(triangulation.find_edge(0, 3).is_none());
        assert!(triangulation.is_fixed(0, mid));
        assert!(triangulation.is_fixed(mid, 3));
        assert!(!triangulation.is_fixed(1, mid));
        verify_triangulation(&triangulation);
    }

    #[test]
    fn test_edge_through_vertex_mid_tunnel() {
        init_logger();
        let mut triangulation = square(8);
        let a = triangulation.add_point(1.0, 5.0).unwrap();
        let b = triangulation.add_point(9.0, 5.0).unwrap();
        let on_line = triangulation.add_point(6.0, 5.0).unwrap();
        triangulation
            .insert_vertices(&[[3.0, 6.0], [3.5, 4.0], [7.5, 6.0], [8.0, 4.5]])
            .unwrap();

        triangulation.add_edge(a, b).unwrap();

        assert!(triangulation.find_edge(a, b).is_none());
        assert!(triangulation.is_fixed(a, on_line));
        assert!(triangulation.is_fixed(on_line, b));
        verify_triangulation(&triangulation);
    }

    #[test]
    fn test_edge_crossing_many_tris() {
        init_logger();
        let mut triangulation = square(16);
        let idxs = triangulation
            .insert_vertices(&[
                [1.0, 5.0],
                [9.0, 5.0],
                [2.0, 5.5],
                [3.0, 4.2],
                [4.0, 5.8],
                [5.0, 4.4],
                [6.0, 5.3],
                [7.0, 4.1],
                [8.0, 5.9],
                [5.0, 8.0],
                [5.0, 2.0],
            ])
            .unwrap();
        verify_delaunay(&triangulation);

        triangulation.add_edge(idxs[0], idxs[1]).unwrap();

        assert!(triangulation.is_fixed(idxs[0], idxs[1]));
        assert_eq!(triangulation.edges().filter(|e| e.is_fixed()).count(), 5);
        verify_triangulation(&triangulation);
    }

    #[test]
    fn test_edge_crossing_too_many_tris() {
        init_logger();
        let mut triangulation = Triangulation::with_tolerances(
            Bounds::new(0.0, 10.0, 0.0, 10.0),
            16,
            Tolerances::default().with_max_crossed_tris(2),
        )
        .unwrap();
        let idxs = triangulation
            .insert_vertices(&[
                [1.0, 5.0],
                [9.0, 5.0],
                [2.0, 5.5],
                [3.0, 4.2],
                [4.0, 5.8],
                [5.0, 4.4],
                [6.0, 5.3],
                [7.0, 4.1],
                [8.0, 5.9],
            ])
            .unwrap();
        let before = triangulation.clone();

        assert!(matches!(
            triangulation.add_edge(idxs[0], idxs[1]),
            Err(CdtError::InfiniteLoop { .. })
        ));
        assert_eq!(triangulation, before);
        assert!(!triangulation.is_fixed(idxs[0], idxs[1]));
        verify_triangulation(&triangulation);

        // a short constraint still fits under the limit
        triangulation.add_edge(idxs[0], idxs[2]).unwrap();
        assert!(triangulation.is_fixed(idxs[0], idxs[2]));
    }

    #[test]
    fn test_edge_idempotent() {
        let mut triangulation = square(4);
        let a = triangulation.add_point(2.0, 3.0).unwrap();
        let b = triangulation.add_point(7.0, 6.0).unwrap();

        triangulation.add_edge(a, b).unwrap();
        let once = triangulation.clone();
        triangulation.add_edge(b, a).unwrap();

        assert_eq!(triangulation, once);
        assert!(triangulation.is_fixed(a, b));
    }

    #[test]
    fn test_existing_edge_becomes_fixed() {
        let mut triangulation = square(4);
        assert!(!triangulation.is_fixed(1, 2));

        triangulation.add_edge(2, 1).unwrap();

        assert!(triangulation.is_fixed(1, 2));
        assert_eq!(triangulation.tris(), vec![[0, 1, 2], [2, 1, 3]]);
    }

    #[test]
    fn test_degenerate_edge() {
        let mut triangulation = square(4);
        triangulation.add_point(5.0, 5.0).unwrap();
        let before = triangulation.clone();

        assert_eq!(
            triangulation.add_edge(4, 4),
            Err(CdtError::DegenerateEdge { index: 4 })
        );
        assert_eq!(
            triangulation.add_edge(0, 9),
            Err(CdtError::InvalidVertex {
                index: 9,
                num_vertices: 5
            })
        );
        assert_eq!(triangulation, before);
    }

    #[test]
    fn test_fixed_edge_survives_insertions() {
        let mut triangulation = square(64);
        let a = triangulation.add_point(1.5, 1.5).unwrap();
        let b = triangulation.add_point(8.5, 8.5).unwrap();
        triangulation.add_edge(a, b).unwrap();

        // keep clear of the constraint so it is never split
        let vertices = sample_vertices_2d(60, Some(0.5..=9.5))
            .into_iter()
            .filter(|&[x, y]| (x - y).abs() > 0.5)
            .collect::<Vec<_>>();
        triangulation.insert_vertices(&vertices).unwrap();

        assert!(triangulation.is_fixed(a, b));
        verify_triangulation(&triangulation);
    }

    #[test]
    fn test_delaunay_2d() {
        init_logger();
        for n in NUM_VERTICES_LIST {
            let vertices = sample_vertices_2d(n, Some(-0.5..=0.5));

            let mut triangulation = Triangulation::new(-1.0, 1.0, -1.0, 1.0, n).unwrap();
            let idxs = triangulation.insert_vertices(&vertices).unwrap();

            assert_eq!(idxs.len(), n);
            verify_triangulation(&triangulation);
            verify_delaunay(&triangulation);
        }
    }

    #[test]
    fn test_clustered_delaunay_2d() {
        init_logger();
        let bounds = Bounds::new(0.0, 100.0, 0.0, 50.0);
        let vertices = sample_clustered_vertices_2d(300, 5, bounds.corners()[0], bounds.corners()[3]);

        let mut triangulation =
            Triangulation::with_tolerances(bounds, vertices.len(), Tolerances::default()).unwrap();
        triangulation.insert_vertices(&vertices).unwrap();

        verify_triangulation(&triangulation);
        verify_delaunay(&triangulation);
    }

    #[test]
    fn test_polygon_constraints() {
        init_logger();
        let n_ring = 24;
        let ring: Vec<Vertex2> = (0..n_ring)
            .map(|i| {
                let angle = i as f64 * std::f64::consts::TAU / n_ring as f64;
                [5.0 + 3.0 * angle.cos(), 5.0 + 3.0 * angle.sin()]
            })
            .collect();
        let inner = sample_vertices_2d(100, Some(0.5..=9.5));

        let mut triangulation = square(ring.len() + inner.len());
        triangulation.insert_vertices(&inner).unwrap();
        let ring_idxs = triangulation.insert_vertices(&ring).unwrap();

        let edges: Vec<[VertexIdx; 2]> = (0..n_ring)
            .map(|i| [ring_idxs[i], ring_idxs[(i + 1) % n_ring]])
            .collect();
        triangulation.insert_edges(&edges).unwrap();

        for [a, b] in edges {
            assert!(triangulation.is_fixed(a, b));
        }
        verify_triangulation(&triangulation);
    }
}
