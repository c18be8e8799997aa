//! Per-agent navigation handle.

use glam::{Vec2, Vec3};
use nav_mesh::{poly_at, position_blocked, sweep_obstacles, EdgeCleanup, EdgeKind, NavWorld};
use nav_pathing::{find_path, AtGoal, GoalEvaluator, PathConstraint, SearchBudget, Toward};
use nav_types::{
    ids::{AgentId, EdgeRef, PolyRef},
    params::{PathError, PathParams},
    path::Path,
    tunables::{
        BREADCRUMB_DISTANCE_INTERVAL, BREADCRUMB_RING_SIZE, LINECHECK_GRANULARITY, MAX_STEP_HEIGHT,
    },
};
use tinyvec::ArrayVec;
use tracing::{debug, warn};

/// Visit budget of the micro-path used by off-path recovery.
const MICRO_PATH_VISITS: u32 = 64;

/// Cap on reachability sweep segments.
const MAX_LINECHECK_SEGMENTS: u32 = 1024;

/// Offset past the arrival radius applied by early-arrival compensation.
const ARRIVAL_EPSILON: f32 = 2.;

/// The agent side of the navigation contract.
pub trait NavAgent {
    /// Fills the parameter pack at the start of every search. Every field
    /// must be populated.
    fn setup_pathfinding_params(&self, params: &mut PathParams);

    /// Called once at the start of each `find_path`.
    fn init_for_pathfinding(&mut self) {}

    /// Height offset applied when computing move points on `edge`, e.g.
    /// flight altitude.
    fn edge_z_adjust(&self, _edge: EdgeRef) -> Vec3 {
        Vec3::ZERO
    }

    /// Invoked after an external event emptied the path cache.
    fn notify_path_changed(&mut self) {}
}

/// Per-agent pathfinding state.
///
/// The handle is owned by a single agent and never read by another. All
/// operations taking a world operate on the world the path was found in;
/// edges cached here are marked in use in their owning meshes so mesh
/// mutations can notify the handle through [`NavHandle::post_edge_cleanup`].
pub struct NavHandle {
    agent: AgentId,
    params: PathParams,
    final_destination: Option<Vec3>,
    anchor_poly: Option<PolyRef>,
    current_edge: Option<EdgeRef>,
    sub_goal_poly: Option<PolyRef>,
    cache: Vec<EdgeRef>,
    constraints: Vec<Box<dyn PathConstraint>>,
    goals: Vec<Box<dyn GoalEvaluator>>,
    session: u32,
    breadcrumbs: ArrayVec<[Vec3; BREADCRUMB_RING_SIZE]>,
    last_path_error: Option<PathError>,
    last_path_fail_time: f64,
    pub ultra_verbose_path_debugging: bool,
    pub debug_constraints_and_goals: bool,
}

impl NavHandle {
    pub fn new(agent: AgentId) -> Self {
        Self {
            agent,
            params: PathParams {
                agent,
                ..Default::default()
            },
            final_destination: None,
            anchor_poly: None,
            current_edge: None,
            sub_goal_poly: None,
            cache: Vec::new(),
            constraints: Vec::new(),
            goals: Vec::new(),
            session: 0,
            breadcrumbs: ArrayVec::new(),
            last_path_error: None,
            last_path_fail_time: 0.,
            ultra_verbose_path_debugging: false,
            debug_constraints_and_goals: false,
        }
    }

    pub fn agent(&self) -> AgentId {
        self.agent
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn cache(&self) -> &[EdgeRef] {
        &self.cache
    }

    pub fn current_edge(&self) -> Option<EdgeRef> {
        self.current_edge
    }

    pub fn anchor_poly(&self) -> Option<PolyRef> {
        self.anchor_poly
    }

    pub fn sub_goal_poly(&self) -> Option<PolyRef> {
        self.sub_goal_poly
    }

    pub fn final_destination(&self) -> Option<Vec3> {
        self.final_destination
    }

    pub fn last_path_error(&self) -> Option<PathError> {
        self.last_path_error
    }

    pub fn last_path_fail_time(&self) -> f64 {
        self.last_path_fail_time
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn add_constraint(&mut self, constraint: Box<dyn PathConstraint>) {
        self.constraints.push(constraint);
    }

    pub fn clear_constraints(&mut self) {
        self.constraints.clear();
    }

    pub fn constraints(&self) -> &[Box<dyn PathConstraint>] {
        &self.constraints
    }

    pub fn add_goal_evaluator(&mut self, goal: Box<dyn GoalEvaluator>) {
        self.goals.push(goal);
    }

    pub fn clear_goal_evaluators(&mut self) {
        self.goals.clear();
    }

    /// Records the final destination and resets the per-path anchors.
    pub fn set_final_destination(&mut self, point: Vec3) {
        self.final_destination = Some(point);
        self.anchor_poly = None;
        self.sub_goal_poly = None;
    }

    /// Runs a full search towards the final destination.
    ///
    /// The agent fills a fresh parameter pack and is notified through
    /// `init_for_pathfinding`. On success the edge cache is replaced with
    /// the found path. On failure the error and `time` are recorded for
    /// caller backoff and the cache stays empty.
    pub fn find_path(&mut self, world: &mut NavWorld, agent: &mut dyn NavAgent, time: f64) -> bool {
        agent.setup_pathfinding_params(&mut self.params);
        self.params.agent = self.agent;
        agent.init_for_pathfinding();
        self.empty_cache(world);

        let Some(goal) = self.final_destination else {
            self.record_failure(PathError::ComputeValidFinalDestFail, time);
            return false;
        };

        let mut default_goals: Vec<Box<dyn GoalEvaluator>> = Vec::new();
        let goals = if self.goals.is_empty() {
            default_goals.push(Box::new(AtGoal::new()));
            &mut default_goals
        } else {
            &mut self.goals
        };
        let mut default_constraints: Vec<Box<dyn PathConstraint>> = Vec::new();
        let constraints = if self.constraints.is_empty() {
            default_constraints.push(Box::new(Toward::new(goal)));
            &mut default_constraints
        } else {
            &mut self.constraints
        };

        let result = find_path(world, &self.params, goal, constraints, goals);
        if self.debug_constraints_and_goals {
            for constraint in constraints.iter() {
                debug!(agent = %self.agent, stats = ?constraint.stats(), "constraint");
            }
        }

        match result {
            Ok(outcome) => {
                self.session = outcome.session;
                self.set_cache(world, outcome.cache);
                self.anchor_poly = poly_at(world, self.params.search_start, &self.params);
                self.current_edge = self.cache.first().copied();
                self.sub_goal_poly = outcome.dest_poly;
                self.last_path_error = None;
                if self.ultra_verbose_path_debugging {
                    debug!(
                        agent = %self.agent,
                        edges = self.cache.len(),
                        visits = outcome.visits,
                        "path found"
                    );
                }
                true
            }
            Err(error) => {
                self.record_failure(error, time);
                false
            }
        }
    }

    /// Produces the next move point towards the final destination.
    ///
    /// Edges already passed are clipped from the cache, the exit point on
    /// the current edge is recomputed by string pulling and early-arrival
    /// compensation keeps the point far enough out that the agent's arrival
    /// radius carries it into the next poly. An agent standing in none of
    /// the path's polys goes through the off-path recovery ladder.
    pub fn get_next_move_location(
        &mut self,
        world: &mut NavWorld,
        agent: &dyn NavAgent,
        position: Vec3,
        arrival: f32,
    ) -> Result<Vec3, PathError> {
        if self.cache.is_empty() {
            return match self.final_destination {
                Some(point) => Ok(point),
                None => {
                    self.last_path_error = Some(PathError::GetNextMoveLocationFail);
                    Err(PathError::GetNextMoveLocationFail)
                }
            };
        }

        let hover = self.params.max_hover_distance;
        let on_edge = |world: &NavWorld, edge: EdgeRef| {
            world.edge(edge).is_some_and(|e| {
                [e.poly0(), e.poly1()].into_iter().any(|p| {
                    world
                        .poly(p)
                        .is_some_and(|poly| poly.contains(position, hover))
                })
            })
        };

        let Some(first) = (0..self.cache.len()).find(|&i| on_edge(world, self.cache[i])) else {
            return self.handle_not_on_path(world, position, arrival);
        };
        // The last consecutive edge touching the agent's poly is the one to
        // cross next; everything before it has been traversed.
        let mut current = first;
        while current + 1 < self.cache.len() && on_edge(world, self.cache[current + 1]) {
            current += 1;
        }
        for _ in 0..current {
            self.pop_front(world);
        }
        let edge = self.cache[0];
        self.current_edge = Some(edge);

        let points = self.string_pull(world, position);
        let Some(&move_point) = points.first() else {
            self.last_path_error = Some(PathError::GetNextMoveLocationFail);
            return Err(PathError::GetNextMoveLocationFail);
        };
        let move_point = move_point + agent.edge_z_adjust(edge);
        let next_point = points
            .get(1)
            .copied()
            .or(self.final_destination)
            .unwrap_or(move_point);
        Ok(self.compensate_for_early_arrivals(world, move_point, next_point, position, arrival))
    }

    /// Inflection-point string pulling over the cached edges.
    ///
    /// Walks forward computing where the chord from the current inflection
    /// to the destination crosses each edge. A crossing clamped at an edge
    /// endpoint declares a new inflection there and the move points between
    /// the previous inflection and the new one are rewritten onto the new
    /// chord, producing the taut path.
    pub fn string_pull(&self, world: &NavWorld, position: Vec3) -> Vec<Vec3> {
        let radius = self.params.radius();
        let destination = self.final_destination.or_else(|| {
            self.cache
                .last()
                .and_then(|&e| world.edge(e))
                .map(|e| e.center())
        });
        let Some(destination) = destination else {
            return Vec::new();
        };

        let mut points = Vec::with_capacity(self.cache.len());
        let mut inflection = position;
        let mut inflection_index = 0;
        for (index, &edge_ref) in self.cache.iter().enumerate() {
            let Some(edge) = world.edge(edge_ref) else {
                points.push(inflection);
                continue;
            };
            let (point, clamped) = chord_crossing(
                edge.vert_location(0),
                edge.vert_location(1),
                inflection,
                destination,
                radius,
            );
            points.push(point);

            if clamped {
                for behind in inflection_index..index {
                    let Some(edge) = world.edge(self.cache[behind]) else {
                        continue;
                    };
                    let on_chord = closest_point_on_segment(inflection, point, edge.center());
                    points[behind] = edge.closest_point_constrained(on_chord, radius);
                }
                inflection = point;
                inflection_index = index;
            }
        }
        points
    }

    /// Returns the full planned path from `position` through the string
    /// pulled move points to the final destination. `None` when no path is
    /// cached.
    pub fn planned_path(&self, world: &NavWorld, position: Vec3) -> Option<Path> {
        if self.cache.is_empty() {
            return None;
        }
        let mut waypoints = vec![position];
        waypoints.extend(self.string_pull(world, position));
        if let Some(destination) = self.final_destination {
            waypoints.push(destination);
        }
        Some(Path::new(waypoints))
    }

    /// Pushes a move point closer than 1.5 times the arrival radius out past
    /// the radius so arriving actually carries the agent over the edge. The
    /// offset direction follows the next move point when the result stays in
    /// one of the edge's polys, else the edge's into-poly perpendicular.
    fn compensate_for_early_arrivals(
        &self,
        world: &NavWorld,
        move_point: Vec3,
        next_point: Vec3,
        position: Vec3,
        arrival: f32,
    ) -> Vec3 {
        if move_point.distance(position) >= 1.5 * arrival {
            return move_point;
        }
        let Some(edge) = self.current_edge.and_then(|e| world.edge(e)) else {
            return move_point;
        };

        let hover = self.params.max_hover_distance;
        let in_edge_polys = |point: Vec3| {
            [edge.poly0(), edge.poly1()].into_iter().any(|p| {
                world
                    .poly(p)
                    .is_some_and(|poly| poly.contains(point, hover))
            })
        };

        let offset = arrival + ARRIVAL_EPSILON;
        let along = (next_point - move_point).truncate().normalize_or_zero();
        if along != Vec2::ZERO {
            let candidate = move_point + along.extend(0.) * offset;
            if in_edge_polys(candidate) {
                return candidate;
            }
        }
        for perp in [edge.perp_dir(), -edge.perp_dir()] {
            let candidate = move_point + perp.extend(0.) * offset;
            if in_edge_polys(candidate) {
                return candidate;
            }
        }
        move_point
    }

    /// Off-path recovery ladder: within one radius of the current edge move
    /// straight to it, within 1.5 radii move to the closest valid location
    /// in one of its polys, else stitch a micro-path back onto the path.
    fn handle_not_on_path(
        &mut self,
        world: &mut NavWorld,
        position: Vec3,
        _arrival: f32,
    ) -> Result<Vec3, PathError> {
        let fail = |handle: &mut Self| {
            handle.last_path_error = Some(PathError::GetNextMoveLocationFail);
            Err(PathError::GetNextMoveLocationFail)
        };

        let Some(edge_ref) = self.current_edge.or_else(|| self.cache.first().copied()) else {
            return fail(self);
        };
        let Some(edge) = world.edge(edge_ref) else {
            return fail(self);
        };
        let radius = self.params.radius();
        let closest = edge.closest_point_constrained(position, radius);
        let distance = position.distance(closest);
        if distance <= radius {
            return Ok(closest);
        }
        if distance <= 1.5 * radius {
            let mut best: Option<(f32, Vec3)> = None;
            for poly_ref in [edge.poly0(), edge.poly1()] {
                let Some(poly) = world.poly(poly_ref) else {
                    continue;
                };
                let on_poly = poly.closest_point_xy(position.truncate());
                let candidate = on_poly.extend(poly.plane_z_at(on_poly));
                let candidate_distance = position.distance(candidate);
                if best.map_or(true, |(d, _)| candidate_distance < d) {
                    best = Some((candidate_distance, candidate));
                }
            }
            if let Some((_, point)) = best {
                return Ok(point);
            }
        }

        // Stitch a micro-path from the agent's actual position back to the
        // current edge and splice it in front of the cache.
        let target = edge.center();
        let mut params = self.params;
        params.search_start = position;
        let mut goals: Vec<Box<dyn GoalEvaluator>> =
            vec![Box::new(AtGoal::new().with_budget(SearchBudget {
                max_visits: MICRO_PATH_VISITS,
                max_open: None,
            }))];
        match find_path(world, &params, target, &mut [], &mut goals) {
            Ok(outcome) => {
                for (index, edge) in outcome.cache.into_iter().enumerate() {
                    self.insert_edge_in_cache(world, index, edge);
                }
                match self.cache.first() {
                    Some(&first) => {
                        self.current_edge = Some(first);
                        match world.edge(first) {
                            Some(edge) => Ok(edge.closest_point_constrained(position, radius)),
                            None => fail(self),
                        }
                    }
                    None => fail(self),
                }
            }
            Err(error) => {
                warn!(agent = %self.agent, "off-path recovery failed: {error}");
                fail(self)
            }
        }
    }

    /// Granular obstacle-mesh line check from `from` to `to`.
    ///
    /// The segment is walked in `LINECHECK_GRANULARITY` chunks, each
    /// re-anchored to the height of the poly under it so the sweep conforms
    /// to the surface. One step up of at most `MAX_STEP_HEIGHT` onto a
    /// blocking volume is allowed.
    pub fn point_reachable(&self, world: &NavWorld, from: Vec3, to: Vec3) -> bool {
        let length = from.distance(to);
        if length <= f32::EPSILON {
            return true;
        }
        let segments = ((length / LINECHECK_GRANULARITY).ceil() as u32)
            .clamp(1, MAX_LINECHECK_SEGMENTS);

        let mut current = from;
        let mut stepped_up = false;
        for segment in 1..=segments {
            let fraction = segment as f32 / segments as f32;
            let mut next = from.lerp(to, fraction);
            if let Some(poly) = poly_at(world, next, &self.params).and_then(|p| world.poly(p)) {
                next.z = next.z.max(poly.plane_z_at(next.truncate()));
            }
            next.z = next.z.max(current.z);

            if let Some(hit) = sweep_obstacles(world, current, next) {
                if stepped_up || hit.top - current.z > MAX_STEP_HEIGHT {
                    return false;
                }
                stepped_up = true;
                current.z = hit.top + 1.;
                continue;
            }
            current = next;
        }
        true
    }

    /// Spiral-grid position sampler around `center`.
    ///
    /// Each candidate is dropped onto the mesh, point-checked against the
    /// obstacle meshes and, when `require_reachable` is set, line-checked
    /// from `center`. Used for spawn placement, goal recovery and anchor
    /// validation.
    pub fn valid_positions_for_box(
        &self,
        world: &NavWorld,
        center: Vec3,
        max_radius: f32,
        max_results: usize,
        require_reachable: bool,
    ) -> Vec<Vec3> {
        let mut results = Vec::new();
        let step = (self.params.radius() * 2.).max(1.);

        let mut ring = 0.;
        while ring <= max_radius && results.len() < max_results {
            let samples = if ring == 0. {
                1
            } else {
                ((std::f32::consts::TAU * ring / step).ceil() as u32).max(4)
            };
            for sample in 0..samples {
                if results.len() >= max_results {
                    break;
                }
                let angle = std::f32::consts::TAU * sample as f32 / samples as f32;
                let candidate = center + Vec3::new(angle.cos() * ring, angle.sin() * ring, 0.);

                let Some(poly) = poly_at(world, candidate, &self.params).and_then(|p| world.poly(p))
                else {
                    continue;
                };
                let dropped = candidate
                    .truncate()
                    .extend(poly.plane_z_at(candidate.truncate()));
                if position_blocked(world, dropped + Vec3::Z) {
                    continue;
                }
                if require_reachable && !self.point_reachable(world, center, dropped) {
                    continue;
                }
                results.push(dropped);
            }
            ring += step;
        }
        results
    }

    /// Records `location` when it is far enough from the newest breadcrumb.
    /// The ring keeps the most recent `BREADCRUMB_RING_SIZE` positions.
    pub fn update_breadcrumbs(&mut self, location: Vec3) {
        if self
            .breadcrumbs
            .last()
            .is_some_and(|last| last.distance(location) < BREADCRUMB_DISTANCE_INTERVAL)
        {
            return;
        }
        if self.breadcrumbs.len() == self.breadcrumbs.capacity() {
            self.breadcrumbs.remove(0);
        }
        self.breadcrumbs.push(location);
    }

    /// Pops the most recent breadcrumb.
    pub fn next_breadcrumb(&mut self) -> Option<Vec3> {
        self.breadcrumbs.pop()
    }

    /// Asks the current edge whether it takes over movement (mantle, drop,
    /// scripted path object). On takeover the edge is popped from the cache
    /// so the next tick resumes at the following edge; the returned point is
    /// the staging position the agent should reach first.
    pub fn suggest_move_preparation(
        &mut self,
        world: &mut NavWorld,
    ) -> Option<Vec3> {
        let edge_ref = self.current_edge?;
        let edge = world.edge(edge_ref)?;

        let mut staging = edge.center();
        let takeover = match edge.kind() {
            EdgeKind::Mantle(_) | EdgeKind::Drop(_) => true,
            EdgeKind::PathObject(id) => world
                .path_object(id)
                .is_some_and(|object| object.prepare_move_thru(self.agent, &mut staging)),
            _ => false,
        };
        if !takeover {
            return None;
        }

        if self.cache.first() == Some(&edge_ref) {
            self.pop_front(world);
        } else {
            self.remove_edge_from_cache(world, edge_ref);
        }
        self.current_edge = self.cache.first().copied();
        Some(staging)
    }

    /// Reacts to the deletion of an edge this handle had in use: the whole
    /// cache is dropped and the agent is told to re-plan.
    pub fn post_edge_cleanup(
        &mut self,
        world: &mut NavWorld,
        agent: &mut dyn NavAgent,
        cleanup: &EdgeCleanup,
    ) {
        if !cleanup.users.contains(&self.agent) {
            return;
        }
        self.empty_cache(world);
        self.current_edge = None;
        self.sub_goal_poly = None;
        agent.notify_path_changed();
    }

    pub fn add_edge_to_cache(&mut self, world: &mut NavWorld, edge: EdgeRef) {
        world.mark_edge_in_use(edge, self.agent);
        self.cache.push(edge);
    }

    pub fn insert_edge_in_cache(&mut self, world: &mut NavWorld, index: usize, edge: EdgeRef) {
        world.mark_edge_in_use(edge, self.agent);
        self.cache.insert(index.min(self.cache.len()), edge);
    }

    /// Removes the first occurrence of `edge` from the cache.
    pub fn remove_edge_from_cache(&mut self, world: &mut NavWorld, edge: EdgeRef) {
        if let Some(index) = self.cache.iter().position(|&e| e == edge) {
            self.cache.remove(index);
            if !self.cache.contains(&edge) {
                world.unmark_edge_in_use(edge, self.agent);
            }
        }
    }

    /// Drops the whole cache and its in-use marks. Idempotent.
    pub fn empty_cache(&mut self, world: &mut NavWorld) {
        for edge in self.cache.drain(..) {
            world.unmark_edge_in_use(edge, self.agent);
        }
    }

    fn set_cache(&mut self, world: &mut NavWorld, edges: Vec<EdgeRef>) {
        self.empty_cache(world);
        for edge in edges {
            self.add_edge_to_cache(world, edge);
        }
    }

    fn pop_front(&mut self, world: &mut NavWorld) {
        if !self.cache.is_empty() {
            let edge = self.cache.remove(0);
            if !self.cache.contains(&edge) {
                world.unmark_edge_in_use(edge, self.agent);
            }
        }
    }

    fn record_failure(&mut self, error: PathError, time: f64) {
        self.last_path_error = Some(error);
        self.last_path_fail_time = time;
        if self.ultra_verbose_path_debugging {
            warn!(agent = %self.agent, "path search failed: {error}");
        }
    }
}

/// Crossing of the chord `from -> to` with the segment `[a, b]`, clamped
/// away from the endpoints by `radius` (or half the segment on short ones).
/// The flag reports whether clamping moved the crossing, which makes the
/// crossing an inflection point.
fn chord_crossing(a: Vec3, b: Vec3, from: Vec3, to: Vec3, radius: f32) -> (Vec3, bool) {
    let ab = (b - a).truncate();
    let chord = (to - from).truncate();
    let denom = ab.perp_dot(chord);
    let raw = if denom.abs() <= 1e-6 {
        // Chord parallel to the edge: exit at the point closest to the
        // destination.
        let length_squared = ab.length_squared().max(f32::EPSILON);
        (to - a).truncate().dot(ab) / length_squared
    } else {
        (from - a).truncate().perp_dot(chord) / denom
    };

    let length = (b - a).length();
    if length <= f32::EPSILON {
        return (a, true);
    }
    let margin = radius.min(length / 2.) / length;
    let t = raw.clamp(margin, 1. - margin);
    (a + (b - a) * t, raw < margin || raw > 1. - margin)
}

fn closest_point_on_segment(a: Vec3, b: Vec3, point: Vec3) -> Vec3 {
    let ab = b - a;
    let length_squared = ab.length_squared();
    if length_squared <= f32::EPSILON {
        return a;
    }
    let t = ((point - a).dot(ab) / length_squared).clamp(0., 1.);
    a + ab * t
}
