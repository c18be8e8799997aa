//! Navmesh walker: the per-tick integrator for agents gripping the mesh.

use glam::{Vec2, Vec3};
use nav_mesh::{poly_at, NavWorld, SweepHit};
use nav_types::{
    ids::{EdgeRef, PolyRef, PylonId},
    params::PathParams,
    tunables::{MAX_FLOOR_DROP_SPEED, MAX_STEP},
};
use parry3d::{bounding_volume::Aabb, math::Point};
use tracing::trace;

/// Movement state machine of a path-following agent.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum WalkerState {
    #[default]
    FindingPath,
    Pathing,
    Following,
    Adjusting,
    Done,
    Failed,
}

/// Transition hooks an agent overrides.
pub trait WalkerHooks {
    /// Called when a wall blocked the step, with the wall's outward normal.
    /// Returning false stops the remaining movement of this tick.
    fn handle_wall_adjust(&mut self, _normal: Vec2) -> bool {
        true
    }

    /// Called when an adjust move (mantle, drop, scripted takeover) ends.
    fn handle_finished_adjust_move(&mut self) {}
}

/// Result of one tick of mesh walking.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WalkOutcome {
    /// The agent moved and remains gripped to the mesh.
    Walked,
    /// No walkable poly under the agent; the caller reverts to ordinary
    /// walking physics for this tick.
    NoPoly,
}

/// Custom integrator replacing world-collision movement while the agent
/// grips the mesh.
///
/// Per tick the desired velocity is projected onto the anchor poly plane,
/// subdivided into segments of at most [`MAX_STEP`] and swept against the
/// obstacle meshes of the pylons overlapping the step. Blocking hits slide
/// along the wall, the end of each segment snaps to the poly surface and
/// touch notifications are deferred until the walk finished.
pub struct MeshWalker {
    state: WalkerState,
    anchor_poly: Option<PolyRef>,
    current_edge: Option<EdgeRef>,
    position: Vec3,
    velocity: Vec3,
    touches: Vec<SweepHit>,
}

impl MeshWalker {
    pub fn new(position: Vec3) -> Self {
        Self {
            state: WalkerState::default(),
            anchor_poly: None,
            current_edge: None,
            position,
            velocity: Vec3::ZERO,
            touches: Vec::new(),
        }
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    pub fn anchor_poly(&self) -> Option<PolyRef> {
        self.anchor_poly
    }

    /// Sets the edge the agent is currently crossing. Backface hits on this
    /// edge's blocking volumes are skipped so drop-down edges work.
    pub fn set_current_edge(&mut self, edge: Option<EdgeRef>) {
        self.current_edge = edge;
    }

    /// Drains the touch notifications recorded by the last tick. Deferred so
    /// reacting to them cannot mutate the mesh mid-walk.
    pub fn take_touches(&mut self) -> Vec<SweepHit> {
        std::mem::take(&mut self.touches)
    }

    /// A path search began.
    pub fn begin_finding_path(&mut self) {
        self.state = WalkerState::FindingPath;
    }

    /// The search produced a path.
    pub fn path_found(&mut self) {
        if self.state == WalkerState::FindingPath {
            self.state = WalkerState::Pathing;
        }
    }

    /// The first move location was issued.
    pub fn begin_following(&mut self) {
        if self.state == WalkerState::Pathing {
            self.state = WalkerState::Following;
        }
    }

    /// A special edge took over movement.
    pub fn begin_adjust_move(&mut self) {
        if self.state == WalkerState::Following {
            self.state = WalkerState::Adjusting;
        }
    }

    /// The adjust move ended; following resumes.
    pub fn finish_adjust_move(&mut self, hooks: &mut dyn WalkerHooks) {
        if self.state == WalkerState::Adjusting {
            hooks.handle_finished_adjust_move();
            self.state = WalkerState::Following;
        }
    }

    pub fn finish(&mut self) {
        self.state = WalkerState::Done;
    }

    pub fn fail(&mut self) {
        self.state = WalkerState::Failed;
    }

    /// Advances the agent by one tick.
    pub fn step(
        &mut self,
        world: &NavWorld,
        params: &PathParams,
        hooks: &mut dyn WalkerHooks,
        dt: f32,
    ) -> WalkOutcome {
        let hover = params.max_hover_distance;
        let anchored = self
            .anchor_poly
            .and_then(|p| world.poly(p))
            .is_some_and(|poly| poly.contains(self.position, hover));
        if !anchored {
            self.anchor_poly = poly_at(world, self.position, params);
        }
        let Some(anchor) = self.anchor_poly.and_then(|p| world.poly(p)) else {
            trace!("no walkable poly under the walker");
            return WalkOutcome::NoPoly;
        };

        // Desired step in the anchor plane.
        let normal = anchor.normal();
        let planar = self.velocity - normal * self.velocity.dot(normal);
        let desired = planar * dt;
        if desired.length_squared() <= f32::EPSILON {
            return WalkOutcome::Walked;
        }

        let pylons = self.gather_pylons(world, params, desired);
        let segments = (desired.length() / MAX_STEP).ceil().max(1.);
        let segment_step = desired / segments;
        let mut drop_budget = MAX_FLOOR_DROP_SPEED * dt;

        for _ in 0..segments as u32 {
            let step = self.adjusted_step(world, &pylons, segment_step, hooks);
            self.position += step;
            self.snap_to_surface(world, params, &mut drop_budget);
            if step.length_squared() <= f32::EPSILON {
                break;
            }
        }

        self.anchor_poly = poly_at(world, self.position, params).or(self.anchor_poly);
        WalkOutcome::Walked
    }

    /// Collects the pylons overlapping the swept agent bounds once per tick.
    fn gather_pylons(&self, world: &NavWorld, params: &PathParams, step: Vec3) -> Vec<PylonId> {
        let extent = params.search_extent;
        let from = self.position - extent;
        let to = self.position + step + extent;
        let mins = from.min(to);
        let maxs = from.max(to);
        world.octree().find_in_aabb(&Aabb::new(
            Point::new(mins.x, mins.y, mins.z),
            Point::new(maxs.x, maxs.y, maxs.z),
        ))
    }

    /// Resolves one segment against the obstacle meshes: on a blocking hit
    /// the step slides along the wall, recursing once for two-wall corners.
    fn adjusted_step(
        &mut self,
        world: &NavWorld,
        pylons: &[PylonId],
        step: Vec3,
        hooks: &mut dyn WalkerHooks,
    ) -> Vec3 {
        let Some(hit) = self.sweep(world, pylons, step) else {
            return step;
        };
        self.touches.push(hit);
        if !hooks.handle_wall_adjust(hit.normal) {
            return step * hit.fraction;
        }

        // Classic wall slide, d - n(d.n).
        let normal = hit.normal.extend(0.);
        let slide = step - normal * step.dot(normal);
        match self.sweep(world, pylons, slide) {
            None => slide,
            Some(second) => {
                self.touches.push(second);
                let normal = second.normal.extend(0.);
                let corner = slide - normal * slide.dot(normal);
                match self.sweep(world, pylons, corner) {
                    None => corner,
                    Some(_) => step * hit.fraction,
                }
            }
        }
    }

    fn sweep(&self, world: &NavWorld, pylons: &[PylonId], step: Vec3) -> Option<SweepHit> {
        if step.length_squared() <= f32::EPSILON {
            return None;
        }
        let from = self.position;
        let to = self.position + step;
        let direction = step.truncate().normalize_or_zero();

        let mut best: Option<SweepHit> = None;
        for &pylon_id in pylons {
            let Some(pylon) = world.pylon(pylon_id) else {
                continue;
            };
            if pylon.is_disabled() {
                continue;
            }
            let hit = pylon.obstacle_mesh().sweep(
                from.truncate(),
                to.truncate(),
                from.z.min(to.z),
                from.z.max(to.z),
            );
            let Some(hit) = hit else {
                continue;
            };
            // Backface hits while crossing the current edge let drop-down
            // edges exit through their own volume.
            if self.current_edge.is_some() && hit.normal.dot(direction) > 0. {
                continue;
            }
            if best.map_or(true, |b| hit.fraction < b.fraction) {
                best = Some(SweepHit {
                    fraction: hit.fraction,
                    position: from + step * hit.fraction,
                    normal: hit.normal,
                    top: hit.top,
                });
            }
        }
        best
    }

    /// Snaps the agent to the poly surface, limited per tick by the floor
    /// drop speed so walking off a ledge descends instead of teleporting.
    fn snap_to_surface(&mut self, world: &NavWorld, params: &PathParams, drop_budget: &mut f32) {
        let Some(poly) = poly_at(world, self.position, params).and_then(|p| world.poly(p)) else {
            return;
        };
        let target = poly.plane_z_at(self.position.truncate());
        let delta = target - self.position.z;
        if delta >= 0. {
            self.position.z = target;
        } else {
            let drop = (-delta).min(*drop_budget);
            *drop_budget -= drop;
            self.position.z -= drop;
        }
    }
}

#[cfg(test)]
mod tests {
    use nav_mesh::PylonFlags;
    use nav_types::params::PathParams;
    use parry2d::shape::ConvexPolygon;

    use super::*;

    struct CountingHooks {
        wall_hits: u32,
        adjusts_finished: u32,
    }

    impl CountingHooks {
        fn new() -> Self {
            Self {
                wall_hits: 0,
                adjusts_finished: 0,
            }
        }
    }

    impl WalkerHooks for CountingHooks {
        fn handle_wall_adjust(&mut self, _normal: Vec2) -> bool {
            self.wall_hits += 1;
            true
        }

        fn handle_finished_adjust_move(&mut self) {
            self.adjusts_finished += 1;
        }
    }

    fn params() -> PathParams {
        PathParams {
            search_extent: Vec3::new(16., 16., 88.),
            ..Default::default()
        }
    }

    fn open_world() -> NavWorld {
        let mut world = NavWorld::new(Aabb::new(
            Point::new(-10_000., -10_000., -1_000.),
            Point::new(10_000., 10_000., 1_000.),
        ));
        let pylon = world.add_pylon(
            Aabb::new(Point::new(0., 0., -10.), Point::new(1000., 1000., 100.)),
            PylonFlags::default(),
        );
        world.pylon_mut(pylon).unwrap().mesh_mut().add_poly(
            vec![
                Vec3::new(0., 0., 0.),
                Vec3::new(1000., 0., 0.),
                Vec3::new(1000., 1000., 0.),
                Vec3::new(0., 1000., 0.),
            ],
            200.,
        );
        world.post_load_fixup(pylon);
        world
    }

    fn add_wall(world: &mut NavWorld, min_x: f32, max_x: f32) {
        let pylon = world.pylons().next().unwrap().id();
        let footprint = ConvexPolygon::from_convex_polyline(vec![
            parry2d::math::Point::new(min_x, 0.),
            parry2d::math::Point::new(max_x, 0.),
            parry2d::math::Point::new(max_x, 1000.),
            parry2d::math::Point::new(min_x, 1000.),
        ])
        .unwrap();
        world
            .pylon_mut(pylon)
            .unwrap()
            .obstacle_mesh_mut()
            .add_volume(footprint, 0., 100., None);
    }

    #[test]
    fn test_open_walk() {
        let world = open_world();
        let mut walker = MeshWalker::new(Vec3::new(100., 100., 0.));
        walker.set_velocity(Vec3::new(50., 0., 0.));
        let mut hooks = CountingHooks::new();

        let outcome = walker.step(&world, &params(), &mut hooks, 1.);
        assert_eq!(outcome, WalkOutcome::Walked);
        assert!((walker.position().x - 150.).abs() < 1e-3);
        assert_eq!(hooks.wall_hits, 0);
        assert!(walker.anchor_poly().is_some());
    }

    #[test]
    fn test_wall_slide() {
        let mut world = open_world();
        add_wall(&mut world, 200., 220.);
        let mut walker = MeshWalker::new(Vec3::new(195., 100., 0.));
        // Diagonally into the wall.
        walker.set_velocity(Vec3::new(40., 40., 0.));
        let mut hooks = CountingHooks::new();

        walker.step(&world, &params(), &mut hooks, 1.);
        assert!(hooks.wall_hits > 0);
        // The x advance stops at the wall while y keeps sliding.
        assert!(walker.position().x <= 200.);
        assert!(walker.position().y > 120.);
    }

    #[test]
    fn test_step_subdivision_does_not_tunnel() {
        let mut world = open_world();
        add_wall(&mut world, 300., 310.);
        let mut walker = MeshWalker::new(Vec3::new(100., 500., 0.));
        // A 400-unit tick, many MAX_STEP segments long.
        walker.set_velocity(Vec3::new(400., 0., 0.));
        let mut hooks = CountingHooks::new();

        walker.step(&world, &params(), &mut hooks, 1.);
        assert!(walker.position().x <= 300.);
        assert!(!walker.take_touches().is_empty());
        // A second take returns nothing.
        assert!(walker.take_touches().is_empty());
    }

    #[test]
    fn test_floor_drop_is_clamped() {
        let world = open_world();
        let mut walker = MeshWalker::new(Vec3::new(100., 100., 40.));
        walker.set_velocity(Vec3::new(5., 0., 0.));
        let mut hooks = CountingHooks::new();

        walker.step(&world, &params(), &mut hooks, 1.);
        // One tick descends by at most the floor drop speed.
        assert!((walker.position().z - 10.).abs() < 1e-3);

        walker.step(&world, &params(), &mut hooks, 1.);
        assert!(walker.position().z.abs() < 1e-3);
    }

    #[test]
    fn test_off_mesh_falls_back_to_physics() {
        let world = open_world();
        let mut walker = MeshWalker::new(Vec3::new(-500., -500., 0.));
        walker.set_velocity(Vec3::new(10., 0., 0.));
        let mut hooks = CountingHooks::new();

        assert_eq!(
            walker.step(&world, &params(), &mut hooks, 1.),
            WalkOutcome::NoPoly
        );
    }

    #[test]
    fn test_state_machine() {
        let mut walker = MeshWalker::new(Vec3::ZERO);
        let mut hooks = CountingHooks::new();
        assert_eq!(walker.state(), WalkerState::FindingPath);

        walker.path_found();
        assert_eq!(walker.state(), WalkerState::Pathing);
        walker.begin_following();
        assert_eq!(walker.state(), WalkerState::Following);

        walker.begin_adjust_move();
        assert_eq!(walker.state(), WalkerState::Adjusting);
        walker.finish_adjust_move(&mut hooks);
        assert_eq!(walker.state(), WalkerState::Following);
        assert_eq!(hooks.adjusts_finished, 1);

        walker.finish();
        assert_eq!(walker.state(), WalkerState::Done);

        // Out-of-order transitions are ignored.
        walker.path_found();
        assert_eq!(walker.state(), WalkerState::Done);
    }
}
