//! Path constraints: per-expansion cost adjustment and veto.
//!
//! Constraints form an ordered chain on the navigation handle. During
//! successor expansion each constraint sees the edge context and may raise
//! the direct cost or the heuristic, or veto the edge outright; a single
//! veto wins. Constraints never mutate the mesh.

use glam::{Vec2, Vec3};
use nav_mesh::{EdgeKindTag, NavWorld};
use nav_types::{
    ids::{EdgeRef, PolyRef},
    params::PathParams,
};

/// Context of a single edge expansion handed to the constraint chain.
pub struct EdgeEval<'a> {
    pub world: &'a NavWorld,
    pub params: &'a PathParams,
    pub session: u32,
    /// The successor edge being scored.
    pub edge: EdgeRef,
    /// The popped predecessor edge, if any (seeds have none).
    pub prev_edge: Option<EdgeRef>,
    pub src_poly: PolyRef,
    pub dest_poly: PolyRef,
    /// The point on the successor edge the cost was computed with.
    pub edge_point: Vec3,
    /// The point on the predecessor the expansion came from.
    pub prev_point: Vec3,
    /// Accumulated path weight at the successor before constraint
    /// adjustments.
    pub visited_weight: u32,
}

/// Per-constraint debug counters.
#[derive(Clone, Copy, Default, Debug)]
pub struct ConstraintStats {
    pub processed: u32,
    pub thrown_out: u32,
    pub added_direct_cost: u32,
    pub added_heuristic_cost: u32,
}

pub trait PathConstraint {
    /// Accepts or vetoes an expansion, optionally raising `path_cost` or
    /// `heuristic`. Adjustments must be monotone upward.
    fn evaluate(&mut self, eval: &EdgeEval, path_cost: &mut u32, heuristic: &mut u32) -> bool;

    /// Called once at the start of every search.
    fn init_search(&mut self) {}

    fn stats(&self) -> ConstraintStats;

    fn stats_mut(&mut self) -> &mut ConstraintStats;
}

/// Runs the chain. Returns false when any constraint vetoes the edge.
pub(crate) fn apply_chain(
    chain: &mut [Box<dyn PathConstraint>],
    eval: &EdgeEval,
    path_cost: &mut u32,
    heuristic: &mut u32,
) -> bool {
    for constraint in chain.iter_mut() {
        let before = (*path_cost, *heuristic);
        let accepted = constraint.evaluate(eval, path_cost, heuristic);

        let stats = constraint.stats_mut();
        stats.processed += 1;
        if !accepted {
            stats.thrown_out += 1;
            return false;
        }
        stats.added_direct_cost += path_cost.saturating_sub(before.0);
        stats.added_heuristic_cost += heuristic.saturating_sub(before.1);
    }
    true
}

/// Adds the straight-line distance to the goal as the heuristic, optionally
/// penalizing edges whose destination pylon is off the high-level path.
pub struct Toward {
    goal: Vec3,
    bias_against_off_route: bool,
    bias: u32,
    stats: ConstraintStats,
}

impl Toward {
    pub fn new(goal: Vec3) -> Self {
        Self {
            goal,
            bias_against_off_route: false,
            bias: 0,
            stats: ConstraintStats::default(),
        }
    }

    pub fn with_route_bias(goal: Vec3, bias: u32) -> Self {
        Self {
            goal,
            bias_against_off_route: true,
            bias,
            stats: ConstraintStats::default(),
        }
    }
}

impl PathConstraint for Toward {
    fn evaluate(&mut self, eval: &EdgeEval, _path_cost: &mut u32, heuristic: &mut u32) -> bool {
        *heuristic += eval.edge_point.distance(self.goal).round() as u32;
        if self.bias_against_off_route {
            let on_route = eval
                .world
                .pylon(eval.dest_poly.pylon())
                .is_some_and(|p| p.in_high_level_path(eval.session));
            if !on_route {
                *heuristic += self.bias;
            }
        }
        true
    }

    fn stats(&self) -> ConstraintStats {
        self.stats
    }

    fn stats_mut(&mut self) -> &mut ConstraintStats {
        &mut self.stats
    }
}

/// Penalizes edges that do not progress along a fixed horizontal direction.
/// An edge straight along the direction pays nothing extra; one straight
/// against it pays twice its base cost again.
pub struct AlongLine {
    direction: Vec2,
    stats: ConstraintStats,
}

impl AlongLine {
    pub fn new(direction: Vec2) -> Self {
        Self {
            direction: direction.normalize_or_zero(),
            stats: ConstraintStats::default(),
        }
    }
}

impl PathConstraint for AlongLine {
    fn evaluate(&mut self, eval: &EdgeEval, path_cost: &mut u32, _heuristic: &mut u32) -> bool {
        let (Some(src), Some(dest)) = (
            eval.world.poly(eval.src_poly),
            eval.world.poly(eval.dest_poly),
        ) else {
            return true;
        };
        let step = (dest.center() - src.center()).truncate().normalize_or_zero();
        let against = (1. - step.dot(self.direction)).clamp(0., 2.);
        *path_cost += (*path_cost as f32 * against) as u32;
        true
    }

    fn stats(&self) -> ConstraintStats {
        self.stats
    }

    fn stats_mut(&mut self) -> &mut ConstraintStats {
        &mut self.stats
    }
}

/// Bounds the traversal distance of the whole path. Hard mode vetoes any
/// expansion past the bound; soft mode charges a flat penalty plus the
/// overshoot.
pub struct WithinTraversalDist {
    max: u32,
    soft: bool,
    soft_penalty: u32,
    stats: ConstraintStats,
}

impl WithinTraversalDist {
    pub fn hard(max: u32) -> Self {
        Self {
            max,
            soft: false,
            soft_penalty: 0,
            stats: ConstraintStats::default(),
        }
    }

    pub fn soft(max: u32, penalty: u32) -> Self {
        Self {
            max,
            soft: true,
            soft_penalty: penalty,
            stats: ConstraintStats::default(),
        }
    }
}

impl PathConstraint for WithinTraversalDist {
    fn evaluate(&mut self, eval: &EdgeEval, path_cost: &mut u32, _heuristic: &mut u32) -> bool {
        if eval.visited_weight <= self.max {
            return true;
        }
        if !self.soft {
            return false;
        }
        *path_cost += self.soft_penalty + (eval.visited_weight - self.max);
        true
    }

    fn stats(&self) -> ConstraintStats {
        self.stats
    }

    fn stats_mut(&mut self) -> &mut ConstraintStats {
        &mut self.stats
    }
}

/// Keeps the path inside an annular envelope around a center point.
pub struct WithinDistanceEnvelope {
    center: Vec3,
    min: f32,
    max: f32,
    soft: bool,
    soft_penalty: u32,
    /// With this set, edges already outside the envelope are tolerated as
    /// long as they do not move farther out.
    only_throw_out_leavers: bool,
    stats: ConstraintStats,
}

impl WithinDistanceEnvelope {
    pub fn new(center: Vec3, min: f32, max: f32) -> Self {
        Self {
            center,
            min,
            max,
            soft: false,
            soft_penalty: 0,
            only_throw_out_leavers: false,
            stats: ConstraintStats::default(),
        }
    }

    pub fn soft(mut self, penalty: u32) -> Self {
        self.soft = true;
        self.soft_penalty = penalty;
        self
    }

    pub fn only_throw_out_leavers(mut self) -> Self {
        self.only_throw_out_leavers = true;
        self
    }

    fn overshoot(&self, distance: f32) -> f32 {
        if distance < self.min {
            self.min - distance
        } else if distance > self.max {
            distance - self.max
        } else {
            0.
        }
    }
}

impl PathConstraint for WithinDistanceEnvelope {
    fn evaluate(&mut self, eval: &EdgeEval, path_cost: &mut u32, _heuristic: &mut u32) -> bool {
        let distance = eval.edge_point.distance(self.center);
        let overshoot = self.overshoot(distance);
        if overshoot <= 0. {
            return true;
        }

        if self.only_throw_out_leavers {
            let previous = self.overshoot(eval.prev_point.distance(self.center));
            if overshoot <= previous {
                return true;
            }
        }
        if !self.soft {
            return false;
        }
        *path_cost += self.soft_penalty + overshoot.round() as u32;
        true
    }

    fn stats(&self) -> ConstraintStats {
        self.stats
    }

    fn stats_mut(&mut self) -> &mut ConstraintStats {
        &mut self.stats
    }
}

/// Discourages chaining special edges of one kind closer together than a
/// minimum traversal distance.
pub struct MinDistBetweenSpecsOfType {
    kind: EdgeKindTag,
    min_dist: f32,
    penalty: u32,
    init_location: Vec3,
    last_location: Vec3,
    stats: ConstraintStats,
}

impl MinDistBetweenSpecsOfType {
    pub fn new(kind: EdgeKindTag, min_dist: f32, penalty: u32, init_location: Vec3) -> Self {
        Self {
            kind,
            min_dist,
            penalty,
            init_location,
            last_location: init_location,
            stats: ConstraintStats::default(),
        }
    }
}

impl PathConstraint for MinDistBetweenSpecsOfType {
    fn init_search(&mut self) {
        self.last_location = self.init_location;
    }

    fn evaluate(&mut self, eval: &EdgeEval, path_cost: &mut u32, _heuristic: &mut u32) -> bool {
        let Some(edge) = eval.world.edge(eval.edge) else {
            return true;
        };
        if edge.kind().tag() != self.kind {
            return true;
        }
        if eval.edge_point.distance(self.last_location) < self.min_dist {
            *path_cost += self.penalty;
        }
        self.last_location = eval.edge_point;
        true
    }

    fn stats(&self) -> ConstraintStats {
        self.stats
    }

    fn stats_mut(&mut self) -> &mut ConstraintStats {
        &mut self.stats
    }
}

/// Vetoes one-way edges without a reverse counterpart in their group. Used
/// when the agent will have to come back the same way.
#[derive(Default)]
pub struct EnforceTwoWayEdges {
    stats: ConstraintStats,
}

impl PathConstraint for EnforceTwoWayEdges {
    fn evaluate(&mut self, eval: &EdgeEval, _path_cost: &mut u32, _heuristic: &mut u32) -> bool {
        let Some(edge) = eval.world.edge(eval.edge) else {
            return false;
        };
        if !edge.is_one_way() {
            return true;
        }
        // A sibling in the group traversable from the far side makes the
        // crossing reversible.
        eval.world
            .edges_in_group(eval.src_poly, eval.edge)
            .into_iter()
            .filter(|&sibling| sibling != eval.edge)
            .any(|sibling| {
                eval.world.edge(sibling).is_some_and(|s| {
                    !s.is_one_way() || s.poly0() == eval.dest_poly
                })
            })
    }

    fn stats(&self) -> ConstraintStats {
        self.stats
    }

    fn stats_mut(&mut self) -> &mut ConstraintStats {
        &mut self.stats
    }
}

/// Biases toward edges whose polys share a cover reference.
pub struct SameCoverLink {
    penalty: u32,
    stats: ConstraintStats,
}

impl SameCoverLink {
    pub fn new(penalty: u32) -> Self {
        Self {
            penalty,
            stats: ConstraintStats::default(),
        }
    }
}

impl PathConstraint for SameCoverLink {
    fn evaluate(&mut self, eval: &EdgeEval, path_cost: &mut u32, _heuristic: &mut u32) -> bool {
        let (Some(src), Some(dest)) = (
            eval.world.poly(eval.src_poly),
            eval.world.poly(eval.dest_poly),
        ) else {
            return true;
        };
        if !src.shares_cover_ref(dest) {
            *path_cost += self.penalty;
        }
        true
    }

    fn stats(&self) -> ConstraintStats {
        self.stats
    }

    fn stats_mut(&mut self) -> &mut ConstraintStats {
        &mut self.stats
    }
}
