//! Goal evaluators: search seeding, termination and path writeback.
//!
//! Evaluators form an ordered chain combined with OR semantics: the search
//! terminates as soon as any evaluator accepts the popped edge. Besides the
//! goal test an evaluator can reshape the whole search: seed it from polys
//! other than the anchor, bound it, accept a partial result when the visit
//! cap fires and control how the resulting edge chain lands in the cache.

use glam::Vec3;
use nav_mesh::{poly_at, NavWorld};
use nav_types::{
    ids::{EdgeRef, PolyRef},
    params::{PathError, PathParams},
    tunables::MAX_PATH_VISITS,
};

use crate::{astar::SearchContext, hilevel};

/// Bounds of one search. The effective budget of a chain is the strictest
/// over its evaluators.
#[derive(Clone, Copy, Debug)]
pub struct SearchBudget {
    /// Cap on A* edge visits.
    pub max_visits: u32,
    /// Open list cap; turns the search into beam search when set.
    pub max_open: Option<usize>,
}

impl Default for SearchBudget {
    fn default() -> Self {
        Self {
            max_visits: MAX_PATH_VISITS,
            max_open: None,
        }
    }
}

pub trait GoalEvaluator {
    fn budget(&self) -> SearchBudget {
        SearchBudget::default()
    }

    /// Resolves goal state and runs the high-level pylon route pre-check.
    /// The default resolves the context goal point to a poly and requires a
    /// pylon-graph route from the anchor to it. Evaluators carrying candidate
    /// state from earlier searches must also reset it here.
    fn initialize_search(
        &mut self,
        world: &mut NavWorld,
        ctx: &mut SearchContext,
        params: &PathParams,
    ) -> Result<(), PathError> {
        initialize_with_goal(world, ctx, params)
    }

    /// Polys the open list is seeded from. Defaults to the anchor poly.
    fn seed_polys(&self, _world: &NavWorld, ctx: &SearchContext) -> Vec<PolyRef> {
        vec![ctx.anchor_poly]
    }

    /// Gives the evaluator a veto over individual seed edges.
    fn is_valid_seed(&self, _world: &NavWorld, _edge: EdgeRef) -> bool {
        true
    }

    /// Returns true to terminate the search with `edge` as the goal. May
    /// record a running best-partial candidate as a side effect.
    fn evaluate_goal(&mut self, world: &NavWorld, ctx: &SearchContext, edge: EdgeRef) -> bool;

    /// Called exactly once after the loop; may replace the goal with a
    /// stored partial.
    fn determine_final_goal(
        &mut self,
        _world: &NavWorld,
        _ctx: &SearchContext,
        _goal: &mut Option<EdgeRef>,
    ) {
    }

    /// Called when the visit cap fired. The default accepts the best edge
    /// popped so far.
    fn notify_exceeded_max_path_visits(
        &mut self,
        best_guess: Option<EdgeRef>,
        goal: &mut Option<EdgeRef>,
    ) {
        if goal.is_none() {
            *goal = best_guess;
        }
    }

    /// Writes the resulting edge chain into the cache. The default walks the
    /// predecessor pointers and inserts the chain at the front in
    /// start-to-goal order.
    fn save_resulting_path(
        &self,
        world: &NavWorld,
        ctx: &SearchContext,
        goal: EdgeRef,
        cache: &mut Vec<EdgeRef>,
    ) {
        let mut chain = predecessor_chain(world, ctx.session, goal);
        chain.reverse();
        cache.splice(0..0, chain);
    }

    /// Best incomplete candidate recorded during the search, if any.
    fn best_unfinished_point(&self) -> Option<Vec3> {
        None
    }
}

/// Walks predecessor pointers from `goal` towards the seed. The walk is
/// capped; a longer chain indicates corrupted search state.
fn predecessor_chain(world: &NavWorld, session: u32, goal: EdgeRef) -> Vec<EdgeRef> {
    let mut chain = Vec::new();
    let mut current = Some(goal);
    while let Some(edge) = current {
        chain.push(edge);
        if chain.len() > 100_000 {
            debug_assert!(false, "predecessor cycle");
            break;
        }
        current = world.edge(edge).and_then(|e| e.search(session).prev_edge);
    }
    chain
}

/// Initialization for evaluators with a fixed goal point: resolves the
/// context goal point to a poly and requires a pylon-graph route from the
/// anchor to it.
fn initialize_with_goal(
    world: &mut NavWorld,
    ctx: &mut SearchContext,
    params: &PathParams,
) -> Result<(), PathError> {
    let goal_poly = poly_at(world, ctx.goal_point, params).ok_or(PathError::GoalPolyNotFound)?;
    ctx.goal_poly = Some(goal_poly);
    if !hilevel::mark_route(
        world,
        ctx.session,
        ctx.anchor_poly.pylon(),
        goal_poly.pylon(),
    ) {
        return Err(PathError::NoPathFound);
    }
    Ok(())
}

/// Initialization for evaluators without a fixed goal point: no goal poly is
/// resolved and the high-level route is just the anchor pylon.
fn initialize_goalless(
    world: &mut NavWorld,
    ctx: &mut SearchContext,
) -> Result<(), PathError> {
    let pylon = ctx.anchor_poly.pylon();
    hilevel::mark_route(world, ctx.session, pylon, pylon);
    Ok(())
}

/// Reaches a fixed goal point. Optionally keeps the best partial candidate
/// so a capped or exhausted search still produces a usable path.
pub struct AtGoal {
    keep_partial: bool,
    weight_partial_by_dist: bool,
    budget: SearchBudget,
    best_partial: Option<(f32, EdgeRef, Vec3)>,
}

impl AtGoal {
    pub fn new() -> Self {
        Self {
            keep_partial: false,
            weight_partial_by_dist: false,
            budget: SearchBudget::default(),
            best_partial: None,
        }
    }

    pub fn keep_partial(mut self, weight_by_dist: bool) -> Self {
        self.keep_partial = true;
        self.weight_partial_by_dist = weight_by_dist;
        self
    }

    pub fn with_budget(mut self, budget: SearchBudget) -> Self {
        self.budget = budget;
        self
    }
}

impl Default for AtGoal {
    fn default() -> Self {
        Self::new()
    }
}

impl GoalEvaluator for AtGoal {
    fn budget(&self) -> SearchBudget {
        self.budget
    }

    fn initialize_search(
        &mut self,
        world: &mut NavWorld,
        ctx: &mut SearchContext,
        params: &PathParams,
    ) -> Result<(), PathError> {
        self.best_partial = None;
        initialize_with_goal(world, ctx, params)
    }

    fn evaluate_goal(&mut self, world: &NavWorld, ctx: &SearchContext, edge: EdgeRef) -> bool {
        let Some(e) = world.edge(edge) else {
            return false;
        };
        if Some(e.path_destination_poly(ctx.session)) == ctx.goal_poly {
            return true;
        }

        if self.keep_partial {
            let state = e.search(ctx.session);
            let point = state.prev_pos;
            let distance = point.distance(ctx.goal_point);
            let score = if self.weight_partial_by_dist {
                distance + state.visited_weight as f32
            } else {
                distance
            };
            if self.best_partial.map_or(true, |(best, _, _)| score < best) {
                self.best_partial = Some((score, edge, point));
            }
        }
        false
    }

    fn determine_final_goal(
        &mut self,
        _world: &NavWorld,
        _ctx: &SearchContext,
        goal: &mut Option<EdgeRef>,
    ) {
        if goal.is_none() && self.keep_partial {
            *goal = self.best_partial.map(|(_, edge, _)| edge);
        }
    }

    fn notify_exceeded_max_path_visits(
        &mut self,
        best_guess: Option<EdgeRef>,
        goal: &mut Option<EdgeRef>,
    ) {
        if goal.is_some() {
            return;
        }
        *goal = match self.best_partial {
            Some((_, edge, _)) if self.keep_partial => Some(edge),
            _ => best_guess,
        };
    }

    fn best_unfinished_point(&self) -> Option<Vec3> {
        self.best_partial.map(|(_, _, point)| point)
    }
}

/// Never terminates on its own; records the farthest reached edge. Used for
/// flee and wander style searches which take the best the budget allows.
#[derive(Default)]
pub struct NullGoal {
    best: Option<(u32, EdgeRef, Vec3)>,
}

impl NullGoal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GoalEvaluator for NullGoal {
    fn initialize_search(
        &mut self,
        world: &mut NavWorld,
        ctx: &mut SearchContext,
        _params: &PathParams,
    ) -> Result<(), PathError> {
        self.best = None;
        initialize_goalless(world, ctx)
    }

    fn evaluate_goal(&mut self, world: &NavWorld, ctx: &SearchContext, edge: EdgeRef) -> bool {
        if let Some(e) = world.edge(edge) {
            let state = e.search(ctx.session);
            if self.best.map_or(true, |(g, _, _)| state.visited_weight > g) {
                self.best = Some((state.visited_weight, edge, state.prev_pos));
            }
        }
        false
    }

    fn determine_final_goal(
        &mut self,
        _world: &NavWorld,
        _ctx: &SearchContext,
        goal: &mut Option<EdgeRef>,
    ) {
        if goal.is_none() {
            *goal = self.best.map(|(_, edge, _)| edge);
        }
    }

    fn best_unfinished_point(&self) -> Option<Vec3> {
        self.best.map(|(_, _, point)| point)
    }
}

/// Picks a random visited edge at least `min_dist` from the search start.
pub struct RandomGoal {
    min_dist: f32,
    candidates: Vec<EdgeRef>,
}

impl RandomGoal {
    pub fn new(min_dist: f32) -> Self {
        Self {
            min_dist,
            candidates: Vec::new(),
        }
    }
}

impl GoalEvaluator for RandomGoal {
    fn initialize_search(
        &mut self,
        world: &mut NavWorld,
        ctx: &mut SearchContext,
        _params: &PathParams,
    ) -> Result<(), PathError> {
        self.candidates.clear();
        initialize_goalless(world, ctx)
    }

    fn evaluate_goal(&mut self, world: &NavWorld, ctx: &SearchContext, edge: EdgeRef) -> bool {
        if let Some(e) = world.edge(edge) {
            if e.search(ctx.session).prev_pos.distance(ctx.start) >= self.min_dist {
                self.candidates.push(edge);
            }
        }
        false
    }

    fn determine_final_goal(
        &mut self,
        _world: &NavWorld,
        _ctx: &SearchContext,
        goal: &mut Option<EdgeRef>,
    ) {
        if goal.is_none() && !self.candidates.is_empty() {
            *goal = Some(self.candidates[fastrand::usize(..self.candidates.len())]);
        }
    }
}

/// Reverse search towards the closest of several candidate locations: the
/// open list is seeded at every candidate and the goal is the agent's own
/// anchor poly. The saved path therefore runs anchor-to-candidate without a
/// final reversal.
pub struct ClosestInList {
    goals: Vec<Vec3>,
    seeds: Vec<PolyRef>,
}

impl ClosestInList {
    pub fn new(goals: Vec<Vec3>) -> Self {
        Self {
            goals,
            seeds: Vec::new(),
        }
    }
}

impl GoalEvaluator for ClosestInList {
    fn initialize_search(
        &mut self,
        world: &mut NavWorld,
        ctx: &mut SearchContext,
        params: &PathParams,
    ) -> Result<(), PathError> {
        self.seeds.clear();
        let mut any_route = false;
        for &goal in &self.goals {
            let Some(poly) = poly_at(world, goal, params) else {
                continue;
            };
            self.seeds.push(poly);
            any_route |= hilevel::mark_route(
                world,
                ctx.session,
                poly.pylon(),
                ctx.anchor_poly.pylon(),
            );
        }
        if self.seeds.is_empty() {
            return Err(PathError::GoalPolyNotFound);
        }
        if !any_route {
            return Err(PathError::NoPathFound);
        }
        Ok(())
    }

    fn seed_polys(&self, _world: &NavWorld, _ctx: &SearchContext) -> Vec<PolyRef> {
        self.seeds.clone()
    }

    fn evaluate_goal(&mut self, world: &NavWorld, ctx: &SearchContext, edge: EdgeRef) -> bool {
        world
            .edge(edge)
            .is_some_and(|e| e.path_destination_poly(ctx.session) == ctx.anchor_poly)
    }

    fn save_resulting_path(
        &self,
        world: &NavWorld,
        ctx: &SearchContext,
        goal: EdgeRef,
        cache: &mut Vec<EdgeRef>,
    ) {
        // The predecessor chain already runs anchor-to-candidate.
        let chain = predecessor_chain(world, ctx.session, goal);
        cache.splice(0..0, chain);
    }
}

/// First poly big enough to encompass the agent extent.
pub struct PolyEncompasses {
    extent: f32,
}

impl PolyEncompasses {
    pub fn new(extent: f32) -> Self {
        Self { extent }
    }
}

impl GoalEvaluator for PolyEncompasses {
    fn initialize_search(
        &mut self,
        world: &mut NavWorld,
        ctx: &mut SearchContext,
        _params: &PathParams,
    ) -> Result<(), PathError> {
        initialize_goalless(world, ctx)
    }

    fn evaluate_goal(&mut self, world: &NavWorld, ctx: &SearchContext, edge: EdgeRef) -> bool {
        let Some(dest) = world
            .edge(edge)
            .map(|e| e.path_destination_poly(ctx.session))
        else {
            return false;
        };
        world
            .poly(dest)
            .is_some_and(|p| p.encompasses_circle(self.extent))
    }
}

/// A point inside an annular envelope around a center, after a minimum
/// traversal distance.
pub struct DistanceEnvelopeGoal {
    center: Vec3,
    min: f32,
    max: f32,
    min_traversal: u32,
}

impl DistanceEnvelopeGoal {
    pub fn new(center: Vec3, min: f32, max: f32, min_traversal: u32) -> Self {
        Self {
            center,
            min,
            max,
            min_traversal,
        }
    }
}

impl GoalEvaluator for DistanceEnvelopeGoal {
    fn initialize_search(
        &mut self,
        world: &mut NavWorld,
        ctx: &mut SearchContext,
        _params: &PathParams,
    ) -> Result<(), PathError> {
        initialize_goalless(world, ctx)
    }

    fn evaluate_goal(&mut self, world: &NavWorld, ctx: &SearchContext, edge: EdgeRef) -> bool {
        let Some(e) = world.edge(edge) else {
            return false;
        };
        let state = e.search(ctx.session);
        if state.visited_weight < self.min_traversal {
            return false;
        }
        let distance = state.prev_pos.distance(self.center);
        (self.min..=self.max).contains(&distance)
    }
}

/// A sub-filter of [`FilterContainer`].
pub trait GoalFilter {
    fn is_valid_seed(&self, _world: &NavWorld, _edge: EdgeRef) -> bool {
        true
    }

    fn evaluate(&self, world: &NavWorld, ctx: &SearchContext, edge: EdgeRef) -> bool;
}

/// Composite evaluator: the goal test is the conjunction of all sub-filters
/// and each sub-filter can veto seed edges. Results append to the cache so
/// multi-goal searches can accumulate several legs.
pub struct FilterContainer {
    filters: Vec<Box<dyn GoalFilter>>,
}

impl FilterContainer {
    pub fn new(filters: Vec<Box<dyn GoalFilter>>) -> Self {
        Self { filters }
    }
}

impl GoalEvaluator for FilterContainer {
    fn initialize_search(
        &mut self,
        world: &mut NavWorld,
        ctx: &mut SearchContext,
        _params: &PathParams,
    ) -> Result<(), PathError> {
        initialize_goalless(world, ctx)
    }

    fn is_valid_seed(&self, world: &NavWorld, edge: EdgeRef) -> bool {
        self.filters.iter().all(|f| f.is_valid_seed(world, edge))
    }

    fn evaluate_goal(&mut self, world: &NavWorld, ctx: &SearchContext, edge: EdgeRef) -> bool {
        !self.filters.is_empty() && self.filters.iter().all(|f| f.evaluate(world, ctx, edge))
    }

    fn save_resulting_path(
        &self,
        world: &NavWorld,
        ctx: &SearchContext,
        goal: EdgeRef,
        cache: &mut Vec<EdgeRef>,
    ) {
        let mut chain = predecessor_chain(world, ctx.session, goal);
        chain.reverse();
        cache.extend(chain);
    }
}
