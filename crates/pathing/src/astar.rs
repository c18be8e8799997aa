//! The edge A* engine.

use glam::Vec3;
use nav_mesh::{poly_at, EdgeKind, NavWorld};
use nav_types::{
    ids::{EdgeRef, PolyRef},
    params::{PathError, PathParams},
    tunables::BLOCKED,
};
use tracing::{debug, trace};

use crate::{
    constraint::{apply_chain, EdgeEval, PathConstraint},
    goal::{GoalEvaluator, SearchBudget},
    openlist::OpenList,
};

/// Cap on the path-object path rewrite fixed-point loop.
const MAX_PATH_MODIFY_ROUNDS: u32 = 8;

/// State shared by the engine and the goal evaluator chain for the duration
/// of one search.
pub struct SearchContext {
    pub session: u32,
    /// The poly the searching agent currently occupies; the default seed.
    pub anchor_poly: PolyRef,
    pub start: Vec3,
    pub goal_point: Vec3,
    /// Resolved by the goal chain during initialization; stays `None` for
    /// goalless searches.
    pub goal_poly: Option<PolyRef>,
}

/// Result of a successful search.
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    pub session: u32,
    /// Edges in traversal order. Empty when start and goal share a poly.
    pub cache: Vec<EdgeRef>,
    pub goal_edge: Option<EdgeRef>,
    /// Poly the final edge leads into.
    pub dest_poly: Option<PolyRef>,
    /// Best incomplete candidate recorded by the goal chain, when the search
    /// ended on a partial result.
    pub best_unfinished_point: Option<Vec3>,
    /// Number of edge visits performed.
    pub visits: u32,
}

/// Runs an edge A* from the agent's position towards `goal_point`.
///
/// The goal evaluator chain controls seeding, termination and writeback; the
/// constraint chain adjusts or vetoes individual expansions. Failures are
/// returned as the taxonomized [`PathError`]; the caller records them and
/// decides on re-planning.
pub fn find_path(
    world: &mut NavWorld,
    params: &PathParams,
    goal_point: Vec3,
    constraints: &mut [Box<dyn PathConstraint>],
    goals: &mut [Box<dyn GoalEvaluator>],
) -> Result<SearchOutcome, PathError> {
    if !params.able_to_search || goals.is_empty() {
        return Err(PathError::NoPathFound);
    }

    let anchor_poly = resolve_anchor(world, params)?;
    let session = world.next_session();
    let mut ctx = SearchContext {
        session,
        anchor_poly,
        start: params.search_start,
        goal_point,
        goal_poly: None,
    };

    for constraint in constraints.iter_mut() {
        constraint.init_search();
    }

    let mut first_error = None;
    let mut initialized = false;
    for goal in goals.iter_mut() {
        match goal.initialize_search(world, &mut ctx, params) {
            Ok(()) => initialized = true,
            Err(error) => {
                first_error.get_or_insert(error);
            }
        }
    }
    if !initialized {
        let error = first_error.unwrap_or(PathError::NoPathFound);
        debug!("search initialization failed: {error}");
        return Err(error);
    }

    // Start and goal on the same poly: nothing to traverse.
    if ctx.goal_poly == Some(anchor_poly) {
        return Ok(SearchOutcome {
            session,
            cache: Vec::new(),
            goal_edge: None,
            dest_poly: Some(anchor_poly),
            best_unfinished_point: None,
            visits: 0,
        });
    }

    let budget = goals.iter().fold(SearchBudget::default(), |acc, goal| {
        let b = goal.budget();
        SearchBudget {
            max_visits: acc.max_visits.min(b.max_visits),
            max_open: match (acc.max_open, b.max_open) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
        }
    });

    let mut open = OpenList::new(session, budget.max_open);
    seed(world, params, &ctx, constraints, goals, &mut open);
    trace!("search seeded with {} edges", open.len());

    let mut visits = 0;
    let mut goal_edge: Option<EdgeRef> = None;
    let mut saver = 0;
    // Best guess for cap overruns: the popped edge with the lowest
    // remaining heuristic.
    let mut best_popped: Option<(u32, EdgeRef)> = None;

    while let Some(edge_ref) = open.pop_min(world) {
        let Some(state) = world
            .edge_mut(edge_ref)
            .map(|e| *e.search_mut(session))
        else {
            continue;
        };
        if let Some(e) = world.edge_mut(edge_ref) {
            e.search_mut(session).visited = true;
        }

        let mut done = false;
        for (index, goal) in goals.iter_mut().enumerate() {
            if goal.evaluate_goal(world, &ctx, edge_ref) {
                goal_edge = Some(edge_ref);
                saver = index;
                done = true;
                break;
            }
        }
        if done {
            break;
        }

        let remaining = state.estimated_weight.saturating_sub(state.visited_weight);
        if best_popped.map_or(true, |(best, _)| remaining < best) {
            best_popped = Some((remaining, edge_ref));
        }

        visits += 1;
        if visits > budget.max_visits {
            debug!("visit cap {} exceeded", budget.max_visits);
            let best = best_popped.map(|(_, e)| e);
            for (index, goal) in goals.iter_mut().enumerate() {
                let before = goal_edge;
                goal.notify_exceeded_max_path_visits(best, &mut goal_edge);
                if goal_edge != before {
                    saver = index;
                }
            }
            break;
        }

        let src_poly = match world.edge(edge_ref) {
            Some(e) => e.path_destination_poly(session),
            None => continue,
        };
        expand(
            world,
            params,
            &ctx,
            constraints,
            &mut open,
            edge_ref,
            src_poly,
            state.visited_weight,
            state.prev_pos,
        );
    }

    for (index, goal) in goals.iter_mut().enumerate() {
        let before = goal_edge;
        goal.determine_final_goal(world, &ctx, &mut goal_edge);
        if goal_edge != before {
            saver = index;
        }
    }

    let Some(goal) = goal_edge else {
        debug!("open list exhausted after {visits} visits");
        return Err(PathError::NoPathFound);
    };

    let mut cache = Vec::new();
    goals[saver].save_resulting_path(world, &ctx, goal, &mut cache);
    modify_final_path(world, params, &mut cache);

    let dest_poly = world.edge(goal).map(|e| e.path_destination_poly(session));
    let best_unfinished_point = goals.iter().find_map(|g| g.best_unfinished_point());

    Ok(SearchOutcome {
        session,
        cache,
        goal_edge: Some(goal),
        dest_poly,
        best_unfinished_point,
        visits,
    })
}

fn resolve_anchor(world: &NavWorld, params: &PathParams) -> Result<PolyRef, PathError> {
    if let Some(anchor) = poly_at(world, params.search_start, params) {
        return Ok(anchor);
    }

    // Distinguish a start inside a disabled pylon from no poly at all.
    let in_disabled = world.pylons().filter(|p| p.is_disabled()).any(|pylon| {
        pylon
            .mesh()
            .polys()
            .any(|poly| poly.contains(params.search_start, params.max_hover_distance))
    });
    Err(if in_disabled {
        PathError::AnchorPylonNotFound
    } else {
        PathError::StartPolyNotFound
    })
}

fn seed(
    world: &mut NavWorld,
    params: &PathParams,
    ctx: &SearchContext,
    constraints: &mut [Box<dyn PathConstraint>],
    goals: &[Box<dyn GoalEvaluator>],
    open: &mut OpenList,
) {
    for index in 0..goals.len() {
        for seed_poly in goals[index].seed_polys(world, ctx) {
            let origin = if seed_poly == ctx.anchor_poly {
                ctx.start
            } else {
                match world.poly(seed_poly) {
                    Some(poly) => poly.center(),
                    None => continue,
                }
            };

            for edge_ref in world.incident_edges(seed_poly) {
                if !goals[index].is_valid_seed(world, edge_ref) {
                    continue;
                }
                push_successor(
                    world, params, ctx, constraints, open, None, seed_poly, origin, 0, edge_ref,
                );
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn expand(
    world: &mut NavWorld,
    params: &PathParams,
    ctx: &SearchContext,
    constraints: &mut [Box<dyn PathConstraint>],
    open: &mut OpenList,
    prev_edge: EdgeRef,
    src_poly: PolyRef,
    prev_weight: u32,
    prev_point: Vec3,
) {
    let session = ctx.session;
    for edge_ref in world.incident_edges(src_poly) {
        let Some(edge) = world.edge(edge_ref) else {
            continue;
        };

        // Never turn around within the boundary the search came through.
        let same_group = world
            .edge(prev_edge)
            .is_some_and(|prev| edge.in_same_group_as(prev));
        if same_group {
            continue;
        }
        if edge.search(session).not_longest_in_group {
            continue;
        }

        // Of stacked edges on one boundary only the longest supporting one
        // is expanded; the losers are stamped for the session.
        let group = world.edges_in_group(src_poly, edge_ref);
        if group.len() > 1 {
            let mut longest: Option<(f32, EdgeRef)> = None;
            for &member in &group {
                if !world.edge_supports(member, params, src_poly) {
                    continue;
                }
                let Some(length) = world.edge(member).map(|e| e.length()) else {
                    continue;
                };
                if longest.map_or(true, |(best, _)| length > best) {
                    longest = Some((length, member));
                }
            }
            let Some((_, winner)) = longest else {
                continue;
            };
            for &member in &group {
                if member != winner {
                    if let Some(e) = world.edge_mut(member) {
                        e.search_mut(session).not_longest_in_group = true;
                    }
                }
            }
            if winner != edge_ref {
                continue;
            }
        }

        push_successor(
            world,
            params,
            ctx,
            constraints,
            open,
            Some(prev_edge),
            src_poly,
            prev_point,
            prev_weight,
            edge_ref,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn push_successor(
    world: &mut NavWorld,
    params: &PathParams,
    ctx: &SearchContext,
    constraints: &mut [Box<dyn PathConstraint>],
    open: &mut OpenList,
    prev_edge: Option<EdgeRef>,
    src_poly: PolyRef,
    prev_point: Vec3,
    prev_weight: u32,
    edge_ref: EdgeRef,
) {
    let session = ctx.session;
    if !world.edge_supports(edge_ref, params, src_poly) {
        return;
    }
    let (base_cost, edge_point) = world.edge_cost_for(edge_ref, params, prev_point);
    if base_cost == 0 || base_cost >= BLOCKED {
        return;
    }

    let Some(dest_poly) = world.edge(edge_ref).map(|e| e.other_poly(src_poly)) else {
        return;
    };

    let mut path_cost = base_cost;
    let mut heuristic = 0;
    let eval = EdgeEval {
        world,
        params,
        session,
        edge: edge_ref,
        prev_edge,
        src_poly,
        dest_poly,
        edge_point,
        prev_point,
        visited_weight: prev_weight.saturating_add(base_cost),
    };
    if !apply_chain(constraints, &eval, &mut path_cost, &mut heuristic) {
        return;
    }

    let weight = prev_weight.saturating_add(path_cost.max(1));
    let estimated = weight.saturating_add(heuristic);

    let Some(edge) = world.edge(edge_ref) else {
        return;
    };
    let state = edge.search(session);
    if (state.visited || state.on_open) && state.visited_weight <= weight {
        return;
    }
    if state.on_open {
        open.remove(world, edge_ref);
    }

    let dest_is_poly1 = {
        let Some(edge) = world.edge(edge_ref) else {
            return;
        };
        dest_poly == edge.poly1()
    };
    if let Some(state) = world.edge_mut(edge_ref).map(|e| e.search_mut(session)) {
        state.visited_weight = weight;
        state.estimated_weight = estimated;
        state.prev_edge = prev_edge;
        state.prev_pos = edge_point;
        state.dest_is_poly1 = dest_is_poly1;
        state.visited = false;
    }
    open.push(world, edge_ref);
}

/// Lets every path object in the cache rewrite the path until a fixed point
/// (bounded).
fn modify_final_path(world: &NavWorld, params: &PathParams, cache: &mut Vec<EdgeRef>) {
    for _ in 0..MAX_PATH_MODIFY_ROUNDS {
        let mut changed = false;
        for edge_ref in cache.clone() {
            let Some(EdgeKind::PathObject(id)) = world.edge(edge_ref).map(|e| e.kind()) else {
                continue;
            };
            if let Some(object) = world.path_object(id) {
                changed |= object.modify_final_path(params, cache);
            }
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use nav_mesh::PylonFlags;
    use nav_types::ids::PylonId;
    use ntest::timeout;
    use parry3d::{bounding_volume::Aabb, math::Point};

    use super::*;
    use crate::{constraint::Toward, goal::AtGoal};

    fn empty_world() -> NavWorld {
        NavWorld::new(Aabb::new(
            Point::new(-100_000., -100_000., -1_000.),
            Point::new(100_000., 100_000., 1_000.),
        ))
    }

    /// Builds one pylon holding a row of `n` 100x100 polys joined by shared
    /// edges.
    fn row_world(n: u32) -> (NavWorld, PylonId) {
        let mut world = empty_world();
        let pylon = world.add_pylon(
            Aabb::new(
                Point::new(0., 0., -10.),
                Point::new(n as f32 * 100., 100., 100.),
            ),
            PylonFlags::default(),
        );

        let mesh = world.pylon_mut(pylon).unwrap().mesh_mut();
        for i in 0..n {
            let x = i as f32 * 100.;
            mesh.add_poly(
                vec![
                    Vec3::new(x, 0., 0.),
                    Vec3::new(x + 100., 0., 0.),
                    Vec3::new(x + 100., 100., 0.),
                    Vec3::new(x, 100., 0.),
                ],
                200.,
            );
        }
        for i in 1..n {
            let x = i as f32 * 100.;
            world.add_edge(
                EdgeKind::Normal,
                [PolyRef::new(pylon, i - 1), PolyRef::new(pylon, i)],
                [Vec3::new(x, 0., 0.), Vec3::new(x, 100., 0.)],
                100.,
            );
        }
        world.post_load_fixup(pylon);
        (world, pylon)
    }

    fn goals() -> Vec<Box<dyn GoalEvaluator>> {
        vec![Box::new(AtGoal::new())]
    }

    fn params_at(start: Vec3) -> PathParams {
        PathParams {
            search_start: start,
            search_extent: Vec3::new(20., 20., 88.),
            ..Default::default()
        }
    }

    #[test]
    fn test_same_poly_is_trivial() {
        let (mut world, _) = row_world(1);
        let outcome = find_path(
            &mut world,
            &params_at(Vec3::new(10., 50., 0.)),
            Vec3::new(90., 50., 0.),
            &mut [],
            &mut goals(),
        )
        .unwrap();
        assert!(outcome.cache.is_empty());
        assert_eq!(outcome.visits, 0);
    }

    #[test]
    #[timeout(1000)]
    fn test_row_path() {
        let (mut world, pylon) = row_world(5);
        let params = params_at(Vec3::new(50., 50., 0.));
        let outcome = find_path(
            &mut world,
            &params,
            Vec3::new(450., 50., 0.),
            &mut [],
            &mut goals(),
        )
        .unwrap();

        assert_eq!(outcome.cache.len(), 4);
        assert_eq!(outcome.dest_poly, Some(PolyRef::new(pylon, 4)));

        // Path weights increase strictly along the cached chain.
        let mut last = 0;
        for &edge in &outcome.cache {
            let weight = world
                .edge(edge)
                .unwrap()
                .search(outcome.session)
                .visited_weight;
            assert!(weight > last);
            last = weight;
        }
    }

    #[test]
    #[timeout(1000)]
    fn test_one_way_edges() {
        let (mut world, pylon) = row_world(2);
        // Replace the shared edge with a one-way drop from poly 0 to poly 1.
        let shared = world.incident_edges(PolyRef::new(pylon, 0))[0];
        world.destroy_edge(shared, false);
        world.add_edge(
            EdgeKind::Drop(50.),
            [PolyRef::new(pylon, 0), PolyRef::new(pylon, 1)],
            [Vec3::new(100., 0., 0.), Vec3::new(100., 100., 0.)],
            100.,
        );

        let mut params = params_at(Vec3::new(50., 50., 0.));
        params.max_drop_height = 80.;
        assert!(find_path(
            &mut world,
            &params,
            Vec3::new(150., 50., 0.),
            &mut [],
            &mut goals(),
        )
        .is_ok());

        // The reverse direction has no usable edge.
        params.search_start = Vec3::new(150., 50., 0.);
        let error = find_path(
            &mut world,
            &params,
            Vec3::new(50., 50., 0.),
            &mut [],
            &mut goals(),
        )
        .unwrap_err();
        assert_eq!(error, PathError::NoPathFound);

        // A mantle edge opens the way back for a climber.
        world.add_edge(
            EdgeKind::Mantle(50.),
            [PolyRef::new(pylon, 1), PolyRef::new(pylon, 0)],
            [Vec3::new(100., 0., 0.), Vec3::new(100., 100., 0.)],
            100.,
        );
        assert_eq!(
            find_path(
                &mut world,
                &params,
                Vec3::new(50., 50., 0.),
                &mut [],
                &mut goals(),
            )
            .err(),
            Some(PathError::NoPathFound)
        );
        params.can_mantle = true;
        assert!(find_path(
            &mut world,
            &params,
            Vec3::new(50., 50., 0.),
            &mut [],
            &mut goals(),
        )
        .is_ok());
    }

    #[test]
    #[timeout(1000)]
    fn test_visit_cap_keeps_partial() {
        let (mut world, _) = row_world(40);
        let params = params_at(Vec3::new(50., 50., 0.));
        let mut goals: Vec<Box<dyn GoalEvaluator>> = vec![Box::new(
            AtGoal::new().keep_partial(true).with_budget(SearchBudget {
                max_visits: 8,
                max_open: None,
            }),
        )];

        let outcome = find_path(
            &mut world,
            &params,
            Vec3::new(3950., 50., 0.),
            &mut [],
            &mut goals,
        )
        .unwrap();
        assert!(outcome.visits <= 9);
        assert!(!outcome.cache.is_empty());
        assert!(outcome.cache.len() < 39);
        let point = outcome.best_unfinished_point.unwrap();
        assert!(point.length() > 0.);
    }

    /// Adds a pylon with two edge-less polys far from the row, so any search
    /// between them finds an anchor and a goal poly but no traversable edge.
    fn add_island(world: &mut NavWorld) -> PylonId {
        let island = world.add_pylon(
            Aabb::new(
                Point::new(20_000., 0., -10.),
                Point::new(20_200., 100., 100.),
            ),
            PylonFlags::default(),
        );
        let mesh = world.pylon_mut(island).unwrap().mesh_mut();
        for i in 0..2 {
            let x = 20_000. + i as f32 * 100.;
            mesh.add_poly(
                vec![
                    Vec3::new(x, 0., 0.),
                    Vec3::new(x + 100., 0., 0.),
                    Vec3::new(x + 100., 100., 0.),
                    Vec3::new(x, 100., 0.),
                ],
                200.,
            );
        }
        world.post_load_fixup(island);
        island
    }

    #[test]
    #[timeout(1000)]
    fn test_goal_state_resets_between_searches() {
        let (mut world, _) = row_world(12);
        add_island(&mut world);

        let mut goals: Vec<Box<dyn GoalEvaluator>> = vec![Box::new(
            AtGoal::new().keep_partial(true).with_budget(SearchBudget {
                max_visits: 8,
                max_open: None,
            }),
        )];

        // A capped search on the row leaves a partial candidate behind.
        let partial = find_path(
            &mut world,
            &params_at(Vec3::new(50., 50., 0.)),
            Vec3::new(1150., 50., 0.),
            &mut [],
            &mut goals,
        )
        .unwrap();
        assert!(!partial.cache.is_empty());

        // Reusing the same chain between disconnected polys must not
        // resurrect that candidate.
        let error = find_path(
            &mut world,
            &params_at(Vec3::new(20_050., 50., 0.)),
            Vec3::new(20_150., 50., 0.),
            &mut [],
            &mut goals,
        )
        .unwrap_err();
        assert_eq!(error, PathError::NoPathFound);

        // Goalless evaluators reset their running best the same way.
        let mut goals: Vec<Box<dyn GoalEvaluator>> = vec![Box::new(crate::goal::NullGoal::new())];
        find_path(
            &mut world,
            &params_at(Vec3::new(50., 50., 0.)),
            Vec3::ZERO,
            &mut [],
            &mut goals,
        )
        .unwrap();
        let error = find_path(
            &mut world,
            &params_at(Vec3::new(20_050., 50., 0.)),
            Vec3::ZERO,
            &mut [],
            &mut goals,
        )
        .unwrap_err();
        assert_eq!(error, PathError::NoPathFound);
    }

    #[test]
    fn test_unreachable_pylon_precheck() {
        let mut world = empty_world();
        let near = world.add_pylon(
            Aabb::new(Point::new(0., 0., -10.), Point::new(100., 100., 100.)),
            PylonFlags::default(),
        );
        let far = world.add_pylon(
            Aabb::new(
                Point::new(50_000., 0., -10.),
                Point::new(50_100., 100., 100.),
            ),
            PylonFlags::default(),
        );
        for (pylon, x) in [(near, 0.), (far, 50_000.)] {
            world.pylon_mut(pylon).unwrap().mesh_mut().add_poly(
                vec![
                    Vec3::new(x, 0., 0.),
                    Vec3::new(x + 100., 0., 0.),
                    Vec3::new(x + 100., 100., 0.),
                    Vec3::new(x, 100., 0.),
                ],
                200.,
            );
            world.post_load_fixup(pylon);
        }

        let mut constraints: Vec<Box<dyn PathConstraint>> =
            vec![Box::new(Toward::new(Vec3::new(50_050., 50., 0.)))];
        let error = find_path(
            &mut world,
            &params_at(Vec3::new(50., 50., 0.)),
            Vec3::new(50_050., 50., 0.),
            &mut constraints,
            &mut goals(),
        )
        .unwrap_err();

        assert_eq!(error, PathError::NoPathFound);
        // The pre-check fired before any expansion work.
        assert_eq!(constraints[0].stats().processed, 0);
    }

    #[test]
    #[timeout(1000)]
    fn test_null_goal_takes_farthest_edge() {
        let (mut world, pylon) = row_world(6);
        let params = params_at(Vec3::new(50., 50., 0.));
        let mut goals: Vec<Box<dyn GoalEvaluator>> = vec![Box::new(crate::goal::NullGoal::new())];

        // A flee-style search with no fixed goal floods the whole row and
        // keeps the farthest reached edge.
        let outcome = find_path(&mut world, &params, Vec3::ZERO, &mut [], &mut goals).unwrap();
        let last = world.incident_edges(PolyRef::new(pylon, 5))[0];
        assert_eq!(outcome.goal_edge, Some(last));
        assert_eq!(outcome.cache.len(), 5);
        assert!(outcome.best_unfinished_point.is_some());
    }

    #[test]
    #[timeout(1000)]
    fn test_hard_traversal_bound() {
        let (mut world, _) = row_world(10);
        let params = params_at(Vec3::new(50., 50., 0.));
        let mut constraints: Vec<Box<dyn PathConstraint>> =
            vec![Box::new(crate::constraint::WithinTraversalDist::hard(250))];

        let error = find_path(
            &mut world,
            &params,
            Vec3::new(950., 50., 0.),
            &mut constraints,
            &mut goals(),
        )
        .unwrap_err();
        assert_eq!(error, PathError::NoPathFound);
        assert!(constraints[0].stats().thrown_out > 0);
    }

    #[test]
    #[timeout(1000)]
    fn test_two_way_round_trip() {
        let (mut world, pylon) = row_world(2);
        let edge = world.incident_edges(PolyRef::new(pylon, 0))[0];

        let forward = find_path(
            &mut world,
            &params_at(Vec3::new(50., 50., 0.)),
            Vec3::new(150., 50., 0.),
            &mut [],
            &mut goals(),
        )
        .unwrap();
        assert_eq!(forward.cache, vec![edge]);

        let back = find_path(
            &mut world,
            &params_at(Vec3::new(150., 50., 0.)),
            Vec3::new(50., 50., 0.),
            &mut [],
            &mut goals(),
        )
        .unwrap();
        assert_eq!(back.cache, vec![edge]);
    }

    #[test]
    #[timeout(1000)]
    fn test_sessions_stay_clean() {
        let (mut world, _) = row_world(5);
        let params = params_at(Vec3::new(50., 50., 0.));

        let first = find_path(
            &mut world,
            &params,
            Vec3::new(450., 50., 0.),
            &mut [],
            &mut goals(),
        )
        .unwrap();
        let second = find_path(
            &mut world,
            &params,
            Vec3::new(450., 50., 0.),
            &mut [],
            &mut goals(),
        )
        .unwrap();

        assert_ne!(first.session, second.session);
        assert_eq!(first.cache, second.cache);
        // No stale closed-list state leaks into the new session.
        for &edge in &second.cache {
            assert!(!world.edge(edge).unwrap().search(second.session + 1).visited);
        }
    }
}
