//! High-level route pre-check on the pylon adjacency graph.
//!
//! A Dijkstra pass at pylon granularity both short-circuits hopeless
//! searches before any edge is expanded and stamps the pylons of the found
//! route so the `Toward` constraint can bias edge expansion toward it.

use std::{cmp::Reverse, collections::BinaryHeap};

use ahash::AHashMap;
use nav_mesh::NavWorld;
use nav_types::{fkey::FloatKey, ids::PylonId};

/// Runs Dijkstra from `from` to `to` over pylon adjacency. On success marks
/// every pylon of the cheapest route with the session id and returns true.
pub(crate) fn mark_route(world: &mut NavWorld, session: u32, from: PylonId, to: PylonId) -> bool {
    if from == to {
        if let Some(pylon) = world.pylon_mut(from) {
            pylon.mark_high_level(session);
        }
        return true;
    }

    let mut distances: AHashMap<PylonId, f32> = AHashMap::new();
    let mut previous: AHashMap<PylonId, PylonId> = AHashMap::new();
    let mut heap: BinaryHeap<Reverse<(FloatKey, PylonId)>> = BinaryHeap::new();

    distances.insert(from, 0.);
    heap.push(Reverse((FloatKey(0.), from)));

    while let Some(Reverse((FloatKey(distance), current))) = heap.pop() {
        if current == to {
            break;
        }
        if distances.get(&current).is_some_and(|&d| distance > d) {
            continue;
        }
        let Some(center) = world.pylon(current).map(|p| p.bounds().center()) else {
            continue;
        };

        for neighbor in world.pylon_neighbors(current) {
            let Some(pylon) = world.pylon(neighbor) else {
                continue;
            };
            if pylon.is_disabled() {
                continue;
            }
            let next = distance + (pylon.bounds().center() - center).norm();
            if distances.get(&neighbor).map_or(true, |&d| next < d) {
                distances.insert(neighbor, next);
                previous.insert(neighbor, current);
                heap.push(Reverse((FloatKey(next), neighbor)));
            }
        }
    }

    if !previous.contains_key(&to) {
        return false;
    }

    let mut current = to;
    loop {
        if let Some(pylon) = world.pylon_mut(current) {
            pylon.mark_high_level(session);
        }
        match previous.get(&current) {
            Some(&prev) => current = prev,
            None => break,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use nav_mesh::PylonFlags;
    use parry3d::{bounding_volume::Aabb, math::Point};

    use super::*;

    fn bounds(x: f32) -> Aabb {
        Aabb::new(Point::new(x, 0., -10.), Point::new(x + 1000., 1000., 100.))
    }

    #[test]
    fn test_route_marking() {
        let mut world = NavWorld::new(Aabb::new(
            Point::new(-10_000., -10_000., -1_000.),
            Point::new(10_000., 10_000., 1_000.),
        ));
        // Three overlapping pylons in a row, one far away.
        let a = world.add_pylon(bounds(0.), PylonFlags::default());
        let b = world.add_pylon(bounds(999.), PylonFlags::default());
        let c = world.add_pylon(bounds(1998.), PylonFlags::default());
        let island = world.add_pylon(bounds(8000.), PylonFlags::default());
        for id in [a, b, c, island] {
            world.post_load_fixup(id);
        }

        assert!(mark_route(&mut world, 1, a, c));
        assert!(world.pylon(c).unwrap().in_high_level_path(1));
        assert!(world.pylon(b).unwrap().in_high_level_path(1));
        assert!(!world.pylon(island).unwrap().in_high_level_path(1));

        assert!(!mark_route(&mut world, 2, a, island));
        // The failed pre-check left no stale marks for the new session.
        assert!(!world.pylon(b).unwrap().in_high_level_path(2));
    }
}
