//! Sub-mesh carving.
//!
//! Carving clips the footprints of all obstacles affecting a poly to the
//! poly's ring, merges overlapping clips, triangulates the residue with a
//! constrained Delaunay triangulation and turns the unblocked triangles into
//! sub-mesh polys. Edges incident to the parent are re-anchored onto the
//! sub-mesh poly containing their midpoint so paths can still cross the
//! carved region; clearing the sub-mesh re-anchors them back and destroys
//! every carve-created edge through the deletion queue.

use ahash::AHashMap;
use glam::{Vec2, Vec3};
use nav_types::{
    fkey::SegmentKey,
    ids::{ObstacleId, PolyRef},
};
use parry2d::math::Point;
use spade::{ConstrainedDelaunayTriangulation, InsertionError, Point2, Triangulation};
use tinyvec::ArrayVec;
use tracing::warn;

use crate::{edge::EdgeKind, world::NavWorld};

const AREA_EPSILON: f32 = 1e-3;

/// Shrink factor applied to carved holes so their constraint edges never
/// touch the poly ring or each other.
const HOLE_SHRINK: f32 = 0.999;

/// Re-carves the sub-mesh of a top-level poly from all obstacles currently
/// affecting it. Must run under a deletion hold.
pub(crate) fn rebuild_submesh(world: &mut NavWorld, poly_ref: PolyRef) {
    clear_submesh(world, poly_ref);

    let Some(poly) = world.poly(poly_ref) else {
        return;
    };
    if poly.num_obstacles_affecting() == 0 {
        return;
    }

    let ring: Vec<Vec2> = poly.verts().iter().map(|v| v.truncate()).collect();
    let height = poly.height();
    let normal = poly.normal();
    let plane_d = normal.dot(poly.center());
    let mut obstacles: Vec<ObstacleId> = poly.obstacles().iter().copied().collect();
    obstacles.sort();

    let mut holes: Vec<Vec<Vec2>> = Vec::new();
    for id in obstacles {
        let Some(registered) = world.active_obstacles.get(&id) else {
            continue;
        };
        for footprint in registered.footprints() {
            let clipped = clip_convex(footprint.verts(), &ring);
            if ring_area(&clipped) > AREA_EPSILON {
                holes.push(clipped);
            }
        }
    }
    let holes = merge_intersecting(holes);

    // No walkable residue: keep the poly with an empty sub-mesh. Searches
    // simply find no way in.
    let blocked_area: f32 = holes.iter().map(|h| ring_area(h)).sum();
    if blocked_area >= ring_area(&ring) - 1. {
        if let Some(poly) = world.poly_mut(poly_ref) {
            poly.set_sub_polys(Vec::new(), true);
        }
        return;
    }

    let holes: Vec<Vec<Vec2>> = holes.iter().map(|h| shrink(h, HOLE_SHRINK)).collect();

    let triangles = match triangulate(&ring, &holes) {
        Ok(triangles) => triangles,
        Err(error) => {
            warn!("carving triangulation failed on {poly_ref}: {error}");
            triangulate(&ring, &[]).unwrap_or_default()
        }
    };

    let plane_z = |p: Vec2| (plane_d - normal.x * p.x - normal.y * p.y) / normal.z;

    let mut sub_items: Vec<u32> = Vec::new();
    for triangle in triangles {
        let centroid = (triangle[0] + triangle[1] + triangle[2]) / 3.;
        if holes.iter().any(|h| contains_convex(h, centroid)) {
            continue;
        }
        if !contains_convex(&ring, centroid) {
            continue;
        }

        let mut triangle = triangle;
        if (triangle[1] - triangle[0]).perp_dot(triangle[2] - triangle[0]) < 0. {
            triangle.swap(1, 2);
        }
        let verts: Vec<Vec3> = triangle.iter().map(|&p| p.extend(plane_z(p))).collect();

        let Some(pylon) = world.pylon_mut(poly_ref.pylon()) else {
            return;
        };
        sub_items.push(pylon.mesh_mut().add_sub_poly(poly_ref.index(), verts, height));
    }

    let fully_blocked = sub_items.is_empty();
    if let Some(poly) = world.poly_mut(poly_ref) {
        poly.set_sub_polys(sub_items.clone(), fully_blocked);
    }

    connect_sub_polys(world, poly_ref, &sub_items);
    reanchor_parent_edges(world, poly_ref, &sub_items);
    attach_back_refs(world, poly_ref, &sub_items);
}

/// Tears down the sub-mesh of a poly: destroys carve-created edges through
/// the deletion queue, re-anchors surviving edges back onto the parent and
/// kills the sub-mesh polys. Must run under a deletion hold.
pub(crate) fn clear_submesh(world: &mut NavWorld, poly_ref: PolyRef) {
    let Some(poly) = world.poly(poly_ref) else {
        return;
    };
    let subs = poly.sub_polys().to_vec();
    if subs.is_empty() && !poly.is_fully_blocked() {
        return;
    }

    for &item in &subs {
        let sub_ref = PolyRef::new(poly_ref.pylon(), item);
        for edge_ref in world.incident_edges(sub_ref) {
            let synthetic = world
                .edge(edge_ref)
                .map(|e| e.is_synthetic())
                .unwrap_or(true);
            if synthetic {
                let events = world.destroy_edge(edge_ref, false);
                debug_assert!(events.is_empty(), "carving must run under a hold");
            } else {
                if let Some(edge) = world.edge_mut(edge_ref) {
                    edge.reanchor(sub_ref, poly_ref);
                }
                if let Some(sub) = world.poly_mut(sub_ref) {
                    sub.remove_edge_ref(edge_ref);
                }
                let present = world
                    .poly(poly_ref)
                    .is_some_and(|p| p.edges().contains(&edge_ref));
                if !present {
                    if let Some(parent) = world.poly_mut(poly_ref) {
                        parent.add_edge_ref(edge_ref);
                    }
                }
            }
        }
        if let Some(sub) = world.poly_mut(sub_ref) {
            sub.kill();
        }
    }

    if let Some(poly) = world.poly_mut(poly_ref) {
        poly.set_sub_polys(Vec::new(), false);
    }
}

/// Builds the internal edges between sub-mesh polys sharing a boundary
/// segment.
fn connect_sub_polys(world: &mut NavWorld, poly_ref: PolyRef, sub_items: &[u32]) {
    let mut segments: AHashMap<SegmentKey, (ArrayVec<[u32; 4]>, Vec3, Vec3)> = AHashMap::new();
    for &item in sub_items {
        let Some(sub) = world.poly(PolyRef::new(poly_ref.pylon(), item)) else {
            continue;
        };
        let verts = sub.verts().to_vec();
        for i in 0..verts.len() {
            let a = verts[i];
            let b = verts[(i + 1) % verts.len()];
            let entry = segments
                .entry(SegmentKey::new(a.truncate(), b.truncate()))
                .or_insert((ArrayVec::new(), a, b));
            if entry.0.len() < entry.0.capacity() {
                entry.0.push(item);
            }
        }
    }

    for (items, a, b) in segments.into_values() {
        if items.len() != 2 {
            continue;
        }
        let polys = [
            PolyRef::new(poly_ref.pylon(), items[0]),
            PolyRef::new(poly_ref.pylon(), items[1]),
        ];
        let width = a.distance(b);
        if let Some(edge) = world.add_edge(EdgeKind::Normal, polys, [a, b], width) {
            if let Some(edge) = world.edge_mut(edge) {
                edge.set_synthetic();
            }
        }
    }
}

/// Moves every edge incident to the parent onto the sub-mesh poly containing
/// the edge midpoint (nearest sub-poly center when no poly contains it).
fn reanchor_parent_edges(world: &mut NavWorld, poly_ref: PolyRef, sub_items: &[u32]) {
    if sub_items.is_empty() {
        return;
    }

    for edge_ref in world.incident_edges(poly_ref) {
        let Some(edge) = world.edge(edge_ref) else {
            continue;
        };
        if edge.is_synthetic() {
            continue;
        }
        let midpoint = edge.center();
        let Some(target) = pick_sub_poly(world, poly_ref, midpoint.truncate()) else {
            continue;
        };

        if let Some(edge) = world.edge_mut(edge_ref) {
            edge.reanchor(poly_ref, target);
        }
        if let Some(parent) = world.poly_mut(poly_ref) {
            parent.remove_edge_ref(edge_ref);
        }
        if let Some(sub) = world.poly_mut(target) {
            sub.add_edge_ref(edge_ref);
        }
    }
}

/// Marks every sub-mesh poly with a dummy edge back to its parent so
/// consumers walking the edge graph can recover the carved parent. The
/// markers are never traversable and die with the sub-mesh.
fn attach_back_refs(world: &mut NavWorld, poly_ref: PolyRef, sub_items: &[u32]) {
    for &item in sub_items {
        let sub_ref = PolyRef::new(poly_ref.pylon(), item);
        let Some(center) = world.poly(sub_ref).map(|p| p.center()) else {
            continue;
        };
        if let Some(edge) =
            world.add_edge(EdgeKind::Dummy, [sub_ref, poly_ref], [center, center], 0.)
        {
            if let Some(edge) = world.edge_mut(edge) {
                edge.set_synthetic();
            }
        }
    }
}

/// Fixes up edges of a freshly carved poly whose far side also has a
/// sub-mesh: the far anchor is moved from the neighbor's parent poly onto
/// the neighbor's sub-mesh poly containing the edge midpoint. This keeps
/// sub-meshes of adjacent pylons mutually traversable.
pub(crate) fn create_edges_to_adjacent_pylon_submeshes(world: &mut NavWorld, poly_ref: PolyRef) {
    let Some(poly) = world.poly(poly_ref) else {
        return;
    };
    let mut sources = vec![poly_ref];
    sources.extend(
        poly.sub_polys()
            .iter()
            .map(|&item| PolyRef::new(poly_ref.pylon(), item)),
    );

    for source in sources {
        for edge_ref in world.incident_edges(source) {
            let Some(edge) = world.edge(edge_ref) else {
                continue;
            };
            if edge.is_synthetic() {
                continue;
            }
            let other = edge.other_poly(source);
            let midpoint = edge.center();
            let carved = world.poly(other).is_some_and(|p| p.has_sub_mesh());
            if !carved {
                continue;
            }
            let Some(target) = pick_sub_poly(world, other, midpoint.truncate()) else {
                continue;
            };

            if let Some(edge) = world.edge_mut(edge_ref) {
                edge.reanchor(other, target);
            }
            if let Some(parent) = world.poly_mut(other) {
                parent.remove_edge_ref(edge_ref);
            }
            if let Some(sub) = world.poly_mut(target) {
                sub.add_edge_ref(edge_ref);
            }
        }
    }
}

/// Fixes up edges of a just-cleared poly which still point at killed
/// sub-mesh polys of a neighbor: the dead anchor is moved to the neighbor's
/// parent (or the parent's current sub-mesh poly under the midpoint).
pub(crate) fn build_submesh_edges_for_just_cleared_poly(world: &mut NavWorld, poly_ref: PolyRef) {
    for edge_ref in world.incident_edges(poly_ref) {
        let Some(edge) = world.edge(edge_ref) else {
            continue;
        };
        let other = edge.other_poly(poly_ref);
        if world.poly(other).is_some() {
            continue;
        }

        let midpoint = edge.center();
        let parent = world
            .pylon(other.pylon())
            .and_then(|p| p.mesh().poly_even_dead(other.index()))
            .and_then(|p| p.parent())
            .map(|item| PolyRef::new(other.pylon(), item));
        let Some(parent) = parent else {
            let events = world.destroy_edge(edge_ref, false);
            debug_assert!(events.is_empty(), "carving must run under a hold");
            continue;
        };

        let target = pick_sub_poly(world, parent, midpoint.truncate()).unwrap_or(parent);
        if let Some(edge) = world.edge_mut(edge_ref) {
            edge.reanchor(other, target);
        }
        if let Some(poly) = world.poly_mut(target) {
            if !poly.edges().contains(&edge_ref) {
                poly.add_edge_ref(edge_ref);
            }
        }
    }
}

/// Resolves the anchor target within a carved poly: the sub-mesh poly whose
/// interior contains `point`, else the one with the nearest center; the
/// parent itself when it has no sub-mesh.
fn pick_sub_poly(world: &NavWorld, parent: PolyRef, point: Vec2) -> Option<PolyRef> {
    let poly = world.poly(parent)?;
    if !poly.has_sub_mesh() {
        return Some(parent);
    }

    let mut nearest: Option<PolyRef> = None;
    let mut nearest_distance = f32::INFINITY;
    for &item in poly.sub_polys() {
        let sub_ref = PolyRef::new(parent.pylon(), item);
        let Some(sub) = world.poly(sub_ref) else {
            continue;
        };
        if sub.contains_xy(point) {
            return Some(sub_ref);
        }
        let distance = sub.center().truncate().distance_squared(point);
        if distance < nearest_distance {
            nearest_distance = distance;
            nearest = Some(sub_ref);
        }
    }
    nearest
}

fn triangulate(ring: &[Vec2], holes: &[Vec<Vec2>]) -> Result<Vec<[Vec2; 3]>, InsertionError> {
    let mut triangulation = ConstrainedDelaunayTriangulation::<Point2<f32>>::new();

    for hole in std::iter::once(ring).chain(holes.iter().map(|h| h.as_slice())) {
        for i in 0..hole.len() {
            let a = hole[i];
            let b = hole[(i + 1) % hole.len()];
            triangulation.add_constraint_edge(Point2::new(a.x, a.y), Point2::new(b.x, b.y))?;
        }
    }

    Ok(triangulation
        .inner_faces()
        .map(|face| {
            face.vertices().map(|v| {
                let v = v.as_ref();
                Vec2::new(v.x, v.y)
            })
        })
        .collect())
}

/// Clips a convex subject ring against a convex counter-clockwise clip ring
/// (Sutherland-Hodgman). Returns an empty ring when the intersection is
/// degenerate.
pub(crate) fn clip_convex(subject: &[Vec2], clip: &[Vec2]) -> Vec<Vec2> {
    let mut output = subject.to_vec();
    for i in 0..clip.len() {
        let a = clip[i];
        let b = clip[(i + 1) % clip.len()];
        let dir = b - a;

        let input = std::mem::take(&mut output);
        for j in 0..input.len() {
            let current = input[j];
            let next = input[(j + 1) % input.len()];
            let current_inside = dir.perp_dot(current - a) >= 0.;
            let next_inside = dir.perp_dot(next - a) >= 0.;

            if current_inside {
                output.push(current);
            }
            if current_inside != next_inside {
                if let Some(point) = line_intersection(a, b, current, next) {
                    output.push(point);
                }
            }
        }
        if output.len() < 3 {
            return Vec::new();
        }
    }
    output
}

fn line_intersection(a: Vec2, b: Vec2, c: Vec2, d: Vec2) -> Option<Vec2> {
    let r = b - a;
    let s = d - c;
    let denominator = r.perp_dot(s);
    if denominator.abs() <= f32::EPSILON {
        return None;
    }
    let t = (c - a).perp_dot(s) / denominator;
    Some(a + r * t)
}

/// Merges mutually intersecting rings into their convex hulls until all
/// remaining rings are pairwise disjoint.
fn merge_intersecting(mut rings: Vec<Vec<Vec2>>) -> Vec<Vec<Vec2>> {
    loop {
        let mut merged = None;
        'outer: for i in 0..rings.len() {
            for j in (i + 1)..rings.len() {
                if ring_area(&clip_convex(&rings[i], &rings[j])) > AREA_EPSILON {
                    merged = Some((i, j));
                    break 'outer;
                }
            }
        }

        let Some((i, j)) = merged else {
            return rings;
        };
        let second = rings.swap_remove(j);
        let first = rings.swap_remove(i);
        let points: Vec<Point<f32>> = first
            .iter()
            .chain(second.iter())
            .map(|p| Point::new(p.x, p.y))
            .collect();
        let hull: Vec<Vec2> = parry2d::transformation::convex_hull(&points)
            .into_iter()
            .map(|p| Vec2::new(p.x, p.y))
            .collect();
        rings.push(hull);
    }
}

fn shrink(ring: &[Vec2], factor: f32) -> Vec<Vec2> {
    let centroid = ring.iter().sum::<Vec2>() / ring.len() as f32;
    ring.iter()
        .map(|&p| centroid + (p - centroid) * factor)
        .collect()
}

pub(crate) fn ring_area(ring: &[Vec2]) -> f32 {
    let mut doubled = 0.;
    for i in 0..ring.len() {
        doubled += ring[i].perp_dot(ring[(i + 1) % ring.len()]);
    }
    doubled.abs() / 2.
}

fn contains_convex(ring: &[Vec2], point: Vec2) -> bool {
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        if (b - a).perp_dot(point - a) < -AREA_EPSILON {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use nav_types::params::PathParams;
    use ntest::timeout;
    use parry3d::{bounding_volume::Aabb, math::Point as Point3};

    use super::*;
    use crate::{
        obstacle::ObstacleShape,
        pylon::PylonFlags,
        query::poly_at,
    };

    #[test]
    fn test_clip() {
        let subject = vec![
            Vec2::new(-5., -5.),
            Vec2::new(5., -5.),
            Vec2::new(5., 5.),
            Vec2::new(-5., 5.),
        ];
        let clip = vec![
            Vec2::new(0., 0.),
            Vec2::new(10., 0.),
            Vec2::new(10., 10.),
            Vec2::new(0., 10.),
        ];
        let clipped = clip_convex(&subject, &clip);
        assert_abs_diff_eq!(ring_area(&clipped), 25.);

        let far = vec![
            Vec2::new(100., 100.),
            Vec2::new(110., 100.),
            Vec2::new(110., 110.),
        ];
        assert!(clip_convex(&far, &clip).is_empty());
    }

    #[test]
    fn test_merge() {
        let a = vec![
            Vec2::new(0., 0.),
            Vec2::new(10., 0.),
            Vec2::new(10., 10.),
            Vec2::new(0., 10.),
        ];
        let b = vec![
            Vec2::new(5., 5.),
            Vec2::new(15., 5.),
            Vec2::new(15., 15.),
            Vec2::new(5., 15.),
        ];
        let c = vec![
            Vec2::new(100., 0.),
            Vec2::new(110., 0.),
            Vec2::new(110., 10.),
        ];

        let merged = merge_intersecting(vec![a, b, c]);
        assert_eq!(merged.len(), 2);
    }

    fn corridor_world() -> (NavWorld, PolyRef, PolyRef, nav_types::ids::EdgeRef) {
        let mut world = NavWorld::new(Aabb::new(
            Point3::new(-10_000., -10_000., -1_000.),
            Point3::new(10_000., 10_000., 1_000.),
        ));
        let pylon = world.add_pylon(
            Aabb::new(Point3::new(0., 0., -10.), Point3::new(2000., 1000., 100.)),
            PylonFlags::default(),
        );
        let mesh = world.pylon_mut(pylon).unwrap().mesh_mut();
        let a = mesh.add_poly(
            vec![
                Vec3::new(0., 0., 0.),
                Vec3::new(1000., 0., 0.),
                Vec3::new(1000., 1000., 0.),
                Vec3::new(0., 1000., 0.),
            ],
            200.,
        );
        let b = mesh.add_poly(
            vec![
                Vec3::new(1000., 0., 0.),
                Vec3::new(2000., 0., 0.),
                Vec3::new(2000., 1000., 0.),
                Vec3::new(1000., 1000., 0.),
            ],
            200.,
        );
        let a = PolyRef::new(pylon, a);
        let b = PolyRef::new(pylon, b);
        let edge = world
            .add_edge(
                EdgeKind::Normal,
                [a, b],
                [Vec3::new(1000., 0., 0.), Vec3::new(1000., 1000., 0.)],
                1000.,
            )
            .unwrap();
        world.post_load_fixup(pylon);
        (world, a, b, edge)
    }

    #[test]
    #[timeout(1000)]
    fn test_carve_and_restore() {
        let (mut world, a, _, edge) = corridor_world();

        // Wall across the poly leaving a 60 unit gap at the high-Y side.
        let shape = ObstacleShape::single(
            vec![
                Vec2::new(498., 0.),
                Vec2::new(502., 0.),
                Vec2::new(502., 940.),
                Vec2::new(498., 940.),
            ],
            0.,
            100.,
        )
        .unwrap();
        let (obstacle, _) = world.register_obstacle(shape);

        let poly = world.poly(a).unwrap();
        assert!(poly.has_sub_mesh());
        assert!(poly.sub_polys().len() >= 3);
        assert_eq!(poly.num_obstacles_affecting(), 1);
        assert!(world.verify_path_obstacles().is_empty());

        // Sub-mesh polys are convex, planar and no larger than the parent.
        let mut sub_area = 0.;
        for &item in world.poly(a).unwrap().sub_polys() {
            let sub = world.poly(PolyRef::new(a.pylon(), item)).unwrap();
            assert!(sub.parent() == Some(a.index()));
            sub_area += sub.area_xy();
        }
        assert!(sub_area < 1_000_000.);

        // The gap stays walkable, the wall interior does not.
        let params = PathParams::default();
        assert!(poly_at(&world, Vec3::new(500., 970., 0.), &params).is_some());
        assert!(poly_at(&world, Vec3::new(500., 500., 0.), &params).is_none());

        // The corridor edge was re-anchored onto a sub-mesh poly; the parent
        // keeps only dummy back-ref markers from its sub-mesh polys.
        let anchored = world.edge(edge).unwrap().poly0();
        assert_ne!(anchored, a);
        assert_eq!(anchored.pylon(), a.pylon());
        let markers = world.incident_edges(a);
        assert_eq!(markers.len(), world.poly(a).unwrap().sub_polys().len());
        for marker in markers {
            let edge = world.edge(marker).unwrap();
            assert_eq!(edge.kind(), EdgeKind::Dummy);
            assert_eq!(edge.poly1(), a);
            assert!(edge.poly0() != a && edge.poly0().pylon() == a.pylon());
            assert!(!world.edge_supports(marker, &params, edge.poly0()));
        }

        // Unregistering restores the original wiring.
        world.unregister_obstacle(obstacle);
        assert!(!world.is_obstacle_active(obstacle));
        let poly = world.poly(a).unwrap();
        assert!(!poly.has_sub_mesh());
        assert_eq!(poly.num_obstacles_affecting(), 0);
        assert_eq!(world.edge(edge).unwrap().poly0(), a);
        assert_eq!(world.incident_edges(a), vec![edge]);
        assert!(world.verify_path_obstacles().is_empty());
        assert!(poly_at(&world, Vec3::new(500., 500., 0.), &params).is_some());
    }

    #[test]
    #[timeout(1000)]
    fn test_fully_blocked() {
        let (mut world, a, _, _) = corridor_world();
        let shape = ObstacleShape::single(
            vec![
                Vec2::new(-100., -100.),
                Vec2::new(1100., -100.),
                Vec2::new(1100., 1100.),
                Vec2::new(-100., 1100.),
            ],
            0.,
            100.,
        )
        .unwrap();
        let (obstacle, _) = world.register_obstacle(shape);

        let poly = world.poly(a).unwrap();
        assert!(poly.is_fully_blocked());
        assert!(poly.sub_polys().is_empty());
        assert!(world.verify_path_obstacles().is_empty());

        world.unregister_obstacle(obstacle);
        assert!(!world.poly(a).unwrap().is_fully_blocked());
    }

    #[test]
    fn test_triangulate_with_hole() {
        let ring = vec![
            Vec2::new(0., 0.),
            Vec2::new(100., 0.),
            Vec2::new(100., 100.),
            Vec2::new(0., 100.),
        ];
        let hole = vec![
            Vec2::new(40., 40.),
            Vec2::new(60., 40.),
            Vec2::new(60., 60.),
            Vec2::new(40., 60.),
        ];
        let triangles = triangulate(&ring, &[hole.clone()]).unwrap();

        let mut kept_area = 0.;
        for triangle in &triangles {
            let centroid = (triangle[0] + triangle[1] + triangle[2]) / 3.;
            if contains_convex(&hole, centroid) {
                continue;
            }
            kept_area += ring_area(triangle);
        }
        assert_abs_diff_eq!(kept_area, 10_000. - 400., epsilon = 1.);
    }
}
