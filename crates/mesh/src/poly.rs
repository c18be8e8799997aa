//! Convex walkable polygons.

use ahash::AHashSet;
use glam::{Vec2, Vec3};
use nav_types::ids::{EdgeRef, ObstacleId};

/// Tolerance below the poly plane at which a point still counts as on the
/// poly.
const VERTICAL_SLACK: f32 = 2.;

/// A convex, planar walkable surface patch.
///
/// Polys never move within their mesh arena; the item index is stable for
/// the pylon's lifetime. Sub-mesh polys produced by obstacle carving live in
/// the same arena as top-level polys and link back to their parent.
pub struct Poly {
    verts: Vec<Vec3>,
    normal: Vec3,
    center: Vec3,
    height: f32,
    item: u32,
    edges: Vec<EdgeRef>,
    parent: Option<u32>,
    sub_polys: Vec<u32>,
    obstacles: AHashSet<ObstacleId>,
    fully_blocked: bool,
    cover_refs: Vec<u32>,
    alive: bool,
}

impl Poly {
    /// Creates a new poly from a counter-clockwise (viewed from above)
    /// vertex ring.
    ///
    /// # Panics
    ///
    /// May panic if the ring has fewer than 3 vertices.
    pub(crate) fn new(verts: Vec<Vec3>, height: f32, item: u32, parent: Option<u32>) -> Self {
        assert!(verts.len() >= 3);

        let mut normal = Vec3::ZERO;
        for i in 0..verts.len() {
            let a = verts[i];
            let b = verts[(i + 1) % verts.len()];
            normal += (a - b).cross(a + b);
        }
        let mut normal = normal.normalize();
        if normal.z < 0. {
            normal = -normal;
        }

        let center = verts.iter().sum::<Vec3>() / verts.len() as f32;

        Self {
            verts,
            normal,
            center,
            height,
            item,
            edges: Vec::new(),
            parent,
            sub_polys: Vec::new(),
            obstacles: AHashSet::new(),
            fully_blocked: false,
            cover_refs: Vec::new(),
            alive: true,
        }
    }

    pub fn verts(&self) -> &[Vec3] {
        self.verts.as_slice()
    }

    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// Returns the walkable span above the poly surface.
    pub fn height(&self) -> f32 {
        self.height
    }

    /// Returns the item index of the poly, stable within its mesh.
    pub fn item(&self) -> u32 {
        self.item
    }

    /// Returns references to all edges incident to this poly, including
    /// edges owned by other pylons.
    pub fn edges(&self) -> &[EdgeRef] {
        self.edges.as_slice()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Returns the parent poly item index if this poly belongs to a
    /// sub-mesh.
    pub fn parent(&self) -> Option<u32> {
        self.parent
    }

    /// Returns item indices of the sub-mesh polys carved out of this poly.
    pub fn sub_polys(&self) -> &[u32] {
        self.sub_polys.as_slice()
    }

    /// Returns true when this poly currently has a sub-mesh and must not be
    /// traversed directly.
    pub fn has_sub_mesh(&self) -> bool {
        !self.sub_polys.is_empty()
    }

    /// Returns true when carving left no walkable residue. The poly is kept
    /// with an empty sub-mesh; the search simply finds no outgoing edges.
    pub fn is_fully_blocked(&self) -> bool {
        self.fully_blocked
    }

    pub fn num_obstacles_affecting(&self) -> usize {
        self.obstacles.len()
    }

    pub fn obstacles(&self) -> &AHashSet<ObstacleId> {
        &self.obstacles
    }

    pub fn cover_refs(&self) -> &[u32] {
        self.cover_refs.as_slice()
    }

    pub fn set_cover_refs(&mut self, refs: Vec<u32>) {
        self.cover_refs = refs;
    }

    /// Returns true when this poly and `other` share at least one cover
    /// reference.
    pub fn shares_cover_ref(&self, other: &Poly) -> bool {
        self.cover_refs.iter().any(|r| other.cover_refs.contains(r))
    }

    /// Returns the plane height at the given horizontal position.
    pub fn plane_z_at(&self, position: Vec2) -> f32 {
        // n . p = n . center, solved for p.z.
        let d = self.normal.dot(self.center);
        (d - self.normal.x * position.x - self.normal.y * position.y) / self.normal.z
    }

    /// Returns true if the horizontal projection of the poly contains
    /// `position`.
    pub fn contains_xy(&self, position: Vec2) -> bool {
        for i in 0..self.verts.len() {
            let a = self.verts[i].truncate();
            let b = self.verts[(i + 1) % self.verts.len()].truncate();
            if (b - a).perp_dot(position - a) < -1e-3 {
                return false;
            }
        }
        true
    }

    /// Returns true if `point` lies on the poly: inside the ring
    /// horizontally and within `[-slack, hover]` of the surface vertically.
    pub fn contains(&self, point: Vec3, hover: f32) -> bool {
        if !self.contains_xy(point.truncate()) {
            return false;
        }
        let dz = point.z - self.plane_z_at(point.truncate());
        (-VERTICAL_SLACK..=hover.max(VERTICAL_SLACK)).contains(&dz)
    }

    /// Returns the closest point of the poly's horizontal projection to
    /// `position`.
    pub fn closest_point_xy(&self, position: Vec2) -> Vec2 {
        if self.contains_xy(position) {
            return position;
        }

        let mut best = self.center.truncate();
        let mut best_distance = f32::INFINITY;
        for i in 0..self.verts.len() {
            let a = self.verts[i].truncate();
            let b = self.verts[(i + 1) % self.verts.len()].truncate();
            let candidate = closest_on_segment(a, b, position);
            let distance = candidate.distance_squared(position);
            if distance < best_distance {
                best_distance = distance;
                best = candidate;
            }
        }
        best
    }

    /// Returns true if a circle of `radius` around the poly center fits
    /// inside the poly.
    pub fn encompasses_circle(&self, radius: f32) -> bool {
        let center = self.center.truncate();
        for i in 0..self.verts.len() {
            let a = self.verts[i].truncate();
            let b = self.verts[(i + 1) % self.verts.len()].truncate();
            if closest_on_segment(a, b, center).distance(center) < radius {
                return false;
            }
        }
        true
    }

    /// Returns the area of the poly's horizontal projection.
    pub fn area_xy(&self) -> f32 {
        let mut doubled = 0.;
        for i in 0..self.verts.len() {
            let a = self.verts[i].truncate();
            let b = self.verts[(i + 1) % self.verts.len()].truncate();
            doubled += a.perp_dot(b);
        }
        doubled.abs() / 2.
    }

    pub(crate) fn add_edge_ref(&mut self, edge: EdgeRef) {
        debug_assert!(!self.edges.contains(&edge));
        self.edges.push(edge);
    }

    pub(crate) fn remove_edge_ref(&mut self, edge: EdgeRef) {
        if let Some(position) = self.edges.iter().position(|&e| e == edge) {
            self.edges.swap_remove(position);
        }
    }

    pub(crate) fn add_obstacle(&mut self, obstacle: ObstacleId) -> bool {
        self.obstacles.insert(obstacle)
    }

    pub(crate) fn remove_obstacle(&mut self, obstacle: ObstacleId) -> bool {
        self.obstacles.remove(&obstacle)
    }

    pub(crate) fn set_sub_polys(&mut self, sub_polys: Vec<u32>, fully_blocked: bool) {
        self.sub_polys = sub_polys;
        self.fully_blocked = fully_blocked;
    }

    pub(crate) fn kill(&mut self) {
        self.alive = false;
        self.edges.clear();
    }
}

fn closest_on_segment(a: Vec2, b: Vec2, point: Vec2) -> Vec2 {
    let ab = b - a;
    let length_squared = ab.length_squared();
    if length_squared <= f32::EPSILON {
        return a;
    }
    let t = ((point - a).dot(ab) / length_squared).clamp(0., 1.);
    a + ab * t
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn square() -> Poly {
        Poly::new(
            vec![
                Vec3::new(0., 0., 0.),
                Vec3::new(10., 0., 0.),
                Vec3::new(10., 10., 0.),
                Vec3::new(0., 10., 0.),
            ],
            100.,
            0,
            None,
        )
    }

    #[test]
    fn test_plane() {
        let poly = square();
        assert_abs_diff_eq!(poly.normal().z, 1.);
        assert_abs_diff_eq!(poly.plane_z_at(Vec2::new(3., 7.)), 0.);

        let sloped = Poly::new(
            vec![
                Vec3::new(0., 0., 0.),
                Vec3::new(10., 0., 10.),
                Vec3::new(10., 10., 10.),
                Vec3::new(0., 10., 0.),
            ],
            100.,
            0,
            None,
        );
        assert_abs_diff_eq!(sloped.plane_z_at(Vec2::new(5., 5.)), 5., epsilon = 1e-4);
    }

    #[test]
    fn test_contains() {
        let poly = square();
        assert!(poly.contains_xy(Vec2::new(5., 5.)));
        assert!(poly.contains_xy(Vec2::new(0., 0.)));
        assert!(!poly.contains_xy(Vec2::new(-1., 5.)));

        assert!(poly.contains(Vec3::new(5., 5., 0.), 50.));
        assert!(poly.contains(Vec3::new(5., 5., 40.), 50.));
        assert!(!poly.contains(Vec3::new(5., 5., 60.), 50.));
        assert!(!poly.contains(Vec3::new(5., 5., -10.), 50.));
    }

    #[test]
    fn test_closest_point() {
        let poly = square();
        assert_eq!(poly.closest_point_xy(Vec2::new(4., 6.)), Vec2::new(4., 6.));
        assert_eq!(
            poly.closest_point_xy(Vec2::new(15., 5.)),
            Vec2::new(10., 5.)
        );
        assert_eq!(
            poly.closest_point_xy(Vec2::new(-3., 12.)),
            Vec2::new(0., 10.)
        );
    }

    #[test]
    fn test_encompasses_circle() {
        let poly = square();
        assert!(poly.encompasses_circle(4.));
        assert!(!poly.encompasses_circle(6.));
    }

    #[test]
    fn test_area() {
        assert_abs_diff_eq!(square().area_xy(), 100.);
    }
}
