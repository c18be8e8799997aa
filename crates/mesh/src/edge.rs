//! Typed edges between walkable polys, including their transient search
//! state.

use glam::{Vec2, Vec3};
use nav_types::ids::{EdgeRef, PathObjectId, PolyRef};

/// Kind of a traversable (or marker) link between two polys.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum EdgeKind {
    Normal,
    /// Edge whose polys live in different pylons. Stays registered but inert
    /// while the other pylon is unloaded.
    CrossPylon,
    /// Traversable only from poly 0 to poly 1.
    OneWay,
    /// Authored back-reference marker; never expanded.
    BackRef,
    /// Edge driven by a scripted path object.
    PathObject(PathObjectId),
    /// One-way drop of the given height.
    Drop(f32),
    /// Climbable ledge of the given height.
    Mantle(f32),
    /// Back-ref marker placed on sub-mesh boundaries; never expanded.
    Dummy,
}

/// Discriminant of [`EdgeKind`], used where a payload-free tag is needed
/// (constraints keyed by edge type).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum EdgeKindTag {
    Normal,
    CrossPylon,
    OneWay,
    BackRef,
    PathObject,
    Drop,
    Mantle,
    Dummy,
}

impl EdgeKind {
    pub fn tag(&self) -> EdgeKindTag {
        match self {
            EdgeKind::Normal => EdgeKindTag::Normal,
            EdgeKind::CrossPylon => EdgeKindTag::CrossPylon,
            EdgeKind::OneWay => EdgeKindTag::OneWay,
            EdgeKind::BackRef => EdgeKindTag::BackRef,
            EdgeKind::PathObject(_) => EdgeKindTag::PathObject,
            EdgeKind::Drop(_) => EdgeKindTag::Drop,
            EdgeKind::Mantle(_) => EdgeKindTag::Mantle,
            EdgeKind::Dummy => EdgeKindTag::Dummy,
        }
    }
}

/// Transient A* bookkeeping of an edge. Valid only for the session recorded
/// on the edge; any other session reads defaults instead (the cheap-clear
/// trick which avoids walking all touched edges after a search).
#[derive(Clone, Copy, Debug)]
pub struct SearchState {
    /// Accumulated path weight from the search start (g).
    pub visited_weight: u32,
    /// Estimated overall path weight (f = g + h).
    pub estimated_weight: u32,
    /// Edge through which this edge was reached.
    pub prev_edge: Option<EdgeRef>,
    /// Position on the predecessor used for cost evaluation.
    pub prev_pos: Vec3,
    /// Selects which poly is the destination for this search.
    pub dest_is_poly1: bool,
    /// Closed-list membership.
    pub visited: bool,
    /// Set on edges which lost the longest-in-group selection.
    pub not_longest_in_group: bool,
    /// Open-list membership and intrusive ordering links.
    pub on_open: bool,
    pub next_open: Option<EdgeRef>,
    pub prev_open: Option<EdgeRef>,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            visited_weight: 0,
            estimated_weight: 0,
            prev_edge: None,
            prev_pos: Vec3::ZERO,
            dest_is_poly1: true,
            visited: false,
            not_longest_in_group: false,
            on_open: false,
            next_open: None,
            prev_open: None,
        }
    }
}

/// A link between two polys with an effective width.
pub struct Edge {
    kind: EdgeKind,
    polys: [PolyRef; 2],
    verts: [Vec3; 2],
    width: f32,
    group: u16,
    /// Set on edges created by obstacle carving; they are destroyed when the
    /// sub-mesh is cleared.
    synthetic: bool,
    dynamic_id: Option<u64>,
    pending_delete: bool,
    session: u32,
    search: SearchState,
}

impl Edge {
    pub(crate) fn new(
        kind: EdgeKind,
        polys: [PolyRef; 2],
        verts: [Vec3; 2],
        width: f32,
        group: u16,
    ) -> Self {
        Self {
            kind,
            polys,
            verts,
            width,
            group,
            synthetic: false,
            dynamic_id: None,
            pending_delete: false,
            session: 0,
            search: SearchState::default(),
        }
    }

    pub fn kind(&self) -> EdgeKind {
        self.kind
    }

    pub fn poly0(&self) -> PolyRef {
        self.polys[0]
    }

    pub fn poly1(&self) -> PolyRef {
        self.polys[1]
    }

    /// Returns the poly on the other side of the edge from `poly`.
    ///
    /// # Panics
    ///
    /// Panics if `poly` is neither of the edge's polys.
    pub fn other_poly(&self, poly: PolyRef) -> PolyRef {
        if self.polys[0] == poly {
            self.polys[1]
        } else {
            assert!(self.polys[1] == poly, "poly is not incident to the edge");
            self.polys[0]
        }
    }

    /// Returns the destination poly selected by the current search.
    pub fn path_destination_poly(&self, session: u32) -> PolyRef {
        if self.search(session).dest_is_poly1 {
            self.polys[1]
        } else {
            self.polys[0]
        }
    }

    pub fn vert_location(&self, index: usize) -> Vec3 {
        self.verts[index]
    }

    pub fn center(&self) -> Vec3 {
        (self.verts[0] + self.verts[1]) / 2.
    }

    /// Returns the effective width an agent must fit through.
    pub fn width(&self) -> f32 {
        self.width
    }

    /// Returns the geometric length of the edge segment.
    pub fn length(&self) -> f32 {
        self.verts[0].distance(self.verts[1])
    }

    /// Returns the horizontal direction perpendicular to the edge.
    pub fn perp_dir(&self) -> Vec2 {
        let dir = (self.verts[1] - self.verts[0]).truncate();
        Vec2::new(-dir.y, dir.x).normalize_or_zero()
    }

    pub fn is_one_way(&self) -> bool {
        matches!(self.kind, EdgeKind::OneWay | EdgeKind::Drop(_))
    }

    pub fn in_same_group_as(&self, other: &Edge) -> bool {
        self.group == other.group && self.polys[0].pylon() == other.polys[0].pylon()
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    pub(crate) fn set_synthetic(&mut self) {
        self.synthetic = true;
    }

    pub fn dynamic_id(&self) -> Option<u64> {
        self.dynamic_id
    }

    pub(crate) fn set_dynamic_id(&mut self, id: u64) {
        self.dynamic_id = Some(id);
    }

    pub fn is_pending_delete(&self) -> bool {
        self.pending_delete
    }

    pub(crate) fn set_pending_delete(&mut self) {
        self.pending_delete = true;
    }

    pub(crate) fn clear_pending_delete(&mut self) {
        self.pending_delete = false;
    }

    /// Returns the point of the edge segment closest to `toward`, clamped
    /// away from the endpoints by the agent radius (or half the edge length
    /// on short edges) so the move target clears the corner.
    pub fn closest_point_constrained(&self, toward: Vec3, radius: f32) -> Vec3 {
        let ab = self.verts[1] - self.verts[0];
        let length_squared = ab.length_squared();
        if length_squared <= f32::EPSILON {
            return self.verts[0];
        }

        let length = length_squared.sqrt();
        let margin = radius.min(length / 2.) / length;
        let t = ((toward - self.verts[0]).dot(ab) / length_squared)
            .clamp(margin, 1. - margin);
        self.verts[0] + ab * t
    }

    /// Re-anchors the side of the edge currently referencing `from` to `to`.
    /// Used when obstacle carving moves an edge endpoint onto a sub-mesh
    /// poly and back.
    pub(crate) fn reanchor(&mut self, from: PolyRef, to: PolyRef) {
        if self.polys[0] == from {
            self.polys[0] = to;
        } else {
            debug_assert!(self.polys[1] == from);
            self.polys[1] = to;
        }
    }

    /// Returns the search state of the edge for `session`. Stale state from
    /// earlier sessions reads as the default.
    pub fn search(&self, session: u32) -> SearchState {
        if self.session == session {
            self.search
        } else {
            SearchState::default()
        }
    }

    /// Returns mutable search state for `session`, lazily resetting state
    /// left over from earlier sessions.
    pub fn search_mut(&mut self, session: u32) -> &mut SearchState {
        if self.session != session {
            self.session = session;
            self.search = SearchState::default();
        }
        &mut self.search
    }

    /// Returns a one-line description of the edge for diagnostics.
    pub fn debug_text(&self) -> String {
        format!(
            "{:?} {} <-> {} width {:.1} group {}{}",
            self.kind.tag(),
            self.polys[0],
            self.polys[1],
            self.width,
            self.group,
            if self.pending_delete {
                " (pending delete)"
            } else {
                ""
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use nav_types::ids::PylonId;

    use super::*;

    fn edge() -> Edge {
        let pylon = PylonId::new(0);
        Edge::new(
            EdgeKind::Normal,
            [PolyRef::new(pylon, 0), PolyRef::new(pylon, 1)],
            [Vec3::new(0., 0., 0.), Vec3::new(10., 0., 0.)],
            10.,
            1,
        )
    }

    #[test]
    fn test_geometry() {
        let edge = edge();
        assert_eq!(edge.center(), Vec3::new(5., 0., 0.));
        assert_eq!(edge.length(), 10.);
        assert_eq!(edge.perp_dir(), Vec2::new(0., 1.));
    }

    #[test]
    fn test_other_poly() {
        let edge = edge();
        assert_eq!(edge.other_poly(edge.poly0()), edge.poly1());
        assert_eq!(edge.other_poly(edge.poly1()), edge.poly0());
    }

    #[test]
    fn test_session_clearing() {
        let mut edge = edge();
        let state = edge.search_mut(4);
        state.visited = true;
        state.visited_weight = 120;

        assert!(edge.search(4).visited);
        assert_eq!(edge.search(4).visited_weight, 120);

        // A different session reads pristine state without any reset pass.
        assert!(!edge.search(5).visited);
        assert_eq!(edge.search(5).visited_weight, 0);

        edge.search_mut(5).visited_weight = 7;
        assert_eq!(edge.search(5).visited_weight, 7);
        assert!(!edge.search(5).visited);
    }
}
