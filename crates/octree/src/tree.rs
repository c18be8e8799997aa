//! Arena backed loose octree.

use glam::Vec3;
use parry3d::bounding_volume::Aabb;

use crate::octant::Octant;

/// Fraction of a parent node extent added to each child extent. See the
/// crate level documentation.
const LOOSENESS_DENOMINATOR: f32 = 16.;
const MAX_DEPTH: u8 = 8;

/// Stable token of an inserted element. The token stays valid until the
/// element is removed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ElementToken(u32);

/// A loose octree over element AABBs.
///
/// The tree does not own the indexed objects, it only stores their ids.
/// Every element lives in exactly one node: the deepest node whose loose
/// bounds fully contain the element's AABB.
pub struct LooseOctree<T>
where
    T: Copy,
{
    nodes: Vec<Node>,
    slots: Vec<Option<Slot<T>>>,
    free: Vec<u32>,
    len: usize,
}

struct Node {
    center: Vec3,
    half: Vec3,
    loose: Vec3,
    depth: u8,
    children: [Option<u32>; Octant::COUNT],
    elements: Vec<u32>,
}

struct Slot<T> {
    id: T,
    center: Vec3,
    half: Vec3,
    node: u32,
}

impl<T> LooseOctree<T>
where
    T: Copy,
{
    /// Creates a new empty octree spanning `bounds`. Elements outside the
    /// bounds are accepted and stored at the root.
    pub fn new(bounds: Aabb) -> Self {
        let center = center(&bounds);
        let half = half_extents(&bounds);
        Self {
            nodes: vec![Node::new(center, half, half, 0)],
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts an element and returns its token.
    pub fn insert(&mut self, id: T, aabb: &Aabb) -> ElementToken {
        let center = center(aabb);
        let half = half_extents(aabb);

        let node = self.locate(center, half);
        let slot = Slot {
            id,
            center,
            half,
            node,
        };

        let index = match self.free.pop() {
            Some(index) => {
                debug_assert!(self.slots[index as usize].is_none());
                self.slots[index as usize] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                (self.slots.len() - 1) as u32
            }
        };

        self.nodes[node as usize].elements.push(index);
        self.len += 1;
        ElementToken(index)
    }

    /// Removes an element and returns its id.
    ///
    /// # Panics
    ///
    /// Panics if the token does not correspond to a present element.
    pub fn remove(&mut self, token: ElementToken) -> T {
        let slot = self.slots[token.0 as usize]
            .take()
            .expect("removal of an element which is not present");

        let elements = &mut self.nodes[slot.node as usize].elements;
        let position = elements
            .iter()
            .position(|&e| e == token.0)
            .expect("element not registered in its node");
        elements.swap_remove(position);

        self.free.push(token.0);
        self.len -= 1;
        slot.id
    }

    /// Moves an element to a new AABB. The token stays valid.
    pub fn update(&mut self, token: ElementToken, aabb: &Aabb) {
        let id = self.remove(token);
        let new_token = self.insert(id, aabb);
        // Freshly freed slots are reused LIFO, thus the token is stable.
        debug_assert!(new_token == token);
    }

    /// Calls `visitor` with the id of every element whose AABB contains
    /// `point`.
    pub fn for_each_at_point(&self, point: Vec3, mut visitor: impl FnMut(T)) {
        self.visit(0, point, Vec3::ZERO, &mut visitor);
    }

    /// Calls `visitor` with the id of every element whose AABB intersects
    /// `aabb`.
    pub fn for_each_in_aabb(&self, aabb: &Aabb, mut visitor: impl FnMut(T)) {
        self.visit(0, center(aabb), half_extents(aabb), &mut visitor);
    }

    /// Calls `visitor` with the id of every element whose AABB intersects the
    /// volume swept by `aabb` translated along `motion`.
    pub fn for_each_in_swept(&self, aabb: &Aabb, motion: Vec3, visitor: impl FnMut(T)) {
        let moved = Aabb::new(
            (aabb.mins.coords + nalgebra_vec(motion)).into(),
            (aabb.maxs.coords + nalgebra_vec(motion)).into(),
        );
        let merged = Aabb::new(
            aabb.mins.coords.inf(&moved.mins.coords).into(),
            aabb.maxs.coords.sup(&moved.maxs.coords).into(),
        );
        self.for_each_in_aabb(&merged, visitor);
    }

    /// Returns ids of all elements whose AABB contains `point`.
    pub fn find_at_point(&self, point: Vec3) -> Vec<T> {
        let mut found = Vec::new();
        self.for_each_at_point(point, |id| found.push(id));
        found
    }

    /// Returns ids of all elements whose AABB intersects `aabb`.
    pub fn find_in_aabb(&self, aabb: &Aabb) -> Vec<T> {
        let mut found = Vec::new();
        self.for_each_in_aabb(aabb, |id| found.push(id));
        found
    }

    fn visit(&self, node: u32, center: Vec3, half: Vec3, visitor: &mut impl FnMut(T)) {
        let node = &self.nodes[node as usize];

        for &element in &node.elements {
            let slot = self.slots[element as usize]
                .as_ref()
                .expect("node refers to an empty slot");
            if !disjoint(slot.center, slot.half, center, half) {
                visitor(slot.id);
            }
        }

        for octant in Octant::all() {
            if let Some(child) = node.children[octant.index()] {
                let child_node = &self.nodes[child as usize];
                if !disjoint(child_node.center, child_node.loose, center, half) {
                    self.visit(child, center, half, visitor);
                }
            }
        }
    }

    /// Finds (creating nodes on the way) the deepest node whose loose bounds
    /// fully contain the given box.
    fn locate(&mut self, center: Vec3, half: Vec3) -> u32 {
        let mut node = 0u32;
        loop {
            let (node_center, node_half, depth) = {
                let n = &self.nodes[node as usize];
                (n.center, n.half, n.depth)
            };
            if depth >= MAX_DEPTH {
                return node;
            }

            let octant = Octant::from_point(node_center, center);
            let child_half = node_half * 0.5;
            let child_center = node_center + child_half * octant.direction();
            let child_loose = child_half + node_half / LOOSENESS_DENOMINATOR;

            if !contains(child_center, child_loose, center, half) {
                return node;
            }

            node = match self.nodes[node as usize].children[octant.index()] {
                Some(child) => child,
                None => {
                    let child = self.nodes.len() as u32;
                    self.nodes
                        .push(Node::new(child_center, child_half, child_loose, depth + 1));
                    self.nodes[node as usize].children[octant.index()] = Some(child);
                    child
                }
            };
        }
    }
}

impl Node {
    fn new(center: Vec3, half: Vec3, loose: Vec3, depth: u8) -> Self {
        Self {
            center,
            half,
            loose,
            depth,
            children: [None; Octant::COUNT],
            elements: Vec::new(),
        }
    }
}

/// The unordered box disjointness test: two boxes are disjoint iff the
/// center difference exceeds the summed extents on any axis.
fn disjoint(center_a: Vec3, half_a: Vec3, center_b: Vec3, half_b: Vec3) -> bool {
    let distance = (center_a - center_b).abs();
    let extent = half_a + half_b;
    distance.x > extent.x || distance.y > extent.y || distance.z > extent.z
}

/// Returns true if box B lies fully inside box A.
fn contains(center_a: Vec3, half_a: Vec3, center_b: Vec3, half_b: Vec3) -> bool {
    let distance = (center_a - center_b).abs();
    let margin = half_a - half_b;
    distance.x <= margin.x && distance.y <= margin.y && distance.z <= margin.z
}

fn center(aabb: &Aabb) -> Vec3 {
    let center = aabb.center();
    Vec3::new(center.x, center.y, center.z)
}

fn half_extents(aabb: &Aabb) -> Vec3 {
    let half = aabb.half_extents();
    Vec3::new(half.x, half.y, half.z)
}

fn nalgebra_vec(v: Vec3) -> parry3d::math::Vector<f32> {
    parry3d::math::Vector::new(v.x, v.y, v.z)
}

#[cfg(test)]
mod tests {
    use parry3d::math::Point;

    use super::*;

    fn aabb(mins: (f32, f32, f32), maxs: (f32, f32, f32)) -> Aabb {
        Aabb::new(
            Point::new(mins.0, mins.1, mins.2),
            Point::new(maxs.0, maxs.1, maxs.2),
        )
    }

    #[test]
    fn test_insert_remove() {
        let mut tree = LooseOctree::new(aabb((-1000., -1000., -1000.), (1000., 1000., 1000.)));
        assert!(tree.is_empty());

        let token_a = tree.insert(1u32, &aabb((0., 0., 0.), (100., 100., 100.)));
        let token_b = tree.insert(2u32, &aabb((500., 500., 0.), (600., 550., 20.)));
        assert_eq!(tree.len(), 2);

        assert_eq!(tree.find_at_point(Vec3::new(50., 50., 50.)), vec![1]);
        assert_eq!(tree.find_at_point(Vec3::new(550., 520., 10.)), vec![2]);
        assert!(tree.find_at_point(Vec3::new(-50., 0., 0.)).is_empty());

        assert_eq!(tree.remove(token_a), 1);
        assert!(tree.find_at_point(Vec3::new(50., 50., 50.)).is_empty());
        assert_eq!(tree.remove(token_b), 2);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_straddling_box_lands_in_one_node() {
        let mut tree = LooseOctree::new(aabb((-1000., -1000., -1000.), (1000., 1000., 1000.)));
        // A small box straddling the X = 0 split plane. Thanks to the loose
        // expansion it still descends below the root.
        tree.insert(7u32, &aabb((-10., 400., 400.), (10., 420., 420.)));
        assert!(tree.nodes[0].elements.is_empty());
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.find_at_point(Vec3::new(0., 410., 410.)), vec![7]);
    }

    #[test]
    fn test_aabb_query() {
        let mut tree = LooseOctree::new(aabb((-1000., -1000., -1000.), (1000., 1000., 1000.)));
        tree.insert(1u32, &aabb((0., 0., 0.), (100., 100., 10.)));
        tree.insert(2u32, &aabb((200., 0., 0.), (300., 100., 10.)));
        tree.insert(3u32, &aabb((-300., -300., 0.), (-200., -200., 10.)));

        let mut found = tree.find_in_aabb(&aabb((50., 50., 0.), (250., 60., 5.)));
        found.sort();
        assert_eq!(found, vec![1, 2]);

        let found = tree.find_in_aabb(&aabb((400., 400., 0.), (500., 500., 5.)));
        assert!(found.is_empty());
    }

    #[test]
    fn test_swept_query() {
        let mut tree = LooseOctree::new(aabb((-1000., -1000., -1000.), (1000., 1000., 1000.)));
        tree.insert(1u32, &aabb((500., -10., -10.), (520., 10., 10.)));

        let start = aabb((-10., -10., -10.), (10., 10., 10.));
        assert!(tree.find_in_aabb(&start).is_empty());

        let mut found = Vec::new();
        tree.for_each_in_swept(&start, Vec3::new(600., 0., 0.), |id| found.push(id));
        assert_eq!(found, vec![1]);
    }

    #[test]
    fn test_update_keeps_token() {
        let mut tree = LooseOctree::new(aabb((-1000., -1000., -1000.), (1000., 1000., 1000.)));
        let token = tree.insert(1u32, &aabb((0., 0., 0.), (10., 10., 10.)));
        tree.update(token, &aabb((500., 500., 500.), (510., 510., 510.)));
        assert_eq!(tree.find_at_point(Vec3::new(505., 505., 505.)), vec![1]);
        assert_eq!(tree.remove(token), 1);
    }
}
