//! Intrusive sorted open list.
//!
//! The list is threaded through the transient search state of the edges
//! themselves; the controller only holds the head. Insertion is linear and
//! stable: an edge with an estimated weight equal to an already queued one
//! goes after it, so ties resolve in insertion order.

use nav_mesh::NavWorld;
use nav_types::ids::EdgeRef;

pub(crate) struct OpenList {
    session: u32,
    head: Option<EdgeRef>,
    len: usize,
    /// Beam-search bound. Insertion past the cap is refused and the node
    /// dropped.
    cap: Option<usize>,
}

impl OpenList {
    pub(crate) fn new(session: u32, cap: Option<usize>) -> Self {
        Self {
            session,
            head: None,
            len: 0,
            cap,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Inserts an edge ordered by its estimated overall weight. Returns
    /// false when the insertion position lies past the cap.
    pub(crate) fn push(&mut self, world: &mut NavWorld, edge: EdgeRef) -> bool {
        let weight = match world.edge(edge) {
            Some(e) => e.search(self.session).estimated_weight,
            None => return false,
        };

        let mut index = 0;
        let mut prev: Option<EdgeRef> = None;
        let mut next = self.head;
        while let Some(candidate) = next {
            let state = match world.edge(candidate) {
                Some(e) => e.search(self.session),
                None => break,
            };
            if weight < state.estimated_weight {
                break;
            }
            index += 1;
            prev = Some(candidate);
            next = state.next_open;
        }

        if self.cap.is_some_and(|cap| index >= cap) {
            return false;
        }

        if let Some(state) = world.edge_mut(edge).map(|e| e.search_mut(self.session)) {
            state.on_open = true;
            state.prev_open = prev;
            state.next_open = next;
        }
        match prev {
            Some(prev) => {
                if let Some(e) = world.edge_mut(prev) {
                    e.search_mut(self.session).next_open = Some(edge);
                }
            }
            None => self.head = Some(edge),
        }
        if let Some(next) = next {
            if let Some(e) = world.edge_mut(next) {
                e.search_mut(self.session).prev_open = Some(edge);
            }
        }
        self.len += 1;

        // Enforce the cap by dropping the tail.
        if self.cap.is_some_and(|cap| self.len > cap) {
            if let Some(tail) = self.tail(world) {
                self.remove(world, tail);
            }
        }
        true
    }

    /// Unlinks and returns the cheapest edge.
    pub(crate) fn pop_min(&mut self, world: &mut NavWorld) -> Option<EdgeRef> {
        let head = self.head?;
        self.remove(world, head);
        Some(head)
    }

    /// Unlinks an edge from anywhere in the list.
    pub(crate) fn remove(&mut self, world: &mut NavWorld, edge: EdgeRef) {
        let state = match world.edge(edge) {
            Some(e) => e.search(self.session),
            None => return,
        };
        if !state.on_open {
            return;
        }

        match state.prev_open {
            Some(prev) => {
                if let Some(e) = world.edge_mut(prev) {
                    e.search_mut(self.session).next_open = state.next_open;
                }
            }
            None => self.head = state.next_open,
        }
        if let Some(next) = state.next_open {
            if let Some(e) = world.edge_mut(next) {
                e.search_mut(self.session).prev_open = state.prev_open;
            }
        }
        if let Some(cleared) = world.edge_mut(edge).map(|e| e.search_mut(self.session)) {
            cleared.on_open = false;
            cleared.prev_open = None;
            cleared.next_open = None;
        }
        self.len -= 1;
    }

    fn tail(&self, world: &NavWorld) -> Option<EdgeRef> {
        let mut current = self.head?;
        loop {
            match world.edge(current)?.search(self.session).next_open {
                Some(next) => current = next,
                None => return Some(current),
            }
        }
    }
}
