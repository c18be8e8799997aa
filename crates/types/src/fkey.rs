//! Hashable & totally ordered wrappers around `f32` based values.

use std::hash::{Hash, Hasher};

use glam::Vec2;

/// A float usable as a hash map key. Equivalence is bit-wise, ordering is
/// total (IEEE total order of the raw bits for the values produced by the
/// navigation code, which never hashes NaNs).
#[derive(Clone, Copy, Debug)]
pub struct FloatKey(pub f32);

impl PartialEq for FloatKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatKey {}

impl Hash for FloatKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for FloatKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A 2D point usable as a hash map key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct PointKey(FloatKey, FloatKey);

impl PointKey {
    pub fn new(point: Vec2) -> Self {
        Self(FloatKey(point.x), FloatKey(point.y))
    }
}

/// Line segment whose hash and equivalence class don't change with
/// orientation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct SegmentKey(PointKey, PointKey);

impl SegmentKey {
    pub fn new(a: Vec2, b: Vec2) -> Self {
        let a = PointKey::new(a);
        let b = PointKey::new(b);
        if a < b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    use super::*;

    #[test]
    fn test_segment_key() {
        let a = hash(SegmentKey::new(Vec2::new(1., 2.), Vec2::new(3., 4.)));
        let b = hash(SegmentKey::new(Vec2::new(3., 4.), Vec2::new(1., 2.)));
        let c = hash(SegmentKey::new(Vec2::new(2., 1.), Vec2::new(3., 4.)));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    fn hash<T>(obj: T) -> u64
    where
        T: Hash,
    {
        let mut hasher = DefaultHasher::new();
        obj.hash(&mut hasher);
        hasher.finish()
    }
}
