//! Octant indexing of node children.

use glam::Vec3;

/// Index of a child octant. Bit 0 is set for +X, bit 1 for +Y, bit 2 for +Z.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Octant(u8);

impl Octant {
    pub(crate) const COUNT: usize = 8;

    /// Returns the octant of `point` relative to `center`. Points exactly on
    /// a split plane land in the positive octant.
    pub(crate) fn from_point(center: Vec3, point: Vec3) -> Self {
        let mut index = 0;
        if point.x >= center.x {
            index |= 1;
        }
        if point.y >= center.y {
            index |= 2;
        }
        if point.z >= center.z {
            index |= 4;
        }
        Self(index)
    }

    pub(crate) fn all() -> impl Iterator<Item = Octant> {
        (0..Self::COUNT as u8).map(Octant)
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }

    /// Returns the direction of this octant's center from the parent center,
    /// with components of magnitude 1.
    pub(crate) fn direction(&self) -> Vec3 {
        Vec3::new(
            if self.0 & 1 == 0 { -1. } else { 1. },
            if self.0 & 2 == 0 { -1. } else { 1. },
            if self.0 & 4 == 0 { -1. } else { 1. },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_point() {
        let center = Vec3::new(10., 10., 10.);
        assert_eq!(
            Octant::from_point(center, Vec3::new(11., 9., 9.)).index(),
            1
        );
        assert_eq!(
            Octant::from_point(center, Vec3::new(9., 11., 11.)).index(),
            6
        );
        assert_eq!(Octant::from_point(center, center).index(), 7);
    }

    #[test]
    fn test_direction() {
        assert_eq!(Octant(0).direction(), Vec3::new(-1., -1., -1.));
        assert_eq!(Octant(5).direction(), Vec3::new(1., -1., 1.));
    }
}
