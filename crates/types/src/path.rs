//! Tools and structs for working with paths on the mesh surface.

use glam::Vec3;

/// A path on the mesh defined by a sequence of way points. The first way
/// point is the start of the path and the last one is the target.
#[derive(Clone, Debug)]
pub struct Path {
    length: f32,
    waypoints: Vec<Vec3>,
}

impl Path {
    /// Creates a path on line `from` -> `to`.
    pub fn straight<P: Into<Vec3>>(from: P, to: P) -> Self {
        Self::new(vec![from.into(), to.into()])
    }

    /// Creates a new path. `waypoints` must not be empty.
    pub fn new(waypoints: Vec<Vec3>) -> Self {
        debug_assert!(!waypoints.is_empty());
        let length = waypoints
            .windows(2)
            .map(|pair| pair[0].distance(pair[1]))
            .sum();
        Self { length, waypoints }
    }

    /// Returns the length of the path in world units.
    pub fn length(&self) -> f32 {
        self.length
    }

    /// Returns the complete sequence of the path way points.
    pub fn waypoints(&self) -> &[Vec3] {
        self.waypoints.as_slice()
    }

    /// Returns the final way point of the path.
    pub fn target(&self) -> Vec3 {
        self.waypoints.last().copied().unwrap_or(Vec3::ZERO)
    }

    /// Returns a path shortened by `amount` from the target end. Returns
    /// None if `amount` is longer than the path.
    pub fn truncated(mut self, mut amount: f32) -> Option<Self> {
        if amount == 0. {
            return Some(self);
        } else if amount >= self.length {
            return None;
        }

        while self.waypoints.len() >= 2 {
            let last = self.waypoints[self.waypoints.len() - 1];
            let preceding = self.waypoints[self.waypoints.len() - 2];

            let diff = last - preceding;
            let diff_len = diff.length();

            if diff_len <= amount {
                self.length -= diff_len;
                amount -= diff_len;
                self.waypoints.pop();
            } else {
                self.length -= amount;
                let index = self.waypoints.len() - 1;
                self.waypoints[index] = last - diff * (amount / diff_len);
                break;
            }
        }

        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_path() {
        let path = Path::new(vec![
            Vec3::new(1., 2., 0.),
            Vec3::new(3., 2., 0.),
            Vec3::new(3., 8., 0.),
        ]);
        assert_abs_diff_eq!(path.length(), 8.);
        assert_eq!(path.waypoints().len(), 3);
        assert_eq!(path.target(), Vec3::new(3., 8., 0.));

        let path = Path::straight(Vec3::new(10., 11., 0.), Vec3::new(22., 11., 0.));
        assert_abs_diff_eq!(path.length(), 12.);
        assert_eq!(path.waypoints().len(), 2);
        assert_eq!(path.target(), Vec3::new(22., 11., 0.));
    }

    #[test]
    fn test_truncated() {
        let path = Path::new(vec![
            Vec3::new(1., 2., 0.),
            Vec3::new(3., 2., 0.),
            Vec3::new(3., 8., 0.),
        ]);

        let truncated = path.clone().truncated(1.).unwrap();
        assert_abs_diff_eq!(truncated.length(), 7.);
        assert_eq!(truncated.target(), Vec3::new(3., 7., 0.));

        let truncated = path.clone().truncated(7.).unwrap();
        assert_abs_diff_eq!(truncated.length(), 1.);
        assert_eq!(truncated.waypoints().len(), 2);
        assert_eq!(truncated.target(), Vec3::new(2., 2., 0.));

        assert!(path.truncated(9.).is_none());
    }
}
