//! Spatial bounds: opaque authority regions claimed by shards.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Handle assigned to a bound by whatever seeds the pending-bounds set.
/// Stable across the cluster.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoundsId(pub u32);

/// A geometric authority region. The core is agnostic to shape kind; it
/// only needs containment and a stable id.
pub trait Bound: std::fmt::Debug + Send + Sync {
    fn id(&self) -> BoundsId;
    fn contains(&self, point: Vec3) -> bool;
}

/// The canonical rectangle/cuboid bound. Half-open on the +x/+y/+z side,
/// closed on -x/-y/-z, so adjacent bounds partition space without overlap
/// or gaps at shared edges.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GridBound {
    pub id: BoundsId,
    pub min: Vec3,
    pub max: Vec3,
}

impl GridBound {
    pub fn new(id: BoundsId, min: Vec3, max: Vec3) -> Self {
        Self { id, min, max }
    }
}

impl Bound for GridBound {
    fn id(&self) -> BoundsId {
        self.id
    }

    fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x < self.max.x
            && point.y >= self.min.y
            && point.y < self.max.y
            && point.z >= self.min.z
            && point.z < self.max.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound() -> GridBound {
        GridBound::new(BoundsId(1), Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 10.0, 10.0))
    }

    #[test]
    fn interior_point_contained() {
        assert!(bound().contains(Vec3::new(5.0, 5.0, 5.0)));
    }

    #[test]
    fn min_edge_is_closed() {
        assert!(bound().contains(Vec3::new(0.0, 0.0, 0.0)));
    }

    #[test]
    fn max_edge_is_half_open() {
        assert!(!bound().contains(Vec3::new(10.0, 5.0, 5.0)));
        assert!(!bound().contains(Vec3::new(5.0, 10.0, 5.0)));
        assert!(!bound().contains(Vec3::new(5.0, 5.0, 10.0)));
    }

    #[test]
    fn adjacent_bounds_partition_shared_edge() {
        let a = bound();
        let b = GridBound::new(BoundsId(2), Vec3::new(10.0, 0.0, 0.0), Vec3::new(20.0, 10.0, 10.0));
        let edge = Vec3::new(10.0, 5.0, 5.0);
        assert!(!a.contains(edge));
        assert!(b.contains(edge));
    }
}
