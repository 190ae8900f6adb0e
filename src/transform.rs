//! Simulation-space to node-local transform selection.
//!
//! The simulation bakes vertices in its own coordinate frame. Before the
//! geometry reaches the canvas renderer it has to be expressed in the local
//! frame of the UI node that hosts the effect.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::math::safe_recip3;

/// Coordinate frame a particle simulation places its particles in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SimulationSpace {
    Local,
    World,
    Custom,
    /// A mode this crate does not know how to reconcile.
    Other(u32),
}

/// World-space state of the hosting UI node, sampled once per refresh.
#[derive(Debug, Clone, Copy)]
pub struct NodePose {
    pub rotation: Quat,
    pub lossy_scale: Vec3,
    pub world_to_local: Mat4,
}

impl Default for NodePose {
    fn default() -> Self {
        Self {
            rotation: Quat::IDENTITY,
            lossy_scale: Vec3::ONE,
            world_to_local: Mat4::IDENTITY,
        }
    }
}

/// Derive the matrix taking baked vertices into the node's local space.
///
/// `custom_origin` is the world position of the custom simulation-space node,
/// if one is assigned. Custom space without one behaves like local space.
pub fn select_transform(space: SimulationSpace, pose: &NodePose, custom_origin: Option<Vec3>) -> Mat4 {
    let space = match (space, custom_origin) {
        (SimulationSpace::Custom, None) => SimulationSpace::Local,
        (space, _) => space,
    };

    match space {
        SimulationSpace::Local => {
            // Zero scale axes are not invertible; leave those axes unscaled.
            Mat4::from_quat(pose.rotation.inverse()) * Mat4::from_scale(safe_recip3(pose.lossy_scale))
        }
        SimulationSpace::World => pose.world_to_local,
        SimulationSpace::Custom => {
            let origin = custom_origin.unwrap_or(Vec3::ZERO);
            pose.world_to_local * Mat4::from_translation(origin)
        }
        SimulationSpace::Other(_) => Mat4::IDENTITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    fn assert_vec_eq(a: Vec3, b: Vec3) {
        assert!((a - b).length() < EPS, "expected {:?}, got {:?}", b, a);
    }

    fn samples() -> [Vec3; 4] {
        [
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 2.0, -3.0),
            Vec3::new(-4.5, 1.25, 7.0),
        ]
    }

    fn rotated_pose() -> NodePose {
        let rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let lossy_scale = Vec3::new(2.0, 4.0, 1.0);
        let local_to_world = Mat4::from_scale_rotation_translation(lossy_scale, rotation, Vec3::new(10.0, -5.0, 0.0));
        NodePose {
            rotation,
            lossy_scale,
            world_to_local: local_to_world.inverse(),
        }
    }

    #[test]
    fn test_world_space_uses_world_to_local() {
        let pose = rotated_pose();
        let m = select_transform(SimulationSpace::World, &pose, None);
        for p in samples() {
            assert_vec_eq(m.transform_point3(p), pose.world_to_local.transform_point3(p));
        }
    }

    #[test]
    fn test_local_space_unrotates_then_unscales() {
        let pose = rotated_pose();
        let m = select_transform(SimulationSpace::Local, &pose, None);
        for p in samples() {
            let expected = pose.rotation.inverse() * (p / pose.lossy_scale);
            assert_vec_eq(m.transform_point3(p), expected);
        }
    }

    #[test]
    fn test_local_space_uniform_scale_commutes() {
        let pose = NodePose {
            rotation: Quat::from_rotation_y(0.7),
            lossy_scale: Vec3::splat(3.0),
            world_to_local: Mat4::IDENTITY,
        };
        let m = select_transform(SimulationSpace::Local, &pose, None);
        for p in samples() {
            let expected = (pose.rotation.inverse() * p) / 3.0;
            assert_vec_eq(m.transform_point3(p), expected);
        }
    }

    #[test]
    fn test_local_space_ignores_translation() {
        let pose = rotated_pose();
        let m = select_transform(SimulationSpace::Local, &pose, None);
        assert_vec_eq(m.transform_point3(Vec3::ZERO), Vec3::ZERO);
    }

    #[test]
    fn test_zero_scale_axis_maps_to_one() {
        let pose = NodePose {
            lossy_scale: Vec3::new(0.0, 2.0, 1.0),
            ..NodePose::default()
        };
        let m = select_transform(SimulationSpace::Local, &pose, None);
        let p = m.transform_point3(Vec3::new(3.0, 4.0, 5.0));
        assert!(p.is_finite());
        assert_vec_eq(p, Vec3::new(3.0, 2.0, 5.0));
    }

    #[test]
    fn test_custom_space_translates_by_origin() {
        let pose = rotated_pose();
        let origin = Vec3::new(1.0, 2.0, 3.0);
        let m = select_transform(SimulationSpace::Custom, &pose, Some(origin));
        for p in samples() {
            assert_vec_eq(m.transform_point3(p), pose.world_to_local.transform_point3(p + origin));
        }
    }

    #[test]
    fn test_custom_space_without_node_falls_back_to_local() {
        let pose = rotated_pose();
        let custom = select_transform(SimulationSpace::Custom, &pose, None);
        let local = select_transform(SimulationSpace::Local, &pose, None);
        assert!(custom.abs_diff_eq(local, EPS));
    }

    #[test]
    fn test_unknown_space_is_identity() {
        let pose = rotated_pose();
        let m = select_transform(SimulationSpace::Other(7), &pose, None);
        assert_eq!(m, Mat4::IDENTITY);
    }
}
