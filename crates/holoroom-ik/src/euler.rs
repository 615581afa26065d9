//! Euler decomposition for joint limits.
//!
//! Angles are always reported per axis as a `Vec3` (`x`, `y`, `z`), whatever
//! the order. The order only decides how they compose: `Xyz` means the
//! rotation matrix is `Rx * Ry * Rz`.

use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Threshold on the middle-axis matrix term past which the decomposition is
/// treated as gimbal-locked.
const GIMBAL_THRESHOLD: f32 = 0.999_999_9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EulerOrder {
    #[serde(rename = "XYZ")]
    Xyz,
    #[serde(rename = "YZX")]
    Yzx,
    #[serde(rename = "ZXY")]
    Zxy,
    #[serde(rename = "XZY")]
    Xzy,
    #[serde(rename = "YXZ")]
    Yxz,
    #[serde(rename = "ZYX")]
    Zyx,
}

impl EulerOrder {
    pub const ALL: [EulerOrder; 6] = [
        EulerOrder::Xyz,
        EulerOrder::Yzx,
        EulerOrder::Zxy,
        EulerOrder::Xzy,
        EulerOrder::Yxz,
        EulerOrder::Zyx,
    ];

    /// Builds a quaternion from per-axis angles.
    pub fn compose(self, angles: Vec3) -> Quat {
        let qx = Quat::from_rotation_x(angles.x);
        let qy = Quat::from_rotation_y(angles.y);
        let qz = Quat::from_rotation_z(angles.z);
        let q = match self {
            EulerOrder::Xyz => qx * qy * qz,
            EulerOrder::Yzx => qy * qz * qx,
            EulerOrder::Zxy => qz * qx * qy,
            EulerOrder::Xzy => qx * qz * qy,
            EulerOrder::Yxz => qy * qx * qz,
            EulerOrder::Zyx => qz * qy * qx,
        };
        q.normalize()
    }

    /// Splits an orientation into per-axis angles for this order.
    ///
    /// The middle axis lands in `[-pi/2, pi/2]`, the outer two in `[-pi, pi]`.
    /// Near the gimbal singularity the third axis is pinned to zero.
    pub fn decompose(self, orientation: Quat) -> Vec3 {
        let m = Mat3::from_quat(orientation.normalize());
        // row/column naming: mRC
        let (m11, m12, m13) = (m.x_axis.x, m.y_axis.x, m.z_axis.x);
        let (m21, m22, m23) = (m.x_axis.y, m.y_axis.y, m.z_axis.y);
        let (m31, m32, m33) = (m.x_axis.z, m.y_axis.z, m.z_axis.z);

        match self {
            EulerOrder::Xyz => {
                let y = m13.clamp(-1.0, 1.0).asin();
                if m13.abs() < GIMBAL_THRESHOLD {
                    Vec3::new((-m23).atan2(m33), y, (-m12).atan2(m11))
                } else {
                    Vec3::new(m32.atan2(m22), y, 0.0)
                }
            }
            EulerOrder::Yxz => {
                let x = (-m23.clamp(-1.0, 1.0)).asin();
                if m23.abs() < GIMBAL_THRESHOLD {
                    Vec3::new(x, m13.atan2(m33), m21.atan2(m22))
                } else {
                    Vec3::new(x, (-m31).atan2(m11), 0.0)
                }
            }
            EulerOrder::Zxy => {
                let x = m32.clamp(-1.0, 1.0).asin();
                if m32.abs() < GIMBAL_THRESHOLD {
                    Vec3::new(x, (-m31).atan2(m33), (-m12).atan2(m22))
                } else {
                    Vec3::new(x, 0.0, m21.atan2(m11))
                }
            }
            EulerOrder::Zyx => {
                let y = (-m31.clamp(-1.0, 1.0)).asin();
                if m31.abs() < GIMBAL_THRESHOLD {
                    Vec3::new(m32.atan2(m33), y, m21.atan2(m11))
                } else {
                    Vec3::new(0.0, y, (-m12).atan2(m22))
                }
            }
            EulerOrder::Yzx => {
                let z = m21.clamp(-1.0, 1.0).asin();
                if m21.abs() < GIMBAL_THRESHOLD {
                    Vec3::new((-m23).atan2(m22), (-m31).atan2(m11), z)
                } else {
                    Vec3::new(0.0, m13.atan2(m33), z)
                }
            }
            EulerOrder::Xzy => {
                let z = (-m12.clamp(-1.0, 1.0)).asin();
                if m12.abs() < GIMBAL_THRESHOLD {
                    Vec3::new(m32.atan2(m22), m13.atan2(m11), z)
                } else {
                    Vec3::new((-m23).atan2(m33), 0.0, z)
                }
            }
        }
    }
}
