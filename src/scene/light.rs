//! Scene lights

use glam::Vec3;

/// Light type tag, as written into the global parameter block
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LightKind {
    #[default]
    Directional = 0,
    Point = 1,
}

impl LightKind {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// A directional or point light.
///
/// Directional lights ignore `position` for shading but still use it to place
/// their overlay gizmo. Point lights ignore `direction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub direction: Vec3,
    pub position: Vec3,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            kind: LightKind::Directional,
            color: Vec3::ONE,
            direction: Vec3::new(0.0, -1.0, 0.0),
            position: Vec3::ZERO,
        }
    }
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec3) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            direction: direction.normalize_or_zero(),
            position: Vec3::ZERO,
        }
    }

    pub fn point(position: Vec3, color: Vec3) -> Self {
        Self {
            kind: LightKind::Point,
            color,
            direction: Vec3::ZERO,
            position,
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }
}
