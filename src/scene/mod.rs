//! Scene state owned by the host
//!
//! The renderer reads the scene every frame and writes back two derived
//! values: each entity's world matrix and the parameter range its local block
//! landed in.

mod camera;
mod light;
mod transform;

pub use camera::*;
pub use light::*;
pub use transform::*;

use glam::{Mat4, Vec3};

use crate::resources::ParamRange;

/// A model instance placed in the world
#[derive(Debug, Clone)]
pub struct Entity {
    pub transform: Transform,
    /// Index returned by [`Renderer::add_model`](crate::Renderer::add_model)
    pub model: usize,
    /// Recomputed from `transform` every frame
    pub world_matrix: Mat4,
    /// Where this frame's local parameter block was written
    pub local_params: ParamRange,
}

impl Entity {
    pub fn new(model: usize) -> Self {
        Self {
            transform: Transform::default(),
            model,
            world_matrix: Mat4::IDENTITY,
            local_params: ParamRange::default(),
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.transform.scale = scale;
        self
    }
}

/// Camera, entities and lights of one scene
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub camera: Camera,
    pub entities: Vec<Entity>,
    pub lights: Vec<Light>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity, returning its index
    pub fn add_entity(&mut self, entity: Entity) -> usize {
        self.entities.push(entity);
        self.entities.len() - 1
    }

    pub fn add_light(&mut self, light: Light) -> usize {
        self.lights.push(light);
        self.lights.len() - 1
    }

    pub fn add_directional_light(&mut self, direction: Vec3, color: Vec3) -> usize {
        self.add_light(Light::directional(direction, color))
    }

    pub fn add_point_light(&mut self, position: Vec3, color: Vec3) -> usize {
        self.add_light(Light::point(position, color))
    }

    /// Fit the camera to the viewport and refresh every world matrix
    pub fn update(&mut self, viewport: (u32, u32)) {
        self.camera.set_aspect(viewport.0 as f32, viewport.1 as f32);
        for entity in &mut self.entities {
            entity.world_matrix = entity.transform.matrix();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_refreshes_world_matrices() {
        let mut scene = Scene::new();
        let id = scene.add_entity(Entity::new(0).with_position(Vec3::new(1.0, 0.0, 0.0)));
        assert_eq!(scene.entities[id].world_matrix, Mat4::IDENTITY);

        scene.update((800, 600));
        assert_eq!(
            scene.entities[id].world_matrix,
            Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0))
        );
        assert!((scene.camera.projection.aspect() - 800.0 / 600.0).abs() < 1e-6);
    }

    #[test]
    fn test_light_helpers() {
        let mut scene = Scene::new();
        scene.add_directional_light(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE);
        scene.add_point_light(Vec3::Y, Vec3::X);
        assert_eq!(scene.lights[0].kind, LightKind::Directional);
        assert_eq!(scene.lights[0].direction, Vec3::NEG_Y);
        assert_eq!(scene.lights[1].kind, LightKind::Point);
    }
}
