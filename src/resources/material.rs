//! Material definitions

use crate::resources::TextureId;

/// Surface description referenced by submeshes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Material {
    pub name: String,
    /// Albedo texture, `None` means the white fallback
    pub albedo: Option<TextureId>,
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            albedo: None,
        }
    }

    pub fn with_albedo(mut self, texture: TextureId) -> Self {
        self.albedo = Some(texture);
        self
    }
}
