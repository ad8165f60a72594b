//! Texture loading and the texture table

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView};
use thiserror::Error;

use crate::backend::*;

#[derive(Error, Debug)]
pub enum TextureError {
    #[error("Failed to decode '{name}': {source}")]
    Decode {
        name: String,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Decoded RGBA8 texture data
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Decode an image file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TextureError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let img = image::open(path).map_err(|source| TextureError::Decode {
            name: name.clone(),
            source,
        })?;
        Ok(Self::from_image(img, &name))
    }

    /// Decode an in-memory image
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, TextureError> {
        let img = image::load_from_memory(bytes).map_err(|source| TextureError::Decode {
            name: name.to_string(),
            source,
        })?;
        Ok(Self::from_image(img, name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data: img.to_rgba8().into_raw(),
            name: name.to_string(),
        }
    }

    /// 1x1 texture of a single color
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    pub fn black() -> Self {
        Self::solid_color([0, 0, 0, 255], "black")
    }

    /// Tangent-space normal pointing straight out of the surface
    pub fn flat_normal() -> Self {
        Self {
            format: TextureFormat::Rgba8Unorm,
            ..Self::solid_color([128, 128, 255, 255], "flat_normal")
        }
    }

    /// Stand-in for textures that failed to load
    pub fn magenta() -> Self {
        Self::solid_color([255, 0, 255, 255], "missing")
    }

    /// Two-color checkerboard with 8 pixel cells
    pub fn checkerboard(size: u32, even: [u8; 4], odd: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let color = if (x / 8 + y / 8) % 2 == 0 { even } else { odd };
                data.extend_from_slice(&color);
            }
        }
        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: "checkerboard".to_string(),
        }
    }
}

/// Uploaded texture owning its backend handle
#[derive(Debug)]
pub struct GpuTexture {
    handle: GpuResource<TextureHandle>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub name: String,
}

impl GpuTexture {
    /// Create and upload texture to GPU
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
        data: &TextureData,
    ) -> BackendResult<Self> {
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.width,
            height: data.height,
            format: data.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?;
        backend.write_texture(handle, &data.data, data.width, data.height);

        Ok(Self {
            handle: GpuResource::new(handle, queue),
            width: data.width,
            height: data.height,
            format: data.format,
            name: data.name.clone(),
        })
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle.handle()
    }
}

/// Index into a [`TextureTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

impl TextureId {
    /// Returned by [`TextureTable::load`] when decoding fails
    pub const NOT_FOUND: TextureId = TextureId(u32::MAX);

    pub fn is_found(&self) -> bool {
        *self != Self::NOT_FOUND
    }
}

/// Every texture the renderer can sample, with path dedup and fallbacks
#[derive(Debug)]
pub struct TextureTable {
    textures: Vec<GpuTexture>,
    by_path: HashMap<PathBuf, TextureId>,
    white: TextureId,
    black: TextureId,
    flat_normal: TextureId,
    magenta: TextureId,
    queue: ReleaseQueue,
}

impl TextureTable {
    /// Create the table and upload the fallback textures
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
    ) -> Result<Self, TextureError> {
        let mut table = Self {
            textures: Vec::new(),
            by_path: HashMap::new(),
            white: TextureId::NOT_FOUND,
            black: TextureId::NOT_FOUND,
            flat_normal: TextureId::NOT_FOUND,
            magenta: TextureId::NOT_FOUND,
            queue: queue.clone(),
        };
        table.white = table.insert(backend, &TextureData::white())?;
        table.black = table.insert(backend, &TextureData::black())?;
        table.flat_normal = table.insert(backend, &TextureData::flat_normal())?;
        table.magenta = table.insert(backend, &TextureData::magenta())?;
        Ok(table)
    }

    /// Upload decoded data and return its id
    pub fn insert<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        data: &TextureData,
    ) -> Result<TextureId, TextureError> {
        let texture = GpuTexture::create(backend, &self.queue, data)?;
        let id = TextureId(self.textures.len() as u32);
        self.textures.push(texture);
        Ok(id)
    }

    /// Load the image at `path`, or return the id it was loaded under before.
    ///
    /// Failures are logged and yield [`TextureId::NOT_FOUND`].
    pub fn load<B: GraphicsBackend, P: AsRef<Path>>(
        &mut self,
        backend: &mut B,
        path: P,
    ) -> TextureId {
        let path = path.as_ref();
        if let Some(&id) = self.by_path.get(path) {
            return id;
        }

        let loaded = TextureData::from_file(path).and_then(|data| self.insert(backend, &data));
        match loaded {
            Ok(id) => {
                log::debug!("Loaded texture '{}' as {:?}", path.display(), id);
                self.by_path.insert(path.to_path_buf(), id);
                id
            }
            Err(e) => {
                log::warn!("{}", e);
                TextureId::NOT_FOUND
            }
        }
    }

    /// Handle to sample for `id`, substituting fallbacks.
    ///
    /// No texture samples white; a missing or unknown one samples magenta.
    pub fn resolve(&self, id: Option<TextureId>) -> Option<TextureHandle> {
        let id = match id {
            None => self.white,
            Some(id) if (id.0 as usize) < self.textures.len() => id,
            Some(_) => self.magenta,
        };
        self.handle(id)
    }

    pub fn handle(&self, id: TextureId) -> Option<TextureHandle> {
        self.textures.get(id.0 as usize).map(GpuTexture::handle)
    }

    pub fn get(&self, id: TextureId) -> Option<&GpuTexture> {
        self.textures.get(id.0 as usize)
    }

    pub fn white(&self) -> TextureId {
        self.white
    }

    pub fn black(&self) -> TextureId {
        self.black
    }

    pub fn flat_normal(&self) -> TextureId {
        self.flat_normal
    }

    pub fn magenta(&self) -> TextureId {
        self.magenta
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}
