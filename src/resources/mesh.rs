//! Mesh data, mesh-parts and models

use bytemuck::Pod;
use glam::{Vec2, Vec3, Vec4};

use crate::backend::*;
use crate::resources::{
    BindingError, BindingSource, Material, ShaderProgram, VertexBindingCache,
};

/// CPU-side mesh with the standard vertex layout
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Append a square face of side `2 * half` facing `normal`
    fn push_face(&mut self, center: Vec3, normal: Vec3, up: Vec3, half: f32) {
        let right = up.cross(normal);
        let base = self.vertices.len() as u32;
        let corners = [
            (-right - up, Vec2::new(0.0, 1.0)),
            (right - up, Vec2::new(1.0, 1.0)),
            (right + up, Vec2::new(1.0, 0.0)),
            (-right + up, Vec2::new(0.0, 0.0)),
        ];
        for (offset, uv) in corners {
            self.vertices.push(Vertex {
                position: center + offset * half,
                normal,
                uv,
                tangent: right.extend(1.0),
            });
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// Unit cube centered at the origin
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");
        let faces = [
            (Vec3::Z, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y),
            (Vec3::X, Vec3::Y),
            (Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::Z),
        ];
        for (normal, up) in faces {
            mesh.push_face(normal * 0.5, normal, up, 0.5);
        }
        mesh
    }

    /// Square of side `size` in the XY plane, facing +Z
    pub fn quad(size: f32) -> Self {
        let mut mesh = Mesh::new("quad");
        mesh.push_face(Vec3::ZERO, Vec3::Z, Vec3::Y, size * 0.5);
        mesh
    }

    /// UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");
        let segments = segments.max(3);
        let rings = rings.max(2);

        for ring in 0..=rings {
            let phi = std::f32::consts::PI * ring as f32 / rings as f32;
            for segment in 0..=segments {
                let theta = std::f32::consts::TAU * segment as f32 / segments as f32;
                let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
                mesh.vertices.push(Vertex {
                    position: normal * 0.5,
                    normal,
                    uv: Vec2::new(
                        segment as f32 / segments as f32,
                        ring as f32 / rings as f32,
                    ),
                    tangent: Vec4::new(-theta.sin(), 0.0, theta.cos(), 1.0),
                });
            }
        }

        let stride = segments + 1;
        for ring in 0..rings {
            for segment in 0..segments {
                let a = ring * stride + segment;
                let b = a + stride;
                mesh.indices
                    .extend_from_slice(&[a, a + 1, b, a + 1, b + 1, b]);
            }
        }
        mesh
    }

    /// Plane on the XZ axis, facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = Mesh::new("plane");
        let cells = subdivisions.max(1);

        for z in 0..=cells {
            for x in 0..=cells {
                let u = x as f32 / cells as f32;
                let v = z as f32 / cells as f32;
                mesh.vertices.push(Vertex {
                    position: Vec3::new((u - 0.5) * width, 0.0, (v - 0.5) * depth),
                    normal: Vec3::Y,
                    uv: Vec2::new(u, v),
                    tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
                });
            }
        }

        let stride = cells + 1;
        for z in 0..cells {
            for x in 0..cells {
                let a = z * stride + x;
                let b = a + stride;
                mesh.indices
                    .extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
            }
        }
        mesh
    }

    /// Capped cylinder along Y
    pub fn cylinder(radius: f32, height: f32, segments: u32) -> Self {
        let mut mesh = Mesh::new("cylinder");
        let segments = segments.max(3);
        let half = height * 0.5;
        let ring = |i: u32| {
            let angle = std::f32::consts::TAU * i as f32 / segments as f32;
            (angle.cos(), angle.sin())
        };

        for i in 0..=segments {
            let (c, s) = ring(i);
            let normal = Vec3::new(c, 0.0, s);
            let tangent = Vec4::new(-s, 0.0, c, 1.0);
            let u = i as f32 / segments as f32;
            for (y, v) in [(-half, 1.0), (half, 0.0)] {
                mesh.vertices.push(Vertex {
                    position: Vec3::new(c * radius, y, s * radius),
                    normal,
                    uv: Vec2::new(u, v),
                    tangent,
                });
            }
        }
        for i in 0..segments {
            let bottom = i * 2;
            let top = bottom + 1;
            mesh.indices
                .extend_from_slice(&[bottom, top, bottom + 2, top, top + 2, bottom + 2]);
        }

        for (y, normal) in [(half, Vec3::Y), (-half, Vec3::NEG_Y)] {
            let center = mesh.vertices.len() as u32;
            mesh.vertices.push(Vertex {
                position: Vec3::new(0.0, y, 0.0),
                normal,
                uv: Vec2::splat(0.5),
                tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
            });
            for i in 0..=segments {
                let (c, s) = ring(i);
                mesh.vertices.push(Vertex {
                    position: Vec3::new(c * radius, y, s * radius),
                    normal,
                    uv: Vec2::new(0.5 + c * 0.5, 0.5 + s * 0.5),
                    tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
                });
            }
            for i in 0..segments {
                let current = center + 1 + i;
                if normal.y > 0.0 {
                    mesh.indices.extend_from_slice(&[center, current + 1, current]);
                } else {
                    mesh.indices.extend_from_slice(&[center, current, current + 1]);
                }
            }
        }
        mesh
    }
}

/// A range of a mesh-part's index buffer drawn with one material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submesh {
    pub index_offset: u32,
    pub index_count: u32,
    pub material_index: usize,
}

impl Submesh {
    /// One past the last index, or `None` if it doesn't fit in `u32`
    pub fn index_end(&self) -> Option<u32> {
        self.index_offset.checked_add(self.index_count)
    }

    pub fn indices(&self) -> std::ops::Range<u32> {
        self.index_offset..self.index_offset.saturating_add(self.index_count)
    }
}

/// GPU vertex and index buffers sharing one layout, split into submeshes.
///
/// A mesh-part owns the vertex bindings built for it, one per program.
#[derive(Debug)]
pub struct MeshPart {
    name: String,
    layout: VertexBufferLayout,
    vertex_buffer: GpuResource<BufferHandle>,
    index_buffer: GpuResource<BufferHandle>,
    index_format: IndexFormat,
    index_count: u32,
    submeshes: Vec<Submesh>,
    bindings: VertexBindingCache,
}

impl MeshPart {
    /// Upload `mesh` as a single submesh drawn with `material_index`
    pub fn from_mesh<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
        mesh: &Mesh,
        material_index: usize,
    ) -> BackendResult<Self> {
        let submesh = Submesh {
            index_offset: 0,
            index_count: mesh.indices.len() as u32,
            material_index,
        };
        Self::from_raw(
            backend,
            queue,
            &mesh.name,
            &mesh.vertices,
            Vertex::layout(),
            &mesh.indices,
            vec![submesh],
        )
    }

    /// Upload arbitrary vertices described by `layout`
    pub fn from_raw<B: GraphicsBackend, V: Pod>(
        backend: &mut B,
        queue: &ReleaseQueue,
        name: &str,
        vertices: &[V],
        layout: VertexBufferLayout,
        indices: &[u32],
        submeshes: Vec<Submesh>,
    ) -> BackendResult<Self> {
        let index_count = u32::try_from(indices.len()).map_err(|_| {
            BackendError::BufferCreationFailed(format!(
                "'{}' has {} indices, more than a u32 index buffer holds",
                name,
                indices.len()
            ))
        })?;
        for submesh in &submeshes {
            match submesh.index_end() {
                Some(end) if end <= index_count => {}
                _ => {
                    log::error!(
                        "Submesh at {} (+{}) of '{}' reaches past {} indices",
                        submesh.index_offset,
                        submesh.index_count,
                        name,
                        index_count
                    );
                    return Err(BackendError::BufferCreationFailed(format!(
                        "submesh {}+{} of '{}' is outside its {} indices",
                        submesh.index_offset, submesh.index_count, name, index_count
                    )));
                }
            }
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} Vertices", name)),
                size: vertex_bytes.len() as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            },
            vertex_bytes,
        )?;
        let vertex_buffer = GpuResource::new(vertex_buffer, queue);

        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let index_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} Indices", name)),
                size: index_bytes.len() as u64,
                usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
            },
            index_bytes,
        )?;
        let index_buffer = GpuResource::new(index_buffer, queue);

        log::debug!(
            "Uploaded mesh-part '{}': {} vertices, {} indices, {} submeshes",
            name,
            vertices.len(),
            index_count,
            submeshes.len()
        );

        Ok(Self {
            name: name.to_string(),
            layout,
            vertex_buffer,
            index_buffer,
            index_format: IndexFormat::Uint32,
            index_count,
            submeshes,
            bindings: VertexBindingCache::new(queue),
        })
    }

    /// Two triangles covering clip space, with texture coordinates
    pub fn fullscreen_quad<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
    ) -> BackendResult<Self> {
        let vertices = [
            QuadVertex {
                position: Vec3::new(-1.0, -1.0, 0.0),
                uv: Vec2::new(0.0, 1.0),
            },
            QuadVertex {
                position: Vec3::new(1.0, -1.0, 0.0),
                uv: Vec2::new(1.0, 1.0),
            },
            QuadVertex {
                position: Vec3::new(1.0, 1.0, 0.0),
                uv: Vec2::new(1.0, 0.0),
            },
            QuadVertex {
                position: Vec3::new(-1.0, 1.0, 0.0),
                uv: Vec2::new(0.0, 0.0),
            },
        ];
        let indices = [0, 1, 2, 0, 2, 3];
        Self::from_raw(
            backend,
            queue,
            "Fullscreen Quad",
            &vertices,
            QuadVertex::layout(),
            &indices,
            vec![Submesh {
                index_offset: 0,
                index_count: 6,
                material_index: 0,
            }],
        )
    }

    /// The binding wiring this part to `program`, built on first use
    pub fn vertex_binding<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        program: &ShaderProgram,
    ) -> Result<VertexBindingHandle, BindingError> {
        let source = BindingSource {
            name: &self.name,
            layout: &self.layout,
            vertex_buffer: self.vertex_buffer.handle(),
            index_buffer: self.index_buffer.handle(),
            index_format: self.index_format,
        };
        self.bindings.get_or_create(backend, program, &source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &VertexBufferLayout {
        &self.layout
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn submeshes(&self) -> &[Submesh] {
        &self.submeshes
    }

    /// Number of programs a vertex binding has been built for
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}

/// Mesh-parts plus the materials their submeshes index into
#[derive(Debug, Default)]
pub struct Model {
    pub name: String,
    pub parts: Vec<MeshPart>,
    pub materials: Vec<Material>,
}

impl Model {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_part(mut self, part: MeshPart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.materials.push(material);
        self
    }

    pub fn material(&self, index: usize) -> Option<&Material> {
        self.materials.get(index)
    }
}
