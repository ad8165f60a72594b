//! Per mesh-part vertex binding cache.
//!
//! A vertex binding wires a mesh-part's vertex and index buffers to the
//! active input locations of one program. Programs read different subsets of
//! the mesh attributes, so each mesh-part keeps one binding per program,
//! built the first time that program draws it.

use thiserror::Error;

use crate::backend::*;
use crate::resources::ShaderProgram;

#[derive(Error, Debug)]
pub enum BindingError {
    #[error("'{mesh}' has no attribute for input location {location} of program '{program}'")]
    UnmatchedLocation {
        mesh: String,
        program: String,
        location: u32,
    },
    #[error("'{mesh}' has {count} attributes at input location {location} of program '{program}'")]
    AmbiguousLocation {
        mesh: String,
        program: String,
        location: u32,
        count: usize,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Buffers and layout a binding is built from
#[derive(Debug, Clone, Copy)]
pub struct BindingSource<'a> {
    pub name: &'a str,
    pub layout: &'a VertexBufferLayout,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_format: IndexFormat,
}

#[derive(Debug)]
struct VertexBinding {
    program: ProgramHandle,
    handle: GpuResource<VertexBindingHandle>,
}

/// Bindings of one mesh-part, keyed by program identity
#[derive(Debug)]
pub struct VertexBindingCache {
    entries: Vec<VertexBinding>,
    queue: ReleaseQueue,
}

impl VertexBindingCache {
    pub fn new(queue: &ReleaseQueue) -> Self {
        Self {
            entries: Vec::new(),
            queue: queue.clone(),
        }
    }

    /// Return the binding for `program`, building it on first use.
    ///
    /// Every active input location of the program must match exactly one
    /// attribute of `source.layout`. A component count mismatch only warns.
    pub fn get_or_create<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        program: &ShaderProgram,
        source: &BindingSource<'_>,
    ) -> Result<VertexBindingHandle, BindingError> {
        let id = program.handle();
        if let Some(hit) = self.entries.iter().find(|e| e.program == id) {
            return Ok(hit.handle.handle());
        }

        let layout = Self::resolve(program, source).map_err(|e| {
            log::error!("{}", e);
            e
        })?;

        let handle = backend.create_vertex_binding(&VertexBindingDescriptor {
            label: Some(format!("{} / {}", source.name, program.label())),
            program: id,
            vertex_buffer: source.vertex_buffer,
            index_buffer: source.index_buffer,
            index_format: source.index_format,
            layout,
        })?;
        log::debug!(
            "Built vertex binding for '{}' with program '{}'",
            source.name,
            program.label()
        );

        self.entries.push(VertexBinding {
            program: id,
            handle: GpuResource::new(handle, &self.queue),
        });
        Ok(handle)
    }

    /// Layout restricted to the attributes the program reads
    fn resolve(
        program: &ShaderProgram,
        source: &BindingSource<'_>,
    ) -> Result<VertexBufferLayout, BindingError> {
        let mut attributes = Vec::with_capacity(program.inputs().len());
        for (location, components) in program.inputs().iter() {
            let mut matches = source.layout.attributes_at(location);
            let attribute = match (matches.next(), matches.next()) {
                (Some(attribute), None) => attribute,
                (None, _) => {
                    return Err(BindingError::UnmatchedLocation {
                        mesh: source.name.to_string(),
                        program: program.label().to_string(),
                        location,
                    })
                }
                (Some(_), Some(_)) => {
                    return Err(BindingError::AmbiguousLocation {
                        mesh: source.name.to_string(),
                        program: program.label().to_string(),
                        location,
                        count: source.layout.attributes_at(location).count(),
                    })
                }
            };

            if attribute.format.components() != components {
                log::warn!(
                    "'{}' feeds {} components to location {} of '{}', which reads {}",
                    source.name,
                    attribute.format.components(),
                    location,
                    program.label(),
                    components
                );
            }
            attributes.push(attribute.clone());
        }

        Ok(VertexBufferLayout {
            array_stride: source.layout.array_stride,
            step_mode: source.layout.step_mode,
            attributes,
        })
    }

    /// Number of programs this mesh-part has been bound for
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use crate::resources::ProgramInputs;

    struct Fixture {
        backend: HeadlessBackend,
        queue: ReleaseQueue,
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
    }

    impl Fixture {
        fn new() -> Self {
            let mut backend = HeadlessBackend::new(8, 8);
            let mut buffer = |usage| {
                backend
                    .create_buffer(&BufferDescriptor {
                        label: None,
                        size: 64,
                        usage,
                    })
                    .unwrap()
            };
            let vertex_buffer = buffer(BufferUsage::VERTEX);
            let index_buffer = buffer(BufferUsage::INDEX);
            Self {
                backend,
                queue: ReleaseQueue::new(),
                vertex_buffer,
                index_buffer,
            }
        }

        fn program(&mut self, label: &str, inputs: &[(u32, u32)]) -> ShaderProgram {
            ShaderProgram::with_inputs(
                &mut self.backend,
                &self.queue,
                &ProgramDescriptor::new(label, "// reflected elsewhere"),
                ProgramInputs::from_locations(inputs.iter().copied()),
            )
            .unwrap()
        }

        fn source<'a>(&self, layout: &'a VertexBufferLayout) -> BindingSource<'a> {
            BindingSource {
                name: "mesh",
                layout,
                vertex_buffer: self.vertex_buffer,
                index_buffer: self.index_buffer,
                index_format: IndexFormat::Uint32,
            }
        }
    }

    #[test]
    fn test_same_program_hits_cache() {
        let mut fx = Fixture::new();
        let program = fx.program("geometry", &[(0, 3), (1, 3)]);
        let layout = Vertex::layout();
        let source = fx.source(&layout);
        let mut cache = VertexBindingCache::new(&fx.queue);

        let first = cache.get_or_create(&mut fx.backend, &program, &source).unwrap();
        let second = cache.get_or_create(&mut fx.backend, &program, &source).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(fx.backend.vertex_bindings_created(), 1);
    }

    #[test]
    fn test_distinct_programs_get_distinct_bindings() {
        let mut fx = Fixture::new();
        let a = fx.program("a", &[(0, 3)]);
        let b = fx.program("b", &[(0, 3), (2, 2)]);
        let layout = Vertex::layout();
        let source = fx.source(&layout);
        let mut cache = VertexBindingCache::new(&fx.queue);

        let first = cache.get_or_create(&mut fx.backend, &a, &source).unwrap();
        let second = cache.get_or_create(&mut fx.backend, &b, &source).unwrap();
        assert_ne!(first, second);
        assert_eq!(cache.len(), 2);

        let wired = fx.backend.vertex_binding_descriptor(second).unwrap();
        let locations: Vec<u32> = wired.layout.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 2]);
        assert_eq!(wired.layout.array_stride, layout.array_stride);
    }

    #[test]
    fn test_unmatched_location_fails() {
        let mut fx = Fixture::new();
        let program = fx.program("needs-uv", &[(0, 3), (2, 2)]);
        let layout = QuadVertex::layout();
        let layout = VertexBufferLayout {
            attributes: layout.attributes[..1]
                .iter()
                .cloned()
                .chain([VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x2,
                    offset: 12,
                }])
                .collect(),
            ..layout
        };
        let source = fx.source(&layout);
        let mut cache = VertexBindingCache::new(&fx.queue);

        let err = cache
            .get_or_create(&mut fx.backend, &program, &source)
            .unwrap_err();
        assert!(matches!(err, BindingError::UnmatchedLocation { location: 2, .. }));
        assert!(cache.is_empty());
        assert_eq!(fx.backend.vertex_bindings_created(), 0);
    }

    #[test]
    fn test_ambiguous_location_fails() {
        let mut fx = Fixture::new();
        let program = fx.program("p", &[(0, 3)]);
        let mut layout = Vertex::layout();
        layout.attributes[1].location = 0;
        let source = fx.source(&layout);
        let mut cache = VertexBindingCache::new(&fx.queue);

        let err = cache
            .get_or_create(&mut fx.backend, &program, &source)
            .unwrap_err();
        assert!(matches!(
            err,
            BindingError::AmbiguousLocation {
                location: 0,
                count: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_component_mismatch_still_binds() {
        let mut fx = Fixture::new();
        let program = fx.program("wide", &[(0, 4)]);
        let layout = Vertex::layout();
        let source = fx.source(&layout);
        let mut cache = VertexBindingCache::new(&fx.queue);
        assert!(cache.get_or_create(&mut fx.backend, &program, &source).is_ok());
    }

    #[test]
    fn test_dropping_cache_releases_bindings() {
        let mut fx = Fixture::new();
        let program = fx.program("p", &[(0, 3)]);
        let layout = Vertex::layout();
        let source = fx.source(&layout);
        let mut cache = VertexBindingCache::new(&fx.queue);
        let handle = cache.get_or_create(&mut fx.backend, &program, &source).unwrap();

        drop(cache);
        fx.queue.flush(&mut fx.backend);
        assert!(fx.backend.vertex_binding_descriptor(handle).is_none());
    }
}
