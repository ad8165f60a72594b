//! Shader programs and their reflected vertex inputs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

use crate::backend::*;

#[derive(Error, Debug)]
pub enum ProgramError {
    #[error("Failed to parse '{label}':\n{message}")]
    Parse { label: String, message: String },
    #[error("'{label}' has no vertex entry point named '{entry}'")]
    MissingEntryPoint { label: String, entry: String },
    #[error("Failed to read shader '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Active vertex input locations of a program and their component counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramInputs(BTreeMap<u32, u32>);

impl ProgramInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(location, components)` pairs
    pub fn from_locations(locations: impl IntoIterator<Item = (u32, u32)>) -> Self {
        Self(locations.into_iter().collect())
    }

    /// Reflect the inputs of the vertex entry point `entry` in WGSL `source`
    pub fn reflect(label: &str, source: &str, entry: &str) -> Result<Self, ProgramError> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| ProgramError::Parse {
            label: label.to_string(),
            message: e.emit_to_string(source),
        })?;

        let entry_point = module
            .entry_points
            .iter()
            .find(|ep| ep.stage == naga::ShaderStage::Vertex && ep.name == entry)
            .ok_or_else(|| ProgramError::MissingEntryPoint {
                label: label.to_string(),
                entry: entry.to_string(),
            })?;

        let components = |ty: naga::Handle<naga::Type>| match &module.types[ty].inner {
            naga::TypeInner::Scalar(_) => 1,
            naga::TypeInner::Vector { size, .. } => *size as u32,
            _ => 0,
        };

        let mut inputs = BTreeMap::new();
        for argument in &entry_point.function.arguments {
            match &argument.binding {
                Some(naga::Binding::Location { location, .. }) => {
                    inputs.insert(*location, components(argument.ty));
                }
                Some(naga::Binding::BuiltIn(_)) => {}
                None => {
                    if let naga::TypeInner::Struct { members, .. } = &module.types[argument.ty].inner
                    {
                        for member in members {
                            if let Some(naga::Binding::Location { location, .. }) = &member.binding
                            {
                                inputs.insert(*location, components(member.ty));
                            }
                        }
                    }
                }
            }
        }

        Ok(Self(inputs))
    }

    pub fn locations(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.keys().copied()
    }

    /// Component count the program expects at `location`
    pub fn components(&self, location: u32) -> Option<u32> {
        self.0.get(&location).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.0.iter().map(|(&l, &c)| (l, c))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A linked program together with its active vertex inputs
#[derive(Debug)]
pub struct ShaderProgram {
    handle: GpuResource<ProgramHandle>,
    label: String,
    inputs: ProgramInputs,
    source_path: Option<PathBuf>,
    modified: Option<SystemTime>,
}

impl ShaderProgram {
    /// Reflect the vertex inputs of `desc.source` and link the program
    pub fn compile<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
        desc: &ProgramDescriptor,
    ) -> Result<Self, ProgramError> {
        let inputs = ProgramInputs::reflect(&desc.label, &desc.source, &desc.vertex_entry)
            .map_err(|e| {
                log::error!("{}", e);
                e
            })?;
        Self::with_inputs(backend, queue, desc, inputs)
    }

    /// Link a program whose inputs were reflected elsewhere
    pub fn with_inputs<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
        desc: &ProgramDescriptor,
        inputs: ProgramInputs,
    ) -> Result<Self, ProgramError> {
        let handle = backend.create_program(desc).map_err(|e| {
            log::error!("{}", e);
            e
        })?;
        log::debug!(
            "Linked program '{}' with input locations {:?}",
            desc.label,
            inputs.locations().collect::<Vec<_>>()
        );
        Ok(Self {
            handle: GpuResource::new(handle, queue),
            label: desc.label.clone(),
            inputs,
            source_path: None,
            modified: None,
        })
    }

    /// Load the WGSL source from `path`, recording its modification time.
    ///
    /// `desc.source` is replaced by the file contents.
    pub fn from_file<B: GraphicsBackend, P: AsRef<Path>>(
        backend: &mut B,
        queue: &ReleaseQueue,
        path: P,
        desc: &ProgramDescriptor,
    ) -> Result<Self, ProgramError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ProgramError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();

        let desc = ProgramDescriptor {
            source,
            ..desc.clone()
        };
        let mut program = Self::compile(backend, queue, &desc)?;
        program.source_path = Some(path.to_path_buf());
        program.modified = modified;
        Ok(program)
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle.handle()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn inputs(&self) -> &ProgramInputs {
        &self.inputs
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Modification time of the source file when it was loaded
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    const STRUCT_INPUTS: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @builtin(vertex_index) vertex_id: u32,
}

@vertex
fn vs_main(in: VertexInput) -> @builtin(position) vec4<f32> {
    return vec4<f32>(in.position + vec3<f32>(in.uv, 0.0), 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;

    const BARE_INPUTS: &str = r#"
@vertex
fn vs_main(@location(0) position: vec4<f32>, @location(3) weight: f32) -> @builtin(position) vec4<f32> {
    return position * weight;
}
"#;

    #[test]
    fn test_reflects_struct_members() {
        let inputs = ProgramInputs::reflect("struct", STRUCT_INPUTS, "vs_main").unwrap();
        assert_eq!(inputs.iter().collect::<Vec<_>>(), vec![(0, 3), (2, 2)]);
    }

    #[test]
    fn test_reflects_bare_arguments() {
        let inputs = ProgramInputs::reflect("bare", BARE_INPUTS, "vs_main").unwrap();
        assert_eq!(inputs.components(0), Some(4));
        assert_eq!(inputs.components(3), Some(1));
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn test_parse_error_carries_diagnostic() {
        let err = ProgramInputs::reflect("broken", "fn vs_main( {", "vs_main").unwrap_err();
        match err {
            ProgramError::Parse { label, message } => {
                assert_eq!(label, "broken");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_entry_point() {
        let err = ProgramInputs::reflect("bare", BARE_INPUTS, "main").unwrap_err();
        assert!(matches!(err, ProgramError::MissingEntryPoint { .. }));
    }

    #[test]
    fn test_compile_links_program() {
        let mut backend = HeadlessBackend::new(8, 8);
        let queue = ReleaseQueue::new();
        let program = ShaderProgram::compile(
            &mut backend,
            &queue,
            &ProgramDescriptor::new("struct", STRUCT_INPUTS),
        )
        .unwrap();
        assert!(backend.program_descriptor(program.handle()).is_some());
        assert_eq!(program.inputs().len(), 2);
        assert!(program.modified().is_none());
    }
}
