//! Resource management
//!
//! GPU-side resources the frame pipeline draws with: parameter regions,
//! render targets, programs, mesh-parts with their vertex bindings, materials
//! and textures. Every type here owns its backend handles through
//! [`GpuResource`](crate::backend::GpuResource).

mod material;
mod mesh;
mod program;
mod render_target;
mod stream_writer;
mod texture;
mod vertex_binding;

pub use material::*;
pub use mesh::*;
pub use program::*;
pub use render_target::*;
pub use stream_writer::*;
pub use texture::*;
pub use vertex_binding::*;
