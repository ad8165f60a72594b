//! Renderer error type

use thiserror::Error;

use crate::backend::BackendError;
use crate::pipeline::FrameState;
use crate::resources::{BindingError, ProgramError, RenderTargetError, StreamError, TextureError};

/// Everything that can abort renderer setup or a frame
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Parameter stream: {0}")]
    Stream(#[from] StreamError),
    #[error("Render target: {0}")]
    RenderTarget(#[from] RenderTargetError),
    #[error("Vertex binding: {0}")]
    Binding(#[from] BindingError),
    #[error("Program: {0}")]
    Program(#[from] ProgramError),
    #[error("Texture: {0}")]
    Texture(#[from] TextureError),
    #[error("Entity references unknown model {0}")]
    UnknownModel(usize),
    #[error("Illegal frame transition {from:?} -> {to:?}")]
    InvalidTransition { from: FrameState, to: FrameState },
    #[error("Renderer has been shut down")]
    ShutDown,
}

pub type RenderResult<T> = Result<T, RenderError>;
