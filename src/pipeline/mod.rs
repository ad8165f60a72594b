//! Deferred frame pipeline
//!
//! A frame walks a fixed sequence of states:
//! 1. Pack parameters - camera, lights and per-entity matrices are streamed
//!    into the parameter region
//! 2. Geometry pass - entities are rasterized into the G-buffer
//! 3. Composite pass - a full-surface quad shades the G-buffer onto the
//!    surface, then the G-buffer depth is copied into the surface depth
//! 4. Overlay pass - light gizmos are drawn depth-tested against the scene
//! 5. Present
//!
//! In [`FrameMode::Forward`] the geometry and composite passes are replaced by
//! a single forward pass drawing straight to the surface.

pub mod composite_pass;
pub mod forward_pass;
pub mod geometry_pass;
pub mod overlay_pass;
pub mod params;

pub use composite_pass::CompositePass;
pub use forward_pass::ForwardPass;
pub use geometry_pass::{GeometryPass, FAR_DEPTH};
pub use overlay_pass::OverlayPass;
pub use params::*;

use crate::backend::TextureFormat;
use crate::error::RenderError;
use crate::resources::RenderTargetDescriptor;

/// Uniform slot of the global (camera + lights) block
pub const GLOBAL_PARAMS_SLOT: u32 = 0;
/// Uniform slot of the per-entity block, also used for gizmo blocks
pub const LOCAL_PARAMS_SLOT: u32 = 1;
/// Uniform slot of the composite settings block
pub const COMPOSITE_PARAMS_SLOT: u32 = 2;

/// Texture unit the geometry pass samples material albedo from
pub const ALBEDO_UNIT: u32 = 0;

/// G-buffer color slots, in attachment order
pub const GBUFFER_POSITION_SLOT: usize = 0;
pub const GBUFFER_NORMAL_SLOT: usize = 1;
pub const GBUFFER_ALBEDO_SLOT: usize = 2;
pub const GBUFFER_COLOR_SLOTS: usize = 3;

/// Layout of the G-buffer at the given size
pub fn gbuffer_descriptor(width: u32, height: u32) -> RenderTargetDescriptor {
    RenderTargetDescriptor {
        label: "G-Buffer".to_string(),
        color_formats: vec![
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba8Unorm,
        ],
        depth_format: Some(TextureFormat::Depth32Float),
        width,
        height,
    }
}

/// Where the orchestrator is within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameState {
    #[default]
    Idle,
    PackParams,
    GeometryPass,
    CompositePass,
    ForwardPass,
    OverlayPass,
    Presented,
}

impl FrameState {
    /// Whether `next` may directly follow `self`
    pub fn can_advance_to(self, next: FrameState) -> bool {
        use FrameState::*;
        matches!(
            (self, next),
            (Idle, PackParams)
                | (PackParams, GeometryPass)
                | (PackParams, ForwardPass)
                | (GeometryPass, CompositePass)
                | (CompositePass, OverlayPass)
                | (ForwardPass, OverlayPass)
                | (OverlayPass, Presented)
                | (Presented, Idle)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameState::Idle => "Idle",
            FrameState::PackParams => "PackParams",
            FrameState::GeometryPass => "GeometryPass",
            FrameState::CompositePass => "CompositePass",
            FrameState::ForwardPass => "ForwardPass",
            FrameState::OverlayPass => "OverlayPass",
            FrameState::Presented => "Presented",
        }
    }
}

impl std::fmt::Display for FrameState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Tracks the current [`FrameState`] and rejects illegal transitions
#[derive(Debug, Clone, Default)]
pub struct FrameSequence {
    state: FrameState,
    visited: Vec<FrameState>,
}

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// States entered since the last [`reset`](Self::reset), in order
    pub fn visited(&self) -> &[FrameState] {
        &self.visited
    }

    pub fn advance(&mut self, next: FrameState) -> Result<(), RenderError> {
        if !self.state.can_advance_to(next) {
            log::error!("Illegal frame transition {} -> {}", self.state, next);
            return Err(RenderError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        log::trace!("Frame state {} -> {}", self.state, next);
        self.state = next;
        self.visited.push(next);
        Ok(())
    }

    /// Drop back to [`FrameState::Idle`], returning the states visited
    pub fn reset(&mut self) -> Vec<FrameState> {
        self.state = FrameState::Idle;
        std::mem::take(&mut self.visited)
    }
}

/// What the composite pass writes to the surface
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderMode {
    /// Lit result
    #[default]
    Final = 0,
    Positions = 1,
    Normals = 2,
    Albedo = 3,
    Depth = 4,
}

impl RenderMode {
    pub const ALL: [RenderMode; 5] = [
        RenderMode::Final,
        RenderMode::Positions,
        RenderMode::Normals,
        RenderMode::Albedo,
        RenderMode::Depth,
    ];

    /// Cycle to the following mode, wrapping around
    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|&m| m == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Which pass sequence a frame runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameMode {
    #[default]
    Deferred,
    Forward,
}

impl FrameMode {
    pub fn toggle(self) -> Self {
        match self {
            FrameMode::Deferred => FrameMode::Forward,
            FrameMode::Forward => FrameMode::Deferred,
        }
    }

    /// The state entered after parameters are packed
    pub fn first_pass(self) -> FrameState {
        match self {
            FrameMode::Deferred => FrameState::GeometryPass,
            FrameMode::Forward => FrameState::ForwardPass,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferred_sequence_is_legal() {
        use FrameState::*;
        let sequence = [
            Idle,
            PackParams,
            GeometryPass,
            CompositePass,
            OverlayPass,
            Presented,
            Idle,
        ];
        assert!(sequence.windows(2).all(|w| w[0].can_advance_to(w[1])));
    }

    #[test]
    fn test_forward_sequence_is_legal() {
        use FrameState::*;
        let sequence = [Idle, PackParams, ForwardPass, OverlayPass, Presented, Idle];
        assert!(sequence.windows(2).all(|w| w[0].can_advance_to(w[1])));
    }

    #[test]
    fn test_skipping_states_is_illegal() {
        use FrameState::*;
        assert!(!Idle.can_advance_to(GeometryPass));
        assert!(!PackParams.can_advance_to(CompositePass));
        assert!(!GeometryPass.can_advance_to(OverlayPass));
        assert!(!ForwardPass.can_advance_to(CompositePass));
        assert!(!Presented.can_advance_to(PackParams));
        assert!(!Idle.can_advance_to(Idle));
    }

    #[test]
    fn test_sequence_rejects_out_of_order_states() {
        let mut sequence = FrameSequence::new();
        sequence.advance(FrameState::PackParams).unwrap();
        let err = sequence.advance(FrameState::OverlayPass).unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidTransition {
                from: FrameState::PackParams,
                to: FrameState::OverlayPass,
            }
        ));
        assert_eq!(sequence.state(), FrameState::PackParams);

        assert_eq!(sequence.reset(), vec![FrameState::PackParams]);
        assert_eq!(sequence.state(), FrameState::Idle);
        assert!(sequence.visited().is_empty());
    }

    #[test]
    fn test_render_mode_cycles() {
        assert_eq!(RenderMode::Final.next(), RenderMode::Positions);
        assert_eq!(RenderMode::Depth.next(), RenderMode::Final);
        assert_eq!(RenderMode::Albedo.as_u32(), 3);
    }

    #[test]
    fn test_gbuffer_layout() {
        let desc = gbuffer_descriptor(800, 600);
        assert_eq!(desc.color_formats.len(), GBUFFER_COLOR_SLOTS);
        assert_eq!(
            desc.color_formats[GBUFFER_ALBEDO_SLOT],
            TextureFormat::Rgba8Unorm
        );
        assert_eq!(desc.depth_format, Some(TextureFormat::Depth32Float));
    }
}
