//! Backend abstraction layer
//!
//! Provides the handle-based command interface that both the wgpu backend and
//! the headless recording backend implement, plus owned handles that release
//! their backend resource exactly once.

pub mod headless;
pub mod release;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use release::{BackendHandle, GpuResource, Release, ReleaseQueue};
pub use traits::*;
pub use types::*;

/// Check a set of attachments, given as `(format, width, height)`, for
/// completeness against the device limits.
pub(crate) fn validate_framebuffer(
    colors: &[(TextureFormat, u32, u32)],
    depth: Option<(TextureFormat, u32, u32)>,
    limits: &DeviceLimits,
) -> FramebufferStatus {
    if colors.is_empty() && depth.is_none() {
        return FramebufferStatus::Incomplete("no attachments".to_string());
    }
    if colors.len() > limits.max_color_attachments as usize {
        return FramebufferStatus::Incomplete(format!(
            "{} color attachments exceed the device maximum of {}",
            colors.len(),
            limits.max_color_attachments
        ));
    }
    if let Some((i, _)) = colors.iter().enumerate().find(|(_, c)| c.0.is_depth()) {
        return FramebufferStatus::Incomplete(format!("color attachment {} has a depth format", i));
    }
    if let Some((format, _, _)) = depth {
        if !format.is_depth() {
            return FramebufferStatus::Incomplete(format!(
                "depth attachment has color format {:?}",
                format
            ));
        }
    }

    let mut sizes = colors
        .iter()
        .chain(depth.iter())
        .map(|&(_, w, h)| (w, h));
    let first = sizes.next();
    match first {
        Some(size) if sizes.all(|s| s == size) => FramebufferStatus::Complete,
        _ => FramebufferStatus::Incomplete("attachment sizes differ".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_attachments_are_complete() {
        let limits = DeviceLimits::default();
        let status = validate_framebuffer(
            &[
                (TextureFormat::Rgba16Float, 64, 32),
                (TextureFormat::Rgba8Unorm, 64, 32),
            ],
            Some((TextureFormat::Depth32Float, 64, 32)),
            &limits,
        );
        assert_eq!(status, FramebufferStatus::Complete);
    }

    #[test]
    fn test_too_many_color_attachments() {
        let limits = DeviceLimits {
            max_color_attachments: 2,
            ..Default::default()
        };
        let colors = [(TextureFormat::Rgba8Unorm, 8, 8); 3];
        assert!(!validate_framebuffer(&colors, None, &limits).is_complete());
    }

    #[test]
    fn test_depth_format_in_color_slot() {
        let status = validate_framebuffer(
            &[(TextureFormat::Depth32Float, 8, 8)],
            None,
            &DeviceLimits::default(),
        );
        assert!(!status.is_complete());
    }
}
