// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Backend-agnostic planning for the premultiplied-alpha blit.
//!
//! A [`BlitPlan`] is everything a render backend needs to copy one image
//! view into another with a full-screen quad: which shaders to use, the
//! blend state, the quad geometry, and the layout transitions on both images.
//! Building the plan validates the extents, so the backend never records a
//! blit whose source and destination disagree.

use crate::error::InteropError;
use crate::resource::Extent3d;

/// The shader file every blit variant lives in.
pub const BLIT_SHADER_FILE: &str = "BlitPremulAlpha";
/// The vertex stage shared by all variants.
pub const BLIT_VERTEX_SHADER: &str = "BlitPremulAlpha.Vertex";

/// Interleaved quad vertices: clip-space position (x, y) then texture coordinate (u, v).
pub const QUAD_VERTICES: [[f32; 4]; 4] = [
    [-1.0, -1.0, 0.0, 0.0],
    [1.0, -1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0, 1.0],
    [1.0, 1.0, 1.0, 1.0],
];
/// Two counter-clockwise triangles covering the quad.
pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 1, 3, 2];

/// Image layouts the blit moves images through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Contents may be discarded.
    Undefined,
    /// Any access.
    General,
    /// Sampled in shaders.
    ShaderReadOnlyOptimal,
    /// Rendered to.
    ColorAttachmentOptimal,
    /// Copied from.
    TransferSrcOptimal,
    /// Copied to.
    TransferDstOptimal,
    /// Presented to a swapchain.
    PresentSrc,
}

/// One layout transition performed by a pipeline barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// The layout before the barrier.
    pub old: ImageLayout,
    /// The layout after the barrier.
    pub new: ImageLayout,
}

impl LayoutTransition {
    /// Whether the barrier actually changes the layout.
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

/// Blend factors used by the blit pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    /// `1`.
    One,
    /// `1 - src.a`.
    OneMinusSrcAlpha,
}

/// Source-over blending for premultiplied colors: `dst = src + (1 - src.a) * dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PremultipliedBlend {
    /// Factor applied to the source color.
    pub src_color: BlendFactor,
    /// Factor applied to the destination color.
    pub dst_color: BlendFactor,
    /// Factor applied to the source alpha.
    pub src_alpha: BlendFactor,
    /// Factor applied to the destination alpha.
    pub dst_alpha: BlendFactor,
}

impl Default for PremultipliedBlend {
    fn default() -> Self {
        PremultipliedBlend {
            src_color: BlendFactor::One,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::OneMinusSrcAlpha,
        }
    }
}

/// The four fragment-shader variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlitVariant {
    /// Plain 1:1 copy.
    Blit,
    /// Resolves a multisampled source.
    BlitMs,
    /// Averages `factor × factor` source texels per destination texel.
    Downscale,
    /// Downscales and resolves a multisampled source.
    DownscaleMs,
}

impl BlitVariant {
    /// Picks the variant for the MSAA and supersampling settings.
    pub fn select(use_msaa: bool, supersampling_factor: u32) -> Self {
        match (use_msaa, supersampling_factor >= 2) {
            (false, false) => BlitVariant::Blit,
            (true, false) => BlitVariant::BlitMs,
            (false, true) => BlitVariant::Downscale,
            (true, true) => BlitVariant::DownscaleMs,
        }
    }

    /// The logical id of the fragment shader implementing this variant.
    pub fn fragment_shader_id(self) -> &'static str {
        match self {
            BlitVariant::Blit => "BlitPremulAlpha.FragmentBlit",
            BlitVariant::BlitMs => "BlitPremulAlpha.FragmentBlitMS",
            BlitVariant::Downscale => "BlitPremulAlpha.FragmentBlitDownscale",
            BlitVariant::DownscaleMs => "BlitPremulAlpha.FragmentBlitDownscaleMS",
        }
    }
}

/// Knobs of a blit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlitSettings {
    /// Resolve a multisampled source.
    pub use_msaa: bool,
    /// Sample count of the source when `use_msaa` is set.
    pub num_msaa_samples: u32,
    /// Integer supersampling factor of the source (1 for none).
    pub supersampling_factor: u32,
    /// Clear the destination before drawing instead of blending over it.
    pub clear_before_render: bool,
    /// The clear color, premultiplied.
    pub clear_color: [f32; 4],
    /// Layout the source is in when the blit starts.
    pub src_initial_layout: ImageLayout,
    /// Layout the source is left in (defaults to shader-read-only).
    pub src_final_layout: Option<ImageLayout>,
    /// Layout the destination is in when the blit starts.
    pub dst_initial_layout: ImageLayout,
    /// Layout the destination is left in (defaults to color-attachment).
    pub dst_final_layout: Option<ImageLayout>,
    /// Bracket the blit with semaphores because the source is owned by the other API.
    pub ownership_transfer: bool,
}

impl Default for BlitSettings {
    fn default() -> Self {
        BlitSettings {
            use_msaa: false,
            num_msaa_samples: 1,
            supersampling_factor: 1,
            clear_before_render: true,
            clear_color: [0.0; 4],
            src_initial_layout: ImageLayout::ShaderReadOnlyOptimal,
            src_final_layout: None,
            dst_initial_layout: ImageLayout::Undefined,
            dst_final_layout: None,
            ownership_transfer: false,
        }
    }
}

/// Push-constant block consumed by the blit fragment shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct BlitPushConstants {
    /// Supersampling factor.
    pub supersampling_factor: i32,
    /// MSAA sample count.
    pub num_samples: i32,
}

/// A validated blit, ready to be recorded by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BlitPlan {
    /// The fragment-shader variant.
    pub variant: BlitVariant,
    /// Logical id of the vertex shader.
    pub vertex_shader_id: &'static str,
    /// Logical id of the fragment shader.
    pub fragment_shader_id: &'static str,
    /// Blend state.
    pub blend: PremultipliedBlend,
    /// Source extent.
    pub src_extent: Extent3d,
    /// Destination extent (also the viewport).
    pub dst_extent: Extent3d,
    /// Barrier moving the source into a sampleable layout.
    pub src_transition: LayoutTransition,
    /// Barrier moving the destination into a renderable layout.
    pub dst_transition: LayoutTransition,
    /// Barrier restoring the source afterwards.
    pub src_release: LayoutTransition,
    /// Barrier leaving the destination in its final layout.
    pub dst_release: LayoutTransition,
    /// Clear color when the destination is cleared first.
    pub clear_color: Option<[f32; 4]>,
    /// Push constants for the fragment shader.
    pub push_constants: BlitPushConstants,
    /// Whether semaphores bracket the blit.
    pub ownership_transfer: bool,
}

impl BlitPlan {
    /// Validates the extents and settings and builds the plan.
    ///
    /// # Errors
    /// Returns a precondition error when the source is not exactly the
    /// destination scaled by the supersampling factor, when the factor is
    /// zero or does not fit the shader's signed push constant, or when MSAA
    /// is requested with an invalid sample count.
    pub fn new(
        src_extent: Extent3d,
        dst_extent: Extent3d,
        settings: &BlitSettings,
    ) -> Result<Self, InteropError> {
        let factor = settings.supersampling_factor;
        if factor == 0 {
            return Err(InteropError::precondition(
                "supersampling factor must be at least 1",
            ));
        }
        let shader_factor = i32::try_from(factor).map_err(|_| {
            InteropError::precondition(format!(
                "supersampling factor {factor} exceeds the shader limit of {}",
                i32::MAX
            ))
        })?;
        let shader_samples = if settings.use_msaa {
            let samples = settings.num_msaa_samples;
            if samples < 2 || !samples.is_power_of_two() {
                return Err(InteropError::precondition(format!(
                    "MSAA blit needs a power-of-two sample count >= 2, got {samples}"
                )));
            }
            i32::try_from(samples).map_err(|_| {
                InteropError::precondition(format!("MSAA sample count {samples} exceeds the shader limit"))
            })?
        } else {
            1
        };
        let expected_w = dst_extent.width.checked_mul(factor);
        let expected_h = dst_extent.height.checked_mul(factor);
        if expected_w != Some(src_extent.width) || expected_h != Some(src_extent.height) {
            return Err(InteropError::precondition(format!(
                "blit source is {}x{} but destination {}x{} with supersampling factor {factor} needs {}x{}",
                src_extent.width,
                src_extent.height,
                dst_extent.width,
                dst_extent.height,
                u64::from(dst_extent.width) * u64::from(factor),
                u64::from(dst_extent.height) * u64::from(factor),
            )));
        }

        let variant = BlitVariant::select(settings.use_msaa, factor);
        let dst_old = if settings.clear_before_render {
            ImageLayout::Undefined
        } else {
            settings.dst_initial_layout
        };
        let src_final = settings
            .src_final_layout
            .unwrap_or(ImageLayout::ShaderReadOnlyOptimal);
        let dst_final = settings
            .dst_final_layout
            .unwrap_or(ImageLayout::ColorAttachmentOptimal);

        Ok(BlitPlan {
            variant,
            vertex_shader_id: BLIT_VERTEX_SHADER,
            fragment_shader_id: variant.fragment_shader_id(),
            blend: PremultipliedBlend::default(),
            src_extent,
            dst_extent,
            src_transition: LayoutTransition {
                old: settings.src_initial_layout,
                new: ImageLayout::ShaderReadOnlyOptimal,
            },
            dst_transition: LayoutTransition {
                old: dst_old,
                new: ImageLayout::ColorAttachmentOptimal,
            },
            src_release: LayoutTransition {
                old: ImageLayout::ShaderReadOnlyOptimal,
                new: src_final,
            },
            dst_release: LayoutTransition {
                old: ImageLayout::ColorAttachmentOptimal,
                new: dst_final,
            },
            clear_color: settings
                .clear_before_render
                .then_some(settings.clear_color),
            push_constants: BlitPushConstants {
                supersampling_factor: shader_factor,
                num_samples: shader_samples,
            },
            ownership_transfer: settings.ownership_transfer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn selects_variant_from_msaa_and_supersampling() {
        assert_eq!(BlitVariant::select(false, 1), BlitVariant::Blit);
        assert_eq!(BlitVariant::select(true, 1), BlitVariant::BlitMs);
        assert_eq!(BlitVariant::select(false, 2), BlitVariant::Downscale);
        assert_eq!(BlitVariant::select(true, 4), BlitVariant::DownscaleMs);
        assert_eq!(
            BlitVariant::DownscaleMs.fragment_shader_id(),
            "BlitPremulAlpha.FragmentBlitDownscaleMS"
        );
    }

    #[test]
    fn supersampled_extent_must_match() {
        let settings = BlitSettings {
            supersampling_factor: 2,
            ..Default::default()
        };
        let plan = BlitPlan::new(Extent3d::new_2d(200, 100), Extent3d::new_2d(100, 50), &settings)
            .unwrap();
        assert_eq!(plan.variant, BlitVariant::Downscale);
        assert_eq!(plan.push_constants.supersampling_factor, 2);

        let err = BlitPlan::new(Extent3d::new_2d(200, 100), Extent3d::new_2d(100, 51), &settings)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn factor_beyond_signed_range_is_rejected_not_truncated() {
        // --- Arrange ---
        let factor = i32::MAX as u32 + 1;
        let settings = BlitSettings {
            supersampling_factor: factor,
            ..Default::default()
        };

        // --- Act ---
        let err = BlitPlan::new(Extent3d::new_2d(factor, factor), Extent3d::new_2d(1, 1), &settings)
            .unwrap_err();

        // --- Assert ---
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(err.to_string().contains("2147483648"), "{err}");
    }

    #[test]
    fn largest_signed_factor_is_kept_exactly() {
        let settings = BlitSettings {
            supersampling_factor: i32::MAX as u32,
            ..Default::default()
        };
        let plan = BlitPlan::new(
            Extent3d::new_2d(i32::MAX as u32, i32::MAX as u32),
            Extent3d::new_2d(1, 1),
            &settings,
        )
        .unwrap();
        assert_eq!(plan.push_constants.supersampling_factor, i32::MAX);
    }

    #[test]
    fn default_transitions() {
        let plan = BlitPlan::new(
            Extent3d::new_2d(8, 8),
            Extent3d::new_2d(8, 8),
            &BlitSettings::default(),
        )
        .unwrap();
        assert_eq!(plan.src_transition.new, ImageLayout::ShaderReadOnlyOptimal);
        assert!(plan.src_transition.is_noop());
        assert_eq!(plan.dst_transition.old, ImageLayout::Undefined);
        assert_eq!(plan.dst_transition.new, ImageLayout::ColorAttachmentOptimal);
        assert_eq!(plan.clear_color, Some([0.0; 4]));
        assert_eq!(plan.blend.dst_color, BlendFactor::OneMinusSrcAlpha);
    }

    #[test]
    fn caller_layouts_are_honored_without_clear() {
        let settings = BlitSettings {
            clear_before_render: false,
            src_initial_layout: ImageLayout::General,
            src_final_layout: Some(ImageLayout::General),
            dst_initial_layout: ImageLayout::TransferDstOptimal,
            dst_final_layout: Some(ImageLayout::PresentSrc),
            ..Default::default()
        };
        let plan = BlitPlan::new(Extent3d::new_2d(4, 4), Extent3d::new_2d(4, 4), &settings).unwrap();
        assert_eq!(plan.src_transition.old, ImageLayout::General);
        assert_eq!(plan.src_release.new, ImageLayout::General);
        assert_eq!(plan.dst_transition.old, ImageLayout::TransferDstOptimal);
        assert_eq!(plan.dst_release.new, ImageLayout::PresentSrc);
        assert_eq!(plan.clear_color, None);
    }

    #[test]
    fn msaa_needs_valid_sample_count() {
        let settings = BlitSettings {
            use_msaa: true,
            num_msaa_samples: 3,
            ..Default::default()
        };
        assert!(BlitPlan::new(Extent3d::new_2d(4, 4), Extent3d::new_2d(4, 4), &settings).is_err());
    }

    #[test]
    fn quad_is_two_triangles() {
        assert_eq!(QUAD_VERTICES.len(), 4);
        assert_eq!(QUAD_INDICES.len(), 6);
        assert!(QUAD_INDICES.iter().all(|i| (*i as usize) < QUAD_VERTICES.len()));
    }
}
