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

use ash::vk;
use tandem_core::blit::{BlendFactor, ImageLayout};
use tandem_core::resource::{BufferUsage, Extent3d, ImageFormat, ImageUsage};
use tandem_core::shader::module::BindingKind;
use tandem_core::shader::stage::{ShaderStage, StageMask};
use tandem_core::InteropError;

/// A local extension trait to convert core types into `ash` types.
/// This avoids Rust's orphan rules while keeping an idiomatic `.into_vk()` syntax.
pub trait IntoVulkan<T> {
    /// Consumes self and converts it into a Vulkan type.
    fn into_vk(self) -> T;
}

// --- Formats and extents ---

impl IntoVulkan<vk::Format> for ImageFormat {
    fn into_vk(self) -> vk::Format {
        match self {
            ImageFormat::R8Unorm => vk::Format::R8_UNORM,
            ImageFormat::Rg8Unorm => vk::Format::R8G8_UNORM,
            ImageFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            ImageFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            ImageFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            ImageFormat::R16Sfloat => vk::Format::R16_SFLOAT,
            ImageFormat::Rgba16Sfloat => vk::Format::R16G16B16A16_SFLOAT,
            ImageFormat::R32Sfloat => vk::Format::R32_SFLOAT,
            ImageFormat::Rg32Sfloat => vk::Format::R32G32_SFLOAT,
            ImageFormat::Rgba32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
            ImageFormat::R32Uint => vk::Format::R32_UINT,
            ImageFormat::Rgba32Uint => vk::Format::R32G32B32A32_UINT,
            ImageFormat::R32Sint => vk::Format::R32_SINT,
            ImageFormat::Bc6hUfloat => vk::Format::BC6H_UFLOAT_BLOCK,
            ImageFormat::Bc6hSfloat => vk::Format::BC6H_SFLOAT_BLOCK,
        }
    }
}

impl IntoVulkan<vk::Extent3D> for Extent3d {
    fn into_vk(self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }
}

impl IntoVulkan<vk::Extent2D> for Extent3d {
    fn into_vk(self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

// --- Usages ---

impl IntoVulkan<vk::BufferUsageFlags> for BufferUsage {
    fn into_vk(self) -> vk::BufferUsageFlags {
        let mut flags = vk::BufferUsageFlags::empty();
        for (ours, theirs) in [
            (BufferUsage::TRANSFER_SRC, vk::BufferUsageFlags::TRANSFER_SRC),
            (BufferUsage::TRANSFER_DST, vk::BufferUsageFlags::TRANSFER_DST),
            (BufferUsage::UNIFORM, vk::BufferUsageFlags::UNIFORM_BUFFER),
            (BufferUsage::STORAGE, vk::BufferUsageFlags::STORAGE_BUFFER),
            (BufferUsage::VERTEX, vk::BufferUsageFlags::VERTEX_BUFFER),
            (BufferUsage::INDEX, vk::BufferUsageFlags::INDEX_BUFFER),
        ] {
            if self.contains(ours) {
                flags |= theirs;
            }
        }
        flags
    }
}

/// `LINEAR` selects the tiling, not a usage bit, and is ignored here.
impl IntoVulkan<vk::ImageUsageFlags> for ImageUsage {
    fn into_vk(self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        for (ours, theirs) in [
            (ImageUsage::TRANSFER_SRC, vk::ImageUsageFlags::TRANSFER_SRC),
            (ImageUsage::TRANSFER_DST, vk::ImageUsageFlags::TRANSFER_DST),
            (ImageUsage::SAMPLED, vk::ImageUsageFlags::SAMPLED),
            (ImageUsage::STORAGE, vk::ImageUsageFlags::STORAGE),
            (
                ImageUsage::COLOR_ATTACHMENT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ),
        ] {
            if self.contains(ours) {
                flags |= theirs;
            }
        }
        flags
    }
}

// --- Blit state ---

impl IntoVulkan<vk::ImageLayout> for ImageLayout {
    fn into_vk(self) -> vk::ImageLayout {
        match self {
            ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
            ImageLayout::General => vk::ImageLayout::GENERAL,
            ImageLayout::ShaderReadOnlyOptimal => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageLayout::ColorAttachmentOptimal => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageLayout::TransferSrcOptimal => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageLayout::TransferDstOptimal => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

impl IntoVulkan<vk::BlendFactor> for BlendFactor {
    fn into_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        }
    }
}

// --- Shader interface ---

impl IntoVulkan<vk::DescriptorType> for BindingKind {
    fn into_vk(self) -> vk::DescriptorType {
        match self {
            BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindingKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            BindingKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            BindingKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            BindingKind::Sampler => vk::DescriptorType::SAMPLER,
            BindingKind::AccelerationStructure => {
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
            }
        }
    }
}

impl IntoVulkan<vk::ShaderStageFlags> for StageMask {
    fn into_vk(self) -> vk::ShaderStageFlags {
        let mut flags = vk::ShaderStageFlags::empty();
        for (ours, theirs) in [
            (StageMask::VERTEX, vk::ShaderStageFlags::VERTEX),
            (
                StageMask::TESSELATION_CONTROL,
                vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ),
            (
                StageMask::TESSELATION_EVALUATION,
                vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            ),
            (StageMask::GEOMETRY, vk::ShaderStageFlags::GEOMETRY),
            (StageMask::FRAGMENT, vk::ShaderStageFlags::FRAGMENT),
            (StageMask::COMPUTE, vk::ShaderStageFlags::COMPUTE),
            (StageMask::TASK, vk::ShaderStageFlags::TASK_EXT),
            (StageMask::MESH, vk::ShaderStageFlags::MESH_EXT),
            (StageMask::RAYGEN, vk::ShaderStageFlags::RAYGEN_KHR),
            (StageMask::ANY_HIT, vk::ShaderStageFlags::ANY_HIT_KHR),
            (StageMask::CLOSEST_HIT, vk::ShaderStageFlags::CLOSEST_HIT_KHR),
            (StageMask::MISS, vk::ShaderStageFlags::MISS_KHR),
            (StageMask::INTERSECTION, vk::ShaderStageFlags::INTERSECTION_KHR),
            (StageMask::CALLABLE, vk::ShaderStageFlags::CALLABLE_KHR),
        ] {
            if self.contains(ours) {
                flags |= theirs;
            }
        }
        flags
    }
}

impl IntoVulkan<vk::ShaderStageFlags> for ShaderStage {
    fn into_vk(self) -> vk::ShaderStageFlags {
        self.mask().into_vk()
    }
}

/// Maps an MSAA sample count onto the Vulkan flag.
///
/// ## Errors
/// * `InteropError::Precondition` - If `samples` is not a power of two in `1..=64`.
pub fn sample_count(samples: u32) -> Result<vk::SampleCountFlags, InteropError> {
    match samples {
        1 => Ok(vk::SampleCountFlags::TYPE_1),
        2 => Ok(vk::SampleCountFlags::TYPE_2),
        4 => Ok(vk::SampleCountFlags::TYPE_4),
        8 => Ok(vk::SampleCountFlags::TYPE_8),
        16 => Ok(vk::SampleCountFlags::TYPE_16),
        32 => Ok(vk::SampleCountFlags::TYPE_32),
        64 => Ok(vk::SampleCountFlags::TYPE_64),
        other => Err(InteropError::precondition(format!(
            "{other} is not a valid sample count"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bc6h_keeps_its_block_format() {
        let format: vk::Format = ImageFormat::Bc6hUfloat.into_vk();
        assert_eq!(format, vk::Format::BC6H_UFLOAT_BLOCK);
    }

    #[test]
    fn linear_is_not_a_usage_bit() {
        let usage: vk::ImageUsageFlags = (ImageUsage::SAMPLED | ImageUsage::LINEAR).into_vk();
        assert_eq!(usage, vk::ImageUsageFlags::SAMPLED);
    }

    #[test]
    fn stage_masks_combine() {
        let flags: vk::ShaderStageFlags = (StageMask::VERTEX | StageMask::FRAGMENT).into_vk();
        assert_eq!(
            flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn odd_sample_counts_are_rejected() {
        assert!(sample_count(3).is_err());
        assert_eq!(sample_count(4).unwrap(), vk::SampleCountFlags::TYPE_4);
    }
}
