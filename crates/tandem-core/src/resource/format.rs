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

//! Image formats shared between APIs and the block-compressed alias rule.

use super::desc::Extent3d;
use crate::error::InteropError;

/// The scalar type of one image channel, as the compute API's array formats see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    /// Unsigned 8-bit.
    U8,
    /// Unsigned 16-bit.
    U16,
    /// Unsigned 32-bit.
    U32,
    /// Signed 8-bit.
    S8,
    /// Signed 16-bit.
    S16,
    /// Signed 32-bit.
    S32,
    /// IEEE half float.
    Half,
    /// IEEE single float.
    Float,
}

/// The image formats the interop layer can allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// One 8-bit normalized channel.
    R8Unorm,
    /// Two 8-bit normalized channels.
    Rg8Unorm,
    /// Four 8-bit normalized channels.
    Rgba8Unorm,
    /// Four 8-bit sRGB channels.
    Rgba8Srgb,
    /// Four 8-bit normalized channels, BGRA order.
    Bgra8Unorm,
    /// One 16-bit float channel.
    R16Sfloat,
    /// Four 16-bit float channels.
    Rgba16Sfloat,
    /// One 32-bit float channel.
    R32Sfloat,
    /// Two 32-bit float channels.
    Rg32Sfloat,
    /// Four 32-bit float channels.
    Rgba32Sfloat,
    /// One 32-bit unsigned integer channel.
    R32Uint,
    /// Four 32-bit unsigned integer channels.
    Rgba32Uint,
    /// One 32-bit signed integer channel.
    R32Sint,
    /// BC6H unsigned half-float, 4×4 blocks of 16 bytes.
    Bc6hUfloat,
    /// BC6H signed half-float, 4×4 blocks of 16 bytes.
    Bc6hSfloat,
}

impl ImageFormat {
    /// Bytes per texel, or per block for compressed formats.
    pub fn block_size(self) -> u32 {
        match self {
            ImageFormat::R8Unorm => 1,
            ImageFormat::Rg8Unorm | ImageFormat::R16Sfloat => 2,
            ImageFormat::Rgba8Unorm
            | ImageFormat::Rgba8Srgb
            | ImageFormat::Bgra8Unorm
            | ImageFormat::R32Sfloat
            | ImageFormat::R32Uint
            | ImageFormat::R32Sint => 4,
            ImageFormat::Rgba16Sfloat | ImageFormat::Rg32Sfloat => 8,
            ImageFormat::Rgba32Sfloat
            | ImageFormat::Rgba32Uint
            | ImageFormat::Bc6hUfloat
            | ImageFormat::Bc6hSfloat => 16,
        }
    }

    /// Block width and height in texels (1×1 for uncompressed formats).
    pub fn block_extent(self) -> (u32, u32) {
        if self.is_block_compressed() {
            (4, 4)
        } else {
            (1, 1)
        }
    }

    /// Whether the format stores texels in compressed blocks.
    pub fn is_block_compressed(self) -> bool {
        matches!(self, ImageFormat::Bc6hUfloat | ImageFormat::Bc6hSfloat)
    }

    /// Channel type and count in the compute API's array-format vocabulary.
    ///
    /// Returns `None` for formats compute APIs cannot express directly.
    pub fn compute_channels(self) -> Option<(ChannelType, u32)> {
        let channels = match self {
            ImageFormat::R8Unorm => (ChannelType::U8, 1),
            ImageFormat::Rg8Unorm => (ChannelType::U8, 2),
            ImageFormat::Rgba8Unorm | ImageFormat::Rgba8Srgb | ImageFormat::Bgra8Unorm => {
                (ChannelType::U8, 4)
            }
            ImageFormat::R16Sfloat => (ChannelType::Half, 1),
            ImageFormat::Rgba16Sfloat => (ChannelType::Half, 4),
            ImageFormat::R32Sfloat => (ChannelType::Float, 1),
            ImageFormat::Rg32Sfloat => (ChannelType::Float, 2),
            ImageFormat::Rgba32Sfloat => (ChannelType::Float, 4),
            ImageFormat::R32Uint => (ChannelType::U32, 1),
            ImageFormat::Rgba32Uint => (ChannelType::U32, 4),
            ImageFormat::R32Sint => (ChannelType::S32, 1),
            ImageFormat::Bc6hUfloat | ImageFormat::Bc6hSfloat => return None,
        };
        Some(channels)
    }

    /// Tightly packed size of one mip level with the given extent.
    pub fn level_size(self, extent: Extent3d) -> u64 {
        let (bw, bh) = self.block_extent();
        let blocks_x = u64::from(extent.width.div_ceil(bw));
        let blocks_y = u64::from(extent.height.div_ceil(bh));
        blocks_x * blocks_y * u64::from(extent.depth) * u64::from(self.block_size())
    }
}

/// The format and extent the compute API sees for a render-side image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatAlias {
    /// The format the compute API imports.
    pub format: ImageFormat,
    /// The extent in the aliased format's texels.
    pub extent: Extent3d,
    /// Whether the alias differs from the render-side format.
    pub aliased: bool,
}

/// Picks the compute-visible view of a render-side format.
///
/// Block-compressed formats have no compute equivalent; each block is instead
/// exposed as one texel of a format with the same block size, at a quarter
/// of the extent. BC6H maps to `R32G32B32A32_UINT`. The alias is only legal
/// when the extent is a whole number of blocks.
pub fn compute_alias(format: ImageFormat, extent: Extent3d) -> Result<FormatAlias, InteropError> {
    if !format.is_block_compressed() {
        return Ok(FormatAlias {
            format,
            extent,
            aliased: false,
        });
    }

    let (bw, bh) = format.block_extent();
    if extent.width % bw != 0 || extent.height % bh != 0 {
        return Err(InteropError::precondition(format!(
            "{format:?} image of {}x{} is not a whole number of {bw}x{bh} blocks",
            extent.width, extent.height
        )));
    }

    let alias = ImageFormat::Rgba32Uint;
    debug_assert_eq!(alias.block_size(), format.block_size());
    Ok(FormatAlias {
        format: alias,
        extent: Extent3d {
            width: extent.width / bw,
            height: extent.height / bh,
            depth: extent.depth,
        },
        aliased: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn bc6h_aliases_to_rgba32_uint_at_quarter_extent() {
        let alias = compute_alias(ImageFormat::Bc6hUfloat, Extent3d::new_2d(4, 4)).unwrap();
        assert!(alias.aliased);
        assert_eq!(alias.format, ImageFormat::Rgba32Uint);
        assert_eq!(alias.extent, Extent3d::new_2d(1, 1));
        assert_eq!(
            ImageFormat::Bc6hUfloat.level_size(Extent3d::new_2d(4, 4)),
            ImageFormat::Rgba32Uint.level_size(alias.extent)
        );
    }

    #[test]
    fn partial_blocks_are_rejected() {
        let err = compute_alias(ImageFormat::Bc6hSfloat, Extent3d::new_2d(6, 4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn uncompressed_formats_pass_through() {
        let extent = Extent3d::new_2d(1, 1);
        let alias = compute_alias(ImageFormat::R8Unorm, extent).unwrap();
        assert!(!alias.aliased);
        assert_eq!(alias.extent, extent);
        assert_eq!(ImageFormat::R8Unorm.level_size(extent), 1);
    }
}
