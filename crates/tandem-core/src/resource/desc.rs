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

//! Allocation requests for shared buffers and images.

use super::format::ImageFormat;
use bitflags::bitflags;

bitflags! {
    /// How a shared buffer will be used on the render side.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        /// Source of transfer commands.
        const TRANSFER_SRC = 1 << 0;
        /// Destination of transfer commands.
        const TRANSFER_DST = 1 << 1;
        /// Bound as a uniform buffer.
        const UNIFORM = 1 << 2;
        /// Bound as a storage buffer.
        const STORAGE = 1 << 3;
        /// Bound as a vertex buffer.
        const VERTEX = 1 << 4;
        /// Bound as an index buffer.
        const INDEX = 1 << 5;
        /// Mapped for host access.
        const HOST_VISIBLE = 1 << 6;
    }
}

bitflags! {
    /// How a shared image will be used on the render side.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageUsage: u32 {
        /// Source of transfer commands.
        const TRANSFER_SRC = 1 << 0;
        /// Destination of transfer commands.
        const TRANSFER_DST = 1 << 1;
        /// Sampled in shaders.
        const SAMPLED = 1 << 2;
        /// Written as a storage image.
        const STORAGE = 1 << 3;
        /// Rendered to as a color attachment.
        const COLOR_ATTACHMENT = 1 << 4;
        /// Allocated with linear tiling so it can be addressed as a pitched buffer.
        const LINEAR = 1 << 5;
    }
}

/// A three-dimensional extent in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth in texels (1 for 2D images).
    pub depth: u32,
}

impl Extent3d {
    /// A 2D extent.
    pub fn new_2d(width: u32, height: u32) -> Self {
        Extent3d {
            width,
            height,
            depth: 1,
        }
    }
}

/// A request for a buffer on the render side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    /// Size in bytes. Zero is accepted and allocates nothing.
    pub size: u64,
    /// Render-side usage.
    pub usage: BufferUsage,
    /// Export the memory to the compute API.
    pub exportable: bool,
}

/// A request for an image on the render side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    /// Extent in texels.
    pub extent: Extent3d,
    /// Texel format.
    pub format: ImageFormat,
    /// Render-side usage.
    pub usage: ImageUsage,
    /// MSAA sample count (1 for single-sampled).
    pub samples: u32,
    /// Export the memory to the compute API.
    pub exportable: bool,
}

impl ImageDesc {
    /// A single-sampled, exportable 2D image.
    pub fn shared_2d(width: u32, height: u32, format: ImageFormat, usage: ImageUsage) -> Self {
        ImageDesc {
            extent: Extent3d::new_2d(width, height),
            format,
            usage,
            samples: 1,
            exportable: true,
        }
    }
}
