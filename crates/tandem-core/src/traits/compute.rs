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

//! The contract every compute API (CUDA, HIP, Level Zero, OpenCL) implements.

use crate::api::ComputeApi;
use crate::device::ComputeDeviceInfo;
use crate::error::InteropError;
use crate::resource::{
    BindlessImage, DevicePtr, Extent3d, ExternalHandle, ImageFormat, SubresourceLayout,
};
use crate::sync::SemaphoreKind;
use std::fmt::Debug;
use std::sync::Arc;

/// A compute stream / queue handle, opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

/// An imported external-memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalMemoryId(pub u64);

/// An imported external semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalSemaphoreId(pub u64);

/// What a compute API does with a file descriptor passed to a successful import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdImportOwnership {
    /// The driver takes the descriptor over; the caller must not close it.
    TakenByDriver,
    /// The driver duplicates the descriptor; the caller closes its copy.
    DuplicatedByDriver,
}

/// The interop features a compute device offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeCapabilities {
    /// External memory can be imported and mapped as a buffer.
    pub buffer_import: bool,
    /// Imported memory can be mapped as a bindless image.
    pub bindless_images: bool,
    /// Binary external semaphores can be imported.
    pub binary_semaphores: bool,
    /// Timeline external semaphores can be imported.
    pub timeline_semaphores: bool,
    /// Device memory can be copied to and from host memory.
    pub host_copy: bool,
    /// File-descriptor ownership on import.
    pub fd_ownership: FdImportOwnership,
    /// Byte alignment the row pitch and offset of a linear image must have
    /// for the image to be addressed through a mapped buffer.
    pub linear_pitch_alignment: u64,
}

impl ComputeCapabilities {
    /// Whether semaphores of `kind` can be imported.
    pub fn supports_semaphore(&self, kind: SemaphoreKind) -> bool {
        match kind {
            SemaphoreKind::Timeline => self.timeline_semaphores,
            SemaphoreKind::Binary => self.binary_semaphores,
        }
    }

    /// Whether a linear image with `layout` can be addressed through a mapped buffer.
    pub fn honors_linear_layout(&self, layout: &SubresourceLayout) -> bool {
        let alignment = self.linear_pitch_alignment.max(1);
        layout.row_pitch % alignment == 0 && layout.offset % alignment == 0
    }
}

/// A request to import an exported allocation.
#[derive(Debug)]
pub struct ExternalMemoryDesc<'a> {
    /// The exported handle.
    pub handle: &'a ExternalHandle,
    /// The full allocation size reported by the render API.
    pub size: u64,
    /// Whether the export is a dedicated allocation.
    pub dedicated: bool,
}

/// How imported memory is to be viewed as an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalImageDesc {
    /// Extent in texels of `format`.
    pub extent: Extent3d,
    /// The compute-visible format (see [`crate::resource::compute_alias`]).
    pub format: ImageFormat,
    /// Number of mip levels in the allocation.
    pub levels: u32,
}

/// A request to import an exported semaphore.
#[derive(Debug)]
pub struct ExternalSemaphoreDesc<'a> {
    /// The exported handle.
    pub handle: &'a ExternalHandle,
    /// Binary or timeline.
    pub kind: SemaphoreKind,
}

/// A loaded compute API able to enumerate and open devices.
pub trait ComputeBackend: Send + Sync {
    /// The API this backend drives.
    fn api(&self) -> ComputeApi;

    /// Enumerates the devices visible to the API.
    /// ## Returns
    /// One record per device, with UUID/LUID where the API reports them.
    /// ## Errors
    /// * `InteropError::Driver` - If enumeration fails.
    fn enumerate_devices(&self) -> Result<Vec<ComputeDeviceInfo>, InteropError>;

    /// Creates a context and a stream on the device with the given ordinal.
    fn open_device(&self, ordinal: usize) -> Result<Arc<dyn ComputeDevice>, InteropError>;
}

/// An opened compute device with its context and default stream.
///
/// Objects created through a device must be released through the same
/// device, and before the render-side objects they were imported from.
pub trait ComputeDevice: Send + Sync + Debug {
    /// Identity of the device.
    fn info(&self) -> &ComputeDeviceInfo;

    /// The interop features of the device.
    fn capabilities(&self) -> ComputeCapabilities;

    /// The stream created with the context.
    fn default_stream(&self) -> StreamId;

    /// Imports an exported allocation.
    /// ## Errors
    /// * `InteropError::NotSupported` - If the API cannot import memory.
    /// * `InteropError::Driver` - If the import fails.
    fn import_memory(&self, desc: &ExternalMemoryDesc<'_>) -> Result<ExternalMemoryId, InteropError>;

    /// Maps `size` bytes of imported memory starting at `offset` to a device pointer.
    fn map_buffer(
        &self,
        memory: ExternalMemoryId,
        offset: u64,
        size: u64,
    ) -> Result<DevicePtr, InteropError>;

    /// Maps level 0 of imported memory as a bindless image.
    /// ## Errors
    /// * `InteropError::NotSupported` - If the API has no bindless images;
    ///   callers fall back to [`ComputeDevice::map_buffer`] with the row pitch.
    fn map_image(
        &self,
        memory: ExternalMemoryId,
        desc: &ExternalImageDesc,
    ) -> Result<BindlessImage, InteropError>;

    /// Destroys a bindless image created by [`ComputeDevice::map_image`].
    fn release_image(&self, image: BindlessImage) -> Result<(), InteropError>;

    /// Releases imported memory and every buffer mapping made from it.
    fn release_memory(&self, memory: ExternalMemoryId) -> Result<(), InteropError>;

    /// Imports an exported semaphore.
    fn import_semaphore(
        &self,
        desc: &ExternalSemaphoreDesc<'_>,
    ) -> Result<ExternalSemaphoreId, InteropError>;

    /// Enqueues a signal of `value` on `stream`. The value is ignored for binary semaphores.
    fn signal_semaphore(
        &self,
        semaphore: ExternalSemaphoreId,
        value: u64,
        stream: StreamId,
    ) -> Result<(), InteropError>;

    /// Enqueues a wait for `value` on `stream`. The value is ignored for binary semaphores.
    fn wait_semaphore(
        &self,
        semaphore: ExternalSemaphoreId,
        value: u64,
        stream: StreamId,
    ) -> Result<(), InteropError>;

    /// Destroys an imported semaphore.
    fn release_semaphore(&self, semaphore: ExternalSemaphoreId) -> Result<(), InteropError>;

    /// Copies device memory into `dst`, ordered after prior work on `stream`, and blocks until done.
    fn copy_to_host(&self, src: DevicePtr, dst: &mut [u8], stream: StreamId) -> Result<(), InteropError>;

    /// Copies `src` into device memory, ordered after prior work on `stream`, and blocks until done.
    fn copy_from_host(&self, dst: DevicePtr, src: &[u8], stream: StreamId) -> Result<(), InteropError>;

    /// Blocks until all work on `stream` is complete.
    fn synchronize(&self, stream: StreamId) -> Result<(), InteropError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(linear_pitch_alignment: u64) -> ComputeCapabilities {
        ComputeCapabilities {
            buffer_import: true,
            bindless_images: false,
            binary_semaphores: true,
            timeline_semaphores: true,
            host_copy: true,
            fd_ownership: FdImportOwnership::TakenByDriver,
            linear_pitch_alignment,
        }
    }

    fn layout(offset: u64, row_pitch: u64) -> SubresourceLayout {
        SubresourceLayout {
            offset,
            size: row_pitch * 8,
            row_pitch,
            array_pitch: 0,
            depth_pitch: 0,
        }
    }

    #[test]
    fn linear_layout_must_be_aligned_in_pitch_and_offset() {
        let caps = capabilities(256);
        assert!(caps.honors_linear_layout(&layout(0, 512)));
        assert!(caps.honors_linear_layout(&layout(256, 1024)));
        assert!(!caps.honors_linear_layout(&layout(0, 320)));
        assert!(!caps.honors_linear_layout(&layout(64, 512)));
    }

    #[test]
    fn zero_alignment_accepts_any_layout() {
        assert!(capabilities(0).honors_linear_layout(&layout(3, 17)));
    }
}
