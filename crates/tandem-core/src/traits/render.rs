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

//! The slice of a render API the interop layer needs.
//!
//! This is deliberately not a rendering abstraction: each backend keeps its
//! own surface for everything else. Only exportable allocation, semaphore
//! export and semaphore-aware submission are normalized here.

use crate::device::PhysicalDeviceRecord;
use crate::error::InteropError;
use crate::resource::{BufferDesc, ExternalHandle, ImageDesc, SubresourceLayout};
use crate::sync::{SemaphoreDesc, SemaphoreKind, WaitStatus};

/// A render-side allocation whose memory may be exported.
pub trait ExportedAllocation: Send + Sync {
    /// Size of the backing memory object in bytes.
    fn size(&self) -> u64;

    /// Whether the memory is a dedicated allocation.
    fn is_dedicated(&self) -> bool;

    /// Hands out the export handle. Returns `None` after the first call, or
    /// when the allocation is not exportable.
    fn take_export_handle(&mut self) -> Option<ExternalHandle>;

    /// Placement of mip 0 / layer 0 for images; `None` for buffers.
    fn subresource_layout(&self) -> Option<SubresourceLayout>;
}

/// A render-side semaphore that may be exported.
pub trait ExportedSemaphore: Send + Sync {
    /// Binary or timeline.
    fn kind(&self) -> SemaphoreKind;

    /// Hands out the export handle once.
    fn take_export_handle(&mut self) -> Option<ExternalHandle>;

    /// Current counter value as reported by the driver (timeline only).
    fn counter_value(&self) -> Result<u64, InteropError>;

    /// Blocks until the counter reaches `value` or `timeout_ns` elapses.
    fn wait_on_cpu(&self, value: u64, timeout_ns: u64) -> WaitStatus;

    /// Sets the counter to `value` from the host (timeline only).
    fn signal_on_cpu(&self, value: u64) -> Result<(), InteropError>;
}

/// A semaphore and the value a submission waits on or signals.
#[derive(Debug)]
pub struct SemaphoreValue<'a, S> {
    /// The semaphore.
    pub semaphore: &'a S,
    /// The timeline value (ignored for binary semaphores).
    pub value: u64,
}

/// A render device able to allocate, export, and submit.
pub trait RenderInteropDevice: Send + Sync {
    /// Exportable buffer type.
    type Buffer: ExportedAllocation;
    /// Exportable image type.
    type Image: ExportedAllocation;
    /// Exportable semaphore type.
    type Semaphore: ExportedSemaphore;
    /// Recorded command buffer type.
    type CommandBuffer;

    /// The physical device this logical device was created on.
    fn record(&self) -> &PhysicalDeviceRecord;

    /// Allocates a buffer.
    /// ## Errors
    /// * `InteropError::ResourceExhausted` - If the allocation does not fit.
    /// * `InteropError::NotSupported` - If the device cannot export the memory.
    fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer, InteropError>;

    /// Allocates an image.
    fn create_image(&self, desc: &ImageDesc) -> Result<Self::Image, InteropError>;

    /// Creates a semaphore.
    fn create_semaphore(&self, desc: &SemaphoreDesc) -> Result<Self::Semaphore, InteropError>;

    /// Writes `data` into `buffer` at `offset` and waits for the copy.
    fn upload_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<(), InteropError>;

    /// Copies mip 0 / layer 0 of `src` over all of `dst` and waits for the copy.
    ///
    /// The formats may differ when their texel blocks have the same size, as
    /// a block-compressed image and its uncompressed alias do. Work already
    /// submitted on the queue completes before the copy starts.
    fn copy_image(&self, src: &Self::Image, dst: &Self::Image) -> Result<(), InteropError>;

    /// Submits `command_buffers`, waiting on and signalling the given semaphores.
    fn submit(
        &self,
        command_buffers: &[Self::CommandBuffer],
        waits: &[SemaphoreValue<'_, Self::Semaphore>],
        signals: &[SemaphoreValue<'_, Self::Semaphore>],
    ) -> Result<(), InteropError>;

    /// Blocks until all submitted work finished (`glFinish` / `vkDeviceWaitIdle`).
    fn finish(&self) -> Result<(), InteropError>;
}
