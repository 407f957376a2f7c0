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

//! Buffers and images owned jointly by the render and the compute API.
//!
//! Each shared resource holds its render-side allocation and, when interop
//! is active, the compute-side import of that allocation. Fields are declared
//! so that dropping a resource releases the compute objects first, then
//! closes any retained NT handle, then frees the render allocation.

use crate::platform::close_raw_handle;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tandem_core::resource::{
    BindlessImage, DevicePtr, FormatAlias, ImageDesc, RawHandle, ResourceId, ResourceOwnership,
    SubresourceLayout,
};
use tandem_core::traits::{
    ComputeDevice, ExportedAllocation, ExternalMemoryId, RenderInteropDevice, StreamId,
};
use tandem_core::InteropError;

/// The common view of shared buffers and images used by the submission helper.
pub trait SharedResource: Send + Sync {
    /// Identifier unique within the factory that created the resource.
    fn id(&self) -> ResourceId;

    /// The API currently allowed to access the resource.
    fn ownership(&self) -> ResourceOwnership;

    /// Records an ownership transfer. Called after the matching signal is enqueued.
    fn set_ownership(&self, owner: ResourceOwnership);
}

/// A shared resource as the submitter sees it during a hand-off.
///
/// Resources whose compute view lives in a separate allocation copy their
/// contents across on the render queue around each hand-off.
pub trait HandOff<R: RenderInteropDevice>: SharedResource {
    /// Whether [`before_compute`](Self::before_compute) and
    /// [`after_compute`](Self::after_compute) do any work.
    fn copies_on_hand_off(&self) -> bool {
        false
    }

    /// Runs after the render work and before compute is signalled.
    fn before_compute(&self, _render: &R) -> Result<(), InteropError> {
        Ok(())
    }

    /// Runs after compute finished and before the render work is submitted.
    fn after_compute(&self, _render: &R) -> Result<(), InteropError> {
        Ok(())
    }
}

/// Atomic storage for a [`ResourceOwnership`].
#[derive(Debug, Default)]
pub(crate) struct OwnershipCell(AtomicU8);

impl OwnershipCell {
    pub(crate) fn get(&self) -> ResourceOwnership {
        match self.0.load(Ordering::Acquire) {
            0 => ResourceOwnership::Render,
            _ => ResourceOwnership::Compute,
        }
    }

    pub(crate) fn set(&self, owner: ResourceOwnership) {
        let raw = match owner {
            ResourceOwnership::Render => 0,
            ResourceOwnership::Compute => 1,
        };
        self.0.store(raw, Ordering::Release);
    }
}

/// Compute-side import of one render allocation.
///
/// Releasing the memory and closing the retained NT handle happen on drop.
pub(crate) struct ComputeImport {
    pub(crate) device: Arc<dyn ComputeDevice>,
    pub(crate) memory: ExternalMemoryId,
    pub(crate) retained: Option<RawHandle>,
}

impl Drop for ComputeImport {
    fn drop(&mut self) {
        if let Err(e) = self.device.release_memory(self.memory) {
            log::error!("Failed to release imported memory {:?}: {e}", self.memory);
        }
        if let Some(handle) = self.retained.take() {
            close_raw_handle(handle);
        }
    }
}

/// A buffer visible to both APIs.
pub struct SharedBuffer<B: ExportedAllocation> {
    id: ResourceId,
    ownership: OwnershipCell,
    size: u64,
    device_ptr: DevicePtr,
    // Field order is drop order: compute side first.
    import: Option<ComputeImport>,
    render: Option<B>,
}

impl<B: ExportedAllocation> SharedBuffer<B> {
    pub(crate) fn new(
        id: ResourceId,
        size: u64,
        device_ptr: DevicePtr,
        import: Option<ComputeImport>,
        render: Option<B>,
    ) -> Self {
        Self {
            id,
            ownership: OwnershipCell::default(),
            size,
            device_ptr,
            import,
            render,
        }
    }

    /// Size requested at creation.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The compute-API pointer to the first byte, or null for zero-sized or
    /// render-only buffers.
    pub fn device_ptr(&self) -> DevicePtr {
        self.device_ptr
    }

    /// The render-side buffer. `None` for zero-sized buffers.
    pub fn render(&self) -> Option<&B> {
        self.render.as_ref()
    }

    /// Whether the compute API can access the buffer.
    pub fn is_shared(&self) -> bool {
        self.import.is_some()
    }

    /// Copies the buffer contents into `dst` through the compute API and waits.
    ///
    /// Zero-sized buffers accept an empty `dst` and do nothing.
    pub fn download(&self, dst: &mut [u8], stream: StreamId) -> Result<(), InteropError> {
        if dst.is_empty() && self.size == 0 {
            return Ok(());
        }
        let compute = self.compute_for_copy(dst.len())?;
        compute.copy_to_host(self.device_ptr, dst, stream)?;
        compute.synchronize(stream)
    }

    /// Copies `src` into the buffer through the compute API and waits.
    pub fn upload(&self, src: &[u8], stream: StreamId) -> Result<(), InteropError> {
        if src.is_empty() && self.size == 0 {
            return Ok(());
        }
        let compute = self.compute_for_copy(src.len())?;
        compute.copy_from_host(self.device_ptr, src, stream)?;
        compute.synchronize(stream)
    }

    fn compute_for_copy(&self, len: usize) -> Result<&Arc<dyn ComputeDevice>, InteropError> {
        if len as u64 > self.size {
            return Err(InteropError::precondition(format!(
                "host copy of {len} bytes exceeds buffer {} of {} bytes",
                self.id, self.size
            )));
        }
        let import = self.import.as_ref().ok_or_else(|| {
            InteropError::precondition(format!("buffer {} is not shared with a compute API", self.id))
        })?;
        Ok(&import.device)
    }
}

impl<B: ExportedAllocation> SharedResource for SharedBuffer<B> {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn ownership(&self) -> ResourceOwnership {
        self.ownership.get()
    }

    fn set_ownership(&self, owner: ResourceOwnership) {
        self.ownership.set(owner);
    }
}

impl<R: RenderInteropDevice> HandOff<R> for SharedBuffer<R::Buffer> {}

impl<B: ExportedAllocation> fmt::Debug for SharedBuffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("device_ptr", &self.device_ptr)
            .field("ownership", &self.ownership.get())
            .finish()
    }
}

/// How the compute API reaches a shared image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageAccess {
    /// A bindless image object.
    Bindless(BindlessImage),
    /// Linear memory addressed through a device pointer.
    Linear {
        /// Pointer to texel (0, 0) of mip 0 / layer 0.
        ptr: DevicePtr,
        /// Row, array and depth pitches of that subresource.
        layout: SubresourceLayout,
    },
    /// Not shared; only the render API can access the image.
    RenderOnly,
}

/// An image visible to both APIs.
///
/// Block-compressed images keep a second render image in the alias format.
/// Only that image is exported; its contents are copied from the original
/// before compute takes over and back after compute returns it.
pub struct SharedImage<I: ExportedAllocation> {
    id: ResourceId,
    ownership: OwnershipCell,
    desc: ImageDesc,
    alias: FormatAlias,
    access: ImageAccess,
    // Field order is drop order: compute side first.
    import: Option<ComputeImport>,
    alias_image: Option<I>,
    render: I,
}

impl<I: ExportedAllocation> SharedImage<I> {
    pub(crate) fn new(
        id: ResourceId,
        desc: ImageDesc,
        alias: FormatAlias,
        access: ImageAccess,
        import: Option<ComputeImport>,
        render: I,
    ) -> Self {
        Self {
            id,
            ownership: OwnershipCell::default(),
            desc,
            alias,
            access,
            import,
            alias_image: None,
            render,
        }
    }

    pub(crate) fn with_alias_image(mut self, alias_image: I) -> Self {
        self.alias_image = Some(alias_image);
        self
    }

    /// The description the image was created with.
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// The format and extent the compute API sees.
    pub fn compute_alias(&self) -> FormatAlias {
        self.alias
    }

    pub fn access(&self) -> ImageAccess {
        self.access
    }

    pub fn render(&self) -> &I {
        &self.render
    }

    /// The render image holding the alias-format copy, if the format needs one.
    pub fn alias_image(&self) -> Option<&I> {
        self.alias_image.as_ref()
    }

    /// The render image whose memory the compute API reads and writes.
    pub fn compute_image(&self) -> &I {
        self.alias_image.as_ref().unwrap_or(&self.render)
    }
}

impl<I: ExportedAllocation> Drop for SharedImage<I> {
    fn drop(&mut self) {
        if let (ImageAccess::Bindless(image), Some(import)) = (self.access, &self.import) {
            if let Err(e) = import.device.release_image(image) {
                log::error!("Failed to release bindless image of {}: {e}", self.id);
            }
        }
    }
}

impl<I: ExportedAllocation> SharedResource for SharedImage<I> {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn ownership(&self) -> ResourceOwnership {
        self.ownership.get()
    }

    fn set_ownership(&self, owner: ResourceOwnership) {
        self.ownership.set(owner);
    }
}

impl<R: RenderInteropDevice> HandOff<R> for SharedImage<R::Image> {
    fn copies_on_hand_off(&self) -> bool {
        self.alias_image.is_some()
    }

    fn before_compute(&self, render: &R) -> Result<(), InteropError> {
        match &self.alias_image {
            Some(alias_image) => {
                log::trace!("Copying image {} into its {:?} alias", self.id, self.alias.format);
                render.copy_image(&self.render, alias_image)
            }
            None => Ok(()),
        }
    }

    fn after_compute(&self, render: &R) -> Result<(), InteropError> {
        match &self.alias_image {
            Some(alias_image) => {
                log::trace!("Copying the {:?} alias back into image {}", self.alias.format, self.id);
                render.copy_image(alias_image, &self.render)
            }
            None => Ok(()),
        }
    }
}

impl<I: ExportedAllocation> fmt::Debug for SharedImage<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedImage")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .field("alias", &self.alias)
            .field("access", &self.access)
            .field("alias_image", &self.alias_image.is_some())
            .field("ownership", &self.ownership.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_defaults_to_render_and_flips() {
        let cell = OwnershipCell::default();
        assert_eq!(cell.get(), ResourceOwnership::Render);
        cell.set(ResourceOwnership::Compute);
        assert_eq!(cell.get(), ResourceOwnership::Compute);
        cell.set(ResourceOwnership::Render);
        assert_eq!(cell.get(), ResourceOwnership::Render);
    }
}
