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

//! Exportable buffers and images backed by dedicated allocations.

use super::conversions::{sample_count, IntoVulkan};
use super::device::{DeviceContext, ExportFns, VulkanDevice};
use super::VkResultExt;
use crate::platform::close_raw_handle;
use ash::vk;
use std::sync::Arc;
use tandem_core::resource::{
    BufferDesc, BufferUsage, Extent3d, ExternalHandle, ImageDesc, ImageFormat, ImageUsage,
    SubresourceLayout,
};
use tandem_core::traits::{ExportedAllocation, RenderInteropDevice};
use tandem_core::InteropError;

/// Memory bound to one buffer or image, plus the export handle not yet handed out.
struct Allocation {
    memory: vk::DeviceMemory,
    size: u64,
    dedicated: bool,
    export: Option<ExternalHandle>,
}

/// What the new memory is dedicated to.
#[derive(Clone, Copy)]
enum Owner {
    Buffer(vk::Buffer),
    Image(vk::Image),
}

fn allocate(
    device: &VulkanDevice,
    owner: Owner,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
    export: Option<&ExportFns>,
) -> Result<Allocation, InteropError> {
    let memory_type = device
        .find_memory_type(requirements.memory_type_bits, properties)
        .ok_or_else(|| {
            InteropError::not_supported(format!("no memory type with {properties:?}"))
        })?;

    let mut dedicated_info = match owner {
        Owner::Buffer(buffer) => vk::MemoryDedicatedAllocateInfo::default().buffer(buffer),
        Owner::Image(image) => vk::MemoryDedicatedAllocateInfo::default().image(image),
    };
    let mut export_info = vk::ExportMemoryAllocateInfo::default()
        .handle_types(ExportFns::memory_handle_type());
    let mut info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);
    if export.is_some() {
        info = info.push_next(&mut dedicated_info).push_next(&mut export_info);
    }
    // SAFETY: the chain only borrows locals alive for the call.
    let memory = unsafe { device.raw().allocate_memory(&info, None) }.map_err(|e| {
        match super::vk_error("vkAllocateMemory", e) {
            InteropError::ResourceExhausted { what, .. } => InteropError::ResourceExhausted {
                what,
                requested_bytes: requirements.size,
            },
            other => other,
        }
    })?;

    let bound = match owner {
        // SAFETY: fresh memory of the required size and type.
        Owner::Buffer(buffer) => unsafe { device.raw().bind_buffer_memory(buffer, memory, 0) },
        // SAFETY: as above.
        Owner::Image(image) => unsafe { device.raw().bind_image_memory(image, memory, 0) },
    };
    let exported = bound
        .vk_context("vkBind*Memory")
        .and_then(|()| export.map(|fns| fns.export_memory(memory)).transpose());
    match exported {
        Ok(export) => Ok(Allocation {
            memory,
            size: requirements.size,
            dedicated: export.is_some(),
            export,
        }),
        Err(e) => {
            // SAFETY: nothing else references the memory yet.
            unsafe { device.raw().free_memory(memory, None) };
            Err(e)
        }
    }
}

impl Allocation {
    fn release(&mut self, device: &ash::Device) {
        if let Some(handle) = self.export.take() {
            close_raw_handle(handle.raw);
        }
        // SAFETY: the owning buffer or image was destroyed first.
        unsafe { device.free_memory(self.memory, None) };
    }
}

fn export_fns<'a>(
    device: &'a VulkanDevice,
    exportable: bool,
) -> Result<Option<&'a ExportFns>, InteropError> {
    if !exportable {
        return Ok(None);
    }
    device.export_fns().map(Some).ok_or_else(|| {
        InteropError::not_supported(format!(
            "'{}' cannot export memory",
            device.record().name
        ))
    })
}

/// A render-side buffer whose memory may be exported.
pub struct VulkanBuffer {
    ctx: Arc<DeviceContext>,
    buffer: vk::Buffer,
    allocation: Allocation,
    size: u64,
}

impl VulkanBuffer {
    /// Creates a buffer with its own allocation.
    ///
    /// `TRANSFER_DST` is always added so [`RenderInteropDevice::upload_buffer`]
    /// works on every buffer.
    ///
    /// ## Errors
    /// * `InteropError::Precondition` - If `desc.size` is zero.
    /// * `InteropError::NotSupported` - If export is requested but unavailable.
    /// * `InteropError::ResourceExhausted` - If the allocation fails.
    ///
    /// [`RenderInteropDevice::upload_buffer`]: tandem_core::traits::RenderInteropDevice::upload_buffer
    pub fn new(device: &VulkanDevice, desc: &BufferDesc) -> Result<Self, InteropError> {
        if desc.size == 0 {
            return Err(InteropError::precondition(
                "zero-sized buffers have no Vulkan allocation",
            ));
        }
        let export = export_fns(device, desc.exportable)?;
        let usage: vk::BufferUsageFlags = (desc.usage | BufferUsage::TRANSFER_DST).into_vk();

        let mut external_info = vk::ExternalMemoryBufferCreateInfo::default()
            .handle_types(ExportFns::memory_handle_type());
        let mut info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        if export.is_some() {
            info = info.push_next(&mut external_info);
        }
        let raw = device.raw();
        // SAFETY: valid create info.
        let buffer = unsafe { raw.create_buffer(&info, None) }.vk_context("vkCreateBuffer")?;
        // SAFETY: the buffer was just created.
        let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };

        let properties = if desc.usage.contains(BufferUsage::HOST_VISIBLE) {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };
        let allocation = match allocate(device, Owner::Buffer(buffer), requirements, properties, export) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: the buffer has no memory bound and is unused.
                unsafe { raw.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        log::trace!(
            "Created Vulkan buffer of {} bytes (allocation {}, exported: {})",
            desc.size,
            allocation.size,
            allocation.export.is_some()
        );
        Ok(Self {
            ctx: Arc::clone(device.context()),
            buffer,
            allocation,
            size: desc.size,
        })
    }

    /// The raw buffer handle.
    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    /// The requested size in bytes (the allocation may be larger).
    pub fn requested_size(&self) -> u64 {
        self.size
    }

    /// Copies `data` into host-visible memory at `offset`.
    ///
    /// ## Errors
    /// * `InteropError::Precondition` - If the range overruns the buffer.
    /// * `InteropError::Driver` - If the memory is not host-visible.
    pub fn write_mapped(&self, offset: u64, data: &[u8]) -> Result<(), InteropError> {
        let len = data.len() as u64;
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(InteropError::precondition(format!(
                "write of {len} bytes at offset {offset} overruns a {}-byte buffer",
                self.size
            )));
        }
        let raw = self.ctx.raw();
        // SAFETY: the range lies inside the allocation.
        let ptr = unsafe {
            raw.map_memory(self.allocation.memory, offset, len, vk::MemoryMapFlags::empty())
        }
        .vk_context("vkMapMemory")?;
        // SAFETY: `ptr` points at `len` mapped, host-coherent bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            raw.unmap_memory(self.allocation.memory);
        }
        Ok(())
    }
}

impl ExportedAllocation for VulkanBuffer {
    fn size(&self) -> u64 {
        self.allocation.size
    }

    fn is_dedicated(&self) -> bool {
        self.allocation.dedicated
    }

    fn take_export_handle(&mut self) -> Option<ExternalHandle> {
        self.allocation.export.take()
    }

    fn subresource_layout(&self) -> Option<SubresourceLayout> {
        None
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees the GPU no longer uses the buffer.
        unsafe { self.ctx.raw().destroy_buffer(self.buffer, None) };
        self.allocation.release(self.ctx.raw());
    }
}

/// A render-side 2D/3D image whose memory may be exported.
pub struct VulkanImage {
    ctx: Arc<DeviceContext>,
    image: vk::Image,
    allocation: Allocation,
    format: ImageFormat,
    extent: Extent3d,
    samples: u32,
    layout: Option<SubresourceLayout>,
}

impl VulkanImage {
    /// Creates an image with its own allocation.
    ///
    /// [`ImageUsage::LINEAR`] selects linear tiling, which is what lets a
    /// compute API without bindless images address the pixels as a pitched
    /// buffer; the subresource layout is queried for such images.
    ///
    /// ## Errors
    /// * `InteropError::Precondition` - If the extent is empty, or linear
    ///   tiling is combined with MSAA.
    /// * `InteropError::NotSupported` - If export is requested but unavailable.
    pub fn new(device: &VulkanDevice, desc: &ImageDesc) -> Result<Self, InteropError> {
        let extent = desc.extent;
        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return Err(InteropError::precondition(format!(
                "image extent {}x{}x{} is empty",
                extent.width, extent.height, extent.depth
            )));
        }
        let linear = desc.usage.contains(ImageUsage::LINEAR);
        if linear && desc.samples > 1 {
            return Err(InteropError::precondition(
                "linear tiling cannot be combined with MSAA",
            ));
        }
        let samples = sample_count(desc.samples)?;
        let export = export_fns(device, desc.exportable)?;

        let mut external_info = vk::ExternalMemoryImageCreateInfo::default()
            .handle_types(ExportFns::memory_handle_type());
        let mut info = vk::ImageCreateInfo::default()
            .image_type(if extent.depth > 1 {
                vk::ImageType::TYPE_3D
            } else {
                vk::ImageType::TYPE_2D
            })
            .format(desc.format.into_vk())
            .extent(extent.into_vk())
            .mip_levels(1)
            .array_layers(1)
            .samples(samples)
            .tiling(if linear {
                vk::ImageTiling::LINEAR
            } else {
                vk::ImageTiling::OPTIMAL
            })
            .usage(desc.usage.into_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        if export.is_some() {
            info = info.push_next(&mut external_info);
        }
        let raw = device.raw();
        // SAFETY: valid create info.
        let image = unsafe { raw.create_image(&info, None) }.vk_context("vkCreateImage")?;
        // SAFETY: the image was just created.
        let requirements = unsafe { raw.get_image_memory_requirements(image) };

        let allocation = match allocate(
            device,
            Owner::Image(image),
            requirements,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            export,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: the image has no memory bound and is unused.
                unsafe { raw.destroy_image(image, None) };
                return Err(e);
            }
        };

        let layout = linear.then(|| {
            let subresource = vk::ImageSubresource {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                array_layer: 0,
            };
            // SAFETY: linear image with bound memory.
            let l = unsafe { raw.get_image_subresource_layout(image, subresource) };
            SubresourceLayout {
                offset: l.offset,
                size: l.size,
                row_pitch: l.row_pitch,
                array_pitch: l.array_pitch,
                depth_pitch: l.depth_pitch,
            }
        });

        Ok(Self {
            ctx: Arc::clone(device.context()),
            image,
            allocation,
            format: desc.format,
            extent,
            samples: desc.samples,
            layout,
        })
    }

    /// The raw image handle.
    pub fn raw(&self) -> vk::Image {
        self.image
    }

    /// The texel format.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// The extent in texels.
    pub fn extent(&self) -> Extent3d {
        self.extent
    }

    /// The MSAA sample count.
    pub fn samples(&self) -> u32 {
        self.samples
    }
}

impl ExportedAllocation for VulkanImage {
    fn size(&self) -> u64 {
        self.allocation.size
    }

    fn is_dedicated(&self) -> bool {
        self.allocation.dedicated
    }

    fn take_export_handle(&mut self) -> Option<ExternalHandle> {
        self.allocation.export.take()
    }

    fn subresource_layout(&self) -> Option<SubresourceLayout> {
        self.layout
    }
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees the GPU no longer uses the image.
        unsafe { self.ctx.raw().destroy_image(self.image, None) };
        self.allocation.release(self.ctx.raw());
    }
}
