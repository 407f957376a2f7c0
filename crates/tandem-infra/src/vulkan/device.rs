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

//! The logical Vulkan device and its [`RenderInteropDevice`] implementation.

use super::commands::{self, CommandPoolCache, SemaphoreSlot};
use super::conversions::IntoVulkan;
use super::instance::VulkanInstance;
use super::memory::{VulkanBuffer, VulkanImage};
use super::registry::VulkanPhysicalDevice;
use super::semaphore::VulkanSemaphore;
use super::VkResultExt;
use ash::vk;
use std::ffi::CStr;
use std::sync::{Arc, Mutex};
use tandem_core::device::{ExternalHandleKinds, PhysicalDeviceRecord};
use tandem_core::resource::{BufferDesc, BufferUsage, ExternalHandle, ImageDesc, RawHandle};
use tandem_core::sync::SemaphoreDesc;
use tandem_core::traits::{RenderInteropDevice, SemaphoreValue};
use tandem_core::InteropError;

/// An `ash::Device` that is destroyed with its last reference.
///
/// Every object created on the device holds one, so the device always
/// outlives them.
pub struct DeviceContext {
    device: ash::Device,
    instance: Arc<VulkanInstance>,
}

impl DeviceContext {
    /// The device-level function table.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    /// The instance the device was created from.
    pub fn instance(&self) -> &Arc<VulkanInstance> {
        &self.instance
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        // SAFETY: this is the last reference; no object created on the device is alive.
        unsafe { self.device.destroy_device(None) };
        log::debug!("Destroyed Vulkan device");
    }
}

#[cfg(unix)]
mod export {
    use super::*;
    use ash::khr::{external_memory_fd, external_semaphore_fd};

    pub(super) const MEMORY_EXTENSION: &CStr = external_memory_fd::NAME;
    pub(super) const SEMAPHORE_EXTENSION: &CStr = external_semaphore_fd::NAME;

    pub(crate) struct ExportFns {
        memory: external_memory_fd::Device,
        semaphore: external_semaphore_fd::Device,
    }

    impl ExportFns {
        pub(super) fn load(instance: &ash::Instance, device: &ash::Device) -> Self {
            Self {
                memory: external_memory_fd::Device::new(instance, device),
                semaphore: external_semaphore_fd::Device::new(instance, device),
            }
        }

        pub(crate) fn memory_handle_type() -> vk::ExternalMemoryHandleTypeFlags {
            vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD
        }

        pub(crate) fn semaphore_handle_type() -> vk::ExternalSemaphoreHandleTypeFlags {
            vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD
        }

        pub(crate) fn export_memory(
            &self,
            memory: vk::DeviceMemory,
        ) -> Result<ExternalHandle, InteropError> {
            let info = vk::MemoryGetFdInfoKHR::default()
                .memory(memory)
                .handle_type(Self::memory_handle_type());
            // SAFETY: the memory was allocated with an fd export chain.
            let fd = unsafe { self.memory.get_memory_fd(&info) }.vk_context("vkGetMemoryFdKHR")?;
            Ok(ExternalHandle {
                kind: ExternalHandleKinds::OPAQUE_FD,
                raw: RawHandle::Fd(fd),
            })
        }

        pub(crate) fn export_semaphore(
            &self,
            semaphore: vk::Semaphore,
        ) -> Result<ExternalHandle, InteropError> {
            let info = vk::SemaphoreGetFdInfoKHR::default()
                .semaphore(semaphore)
                .handle_type(Self::semaphore_handle_type());
            // SAFETY: the semaphore was created with an fd export chain.
            let fd = unsafe { self.semaphore.get_semaphore_fd(&info) }
                .vk_context("vkGetSemaphoreFdKHR")?;
            Ok(ExternalHandle {
                kind: ExternalHandleKinds::OPAQUE_FD,
                raw: RawHandle::Fd(fd),
            })
        }
    }
}

#[cfg(windows)]
mod export {
    use super::*;
    use ash::khr::{external_memory_win32, external_semaphore_win32};

    pub(super) const MEMORY_EXTENSION: &CStr = external_memory_win32::NAME;
    pub(super) const SEMAPHORE_EXTENSION: &CStr = external_semaphore_win32::NAME;

    pub(crate) struct ExportFns {
        memory: external_memory_win32::Device,
        semaphore: external_semaphore_win32::Device,
    }

    impl ExportFns {
        pub(super) fn load(instance: &ash::Instance, device: &ash::Device) -> Self {
            Self {
                memory: external_memory_win32::Device::new(instance, device),
                semaphore: external_semaphore_win32::Device::new(instance, device),
            }
        }

        pub(crate) fn memory_handle_type() -> vk::ExternalMemoryHandleTypeFlags {
            vk::ExternalMemoryHandleTypeFlags::OPAQUE_WIN32
        }

        pub(crate) fn semaphore_handle_type() -> vk::ExternalSemaphoreHandleTypeFlags {
            vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_WIN32
        }

        pub(crate) fn export_memory(
            &self,
            memory: vk::DeviceMemory,
        ) -> Result<ExternalHandle, InteropError> {
            let info = vk::MemoryGetWin32HandleInfoKHR::default()
                .memory(memory)
                .handle_type(Self::memory_handle_type());
            // SAFETY: the memory was allocated with a Win32 export chain.
            let handle = unsafe { self.memory.get_memory_win32_handle(&info) }
                .vk_context("vkGetMemoryWin32HandleKHR")?;
            Ok(ExternalHandle {
                kind: ExternalHandleKinds::OPAQUE_WIN32,
                raw: RawHandle::Win32(handle as usize),
            })
        }

        pub(crate) fn export_semaphore(
            &self,
            semaphore: vk::Semaphore,
        ) -> Result<ExternalHandle, InteropError> {
            let info = vk::SemaphoreGetWin32HandleInfoKHR::default()
                .semaphore(semaphore)
                .handle_type(Self::semaphore_handle_type());
            // SAFETY: the semaphore was created with a Win32 export chain.
            let handle = unsafe { self.semaphore.get_semaphore_win32_handle(&info) }
                .vk_context("vkGetSemaphoreWin32HandleKHR")?;
            Ok(ExternalHandle {
                kind: ExternalHandleKinds::OPAQUE_WIN32,
                raw: RawHandle::Win32(handle as usize),
            })
        }
    }
}

pub(crate) use export::ExportFns;

/// A logical Vulkan device with one graphics queue.
pub struct VulkanDevice {
    pools: CommandPoolCache,
    export: Option<ExportFns>,
    queue: Mutex<vk::Queue>,
    queue_family: u32,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    physical: vk::PhysicalDevice,
    record: PhysicalDeviceRecord,
    timeline_supported: bool,
    ctx: Arc<DeviceContext>,
}

impl VulkanDevice {
    /// Creates a logical device on `physical`.
    ///
    /// External memory / semaphore export and timeline semaphores are
    /// enabled when the driver offers them. Without export support the
    /// device still works, but exportable allocations fail with `NotSupported`.
    ///
    /// ## Errors
    /// * `InteropError::NotSupported` - If the device has no graphics queue.
    /// * `InteropError::Driver` - If device creation fails.
    pub fn new(
        instance: Arc<VulkanInstance>,
        physical: &VulkanPhysicalDevice,
    ) -> Result<Self, InteropError> {
        let raw_instance = instance.raw();
        let pd = physical.handle;

        // --- 1. Queue family ---
        // SAFETY: plain queries on a live instance.
        let families = unsafe { raw_instance.get_physical_device_queue_family_properties(pd) };
        let queue_family = families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .ok_or_else(|| {
                InteropError::not_supported(format!(
                    "'{}' has no graphics queue",
                    physical.record.name
                ))
            })? as u32;

        // --- 2. Extensions and features ---
        // SAFETY: plain query.
        let available = unsafe { raw_instance.enumerate_device_extension_properties(pd) }
            .vk_context("vkEnumerateDeviceExtensionProperties")?;
        let has = |name: &CStr| {
            available
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == name))
        };
        let export_supported = has(export::MEMORY_EXTENSION) && has(export::SEMAPHORE_EXTENSION);
        let extensions: Vec<*const std::ffi::c_char> = if export_supported {
            vec![
                export::MEMORY_EXTENSION.as_ptr(),
                export::SEMAPHORE_EXTENSION.as_ptr(),
            ]
        } else {
            log::warn!(
                "'{}' cannot export memory or semaphores; interop will be unavailable",
                physical.record.name
            );
            Vec::new()
        };

        let mut supported12 = vk::PhysicalDeviceVulkan12Features::default();
        {
            let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut supported12);
            // SAFETY: the chain only contains a 1.2 feature struct.
            unsafe { raw_instance.get_physical_device_features2(pd, &mut features2) };
        }
        let timeline_supported = supported12.timeline_semaphore == vk::TRUE;

        // --- 3. Device ---
        let priorities = [1.0f32];
        let queue_info = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities)];
        let mut enabled12 =
            vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(timeline_supported);
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_info)
            .enabled_extension_names(&extensions)
            .push_next(&mut enabled12);
        // SAFETY: every pointer in `create_info` refers to locals alive for the call.
        let device = unsafe { raw_instance.create_device(pd, &create_info, None) }
            .vk_context("vkCreateDevice")?;

        let export = export_supported.then(|| ExportFns::load(raw_instance, &device));
        // SAFETY: family and index were requested above.
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        // SAFETY: plain query.
        let memory_properties = unsafe { raw_instance.get_physical_device_memory_properties(pd) };

        let ctx = Arc::new(DeviceContext {
            device,
            instance: Arc::clone(&instance),
        });
        log::info!(
            "Created Vulkan device on '{}' (queue family {queue_family}, timeline semaphores: {timeline_supported})",
            physical.record.name
        );
        Ok(Self {
            pools: CommandPoolCache::new(Arc::clone(&ctx), queue_family),
            export,
            queue: Mutex::new(queue),
            queue_family,
            memory_properties,
            physical: pd,
            record: physical.record.clone(),
            timeline_supported,
            ctx,
        })
    }

    /// The shared device handle.
    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    /// The raw device function table.
    pub fn raw(&self) -> &ash::Device {
        self.ctx.raw()
    }

    /// The physical device handle.
    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    /// The graphics queue, locked for submission.
    pub fn queue(&self) -> &Mutex<vk::Queue> {
        &self.queue
    }

    /// The family of [`VulkanDevice::queue`].
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Per-thread command pools on the graphics family.
    pub fn command_pools(&self) -> &CommandPoolCache {
        &self.pools
    }

    /// Whether timeline semaphores are enabled.
    pub fn timeline_supported(&self) -> bool {
        self.timeline_supported
    }

    pub(crate) fn export_fns(&self) -> Option<&ExportFns> {
        self.export.as_ref()
    }

    /// Picks a memory type allowed by `type_bits` with all of `required`.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        let props = &self.memory_properties;
        (0..props.memory_type_count).find(|&i| {
            type_bits & (1 << i) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
    }
}

impl RenderInteropDevice for VulkanDevice {
    type Buffer = VulkanBuffer;
    type Image = VulkanImage;
    type Semaphore = VulkanSemaphore;
    type CommandBuffer = vk::CommandBuffer;

    fn record(&self) -> &PhysicalDeviceRecord {
        &self.record
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<VulkanBuffer, InteropError> {
        VulkanBuffer::new(self, desc)
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<VulkanImage, InteropError> {
        VulkanImage::new(self, desc)
    }

    fn create_semaphore(&self, desc: &SemaphoreDesc) -> Result<VulkanSemaphore, InteropError> {
        VulkanSemaphore::new(self, desc)
    }

    fn upload_buffer(
        &self,
        buffer: &VulkanBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), InteropError> {
        if data.is_empty() {
            return Ok(());
        }
        let len = data.len() as u64;
        if offset
            .checked_add(len)
            .map_or(true, |end| end > buffer.requested_size())
        {
            return Err(InteropError::precondition(format!(
                "upload of {len} bytes at offset {offset} overruns a {}-byte buffer",
                buffer.requested_size()
            )));
        }
        let staging = VulkanBuffer::new(
            self,
            &BufferDesc {
                size: len,
                usage: BufferUsage::TRANSFER_SRC | BufferUsage::HOST_VISIBLE,
                exportable: false,
            },
        )?;
        staging.write_mapped(0, data)?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: offset,
            size: len,
        };
        self.pools.single_time(&self.queue, &[], &[], |device, cmd| {
            // SAFETY: both buffers are alive until the fence wait returns.
            unsafe { device.cmd_copy_buffer(cmd, staging.raw(), buffer.raw(), &[region]) };
            Ok(())
        })
    }

    /// Shared images stay in `GENERAL` layout between hand-offs; `dst` is
    /// fully overwritten, so its previous contents are discarded.
    fn copy_image(&self, src: &VulkanImage, dst: &VulkanImage) -> Result<(), InteropError> {
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let barrier = |image: vk::Image, old: vk::ImageLayout, src_access, dst_access| {
            vk::ImageMemoryBarrier::default()
                .image(image)
                .old_layout(old)
                .new_layout(vk::ImageLayout::GENERAL)
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .subresource_range(range)
        };
        // Between compressed and uncompressed formats the extent is in source texels.
        let extent: vk::Extent3D = src.extent().into_vk();
        let region = vk::ImageCopy {
            src_subresource: layers,
            src_offset: vk::Offset3D::default(),
            dst_subresource: layers,
            dst_offset: vk::Offset3D::default(),
            extent,
        };
        self.pools.single_time(&self.queue, &[], &[], |device, cmd| {
            let before = [
                barrier(
                    src.raw(),
                    vk::ImageLayout::GENERAL,
                    vk::AccessFlags::MEMORY_WRITE,
                    vk::AccessFlags::TRANSFER_READ,
                ),
                barrier(
                    dst.raw(),
                    vk::ImageLayout::UNDEFINED,
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::TRANSFER_WRITE,
                ),
            ];
            let after = [barrier(
                dst.raw(),
                vk::ImageLayout::GENERAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            )];
            // SAFETY: both images are alive until the fence wait returns.
            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &before,
                );
                device.cmd_copy_image(
                    cmd,
                    src.raw(),
                    vk::ImageLayout::GENERAL,
                    dst.raw(),
                    vk::ImageLayout::GENERAL,
                    &[region],
                );
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &after,
                );
            }
            Ok(())
        })
    }

    fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        waits: &[SemaphoreValue<'_, VulkanSemaphore>],
        signals: &[SemaphoreValue<'_, VulkanSemaphore>],
    ) -> Result<(), InteropError> {
        let slot = |s: &SemaphoreValue<'_, VulkanSemaphore>| SemaphoreSlot {
            semaphore: s.semaphore.raw(),
            value: s.value,
        };
        let waits: Vec<SemaphoreSlot> = waits.iter().map(slot).collect();
        let signals: Vec<SemaphoreSlot> = signals.iter().map(slot).collect();
        commands::submit(
            self.ctx.raw(),
            &self.queue,
            command_buffers,
            &waits,
            &signals,
            vk::Fence::null(),
        )
    }

    fn finish(&self) -> Result<(), InteropError> {
        let _queue = self
            .queue
            .lock()
            .map_err(|_| InteropError::precondition("Vulkan queue lock poisoned"))?;
        // SAFETY: the queue lock keeps submissions out while waiting.
        unsafe { self.ctx.raw().device_wait_idle() }.vk_context("vkDeviceWaitIdle")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        // SAFETY: no submission can race with drop.
        if let Err(e) = unsafe { self.ctx.raw().device_wait_idle() } {
            log::warn!("vkDeviceWaitIdle failed while dropping the device: {e:?}");
        }
    }
}
