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

//! Exportable binary and timeline semaphores.

use super::device::{DeviceContext, ExportFns, VulkanDevice};
use super::VkResultExt;
use crate::platform::close_raw_handle;
use ash::vk;
use std::sync::Arc;
use tandem_core::resource::ExternalHandle;
use tandem_core::sync::{SemaphoreDesc, SemaphoreKind, WaitStatus};
use tandem_core::traits::ExportedSemaphore;
use tandem_core::InteropError;

/// A Vulkan semaphore that may be shared with a compute API.
pub struct VulkanSemaphore {
    ctx: Arc<DeviceContext>,
    semaphore: vk::Semaphore,
    kind: SemaphoreKind,
    export: Option<ExternalHandle>,
}

impl VulkanSemaphore {
    /// Creates a semaphore and exports it if requested.
    ///
    /// ## Errors
    /// * `InteropError::NotSupported` - If a timeline is requested on a device
    ///   without timeline semaphores, or export is unavailable.
    pub fn new(device: &VulkanDevice, desc: &SemaphoreDesc) -> Result<Self, InteropError> {
        if desc.kind == SemaphoreKind::Timeline && !device.timeline_supported() {
            return Err(InteropError::not_supported(
                "the Vulkan device has no timeline semaphores",
            ));
        }
        let export = if desc.exportable {
            Some(device.export_fns().ok_or_else(|| {
                InteropError::not_supported("the Vulkan device cannot export semaphores")
            })?)
        } else {
            None
        };

        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(match desc.kind {
                SemaphoreKind::Timeline => vk::SemaphoreType::TIMELINE,
                SemaphoreKind::Binary => vk::SemaphoreType::BINARY,
            })
            .initial_value(match desc.kind {
                SemaphoreKind::Timeline => desc.initial_value,
                SemaphoreKind::Binary => 0,
            });
        let mut export_info = vk::ExportSemaphoreCreateInfo::default()
            .handle_types(ExportFns::semaphore_handle_type());
        let mut info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        if export.is_some() {
            info = info.push_next(&mut export_info);
        }
        let raw = device.raw();
        // SAFETY: the chain only borrows locals alive for the call.
        let semaphore =
            unsafe { raw.create_semaphore(&info, None) }.vk_context("vkCreateSemaphore")?;

        let handle = match export.map(|fns| fns.export_semaphore(semaphore)).transpose() {
            Ok(handle) => handle,
            Err(e) => {
                // SAFETY: nothing references the semaphore yet.
                unsafe { raw.destroy_semaphore(semaphore, None) };
                return Err(e);
            }
        };
        log::debug!(
            "Created {:?} Vulkan semaphore (exported: {})",
            desc.kind,
            handle.is_some()
        );
        Ok(Self {
            ctx: Arc::clone(device.context()),
            semaphore,
            kind: desc.kind,
            export: handle,
        })
    }

    /// The raw semaphore handle.
    pub fn raw(&self) -> vk::Semaphore {
        self.semaphore
    }

    fn require_timeline(&self, what: &str) -> Result<(), InteropError> {
        if self.kind == SemaphoreKind::Timeline {
            Ok(())
        } else {
            Err(InteropError::precondition(format!(
                "{what} needs a timeline semaphore"
            )))
        }
    }
}

impl ExportedSemaphore for VulkanSemaphore {
    fn kind(&self) -> SemaphoreKind {
        self.kind
    }

    fn take_export_handle(&mut self) -> Option<ExternalHandle> {
        self.export.take()
    }

    fn counter_value(&self) -> Result<u64, InteropError> {
        self.require_timeline("reading the counter")?;
        // SAFETY: timeline semaphore on a live device.
        unsafe { self.ctx.raw().get_semaphore_counter_value(self.semaphore) }
            .vk_context("vkGetSemaphoreCounterValue")
    }

    fn wait_on_cpu(&self, value: u64, timeout_ns: u64) -> WaitStatus {
        if self.kind != SemaphoreKind::Timeline {
            log::error!("Binary semaphores cannot be waited on from the CPU");
            return WaitStatus::WaitFailed;
        }
        let semaphores = [self.semaphore];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        // SAFETY: timeline semaphore on a live device.
        match unsafe { self.ctx.raw().wait_semaphores(&info, timeout_ns) } {
            Ok(()) => WaitStatus::Signaled,
            Err(vk::Result::TIMEOUT) => WaitStatus::TimedOut,
            Err(e) => {
                log::error!("vkWaitSemaphores for value {value} failed: {e:?}");
                WaitStatus::WaitFailed
            }
        }
    }

    fn signal_on_cpu(&self, value: u64) -> Result<(), InteropError> {
        self.require_timeline("signalling from the CPU")?;
        let info = vk::SemaphoreSignalInfo::default()
            .semaphore(self.semaphore)
            .value(value);
        // SAFETY: timeline semaphore on a live device.
        unsafe { self.ctx.raw().signal_semaphore(&info) }.vk_context("vkSignalSemaphore")
    }
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        if let Some(handle) = self.export.take() {
            close_raw_handle(handle.raw);
        }
        // SAFETY: the owner waited for every submission using the semaphore.
        unsafe { self.ctx.raw().destroy_semaphore(self.semaphore, None) };
    }
}
