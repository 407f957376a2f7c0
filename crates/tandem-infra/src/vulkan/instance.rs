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

//! The Vulkan loader and instance.

use super::VkResultExt;
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;
use tandem_core::InteropError;

const APP_NAME: &CStr = c"Tandem";

/// A loaded Vulkan entry point and a Vulkan 1.2 instance.
///
/// Shared by every device created from it; destroyed with the last reference.
pub struct VulkanInstance {
    entry: ash::Entry,
    instance: ash::Instance,
}

impl VulkanInstance {
    /// Loads the Vulkan loader and creates an instance.
    ///
    /// ## Errors
    /// * `InteropError::NotSupported` - If no loader is installed or the
    ///   loader only offers Vulkan 1.0/1.1.
    /// * `InteropError::Driver` - If instance creation fails.
    pub fn new() -> Result<Arc<Self>, InteropError> {
        // SAFETY: the loader is only used through the returned entry.
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            log::info!("Vulkan loader unavailable: {e}");
            InteropError::not_supported(format!("Vulkan loader not found: {e}"))
        })?;

        // SAFETY: plain query on a valid entry.
        let version = unsafe { entry.try_enumerate_instance_version() }
            .vk_context("vkEnumerateInstanceVersion")?
            .unwrap_or(vk::API_VERSION_1_0);
        if version < vk::API_VERSION_1_2 {
            return Err(InteropError::not_supported(format!(
                "Vulkan 1.2 is required, the loader offers {}.{}",
                vk::api_version_major(version),
                vk::api_version_minor(version)
            )));
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(APP_NAME)
            .engine_name(APP_NAME)
            .api_version(vk::API_VERSION_1_2);
        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        // SAFETY: `create_info` only borrows locals that outlive the call.
        let instance =
            unsafe { entry.create_instance(&create_info, None) }.vk_context("vkCreateInstance")?;
        log::info!(
            "Created Vulkan instance (loader {}.{}.{})",
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version)
        );
        Ok(Arc::new(Self { entry, instance }))
    }

    /// The loader entry points.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// The instance-level function table.
    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        // SAFETY: every device holds an `Arc` to this instance, so none is alive.
        unsafe { self.instance.destroy_instance(None) };
        log::debug!("Destroyed Vulkan instance");
    }
}
