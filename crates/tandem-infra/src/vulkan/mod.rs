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

//! Vulkan render backend built on `ash`.
//!
//! The backend only covers what interop needs: exportable allocations,
//! exportable semaphores, semaphore-aware submission and the blit pass.

pub mod blit;
pub mod commands;
pub mod conversions;
pub mod device;
pub mod instance;
pub mod memory;
pub mod registry;
pub mod semaphore;

pub use blit::{BlitSync, VulkanBlitPass};
pub use commands::CommandPoolCache;
pub use device::VulkanDevice;
pub use instance::VulkanInstance;
pub use memory::{VulkanBuffer, VulkanImage};
pub use registry::VulkanPhysicalDevice;
pub use semaphore::VulkanSemaphore;

use ash::vk;
use tandem_core::InteropError;

/// Maps a failed `vk::Result` onto the interop error taxonomy.
pub(crate) fn vk_error(call: &'static str, result: vk::Result) -> InteropError {
    log::error!("Vulkan call {call} failed: {result:?}");
    match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            InteropError::ResourceExhausted {
                what: format!("Vulkan {call}"),
                requested_bytes: 0,
            }
        }
        other => InteropError::Driver {
            api: "Vulkan",
            call,
            code: i64::from(other.as_raw()),
            message: format!("{other:?}"),
        },
    }
}

/// Shorthand for `.map_err(|e| vk_error(call, e))`.
pub(crate) trait VkResultExt<T> {
    fn vk_context(self, call: &'static str) -> Result<T, InteropError>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn vk_context(self, call: &'static str) -> Result<T, InteropError> {
        self.map_err(|e| vk_error(call, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::ErrorKind;

    #[test]
    fn out_of_memory_is_resource_exhausted() {
        let err = vk_error("vkAllocateMemory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn other_failures_keep_the_raw_code() {
        let err = vk_error("vkQueueSubmit", vk::Result::ERROR_DEVICE_LOST);
        match err {
            InteropError::Driver { api, call, code, .. } => {
                assert_eq!(api, "Vulkan");
                assert_eq!(call, "vkQueueSubmit");
                assert_eq!(code, -4);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
