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

//! Per-thread command pools and semaphore-aware queue submission.

use super::device::DeviceContext;
use super::VkResultExt;
use ash::vk;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use tandem_core::InteropError;

/// A semaphore and the value a submission waits on or signals.
///
/// The value is ignored by the driver for binary semaphores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreSlot {
    /// The raw semaphore.
    pub semaphore: vk::Semaphore,
    /// Timeline value.
    pub value: u64,
}

/// Command pools keyed by (thread, queue family).
///
/// Vulkan command pools must not be used from two threads at once. Giving
/// every recording thread its own pool avoids locking the pool itself; the
/// map lock is only held while looking a pool up.
pub struct CommandPoolCache {
    ctx: Arc<DeviceContext>,
    queue_family: u32,
    pools: Mutex<HashMap<(ThreadId, u32), vk::CommandPool>>,
}

impl CommandPoolCache {
    /// Creates an empty cache for `queue_family`.
    pub fn new(ctx: Arc<DeviceContext>, queue_family: u32) -> Self {
        Self {
            ctx,
            queue_family,
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn pool_for_current_thread(&self) -> Result<vk::CommandPool, InteropError> {
        let key = (thread::current().id(), self.queue_family);
        let mut pools = self
            .pools
            .lock()
            .map_err(|_| InteropError::precondition("command pool cache poisoned"))?;
        if let Some(pool) = pools.get(&key) {
            return Ok(*pool);
        }
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue_family)
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            );
        // SAFETY: valid device and create info.
        let pool = unsafe { self.ctx.raw().create_command_pool(&info, None) }
            .vk_context("vkCreateCommandPool")?;
        log::trace!("Created command pool for {:?} on family {}", key.0, key.1);
        pools.insert(key, pool);
        Ok(pool)
    }

    /// Allocates a primary command buffer from the calling thread's pool.
    ///
    /// The buffer must be recorded, submitted and freed on this thread.
    pub fn allocate(&self) -> Result<vk::CommandBuffer, InteropError> {
        let pool = self.pool_for_current_thread()?;
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        // SAFETY: the pool belongs to this thread.
        let buffers = unsafe { self.ctx.raw().allocate_command_buffers(&info) }
            .vk_context("vkAllocateCommandBuffers")?;
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| InteropError::precondition("driver returned no command buffer"))
    }

    /// Returns a buffer obtained from [`CommandPoolCache::allocate`] on this thread.
    pub fn free(&self, command_buffer: vk::CommandBuffer) -> Result<(), InteropError> {
        let pool = self.pool_for_current_thread()?;
        // SAFETY: the buffer was allocated from this thread's pool and is not pending.
        unsafe { self.ctx.raw().free_command_buffers(pool, &[command_buffer]) };
        Ok(())
    }

    /// Resets every command buffer allocated from the calling thread's pool.
    ///
    /// ## Errors
    /// * `InteropError::Driver` - If the reset fails.
    pub fn reset_pool(&self) -> Result<(), InteropError> {
        let pool = self.pool_for_current_thread()?;
        // SAFETY: none of this thread's buffers may be pending; callers wait first.
        unsafe {
            self.ctx
                .raw()
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        }
        .vk_context("vkResetCommandPool")
    }

    /// Records with `record`, submits, and blocks on a fence until the GPU is done.
    ///
    /// ## Arguments
    /// * `queue` - The queue, locked only for the submission itself.
    /// * `waits` / `signals` - Semaphores bracketing the work.
    /// * `record` - Records commands into the begun command buffer.
    pub fn single_time<F>(
        &self,
        queue: &Mutex<vk::Queue>,
        waits: &[SemaphoreSlot],
        signals: &[SemaphoreSlot],
        record: F,
    ) -> Result<(), InteropError>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<(), InteropError>,
    {
        let device = self.ctx.raw();
        let cmd = self.allocate()?;
        let result = (|| {
            let begin = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            // SAFETY: freshly allocated buffer owned by this thread.
            unsafe { device.begin_command_buffer(cmd, &begin) }
                .vk_context("vkBeginCommandBuffer")?;
            record(device, cmd)?;
            // SAFETY: the buffer is in the recording state.
            unsafe { device.end_command_buffer(cmd) }.vk_context("vkEndCommandBuffer")?;

            // SAFETY: plain object creation.
            let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
                .vk_context("vkCreateFence")?;
            let submitted = submit(device, queue, &[cmd], waits, signals, fence).and_then(|()| {
                // SAFETY: the fence was just submitted.
                unsafe { device.wait_for_fences(&[fence], true, u64::MAX) }
                    .vk_context("vkWaitForFences")
            });
            // SAFETY: the fence is signalled or was never submitted.
            unsafe { device.destroy_fence(fence, None) };
            submitted
        })();
        self.free(cmd)?;
        result
    }
}

impl Drop for CommandPoolCache {
    fn drop(&mut self) {
        let pools = match self.pools.get_mut() {
            Ok(pools) => pools,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, pool) in pools.drain() {
            // SAFETY: the owning device waited for idle before dropping the cache.
            unsafe { self.ctx.raw().destroy_command_pool(pool, None) };
        }
    }
}

/// Submits `command_buffers` on `queue` with timeline-aware waits and signals.
///
/// Waits use `ALL_COMMANDS`: the other side of an interop handshake may
/// have written the resources with any stage.
pub(crate) fn submit(
    device: &ash::Device,
    queue: &Mutex<vk::Queue>,
    command_buffers: &[vk::CommandBuffer],
    waits: &[SemaphoreSlot],
    signals: &[SemaphoreSlot],
    fence: vk::Fence,
) -> Result<(), InteropError> {
    let wait_semaphores: Vec<vk::Semaphore> = waits.iter().map(|s| s.semaphore).collect();
    let wait_values: Vec<u64> = waits.iter().map(|s| s.value).collect();
    let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; waits.len()];
    let signal_semaphores: Vec<vk::Semaphore> = signals.iter().map(|s| s.semaphore).collect();
    let signal_values: Vec<u64> = signals.iter().map(|s| s.value).collect();

    let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
        .wait_semaphore_values(&wait_values)
        .signal_semaphore_values(&signal_values);
    let submit_info = vk::SubmitInfo::default()
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .command_buffers(command_buffers)
        .signal_semaphores(&signal_semaphores)
        .push_next(&mut timeline_info);

    let queue = queue
        .lock()
        .map_err(|_| InteropError::precondition("Vulkan queue lock poisoned"))?;
    // SAFETY: the queue is externally synchronized by the lock held above.
    unsafe { device.queue_submit(*queue, &[submit_info], fence) }.vk_context("vkQueueSubmit")
}
