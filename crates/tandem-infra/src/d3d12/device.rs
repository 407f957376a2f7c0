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

//! The D3D12 logical device and its direct queue.

use super::fence::D3d12Fence;
use super::memory::{D3d12Buffer, D3d12Image};
use super::registry::D3d12Adapter;
use super::HrResultExt;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tandem_core::device::PhysicalDeviceRecord;
use tandem_core::resource::{BufferDesc, BufferUsage, ImageDesc};
use tandem_core::sync::{SemaphoreDesc, WaitStatus};
use tandem_core::traits::{RenderInteropDevice, SemaphoreValue};
use tandem_core::InteropError;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::INFINITE;

/// A D3D12 device with one direct queue.
pub struct D3d12Device {
    device: ID3D12Device,
    queue: Mutex<ID3D12CommandQueue>,
    idle_fence: D3d12Fence,
    idle_value: AtomicU64,
    record: PhysicalDeviceRecord,
}

// SAFETY: D3D12 devices are free-threaded; the queue is only used under its mutex.
unsafe impl Send for D3d12Device {}
// SAFETY: as above.
unsafe impl Sync for D3d12Device {}

impl D3d12Device {
    /// Creates a feature level 11.0 device on `adapter`.
    pub fn new(adapter: &D3d12Adapter) -> Result<Self, InteropError> {
        let mut device: Option<ID3D12Device> = None;
        // SAFETY: valid adapter and output slot.
        unsafe { D3D12CreateDevice(adapter.raw(), D3D_FEATURE_LEVEL_11_0, &mut device) }
            .hr_context("D3D12CreateDevice")?;
        let device = device.ok_or_else(|| InteropError::precondition("D3D12CreateDevice returned no device"))?;

        let queue_desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            ..Default::default()
        };
        // SAFETY: valid device and description.
        let queue: ID3D12CommandQueue = unsafe { device.CreateCommandQueue(&queue_desc) }
            .hr_context("ID3D12Device::CreateCommandQueue")?;
        let idle_fence = D3d12Fence::new(
            &device,
            &SemaphoreDesc {
                exportable: false,
                ..SemaphoreDesc::timeline()
            },
        )?;
        log::info!("Created D3D12 device on '{}'", adapter.record().name);
        Ok(Self {
            device,
            queue: Mutex::new(queue),
            idle_fence,
            idle_value: AtomicU64::new(0),
            record: adapter.record().clone(),
        })
    }

    pub fn raw(&self) -> &ID3D12Device {
        &self.device
    }

    pub fn queue(&self) -> &Mutex<ID3D12CommandQueue> {
        &self.queue
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, ID3D12CommandQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records one command list with `record`, executes it and waits.
    fn execute_once(&self, record: impl FnOnce(&ID3D12GraphicsCommandList)) -> Result<(), InteropError> {
        // SAFETY: valid device.
        let allocator: ID3D12CommandAllocator =
            unsafe { self.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
                .hr_context("ID3D12Device::CreateCommandAllocator")?;
        // SAFETY: the allocator outlives the list's execution (we wait below).
        let list: ID3D12GraphicsCommandList = unsafe {
            self.device.CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                &allocator,
                None::<&ID3D12PipelineState>,
            )
        }
        .hr_context("ID3D12Device::CreateCommandList")?;
        record(&list);
        // SAFETY: the list is open and owned by this thread.
        unsafe { list.Close() }.hr_context("ID3D12GraphicsCommandList::Close")?;
        self.submit(&[list], &[], &[])?;
        self.finish()
    }

    fn copy_buffer(&self, dst: &D3d12Buffer, offset: u64, src: &D3d12Buffer, size: u64) -> Result<(), InteropError> {
        self.execute_once(|list| {
            // SAFETY: both buffers are alive; COMMON buffers are promoted to COPY_DEST implicitly.
            unsafe { list.CopyBufferRegion(dst.raw(), offset, src.raw(), 0, size) };
        })
    }
}

/// A borrowed resource reference for descriptor structs; no reference count is taken.
fn borrowed(resource: &ID3D12Resource) -> ManuallyDrop<Option<ID3D12Resource>> {
    // SAFETY: the struct holding the copy never outlives `resource` and is never dropped.
    unsafe { std::mem::transmute_copy(resource) }
}

fn subresource_zero(resource: &ID3D12Resource) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: borrowed(resource),
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: 0 },
    }
}

fn transition(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: borrowed(resource),
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: before,
                StateAfter: after,
            }),
        },
    }
}

impl RenderInteropDevice for D3d12Device {
    type Buffer = D3d12Buffer;
    type Image = D3d12Image;
    type Semaphore = D3d12Fence;
    type CommandBuffer = ID3D12GraphicsCommandList;

    fn record(&self) -> &PhysicalDeviceRecord {
        &self.record
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<D3d12Buffer, InteropError> {
        D3d12Buffer::new(&self.device, desc)
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<D3d12Image, InteropError> {
        D3d12Image::new(&self.device, desc)
    }

    fn create_semaphore(&self, desc: &SemaphoreDesc) -> Result<D3d12Fence, InteropError> {
        D3d12Fence::new(&self.device, desc)
    }

    fn upload_buffer(&self, buffer: &D3d12Buffer, offset: u64, data: &[u8]) -> Result<(), InteropError> {
        if offset + data.len() as u64 > buffer.requested_size() {
            return Err(InteropError::precondition(format!(
                "upload of {} bytes at {offset} overflows a {}-byte buffer",
                data.len(),
                buffer.requested_size()
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        if buffer.is_host_visible() {
            return buffer.write_mapped(offset, data);
        }
        let staging = D3d12Buffer::new(
            &self.device,
            &BufferDesc {
                size: data.len() as u64,
                usage: BufferUsage::HOST_VISIBLE | BufferUsage::TRANSFER_SRC,
                exportable: false,
            },
        )?;
        staging.write_mapped(0, data)?;
        self.copy_buffer(buffer, offset, &staging, data.len() as u64)
    }

    /// Shared textures rest in `COMMON`; the source is promoted to
    /// `COPY_SOURCE` implicitly and decays back after execution.
    fn copy_image(&self, src: &D3d12Image, dst: &D3d12Image) -> Result<(), InteropError> {
        let src_location = subresource_zero(src.raw());
        let dst_location = subresource_zero(dst.raw());
        let to_copy = [transition(dst.raw(), D3D12_RESOURCE_STATE_COMMON, D3D12_RESOURCE_STATE_COPY_DEST)];
        let to_common = [transition(dst.raw(), D3D12_RESOURCE_STATE_COPY_DEST, D3D12_RESOURCE_STATE_COMMON)];
        self.execute_once(|list| {
            // SAFETY: both textures are alive until `finish` returns; BC6H and
            // R32G32B32A32_UINT share a 16-byte block and may be copied between.
            unsafe {
                list.ResourceBarrier(&to_copy);
                list.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
                list.ResourceBarrier(&to_common);
            }
        })
    }

    fn submit(
        &self,
        command_buffers: &[ID3D12GraphicsCommandList],
        waits: &[SemaphoreValue<'_, D3d12Fence>],
        signals: &[SemaphoreValue<'_, D3d12Fence>],
    ) -> Result<(), InteropError> {
        let lists = command_buffers
            .iter()
            .map(|list| list.cast::<ID3D12CommandList>().map(Some))
            .collect::<windows::core::Result<Vec<_>>>()
            .hr_context("ID3D12GraphicsCommandList::QueryInterface")?;
        let queue = self.lock_queue();
        for wait in waits {
            // SAFETY: valid fence.
            unsafe { queue.Wait(wait.semaphore.raw(), wait.value) }
                .hr_context("ID3D12CommandQueue::Wait")?;
        }
        if !lists.is_empty() {
            // SAFETY: every list was closed by the caller.
            unsafe { queue.ExecuteCommandLists(&lists) };
        }
        for signal in signals {
            // SAFETY: valid fence.
            unsafe { queue.Signal(signal.semaphore.raw(), signal.value) }
                .hr_context("ID3D12CommandQueue::Signal")?;
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), InteropError> {
        let value = self.idle_value.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let queue = self.lock_queue();
            // SAFETY: valid fence.
            unsafe { queue.Signal(self.idle_fence.raw(), value) }
                .hr_context("ID3D12CommandQueue::Signal")?;
        }
        match self.idle_fence.wait(value, INFINITE)? {
            WaitStatus::Signaled => Ok(()),
            status => Err(InteropError::Driver {
                api: "D3D12",
                call: "WaitForSingleObject",
                code: 0,
                message: format!("idle wait ended with {status:?}"),
            }),
        }
    }
}

impl Drop for D3d12Device {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::warn!("Failed to drain the D3D12 queue on drop: {e}");
        }
    }
}
