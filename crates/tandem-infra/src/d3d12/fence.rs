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

//! Shared `ID3D12Fence` objects standing in for timeline semaphores.

use super::{raw_handle, HrResultExt};
use crate::platform::close_raw_handle;
use tandem_core::device::ExternalHandleKinds;
use tandem_core::resource::ExternalHandle;
use tandem_core::sync::{SemaphoreDesc, SemaphoreKind, WaitStatus, INFINITE_TIMEOUT};
use tandem_core::traits::ExportedSemaphore;
use tandem_core::InteropError;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, GENERIC_ALL, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::{
    ID3D12Device, ID3D12Fence, D3D12_FENCE_FLAG_NONE, D3D12_FENCE_FLAG_SHARED,
};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};

/// A D3D12 fence, optionally shared through an NT handle.
pub struct D3d12Fence {
    fence: ID3D12Fence,
    export: Option<ExternalHandle>,
}

// SAFETY: ID3D12Fence is free-threaded.
unsafe impl Send for D3d12Fence {}
// SAFETY: as above.
unsafe impl Sync for D3d12Fence {}

impl D3d12Fence {
    /// Creates a fence starting at `desc.initial_value`.
    ///
    /// ## Errors
    /// * `InteropError::NotSupported` - For binary semaphores, which D3D12 lacks.
    pub fn new(device: &ID3D12Device, desc: &SemaphoreDesc) -> Result<Self, InteropError> {
        if desc.kind == SemaphoreKind::Binary {
            return Err(InteropError::not_supported(
                "D3D12 fences are monotonic counters; binary semaphores do not exist",
            ));
        }
        let flags = if desc.exportable {
            D3D12_FENCE_FLAG_SHARED
        } else {
            D3D12_FENCE_FLAG_NONE
        };
        // SAFETY: valid device.
        let fence: ID3D12Fence = unsafe { device.CreateFence(desc.initial_value, flags) }
            .hr_context("ID3D12Device::CreateFence")?;
        let export = if desc.exportable {
            // SAFETY: the fence was created with the shared flag.
            let handle = unsafe { device.CreateSharedHandle(&fence, None, GENERIC_ALL.0, PCWSTR::null()) }
                .hr_context("ID3D12Device::CreateSharedHandle")?;
            Some(ExternalHandle {
                kind: ExternalHandleKinds::D3D12_RESOURCE,
                raw: raw_handle(handle),
            })
        } else {
            None
        };
        Ok(Self { fence, export })
    }

    pub fn raw(&self) -> &ID3D12Fence {
        &self.fence
    }

    /// Blocks until the fence reaches `value`.
    pub(crate) fn wait(&self, value: u64, timeout_ms: u32) -> Result<WaitStatus, InteropError> {
        // SAFETY: valid fence.
        if unsafe { self.fence.GetCompletedValue() } >= value {
            return Ok(WaitStatus::Signaled);
        }
        // SAFETY: unnamed auto-reset event.
        let event = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .hr_context("CreateEventW")?;
        // SAFETY: the event outlives the wait below.
        let armed = unsafe { self.fence.SetEventOnCompletion(value, event) }
            .hr_context("ID3D12Fence::SetEventOnCompletion");
        let status = armed.map(|()| {
            // SAFETY: valid event handle.
            match unsafe { WaitForSingleObject(event, timeout_ms) } {
                WAIT_OBJECT_0 => WaitStatus::Signaled,
                WAIT_TIMEOUT => WaitStatus::TimedOut,
                _ => WaitStatus::WaitFailed,
            }
        });
        // SAFETY: the event is ours and no longer waited on.
        if let Err(e) = unsafe { CloseHandle(event) } {
            log::warn!("Failed to close fence event: {e}");
        }
        status
    }
}

/// Rounds a nanosecond timeout up to whole milliseconds.
fn timeout_ms(timeout_ns: u64) -> u32 {
    if timeout_ns == INFINITE_TIMEOUT {
        return INFINITE;
    }
    u32::try_from(timeout_ns.div_ceil(1_000_000)).unwrap_or(INFINITE - 1)
}

impl ExportedSemaphore for D3d12Fence {
    fn kind(&self) -> SemaphoreKind {
        SemaphoreKind::Timeline
    }

    fn take_export_handle(&mut self) -> Option<ExternalHandle> {
        self.export.take()
    }

    fn counter_value(&self) -> Result<u64, InteropError> {
        // SAFETY: valid fence.
        Ok(unsafe { self.fence.GetCompletedValue() })
    }

    fn wait_on_cpu(&self, value: u64, timeout_ns: u64) -> WaitStatus {
        self.wait(value, timeout_ms(timeout_ns)).unwrap_or_else(|e| {
            log::error!("Waiting on a D3D12 fence failed: {e}");
            WaitStatus::WaitFailed
        })
    }

    fn signal_on_cpu(&self, value: u64) -> Result<(), InteropError> {
        // SAFETY: valid fence.
        unsafe { self.fence.Signal(value) }.hr_context("ID3D12Fence::Signal")
    }
}

impl Drop for D3d12Fence {
    fn drop(&mut self) {
        if let Some(handle) = self.export.take() {
            close_raw_handle(handle.raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_round_up_to_milliseconds() {
        assert_eq!(timeout_ms(0), 0);
        assert_eq!(timeout_ms(1), 1);
        assert_eq!(timeout_ms(2_000_000), 2);
        assert_eq!(timeout_ms(INFINITE_TIMEOUT), INFINITE);
        assert_eq!(timeout_ms(INFINITE_TIMEOUT - 1), INFINITE - 1);
    }
}
