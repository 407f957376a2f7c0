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

//! Semaphores signalled and waited on by both APIs.

use crate::platform::close_raw_handle;
use std::fmt;
use std::sync::Arc;
use tandem_core::resource::RawHandle;
use tandem_core::sync::{ObservedValue, SemaphoreKind, TimelineCursor, WaitStatus, INFINITE_TIMEOUT};
use tandem_core::traits::{ComputeDevice, ExportedSemaphore, ExternalSemaphoreId, StreamId};
use tandem_core::InteropError;

/// Compute-side import of a render semaphore.
pub(crate) struct ComputeSemaphore {
    pub(crate) device: Arc<dyn ComputeDevice>,
    pub(crate) semaphore: ExternalSemaphoreId,
    pub(crate) retained: Option<RawHandle>,
}

impl Drop for ComputeSemaphore {
    fn drop(&mut self) {
        if let Err(e) = self.device.release_semaphore(self.semaphore) {
            log::error!("Failed to release imported semaphore {:?}: {e}", self.semaphore);
        }
        if let Some(handle) = self.retained.take() {
            close_raw_handle(handle);
        }
    }
}

/// A render semaphore plus its compute import and timeline bookkeeping.
pub struct SharedSemaphore<S: ExportedSemaphore> {
    cursor: TimelineCursor,
    observed: ObservedValue,
    // Field order is drop order: compute side first.
    compute: Option<ComputeSemaphore>,
    render: S,
}

impl<S: ExportedSemaphore> SharedSemaphore<S> {
    pub(crate) fn new(render: S, compute: Option<ComputeSemaphore>, initial_value: u64) -> Self {
        let observed = ObservedValue::default();
        observed.observe(initial_value);
        Self {
            cursor: TimelineCursor::new(initial_value),
            observed,
            compute,
            render,
        }
    }

    pub fn kind(&self) -> SemaphoreKind {
        self.render.kind()
    }

    /// The render-side semaphore, for render-queue submissions.
    pub fn render(&self) -> &S {
        &self.render
    }

    /// Hands out signal / wait values for this semaphore.
    pub fn cursor(&self) -> &TimelineCursor {
        &self.cursor
    }

    /// Whether the compute API imported the semaphore.
    pub fn is_shared(&self) -> bool {
        self.compute.is_some()
    }

    fn compute(&self) -> Result<&ComputeSemaphore, InteropError> {
        self.compute
            .as_ref()
            .ok_or_else(|| InteropError::precondition("semaphore is not shared with a compute API"))
    }

    /// Enqueues a wait for `value` on a compute stream.
    pub fn wait_on_queue(&self, stream: StreamId, value: u64) -> Result<(), InteropError> {
        let compute = self.compute()?;
        compute.device.wait_semaphore(compute.semaphore, value, stream)
    }

    /// Enqueues a signal of `value` on a compute stream.
    pub fn signal_on_queue(&self, stream: StreamId, value: u64) -> Result<(), InteropError> {
        let compute = self.compute()?;
        compute.device.signal_semaphore(compute.semaphore, value, stream)?;
        self.cursor.mark_submitted(value);
        Ok(())
    }

    /// Blocks the calling thread until the counter reaches `value`.
    pub fn wait_on_cpu(&self, value: u64) -> WaitStatus {
        self.wait_on_cpu_timeout(value, INFINITE_TIMEOUT)
    }

    /// Blocks until the counter reaches `value` or `timeout_ns` elapses.
    ///
    /// The semaphore stays usable whatever the outcome.
    pub fn wait_on_cpu_timeout(&self, value: u64, timeout_ns: u64) -> WaitStatus {
        let status = self.render.wait_on_cpu(value, timeout_ns);
        match status {
            WaitStatus::Signaled => {
                self.observed.observe(value);
            }
            WaitStatus::TimedOut => log::debug!("CPU wait for value {value} timed out"),
            WaitStatus::WaitFailed => log::error!("CPU wait for value {value} failed"),
        }
        status
    }

    /// The counter as observed from the CPU. Never decreases between calls.
    ///
    /// Binary semaphores have no readable counter; the value last observed by
    /// a successful CPU wait is returned.
    pub fn current_value(&self) -> Result<u64, InteropError> {
        match self.kind() {
            SemaphoreKind::Timeline => Ok(self.observed.observe(self.render.counter_value()?)),
            SemaphoreKind::Binary => Ok(self.observed.get()),
        }
    }
}

impl<S: ExportedSemaphore> fmt::Debug for SharedSemaphore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSemaphore")
            .field("kind", &self.kind())
            .field("shared", &self.is_shared())
            .field("last_issued", &self.cursor.last_issued())
            .field("highest_submitted", &self.cursor.highest_submitted())
            .finish()
    }
}
