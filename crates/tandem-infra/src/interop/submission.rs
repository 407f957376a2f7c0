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

//! Ordered hand-offs between the render queue and a compute stream.
//!
//! A hand-off is a signal on one side followed by a wait on the other, both
//! on the same shared semaphore. The submitter picks the values from the
//! semaphore's [`TimelineCursor`](tandem_core::sync::TimelineCursor) and
//! flips the ownership of the resources that change hands. Resources with a
//! separate compute allocation are copied on the render queue between the
//! render work and the signal, or between the wait and the render work.

use super::semaphore::SharedSemaphore;
use super::shared::HandOff;
use std::sync::Arc;
use tandem_core::resource::ResourceOwnership;
use tandem_core::sync::{DriverWorkarounds, SemaphoreKind, WaitStatus};
use tandem_core::traits::{ComputeDevice, RenderInteropDevice, SemaphoreValue, StreamId};
use tandem_core::InteropError;

/// Submits render work and compute waits/signals in hand-off order.
pub struct InteropSubmitter<R: RenderInteropDevice> {
    render: Arc<R>,
    compute: Arc<dyn ComputeDevice>,
    stream: StreamId,
    workarounds: DriverWorkarounds,
}

impl<R: RenderInteropDevice> InteropSubmitter<R> {
    pub fn new(
        render: Arc<R>,
        compute: Arc<dyn ComputeDevice>,
        stream: StreamId,
        workarounds: DriverWorkarounds,
    ) -> Self {
        Self {
            render,
            compute,
            stream,
            workarounds,
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Submits `command_buffers` on the render queue, signals `semaphore`, and
    /// makes the compute stream wait for that signal.
    ///
    /// Returns the signalled value. `resources` are owned by compute afterwards.
    pub fn render_to_compute(
        &self,
        command_buffers: &[R::CommandBuffer],
        semaphore: &SharedSemaphore<R::Semaphore>,
        resources: &[&dyn HandOff<R>],
    ) -> Result<u64, InteropError> {
        let value = semaphore.cursor().next_signal();
        let signal = [SemaphoreValue {
            semaphore: semaphore.render(),
            value,
        }];
        if resources.iter().any(|r| r.copies_on_hand_off()) {
            self.render.submit(command_buffers, &[], &[])?;
            for resource in resources {
                resource.before_compute(&self.render)?;
            }
            self.render.submit(&[], &[], &signal)?;
        } else {
            self.render.submit(command_buffers, &[], &signal)?;
        }
        semaphore.cursor().mark_submitted(value);
        if self.workarounds.finish_after_signal {
            log::trace!("Finishing render queue after signal {value}");
            self.render.finish()?;
        }
        for resource in resources {
            resource.set_ownership(ResourceOwnership::Compute);
        }
        semaphore.wait_on_queue(self.stream, value)?;
        log::trace!("Render -> compute hand-off at value {value}");
        Ok(value)
    }

    /// Signals `semaphore` on the compute stream and submits `command_buffers`
    /// on the render queue waiting for it.
    ///
    /// Returns the signalled value. `resources` are owned by render afterwards.
    pub fn compute_to_render(
        &self,
        command_buffers: &[R::CommandBuffer],
        semaphore: &SharedSemaphore<R::Semaphore>,
        resources: &[&dyn HandOff<R>],
    ) -> Result<u64, InteropError> {
        let value = semaphore.cursor().next_signal();
        semaphore.signal_on_queue(self.stream, value)?;
        for resource in resources {
            resource.set_ownership(ResourceOwnership::Render);
        }
        let wait = [SemaphoreValue {
            semaphore: semaphore.render(),
            value,
        }];
        if resources.iter().any(|r| r.copies_on_hand_off()) {
            self.render.submit(&[], &wait, &[])?;
            for resource in resources {
                resource.after_compute(&self.render)?;
            }
            self.render.submit(command_buffers, &[], &[])?;
        } else {
            self.render.submit(command_buffers, &wait, &[])?;
        }
        log::trace!("Compute -> render hand-off at value {value}");
        Ok(value)
    }

    /// Waits for every timeline to reach its highest submitted value, then
    /// drains the compute stream and the render queue.
    ///
    /// Must run before the semaphores and resources are dropped.
    pub fn shutdown(&self, semaphores: &[&SharedSemaphore<R::Semaphore>]) -> Result<(), InteropError> {
        for semaphore in semaphores {
            if semaphore.kind() != SemaphoreKind::Timeline {
                continue;
            }
            let target = semaphore.cursor().highest_submitted();
            match semaphore.wait_on_cpu(target) {
                WaitStatus::Signaled => {}
                status => log::error!("Shutdown wait for value {target} ended with {status:?}"),
            }
        }
        self.compute.synchronize(self.stream)?;
        self.render.finish()
    }
}
