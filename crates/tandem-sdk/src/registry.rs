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

//! Ownership of every shared object created through a context.
//!
//! Resources are kept here rather than handed out, so that shutdown can wait
//! for outstanding timeline values before anything is destroyed.

use std::collections::BTreeMap;
use std::fmt;
use tandem_core::resource::{BufferDesc, ImageDesc, ResourceId};
use tandem_core::sync::{SemaphoreKind, WaitStatus};
use tandem_core::traits::{ExportedSemaphore, RenderInteropDevice};
use tandem_core::InteropError;
use tandem_infra::{
    InteropSubmitter, SharedBuffer, SharedImage, SharedResource, SharedResourceFactory,
    SharedSemaphore,
};

/// Handle to a semaphore owned by a [`ResourceRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemaphoreId(pub u64);

impl fmt::Display for SemaphoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "semaphore {}", self.0)
    }
}

/// Buffers, images and semaphores keyed by id.
pub struct ResourceRegistry<R: RenderInteropDevice> {
    buffers: BTreeMap<ResourceId, SharedBuffer<R::Buffer>>,
    images: BTreeMap<ResourceId, SharedImage<R::Image>>,
    semaphores: BTreeMap<SemaphoreId, SharedSemaphore<R::Semaphore>>,
    next_semaphore: u64,
}

impl<R: RenderInteropDevice> Default for ResourceRegistry<R> {
    fn default() -> Self {
        Self {
            buffers: BTreeMap::new(),
            images: BTreeMap::new(),
            semaphores: BTreeMap::new(),
            next_semaphore: 0,
        }
    }
}

impl<R: RenderInteropDevice> ResourceRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_buffer(
        &mut self,
        factory: &SharedResourceFactory<R>,
        desc: &BufferDesc,
    ) -> Result<ResourceId, InteropError> {
        let buffer = factory.create_buffer(desc)?;
        let id = buffer.id();
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    pub fn create_image(
        &mut self,
        factory: &SharedResourceFactory<R>,
        desc: &ImageDesc,
    ) -> Result<ResourceId, InteropError> {
        let image = factory.create_image(desc)?;
        let id = image.id();
        self.images.insert(id, image);
        Ok(id)
    }

    pub fn create_semaphore(
        &mut self,
        factory: &SharedResourceFactory<R>,
        initial_value: u64,
    ) -> Result<SemaphoreId, InteropError> {
        let semaphore = factory.create_semaphore(initial_value)?;
        let id = SemaphoreId(self.next_semaphore);
        self.next_semaphore += 1;
        self.semaphores.insert(id, semaphore);
        Ok(id)
    }

    pub fn buffer(&self, id: ResourceId) -> Option<&SharedBuffer<R::Buffer>> {
        self.buffers.get(&id)
    }

    pub fn image(&self, id: ResourceId) -> Option<&SharedImage<R::Image>> {
        self.images.get(&id)
    }

    pub fn semaphore(&self, id: SemaphoreId) -> Option<&SharedSemaphore<R::Semaphore>> {
        self.semaphores.get(&id)
    }

    /// Destroys a buffer or image. Returns `false` for unknown ids.
    ///
    /// The caller must make sure no submitted work still uses the resource.
    pub fn destroy(&mut self, id: ResourceId) -> bool {
        self.buffers.remove(&id).is_some() || self.images.remove(&id).is_some()
    }

    /// Destroys a semaphore once its highest submitted value was reached.
    pub fn destroy_semaphore(&mut self, id: SemaphoreId) -> bool {
        match self.semaphores.remove(&id) {
            Some(semaphore) => {
                wait_for_submitted(id, &semaphore);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len() + self.images.len() + self.semaphores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains outstanding work and destroys everything.
    ///
    /// Every timeline is waited to its highest submitted value, then the
    /// compute stream and the render queue are drained. Images and buffers
    /// go next (each releases its compute import before its render memory),
    /// semaphores last.
    ///
    /// ## Errors
    /// * `InteropError::Driver` - If draining either API fails. Resources
    ///   are destroyed regardless.
    pub fn shutdown(
        &mut self,
        render: &R,
        submitter: Option<&InteropSubmitter<R>>,
    ) -> Result<(), InteropError> {
        let drained = match submitter {
            Some(submitter) => {
                let semaphores: Vec<&SharedSemaphore<R::Semaphore>> =
                    self.semaphores.values().collect();
                submitter.shutdown(&semaphores)
            }
            None => {
                for (id, semaphore) in &self.semaphores {
                    wait_for_submitted(*id, semaphore);
                }
                render.finish()
            }
        };
        if let Err(e) = &drained {
            log::error!("Draining queues before shutdown failed: {e}");
        }

        let (images, buffers, semaphores) =
            (self.images.len(), self.buffers.len(), self.semaphores.len());
        self.images.clear();
        self.buffers.clear();
        self.semaphores.clear();
        log::info!(
            "Destroyed {images} shared images, {buffers} shared buffers and {semaphores} semaphores"
        );
        drained
    }
}

fn wait_for_submitted<S: ExportedSemaphore>(
    id: SemaphoreId,
    semaphore: &SharedSemaphore<S>,
) {
    if semaphore.kind() != SemaphoreKind::Timeline {
        return;
    }
    let target = semaphore.cursor().highest_submitted();
    match semaphore.wait_on_cpu(target) {
        WaitStatus::Signaled => {}
        status => log::error!("Waiting for {id} to reach {target} ended with {status:?}"),
    }
}
