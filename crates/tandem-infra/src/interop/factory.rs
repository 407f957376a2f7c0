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

//! Creates shared buffers, images and semaphores on a render / compute device pair.

use super::semaphore::{ComputeSemaphore, SharedSemaphore};
use super::shared::{ComputeImport, ImageAccess, SharedBuffer, SharedImage};
use crate::platform::close_raw_handle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tandem_core::resource::{
    compute_alias, BufferDesc, DevicePtr, ExternalHandle, ImageDesc, ImageUsage, RawHandle,
    ResourceId,
};
use tandem_core::sync::{DriverWorkarounds, SemaphoreDesc, SemaphoreKind};
use tandem_core::traits::{
    ComputeDevice, ExportedAllocation, ExportedSemaphore, ExternalImageDesc, ExternalMemoryDesc,
    ExternalSemaphoreDesc, FdImportOwnership, RenderInteropDevice,
};
use tandem_core::InteropError;

/// Allocates resources that both APIs can reach.
///
/// Without a compute device (no match, or a workaround disabled interop) the
/// factory still creates render-only resources, but refuses exportable ones.
pub struct SharedResourceFactory<R: RenderInteropDevice> {
    render: Arc<R>,
    compute: Option<Arc<dyn ComputeDevice>>,
    use_timeline: bool,
    next_id: AtomicU64,
}

impl<R: RenderInteropDevice> SharedResourceFactory<R> {
    /// Pairs `render` with `compute`.
    ///
    /// ## Arguments
    /// * `workarounds` - When `cross_api_wait_may_deadlock` is set the compute
    ///   device is dropped and interop is disabled.
    /// * `use_timeline` - Prefer timeline semaphores; binary ones are used otherwise.
    pub fn new(
        render: Arc<R>,
        compute: Option<Arc<dyn ComputeDevice>>,
        workarounds: DriverWorkarounds,
        use_timeline: bool,
    ) -> Self {
        let compute = match compute {
            Some(_) if workarounds.cross_api_wait_may_deadlock => {
                log::warn!(
                    "Cross-API waits may deadlock on '{}'; interop disabled, falling back to CPU staging",
                    render.record().name
                );
                None
            }
            other => other,
        };
        Self {
            render,
            compute,
            use_timeline,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn render(&self) -> &Arc<R> {
        &self.render
    }

    pub fn compute(&self) -> Option<&Arc<dyn ComputeDevice>> {
        self.compute.as_ref()
    }

    /// Whether exportable resources can be created.
    pub fn interop_available(&self) -> bool {
        self.compute.is_some()
    }

    fn next_id(&self) -> ResourceId {
        ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn require_compute(&self, what: &str) -> Result<&Arc<dyn ComputeDevice>, InteropError> {
        self.compute.as_ref().ok_or_else(|| {
            InteropError::not_supported(format!(
                "cannot share {what}: no compute device is paired with '{}'",
                self.render.record().name
            ))
        })
    }

    /// Creates a buffer and, if `desc.exportable`, maps it into the compute API.
    ///
    /// A zero-sized buffer allocates nothing and reports a null device pointer.
    ///
    /// ## Errors
    /// * `InteropError::NotSupported` - If the buffer is exportable and there
    ///   is no compute device, or it cannot import buffers.
    /// * `InteropError::ResourceExhausted` - If either API runs out of memory.
    pub fn create_buffer(&self, desc: &BufferDesc) -> Result<SharedBuffer<R::Buffer>, InteropError> {
        let id = self.next_id();
        if desc.size == 0 {
            log::debug!("Buffer {id} is empty; nothing allocated");
            return Ok(SharedBuffer::new(id, 0, DevicePtr::NULL, None, None));
        }
        if !desc.exportable {
            let render = self.render.create_buffer(desc)?;
            return Ok(SharedBuffer::new(id, desc.size, DevicePtr::NULL, None, Some(render)));
        }

        let compute = self.require_compute("a buffer")?;
        if !compute.capabilities().buffer_import {
            return Err(InteropError::not_supported(format!(
                "{} cannot import external buffers",
                compute.info().api
            )));
        }
        let mut render = self.render.create_buffer(desc)?;
        let import = import_allocation(compute, &mut render)?;
        let device_ptr = compute.map_buffer(import.memory, 0, desc.size)?;
        log::debug!(
            "Shared buffer {id}: {} bytes at {:#x} on {}",
            desc.size,
            device_ptr.0,
            compute.info().api
        );
        Ok(SharedBuffer::new(id, desc.size, device_ptr, Some(import), Some(render)))
    }

    /// Creates an image and, if `desc.exportable`, exposes it to the compute API.
    ///
    /// Compute devices with bindless images get one; others get a device
    /// pointer into a linearly tiled image plus its row pitch. Block-compressed
    /// formats get a second, exportable image in their same-block-size alias
    /// format; the submitter copies between the two around each hand-off.
    ///
    /// ## Errors
    /// * `InteropError::Precondition` - If a block-compressed extent is not a
    ///   whole number of blocks.
    /// * `InteropError::NotSupported` - If the image is exportable and there is
    ///   no compute device, the render API cannot report a linear layout, or
    ///   the compute API cannot honor the reported row pitch or offset.
    pub fn create_image(&self, desc: &ImageDesc) -> Result<SharedImage<R::Image>, InteropError> {
        let id = self.next_id();
        let alias = compute_alias(desc.format, desc.extent)?;
        if !desc.exportable {
            let render = self.render.create_image(desc)?;
            return Ok(SharedImage::new(id, *desc, alias, ImageAccess::RenderOnly, None, render));
        }

        let compute = self.require_compute("an image")?;
        let capabilities = compute.capabilities();
        if !capabilities.bindless_images && !capabilities.buffer_import {
            return Err(InteropError::not_supported(format!(
                "{} can import neither images nor buffers",
                compute.info().api
            )));
        }
        let linear = if capabilities.bindless_images {
            ImageUsage::empty()
        } else {
            ImageUsage::LINEAR
        };

        // The image the compute API imports: the original, or its alias copy.
        let (render_desc, mut exported, original) = if alias.aliased {
            let render_desc = ImageDesc {
                usage: desc.usage | ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST,
                exportable: false,
                ..*desc
            };
            let original = self.render.create_image(&render_desc)?;
            let alias_desc = ImageDesc {
                extent: alias.extent,
                format: alias.format,
                usage: ImageUsage::STORAGE | ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST | linear,
                samples: 1,
                exportable: true,
            };
            let exported = self.render.create_image(&alias_desc)?;
            (render_desc, exported, Some(original))
        } else {
            let render_desc = ImageDesc {
                usage: desc.usage | linear,
                ..*desc
            };
            (render_desc, self.render.create_image(&render_desc)?, None)
        };

        let layout = exported.subresource_layout();
        let layout = if capabilities.bindless_images {
            None
        } else {
            let layout = layout.ok_or_else(|| {
                InteropError::not_supported("the render API reported no linear image layout")
            })?;
            if !capabilities.honors_linear_layout(&layout) {
                return Err(InteropError::not_supported(format!(
                    "{} needs {}-byte aligned rows, the render API placed {:?} rows of {} bytes at offset {}",
                    compute.info().api,
                    capabilities.linear_pitch_alignment,
                    alias.format,
                    layout.row_pitch,
                    layout.offset
                )));
            }
            Some(layout)
        };

        let import = import_allocation(compute, &mut exported)?;
        let access = match layout {
            None => ImageAccess::Bindless(compute.map_image(
                import.memory,
                &ExternalImageDesc {
                    extent: alias.extent,
                    format: alias.format,
                    levels: 1,
                },
            )?),
            Some(layout) => ImageAccess::Linear {
                ptr: compute.map_buffer(import.memory, layout.offset, layout.size)?,
                layout,
            },
        };
        log::debug!(
            "Shared image {id}: {:?} {:?} as {:?} via {access:?}",
            desc.format,
            desc.extent,
            alias.format
        );
        Ok(match original {
            Some(original) => {
                SharedImage::new(id, render_desc, alias, access, Some(import), original).with_alias_image(exported)
            }
            None => SharedImage::new(id, render_desc, alias, access, Some(import), exported),
        })
    }

    /// Creates a semaphore and imports it into the compute API when one is paired.
    ///
    /// Timelines are preferred. When timelines are disabled, or either side
    /// lacks them, a binary semaphore is created instead.
    pub fn create_semaphore(&self, initial_value: u64) -> Result<SharedSemaphore<R::Semaphore>, InteropError> {
        let Some(compute) = self.compute.as_ref() else {
            let desc = SemaphoreDesc {
                kind: self.render_semaphore_kind(),
                initial_value,
                exportable: false,
            };
            let render = self.create_render_semaphore(desc)?;
            return Ok(SharedSemaphore::new(render, None, initial_value));
        };

        let capabilities = compute.capabilities();
        let kind = if self.use_timeline && capabilities.timeline_semaphores {
            SemaphoreKind::Timeline
        } else if capabilities.binary_semaphores {
            SemaphoreKind::Binary
        } else {
            return Err(InteropError::not_supported(format!(
                "{} cannot import external semaphores",
                compute.info().api
            )));
        };
        let mut render = self.create_render_semaphore(SemaphoreDesc {
            kind,
            initial_value,
            exportable: true,
        })?;
        let kind = render.kind();
        if !compute.capabilities().supports_semaphore(kind) {
            return Err(InteropError::not_supported(format!(
                "{} cannot import {kind:?} semaphores",
                compute.info().api
            )));
        }
        let handle = render.take_export_handle().ok_or_else(|| {
            InteropError::not_supported("the render semaphore produced no export handle")
        })?;
        let result = compute.import_semaphore(&ExternalSemaphoreDesc {
            handle: &handle,
            kind,
        });
        let retained = settle_handle(handle, result.is_ok(), capabilities.fd_ownership);
        let semaphore = result?;
        log::debug!("Shared {kind:?} semaphore imported into {}", compute.info().api);
        Ok(SharedSemaphore::new(
            render,
            Some(ComputeSemaphore {
                device: Arc::clone(compute),
                semaphore,
                retained,
            }),
            initial_value,
        ))
    }

    fn render_semaphore_kind(&self) -> SemaphoreKind {
        if self.use_timeline {
            SemaphoreKind::Timeline
        } else {
            SemaphoreKind::Binary
        }
    }

    /// Creates the render semaphore, retrying as binary when timelines are missing.
    fn create_render_semaphore(&self, desc: SemaphoreDesc) -> Result<R::Semaphore, InteropError> {
        match self.render.create_semaphore(&desc) {
            Err(InteropError::NotSupported(reason)) if desc.kind == SemaphoreKind::Timeline => {
                log::warn!("Timeline semaphore unavailable ({reason}); falling back to binary");
                self.render.create_semaphore(&SemaphoreDesc {
                    kind: SemaphoreKind::Binary,
                    initial_value: 0,
                    ..desc
                })
            }
            other => other,
        }
    }
}

/// Imports the export handle of `render` into `compute`.
fn import_allocation<A: ExportedAllocation>(
    compute: &Arc<dyn ComputeDevice>,
    render: &mut A,
) -> Result<ComputeImport, InteropError> {
    let handle = render.take_export_handle().ok_or_else(|| {
        InteropError::not_supported("the render allocation produced no export handle")
    })?;
    let result = compute.import_memory(&ExternalMemoryDesc {
        handle: &handle,
        size: render.size(),
        dedicated: render.is_dedicated(),
    });
    let retained = settle_handle(handle, result.is_ok(), compute.capabilities().fd_ownership);
    Ok(ComputeImport {
        device: Arc::clone(compute),
        memory: result?,
        retained,
    })
}

/// Closes or keeps an export handle once its import attempt is over.
///
/// File descriptors are closed unless the driver took them over. NT handles
/// are kept until the compute objects are gone, and closed right away when
/// the import failed.
fn settle_handle(
    handle: ExternalHandle,
    imported: bool,
    fd_ownership: FdImportOwnership,
) -> Option<RawHandle> {
    match handle.raw {
        RawHandle::Fd(_) => {
            if !imported || fd_ownership == FdImportOwnership::DuplicatedByDriver {
                close_raw_handle(handle.raw);
            }
            None
        }
        RawHandle::Win32(_) if imported => Some(handle.raw),
        RawHandle::Win32(_) => {
            close_raw_handle(handle.raw);
            None
        }
    }
}
