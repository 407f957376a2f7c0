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

//! Committed resources on shared heaps.

use super::{dxgi_format, raw_handle, HrResultExt};
use crate::platform::close_raw_handle;
use tandem_core::device::ExternalHandleKinds;
use tandem_core::resource::{
    BufferDesc, BufferUsage, Extent3d, ExternalHandle, ImageDesc, ImageFormat, ImageUsage,
    SubresourceLayout,
};
use tandem_core::traits::ExportedAllocation;
use tandem_core::InteropError;
use windows::core::PCWSTR;
use windows::Win32::Foundation::GENERIC_ALL;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_UNKNOWN, DXGI_SAMPLE_DESC};

struct Committed {
    resource: ID3D12Resource,
    size: u64,
    export: Option<ExternalHandle>,
}

fn create_committed(
    device: &ID3D12Device,
    desc: &D3D12_RESOURCE_DESC,
    heap_type: D3D12_HEAP_TYPE,
    state: D3D12_RESOURCE_STATES,
    exportable: bool,
    what: &str,
) -> Result<Committed, InteropError> {
    // SAFETY: `desc` is a fully initialized resource description.
    let size = unsafe { device.GetResourceAllocationInfo(0, std::slice::from_ref(desc)) }.SizeInBytes;
    let heap = D3D12_HEAP_PROPERTIES {
        Type: heap_type,
        ..Default::default()
    };
    let heap_flags = if exportable {
        D3D12_HEAP_FLAG_SHARED
    } else {
        D3D12_HEAP_FLAG_NONE
    };
    let mut resource: Option<ID3D12Resource> = None;
    // SAFETY: every pointer refers to a local alive for the call.
    unsafe { device.CreateCommittedResource(&heap, heap_flags, desc, state, None, &mut resource) }
        .map_err(|e| match super::hr_error("ID3D12Device::CreateCommittedResource", e) {
            InteropError::ResourceExhausted { .. } => InteropError::ResourceExhausted {
                what: what.to_owned(),
                requested_bytes: size,
            },
            other => other,
        })?;
    let resource = resource.ok_or_else(|| {
        InteropError::precondition("CreateCommittedResource returned no resource")
    })?;

    let export = if exportable {
        // SAFETY: the resource lives on a shared heap.
        let handle = unsafe { device.CreateSharedHandle(&resource, None, GENERIC_ALL.0, PCWSTR::null()) }
            .hr_context("ID3D12Device::CreateSharedHandle")?;
        Some(ExternalHandle {
            kind: ExternalHandleKinds::D3D12_RESOURCE,
            raw: raw_handle(handle),
        })
    } else {
        None
    };
    Ok(Committed {
        resource,
        size,
        export,
    })
}

/// A D3D12 buffer resource.
pub struct D3d12Buffer {
    committed: Committed,
    requested_size: u64,
    upload_heap: bool,
}

// SAFETY: ID3D12Resource is free-threaded.
unsafe impl Send for D3d12Buffer {}
// SAFETY: as above.
unsafe impl Sync for D3d12Buffer {}

impl D3d12Buffer {
    /// Creates a buffer on the default heap, or the upload heap for
    /// host-visible, non-exported buffers.
    ///
    /// ## Errors
    /// * `InteropError::Precondition` - If `desc.size` is zero.
    /// * `InteropError::NotSupported` - If a host-visible buffer is exported;
    ///   upload heaps cannot be shared.
    pub fn new(device: &ID3D12Device, desc: &BufferDesc) -> Result<Self, InteropError> {
        if desc.size == 0 {
            return Err(InteropError::precondition("D3D12 buffers cannot be empty"));
        }
        let upload_heap = desc.usage.contains(BufferUsage::HOST_VISIBLE);
        if upload_heap && desc.exportable {
            return Err(InteropError::not_supported(
                "host-visible D3D12 buffers live on upload heaps, which cannot be shared",
            ));
        }
        let mut flags = D3D12_RESOURCE_FLAG_NONE;
        if desc.usage.contains(BufferUsage::STORAGE) {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
        }
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: desc.size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: flags,
        };
        let (heap, state) = if upload_heap {
            (D3D12_HEAP_TYPE_UPLOAD, D3D12_RESOURCE_STATE_GENERIC_READ)
        } else {
            (D3D12_HEAP_TYPE_DEFAULT, D3D12_RESOURCE_STATE_COMMON)
        };
        let committed = create_committed(device, &resource_desc, heap, state, desc.exportable, "D3D12 buffer")?;
        log::debug!(
            "Created D3D12 buffer of {} bytes (exported: {})",
            desc.size,
            committed.export.is_some()
        );
        Ok(Self {
            committed,
            requested_size: desc.size,
            upload_heap,
        })
    }

    pub fn raw(&self) -> &ID3D12Resource {
        &self.committed.resource
    }

    pub fn requested_size(&self) -> u64 {
        self.requested_size
    }

    /// Whether the buffer lives on the upload heap and can be written by the CPU.
    pub fn is_host_visible(&self) -> bool {
        self.upload_heap
    }

    /// Copies `data` into an upload-heap buffer through a CPU mapping.
    pub fn write_mapped(&self, offset: u64, data: &[u8]) -> Result<(), InteropError> {
        if !self.upload_heap {
            return Err(InteropError::precondition("buffer is not host-visible"));
        }
        if offset + data.len() as u64 > self.requested_size {
            return Err(InteropError::precondition(format!(
                "write of {} bytes at {offset} overflows a {}-byte buffer",
                data.len(),
                self.requested_size
            )));
        }
        let mut ptr = std::ptr::null_mut();
        // SAFETY: upload-heap resources are always mappable.
        unsafe { self.committed.resource.Map(0, None, Some(&mut ptr)) }.hr_context("ID3D12Resource::Map")?;
        // SAFETY: the mapping covers the whole buffer and the range was checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>().add(offset as usize), data.len());
            self.committed.resource.Unmap(0, None);
        }
        Ok(())
    }
}

impl ExportedAllocation for D3d12Buffer {
    fn size(&self) -> u64 {
        self.committed.size
    }

    fn is_dedicated(&self) -> bool {
        true
    }

    fn take_export_handle(&mut self) -> Option<ExternalHandle> {
        self.committed.export.take()
    }

    fn subresource_layout(&self) -> Option<SubresourceLayout> {
        None
    }
}

/// A D3D12 texture resource.
pub struct D3d12Image {
    committed: Committed,
    format: ImageFormat,
    extent: Extent3d,
    samples: u32,
}

// SAFETY: ID3D12Resource is free-threaded.
unsafe impl Send for D3d12Image {}
// SAFETY: as above.
unsafe impl Sync for D3d12Image {}

impl D3d12Image {
    /// Creates an optimally tiled 2D or 3D texture.
    ///
    /// ## Errors
    /// * `InteropError::Precondition` - If the extent is empty.
    /// * `InteropError::NotSupported` - For linear images; row-major
    ///   textures need cross-adapter heaps.
    pub fn new(device: &ID3D12Device, desc: &ImageDesc) -> Result<Self, InteropError> {
        let extent = desc.extent;
        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return Err(InteropError::precondition(format!("empty image extent {extent:?}")));
        }
        if desc.usage.contains(ImageUsage::LINEAR) {
            return Err(InteropError::not_supported(
                "linear D3D12 textures are only available on cross-adapter heaps",
            ));
        }
        let mut flags = D3D12_RESOURCE_FLAG_NONE;
        if desc.usage.contains(ImageUsage::STORAGE) {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
        }
        if desc.usage.contains(ImageUsage::COLOR_ATTACHMENT) {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
        }
        let depth_or_layers = u16::try_from(extent.depth).map_err(|_| {
            InteropError::precondition(format!("image depth {} exceeds D3D12 limits", extent.depth))
        })?;
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: if extent.depth > 1 {
                D3D12_RESOURCE_DIMENSION_TEXTURE3D
            } else {
                D3D12_RESOURCE_DIMENSION_TEXTURE2D
            },
            Alignment: 0,
            Width: u64::from(extent.width),
            Height: extent.height,
            DepthOrArraySize: depth_or_layers,
            MipLevels: 1,
            Format: dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: desc.samples.max(1),
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: flags,
        };
        let committed = create_committed(
            device,
            &resource_desc,
            D3D12_HEAP_TYPE_DEFAULT,
            D3D12_RESOURCE_STATE_COMMON,
            desc.exportable,
            "D3D12 texture",
        )?;
        Ok(Self {
            committed,
            format: desc.format,
            extent,
            samples: desc.samples.max(1),
        })
    }

    pub fn raw(&self) -> &ID3D12Resource {
        &self.committed.resource
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn extent(&self) -> Extent3d {
        self.extent
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }
}

impl ExportedAllocation for D3d12Image {
    fn size(&self) -> u64 {
        self.committed.size
    }

    fn is_dedicated(&self) -> bool {
        true
    }

    fn take_export_handle(&mut self) -> Option<ExternalHandle> {
        self.committed.export.take()
    }

    fn subresource_layout(&self) -> Option<SubresourceLayout> {
        None
    }
}

impl Drop for Committed {
    fn drop(&mut self) {
        if let Some(handle) = self.export.take() {
            close_raw_handle(handle.raw);
        }
    }
}
