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

//! External memory / semaphore descriptors shared by CUDA and HIP.
//!
//! HIP mirrors the CUDA driver API: the handle descriptors have the same
//! layout and the same handle-type numbering, so both backends build them
//! here.

use std::ffi::c_void;
use std::ptr;
use tandem_core::device::ExternalHandleKinds;
use tandem_core::resource::{ExternalHandle, RawHandle};
use tandem_core::sync::SemaphoreKind;
use tandem_core::InteropError;

pub(crate) const MEMORY_OPAQUE_FD: u32 = 1;
pub(crate) const MEMORY_OPAQUE_WIN32: u32 = 2;
pub(crate) const MEMORY_OPAQUE_WIN32_KMT: u32 = 3;
pub(crate) const MEMORY_D3D12_RESOURCE: u32 = 5;

pub(crate) const SEMAPHORE_OPAQUE_FD: u32 = 1;
pub(crate) const SEMAPHORE_OPAQUE_WIN32: u32 = 2;
pub(crate) const SEMAPHORE_OPAQUE_WIN32_KMT: u32 = 3;
pub(crate) const SEMAPHORE_D3D12_FENCE: u32 = 4;
pub(crate) const SEMAPHORE_TIMELINE_FD: u32 = 9;
pub(crate) const SEMAPHORE_TIMELINE_WIN32: u32 = 10;

/// `CUDA_EXTERNAL_MEMORY_DEDICATED` / `hipExternalMemoryDedicated`.
pub(crate) const MEMORY_DEDICATED: u32 = 0x1;

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct Win32Handle {
    pub handle: *mut c_void,
    pub name: *const c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) union HandleUnion {
    pub fd: i32,
    pub win32: Win32Handle,
}

impl HandleUnion {
    fn from_raw(raw: RawHandle) -> Self {
        let mut handle = HandleUnion {
            win32: Win32Handle {
                handle: ptr::null_mut(),
                name: ptr::null(),
            },
        };
        match raw {
            RawHandle::Fd(fd) => handle.fd = fd,
            RawHandle::Win32(h) => {
                handle.win32 = Win32Handle {
                    handle: h as *mut c_void,
                    name: ptr::null(),
                }
            }
        }
        handle
    }
}

/// `CUDA_EXTERNAL_MEMORY_HANDLE_DESC` / `hipExternalMemoryHandleDesc`.
#[repr(C)]
pub(crate) struct ExternalMemoryHandleDesc {
    pub kind: u32,
    pub handle: HandleUnion,
    pub size: u64,
    pub flags: u32,
    pub reserved: [u32; 16],
}

impl ExternalMemoryHandleDesc {
    pub(crate) fn new(
        handle: &ExternalHandle,
        size: u64,
        dedicated: bool,
    ) -> Result<Self, InteropError> {
        let kind = memory_handle_type(handle)?;
        // D3D12 committed resources must be imported as dedicated allocations.
        let dedicated = dedicated || kind == MEMORY_D3D12_RESOURCE;
        Ok(Self {
            kind,
            handle: HandleUnion::from_raw(handle.raw),
            size,
            flags: if dedicated { MEMORY_DEDICATED } else { 0 },
            reserved: [0; 16],
        })
    }
}

/// `CUDA_EXTERNAL_MEMORY_BUFFER_DESC` / `hipExternalMemoryBufferDesc`.
#[repr(C)]
pub(crate) struct ExternalMemoryBufferDesc {
    pub offset: u64,
    pub size: u64,
    pub flags: u32,
    pub reserved: [u32; 16],
}

impl ExternalMemoryBufferDesc {
    pub(crate) fn new(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size,
            flags: 0,
            reserved: [0; 16],
        }
    }
}

/// `CUDA_EXTERNAL_SEMAPHORE_HANDLE_DESC` / `hipExternalSemaphoreHandleDesc`.
#[repr(C)]
pub(crate) struct ExternalSemaphoreHandleDesc {
    pub kind: u32,
    pub handle: HandleUnion,
    pub flags: u32,
    pub reserved: [u32; 16],
}

impl ExternalSemaphoreHandleDesc {
    pub(crate) fn new(handle: &ExternalHandle, kind: SemaphoreKind) -> Result<Self, InteropError> {
        Ok(Self {
            kind: semaphore_handle_type(handle, kind)?,
            handle: HandleUnion::from_raw(handle.raw),
            flags: 0,
            reserved: [0; 16],
        })
    }
}

fn memory_handle_type(handle: &ExternalHandle) -> Result<u32, InteropError> {
    let kind = handle.kind;
    match handle.raw {
        RawHandle::Fd(_) if kind.contains(ExternalHandleKinds::OPAQUE_FD) => Ok(MEMORY_OPAQUE_FD),
        RawHandle::Win32(_) if kind.contains(ExternalHandleKinds::D3D12_RESOURCE) => {
            Ok(MEMORY_D3D12_RESOURCE)
        }
        RawHandle::Win32(_) if kind.contains(ExternalHandleKinds::OPAQUE_WIN32) => {
            Ok(MEMORY_OPAQUE_WIN32)
        }
        RawHandle::Win32(_) if kind.contains(ExternalHandleKinds::OPAQUE_WIN32_KMT) => {
            Ok(MEMORY_OPAQUE_WIN32_KMT)
        }
        raw => Err(InteropError::precondition(format!(
            "external memory handle {raw:?} does not match its kind {kind:?}"
        ))),
    }
}

fn semaphore_handle_type(handle: &ExternalHandle, kind: SemaphoreKind) -> Result<u32, InteropError> {
    let handle_kind = handle.kind;
    let timeline = kind == SemaphoreKind::Timeline;
    match handle.raw {
        RawHandle::Fd(_) if handle_kind.contains(ExternalHandleKinds::OPAQUE_FD) => Ok(if timeline {
            SEMAPHORE_TIMELINE_FD
        } else {
            SEMAPHORE_OPAQUE_FD
        }),
        // A shared ID3D12Fence is always timeline-like.
        RawHandle::Win32(_) if handle_kind.contains(ExternalHandleKinds::D3D12_RESOURCE) => {
            Ok(SEMAPHORE_D3D12_FENCE)
        }
        RawHandle::Win32(_) if handle_kind.contains(ExternalHandleKinds::OPAQUE_WIN32) => {
            Ok(if timeline {
                SEMAPHORE_TIMELINE_WIN32
            } else {
                SEMAPHORE_OPAQUE_WIN32
            })
        }
        RawHandle::Win32(_)
            if handle_kind.contains(ExternalHandleKinds::OPAQUE_WIN32_KMT) && !timeline =>
        {
            Ok(SEMAPHORE_OPAQUE_WIN32_KMT)
        }
        raw => Err(InteropError::precondition(format!(
            "{kind:?} semaphore handle {raw:?} cannot be imported as {handle_kind:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn descriptor_layouts_match_the_c_headers() {
        assert_eq!(size_of::<ExternalMemoryHandleDesc>(), 104);
        assert_eq!(size_of::<ExternalMemoryBufferDesc>(), 88);
        assert_eq!(size_of::<ExternalSemaphoreHandleDesc>(), 96);
    }

    #[test]
    fn timeline_fd_semaphores_use_the_timeline_handle_type() {
        let handle = ExternalHandle {
            kind: ExternalHandleKinds::OPAQUE_FD,
            raw: RawHandle::Fd(7),
        };
        let timeline = ExternalSemaphoreHandleDesc::new(&handle, SemaphoreKind::Timeline).unwrap();
        let binary = ExternalSemaphoreHandleDesc::new(&handle, SemaphoreKind::Binary).unwrap();
        assert_eq!(timeline.kind, SEMAPHORE_TIMELINE_FD);
        assert_eq!(binary.kind, SEMAPHORE_OPAQUE_FD);
        // SAFETY: the descriptor was built from a file descriptor.
        assert_eq!(unsafe { timeline.handle.fd }, 7);
    }

    #[test]
    fn d3d12_resources_are_always_dedicated() {
        let handle = ExternalHandle {
            kind: ExternalHandleKinds::D3D12_RESOURCE,
            raw: RawHandle::Win32(0x40),
        };
        let desc = ExternalMemoryHandleDesc::new(&handle, 4096, false).unwrap();
        assert_eq!(desc.kind, MEMORY_D3D12_RESOURCE);
        assert_eq!(desc.flags, MEMORY_DEDICATED);
    }

    #[test]
    fn mismatched_handle_kind_is_rejected() {
        let handle = ExternalHandle {
            kind: ExternalHandleKinds::OPAQUE_WIN32,
            raw: RawHandle::Fd(3),
        };
        let err = ExternalMemoryHandleDesc::new(&handle, 64, true).err().unwrap();
        assert_eq!(err.kind(), tandem_core::ErrorKind::Precondition);
    }
}
