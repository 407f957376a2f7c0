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

//! OpenCL backend: device identification only.
//!
//! `cl_khr_device_uuid` gives OpenCL devices the same UUID / LUID as the
//! render API, which is enough for device matching. Resource and semaphore
//! sharing are not offered.

use super::library::{open_library, symbol, LibrarySlot};
use libloading::Library;
use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;
use tandem_core::device::{ComputeDeviceInfo, DeviceLuid, DeviceUuid};
use tandem_core::resource::{BindlessImage, DevicePtr};
use tandem_core::traits::{
    ComputeBackend, ComputeCapabilities, ComputeDevice, ExternalImageDesc, ExternalMemoryDesc,
    ExternalMemoryId, ExternalSemaphoreDesc, ExternalSemaphoreId, FdImportOwnership, StreamId,
};
use tandem_core::{ComputeApi, InteropError};

type ClInt = i32;
type ClUint = u32;
type ClHandle = *mut c_void;

const CL_SUCCESS: ClInt = 0;
const CL_DEVICE_NOT_FOUND: ClInt = -1;
const CL_DEVICE_TYPE_GPU: u64 = 1 << 2;

const CL_DEVICE_NAME: ClUint = 0x102B;
const CL_DEVICE_UUID_KHR: ClUint = 0x106A;
const CL_DEVICE_LUID_VALID_KHR: ClUint = 0x106C;
const CL_DEVICE_LUID_KHR: ClUint = 0x106D;
const CL_DEVICE_NODE_MASK_KHR: ClUint = 0x106E;

#[cfg(unix)]
const LIBRARY_NAMES: &[&str] = &["libOpenCL.so.1", "libOpenCL.so"];
#[cfg(windows)]
const LIBRARY_NAMES: &[&str] = &["OpenCL.dll"];

/// The OpenCL ICD loader entry points used for device identification.
pub struct OpenClTable {
    get_platform_ids: unsafe extern "C" fn(ClUint, *mut ClHandle, *mut ClUint) -> ClInt,
    get_device_ids: unsafe extern "C" fn(ClHandle, u64, ClUint, *mut ClHandle, *mut ClUint) -> ClInt,
    get_device_info: unsafe extern "C" fn(ClHandle, ClUint, usize, *mut c_void, *mut usize) -> ClInt,
    _library: Library,
}

pub(super) static OPENCL: LibrarySlot<OpenClTable> = LibrarySlot::new();

impl OpenClTable {
    fn load() -> Result<Self, InteropError> {
        let lib = open_library(ComputeApi::OpenCl, LIBRARY_NAMES)?;
        let api = ComputeApi::OpenCl;
        Ok(Self {
            get_platform_ids: symbol(&lib, api, "clGetPlatformIDs")?,
            get_device_ids: symbol(&lib, api, "clGetDeviceIDs")?,
            get_device_info: symbol(&lib, api, "clGetDeviceInfo")?,
            _library: lib,
        })
    }

    fn check(&self, call: &'static str, code: ClInt) -> Result<(), InteropError> {
        if code == CL_SUCCESS {
            return Ok(());
        }
        log::error!("OpenCL call {call} failed with code {code}");
        Err(InteropError::Driver {
            api: "OpenCL",
            call,
            code: i64::from(code),
            message: String::new(),
        })
    }

    fn gpu_devices(&self) -> Result<Vec<ClHandle>, InteropError> {
        let mut platform_count: ClUint = 0;
        // SAFETY: count query with a null array.
        self.check("clGetPlatformIDs", unsafe {
            (self.get_platform_ids)(0, ptr::null_mut(), &mut platform_count)
        })?;
        let mut platforms = vec![ptr::null_mut(); platform_count as usize];
        // SAFETY: the array holds `platform_count` handles.
        self.check("clGetPlatformIDs", unsafe {
            (self.get_platform_ids)(platform_count, platforms.as_mut_ptr(), ptr::null_mut())
        })?;

        let mut devices = Vec::new();
        for platform in platforms {
            let mut count: ClUint = 0;
            // SAFETY: count query with a null array.
            let code = unsafe {
                (self.get_device_ids)(platform, CL_DEVICE_TYPE_GPU, 0, ptr::null_mut(), &mut count)
            };
            if code == CL_DEVICE_NOT_FOUND {
                continue;
            }
            self.check("clGetDeviceIDs", code)?;
            let mut handles = vec![ptr::null_mut(); count as usize];
            // SAFETY: the array holds `count` handles.
            self.check("clGetDeviceIDs", unsafe {
                (self.get_device_ids)(
                    platform,
                    CL_DEVICE_TYPE_GPU,
                    count,
                    handles.as_mut_ptr(),
                    ptr::null_mut(),
                )
            })?;
            devices.extend(handles);
        }
        Ok(devices)
    }

    /// Reads a fixed-size device property, or `None` if the device lacks it.
    fn fixed_info<const N: usize>(&self, device: ClHandle, param: ClUint) -> Option<[u8; N]> {
        let mut value = [0u8; N];
        // SAFETY: the output buffer is exactly `N` bytes.
        let code = unsafe {
            (self.get_device_info)(device, param, N, value.as_mut_ptr().cast(), ptr::null_mut())
        };
        (code == CL_SUCCESS).then_some(value)
    }

    fn device_name(&self, device: ClHandle) -> Result<String, InteropError> {
        let mut size = 0usize;
        // SAFETY: size query with a null buffer.
        self.check("clGetDeviceInfo", unsafe {
            (self.get_device_info)(device, CL_DEVICE_NAME, 0, ptr::null_mut(), &mut size)
        })?;
        let mut bytes = vec![0u8; size];
        // SAFETY: the buffer holds `size` bytes.
        self.check("clGetDeviceInfo", unsafe {
            (self.get_device_info)(device, CL_DEVICE_NAME, size, bytes.as_mut_ptr().cast(), ptr::null_mut())
        })?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    fn device_info(&self, ordinal: usize, device: ClHandle) -> Result<ComputeDeviceInfo, InteropError> {
        let uuid = self
            .fixed_info::<16>(device, CL_DEVICE_UUID_KHR)
            .map(DeviceUuid);
        let luid_valid = self
            .fixed_info::<4>(device, CL_DEVICE_LUID_VALID_KHR)
            .is_some_and(|v| u32::from_ne_bytes(v) != 0);
        let luid = if luid_valid {
            self.fixed_info::<8>(device, CL_DEVICE_LUID_KHR).map(|bytes| DeviceLuid {
                bytes,
                node_mask: self
                    .fixed_info::<4>(device, CL_DEVICE_NODE_MASK_KHR)
                    .map_or(1, u32::from_ne_bytes),
            })
        } else {
            None
        };
        Ok(ComputeDeviceInfo {
            api: ComputeApi::OpenCl,
            ordinal,
            name: self.device_name(device)?,
            uuid,
            luid,
        })
    }
}

/// The OpenCL ICD loader.
pub struct OpenClBackend {
    table: Arc<OpenClTable>,
}

impl OpenClBackend {
    /// Loads (or shares the already loaded) OpenCL ICD loader.
    pub fn load() -> Result<Self, InteropError> {
        Ok(Self {
            table: OPENCL.acquire(OpenClTable::load)?,
        })
    }
}

impl ComputeBackend for OpenClBackend {
    fn api(&self) -> ComputeApi {
        ComputeApi::OpenCl
    }

    fn enumerate_devices(&self) -> Result<Vec<ComputeDeviceInfo>, InteropError> {
        self.table
            .gpu_devices()?
            .into_iter()
            .enumerate()
            .map(|(ordinal, device)| self.table.device_info(ordinal, device))
            .collect()
    }

    fn open_device(&self, ordinal: usize) -> Result<Arc<dyn ComputeDevice>, InteropError> {
        let device = self.table.gpu_devices()?.get(ordinal).copied().ok_or_else(|| {
            InteropError::precondition(format!("OpenCL has no GPU device {ordinal}"))
        })?;
        let info = self.table.device_info(ordinal, device)?;
        log::info!(
            "Opened OpenCL device {ordinal} '{}' (identification only, no sharing)",
            info.name
        );
        Ok(Arc::new(OpenClDevice {
            _table: Arc::clone(&self.table),
            info,
        }))
    }
}

/// An OpenCL device. It can be matched but not shared with.
pub struct OpenClDevice {
    _table: Arc<OpenClTable>,
    info: ComputeDeviceInfo,
}

impl std::fmt::Debug for OpenClDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClDevice").field("info", &self.info).finish()
    }
}

fn unsupported<T>(what: &str) -> Result<T, InteropError> {
    Err(InteropError::not_supported(format!(
        "OpenCL interop does not support {what}"
    )))
}

impl ComputeDevice for OpenClDevice {
    fn info(&self) -> &ComputeDeviceInfo {
        &self.info
    }

    fn capabilities(&self) -> ComputeCapabilities {
        ComputeCapabilities {
            buffer_import: false,
            bindless_images: false,
            binary_semaphores: false,
            timeline_semaphores: false,
            host_copy: false,
            fd_ownership: FdImportOwnership::DuplicatedByDriver,
            linear_pitch_alignment: 1,
        }
    }

    fn default_stream(&self) -> StreamId {
        StreamId(0)
    }

    fn import_memory(&self, _desc: &ExternalMemoryDesc<'_>) -> Result<ExternalMemoryId, InteropError> {
        unsupported("external memory import")
    }

    fn map_buffer(&self, _memory: ExternalMemoryId, _offset: u64, _size: u64) -> Result<DevicePtr, InteropError> {
        unsupported("buffer mapping")
    }

    fn map_image(&self, _memory: ExternalMemoryId, _desc: &ExternalImageDesc) -> Result<BindlessImage, InteropError> {
        unsupported("image mapping")
    }

    fn release_image(&self, _image: BindlessImage) -> Result<(), InteropError> {
        unsupported("image mapping")
    }

    fn release_memory(&self, _memory: ExternalMemoryId) -> Result<(), InteropError> {
        unsupported("external memory import")
    }

    fn import_semaphore(&self, _desc: &ExternalSemaphoreDesc<'_>) -> Result<ExternalSemaphoreId, InteropError> {
        unsupported("external semaphores")
    }

    fn signal_semaphore(&self, _semaphore: ExternalSemaphoreId, _value: u64, _stream: StreamId) -> Result<(), InteropError> {
        unsupported("external semaphores")
    }

    fn wait_semaphore(&self, _semaphore: ExternalSemaphoreId, _value: u64, _stream: StreamId) -> Result<(), InteropError> {
        unsupported("external semaphores")
    }

    fn release_semaphore(&self, _semaphore: ExternalSemaphoreId) -> Result<(), InteropError> {
        unsupported("external semaphores")
    }

    fn copy_to_host(&self, _src: DevicePtr, _dst: &mut [u8], _stream: StreamId) -> Result<(), InteropError> {
        unsupported("host copies")
    }

    fn copy_from_host(&self, _dst: DevicePtr, _src: &[u8], _stream: StreamId) -> Result<(), InteropError> {
        unsupported("host copies")
    }

    fn synchronize(&self, _stream: StreamId) -> Result<(), InteropError> {
        Ok(())
    }
}
