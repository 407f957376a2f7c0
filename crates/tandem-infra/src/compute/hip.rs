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

//! AMD HIP runtime backend.
//!
//! HIP has no bindless-image import for external memory, so images go
//! through the pitched image-as-buffer path.

use super::external::{ExternalMemoryBufferDesc, ExternalMemoryHandleDesc, ExternalSemaphoreHandleDesc};
use super::library::{open_library, symbol, LibrarySlot};
use libloading::Library;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};
use tandem_core::device::{ComputeDeviceInfo, DeviceUuid};
use tandem_core::resource::{BindlessImage, DevicePtr};
use tandem_core::sync::SemaphoreKind;
use tandem_core::traits::{
    ComputeBackend, ComputeCapabilities, ComputeDevice, ExternalImageDesc, ExternalMemoryDesc,
    ExternalMemoryId, ExternalSemaphoreDesc, ExternalSemaphoreId, FdImportOwnership, StreamId,
};
use tandem_core::{ComputeApi, InteropError};

type HipError = c_int;
type HipDeviceHandle = c_int;
type HipStream = *mut c_void;
type HipExternalMemory = *mut c_void;
type HipExternalSemaphore = *mut c_void;

const HIP_SUCCESS: HipError = 0;
const HIP_ERROR_OUT_OF_MEMORY: HipError = 2;

#[cfg(unix)]
const LIBRARY_NAMES: &[&str] = &["libamdhip64.so", "libamdhip64.so.6", "libamdhip64.so.5"];
#[cfg(windows)]
const LIBRARY_NAMES: &[&str] = &["amdhip64.dll", "amdhip64_6.dll"];

/// `hipExternalSemaphoreSignalParams` and `hipExternalSemaphoreWaitParams`.
#[repr(C)]
struct HipExternalSemaphoreParams {
    fence_value: u64,
    // keyedMutex and reserved members, unused here.
    rest: [u64; 7],
    flags: c_uint,
    reserved: [c_uint; 16],
}

impl HipExternalSemaphoreParams {
    fn with_value(value: u64) -> Self {
        Self {
            fence_value: value,
            rest: [0; 7],
            flags: 0,
            reserved: [0; 16],
        }
    }
}

/// The HIP runtime entry points the interop layer uses.
pub struct HipTable {
    init: unsafe extern "C" fn(c_uint) -> HipError,
    get_error_string: unsafe extern "C" fn(HipError) -> *const c_char,
    get_device_count: unsafe extern "C" fn(*mut c_int) -> HipError,
    device_get: unsafe extern "C" fn(*mut HipDeviceHandle, c_int) -> HipError,
    device_get_name: unsafe extern "C" fn(*mut c_char, c_int, HipDeviceHandle) -> HipError,
    device_get_uuid: unsafe extern "C" fn(*mut [u8; 16], HipDeviceHandle) -> HipError,
    set_device: unsafe extern "C" fn(c_int) -> HipError,
    stream_create: unsafe extern "C" fn(*mut HipStream) -> HipError,
    stream_destroy: unsafe extern "C" fn(HipStream) -> HipError,
    stream_synchronize: unsafe extern "C" fn(HipStream) -> HipError,
    import_external_memory:
        unsafe extern "C" fn(*mut HipExternalMemory, *const ExternalMemoryHandleDesc) -> HipError,
    external_memory_get_mapped_buffer: unsafe extern "C" fn(
        *mut *mut c_void,
        HipExternalMemory,
        *const ExternalMemoryBufferDesc,
    ) -> HipError,
    destroy_external_memory: unsafe extern "C" fn(HipExternalMemory) -> HipError,
    free: unsafe extern "C" fn(*mut c_void) -> HipError,
    import_external_semaphore: unsafe extern "C" fn(
        *mut HipExternalSemaphore,
        *const ExternalSemaphoreHandleDesc,
    ) -> HipError,
    signal_external_semaphores_async: unsafe extern "C" fn(
        *const HipExternalSemaphore,
        *const HipExternalSemaphoreParams,
        c_uint,
        HipStream,
    ) -> HipError,
    wait_external_semaphores_async: unsafe extern "C" fn(
        *const HipExternalSemaphore,
        *const HipExternalSemaphoreParams,
        c_uint,
        HipStream,
    ) -> HipError,
    destroy_external_semaphore: unsafe extern "C" fn(HipExternalSemaphore) -> HipError,
    memcpy_dtoh_async: unsafe extern "C" fn(*mut c_void, *mut c_void, usize, HipStream) -> HipError,
    memcpy_htod_async: unsafe extern "C" fn(*mut c_void, *const c_void, usize, HipStream) -> HipError,
    _library: Library,
}

pub(super) static HIP: LibrarySlot<HipTable> = LibrarySlot::new();

impl HipTable {
    fn load() -> Result<Self, InteropError> {
        let lib = open_library(ComputeApi::Hip, LIBRARY_NAMES)?;
        let api = ComputeApi::Hip;
        let table = Self {
            init: symbol(&lib, api, "hipInit")?,
            get_error_string: symbol(&lib, api, "hipGetErrorString")?,
            get_device_count: symbol(&lib, api, "hipGetDeviceCount")?,
            device_get: symbol(&lib, api, "hipDeviceGet")?,
            device_get_name: symbol(&lib, api, "hipDeviceGetName")?,
            device_get_uuid: symbol(&lib, api, "hipDeviceGetUuid")?,
            set_device: symbol(&lib, api, "hipSetDevice")?,
            stream_create: symbol(&lib, api, "hipStreamCreate")?,
            stream_destroy: symbol(&lib, api, "hipStreamDestroy")?,
            stream_synchronize: symbol(&lib, api, "hipStreamSynchronize")?,
            import_external_memory: symbol(&lib, api, "hipImportExternalMemory")?,
            external_memory_get_mapped_buffer: symbol(&lib, api, "hipExternalMemoryGetMappedBuffer")?,
            destroy_external_memory: symbol(&lib, api, "hipDestroyExternalMemory")?,
            free: symbol(&lib, api, "hipFree")?,
            import_external_semaphore: symbol(&lib, api, "hipImportExternalSemaphore")?,
            signal_external_semaphores_async: symbol(&lib, api, "hipSignalExternalSemaphoresAsync")?,
            wait_external_semaphores_async: symbol(&lib, api, "hipWaitExternalSemaphoresAsync")?,
            destroy_external_semaphore: symbol(&lib, api, "hipDestroyExternalSemaphore")?,
            memcpy_dtoh_async: symbol(&lib, api, "hipMemcpyDtoHAsync")?,
            memcpy_htod_async: symbol(&lib, api, "hipMemcpyHtoDAsync")?,
            _library: lib,
        };
        // SAFETY: hipInit takes no pointers; 0 is the only valid flag value.
        table.check("hipInit", unsafe { (table.init)(0) })?;
        Ok(table)
    }

    fn check(&self, call: &'static str, code: HipError) -> Result<(), InteropError> {
        if code == HIP_SUCCESS {
            return Ok(());
        }
        // SAFETY: hipGetErrorString returns a static string for every code.
        let text = unsafe { (self.get_error_string)(code) };
        let message = if text.is_null() {
            String::new()
        } else {
            // SAFETY: non-null results point to NUL-terminated static strings.
            unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
        };
        log::error!("HIP call {call} failed with code {code}: {message}");
        if code == HIP_ERROR_OUT_OF_MEMORY {
            return Err(InteropError::ResourceExhausted {
                what: format!("HIP {call}"),
                requested_bytes: 0,
            });
        }
        Err(InteropError::Driver {
            api: "HIP",
            call,
            code: i64::from(code),
            message,
        })
    }

    fn device_info(&self, ordinal: usize) -> Result<(HipDeviceHandle, ComputeDeviceInfo), InteropError> {
        let index = c_int::try_from(ordinal)
            .map_err(|_| InteropError::precondition(format!("HIP ordinal {ordinal} out of range")))?;
        let mut device: HipDeviceHandle = 0;
        // SAFETY: out-pointer to a local.
        self.check("hipDeviceGet", unsafe { (self.device_get)(&mut device, index) })?;

        let mut name = [0 as c_char; 256];
        // SAFETY: the buffer length is passed alongside the buffer.
        self.check("hipDeviceGetName", unsafe {
            (self.device_get_name)(name.as_mut_ptr(), name.len() as c_int, device)
        })?;
        // SAFETY: the runtime NUL-terminates names shorter than the buffer.
        let name = unsafe { CStr::from_ptr(name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let mut uuid = [0u8; 16];
        // SAFETY: out-pointer to a 16-byte local.
        self.check("hipDeviceGetUuid", unsafe {
            (self.device_get_uuid)(&mut uuid, device)
        })?;

        Ok((
            device,
            ComputeDeviceInfo {
                api: ComputeApi::Hip,
                ordinal,
                name,
                uuid: Some(DeviceUuid(uuid)),
                luid: None,
            },
        ))
    }
}

/// The HIP runtime, loaded from the ROCm installation.
pub struct HipBackend {
    table: Arc<HipTable>,
}

impl HipBackend {
    /// Loads (or shares the already loaded) HIP runtime library.
    ///
    /// ## Errors
    /// * `InteropError::NotSupported` - If ROCm / HIP is not installed.
    pub fn load() -> Result<Self, InteropError> {
        Ok(Self {
            table: HIP.acquire(HipTable::load)?,
        })
    }
}

impl ComputeBackend for HipBackend {
    fn api(&self) -> ComputeApi {
        ComputeApi::Hip
    }

    fn enumerate_devices(&self) -> Result<Vec<ComputeDeviceInfo>, InteropError> {
        let mut count: c_int = 0;
        // SAFETY: out-pointer to a local.
        self.table.check("hipGetDeviceCount", unsafe {
            (self.table.get_device_count)(&mut count)
        })?;
        (0..count.max(0) as usize)
            .map(|ordinal| self.table.device_info(ordinal).map(|(_, info)| info))
            .collect()
    }

    fn open_device(&self, ordinal: usize) -> Result<Arc<dyn ComputeDevice>, InteropError> {
        let table = &self.table;
        let (device, info) = table.device_info(ordinal)?;
        // SAFETY: selects the device for this thread; no pointers involved.
        table.check("hipSetDevice", unsafe { (table.set_device)(device) })?;
        let mut stream: HipStream = ptr::null_mut();
        // SAFETY: out-pointer to a local.
        table.check("hipStreamCreate", unsafe { (table.stream_create)(&mut stream) })?;
        log::info!("Opened HIP device {ordinal} '{}'", info.name);
        Ok(Arc::new(HipComputeDevice {
            table: Arc::clone(table),
            info,
            device,
            stream: stream as usize,
            state: Mutex::new(HipState::default()),
        }))
    }
}

#[derive(Default)]
struct HipState {
    memories: HashMap<u64, Vec<usize>>,
    semaphores: HashMap<u64, SemaphoreKind>,
}

/// An opened HIP device and its stream.
pub struct HipComputeDevice {
    table: Arc<HipTable>,
    info: ComputeDeviceInfo,
    device: HipDeviceHandle,
    stream: usize,
    state: Mutex<HipState>,
}

impl std::fmt::Debug for HipComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HipComputeDevice")
            .field("info", &self.info)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl HipComputeDevice {
    fn bind(&self) -> Result<(), InteropError> {
        // SAFETY: selects the device for the calling thread.
        self.table.check("hipSetDevice", unsafe { (self.table.set_device)(self.device) })
    }

    fn state(&self) -> Result<MutexGuard<'_, HipState>, InteropError> {
        self.state
            .lock()
            .map_err(|_| InteropError::precondition("HIP device state poisoned"))
    }

    fn stream(&self, stream: StreamId) -> HipStream {
        stream.0 as usize as HipStream
    }

    fn semaphore_params(
        &self,
        semaphore: ExternalSemaphoreId,
        value: u64,
    ) -> Result<HipExternalSemaphoreParams, InteropError> {
        let kind = self
            .state()?
            .semaphores
            .get(&semaphore.0)
            .copied()
            .ok_or_else(|| InteropError::precondition(format!("unknown HIP semaphore {semaphore:?}")))?;
        Ok(HipExternalSemaphoreParams::with_value(
            if kind == SemaphoreKind::Timeline { value } else { 0 },
        ))
    }
}

impl ComputeDevice for HipComputeDevice {
    fn info(&self) -> &ComputeDeviceInfo {
        &self.info
    }

    fn capabilities(&self) -> ComputeCapabilities {
        ComputeCapabilities {
            buffer_import: true,
            bindless_images: false,
            binary_semaphores: true,
            timeline_semaphores: true,
            host_copy: true,
            fd_ownership: FdImportOwnership::TakenByDriver,
            // Pitched allocations on AMD hardware use 256-byte rows.
            linear_pitch_alignment: 256,
        }
    }

    fn default_stream(&self) -> StreamId {
        StreamId(self.stream as u64)
    }

    fn import_memory(&self, desc: &ExternalMemoryDesc<'_>) -> Result<ExternalMemoryId, InteropError> {
        let handle_desc = ExternalMemoryHandleDesc::new(desc.handle, desc.size, desc.dedicated)?;
        self.bind()?;
        let mut memory: HipExternalMemory = ptr::null_mut();
        // SAFETY: the descriptor is fully initialised and outlives the call.
        self.table.check("hipImportExternalMemory", unsafe {
            (self.table.import_external_memory)(&mut memory, &handle_desc)
        })?;
        let id = memory as usize as u64;
        self.state()?.memories.insert(id, Vec::new());
        log::debug!("HIP imported {} bytes of external memory as {id:#x}", desc.size);
        Ok(ExternalMemoryId(id))
    }

    fn map_buffer(
        &self,
        memory: ExternalMemoryId,
        offset: u64,
        size: u64,
    ) -> Result<DevicePtr, InteropError> {
        let mut state = self.state()?;
        let mappings = state
            .memories
            .get_mut(&memory.0)
            .ok_or_else(|| InteropError::precondition(format!("unknown HIP memory {memory:?}")))?;
        self.bind()?;
        let buffer_desc = ExternalMemoryBufferDesc::new(offset, size);
        let mut ptr: *mut c_void = ptr::null_mut();
        // SAFETY: `memory` is a live import owned by this device.
        self.table.check("hipExternalMemoryGetMappedBuffer", unsafe {
            (self.table.external_memory_get_mapped_buffer)(
                &mut ptr,
                memory.0 as usize as HipExternalMemory,
                &buffer_desc,
            )
        })?;
        mappings.push(ptr as usize);
        Ok(DevicePtr(ptr as usize as u64))
    }

    fn map_image(
        &self,
        _memory: ExternalMemoryId,
        _desc: &ExternalImageDesc,
    ) -> Result<BindlessImage, InteropError> {
        Err(InteropError::not_supported(
            "HIP cannot map external memory as an image; use the pitched buffer path",
        ))
    }

    fn release_image(&self, _image: BindlessImage) -> Result<(), InteropError> {
        Err(InteropError::not_supported("HIP has no bindless images"))
    }

    fn release_memory(&self, memory: ExternalMemoryId) -> Result<(), InteropError> {
        let mappings = self.state()?.memories.remove(&memory.0).ok_or_else(|| {
            InteropError::precondition(format!("unknown HIP memory {memory:?}"))
        })?;
        self.bind()?;
        for ptr in mappings {
            // SAFETY: mapped buffers are freed before the import is destroyed.
            self.table.check("hipFree", unsafe { (self.table.free)(ptr as *mut c_void) })?;
        }
        // SAFETY: `memory` came from hipImportExternalMemory on this device.
        self.table.check("hipDestroyExternalMemory", unsafe {
            (self.table.destroy_external_memory)(memory.0 as usize as HipExternalMemory)
        })
    }

    fn import_semaphore(
        &self,
        desc: &ExternalSemaphoreDesc<'_>,
    ) -> Result<ExternalSemaphoreId, InteropError> {
        let handle_desc = ExternalSemaphoreHandleDesc::new(desc.handle, desc.kind)?;
        self.bind()?;
        let mut semaphore: HipExternalSemaphore = ptr::null_mut();
        // SAFETY: the descriptor is fully initialised and outlives the call.
        self.table.check("hipImportExternalSemaphore", unsafe {
            (self.table.import_external_semaphore)(&mut semaphore, &handle_desc)
        })?;
        let id = semaphore as usize as u64;
        self.state()?.semaphores.insert(id, desc.kind);
        Ok(ExternalSemaphoreId(id))
    }

    fn signal_semaphore(
        &self,
        semaphore: ExternalSemaphoreId,
        value: u64,
        stream: StreamId,
    ) -> Result<(), InteropError> {
        let params = self.semaphore_params(semaphore, value)?;
        let raw = semaphore.0 as usize as HipExternalSemaphore;
        self.bind()?;
        // SAFETY: one semaphore, one parameter block, both locals.
        self.table.check("hipSignalExternalSemaphoresAsync", unsafe {
            (self.table.signal_external_semaphores_async)(&raw, &params, 1, self.stream(stream))
        })
    }

    fn wait_semaphore(
        &self,
        semaphore: ExternalSemaphoreId,
        value: u64,
        stream: StreamId,
    ) -> Result<(), InteropError> {
        let params = self.semaphore_params(semaphore, value)?;
        let raw = semaphore.0 as usize as HipExternalSemaphore;
        self.bind()?;
        // SAFETY: one semaphore, one parameter block, both locals.
        self.table.check("hipWaitExternalSemaphoresAsync", unsafe {
            (self.table.wait_external_semaphores_async)(&raw, &params, 1, self.stream(stream))
        })
    }

    fn release_semaphore(&self, semaphore: ExternalSemaphoreId) -> Result<(), InteropError> {
        self.state()?.semaphores.remove(&semaphore.0).ok_or_else(|| {
            InteropError::precondition(format!("unknown HIP semaphore {semaphore:?}"))
        })?;
        self.bind()?;
        // SAFETY: `semaphore` came from hipImportExternalSemaphore on this device.
        self.table.check("hipDestroyExternalSemaphore", unsafe {
            (self.table.destroy_external_semaphore)(semaphore.0 as usize as HipExternalSemaphore)
        })
    }

    fn copy_to_host(&self, src: DevicePtr, dst: &mut [u8], stream: StreamId) -> Result<(), InteropError> {
        if dst.is_empty() {
            return Ok(());
        }
        self.bind()?;
        // SAFETY: `dst` stays borrowed until the synchronize below returns.
        self.table.check("hipMemcpyDtoHAsync", unsafe {
            (self.table.memcpy_dtoh_async)(
                dst.as_mut_ptr().cast(),
                src.0 as usize as *mut c_void,
                dst.len(),
                self.stream(stream),
            )
        })?;
        self.synchronize(stream)
    }

    fn copy_from_host(&self, dst: DevicePtr, src: &[u8], stream: StreamId) -> Result<(), InteropError> {
        if src.is_empty() {
            return Ok(());
        }
        self.bind()?;
        // SAFETY: `src` stays borrowed until the synchronize below returns.
        self.table.check("hipMemcpyHtoDAsync", unsafe {
            (self.table.memcpy_htod_async)(
                dst.0 as usize as *mut c_void,
                src.as_ptr().cast(),
                src.len(),
                self.stream(stream),
            )
        })?;
        self.synchronize(stream)
    }

    fn synchronize(&self, stream: StreamId) -> Result<(), InteropError> {
        self.bind()?;
        // SAFETY: the stream was created on this device.
        self.table.check("hipStreamSynchronize", unsafe {
            (self.table.stream_synchronize)(self.stream(stream))
        })
    }
}

impl Drop for HipComputeDevice {
    fn drop(&mut self) {
        if self.bind().is_err() {
            return;
        }
        // SAFETY: the stream was created in `open_device` and is no longer used.
        let code = unsafe { (self.table.stream_destroy)(self.stream as HipStream) };
        if let Err(e) = self.table.check("hipStreamDestroy", code) {
            log::warn!("{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn hip_semaphore_params_match_the_c_header() {
        assert_eq!(std::mem::size_of::<HipExternalSemaphoreParams>(), 136);
    }
}
