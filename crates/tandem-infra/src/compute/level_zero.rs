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

//! oneAPI Level Zero backend.
//!
//! External memory is imported by allocating device memory with a
//! `ze_external_memory_import_fd_t` chained in; the allocation *is* the
//! device pointer. Copies go through a synchronous immediate command list.
//! Level Zero offers no external semaphore import.

use super::library::{open_library, symbol, LibrarySlot};
use libloading::Library;
use std::collections::HashSet;
use std::ffi::{c_char, c_void, CStr};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};
use tandem_core::device::{ComputeDeviceInfo, DeviceUuid};
use tandem_core::resource::{BindlessImage, DevicePtr, RawHandle};
use tandem_core::traits::{
    ComputeBackend, ComputeCapabilities, ComputeDevice, ExternalImageDesc, ExternalMemoryDesc,
    ExternalMemoryId, ExternalSemaphoreDesc, ExternalSemaphoreId, FdImportOwnership, StreamId,
};
use tandem_core::{ComputeApi, InteropError};

type ZeResult = u32;
type ZeHandle = *mut c_void;

const ZE_RESULT_SUCCESS: ZeResult = 0;
const ZE_RESULT_ERROR_OUT_OF_DEVICE_MEMORY: ZeResult = 0x7000_0002;
const ZE_INIT_FLAG_GPU_ONLY: u32 = 1;

const ZE_STRUCTURE_TYPE_DEVICE_PROPERTIES: u32 = 0x3;
const ZE_STRUCTURE_TYPE_CONTEXT_DESC: u32 = 0xd;
const ZE_STRUCTURE_TYPE_COMMAND_QUEUE_DESC: u32 = 0xe;
const ZE_STRUCTURE_TYPE_DEVICE_MEM_ALLOC_DESC: u32 = 0x15;
const ZE_STRUCTURE_TYPE_EXTERNAL_MEMORY_IMPORT_FD: u32 = 0x19;

const ZE_EXTERNAL_MEMORY_TYPE_FLAG_OPAQUE_FD: u32 = 1;
const ZE_COMMAND_QUEUE_MODE_SYNCHRONOUS: u32 = 1;
const ZE_COMMAND_QUEUE_PRIORITY_NORMAL: u32 = 0;

#[cfg(unix)]
const LIBRARY_NAMES: &[&str] = &["libze_loader.so.1", "libze_loader.so"];
#[cfg(windows)]
const LIBRARY_NAMES: &[&str] = &["ze_loader.dll"];

#[repr(C)]
struct ZeDeviceProperties {
    stype: u32,
    p_next: *mut c_void,
    device_type: u32,
    vendor_id: u32,
    device_id: u32,
    flags: u32,
    subdevice_id: u32,
    core_clock_rate: u32,
    max_mem_alloc_size: u64,
    max_hardware_contexts: u32,
    max_command_queue_priority: u32,
    num_threads_per_eu: u32,
    physical_eu_simd_width: u32,
    num_eus_per_subslice: u32,
    num_subslices_per_slice: u32,
    num_slices: u32,
    timer_resolution: u64,
    timestamp_valid_bits: u32,
    kernel_timestamp_valid_bits: u32,
    uuid: [u8; 16],
    name: [c_char; 256],
}

impl ZeDeviceProperties {
    fn empty() -> Self {
        Self {
            stype: ZE_STRUCTURE_TYPE_DEVICE_PROPERTIES,
            p_next: ptr::null_mut(),
            device_type: 0,
            vendor_id: 0,
            device_id: 0,
            flags: 0,
            subdevice_id: 0,
            core_clock_rate: 0,
            max_mem_alloc_size: 0,
            max_hardware_contexts: 0,
            max_command_queue_priority: 0,
            num_threads_per_eu: 0,
            physical_eu_simd_width: 0,
            num_eus_per_subslice: 0,
            num_subslices_per_slice: 0,
            num_slices: 0,
            timer_resolution: 0,
            timestamp_valid_bits: 0,
            kernel_timestamp_valid_bits: 0,
            uuid: [0; 16],
            name: [0; 256],
        }
    }
}

#[repr(C)]
struct ZeContextDesc {
    stype: u32,
    p_next: *const c_void,
    flags: u32,
}

#[repr(C)]
struct ZeCommandQueueDesc {
    stype: u32,
    p_next: *const c_void,
    ordinal: u32,
    index: u32,
    flags: u32,
    mode: u32,
    priority: u32,
}

#[repr(C)]
struct ZeDeviceMemAllocDesc {
    stype: u32,
    p_next: *const c_void,
    flags: u32,
    ordinal: u32,
}

#[repr(C)]
struct ZeExternalMemoryImportFd {
    stype: u32,
    p_next: *const c_void,
    flags: u32,
    fd: i32,
}

/// The Level Zero loader entry points the interop layer uses.
pub struct LevelZeroTable {
    init: unsafe extern "C" fn(u32) -> ZeResult,
    driver_get: unsafe extern "C" fn(*mut u32, *mut ZeHandle) -> ZeResult,
    device_get: unsafe extern "C" fn(ZeHandle, *mut u32, *mut ZeHandle) -> ZeResult,
    device_get_properties: unsafe extern "C" fn(ZeHandle, *mut ZeDeviceProperties) -> ZeResult,
    context_create: unsafe extern "C" fn(ZeHandle, *const ZeContextDesc, *mut ZeHandle) -> ZeResult,
    context_destroy: unsafe extern "C" fn(ZeHandle) -> ZeResult,
    command_list_create_immediate: unsafe extern "C" fn(
        ZeHandle,
        ZeHandle,
        *const ZeCommandQueueDesc,
        *mut ZeHandle,
    ) -> ZeResult,
    command_list_destroy: unsafe extern "C" fn(ZeHandle) -> ZeResult,
    command_list_append_memory_copy: unsafe extern "C" fn(
        ZeHandle,
        *mut c_void,
        *const c_void,
        usize,
        ZeHandle,
        u32,
        *mut ZeHandle,
    ) -> ZeResult,
    mem_alloc_device: unsafe extern "C" fn(
        ZeHandle,
        *const ZeDeviceMemAllocDesc,
        usize,
        usize,
        ZeHandle,
        *mut *mut c_void,
    ) -> ZeResult,
    mem_free: unsafe extern "C" fn(ZeHandle, *mut c_void) -> ZeResult,
    _library: Library,
}

pub(super) static LEVEL_ZERO: LibrarySlot<LevelZeroTable> = LibrarySlot::new();

impl LevelZeroTable {
    fn load() -> Result<Self, InteropError> {
        let lib = open_library(ComputeApi::LevelZero, LIBRARY_NAMES)?;
        let api = ComputeApi::LevelZero;
        let table = Self {
            init: symbol(&lib, api, "zeInit")?,
            driver_get: symbol(&lib, api, "zeDriverGet")?,
            device_get: symbol(&lib, api, "zeDeviceGet")?,
            device_get_properties: symbol(&lib, api, "zeDeviceGetProperties")?,
            context_create: symbol(&lib, api, "zeContextCreate")?,
            context_destroy: symbol(&lib, api, "zeContextDestroy")?,
            command_list_create_immediate: symbol(&lib, api, "zeCommandListCreateImmediate")?,
            command_list_destroy: symbol(&lib, api, "zeCommandListDestroy")?,
            command_list_append_memory_copy: symbol(&lib, api, "zeCommandListAppendMemoryCopy")?,
            mem_alloc_device: symbol(&lib, api, "zeMemAllocDevice")?,
            mem_free: symbol(&lib, api, "zeMemFree")?,
            _library: lib,
        };
        // SAFETY: zeInit takes a flag word only.
        table.check("zeInit", unsafe { (table.init)(ZE_INIT_FLAG_GPU_ONLY) })?;
        Ok(table)
    }

    fn check(&self, call: &'static str, code: ZeResult) -> Result<(), InteropError> {
        if code == ZE_RESULT_SUCCESS {
            return Ok(());
        }
        log::error!("Level Zero call {call} failed with code {code:#x}");
        if code == ZE_RESULT_ERROR_OUT_OF_DEVICE_MEMORY {
            return Err(InteropError::ResourceExhausted {
                what: format!("Level Zero {call}"),
                requested_bytes: 0,
            });
        }
        Err(InteropError::Driver {
            api: "Level Zero",
            call,
            code: i64::from(code),
            message: String::new(),
        })
    }

    /// Every (driver, device) pair, flattened in loader order.
    fn devices(&self) -> Result<Vec<(ZeHandle, ZeHandle)>, InteropError> {
        let mut driver_count = 0u32;
        // SAFETY: count query with a null array.
        self.check("zeDriverGet", unsafe {
            (self.driver_get)(&mut driver_count, ptr::null_mut())
        })?;
        let mut drivers = vec![ptr::null_mut(); driver_count as usize];
        // SAFETY: the array holds `driver_count` handles.
        self.check("zeDriverGet", unsafe {
            (self.driver_get)(&mut driver_count, drivers.as_mut_ptr())
        })?;
        drivers.truncate(driver_count as usize);

        let mut pairs = Vec::new();
        for driver in drivers {
            let mut device_count = 0u32;
            // SAFETY: count query with a null array.
            self.check("zeDeviceGet", unsafe {
                (self.device_get)(driver, &mut device_count, ptr::null_mut())
            })?;
            let mut devices = vec![ptr::null_mut(); device_count as usize];
            // SAFETY: the array holds `device_count` handles.
            self.check("zeDeviceGet", unsafe {
                (self.device_get)(driver, &mut device_count, devices.as_mut_ptr())
            })?;
            devices.truncate(device_count as usize);
            pairs.extend(devices.into_iter().map(|device| (driver, device)));
        }
        Ok(pairs)
    }

    fn device_info(&self, ordinal: usize, device: ZeHandle) -> Result<ComputeDeviceInfo, InteropError> {
        let mut props = ZeDeviceProperties::empty();
        // SAFETY: `props` carries the right stype and a null chain.
        self.check("zeDeviceGetProperties", unsafe {
            (self.device_get_properties)(device, &mut props)
        })?;
        // SAFETY: the driver NUL-terminates the name within the array.
        let name = unsafe { CStr::from_ptr(props.name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        Ok(ComputeDeviceInfo {
            api: ComputeApi::LevelZero,
            ordinal,
            name,
            uuid: Some(DeviceUuid(props.uuid)),
            luid: None,
        })
    }
}

/// The Level Zero loader.
pub struct LevelZeroBackend {
    table: Arc<LevelZeroTable>,
}

impl LevelZeroBackend {
    /// Loads (or shares the already loaded) Level Zero loader.
    ///
    /// ## Errors
    /// * `InteropError::NotSupported` - If the loader is not installed.
    pub fn load() -> Result<Self, InteropError> {
        Ok(Self {
            table: LEVEL_ZERO.acquire(LevelZeroTable::load)?,
        })
    }
}

impl ComputeBackend for LevelZeroBackend {
    fn api(&self) -> ComputeApi {
        ComputeApi::LevelZero
    }

    fn enumerate_devices(&self) -> Result<Vec<ComputeDeviceInfo>, InteropError> {
        self.table
            .devices()?
            .into_iter()
            .enumerate()
            .map(|(ordinal, (_, device))| self.table.device_info(ordinal, device))
            .collect()
    }

    fn open_device(&self, ordinal: usize) -> Result<Arc<dyn ComputeDevice>, InteropError> {
        let table = &self.table;
        let (driver, device) = table.devices()?.get(ordinal).copied().ok_or_else(|| {
            InteropError::precondition(format!("Level Zero has no device {ordinal}"))
        })?;
        let info = table.device_info(ordinal, device)?;

        let context_desc = ZeContextDesc {
            stype: ZE_STRUCTURE_TYPE_CONTEXT_DESC,
            p_next: ptr::null(),
            flags: 0,
        };
        let mut context: ZeHandle = ptr::null_mut();
        // SAFETY: descriptor and out-pointer are locals.
        table.check("zeContextCreate", unsafe {
            (table.context_create)(driver, &context_desc, &mut context)
        })?;

        let queue_desc = ZeCommandQueueDesc {
            stype: ZE_STRUCTURE_TYPE_COMMAND_QUEUE_DESC,
            p_next: ptr::null(),
            ordinal: 0,
            index: 0,
            flags: 0,
            mode: ZE_COMMAND_QUEUE_MODE_SYNCHRONOUS,
            priority: ZE_COMMAND_QUEUE_PRIORITY_NORMAL,
        };
        let mut list: ZeHandle = ptr::null_mut();
        // SAFETY: descriptor and out-pointer are locals; context is live.
        if let Err(e) = table.check("zeCommandListCreateImmediate", unsafe {
            (table.command_list_create_immediate)(context, device, &queue_desc, &mut list)
        }) {
            // SAFETY: the context was created above and has no children.
            unsafe { (table.context_destroy)(context) };
            return Err(e);
        }

        log::info!("Opened Level Zero device {ordinal} '{}'", info.name);
        Ok(Arc::new(LevelZeroDevice {
            table: Arc::clone(table),
            info,
            device: device as usize,
            context: context as usize,
            list: list as usize,
            allocations: Mutex::new(HashSet::new()),
        }))
    }
}

/// An opened Level Zero device: a context and a synchronous immediate command list.
pub struct LevelZeroDevice {
    table: Arc<LevelZeroTable>,
    info: ComputeDeviceInfo,
    device: usize,
    context: usize,
    list: usize,
    allocations: Mutex<HashSet<u64>>,
}

impl std::fmt::Debug for LevelZeroDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelZeroDevice")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl LevelZeroDevice {
    fn allocations(&self) -> Result<MutexGuard<'_, HashSet<u64>>, InteropError> {
        self.allocations
            .lock()
            .map_err(|_| InteropError::precondition("Level Zero device state poisoned"))
    }

    fn copy(&self, dst: *mut c_void, src: *const c_void, size: usize) -> Result<(), InteropError> {
        // SAFETY: the immediate list is synchronous, so both ranges only need
        // to stay valid for the duration of the call.
        self.table.check("zeCommandListAppendMemoryCopy", unsafe {
            (self.table.command_list_append_memory_copy)(
                self.list as ZeHandle,
                dst,
                src,
                size,
                ptr::null_mut(),
                0,
                ptr::null_mut(),
            )
        })
    }
}

impl ComputeDevice for LevelZeroDevice {
    fn info(&self) -> &ComputeDeviceInfo {
        &self.info
    }

    fn capabilities(&self) -> ComputeCapabilities {
        ComputeCapabilities {
            buffer_import: true,
            bindless_images: false,
            binary_semaphores: false,
            timeline_semaphores: false,
            host_copy: true,
            fd_ownership: FdImportOwnership::DuplicatedByDriver,
            linear_pitch_alignment: 64,
        }
    }

    fn default_stream(&self) -> StreamId {
        StreamId(self.list as u64)
    }

    fn import_memory(&self, desc: &ExternalMemoryDesc<'_>) -> Result<ExternalMemoryId, InteropError> {
        let fd = match desc.handle.raw {
            RawHandle::Fd(fd) => fd,
            RawHandle::Win32(_) => {
                return Err(InteropError::not_supported(
                    "Level Zero imports only POSIX file descriptors",
                ))
            }
        };
        let import = ZeExternalMemoryImportFd {
            stype: ZE_STRUCTURE_TYPE_EXTERNAL_MEMORY_IMPORT_FD,
            p_next: ptr::null(),
            flags: ZE_EXTERNAL_MEMORY_TYPE_FLAG_OPAQUE_FD,
            fd,
        };
        let alloc_desc = ZeDeviceMemAllocDesc {
            stype: ZE_STRUCTURE_TYPE_DEVICE_MEM_ALLOC_DESC,
            p_next: (&import as *const ZeExternalMemoryImportFd).cast(),
            flags: 0,
            ordinal: 0,
        };
        let size = usize::try_from(desc.size)
            .map_err(|_| InteropError::precondition("allocation exceeds the address space"))?;
        let mut ptr: *mut c_void = ptr::null_mut();
        // SAFETY: the descriptor chain lives on the stack for the whole call.
        self.table.check("zeMemAllocDevice", unsafe {
            (self.table.mem_alloc_device)(
                self.context as ZeHandle,
                &alloc_desc,
                size,
                0,
                self.device as ZeHandle,
                &mut ptr,
            )
        })?;
        let id = ptr as usize as u64;
        self.allocations()?.insert(id);
        log::debug!("Level Zero imported {} bytes at {id:#x}", desc.size);
        Ok(ExternalMemoryId(id))
    }

    fn map_buffer(
        &self,
        memory: ExternalMemoryId,
        offset: u64,
        _size: u64,
    ) -> Result<DevicePtr, InteropError> {
        if !self.allocations()?.contains(&memory.0) {
            return Err(InteropError::precondition(format!(
                "unknown Level Zero memory {memory:?}"
            )));
        }
        Ok(DevicePtr(memory.0).offset(offset))
    }

    fn map_image(
        &self,
        _memory: ExternalMemoryId,
        _desc: &ExternalImageDesc,
    ) -> Result<BindlessImage, InteropError> {
        Err(InteropError::not_supported(
            "Level Zero bindless images are not exposed; use the pitched buffer path",
        ))
    }

    fn release_image(&self, _image: BindlessImage) -> Result<(), InteropError> {
        Err(InteropError::not_supported("Level Zero has no bindless images"))
    }

    fn release_memory(&self, memory: ExternalMemoryId) -> Result<(), InteropError> {
        if !self.allocations()?.remove(&memory.0) {
            return Err(InteropError::precondition(format!(
                "unknown Level Zero memory {memory:?}"
            )));
        }
        // SAFETY: the allocation came from zeMemAllocDevice on this context.
        self.table.check("zeMemFree", unsafe {
            (self.table.mem_free)(self.context as ZeHandle, memory.0 as usize as *mut c_void)
        })
    }

    fn import_semaphore(
        &self,
        _desc: &ExternalSemaphoreDesc<'_>,
    ) -> Result<ExternalSemaphoreId, InteropError> {
        Err(InteropError::not_supported(
            "Level Zero cannot import external semaphores",
        ))
    }

    fn signal_semaphore(
        &self,
        _semaphore: ExternalSemaphoreId,
        _value: u64,
        _stream: StreamId,
    ) -> Result<(), InteropError> {
        Err(InteropError::not_supported("Level Zero has no external semaphores"))
    }

    fn wait_semaphore(
        &self,
        _semaphore: ExternalSemaphoreId,
        _value: u64,
        _stream: StreamId,
    ) -> Result<(), InteropError> {
        Err(InteropError::not_supported("Level Zero has no external semaphores"))
    }

    fn release_semaphore(&self, _semaphore: ExternalSemaphoreId) -> Result<(), InteropError> {
        Err(InteropError::not_supported("Level Zero has no external semaphores"))
    }

    fn copy_to_host(&self, src: DevicePtr, dst: &mut [u8], _stream: StreamId) -> Result<(), InteropError> {
        if dst.is_empty() {
            return Ok(());
        }
        self.copy(dst.as_mut_ptr().cast(), src.0 as usize as *const c_void, dst.len())
    }

    fn copy_from_host(&self, dst: DevicePtr, src: &[u8], _stream: StreamId) -> Result<(), InteropError> {
        if src.is_empty() {
            return Ok(());
        }
        self.copy(dst.0 as usize as *mut c_void, src.as_ptr().cast(), src.len())
    }

    fn synchronize(&self, _stream: StreamId) -> Result<(), InteropError> {
        // Every command on a synchronous immediate list has completed on return.
        Ok(())
    }
}

impl Drop for LevelZeroDevice {
    fn drop(&mut self) {
        // SAFETY: the list and context were created in `open_device`.
        let code = unsafe { (self.table.command_list_destroy)(self.list as ZeHandle) };
        if let Err(e) = self.table.check("zeCommandListDestroy", code) {
            log::warn!("{e}");
        }
        // SAFETY: as above; the list is gone.
        let code = unsafe { (self.table.context_destroy)(self.context as ZeHandle) };
        if let Err(e) = self.table.check("zeContextDestroy", code) {
            log::warn!("{e}");
        }
    }
}
