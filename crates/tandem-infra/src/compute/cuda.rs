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

//! CUDA driver API backend.
//!
//! Everything goes through the primary context of the device, made current
//! on the calling thread before each driver call.

use super::external::{ExternalMemoryBufferDesc, ExternalMemoryHandleDesc, ExternalSemaphoreHandleDesc};
use super::library::{open_library, optional_symbol, symbol, LibrarySlot};
use libloading::Library;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};
use tandem_core::device::{ComputeDeviceInfo, DeviceLuid, DeviceUuid};
use tandem_core::resource::{BindlessImage, ChannelType, DevicePtr};
use tandem_core::sync::SemaphoreKind;
use tandem_core::traits::{
    ComputeBackend, ComputeCapabilities, ComputeDevice, ExternalImageDesc, ExternalMemoryDesc,
    ExternalMemoryId, ExternalSemaphoreDesc, ExternalSemaphoreId, FdImportOwnership, StreamId,
};
use tandem_core::{ComputeApi, InteropError};

type CuResult = c_int;
type CuDevice = c_int;
type CuContext = *mut c_void;
type CuStream = *mut c_void;
type CuDevicePtr = u64;
type CuExternalMemory = *mut c_void;
type CuExternalSemaphore = *mut c_void;
type CuMipmappedArray = *mut c_void;
type CuArray = *mut c_void;
type CuSurfObject = u64;

const CUDA_SUCCESS: CuResult = 0;
const CUDA_ERROR_OUT_OF_MEMORY: CuResult = 2;

const CU_AD_FORMAT_UNSIGNED_INT8: c_uint = 0x01;
const CU_AD_FORMAT_UNSIGNED_INT16: c_uint = 0x02;
const CU_AD_FORMAT_UNSIGNED_INT32: c_uint = 0x03;
const CU_AD_FORMAT_SIGNED_INT8: c_uint = 0x08;
const CU_AD_FORMAT_SIGNED_INT16: c_uint = 0x09;
const CU_AD_FORMAT_SIGNED_INT32: c_uint = 0x0a;
const CU_AD_FORMAT_HALF: c_uint = 0x10;
const CU_AD_FORMAT_FLOAT: c_uint = 0x20;

const CUDA_ARRAY3D_SURFACE_LDST: c_uint = 0x02;
const CU_RESOURCE_TYPE_ARRAY: c_uint = 0x00;

#[cfg(unix)]
const LIBRARY_NAMES: &[&str] = &["libcuda.so.1", "libcuda.so"];
#[cfg(windows)]
const LIBRARY_NAMES: &[&str] = &["nvcuda.dll"];

#[repr(C)]
struct CudaArray3dDescriptor {
    width: usize,
    height: usize,
    depth: usize,
    format: c_uint,
    num_channels: c_uint,
    flags: c_uint,
}

#[repr(C)]
struct CudaExternalMemoryMipmappedArrayDesc {
    offset: u64,
    array_desc: CudaArray3dDescriptor,
    num_levels: c_uint,
    reserved: [c_uint; 16],
}

/// `CUDA_RESOURCE_DESC` restricted to the array variant.
#[repr(C)]
struct CudaResourceDesc {
    res_type: c_uint,
    // The union is 128 bytes; the array variant only uses the first slot.
    res: [u64; 16],
    flags: c_uint,
}

/// `CUDA_EXTERNAL_SEMAPHORE_SIGNAL_PARAMS` and `..._WAIT_PARAMS` share this layout.
#[repr(C)]
struct CudaExternalSemaphoreParams {
    fence_value: u64,
    // nvSciSync and keyedMutex members, unused here.
    rest: [u64; 8],
    flags: c_uint,
    reserved: [c_uint; 16],
}

impl CudaExternalSemaphoreParams {
    fn with_value(value: u64) -> Self {
        Self {
            fence_value: value,
            rest: [0; 8],
            flags: 0,
            reserved: [0; 16],
        }
    }
}

/// The CUDA driver entry points the interop layer uses.
pub struct CudaTable {
    init: unsafe extern "C" fn(c_uint) -> CuResult,
    get_error_string: unsafe extern "C" fn(CuResult, *mut *const c_char) -> CuResult,
    device_get_count: unsafe extern "C" fn(*mut c_int) -> CuResult,
    device_get: unsafe extern "C" fn(*mut CuDevice, c_int) -> CuResult,
    device_get_name: unsafe extern "C" fn(*mut c_char, c_int, CuDevice) -> CuResult,
    device_get_uuid: unsafe extern "C" fn(*mut [u8; 16], CuDevice) -> CuResult,
    device_get_luid: Option<unsafe extern "C" fn(*mut c_char, *mut c_uint, CuDevice) -> CuResult>,
    primary_ctx_retain: unsafe extern "C" fn(*mut CuContext, CuDevice) -> CuResult,
    primary_ctx_release: unsafe extern "C" fn(CuDevice) -> CuResult,
    ctx_set_current: unsafe extern "C" fn(CuContext) -> CuResult,
    stream_create: unsafe extern "C" fn(*mut CuStream, c_uint) -> CuResult,
    stream_destroy: unsafe extern "C" fn(CuStream) -> CuResult,
    stream_synchronize: unsafe extern "C" fn(CuStream) -> CuResult,
    import_external_memory:
        unsafe extern "C" fn(*mut CuExternalMemory, *const ExternalMemoryHandleDesc) -> CuResult,
    external_memory_get_mapped_buffer: unsafe extern "C" fn(
        *mut CuDevicePtr,
        CuExternalMemory,
        *const ExternalMemoryBufferDesc,
    ) -> CuResult,
    external_memory_get_mapped_mipmapped_array: unsafe extern "C" fn(
        *mut CuMipmappedArray,
        CuExternalMemory,
        *const CudaExternalMemoryMipmappedArrayDesc,
    ) -> CuResult,
    destroy_external_memory: unsafe extern "C" fn(CuExternalMemory) -> CuResult,
    mipmapped_array_get_level:
        unsafe extern "C" fn(*mut CuArray, CuMipmappedArray, c_uint) -> CuResult,
    mipmapped_array_destroy: unsafe extern "C" fn(CuMipmappedArray) -> CuResult,
    surf_object_create: unsafe extern "C" fn(*mut CuSurfObject, *const CudaResourceDesc) -> CuResult,
    surf_object_destroy: unsafe extern "C" fn(CuSurfObject) -> CuResult,
    mem_free: unsafe extern "C" fn(CuDevicePtr) -> CuResult,
    import_external_semaphore: unsafe extern "C" fn(
        *mut CuExternalSemaphore,
        *const ExternalSemaphoreHandleDesc,
    ) -> CuResult,
    signal_external_semaphores_async: unsafe extern "C" fn(
        *const CuExternalSemaphore,
        *const CudaExternalSemaphoreParams,
        c_uint,
        CuStream,
    ) -> CuResult,
    wait_external_semaphores_async: unsafe extern "C" fn(
        *const CuExternalSemaphore,
        *const CudaExternalSemaphoreParams,
        c_uint,
        CuStream,
    ) -> CuResult,
    destroy_external_semaphore: unsafe extern "C" fn(CuExternalSemaphore) -> CuResult,
    memcpy_dtoh_async: unsafe extern "C" fn(*mut c_void, CuDevicePtr, usize, CuStream) -> CuResult,
    memcpy_htod_async:
        unsafe extern "C" fn(CuDevicePtr, *const c_void, usize, CuStream) -> CuResult,
    _library: Library,
}

pub(super) static CUDA: LibrarySlot<CudaTable> = LibrarySlot::new();

impl CudaTable {
    fn load() -> Result<Self, InteropError> {
        let lib = open_library(ComputeApi::Cuda, LIBRARY_NAMES)?;
        let api = ComputeApi::Cuda;
        let table = Self {
            init: symbol(&lib, api, "cuInit")?,
            get_error_string: symbol(&lib, api, "cuGetErrorString")?,
            device_get_count: symbol(&lib, api, "cuDeviceGetCount")?,
            device_get: symbol(&lib, api, "cuDeviceGet")?,
            device_get_name: symbol(&lib, api, "cuDeviceGetName")?,
            device_get_uuid: symbol(&lib, api, "cuDeviceGetUuid")?,
            device_get_luid: optional_symbol(&lib, "cuDeviceGetLuid"),
            primary_ctx_retain: symbol(&lib, api, "cuDevicePrimaryCtxRetain")?,
            primary_ctx_release: symbol(&lib, api, "cuDevicePrimaryCtxRelease_v2")?,
            ctx_set_current: symbol(&lib, api, "cuCtxSetCurrent")?,
            stream_create: symbol(&lib, api, "cuStreamCreate")?,
            stream_destroy: symbol(&lib, api, "cuStreamDestroy_v2")?,
            stream_synchronize: symbol(&lib, api, "cuStreamSynchronize")?,
            import_external_memory: symbol(&lib, api, "cuImportExternalMemory")?,
            external_memory_get_mapped_buffer: symbol(&lib, api, "cuExternalMemoryGetMappedBuffer")?,
            external_memory_get_mapped_mipmapped_array: symbol(
                &lib,
                api,
                "cuExternalMemoryGetMappedMipmappedArray",
            )?,
            destroy_external_memory: symbol(&lib, api, "cuDestroyExternalMemory")?,
            mipmapped_array_get_level: symbol(&lib, api, "cuMipmappedArrayGetLevel")?,
            mipmapped_array_destroy: symbol(&lib, api, "cuMipmappedArrayDestroy")?,
            surf_object_create: symbol(&lib, api, "cuSurfObjectCreate")?,
            surf_object_destroy: symbol(&lib, api, "cuSurfObjectDestroy")?,
            mem_free: symbol(&lib, api, "cuMemFree_v2")?,
            import_external_semaphore: symbol(&lib, api, "cuImportExternalSemaphore")?,
            signal_external_semaphores_async: symbol(&lib, api, "cuSignalExternalSemaphoresAsync")?,
            wait_external_semaphores_async: symbol(&lib, api, "cuWaitExternalSemaphoresAsync")?,
            destroy_external_semaphore: symbol(&lib, api, "cuDestroyExternalSemaphore")?,
            memcpy_dtoh_async: symbol(&lib, api, "cuMemcpyDtoHAsync_v2")?,
            memcpy_htod_async: symbol(&lib, api, "cuMemcpyHtoDAsync_v2")?,
            _library: lib,
        };
        // SAFETY: cuInit takes no pointers; 0 is the only valid flag value.
        table.check("cuInit", unsafe { (table.init)(0) })?;
        Ok(table)
    }

    fn check(&self, call: &'static str, code: CuResult) -> Result<(), InteropError> {
        if code == CUDA_SUCCESS {
            return Ok(());
        }
        let mut text: *const c_char = ptr::null();
        // SAFETY: cuGetErrorString writes a pointer to a static string or leaves it null.
        let message = if unsafe { (self.get_error_string)(code, &mut text) } == CUDA_SUCCESS
            && !text.is_null()
        {
            // SAFETY: non-null results point to NUL-terminated static strings.
            unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
        } else {
            String::new()
        };
        log::error!("CUDA call {call} failed with code {code}: {message}");
        if code == CUDA_ERROR_OUT_OF_MEMORY {
            return Err(InteropError::ResourceExhausted {
                what: format!("CUDA {call}"),
                requested_bytes: 0,
            });
        }
        Err(InteropError::Driver {
            api: "CUDA",
            call,
            code: i64::from(code),
            message,
        })
    }

    fn device_info(&self, ordinal: usize) -> Result<(CuDevice, ComputeDeviceInfo), InteropError> {
        let mut device: CuDevice = 0;
        let index = c_int::try_from(ordinal)
            .map_err(|_| InteropError::precondition(format!("CUDA ordinal {ordinal} out of range")))?;
        // SAFETY: out-pointer to a local.
        self.check("cuDeviceGet", unsafe { (self.device_get)(&mut device, index) })?;

        let mut name = [0 as c_char; 256];
        // SAFETY: the buffer length is passed alongside the buffer.
        self.check("cuDeviceGetName", unsafe {
            (self.device_get_name)(name.as_mut_ptr(), name.len() as c_int, device)
        })?;
        // SAFETY: the driver NUL-terminates names shorter than the buffer.
        let name = unsafe { CStr::from_ptr(name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let mut uuid = [0u8; 16];
        // SAFETY: out-pointer to a 16-byte local.
        self.check("cuDeviceGetUuid", unsafe {
            (self.device_get_uuid)(&mut uuid, device)
        })?;

        let luid = self.device_get_luid.and_then(|get_luid| {
            let mut bytes = [0 as c_char; 8];
            let mut node_mask: c_uint = 0;
            // SAFETY: out-pointers to locals; fails off Windows, which yields `None`.
            let code = unsafe { get_luid(bytes.as_mut_ptr(), &mut node_mask, device) };
            (code == CUDA_SUCCESS && node_mask != 0).then(|| DeviceLuid {
                bytes: bytes.map(|b| b as u8),
                node_mask,
            })
        });

        Ok((
            device,
            ComputeDeviceInfo {
                api: ComputeApi::Cuda,
                ordinal,
                name,
                uuid: Some(DeviceUuid(uuid)),
                luid,
            },
        ))
    }
}

/// The CUDA driver API, loaded from the system driver.
pub struct CudaBackend {
    table: Arc<CudaTable>,
}

impl CudaBackend {
    /// Loads (or shares the already loaded) CUDA driver library.
    ///
    /// ## Errors
    /// * `InteropError::NotSupported` - If no CUDA driver is installed.
    /// * `InteropError::Driver` - If `cuInit` fails.
    pub fn load() -> Result<Self, InteropError> {
        Ok(Self {
            table: CUDA.acquire(CudaTable::load)?,
        })
    }
}

impl ComputeBackend for CudaBackend {
    fn api(&self) -> ComputeApi {
        ComputeApi::Cuda
    }

    fn enumerate_devices(&self) -> Result<Vec<ComputeDeviceInfo>, InteropError> {
        let mut count: c_int = 0;
        // SAFETY: out-pointer to a local.
        self.table.check("cuDeviceGetCount", unsafe {
            (self.table.device_get_count)(&mut count)
        })?;
        let devices = (0..count.max(0) as usize)
            .map(|ordinal| self.table.device_info(ordinal).map(|(_, info)| info))
            .collect::<Result<Vec<_>, _>>()?;
        for info in &devices {
            log::debug!("CUDA device {}: '{}' uuid {:?}", info.ordinal, info.name, info.uuid);
        }
        Ok(devices)
    }

    fn open_device(&self, ordinal: usize) -> Result<Arc<dyn ComputeDevice>, InteropError> {
        let table = &self.table;
        let (device, info) = table.device_info(ordinal)?;

        let mut context: CuContext = ptr::null_mut();
        // SAFETY: out-pointer to a local; released in `Drop`.
        table.check("cuDevicePrimaryCtxRetain", unsafe {
            (table.primary_ctx_retain)(&mut context, device)
        })?;
        // SAFETY: `context` was just retained.
        if let Err(e) = table.check("cuCtxSetCurrent", unsafe { (table.ctx_set_current)(context) }) {
            // SAFETY: balances the retain above.
            unsafe { (table.primary_ctx_release)(device) };
            return Err(e);
        }

        let mut stream: CuStream = ptr::null_mut();
        // SAFETY: out-pointer to a local, context is current.
        if let Err(e) = table.check("cuStreamCreate", unsafe { (table.stream_create)(&mut stream, 0) }) {
            // SAFETY: balances the retain above.
            unsafe { (table.primary_ctx_release)(device) };
            return Err(e);
        }

        log::info!("Opened CUDA device {ordinal} '{}'", info.name);
        Ok(Arc::new(CudaDevice {
            table: Arc::clone(table),
            info,
            device,
            context: context as usize,
            stream: stream as usize,
            state: Mutex::new(CudaState::default()),
        }))
    }
}

#[derive(Default)]
struct CudaState {
    /// Imported memory objects and the buffer pointers mapped from each.
    memories: HashMap<u64, Vec<CuDevicePtr>>,
    /// Surface object to the mipmapped array backing it.
    images: HashMap<u64, usize>,
    semaphores: HashMap<u64, SemaphoreKind>,
}

/// An opened CUDA device: its primary context and one stream.
pub struct CudaDevice {
    table: Arc<CudaTable>,
    info: ComputeDeviceInfo,
    device: CuDevice,
    context: usize,
    stream: usize,
    state: Mutex<CudaState>,
}

impl std::fmt::Debug for CudaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaDevice")
            .field("info", &self.info)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl CudaDevice {
    fn bind(&self) -> Result<(), InteropError> {
        // SAFETY: the context is retained for the lifetime of `self`.
        self.table.check("cuCtxSetCurrent", unsafe {
            (self.table.ctx_set_current)(self.context as CuContext)
        })
    }

    fn state(&self) -> Result<MutexGuard<'_, CudaState>, InteropError> {
        self.state
            .lock()
            .map_err(|_| InteropError::precondition("CUDA device state poisoned"))
    }

    fn stream(&self, stream: StreamId) -> CuStream {
        stream.0 as usize as CuStream
    }

    fn semaphore_kind(&self, semaphore: ExternalSemaphoreId) -> Result<SemaphoreKind, InteropError> {
        self.state()?
            .semaphores
            .get(&semaphore.0)
            .copied()
            .ok_or_else(|| InteropError::precondition(format!("unknown CUDA semaphore {semaphore:?}")))
    }
}

fn array_format(format: tandem_core::resource::ImageFormat) -> Result<(c_uint, c_uint), InteropError> {
    let (channel, count) = format.compute_channels().ok_or_else(|| {
        InteropError::not_supported(format!("{format:?} has no CUDA array format"))
    })?;
    let code = match channel {
        ChannelType::U8 => CU_AD_FORMAT_UNSIGNED_INT8,
        ChannelType::U16 => CU_AD_FORMAT_UNSIGNED_INT16,
        ChannelType::U32 => CU_AD_FORMAT_UNSIGNED_INT32,
        ChannelType::S8 => CU_AD_FORMAT_SIGNED_INT8,
        ChannelType::S16 => CU_AD_FORMAT_SIGNED_INT16,
        ChannelType::S32 => CU_AD_FORMAT_SIGNED_INT32,
        ChannelType::Half => CU_AD_FORMAT_HALF,
        ChannelType::Float => CU_AD_FORMAT_FLOAT,
    };
    Ok((code, count))
}

impl ComputeDevice for CudaDevice {
    fn info(&self) -> &ComputeDeviceInfo {
        &self.info
    }

    fn capabilities(&self) -> ComputeCapabilities {
        ComputeCapabilities {
            buffer_import: true,
            bindless_images: true,
            binary_semaphores: true,
            timeline_semaphores: true,
            host_copy: true,
            fd_ownership: FdImportOwnership::TakenByDriver,
            // cudaDevAttrTexturePitchAlignment on every shipping architecture.
            linear_pitch_alignment: 32,
        }
    }

    fn default_stream(&self) -> StreamId {
        StreamId(self.stream as u64)
    }

    fn import_memory(&self, desc: &ExternalMemoryDesc<'_>) -> Result<ExternalMemoryId, InteropError> {
        let handle_desc = ExternalMemoryHandleDesc::new(desc.handle, desc.size, desc.dedicated)?;
        self.bind()?;
        let mut memory: CuExternalMemory = ptr::null_mut();
        // SAFETY: the descriptor is fully initialised and outlives the call.
        self.table.check("cuImportExternalMemory", unsafe {
            (self.table.import_external_memory)(&mut memory, &handle_desc)
        })?;
        let id = memory as usize as u64;
        self.state()?.memories.insert(id, Vec::new());
        log::debug!("CUDA imported {} bytes of external memory as {id:#x}", desc.size);
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
            .ok_or_else(|| InteropError::precondition(format!("unknown CUDA memory {memory:?}")))?;
        self.bind()?;
        let buffer_desc = ExternalMemoryBufferDesc::new(offset, size);
        let mut ptr: CuDevicePtr = 0;
        // SAFETY: `memory` is a live import owned by this device.
        self.table.check("cuExternalMemoryGetMappedBuffer", unsafe {
            (self.table.external_memory_get_mapped_buffer)(
                &mut ptr,
                memory.0 as usize as CuExternalMemory,
                &buffer_desc,
            )
        })?;
        mappings.push(ptr);
        Ok(DevicePtr(ptr))
    }

    fn map_image(
        &self,
        memory: ExternalMemoryId,
        desc: &ExternalImageDesc,
    ) -> Result<BindlessImage, InteropError> {
        let (format, num_channels) = array_format(desc.format)?;
        let mut state = self.state()?;
        if !state.memories.contains_key(&memory.0) {
            return Err(InteropError::precondition(format!("unknown CUDA memory {memory:?}")));
        }
        self.bind()?;

        let array_desc = CudaExternalMemoryMipmappedArrayDesc {
            offset: 0,
            array_desc: CudaArray3dDescriptor {
                width: desc.extent.width as usize,
                height: desc.extent.height as usize,
                depth: if desc.extent.depth > 1 {
                    desc.extent.depth as usize
                } else {
                    0
                },
                format,
                num_channels,
                flags: CUDA_ARRAY3D_SURFACE_LDST,
            },
            num_levels: desc.levels.max(1),
            reserved: [0; 16],
        };
        let mut mipmapped: CuMipmappedArray = ptr::null_mut();
        // SAFETY: descriptor and out-pointer are locals; `memory` is live.
        self.table.check("cuExternalMemoryGetMappedMipmappedArray", unsafe {
            (self.table.external_memory_get_mapped_mipmapped_array)(
                &mut mipmapped,
                memory.0 as usize as CuExternalMemory,
                &array_desc,
            )
        })?;

        let destroy_mipmapped = || {
            // SAFETY: the mipmapped array was created above and is not shared yet.
            unsafe { (self.table.mipmapped_array_destroy)(mipmapped) };
        };

        let mut level0: CuArray = ptr::null_mut();
        // SAFETY: `mipmapped` is live; level 0 always exists.
        if let Err(e) = self.table.check("cuMipmappedArrayGetLevel", unsafe {
            (self.table.mipmapped_array_get_level)(&mut level0, mipmapped, 0)
        }) {
            destroy_mipmapped();
            return Err(e);
        }

        let mut resource = CudaResourceDesc {
            res_type: CU_RESOURCE_TYPE_ARRAY,
            res: [0; 16],
            flags: 0,
        };
        resource.res[0] = level0 as usize as u64;
        let mut surface: CuSurfObject = 0;
        // SAFETY: the resource descriptor points at a live array.
        if let Err(e) = self.table.check("cuSurfObjectCreate", unsafe {
            (self.table.surf_object_create)(&mut surface, &resource)
        }) {
            destroy_mipmapped();
            return Err(e);
        }

        state.images.insert(surface, mipmapped as usize);
        Ok(BindlessImage {
            surface,
            array: level0 as usize as u64,
        })
    }

    fn release_image(&self, image: BindlessImage) -> Result<(), InteropError> {
        let mipmapped = self.state()?.images.remove(&image.surface).ok_or_else(|| {
            InteropError::precondition(format!("unknown CUDA surface {:#x}", image.surface))
        })?;
        self.bind()?;
        // SAFETY: the surface and its array were created by `map_image`.
        self.table.check("cuSurfObjectDestroy", unsafe {
            (self.table.surf_object_destroy)(image.surface)
        })?;
        // SAFETY: as above; the level-0 array is owned by the mipmapped array.
        self.table.check("cuMipmappedArrayDestroy", unsafe {
            (self.table.mipmapped_array_destroy)(mipmapped as CuMipmappedArray)
        })
    }

    fn release_memory(&self, memory: ExternalMemoryId) -> Result<(), InteropError> {
        let mappings = self.state()?.memories.remove(&memory.0).ok_or_else(|| {
            InteropError::precondition(format!("unknown CUDA memory {memory:?}"))
        })?;
        self.bind()?;
        for ptr in mappings {
            // SAFETY: mapped buffers are freed with cuMemFree before the import is destroyed.
            self.table.check("cuMemFree", unsafe { (self.table.mem_free)(ptr) })?;
        }
        // SAFETY: `memory` came from cuImportExternalMemory on this device.
        self.table.check("cuDestroyExternalMemory", unsafe {
            (self.table.destroy_external_memory)(memory.0 as usize as CuExternalMemory)
        })
    }

    fn import_semaphore(
        &self,
        desc: &ExternalSemaphoreDesc<'_>,
    ) -> Result<ExternalSemaphoreId, InteropError> {
        let handle_desc = ExternalSemaphoreHandleDesc::new(desc.handle, desc.kind)?;
        self.bind()?;
        let mut semaphore: CuExternalSemaphore = ptr::null_mut();
        // SAFETY: the descriptor is fully initialised and outlives the call.
        self.table.check("cuImportExternalSemaphore", unsafe {
            (self.table.import_external_semaphore)(&mut semaphore, &handle_desc)
        })?;
        let id = semaphore as usize as u64;
        self.state()?.semaphores.insert(id, desc.kind);
        log::debug!("CUDA imported {:?} semaphore as {id:#x}", desc.kind);
        Ok(ExternalSemaphoreId(id))
    }

    fn signal_semaphore(
        &self,
        semaphore: ExternalSemaphoreId,
        value: u64,
        stream: StreamId,
    ) -> Result<(), InteropError> {
        let kind = self.semaphore_kind(semaphore)?;
        let params = CudaExternalSemaphoreParams::with_value(if kind == SemaphoreKind::Timeline {
            value
        } else {
            0
        });
        let raw = semaphore.0 as usize as CuExternalSemaphore;
        self.bind()?;
        // SAFETY: one semaphore, one parameter block, both locals.
        self.table.check("cuSignalExternalSemaphoresAsync", unsafe {
            (self.table.signal_external_semaphores_async)(&raw, &params, 1, self.stream(stream))
        })
    }

    fn wait_semaphore(
        &self,
        semaphore: ExternalSemaphoreId,
        value: u64,
        stream: StreamId,
    ) -> Result<(), InteropError> {
        let kind = self.semaphore_kind(semaphore)?;
        let params = CudaExternalSemaphoreParams::with_value(if kind == SemaphoreKind::Timeline {
            value
        } else {
            0
        });
        let raw = semaphore.0 as usize as CuExternalSemaphore;
        self.bind()?;
        // SAFETY: one semaphore, one parameter block, both locals.
        self.table.check("cuWaitExternalSemaphoresAsync", unsafe {
            (self.table.wait_external_semaphores_async)(&raw, &params, 1, self.stream(stream))
        })
    }

    fn release_semaphore(&self, semaphore: ExternalSemaphoreId) -> Result<(), InteropError> {
        self.state()?.semaphores.remove(&semaphore.0).ok_or_else(|| {
            InteropError::precondition(format!("unknown CUDA semaphore {semaphore:?}"))
        })?;
        self.bind()?;
        // SAFETY: `semaphore` came from cuImportExternalSemaphore on this device.
        self.table.check("cuDestroyExternalSemaphore", unsafe {
            (self.table.destroy_external_semaphore)(semaphore.0 as usize as CuExternalSemaphore)
        })
    }

    fn copy_to_host(&self, src: DevicePtr, dst: &mut [u8], stream: StreamId) -> Result<(), InteropError> {
        if dst.is_empty() {
            return Ok(());
        }
        self.bind()?;
        // SAFETY: `dst` is valid for `dst.len()` bytes until the synchronize below returns.
        self.table.check("cuMemcpyDtoHAsync", unsafe {
            (self.table.memcpy_dtoh_async)(
                dst.as_mut_ptr().cast(),
                src.0,
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
        // SAFETY: `src` is valid for `src.len()` bytes until the synchronize below returns.
        self.table.check("cuMemcpyHtoDAsync", unsafe {
            (self.table.memcpy_htod_async)(dst.0, src.as_ptr().cast(), src.len(), self.stream(stream))
        })?;
        self.synchronize(stream)
    }

    fn synchronize(&self, stream: StreamId) -> Result<(), InteropError> {
        self.bind()?;
        // SAFETY: the stream belongs to this context.
        self.table.check("cuStreamSynchronize", unsafe {
            (self.table.stream_synchronize)(self.stream(stream))
        })
    }
}

impl Drop for CudaDevice {
    fn drop(&mut self) {
        let leaked = self
            .state
            .get_mut()
            .map(|s| s.memories.len() + s.images.len() + s.semaphores.len())
            .unwrap_or(0);
        if leaked > 0 {
            log::warn!(
                "CUDA device '{}' dropped with {leaked} imported objects still alive",
                self.info.name
            );
        }
        if self.bind().is_ok() {
            // SAFETY: the stream was created on this context and is no longer used.
            let code = unsafe { (self.table.stream_destroy)(self.stream as CuStream) };
            if let Err(e) = self.table.check("cuStreamDestroy", code) {
                log::warn!("{e}");
            }
        }
        // SAFETY: balances the retain in `open_device`.
        let code = unsafe { (self.table.primary_ctx_release)(self.device) };
        if let Err(e) = self.table.check("cuDevicePrimaryCtxRelease", code) {
            log::warn!("{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;
    use tandem_core::resource::ImageFormat;

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn cuda_struct_layouts_match_the_c_headers() {
        assert_eq!(size_of::<CudaArray3dDescriptor>(), 40);
        assert_eq!(size_of::<CudaExternalMemoryMipmappedArrayDesc>(), 120);
        assert_eq!(size_of::<CudaResourceDesc>(), 144);
        assert_eq!(size_of::<CudaExternalSemaphoreParams>(), 144);
    }

    #[test]
    fn array_formats_follow_the_channel_layout() {
        assert_eq!(
            array_format(ImageFormat::Rgba8Unorm).unwrap(),
            (CU_AD_FORMAT_UNSIGNED_INT8, 4)
        );
        assert_eq!(
            array_format(ImageFormat::Rgba32Uint).unwrap(),
            (CU_AD_FORMAT_UNSIGNED_INT32, 4)
        );
        assert_eq!(array_format(ImageFormat::R16Sfloat).unwrap(), (CU_AD_FORMAT_HALF, 1));
        let err = array_format(ImageFormat::Bc6hUfloat).err().unwrap();
        assert_eq!(err.kind(), tandem_core::ErrorKind::NotSupported);
    }

    #[test]
    fn cuda_backend_enumerates_when_a_driver_is_present() {
        let backend = match CudaBackend::load() {
            Ok(backend) => backend,
            Err(e) => {
                println!("skipping: {e}");
                return;
            }
        };
        let devices = backend.enumerate_devices().unwrap();
        for (i, device) in devices.iter().enumerate() {
            assert_eq!(device.ordinal, i);
            assert!(device.uuid.is_some());
        }
    }
}
