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

//! Factory and submission behaviour against scripted render and compute devices.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tandem_core::device::{ComputeDeviceInfo, ExternalHandleKinds, PhysicalDeviceRecord};
use tandem_core::resource::{
    BindlessImage, BufferDesc, BufferUsage, DevicePtr, Extent3d, ExternalHandle, ImageDesc,
    ImageFormat, ImageUsage, RawHandle, ResourceOwnership, SubresourceLayout,
};
use tandem_core::sync::{DriverWorkarounds, SemaphoreDesc, SemaphoreKind, WaitStatus};
use tandem_core::traits::{
    ComputeCapabilities, ComputeDevice, ExportedAllocation, ExportedSemaphore, ExternalImageDesc,
    ExternalMemoryDesc, ExternalMemoryId, ExternalSemaphoreDesc, ExternalSemaphoreId,
    FdImportOwnership, RenderInteropDevice, SemaphoreValue, StreamId,
};
use tandem_core::{ComputeApi, ErrorKind, InteropError};
use tandem_infra::interop::ImageAccess;
use tandem_infra::{HandOff, InteropSubmitter, SharedResource, SharedResourceFactory};

type Events = Arc<Mutex<Vec<String>>>;

fn push(events: &Events, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

fn position(events: &Events, event: &str) -> usize {
    events
        .lock()
        .unwrap()
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("missing event '{event}'"))
}

// Win32(0) is never closed for real, so tests can retain it safely.
fn test_handle() -> ExternalHandle {
    ExternalHandle {
        kind: ExternalHandleKinds::OPAQUE_WIN32,
        raw: RawHandle::Win32(0),
    }
}

// --- Scripted render device ---

struct ScriptedAllocation {
    name: String,
    size: u64,
    handle: Option<ExternalHandle>,
    layout: Option<SubresourceLayout>,
    events: Events,
}

impl ExportedAllocation for ScriptedAllocation {
    fn size(&self) -> u64 {
        self.size
    }

    fn is_dedicated(&self) -> bool {
        true
    }

    fn take_export_handle(&mut self) -> Option<ExternalHandle> {
        self.handle.take()
    }

    fn subresource_layout(&self) -> Option<SubresourceLayout> {
        self.layout
    }
}

impl Drop for ScriptedAllocation {
    fn drop(&mut self) {
        push(&self.events, format!("render free {}", self.name));
    }
}

struct ScriptedSemaphore {
    kind: SemaphoreKind,
    handle: Option<ExternalHandle>,
    counter: AtomicU64,
    events: Events,
}

impl ExportedSemaphore for ScriptedSemaphore {
    fn kind(&self) -> SemaphoreKind {
        self.kind
    }

    fn take_export_handle(&mut self) -> Option<ExternalHandle> {
        self.handle.take()
    }

    fn counter_value(&self) -> Result<u64, InteropError> {
        Ok(self.counter.load(Ordering::SeqCst))
    }

    fn wait_on_cpu(&self, value: u64, _timeout_ns: u64) -> WaitStatus {
        push(&self.events, format!("cpu wait {value}"));
        if self.counter.load(Ordering::SeqCst) >= value {
            WaitStatus::Signaled
        } else {
            WaitStatus::TimedOut
        }
    }

    fn signal_on_cpu(&self, value: u64) -> Result<(), InteropError> {
        self.counter.store(value, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedRender {
    record: PhysicalDeviceRecord,
    timelines: bool,
    events: Events,
}

impl ScriptedRender {
    fn new(events: &Events) -> Self {
        Self {
            record: PhysicalDeviceRecord {
                name: "Scripted GPU".to_string(),
                ..Default::default()
            },
            timelines: true,
            events: Arc::clone(events),
        }
    }
}

impl RenderInteropDevice for ScriptedRender {
    type Buffer = ScriptedAllocation;
    type Image = ScriptedAllocation;
    type Semaphore = ScriptedSemaphore;
    type CommandBuffer = &'static str;

    fn record(&self) -> &PhysicalDeviceRecord {
        &self.record
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<ScriptedAllocation, InteropError> {
        push(&self.events, format!("render alloc buffer {}", desc.size));
        Ok(ScriptedAllocation {
            name: format!("buffer {}", desc.size),
            size: desc.size.next_multiple_of(256),
            handle: desc.exportable.then(test_handle),
            layout: None,
            events: Arc::clone(&self.events),
        })
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<ScriptedAllocation, InteropError> {
        let linear = desc.usage.contains(ImageUsage::LINEAR);
        push(&self.events, format!("render alloc image linear={linear}"));
        let row_pitch = u64::from(desc.extent.width) * u64::from(desc.format.block_size());
        Ok(ScriptedAllocation {
            name: format!("image {:?}", desc.format),
            size: 1 << 20,
            handle: desc.exportable.then(test_handle),
            layout: linear.then(|| SubresourceLayout {
                offset: 0,
                size: row_pitch * u64::from(desc.extent.height),
                row_pitch,
                array_pitch: 0,
                depth_pitch: 0,
            }),
            events: Arc::clone(&self.events),
        })
    }

    fn create_semaphore(&self, desc: &SemaphoreDesc) -> Result<ScriptedSemaphore, InteropError> {
        if desc.kind == SemaphoreKind::Timeline && !self.timelines {
            return Err(InteropError::not_supported("no timelines"));
        }
        push(&self.events, format!("render semaphore {:?}", desc.kind));
        Ok(ScriptedSemaphore {
            kind: desc.kind,
            handle: desc.exportable.then(test_handle),
            counter: AtomicU64::new(desc.initial_value),
            events: Arc::clone(&self.events),
        })
    }

    fn upload_buffer(&self, _buffer: &ScriptedAllocation, _offset: u64, _data: &[u8]) -> Result<(), InteropError> {
        Ok(())
    }

    fn copy_image(&self, src: &ScriptedAllocation, dst: &ScriptedAllocation) -> Result<(), InteropError> {
        push(&self.events, format!("render copy {} -> {}", src.name, dst.name));
        Ok(())
    }

    fn submit(
        &self,
        command_buffers: &[&'static str],
        waits: &[SemaphoreValue<'_, ScriptedSemaphore>],
        signals: &[SemaphoreValue<'_, ScriptedSemaphore>],
    ) -> Result<(), InteropError> {
        for wait in waits {
            push(&self.events, format!("render wait {}", wait.value));
        }
        for cb in command_buffers {
            push(&self.events, format!("render submit {cb}"));
        }
        for signal in signals {
            signal.semaphore.counter.fetch_max(signal.value, Ordering::SeqCst);
            push(&self.events, format!("render signal {}", signal.value));
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), InteropError> {
        push(&self.events, "render finish");
        Ok(())
    }
}

// --- Scripted compute device ---

#[derive(Debug)]
struct ScriptedCompute {
    info: ComputeDeviceInfo,
    capabilities: ComputeCapabilities,
    next_id: AtomicU64,
    events: Events,
}

impl ScriptedCompute {
    fn new(events: &Events) -> Self {
        Self {
            info: ComputeDeviceInfo {
                api: ComputeApi::Cuda,
                ordinal: 0,
                name: "Scripted GPU".to_string(),
                uuid: None,
                luid: None,
            },
            capabilities: ComputeCapabilities {
                buffer_import: true,
                bindless_images: true,
                binary_semaphores: true,
                timeline_semaphores: true,
                host_copy: true,
                fd_ownership: FdImportOwnership::TakenByDriver,
                linear_pitch_alignment: 64,
            },
            next_id: AtomicU64::new(1),
            events: Arc::clone(events),
        }
    }

    fn with_capabilities(mut self, edit: impl FnOnce(&mut ComputeCapabilities)) -> Self {
        edit(&mut self.capabilities);
        self
    }
}

impl ComputeDevice for ScriptedCompute {
    fn info(&self) -> &ComputeDeviceInfo {
        &self.info
    }

    fn capabilities(&self) -> ComputeCapabilities {
        self.capabilities
    }

    fn default_stream(&self) -> StreamId {
        StreamId(7)
    }

    fn import_memory(&self, desc: &ExternalMemoryDesc<'_>) -> Result<ExternalMemoryId, InteropError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        push(&self.events, format!("compute import memory {id} size {}", desc.size));
        Ok(ExternalMemoryId(id))
    }

    fn map_buffer(&self, memory: ExternalMemoryId, offset: u64, size: u64) -> Result<DevicePtr, InteropError> {
        push(&self.events, format!("compute map buffer {} {offset} {size}", memory.0));
        Ok(DevicePtr(0x1000 * memory.0 + offset))
    }

    fn map_image(&self, memory: ExternalMemoryId, desc: &ExternalImageDesc) -> Result<BindlessImage, InteropError> {
        push(
            &self.events,
            format!(
                "compute map image {} {:?} {}x{}",
                memory.0, desc.format, desc.extent.width, desc.extent.height
            ),
        );
        Ok(BindlessImage {
            surface: memory.0,
            array: memory.0 + 100,
        })
    }

    fn release_image(&self, image: BindlessImage) -> Result<(), InteropError> {
        push(&self.events, format!("compute release image {}", image.surface));
        Ok(())
    }

    fn release_memory(&self, memory: ExternalMemoryId) -> Result<(), InteropError> {
        push(&self.events, format!("compute release memory {}", memory.0));
        Ok(())
    }

    fn import_semaphore(&self, desc: &ExternalSemaphoreDesc<'_>) -> Result<ExternalSemaphoreId, InteropError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        push(&self.events, format!("compute import {:?} semaphore {id}", desc.kind));
        Ok(ExternalSemaphoreId(id))
    }

    fn signal_semaphore(&self, _semaphore: ExternalSemaphoreId, value: u64, stream: StreamId) -> Result<(), InteropError> {
        push(&self.events, format!("compute signal {value} on {}", stream.0));
        Ok(())
    }

    fn wait_semaphore(&self, _semaphore: ExternalSemaphoreId, value: u64, stream: StreamId) -> Result<(), InteropError> {
        push(&self.events, format!("compute wait {value} on {}", stream.0));
        Ok(())
    }

    fn release_semaphore(&self, semaphore: ExternalSemaphoreId) -> Result<(), InteropError> {
        push(&self.events, format!("compute release semaphore {}", semaphore.0));
        Ok(())
    }

    fn copy_to_host(&self, _src: DevicePtr, dst: &mut [u8], _stream: StreamId) -> Result<(), InteropError> {
        dst.fill(0xAB);
        Ok(())
    }

    fn copy_from_host(&self, _dst: DevicePtr, src: &[u8], _stream: StreamId) -> Result<(), InteropError> {
        push(&self.events, format!("compute upload {}", src.len()));
        Ok(())
    }

    fn synchronize(&self, stream: StreamId) -> Result<(), InteropError> {
        push(&self.events, format!("compute synchronize {}", stream.0));
        Ok(())
    }
}

fn factory(events: &Events, compute: Option<ScriptedCompute>) -> SharedResourceFactory<ScriptedRender> {
    SharedResourceFactory::new(
        Arc::new(ScriptedRender::new(events)),
        compute.map(|c| Arc::new(c) as Arc<dyn ComputeDevice>),
        DriverWorkarounds::default(),
        true,
    )
}

fn shared_buffer_desc(size: u64) -> BufferDesc {
    BufferDesc {
        size,
        usage: BufferUsage::STORAGE,
        exportable: true,
    }
}

// --- Buffers ---

#[test]
fn zero_sized_buffer_allocates_nothing() {
    // --- Arrange ---
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));

    // --- Act ---
    let buffer = factory.create_buffer(&shared_buffer_desc(0)).unwrap();

    // --- Assert ---
    assert!(buffer.device_ptr().is_null());
    assert!(buffer.render().is_none());
    assert!(buffer.download(&mut [], StreamId(7)).is_ok());
    assert!(buffer.upload(&[], StreamId(7)).is_ok());
    assert!(events.lock().unwrap().is_empty());
}

#[test]
fn exportable_buffer_without_compute_device_is_refused() {
    let events = Events::default();
    let factory = factory(&events, None);

    let err = factory.create_buffer(&shared_buffer_desc(64)).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotSupported);
    assert!(!factory.interop_available());
}

#[test]
fn render_only_buffer_is_allowed_without_compute_device() {
    let events = Events::default();
    let factory = factory(&events, None);

    let buffer = factory
        .create_buffer(&BufferDesc {
            exportable: false,
            ..shared_buffer_desc(64)
        })
        .unwrap();

    assert!(!buffer.is_shared());
    assert!(buffer.device_ptr().is_null());
    assert!(buffer.render().is_some());
}

#[test]
fn exportable_buffer_is_imported_with_full_allocation_size() {
    // --- Arrange ---
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));

    // --- Act ---
    let buffer = factory.create_buffer(&shared_buffer_desc(100)).unwrap();

    // --- Assert ---
    assert!(buffer.is_shared());
    assert_eq!(buffer.size(), 100);
    assert_eq!(buffer.device_ptr(), DevicePtr(0x1000));
    position(&events, "compute import memory 1 size 256");
    position(&events, "compute map buffer 1 0 100");
}

#[test]
fn dropping_a_buffer_releases_the_compute_side_first() {
    // --- Arrange ---
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let buffer = factory.create_buffer(&shared_buffer_desc(16)).unwrap();

    // --- Act ---
    drop(buffer);

    // --- Assert ---
    assert!(position(&events, "compute release memory 1") < position(&events, "render free buffer 16"));
}

#[test]
fn host_copies_go_through_the_compute_api() {
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let buffer = factory.create_buffer(&shared_buffer_desc(8)).unwrap();

    let mut out = [0u8; 8];
    buffer.download(&mut out, StreamId(7)).unwrap();
    buffer.upload(&[1, 2, 3], StreamId(7)).unwrap();

    assert_eq!(out, [0xAB; 8]);
    position(&events, "compute upload 3");
    let err = buffer.upload(&[0; 9], StreamId(7)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
}

// --- Images ---

#[test]
fn block_compressed_image_exports_a_separate_alias_image() {
    // --- Arrange ---
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let desc = ImageDesc::shared_2d(64, 32, ImageFormat::Bc6hUfloat, ImageUsage::SAMPLED);

    // --- Act ---
    let image = factory.create_image(&desc).unwrap();

    // --- Assert ---
    assert!(image.compute_alias().aliased);
    assert!(matches!(image.access(), ImageAccess::Bindless(_)));
    let allocations: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with("render alloc image"))
        .cloned()
        .collect();
    assert_eq!(allocations.len(), 2);
    assert!(image.render().handle.is_none(), "the BC6H image is not exported");
    let alias_image = image.alias_image().expect("an alias image");
    assert_eq!(alias_image.name, "image Rgba32Uint");
    assert!(std::ptr::eq(image.compute_image(), alias_image));
    position(&events, "compute map image 1 Rgba32Uint 16x8");
}

#[test]
fn alias_image_is_copied_around_each_hand_off() {
    // --- Arrange ---
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let image = factory
        .create_image(&ImageDesc::shared_2d(8, 8, ImageFormat::Bc6hUfloat, ImageUsage::SAMPLED))
        .unwrap();
    let semaphore = factory.create_semaphore(0).unwrap();
    let submitter = submitter(&factory, DriverWorkarounds::default());

    // --- Act ---
    submitter
        .render_to_compute(&["encode"], &semaphore, &[&image as &dyn HandOff<ScriptedRender>])
        .unwrap();
    submitter
        .compute_to_render(&["sample"], &semaphore, &[&image as &dyn HandOff<ScriptedRender>])
        .unwrap();

    // --- Assert ---
    let to_alias = position(&events, "render copy image Bc6hUfloat -> image Rgba32Uint");
    let from_alias = position(&events, "render copy image Rgba32Uint -> image Bc6hUfloat");
    assert!(position(&events, "render submit encode") < to_alias);
    assert!(to_alias < position(&events, "render signal 1"));
    assert!(position(&events, "render signal 1") < position(&events, "compute wait 1 on 7"));
    assert!(position(&events, "render wait 2") < from_alias);
    assert!(from_alias < position(&events, "render submit sample"));
    assert_eq!(image.ownership(), ResourceOwnership::Render);
}

#[test]
fn images_without_an_alias_are_not_copied() {
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let image = factory
        .create_image(&ImageDesc::shared_2d(8, 8, ImageFormat::Rgba16Sfloat, ImageUsage::SAMPLED))
        .unwrap();
    let semaphore = factory.create_semaphore(0).unwrap();
    let submitter = submitter(&factory, DriverWorkarounds::default());

    submitter
        .render_to_compute(&["draw"], &semaphore, &[&image as &dyn HandOff<ScriptedRender>])
        .unwrap();

    assert!(image.alias_image().is_none());
    assert!(!events.lock().unwrap().iter().any(|e| e.starts_with("render copy")));
}

#[test]
fn block_compressed_image_must_cover_whole_blocks() {
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let desc = ImageDesc::shared_2d(30, 32, ImageFormat::Bc6hSfloat, ImageUsage::SAMPLED);

    let err = factory.create_image(&desc).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(events.lock().unwrap().is_empty());
}

#[test]
fn image_without_bindless_support_is_mapped_linearly() {
    // --- Arrange ---
    let events = Events::default();
    let compute = ScriptedCompute::new(&events).with_capabilities(|c| c.bindless_images = false);
    let factory = factory(&events, Some(compute));
    let desc = ImageDesc::shared_2d(16, 4, ImageFormat::Rgba8Unorm, ImageUsage::STORAGE);

    // --- Act ---
    let image = factory.create_image(&desc).unwrap();

    // --- Assert ---
    assert!(image.desc().usage.contains(ImageUsage::LINEAR));
    match image.access() {
        ImageAccess::Linear { ptr, layout } => {
            assert_eq!(ptr, DevicePtr(0x1000));
            assert_eq!(layout.row_pitch, 64);
        }
        other => panic!("expected linear access, got {other:?}"),
    }
}

#[test]
fn linear_image_with_unaligned_row_pitch_is_refused() {
    // --- Arrange ---
    let events = Events::default();
    let compute = ScriptedCompute::new(&events).with_capabilities(|c| {
        c.bindless_images = false;
        c.linear_pitch_alignment = 256;
    });
    let factory = factory(&events, Some(compute));
    // 20 RGBA8 texels give an 80-byte row.
    let desc = ImageDesc::shared_2d(20, 4, ImageFormat::Rgba8Unorm, ImageUsage::STORAGE);

    // --- Act ---
    let err = factory.create_image(&desc).unwrap_err();

    // --- Assert ---
    assert_eq!(err.kind(), ErrorKind::NotSupported);
    let events = events.lock().unwrap();
    assert!(!events.iter().any(|e| e.starts_with("compute import memory")));
    assert!(events.contains(&"render free image Rgba8Unorm".to_string()));
}

#[test]
fn linear_alias_image_is_checked_for_alignment() {
    let events = Events::default();
    let compute = ScriptedCompute::new(&events).with_capabilities(|c| {
        c.bindless_images = false;
        c.linear_pitch_alignment = 64;
    });
    let factory = factory(&events, Some(compute));

    // 8x8 BC6H aliases to 2x2 RGBA32UI: 32-byte rows.
    let err = factory
        .create_image(&ImageDesc::shared_2d(8, 8, ImageFormat::Bc6hUfloat, ImageUsage::SAMPLED))
        .unwrap_err();
    let image = factory
        .create_image(&ImageDesc::shared_2d(16, 8, ImageFormat::Bc6hUfloat, ImageUsage::SAMPLED))
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::NotSupported);
    match image.access() {
        ImageAccess::Linear { layout, .. } => assert_eq!(layout.row_pitch, 64),
        other => panic!("expected linear access, got {other:?}"),
    }
    assert!(image.desc().usage.contains(ImageUsage::TRANSFER_SRC));
    assert!(!image.desc().usage.contains(ImageUsage::LINEAR));
}

#[test]
fn dropping_a_bindless_image_releases_image_then_memory_then_render() {
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let image = factory
        .create_image(&ImageDesc::shared_2d(8, 8, ImageFormat::Rgba16Sfloat, ImageUsage::SAMPLED))
        .unwrap();

    drop(image);

    let image_release = position(&events, "compute release image 1");
    let memory_release = position(&events, "compute release memory 1");
    let render_free = position(&events, "render free image Rgba16Sfloat");
    assert!(image_release < memory_release && memory_release < render_free);
}

// --- Semaphores ---

#[test]
fn timeline_semaphore_is_preferred() {
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));

    let semaphore = factory.create_semaphore(0).unwrap();

    assert_eq!(semaphore.kind(), SemaphoreKind::Timeline);
    assert!(semaphore.is_shared());
    position(&events, "compute import Timeline semaphore 1");
}

#[test]
fn binary_semaphore_is_used_when_compute_lacks_timelines() {
    let events = Events::default();
    let compute = ScriptedCompute::new(&events).with_capabilities(|c| c.timeline_semaphores = false);
    let factory = factory(&events, Some(compute));

    let semaphore = factory.create_semaphore(0).unwrap();

    assert_eq!(semaphore.kind(), SemaphoreKind::Binary);
}

#[test]
fn binary_semaphore_is_used_when_render_lacks_timelines() {
    let events = Events::default();
    let mut render = ScriptedRender::new(&events);
    render.timelines = false;
    let factory = SharedResourceFactory::new(
        Arc::new(render),
        Some(Arc::new(ScriptedCompute::new(&events)) as Arc<dyn ComputeDevice>),
        DriverWorkarounds::default(),
        true,
    );

    let semaphore = factory.create_semaphore(0).unwrap();

    assert_eq!(semaphore.kind(), SemaphoreKind::Binary);
    position(&events, "compute import Binary semaphore 1");
}

#[test]
fn cpu_observed_value_never_decreases() {
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let semaphore = factory.create_semaphore(3).unwrap();

    semaphore.render().signal_on_cpu(5).unwrap();
    assert_eq!(semaphore.current_value().unwrap(), 5);
    semaphore.render().counter.store(4, Ordering::SeqCst);

    assert_eq!(semaphore.current_value().unwrap(), 5);
    assert_eq!(semaphore.wait_on_cpu_timeout(9, 1_000), WaitStatus::TimedOut);
}

// --- Submission ---

fn submitter(
    factory: &SharedResourceFactory<ScriptedRender>,
    workarounds: DriverWorkarounds,
) -> InteropSubmitter<ScriptedRender> {
    let compute = Arc::clone(factory.compute().unwrap());
    let stream = compute.default_stream();
    InteropSubmitter::new(Arc::clone(factory.render()), compute, stream, workarounds)
}

#[test]
fn render_to_compute_signals_before_compute_waits() {
    // --- Arrange ---
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let buffer = factory.create_buffer(&shared_buffer_desc(32)).unwrap();
    let semaphore = factory.create_semaphore(0).unwrap();
    let submitter = submitter(&factory, DriverWorkarounds::default());

    // --- Act ---
    let value = submitter
        .render_to_compute(&["draw"], &semaphore, &[&buffer as &dyn HandOff<ScriptedRender>])
        .unwrap();

    // --- Assert ---
    assert_eq!(value, 1);
    assert!(position(&events, "render signal 1") < position(&events, "compute wait 1 on 7"));
    assert_eq!(buffer.ownership(), ResourceOwnership::Compute);
    assert_eq!(semaphore.cursor().highest_submitted(), 1);
    assert!(!events.lock().unwrap().contains(&"render finish".to_string()));
}

#[test]
fn compute_to_render_hands_ownership_back() {
    // --- Arrange ---
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let buffer = factory.create_buffer(&shared_buffer_desc(32)).unwrap();
    let semaphore = factory.create_semaphore(0).unwrap();
    let submitter = submitter(&factory, DriverWorkarounds::default());
    submitter
        .render_to_compute(&["draw"], &semaphore, &[&buffer as &dyn HandOff<ScriptedRender>])
        .unwrap();

    // --- Act ---
    let value = submitter
        .compute_to_render(&["present"], &semaphore, &[&buffer as &dyn HandOff<ScriptedRender>])
        .unwrap();

    // --- Assert ---
    assert_eq!(value, 2);
    assert!(position(&events, "compute signal 2 on 7") < position(&events, "render wait 2"));
    assert!(position(&events, "render wait 2") < position(&events, "render submit present"));
    assert_eq!(buffer.ownership(), ResourceOwnership::Render);
    assert_eq!(semaphore.cursor().highest_submitted(), 2);
}

#[test]
fn finish_after_signal_workaround_drains_the_render_queue() {
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let semaphore = factory.create_semaphore(0).unwrap();
    let submitter = submitter(
        &factory,
        DriverWorkarounds {
            finish_after_signal: true,
            cross_api_wait_may_deadlock: false,
        },
    );

    submitter.render_to_compute(&["draw"], &semaphore, &[]).unwrap();

    let signal = position(&events, "render signal 1");
    let finish = position(&events, "render finish");
    let wait = position(&events, "compute wait 1 on 7");
    assert!(signal < finish && finish < wait);
}

#[test]
fn shutdown_waits_for_the_highest_submitted_value() {
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let semaphore = factory.create_semaphore(0).unwrap();
    let submitter = submitter(&factory, DriverWorkarounds::default());
    submitter.render_to_compute(&["a"], &semaphore, &[]).unwrap();
    submitter.render_to_compute(&["b"], &semaphore, &[]).unwrap();

    submitter.shutdown(&[&semaphore]).unwrap();

    let wait = position(&events, "cpu wait 2");
    assert!(wait < position(&events, "compute synchronize 7"));
    assert!(position(&events, "compute synchronize 7") < position(&events, "render finish"));
}

#[test]
fn repeated_hand_offs_keep_values_increasing_until_shutdown() {
    // --- Arrange ---
    let events = Events::default();
    let factory = factory(&events, Some(ScriptedCompute::new(&events)));
    let buffer = factory.create_buffer(&shared_buffer_desc(64)).unwrap();
    let semaphore = factory.create_semaphore(0).unwrap();
    let submitter = submitter(&factory, DriverWorkarounds::default());
    let mut last = 0;

    // --- Act ---
    for _ in 0..100 {
        let to_compute = submitter
            .render_to_compute(&["produce"], &semaphore, &[&buffer as &dyn HandOff<ScriptedRender>])
            .unwrap();
        assert!(to_compute > last);
        assert_eq!(buffer.ownership(), ResourceOwnership::Compute);

        let to_render = submitter
            .compute_to_render(&["consume"], &semaphore, &[&buffer as &dyn HandOff<ScriptedRender>])
            .unwrap();
        assert!(to_render > to_compute);
        assert_eq!(buffer.ownership(), ResourceOwnership::Render);
        assert_eq!(semaphore.cursor().highest_submitted(), to_render);
        last = to_render;
    }
    submitter.shutdown(&[&semaphore]).unwrap();

    // --- Assert ---
    assert_eq!(last, 200);
    let final_wait = position(&events, "cpu wait 200");
    assert!(final_wait < position(&events, "compute synchronize 7"));
    assert!(position(&events, "compute synchronize 7") < position(&events, "render finish"));
    assert_eq!(
        events.lock().unwrap().iter().filter(|e| e.starts_with("cpu wait")).count(),
        1
    );
}

#[test]
fn deadlock_prone_drivers_disable_interop() {
    let events = Events::default();
    let factory = SharedResourceFactory::new(
        Arc::new(ScriptedRender::new(&events)),
        Some(Arc::new(ScriptedCompute::new(&events)) as Arc<dyn ComputeDevice>),
        DriverWorkarounds {
            finish_after_signal: false,
            cross_api_wait_may_deadlock: true,
        },
        true,
    );

    assert!(!factory.interop_available());
    let err = factory.create_buffer(&shared_buffer_desc(4)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
}
