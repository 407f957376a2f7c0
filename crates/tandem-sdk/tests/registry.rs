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

//! Resource registry ownership and shutdown ordering on a render-only device.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tandem_core::device::PhysicalDeviceRecord;
use tandem_core::resource::{
    BufferDesc, BufferUsage, ExternalHandle, ImageDesc, ImageFormat, ImageUsage,
    SubresourceLayout,
};
use tandem_core::sync::{DriverWorkarounds, SemaphoreDesc, SemaphoreKind, WaitStatus};
use tandem_core::traits::{ExportedAllocation, ExportedSemaphore, RenderInteropDevice, SemaphoreValue};
use tandem_core::{ErrorKind, InteropError};
use tandem_infra::SharedResourceFactory;
use tandem_sdk::ResourceRegistry;

type Log = Arc<Mutex<Vec<String>>>;

fn log_event(log: &Log, event: impl Into<String>) {
    log.lock().unwrap().push(event.into());
}

struct FakeAllocation {
    label: &'static str,
    size: u64,
    log: Log,
}

impl ExportedAllocation for FakeAllocation {
    fn size(&self) -> u64 {
        self.size
    }

    fn is_dedicated(&self) -> bool {
        false
    }

    fn take_export_handle(&mut self) -> Option<ExternalHandle> {
        None
    }

    fn subresource_layout(&self) -> Option<SubresourceLayout> {
        None
    }
}

impl Drop for FakeAllocation {
    fn drop(&mut self) {
        log_event(&self.log, format!("free {}", self.label));
    }
}

struct FakeSemaphore {
    counter: AtomicU64,
    log: Log,
}

impl ExportedSemaphore for FakeSemaphore {
    fn kind(&self) -> SemaphoreKind {
        SemaphoreKind::Timeline
    }

    fn take_export_handle(&mut self) -> Option<ExternalHandle> {
        None
    }

    fn counter_value(&self) -> Result<u64, InteropError> {
        Ok(self.counter.load(Ordering::SeqCst))
    }

    fn wait_on_cpu(&self, value: u64, _timeout_ns: u64) -> WaitStatus {
        log_event(&self.log, format!("cpu wait {value}"));
        WaitStatus::Signaled
    }

    fn signal_on_cpu(&self, value: u64) -> Result<(), InteropError> {
        self.counter.store(value, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for FakeSemaphore {
    fn drop(&mut self) {
        log_event(&self.log, "free semaphore");
    }
}

struct FakeRender {
    record: PhysicalDeviceRecord,
    log: Log,
}

impl RenderInteropDevice for FakeRender {
    type Buffer = FakeAllocation;
    type Image = FakeAllocation;
    type Semaphore = FakeSemaphore;
    type CommandBuffer = ();

    fn record(&self) -> &PhysicalDeviceRecord {
        &self.record
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<FakeAllocation, InteropError> {
        Ok(FakeAllocation {
            label: "buffer",
            size: desc.size,
            log: Arc::clone(&self.log),
        })
    }

    fn create_image(&self, _desc: &ImageDesc) -> Result<FakeAllocation, InteropError> {
        Ok(FakeAllocation {
            label: "image",
            size: 4096,
            log: Arc::clone(&self.log),
        })
    }

    fn create_semaphore(&self, desc: &SemaphoreDesc) -> Result<FakeSemaphore, InteropError> {
        Ok(FakeSemaphore {
            counter: AtomicU64::new(desc.initial_value),
            log: Arc::clone(&self.log),
        })
    }

    fn upload_buffer(&self, _buffer: &FakeAllocation, _offset: u64, _data: &[u8]) -> Result<(), InteropError> {
        Ok(())
    }

    fn copy_image(&self, _src: &FakeAllocation, _dst: &FakeAllocation) -> Result<(), InteropError> {
        Ok(())
    }

    fn submit(
        &self,
        _command_buffers: &[()],
        _waits: &[SemaphoreValue<'_, FakeSemaphore>],
        _signals: &[SemaphoreValue<'_, FakeSemaphore>],
    ) -> Result<(), InteropError> {
        Ok(())
    }

    fn finish(&self) -> Result<(), InteropError> {
        log_event(&self.log, "finish");
        Ok(())
    }
}

fn render_only_factory(log: &Log) -> SharedResourceFactory<FakeRender> {
    let render = FakeRender {
        record: PhysicalDeviceRecord {
            name: "Fake GPU".to_string(),
            ..Default::default()
        },
        log: Arc::clone(log),
    };
    SharedResourceFactory::new(Arc::new(render), None, DriverWorkarounds::default(), true)
}

fn local_buffer(size: u64) -> BufferDesc {
    BufferDesc {
        size,
        usage: BufferUsage::STORAGE,
        exportable: false,
    }
}

fn local_image() -> ImageDesc {
    ImageDesc {
        exportable: false,
        ..ImageDesc::shared_2d(16, 16, ImageFormat::Rgba8Unorm, ImageUsage::SAMPLED)
    }
}

#[test]
fn resources_are_reachable_by_id_until_destroyed() {
    // --- Arrange ---
    let log = Log::default();
    let factory = render_only_factory(&log);
    let mut registry = ResourceRegistry::new();

    // --- Act ---
    let buffer = registry.create_buffer(&factory, &local_buffer(64)).unwrap();
    let image = registry.create_image(&factory, &local_image()).unwrap();

    // --- Assert ---
    assert_ne!(buffer, image);
    assert_eq!(registry.buffer(buffer).map(|b| b.size()), Some(64));
    assert!(registry.image(image).is_some());
    assert!(registry.destroy(buffer));
    assert!(!registry.destroy(buffer));
    assert!(registry.buffer(buffer).is_none());
    assert_eq!(registry.len(), 1);
    assert_eq!(log.lock().unwrap().as_slice(), ["free buffer"]);
}

#[test]
fn exportable_buffer_without_compute_is_not_supported() {
    let log = Log::default();
    let factory = render_only_factory(&log);
    let mut registry = ResourceRegistry::new();

    let err = registry
        .create_buffer(
            &factory,
            &BufferDesc {
                exportable: true,
                ..local_buffer(64)
            },
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotSupported);
    assert!(registry.is_empty());
}

#[test]
fn shutdown_waits_then_drains_then_destroys() {
    // --- Arrange ---
    let log = Log::default();
    let factory = render_only_factory(&log);
    let mut registry = ResourceRegistry::new();
    registry.create_image(&factory, &local_image()).unwrap();
    registry.create_buffer(&factory, &local_buffer(32)).unwrap();
    registry.create_semaphore(&factory, 5).unwrap();

    // --- Act ---
    registry.shutdown(factory.render(), None).unwrap();

    // --- Assert ---
    assert!(registry.is_empty());
    assert_eq!(
        log.lock().unwrap().as_slice(),
        ["cpu wait 5", "finish", "free image", "free buffer", "free semaphore"]
    );
}

#[test]
fn destroying_a_semaphore_waits_for_its_submitted_value() {
    let log = Log::default();
    let factory = render_only_factory(&log);
    let mut registry = ResourceRegistry::new();
    let semaphore = registry.create_semaphore(&factory, 2).unwrap();
    assert_eq!(registry.semaphore(semaphore).map(|s| s.kind()), Some(SemaphoreKind::Timeline));

    assert!(registry.destroy_semaphore(semaphore));

    assert_eq!(log.lock().unwrap().as_slice(), ["cpu wait 2", "free semaphore"]);
    assert!(!registry.destroy_semaphore(semaphore));
}
