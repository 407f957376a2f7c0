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

//! The process-wide interop context.

use crate::config::InteropConfig;
use crate::fatal;
use crate::logging::init_logging;
use crate::registry::{ResourceRegistry, SemaphoreId};
use crate::selection::{choose_device, store_selection};
use anyhow::{Context, Result};
use std::cell::Cell;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tandem_core::device::{match_device, DeviceSelector, PhysicalDeviceRecord, SelectionOutcome};
use tandem_core::resource::{BufferDesc, ImageDesc, ResourceId};
use tandem_core::sync::{DriverWorkarounds, WaitStatus};
use tandem_core::traits::{ComputeBackend, ComputeDevice, RenderInteropDevice};
use tandem_core::{ComputeApi, InteropError, RenderApi};
use tandem_infra::vulkan::{self, VulkanDevice, VulkanInstance};
use tandem_infra::{
    platform, InteropSubmitter, SharedBuffer, SharedImage, SharedResourceFactory, SharedSemaphore,
};
use tandem_shader::{DiskCache, ShaderFileIndex, ShaderLanguage, ShaderManager};

static CONTEXT: Mutex<Option<InteropContext>> = Mutex::new(None);

thread_local! {
    static INSIDE_CONTEXT: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running inside [`with_context`] until dropped.
struct ContextBorrow;

impl ContextBorrow {
    fn enter() -> Self {
        INSIDE_CONTEXT.with(|inside| inside.set(true));
        ContextBorrow
    }
}

impl Drop for ContextBorrow {
    fn drop(&mut self) {
        INSIDE_CONTEXT.with(|inside| inside.set(false));
    }
}

/// Locks the process-wide slot. The lock is not re-entrant, so calls from
/// inside a [`with_context`] closure are refused.
fn lock_slot() -> Result<MutexGuard<'static, Option<InteropContext>>, InteropError> {
    if INSIDE_CONTEXT.with(Cell::get) {
        return Err(InteropError::precondition(
            "the interop context is already held by an enclosing with_context call",
        ));
    }
    Ok(CONTEXT.lock().unwrap_or_else(PoisonError::into_inner))
}

/// A render device, the compute device that drives the same GPU, and
/// everything shared between them.
///
/// One context exists per process. It is created by
/// [`InteropContext::initialize`], reached through [`with_context`] and torn
/// down by [`InteropContext::shutdown`].
pub struct InteropContext {
    // Field order is drop order.
    registry: ResourceRegistry<VulkanDevice>,
    submitter: Option<InteropSubmitter<VulkanDevice>>,
    factory: SharedResourceFactory<VulkanDevice>,
    compute_backend: Option<Arc<dyn ComputeBackend>>,
    shaders: ShaderManager,
    selector: DeviceSelector,
    workarounds: DriverWorkarounds,
    config: InteropConfig,
    render: Arc<VulkanDevice>,
    _instance: Arc<VulkanInstance>,
    released: bool,
}

impl InteropContext {
    /// Creates the process-wide context.
    ///
    /// If no compute device drives the selected render device the context
    /// is still created, with [`interop_available`](Self::interop_available)
    /// returning `false`.
    ///
    /// ## Errors
    /// * `InteropError::Precondition` - If a context already exists.
    /// * `InteropError::NotSupported` - If the render API is not Vulkan, or
    ///   no Vulkan 1.2 device is present.
    /// * Any error from device creation or the shader tree.
    pub fn initialize(config: InteropConfig) -> Result<()> {
        init_logging(&config.logging);
        let mut slot = lock_slot()?;
        if slot.is_some() {
            let error = fatal::escalate(InteropError::precondition(
                "the interop context is already initialized; call shutdown first",
            ));
            return Err(error.into());
        }
        *slot = Some(Self::create(config)?);
        Ok(())
    }

    fn create(config: InteropConfig) -> Result<Self> {
        if config.render_api != RenderApi::Vulkan {
            return Err(InteropError::not_supported(format!(
                "the interop context drives Vulkan only, {} was requested",
                config.render_api
            ))
            .into());
        }

        // --- 1. Render device ---
        let instance = VulkanInstance::new().context("creating the Vulkan instance")?;
        let physical = vulkan::registry::enumerate(&instance)
            .context("enumerating Vulkan devices")?;
        if physical.is_empty() {
            return Err(InteropError::not_supported("no Vulkan 1.2 device is present").into());
        }
        let selector = choose_device(
            physical.iter().map(|d| d.record.name.clone()).collect(),
            config.device_selection_file.as_deref(),
        );
        let chosen = &physical[selector.active_index()];
        let render = Arc::new(
            VulkanDevice::new(Arc::clone(&instance), chosen)
                .with_context(|| format!("creating a device on '{}'", chosen.record.name))?,
        );
        let workarounds =
            DriverWorkarounds::for_device(render.record(), platform::running_under_wsl());

        // --- 2. Compute device ---
        let found = find_compute_device(render.record(), &config.compute_apis);
        let (compute_backend, compute) = match found {
            Some((backend, device)) => (Some(backend), Some(device)),
            None => {
                log::warn!(
                    "No compute device drives '{}'; continuing without interop",
                    render.record().name
                );
                (None, None)
            }
        };

        // --- 3. Sharing ---
        let factory = SharedResourceFactory::new(
            Arc::clone(&render),
            compute,
            workarounds,
            config.use_timeline_semaphores,
        );
        let submitter = factory.compute().map(|compute| {
            InteropSubmitter::new(
                Arc::clone(&render),
                Arc::clone(compute),
                compute.default_stream(),
                workarounds,
            )
        });

        // --- 4. Shaders ---
        let language = ShaderLanguage::for_render_api(config.render_api);
        let index = ShaderFileIndex::build(&config.shader_root, language).with_context(|| {
            format!("indexing shaders under '{}'", config.shader_root.display())
        })?;
        let shaders = ShaderManager::new(index, config.compile_options())
            .context("creating the shader manager")?
            .with_disk_cache(DiskCache::from_env(&config.app_name));

        log::info!(
            "Interop context ready on '{}' (interop {})",
            render.record().name,
            if submitter.is_some() { "available" } else { "unavailable" }
        );
        Ok(Self {
            registry: ResourceRegistry::new(),
            submitter,
            factory,
            compute_backend,
            shaders,
            selector,
            workarounds,
            config,
            render,
            _instance: instance,
            released: false,
        })
    }

    /// Destroys the process-wide context. Does nothing if there is none.
    ///
    /// Outstanding timeline values are waited for, then shared resources
    /// are destroyed (compute side first), then the compute device, then
    /// the render device.
    pub fn shutdown() -> Result<()> {
        let taken = lock_slot()?.take();
        let Some(mut context) = taken else {
            return Ok(());
        };
        context.release().context("shutting down the interop context")
    }

    /// Whether a context currently exists.
    pub fn is_initialized() -> bool {
        match lock_slot() {
            Ok(slot) => slot.is_some(),
            // Only reachable from inside `with_context`, which needs a context.
            Err(_) => true,
        }
    }

    fn release(&mut self) -> Result<(), InteropError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let drained = self.registry.shutdown(&self.render, self.submitter.as_ref());
        self.submitter = None;
        if let Some(backend) = self.compute_backend.take() {
            log::info!("Releasing the {} compute context", backend.api());
        }
        drained.map_err(fatal::escalate)
    }

    /// Whether shared resources reach a compute device.
    pub fn interop_available(&self) -> bool {
        self.submitter.is_some()
    }

    pub fn config(&self) -> &InteropConfig {
        &self.config
    }

    pub fn render(&self) -> &Arc<VulkanDevice> {
        &self.render
    }

    /// The paired compute device, if any.
    pub fn compute(&self) -> Option<&Arc<dyn ComputeDevice>> {
        self.factory.compute()
    }

    pub fn compute_api(&self) -> Option<ComputeApi> {
        self.compute().map(|c| c.info().api)
    }

    pub fn workarounds(&self) -> DriverWorkarounds {
        self.workarounds
    }

    pub fn factory(&self) -> &SharedResourceFactory<VulkanDevice> {
        &self.factory
    }

    pub fn submitter(&self) -> Option<&InteropSubmitter<VulkanDevice>> {
        self.submitter.as_ref()
    }

    pub fn shaders(&mut self) -> &mut ShaderManager {
        &mut self.shaders
    }

    pub fn selector(&self) -> &DeviceSelector {
        &self.selector
    }

    /// Records the user's render device choice.
    ///
    /// When the choice differs from the active device it is written to the
    /// configured selection file; the host is expected to restart.
    pub fn select_device(&self, device_name: &str) -> Result<SelectionOutcome> {
        let outcome = self.selector.select(device_name);
        if let SelectionOutcome::RestartRequired(selection) = &outcome {
            match &self.config.device_selection_file {
                Some(path) => store_selection(path, selection)?,
                None => log::warn!("No device selection file configured; the choice is not persisted"),
            }
        }
        Ok(outcome)
    }

    pub fn create_buffer(&mut self, desc: &BufferDesc) -> Result<ResourceId, InteropError> {
        self.registry
            .create_buffer(&self.factory, desc)
            .map_err(fatal::escalate)
    }

    pub fn create_image(&mut self, desc: &ImageDesc) -> Result<ResourceId, InteropError> {
        self.registry
            .create_image(&self.factory, desc)
            .map_err(fatal::escalate)
    }

    pub fn create_semaphore(&mut self, initial_value: u64) -> Result<SemaphoreId, InteropError> {
        self.registry
            .create_semaphore(&self.factory, initial_value)
            .map_err(fatal::escalate)
    }

    pub fn buffer(&self, id: ResourceId) -> Option<&SharedBuffer<vulkan::VulkanBuffer>> {
        self.registry.buffer(id)
    }

    pub fn image(&self, id: ResourceId) -> Option<&SharedImage<vulkan::VulkanImage>> {
        self.registry.image(id)
    }

    pub fn semaphore(&self, id: SemaphoreId) -> Option<&SharedSemaphore<vulkan::VulkanSemaphore>> {
        self.registry.semaphore(id)
    }

    pub fn destroy(&mut self, id: ResourceId) -> bool {
        self.registry.destroy(id)
    }

    pub fn destroy_semaphore(&mut self, id: SemaphoreId) -> bool {
        self.registry.destroy_semaphore(id)
    }

    /// Blocks until semaphore `id` reaches `value`, bounded by the
    /// configured CPU wait timeout.
    ///
    /// ## Errors
    /// * `InteropError::Precondition` - If `id` is unknown.
    pub fn wait_semaphore(&self, id: SemaphoreId, value: u64) -> Result<WaitStatus, InteropError> {
        let semaphore = self
            .registry
            .semaphore(id)
            .ok_or_else(|| fatal::escalate(InteropError::precondition(format!("unknown {id}"))))?;
        let status = semaphore.wait_on_cpu_timeout(value, self.config.cpu_wait_timeout_ns);
        if status != WaitStatus::Signaled {
            log::warn!("Waiting for {id} to reach {value}: {status}");
        }
        Ok(status)
    }
}

impl Drop for InteropContext {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("Interop context dropped with errors: {e}");
        }
    }
}

/// Runs `f` on the process-wide context.
///
/// The context stays locked while `f` runs. Calling `with_context`,
/// [`InteropContext::initialize`] or [`InteropContext::shutdown`] from
/// inside `f` fails with a precondition error instead of deadlocking; use
/// the `&mut InteropContext` passed to `f` instead.
///
/// ## Errors
/// * `InteropError::Precondition` - If no context is initialized, or the
///   call is nested inside another `with_context`.
pub fn with_context<T>(f: impl FnOnce(&mut InteropContext) -> T) -> Result<T, InteropError> {
    let mut slot = lock_slot()?;
    match slot.as_mut() {
        Some(context) => {
            let _borrow = ContextBorrow::enter();
            Ok(f(context))
        }
        None => Err(InteropError::precondition(
            "the interop context is not initialized",
        )),
    }
}

/// Tries each compute API in `order` and opens the first device that drives
/// the same GPU as `render`.
fn find_compute_device(
    render: &PhysicalDeviceRecord,
    order: &[ComputeApi],
) -> Option<(Arc<dyn ComputeBackend>, Arc<dyn ComputeDevice>)> {
    for &api in order {
        let backend = match tandem_infra::load_backend(api) {
            Ok(backend) => backend,
            Err(e) => {
                log::info!("Skipping {api}: {e}");
                continue;
            }
        };
        let candidates = match backend.enumerate_devices() {
            Ok(candidates) => candidates,
            Err(e) => {
                log::warn!("Enumerating {api} devices failed: {e}");
                continue;
            }
        };
        let Some(index) = match_device(render, &candidates).index() else {
            log::info!("No {api} device matches '{}'", render.name);
            continue;
        };
        match backend.open_device(candidates[index].ordinal) {
            Ok(device) => return Some((backend, device)),
            Err(e) => log::warn!("Opening {api} device '{}' failed: {e}", candidates[index].name),
        }
    }
    None
}
