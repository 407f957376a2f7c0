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

//! # Tandem SDK
//!
//! The entry point for applications. It loads an [`InteropConfig`], sets up
//! logging, and builds the process-wide [`InteropContext`]: a Vulkan render
//! device, the compute device that drives the same GPU (CUDA, HIP, Level
//! Zero or OpenCL, in configurable order), a shared-resource factory and a
//! shader manager.
//!
//! ```no_run
//! use tandem_sdk::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     InteropContext::initialize(InteropConfig::default())?;
//!     let shared = with_context(|ctx| ctx.interop_available())?;
//!     println!("interop available: {shared}");
//!     InteropContext::shutdown()
//! }
//! ```

pub mod config;
pub mod context;
pub mod fatal;
pub mod logging;
pub mod registry;
pub mod selection;

pub use config::InteropConfig;
pub use context::{with_context, InteropContext};
pub use fatal::{set_fatal_handler, FatalErrorHandler, LogFatalErrors};
pub use logging::{init_logging, LoggingConfig};
pub use registry::{ResourceRegistry, SemaphoreId};

/// The types most applications need.
pub mod prelude {
    pub use crate::config::InteropConfig;
    pub use crate::context::{with_context, InteropContext};
    pub use crate::registry::SemaphoreId;
    pub use tandem_core::device::SelectionOutcome;
    pub use tandem_core::resource::{BufferDesc, BufferUsage, ImageDesc, ImageFormat, ResourceId};
    pub use tandem_core::sync::WaitStatus;
    pub use tandem_core::{ComputeApi, ErrorKind, InteropError, RenderApi};
}
