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

//! # Tandem Infra
//!
//! Concrete implementations of the `tandem-core` seams.
//!
//! - [`vulkan`] implements [`RenderInteropDevice`] on top of `ash`, plus the
//!   device registry and the premultiplied-alpha blit executor.
//! - [`d3d12`] does the same for Direct3D 12 (Windows only).
//! - [`compute`] loads CUDA, HIP, Level Zero and OpenCL at runtime and
//!   implements [`ComputeBackend`] for each.
//! - [`interop`] joins one render device and one compute device into shared
//!   buffers, images and semaphores, and orders submissions between them.
//!
//! [`RenderInteropDevice`]: tandem_core::traits::RenderInteropDevice
//! [`ComputeBackend`]: tandem_core::traits::ComputeBackend

pub mod compute;
#[cfg(windows)]
pub mod d3d12;
pub mod interop;
pub mod platform;
pub mod vulkan;

pub use compute::load_backend;
pub use interop::{
    HandOff, InteropSubmitter, SharedBuffer, SharedImage, SharedResource, SharedResourceFactory,
    SharedSemaphore,
};
