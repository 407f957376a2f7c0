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

//! Identifies the two sides of an interop pair.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The API that owns the swapchain and allocates shared resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RenderApi {
    /// Vulkan 1.2 or newer.
    #[default]
    Vulkan,
    /// Direct3D 12 (Windows only).
    D3D12,
    /// OpenGL, only tracked for driver workaround policies.
    OpenGl,
}

impl RenderApi {
    /// The source-file extension the shader index registers for this API.
    pub fn shader_extension(self) -> &'static str {
        match self {
            RenderApi::D3D12 => "hlsl",
            RenderApi::Vulkan | RenderApi::OpenGl => "glsl",
        }
    }
}

impl fmt::Display for RenderApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderApi::Vulkan => write!(f, "Vulkan"),
            RenderApi::D3D12 => write!(f, "Direct3D 12"),
            RenderApi::OpenGl => write!(f, "OpenGL"),
        }
    }
}

/// The API that consumes shared resources from a compute stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputeApi {
    /// NVIDIA CUDA driver API.
    Cuda,
    /// AMD HIP runtime.
    Hip,
    /// oneAPI Level Zero.
    LevelZero,
    /// SYCL. Listed for completeness; it exposes no C ABI to load.
    Sycl,
    /// OpenCL with the `cl_khr_device_uuid` extension.
    OpenCl,
}

impl fmt::Display for ComputeApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeApi::Cuda => write!(f, "CUDA"),
            ComputeApi::Hip => write!(f, "HIP"),
            ComputeApi::LevelZero => write!(f, "Level Zero"),
            ComputeApi::Sycl => write!(f, "SYCL"),
            ComputeApi::OpenCl => write!(f, "OpenCL"),
        }
    }
}
