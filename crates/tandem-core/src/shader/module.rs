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

//! A compiled shader stage and the reflection data extracted from it.

use super::stage::{ShaderStage, StageMask};
use std::collections::BTreeMap;

/// Backend-specific compiled bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShaderBytecode {
    /// SPIR-V words, consumed by Vulkan.
    Spirv(Vec<u32>),
    /// DXIL produced by DXC.
    Dxil(Vec<u8>),
    /// DXBC produced by the legacy FXC compiler.
    Dxbc(Vec<u8>),
}

impl ShaderBytecode {
    /// The bytecode as raw bytes (SPIR-V words in native byte order).
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            ShaderBytecode::Spirv(words) => words.iter().flat_map(|w| w.to_ne_bytes()).collect(),
            ShaderBytecode::Dxil(bytes) | ShaderBytecode::Dxbc(bytes) => bytes.clone(),
        }
    }

    /// The size of the bytecode in bytes.
    pub fn len_bytes(&self) -> usize {
        match self {
            ShaderBytecode::Spirv(words) => words.len() * 4,
            ShaderBytecode::Dxil(bytes) | ShaderBytecode::Dxbc(bytes) => bytes.len(),
        }
    }
}

/// The descriptor type of a reflected binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingKind {
    /// A uniform (constant) buffer.
    UniformBuffer,
    /// A read/write storage buffer.
    StorageBuffer,
    /// A sampled image without a sampler.
    SampledImage,
    /// A combined image + sampler.
    CombinedImageSampler,
    /// A storage (UAV) image.
    StorageImage,
    /// A standalone sampler.
    Sampler,
    /// A ray-tracing acceleration structure.
    AccelerationStructure,
}

/// Reflection record for one resource binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    /// Descriptor set (Vulkan) or register space (D3D12).
    pub set: u32,
    /// Binding index (Vulkan) or register (D3D12).
    pub binding: u32,
    /// Total size in bytes, for uniform buffers.
    pub size: Option<u64>,
    /// The descriptor type.
    pub kind: BindingKind,
    /// Array element count (1 for non-arrays, 0 for runtime-sized arrays).
    pub count: u32,
    /// The stages that reference the binding. Unioned on merge, never compared.
    pub stages: StageMask,
}

/// Reflection record for one member of a uniform buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableInfo {
    /// Descriptor set / register space of the enclosing buffer.
    pub set: u32,
    /// Binding / register of the enclosing buffer.
    pub binding: u32,
    /// Byte offset within the buffer.
    pub offset: u32,
    /// Size in bytes.
    pub size: u32,
}

/// One compiled shader stage together with its reflection tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderModule {
    /// The logical id the module was compiled from, e.g. `Blit.Fragment`.
    pub id: String,
    /// The stage kind.
    pub stage: ShaderStage,
    /// The entry point name.
    pub entry_point: String,
    /// The compiled bytecode.
    pub bytecode: ShaderBytecode,
    /// Thread-group extents for compute-like stages; `[1, 1, 1]` elsewhere.
    pub thread_group_size: [u32; 3],
    /// Bindings keyed by their source name.
    pub bindings: BTreeMap<String, BindingInfo>,
    /// Uniform-buffer members keyed by their source name.
    pub variables: BTreeMap<String, VariableInfo>,
}

impl ShaderModule {
    /// Looks up a binding by its source name.
    pub fn binding(&self, name: &str) -> Option<&BindingInfo> {
        self.bindings.get(name)
    }

    /// Looks up a uniform-buffer member by its source name.
    pub fn variable(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.get(name)
    }
}
