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

//! # Tandem Shader
//!
//! Turns shader source trees into compiled, reflected [`ShaderModule`]s.
//!
//! The pipeline has four stages, each in its own module:
//! - [`index`] maps bare file names to paths and loads the global defines.
//! - [`preprocessor`] resolves `#include`, `#import`, `#codefrag`, stage
//!   separators and keeps `#line` directives pointing at the real source.
//! - [`compiler`] drives a replaceable backend (naga, shaderc, DXC, FXC).
//! - [`reflect`] reads bindings, uniform-buffer members and thread-group
//!   sizes back out of SPIR-V or DXBC.
//!
//! [`ShaderManager`] ties them together with an in-memory cache and an
//! optional on-disk bytecode cache.
//!
//! [`ShaderModule`]: tandem_core::shader::ShaderModule

pub mod compiler;
pub mod index;
pub mod manager;
pub mod preprocessor;
pub mod reflect;

pub use compiler::{create_backend, CompileRequest, CompiledBytecode, ShaderCompilerBackend};
pub use index::{ShaderFileIndex, ShaderLanguage};
pub use manager::{
    AbortOnFailure, CompileFailureHandler, DiskCache, FailureAction, ShaderManager,
};
pub use preprocessor::{PreprocessedShader, Preprocessor};
pub use reflect::ReflectionData;
