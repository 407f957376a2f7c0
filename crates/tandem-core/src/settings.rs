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

//! Shader compilation settings shared by every compiler backend.

use serde::{Deserialize, Serialize};

/// Optimization level requested from the shader compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OptimizationLevel {
    /// No optimization.
    None,
    /// Optimize for bytecode size.
    Size,
    /// Optimize for execution speed.
    #[default]
    Performance,
}

/// The compiler that turns preprocessed source into bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CompilerBackendKind {
    /// naga's GLSL front-end and SPIR-V writer.
    #[default]
    Naga,
    /// shaderc (glslang + SPIRV-Tools).
    Shaderc,
    /// The DirectX Shader Compiler, producing DXIL.
    Dxc,
    /// The legacy D3D compiler, producing DXBC.
    Fxc,
}

/// Options honored when compiling a shader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderCompileOptions {
    /// Which compiler to run.
    pub backend: CompilerBackendKind,
    /// Optimization level.
    pub optimization: OptimizationLevel,
    /// Emit debug information.
    pub debug_info: bool,
    /// Emit `#line N "file"` directives instead of bare `#line N`.
    pub cpp_style_line_directives: bool,
    /// Default entry point name.
    pub entry_point: String,
}

impl Default for ShaderCompileOptions {
    fn default() -> Self {
        Self {
            backend: CompilerBackendKind::default(),
            optimization: OptimizationLevel::default(),
            debug_info: false,
            cpp_style_line_directives: false,
            entry_point: "main".to_string(),
        }
    }
}
