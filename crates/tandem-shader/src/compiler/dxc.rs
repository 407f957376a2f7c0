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

//! HLSL → DXIL through the DirectX Shader Compiler.

use super::{compile_error, spirv_words, CompileRequest, CompiledBytecode, ShaderCompilerBackend};
use crate::index::ShaderLanguage;
use crate::reflect::spirv::reflect_spirv;
use tandem_core::settings::{CompilerBackendKind, OptimizationLevel};
use tandem_core::shader::ShaderBytecode;
use tandem_core::ShaderError;

/// Compiles shader model 6 HLSL with `dxcompiler`, loaded at runtime.
///
/// DXIL carries no reflection this crate can read, so the same source is
/// compiled a second time to SPIR-V and reflected from there. Register
/// spaces become descriptor sets and register numbers become bindings.
#[derive(Debug, Default, Clone, Copy)]
pub struct DxcBackend;

fn compile_args(request: &CompileRequest<'_>) -> Vec<&'static str> {
    let mut args = vec![match request.options.optimization {
        OptimizationLevel::None => "-O0",
        OptimizationLevel::Size | OptimizationLevel::Performance => "-O3",
    }];
    if request.options.debug_info {
        args.push("-Zi");
    }
    args
}

impl ShaderCompilerBackend for DxcBackend {
    fn kind(&self) -> CompilerBackendKind {
        CompilerBackendKind::Dxc
    }

    fn language(&self) -> ShaderLanguage {
        ShaderLanguage::Hlsl
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledBytecode, ShaderError> {
        let profile = request.stage.hlsl_profile(true).ok_or_else(|| ShaderError::UnknownStage {
            id: request.id.to_string(),
        })?;
        let args = compile_args(request);

        // --- 1. DXIL ---
        let mut dxil = hassle_rs::compile_hlsl(request.id, request.source, request.entry_point, profile, &args, &[])
            .map_err(|e| compile_error(request, e.to_string()))?;
        if !hassle_rs::fake_sign_dxil_in_place(&mut dxil) {
            log::warn!("Could not sign the DXIL container of '{}'", request.id);
        }

        // --- 2. SPIR-V twin for reflection ---
        let mut spirv_args = args.clone();
        spirv_args.extend(["-spirv", "-fspv-target-env=vulkan1.2"]);
        let spirv = hassle_rs::compile_hlsl(request.id, request.source, request.entry_point, profile, &spirv_args, &[])
            .map_err(|e| ShaderError::Reflection {
                id: request.id.to_string(),
                details: format!("the SPIR-V compile used for reflection failed: {e}"),
            })?;
        let reflection = reflect_spirv(&spirv_words(&spirv), request.stage).map_err(|e| ShaderError::Reflection {
            id: request.id.to_string(),
            details: e.to_string(),
        })?;

        log::debug!("DXC compiled '{}' for {profile} ({} bytes)", request.id, dxil.len());
        Ok(CompiledBytecode {
            bytecode: ShaderBytecode::Dxil(dxil),
            reflection,
        })
    }
}
