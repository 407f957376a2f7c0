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

//! Legacy HLSL → DXBC through `D3DCompile`.

use super::{compile_error, CompileRequest, CompiledBytecode, ShaderCompilerBackend};
use crate::index::ShaderLanguage;
use crate::reflect::dxbc::reflect_dxbc;
use std::ffi::CString;
use tandem_core::settings::{CompilerBackendKind, OptimizationLevel};
use tandem_core::shader::ShaderBytecode;
use tandem_core::ShaderError;
use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
use windows::Win32::Graphics::Direct3D::{ID3DBlob, D3D_SHADER_MACRO};

const D3DCOMPILE_DEBUG: u32 = 1 << 0;
const D3DCOMPILE_SKIP_OPTIMIZATION: u32 = 1 << 2;
const D3DCOMPILE_OPTIMIZATION_LEVEL1: u32 = 0;
const D3DCOMPILE_OPTIMIZATION_LEVEL3: u32 = 1 << 15;

/// Compiles shader model 5.0 HLSL with the system `d3dcompiler_47.dll`.
///
/// Shader model 5.0 has no register spaces, so the matrix block is moved
/// to `b13` through the `MVP_REGISTER` macro.
#[derive(Debug, Default, Clone, Copy)]
pub struct FxcBackend;

fn blob_bytes(blob: &ID3DBlob) -> Vec<u8> {
    // SAFETY: the pointer and size describe the blob's own buffer, which
    // lives as long as `blob`.
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()).to_vec() }
}

fn c_string(request: &CompileRequest<'_>, text: &str) -> Result<CString, ShaderError> {
    CString::new(text).map_err(|_| compile_error(request, format!("'{text}' contains a nul byte")))
}

impl ShaderCompilerBackend for FxcBackend {
    fn kind(&self) -> CompilerBackendKind {
        CompilerBackendKind::Fxc
    }

    fn language(&self) -> ShaderLanguage {
        ShaderLanguage::Hlsl
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledBytecode, ShaderError> {
        let target = request.stage.hlsl_profile(false).ok_or_else(|| {
            ShaderError::NotSupported(format!(
                "FXC has no shader model 5.0 profile for {} stage '{}'",
                request.stage, request.id
            ))
        })?;

        let name = c_string(request, request.id)?;
        let entry = c_string(request, request.entry_point)?;
        let target_c = c_string(request, target)?;
        let mvp_name = c_string(request, "MVP_REGISTER")?;
        let mvp_value = c_string(request, "register(b13)")?;
        let macros = [
            D3D_SHADER_MACRO {
                Name: PCSTR(mvp_name.as_ptr() as *const u8),
                Definition: PCSTR(mvp_value.as_ptr() as *const u8),
            },
            D3D_SHADER_MACRO::default(),
        ];

        let mut flags = match request.options.optimization {
            OptimizationLevel::None => D3DCOMPILE_SKIP_OPTIMIZATION,
            OptimizationLevel::Size => D3DCOMPILE_OPTIMIZATION_LEVEL1,
            OptimizationLevel::Performance => D3DCOMPILE_OPTIMIZATION_LEVEL3,
        };
        if request.options.debug_info {
            flags |= D3DCOMPILE_DEBUG;
        }

        let mut code: Option<ID3DBlob> = None;
        let mut errors: Option<ID3DBlob> = None;
        // SAFETY: every pointer refers to a live, nul-terminated buffer owned
        // by this frame, and the macro list ends with a null entry.
        let result = unsafe {
            D3DCompile(
                request.source.as_ptr() as *const _,
                request.source.len(),
                PCSTR(name.as_ptr() as *const u8),
                Some(macros.as_ptr()),
                None,
                PCSTR(entry.as_ptr() as *const u8),
                PCSTR(target_c.as_ptr() as *const u8),
                flags,
                0,
                &mut code,
                Some(&mut errors),
            )
        };

        let diagnostics = errors
            .as_ref()
            .map(|blob| String::from_utf8_lossy(&blob_bytes(blob)).trim_end_matches('\0').to_string())
            .unwrap_or_default();
        if let Err(e) = result {
            let details = if diagnostics.is_empty() { e.to_string() } else { diagnostics };
            return Err(compile_error(request, details));
        }
        if !diagnostics.is_empty() {
            log::warn!("FXC warnings for '{}':\n{diagnostics}", request.id);
        }
        let bytes = code
            .as_ref()
            .map(blob_bytes)
            .ok_or_else(|| compile_error(request, "D3DCompile returned no bytecode"))?;

        let reflection = reflect_dxbc(&bytes, request.stage).map_err(|e| ShaderError::Reflection {
            id: request.id.to_string(),
            details: e.to_string(),
        })?;

        Ok(CompiledBytecode {
            bytecode: ShaderBytecode::Dxbc(bytes),
            reflection,
        })
    }
}
