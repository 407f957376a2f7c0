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

//! Pure-Rust GLSL → SPIR-V backend built on naga.

use super::{compile_error, CompileRequest, CompiledBytecode, ShaderCompilerBackend};
use crate::index::ShaderLanguage;
use crate::reflect::spirv::reflect_spirv;
use naga::back::spv;
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use tandem_core::settings::{CompilerBackendKind, OptimizationLevel};
use tandem_core::shader::{ShaderBytecode, ShaderStage};
use tandem_core::ShaderError;

/// GLSL front-end, validator and SPIR-V writer from naga.
///
/// naga has no optimizer, so the optimization level is ignored. Debug
/// names are always written because reflection keys bindings by name.
#[derive(Debug, Default, Clone, Copy)]
pub struct NagaBackend;

fn naga_stage(stage: ShaderStage) -> Option<naga::ShaderStage> {
    match stage {
        ShaderStage::Vertex => Some(naga::ShaderStage::Vertex),
        ShaderStage::Fragment => Some(naga::ShaderStage::Fragment),
        ShaderStage::Compute => Some(naga::ShaderStage::Compute),
        _ => None,
    }
}

impl ShaderCompilerBackend for NagaBackend {
    fn kind(&self) -> CompilerBackendKind {
        CompilerBackendKind::Naga
    }

    fn language(&self) -> ShaderLanguage {
        ShaderLanguage::Glsl
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledBytecode, ShaderError> {
        let stage = naga_stage(request.stage).ok_or_else(|| {
            ShaderError::NotSupported(format!(
                "the naga backend cannot compile {} stage '{}'; use the shaderc backend",
                request.stage, request.id
            ))
        })?;
        if request.options.optimization != OptimizationLevel::None {
            log::trace!(
                "naga has no optimizer; '{}' is compiled without {:?} optimization",
                request.id,
                request.options.optimization
            );
        }

        // --- 1. Parse ---
        let mut frontend = glsl::Frontend::default();
        let module = frontend
            .parse(&glsl::Options::from(stage), request.source)
            .map_err(|e| compile_error(request, e.emit_to_string(request.source)))?;

        // --- 2. Validate ---
        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| compile_error(request, e.emit_to_string(request.source)))?;

        // --- 3. Write SPIR-V ---
        let mut options = spv::Options::default();
        options.flags = spv::WriterFlags::DEBUG;
        let pipeline = spv::PipelineOptions {
            shader_stage: stage,
            entry_point: request.entry_point.to_string(),
        };
        let words = spv::write_vec(&module, &info, &options, Some(&pipeline))
            .map_err(|e| compile_error(request, e.to_string()))?;

        let reflection = reflect_spirv(&words, request.stage).map_err(|e| ShaderError::Reflection {
            id: request.id.to_string(),
            details: e.to_string(),
        })?;
        log::debug!("naga compiled '{}' ({} words)", request.id, words.len());

        Ok(CompiledBytecode {
            bytecode: ShaderBytecode::Spirv(words),
            reflection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::settings::ShaderCompileOptions;
    use tandem_core::shader::BindingKind;
    use tandem_core::ErrorKind;

    const COMPUTE: &str = "#version 450
layout(local_size_x = 8, local_size_y = 4) in;
layout(set = 0, binding = 1) uniform Params { vec4 tint; float exposure; };
layout(set = 0, binding = 2) buffer Pixels { vec4 pixels[]; };
void main() {
    pixels[gl_GlobalInvocationID.x] = tint * exposure;
}
";

    fn request<'a>(id: &'a str, stage: ShaderStage, source: &'a str, options: &'a ShaderCompileOptions) -> CompileRequest<'a> {
        CompileRequest {
            id,
            stage,
            source,
            entry_point: "main",
            options,
            index: None,
        }
    }

    #[test]
    fn compiles_and_reflects_a_compute_shader() {
        let options = ShaderCompileOptions::default();
        let out = NagaBackend
            .compile(&request("Sim.Compute", ShaderStage::Compute, COMPUTE, &options))
            .unwrap();

        let ShaderBytecode::Spirv(words) = &out.bytecode else {
            panic!("naga must produce SPIR-V");
        };
        assert_eq!(words[0], 0x0723_0203);
        let params = &out.reflection.bindings["Params"];
        assert_eq!(params.kind, BindingKind::UniformBuffer);
        assert_eq!((params.set, params.binding), (0, 1));
        assert_eq!(out.reflection.variables["exposure"].offset, 16);
        assert_eq!(out.reflection.thread_group_size, Some([8, 4, 1]));
    }

    #[test]
    fn syntax_errors_carry_compiler_text() {
        let options = ShaderCompileOptions::default();
        let source = "#version 450\nvoid main() { undeclared_thing = 1; }\n";
        let err = NagaBackend
            .compile(&request("Broken.Compute", ShaderStage::Compute, source, &options))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CompileFailure);
        assert!(err.to_string().contains("Broken.Compute"));
    }

    #[test]
    fn unsupported_stages_are_reported() {
        let options = ShaderCompileOptions::default();
        let err = NagaBackend
            .compile(&request("Rt.RayGen", ShaderStage::RayGen, COMPUTE, &options))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }
}
