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

//! glslang-based GLSL → SPIR-V backend through shaderc.

use super::{compile_error, CompileRequest, CompiledBytecode, ShaderCompilerBackend};
use crate::index::{read_source, ShaderLanguage};
use crate::reflect::spirv::reflect_spirv;
use shaderc::{
    CompileOptions, Compiler, EnvVersion, IncludeType, OptimizationLevel as ShadercOpt, ResolvedInclude,
    ShaderKind, TargetEnv,
};
use tandem_core::settings::{CompilerBackendKind, OptimizationLevel};
use tandem_core::shader::{ShaderBytecode, ShaderStage};
use tandem_core::ShaderError;

/// Compiles GLSL with shaderc, targeting Vulkan 1.2.
///
/// A fresh `shaderc::Compiler` is created per request so the backend stays
/// `Send + Sync` without a lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShadercBackend;

fn shader_kind(stage: ShaderStage) -> Option<ShaderKind> {
    Some(match stage {
        ShaderStage::Vertex => ShaderKind::Vertex,
        ShaderStage::TesselationControl => ShaderKind::TessControl,
        ShaderStage::TesselationEvaluation => ShaderKind::TessEvaluation,
        ShaderStage::Geometry => ShaderKind::Geometry,
        ShaderStage::Fragment => ShaderKind::Fragment,
        ShaderStage::Compute => ShaderKind::Compute,
        ShaderStage::RayGen => ShaderKind::RayGeneration,
        ShaderStage::AnyHit => ShaderKind::AnyHit,
        ShaderStage::ClosestHit => ShaderKind::ClosestHit,
        ShaderStage::Miss => ShaderKind::Miss,
        ShaderStage::Intersection => ShaderKind::Intersection,
        ShaderStage::Callable => ShaderKind::Callable,
        ShaderStage::TaskNv | ShaderStage::TaskExt => ShaderKind::Task,
        ShaderStage::MeshNv | ShaderStage::MeshExt => ShaderKind::Mesh,
        ShaderStage::Unknown => return None,
    })
}

impl ShaderCompilerBackend for ShadercBackend {
    fn kind(&self) -> CompilerBackendKind {
        CompilerBackendKind::Shaderc
    }

    fn language(&self) -> ShaderLanguage {
        ShaderLanguage::Glsl
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledBytecode, ShaderError> {
        let kind = shader_kind(request.stage).ok_or_else(|| ShaderError::UnknownStage {
            id: request.id.to_string(),
        })?;
        let compiler = Compiler::new()
            .ok_or_else(|| ShaderError::NotSupported("shaderc failed to initialize".to_string()))?;
        let mut options = CompileOptions::new()
            .ok_or_else(|| ShaderError::NotSupported("shaderc rejected its default options".to_string()))?;

        options.set_target_env(TargetEnv::Vulkan, EnvVersion::Vulkan1_2 as u32);
        options.set_optimization_level(match request.options.optimization {
            OptimizationLevel::None => ShadercOpt::Zero,
            OptimizationLevel::Size => ShadercOpt::Size,
            OptimizationLevel::Performance => ShadercOpt::Performance,
        });
        if request.options.debug_info {
            options.set_generate_debug_info();
        }
        let index = request.index;
        options.set_include_callback(move |name, _ty: IncludeType, requester, _depth| {
            let path = index
                .and_then(|index| index.resolve(name))
                .ok_or_else(|| format!("'{name}' (included from '{requester}') is not in the shader tree"))?;
            let content = read_source(path).map_err(|e| e.to_string())?;
            Ok(ResolvedInclude {
                resolved_name: path.display().to_string(),
                content,
            })
        });

        let artifact = compiler
            .compile_into_spirv(request.source, kind, request.id, request.entry_point, Some(&options))
            .map_err(|e| compile_error(request, e.to_string()))?;
        if artifact.get_num_warnings() > 0 {
            log::warn!("shaderc warnings for '{}':\n{}", request.id, artifact.get_warning_messages());
        }
        let words = artifact.as_binary().to_vec();

        let reflection = reflect_spirv(&words, request.stage).map_err(|e| ShaderError::Reflection {
            id: request.id.to_string(),
            details: e.to_string(),
        })?;

        Ok(CompiledBytecode {
            bytecode: ShaderBytecode::Spirv(words),
            reflection,
        })
    }
}
