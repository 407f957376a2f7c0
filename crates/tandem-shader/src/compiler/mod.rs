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

//! Compiler backends turning preprocessed source into reflected bytecode.
//!
//! Every backend implements [`ShaderCompilerBackend`]. Which ones exist
//! depends on the build: naga is always there, shaderc and DXC sit behind
//! cargo features and FXC is Windows only. [`create_backend`] reports a
//! missing one as `NotSupported` instead of failing to link.

#[cfg(feature = "dxc")]
mod dxc;
#[cfg(windows)]
mod fxc;
mod naga_glsl;
#[cfg(feature = "shaderc")]
mod shaderc_glsl;

pub use naga_glsl::NagaBackend;

use crate::index::{ShaderFileIndex, ShaderLanguage};
use crate::reflect::ReflectionData;
use tandem_core::settings::{CompilerBackendKind, ShaderCompileOptions};
use tandem_core::shader::{ShaderBytecode, ShaderStage};
use tandem_core::ShaderError;

/// Everything a backend needs to compile one unit.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// Logical id, used as the source name in diagnostics.
    pub id: &'a str,
    /// Stage inferred from the id. Never `Unknown`.
    pub stage: ShaderStage,
    /// Fully preprocessed source text.
    pub source: &'a str,
    /// Entry point name.
    pub entry_point: &'a str,
    /// Optimization and debug settings.
    pub options: &'a ShaderCompileOptions,
    /// Index used to resolve any include the backend sees itself.
    pub index: Option<&'a ShaderFileIndex>,
}

/// Bytecode plus the reflection tables read back from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledBytecode {
    /// The compiled program.
    pub bytecode: ShaderBytecode,
    /// Bindings, uniform-buffer members and thread-group size.
    pub reflection: ReflectionData,
}

/// A shader compiler.
pub trait ShaderCompilerBackend: Send + Sync {
    /// Which backend this is. Part of the disk-cache key.
    fn kind(&self) -> CompilerBackendKind;

    /// The source language this backend accepts.
    fn language(&self) -> ShaderLanguage;

    /// Compiles and reflects one unit.
    ///
    /// ## Arguments
    /// * `request` - The preprocessed unit and compile settings.
    ///
    /// ## Returns
    /// The bytecode and its reflection tables.
    ///
    /// ## Errors
    /// * `ShaderError::Compilation` - With the compiler's full diagnostic text.
    /// * `ShaderError::Reflection` - If the produced bytecode cannot be read back.
    /// * `ShaderError::NotSupported` - If the backend cannot target `request.stage`.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledBytecode, ShaderError>;
}

/// Instantiates the backend for `kind`.
///
/// ## Errors
/// * `ShaderError::NotSupported` - If the backend is not compiled into this build
///   or not available on this platform.
pub fn create_backend(kind: CompilerBackendKind) -> Result<Box<dyn ShaderCompilerBackend>, ShaderError> {
    log::debug!("Creating {kind:?} shader compiler backend");
    match kind {
        CompilerBackendKind::Naga => Ok(Box::new(NagaBackend)),
        CompilerBackendKind::Shaderc => shaderc_backend(),
        CompilerBackendKind::Dxc => dxc_backend(),
        CompilerBackendKind::Fxc => fxc_backend(),
    }
}

#[cfg(feature = "shaderc")]
fn shaderc_backend() -> Result<Box<dyn ShaderCompilerBackend>, ShaderError> {
    Ok(Box::new(shaderc_glsl::ShadercBackend))
}

#[cfg(not(feature = "shaderc"))]
fn shaderc_backend() -> Result<Box<dyn ShaderCompilerBackend>, ShaderError> {
    Err(ShaderError::NotSupported(
        "tandem-shader was built without the `shaderc` feature".to_string(),
    ))
}

#[cfg(feature = "dxc")]
fn dxc_backend() -> Result<Box<dyn ShaderCompilerBackend>, ShaderError> {
    Ok(Box::new(dxc::DxcBackend))
}

#[cfg(not(feature = "dxc"))]
fn dxc_backend() -> Result<Box<dyn ShaderCompilerBackend>, ShaderError> {
    Err(ShaderError::NotSupported(
        "tandem-shader was built without the `dxc` feature".to_string(),
    ))
}

#[cfg(windows)]
fn fxc_backend() -> Result<Box<dyn ShaderCompilerBackend>, ShaderError> {
    Ok(Box::new(fxc::FxcBackend))
}

#[cfg(not(windows))]
fn fxc_backend() -> Result<Box<dyn ShaderCompilerBackend>, ShaderError> {
    Err(ShaderError::NotSupported(
        "FXC (d3dcompiler) is only available on Windows".to_string(),
    ))
}

pub(crate) fn compile_error(request: &CompileRequest<'_>, details: impl Into<String>) -> ShaderError {
    let details = details.into();
    log::error!("Failed to compile '{}':\n{details}", request.id);
    ShaderError::Compilation {
        id: request.id.to_string(),
        details,
    }
}

/// Reinterprets little-endian bytes as SPIR-V words.
#[cfg(feature = "dxc")]
pub(crate) fn spirv_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::ErrorKind;

    #[test]
    fn naga_is_always_available() {
        let backend = create_backend(CompilerBackendKind::Naga).unwrap();
        assert_eq!(backend.kind(), CompilerBackendKind::Naga);
        assert_eq!(backend.language(), ShaderLanguage::Glsl);
    }

    #[cfg(not(windows))]
    #[test]
    fn fxc_is_not_supported_off_windows() {
        let err = create_backend(CompilerBackendKind::Fxc).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[cfg(not(feature = "shaderc"))]
    #[test]
    fn disabled_features_report_not_supported() {
        let err = create_backend(CompilerBackendKind::Shaderc).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert!(err.to_string().contains("shaderc"));
    }
}
