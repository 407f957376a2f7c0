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

//! File-backed settings of an interop context.
//!
//! Stored as RON, in the same format as the rest of the engine's data files.

use crate::logging::LoggingConfig;
use anyhow::{Context, Result};
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tandem_core::settings::{CompilerBackendKind, OptimizationLevel, ShaderCompileOptions};
use tandem_core::sync::INFINITE_TIMEOUT;
use tandem_core::{ComputeApi, RenderApi};

/// Everything [`InteropContext::initialize`](crate::InteropContext::initialize) needs.
///
/// Missing fields take their default, so a config file only has to name
/// what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteropConfig {
    /// Root of the shader source tree.
    pub shader_root: PathBuf,
    /// The API that owns the swapchain.
    pub render_api: RenderApi,
    /// Which shader compiler to run.
    pub compiler_backend: CompilerBackendKind,
    pub optimization: OptimizationLevel,
    pub debug_info: bool,
    /// Emit `#line N "file"` instead of `#line N`.
    pub cpp_style_line_directives: bool,
    /// Compute APIs to try, in order. The first one with a matching device wins.
    pub compute_apis: Vec<ComputeApi>,
    pub use_timeline_semaphores: bool,
    /// Upper bound for host-side semaphore waits, in nanoseconds.
    pub cpu_wait_timeout_ns: u64,
    /// Prefix of the `<APP>_SHADER_CACHE_DIR` environment variable.
    pub app_name: String,
    /// Where the user's render device choice is persisted (JSON).
    pub device_selection_file: Option<PathBuf>,
    pub logging: LoggingConfig,
}

impl Default for InteropConfig {
    fn default() -> Self {
        Self {
            shader_root: PathBuf::from("Data/Shaders/"),
            render_api: RenderApi::Vulkan,
            compiler_backend: CompilerBackendKind::Naga,
            optimization: OptimizationLevel::Performance,
            debug_info: false,
            cpp_style_line_directives: false,
            compute_apis: vec![
                ComputeApi::Cuda,
                ComputeApi::Hip,
                ComputeApi::LevelZero,
                ComputeApi::OpenCl,
            ],
            use_timeline_semaphores: true,
            cpu_wait_timeout_ns: INFINITE_TIMEOUT,
            app_name: "TANDEM".to_string(),
            device_selection_file: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl InteropConfig {
    /// Parses a RON document.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        ron::from_str(text).context("parsing interop config")
    }

    /// Reads a RON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("reading interop config '{}'", path.display()))?;
        let config = ron::de::from_bytes(&bytes)
            .with_context(|| format!("parsing interop config '{}'", path.display()))?;
        log::info!("Loaded interop config from '{}'", path.display());
        Ok(config)
    }

    /// Writes the config as pretty-printed RON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = ron::ser::to_string_pretty(self, PrettyConfig::default())
            .context("serializing interop config")?;
        fs::write(path, text)
            .with_context(|| format!("writing interop config '{}'", path.display()))
    }

    /// The shader compile options derived from this config.
    pub fn compile_options(&self) -> ShaderCompileOptions {
        ShaderCompileOptions {
            backend: self.compiler_backend,
            optimization: self.optimization,
            debug_info: self.debug_info,
            cpp_style_line_directives: self.cpp_style_line_directives,
            ..ShaderCompileOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = InteropConfig::from_ron_str("()").unwrap();
        assert_eq!(config, InteropConfig::default());
        assert_eq!(config.shader_root, PathBuf::from("Data/Shaders/"));
        assert_eq!(config.cpu_wait_timeout_ns, u64::MAX);
        assert_eq!(config.compute_apis.first(), Some(&ComputeApi::Cuda));
    }

    #[test]
    fn partial_document_overrides_named_fields() {
        let config = InteropConfig::from_ron_str(
            r#"(
                compiler_backend: Shaderc,
                compute_apis: [LevelZero],
                use_timeline_semaphores: false,
            )"#,
        )
        .unwrap();
        assert_eq!(config.compiler_backend, CompilerBackendKind::Shaderc);
        assert_eq!(config.compute_apis, vec![ComputeApi::LevelZero]);
        assert!(!config.use_timeline_semaphores);
        assert_eq!(config.app_name, "TANDEM");
    }

    #[test]
    fn compile_options_follow_config() {
        let config = InteropConfig {
            optimization: OptimizationLevel::Size,
            debug_info: true,
            cpp_style_line_directives: true,
            ..InteropConfig::default()
        };
        let options = config.compile_options();
        assert_eq!(options.optimization, OptimizationLevel::Size);
        assert!(options.debug_info);
        assert!(options.cpp_style_line_directives);
        assert_eq!(options.entry_point, "main");
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(InteropConfig::from_ron_str("(shader_root: 3").is_err());
    }
}
