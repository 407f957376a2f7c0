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

//! Maps bare shader file names to their location in the source tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tandem_core::{RenderApi, ShaderError};
use walkdir::WalkDir;

/// The source language of a shader tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderLanguage {
    /// GLSL, compiled to SPIR-V for Vulkan.
    Glsl,
    /// HLSL, compiled to DXIL/DXBC for Direct3D 12.
    Hlsl,
}

impl ShaderLanguage {
    /// The language a render API consumes.
    pub fn for_render_api(api: RenderApi) -> Self {
        match api {
            RenderApi::D3D12 => ShaderLanguage::Hlsl,
            RenderApi::Vulkan | RenderApi::OpenGl => ShaderLanguage::Glsl,
        }
    }

    /// The file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ShaderLanguage::Glsl => "glsl",
            ShaderLanguage::Hlsl => "hlsl",
        }
    }

    /// Candidate global-defines file names, most specific first.
    fn global_defines_candidates(self) -> [&'static str; 2] {
        match self {
            ShaderLanguage::Glsl => ["GlobalDefinesVulkan.glsl", "GlobalDefines.glsl"],
            ShaderLanguage::Hlsl => ["GlobalDefinesD3D12.hlsl", "GlobalDefines.hlsl"],
        }
    }
}

/// Bare file name → path map over a shader source tree.
#[derive(Debug, Clone)]
pub struct ShaderFileIndex {
    root: PathBuf,
    language: ShaderLanguage,
    files: BTreeMap<String, PathBuf>,
    global_defines: String,
}

impl ShaderFileIndex {
    /// Walks `root` recursively and registers every file with the extension
    /// of `language`.
    ///
    /// ## Errors
    /// * `ShaderError::DuplicateFile` - If two files share a bare name.
    /// * `ShaderError::Io` - If the tree or the global defines cannot be read.
    pub fn build(root: impl AsRef<Path>, language: ShaderLanguage) -> Result<Self, ShaderError> {
        let root = root.as_ref().to_path_buf();
        let mut files: BTreeMap<String, PathBuf> = BTreeMap::new();

        for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| ShaderError::Io {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone()),
                source_error: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(language.extension()) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                log::warn!("Skipping shader file with a non UTF-8 name: {}", path.display());
                continue;
            };
            if let Some(first) = files.get(name) {
                return Err(ShaderError::DuplicateFile {
                    name: name.to_string(),
                    first: first.clone(),
                    second: path.to_path_buf(),
                });
            }
            files.insert(name.to_string(), path.to_path_buf());
        }

        let mut global_defines = String::new();
        for candidate in language.global_defines_candidates() {
            if let Some(path) = files.get(candidate) {
                global_defines = read_source(path)?;
                if !global_defines.is_empty() && !global_defines.ends_with('\n') {
                    global_defines.push('\n');
                }
                log::debug!("Using global defines from {}", path.display());
                break;
            }
        }

        log::info!(
            "Indexed {} {} shader files under {}",
            files.len(),
            language.extension(),
            root.display()
        );

        Ok(Self {
            root,
            language,
            files,
            global_defines,
        })
    }

    /// The indexed root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The language of the indexed files.
    pub fn language(&self) -> ShaderLanguage {
        self.language
    }

    /// Resolves a bare file name such as `Blit.glsl`.
    pub fn resolve(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(PathBuf::as_path)
    }

    /// Resolves the file holding the shaders of `stem` (e.g. `Blit` → `Blit.glsl`).
    pub fn file_for_stem(&self, stem: &str) -> Option<&Path> {
        self.resolve(&format!("{stem}.{}", self.language.extension()))
    }

    /// The global-defines text, empty when no such file exists.
    pub fn global_defines(&self) -> &str {
        &self.global_defines
    }

    /// Number of indexed files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the tree holds no shader file.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterates over `(bare name, path)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.files.iter().map(|(n, p)| (n.as_str(), p.as_path()))
    }
}

/// Reads a shader source file, normalizing `\r\n` line endings.
pub(crate) fn read_source(path: &Path) -> Result<String, ShaderError> {
    let text = std::fs::read_to_string(path).map_err(|e| ShaderError::Io {
        path: path.to_path_buf(),
        source_error: e.to_string(),
    })?;
    Ok(if text.contains('\r') {
        text.replace("\r\n", "\n")
    } else {
        text
    })
}
