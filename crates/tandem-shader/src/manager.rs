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

//! The shader manager: index + preprocessor + backend + caches.

use crate::compiler::{create_backend, CompileRequest, ShaderCompilerBackend};
use crate::index::ShaderFileIndex;
use crate::preprocessor::Preprocessor;
use crate::reflect::reflect_bytecode;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tandem_core::settings::{CompilerBackendKind, ShaderCompileOptions};
use tandem_core::shader::{ShaderBytecode, ShaderModule, ShaderStage, ShaderStages};
use tandem_core::ShaderError;

/// What to do after a shader failed to preprocess or compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Return the error to the caller.
    Abort,
    /// Re-read the shader tree from disk and try again.
    Retry,
    /// Return the error and remember the failure until the next
    /// [`ShaderManager::invalidate_cache`], without asking again.
    Ignore,
}

/// Decides how a failed compile is handled. Interactive hosts can show an
/// abort/retry/ignore prompt here and let the user fix the file before
/// answering `Retry`.
pub trait CompileFailureHandler: Send + Sync {
    /// Called once per failed attempt.
    ///
    /// ## Arguments
    /// * `id` - The shader id that failed.
    /// * `error` - The preprocessor or compiler error, with its full text.
    fn on_failure(&self, id: &str, error: &ShaderError) -> FailureAction;
}

/// The default handler. Failures go straight back to the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortOnFailure;

impl CompileFailureHandler for AbortOnFailure {
    fn on_failure(&self, _id: &str, _error: &ShaderError) -> FailureAction {
        FailureAction::Abort
    }
}

/// On-disk bytecode cache keyed by a hash of the preprocessed source and
/// the compile settings.
///
/// Only SPIR-V and DXBC entries are stored: both can be reflected straight
/// from the bytes. DXIL needs a second compile to reflect, so it always
/// goes through the backend.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// A cache rooted at `dir`. The directory is created on first store.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Reads `<APP>_SHADER_CACHE_DIR`. Returns `None` when it is unset or
    /// empty, which disables the disk cache.
    pub fn from_env(app_name: &str) -> Option<Self> {
        let var = format!("{}_SHADER_CACHE_DIR", app_name.to_ascii_uppercase());
        match std::env::var_os(&var) {
            Some(dir) if !dir.is_empty() => {
                log::info!("Shader disk cache enabled at '{}' ({var})", Path::new(&dir).display());
                Some(Self::new(dir))
            }
            _ => None,
        }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The hex key of one compile.
    pub fn key(
        source: &str,
        stage: ShaderStage,
        backend: CompilerBackendKind,
        options: &ShaderCompileOptions,
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source.as_bytes());
        hasher.update(
            format!(
                "\0{backend:?}|{stage:?}|{:?}|{}|{}",
                options.optimization, options.debug_info, options.entry_point
            )
            .as_bytes(),
        );
        hasher.finalize().to_hex().to_string()
    }

    fn path(&self, key: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{key}.{extension}"))
    }

    fn load(&self, key: &str) -> Option<ShaderBytecode> {
        if let Ok(bytes) = fs::read(self.path(key, "spv")) {
            if bytes.len() % 4 == 0 {
                let words = bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                return Some(ShaderBytecode::Spirv(words));
            }
            log::warn!("Ignoring truncated SPIR-V cache entry {key}");
        }
        fs::read(self.path(key, "dxbc")).ok().map(ShaderBytecode::Dxbc)
    }

    fn store(&self, key: &str, bytecode: &ShaderBytecode) {
        let (extension, bytes) = match bytecode {
            ShaderBytecode::Spirv(words) => ("spv", words.iter().flat_map(|w| w.to_le_bytes()).collect()),
            ShaderBytecode::Dxbc(bytes) => ("dxbc", bytes.clone()),
            ShaderBytecode::Dxil(_) => return,
        };
        let path = self.path(key, extension);
        let tmp = self.path(key, "tmp");
        let result = fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(&tmp, bytes))
            .and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = result {
            log::warn!("Failed to write shader cache entry '{}': {e}", path.display());
        }
    }
}

/// Loads, compiles and caches shader modules by id.
///
/// Between two calls to [`ShaderManager::invalidate_cache`] every id maps
/// to the same `Arc<ShaderModule>`, so repeated requests return byte-equal
/// bytecode. Changing a temp define drops the in-memory caches.
pub struct ShaderManager {
    index: ShaderFileIndex,
    preprocessor: Preprocessor,
    backend: Box<dyn ShaderCompilerBackend>,
    options: ShaderCompileOptions,
    temp_defines: BTreeMap<String, String>,
    modules: HashMap<String, Arc<ShaderModule>>,
    ignored: HashMap<String, String>,
    disk_cache: Option<DiskCache>,
    failure_handler: Box<dyn CompileFailureHandler>,
}

impl std::fmt::Debug for ShaderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderManager")
            .field("root", &self.index.root())
            .field("backend", &self.backend.kind())
            .field("modules", &self.modules.len())
            .field("disk_cache", &self.disk_cache)
            .finish_non_exhaustive()
    }
}

impl ShaderManager {
    /// Creates a manager with the backend named in `options`.
    ///
    /// ## Errors
    /// * `ShaderError::NotSupported` - If the backend is unavailable or does not
    ///   accept the index's language.
    pub fn new(index: ShaderFileIndex, options: ShaderCompileOptions) -> Result<Self, ShaderError> {
        let backend = create_backend(options.backend)?;
        Self::with_backend(index, options, backend)
    }

    /// Creates a manager around an explicit backend.
    ///
    /// ## Errors
    /// * `ShaderError::NotSupported` - If `backend` does not accept the index's language.
    pub fn with_backend(
        index: ShaderFileIndex,
        options: ShaderCompileOptions,
        backend: Box<dyn ShaderCompilerBackend>,
    ) -> Result<Self, ShaderError> {
        if backend.language() != index.language() {
            return Err(ShaderError::NotSupported(format!(
                "the {:?} backend compiles {:?}, but the shader tree at '{}' is {:?}",
                backend.kind(),
                backend.language(),
                index.root().display(),
                index.language()
            )));
        }
        log::info!(
            "Shader manager: {} files under '{}', {:?} backend",
            index.len(),
            index.root().display(),
            backend.kind()
        );
        Ok(Self {
            preprocessor: Preprocessor::new(options.cpp_style_line_directives),
            index,
            backend,
            options,
            temp_defines: BTreeMap::new(),
            modules: HashMap::new(),
            ignored: HashMap::new(),
            disk_cache: None,
            failure_handler: Box::new(AbortOnFailure),
        })
    }

    /// Enables (or disables, with `None`) the on-disk bytecode cache.
    pub fn with_disk_cache(mut self, cache: Option<DiskCache>) -> Self {
        self.disk_cache = cache;
        self
    }

    /// Replaces the compile-failure policy.
    pub fn with_failure_handler(mut self, handler: Box<dyn CompileFailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    /// The file index in use.
    pub fn index(&self) -> &ShaderFileIndex {
        &self.index
    }

    /// The compile options in use.
    pub fn options(&self) -> &ShaderCompileOptions {
        &self.options
    }

    /// The current temp defines.
    pub fn temp_defines(&self) -> &BTreeMap<String, String> {
        &self.temp_defines
    }

    /// Returns the compiled module for `id` (e.g. `Blit.Fragment`).
    ///
    /// ## Errors
    /// * `ShaderError::UnknownStage` - If no stage can be inferred from `id`.
    /// * `ShaderError::UnknownShader` - If no file in the tree produces `id`.
    /// * `ShaderError::Preprocess` / `ShaderError::Compilation` - After the
    ///   failure handler chose `Abort` or `Ignore`.
    pub fn get_shader(&mut self, id: &str) -> Result<Arc<ShaderModule>, ShaderError> {
        if let Some(module) = self.modules.get(id) {
            return Ok(Arc::clone(module));
        }
        if let Some(details) = self.ignored.get(id) {
            return Err(ShaderError::Compilation {
                id: id.to_string(),
                details: details.clone(),
            });
        }
        let stage = ShaderStage::infer_from_id(id);
        if stage == ShaderStage::Unknown {
            return Err(ShaderError::UnknownStage { id: id.to_string() });
        }

        loop {
            let err = match self.build(id, stage) {
                Ok(module) => {
                    let module = Arc::new(module);
                    self.modules.insert(id.to_string(), Arc::clone(&module));
                    return Ok(module);
                }
                Err(err @ (ShaderError::Compilation { .. } | ShaderError::Preprocess { .. })) => err,
                Err(err) => return Err(err),
            };
            match self.failure_handler.on_failure(id, &err) {
                FailureAction::Abort => return Err(err),
                FailureAction::Ignore => {
                    log::warn!("Ignoring failure of '{id}' until the cache is invalidated");
                    let details = match &err {
                        ShaderError::Compilation { details, .. } => details.clone(),
                        other => other.to_string(),
                    };
                    self.ignored.insert(id.to_string(), details);
                    return Err(err);
                }
                FailureAction::Retry => {
                    log::info!("Retrying '{id}' with sources re-read from disk");
                    self.reload_sources()?;
                }
            }
        }
    }

    /// Loads every id and merges them into one pipeline description.
    ///
    /// ## Errors
    /// Anything [`ShaderManager::get_shader`] returns, plus
    /// `ShaderError::Merge` / `ShaderError::Link` from the merge.
    pub fn get_shader_stages(&mut self, ids: &[&str]) -> Result<ShaderStages, ShaderError> {
        let modules = ids
            .iter()
            .map(|id| self.get_shader(id))
            .collect::<Result<Vec<_>, _>>()?;
        ShaderStages::new(modules)
    }

    /// Drops every cached module, re-walks the shader tree and forgets
    /// ignored failures. The disk cache is left alone: its keys already
    /// cover the source text.
    ///
    /// ## Errors
    /// * `ShaderError::DuplicateFile` / `ShaderError::Io` - If the tree can no
    ///   longer be indexed. The previous index is kept in that case.
    pub fn invalidate_cache(&mut self) -> Result<(), ShaderError> {
        self.reload_sources()?;
        self.modules.clear();
        self.ignored.clear();
        log::debug!("Shader caches invalidated");
        Ok(())
    }

    /// Sets a temp define. Temp defines are injected into every unit as
    /// `#define NAME VALUE` and feed `#codefrag NAME`.
    pub fn set_temp_define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        if self.temp_defines.get(&name) != Some(&value) {
            self.temp_defines.insert(name, value);
            self.drop_memory_caches();
        }
    }

    /// Removes one temp define.
    pub fn remove_temp_define(&mut self, name: &str) {
        if self.temp_defines.remove(name).is_some() {
            self.drop_memory_caches();
        }
    }

    /// Removes every temp define.
    pub fn clear_temp_defines(&mut self) {
        if !self.temp_defines.is_empty() {
            self.temp_defines.clear();
            self.drop_memory_caches();
        }
    }

    fn drop_memory_caches(&mut self) {
        self.preprocessor.invalidate();
        self.modules.clear();
        self.ignored.clear();
    }

    fn reload_sources(&mut self) -> Result<(), ShaderError> {
        self.index = ShaderFileIndex::build(self.index.root().to_path_buf(), self.index.language())?;
        self.preprocessor.invalidate();
        Ok(())
    }

    fn build(&mut self, id: &str, stage: ShaderStage) -> Result<ShaderModule, ShaderError> {
        let unit = self.preprocessor.preprocess(&self.index, id, &self.temp_defines)?;
        let entry_point = self.options.entry_point.clone();

        let key = self
            .disk_cache
            .as_ref()
            .map(|_| DiskCache::key(&unit.source, stage, self.backend.kind(), &self.options));
        if let (Some(cache), Some(key)) = (&self.disk_cache, &key) {
            if let Some(bytecode) = cache.load(key) {
                match reflect_bytecode(id, stage, &bytecode) {
                    Ok(reflection) => {
                        log::debug!("Shader disk cache hit for '{id}'");
                        return Ok(assemble(id, stage, entry_point, bytecode, reflection));
                    }
                    Err(e) => log::warn!("Discarding unreadable cache entry for '{id}': {e}"),
                }
            } else {
                log::debug!("Shader disk cache miss for '{id}'");
            }
        }

        let compiled = self.backend.compile(&CompileRequest {
            id,
            stage,
            source: &unit.source,
            entry_point: &entry_point,
            options: &self.options,
            index: Some(&self.index),
        })?;
        if let (Some(cache), Some(key)) = (&self.disk_cache, &key) {
            cache.store(key, &compiled.bytecode);
        }
        Ok(assemble(id, stage, entry_point, compiled.bytecode, compiled.reflection))
    }
}

fn assemble(
    id: &str,
    stage: ShaderStage,
    entry_point: String,
    bytecode: ShaderBytecode,
    reflection: crate::reflect::ReflectionData,
) -> ShaderModule {
    ShaderModule {
        id: id.to_string(),
        stage,
        entry_point,
        bytecode,
        thread_group_size: reflection.thread_group_size.unwrap_or([1, 1, 1]),
        bindings: reflection.bindings,
        variables: reflection.variables,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_keys_cover_source_and_settings() {
        let options = ShaderCompileOptions::default();
        let base = DiskCache::key("void main() {}", ShaderStage::Vertex, CompilerBackendKind::Naga, &options);
        assert_eq!(base.len(), 64);
        assert_eq!(
            base,
            DiskCache::key("void main() {}", ShaderStage::Vertex, CompilerBackendKind::Naga, &options)
        );
        assert_ne!(
            base,
            DiskCache::key("void main() { }", ShaderStage::Vertex, CompilerBackendKind::Naga, &options)
        );
        assert_ne!(
            base,
            DiskCache::key("void main() {}", ShaderStage::Vertex, CompilerBackendKind::Shaderc, &options)
        );
        let debug = ShaderCompileOptions {
            debug_info: true,
            ..ShaderCompileOptions::default()
        };
        assert_ne!(
            base,
            DiskCache::key("void main() {}", ShaderStage::Vertex, CompilerBackendKind::Naga, &debug)
        );
    }

    #[test]
    fn disk_cache_round_trips_spirv_and_skips_dxil() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().join("cache"));

        cache.store("a", &ShaderBytecode::Spirv(vec![0x0723_0203, 7]));
        cache.store("b", &ShaderBytecode::Dxil(vec![1, 2, 3]));

        assert_eq!(cache.load("a"), Some(ShaderBytecode::Spirv(vec![0x0723_0203, 7])));
        assert_eq!(cache.load("b"), None);
        assert!(!cache.dir().join("a.tmp").exists());
    }

    #[test]
    fn missing_env_var_disables_the_disk_cache() {
        assert!(DiskCache::from_env("tandem_test_unset_app").is_none());
    }
}
