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

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tandem_core::settings::{CompilerBackendKind, ShaderCompileOptions};
use tandem_core::shader::{BindingInfo, BindingKind, ShaderBytecode};
use tandem_core::{ErrorKind, ShaderError};
use tandem_shader::{
    CompileFailureHandler, CompileRequest, CompiledBytecode, DiskCache, FailureAction, ReflectionData,
    ShaderCompilerBackend, ShaderFileIndex, ShaderLanguage, ShaderManager,
};

/// Smallest DXBC container with an empty `RDEF` chunk.
fn empty_dxbc() -> Vec<u8> {
    let mut out = b"DXBC".to_vec();
    out.extend_from_slice(&[0u8; 16]);
    for word in [1u32, 72, 1, 36] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend_from_slice(b"RDEF");
    out.extend_from_slice(&28u32.to_le_bytes());
    out.extend_from_slice(&[0u8; 28]);
    out
}

/// Compiles nothing. Bytecode is the source text behind an empty DXBC
/// container, and `//@binding NAME SET BINDING` lines become bindings.
struct ScriptedBackend {
    compiles: Arc<AtomicUsize>,
}

impl ShaderCompilerBackend for ScriptedBackend {
    fn kind(&self) -> CompilerBackendKind {
        CompilerBackendKind::Naga
    }

    fn language(&self) -> ShaderLanguage {
        ShaderLanguage::Glsl
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledBytecode, ShaderError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if request.source.contains("BROKEN") {
            return Err(ShaderError::Compilation {
                id: request.id.to_string(),
                details: "ERROR: 0:7: 'BROKEN' : undeclared identifier\nERROR: 1 compilation errors.".to_string(),
            });
        }
        let mut reflection = ReflectionData::default();
        for line in request.source.lines() {
            let Some(rest) = line.strip_prefix("//@binding ") else {
                continue;
            };
            let parts: Vec<&str> = rest.split_whitespace().collect();
            reflection.bindings.insert(
                parts[0].to_string(),
                BindingInfo {
                    set: parts[1].parse().unwrap(),
                    binding: parts[2].parse().unwrap(),
                    size: None,
                    kind: BindingKind::CombinedImageSampler,
                    count: 1,
                    stages: request.stage.mask(),
                },
            );
        }
        let mut bytes = empty_dxbc();
        bytes.extend_from_slice(request.source.as_bytes());
        Ok(CompiledBytecode {
            bytecode: ShaderBytecode::Dxbc(bytes),
            reflection,
        })
    }
}

fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, ShaderManager, Arc<AtomicUsize>) {
    let dir = tempfile::tempdir().unwrap();
    for (name, text) in files {
        fs::write(dir.path().join(name), text).unwrap();
    }
    let (manager, compiles) = manager_for(dir.path().to_path_buf());
    (dir, manager, compiles)
}

fn manager_for(root: PathBuf) -> (ShaderManager, Arc<AtomicUsize>) {
    let compiles = Arc::new(AtomicUsize::new(0));
    let index = ShaderFileIndex::build(root, ShaderLanguage::Glsl).unwrap();
    let backend = Box::new(ScriptedBackend {
        compiles: Arc::clone(&compiles),
    });
    let manager = ShaderManager::with_backend(index, ShaderCompileOptions::default(), backend).unwrap();
    (manager, compiles)
}

const BLIT: &str = "-- Vertex\n//@binding inputTexture 0 0\nvoid main() {}\n-- Fragment\n//@binding inputTexture 0 1\nvoid main() {}\n";

#[test]
fn repeated_requests_return_the_same_bytecode() {
    // --- Arrange ---
    let (_dir, mut manager, compiles) = setup(&[("Quad.glsl", "-- Vertex\nvoid main() {}\n")]);

    // --- Act ---
    let first = manager.get_shader("Quad.Vertex").unwrap();
    let second = manager.get_shader("Quad.Vertex").unwrap();
    manager.invalidate_cache().unwrap();
    let third = manager.get_shader("Quad.Vertex").unwrap();

    // --- Assert ---
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.bytecode, third.bytecode);
    assert_eq!(first.thread_group_size, [1, 1, 1]);
    assert_eq!(compiles.load(Ordering::SeqCst), 2);
}

#[test]
fn changing_a_temp_define_recompiles() {
    // --- Arrange ---
    let (_dir, mut manager, compiles) = setup(&[("Quad.glsl", "-- Vertex\nvoid main() {}\n")]);
    manager.set_temp_define("SAMPLES", "4");
    let before = manager.get_shader("Quad.Vertex").unwrap();

    // --- Act ---
    manager.set_temp_define("SAMPLES", "4");
    let unchanged = manager.get_shader("Quad.Vertex").unwrap();
    manager.set_temp_define("SAMPLES", "8");
    let changed = manager.get_shader("Quad.Vertex").unwrap();
    manager.clear_temp_defines();

    // --- Assert ---
    assert!(Arc::ptr_eq(&before, &unchanged));
    assert_ne!(before.bytecode, changed.bytecode);
    assert_eq!(compiles.load(Ordering::SeqCst), 2);
    assert!(manager.temp_defines().is_empty());
}

#[test]
fn conflicting_bindings_fail_to_merge() {
    // --- Arrange ---
    let (_dir, mut manager, _) = setup(&[("Blit.glsl", BLIT)]);

    // --- Act ---
    let err = manager.get_shader_stages(&["Blit.Vertex", "Blit.Fragment"]).unwrap_err();

    // --- Assert ---
    assert_eq!(err.kind(), ErrorKind::Precondition);
    let text = err.to_string();
    assert!(text.contains("inputTexture"), "{text}");
    assert!(text.contains("is 0 in one stage and 1 in another"), "{text}");
}

#[test]
fn ids_without_a_stage_are_rejected() {
    // --- Arrange ---
    let (_dir, mut manager, compiles) = setup(&[("Blit.glsl", BLIT)]);

    // --- Act ---
    let err = manager.get_shader("Blit.Pixel").unwrap_err();

    // --- Assert ---
    assert!(matches!(err, ShaderError::UnknownStage { .. }));
    assert_eq!(compiles.load(Ordering::SeqCst), 0);
}

/// Rewrites the broken file, then asks for a retry.
struct FixOnFailure {
    path: PathBuf,
    fixed: &'static str,
    calls: AtomicUsize,
}

impl CompileFailureHandler for FixOnFailure {
    fn on_failure(&self, _id: &str, error: &ShaderError) -> FailureAction {
        assert!(error.to_string().contains("undeclared identifier"));
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::write(&self.path, self.fixed).unwrap();
        FailureAction::Retry
    }
}

#[test]
fn retry_rereads_the_file_from_disk() {
    // --- Arrange ---
    let (dir, manager, compiles) = setup(&[("Sim.glsl", "-- Compute\nBROKEN\n")]);
    let handler = Arc::new(FixOnFailure {
        path: dir.path().join("Sim.glsl"),
        fixed: "-- Compute\nvoid main() {}\n",
        calls: AtomicUsize::new(0),
    });
    struct Shared(Arc<FixOnFailure>);
    impl CompileFailureHandler for Shared {
        fn on_failure(&self, id: &str, error: &ShaderError) -> FailureAction {
            self.0.on_failure(id, error)
        }
    }
    let mut manager = manager.with_failure_handler(Box::new(Shared(Arc::clone(&handler))));

    // --- Act ---
    let module = manager.get_shader("Sim.Compute").unwrap();

    // --- Assert ---
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(compiles.load(Ordering::SeqCst), 2);
    assert!(String::from_utf8_lossy(&module.bytecode.as_bytes()).contains("void main()"));
}

struct IgnoreFailures;

impl CompileFailureHandler for IgnoreFailures {
    fn on_failure(&self, _id: &str, _error: &ShaderError) -> FailureAction {
        FailureAction::Ignore
    }
}

#[test]
fn ignored_failures_are_remembered_until_invalidation() {
    // --- Arrange ---
    let (_dir, manager, compiles) = setup(&[("Sim.glsl", "-- Compute\nBROKEN\n")]);
    let mut manager = manager.with_failure_handler(Box::new(IgnoreFailures));

    // --- Act ---
    let first = manager.get_shader("Sim.Compute").unwrap_err();
    let second = manager.get_shader("Sim.Compute").unwrap_err();
    manager.invalidate_cache().unwrap();
    let third = manager.get_shader("Sim.Compute").unwrap_err();

    // --- Assert ---
    assert_eq!(first.kind(), ErrorKind::CompileFailure);
    assert!(second.to_string().contains("'BROKEN'"));
    assert_eq!(third.kind(), ErrorKind::CompileFailure);
    assert_eq!(compiles.load(Ordering::SeqCst), 2);
}

#[test]
fn disk_cache_is_shared_between_managers() {
    // --- Arrange ---
    let cache_dir = tempfile::tempdir().unwrap();
    let (dir, manager, first_compiles) = setup(&[("Quad.glsl", "-- Fragment\nvoid main() {}\n")]);
    let mut first = manager.with_disk_cache(Some(DiskCache::new(cache_dir.path())));
    let (second, second_compiles) = manager_for(dir.path().to_path_buf());
    let mut second = second.with_disk_cache(Some(DiskCache::new(cache_dir.path())));

    // --- Act ---
    let a = first.get_shader("Quad.Fragment").unwrap();
    let b = second.get_shader("Quad.Fragment").unwrap();

    // --- Assert ---
    assert_eq!(a.bytecode, b.bytecode);
    assert_eq!(first_compiles.load(Ordering::SeqCst), 1);
    assert_eq!(second_compiles.load(Ordering::SeqCst), 0);
}

#[test]
fn backend_language_must_match_the_tree() {
    // --- Arrange ---
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Blit.hlsl"), "-- Vertex\n").unwrap();
    let index = ShaderFileIndex::build(dir.path(), ShaderLanguage::Hlsl).unwrap();
    let backend = Box::new(ScriptedBackend {
        compiles: Arc::new(AtomicUsize::new(0)),
    });

    // --- Act ---
    let err = ShaderManager::with_backend(index, ShaderCompileOptions::default(), backend).unwrap_err();

    // --- Assert ---
    assert_eq!(err.kind(), ErrorKind::NotSupported);
}
