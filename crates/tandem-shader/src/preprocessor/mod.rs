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

//! Source-level preprocessing of shader files.
//!
//! A file is walked once. Lines before the first `-- Tag` separator form the
//! file preamble; each separator starts a new translation unit cached under
//! `<FileStem>.<Tag>`. Files without separators become one unit cached under
//! `<FileStem>`. Every unit body starts with a `#line 1` directive, the stage
//! defines and (for graphics stages) the MVP block.

mod directive;
mod emitter;

use crate::index::{read_source, ShaderFileIndex, ShaderLanguage};
use directive::{classify, IncludeTarget, Line};
use emitter::LineEmitter;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tandem_core::shader::ShaderStage;
use tandem_core::ShaderError;

const GLSL_MVP_BLOCK: &str = "\
#ifndef DISABLE_MVP_BLOCK
layout(set = 1, binding = 0) uniform MatrixBlock
{
    mat4 mMatrix;
    mat4 vMatrix;
    mat4 pMatrix;
    mat4 mvpMatrix;
};
#endif";

// FXC targets have no register spaces; its backend overrides MVP_REGISTER.
const HLSL_MVP_BLOCK: &str = "\
#ifndef DISABLE_MVP_BLOCK
#ifndef MVP_REGISTER
#define MVP_REGISTER register(b0, space1)
#endif
cbuffer MatrixBlock : MVP_REGISTER
{
    float4x4 mMatrix;
    float4x4 vMatrix;
    float4x4 pMatrix;
    float4x4 mvpMatrix;
};
#endif";

const DEFAULT_GLSL_VERSION: &str = "#version 450";
const CPP_LINE_EXTENSION: &str = "#extension GL_GOOGLE_cpp_style_line_directive : enable";

/// A fully preprocessed translation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessedShader {
    /// The logical id, e.g. `Blit.Fragment`.
    pub id: String,
    /// The stage inferred from the id.
    pub stage: ShaderStage,
    /// `#version` / `#extension` lines that must stay on top.
    pub prepend: String,
    /// The expanded body, starting with `#line 1`.
    pub body: String,
    /// `prepend + global defines + body`, the text handed to the compiler.
    pub source: String,
}

/// The raw text of a unit, kept for later `#import`s.
#[derive(Debug, Clone)]
struct ModuleSource {
    file: String,
    first_line: usize,
    lines: Vec<String>,
}

/// Expands shader files into compile-ready units and caches them.
#[derive(Debug)]
pub struct Preprocessor {
    cpp_style: bool,
    units: HashMap<String, PreprocessedShader>,
    modules: HashMap<String, ModuleSource>,
}

impl Preprocessor {
    /// Creates an empty preprocessor. With `cpp_style_line_directives`,
    /// `#line` directives carry the file name.
    pub fn new(cpp_style_line_directives: bool) -> Self {
        Self {
            cpp_style: cpp_style_line_directives,
            units: HashMap::new(),
            modules: HashMap::new(),
        }
    }

    /// Returns the unit `id`, processing its file on first request.
    ///
    /// ## Errors
    /// * `ShaderError::UnknownShader` - If no indexed file produces `id`.
    /// * `ShaderError::Preprocess` - On a malformed or unresolvable directive.
    /// * `ShaderError::Io` - If a source file cannot be read.
    pub fn preprocess(
        &mut self,
        index: &ShaderFileIndex,
        id: &str,
        temp_defines: &BTreeMap<String, String>,
    ) -> Result<PreprocessedShader, ShaderError> {
        if let Some(unit) = self.units.get(id) {
            return Ok(unit.clone());
        }

        let stem = id.split('.').next().unwrap_or(id);
        let path = index
            .file_for_stem(stem)
            .ok_or_else(|| ShaderError::UnknownShader { id: id.to_string() })?;
        self.process_file(index, stem, path, temp_defines)?;

        self.units
            .get(id)
            .cloned()
            .ok_or_else(|| ShaderError::UnknownShader { id: id.to_string() })
    }

    /// Whether `name` (`Module.Stage` or a bare stem) is available to `#import`.
    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Drops every cached unit and module.
    pub fn invalidate(&mut self) {
        self.units.clear();
        self.modules.clear();
    }

    fn process_file(
        &mut self,
        index: &ShaderFileIndex,
        stem: &str,
        path: &Path,
        temp_defines: &BTreeMap<String, String>,
    ) -> Result<(), ShaderError> {
        let text = read_source(path)?;
        let file = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(stem)
            .to_string();

        // --- 1. Split the file into preamble and stage sections ---
        let mut preamble: Vec<String> = Vec::new();
        let mut sections: Vec<(String, usize, Vec<String>)> = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            if raw.starts_with("-- ") {
                match classify(raw) {
                    Ok(Line::Separator(tag)) => {
                        sections.push((tag.to_string(), line_no + 1, Vec::new()));
                        continue;
                    }
                    Err(reason) => return Err(preprocess_error(&file, line_no, raw, reason)),
                    Ok(_) => {}
                }
            }
            match sections.last_mut() {
                Some((_, _, lines)) => lines.push(raw.to_string()),
                None => preamble.push(raw.to_string()),
            }
        }

        // --- 2. Expand each unit in file order ---
        if sections.is_empty() {
            let unit = self.expand_unit(index, stem, stem, &file, &[], 1, &preamble, temp_defines)?;
            self.register(stem, &file, 1, preamble, unit);
            return Ok(());
        }

        let preamble = if preamble.iter().all(|l| l.trim().is_empty()) {
            Vec::new()
        } else {
            preamble
        };
        for (tag, first_line, lines) in sections {
            let id = format!("{stem}.{tag}");
            let unit = self.expand_unit(
                index,
                &id,
                stem,
                &file,
                &preamble,
                first_line,
                &lines,
                temp_defines,
            )?;
            self.register(&id, &file, first_line, lines, unit);
        }
        log::debug!("Preprocessed {file}");
        Ok(())
    }

    fn register(
        &mut self,
        id: &str,
        file: &str,
        first_line: usize,
        lines: Vec<String>,
        unit: PreprocessedShader,
    ) {
        self.modules.insert(
            id.to_string(),
            ModuleSource {
                file: file.to_string(),
                first_line,
                lines,
            },
        );
        self.units.insert(id.to_string(), unit);
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_unit(
        &self,
        index: &ShaderFileIndex,
        id: &str,
        stem: &str,
        file: &str,
        preamble: &[String],
        first_line: usize,
        lines: &[String],
        temp_defines: &BTreeMap<String, String>,
    ) -> Result<PreprocessedShader, ShaderError> {
        let stage = ShaderStage::infer_from_id(id);
        let mut unit = UnitExpander::new(index, &self.modules, stem, self.cpp_style, temp_defines);
        unit.include_stack.push(file.to_string());

        unit.emitter.mark(1, file);
        unit.inject_defines(stage);
        if !preamble.is_empty() {
            unit.expand_lines(file, 1, preamble)?;
        }
        unit.expand_lines(file, first_line, lines)?;

        let prepend = unit.prepend_block();
        let body = unit.emitter.finish();
        let source = format!("{prepend}{}{body}", index.global_defines());
        Ok(PreprocessedShader {
            id: id.to_string(),
            stage,
            prepend,
            body,
            source,
        })
    }
}

fn preprocess_error(file: &str, line: usize, text: &str, reason: impl Into<String>) -> ShaderError {
    ShaderError::Preprocess {
        file: file.to_string(),
        line,
        text: text.to_string(),
        reason: reason.into(),
    }
}

/// Per-unit expansion state.
struct UnitExpander<'a> {
    index: &'a ShaderFileIndex,
    modules: &'a HashMap<String, ModuleSource>,
    stem: &'a str,
    emitter: LineEmitter,
    hoisted: Vec<String>,
    temp_defines: BTreeMap<String, String>,
    quoted_defines: HashMap<String, String>,
    include_stack: Vec<String>,
    // One entry per open conditional: whether it contains a splice.
    conditionals: Vec<bool>,
    import_depth: usize,
}

impl<'a> UnitExpander<'a> {
    fn new(
        index: &'a ShaderFileIndex,
        modules: &'a HashMap<String, ModuleSource>,
        stem: &'a str,
        cpp_style: bool,
        temp_defines: &BTreeMap<String, String>,
    ) -> Self {
        let mut quoted_defines = HashMap::new();
        for line in index.global_defines().lines() {
            if let Ok(Line::Define { name, value }) = classify(line) {
                quoted_defines.insert(name.to_string(), value.to_string());
            }
        }
        Self {
            index,
            modules,
            stem,
            emitter: LineEmitter::new(cpp_style),
            hoisted: Vec::new(),
            temp_defines: temp_defines.clone(),
            quoted_defines,
            include_stack: Vec::new(),
            conditionals: Vec::new(),
            import_depth: 0,
        }
    }

    fn inject_defines(&mut self, stage: ShaderStage) {
        if stage != ShaderStage::Unknown {
            self.emitter.line(&format!("#define {}", stage.define_name()));
        }
        for (name, value) in &self.temp_defines {
            // Multi-line values are code fragments, spliced by #codefrag only.
            if value.contains('\n') {
                continue;
            }
            if value.is_empty() {
                self.emitter.line(&format!("#define {name}"));
            } else {
                self.emitter.line(&format!("#define {name} {value}"));
            }
        }
        if stage.uses_mvp_block() {
            let block = match self.index.language() {
                ShaderLanguage::Glsl => GLSL_MVP_BLOCK,
                ShaderLanguage::Hlsl => HLSL_MVP_BLOCK,
            };
            for line in block.lines() {
                self.emitter.line(line);
            }
        }
    }

    fn note_splice(&mut self) {
        if let Some(top) = self.conditionals.last_mut() {
            *top = true;
        }
    }

    fn expand_lines<S: AsRef<str>>(
        &mut self,
        file: &str,
        first_line: usize,
        lines: &[S],
    ) -> Result<(), ShaderError> {
        self.emitter.mark(first_line, file);
        for (i, raw) in lines.iter().enumerate() {
            let raw = raw.as_ref();
            let line_no = first_line + i;
            let line = classify(raw).map_err(|reason| preprocess_error(file, line_no, raw, reason))?;
            match line {
                Line::Separator(_) => {
                    return Err(preprocess_error(
                        file,
                        line_no,
                        raw,
                        "stage separators are only allowed in the requested file",
                    ));
                }
                Line::Include(target) => {
                    let (name, path) = self.resolve_include(target).ok_or_else(|| {
                        preprocess_error(file, line_no, raw, "included file is not in the shader index")
                    })?;
                    if self.include_stack.iter().any(|n| *n == name) {
                        return Err(preprocess_error(file, line_no, raw, "recursive #include"));
                    }
                    let text = read_source(path)?;
                    let included: Vec<&str> = text.lines().collect();
                    self.note_splice();
                    self.include_stack.push(name.clone());
                    self.expand_lines(&name, 1, &included)?;
                    self.include_stack.pop();
                    self.emitter.mark(line_no + 1, file);
                }
                Line::Import(name) => {
                    if self.import_depth >= 1 {
                        return Err(preprocess_error(file, line_no, raw, "#import nesting deeper than 1"));
                    }
                    let full = match name.strip_prefix('.') {
                        Some(stage) => format!("{}.{stage}", self.stem),
                        None => name.to_string(),
                    };
                    let modules = self.modules;
                    let module = modules.get(&full).ok_or_else(|| {
                        preprocess_error(
                            file,
                            line_no,
                            raw,
                            format!("module '{full}' is imported before it is defined"),
                        )
                    })?;
                    self.note_splice();
                    self.import_depth += 1;
                    self.expand_lines(&module.file, module.first_line, &module.lines)?;
                    self.import_depth -= 1;
                    self.emitter.mark(line_no + 1, file);
                }
                Line::CodeFrag(name) => {
                    let fragment = self.temp_defines.remove(name).ok_or_else(|| {
                        preprocess_error(
                            file,
                            line_no,
                            raw,
                            format!("code fragment '{name}' is undefined or already used"),
                        )
                    })?;
                    self.note_splice();
                    for frag_line in fragment.lines() {
                        self.emitter.line(frag_line);
                    }
                    self.emitter.mark(line_no + 1, file);
                }
                Line::Hoisted => {
                    let directive = raw.trim().to_string();
                    if !self.hoisted.contains(&directive) {
                        self.hoisted.push(directive);
                    }
                    self.emitter.mark(line_no + 1, file);
                }
                Line::IfOpen => {
                    self.conditionals.push(false);
                    self.emitter.line(raw);
                }
                Line::EndIf => {
                    let spliced = self.conditionals.pop().ok_or_else(|| {
                        preprocess_error(file, line_no, raw, "#endif without a matching #if")
                    })?;
                    self.emitter.line(raw);
                    if spliced {
                        self.note_splice();
                        self.emitter.resync(line_no + 1, file);
                    }
                }
                Line::Define { name, value } => {
                    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                        self.quoted_defines.insert(name.to_string(), value.to_string());
                    }
                    self.emitter.line(raw);
                }
                Line::Text => self.emitter.line(raw),
            }
        }
        Ok(())
    }

    /// Resolves an include by file name, then through a define whose value
    /// is a quoted file name.
    fn resolve_include(&self, target: IncludeTarget<'_>) -> Option<(String, &'a Path)> {
        let index = self.index;
        let name = target.name();
        if let Some(path) = index.resolve(name) {
            return Some((name.to_string(), path));
        }
        let IncludeTarget::Quoted(token) = target else {
            return None;
        };
        let value = self
            .temp_defines
            .get(token)
            .or_else(|| self.quoted_defines.get(token))?;
        let indirect = value.trim().trim_matches('"');
        index.resolve(indirect).map(|p| (indirect.to_string(), p))
    }

    fn prepend_block(&self) -> String {
        let mut versions = self.hoisted.iter().filter(|l| l.starts_with("#version"));
        let mut lines: Vec<&str> = Vec::new();
        match versions.next() {
            Some(first) => {
                if let Some(other) = versions.find(|v| *v != first) {
                    log::warn!("Conflicting {other} ignored, keeping {first}");
                }
                lines.push(first);
            }
            None if self.index.language() == ShaderLanguage::Glsl => lines.push(DEFAULT_GLSL_VERSION),
            None => {}
        }
        lines.extend(
            self.hoisted
                .iter()
                .filter(|l| !l.starts_with("#version"))
                .map(String::as_str),
        );
        if self.emitter.is_cpp_style()
            && self.index.language() == ShaderLanguage::Glsl
            && !lines.contains(&CPP_LINE_EXTENSION)
        {
            lines.push(CPP_LINE_EXTENSION);
        }

        let mut block = lines.join("\n");
        if !block.is_empty() {
            block.push('\n');
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree(files: &[(&str, &str)]) -> (tempfile::TempDir, ShaderFileIndex) {
        let dir = tempfile::tempdir().unwrap();
        for (name, text) in files {
            fs::write(dir.path().join(name), text).unwrap();
        }
        let index = ShaderFileIndex::build(dir.path(), ShaderLanguage::Glsl).unwrap();
        (dir, index)
    }

    fn run(index: &ShaderFileIndex, id: &str) -> Result<PreprocessedShader, ShaderError> {
        Preprocessor::new(false).preprocess(index, id, &BTreeMap::new())
    }

    #[test]
    fn splits_stages_and_injects_stage_defines() {
        let (_dir, index) = tree(&[(
            "Quad.glsl",
            "-- Vertex\nvoid main() {}\n-- Compute\nlayout(local_size_x = 8) in;\nvoid main() {}\n",
        )]);
        let mut pp = Preprocessor::new(false);

        let compute = pp.preprocess(&index, "Quad.Compute", &BTreeMap::new()).unwrap();
        let vertex = pp.preprocess(&index, "Quad.Vertex", &BTreeMap::new()).unwrap();

        assert_eq!(compute.stage, ShaderStage::Compute);
        assert_eq!(
            compute.body,
            "#line 1\n#define COMPUTE_SHADER\n#line 4\nlayout(local_size_x = 8) in;\nvoid main() {}\n"
        );
        assert!(vertex.body.contains("#define VERTEX_SHADER\n#ifndef DISABLE_MVP_BLOCK\n"));
        assert!(vertex.body.ends_with("#line 2\nvoid main() {}\n"));
        assert_eq!(vertex.prepend, "#version 450\n");
        assert!(pp.has_module("Quad.Vertex"));
    }

    #[test]
    fn hoists_version_and_extensions_from_includes() {
        let (_dir, index) = tree(&[
            ("Lib.glsl", "#extension GL_EXT_scalar_block_layout : require\nfloat f() { return 1.0; }\n"),
            (
                "Main.glsl",
                "#version 460\n-- Compute\n#include <Lib.glsl>\n#extension GL_EXT_scalar_block_layout : require\nvoid main() {}\n",
            ),
        ]);

        let unit = run(&index, "Main.Compute").unwrap();

        assert_eq!(
            unit.prepend,
            "#version 460\n#extension GL_EXT_scalar_block_layout : require\n"
        );
        assert!(!unit.body.contains("#extension"));
        assert!(!unit.body.contains("#version"));
        assert!(unit.body.contains("#line 2\nfloat f() { return 1.0; }\n#line 5\nvoid main() {}\n"));
    }

    #[test]
    fn preamble_is_repeated_in_every_stage() {
        let (_dir, index) = tree(&[(
            "Pair.glsl",
            "const float K = 2.0;\n-- Vertex\nvoid main() {}\n-- Fragment\nvoid main() {}\n",
        )]);
        let mut pp = Preprocessor::new(false);

        for id in ["Pair.Vertex", "Pair.Fragment"] {
            let unit = pp.preprocess(&index, id, &BTreeMap::new()).unwrap();
            assert!(unit.body.contains("#line 1\nconst float K = 2.0;\n"), "{id}");
        }
    }

    #[test]
    fn include_through_a_define_token() {
        let (_dir, index) = tree(&[
            ("Sun.glsl", "vec3 light() { return vec3(1.0); }\n"),
            ("Sky.glsl", "-- Fragment\n#include \"LIGHT_FILE\"\nvoid main() {}\n"),
        ]);
        let mut defines = BTreeMap::new();
        defines.insert("LIGHT_FILE".to_string(), "\"Sun.glsl\"".to_string());

        let unit = Preprocessor::new(false)
            .preprocess(&index, "Sky.Fragment", &defines)
            .unwrap();

        assert!(unit.body.contains("#define LIGHT_FILE \"Sun.glsl\"\n"));
        assert!(unit.body.contains("vec3 light()"));
    }

    #[test]
    fn import_requires_an_earlier_module() {
        let (_dir, index) = tree(&[(
            "Blur.glsl",
            "-- Common\nfloat w() { return 0.5; }\n-- Fragment\n#import .Common\nvoid main() {}\n-- Late\n#import .Missing\n",
        )]);
        let mut pp = Preprocessor::new(false);

        let err = pp.preprocess(&index, "Blur.Fragment", &BTreeMap::new()).unwrap_err();

        match err {
            ShaderError::Preprocess { file, line, text, .. } => {
                assert_eq!(file, "Blur.glsl");
                assert_eq!(line, 7);
                assert_eq!(text, "#import .Missing");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn import_splices_the_module_text() {
        let (_dir, index) = tree(&[(
            "Blur.glsl",
            "-- Common\nfloat w() { return 0.5; }\n-- Fragment\n#import .Common\nvoid main() {}\n",
        )]);

        let unit = run(&index, "Blur.Fragment").unwrap();

        assert!(unit.body.contains("#line 2\nfloat w() { return 0.5; }\n#line 5\nvoid main() {}\n"));
    }

    #[test]
    fn nested_import_is_rejected() {
        let (_dir, index) = tree(&[(
            "Chain.glsl",
            "-- A\nfloat a;\n-- B\n#import .A\n-- C\n#import .B\n",
        )]);

        let err = run(&index, "Chain.C").unwrap_err();

        assert!(matches!(err, ShaderError::Preprocess { ref reason, .. } if reason.contains("deeper")));
    }

    #[test]
    fn codefrag_is_single_use() {
        let (_dir, index) = tree(&[(
            "Frag.glsl",
            "-- Compute\n#codefrag BODY\n#codefrag BODY\n",
        )]);
        let mut defines = BTreeMap::new();
        defines.insert("BODY".to_string(), "int a;\nint b;".to_string());

        let err = Preprocessor::new(false)
            .preprocess(&index, "Frag.Compute", &defines)
            .unwrap_err();

        assert!(matches!(err, ShaderError::Preprocess { line: 3, .. }));
    }

    #[test]
    fn codefrag_values_are_not_emitted_as_defines() {
        let (_dir, index) = tree(&[("Frag.glsl", "-- Compute\n#codefrag BODY\nvoid main() {}\n")]);
        let mut defines = BTreeMap::new();
        defines.insert("BODY".to_string(), "int a;\nint b;".to_string());

        let unit = Preprocessor::new(false)
            .preprocess(&index, "Frag.Compute", &defines)
            .unwrap();

        assert!(!unit.body.contains("#define BODY"));
        assert!(unit.body.contains("int a;\nint b;\n#line 3\nvoid main() {}\n"));
    }

    #[test]
    fn endif_after_splice_resyncs_lines() {
        let (_dir, index) = tree(&[
            ("Opt.glsl", "float opt() { return 0.0; }\n"),
            (
                "Cond.glsl",
                "-- Compute\n#ifdef USE_OPT\n#include \"Opt.glsl\"\n#endif\nvoid main() {}\n",
            ),
        ]);

        let unit = run(&index, "Cond.Compute").unwrap();

        assert!(unit.body.ends_with("#line 4\n#endif\n#line 5\nvoid main() {}\n"));
    }

    #[test]
    fn failure_modes_are_reported_with_location() {
        let (_dir, index) = tree(&[
            ("Bad.glsl", "-- Vertex\n#include \"Nope.glsl\"\n"),
            ("Sep.glsl", "-- \n"),
            ("Loop.glsl", "#include \"Loop.glsl\"\n"),
            ("Good.glsl", "-- Vertex\nvoid main() {}\n"),
        ]);

        assert!(matches!(run(&index, "Bad.Vertex"), Err(ShaderError::Preprocess { line: 2, .. })));
        assert!(matches!(run(&index, "Sep.Vertex"), Err(ShaderError::Preprocess { line: 1, .. })));
        assert!(matches!(run(&index, "Loop"), Err(ShaderError::Preprocess { .. })));
        assert!(matches!(run(&index, "Good.Fragment"), Err(ShaderError::UnknownShader { .. })));
        assert!(matches!(run(&index, "Missing.Vertex"), Err(ShaderError::UnknownShader { .. })));
    }

    #[test]
    fn cpp_style_marks_carry_file_names() {
        let (_dir, index) = tree(&[
            ("B.glsl", "float b;\n"),
            ("A.glsl", "-- Compute\n#include \"B.glsl\"\n"),
        ]);

        let unit = Preprocessor::new(true)
            .preprocess(&index, "A.Compute", &BTreeMap::new())
            .unwrap();

        assert!(unit.prepend.contains(CPP_LINE_EXTENSION));
        assert!(unit.body.starts_with("#line 1 \"A.glsl\"\n"));
        assert!(unit.body.ends_with("#line 1 \"B.glsl\"\nfloat b;\n#line 3 \"A.glsl\"\n"));
    }
}
