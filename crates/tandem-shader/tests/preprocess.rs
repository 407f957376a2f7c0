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

use std::collections::BTreeMap;
use std::fs;
use tandem_shader::{Preprocessor, ShaderFileIndex, ShaderLanguage};

fn write_tree(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, text) in files {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }
    dir
}

#[test]
fn include_graph_keeps_line_numbers() {
    // --- Arrange ---
    let dir = write_tree(&[
        ("A.glsl", "-- Fragment\n#include \"B.glsl\"\n"),
        ("lib/B.glsl", "vec3 foo(){return vec3(0);}\n"),
    ]);
    let index = ShaderFileIndex::build(dir.path(), ShaderLanguage::Glsl).unwrap();

    // --- Act ---
    let unit = Preprocessor::new(false)
        .preprocess(&index, "A.Fragment", &BTreeMap::new())
        .unwrap();

    // --- Assert ---
    assert!(unit.body.starts_with("#line 1\n#define FRAGMENT_SHADER\n"), "{}", unit.body);
    assert!(
        unit.body.ends_with("#line 1\nvec3 foo(){return vec3(0);}\n#line 3\n"),
        "{}",
        unit.body
    );
}

#[test]
fn plain_files_round_trip_with_a_single_line_mark() {
    // --- Arrange ---
    let text = "float gain(float x)\n{\n    return x * 2.0;\n}\n\nconst int COUNT = 4;\n";
    let defines = "#define QUALITY 2\n";
    let dir = write_tree(&[("Common.glsl", text), ("GlobalDefines.glsl", defines)]);
    let index = ShaderFileIndex::build(dir.path(), ShaderLanguage::Glsl).unwrap();

    // --- Act ---
    let unit = Preprocessor::new(false)
        .preprocess(&index, "Common", &BTreeMap::new())
        .unwrap();

    // --- Assert ---
    assert_eq!(unit.body, format!("#line 1\n{text}"));
    assert_eq!(unit.source, format!("{}{defines}{}", unit.prepend, unit.body));
}

#[test]
fn separator_without_code_yields_an_empty_stage() {
    // --- Arrange ---
    let dir = write_tree(&[("Empty.glsl", "-- Compute\n")]);
    let index = ShaderFileIndex::build(dir.path(), ShaderLanguage::Glsl).unwrap();

    // --- Act ---
    let unit = Preprocessor::new(false)
        .preprocess(&index, "Empty.Compute", &BTreeMap::new())
        .unwrap();

    // --- Assert ---
    assert_eq!(unit.body, "#line 1\n#define COMPUTE_SHADER\n");
}
