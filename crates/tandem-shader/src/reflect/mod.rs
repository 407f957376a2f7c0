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

//! Reads binding and uniform-buffer metadata back out of compiled bytecode.
//!
//! The reflection tables produced here are the only input pipeline layouts
//! are built from; there is no hand-written manifest.

pub mod dxbc;
pub mod spirv;

use std::collections::BTreeMap;
use tandem_core::shader::{BindingInfo, ShaderBytecode, ShaderStage, VariableInfo};
use tandem_core::ShaderError;

/// Reflection tables for one compiled stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectionData {
    /// Bindings keyed by source name.
    pub bindings: BTreeMap<String, BindingInfo>,
    /// Uniform-buffer members keyed by source name.
    pub variables: BTreeMap<String, VariableInfo>,
    /// Declared thread-group size, for stages that have one.
    pub thread_group_size: Option<[u32; 3]>,
}

impl ReflectionData {
    /// Records a variable, keeping the first declaration on a name clash
    /// inside one module.
    pub(crate) fn add_variable(&mut self, name: String, info: VariableInfo) {
        if let Some(existing) = self.variables.get(&name) {
            if *existing != info {
                log::debug!("Variable '{name}' is declared twice in one module; keeping the first");
            }
            return;
        }
        self.variables.insert(name, info);
    }
}

/// Reflects any bytecode whose format carries its own reflection data.
///
/// ## Errors
/// * `ShaderError::Reflection` - If the bytecode is malformed.
/// * `ShaderError::NotSupported` - For DXIL, whose reflection needs a second
///   compile to SPIR-V.
pub fn reflect_bytecode(
    id: &str,
    stage: ShaderStage,
    bytecode: &ShaderBytecode,
) -> Result<ReflectionData, ShaderError> {
    let reflection_error = |details: String| ShaderError::Reflection {
        id: id.to_string(),
        details,
    };
    match bytecode {
        ShaderBytecode::Spirv(words) => {
            spirv::reflect_spirv(words, stage).map_err(|e| reflection_error(e.to_string()))
        }
        ShaderBytecode::Dxbc(bytes) => {
            dxbc::reflect_dxbc(bytes, stage).map_err(|e| reflection_error(e.to_string()))
        }
        ShaderBytecode::Dxil(_) => Err(ShaderError::NotSupported(format!(
            "'{id}': DXIL is reflected through a SPIR-V compile of the same source"
        ))),
    }
}
