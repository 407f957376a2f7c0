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

//! The linked set of stages for one pipeline and its merged reflection tables.

use super::layout::{DescriptorSetLayoutDesc, LayoutBinding, PipelineLayoutDesc};
use super::module::{BindingInfo, ShaderModule, VariableInfo};
use super::stage::{PipelineKind, ShaderStage};
use crate::error::{MergeConflict, MergeTable, ShaderError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// An ordered list of modules forming a pipeline's programmable stages.
///
/// Construction merges the per-module binding and variable tables by name.
/// Two entries with the same name must agree on every field except stage
/// visibility, which is unioned. A successful merge does not depend on the
/// order of the modules.
#[derive(Debug, Clone)]
pub struct ShaderStages {
    modules: Vec<Arc<ShaderModule>>,
    kind: PipelineKind,
    bindings: BTreeMap<String, BindingInfo>,
    variables: BTreeMap<String, VariableInfo>,
}

impl ShaderStages {
    /// Links `modules` into one pipeline's stage set.
    ///
    /// # Errors
    /// Fails with a precondition error when the list is empty, a stage is
    /// unknown, stages from incompatible pipeline families are mixed, a
    /// non ray-tracing stage appears twice, or the reflection tables conflict.
    pub fn new(modules: Vec<Arc<ShaderModule>>) -> Result<Self, ShaderError> {
        let kind = Self::pipeline_kind_of(&modules)?;

        let mut bindings: BTreeMap<String, BindingInfo> = BTreeMap::new();
        let mut variables: BTreeMap<String, VariableInfo> = BTreeMap::new();
        for module in &modules {
            for (name, incoming) in &module.bindings {
                match bindings.get_mut(name) {
                    Some(existing) => {
                        check_binding(name, existing, incoming)?;
                        existing.stages |= incoming.stages;
                    }
                    None => {
                        bindings.insert(name.clone(), incoming.clone());
                    }
                }
            }
            for (name, incoming) in &module.variables {
                match variables.get(name) {
                    Some(existing) => check_variable(name, existing, incoming)?,
                    None => {
                        variables.insert(name.clone(), *incoming);
                    }
                }
            }
        }

        Ok(ShaderStages {
            modules,
            kind,
            bindings,
            variables,
        })
    }

    fn pipeline_kind_of(modules: &[Arc<ShaderModule>]) -> Result<PipelineKind, ShaderError> {
        let precondition = |module: &ShaderModule, reason: String| ShaderError::Link {
            id: module.id.clone(),
            reason,
        };
        let first = modules.first().ok_or_else(|| ShaderError::Link {
            id: "<empty>".to_string(),
            reason: "a pipeline needs at least one shader stage".to_string(),
        })?;

        let mut kind: Option<PipelineKind> = None;
        let mut seen: Vec<ShaderStage> = Vec::new();
        for module in modules {
            let stage_kind = module.stage.pipeline_kind().ok_or_else(|| ShaderError::UnknownStage {
                id: module.id.clone(),
            })?;
            kind = Some(match (kind, stage_kind) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                // Mesh pipelines rasterize through an ordinary fragment stage.
                (Some(PipelineKind::Mesh), PipelineKind::Raster)
                    if module.stage == ShaderStage::Fragment =>
                {
                    PipelineKind::Mesh
                }
                (Some(PipelineKind::Raster), PipelineKind::Mesh)
                    if seen.iter().all(|s| *s == ShaderStage::Fragment) =>
                {
                    PipelineKind::Mesh
                }
                (Some(a), b) => {
                    return Err(precondition(
                        module,
                        format!("cannot link a {b:?} stage into a {a:?} pipeline"),
                    ))
                }
            });
            if stage_kind != PipelineKind::RayTracing && seen.contains(&module.stage) {
                return Err(precondition(
                    module,
                    format!("stage {} appears twice in one pipeline", module.stage),
                ));
            }
            seen.push(module.stage);
        }
        if kind == Some(PipelineKind::Compute) && modules.len() > 1 {
            return Err(precondition(
                first,
                "a compute pipeline has exactly one stage".to_string(),
            ));
        }
        kind.ok_or_else(|| ShaderError::UnknownStage {
            id: first.id.clone(),
        })
    }

    /// The modules in the order they were supplied.
    pub fn modules(&self) -> &[Arc<ShaderModule>] {
        &self.modules
    }

    /// The pipeline family the stages link into.
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// The module compiled for `stage`, if present.
    pub fn stage(&self, stage: ShaderStage) -> Option<&Arc<ShaderModule>> {
        self.modules.iter().find(|m| m.stage == stage)
    }

    /// The merged binding table.
    pub fn bindings(&self) -> &BTreeMap<String, BindingInfo> {
        &self.bindings
    }

    /// The merged uniform-variable table.
    pub fn variables(&self) -> &BTreeMap<String, VariableInfo> {
        &self.variables
    }

    /// Thread-group size of the compute-like stage, if any.
    pub fn thread_group_size(&self) -> Option<[u32; 3]> {
        self.modules
            .iter()
            .find(|m| m.stage.has_thread_groups())
            .map(|m| m.thread_group_size)
    }

    /// Derives the descriptor-set layouts from the merged binding table.
    ///
    /// Differently named bindings may alias the same slot as long as they
    /// agree on descriptor type and count.
    pub fn pipeline_layout(&self) -> Result<PipelineLayoutDesc, ShaderError> {
        let mut sets: BTreeMap<u32, BTreeMap<u32, LayoutBinding>> = BTreeMap::new();
        for (name, info) in &self.bindings {
            let slots = sets.entry(info.set).or_default();
            match slots.get_mut(&info.binding) {
                Some(slot) => {
                    if slot.kind != info.kind {
                        return Err(conflict(
                            MergeTable::Binding,
                            name,
                            "kind",
                            format!("{:?}", slot.kind),
                            format!("{:?}", info.kind),
                        ));
                    }
                    if slot.count != info.count {
                        return Err(conflict(
                            MergeTable::Binding,
                            name,
                            "count",
                            slot.count.to_string(),
                            info.count.to_string(),
                        ));
                    }
                    slot.stages |= info.stages;
                    slot.names.push(name.clone());
                }
                None => {
                    slots.insert(
                        info.binding,
                        LayoutBinding {
                            binding: info.binding,
                            kind: info.kind,
                            count: info.count,
                            stages: info.stages,
                            names: vec![name.clone()],
                        },
                    );
                }
            }
        }

        Ok(PipelineLayoutDesc {
            sets: sets
                .into_iter()
                .map(|(set, slots)| DescriptorSetLayoutDesc {
                    set,
                    bindings: slots.into_values().collect(),
                })
                .collect(),
        })
    }
}

fn conflict(
    table: MergeTable,
    name: &str,
    field: &'static str,
    existing: String,
    incoming: String,
) -> ShaderError {
    MergeConflict {
        table,
        name: name.to_string(),
        field,
        existing,
        incoming,
    }
    .into()
}

fn fmt_size(size: Option<u64>) -> String {
    size.map_or_else(|| "unsized".to_string(), |s| s.to_string())
}

fn check_binding(name: &str, existing: &BindingInfo, incoming: &BindingInfo) -> Result<(), ShaderError> {
    let table = MergeTable::Binding;
    if existing.set != incoming.set {
        return Err(conflict(table, name, "set", existing.set.to_string(), incoming.set.to_string()));
    }
    if existing.binding != incoming.binding {
        return Err(conflict(
            table,
            name,
            "binding",
            existing.binding.to_string(),
            incoming.binding.to_string(),
        ));
    }
    if existing.size != incoming.size {
        return Err(conflict(table, name, "size", fmt_size(existing.size), fmt_size(incoming.size)));
    }
    if existing.kind != incoming.kind {
        return Err(conflict(
            table,
            name,
            "kind",
            format!("{:?}", existing.kind),
            format!("{:?}", incoming.kind),
        ));
    }
    if existing.count != incoming.count {
        return Err(conflict(
            table,
            name,
            "count",
            existing.count.to_string(),
            incoming.count.to_string(),
        ));
    }
    Ok(())
}

fn check_variable(name: &str, existing: &VariableInfo, incoming: &VariableInfo) -> Result<(), ShaderError> {
    let table = MergeTable::Variable;
    let fields = [
        ("set", existing.set, incoming.set),
        ("binding", existing.binding, incoming.binding),
        ("offset", existing.offset, incoming.offset),
        ("size", existing.size, incoming.size),
    ];
    for (field, a, b) in fields {
        if a != b {
            return Err(conflict(table, name, field, a.to_string(), b.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::shader::module::{BindingKind, ShaderBytecode};

    fn module(id: &str, bindings: &[(&str, u32, u32)]) -> Arc<ShaderModule> {
        let stage = ShaderStage::infer_from_id(id);
        Arc::new(ShaderModule {
            id: id.to_string(),
            stage,
            entry_point: "main".to_string(),
            bytecode: ShaderBytecode::Spirv(vec![0x0723_0203]),
            thread_group_size: [1, 1, 1],
            bindings: bindings
                .iter()
                .map(|(name, set, binding)| {
                    (
                        name.to_string(),
                        BindingInfo {
                            set: *set,
                            binding: *binding,
                            size: None,
                            kind: BindingKind::CombinedImageSampler,
                            count: 1,
                            stages: stage.mask(),
                        },
                    )
                })
                .collect(),
            variables: BTreeMap::new(),
        })
    }

    #[test]
    fn conflicting_binding_names_field_and_values() {
        let vs = module("Blit.Vertex", &[("inputTexture", 0, 0)]);
        let fs = module("Blit.Fragment", &[("inputTexture", 0, 1)]);
        let err = ShaderStages::new(vec![vs, fs]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        let text = err.to_string();
        assert!(text.contains("inputTexture"));
        assert!(text.contains("'binding'"));
        assert!(text.contains(" 0 ") && text.contains(" 1 "), "{text}");
    }

    #[test]
    fn visibility_is_unioned() {
        let vs = module("Blit.Vertex", &[("lut", 0, 2)]);
        let fs = module("Blit.Fragment", &[("lut", 0, 2), ("inputTexture", 0, 0)]);
        let stages = ShaderStages::new(vec![vs, fs]).unwrap();
        let lut = &stages.bindings()["lut"];
        assert!(lut.stages.contains(crate::shader::StageMask::VERTEX));
        assert!(lut.stages.contains(crate::shader::StageMask::FRAGMENT));
        let layout = stages.pipeline_layout().unwrap();
        assert_eq!(layout.sets.len(), 1);
        assert_eq!(layout.sets[0].bindings.len(), 2);
        assert_eq!(layout.sets[0].bindings[0].binding, 0);
    }

    #[test]
    fn merge_is_order_independent() {
        let a = module("P.Vertex", &[("a", 0, 0), ("shared", 1, 0)]);
        let b = module("P.Geometry", &[("b", 0, 1), ("shared", 1, 0)]);
        let c = module("P.Fragment", &[("c", 0, 2), ("shared", 1, 0)]);
        let reference = ShaderStages::new(vec![a.clone(), b.clone(), c.clone()]).unwrap();
        let orders = [
            vec![a.clone(), c.clone(), b.clone()],
            vec![b.clone(), a.clone(), c.clone()],
            vec![b.clone(), c.clone(), a.clone()],
            vec![c.clone(), a.clone(), b.clone()],
            vec![c, b, a],
        ];
        for order in orders {
            let merged = ShaderStages::new(order).unwrap();
            assert_eq!(merged.bindings(), reference.bindings());
            assert_eq!(merged.variables(), reference.variables());
        }
    }

    #[test]
    fn rejects_mixed_pipeline_families() {
        let cs = module("Sim.Compute", &[]);
        let fs = module("Sim.Fragment", &[]);
        assert!(ShaderStages::new(vec![cs, fs]).is_err());
        assert!(ShaderStages::new(vec![]).is_err());
    }

    #[test]
    fn mesh_pipeline_accepts_fragment() {
        let ms = module("Lod.MeshExt", &[]);
        let fs = module("Lod.Fragment", &[]);
        let stages = ShaderStages::new(vec![fs, ms]).unwrap();
        assert_eq!(stages.kind(), PipelineKind::Mesh);
    }
}
