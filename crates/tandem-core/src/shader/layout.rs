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

//! Pipeline layout descriptions derived from reflection.

use super::module::BindingKind;
use super::stage::StageMask;

/// One slot in a descriptor set layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutBinding {
    /// The binding index within the set.
    pub binding: u32,
    /// The descriptor type.
    pub kind: BindingKind,
    /// Array element count.
    pub count: u32,
    /// Stages the slot is visible to.
    pub stages: StageMask,
    /// Every source name that refers to this slot.
    pub names: Vec<String>,
}

/// The layout of one descriptor set (or register space).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetLayoutDesc {
    /// The set index.
    pub set: u32,
    /// Slots sorted by binding index.
    pub bindings: Vec<LayoutBinding>,
}

/// A complete pipeline layout, sorted by set index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineLayoutDesc {
    /// The descriptor sets used by the pipeline.
    pub sets: Vec<DescriptorSetLayoutDesc>,
}

impl PipelineLayoutDesc {
    /// The layout of `set`, if the pipeline uses it.
    pub fn set(&self, set: u32) -> Option<&DescriptorSetLayoutDesc> {
        self.sets.iter().find(|s| s.set == set)
    }

    /// Number of set slots a backend must allocate, counting gaps.
    pub fn set_count(&self) -> u32 {
        self.sets.last().map_or(0, |s| s.set + 1)
    }
}
