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

//! Compiled shader modules, their reflection tables, and pipeline layouts.

pub mod layout;
pub mod module;
pub mod stage;
pub mod stages;

pub use layout::{DescriptorSetLayoutDesc, LayoutBinding, PipelineLayoutDesc};
pub use module::{BindingInfo, BindingKind, ShaderBytecode, ShaderModule, VariableInfo};
pub use stage::{PipelineKind, ShaderStage, StageMask};
pub use stages::ShaderStages;
