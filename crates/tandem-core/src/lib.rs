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

//! # Tandem Core
//!
//! Foundational crate containing the data model, traits and error taxonomy
//! shared by every layer of the cross-API interop stack. Nothing in here
//! talks to a driver: concrete backends live in `tandem-infra`.

#![warn(missing_docs)]

pub mod api;
pub mod blit;
pub mod checkpoint;
pub mod device;
pub mod error;
pub mod pass;
pub mod resource;
pub mod settings;
pub mod shader;
pub mod sync;
pub mod traits;

pub use api::{ComputeApi, RenderApi};
pub use error::{ErrorKind, InteropError, MergeConflict, MergeTable, ShaderError};
