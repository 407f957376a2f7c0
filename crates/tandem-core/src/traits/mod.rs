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

//! The seams between the interop layer and concrete render / compute backends.

pub mod compute;
pub mod render;

pub use compute::{
    ComputeBackend, ComputeCapabilities, ComputeDevice, ExternalImageDesc, ExternalMemoryDesc,
    ExternalMemoryId, ExternalSemaphoreDesc, ExternalSemaphoreId, FdImportOwnership, StreamId,
};
pub use render::{ExportedAllocation, ExportedSemaphore, RenderInteropDevice, SemaphoreValue};
