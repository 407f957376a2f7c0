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

//! Physical device identity, cross-API matching, and user device selection.

pub mod matcher;
pub mod record;
pub mod selector;

pub use matcher::{match_device, DeviceMatch};
pub use record::{
    ComputeDeviceInfo, DeviceLuid, DeviceType, DeviceUuid, DriverId, ExternalHandleKinds,
    PhysicalDeviceRecord, VendorId,
};
pub use selector::{DeviceSelection, DeviceSelector, SelectionOutcome};
