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

//! OS handles, device addresses and ownership of shared resources.

use crate::device::ExternalHandleKinds;
use std::fmt;

/// Identifies a live shared resource inside the interop context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The API currently allowed to touch a shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceOwnership {
    /// The render API's queue owns the resource.
    #[default]
    Render,
    /// The compute API's stream owns the resource.
    Compute,
}

/// The raw value of an exported OS handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawHandle {
    /// A POSIX file descriptor.
    Fd(i32),
    /// A Windows `HANDLE` value.
    Win32(usize),
}

/// An OS handle exported from the render API, ready to be imported once.
///
/// File descriptors travel to the importer, which either takes them over or
/// duplicates them depending on the compute API. Windows NT handles stay
/// owned by the render-side allocation and are closed when it is destroyed.
#[derive(Debug, PartialEq, Eq)]
pub struct ExternalHandle {
    /// Exactly one kind bit.
    pub kind: ExternalHandleKinds,
    /// The handle value.
    pub raw: RawHandle,
}

impl ExternalHandle {
    /// Whether the render-side owner keeps the handle alive after import.
    pub fn retained_by_exporter(&self) -> bool {
        matches!(self.raw, RawHandle::Win32(_))
    }
}

/// A compute-API device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    /// The null pointer returned for zero-sized buffers.
    pub const NULL: DevicePtr = DevicePtr(0);

    /// Whether this is the null pointer.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offsets the pointer by `bytes`.
    pub fn offset(self, bytes: u64) -> DevicePtr {
        DevicePtr(self.0 + bytes)
    }
}

/// A compute-API handle to an imported image, usable from kernels without a descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindlessImage {
    /// The surface/texture object handle passed to kernels.
    pub surface: u64,
    /// The backing array (level 0 of the imported mipmapped array).
    pub array: u64,
}

/// Placement of one image subresource inside its memory, as reported by the render API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubresourceLayout {
    /// Byte offset of the subresource.
    pub offset: u64,
    /// Total copiable size in bytes.
    pub size: u64,
    /// Bytes between the starts of consecutive rows.
    pub row_pitch: u64,
    /// Bytes between array layers.
    pub array_pitch: u64,
    /// Bytes between depth slices.
    pub depth_pitch: u64,
}
