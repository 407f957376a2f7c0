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

//! Backend-agnostic description of a physical device on either side of the interop pair.

use crate::api::{ComputeApi, RenderApi};
use bitflags::bitflags;
use std::fmt;

/// A 16-byte device identifier reported identically by every API driving the same GPU.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceUuid(pub [u8; 16]);

impl DeviceUuid {
    /// Builds a UUID from an 8-byte LUID, zero-padding the trailing half.
    ///
    /// This is how D3D12 adapters, which only expose a LUID, are given a UUID.
    pub fn from_luid(luid: &DeviceLuid) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&luid.bytes);
        DeviceUuid(bytes)
    }

    /// Returns `true` when every byte is zero, which drivers use for "unknown".
    pub fn is_nil(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for DeviceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceUuid({self})")
    }
}

impl fmt::Display for DeviceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// An 8-byte locally unique adapter identifier plus its node mask (Windows only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceLuid {
    /// The raw LUID bytes, low part first.
    pub bytes: [u8; 8],
    /// Bit mask of the GPU nodes this device covers in a linked-adapter setup.
    pub node_mask: u32,
}

impl DeviceLuid {
    /// Builds a LUID from the `LowPart`/`HighPart` pair DXGI reports.
    pub fn from_parts(low: u32, high: i32, node_mask: u32) -> Self {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&low.to_le_bytes());
        bytes[4..].copy_from_slice(&high.to_le_bytes());
        DeviceLuid { bytes, node_mask }
    }
}

/// PCI vendor identifiers the core knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VendorId(pub u32);

impl VendorId {
    /// NVIDIA Corporation.
    pub const NVIDIA: VendorId = VendorId(0x10DE);
    /// Advanced Micro Devices.
    pub const AMD: VendorId = VendorId(0x1002);
    /// Intel Corporation.
    pub const INTEL: VendorId = VendorId(0x8086);
    /// Microsoft (WARP / Dozen adapters).
    pub const MICROSOFT: VendorId = VendorId(0x1414);
}

/// The driver stack behind a device, as reported by `VK_KHR_driver_properties`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DriverId {
    /// The driver did not report an identity.
    #[default]
    Unknown,
    /// AMD proprietary driver.
    AmdProprietary,
    /// AMD open-source driver (AMDVLK).
    AmdOpenSource,
    /// Mesa RADV.
    MesaRadv,
    /// NVIDIA proprietary driver.
    NvidiaProprietary,
    /// Intel proprietary Windows driver.
    IntelProprietaryWindows,
    /// Intel open-source Mesa driver (ANV / Iris).
    IntelOpenSourceMesa,
    /// Mesa llvmpipe software rasterizer.
    MesaLlvmpipe,
    /// Mesa Dozen (Vulkan on top of D3D12, typically under WSL).
    MesaDozen,
    /// Mesa NVK.
    MesaNvk,
    /// Any other driver, kept as its raw Vulkan value.
    Other(u32),
}

impl DriverId {
    /// Maps a raw `VkDriverId` value onto the known driver identities.
    pub fn from_vulkan_raw(raw: i32) -> Self {
        match raw {
            0 => DriverId::Unknown,
            1 => DriverId::AmdProprietary,
            2 => DriverId::AmdOpenSource,
            3 => DriverId::MesaRadv,
            4 => DriverId::NvidiaProprietary,
            5 => DriverId::IntelProprietaryWindows,
            6 => DriverId::IntelOpenSourceMesa,
            13 => DriverId::MesaLlvmpipe,
            23 => DriverId::MesaDozen,
            24 => DriverId::MesaNvk,
            other => DriverId::Other(other as u32),
        }
    }

    /// Whether this driver is part of the Mesa stack.
    pub fn is_mesa(self) -> bool {
        matches!(
            self,
            DriverId::MesaRadv
                | DriverId::IntelOpenSourceMesa
                | DriverId::MesaLlvmpipe
                | DriverId::MesaDozen
                | DriverId::MesaNvk
        )
    }
}

/// The physical type of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceType {
    /// The device type could not be determined.
    #[default]
    Unknown,
    /// A GPU sharing memory with the host.
    IntegratedGpu,
    /// A GPU with dedicated memory.
    DiscreteGpu,
    /// A virtualized GPU.
    VirtualGpu,
    /// A software implementation running on the CPU.
    Cpu,
}

bitflags! {
    /// The kinds of OS handle a device can export memory or semaphores through.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExternalHandleKinds: u32 {
        /// A POSIX file descriptor.
        const OPAQUE_FD = 1 << 0;
        /// A Windows NT handle.
        const OPAQUE_WIN32 = 1 << 1;
        /// A legacy global-share (KMT) handle.
        const OPAQUE_WIN32_KMT = 1 << 2;
        /// A D3D12 committed resource shared through an NT handle.
        const D3D12_RESOURCE = 1 << 3;
    }
}

impl ExternalHandleKinds {
    /// The kind a freshly exported allocation uses on the current OS.
    pub fn native() -> Self {
        if cfg!(windows) {
            ExternalHandleKinds::OPAQUE_WIN32
        } else {
            ExternalHandleKinds::OPAQUE_FD
        }
    }
}

/// Everything the interop layer needs to know about a render-API physical device.
#[derive(Debug, Clone, Default)]
pub struct PhysicalDeviceRecord {
    /// The human-readable device name.
    pub name: String,
    /// The API this record was enumerated through.
    pub render_api: RenderApi,
    /// The 16-byte device UUID. Padded from the LUID on D3D12.
    pub device_uuid: DeviceUuid,
    /// The 16-byte driver UUID.
    pub driver_uuid: DeviceUuid,
    /// The LUID, present on Windows only.
    pub luid: Option<DeviceLuid>,
    /// The PCI vendor.
    pub vendor_id: VendorId,
    /// The PCI device id.
    pub device_id: u32,
    /// The driver stack.
    pub driver_id: DriverId,
    /// The physical type.
    pub device_type: DeviceType,
    /// The external handle kinds the device can export.
    pub external_handles: ExternalHandleKinds,
}

/// A compute-API device as enumerated by its function table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeDeviceInfo {
    /// Which compute API enumerated this device.
    pub api: ComputeApi,
    /// The API's ordinal for the device.
    pub ordinal: usize,
    /// The device name.
    pub name: String,
    /// The UUID, if the API exposes it.
    pub uuid: Option<DeviceUuid>,
    /// The LUID, if the API exposes it (Windows only).
    pub luid: Option<DeviceLuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_display_uses_canonical_grouping() {
        let uuid = DeviceUuid([
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef,
        ]);
        assert_eq!(uuid.to_string(), "01234567-89ab-cdef-0123-456789abcdef");
    }

    #[test]
    fn luid_padding_keeps_low_bytes() {
        let luid = DeviceLuid::from_parts(0x0000_c0de, 1, 1);
        let uuid = DeviceUuid::from_luid(&luid);
        assert_eq!(&uuid.0[..8], &luid.bytes);
        assert!(uuid.0[8..].iter().all(|b| *b == 0));
        assert!(!uuid.is_nil());
    }

    #[test]
    fn driver_id_maps_mesa_intel() {
        assert_eq!(DriverId::from_vulkan_raw(6), DriverId::IntelOpenSourceMesa);
        assert!(DriverId::IntelOpenSourceMesa.is_mesa());
        assert!(!DriverId::NvidiaProprietary.is_mesa());
        assert_eq!(DriverId::from_vulkan_raw(99), DriverId::Other(99));
    }
}
