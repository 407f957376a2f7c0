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

//! DXGI adapter enumeration.

use super::HrResultExt;
use tandem_core::device::{
    DeviceLuid, DeviceType, DeviceUuid, ExternalHandleKinds, PhysicalDeviceRecord, VendorId,
};
use tandem_core::{InteropError, RenderApi};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::{D3D12CreateDevice, ID3D12Device};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, IDXGIAdapter1, IDXGIFactory1, DXGI_ADAPTER_DESC1, DXGI_ADAPTER_FLAG_SOFTWARE,
    DXGI_ERROR_NOT_FOUND,
};

/// A hardware adapter able to create a D3D12 device.
#[derive(Clone)]
pub struct D3d12Adapter {
    adapter: IDXGIAdapter1,
    record: PhysicalDeviceRecord,
}

impl D3d12Adapter {
    pub fn raw(&self) -> &IDXGIAdapter1 {
        &self.adapter
    }

    pub fn record(&self) -> &PhysicalDeviceRecord {
        &self.record
    }
}

impl std::fmt::Debug for D3d12Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12Adapter").field("record", &self.record).finish()
    }
}

/// Lists hardware adapters that support feature level 11.0.
///
/// Software adapters (WARP) are skipped: they cannot share memory with a
/// compute API.
pub fn enumerate() -> Result<Vec<D3d12Adapter>, InteropError> {
    // SAFETY: plain factory creation.
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }.hr_context("CreateDXGIFactory1")?;
    let mut adapters = Vec::new();
    for index in 0.. {
        // SAFETY: EnumAdapters1 reports DXGI_ERROR_NOT_FOUND past the last adapter.
        let adapter = match unsafe { factory.EnumAdapters1(index) } {
            Ok(adapter) => adapter,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => return Err(super::hr_error("IDXGIFactory1::EnumAdapters1", e)),
        };
        // SAFETY: valid adapter.
        let desc = unsafe { adapter.GetDesc1() }.hr_context("IDXGIAdapter1::GetDesc1")?;
        let record = adapter_record(&desc);
        if desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0 {
            log::debug!("Skipping software adapter '{}'", record.name);
            continue;
        }
        // SAFETY: a null output pointer only tests for support.
        let supported = unsafe {
            D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, std::ptr::null_mut::<Option<ID3D12Device>>())
        };
        if supported.is_err() {
            log::debug!("Skipping adapter '{}' without D3D12 support", record.name);
            continue;
        }
        adapters.push(D3d12Adapter { adapter, record });
    }
    Ok(adapters)
}

fn adapter_record(desc: &DXGI_ADAPTER_DESC1) -> PhysicalDeviceRecord {
    let end = desc
        .Description
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(desc.Description.len());
    let luid = DeviceLuid::from_parts(desc.AdapterLuid.LowPart, desc.AdapterLuid.HighPart, 1);
    PhysicalDeviceRecord {
        name: String::from_utf16_lossy(&desc.Description[..end]),
        render_api: RenderApi::D3D12,
        device_uuid: DeviceUuid::from_luid(&luid),
        driver_uuid: DeviceUuid::default(),
        luid: Some(luid),
        vendor_id: VendorId(desc.VendorId),
        device_id: desc.DeviceId,
        device_type: DeviceType::Unknown,
        external_handles: ExternalHandleKinds::D3D12_RESOURCE | ExternalHandleKinds::OPAQUE_WIN32,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_pads_uuid_from_luid() {
        // --- Arrange ---
        let mut desc = DXGI_ADAPTER_DESC1::default();
        for (dst, src) in desc.Description.iter_mut().zip("Test GPU".encode_utf16()) {
            *dst = src;
        }
        desc.AdapterLuid.LowPart = 0x1234;
        desc.AdapterLuid.HighPart = 0;
        desc.VendorId = 0x10DE;

        // --- Act ---
        let record = adapter_record(&desc);

        // --- Assert ---
        assert_eq!(record.name, "Test GPU");
        assert_eq!(record.device_uuid.0[..2], [0x34, 0x12]);
        assert_eq!(record.device_uuid.0[8..], [0; 8]);
        assert_eq!(record.render_api, RenderApi::D3D12);
    }

    #[test]
    fn enumerate_runs_without_hardware() {
        match enumerate() {
            Ok(adapters) => println!("{} D3D12 adapters", adapters.len()),
            Err(e) => println!("DXGI unavailable: {e}"),
        }
    }
}
