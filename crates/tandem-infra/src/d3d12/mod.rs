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

//! Direct3D 12 render backend (Windows only).
//!
//! D3D12 shares memory as committed resources created on a shared heap and
//! synchronizes through shared fences, which behave like timeline semaphores.
//! There is no binary semaphore counterpart.

pub mod device;
pub mod fence;
pub mod memory;
pub mod registry;

pub use device::D3d12Device;
pub use fence::D3d12Fence;
pub use memory::{D3d12Buffer, D3d12Image};
pub use registry::D3d12Adapter;

use tandem_core::resource::ImageFormat;
use tandem_core::InteropError;
use windows::Win32::Foundation::{E_OUTOFMEMORY, HANDLE};
use windows::Win32::Graphics::Dxgi::Common::*;

/// Maps a failed `HRESULT` onto the interop error taxonomy.
pub(crate) fn hr_error(call: &'static str, error: windows::core::Error) -> InteropError {
    log::error!("D3D12 call {call} failed: {error}");
    if error.code() == E_OUTOFMEMORY {
        return InteropError::ResourceExhausted {
            what: format!("D3D12 {call}"),
            requested_bytes: 0,
        };
    }
    InteropError::Driver {
        api: "D3D12",
        call,
        code: i64::from(error.code().0),
        message: error.message(),
    }
}

pub(crate) trait HrResultExt<T> {
    fn hr_context(self, call: &'static str) -> Result<T, InteropError>;
}

impl<T> HrResultExt<T> for windows::core::Result<T> {
    fn hr_context(self, call: &'static str) -> Result<T, InteropError> {
        self.map_err(|e| hr_error(call, e))
    }
}

pub(crate) fn dxgi_format(format: ImageFormat) -> DXGI_FORMAT {
    match format {
        ImageFormat::R8Unorm => DXGI_FORMAT_R8_UNORM,
        ImageFormat::Rg8Unorm => DXGI_FORMAT_R8G8_UNORM,
        ImageFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        ImageFormat::Rgba8Srgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        ImageFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        ImageFormat::R16Sfloat => DXGI_FORMAT_R16_FLOAT,
        ImageFormat::Rgba16Sfloat => DXGI_FORMAT_R16G16B16A16_FLOAT,
        ImageFormat::R32Sfloat => DXGI_FORMAT_R32_FLOAT,
        ImageFormat::Rg32Sfloat => DXGI_FORMAT_R32G32_FLOAT,
        ImageFormat::Rgba32Sfloat => DXGI_FORMAT_R32G32B32A32_FLOAT,
        ImageFormat::R32Uint => DXGI_FORMAT_R32_UINT,
        ImageFormat::Rgba32Uint => DXGI_FORMAT_R32G32B32A32_UINT,
        ImageFormat::R32Sint => DXGI_FORMAT_R32_SINT,
        ImageFormat::Bc6hUfloat => DXGI_FORMAT_BC6H_UF16,
        ImageFormat::Bc6hSfloat => DXGI_FORMAT_BC6H_SF16,
    }
}

pub(crate) fn raw_handle(handle: HANDLE) -> tandem_core::resource::RawHandle {
    tandem_core::resource::RawHandle::Win32(handle.0 as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::ErrorKind;

    #[test]
    fn out_of_memory_is_resource_exhausted() {
        let err = hr_error("CreateCommittedResource", E_OUTOFMEMORY.into());
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn srgb_keeps_its_dxgi_twin() {
        assert_eq!(dxgi_format(ImageFormat::Rgba8Srgb), DXGI_FORMAT_R8G8B8A8_UNORM_SRGB);
        assert_eq!(dxgi_format(ImageFormat::Bc6hUfloat), DXGI_FORMAT_BC6H_UF16);
    }
}
