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

//! Named driver workarounds, decided once per device.

use crate::api::RenderApi;
use crate::device::{DriverId, PhysicalDeviceRecord};

/// The set of driver-specific workarounds active for a render device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverWorkarounds {
    /// Call the render API's `finish` after signalling a shared semaphore.
    ///
    /// Intel's open-source Mesa GL driver does not make a GL-side signal
    /// visible to the other API until the GL command stream is flushed.
    pub finish_after_signal: bool,
    /// Cross-API waits may deadlock; interop must be disabled.
    ///
    /// Observed with D3D12 resources shared into Mesa's Vulkan-on-D3D12
    /// (Dozen) under WSL: imports succeed, the first cross-API wait hangs.
    pub cross_api_wait_may_deadlock: bool,
}

impl DriverWorkarounds {
    /// Decides the workarounds for `api` running on `driver`.
    ///
    /// `under_wsl` tells whether the process runs inside the Windows
    /// Subsystem for Linux.
    pub fn for_driver(api: RenderApi, driver: DriverId, under_wsl: bool) -> Self {
        let workarounds = DriverWorkarounds {
            finish_after_signal: api == RenderApi::OpenGl
                && driver == DriverId::IntelOpenSourceMesa,
            cross_api_wait_may_deadlock: under_wsl && driver == DriverId::MesaDozen,
        };
        if workarounds != DriverWorkarounds::default() {
            log::warn!("Driver workarounds active for {api} / {driver:?}: {workarounds:?}");
        }
        workarounds
    }

    /// Decides the workarounds for a render device record.
    pub fn for_device(record: &PhysicalDeviceRecord, under_wsl: bool) -> Self {
        Self::for_driver(record.render_api, record.driver_id, under_wsl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_only_for_gl_on_intel_mesa() {
        assert!(
            DriverWorkarounds::for_driver(RenderApi::OpenGl, DriverId::IntelOpenSourceMesa, false)
                .finish_after_signal
        );
        assert!(
            !DriverWorkarounds::for_driver(RenderApi::Vulkan, DriverId::IntelOpenSourceMesa, false)
                .finish_after_signal
        );
        assert!(
            !DriverWorkarounds::for_driver(RenderApi::OpenGl, DriverId::MesaRadv, false)
                .finish_after_signal
        );
    }

    #[test]
    fn dozen_under_wsl_disables_interop() {
        assert!(
            DriverWorkarounds::for_driver(RenderApi::Vulkan, DriverId::MesaDozen, true)
                .cross_api_wait_may_deadlock
        );
        assert_eq!(
            DriverWorkarounds::for_driver(RenderApi::Vulkan, DriverId::MesaDozen, false),
            DriverWorkarounds::default()
        );
    }
}
