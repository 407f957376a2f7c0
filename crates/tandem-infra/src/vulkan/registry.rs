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

//! Physical-device enumeration with the identity data device matching needs.

use super::instance::VulkanInstance;
use super::VkResultExt;
use ash::vk;
use tandem_core::device::{
    DeviceLuid, DeviceType, DeviceUuid, DriverId, ExternalHandleKinds, PhysicalDeviceRecord,
    VendorId,
};
use tandem_core::{InteropError, RenderApi};

/// A Vulkan physical device and its identity record.
#[derive(Debug, Clone)]
pub struct VulkanPhysicalDevice {
    /// The raw physical-device handle.
    pub handle: vk::PhysicalDevice,
    /// Identity and export capabilities.
    pub record: PhysicalDeviceRecord,
}

/// Enumerates every physical device that supports Vulkan 1.2.
///
/// Older devices are skipped with a log line: timeline semaphores and the
/// driver-identity query are core in 1.2.
///
/// ## Errors
/// * `InteropError::Driver` - If enumeration fails.
pub fn enumerate(instance: &VulkanInstance) -> Result<Vec<VulkanPhysicalDevice>, InteropError> {
    let raw = instance.raw();
    // SAFETY: plain query on a live instance.
    let handles =
        unsafe { raw.enumerate_physical_devices() }.vk_context("vkEnumeratePhysicalDevices")?;

    let mut devices = Vec::with_capacity(handles.len());
    for handle in handles {
        let mut id_props = vk::PhysicalDeviceIDProperties::default();
        let mut driver_props = vk::PhysicalDeviceDriverProperties::default();
        let properties = {
            let mut props2 = vk::PhysicalDeviceProperties2::default()
                .push_next(&mut id_props)
                .push_next(&mut driver_props);
            // SAFETY: the chain only contains structs the 1.2 query accepts.
            unsafe { raw.get_physical_device_properties2(handle, &mut props2) };
            props2.properties
        };

        let name = properties
            .device_name_as_c_str()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from("<unnamed>"));
        if properties.api_version < vk::API_VERSION_1_2 {
            log::info!("Skipping Vulkan device '{name}': it only supports Vulkan 1.0/1.1");
            continue;
        }

        let luid = (id_props.device_luid_valid == vk::TRUE).then(|| DeviceLuid {
            bytes: id_props.device_luid,
            node_mask: id_props.device_node_mask,
        });
        let record = PhysicalDeviceRecord {
            name,
            render_api: RenderApi::Vulkan,
            device_uuid: DeviceUuid(id_props.device_uuid),
            driver_uuid: DeviceUuid(id_props.driver_uuid),
            luid,
            vendor_id: VendorId(properties.vendor_id),
            device_id: properties.device_id,
            driver_id: DriverId::from_vulkan_raw(driver_props.driver_id.as_raw()),
            device_type: map_device_type(properties.device_type),
            external_handles: probe_external_handles(raw, handle),
        };
        log::debug!(
            "Vulkan device '{}' uuid={} driver={:?} handles={:?}",
            record.name,
            record.device_uuid,
            record.driver_id,
            record.external_handles
        );
        devices.push(VulkanPhysicalDevice { handle, record });
    }
    Ok(devices)
}

fn map_device_type(kind: vk::PhysicalDeviceType) -> DeviceType {
    match kind {
        vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceType::IntegratedGpu,
        vk::PhysicalDeviceType::DISCRETE_GPU => DeviceType::DiscreteGpu,
        vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceType::VirtualGpu,
        vk::PhysicalDeviceType::CPU => DeviceType::Cpu,
        _ => DeviceType::Unknown,
    }
}

/// Asks the driver which handle types a storage buffer's memory can be exported through.
fn probe_external_handles(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> ExternalHandleKinds {
    let candidates = [
        (
            vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD,
            ExternalHandleKinds::OPAQUE_FD,
            vk::ExternalMemoryFeatureFlags::EXPORTABLE,
        ),
        (
            vk::ExternalMemoryHandleTypeFlags::OPAQUE_WIN32,
            ExternalHandleKinds::OPAQUE_WIN32,
            vk::ExternalMemoryFeatureFlags::EXPORTABLE,
        ),
        (
            vk::ExternalMemoryHandleTypeFlags::OPAQUE_WIN32_KMT,
            ExternalHandleKinds::OPAQUE_WIN32_KMT,
            vk::ExternalMemoryFeatureFlags::EXPORTABLE,
        ),
        (
            vk::ExternalMemoryHandleTypeFlags::D3D12_RESOURCE,
            ExternalHandleKinds::D3D12_RESOURCE,
            vk::ExternalMemoryFeatureFlags::IMPORTABLE,
        ),
    ];

    let mut kinds = ExternalHandleKinds::empty();
    for (handle_type, kind, required) in candidates {
        let info = vk::PhysicalDeviceExternalBufferInfo::default()
            .usage(
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_SRC
                    | vk::BufferUsageFlags::TRANSFER_DST,
            )
            .handle_type(handle_type);
        let mut props = vk::ExternalBufferProperties::default();
        // SAFETY: plain capability query.
        unsafe {
            instance.get_physical_device_external_buffer_properties(device, &info, &mut props)
        };
        if props
            .external_memory_properties
            .external_memory_features
            .contains(required)
        {
            kinds |= kind;
        }
    }
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_types_map_onto_the_core_vocabulary() {
        assert_eq!(
            map_device_type(vk::PhysicalDeviceType::DISCRETE_GPU),
            DeviceType::DiscreteGpu
        );
        assert_eq!(
            map_device_type(vk::PhysicalDeviceType::CPU),
            DeviceType::Cpu
        );
        assert_eq!(
            map_device_type(vk::PhysicalDeviceType::OTHER),
            DeviceType::Unknown
        );
    }

    #[test]
    fn enumerated_devices_report_vulkan_and_a_uuid() {
        let instance = match VulkanInstance::new() {
            Ok(instance) => instance,
            Err(e) => {
                println!("skipping: {e}");
                return;
            }
        };
        for device in enumerate(&instance).unwrap() {
            assert_eq!(device.record.render_api, RenderApi::Vulkan);
            assert!(!device.record.name.is_empty());
        }
    }
}
