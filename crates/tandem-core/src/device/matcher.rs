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

//! Selects the compute device that drives the same silicon as a render device.

use super::record::{ComputeDeviceInfo, PhysicalDeviceRecord};

/// The result of matching a render device against the compute devices of one API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMatch {
    /// The candidate at this index reports the same device UUID.
    ByUuid(usize),
    /// No UUID matched; the candidate at this index reports the same LUID.
    ByLuid(usize),
    /// No candidate matched. Interop must be skipped or the user must pick a device.
    NotFound,
}

impl DeviceMatch {
    /// The index of the matched candidate, if any.
    pub fn index(self) -> Option<usize> {
        match self {
            DeviceMatch::ByUuid(i) | DeviceMatch::ByLuid(i) => Some(i),
            DeviceMatch::NotFound => None,
        }
    }
}

/// Matches `render` against `candidates`, preferring UUID and falling back to LUID.
///
/// The LUID fallback only applies when the render device reports a LUID, which
/// is the case on Windows. When more than one candidate matches, the first one
/// wins and a warning is logged, since drivers are expected to report unique ids.
pub fn match_device(
    render: &PhysicalDeviceRecord,
    candidates: &[ComputeDeviceInfo],
) -> DeviceMatch {
    let uuid_hits: Vec<usize> = if render.device_uuid.is_nil() {
        Vec::new()
    } else {
        candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.uuid == Some(render.device_uuid))
            .map(|(i, _)| i)
            .collect()
    };

    if let Some(&first) = uuid_hits.first() {
        warn_if_ambiguous(render, candidates, &uuid_hits, "UUID");
        log::info!(
            "Matched render device '{}' to {} device '{}' by UUID {}",
            render.name,
            candidates[first].api,
            candidates[first].name,
            render.device_uuid
        );
        return DeviceMatch::ByUuid(first);
    }

    if let Some(luid) = render.luid {
        let luid_hits: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.luid.map(|l| l.bytes) == Some(luid.bytes))
            .map(|(i, _)| i)
            .collect();
        if let Some(&first) = luid_hits.first() {
            warn_if_ambiguous(render, candidates, &luid_hits, "LUID");
            log::info!(
                "Matched render device '{}' to {} device '{}' by LUID",
                render.name,
                candidates[first].api,
                candidates[first].name
            );
            return DeviceMatch::ByLuid(first);
        }
    }

    log::warn!(
        "No compute device among {} candidate(s) matches render device '{}'",
        candidates.len(),
        render.name
    );
    DeviceMatch::NotFound
}

fn warn_if_ambiguous(
    render: &PhysicalDeviceRecord,
    candidates: &[ComputeDeviceInfo],
    hits: &[usize],
    by: &str,
) {
    if hits.len() > 1 {
        let names: Vec<&str> = hits.iter().map(|&i| candidates[i].name.as_str()).collect();
        log::warn!(
            "{} compute devices share the {by} of render device '{}': {:?}; using the first",
            hits.len(),
            render.name,
            names
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ComputeApi;
    use crate::device::record::{DeviceLuid, DeviceUuid};
    use std::cell::RefCell;
    use std::sync::Once;

    thread_local! {
        static WARNINGS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    /// Collects warnings per test thread.
    struct WarningCapture;

    impl log::Log for WarningCapture {
        fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
            metadata.level() <= log::Level::Warn
        }

        fn log(&self, record: &log::Record<'_>) {
            if self.enabled(record.metadata()) {
                WARNINGS.with(|w| w.borrow_mut().push(record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    fn capture_warnings() {
        static INSTALL: Once = Once::new();
        static LOGGER: WarningCapture = WarningCapture;
        INSTALL.call_once(|| {
            if log::set_logger(&LOGGER).is_ok() {
                log::set_max_level(log::LevelFilter::Warn);
            }
        });
        WARNINGS.with(|w| w.borrow_mut().clear());
    }

    fn warnings() -> Vec<String> {
        WARNINGS.with(|w| w.borrow().clone())
    }

    fn uuid(seed: u8) -> DeviceUuid {
        DeviceUuid([seed; 16])
    }

    fn candidate(ordinal: usize, uuid: Option<DeviceUuid>, luid: Option<[u8; 8]>) -> ComputeDeviceInfo {
        ComputeDeviceInfo {
            api: ComputeApi::Cuda,
            ordinal,
            name: format!("gpu{ordinal}"),
            uuid,
            luid: luid.map(|bytes| DeviceLuid { bytes, node_mask: 1 }),
        }
    }

    fn render_device(uuid: DeviceUuid, luid: Option<[u8; 8]>) -> PhysicalDeviceRecord {
        PhysicalDeviceRecord {
            name: "render".to_string(),
            device_uuid: uuid,
            luid: luid.map(|bytes| DeviceLuid { bytes, node_mask: 1 }),
            ..Default::default()
        }
    }

    #[test]
    fn prefers_uuid_over_luid() {
        let render = render_device(uuid(7), Some([3; 8]));
        let candidates = [
            candidate(0, Some(uuid(1)), Some([3; 8])),
            candidate(1, Some(uuid(7)), None),
        ];
        assert_eq!(match_device(&render, &candidates), DeviceMatch::ByUuid(1));
    }

    #[test]
    fn falls_back_to_luid_when_render_reports_one() {
        let render = render_device(uuid(7), Some([3; 8]));
        let candidates = [candidate(0, None, Some([3; 8]))];
        assert_eq!(match_device(&render, &candidates), DeviceMatch::ByLuid(0));

        let render_without_luid = render_device(uuid(7), None);
        assert_eq!(
            match_device(&render_without_luid, &candidates),
            DeviceMatch::NotFound
        );
    }

    #[test]
    fn empty_candidate_list_is_not_found() {
        let render = render_device(uuid(7), None);
        assert_eq!(match_device(&render, &[]), DeviceMatch::NotFound);
        assert_eq!(DeviceMatch::NotFound.index(), None);
    }

    #[test]
    fn nil_uuid_never_matches() {
        let render = render_device(DeviceUuid::default(), None);
        let candidates = [candidate(0, Some(DeviceUuid::default()), None)];
        assert_eq!(match_device(&render, &candidates), DeviceMatch::NotFound);
    }

    #[test]
    fn ambiguous_uuid_returns_first() {
        let render = render_device(uuid(9), None);
        let candidates = [
            candidate(0, Some(uuid(1)), None),
            candidate(1, Some(uuid(9)), None),
            candidate(2, Some(uuid(9)), None),
        ];
        assert_eq!(match_device(&render, &candidates).index(), Some(1));
    }

    #[test]
    fn duplicate_uuid_warns_and_always_picks_the_first() {
        // --- Arrange ---
        capture_warnings();
        let render = render_device(uuid(4), None);
        let candidates = [
            candidate(0, Some(uuid(4)), None),
            candidate(1, Some(uuid(2)), None),
            candidate(2, Some(uuid(4)), None),
        ];

        // --- Act ---
        let matches: Vec<DeviceMatch> = (0..5).map(|_| match_device(&render, &candidates)).collect();

        // --- Assert ---
        assert!(matches.iter().all(|m| *m == DeviceMatch::ByUuid(0)));
        let warnings = warnings();
        assert_eq!(warnings.len(), 5);
        assert!(warnings[0].contains("2 compute devices share the UUID"), "{warnings:?}");
        assert!(warnings[0].contains("gpu0") && warnings[0].contains("gpu2"));
    }

    #[test]
    fn nil_uuid_falls_back_to_luid() {
        capture_warnings();
        let render = render_device(DeviceUuid::default(), Some([5; 8]));
        let candidates = [
            candidate(0, Some(DeviceUuid::default()), Some([1; 8])),
            candidate(1, None, Some([5; 8])),
        ];

        assert_eq!(match_device(&render, &candidates), DeviceMatch::ByLuid(1));
        assert!(warnings().is_empty());
    }

    #[test]
    fn no_uuid_or_luid_match_is_not_found() {
        // --- Arrange ---
        capture_warnings();
        let render = render_device(uuid(7), Some([3; 8]));
        let candidates = [
            candidate(0, Some(uuid(1)), Some([4; 8])),
            candidate(1, None, None),
        ];

        // --- Act ---
        let found = match_device(&render, &candidates);

        // --- Assert ---
        assert_eq!(found, DeviceMatch::NotFound);
        assert_eq!(found.index(), None);
        assert!(warnings().iter().any(|w| w.contains("No compute device among 2 candidate(s)")));
    }
}
