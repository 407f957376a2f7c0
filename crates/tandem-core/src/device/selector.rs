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

//! User-facing render device selection with change detection.
//!
//! The selector fingerprints the set of render devices present on the
//! machine. A persisted choice is only honored while the fingerprint is
//! unchanged, so adding or removing a GPU falls back to the default device.

use serde::{Deserialize, Serialize};

/// A persisted device choice, keyed by the hardware configuration it was made on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSelection {
    /// Hex fingerprint of the device set, see [`DeviceSelector::configuration_hash`].
    pub configuration_hash: String,
    /// The name of the chosen render device.
    pub device_name: String,
}

/// What the host application must do after the user picks a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// The chosen device is already active.
    Unchanged,
    /// The choice was recorded; it takes effect after a restart.
    RestartRequired(DeviceSelection),
    /// The name does not belong to any enumerated device.
    UnknownDevice,
}

/// Tracks the render devices available and the one currently in use.
#[derive(Debug, Clone)]
pub struct DeviceSelector {
    device_names: Vec<String>,
    active: usize,
    configuration_hash: String,
}

impl DeviceSelector {
    /// Creates a selector over the enumerated render devices, with `active` in use.
    pub fn new(device_names: Vec<String>, active: usize) -> Self {
        let configuration_hash = Self::hash_device_names(&device_names);
        DeviceSelector {
            device_names,
            active,
            configuration_hash,
        }
    }

    /// Fingerprints a device set: BLAKE3 over the sorted names joined by newlines.
    pub fn hash_device_names(names: &[String]) -> String {
        let mut sorted: Vec<&str> = names.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        blake3::hash(sorted.join("\n").as_bytes()).to_hex().to_string()
    }

    /// The fingerprint of the device set this selector was built from.
    pub fn configuration_hash(&self) -> &str {
        &self.configuration_hash
    }

    /// The enumerated device names, in enumeration order.
    pub fn device_names(&self) -> &[String] {
        &self.device_names
    }

    /// The index of the device in use.
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Resolves a persisted selection to a device index.
    ///
    /// Returns `None` when the selection was made on a different hardware
    /// configuration or names a device that is no longer present.
    pub fn resolve(&self, selection: &DeviceSelection) -> Option<usize> {
        if selection.configuration_hash != self.configuration_hash {
            log::info!(
                "Ignoring persisted device selection '{}': device configuration changed",
                selection.device_name
            );
            return None;
        }
        self.device_names
            .iter()
            .position(|n| *n == selection.device_name)
    }

    /// Records the user's choice of `device_name`.
    ///
    /// The selector never switches devices itself; it only tells the caller a
    /// restart is needed and hands back the selection to persist.
    pub fn select(&self, device_name: &str) -> SelectionOutcome {
        let Some(index) = self.device_names.iter().position(|n| n == device_name) else {
            return SelectionOutcome::UnknownDevice;
        };
        if index == self.active {
            return SelectionOutcome::Unchanged;
        }
        log::info!("Render device '{device_name}' selected; restart required");
        SelectionOutcome::RestartRequired(DeviceSelection {
            configuration_hash: self.configuration_hash.clone(),
            device_name: device_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hash_ignores_enumeration_order() {
        let a = DeviceSelector::hash_device_names(&names(&["GPU B", "GPU A"]));
        let b = DeviceSelector::hash_device_names(&names(&["GPU A", "GPU B"]));
        assert_eq!(a, b);
        let c = DeviceSelector::hash_device_names(&names(&["GPU A"]));
        assert_ne!(a, c);
    }

    #[test]
    fn selecting_other_device_requests_restart() {
        let selector = DeviceSelector::new(names(&["GPU A", "GPU B"]), 0);
        assert_eq!(selector.select("GPU A"), SelectionOutcome::Unchanged);
        assert_eq!(selector.select("GPU C"), SelectionOutcome::UnknownDevice);
        match selector.select("GPU B") {
            SelectionOutcome::RestartRequired(sel) => {
                assert_eq!(sel.device_name, "GPU B");
                assert_eq!(sel.configuration_hash, selector.configuration_hash());
                assert_eq!(selector.resolve(&sel), Some(1));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn stale_selection_is_ignored() {
        let old = DeviceSelector::new(names(&["GPU A", "GPU B"]), 0);
        let SelectionOutcome::RestartRequired(sel) = old.select("GPU B") else {
            panic!("expected a restart request");
        };
        let new = DeviceSelector::new(names(&["GPU A", "GPU B", "GPU C"]), 0);
        assert_eq!(new.resolve(&sel), None);
    }

    #[test]
    fn selection_round_trips_through_json() {
        let sel = DeviceSelection {
            configuration_hash: "abc".to_string(),
            device_name: "GPU \"quoted\"\n\ttab\\".to_string(),
        };
        let text = serde_json::to_string(&sel).unwrap();
        let back: DeviceSelection = serde_json::from_str(&text).unwrap();
        assert_eq!(sel, back);
    }

    #[test]
    fn every_supported_json_value_round_trips() {
        // --- Arrange ---
        let value = serde_json::json!({
            "null": null,
            "integers": [0, -1, i64::MIN, i64::MAX, u64::MAX],
            "doubles": [0.5, -1234.25, 3.0e10, -0.0078125],
            "booleans": [true, false],
            "strings": [
                "",
                "back\\slash \"quoted\"",
                "line\nbreak\r\ttab",
                "Grafikkarte für 日本語 ✓ 🎮"
            ],
            "nested": {
                "empty_array": [],
                "empty_object": {},
                "deep": [[1, [2, [3]]], {"a": {"b": [null, {"c": "d"}]}}]
            }
        });

        // --- Act ---
        let compact: serde_json::Value = serde_json::from_str(&serde_json::to_string(&value).unwrap()).unwrap();
        let pretty: serde_json::Value =
            serde_json::from_str(&serde_json::to_string_pretty(&value).unwrap()).unwrap();

        // --- Assert ---
        assert_eq!(compact, value);
        assert_eq!(pretty, value);
        assert_eq!(compact["integers"][2].as_i64(), Some(i64::MIN));
        assert_eq!(compact["integers"][4].as_u64(), Some(u64::MAX));
        assert_eq!(compact["doubles"][2].as_f64(), Some(3.0e10));
        assert_eq!(compact["strings"][3].as_str(), Some("Grafikkarte für 日本語 ✓ 🎮"));
    }

    #[test]
    fn selection_with_unknown_fields_is_rejected() {
        let text = r#"{"configuration_hash":"abc","device_name":"GPU A","device_index":1}"#;
        assert!(serde_json::from_str::<DeviceSelection>(text).is_err());
    }
}
