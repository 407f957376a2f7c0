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

//! JSON persistence of the user's render device choice.

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tandem_core::device::{DeviceSelection, DeviceSelector};

/// Reads a persisted selection. A missing file is not an error; a file that
/// is not exactly a selection object is.
pub fn load_selection(path: &Path) -> Result<Option<DeviceSelection>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("reading device selection '{}'", path.display()))
        }
    };
    let selection = serde_json::from_str(&text)
        .with_context(|| format!("parsing device selection '{}'", path.display()))?;
    Ok(Some(selection))
}

/// Writes `selection`, creating parent directories as needed.
pub fn store_selection(path: &Path, selection: &DeviceSelection) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(selection).context("serializing device selection")?;
    fs::write(path, text)
        .with_context(|| format!("writing device selection '{}'", path.display()))?;
    log::info!(
        "Stored render device selection '{}' in '{}'",
        selection.device_name,
        path.display()
    );
    Ok(())
}

/// Picks the render device to open among `device_names`.
///
/// A persisted choice wins while the device set is unchanged; otherwise the
/// first device is used. Unreadable selection files are logged and ignored.
pub fn choose_device(device_names: Vec<String>, selection_file: Option<&Path>) -> DeviceSelector {
    let persisted = selection_file.and_then(|path| match load_selection(path) {
        Ok(selection) => selection,
        Err(e) => {
            log::warn!("Ignoring device selection: {e:#}");
            None
        }
    });
    let current = DeviceSelector::new(device_names, 0);
    let active = persisted
        .as_ref()
        .and_then(|selection| current.resolve(selection))
        .unwrap_or(0);
    DeviceSelector::new(current.device_names().to_vec(), active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::device::SelectionOutcome;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_file_means_no_selection() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_selection(&dir.path().join("selection.json")).unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn stored_selection_is_used_on_next_start() {
        // --- Arrange ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings").join("selection.json");
        let first_run = choose_device(names(&["GPU A", "GPU B"]), Some(&path));
        let SelectionOutcome::RestartRequired(selection) = first_run.select("GPU B") else {
            panic!("expected a restart request");
        };

        // --- Act ---
        store_selection(&path, &selection).unwrap();
        let second_run = choose_device(names(&["GPU A", "GPU B"]), Some(&path));

        // --- Assert ---
        assert_eq!(first_run.active_index(), 0);
        assert_eq!(second_run.active_index(), 1);
    }

    #[test]
    fn corrupt_file_falls_back_to_first_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selection.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_selection(&path).is_err());
        assert_eq!(choose_device(names(&["GPU A", "GPU B"]), Some(&path)).active_index(), 0);
    }

    #[test]
    fn malformed_selection_files_are_errors_not_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            ("unknown_field", r#"{"configuration_hash":"abc","device_name":"GPU A","extra":true}"#),
            ("missing_field", r#"{"device_name":"GPU A"}"#),
            ("wrong_type", r#"{"configuration_hash":7,"device_name":"GPU A"}"#),
            ("wrong_shape", r#"["abc","GPU A"]"#),
            ("null", "null"),
            ("empty", ""),
        ];

        for (name, text) in cases {
            let path = dir.path().join(format!("{name}.json"));
            fs::write(&path, text).unwrap();

            let err = load_selection(&path).expect_err(name);

            assert!(format!("{err:#}").contains("parsing device selection"), "{name}: {err:#}");
        }
    }
}
