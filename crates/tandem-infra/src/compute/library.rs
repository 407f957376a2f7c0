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

//! Runtime loading of driver libraries into reference-counted function tables.

use libloading::Library;
use std::sync::{Arc, Mutex, Weak};
use tandem_core::{ComputeApi, InteropError};

/// A process-wide slot holding at most one loaded function table.
///
/// [`LibrarySlot::acquire`] loads the table on first use and hands out
/// strong references afterwards. The slot itself only keeps a weak
/// reference, so the library is unloaded as soon as the last user drops its
/// table, and the next `acquire` loads it again.
pub(crate) struct LibrarySlot<T> {
    slot: Mutex<Weak<T>>,
}

impl<T> LibrarySlot<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slot: Mutex::new(Weak::new()),
        }
    }

    /// Returns the live table, loading it with `load` if there is none.
    pub(crate) fn acquire(
        &self,
        load: impl FnOnce() -> Result<T, InteropError>,
    ) -> Result<Arc<T>, InteropError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| InteropError::precondition("driver library slot poisoned"))?;
        if let Some(table) = slot.upgrade() {
            return Ok(table);
        }
        let table = Arc::new(load()?);
        *slot = Arc::downgrade(&table);
        Ok(table)
    }

    /// Whether a table is currently loaded.
    pub(crate) fn is_loaded(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.strong_count() > 0)
            .unwrap_or(false)
    }
}

/// Opens the first library in `candidates` that the dynamic loader finds.
pub(crate) fn open_library(api: ComputeApi, candidates: &[&str]) -> Result<Library, InteropError> {
    let mut failures = Vec::with_capacity(candidates.len());
    for name in candidates {
        // SAFETY: driver libraries run no initialisation that depends on our state.
        match unsafe { Library::new(name) } {
            Ok(library) => {
                log::info!("Loaded {api} driver library '{name}'");
                return Ok(library);
            }
            Err(e) => failures.push(format!("{name}: {e}")),
        }
    }
    log::info!("{api} is unavailable: no driver library could be loaded");
    Err(InteropError::not_supported(format!(
        "{api} driver library not found ({})",
        failures.join("; ")
    )))
}

/// Resolves `name` in `library` as a value of type `T` (a function pointer).
pub(crate) fn symbol<T: Copy>(
    library: &Library,
    api: ComputeApi,
    name: &str,
) -> Result<T, InteropError> {
    // SAFETY: `T` is the documented C signature of `name`.
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|sym| *sym)
        .map_err(|e| {
            InteropError::not_supported(format!("{api} driver library lacks '{name}': {e}"))
        })
}

/// Like [`symbol`], for entry points only newer drivers export.
pub(crate) fn optional_symbol<T: Copy>(library: &Library, name: &str) -> Option<T> {
    // SAFETY: `T` is the documented C signature of `name`.
    unsafe { library.get::<T>(name.as_bytes()) }
        .ok()
        .map(|sym| *sym)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Table {
        generation: usize,
    }

    #[test]
    fn acquire_shares_one_table_until_the_last_guard_drops() {
        // --- Arrange ---
        let slot: LibrarySlot<Table> = LibrarySlot::new();
        let loads = AtomicUsize::new(0);
        let load = || {
            Ok(Table {
                generation: loads.fetch_add(1, Ordering::SeqCst),
            })
        };

        // --- Act ---
        let first = slot.acquire(load).unwrap();
        let second = slot.acquire(load).unwrap();

        // --- Assert ---
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(slot.is_loaded());

        drop(first);
        assert!(slot.is_loaded());
        drop(second);
        assert!(!slot.is_loaded());

        let reloaded = slot.acquire(load).unwrap();
        assert_eq!(reloaded.generation, 1);
    }

    #[test]
    fn failed_load_leaves_the_slot_empty() {
        let slot: LibrarySlot<Table> = LibrarySlot::new();
        let err = slot
            .acquire(|| Err(InteropError::not_supported("no driver")))
            .err()
            .unwrap();
        assert_eq!(err.kind(), tandem_core::ErrorKind::NotSupported);
        assert!(!slot.is_loaded());
    }

    #[test]
    fn missing_library_is_not_supported() {
        let err = open_library(ComputeApi::Cuda, &["libtandem-does-not-exist.so.0"])
            .err()
            .unwrap();
        assert_eq!(err.kind(), tandem_core::ErrorKind::NotSupported);
        assert!(err.to_string().contains("libtandem-does-not-exist"));
    }
}
