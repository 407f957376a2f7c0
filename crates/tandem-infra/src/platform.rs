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

//! OS-level helpers: closing exported handles and detecting WSL.

use tandem_core::resource::RawHandle;

/// Closes an OS handle produced by a memory or semaphore export.
///
/// Errors are logged, not returned: this runs from destructors.
pub fn close_raw_handle(handle: RawHandle) {
    match handle {
        RawHandle::Fd(fd) => close_fd(fd),
        RawHandle::Win32(raw) => close_win32(raw),
    }
}

#[cfg(unix)]
fn close_fd(fd: i32) {
    if fd < 0 {
        return;
    }
    // SAFETY: the descriptor was produced by an export and is owned by the caller.
    let result = unsafe { libc::close(fd) };
    if result != 0 {
        log::warn!(
            "Failed to close exported file descriptor {fd}: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn close_fd(fd: i32) {
    log::warn!("Ignoring file descriptor {fd} on a platform without POSIX descriptors");
}

#[cfg(windows)]
fn close_win32(raw: usize) {
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    if raw == 0 {
        return;
    }
    // SAFETY: the handle was produced by an export and is owned by the caller.
    if let Err(e) = unsafe { CloseHandle(HANDLE(raw as *mut std::ffi::c_void)) } {
        log::warn!("Failed to close exported NT handle {raw:#x}: {e}");
    }
}

#[cfg(not(windows))]
fn close_win32(raw: usize) {
    log::warn!("Ignoring NT handle {raw:#x} on a non-Windows platform");
}

/// Whether the process runs inside the Windows Subsystem for Linux.
pub fn running_under_wsl() -> bool {
    if !cfg!(target_os = "linux") {
        return false;
    }
    std::fs::read_to_string("/proc/version")
        .map(|version| is_wsl_kernel(&version))
        .unwrap_or(false)
}

fn is_wsl_kernel(proc_version: &str) -> bool {
    proc_version.to_ascii_lowercase().contains("microsoft")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wsl_kernels_are_recognized() {
        assert!(is_wsl_kernel(
            "Linux version 5.15.153.1-microsoft-standard-WSL2 (root@1c602f52c2e4)"
        ));
        assert!(!is_wsl_kernel("Linux version 6.8.0-45-generic (buildd@lcy02-amd64-075)"));
    }

    #[cfg(unix)]
    #[test]
    fn closing_a_negative_fd_is_a_no_op() {
        close_raw_handle(RawHandle::Fd(-1));
    }
}
