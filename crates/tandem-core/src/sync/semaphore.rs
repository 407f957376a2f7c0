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

//! Semaphore kinds, requests and wait outcomes.

use std::fmt;

/// Timeout value meaning "wait forever".
pub const INFINITE_TIMEOUT: u64 = u64::MAX;

/// The two flavours of shared synchronization object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SemaphoreKind {
    /// A 64-bit monotonically non-decreasing counter; waits are non-destructive.
    #[default]
    Timeline,
    /// A single-consumer signal; each signal is paired with exactly one wait.
    Binary,
}

/// A request for a shared semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreDesc {
    /// Binary or timeline.
    pub kind: SemaphoreKind,
    /// Initial counter value (timeline only).
    pub initial_value: u64,
    /// Export the semaphore to the compute API.
    pub exportable: bool,
}

impl SemaphoreDesc {
    /// An exportable timeline semaphore starting at zero.
    pub fn timeline() -> Self {
        SemaphoreDesc {
            kind: SemaphoreKind::Timeline,
            initial_value: 0,
            exportable: true,
        }
    }

    /// An exportable binary semaphore.
    pub fn binary() -> Self {
        SemaphoreDesc {
            kind: SemaphoreKind::Binary,
            initial_value: 0,
            exportable: true,
        }
    }
}

/// The outcome of a bounded CPU wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The semaphore reached the target value.
    Signaled,
    /// The timeout elapsed first. The semaphore is untouched.
    TimedOut,
    /// The driver reported an error while waiting.
    WaitFailed,
}

impl fmt::Display for WaitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitStatus::Signaled => write!(f, "signaled"),
            WaitStatus::TimedOut => write!(f, "timed out"),
            WaitStatus::WaitFailed => write!(f, "wait failed"),
        }
    }
}
