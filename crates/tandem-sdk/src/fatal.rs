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

//! The fatal-error signal raised to the host application.
//!
//! Nothing in the interop stack exits the process. Errors the propagation
//! policy treats as fatal (precondition violations and unexpected driver
//! failures) are handed to the installed [`FatalErrorHandler`], which may
//! choose to abort. The error is still returned to the caller afterwards.

use std::error::Error;
use std::sync::{PoisonError, RwLock};
use tandem_core::{ErrorKind, InteropError};

/// Receives fatal errors.
pub trait FatalErrorHandler: Send + Sync {
    /// Called once per fatal error, before it is returned to the caller.
    fn on_fatal(&self, kind: ErrorKind, error: &(dyn Error + 'static));
}

/// The default handler: logs at `error` level and lets the caller continue.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFatalErrors;

impl FatalErrorHandler for LogFatalErrors {
    fn on_fatal(&self, kind: ErrorKind, error: &(dyn Error + 'static)) {
        log::error!("Fatal {kind:?} error: {error}");
    }
}

static HANDLER: RwLock<Option<Box<dyn FatalErrorHandler>>> = RwLock::new(None);

/// Installs `handler`, replacing the previous one.
pub fn set_fatal_handler(handler: Box<dyn FatalErrorHandler>) {
    *HANDLER.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
}

/// Restores the default logging handler.
pub fn reset_fatal_handler() {
    *HANDLER.write().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Whether errors of `kind` raise the fatal-error signal.
pub fn is_fatal(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::Precondition | ErrorKind::DriverFailure)
}

/// Signals `error` to the installed handler.
pub fn raise(kind: ErrorKind, error: &(dyn Error + 'static)) {
    match HANDLER.read().unwrap_or_else(PoisonError::into_inner).as_deref() {
        Some(handler) => handler.on_fatal(kind, error),
        None => LogFatalErrors.on_fatal(kind, error),
    }
}

/// Signals `error` if its kind is fatal, then hands it back.
pub(crate) fn escalate(error: InteropError) -> InteropError {
    let kind = error.kind();
    if is_fatal(kind) {
        raise(kind, &error);
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting(Arc<AtomicUsize>);

    impl FatalErrorHandler for Counting {
        fn on_fatal(&self, _kind: ErrorKind, _error: &(dyn Error + 'static)) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn only_fatal_kinds_reach_the_handler() {
        // --- Arrange ---
        let count = Arc::new(AtomicUsize::new(0));
        set_fatal_handler(Box::new(Counting(Arc::clone(&count))));

        // --- Act ---
        escalate(InteropError::not_supported("no bindless images"));
        escalate(InteropError::precondition("extent mismatch"));
        reset_fatal_handler();
        escalate(InteropError::precondition("after reset"));

        // --- Assert ---
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
