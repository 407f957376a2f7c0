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

//! One-time `env_logger` setup.

use env_logger::{Builder, Env};
use serde::{Deserialize, Serialize};
use std::sync::Once;

static INIT: Once = Once::new();

/// How log output is filtered and formatted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `env_logger` filter such as `"info,tandem_infra=debug"`.
    /// When `None`, `RUST_LOG` is read, then `info` is used.
    pub filter: Option<String>,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            timestamps: true,
        }
    }
}

/// Installs the global logger. Later calls do nothing.
///
/// If the host already installed another `log` implementation, that one
/// stays in place.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = match &config.filter {
            Some(filter) => {
                let mut builder = Builder::new();
                builder.parse_filters(filter);
                builder
            }
            None => Builder::from_env(Env::default().default_filter_or("info")),
        };
        if !config.timestamps {
            builder.format_timestamp(None);
        }
        match builder.try_init() {
            Ok(()) => log::debug!("Logging initialized ({:?})", config.filter),
            Err(e) => log::debug!("Keeping the existing logger: {e}"),
        }
    });
}
