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

//! Logging bootstrap for binaries and tests.

use env_logger::{Builder, Env};

/// Installs the `env_logger` backend for the `log` facade.
///
/// The filter comes from `RUST_LOG` and defaults to `info`; wgpu's HAL is
/// capped at errors. Calling it again is harmless.
pub fn init_logging() {
    let _ = Builder::from_env(Env::default().default_filter_or("info"))
        .filter_module("wgpu_hal", log::LevelFilter::Error)
        .try_init();
}

/// Like [`init_logging`], with output captured by the test harness.
pub fn init_test_logging() {
    let _ = Builder::from_env(Env::default().default_filter_or("debug"))
        .filter_module("wgpu_hal", log::LevelFilter::Error)
        .is_test(true)
        .try_init();
}
