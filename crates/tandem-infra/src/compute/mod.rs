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

//! Compute APIs loaded at runtime.
//!
//! Each API lives behind a function table resolved with `libloading` on
//! first use. Tables are shared process-wide and unloaded when the last
//! backend or device referencing them is dropped.

pub mod cuda;
mod external;
pub mod hip;
pub mod level_zero;
pub(crate) mod library;
pub mod opencl;

pub use cuda::{CudaBackend, CudaDevice};
pub use hip::{HipBackend, HipComputeDevice};
pub use level_zero::{LevelZeroBackend, LevelZeroDevice};
pub use opencl::{OpenClBackend, OpenClDevice};

use std::sync::Arc;
use tandem_core::traits::ComputeBackend;
use tandem_core::{ComputeApi, InteropError};

/// Loads the driver library of `api` and returns its backend.
///
/// ## Errors
/// * `InteropError::NotSupported` - If the driver library (or one of its
///   required entry points) is missing, or for SYCL, which has no C ABI.
/// * `InteropError::Driver` - If the driver fails to initialize.
pub fn load_backend(api: ComputeApi) -> Result<Arc<dyn ComputeBackend>, InteropError> {
    let backend: Arc<dyn ComputeBackend> = match api {
        ComputeApi::Cuda => Arc::new(CudaBackend::load()?),
        ComputeApi::Hip => Arc::new(HipBackend::load()?),
        ComputeApi::LevelZero => Arc::new(LevelZeroBackend::load()?),
        ComputeApi::OpenCl => Arc::new(OpenClBackend::load()?),
        ComputeApi::Sycl => {
            return Err(InteropError::not_supported(
                "SYCL exposes no C entry points to load",
            ))
        }
    };
    Ok(backend)
}

/// Whether the driver library of `api` is currently loaded by some live object.
pub fn is_loaded(api: ComputeApi) -> bool {
    match api {
        ComputeApi::Cuda => cuda::CUDA.is_loaded(),
        ComputeApi::Hip => hip::HIP.is_loaded(),
        ComputeApi::LevelZero => level_zero::LEVEL_ZERO.is_loaded(),
        ComputeApi::OpenCl => opencl::OPENCL.is_loaded(),
        ComputeApi::Sycl => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::ErrorKind;

    #[test]
    fn sycl_is_not_exposed() {
        let err = load_backend(ComputeApi::Sycl).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert!(!is_loaded(ComputeApi::Sycl));
    }

    #[test]
    fn loading_either_succeeds_or_reports_not_supported() {
        for api in [
            ComputeApi::Cuda,
            ComputeApi::Hip,
            ComputeApi::LevelZero,
            ComputeApi::OpenCl,
        ] {
            match load_backend(api) {
                Ok(backend) => {
                    assert_eq!(backend.api(), api);
                    assert!(is_loaded(api));
                }
                Err(e) => {
                    println!("skipping {api}: {e}");
                    assert!(matches!(
                        e.kind(),
                        ErrorKind::NotSupported | ErrorKind::DriverFailure
                    ));
                }
            }
        }
    }
}
