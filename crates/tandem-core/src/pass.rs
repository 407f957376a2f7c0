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

//! Render passes as a tagged variant with a small build state machine.
//!
//! A pass moves through `DirtyShader → DirtyData → Ready → Executed`. It is
//! only `Ready` once both the shader and data flags are clear; recording it
//! marks it `Executed` until the next frame begins.

use crate::error::InteropError;
use crate::resource::Extent3d;

/// The family-specific parameters of a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum PassKind {
    /// A compute dispatch.
    Compute {
        /// Number of thread groups dispatched.
        group_count: [u32; 3],
        /// Whether the output image follows the swapchain size.
        swapchain_sized: bool,
    },
    /// A rasterization pass drawing into framebuffers.
    Raster {
        /// Current framebuffer extent.
        extent: Extent3d,
    },
    /// A ray-tracing pass writing a storage image.
    RayTracing {
        /// Current launch extent.
        extent: Extent3d,
    },
}

/// Where a pass is in its build/execute cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// Shaders must be (re)loaded and pipelines rebuilt.
    DirtyShader,
    /// Descriptor sets, framebuffers or buffers must be rebuilt.
    DirtyData,
    /// The pass can be recorded.
    Ready,
    /// The pass was recorded this frame.
    Executed,
}

/// The backend operations a pass delegates to.
pub trait PassBackend {
    /// Loads shaders and builds the pipeline for `kind`.
    fn build_shaders(&mut self, name: &str, kind: &PassKind) -> Result<(), InteropError>;
    /// Builds descriptor sets, framebuffers and other size-dependent data.
    fn build_data(&mut self, name: &str, kind: &PassKind) -> Result<(), InteropError>;
    /// Records the pass.
    fn record(&mut self, name: &str, kind: &PassKind) -> Result<(), InteropError>;
}

/// A named render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Pass {
    name: String,
    kind: PassKind,
    shader_dirty: bool,
    data_dirty: bool,
    executed: bool,
}

impl Pass {
    /// Creates a pass with everything still to be built.
    pub fn new(name: impl Into<String>, kind: PassKind) -> Self {
        Pass {
            name: name.into(),
            kind,
            shader_dirty: true,
            data_dirty: true,
            executed: false,
        }
    }

    /// The pass name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pass variant.
    pub fn kind(&self) -> &PassKind {
        &self.kind
    }

    /// The current state.
    pub fn state(&self) -> PassState {
        if self.shader_dirty {
            PassState::DirtyShader
        } else if self.data_dirty {
            PassState::DirtyData
        } else if self.executed {
            PassState::Executed
        } else {
            PassState::Ready
        }
    }

    /// Requests a shader reload, e.g. after the shader cache was invalidated.
    pub fn mark_shader_dirty(&mut self) {
        self.shader_dirty = true;
        self.data_dirty = true;
    }

    /// Requests a data rebuild.
    pub fn mark_data_dirty(&mut self) {
        self.data_dirty = true;
    }

    /// Starts a new frame: an executed pass becomes ready again.
    pub fn begin_frame(&mut self) {
        self.executed = false;
    }

    /// Rebuilds whatever is dirty. Returns `true` if anything was rebuilt.
    pub fn build_if_necessary(&mut self, backend: &mut dyn PassBackend) -> Result<bool, InteropError> {
        let mut rebuilt = false;
        if self.shader_dirty {
            backend.build_shaders(&self.name, &self.kind)?;
            self.shader_dirty = false;
            rebuilt = true;
        }
        if self.data_dirty {
            backend.build_data(&self.name, &self.kind)?;
            self.data_dirty = false;
            rebuilt = true;
        }
        Ok(rebuilt)
    }

    /// Records the pass. It must be `Ready`.
    pub fn render(&mut self, backend: &mut dyn PassBackend) -> Result<(), InteropError> {
        match self.state() {
            PassState::Ready => {
                backend.record(&self.name, &self.kind)?;
                self.executed = true;
                Ok(())
            }
            state => Err(InteropError::precondition(format!(
                "pass '{}' cannot be rendered in state {state:?}",
                self.name
            ))),
        }
    }

    /// Reacts to a swapchain resize.
    pub fn recreate_swapchain(&mut self, extent: Extent3d) {
        match &mut self.kind {
            PassKind::Compute {
                swapchain_sized, ..
            } => {
                if *swapchain_sized {
                    self.data_dirty = true;
                }
            }
            PassKind::Raster { extent: current } | PassKind::RayTracing { extent: current } => {
                if *current != extent {
                    *current = extent;
                    self.data_dirty = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingBackend {
        shaders: usize,
        data: usize,
        records: usize,
    }

    impl PassBackend for CountingBackend {
        fn build_shaders(&mut self, _: &str, _: &PassKind) -> Result<(), InteropError> {
            self.shaders += 1;
            Ok(())
        }
        fn build_data(&mut self, _: &str, _: &PassKind) -> Result<(), InteropError> {
            self.data += 1;
            Ok(())
        }
        fn record(&mut self, _: &str, _: &PassKind) -> Result<(), InteropError> {
            self.records += 1;
            Ok(())
        }
    }

    #[test]
    fn walks_through_all_states() {
        let mut backend = CountingBackend::default();
        let mut pass = Pass::new(
            "blit",
            PassKind::Raster {
                extent: Extent3d::new_2d(64, 64),
            },
        );
        assert_eq!(pass.state(), PassState::DirtyShader);
        assert!(pass.render(&mut backend).is_err());

        assert!(pass.build_if_necessary(&mut backend).unwrap());
        assert_eq!(pass.state(), PassState::Ready);
        assert!(!pass.build_if_necessary(&mut backend).unwrap());

        pass.render(&mut backend).unwrap();
        assert_eq!(pass.state(), PassState::Executed);
        pass.begin_frame();
        assert_eq!(pass.state(), PassState::Ready);
        assert_eq!((backend.shaders, backend.data, backend.records), (1, 1, 1));
    }

    #[test]
    fn data_dirty_without_shader_dirty() {
        let mut backend = CountingBackend::default();
        let mut pass = Pass::new(
            "trace",
            PassKind::RayTracing {
                extent: Extent3d::new_2d(64, 64),
            },
        );
        pass.build_if_necessary(&mut backend).unwrap();
        pass.recreate_swapchain(Extent3d::new_2d(128, 64));
        assert_eq!(pass.state(), PassState::DirtyData);
        pass.build_if_necessary(&mut backend).unwrap();
        assert_eq!(backend.shaders, 1);
        assert_eq!(backend.data, 2);
    }

    #[test]
    fn fixed_size_compute_ignores_resize() {
        let mut backend = CountingBackend::default();
        let mut pass = Pass::new(
            "reduce",
            PassKind::Compute {
                group_count: [16, 1, 1],
                swapchain_sized: false,
            },
        );
        pass.build_if_necessary(&mut backend).unwrap();
        pass.recreate_swapchain(Extent3d::new_2d(1, 1));
        assert_eq!(pass.state(), PassState::Ready);
    }
}
