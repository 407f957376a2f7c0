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

//! Shader stage kinds and their inference from logical shader ids.

use bitflags::bitflags;
use std::fmt;

/// The programmable stage a shader module targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    /// Vertex stage.
    Vertex,
    /// Tessellation control (hull) stage.
    TesselationControl,
    /// Tessellation evaluation (domain) stage.
    TesselationEvaluation,
    /// Geometry stage.
    Geometry,
    /// Fragment (pixel) stage.
    Fragment,
    /// Compute stage.
    Compute,
    /// Ray generation stage.
    RayGen,
    /// Any-hit stage.
    AnyHit,
    /// Closest-hit stage.
    ClosestHit,
    /// Miss stage.
    Miss,
    /// Intersection stage.
    Intersection,
    /// Callable stage.
    Callable,
    /// Task stage (`GL_NV_mesh_shader`).
    TaskNv,
    /// Mesh stage (`GL_NV_mesh_shader`).
    MeshNv,
    /// Task stage (`GL_EXT_mesh_shader`).
    TaskExt,
    /// Mesh stage (`GL_EXT_mesh_shader`).
    MeshExt,
    /// The stage could not be inferred. Such modules never compile.
    Unknown,
}

// Order matters for the substring fallback: longer tags come before tags
// they contain.
const STAGE_TAGS: &[(&str, ShaderStage)] = &[
    ("tesselationcontrol", ShaderStage::TesselationControl),
    ("tesselationevaluation", ShaderStage::TesselationEvaluation),
    ("tessellationcontrol", ShaderStage::TesselationControl),
    ("tessellationevaluation", ShaderStage::TesselationEvaluation),
    ("vertex", ShaderStage::Vertex),
    ("fragment", ShaderStage::Fragment),
    ("geometry", ShaderStage::Geometry),
    ("compute", ShaderStage::Compute),
    ("raygen", ShaderStage::RayGen),
    ("anyhit", ShaderStage::AnyHit),
    ("closesthit", ShaderStage::ClosestHit),
    ("intersection", ShaderStage::Intersection),
    ("callable", ShaderStage::Callable),
    ("tasknv", ShaderStage::TaskNv),
    ("meshnv", ShaderStage::MeshNv),
    ("taskext", ShaderStage::TaskExt),
    ("meshext", ShaderStage::MeshExt),
    ("miss", ShaderStage::Miss),
];

impl ShaderStage {
    /// Infers the stage from a shader id such as `Blit.Fragment`.
    ///
    /// A case-insensitive suffix match is tried first, then a substring match
    /// (so `BlitPremulAlpha.FragmentBlitMS` resolves to [`ShaderStage::Fragment`]).
    pub fn infer_from_id(shader_id: &str) -> ShaderStage {
        let lower = shader_id.to_ascii_lowercase();
        STAGE_TAGS
            .iter()
            .find(|(tag, _)| lower.ends_with(tag))
            .or_else(|| STAGE_TAGS.iter().find(|(tag, _)| lower.contains(tag)))
            .map(|(_, stage)| *stage)
            .unwrap_or(ShaderStage::Unknown)
    }

    /// The `#define` injected at the top of every unit compiled for this stage.
    pub fn define_name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "VERTEX_SHADER",
            ShaderStage::TesselationControl => "TESSELATION_CONTROL_SHADER",
            ShaderStage::TesselationEvaluation => "TESSELATION_EVALUATION_SHADER",
            ShaderStage::Geometry => "GEOMETRY_SHADER",
            ShaderStage::Fragment => "FRAGMENT_SHADER",
            ShaderStage::Compute => "COMPUTE_SHADER",
            ShaderStage::RayGen => "RAYGEN_SHADER",
            ShaderStage::AnyHit => "ANYHIT_SHADER",
            ShaderStage::ClosestHit => "CLOSESTHIT_SHADER",
            ShaderStage::Miss => "MISS_SHADER",
            ShaderStage::Intersection => "INTERSECTION_SHADER",
            ShaderStage::Callable => "CALLABLE_SHADER",
            ShaderStage::TaskNv | ShaderStage::TaskExt => "TASK_SHADER",
            ShaderStage::MeshNv | ShaderStage::MeshExt => "MESH_SHADER",
            ShaderStage::Unknown => "UNKNOWN_SHADER",
        }
    }

    /// Whether the stage receives the model/view/projection uniform block.
    pub fn uses_mvp_block(self) -> bool {
        matches!(
            self,
            ShaderStage::Vertex
                | ShaderStage::Geometry
                | ShaderStage::Fragment
                | ShaderStage::MeshNv
                | ShaderStage::MeshExt
        )
    }

    /// Whether the stage declares a thread-group size.
    pub fn has_thread_groups(self) -> bool {
        matches!(
            self,
            ShaderStage::Compute
                | ShaderStage::TaskNv
                | ShaderStage::MeshNv
                | ShaderStage::TaskExt
                | ShaderStage::MeshExt
        )
    }

    /// The HLSL target profile for this stage, for shader model 6 (DXC) or 5 (FXC).
    ///
    /// Returns `None` for stages the given shader model cannot express.
    pub fn hlsl_profile(self, shader_model_6: bool) -> Option<&'static str> {
        let profile = match (self, shader_model_6) {
            (ShaderStage::Vertex, true) => "vs_6_0",
            (ShaderStage::Fragment, true) => "ps_6_0",
            (ShaderStage::Geometry, true) => "gs_6_0",
            (ShaderStage::TesselationControl, true) => "hs_6_0",
            (ShaderStage::TesselationEvaluation, true) => "ds_6_0",
            (ShaderStage::Compute, true) => "cs_6_0",
            (ShaderStage::TaskExt | ShaderStage::TaskNv, true) => "as_6_5",
            (ShaderStage::MeshExt | ShaderStage::MeshNv, true) => "ms_6_5",
            (
                ShaderStage::RayGen
                | ShaderStage::AnyHit
                | ShaderStage::ClosestHit
                | ShaderStage::Miss
                | ShaderStage::Intersection
                | ShaderStage::Callable,
                true,
            ) => "lib_6_3",
            (ShaderStage::Vertex, false) => "vs_5_0",
            (ShaderStage::Fragment, false) => "ps_5_0",
            (ShaderStage::Geometry, false) => "gs_5_0",
            (ShaderStage::TesselationControl, false) => "hs_5_0",
            (ShaderStage::TesselationEvaluation, false) => "ds_5_0",
            (ShaderStage::Compute, false) => "cs_5_0",
            _ => return None,
        };
        Some(profile)
    }

    /// The pipeline family this stage belongs to.
    pub fn pipeline_kind(self) -> Option<PipelineKind> {
        match self {
            ShaderStage::Compute => Some(PipelineKind::Compute),
            ShaderStage::Vertex
            | ShaderStage::TesselationControl
            | ShaderStage::TesselationEvaluation
            | ShaderStage::Geometry
            | ShaderStage::Fragment => Some(PipelineKind::Raster),
            ShaderStage::TaskNv | ShaderStage::MeshNv | ShaderStage::TaskExt | ShaderStage::MeshExt => {
                Some(PipelineKind::Mesh)
            }
            ShaderStage::RayGen
            | ShaderStage::AnyHit
            | ShaderStage::ClosestHit
            | ShaderStage::Miss
            | ShaderStage::Intersection
            | ShaderStage::Callable => Some(PipelineKind::RayTracing),
            ShaderStage::Unknown => None,
        }
    }

    /// The single-bit mask for this stage.
    pub fn mask(self) -> StageMask {
        match self {
            ShaderStage::Vertex => StageMask::VERTEX,
            ShaderStage::TesselationControl => StageMask::TESSELATION_CONTROL,
            ShaderStage::TesselationEvaluation => StageMask::TESSELATION_EVALUATION,
            ShaderStage::Geometry => StageMask::GEOMETRY,
            ShaderStage::Fragment => StageMask::FRAGMENT,
            ShaderStage::Compute => StageMask::COMPUTE,
            ShaderStage::RayGen => StageMask::RAYGEN,
            ShaderStage::AnyHit => StageMask::ANY_HIT,
            ShaderStage::ClosestHit => StageMask::CLOSEST_HIT,
            ShaderStage::Miss => StageMask::MISS,
            ShaderStage::Intersection => StageMask::INTERSECTION,
            ShaderStage::Callable => StageMask::CALLABLE,
            ShaderStage::TaskNv | ShaderStage::TaskExt => StageMask::TASK,
            ShaderStage::MeshNv | ShaderStage::MeshExt => StageMask::MESH,
            ShaderStage::Unknown => StageMask::empty(),
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The pipeline families a set of stages can be linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// A single compute stage.
    Compute,
    /// Classic vertex-driven rasterization.
    Raster,
    /// Task/mesh driven rasterization (may include a fragment stage).
    Mesh,
    /// A ray-tracing pipeline.
    RayTracing,
}

bitflags! {
    /// The set of stages a binding is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StageMask: u32 {
        /// Vertex stage.
        const VERTEX = 1 << 0;
        /// Tessellation control stage.
        const TESSELATION_CONTROL = 1 << 1;
        /// Tessellation evaluation stage.
        const TESSELATION_EVALUATION = 1 << 2;
        /// Geometry stage.
        const GEOMETRY = 1 << 3;
        /// Fragment stage.
        const FRAGMENT = 1 << 4;
        /// Compute stage.
        const COMPUTE = 1 << 5;
        /// Task stage.
        const TASK = 1 << 6;
        /// Mesh stage.
        const MESH = 1 << 7;
        /// Ray generation stage.
        const RAYGEN = 1 << 8;
        /// Any-hit stage.
        const ANY_HIT = 1 << 9;
        /// Closest-hit stage.
        const CLOSEST_HIT = 1 << 10;
        /// Miss stage.
        const MISS = 1 << 11;
        /// Intersection stage.
        const INTERSECTION = 1 << 12;
        /// Callable stage.
        const CALLABLE = 1 << 13;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_match_is_case_insensitive() {
        assert_eq!(ShaderStage::infer_from_id("Blit.Fragment"), ShaderStage::Fragment);
        assert_eq!(ShaderStage::infer_from_id("blit.VERTEX"), ShaderStage::Vertex);
        assert_eq!(ShaderStage::infer_from_id("Rt.ClosestHit"), ShaderStage::ClosestHit);
        assert_eq!(ShaderStage::infer_from_id("Lod.MeshExt"), ShaderStage::MeshExt);
        assert_eq!(
            ShaderStage::infer_from_id("Terrain.TesselationEvaluation"),
            ShaderStage::TesselationEvaluation
        );
    }

    #[test]
    fn substring_fallback_covers_blit_variants() {
        for id in [
            "BlitPremulAlpha.FragmentBlit",
            "BlitPremulAlpha.FragmentBlitMS",
            "BlitPremulAlpha.FragmentBlitDownscale",
            "BlitPremulAlpha.FragmentBlitDownscaleMS",
        ] {
            assert_eq!(ShaderStage::infer_from_id(id), ShaderStage::Fragment, "{id}");
        }
    }

    #[test]
    fn unrecognized_id_is_unknown() {
        assert_eq!(ShaderStage::infer_from_id("Blit.Pixel"), ShaderStage::Unknown);
        assert_eq!(ShaderStage::Unknown.pipeline_kind(), None);
    }

    #[test]
    fn mvp_block_only_for_graphics_stages() {
        assert!(ShaderStage::Vertex.uses_mvp_block());
        assert!(ShaderStage::MeshNv.uses_mvp_block());
        assert!(!ShaderStage::Compute.uses_mvp_block());
        assert!(!ShaderStage::RayGen.uses_mvp_block());
    }

    #[test]
    fn hlsl_profiles_by_shader_model() {
        assert_eq!(ShaderStage::Fragment.hlsl_profile(true), Some("ps_6_0"));
        assert_eq!(ShaderStage::Compute.hlsl_profile(false), Some("cs_5_0"));
        assert_eq!(ShaderStage::RayGen.hlsl_profile(false), None);
    }
}
