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

//! DXBC container reflection (`RDEF` resources and constant buffers, plus
//! the `dcl_thread_group` declaration from the shader program chunk).

use super::ReflectionData;
use tandem_core::shader::{BindingInfo, BindingKind, ShaderStage, VariableInfo};
use thiserror::Error;

const CONTAINER_HEADER: usize = 32;
const CB_DESC_SIZE: usize = 24;
const RESOURCE_DESC_SIZE: usize = 32;
const RESOURCE_DESC_SIZE_51: usize = 40;
const VARIABLE_DESC_SIZE: usize = 24;
const VARIABLE_DESC_SIZE_50: usize = 40;

const SIT_CBUFFER: u32 = 0;

const OPCODE_CUSTOMDATA: u32 = 0x35;
const OPCODE_DCL_THREAD_GROUP: u32 = 0x9b;

/// Errors raised while reading a DXBC container.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DxbcError {
    /// The container does not start with `DXBC`.
    #[error("missing DXBC magic")]
    BadMagic,
    /// A read went past the end of the container or chunk.
    #[error("read of {len} bytes at offset {offset} is out of bounds")]
    OutOfBounds {
        /// Byte offset of the read.
        offset: usize,
        /// Bytes requested.
        len: usize,
    },
    /// A required chunk is absent.
    #[error("container has no {0} chunk")]
    MissingChunk(&'static str),
    /// A name is not nul-terminated.
    #[error("string at offset {0} is not terminated")]
    UnterminatedString(usize),
}

fn slice(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], DxbcError> {
    offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or(DxbcError::OutOfBounds { offset, len })
}

fn u32_at(bytes: &[u8], offset: usize) -> Result<u32, DxbcError> {
    let b = slice(bytes, offset, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn cstring_at(bytes: &[u8], offset: usize) -> Result<String, DxbcError> {
    let tail = bytes
        .get(offset..)
        .ok_or(DxbcError::OutOfBounds { offset, len: 1 })?;
    let end = tail
        .iter()
        .position(|b| *b == 0)
        .ok_or(DxbcError::UnterminatedString(offset))?;
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// Finds a chunk by its four-character code.
fn find_chunk<'a>(bytes: &'a [u8], fourcc: &[u8; 4]) -> Result<Option<&'a [u8]>, DxbcError> {
    if slice(bytes, 0, 4)? != b"DXBC" {
        return Err(DxbcError::BadMagic);
    }
    let count = u32_at(bytes, 28)? as usize;
    for i in 0..count {
        let offset = u32_at(bytes, CONTAINER_HEADER + i * 4)? as usize;
        if slice(bytes, offset, 4)? == fourcc {
            let size = u32_at(bytes, offset + 4)? as usize;
            return slice(bytes, offset + 8, size).map(Some);
        }
    }
    Ok(None)
}

struct ConstantBuffer {
    name: String,
    size: u32,
    variables: Vec<(String, u32, u32)>,
}

fn binding_kind(input_type: u32) -> Option<BindingKind> {
    Some(match input_type {
        SIT_CBUFFER => BindingKind::UniformBuffer,
        2 => BindingKind::SampledImage,
        3 => BindingKind::Sampler,
        4 => BindingKind::StorageImage,
        1 | 5..=11 => BindingKind::StorageBuffer,
        12 => BindingKind::AccelerationStructure,
        _ => return None,
    })
}

fn parse_constant_buffers(
    rdef: &[u8],
    count: usize,
    offset: usize,
    variable_desc_size: usize,
) -> Result<Vec<ConstantBuffer>, DxbcError> {
    let mut out = Vec::with_capacity(count.min(64));
    for i in 0..count {
        let desc = slice(rdef, offset + i * CB_DESC_SIZE, CB_DESC_SIZE)?;
        let name = cstring_at(rdef, u32_at(desc, 0)? as usize)?;
        let var_count = u32_at(desc, 4)? as usize;
        let var_offset = u32_at(desc, 8)? as usize;
        let size = u32_at(desc, 12)?;

        let mut variables = Vec::with_capacity(var_count.min(256));
        for v in 0..var_count {
            let var = slice(rdef, var_offset + v * variable_desc_size, variable_desc_size)?;
            let var_name = cstring_at(rdef, u32_at(var, 0)? as usize)?;
            variables.push((var_name, u32_at(var, 4)?, u32_at(var, 8)?));
        }
        out.push(ConstantBuffer {
            name,
            size,
            variables,
        });
    }
    Ok(out)
}

/// Reads `dcl_thread_group` from a `SHEX`/`SHDR` token stream.
fn thread_group_size(program: &[u8]) -> Result<Option<[u32; 3]>, DxbcError> {
    let total = (u32_at(program, 4)? as usize).min(program.len() / 4);
    let mut dword = 2;
    while dword < total {
        let token = u32_at(program, dword * 4)?;
        let opcode = token & 0x7ff;
        let length = if opcode == OPCODE_CUSTOMDATA {
            u32_at(program, (dword + 1) * 4)? as usize
        } else {
            ((token >> 24) & 0x7f) as usize
        };
        if opcode == OPCODE_DCL_THREAD_GROUP {
            return Ok(Some([
                u32_at(program, (dword + 1) * 4)?,
                u32_at(program, (dword + 2) * 4)?,
                u32_at(program, (dword + 3) * 4)?,
            ]));
        }
        if length == 0 {
            break;
        }
        dword += length;
    }
    Ok(None)
}

/// Reflects a DXBC container compiled for `stage`.
pub fn reflect_dxbc(bytes: &[u8], stage: ShaderStage) -> Result<ReflectionData, DxbcError> {
    let rdef = find_chunk(bytes, b"RDEF")?.ok_or(DxbcError::MissingChunk("RDEF"))?;

    let cb_count = u32_at(rdef, 0)? as usize;
    let cb_offset = u32_at(rdef, 4)? as usize;
    let rb_count = u32_at(rdef, 8)? as usize;
    let rb_offset = u32_at(rdef, 12)? as usize;
    let target = u32_at(rdef, 16)?;
    let (major, minor) = ((target >> 8) & 0xff, target & 0xff);

    let resource_desc_size = if major > 5 || (major == 5 && minor >= 1) {
        RESOURCE_DESC_SIZE_51
    } else {
        RESOURCE_DESC_SIZE
    };
    let variable_desc_size = if major >= 5 {
        VARIABLE_DESC_SIZE_50
    } else {
        VARIABLE_DESC_SIZE
    };

    let constant_buffers = parse_constant_buffers(rdef, cb_count, cb_offset, variable_desc_size)?;

    let mut data = ReflectionData::default();
    for i in 0..rb_count {
        let desc = slice(rdef, rb_offset + i * resource_desc_size, resource_desc_size)?;
        let name = cstring_at(rdef, u32_at(desc, 0)? as usize)?;
        let input_type = u32_at(desc, 4)?;
        let bind_point = u32_at(desc, 20)?;
        let bind_count = u32_at(desc, 24)?;
        let space = if resource_desc_size == RESOURCE_DESC_SIZE_51 {
            u32_at(desc, 32)?
        } else {
            0
        };
        let Some(kind) = binding_kind(input_type) else {
            log::debug!("Skipping resource '{name}' with unknown input type {input_type}");
            continue;
        };

        let mut size = None;
        if input_type == SIT_CBUFFER {
            if let Some(cb) = constant_buffers.iter().find(|cb| cb.name == name) {
                size = Some(u64::from(cb.size));
                for (var_name, offset, var_size) in &cb.variables {
                    data.add_variable(
                        var_name.clone(),
                        VariableInfo {
                            set: space,
                            binding: bind_point,
                            offset: *offset,
                            size: *var_size,
                        },
                    );
                }
            }
        }

        data.bindings.entry(name).or_insert(BindingInfo {
            set: space,
            binding: bind_point,
            size,
            kind,
            count: bind_count,
            stages: stage.mask(),
        });
    }

    let program = match find_chunk(bytes, b"SHEX")? {
        Some(chunk) => Some(chunk),
        None => find_chunk(bytes, b"SHDR")?,
    };
    if let Some(program) = program {
        data.thread_group_size = thread_group_size(program)?;
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(out: &mut Vec<u8>, values: &[u32]) {
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn container(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut out = b"DXBC".to_vec();
        out.extend_from_slice(&[0u8; 16]);
        push(&mut out, &[1, 0, chunks.len() as u32]);
        let mut offset = CONTAINER_HEADER + chunks.len() * 4;
        for (_, data) in chunks {
            push(&mut out, &[offset as u32]);
            offset += 8 + data.len();
        }
        for (fourcc, data) in chunks {
            out.extend_from_slice(*fourcc);
            push(&mut out, &[data.len() as u32]);
            out.extend_from_slice(data);
        }
        out
    }

    /// A cs_5_0 `RDEF` with one constant buffer and three other resources.
    fn rdef() -> Vec<u8> {
        let strings_base = 260u32;
        let mut strings = Vec::new();
        let mut offsets = Vec::new();
        for name in ["Globals", "albedo", "linearSampler", "output", "tint", "exposure"] {
            offsets.push(strings_base + strings.len() as u32);
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
        }

        let mut b = Vec::new();
        push(&mut b, &[1, 28, 4, 52, 0x4353_0500, 0, 0]);
        push(&mut b, &[offsets[0], 2, 180, 32, 0, 0]);
        push(&mut b, &[offsets[0], 0, 0, 0, 0, 0, 1, 0]);
        push(&mut b, &[offsets[1], 2, 5, 4, u32::MAX, 1, 1, 12]);
        push(&mut b, &[offsets[2], 3, 0, 0, 0, 0, 1, 0]);
        push(&mut b, &[offsets[3], 4, 5, 4, u32::MAX, 0, 1, 0]);
        push(&mut b, &[offsets[4], 0, 16, 2, 0, 0, u32::MAX, 0, u32::MAX, 0]);
        push(&mut b, &[offsets[5], 16, 4, 2, 0, 0, u32::MAX, 0, u32::MAX, 0]);
        assert_eq!(b.len(), strings_base as usize);
        b.extend_from_slice(&strings);
        b
    }

    fn shex() -> Vec<u8> {
        let mut b = Vec::new();
        push(&mut b, &[0x0005_0050, 7, (4 << 24) | OPCODE_DCL_THREAD_GROUP, 16, 16, 1, (1 << 24) | 0x3e]);
        b
    }

    #[test]
    fn reflects_rdef_and_thread_group() {
        let bytes = container(&[(b"RDEF", rdef()), (b"SHEX", shex())]);

        let data = reflect_dxbc(&bytes, ShaderStage::Compute).unwrap();

        let globals = &data.bindings["Globals"];
        assert_eq!(globals.kind, BindingKind::UniformBuffer);
        assert_eq!((globals.set, globals.binding, globals.size), (0, 0, Some(32)));
        assert_eq!(
            data.variables["exposure"],
            VariableInfo {
                set: 0,
                binding: 0,
                offset: 16,
                size: 4
            }
        );
        assert_eq!(data.bindings["albedo"].kind, BindingKind::SampledImage);
        assert_eq!(data.bindings["albedo"].binding, 1);
        assert_eq!(data.bindings["linearSampler"].kind, BindingKind::Sampler);
        assert_eq!(data.bindings["output"].kind, BindingKind::StorageImage);
        assert_eq!(data.thread_group_size, Some([16, 16, 1]));
    }

    #[test]
    fn rejects_bad_containers() {
        assert_eq!(reflect_dxbc(b"DXBD", ShaderStage::Vertex), Err(DxbcError::BadMagic));
        assert!(matches!(
            reflect_dxbc(b"DX", ShaderStage::Vertex),
            Err(DxbcError::OutOfBounds { .. })
        ));
        let no_rdef = container(&[(b"SHEX", shex())]);
        assert_eq!(
            reflect_dxbc(&no_rdef, ShaderStage::Compute),
            Err(DxbcError::MissingChunk("RDEF"))
        );
        let mut truncated = container(&[(b"RDEF", rdef())]);
        truncated.truncate(truncated.len() - 100);
        assert!(matches!(
            reflect_dxbc(&truncated, ShaderStage::Compute),
            Err(DxbcError::OutOfBounds { .. })
        ));
    }
}
