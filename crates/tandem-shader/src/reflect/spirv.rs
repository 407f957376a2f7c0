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

//! A bounds-checked SPIR-V reader that extracts descriptor bindings.
//!
//! Only the instructions needed for reflection are decoded: debug names,
//! decorations, type declarations, 32-bit constants, global variables and the
//! `LocalSize` execution mode. Everything else is skipped by word count.

use super::ReflectionData;
use std::collections::HashMap;
use tandem_core::shader::{BindingInfo, BindingKind, ShaderStage, VariableInfo};
use thiserror::Error;

const MAGIC: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;
const MAX_TYPE_DEPTH: u32 = 32;

const OP_NAME: u16 = 5;
const OP_MEMBER_NAME: u16 = 6;
const OP_EXECUTION_MODE: u16 = 16;
const OP_TYPE_BOOL: u16 = 20;
const OP_TYPE_INT: u16 = 21;
const OP_TYPE_FLOAT: u16 = 22;
const OP_TYPE_VECTOR: u16 = 23;
const OP_TYPE_MATRIX: u16 = 24;
const OP_TYPE_IMAGE: u16 = 25;
const OP_TYPE_SAMPLER: u16 = 26;
const OP_TYPE_SAMPLED_IMAGE: u16 = 27;
const OP_TYPE_ARRAY: u16 = 28;
const OP_TYPE_RUNTIME_ARRAY: u16 = 29;
const OP_TYPE_STRUCT: u16 = 30;
const OP_TYPE_POINTER: u16 = 32;
const OP_CONSTANT: u16 = 43;
const OP_VARIABLE: u16 = 59;
const OP_DECORATE: u16 = 71;
const OP_MEMBER_DECORATE: u16 = 72;
const OP_TYPE_ACCELERATION_STRUCTURE: u16 = 5341;

#[cfg(test)]
const DECORATION_BLOCK: u32 = 2;
const DECORATION_BUFFER_BLOCK: u32 = 3;
const DECORATION_ARRAY_STRIDE: u32 = 6;
const DECORATION_MATRIX_STRIDE: u32 = 7;
const DECORATION_BINDING: u32 = 33;
const DECORATION_DESCRIPTOR_SET: u32 = 34;
const DECORATION_OFFSET: u32 = 35;

const EXECUTION_MODE_LOCAL_SIZE: u32 = 17;

const STORAGE_UNIFORM_CONSTANT: u32 = 0;
const STORAGE_UNIFORM: u32 = 2;
const STORAGE_STORAGE_BUFFER: u32 = 12;

/// Image `Sampled` operand value for storage images.
const IMAGE_STORAGE: u32 = 2;

/// Errors raised while walking a SPIR-V word stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpirvError {
    /// Fewer words than the module header.
    #[error("module is {0} words long, shorter than the SPIR-V header")]
    TooShort(usize),
    /// The first word is not the SPIR-V magic number.
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),
    /// An instruction claims zero words.
    #[error("instruction at word {offset} has a zero word count")]
    ZeroLength {
        /// Word offset of the instruction.
        offset: usize,
    },
    /// An instruction runs past the end of the module.
    #[error("instruction at word {offset} spans {length} words, past the end of the module")]
    Truncated {
        /// Word offset of the instruction.
        offset: usize,
        /// The declared word count.
        length: usize,
    },
    /// An instruction has fewer operands than its opcode requires.
    #[error("opcode {opcode} at word {offset} is missing operands")]
    MissingOperand {
        /// The opcode.
        opcode: u16,
        /// Word offset of the instruction.
        offset: usize,
    },
    /// A type id is used but never declared.
    #[error("type %{0} is referenced but never declared")]
    UnknownType(u32),
    /// Type nesting exceeds the reader's limit.
    #[error("type %{0} is nested too deeply")]
    TooDeep(u32),
}

#[derive(Debug, Clone)]
enum SpvType {
    Bool,
    Scalar { width: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, columns: u32 },
    Image { sampled: u32 },
    Sampler,
    SampledImage,
    Array { element: u32, length: u32 },
    RuntimeArray { element: u32 },
    Struct { members: Vec<u32> },
    Pointer { pointee: u32 },
    AccelerationStructure,
}

#[derive(Debug, Default)]
struct Decorations {
    set: Option<u32>,
    binding: Option<u32>,
    array_stride: Option<u32>,
    buffer_block: bool,
}

#[derive(Debug, Default)]
struct MemberDecorations {
    offset: Option<u32>,
    matrix_stride: Option<u32>,
}

/// Placement of one struct member under the explicit layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MemberLayout {
    offset: u32,
    size: u32,
}

#[derive(Debug, Default)]
struct Module {
    names: HashMap<u32, String>,
    member_names: HashMap<(u32, u32), String>,
    decorations: HashMap<u32, Decorations>,
    member_decorations: HashMap<(u32, u32), MemberDecorations>,
    types: HashMap<u32, SpvType>,
    constants: HashMap<u32, u32>,
    // (variable id, pointer type id, storage class)
    variables: Vec<(u32, u32, u32)>,
    local_size: Option<[u32; 3]>,
}

/// Decodes a nul-terminated literal string packed little-endian into words.
fn literal_string(words: &[u32]) -> String {
    let mut bytes = Vec::new();
    'outer: for word in words {
        for b in word.to_le_bytes() {
            if b == 0 {
                break 'outer;
            }
            bytes.push(b);
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

struct Operands<'a> {
    words: &'a [u32],
    opcode: u16,
    offset: usize,
}

impl Operands<'_> {
    fn get(&self, i: usize) -> Result<u32, SpirvError> {
        self.words.get(i).copied().ok_or(SpirvError::MissingOperand {
            opcode: self.opcode,
            offset: self.offset,
        })
    }

    fn tail(&self, from: usize) -> &[u32] {
        self.words.get(from..).unwrap_or(&[])
    }
}

impl Module {
    fn parse(words: &[u32]) -> Result<Self, SpirvError> {
        if words.len() < HEADER_WORDS {
            return Err(SpirvError::TooShort(words.len()));
        }
        if words[0] != MAGIC {
            return Err(SpirvError::BadMagic(words[0]));
        }

        let mut module = Module::default();
        let mut offset = HEADER_WORDS;
        while offset < words.len() {
            let head = words[offset];
            let length = (head >> 16) as usize;
            let opcode = (head & 0xffff) as u16;
            if length == 0 {
                return Err(SpirvError::ZeroLength { offset });
            }
            let end = offset + length;
            if end > words.len() {
                return Err(SpirvError::Truncated { offset, length });
            }
            module.record(Operands {
                words: &words[offset + 1..end],
                opcode,
                offset,
            })?;
            offset = end;
        }
        Ok(module)
    }

    fn record(&mut self, op: Operands<'_>) -> Result<(), SpirvError> {
        match op.opcode {
            OP_NAME => {
                let name = literal_string(op.tail(1));
                if !name.is_empty() {
                    self.names.insert(op.get(0)?, name);
                }
            }
            OP_MEMBER_NAME => {
                let name = literal_string(op.tail(2));
                if !name.is_empty() {
                    self.member_names.insert((op.get(0)?, op.get(1)?), name);
                }
            }
            OP_EXECUTION_MODE => {
                if op.get(1)? == EXECUTION_MODE_LOCAL_SIZE {
                    self.local_size = Some([op.get(2)?, op.get(3)?, op.get(4)?]);
                }
            }
            OP_TYPE_BOOL => {
                self.types.insert(op.get(0)?, SpvType::Bool);
            }
            OP_TYPE_INT | OP_TYPE_FLOAT => {
                self.types
                    .insert(op.get(0)?, SpvType::Scalar { width: op.get(1)? });
            }
            OP_TYPE_VECTOR => {
                let ty = SpvType::Vector {
                    component: op.get(1)?,
                    count: op.get(2)?,
                };
                self.types.insert(op.get(0)?, ty);
            }
            OP_TYPE_MATRIX => {
                let ty = SpvType::Matrix {
                    column: op.get(1)?,
                    columns: op.get(2)?,
                };
                self.types.insert(op.get(0)?, ty);
            }
            OP_TYPE_IMAGE => {
                self.types
                    .insert(op.get(0)?, SpvType::Image { sampled: op.get(6)? });
            }
            OP_TYPE_SAMPLER => {
                self.types.insert(op.get(0)?, SpvType::Sampler);
            }
            OP_TYPE_SAMPLED_IMAGE => {
                self.types.insert(op.get(0)?, SpvType::SampledImage);
            }
            OP_TYPE_ARRAY => {
                let ty = SpvType::Array {
                    element: op.get(1)?,
                    length: op.get(2)?,
                };
                self.types.insert(op.get(0)?, ty);
            }
            OP_TYPE_RUNTIME_ARRAY => {
                self.types
                    .insert(op.get(0)?, SpvType::RuntimeArray { element: op.get(1)? });
            }
            OP_TYPE_STRUCT => {
                let members = op.tail(1).to_vec();
                self.types.insert(op.get(0)?, SpvType::Struct { members });
            }
            OP_TYPE_POINTER => {
                self.types
                    .insert(op.get(0)?, SpvType::Pointer { pointee: op.get(2)? });
            }
            OP_TYPE_ACCELERATION_STRUCTURE => {
                self.types.insert(op.get(0)?, SpvType::AccelerationStructure);
            }
            OP_CONSTANT => {
                // Only the low word matters for array lengths.
                self.constants.insert(op.get(1)?, op.get(2)?);
            }
            OP_VARIABLE => {
                self.variables.push((op.get(1)?, op.get(0)?, op.get(2)?));
            }
            OP_DECORATE => {
                let entry = self.decorations.entry(op.get(0)?).or_default();
                match op.get(1)? {
                    DECORATION_BUFFER_BLOCK => entry.buffer_block = true,
                    DECORATION_ARRAY_STRIDE => entry.array_stride = Some(op.get(2)?),
                    DECORATION_BINDING => entry.binding = Some(op.get(2)?),
                    DECORATION_DESCRIPTOR_SET => entry.set = Some(op.get(2)?),
                    _ => {}
                }
            }
            OP_MEMBER_DECORATE => {
                let entry = self
                    .member_decorations
                    .entry((op.get(0)?, op.get(1)?))
                    .or_default();
                match op.get(2)? {
                    DECORATION_OFFSET => entry.offset = Some(op.get(3)?),
                    DECORATION_MATRIX_STRIDE => entry.matrix_stride = Some(op.get(3)?),
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn ty(&self, id: u32) -> Result<&SpvType, SpirvError> {
        self.types.get(&id).ok_or(SpirvError::UnknownType(id))
    }

    /// Byte size of a type under the explicit layout decorations.
    fn size_of(&self, id: u32, matrix_stride: Option<u32>, depth: u32) -> Result<u32, SpirvError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(SpirvError::TooDeep(id));
        }
        let size = match self.ty(id)? {
            SpvType::Bool => 4,
            SpvType::Scalar { width } => width / 8,
            SpvType::Vector { component, count } => self.size_of(*component, None, depth + 1)? * count,
            SpvType::Matrix { column, columns } => match matrix_stride {
                Some(stride) => stride * columns,
                None => self.size_of(*column, None, depth + 1)? * columns,
            },
            SpvType::Array { element, length } => {
                let length = self.constants.get(length).copied().unwrap_or(0);
                let stride = match self.decorations.get(&id).and_then(|d| d.array_stride) {
                    Some(stride) => stride,
                    None => self.size_of(*element, matrix_stride, depth + 1)?,
                };
                stride * length
            }
            SpvType::Struct { members } => self
                .member_layouts(id, members, depth)?
                .iter()
                .map(|m| m.offset + m.size)
                .max()
                .unwrap_or(0),
            SpvType::RuntimeArray { .. }
            | SpvType::Image { .. }
            | SpvType::Sampler
            | SpvType::SampledImage
            | SpvType::Pointer { .. }
            | SpvType::AccelerationStructure => 0,
        };
        Ok(size)
    }

    /// Offset and size of each member of struct `id`, in declaration order.
    ///
    /// A member without an `Offset` decoration is placed right after the
    /// previous one.
    fn member_layouts(&self, id: u32, members: &[u32], depth: u32) -> Result<Vec<MemberLayout>, SpirvError> {
        let mut layouts = Vec::with_capacity(members.len());
        let mut cursor = 0;
        for (i, member) in members.iter().enumerate() {
            let decorations = self.member_decorations.get(&(id, i as u32));
            let offset = decorations.and_then(|d| d.offset).unwrap_or(cursor);
            let stride = decorations.and_then(|d| d.matrix_stride);
            let size = self.size_of(*member, stride, depth + 1)?;
            cursor = offset + size;
            layouts.push(MemberLayout { offset, size });
        }
        Ok(layouts)
    }

    fn binding_kind(&self, storage_class: u32, base: u32) -> Result<Option<BindingKind>, SpirvError> {
        let kind = match self.ty(base)? {
            SpvType::Struct { .. } => {
                let buffer_block = self.decorations.get(&base).is_some_and(|d| d.buffer_block);
                if storage_class == STORAGE_STORAGE_BUFFER || buffer_block {
                    BindingKind::StorageBuffer
                } else {
                    BindingKind::UniformBuffer
                }
            }
            SpvType::Image { sampled } if *sampled == IMAGE_STORAGE => BindingKind::StorageImage,
            SpvType::Image { .. } => BindingKind::SampledImage,
            SpvType::SampledImage => BindingKind::CombinedImageSampler,
            SpvType::Sampler => BindingKind::Sampler,
            SpvType::AccelerationStructure => BindingKind::AccelerationStructure,
            _ => return Ok(None),
        };
        Ok(Some(kind))
    }
}

/// Reflects a SPIR-V module compiled for `stage`.
pub fn reflect_spirv(words: &[u32], stage: ShaderStage) -> Result<ReflectionData, SpirvError> {
    let module = Module::parse(words)?;
    let mut data = ReflectionData {
        thread_group_size: module.local_size,
        ..Default::default()
    };

    for &(id, pointer, storage_class) in &module.variables {
        if !matches!(
            storage_class,
            STORAGE_UNIFORM_CONSTANT | STORAGE_UNIFORM | STORAGE_STORAGE_BUFFER
        ) {
            continue;
        }
        let SpvType::Pointer { pointee } = module.ty(pointer)? else {
            continue;
        };
        let (base, count) = match module.ty(*pointee)? {
            SpvType::Array { element, length } => {
                (*element, module.constants.get(length).copied().unwrap_or(1))
            }
            SpvType::RuntimeArray { element } => (*element, 0),
            _ => (*pointee, 1),
        };
        let Some(kind) = module.binding_kind(storage_class, base)? else {
            continue;
        };

        let is_block = matches!(kind, BindingKind::UniformBuffer | BindingKind::StorageBuffer);
        let (first, second) = if is_block { (base, id) } else { (id, base) };
        let name = module
            .names
            .get(&first)
            .or_else(|| module.names.get(&second))
            .cloned()
            .unwrap_or_else(|| format!("_{id}"));

        let decorations = module.decorations.get(&id);
        let set = decorations.and_then(|d| d.set).unwrap_or(0);
        let binding = decorations.and_then(|d| d.binding).unwrap_or(0);

        let size = if kind == BindingKind::UniformBuffer {
            let size = module.size_of(base, None, 0)?;
            if let SpvType::Struct { members } = module.ty(base)? {
                let layouts = module.member_layouts(base, members, 0)?;
                for (i, layout) in layouts.into_iter().enumerate() {
                    let Some(member_name) = module.member_names.get(&(base, i as u32)) else {
                        continue;
                    };
                    data.add_variable(
                        member_name.clone(),
                        VariableInfo {
                            set,
                            binding,
                            offset: layout.offset,
                            size: layout.size,
                        },
                    );
                }
            }
            Some(u64::from(size))
        } else {
            None
        };

        if data.bindings.contains_key(&name) {
            log::debug!("Binding name '{name}' appears twice in one module; keeping the first");
            continue;
        }
        data.bindings.insert(
            name,
            BindingInfo {
                set,
                binding,
                size,
                kind,
                count,
                stages: stage.mask(),
            },
        );
    }

    Ok(data)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tandem_core::shader::StageMask;

    pub(crate) fn inst(opcode: u16, operands: &[u32]) -> Vec<u32> {
        let mut words = vec![((operands.len() as u32 + 1) << 16) | u32::from(opcode)];
        words.extend_from_slice(operands);
        words
    }

    pub(crate) fn string_words(s: &str) -> Vec<u32> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn named(opcode: u16, prefix: &[u32], name: &str) -> Vec<u32> {
        let mut operands = prefix.to_vec();
        operands.extend(string_words(name));
        inst(opcode, &operands)
    }

    /// A compute module with a uniform block, a storage image and an array
    /// of combined image samplers.
    pub(crate) fn sample_module() -> Vec<u32> {
        let mut w = vec![MAGIC, 0x0001_0000, 0, 64, 0];
        w.extend(named(15, &[5, 1], "main"));
        w.extend(inst(OP_EXECUTION_MODE, &[1, EXECUTION_MODE_LOCAL_SIZE, 8, 4, 1]));
        w.extend(named(OP_NAME, &[10], "Params"));
        w.extend(named(OP_MEMBER_NAME, &[10, 0], "scale"));
        w.extend(named(OP_MEMBER_NAME, &[10, 1], "transform"));
        w.extend(named(OP_NAME, &[20], "params"));
        w.extend(named(OP_NAME, &[30], "outputImage"));
        w.extend(named(OP_NAME, &[40], "textures"));
        w.extend(inst(OP_DECORATE, &[10, DECORATION_BLOCK]));
        w.extend(inst(OP_MEMBER_DECORATE, &[10, 0, DECORATION_OFFSET, 0]));
        w.extend(inst(OP_MEMBER_DECORATE, &[10, 1, DECORATION_OFFSET, 16]));
        w.extend(inst(OP_MEMBER_DECORATE, &[10, 1, DECORATION_MATRIX_STRIDE, 16]));
        w.extend(inst(OP_DECORATE, &[20, DECORATION_DESCRIPTOR_SET, 0]));
        w.extend(inst(OP_DECORATE, &[20, DECORATION_BINDING, 1]));
        w.extend(inst(OP_DECORATE, &[30, DECORATION_DESCRIPTOR_SET, 0]));
        w.extend(inst(OP_DECORATE, &[30, DECORATION_BINDING, 2]));
        w.extend(inst(OP_DECORATE, &[40, DECORATION_DESCRIPTOR_SET, 1]));
        w.extend(inst(OP_DECORATE, &[40, DECORATION_BINDING, 0]));
        w.extend(inst(OP_TYPE_FLOAT, &[2, 32]));
        w.extend(inst(OP_TYPE_VECTOR, &[3, 2, 4]));
        w.extend(inst(OP_TYPE_MATRIX, &[4, 3, 4]));
        w.extend(inst(OP_TYPE_STRUCT, &[10, 2, 4]));
        w.extend(inst(OP_TYPE_POINTER, &[11, STORAGE_UNIFORM, 10]));
        w.extend(inst(OP_VARIABLE, &[11, 20, STORAGE_UNIFORM]));
        w.extend(inst(OP_TYPE_IMAGE, &[5, 2, 1, 0, 0, 0, IMAGE_STORAGE, 4]));
        w.extend(inst(OP_TYPE_POINTER, &[6, STORAGE_UNIFORM_CONSTANT, 5]));
        w.extend(inst(OP_VARIABLE, &[6, 30, STORAGE_UNIFORM_CONSTANT]));
        w.extend(inst(OP_TYPE_INT, &[7, 32, 0]));
        w.extend(inst(OP_CONSTANT, &[7, 8, 4]));
        w.extend(inst(OP_TYPE_IMAGE, &[9, 2, 1, 0, 0, 0, 1, 0]));
        w.extend(inst(OP_TYPE_SAMPLED_IMAGE, &[12, 9]));
        w.extend(inst(OP_TYPE_ARRAY, &[13, 12, 8]));
        w.extend(inst(OP_TYPE_POINTER, &[14, STORAGE_UNIFORM_CONSTANT, 13]));
        w.extend(inst(OP_VARIABLE, &[14, 40, STORAGE_UNIFORM_CONSTANT]));
        w
    }

    #[test]
    fn reflects_bindings_variables_and_local_size() {
        let data = reflect_spirv(&sample_module(), ShaderStage::Compute).unwrap();

        assert_eq!(data.thread_group_size, Some([8, 4, 1]));

        let params = &data.bindings["Params"];
        assert_eq!((params.set, params.binding), (0, 1));
        assert_eq!(params.kind, BindingKind::UniformBuffer);
        assert_eq!(params.size, Some(80));
        assert_eq!(params.stages, StageMask::COMPUTE);

        assert_eq!(
            data.variables["transform"],
            VariableInfo {
                set: 0,
                binding: 1,
                offset: 16,
                size: 64
            }
        );
        assert_eq!(data.variables["scale"].size, 4);

        let image = &data.bindings["outputImage"];
        assert_eq!(image.kind, BindingKind::StorageImage);
        assert_eq!(image.size, None);

        let textures = &data.bindings["textures"];
        assert_eq!(textures.kind, BindingKind::CombinedImageSampler);
        assert_eq!((textures.set, textures.binding, textures.count), (1, 0, 4));
    }

    #[test]
    fn uniform_block_falls_back_to_instance_name() {
        let mut words = vec![MAGIC, 0x0001_0000, 0, 16, 0];
        words.extend(named(OP_NAME, &[3], "lights"));
        words.extend(inst(OP_TYPE_FLOAT, &[1, 32]));
        words.extend(inst(OP_TYPE_STRUCT, &[2, 1]));
        words.extend(inst(OP_TYPE_POINTER, &[4, STORAGE_UNIFORM, 2]));
        words.extend(inst(OP_VARIABLE, &[4, 3, STORAGE_UNIFORM]));

        let data = reflect_spirv(&words, ShaderStage::Fragment).unwrap();

        assert_eq!(data.bindings["lights"].size, Some(4));
        assert_eq!(data.thread_group_size, None);
    }

    #[test]
    fn undecorated_members_follow_the_previous_member() {
        // --- Arrange ---
        let mut words = vec![MAGIC, 0x0001_0000, 0, 16, 0];
        words.extend(named(OP_NAME, &[5], "Packed"));
        words.extend(named(OP_MEMBER_NAME, &[5, 0], "first"));
        words.extend(named(OP_MEMBER_NAME, &[5, 1], "second"));
        words.extend(named(OP_MEMBER_NAME, &[5, 2], "third"));
        words.extend(inst(OP_DECORATE, &[5, DECORATION_BLOCK]));
        words.extend(inst(OP_MEMBER_DECORATE, &[5, 1, DECORATION_OFFSET, 16]));
        words.extend(inst(OP_TYPE_FLOAT, &[1, 32]));
        words.extend(inst(OP_TYPE_VECTOR, &[2, 1, 4]));
        words.extend(inst(OP_TYPE_STRUCT, &[5, 1, 2, 1]));
        words.extend(inst(OP_TYPE_POINTER, &[6, STORAGE_UNIFORM, 5]));
        words.extend(inst(OP_VARIABLE, &[6, 7, STORAGE_UNIFORM]));

        // --- Act ---
        let data = reflect_spirv(&words, ShaderStage::Compute).unwrap();

        // --- Assert ---
        assert_eq!(data.variables["first"].offset, 0);
        assert_eq!(data.variables["second"].offset, 16);
        assert_eq!(data.variables["third"].offset, 32);
        assert_eq!(data.variables["third"].size, 4);
        let end = data.variables["third"].offset + data.variables["third"].size;
        assert_eq!(data.bindings["Packed"].size, Some(u64::from(end)));
    }

    #[test]
    fn rejects_malformed_streams() {
        assert_eq!(reflect_spirv(&[MAGIC], ShaderStage::Vertex), Err(SpirvError::TooShort(1)));
        assert_eq!(
            reflect_spirv(&[0xdead_beef, 0, 0, 0, 0], ShaderStage::Vertex),
            Err(SpirvError::BadMagic(0xdead_beef))
        );

        let mut truncated = vec![MAGIC, 0, 0, 0, 0];
        truncated.push((9 << 16) | u32::from(OP_NAME));
        assert_eq!(
            reflect_spirv(&truncated, ShaderStage::Vertex),
            Err(SpirvError::Truncated { offset: 5, length: 9 })
        );

        let mut zero = vec![MAGIC, 0, 0, 0, 0, u32::from(OP_NAME)];
        zero.push(0);
        assert_eq!(
            reflect_spirv(&zero, ShaderStage::Vertex),
            Err(SpirvError::ZeroLength { offset: 5 })
        );
    }

    #[test]
    fn dangling_type_reference_is_reported() {
        let mut words = vec![MAGIC, 0, 0, 8, 0];
        words.extend(inst(OP_VARIABLE, &[7, 3, STORAGE_UNIFORM]));
        assert_eq!(
            reflect_spirv(&words, ShaderStage::Vertex),
            Err(SpirvError::UnknownType(7))
        );
    }
}
