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

//! Defines the hierarchy of error types for the interop subsystem.
//!
//! Every error maps onto one [`ErrorKind`], which tells the caller how the
//! failure is meant to be handled: preconditions abort locally, resource
//! exhaustion and missing support are returned to the caller, and driver
//! failures are fatal unless the call site documents a recovery.

use std::fmt;
use std::path::PathBuf;

/// The coarse classification every interop error falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller supplied an invalid argument.
    Precondition,
    /// A GPU allocation failed for size reasons.
    ResourceExhausted,
    /// The underlying API returned an unexpected error.
    DriverFailure,
    /// A shader did not compile.
    CompileFailure,
    /// The operation is not available on the current driver or device.
    NotSupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Precondition => "PRECONDITION",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::DriverFailure => "DRIVER_FAILURE",
            ErrorKind::CompileFailure => "COMPILE_FAILURE",
            ErrorKind::NotSupported => "NOT_SUPPORTED",
        };
        f.write_str(name)
    }
}

/// The reflection table in which a merge conflict was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeTable {
    /// The name → binding table.
    Binding,
    /// The name → uniform-variable table.
    Variable,
}

/// Two shader modules disagree on a reflected entry with the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    /// Which table the entry lives in.
    pub table: MergeTable,
    /// The name of the binding or variable.
    pub name: String,
    /// The field on which the entries disagree (`set`, `binding`, `offset`, `size`).
    pub field: &'static str,
    /// The value already present in the merged table.
    pub existing: String,
    /// The conflicting value from the incoming module.
    pub incoming: String,
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = match self.table {
            MergeTable::Binding => "binding",
            MergeTable::Variable => "variable",
        };
        write!(
            f,
            "Conflicting {table} '{}': field '{}' is {} in one stage and {} in another",
            self.name, self.field, self.existing, self.incoming
        )
    }
}

/// An error raised while indexing, preprocessing, compiling, or reflecting shaders.
#[derive(Debug)]
pub enum ShaderError {
    /// Two files in the shader tree share the same bare file name.
    DuplicateFile {
        /// The colliding bare file name.
        name: String,
        /// The path registered first.
        first: PathBuf,
        /// The path that collided with it.
        second: PathBuf,
    },
    /// A file could not be read from disk.
    Io {
        /// The path that failed to load.
        path: PathBuf,
        /// The underlying I/O error, rendered.
        source_error: String,
    },
    /// The preprocessor rejected a directive or separator.
    Preprocess {
        /// File in which the offending line was found.
        file: String,
        /// One-based line number of the offending line.
        line: usize,
        /// The offending line as written.
        text: String,
        /// What went wrong.
        reason: String,
    },
    /// The requested shader id was not produced by any indexed file.
    UnknownShader {
        /// The logical shader id, e.g. `Blit.Fragment`.
        id: String,
    },
    /// No stage kind could be inferred from the shader id.
    UnknownStage {
        /// The logical shader id.
        id: String,
    },
    /// The backend compiler rejected the source.
    Compilation {
        /// The logical shader id.
        id: String,
        /// The multi-line diagnostic text produced by the compiler.
        details: String,
    },
    /// Compiled bytecode could not be reflected.
    Reflection {
        /// The logical shader id (or a placeholder when unknown).
        id: String,
        /// What the reflector choked on.
        details: String,
    },
    /// Merging stage reflection tables failed.
    Merge(MergeConflict),
    /// The modules cannot be linked into one pipeline.
    Link {
        /// The first module's id.
        id: String,
        /// Why linking was refused.
        reason: String,
    },
    /// The selected backend cannot handle this request.
    NotSupported(String),
}

impl ShaderError {
    /// Returns the taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShaderError::Compilation { .. } => ErrorKind::CompileFailure,
            ShaderError::NotSupported(_) => ErrorKind::NotSupported,
            ShaderError::Io { .. } => ErrorKind::DriverFailure,
            _ => ErrorKind::Precondition,
        }
    }
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::DuplicateFile { name, first, second } => write!(
                f,
                "Shader file name '{name}' is not unique: '{}' and '{}'",
                first.display(),
                second.display()
            ),
            ShaderError::Io { path, source_error } => {
                write!(
                    f,
                    "Failed to read shader source '{}': {source_error}",
                    path.display()
                )
            }
            ShaderError::Preprocess {
                file,
                line,
                text,
                reason,
            } => write!(f, "{file}:{line}: {reason}\n    {text}"),
            ShaderError::UnknownShader { id } => {
                write!(f, "No shader named '{id}' was found in the shader tree")
            }
            ShaderError::UnknownStage { id } => {
                write!(f, "Cannot infer a shader stage from id '{id}'")
            }
            ShaderError::Compilation { id, details } => {
                write!(f, "Shader compilation failed for '{id}':\n{details}")
            }
            ShaderError::Reflection { id, details } => {
                write!(f, "Reflection failed for '{id}': {details}")
            }
            ShaderError::Merge(conflict) => write!(f, "{conflict}"),
            ShaderError::Link { id, reason } => {
                write!(f, "Cannot link pipeline starting at '{id}': {reason}")
            }
            ShaderError::NotSupported(msg) => write!(f, "Not supported: {msg}"),
        }
    }
}

impl std::error::Error for ShaderError {}

impl From<MergeConflict> for ShaderError {
    fn from(conflict: MergeConflict) -> Self {
        ShaderError::Merge(conflict)
    }
}

/// An error raised by device matching, resource sharing, or synchronization.
#[derive(Debug)]
pub enum InteropError {
    /// The caller supplied an invalid argument.
    Precondition(String),
    /// An allocation could not be satisfied.
    ResourceExhausted {
        /// What was being allocated.
        what: String,
        /// Number of bytes requested.
        requested_bytes: u64,
    },
    /// A driver entry point returned an error code.
    Driver {
        /// The API that failed (`Vulkan`, `CUDA`, ...).
        api: &'static str,
        /// The entry point that failed.
        call: &'static str,
        /// The raw result code.
        code: i64,
        /// A human-readable description, if the driver provides one.
        message: String,
    },
    /// The operation is not available on the current driver or device.
    NotSupported(String),
    /// No compute device shares its UUID or LUID with the render device.
    NoMatchingDevice,
    /// A shader failure surfaced through an interop operation.
    Shader(ShaderError),
}

impl InteropError {
    /// Returns the taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InteropError::Precondition(_) => ErrorKind::Precondition,
            InteropError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            InteropError::Driver { .. } => ErrorKind::DriverFailure,
            InteropError::NotSupported(_) | InteropError::NoMatchingDevice => {
                ErrorKind::NotSupported
            }
            InteropError::Shader(err) => err.kind(),
        }
    }

    /// Shorthand for a [`InteropError::NotSupported`] error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        InteropError::NotSupported(msg.into())
    }

    /// Shorthand for a [`InteropError::Precondition`] error.
    pub fn precondition(msg: impl Into<String>) -> Self {
        InteropError::Precondition(msg.into())
    }
}

impl fmt::Display for InteropError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteropError::Precondition(msg) => write!(f, "Precondition violated: {msg}"),
            InteropError::ResourceExhausted {
                what,
                requested_bytes,
            } => write!(
                f,
                "Out of memory allocating {what} ({requested_bytes} bytes)"
            ),
            InteropError::Driver {
                api,
                call,
                code,
                message,
            } => {
                if message.is_empty() {
                    write!(f, "{api} call {call} failed with code {code}")
                } else {
                    write!(f, "{api} call {call} failed with code {code}: {message}")
                }
            }
            InteropError::NotSupported(msg) => write!(f, "Not supported: {msg}"),
            InteropError::NoMatchingDevice => write!(
                f,
                "No compute device matches the render device by UUID or LUID"
            ),
            InteropError::Shader(err) => write!(f, "Shader error: {err}"),
        }
    }
}

impl std::error::Error for InteropError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InteropError::Shader(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShaderError> for InteropError {
    fn from(err: ShaderError) -> Self {
        InteropError::Shader(err)
    }
}
