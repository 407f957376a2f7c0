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

//! Little-endian binary stream for camera checkpoint databases.
//!
//! Layout: `u32 version`, `u32 dataset count`, then per dataset a string
//! name and `u32 checkpoint count`, then per checkpoint a string name and a
//! fixed pose. Strings are a `u32` byte length followed by UTF-8 bytes.
//! Version 4 poses hold position, orientation, look-at and vertical field of
//! view; version 1 poses hold only the position.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The version written by [`CheckpointDatabase::to_bytes`].
pub const CURRENT_VERSION: u32 = 4;

/// Errors raised while reading a checkpoint stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// The stream ended in the middle of a value.
    UnexpectedEof,
    /// The stream declares a version this reader does not know.
    UnsupportedVersion(u32),
    /// A name is not valid UTF-8.
    InvalidUtf8,
    /// The binary codec rejected a value.
    Codec(String),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::UnexpectedEof => write!(f, "Checkpoint stream is truncated"),
            CheckpointError::UnsupportedVersion(v) => {
                write!(f, "Unsupported checkpoint stream version {v}")
            }
            CheckpointError::InvalidUtf8 => write!(f, "Checkpoint name is not valid UTF-8"),
            CheckpointError::Codec(msg) => write!(f, "Checkpoint codec error: {msg}"),
        }
    }
}

impl std::error::Error for CheckpointError {}

/// A camera pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPose {
    /// Camera position.
    pub position: [f32; 3],
    /// Orientation quaternion, `(x, y, z, w)`.
    pub orientation: [f32; 4],
    /// Point the camera looks at.
    pub look_at: [f32; 3],
    /// Vertical field of view in radians.
    pub fovy: f32,
}

impl CheckpointPose {
    /// The pose a version-1 stream implies for a bare position: identity
    /// orientation, looking down `-Z`, 60° vertical field of view.
    pub fn from_position(position: [f32; 3]) -> Self {
        CheckpointPose {
            position,
            orientation: [0.0, 0.0, 0.0, 1.0],
            look_at: [position[0], position[1], position[2] - 1.0],
            fovy: 60f32.to_radians(),
        }
    }
}

/// A named pose.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Checkpoint name.
    pub name: String,
    /// The pose.
    pub pose: CheckpointPose,
}

/// A named list of checkpoints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CheckpointDataset {
    /// Dataset name (usually the scene it belongs to).
    pub name: String,
    /// The checkpoints, in order.
    pub checkpoints: Vec<Checkpoint>,
}

/// All datasets stored in one file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CheckpointDatabase {
    /// The datasets, in order.
    pub datasets: Vec<CheckpointDataset>,
}

fn codec() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

struct Writer(Vec<u8>);

impl Writer {
    fn value<T: Serialize>(&mut self, value: &T) -> Result<(), CheckpointError> {
        let bytes = bincode::serde::encode_to_vec(value, codec())
            .map_err(|e| CheckpointError::Codec(e.to_string()))?;
        self.0.extend_from_slice(&bytes);
        Ok(())
    }

    fn string(&mut self, s: &str) -> Result<(), CheckpointError> {
        self.value(&(s.len() as u32))?;
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    fn value<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, CheckpointError> {
        let rest = self
            .bytes
            .get(self.cursor..)
            .ok_or(CheckpointError::UnexpectedEof)?;
        let (value, read) = bincode::serde::decode_from_slice(rest, codec()).map_err(|e| match e {
            bincode::error::DecodeError::UnexpectedEnd { .. } => CheckpointError::UnexpectedEof,
            other => CheckpointError::Codec(other.to_string()),
        })?;
        self.cursor += read;
        Ok(value)
    }

    fn string(&mut self) -> Result<String, CheckpointError> {
        let len = self.value::<u32>()? as usize;
        let end = self
            .cursor
            .checked_add(len)
            .ok_or(CheckpointError::UnexpectedEof)?;
        let raw = self
            .bytes
            .get(self.cursor..end)
            .ok_or(CheckpointError::UnexpectedEof)?;
        self.cursor = end;
        String::from_utf8(raw.to_vec()).map_err(|_| CheckpointError::InvalidUtf8)
    }
}

impl CheckpointDatabase {
    /// Serializes the database in the current format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        let mut w = Writer(Vec::new());
        w.value(&CURRENT_VERSION)?;
        w.value(&(self.datasets.len() as u32))?;
        for dataset in &self.datasets {
            w.string(&dataset.name)?;
            w.value(&(dataset.checkpoints.len() as u32))?;
            for checkpoint in &dataset.checkpoints {
                w.string(&checkpoint.name)?;
                w.value(&checkpoint.pose)?;
            }
        }
        Ok(w.0)
    }

    /// Parses a stream of version 1 or 4.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let mut r = Reader { bytes, cursor: 0 };
        let version: u32 = r.value()?;
        if version != 1 && version != CURRENT_VERSION {
            return Err(CheckpointError::UnsupportedVersion(version));
        }

        let dataset_count: u32 = r.value()?;
        let mut datasets = Vec::new();
        for _ in 0..dataset_count {
            let name = r.string()?;
            let count: u32 = r.value()?;
            let mut checkpoints = Vec::new();
            for _ in 0..count {
                let name = r.string()?;
                let pose = if version == 1 {
                    CheckpointPose::from_position(r.value()?)
                } else {
                    r.value()?
                };
                checkpoints.push(Checkpoint { name, pose });
            }
            datasets.push(CheckpointDataset { name, checkpoints });
        }
        Ok(CheckpointDatabase { datasets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> CheckpointDatabase {
        CheckpointDatabase {
            datasets: vec![CheckpointDataset {
                name: "Sponza".to_string(),
                checkpoints: vec![Checkpoint {
                    name: "atrium".to_string(),
                    pose: CheckpointPose {
                        position: [1.0, 2.0, 3.0],
                        orientation: [0.0, 0.7071, 0.0, 0.7071],
                        look_at: [0.0, 2.0, 3.0],
                        fovy: 0.9,
                    },
                }],
            }],
        }
    }

    #[test]
    fn writes_little_endian_header() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(&bytes[..4], &4u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &6u32.to_le_bytes());
        assert_eq!(&bytes[12..18], b"Sponza");
        // header + dataset name + count + checkpoint name + 11 floats
        assert_eq!(bytes.len(), 8 + (4 + 6) + 4 + (4 + 6) + 11 * 4);
    }

    #[test]
    fn reads_back_current_version() {
        let db = sample();
        assert_eq!(CheckpointDatabase::from_bytes(&db.to_bytes().unwrap()).unwrap(), db);
    }

    #[test]
    fn version_one_synthesizes_defaults() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(b"a");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(b"b");
        for v in [4.0f32, 5.0, 6.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let db = CheckpointDatabase::from_bytes(&bytes).unwrap();
        let pose = db.datasets[0].checkpoints[0].pose;
        assert_eq!(pose.position, [4.0, 5.0, 6.0]);
        assert_eq!(pose.orientation, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(pose.look_at, [4.0, 5.0, 5.0]);
        assert_relative_eq!(pose.fovy, std::f32::consts::FRAC_PI_3, epsilon = 1e-6);
    }

    #[test]
    fn rejects_truncated_and_unknown_streams() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(
            CheckpointDatabase::from_bytes(&bytes[..bytes.len() - 3]),
            Err(CheckpointError::UnexpectedEof)
        );
        assert_eq!(
            CheckpointDatabase::from_bytes(&7u32.to_le_bytes()),
            Err(CheckpointError::UnsupportedVersion(7))
        );
    }
}
