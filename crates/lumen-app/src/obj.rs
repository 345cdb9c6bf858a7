// SPDX-License-Identifier: CEPL-1.0
//! Wavefront OBJ reader for positions and faces. Everything else is skipped.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("line {line}: malformed vertex")]
    MalformedVertex { line: usize },
    #[error("line {line}: invalid vertex index token {token:?}")]
    BadIndex { line: usize, token: String },
    #[error("line {line}: face has fewer than 3 vertices")]
    FaceTooSmall { line: usize },
    #[error("line {line}: vertex index 0 is invalid")]
    ZeroIndex { line: usize },
    #[error("line {line}: vertex index {index} out of range ({count} vertices so far)")]
    IndexOutOfRange {
        line: usize,
        index: i64,
        count: usize,
    },
    #[error("no vertices")]
    NoVertices,
    #[error("no faces")]
    NoFaces,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ObjMesh {
    pub positions: Vec<[f32; 3]>,
    /// Triangle list, zero-based.
    pub indices: Vec<u32>,
}

pub fn load(path: &Path) -> Result<ObjMesh, ObjError> {
    let text = fs::read_to_string(path).map_err(|source| ObjError::Read {
        path: path.to_owned(),
        source,
    })?;
    parse(&text)
}

pub fn parse(text: &str) -> Result<ObjMesh, ObjError> {
    let mut out = ObjMesh::default();

    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let mut tokens = raw.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let mut xyz = [0.0f32; 3];
                for c in &mut xyz {
                    *c = tokens
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or(ObjError::MalformedVertex { line })?;
                }
                out.positions.push(xyz);
            }
            Some("f") => {
                let face = tokens
                    .map(|t| face_index(t, line))
                    .collect::<Result<Vec<_>, _>>()?;
                if face.len() < 3 {
                    return Err(ObjError::FaceTooSmall { line });
                }
                let count = out.positions.len();
                let first = resolve(face[0], count, line)?;
                // Fan around the first corner.
                for pair in face[1..].windows(2) {
                    out.indices.push(first);
                    out.indices.push(resolve(pair[0], count, line)?);
                    out.indices.push(resolve(pair[1], count, line)?);
                }
            }
            _ => {}
        }
    }

    if out.positions.is_empty() {
        return Err(ObjError::NoVertices);
    }
    if out.indices.is_empty() {
        return Err(ObjError::NoFaces);
    }
    Ok(out)
}

// `v`, `v/vt`, `v//vn` and `v/vt/vn` all lead with the position index.
fn face_index(token: &str, line: usize) -> Result<i64, ObjError> {
    let head = token.split('/').next().unwrap_or_default();
    let digits = head.strip_prefix('-').unwrap_or(head);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ObjError::BadIndex {
            line,
            token: token.to_owned(),
        });
    }
    head.parse().map_err(|_| ObjError::BadIndex {
        line,
        token: token.to_owned(),
    })
}

/// 1-based, or negative counting back from the last vertex read so far.
fn resolve(index: i64, count: usize, line: usize) -> Result<u32, ObjError> {
    let zero_based = match index {
        0 => return Err(ObjError::ZeroIndex { line }),
        i if i > 0 => i - 1,
        i => count as i64 + i,
    };
    if zero_based < 0 || zero_based >= count as i64 {
        return Err(ObjError::IndexOutOfRange { line, index, count });
    }
    u32::try_from(zero_based).map_err(|_| ObjError::IndexOutOfRange { line, index, count })
}
