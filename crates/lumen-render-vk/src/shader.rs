use std::io::Cursor;
use std::path::Path;

use ash::util::read_spv;

use crate::error::{GfxError, GfxResult};

/// A validated SPIR-V blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderCode {
    words: Vec<u32>,
}

impl ShaderCode {
    pub fn from_bytes(bytes: &[u8]) -> GfxResult<Self> {
        if bytes.is_empty() {
            return Err(GfxError::init("shader blob is empty"));
        }
        if bytes.len() % 4 != 0 {
            return Err(GfxError::init(format!(
                "shader blob of {} bytes is not a whole number of words",
                bytes.len()
            )));
        }
        let words = read_spv(&mut Cursor::new(bytes))
            .map_err(|e| GfxError::init(format!("invalid SPIR-V: {e}")))?;
        Ok(Self { words })
    }

    pub fn load(path: impl AsRef<Path>) -> GfxResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| GfxError::init(format!("read {}: {e}", path.display())))?;
        Self::from_bytes(&bytes)
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

#[cfg(test)]
pub(crate) fn dummy_spirv() -> Vec<u8> {
    // Magic number, version 1.0, generator, bound, schema.
    [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}
