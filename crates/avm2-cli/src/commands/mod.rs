//! CLI command implementations.

pub mod dump;
pub mod info;
pub mod roundtrip;

use anyhow::{Context, Result};
use avm2_abc::AbcFile;
use std::path::Path;

/// Read and decode one unit
pub fn read_unit(path: &Path) -> Result<(Vec<u8>, AbcFile)> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let abc = AbcFile::decode(&bytes)
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok((bytes, abc))
}
