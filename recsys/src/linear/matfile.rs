//! A minimal binary format for dense `f64` matrices: the magic `RSMAT001`, the
//! row and column counts as `u64`, then the row-major payload, all in native
//! byte order.

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use ndarray::Array2;

use crate::{MlErr, Result, checkpoint::persist};

pub(super) const EXTENSION: &str = "mat";

const MAGIC: &[u8; 8] = b"RSMAT001";
const HEADER_LEN: usize = MAGIC.len() + 2 * size_of::<u64>();

/// Returns `path` with `.mat` appended to its file name.
pub(super) fn with_extension(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(EXTENSION);
    PathBuf::from(name)
}

/// Atomically writes `m` to `path`.
pub(super) fn write(path: &Path, m: &Array2<f64>) -> Result<()> {
    let (rows, cols) = m.dim();
    let payload: Vec<f64> = m.iter().copied().collect();

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len() * size_of::<f64>());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&(rows as u64).to_ne_bytes());
    bytes.extend_from_slice(&(cols as u64).to_ne_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(&payload));

    persist(path, &bytes)
}

pub(super) fn read(path: &Path) -> Result<Array2<f64>> {
    let bytes = fs::read(path)?;
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(MlErr::MalformedMatrixFile(format!(
            "{} does not start with a matrix header",
            path.display()
        )));
    }

    let rows = read_u64(&bytes[MAGIC.len()..]) as usize;
    let cols = read_u64(&bytes[MAGIC.len() + size_of::<u64>()..]) as usize;

    let payload = &bytes[HEADER_LEN..];
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(size_of::<f64>()));
    if expected != Some(payload.len()) {
        return Err(MlErr::MalformedMatrixFile(format!(
            "a {rows}x{cols} matrix does not fit in {} bytes",
            payload.len()
        )));
    }

    let values = payload
        .chunks_exact(size_of::<f64>())
        .map(bytemuck::pod_read_unaligned::<f64>)
        .collect();

    Ok(Array2::from_shape_vec((rows, cols), values)?)
}

fn read_u64(bytes: &[u8]) -> u64 {
    bytemuck::pod_read_unaligned(&bytes[..size_of::<u64>()])
}
