//! The state file persists the last leaf imprint across process restarts so
//! the hash chain continues over the same log.

use std::{
    fs,
    io::{Read, Write},
    path::Path,
};

use logsig_basic_types::{HashAlgorithm, Imprint};

use crate::files::FileOptions;

pub(crate) const STATE_FILE_MAGIC: &[u8; 9] = b"KSISTAT10";

/// Reads the persisted last leaf. A missing or invalid file starts a new
/// hash chain with the zeroed imprint of the context algorithm.
pub(crate) fn read_state_file(path: &Path, algorithm: HashAlgorithm) -> Imprint {
    match try_read(path) {
        Some(imprint) => imprint,
        None => {
            tracing::debug!(
                "no usable state in '{}', starting a new hash chain",
                path.display()
            );
            Imprint::zero(algorithm)
        }
    }
}

fn try_read(path: &Path) -> Option<Imprint> {
    let mut file = fs::File::open(path).ok()?;
    let mut header = [0u8; 11];
    file.read_exact(&mut header).ok()?;
    if &header[..9] != STATE_FILE_MAGIC {
        return None;
    }
    let algorithm = HashAlgorithm::from_id(header[9])?;
    if usize::from(header[10]) != algorithm.len() {
        return None;
    }
    let mut digest = vec![0u8; algorithm.len()];
    file.read_exact(&mut digest).ok()?;
    Imprint::new(algorithm, &digest).ok()
}

pub(crate) fn write_state_file(
    path: &Path,
    last_leaf: &Imprint,
    options: &FileOptions,
) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(options.file_mode)
        .open(path)?;
    options.apply_file_ownership(&file, path);

    let algorithm = last_leaf.algorithm();
    file.write_all(STATE_FILE_MAGIC)?;
    file.write_all(&[algorithm.id(), algorithm.len() as u8])?;
    file.write_all(last_leaf.digest())
}
