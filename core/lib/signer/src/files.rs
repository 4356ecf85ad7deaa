//! Creation and opening of the signature output files.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use fs2::FileExt;
use logsig_config::LogSignerConfig;

/// Magic of the combined synchronous-mode file.
pub(crate) const LOGSIG_FILE_HEADER: &[u8] = b"LOGSIG12";
/// Magic of the asynchronous-mode block-data file.
pub(crate) const BLOCK_FILE_HEADER: &[u8] = b"LOG12BLK";
/// Magic of the asynchronous-mode signature file.
pub(crate) const SIG_FILE_HEADER: &[u8] = b"LOG12SIG";

pub(crate) const LOGSIG_FILE_SUFFIX: &str = ".logsig";
pub(crate) const BLOCK_FILE_SUFFIX: &str = ".logsig.parts/blocks.dat";
pub(crate) const SIG_FILE_SUFFIX: &str = ".logsig.parts/block-signatures.dat";
pub(crate) const STATE_FILE_SUFFIX: &str = ".ksistate";

const FILE_BUF_SIZE: usize = 4096;

/// Modes and ownership applied to newly created files and directories.
#[derive(Debug, Clone)]
pub(crate) struct FileOptions {
    pub file_mode: u32,
    pub dir_mode: u32,
    pub file_uid: Option<u32>,
    pub file_gid: Option<u32>,
    pub dir_uid: Option<u32>,
    pub dir_gid: Option<u32>,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            file_mode: 0o644,
            dir_mode: 0o700,
            file_uid: None,
            file_gid: None,
            dir_uid: None,
            dir_gid: None,
        }
    }
}

impl FileOptions {
    pub(crate) fn from_config(config: &LogSignerConfig) -> Self {
        Self {
            file_mode: config.file_create_mode(),
            dir_mode: config.dir_create_mode(),
            file_uid: config.file_uid,
            file_gid: config.file_gid,
            dir_uid: config.dir_uid,
            dir_gid: config.dir_gid,
        }
    }

    /// Applies the configured ownership to a freshly created file.
    /// Failures leave the file usable and are only reported.
    pub(crate) fn apply_file_ownership(&self, file: &File, path: &Path) {
        if self.file_uid.is_none() && self.file_gid.is_none() {
            return;
        }
        if let Err(err) = std::os::unix::fs::fchown(file, self.file_uid, self.file_gid) {
            tracing::warn!(
                "chown for file '{}' failed: {err} - file may be unaccessible",
                path.display()
            );
        }
    }

    fn apply_dir_ownership(&self, path: &Path) {
        if self.dir_uid.is_none() && self.dir_gid.is_none() {
            return;
        }
        if let Err(err) = std::os::unix::fs::chown(path, self.dir_uid, self.dir_gid) {
            tracing::warn!(
                "could not change '{}' to the configured owner: {err}",
                path.display()
            );
        }
    }
}

/// Appends a suffix to a log path, keeping non-UTF-8 paths intact.
pub(crate) fn path_with_suffix(log_path: &Path, suffix: &str) -> PathBuf {
    let mut os = log_path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// Creates the missing parent directories of `path` one component at a time
/// so each new directory gets the configured mode and ownership.
pub(crate) fn create_parent_dirs(path: &Path, options: &FileOptions) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    let mut missing = Vec::new();
    let mut cursor = parent;
    while !cursor.as_os_str().is_empty() && !cursor.exists() {
        missing.push(cursor.to_path_buf());
        match cursor.parent() {
            Some(next) => cursor = next,
            None => break,
        }
    }

    for dir in missing.iter().rev() {
        match fs::DirBuilder::new().mode(options.dir_mode).create(dir) {
            Ok(()) => options.apply_dir_ownership(dir),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Opens an output file in append mode, creating it (directories included)
/// if needed. A newly created file gets `header` as its first bytes. An
/// advisory write lock is taken; failure to lock is reported but not fatal.
pub(crate) fn open_output_file(
    path: &Path,
    options: &FileOptions,
    header: &[u8],
) -> io::Result<BufWriter<File>> {
    use std::os::unix::fs::OpenOptionsExt;

    create_parent_dirs(path, options)?;

    let file = match OpenOptions::new().read(true).append(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let file = OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .mode(options.file_mode)
                .open(path)?;
            options.apply_file_ownership(&file, path);
            file
        }
        Err(err) => return Err(err),
    };

    if let Err(err) = file.try_lock_exclusive() {
        tracing::warn!("could not lock '{}': {err}", path.display());
    }

    let is_new = file.metadata()?.len() == 0;
    let mut writer = BufWriter::with_capacity(FILE_BUF_SIZE, file);
    if is_new {
        writer.write_all(header)?;
    }
    Ok(writer)
}

/// Signature file handed to the worker through the queue.
#[derive(Debug)]
pub(crate) struct SignatureFile {
    pub writer: BufWriter<File>,
    pub path: PathBuf,
}
