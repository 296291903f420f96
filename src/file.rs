//! File I/O helpers: atomic writes, overwrite policy, default output paths.

use crate::types::DenisError;
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Extension appended to encoded containers.
pub const CONTAINER_EXT: &str = "denis";

/// Atomically write `data` to `path` through a temp file in the same directory.
///
/// The temp file's on-disk length is checked against `data.len()` before it is
/// renamed into place, and the overwrite policy is enforced at rename time.
///
/// # Errors
///
/// Returns `DenisError::Io` for I/O failures, `DenisError::ShortWrite` if the
/// file ended up with the wrong length, or `DenisError::Invalid` if the target
/// exists and `force` is not set.
pub fn write_all_atomic(path: &Path, data: &[u8], force: bool) -> Result<PathBuf, DenisError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;

    let written = tmp.as_file().metadata()?.len();
    if written != data.len() as u64 {
        return Err(DenisError::ShortWrite {
            expected: data.len() as u64,
            written,
        });
    }

    persist_tempfile_atomic(tmp, path, force)
}

/// Atomically persist a tempfile to the target path, honoring the force overwrite policy.
pub fn persist_tempfile_atomic(
    tmp: NamedTempFile,
    out: &Path,
    force: bool,
) -> Result<PathBuf, DenisError> {
    let tmp_path = tmp.into_temp_path();

    if out.exists() {
        if force {
            fs::remove_file(out)?;
        } else {
            return Err(DenisError::Invalid(
                "output exists; use --force to overwrite",
            ));
        }
    }

    tmp_path
        .persist(out)
        .map_err(|e| DenisError::Io(e.error))?;
    Ok(out.to_path_buf())
}

/// Default container path: `<input>.denis`, keeping any existing extension.
pub fn default_encode_output_path(input: &Path) -> PathBuf {
    let mut os = input.as_os_str().to_os_string();
    os.push(".");
    os.push(CONTAINER_EXT);
    PathBuf::from(os)
}

/// Default decode path: strip a trailing `.denis`, otherwise append `.dec`.
pub fn default_decode_output_path(in_path: &Path) -> PathBuf {
    let parent = in_path.parent().unwrap_or_else(|| Path::new(""));
    let file_name = in_path.file_name().unwrap_or_else(|| OsStr::new("out"));

    if let Some(name) = file_name.to_str() {
        if let Some(stripped) = name
            .strip_suffix(CONTAINER_EXT)
            .and_then(|s| s.strip_suffix('.'))
            .filter(|s| !s.is_empty())
        {
            return parent.join(stripped);
        }
        return parent.join(format!("{name}.dec"));
    }

    // Non-UTF-8 file name: just append ".dec"
    let mut os = file_name.to_os_string();
    os.push(".dec");
    parent.join(os)
}
