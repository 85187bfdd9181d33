//! Task identity and target path resolution
//!
//! A task id is a pure function of `(url, path, path_as_directory)`. In directory
//! mode the filename is unknown until the server answers; it comes from the
//! `Content-Disposition` header when present and is otherwise generated from the URL.

use crate::error::{Error, Result};
use crate::types::TaskId;
use std::path::{Path, PathBuf};

/// Derive the stable task id for a URL and target path
///
/// The id is the first eight bytes (big-endian) of the MD5 digest of
/// `"{url}p{path}"`, with an `"@dir"` suffix when `path` is a directory. Changing
/// any of the three inputs changes the id; nothing else does.
///
/// # Examples
///
/// ```
/// use http_dl::identity::generate_id;
///
/// let a = generate_id("https://example.com/a.bin", "/tmp/a.bin", false);
/// let b = generate_id("https://example.com/a.bin", "/tmp/a.bin", false);
/// assert_eq!(a, b);
/// assert_ne!(a, generate_id("https://example.com/a.bin", "/tmp", true));
/// ```
pub fn generate_id(url: &str, path: &str, path_as_directory: bool) -> TaskId {
    let key = if path_as_directory {
        format!("{}p{}@dir", url, path)
    } else {
        format!("{}p{}", url, path)
    };
    let digest = md5::compute(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.0[..8]);
    TaskId(u64::from_be_bytes(bytes))
}

/// Generate a filename from the URL alone (hex MD5 of the URL)
pub fn generate_filename(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

/// A target path split into its directory and (possibly deferred) filename
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Directory the file is written into
    pub directory: PathBuf,
    /// Filename, `None` until resolved at connect time in directory mode
    pub filename: Option<String>,
}

impl ResolvedPath {
    /// Full path of the target file once the filename is known
    pub fn target_file(&self) -> Option<PathBuf> {
        self.filename.as_ref().map(|name| self.directory.join(name))
    }
}

/// Split a configured path into directory and filename
///
/// With `as_directory = false` the last component is the filename and is resolved
/// immediately. With `as_directory = true` the whole path is the directory and the
/// filename is deferred.
///
/// # Errors
///
/// Returns [`Error::InvalidPath`] if the path is empty, or if a file path has no
/// filename component (e.g., `/` or `..`).
pub fn resolve_path(path: &Path, as_directory: bool) -> Result<ResolvedPath> {
    if path.as_os_str().is_empty() {
        return Err(Error::InvalidPath("path is empty".to_string()));
    }

    if as_directory {
        return Ok(ResolvedPath {
            directory: path.to_path_buf(),
            filename: None,
        });
    }

    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::InvalidPath(format!("{} has no file name", path.display())))?;
    let directory = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    Ok(ResolvedPath {
        directory,
        filename: Some(filename.to_string()),
    })
}

/// Pick the filename for a directory-mode task at connect time
///
/// Prefers the server-supplied hint, falling back to [`generate_filename`].
pub fn resolve_filename(url: &str, hint: Option<&str>) -> String {
    hint.and_then(sanitize_filename)
        .unwrap_or_else(|| generate_filename(url))
}

/// Extract a filename from a `Content-Disposition` header value
///
/// Handles both `filename="name.ext"` and the RFC 5987 form
/// `filename*=UTF-8''name%20with%20spaces.ext`; the extended form wins when both
/// are present. Path separators are stripped so the result can never escape the
/// target directory.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;

    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // Format is: charset'lang'encoded-filename
            let encoded = encoded.trim_matches('"');
            let encoded = match encoded.rfind('\'') {
                Some(idx) => &encoded[idx + 1..],
                None => encoded,
            };
            if let Ok(decoded) = urlencoding::decode(encoded)
                && let Some(name) = sanitize_filename(&decoded)
            {
                return Some(name);
            }
        } else if let Some(name) = part.strip_prefix("filename=") {
            plain = sanitize_filename(name.trim_matches('"'));
        }
    }

    plain
}

fn sanitize_filename(name: &str) -> Option<String> {
    let name = name.trim().replace(['/', '\\'], "_");
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name)
    }
}
