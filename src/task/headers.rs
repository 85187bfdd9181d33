//! Request headers attached to a task

use crate::error::{Error, Result};
use crate::retry::ResumeParams;

/// Ordered multi-map of request headers
///
/// Names compare case-insensitively; insertion order and duplicates are kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    /// Create an empty header list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] for an empty name or a name or
    /// value containing a line break.
    pub fn add(&mut self, name: &str, value: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() || name.contains(':') {
            return Err(Error::invalid_config(
                "header",
                format!("invalid header name: {:?}", name),
            ));
        }
        if name.contains(['\r', '\n']) || value.contains(['\r', '\n']) {
            return Err(Error::invalid_config(
                "header",
                format!("header {} contains a line break", name),
            ));
        }

        self.entries.push((name.to_string(), value.trim().to_string()));
        Ok(())
    }

    /// Append a header given as a raw `Name: value` line
    pub fn add_line(&mut self, line: &str) -> Result<()> {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            Error::invalid_config("header", format!("header line has no colon: {:?}", line))
        })?;
        self.add(name, value)
    }

    /// Remove every header with the given name; returns how many were removed
    pub fn remove_all(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// Whether a header with this name is present
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// All values for a name, in insertion order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over `(name, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of header entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of this list with the resume headers added where the caller left gaps
    ///
    /// User-supplied `If-Match` and `Range` headers always win.
    pub fn with_resume(&self, resume: &ResumeParams) -> HeaderList {
        let mut merged = self.clone();

        if let Some(etag) = &resume.etag
            && !self.contains("If-Match")
        {
            merged.entries.push(("If-Match".to_string(), etag.clone()));
        }
        if let Some(offset) = resume.offset
            && !self.contains("Range")
        {
            merged
                .entries
                .push(("Range".to_string(), format!("bytes={}-", offset)));
        }

        merged
    }
}
