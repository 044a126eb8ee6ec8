//! Normalized store paths.

use std::fmt;

/// An absolute, `/`-separated, normalized path.
///
/// Normalization drops empty and `.` segments, resolves `..` (clamped at the
/// root), and strips the trailing slash. The root is `/`; every other path
/// starts with `/` and does not end with one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath(String);

impl StorePath {
    /// The root path.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Normalize `raw` into a store path. Relative input is taken from the root.
    pub fn new(raw: &str) -> Self {
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            Self::root()
        } else {
            Self(format!("/{}", segments.join("/")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// The path without its leading slash; empty for the root.
    pub fn relative(&self) -> &str {
        &self.0[1..]
    }

    /// Parent directory, or `None` for the root.
    pub fn parent(&self) -> Option<StorePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
        }
    }

    /// Final segment; `/` for the root.
    pub fn name(&self) -> &str {
        if self.is_root() {
            return "/";
        }
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Append a child segment.
    pub fn join(&self, child: &str) -> StorePath {
        if self.is_root() {
            Self::new(child)
        } else {
            Self::new(&format!("{}/{}", self.0, child))
        }
    }

    /// Every proper ancestor except the root, outermost first, then `self`.
    ///
    /// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`. The root yields nothing.
    pub fn lineage(&self) -> Vec<StorePath> {
        let mut out = Vec::new();
        let mut current = String::new();
        for segment in self.relative().split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            out.push(Self(current.clone()));
        }
        out
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorePath {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl AsRef<str> for StorePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
