//! Cloud backend constants.

/// Payloads larger than this are uploaded as a multipart upload.
pub const MULTIPART_THRESHOLD: usize = 8 * 1024 * 1024;

/// Final path segment standing in for a `dir/` marker key.
///
/// Object store paths cannot end in a delimiter, so the marker for `a/b/` is
/// stored as `a/b/.kura_dir`.
pub const DIR_MARKER: &str = ".kura_dir";
