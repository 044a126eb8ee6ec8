//! Store-wide constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

/// Size every directory reports, independent of its contents.
pub const DIR_SIZE: u64 = 4096;

/// Permission bits reported for emulated directories.
pub const DIR_PERM: u32 = 0o755;

/// Permission bits given to files made by `create`.
pub const FILE_PERM: u32 = 0o644;

/// Keys requested per listing page from flat backends.
///
/// Matches the common object-store ceiling (S3 `MaxKeys`).
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Prefix of the hidden staging files written before a rename into place.
///
/// Listings skip names with this prefix.
pub const STAGING_PREFIX: &str = ".kura-staging-";
