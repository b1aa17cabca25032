#![forbid(unsafe_code)]
//! Error types for vfsck.
//!
//! # Error Taxonomy
//!
//! vfsck uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `vfsck-types` | Byte-level failures while decoding the image |
//! | Runtime | `VfsckError` | `vfsck-error` (this crate) | User-facing errors for the CLI and API consumers |
//!
//! `vfsck-error` does not depend on `vfsck-types`. The conversion from
//! `ParseError` to `VfsckError` lives in `vfsck-check`, which depends on both.
//!
//! ## Findings are not errors
//!
//! Consistency findings (bad inode, bitmap mismatch, cycle, ...) are values,
//! collected by a reporter. They only become an error when the strict
//! reporter turns the first one into [`VfsckError::Inconsistent`].
//!
//! | Variant | Abort class |
//! |---------|-------------|
//! | `Io` | fatal-on-read |
//! | `Format` | fatal-on-read |
//! | `InvalidGeometry` | fatal-on-read |
//! | `Corruption` | fatal-on-read |
//! | `IndexOutOfRange` | contract violation, always fatal |
//! | `Inconsistent` | first finding in strict mode |
//! | `RepairFailed` | repair requested but impossible |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsckError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The buffer cannot be interpreted as an image at all.
    #[error("invalid image format: {0}")]
    Format(String),

    /// Superblock or buffer size disagree with the fixed layout.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A read needed bytes the image does not have.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// An accessor was asked for an index beyond a fixed capacity.
    #[error("{what} index {index} out of range (limit {limit})")]
    IndexOutOfRange {
        what: &'static str,
        index: u64,
        limit: u64,
    },

    /// First consistency finding under the fail-fast policy. Carries the
    /// finding's one-line message.
    #[error("{0}")]
    Inconsistent(String),

    /// Repair was requested but cannot be carried out.
    #[error("{0}")]
    RepairFailed(String),
}

impl VfsckError {
    /// True for errors raised because the image itself is inconsistent, as
    /// opposed to being unreadable or the tool being misused.
    #[must_use]
    pub fn is_finding(&self) -> bool {
        matches!(self, Self::Inconsistent(_))
    }
}

/// Result alias using `VfsckError`.
pub type Result<T> = std::result::Result<T, VfsckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formatting() {
        let err = VfsckError::Corruption {
            block: 4000,
            detail: "insufficient data".into(),
        };
        assert_eq!(
            err.to_string(),
            "corrupt metadata at block 4000: insufficient data"
        );

        let range = VfsckError::IndexOutOfRange {
            what: "inode",
            index: 200,
            limit: 200,
        };
        assert_eq!(range.to_string(), "inode index 200 out of range (limit 200)");

        let geom = VfsckError::InvalidGeometry("image is 512 bytes".into());
        assert_eq!(geom.to_string(), "invalid geometry: image is 512 bytes");

        let finding = VfsckError::Inconsistent("bad inode.".into());
        assert_eq!(finding.to_string(), "bad inode.");

        let repair = VfsckError::RepairFailed("lost_found directory is full".into());
        assert_eq!(repair.to_string(), "lost_found directory is full");
    }

    #[test]
    fn only_inconsistent_counts_as_finding() {
        assert!(VfsckError::Inconsistent("x".into()).is_finding());
        assert!(!VfsckError::RepairFailed("x".into()).is_finding());
        assert!(!VfsckError::Io(std::io::Error::other("x")).is_finding());
        assert!(!VfsckError::Format("x".into()).is_finding());
    }
}
