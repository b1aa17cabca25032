//! Finding taxonomy and reporting sinks.
//!
//! Every pass hands its findings to a [`Reporter`] and propagates whatever
//! the reporter returns. The two implementations encode the two policies:
//!
//! - [`StrictReporter`] records the finding and returns
//!   [`VfsckError::Inconsistent`], so the first finding ends the run.
//! - [`CollectingReporter`] records the finding and lets the run continue.
//!
//! Passes never learn which policy is active.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;
use vfsck_error::{Result, VfsckError};
use vfsck_types::{BlockNumber, InodeNumber};

// ── Finding taxonomy ────────────────────────────────────────────────────────

/// Category of a consistency finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Type tag outside {free, directory, file, device}, or reserved inode 0 in use.
    BadInode,
    BadDirectAddress,
    BadIndirectAddress,
    /// Inode 1 is not a directory, or its `.`/`..` do not name inode 1.
    RootMissing,
    /// Slot 0 is not `.` naming the directory itself, or slot 1 is not `..`.
    DirectoryFormat,
    UsedBlockMarkedFree,
    FreeBlockMarkedUsed,
    DirectAddressReused,
    IndirectAddressReused,
    /// In use but named by no directory entry. These are the repair candidates.
    UnreferencedInode,
    FreeInodeReferenced,
    FileLinkCount,
    DirectoryLinkCount,
    ParentNotDirectory,
    ParentMismatch,
    DirectoryCycle,
    InaccessibleDirectory,
    /// A directory slot names an inode number beyond the inode table.
    BadDirectoryEntry,
}

impl FindingKind {
    /// The fixed one-line message shown to the user.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::BadInode => "bad inode.",
            Self::BadDirectAddress => "bad direct address in inode.",
            Self::BadIndirectAddress => "bad indirect address in inode.",
            Self::RootMissing => "root directory does not exist.",
            Self::DirectoryFormat => "directory not properly formatted.",
            Self::UsedBlockMarkedFree => "address used by inode but marked free in bitmap.",
            Self::FreeBlockMarkedUsed => "bitmap marks block in use but it is not in use.",
            Self::DirectAddressReused => "direct address used more than once.",
            Self::IndirectAddressReused => "indirect address used more than once.",
            Self::UnreferencedInode => "inode marked use but not found in a directory.",
            Self::FreeInodeReferenced => "inode referred to in a directory but marked free.",
            Self::FileLinkCount => "bad reference count for file.",
            Self::DirectoryLinkCount => "directory appears more than once in the system.",
            Self::ParentNotDirectory => "parent of directory is not a directory.",
            Self::ParentMismatch => "parent directory mismatch.",
            Self::DirectoryCycle => "file directory contains a cycle.",
            Self::InaccessibleDirectory => "inaccessible directory exists.",
            Self::BadDirectoryEntry => "directory entry refers to an inode outside the inode table.",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A single consistency finding, with the inode or block it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inode: Option<InodeNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockNumber>,
}

impl Finding {
    #[must_use]
    pub fn new(kind: FindingKind) -> Self {
        Self {
            kind,
            inode: None,
            block: None,
        }
    }

    #[must_use]
    pub fn at_inode(kind: FindingKind, inode: InodeNumber) -> Self {
        Self {
            inode: Some(inode),
            ..Self::new(kind)
        }
    }

    #[must_use]
    pub fn at_block(kind: FindingKind, block: BlockNumber) -> Self {
        Self {
            block: Some(block),
            ..Self::new(kind)
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.message())?;
        match (self.inode, self.block) {
            (Some(inode), Some(block)) => write!(f, " (inode {inode}, block {block})"),
            (Some(inode), None) => write!(f, " (inode {inode})"),
            (None, Some(block)) => write!(f, " (block {block})"),
            (None, None) => Ok(()),
        }
    }
}

// ── Reporter trait ──────────────────────────────────────────────────────────

/// Sink for consistency findings.
pub trait Reporter {
    /// Record `finding`. An `Err` aborts the pass that reported it.
    fn report(&mut self, finding: Finding) -> Result<()>;

    /// Everything recorded so far, in report order.
    fn findings(&self) -> &[Finding];
}

fn log_finding(finding: &Finding) {
    warn!(
        kind = ?finding.kind,
        inode = finding.inode.map(|ino| ino.0),
        block = finding.block.map(|block| block.0),
        "{}",
        finding.kind
    );
}

/// Fail-fast policy for read-only runs.
#[derive(Debug, Default)]
pub struct StrictReporter {
    findings: Vec<Finding>,
}

impl StrictReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for StrictReporter {
    fn report(&mut self, finding: Finding) -> Result<()> {
        log_finding(&finding);
        let message = finding.to_string();
        self.findings.push(finding);
        Err(VfsckError::Inconsistent(message))
    }

    fn findings(&self) -> &[Finding] {
        &self.findings
    }
}

/// Accumulating policy for repair runs.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    findings: Vec<Finding>,
}

impl CollectingReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }
}

impl Reporter for CollectingReporter {
    fn report(&mut self, finding: Finding) -> Result<()> {
        log_finding(&finding);
        self.findings.push(finding);
        Ok(())
    }

    fn findings(&self) -> &[Finding] {
        &self.findings
    }
}
