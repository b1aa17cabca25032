//! Structural pass: every inode carries a legal type tag.

use crate::ParseResultExt;
use crate::report::{Finding, FindingKind, Reporter};
use tracing::debug;
use vfsck_error::Result;
use vfsck_ondisk::Image;
use vfsck_types::InodeNumber;

/// Report every inode whose type tag is outside {free, directory, file,
/// device}, and reserved inode 0 if it is not free.
pub fn validate_inode_types<B: AsRef<[u8]>>(
    image: &Image<B>,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let geometry = image.geometry();
    for raw in 0..geometry.inode_count {
        let ino = InodeNumber(raw);
        let inode = image.read_inode(ino).or_fatal(geometry)?;
        let reserved_in_use = ino == InodeNumber::NONE && !inode.is_free();
        if inode.kind().is_none() || reserved_in_use {
            reporter.report(Finding::at_inode(FindingKind::BadInode, ino))?;
        }
    }
    debug!(inodes = geometry.inode_count, "inode type pass complete");
    Ok(())
}
