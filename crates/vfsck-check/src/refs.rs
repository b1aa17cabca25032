//! Reference analysis.
//!
//! One pass over the inode table builds every table the later passes read:
//!
//! - direct-reference counts per block address (direct slots plus the
//!   inode's own indirect block),
//! - indirect-reference counts per block address (entries inside indirect
//!   blocks),
//! - per-inode reference counts from directory entries in slots 2 and up,
//! - the set of inodes in use and the set of directories.
//!
//! Direct and indirect counts are kept apart: a block may be the indirect
//! block of one inode and also appear inside another inode's indirect
//! block, and the aliasing rule needs to tell those apart.

use crate::ParseResultExt;
use crate::report::{Finding, FindingKind, Reporter};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use vfsck_error::Result;
use vfsck_ondisk::Image;
use vfsck_ondisk::dirent::FIRST_CHILD_SLOT;
use vfsck_types::{BlockNumber, InodeNumber};

/// Reference tables derived from one image. Built fresh per run.
#[derive(Debug, Clone, Default)]
pub struct RefTables {
    pub direct: BTreeMap<BlockNumber, u32>,
    pub indirect: BTreeMap<BlockNumber, u32>,
    /// Indexed by inode number.
    pub inode_refs: Vec<u32>,
    pub used: BTreeSet<InodeNumber>,
    pub directories: BTreeSet<InodeNumber>,
}

impl RefTables {
    fn with_inode_count(count: u32) -> Self {
        Self {
            inode_refs: vec![0; count as usize],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn direct_count(&self, block: BlockNumber) -> u32 {
        self.direct.get(&block).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn indirect_count(&self, block: BlockNumber) -> u32 {
        self.indirect.get(&block).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn inode_refs(&self, ino: InodeNumber) -> u32 {
        self.inode_refs.get(ino.0 as usize).copied().unwrap_or(0)
    }

    /// Every non-zero address with a direct or indirect reference, ascending.
    #[must_use]
    pub fn referenced_blocks(&self) -> BTreeSet<BlockNumber> {
        self.direct
            .keys()
            .chain(self.indirect.keys())
            .copied()
            .filter(|block| !block.is_none())
            .collect()
    }

    fn count_direct(&mut self, block: BlockNumber) {
        *self.direct.entry(block).or_insert(0) += 1;
    }

    fn count_indirect(&mut self, block: BlockNumber) {
        *self.indirect.entry(block).or_insert(0) += 1;
    }
}

/// Build the reference tables. Directory slots naming an inode beyond the
/// table are reported and skipped. A directory whose block lies past the end
/// of the image contributes no entries; the bounds check reports its address.
pub fn analyze_references<B: AsRef<[u8]>>(
    image: &Image<B>,
    reporter: &mut dyn Reporter,
) -> Result<RefTables> {
    let geometry = image.geometry();
    let mut tables = RefTables::with_inode_count(geometry.inode_count);

    // The root is referenced by being the root.
    if let Some(root) = tables.inode_refs.get_mut(InodeNumber::ROOT.0 as usize) {
        *root += 1;
    }

    // Inode 0 is reserved; the structural pass already reported it if set.
    for raw in 1..geometry.inode_count {
        let ino = InodeNumber(raw);
        let inode = image.read_inode(ino).or_fatal(geometry)?;
        if inode.is_free() {
            continue;
        }
        tables.used.insert(ino);

        if inode.is_dir() {
            tables.directories.insert(ino);
        }
        if inode.is_dir() && image.has_dir_block(&inode) {
            let entries = image.read_dirents(&inode).or_fatal(geometry)?;
            for entry in entries.iter().skip(FIRST_CHILD_SLOT) {
                if entry.is_free() {
                    continue;
                }
                match tables.inode_refs.get_mut(entry.inode.0 as usize) {
                    Some(count) => *count += 1,
                    None => {
                        reporter.report(Finding::at_inode(FindingKind::BadDirectoryEntry, ino))?;
                    }
                }
            }
        }

        for &addr in &inode.direct {
            if !addr.is_none() {
                tables.count_direct(addr);
            }
        }

        // The indirect block is itself a block owned directly by this inode.
        // Zero is counted too and filtered out by every consumer.
        tables.count_direct(inode.indirect);

        if image.is_in_bounds(inode.indirect) {
            for addr in image.read_indirect_block(inode.indirect).or_fatal(geometry)? {
                if !addr.is_none() {
                    tables.count_indirect(addr);
                }
            }
        }
    }

    debug!(
        used = tables.used.len(),
        directories = tables.directories.len(),
        direct = tables.direct.len(),
        indirect = tables.indirect.len(),
        "reference pass complete"
    );
    Ok(tables)
}
