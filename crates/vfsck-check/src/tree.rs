//! Directory tree validation.
//!
//! Usage and reference agreement, link counts, parent back-references, and a
//! single depth-first walk from the root that proves the tree acyclic and
//! fully rooted at once.

use crate::ParseResultExt;
use crate::refs::RefTables;
use crate::report::{Finding, FindingKind, Reporter};
use std::collections::BTreeSet;
use tracing::debug;
use vfsck_error::Result;
use vfsck_ondisk::Image;
use vfsck_ondisk::dirent::{FIRST_CHILD_SLOT, PARENT_SLOT};
use vfsck_types::InodeNumber;

/// Run every tree check and return the orphan inodes, ascending.
pub fn validate_tree<B: AsRef<[u8]>>(
    image: &Image<B>,
    tables: &RefTables,
    reporter: &mut dyn Reporter,
) -> Result<Vec<InodeNumber>> {
    let orphans = check_usage(image, tables, reporter)?;
    check_link_counts(image, tables, reporter)?;
    check_parent_links(image, tables, reporter)?;
    walk_directory_tree(image, tables, reporter)?;
    Ok(orphans)
}

/// "In use" must agree with "named by a directory entry". Returns the inodes
/// that are in use but unnamed.
pub fn check_usage<B: AsRef<[u8]>>(
    image: &Image<B>,
    tables: &RefTables,
    reporter: &mut dyn Reporter,
) -> Result<Vec<InodeNumber>> {
    let mut unreferenced = tables.used.clone();
    for raw in 1..image.geometry().inode_count {
        let ino = InodeNumber(raw);
        let used = tables.used.contains(&ino);
        let referenced = tables.inode_refs(ino) > 0;
        match (used, referenced) {
            (true, true) => {
                unreferenced.remove(&ino);
            }
            (true, false) => {
                reporter.report(Finding::at_inode(FindingKind::UnreferencedInode, ino))?;
            }
            (false, true) => {
                reporter.report(Finding::at_inode(FindingKind::FreeInodeReferenced, ino))?;
            }
            (false, false) => {}
        }
    }
    let orphans: Vec<_> = unreferenced.into_iter().collect();
    debug!(orphans = orphans.len(), "usage pass complete");
    Ok(orphans)
}

/// Files: stored link count equals the computed reference count.
/// Directories: neither may exceed one.
pub fn check_link_counts<B: AsRef<[u8]>>(
    image: &Image<B>,
    tables: &RefTables,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let geometry = image.geometry();
    for &ino in &tables.used {
        let inode = image.read_inode(ino).or_fatal(geometry)?;
        let refs = tables.inode_refs(ino);
        if inode.is_file() && u32::from(inode.nlink) != refs {
            reporter.report(Finding::at_inode(FindingKind::FileLinkCount, ino))?;
        } else if inode.is_dir() && (inode.nlink > 1 || refs > 1) {
            reporter.report(Finding::at_inode(FindingKind::DirectoryLinkCount, ino))?;
        }
    }
    Ok(())
}

/// Every directory other than the root names a directory parent that lists
/// it back in one of its child slots.
pub fn check_parent_links<B: AsRef<[u8]>>(
    image: &Image<B>,
    tables: &RefTables,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let geometry = image.geometry();
    for &ino in tables.directories.iter().filter(|&&ino| ino != InodeNumber::ROOT) {
        let dir = image.read_inode(ino).or_fatal(geometry)?;
        if !image.has_dir_block(&dir) {
            continue;
        }
        let parent_ino = image.read_dirent(&dir, PARENT_SLOT).or_fatal(geometry)?.inode;
        if !geometry.contains_inode(parent_ino) {
            reporter.report(Finding::at_inode(FindingKind::BadDirectoryEntry, ino))?;
            continue;
        }

        let parent = image.read_inode(parent_ino).or_fatal(geometry)?;
        if !parent.is_dir() {
            reporter.report(Finding::at_inode(FindingKind::ParentNotDirectory, ino))?;
            continue;
        }

        let listed = image.has_dir_block(&parent)
            && image
                .read_dirents(&parent)
                .or_fatal(geometry)?
                .iter()
                .skip(FIRST_CHILD_SLOT)
                .any(|entry| entry.inode == ino);
        if !listed {
            reporter.report(Finding::at_inode(FindingKind::ParentMismatch, ino))?;
        }
    }
    Ok(())
}

/// Depth-first walk from the root over child slots.
///
/// Starts with every directory unvisited. Reaching a directory that is no
/// longer unvisited is a cycle; it is reported once per run and not expanded
/// again. Directories still unvisited at the end are unreachable and each is
/// reported once.
pub fn walk_directory_tree<B: AsRef<[u8]>>(
    image: &Image<B>,
    tables: &RefTables,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let geometry = image.geometry();
    let mut unvisited: BTreeSet<InodeNumber> = tables.directories.clone();
    let mut stack = vec![InodeNumber::ROOT];
    let mut cycle_reported = false;

    while let Some(ino) = stack.pop() {
        let inode = image.read_inode(ino).or_fatal(geometry)?;
        if !inode.is_dir() {
            continue;
        }
        if !unvisited.remove(&ino) {
            if !cycle_reported {
                cycle_reported = true;
                reporter.report(Finding::at_inode(FindingKind::DirectoryCycle, ino))?;
            }
            continue;
        }
        if !image.has_dir_block(&inode) {
            continue;
        }

        let entries = image.read_dirents(&inode).or_fatal(geometry)?;
        // Reversed so children are visited in slot order.
        for entry in entries.iter().skip(FIRST_CHILD_SLOT).rev() {
            if !entry.is_free() && geometry.contains_inode(entry.inode) {
                stack.push(entry.inode);
            }
        }
    }

    for &ino in &unvisited {
        reporter.report(Finding::at_inode(FindingKind::InaccessibleDirectory, ino))?;
    }
    debug!(unreachable = unvisited.len(), cycle = cycle_reported, "tree walk complete");
    Ok(())
}
