#![forbid(unsafe_code)]
//! Orphan relocation.
//!
//! The only mutation vfsck ever performs: inodes that are in use but named
//! by no directory entry get an entry in `lost_found`. Each orphan takes the
//! first free slot of the `lost_found` directory block, in ascending inode
//! order, and only the inode-number field of that slot is written. No other
//! finding is corrected.
//!
//! Slots are written straight into the image buffer. If `lost_found` fills
//! up part way, the slots already written stay written and the outcome lists
//! them, so callers persist the buffer whenever [`RepairOutcome::mutated`]
//! holds, failed or not.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vfsck_check::{CheckReport, CollectingReporter, ParseResultExt, check};
use vfsck_error::{Result, VfsckError};
use vfsck_ondisk::Image;
use vfsck_types::InodeNumber;

pub const LOST_FOUND_NAME: &[u8] = b"lost_found";

const NO_LOST_FOUND: &str = "root directory does not contain the lost_found directory";
const LOST_FOUND_FULL: &str = "lost_found directory is full, unable to repair file system image";

/// One orphan and the `lost_found` slot it was written into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub inode: InodeNumber,
    pub slot: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RepairOutcome {
    /// No orphans; the image was not touched.
    NotNeeded,
    Relocated {
        lost_found: InodeNumber,
        placements: Vec<Placement>,
    },
    /// Orphans exist but the root has no `lost_found` directory. Nothing
    /// was written.
    NoLostFound { orphans: Vec<InodeNumber> },
    /// `lost_found` ran out of free slots. `placements` were written before
    /// that happened and stay written.
    LostFoundFull {
        lost_found: InodeNumber,
        placements: Vec<Placement>,
        unplaced: Vec<InodeNumber>,
    },
}

impl RepairOutcome {
    /// Slots written into the image, including those written before a
    /// failure.
    #[must_use]
    pub fn placements(&self) -> &[Placement] {
        match self {
            Self::Relocated { placements, .. } | Self::LostFoundFull { placements, .. } => {
                placements
            }
            Self::NotNeeded | Self::NoLostFound { .. } => &[],
        }
    }

    /// True iff the image buffer differs from what was read.
    #[must_use]
    pub fn mutated(&self) -> bool {
        !self.placements().is_empty()
    }

    /// The error a failed relocation ends the run with, if it failed.
    #[must_use]
    pub fn failure(&self) -> Option<VfsckError> {
        match self {
            Self::NotNeeded | Self::Relocated { .. } => None,
            Self::NoLostFound { .. } => Some(VfsckError::RepairFailed(NO_LOST_FOUND.to_owned())),
            Self::LostFoundFull { .. } => {
                Some(VfsckError::RepairFailed(LOST_FOUND_FULL.to_owned()))
            }
        }
    }

    /// `Ok(self)` when every orphan was placed, otherwise the failure.
    pub fn into_result(self) -> Result<Self> {
        match self.failure() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// A collecting check followed by relocation of its orphans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRun {
    pub report: CheckReport,
    pub outcome: RepairOutcome,
}

impl RepairRun {
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Inode named `lost_found` in the root directory, if that inode is a
/// directory inside the inode table with a readable directory block.
pub fn find_lost_found<B: AsRef<[u8]>>(image: &Image<B>) -> Result<Option<InodeNumber>> {
    let geometry = image.geometry();
    let root = image.read_inode(InodeNumber::ROOT).or_fatal(geometry)?;
    if !root.is_dir() || !image.has_dir_block(&root) {
        return Ok(None);
    }

    for entry in image.read_dirents(&root).or_fatal(geometry)? {
        if entry.is_free() || !entry.is_named(LOST_FOUND_NAME) {
            continue;
        }
        if !geometry.contains_inode(entry.inode) {
            debug!(inode = entry.inode.0, "lost_found entry outside inode table");
            return Ok(None);
        }
        let inode = image.read_inode(entry.inode).or_fatal(geometry)?;
        return Ok((inode.is_dir() && image.has_dir_block(&inode)).then_some(entry.inode));
    }
    Ok(None)
}

/// Give every orphan an entry in `lost_found`.
///
/// A missing `lost_found` yields [`RepairOutcome::NoLostFound`] with nothing
/// written. Running out of free slots yields
/// [`RepairOutcome::LostFoundFull`]; the orphans placed before that remain
/// placed. `Err` is reserved for images that cannot be read.
pub fn relocate_orphans<B>(image: &mut Image<B>, orphans: &[InodeNumber]) -> Result<RepairOutcome>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    if orphans.is_empty() {
        debug!("no orphans to relocate");
        return Ok(RepairOutcome::NotNeeded);
    }

    let mut ordered = orphans.to_vec();
    ordered.sort_unstable();
    ordered.dedup();

    let geometry = image.geometry();
    let Some(lost_found) = find_lost_found(image)? else {
        warn!(orphans = ordered.len(), "no lost_found directory");
        return Ok(RepairOutcome::NoLostFound { orphans: ordered });
    };
    let dir = image.read_inode(lost_found).or_fatal(geometry)?;

    let free_slots: Vec<usize> = image
        .read_dirents(&dir)
        .or_fatal(geometry)?
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.is_free())
        .map(|(slot, _)| slot)
        .collect();

    let mut placements = Vec::with_capacity(ordered.len());
    for (inode, &slot) in ordered.iter().zip(&free_slots) {
        image.set_dirent_inode(&dir, slot, *inode).or_fatal(geometry)?;
        info!(inode = inode.0, slot, lost_found = lost_found.0, "orphan relocated");
        placements.push(Placement {
            inode: *inode,
            slot,
        });
    }

    if placements.len() < ordered.len() {
        let unplaced = ordered.split_off(placements.len());
        warn!(
            placed = placements.len(),
            unplaced = unplaced.len(),
            "lost_found directory is full"
        );
        return Ok(RepairOutcome::LostFoundFull {
            lost_found,
            placements,
            unplaced,
        });
    }

    Ok(RepairOutcome::Relocated {
        lost_found,
        placements,
    })
}

/// Check `image` collecting every finding, then relocate the orphans.
///
/// A relocation that could not place every orphan still returns the run;
/// see [`RepairOutcome::failure`].
pub fn repair<B>(image: &mut Image<B>) -> Result<RepairRun>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    let report = check(image, &mut CollectingReporter::new())?;
    let outcome = relocate_orphans(image, &report.orphans)?;
    Ok(RepairRun { report, outcome })
}
