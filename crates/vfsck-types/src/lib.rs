#![forbid(unsafe_code)]
//! Layout constants, unit-carrying newtypes, and byte helpers shared by every
//! vfsck crate.
//!
//! The on-disk format is little-endian throughout. All helpers here are pure
//! and bounds-checked: they never index past the slice they are given.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of one on-disk inode record in bytes.
pub const INODE_SIZE: usize = 64;
/// Number of direct block addresses stored in each inode.
pub const NUM_DIRECT: usize = 12;
/// Width of one stored block address.
pub const ADDR_SIZE: usize = 4;
/// Size of one directory entry record in bytes.
pub const DIRENT_SIZE: usize = 16;
/// Fixed width of the NUL-padded name field of a directory entry.
pub const DIR_NAME_LEN: usize = 14;

/// Inode type tags as stored on disk.
pub const T_FREE: u16 = 0;
pub const T_DIR: u16 = 1;
pub const T_FILE: u16 = 2;
pub const T_DEV: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u32);

impl BlockNumber {
    /// Address zero never names a data block; inodes use it for "unset".
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl InodeNumber {
    /// Permanently reserved; a directory slot holding it is empty.
    pub const NONE: Self = Self(0);
    pub const ROOT: Self = Self(1);
}

impl From<u16> for InodeNumber {
    fn from(raw: u16) -> Self {
        Self(u32::from(raw))
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Geometry ────────────────────────────────────────────────────────────────

/// Fixed image layout.
///
/// ```text
/// [ boot | super | log ... | inode table ... | bitmap | data ... ]
///   0      1       2         inode_start       bitmap   data_start
/// ```
///
/// Every region boundary is a compile-time fact of the format, not something
/// read from the image. The superblock is only cross-checked against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub block_size: usize,
    pub total_blocks: u32,
    pub inode_count: u32,
    pub log_start: u32,
    pub log_blocks: u32,
    pub inode_start: u32,
    pub bitmap_start: u32,
    pub data_start: u32,
    /// Index of the bitmap byte that still holds metadata bits after every
    /// referenced block has been cleared.
    pub reserved_bitmap_byte: usize,
    /// Expected value of that byte. Literal from the reference layout.
    pub reserved_bitmap_pattern: u8,
}

impl Geometry {
    pub const STANDARD: Self = Self {
        block_size: 512,
        total_blocks: 1000,
        inode_count: 200,
        log_start: 2,
        log_blocks: 30,
        inode_start: 32,
        bitmap_start: 58,
        data_start: 59,
        reserved_bitmap_byte: 7,
        reserved_bitmap_pattern: 0x07,
    };

    /// Minimum byte length of an image with this geometry.
    #[must_use]
    pub fn image_len(self) -> Option<usize> {
        usize::try_from(self.total_blocks)
            .ok()?
            .checked_mul(self.block_size)
    }

    #[must_use]
    pub fn inodes_per_block(self) -> usize {
        self.block_size / INODE_SIZE
    }

    /// Addresses held by one indirect block.
    #[must_use]
    pub fn indirect_per_block(self) -> usize {
        self.block_size / ADDR_SIZE
    }

    /// Directory entry slots in a directory's single data block.
    #[must_use]
    pub fn dirents_per_block(self) -> usize {
        self.block_size / DIRENT_SIZE
    }

    /// Bytes of the allocation bitmap that cover `total_blocks`.
    #[must_use]
    pub fn bitmap_bytes(self) -> usize {
        (self.total_blocks as usize).div_ceil(8)
    }

    /// Blocks occupied by the inode table. The format always rounds up by a
    /// whole extra block, even when the count divides evenly.
    #[must_use]
    pub fn inode_blocks(self) -> u32 {
        let per_block = u32::try_from(self.inodes_per_block().max(1)).unwrap_or(u32::MAX);
        self.inode_count / per_block + 1
    }

    /// Byte offset of `block`, or `None` on overflow.
    #[must_use]
    pub fn block_offset(self, block: BlockNumber) -> Option<usize> {
        usize::try_from(block.0).ok()?.checked_mul(self.block_size)
    }

    /// Byte offset of the inode record for `ino`. Does not range-check `ino`.
    #[must_use]
    pub fn inode_offset(self, ino: InodeNumber) -> Option<usize> {
        let table = self.block_offset(BlockNumber(self.inode_start))?;
        let index = usize::try_from(ino.0).ok()?;
        table.checked_add(index.checked_mul(INODE_SIZE)?)
    }

    /// True iff `block` lies in the data region.
    #[must_use]
    pub fn is_in_bounds(self, block: BlockNumber) -> bool {
        block.0 >= self.data_start && block.0 < self.total_blocks
    }

    /// True iff `block` is addressable by the bitmap at all.
    #[must_use]
    pub fn contains_block(self, block: BlockNumber) -> bool {
        block.0 < self.total_blocks
    }

    #[must_use]
    pub fn contains_inode(self, ino: InodeNumber) -> bool {
        ino.0 < self.inode_count
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::STANDARD
    }
}

// ── Parse errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    /// An index exceeded a fixed capacity of the format. This is a caller
    /// bug, never a property of the image.
    #[error("{field} index {index} out of range (limit {limit})")]
    IndexOutOfRange {
        field: &'static str,
        index: u64,
        limit: u64,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn ensure_slice_mut(
    data: &mut [u8],
    offset: usize,
    len: usize,
) -> Result<&mut [u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    let actual = data.len().saturating_sub(offset);
    data.get_mut(offset..end)
        .ok_or(ParseError::InsufficientData {
            needed: len,
            offset,
            actual,
        })
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn write_le_u16(data: &mut [u8], offset: usize, value: u16) -> Result<(), ParseError> {
    ensure_slice_mut(data, offset, 2)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) -> Result<(), ParseError> {
    ensure_slice_mut(data, offset, 4)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Bytes of a NUL-padded field up to (not including) the first NUL.
#[must_use]
pub fn until_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}
