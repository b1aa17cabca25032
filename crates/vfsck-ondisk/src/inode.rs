//! Inode records.

use serde::{Deserialize, Serialize};
use std::fmt;
use vfsck_types::{
    ADDR_SIZE, BlockNumber, INODE_SIZE, NUM_DIRECT, ParseError, T_DEV, T_DIR, T_FILE, T_FREE,
    read_le_u16, read_le_u32,
};

const TYPE_OFFSET: usize = 0x00;
const MAJOR_OFFSET: usize = 0x02;
const MINOR_OFFSET: usize = 0x04;
const NLINK_OFFSET: usize = 0x06;
const SIZE_OFFSET: usize = 0x08;
const ADDRS_OFFSET: usize = 0x0C;
const INDIRECT_OFFSET: usize = ADDRS_OFFSET + NUM_DIRECT * ADDR_SIZE;

/// Legal inode type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InodeType {
    Free,
    Directory,
    File,
    Device,
}

impl InodeType {
    /// Decode a stored tag. Any value outside the legal set yields `None`.
    #[must_use]
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            T_FREE => Some(Self::Free),
            T_DIR => Some(Self::Directory),
            T_FILE => Some(Self::File),
            T_DEV => Some(Self::Device),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_raw(self) -> u16 {
        match self {
            Self::Free => T_FREE,
            Self::Directory => T_DIR,
            Self::File => T_FILE,
            Self::Device => T_DEV,
        }
    }
}

impl fmt::Display for InodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Directory => write!(f, "directory"),
            Self::File => write!(f, "file"),
            Self::Device => write!(f, "device"),
        }
    }
}

/// One 64-byte inode record.
///
/// `raw_type` is kept undecoded so that the structural pass can report
/// illegal tags; every other pass goes through [`DiskInode::kind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInode {
    pub raw_type: u16,
    pub major: u16,
    pub minor: u16,
    pub nlink: u16,
    pub size: u32,
    pub direct: [BlockNumber; NUM_DIRECT],
    pub indirect: BlockNumber,
}

impl DiskInode {
    /// An all-zero (free) record.
    #[must_use]
    pub fn free() -> Self {
        Self {
            raw_type: T_FREE,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            direct: [BlockNumber::NONE; NUM_DIRECT],
            indirect: BlockNumber::NONE,
        }
    }

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < INODE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: INODE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mut direct = [BlockNumber::NONE; NUM_DIRECT];
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = BlockNumber(read_le_u32(bytes, ADDRS_OFFSET + i * ADDR_SIZE)?);
        }

        Ok(Self {
            raw_type: read_le_u16(bytes, TYPE_OFFSET)?,
            major: read_le_u16(bytes, MAJOR_OFFSET)?,
            minor: read_le_u16(bytes, MINOR_OFFSET)?,
            nlink: read_le_u16(bytes, NLINK_OFFSET)?,
            size: read_le_u32(bytes, SIZE_OFFSET)?,
            direct,
            indirect: BlockNumber(read_le_u32(bytes, INDIRECT_OFFSET)?),
        })
    }

    /// Serialize into a 64-byte record.
    #[must_use]
    pub fn encode(&self) -> [u8; INODE_SIZE] {
        let mut out = [0_u8; INODE_SIZE];
        out[TYPE_OFFSET..TYPE_OFFSET + 2].copy_from_slice(&self.raw_type.to_le_bytes());
        out[MAJOR_OFFSET..MAJOR_OFFSET + 2].copy_from_slice(&self.major.to_le_bytes());
        out[MINOR_OFFSET..MINOR_OFFSET + 2].copy_from_slice(&self.minor.to_le_bytes());
        out[NLINK_OFFSET..NLINK_OFFSET + 2].copy_from_slice(&self.nlink.to_le_bytes());
        out[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&self.size.to_le_bytes());
        for (i, addr) in self.direct.iter().enumerate() {
            let off = ADDRS_OFFSET + i * ADDR_SIZE;
            out[off..off + ADDR_SIZE].copy_from_slice(&addr.0.to_le_bytes());
        }
        out[INDIRECT_OFFSET..INDIRECT_OFFSET + ADDR_SIZE]
            .copy_from_slice(&self.indirect.0.to_le_bytes());
        out
    }

    #[must_use]
    pub fn kind(&self) -> Option<InodeType> {
        InodeType::from_raw(self.raw_type)
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.raw_type == T_FREE
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.raw_type == T_DIR
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.raw_type == T_FILE
    }

    /// The block holding a directory's entries. Directories never span more
    /// than their first direct block.
    #[must_use]
    pub fn dir_block(&self) -> BlockNumber {
        self.direct[0]
    }
}
