//! Superblock (block 1).

use serde::{Deserialize, Serialize};
use vfsck_types::{Geometry, ParseError, read_le_u32};

pub const SUPERBLOCK_SIZE: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    /// Image size in blocks.
    pub size: u32,
    /// Data blocks.
    pub nblocks: u32,
    pub ninodes: u32,
    pub nlog: u32,
    pub logstart: u32,
    pub inodestart: u32,
    pub bmapstart: u32,
}

impl Superblock {
    /// The superblock a correctly formatted image of `geometry` carries.
    #[must_use]
    pub fn for_geometry(geometry: Geometry) -> Self {
        Self {
            size: geometry.total_blocks,
            nblocks: geometry.total_blocks.saturating_sub(geometry.data_start),
            ninodes: geometry.inode_count,
            nlog: geometry.log_blocks,
            logstart: geometry.log_start,
            inodestart: geometry.inode_start,
            bmapstart: geometry.bitmap_start,
        }
    }

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            size: read_le_u32(bytes, 0x00)?,
            nblocks: read_le_u32(bytes, 0x04)?,
            ninodes: read_le_u32(bytes, 0x08)?,
            nlog: read_le_u32(bytes, 0x0C)?,
            logstart: read_le_u32(bytes, 0x10)?,
            inodestart: read_le_u32(bytes, 0x14)?,
            bmapstart: read_le_u32(bytes, 0x18)?,
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE] {
        let fields = [
            self.size,
            self.nblocks,
            self.ninodes,
            self.nlog,
            self.logstart,
            self.inodestart,
            self.bmapstart,
        ];
        let mut out = [0_u8; SUPERBLOCK_SIZE];
        for (chunk, value) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Check the fields the checker relies on against the fixed layout.
    pub fn validate(&self, geometry: Geometry) -> Result<(), ParseError> {
        if self.size != geometry.total_blocks {
            return Err(ParseError::InvalidField {
                field: "size",
                reason: "does not match the fixed image size",
            });
        }
        if self.ninodes != geometry.inode_count {
            return Err(ParseError::InvalidField {
                field: "ninodes",
                reason: "does not match the fixed inode count",
            });
        }
        if self.inodestart != geometry.inode_start {
            return Err(ParseError::InvalidField {
                field: "inodestart",
                reason: "inode table is not at the fixed block",
            });
        }
        if self.bmapstart != geometry.bitmap_start {
            return Err(ParseError::InvalidField {
                field: "bmapstart",
                reason: "bitmap is not at the fixed block",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_superblock_validates() {
        let sb = Superblock::for_geometry(Geometry::STANDARD);
        assert_eq!(sb.nblocks, 941);
        assert_eq!(sb.nlog, 30);
        let parsed = Superblock::parse_from_bytes(&sb.encode()).unwrap();
        assert_eq!(parsed, sb);
        assert!(parsed.validate(Geometry::STANDARD).is_ok());
    }

    #[test]
    fn moved_inode_table_is_rejected() {
        let mut sb = Superblock::for_geometry(Geometry::STANDARD);
        sb.inodestart = 33;
        assert_eq!(
            sb.validate(Geometry::STANDARD),
            Err(ParseError::InvalidField {
                field: "inodestart",
                reason: "inode table is not at the fixed block",
            })
        );
    }

    #[test]
    fn blank_superblock_is_rejected() {
        let sb = Superblock::parse_from_bytes(&[0_u8; SUPERBLOCK_SIZE]).unwrap();
        assert!(sb.validate(Geometry::STANDARD).is_err());
    }
}
