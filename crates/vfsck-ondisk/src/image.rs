//! Whole-image accessor.
//!
//! [`Image`] wraps a byte buffer together with its [`Geometry`] and hands out
//! typed records. Every index is range-checked against the fixed capacities
//! of the format before any byte is touched: asking for inode 200 of a
//! 200-inode table, or slot 32 of a 32-slot directory, is a caller bug and
//! fails with [`ParseError::IndexOutOfRange`]. Reads that fall past the end of
//! the buffer fail with [`ParseError::InsufficientData`].
//!
//! Mutation is only available when the buffer is `AsMut<[u8]>`, and is
//! limited to rewriting the inode number of an existing directory slot.

use crate::bitmap::bitmap_get;
use crate::dirent::DirEntry;
use crate::inode::DiskInode;
use crate::superblock::{SUPERBLOCK_SIZE, Superblock};
use vfsck_types::{
    ADDR_SIZE, BlockNumber, DIRENT_SIZE, Geometry, INODE_SIZE, InodeNumber, ParseError,
    ensure_slice, read_le_u32, write_le_u16,
};

const SUPERBLOCK_BLOCK: BlockNumber = BlockNumber(1);

#[derive(Debug, Clone)]
pub struct Image<B> {
    bytes: B,
    geometry: Geometry,
}

impl<B: AsRef<[u8]>> Image<B> {
    /// Wrap `bytes`. The buffer must cover every block of `geometry`.
    pub fn new(bytes: B, geometry: Geometry) -> Result<Self, ParseError> {
        let needed = geometry.image_len().ok_or(ParseError::InvalidField {
            field: "geometry",
            reason: "image length overflows usize",
        })?;
        let actual = bytes.as_ref().len();
        if actual < needed {
            return Err(ParseError::InsufficientData {
                needed,
                offset: 0,
                actual,
            });
        }
        Ok(Self { bytes, geometry })
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_ref()
    }

    #[must_use]
    pub fn into_inner(self) -> B {
        self.bytes
    }

    /// True iff `addr` lies in the data region.
    #[must_use]
    pub fn is_in_bounds(&self, addr: BlockNumber) -> bool {
        self.geometry.is_in_bounds(addr)
    }

    /// True iff the directory block of `dir` lies inside the image, so its
    /// entries can be read.
    #[must_use]
    pub fn has_dir_block(&self, dir: &DiskInode) -> bool {
        self.geometry.contains_block(dir.dir_block())
    }

    pub fn superblock(&self) -> Result<Superblock, ParseError> {
        let offset = self.block_offset(SUPERBLOCK_BLOCK)?;
        Superblock::parse_from_bytes(ensure_slice(self.as_bytes(), offset, SUPERBLOCK_SIZE)?)
    }

    pub fn read_inode(&self, ino: InodeNumber) -> Result<DiskInode, ParseError> {
        let offset = self.inode_offset(ino)?;
        DiskInode::parse_from_bytes(ensure_slice(self.as_bytes(), offset, INODE_SIZE)?)
    }

    /// Read entry `slot` from the directory block of `dir`.
    pub fn read_dirent(&self, dir: &DiskInode, slot: usize) -> Result<DirEntry, ParseError> {
        let offset = self.dirent_offset(dir, slot)?;
        DirEntry::parse_from_bytes(ensure_slice(self.as_bytes(), offset, DIRENT_SIZE)?)
    }

    /// Every slot of the directory block of `dir`, in slot order.
    pub fn read_dirents(&self, dir: &DiskInode) -> Result<Vec<DirEntry>, ParseError> {
        (0..self.geometry.dirents_per_block())
            .map(|slot| self.read_dirent(dir, slot))
            .collect()
    }

    /// Interpret block `addr` as an array of block addresses.
    pub fn read_indirect_block(&self, addr: BlockNumber) -> Result<Vec<BlockNumber>, ParseError> {
        if !self.geometry.contains_block(addr) {
            return Err(out_of_range(
                "block",
                addr.0,
                self.geometry.total_blocks,
            ));
        }
        let offset = self.block_offset(addr)?;
        let block = ensure_slice(self.as_bytes(), offset, self.geometry.block_size)?;
        (0..self.geometry.indirect_per_block())
            .map(|i| read_le_u32(block, i * ADDR_SIZE).map(BlockNumber))
            .collect()
    }

    /// The persisted allocation bitmap.
    pub fn bitmap(&self) -> Result<&[u8], ParseError> {
        let offset = self.block_offset(BlockNumber(self.geometry.bitmap_start))?;
        ensure_slice(self.as_bytes(), offset, self.geometry.bitmap_bytes())
    }

    /// Test the persisted allocation bit of `block`.
    pub fn is_allocated(&self, block: BlockNumber) -> Result<bool, ParseError> {
        if !self.geometry.contains_block(block) {
            return Err(out_of_range(
                "block",
                block.0,
                self.geometry.total_blocks,
            ));
        }
        Ok(bitmap_get(self.bitmap()?, block))
    }

    fn block_offset(&self, block: BlockNumber) -> Result<usize, ParseError> {
        self.geometry
            .block_offset(block)
            .ok_or(ParseError::InvalidField {
                field: "block_offset",
                reason: "overflow computing block offset",
            })
    }

    fn inode_offset(&self, ino: InodeNumber) -> Result<usize, ParseError> {
        if !self.geometry.contains_inode(ino) {
            return Err(out_of_range("inode", ino.0, self.geometry.inode_count));
        }
        self.geometry
            .inode_offset(ino)
            .ok_or(ParseError::InvalidField {
                field: "inode_offset",
                reason: "overflow computing inode offset",
            })
    }

    fn dirent_offset(&self, dir: &DiskInode, slot: usize) -> Result<usize, ParseError> {
        let slots = self.geometry.dirents_per_block();
        if slot >= slots {
            return Err(ParseError::IndexOutOfRange {
                field: "dirent slot",
                index: slot as u64,
                limit: slots as u64,
            });
        }
        self.block_offset(dir.dir_block())?
            .checked_add(slot * DIRENT_SIZE)
            .ok_or(ParseError::InvalidField {
                field: "dirent_offset",
                reason: "overflow computing directory entry offset",
            })
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Image<B> {
    /// Overwrite the inode number of slot `slot` in the directory block of
    /// `dir`, leaving the name bytes untouched.
    pub fn set_dirent_inode(
        &mut self,
        dir: &DiskInode,
        slot: usize,
        ino: InodeNumber,
    ) -> Result<(), ParseError> {
        let raw = u16::try_from(ino.0).map_err(|_| ParseError::InvalidField {
            field: "dirent_inode",
            reason: "inode number exceeds 16 bits",
        })?;
        let offset = self.dirent_offset(dir, slot)?;
        write_le_u16(self.bytes.as_mut(), offset, raw)
    }
}

fn out_of_range(field: &'static str, index: u32, limit: u32) -> ParseError {
    ParseError::IndexOutOfRange {
        field,
        index: u64::from(index),
        limit: u64::from(limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirent::SELF_NAME;
    use vfsck_types::{NUM_DIRECT, T_DIR};

    fn blank() -> Vec<u8> {
        vec![0_u8; Geometry::STANDARD.image_len().unwrap()]
    }

    fn dir_at(block: u32) -> DiskInode {
        let mut dir = DiskInode::free();
        dir.raw_type = T_DIR;
        dir.nlink = 1;
        dir.direct = [BlockNumber::NONE; NUM_DIRECT];
        dir.direct[0] = BlockNumber(block);
        dir
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = Image::new(vec![0_u8; 1024], Geometry::STANDARD).unwrap_err();
        assert!(matches!(err, ParseError::InsufficientData { needed: 512_000, .. }));
    }

    #[test]
    fn inode_reads_come_from_the_table() {
        let g = Geometry::STANDARD;
        let mut bytes = blank();
        let off = g.inode_offset(InodeNumber(3)).unwrap();
        bytes[off..off + INODE_SIZE].copy_from_slice(&dir_at(60).encode());

        let image = Image::new(bytes, g).unwrap();
        let inode = image.read_inode(InodeNumber(3)).unwrap();
        assert!(inode.is_dir());
        assert_eq!(inode.dir_block(), BlockNumber(60));
        assert!(image.read_inode(InodeNumber(2)).unwrap().is_free());
    }

    #[test]
    fn capacity_violations_fail_fast() {
        let image = Image::new(blank(), Geometry::STANDARD).unwrap();
        assert_eq!(
            image.read_inode(InodeNumber(200)).unwrap_err(),
            ParseError::IndexOutOfRange {
                field: "inode",
                index: 200,
                limit: 200,
            }
        );
        assert!(matches!(
            image.read_dirent(&dir_at(60), 32),
            Err(ParseError::IndexOutOfRange { field: "dirent slot", .. })
        ));
        assert!(matches!(
            image.read_indirect_block(BlockNumber(1000)),
            Err(ParseError::IndexOutOfRange { field: "block", .. })
        ));
        assert!(image.is_allocated(BlockNumber(5000)).is_err());
    }

    #[test]
    fn directory_block_past_image_end_is_insufficient_data() {
        let image = Image::new(blank(), Geometry::STANDARD).unwrap();
        assert!(matches!(
            image.read_dirent(&dir_at(4000), 0),
            Err(ParseError::InsufficientData { .. })
        ));
        assert!(!image.has_dir_block(&dir_at(4000)));
        assert!(!image.has_dir_block(&dir_at(1000)));
        assert!(image.has_dir_block(&dir_at(999)));
        assert!(image.has_dir_block(&dir_at(3)));
    }

    #[test]
    fn dirents_and_indirect_blocks_decode() {
        let g = Geometry::STANDARD;
        let mut bytes = blank();
        let dir_off = g.block_offset(BlockNumber(60)).unwrap();
        bytes[dir_off..dir_off + DIRENT_SIZE]
            .copy_from_slice(&DirEntry::new(3, SELF_NAME).unwrap().encode());
        let ind_off = g.block_offset(BlockNumber(61)).unwrap();
        bytes[ind_off + 4..ind_off + 8].copy_from_slice(&99_u32.to_le_bytes());

        let image = Image::new(bytes, g).unwrap();
        let entries = image.read_dirents(&dir_at(60)).unwrap();
        assert_eq!(entries.len(), 32);
        assert!(entries[0].is_named(SELF_NAME));
        assert_eq!(entries[0].inode, InodeNumber(3));
        assert!(entries[1].is_free());

        let addrs = image.read_indirect_block(BlockNumber(61)).unwrap();
        assert_eq!(addrs.len(), 128);
        assert_eq!(addrs[0], BlockNumber::NONE);
        assert_eq!(addrs[1], BlockNumber(99));
    }

    #[test]
    fn bitmap_bits_are_read_from_bitmap_block() {
        let g = Geometry::STANDARD;
        let mut bytes = blank();
        let off = g.block_offset(BlockNumber(g.bitmap_start)).unwrap();
        bytes[off + 7] = 0b0000_1000;

        let image = Image::new(bytes, g).unwrap();
        assert_eq!(image.bitmap().unwrap().len(), 125);
        assert!(image.is_allocated(BlockNumber(59)).unwrap());
        assert!(!image.is_allocated(BlockNumber(60)).unwrap());
    }

    #[test]
    fn set_dirent_inode_rewrites_only_the_number() {
        let g = Geometry::STANDARD;
        let mut bytes = blank();
        let off = g.block_offset(BlockNumber(60)).unwrap() + 5 * DIRENT_SIZE;
        bytes[off..off + DIRENT_SIZE].copy_from_slice(&DirEntry::new(0, b"old").unwrap().encode());

        let mut image = Image::new(bytes, g).unwrap();
        let dir = dir_at(60);
        image.set_dirent_inode(&dir, 5, InodeNumber(9)).unwrap();
        let entry = image.read_dirent(&dir, 5).unwrap();
        assert_eq!(entry.inode, InodeNumber(9));
        assert!(entry.is_named(b"old"));
        assert!(image.set_dirent_inode(&dir, 5, InodeNumber(70_000)).is_err());
    }
}
