#![forbid(unsafe_code)]
//! Test fixtures for vfsck.
//!
//! [`FixtureBuilder`] assembles well-formed images in memory (superblock,
//! bitmap, root directory, nested directories, files spilling into an
//! indirect block) and exposes the low-level pokes tests need to corrupt
//! them afterwards. [`load_sparse_fixture`] reads the checked-in JSON images
//! under `conformance/fixtures`.
//!
//! Builder methods panic on misuse (full inode table, name too long, no free
//! slot); they are meant for tests only.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use vfsck_ondisk::dirent::{FIRST_CHILD_SLOT, PARENT_NAME, PARENT_SLOT, SELF_NAME, SELF_SLOT};
use vfsck_ondisk::{DirEntry, DiskInode, Image, Superblock, bitmap_clear, bitmap_set};
use vfsck_types::{
    ADDR_SIZE, BlockNumber, DIRENT_SIZE, Geometry, INODE_SIZE, InodeNumber, NUM_DIRECT, T_DIR,
    T_FILE,
};

/// Name of the recovery directory created by [`FixtureBuilder::lost_found`].
pub const LOST_FOUND: &str = "lost_found";

// ── Builder ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FixtureBuilder {
    geometry: Geometry,
    bytes: Vec<u8>,
    next_block: u32,
}

impl Default for FixtureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureBuilder {
    /// A consistent image holding only the root directory.
    #[must_use]
    pub fn new() -> Self {
        Self::with_geometry(Geometry::STANDARD)
    }

    /// # Panics
    ///
    /// Panics if `geometry` describes an image too large to allocate.
    #[must_use]
    pub fn with_geometry(geometry: Geometry) -> Self {
        let len = geometry.image_len().expect("image length fits in usize");
        let mut fx = Self {
            geometry,
            bytes: vec![0_u8; len],
            next_block: geometry.data_start,
        };

        let sb = Superblock::for_geometry(geometry).encode();
        let sb_off = fx.block_offset(BlockNumber(1));
        fx.bytes[sb_off..sb_off + sb.len()].copy_from_slice(&sb);

        for block in 0..geometry.data_start {
            fx.mark_block(BlockNumber(block), true);
        }

        let root = InodeNumber::ROOT;
        let block = fx.alloc_block();
        let mut inode = DiskInode::free();
        inode.raw_type = T_DIR;
        inode.nlink = 1;
        inode.size = dir_size(geometry);
        inode.direct[0] = block;
        fx.write_inode(root, &inode);
        fx.set_dirent(root, SELF_SLOT, 1, SELF_NAME);
        fx.set_dirent(root, PARENT_SLOT, 1, PARENT_NAME);
        fx
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    // ── Tree construction ───────────────────────────────────────────────

    /// Create directory `name` under `parent`.
    pub fn mkdir(&mut self, parent: InodeNumber, name: &str) -> InodeNumber {
        let ino = self.alloc_inode();
        let block = self.alloc_block();
        let mut inode = DiskInode::free();
        inode.raw_type = T_DIR;
        inode.nlink = 1;
        inode.size = dir_size(self.geometry);
        inode.direct[0] = block;
        self.write_inode(ino, &inode);
        self.set_dirent(ino, SELF_SLOT, raw_inum(ino), SELF_NAME);
        self.set_dirent(ino, PARENT_SLOT, raw_inum(parent), PARENT_NAME);
        self.add_entry(parent, name, ino);
        ino
    }

    /// Create `lost_found` under the root.
    pub fn lost_found(&mut self) -> InodeNumber {
        self.mkdir(InodeNumber::ROOT, LOST_FOUND)
    }

    /// Create a regular file of `nblocks` data blocks under `parent`. Past
    /// twelve blocks the rest go through an indirect block.
    pub fn create_file(&mut self, parent: InodeNumber, name: &str, nblocks: usize) -> InodeNumber {
        let ino = self.create_orphan_file(nblocks);
        self.add_entry(parent, name, ino);
        ino
    }

    /// Create a regular file with link count 1 that no directory names.
    ///
    /// # Panics
    ///
    /// Panics if `nblocks` exceeds what twelve direct slots and one indirect
    /// block can address.
    pub fn create_orphan_file(&mut self, nblocks: usize) -> InodeNumber {
        let max = NUM_DIRECT + self.geometry.indirect_per_block();
        assert!(nblocks <= max, "file of {nblocks} blocks exceeds {max}");

        let ino = self.alloc_inode();
        let mut inode = DiskInode::free();
        inode.raw_type = T_FILE;
        inode.nlink = 1;
        inode.size = u32::try_from(nblocks * self.geometry.block_size).expect("size fits in u32");
        for slot in inode.direct.iter_mut().take(nblocks) {
            *slot = self.alloc_block();
        }
        if nblocks > NUM_DIRECT {
            inode.indirect = self.alloc_block();
            for index in 0..nblocks - NUM_DIRECT {
                let data = self.alloc_block();
                self.write_indirect_entry(inode.indirect, index, data);
            }
        }
        self.write_inode(ino, &inode);
        ino
    }

    /// Add entry `name` in `dir` naming `target`. A regular file's link
    /// count follows the entry; directory link counts are left alone.
    pub fn link(&mut self, dir: InodeNumber, name: &str, target: InodeNumber) {
        self.add_entry(dir, name, target);
        self.update_inode(target, |inode| {
            if inode.is_file() {
                inode.nlink += 1;
            }
        });
    }

    /// Clear the entry `name` from `dir`. A regular file's link count
    /// follows the entry.
    ///
    /// # Panics
    ///
    /// Panics if `dir` has no such entry.
    pub fn unlink(&mut self, dir: InodeNumber, name: &str) {
        let slot = self
            .slot_of(dir, name)
            .unwrap_or_else(|| panic!("no entry {name:?} in directory {dir}"));
        let target = self.dirent(dir, slot).inode;
        self.set_dirent(dir, slot, 0, b"");
        if self.geometry.contains_inode(target) {
            self.update_inode(target, |inode| {
                if inode.is_file() {
                    inode.nlink = inode.nlink.saturating_sub(1);
                }
            });
        }
    }

    /// First child slot of `dir` whose entry is named `name` and in use.
    #[must_use]
    pub fn slot_of(&self, dir: InodeNumber, name: &str) -> Option<usize> {
        (FIRST_CHILD_SLOT..self.geometry.dirents_per_block()).find(|&slot| {
            let entry = self.dirent(dir, slot);
            !entry.is_free() && entry.is_named(name.as_bytes())
        })
    }

    // ── Low-level access ────────────────────────────────────────────────

    /// Take the next data block and mark it allocated.
    ///
    /// # Panics
    ///
    /// Panics when the data region is exhausted.
    pub fn alloc_block(&mut self) -> BlockNumber {
        assert!(
            self.next_block < self.geometry.total_blocks,
            "data region exhausted"
        );
        let block = BlockNumber(self.next_block);
        self.next_block += 1;
        self.mark_block(block, true);
        block
    }

    /// # Panics
    ///
    /// Panics if `ino` is outside the inode table.
    #[must_use]
    pub fn inode(&self, ino: InodeNumber) -> DiskInode {
        let off = self.inode_offset(ino);
        DiskInode::parse_from_bytes(&self.bytes[off..off + INODE_SIZE]).expect("inode record")
    }

    pub fn update_inode(&mut self, ino: InodeNumber, f: impl FnOnce(&mut DiskInode)) {
        let mut inode = self.inode(ino);
        f(&mut inode);
        self.write_inode(ino, &inode);
    }

    /// Overwrite slot `slot` of `dir` with a full entry.
    ///
    /// # Panics
    ///
    /// Panics if `name` exceeds 14 bytes or the slot lies outside the image.
    pub fn set_dirent(&mut self, dir: InodeNumber, slot: usize, inum: u16, name: &[u8]) {
        let entry = DirEntry::new(inum, name).expect("directory entry name fits");
        let off = self.dirent_offset(dir, slot);
        self.bytes[off..off + DIRENT_SIZE].copy_from_slice(&entry.encode());
    }

    #[must_use]
    pub fn dirent(&self, dir: InodeNumber, slot: usize) -> DirEntry {
        let off = self.dirent_offset(dir, slot);
        DirEntry::parse_from_bytes(&self.bytes[off..off + DIRENT_SIZE]).expect("directory entry")
    }

    pub fn mark_block(&mut self, block: BlockNumber, allocated: bool) {
        let off = self.block_offset(BlockNumber(self.geometry.bitmap_start));
        let bitmap = &mut self.bytes[off..off + self.geometry.bitmap_bytes()];
        if allocated {
            bitmap_set(bitmap, block);
        } else {
            bitmap_clear(bitmap, block);
        }
    }

    /// Write address `addr` at position `index` of indirect block `block`.
    pub fn write_indirect_entry(&mut self, block: BlockNumber, index: usize, addr: BlockNumber) {
        let off = self.block_offset(block) + index * ADDR_SIZE;
        self.bytes[off..off + ADDR_SIZE].copy_from_slice(&addr.0.to_le_bytes());
    }

    /// Non-zero addresses held by indirect block `block`, in order.
    #[must_use]
    pub fn indirect_entries(&self, block: BlockNumber) -> Vec<BlockNumber> {
        let off = self.block_offset(block);
        self.bytes[off..off + self.geometry.block_size]
            .chunks_exact(ADDR_SIZE)
            .map(|chunk| BlockNumber(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
            .filter(|addr| !addr.is_none())
            .collect()
    }

    // ── Output ──────────────────────────────────────────────────────────

    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// # Panics
    ///
    /// Never for a builder-made buffer, which always covers the geometry.
    #[must_use]
    pub fn image(&self) -> Image<Vec<u8>> {
        Image::new(self.build(), self.geometry).expect("builder image covers its geometry")
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.bytes)
            .with_context(|| format!("failed to write image {}", path.display()))
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn alloc_inode(&mut self) -> InodeNumber {
        (1..self.geometry.inode_count)
            .map(InodeNumber)
            .find(|&ino| self.inode(ino).is_free())
            .expect("inode table exhausted")
    }

    fn write_inode(&mut self, ino: InodeNumber, inode: &DiskInode) {
        let off = self.inode_offset(ino);
        self.bytes[off..off + INODE_SIZE].copy_from_slice(&inode.encode());
    }

    fn add_entry(&mut self, dir: InodeNumber, name: &str, target: InodeNumber) {
        let slot = (FIRST_CHILD_SLOT..self.geometry.dirents_per_block())
            .find(|&slot| self.dirent(dir, slot).is_free())
            .unwrap_or_else(|| panic!("directory {dir} is full"));
        self.set_dirent(dir, slot, raw_inum(target), name.as_bytes());
    }

    fn block_offset(&self, block: BlockNumber) -> usize {
        self.geometry.block_offset(block).expect("block offset")
    }

    fn inode_offset(&self, ino: InodeNumber) -> usize {
        assert!(self.geometry.contains_inode(ino), "inode {ino} out of range");
        self.geometry.inode_offset(ino).expect("inode offset")
    }

    fn dirent_offset(&self, dir: InodeNumber, slot: usize) -> usize {
        assert!(slot < self.geometry.dirents_per_block(), "slot {slot} out of range");
        self.block_offset(self.inode(dir).dir_block()) + slot * DIRENT_SIZE
    }
}

fn raw_inum(ino: InodeNumber) -> u16 {
    u16::try_from(ino.0).expect("inode number fits in 16 bits")
}

fn dir_size(geometry: Geometry) -> u32 {
    u32::try_from(geometry.block_size).expect("block size fits in u32")
}

// ── Sparse JSON fixtures ────────────────────────────────────────────────────

/// A full-size image described by its non-zero byte runs.
#[derive(Debug, Clone, Deserialize)]
pub struct SparseFixture {
    pub size: usize,
    pub writes: Vec<FixtureWrite>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureWrite {
    pub offset: usize,
    pub hex: String,
}

pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;

    let mut bytes = vec![0_u8; fixture.size];
    for write in fixture.writes {
        let payload = hex::decode(&write.hex)
            .with_context(|| format!("invalid hex at offset {}", write.offset))?;

        let end = write
            .offset
            .checked_add(payload.len())
            .context("fixture offset overflow")?;
        if end > bytes.len() {
            bail!(
                "fixture write out of bounds: offset={} payload={} size={}",
                write.offset,
                payload.len(),
                bytes.len()
            );
        }

        bytes[write.offset..end].copy_from_slice(&payload);
    }

    Ok(bytes)
}

/// Load a sparse fixture as an image with the standard geometry.
pub fn load_fixture_image(path: &Path) -> Result<Image<Vec<u8>>> {
    let bytes = load_sparse_fixture(path)?;
    Image::new(bytes, Geometry::STANDARD)
        .map_err(|e| anyhow::anyhow!("fixture {} is not a full image: {e}", path.display()))
}
