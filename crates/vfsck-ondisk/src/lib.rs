#![forbid(unsafe_code)]
//! On-disk format parsing for the image layout.
//!
//! Pure parsing crate: no I/O, no side effects. Decodes byte slices into
//! typed inodes, directory entries, and the superblock, and gives
//! bounds-checked access to the inode table, directory blocks, indirect
//! blocks, and the allocation bitmap of a whole image.

pub mod bitmap;
pub mod dirent;
pub mod image;
pub mod inode;
pub mod superblock;

pub use bitmap::{bitmap_clear, bitmap_get, bitmap_set};
pub use dirent::DirEntry;
pub use image::Image;
pub use inode::{DiskInode, InodeType};
pub use superblock::Superblock;
