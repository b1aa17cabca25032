//! Fixed-size directory entries.
//!
//! A directory's data is one block of packed 16-byte entries: a 16-bit inode
//! number followed by a 14-byte name padded with NULs. Inode number zero
//! marks a free slot. Slot 0 is `.` and slot 1 is `..` by convention.

use vfsck_types::{
    DIR_NAME_LEN, DIRENT_SIZE, InodeNumber, ParseError, read_fixed, read_le_u16, until_nul,
};

pub const SELF_NAME: &[u8] = b".";
pub const PARENT_NAME: &[u8] = b"..";
pub const SELF_SLOT: usize = 0;
pub const PARENT_SLOT: usize = 1;
/// First slot that can name a child.
pub const FIRST_CHILD_SLOT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: InodeNumber,
    pub name: [u8; DIR_NAME_LEN],
}

impl DirEntry {
    /// Build an entry, NUL-padding `name`.
    pub fn new(inode: u16, name: &[u8]) -> Result<Self, ParseError> {
        if name.len() > DIR_NAME_LEN {
            return Err(ParseError::InvalidField {
                field: "dirent_name",
                reason: "name exceeds 14 bytes",
            });
        }
        let mut padded = [0_u8; DIR_NAME_LEN];
        padded[..name.len()].copy_from_slice(name);
        Ok(Self {
            inode: InodeNumber::from(inode),
            name: padded,
        })
    }

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            inode: InodeNumber::from(read_le_u16(bytes, 0)?),
            name: read_fixed::<DIR_NAME_LEN>(bytes, 2)?,
        })
    }

    /// Serialize into a 16-byte record. Inode numbers wider than 16 bits
    /// saturate to `u16::MAX`, as the field is 16 bits on disk.
    #[must_use]
    pub fn encode(&self) -> [u8; DIRENT_SIZE] {
        let mut out = [0_u8; DIRENT_SIZE];
        let raw = u16::try_from(self.inode.0).unwrap_or(u16::MAX);
        out[0..2].copy_from_slice(&raw.to_le_bytes());
        out[2..].copy_from_slice(&self.name);
        out
    }

    /// Name up to the first NUL.
    #[must_use]
    pub fn name_bytes(&self) -> &[u8] {
        until_nul(&self.name)
    }

    #[must_use]
    pub fn is_named(&self, name: &[u8]) -> bool {
        self.name_bytes() == name
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.inode == InodeNumber::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_parse_preserves_layout() {
        let entry = DirEntry::new(9, b"lost_found").unwrap();
        let bytes = entry.encode();
        assert_eq!(&bytes[0..2], &9_u16.to_le_bytes());
        assert_eq!(&bytes[2..12], b"lost_found");
        assert!(bytes[12..].iter().all(|b| *b == 0));
        assert_eq!(DirEntry::parse_from_bytes(&bytes).unwrap(), entry);
    }

    #[test]
    fn wide_inode_numbers_saturate() {
        let entry = DirEntry {
            inode: InodeNumber(70_000),
            ..DirEntry::new(0, b"x").unwrap()
        };
        assert_eq!(&entry.encode()[0..2], &u16::MAX.to_le_bytes());
    }

    #[test]
    fn names_compare_up_to_nul() {
        let dot = DirEntry::new(1, SELF_NAME).unwrap();
        assert!(dot.is_named(b"."));
        assert!(!dot.is_named(b".."));

        let mut raw = [0_u8; DIRENT_SIZE];
        raw[2] = b'.';
        raw[3] = 0;
        raw[4] = b'x';
        let parsed = DirEntry::parse_from_bytes(&raw).unwrap();
        assert!(parsed.is_named(SELF_NAME));
        assert!(parsed.is_free());
    }

    #[test]
    fn overlong_name_is_rejected() {
        assert!(DirEntry::new(2, b"fifteen_chars__").is_err());
        assert!(DirEntry::new(2, b"fourteen_chars").is_ok());
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(DirEntry::parse_from_bytes(&[0_u8; 15]).is_err());
    }
}
