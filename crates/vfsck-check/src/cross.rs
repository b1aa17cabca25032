//! Cross-validation of the reference tables against the image.
//!
//! Runs, in order: address bounds, root sanity, `.`/`..` formatting,
//! used-implies-marked, marked-implies-used, and address aliasing.

use crate::ParseResultExt;
use crate::refs::RefTables;
use crate::report::{Finding, FindingKind, Reporter};
use tracing::debug;
use vfsck_error::Result;
use vfsck_ondisk::dirent::{PARENT_NAME, PARENT_SLOT, SELF_NAME, SELF_SLOT};
use vfsck_ondisk::{Image, bitmap_clear};
use vfsck_types::{BlockNumber, InodeNumber};

/// Run every cross-validation step.
pub fn cross_validate<B: AsRef<[u8]>>(
    image: &Image<B>,
    tables: &RefTables,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    check_address_bounds(image, tables, reporter)?;
    check_root(image, reporter)?;
    check_directory_format(image, tables, reporter)?;
    check_used_blocks_marked(image, tables, reporter)?;
    check_marked_blocks_used(image, tables, reporter)?;
    check_aliasing(tables, reporter)?;
    debug!("cross-validation complete");
    Ok(())
}

/// Every referenced address other than zero must lie in the data region.
pub fn check_address_bounds<B: AsRef<[u8]>>(
    image: &Image<B>,
    tables: &RefTables,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    for &addr in tables.direct.keys() {
        if !addr.is_none() && !image.is_in_bounds(addr) {
            reporter.report(Finding::at_block(FindingKind::BadDirectAddress, addr))?;
        }
    }
    for &addr in tables.indirect.keys() {
        if !addr.is_none() && !image.is_in_bounds(addr) {
            reporter.report(Finding::at_block(FindingKind::BadIndirectAddress, addr))?;
        }
    }
    Ok(())
}

/// Inode 1 is a directory whose `.` and `..` both name inode 1.
pub fn check_root<B: AsRef<[u8]>>(image: &Image<B>, reporter: &mut dyn Reporter) -> Result<()> {
    let geometry = image.geometry();
    let root = image.read_inode(InodeNumber::ROOT).or_fatal(geometry)?;
    if !root.is_dir() || !image.has_dir_block(&root) {
        return reporter.report(Finding::at_inode(FindingKind::RootMissing, InodeNumber::ROOT));
    }
    let this = image.read_dirent(&root, SELF_SLOT).or_fatal(geometry)?;
    let parent = image.read_dirent(&root, PARENT_SLOT).or_fatal(geometry)?;
    if this.inode != InodeNumber::ROOT || parent.inode != InodeNumber::ROOT {
        reporter.report(Finding::at_inode(FindingKind::RootMissing, InodeNumber::ROOT))?;
    }
    Ok(())
}

/// Slot 0 of every directory is `.` naming the directory; slot 1 is `..`.
/// Directories whose block is past the image end are left to the bounds check.
pub fn check_directory_format<B: AsRef<[u8]>>(
    image: &Image<B>,
    tables: &RefTables,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let geometry = image.geometry();
    for &ino in &tables.directories {
        let dir = image.read_inode(ino).or_fatal(geometry)?;
        if !image.has_dir_block(&dir) {
            continue;
        }
        let this = image.read_dirent(&dir, SELF_SLOT).or_fatal(geometry)?;
        let parent = image.read_dirent(&dir, PARENT_SLOT).or_fatal(geometry)?;
        if this.inode != ino || !this.is_named(SELF_NAME) || !parent.is_named(PARENT_NAME) {
            reporter.report(Finding::at_inode(FindingKind::DirectoryFormat, ino))?;
        }
    }
    Ok(())
}

/// Every referenced block has its allocation bit set. Addresses beyond the
/// bitmap have no bit and were already reported by the bounds check.
pub fn check_used_blocks_marked<B: AsRef<[u8]>>(
    image: &Image<B>,
    tables: &RefTables,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let geometry = image.geometry();
    for addr in tables.referenced_blocks() {
        if !geometry.contains_block(addr) {
            continue;
        }
        if !image.is_allocated(addr).or_fatal(geometry)? {
            reporter.report(Finding::at_block(FindingKind::UsedBlockMarkedFree, addr))?;
        }
    }
    Ok(())
}

/// Clear every referenced block from a copy of the bitmap. What remains must
/// be the fixed metadata pattern in the reserved byte and zero after it.
///
/// Bytes before the reserved byte cover metadata only and are not examined.
pub fn check_marked_blocks_used<B: AsRef<[u8]>>(
    image: &Image<B>,
    tables: &RefTables,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let geometry = image.geometry();
    let mut residual = image.bitmap().or_fatal(geometry)?.to_vec();
    for addr in tables.referenced_blocks() {
        bitmap_clear(&mut residual, addr);
    }

    let first = geometry.reserved_bitmap_byte;
    for (index, &byte) in residual.iter().enumerate().skip(first) {
        let expected = if index == first {
            geometry.reserved_bitmap_pattern
        } else {
            0
        };
        let deviation = byte ^ expected;
        if deviation != 0 {
            let bit = deviation.trailing_zeros();
            let block = u32::try_from(index * 8).map_or(BlockNumber(u32::MAX), |base| {
                BlockNumber(base.saturating_add(bit))
            });
            reporter.report(Finding::at_block(FindingKind::FreeBlockMarkedUsed, block))?;
        }
    }
    Ok(())
}

/// A block owned directly more than once, or owned directly and also listed
/// in an indirect block, is reused. So is a block listed in indirect blocks
/// more than once.
pub fn check_aliasing(tables: &RefTables, reporter: &mut dyn Reporter) -> Result<()> {
    for (&addr, &count) in &tables.direct {
        if addr.is_none() {
            continue;
        }
        if count > 1 || (count == 1 && tables.indirect_count(addr) > 0) {
            reporter.report(Finding::at_block(FindingKind::DirectAddressReused, addr))?;
        }
    }
    for (&addr, &count) in &tables.indirect {
        if count > 1 {
            reporter.report(Finding::at_block(FindingKind::IndirectAddressReused, addr))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::analyze_references;
    use crate::report::{CollectingReporter, StrictReporter};
    use vfsck_harness::FixtureBuilder;

    fn findings_of(fx: FixtureBuilder) -> Vec<Finding> {
        let image = fx.image();
        let mut reporter = CollectingReporter::new();
        let tables = analyze_references(&image, &mut reporter).unwrap();
        cross_validate(&image, &tables, &mut reporter).unwrap();
        reporter.into_findings()
    }

    fn kinds(findings: &[Finding]) -> Vec<FindingKind> {
        findings.iter().map(|f| f.kind).collect()
    }

    #[test]
    fn consistent_image_passes_strictly() {
        let mut fx = FixtureBuilder::new();
        let dir = fx.mkdir(InodeNumber::ROOT, "d");
        fx.create_file(dir, "big", 40);
        fx.create_file(InodeNumber::ROOT, "small", 2);
        let image = fx.image();

        let mut reporter = StrictReporter::new();
        let tables = analyze_references(&image, &mut reporter).unwrap();
        cross_validate(&image, &tables, &mut reporter).unwrap();
    }

    #[test]
    fn metadata_and_past_end_addresses_are_out_of_bounds() {
        let mut fx = FixtureBuilder::new();
        let file = fx.create_file(InodeNumber::ROOT, "f", 1);
        fx.update_inode(file, |inode| inode.direct[1] = BlockNumber(1200));
        let found = findings_of(fx);
        assert_eq!(
            found.first(),
            Some(&Finding::at_block(FindingKind::BadDirectAddress, BlockNumber(1200)))
        );
    }

    #[test]
    fn indirect_pointer_past_end_is_a_bad_direct_address() {
        let mut fx = FixtureBuilder::new();
        let file = fx.create_file(InodeNumber::ROOT, "f", 2);
        fx.update_inode(file, |inode| inode.indirect = BlockNumber(5000));
        let found = findings_of(fx);
        assert_eq!(
            found.first(),
            Some(&Finding::at_block(FindingKind::BadDirectAddress, BlockNumber(5000)))
        );
        assert!(!kinds(&found).contains(&FindingKind::BadIndirectAddress));
    }

    #[test]
    fn bad_indirect_entries_are_reported() {
        let mut fx = FixtureBuilder::new();
        let file = fx.create_file(InodeNumber::ROOT, "f", 13);
        let indirect = fx.inode(file).indirect;
        fx.write_indirect_entry(indirect, 3, BlockNumber(12));
        let found = findings_of(fx);
        assert!(found.contains(&Finding::at_block(
            FindingKind::BadIndirectAddress,
            BlockNumber(12)
        )));
    }

    #[test]
    fn root_parent_pointing_elsewhere_is_missing_root() {
        let mut fx = FixtureBuilder::new();
        fx.mkdir(InodeNumber::ROOT, "d");
        fx.set_dirent(InodeNumber::ROOT, PARENT_SLOT, 2, PARENT_NAME);
        assert_eq!(kinds(&findings_of(fx)), vec![FindingKind::RootMissing]);
    }

    #[test]
    fn root_that_is_a_file_is_missing_root() {
        let mut fx = FixtureBuilder::new();
        fx.update_inode(InodeNumber::ROOT, |inode| inode.raw_type = 2);
        assert!(kinds(&findings_of(fx)).contains(&FindingKind::RootMissing));
    }

    #[test]
    fn misnamed_self_entry_is_format_error() {
        let mut fx = FixtureBuilder::new();
        let dir = fx.mkdir(InodeNumber::ROOT, "d");
        let raw = u16::try_from(dir.0).unwrap();
        fx.set_dirent(dir, SELF_SLOT, raw, b"self");
        assert_eq!(
            findings_of(fx),
            vec![Finding::at_inode(FindingKind::DirectoryFormat, dir)]
        );
    }

    #[test]
    fn self_entry_naming_another_inode_is_format_error() {
        let mut fx = FixtureBuilder::new();
        let dir = fx.mkdir(InodeNumber::ROOT, "d");
        fx.set_dirent(dir, SELF_SLOT, 1, SELF_NAME);
        assert_eq!(
            findings_of(fx),
            vec![Finding::at_inode(FindingKind::DirectoryFormat, dir)]
        );
    }

    #[test]
    fn referenced_block_marked_free() {
        let mut fx = FixtureBuilder::new();
        let file = fx.create_file(InodeNumber::ROOT, "f", 3);
        let victim = fx.inode(file).direct[2];
        fx.mark_block(victim, false);
        assert_eq!(
            findings_of(fx),
            vec![Finding::at_block(FindingKind::UsedBlockMarkedFree, victim)]
        );
    }

    #[test]
    fn marked_but_unreferenced_block_in_reserved_byte() {
        let mut fx = FixtureBuilder::new();
        // Block 62 shares byte 7 with the last metadata blocks.
        fx.mark_block(BlockNumber(62), true);
        assert_eq!(
            findings_of(fx),
            vec![Finding::at_block(FindingKind::FreeBlockMarkedUsed, BlockNumber(62))]
        );
    }

    #[test]
    fn marked_but_unreferenced_block_past_reserved_byte() {
        let mut fx = FixtureBuilder::new();
        fx.mark_block(BlockNumber(500), true);
        fx.mark_block(BlockNumber(998), true);
        assert_eq!(
            findings_of(fx),
            vec![
                Finding::at_block(FindingKind::FreeBlockMarkedUsed, BlockNumber(500)),
                Finding::at_block(FindingKind::FreeBlockMarkedUsed, BlockNumber(998)),
            ]
        );
    }

    #[test]
    fn shared_direct_block_is_reused() {
        let mut fx = FixtureBuilder::new();
        let a = fx.create_file(InodeNumber::ROOT, "a", 1);
        let b = fx.create_file(InodeNumber::ROOT, "b", 1);
        let shared = fx.inode(a).direct[0];
        fx.update_inode(b, |inode| inode.direct[1] = shared);
        assert!(findings_of(fx).contains(&Finding::at_block(
            FindingKind::DirectAddressReused,
            shared
        )));
    }

    #[test]
    fn direct_block_listed_indirectly_is_reused() {
        let mut fx = FixtureBuilder::new();
        let a = fx.create_file(InodeNumber::ROOT, "a", 1);
        let b = fx.create_file(InodeNumber::ROOT, "b", 13);
        let shared = fx.inode(a).direct[0];
        let indirect = fx.inode(b).indirect;
        fx.write_indirect_entry(indirect, 1, shared);
        assert_eq!(
            findings_of(fx),
            vec![Finding::at_block(FindingKind::DirectAddressReused, shared)]
        );
    }

    #[test]
    fn indirect_block_listed_twice_is_reused() {
        let mut fx = FixtureBuilder::new();
        let a = fx.create_file(InodeNumber::ROOT, "a", 13);
        let b = fx.create_file(InodeNumber::ROOT, "b", 13);
        let a_ind = fx.inode(a).indirect;
        let b_ind = fx.inode(b).indirect;
        let shared = fx.indirect_entries(a_ind)[0];
        fx.write_indirect_entry(b_ind, 1, shared);
        assert_eq!(
            findings_of(fx),
            vec![Finding::at_block(FindingKind::IndirectAddressReused, shared)]
        );
    }
}
