#![forbid(unsafe_code)]
//! Consistency validation for vfsck images.
//!
//! [`check`] runs the passes in a fixed order, each one reading the tables
//! built by the ones before it:
//!
//! 1. superblock agreement with the fixed layout (fatal on mismatch),
//! 2. inode type legality ([`structure`]),
//! 3. reference analysis ([`refs`]),
//! 4. bitmap and address cross-validation ([`cross`]),
//! 5. directory tree validation ([`tree`]), which also yields the orphans.
//!
//! Findings go to a [`Reporter`]; the reporter decides whether the first one
//! ends the run.

pub mod cross;
pub mod refs;
pub mod report;
pub mod structure;
pub mod tree;

pub use refs::{RefTables, analyze_references};
pub use report::{CollectingReporter, Finding, FindingKind, Reporter, StrictReporter};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vfsck_error::{Result, VfsckError};
use vfsck_ondisk::Image;
use vfsck_types::{Geometry, InodeNumber, ParseError};

// ── Error conversion ────────────────────────────────────────────────────────

/// Convert a byte-level `ParseError` into the matching `VfsckError`.
///
/// Superblock field mismatches become [`VfsckError::InvalidGeometry`], reads
/// past the end of the buffer become [`VfsckError::Corruption`] at the block
/// containing the failing offset, and capacity violations stay
/// [`VfsckError::IndexOutOfRange`].
#[must_use]
pub fn parse_error_to_vfsck(e: &ParseError, geometry: Geometry) -> VfsckError {
    match e {
        ParseError::InvalidField { field, reason } => {
            if matches!(
                *field,
                "size" | "ninodes" | "inodestart" | "bmapstart" | "geometry"
            ) {
                VfsckError::InvalidGeometry(format!("{field}: {reason}"))
            } else {
                VfsckError::Format(e.to_string())
            }
        }
        ParseError::InsufficientData { offset, .. } => VfsckError::Corruption {
            block: u64::try_from(*offset / geometry.block_size.max(1)).unwrap_or(u64::MAX),
            detail: e.to_string(),
        },
        ParseError::IndexOutOfRange {
            field,
            index,
            limit,
        } => VfsckError::IndexOutOfRange {
            what: field,
            index: *index,
            limit: *limit,
        },
    }
}

/// Lift accessor results into the engine's error type.
pub trait ParseResultExt<T> {
    fn or_fatal(self, geometry: Geometry) -> Result<T>;
}

impl<T> ParseResultExt<T> for std::result::Result<T, ParseError> {
    fn or_fatal(self, geometry: Geometry) -> Result<T> {
        self.map_err(|e| parse_error_to_vfsck(&e, geometry))
    }
}

// ── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStats {
    pub inodes_in_use: usize,
    pub directories: usize,
    pub blocks_referenced: usize,
}

/// Outcome of a full check that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub findings: Vec<Finding>,
    /// Inodes in use but named by no directory entry, ascending.
    pub orphans: Vec<InodeNumber>,
    pub stats: CheckStats,
}

impl CheckReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    #[must_use]
    pub fn needs_repair(&self) -> bool {
        !self.orphans.is_empty()
    }

    #[must_use]
    pub fn count_of(&self, kind: FindingKind) -> usize {
        self.findings.iter().filter(|f| f.kind == kind).count()
    }
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// Reject images whose superblock disagrees with the fixed layout.
pub fn validate_superblock<B: AsRef<[u8]>>(image: &Image<B>) -> Result<()> {
    let geometry = image.geometry();
    let superblock = image.superblock().or_fatal(geometry)?;
    superblock.validate(geometry).map_err(|e| match e {
        ParseError::InvalidField { field, reason } => {
            VfsckError::InvalidGeometry(format!("superblock {field}: {reason}"))
        }
        other => parse_error_to_vfsck(&other, geometry),
    })
}

/// Run every pass against `image`.
///
/// Returns `Err` for fatal-on-read conditions, and for the first finding when
/// `reporter` is strict. Otherwise every finding is in the returned report.
pub fn check<B: AsRef<[u8]>>(image: &Image<B>, reporter: &mut dyn Reporter) -> Result<CheckReport> {
    validate_superblock(image)?;
    structure::validate_inode_types(image, reporter)?;
    let tables = analyze_references(image, reporter)?;
    cross::cross_validate(image, &tables, reporter)?;
    let orphans = tree::validate_tree(image, &tables, reporter)?;

    let report = CheckReport {
        findings: reporter.findings().to_vec(),
        orphans,
        stats: CheckStats {
            inodes_in_use: tables.used.len(),
            directories: tables.directories.len(),
            blocks_referenced: tables.referenced_blocks().len(),
        },
    };
    info!(
        findings = report.findings.len(),
        orphans = report.orphans.len(),
        inodes_in_use = report.stats.inodes_in_use,
        "check complete"
    );
    Ok(report)
}

/// Fail-fast check: the first finding is returned as
/// [`VfsckError::Inconsistent`].
pub fn check_strict<B: AsRef<[u8]>>(image: &Image<B>) -> Result<CheckReport> {
    debug!("running strict check");
    check(image, &mut StrictReporter::new())
}

/// Check that records every finding and keeps going.
pub fn check_collecting<B: AsRef<[u8]>>(image: &Image<B>) -> Result<CheckReport> {
    debug!("running collecting check");
    check(image, &mut CollectingReporter::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vfsck_harness::FixtureBuilder;
    use vfsck_types::{BlockNumber, INODE_SIZE};

    #[test]
    fn parse_error_mapping() {
        let g = Geometry::STANDARD;
        let e = parse_error_to_vfsck(
            &ParseError::InvalidField {
                field: "ninodes",
                reason: "does not match",
            },
            g,
        );
        assert!(matches!(e, VfsckError::InvalidGeometry(_)));

        let e = parse_error_to_vfsck(
            &ParseError::InvalidField {
                field: "dirent_name",
                reason: "too long",
            },
            g,
        );
        assert!(matches!(e, VfsckError::Format(_)));

        let e = parse_error_to_vfsck(
            &ParseError::InsufficientData {
                needed: 16,
                offset: 512 * 4000,
                actual: 512_000,
            },
            g,
        );
        assert!(matches!(e, VfsckError::Corruption { block: 4000, .. }));

        let e = parse_error_to_vfsck(
            &ParseError::IndexOutOfRange {
                field: "inode",
                index: 200,
                limit: 200,
            },
            g,
        );
        assert!(matches!(
            e,
            VfsckError::IndexOutOfRange {
                what: "inode",
                index: 200,
                limit: 200
            }
        ));
    }

    #[test]
    fn clean_image_reports_stats() {
        let mut fx = FixtureBuilder::new();
        let dir = fx.mkdir(InodeNumber::ROOT, "d");
        fx.create_file(dir, "f", 13);
        fx.lost_found();
        let report = check_strict(&fx.image()).unwrap();

        assert!(report.is_clean());
        assert!(!report.needs_repair());
        assert_eq!(report.stats.inodes_in_use, 4);
        assert_eq!(report.stats.directories, 3);
        // Three directory blocks, twelve direct, one indirect, one listed.
        assert_eq!(report.stats.blocks_referenced, 17);
    }

    #[test]
    fn directory_block_past_image_end_is_a_finding() {
        let mut fx = FixtureBuilder::new();
        fx.lost_found();
        let dir = fx.mkdir(InodeNumber::ROOT, "d");
        let orphan = fx.create_orphan_file(1);
        fx.update_inode(dir, |inode| inode.direct[0] = BlockNumber(5000));
        let image = fx.image();

        let report = check_collecting(&image).unwrap();
        assert_eq!(
            report.findings.first(),
            Some(&Finding::at_block(
                FindingKind::BadDirectAddress,
                BlockNumber(5000)
            ))
        );
        assert_eq!(report.orphans, vec![orphan]);

        match check_strict(&image) {
            Err(err @ VfsckError::Inconsistent(_)) => assert_eq!(
                err.to_string(),
                "bad direct address in inode. (block 5000)"
            ),
            other => panic!("expected a finding, got {other:?}"),
        }
    }

    #[test]
    fn root_block_past_image_end_is_missing_root() {
        let mut fx = FixtureBuilder::new();
        fx.update_inode(InodeNumber::ROOT, |inode| {
            inode.direct[0] = BlockNumber(5000);
        });
        let report = check_collecting(&fx.image()).unwrap();
        let kinds: Vec<_> = report.findings.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&FindingKind::BadDirectAddress));
        assert!(kinds.contains(&FindingKind::RootMissing));
    }

    #[test]
    fn superblock_mismatch_is_fatal_in_both_modes() {
        let mut bytes = FixtureBuilder::new().build();
        let g = Geometry::STANDARD;
        let off = g.block_offset(BlockNumber(1)).unwrap() + 8;
        bytes[off..off + 4].copy_from_slice(&7_u32.to_le_bytes());
        let image = Image::new(bytes, g).unwrap();

        assert!(matches!(
            check_strict(&image),
            Err(VfsckError::InvalidGeometry(_))
        ));
        assert!(matches!(
            check_collecting(&image),
            Err(VfsckError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn strict_check_stops_at_first_finding() {
        let mut fx = FixtureBuilder::new();
        let a = fx.create_orphan_file(1);
        fx.update_inode(a, |inode| inode.raw_type = 9);
        let mut reporter = StrictReporter::new();
        let err = check(&fx.image(), &mut reporter).unwrap_err();
        assert_eq!(err.to_string(), format!("bad inode. (inode {a})"));
        assert_eq!(reporter.findings().len(), 1);
    }

    #[test]
    fn collecting_check_gathers_orphans_in_order() {
        let mut fx = FixtureBuilder::new();
        let a = fx.create_orphan_file(1);
        let b = fx.create_orphan_file(0);
        let report = check_collecting(&fx.image()).unwrap();

        assert_eq!(report.orphans, vec![a, b]);
        assert_eq!(report.count_of(FindingKind::UnreferencedInode), 2);
        assert!(report.needs_repair());
    }

    #[test]
    fn directory_block_past_end_of_image_is_corruption() {
        let mut fx = FixtureBuilder::new();
        let dir = fx.mkdir(InodeNumber::ROOT, "d");
        fx.update_inode(dir, |inode| inode.direct[0] = BlockNumber(9000));
        let err = check_collecting(&fx.image()).unwrap_err();
        assert!(matches!(err, VfsckError::Corruption { .. }));
    }

    #[test]
    fn report_serializes_to_json() {
        let mut fx = FixtureBuilder::new();
        fx.create_orphan_file(0);
        let report = check_collecting(&fx.image()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["orphans"], serde_json::json!([2]));
        assert_eq!(json["findings"][0]["kind"], "unreferenced_inode");
        assert_eq!(json["stats"]["inodes_in_use"], 2);
    }

    proptest! {
        #[test]
        fn arbitrary_inode_bytes_never_panic(
            ino in 1_u32..200,
            record in proptest::collection::vec(any::<u8>(), INODE_SIZE),
        ) {
            let mut fx = FixtureBuilder::new();
            let dir = fx.mkdir(InodeNumber::ROOT, "d");
            fx.create_file(dir, "f", 14);
            let g = fx.geometry();
            let mut bytes = fx.build();
            let off = g.inode_offset(InodeNumber(ino)).unwrap();
            bytes[off..off + INODE_SIZE].copy_from_slice(&record);
            let image = Image::new(bytes, g).unwrap();

            // Any outcome is fine as long as it is a value.
            let _ = check_collecting(&image);
            let _ = check_strict(&image);
        }

        #[test]
        fn arbitrary_root_directory_block_never_panics(
            block in proptest::collection::vec(any::<u8>(), 512),
        ) {
            let fx = FixtureBuilder::new();
            let g = fx.geometry();
            let root_block = fx.inode(InodeNumber::ROOT).dir_block();
            let mut bytes = fx.build();
            let off = g.block_offset(root_block).unwrap();
            bytes[off..off + 512].copy_from_slice(&block);
            let image = Image::new(bytes, g).unwrap();

            if let Ok(report) = check_collecting(&image) {
                prop_assert!(report.orphans.iter().all(|o| o.0 < g.inode_count));
            }
        }
    }
}
