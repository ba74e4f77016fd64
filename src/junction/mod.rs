//! DIP junction detection from gapped alignments
//!
//! This module handles:
//! - CIGAR decoding
//! - Classification of single-gap alignments into junction candidates
//! - Percentile calibration of per-segment acceptance windows
//! - UMI deduplication
//! - First-fit grouping of nearby junctions
pub mod calibrate;
pub mod cigar;
pub mod dedup;
pub mod group;

pub use calibrate::{BoundaryRange, calibrate, percentile};
pub use cigar::{CigarOp, parse_cigar, reference_length};
pub use dedup::UmiDeduplicator;
pub use group::{Group, GroupedPair, group_junctions};

use std::fmt;

/// One alignment line reduced to the fields junction detection needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    /// Reference (segment) name
    pub segment: String,
    /// 1-based leftmost mapped reference position
    pub position: u64,
    /// Raw CIGAR text; decoded during classification so a bad CIGAR only
    /// rejects this record
    pub cigar: String,
    /// UMI tag value, if present
    pub umi: Option<String>,
}

/// A single internal-deletion junction derived from one alignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionCandidate {
    pub segment: String,
    /// Last reference base of the 5' block
    pub boundary5: u64,
    /// First reference base of the 3' block
    pub boundary3: u64,
    /// M bases before the skip
    pub flank5_length: u64,
    /// M bases after the skip
    pub flank3_length: u64,
    /// Length of the N operation
    pub gap_length: u64,
    /// Reference bases covered by the whole alignment (M, D and N)
    pub reference_span: u64,
    pub umi: Option<String>,
}

/// Why an alignment was not accepted as a junction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rejection {
    MalformedCigar,
    UnsupportedOp,
    NoSkip,
    MultipleSkips,
    MisplacedSoftClip,
    ShortFlank,
    ShortGap,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::MalformedCigar => "malformed CIGAR",
            Rejection::UnsupportedOp => "unsupported CIGAR operation",
            Rejection::NoSkip => "no skip",
            Rejection::MultipleSkips => "multiple skips",
            Rejection::MisplacedSoftClip => "internal soft clip",
            Rejection::ShortFlank => "flank too short",
            Rejection::ShortGap => "gap too short",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-gap junction classifier.
///
/// One coordinate-accumulation rule covers every M/I/D/N/S layout: reference
/// bases before the skip (M and D) place the 5' boundary, the skip length
/// places the 3' boundary, and only M bases count toward the flank filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JunctionClassifier {
    pub min_flank_length: u32,
    pub min_gap_length: u32,
}

impl JunctionClassifier {
    pub fn new(min_flank_length: u32, min_gap_length: u32) -> Self {
        Self {
            min_flank_length,
            min_gap_length,
        }
    }

    /// Classify one alignment record
    ///
    /// # Returns
    /// The junction candidate, or the first reason the record failed
    pub fn classify(&self, record: &AlignmentRecord) -> Result<JunctionCandidate, Rejection> {
        let ops = parse_cigar(&record.cigar).map_err(|_| Rejection::MalformedCigar)?;
        let skip_idx = locate_single_skip(&ops)?;

        let (before, rest) = ops.split_at(skip_idx);
        let gap_length = u64::from(rest[0].len());
        let after = &rest[1..];

        let ref_before: u64 = before
            .iter()
            .filter(|op| matches!(op, CigarOp::Match(_) | CigarOp::Del(_)))
            .map(|op| u64::from(op.len()))
            .sum();
        let flank5_length = match_bases(before);
        let flank3_length = match_bases(after);

        let min_flank = u64::from(self.min_flank_length);
        if flank5_length < min_flank || flank3_length < min_flank {
            return Err(Rejection::ShortFlank);
        }
        if gap_length < u64::from(self.min_gap_length) || gap_length == 0 {
            return Err(Rejection::ShortGap);
        }

        let boundary5 = (record.position + ref_before).saturating_sub(1);
        let boundary3 = boundary5 + gap_length + 1;

        Ok(JunctionCandidate {
            segment: record.segment.clone(),
            boundary5,
            boundary3,
            flank5_length,
            flank3_length,
            gap_length,
            reference_span: reference_length(&ops),
            umi: record.umi.clone(),
        })
    }
}

/// Validate the op layout and return the index of the only N operation
fn locate_single_skip(ops: &[CigarOp]) -> Result<usize, Rejection> {
    if ops.iter().any(|op| !op.is_supported()) {
        return Err(Rejection::UnsupportedOp);
    }

    let mut skips = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| matches!(op, CigarOp::RefSkip(_)))
        .map(|(i, _)| i);
    let skip_idx = skips.next().ok_or(Rejection::NoSkip)?;
    if skips.next().is_some() {
        return Err(Rejection::MultipleSkips);
    }

    let last = ops.len() - 1;
    let internal_clip = ops
        .iter()
        .enumerate()
        .any(|(i, op)| matches!(op, CigarOp::SoftClip(_)) && i != 0 && i != last);
    if internal_clip {
        return Err(Rejection::MisplacedSoftClip);
    }

    Ok(skip_idx)
}

fn match_bases(ops: &[CigarOp]) -> u64 {
    ops.iter()
        .filter(|op| matches!(op, CigarOp::Match(_)))
        .map(|op| u64::from(op.len()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(position: u64, cigar: &str) -> AlignmentRecord {
        AlignmentRecord {
            segment: "AF389115.1".to_string(),
            position,
            cigar: cigar.to_string(),
            umi: Some("ACGTACGTAC".to_string()),
        }
    }

    fn lenient() -> JunctionClassifier {
        JunctionClassifier::new(1, 1)
    }

    #[test]
    fn test_simple_junction() {
        let cand = JunctionClassifier::new(20, 50)
            .classify(&record(100, "20M50N30M"))
            .unwrap();
        assert_eq!(cand.boundary5, 119);
        assert_eq!(cand.boundary3, 170);
        assert_eq!(cand.flank5_length, 20);
        assert_eq!(cand.flank3_length, 30);
        assert_eq!(cand.gap_length, 50);
        assert_eq!(cand.segment, "AF389115.1");
        assert_eq!(cand.umi.as_deref(), Some("ACGTACGTAC"));
    }

    #[test]
    fn test_soft_clips_do_not_move_boundaries() {
        let classifier = JunctionClassifier::new(20, 50);
        let plain = classifier.classify(&record(100, "20M50N30M")).unwrap();
        let clipped = classifier.classify(&record(100, "5S20M50N30M5S")).unwrap();
        assert_eq!(clipped.boundary5, plain.boundary5);
        assert_eq!(clipped.boundary3, plain.boundary3);
        assert_eq!(clipped.flank5_length, 20);
        assert_eq!(clipped.flank3_length, 30);
    }

    #[test]
    fn test_deletion_moves_boundary_but_not_flank() {
        let cand = lenient().classify(&record(100, "10M5D20M50N30M")).unwrap();
        assert_eq!(cand.boundary5, 134);
        assert_eq!(cand.boundary3, 185);
        assert_eq!(cand.flank5_length, 30);
        assert_eq!(cand.flank3_length, 30);
    }

    #[test]
    fn test_insertion_counts_for_neither() {
        let cand = lenient().classify(&record(100, "10M3I20M50N30M")).unwrap();
        assert_eq!(cand.boundary5, 129);
        assert_eq!(cand.flank5_length, 30);

        let cand = lenient().classify(&record(100, "20M50N10M4I20M")).unwrap();
        assert_eq!(cand.boundary5, 119);
        assert_eq!(cand.flank3_length, 30);
    }

    #[test]
    fn test_long_indel_runs_are_handled() {
        // Layout absent from any hand-written pattern list
        let cand = lenient()
            .classify(&record(10, "3S10M1D10M2I10M1D5M400N8M1I8M1D8M2S"))
            .unwrap();
        assert_eq!(cand.boundary5, 10 + (10 + 1 + 10 + 10 + 1 + 5) - 1);
        assert_eq!(cand.boundary3, cand.boundary5 + 401);
        assert_eq!(cand.flank5_length, 35);
        assert_eq!(cand.flank3_length, 24);
    }

    #[test]
    fn test_reference_span() {
        let c = lenient();
        assert_eq!(c.classify(&record(100, "20M50N30M")).unwrap().reference_span, 100);
        assert_eq!(
            c.classify(&record(100, "10M5D20M50N30M")).unwrap().reference_span,
            115
        );
        // clips and insertions take no reference bases
        assert_eq!(
            c.classify(&record(100, "5S10M3I20M50N30M2S")).unwrap().reference_span,
            110
        );
    }

    #[test]
    fn test_boundary_invariant() {
        for cigar in ["20M50N30M", "2S9M1D9M200N30M", "15M1I15M7N30M3S"] {
            let cand = lenient().classify(&record(77, cigar)).unwrap();
            assert_eq!(cand.boundary3, cand.boundary5 + cand.gap_length + 1);
            assert!(cand.boundary5 < cand.boundary3);
        }
    }

    #[test]
    fn test_flank_thresholds() {
        let classifier = JunctionClassifier::new(21, 1);
        assert_eq!(
            classifier.classify(&record(100, "20M50N30M")),
            Err(Rejection::ShortFlank)
        );
        assert_eq!(
            classifier.classify(&record(100, "30M50N20M")),
            Err(Rejection::ShortFlank)
        );
        // D bases do not rescue a short flank
        assert_eq!(
            classifier.classify(&record(100, "10M20D10M50N30M")),
            Err(Rejection::ShortFlank)
        );
    }

    #[test]
    fn test_gap_threshold() {
        let classifier = JunctionClassifier::new(1, 51);
        assert_eq!(
            classifier.classify(&record(100, "20M50N30M")),
            Err(Rejection::ShortGap)
        );
        assert!(JunctionClassifier::new(1, 50)
            .classify(&record(100, "20M50N30M"))
            .is_ok());
    }

    #[test]
    fn test_zero_length_skip_rejected() {
        assert_eq!(
            JunctionClassifier::new(0, 0).classify(&record(100, "20M0N30M")),
            Err(Rejection::ShortGap)
        );
    }

    #[test]
    fn test_rejections() {
        let c = lenient();
        assert_eq!(c.classify(&record(100, "50M")), Err(Rejection::NoSkip));
        assert_eq!(
            c.classify(&record(100, "20M50N20M60N30M")),
            Err(Rejection::MultipleSkips)
        );
        assert_eq!(
            c.classify(&record(100, "5H20M50N30M")),
            Err(Rejection::UnsupportedOp)
        );
        assert_eq!(
            c.classify(&record(100, "20=50N30M")),
            Err(Rejection::UnsupportedOp)
        );
        assert_eq!(
            c.classify(&record(100, "20M5S50N30M")),
            Err(Rejection::MisplacedSoftClip)
        );
        assert_eq!(c.classify(&record(100, "*")), Err(Rejection::MalformedCigar));
        assert_eq!(
            c.classify(&record(100, "20M50N30")),
            Err(Rejection::MalformedCigar)
        );
    }

    #[test]
    fn test_missing_umi_is_not_an_error() {
        let mut rec = record(100, "20M50N30M");
        rec.umi = None;
        let cand = lenient().classify(&rec).unwrap();
        assert!(cand.umi.is_none());
    }
}
