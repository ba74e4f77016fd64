//! Junction detection statistics tracking and reporting
use crate::junction::Rejection;
use log::info;
use std::collections::BTreeMap;

/// Tracks what happened to every alignment line of one input file
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct DetectionStats {
    /// Alignment lines read (final pass)
    pub total_records: u64,
    /// Lines that could not be parsed as alignments
    pub malformed_records: u64,
    /// RNAME `*` or POS 0
    pub unmapped: u64,
    /// MAPQ differs from the unique-mapper value
    pub filtered_mapq: u64,
    /// Segment not tracked
    pub untracked: u64,
    /// Raw candidates collected for calibration
    pub calibration_candidates: u64,
    /// Records the classifier rejected, by reason
    pub rejected: BTreeMap<Rejection, u64>,
    /// Alignment span leaves the segment extent
    pub outside_extent: u64,
    /// Segment had no calibration data
    pub no_calibration: u64,
    /// Boundaries outside the calibrated window
    pub out_of_range: u64,
    /// Candidate dropped for lacking a UMI
    pub missing_umi: u64,
    /// Candidate dropped as a repeated UMI
    pub duplicate_umi: u64,
    /// Accepted junctions
    pub accepted: u64,
}

impl DetectionStats {
    /// Create new statistics tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a classifier rejection
    pub fn record_rejection(&mut self, reason: Rejection) {
        *self.rejected.entry(reason).or_insert(0) += 1;
    }

    /// Total classifier rejections
    pub fn total_rejected(&self) -> u64 {
        self.rejected.values().sum()
    }

    /// Fold another file's statistics into this one
    pub fn merge(&mut self, other: &DetectionStats) {
        self.total_records += other.total_records;
        self.malformed_records += other.malformed_records;
        self.unmapped += other.unmapped;
        self.filtered_mapq += other.filtered_mapq;
        self.untracked += other.untracked;
        self.calibration_candidates += other.calibration_candidates;
        for (reason, n) in &other.rejected {
            *self.rejected.entry(*reason).or_insert(0) += n;
        }
        self.outside_extent += other.outside_extent;
        self.no_calibration += other.no_calibration;
        self.out_of_range += other.out_of_range;
        self.missing_umi += other.missing_umi;
        self.duplicate_umi += other.duplicate_umi;
        self.accepted += other.accepted;
    }

    /// Get percentage of records accepted as junctions
    pub fn accepted_percent(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            100.0 * self.accepted as f64 / self.total_records as f64
        }
    }

    /// Print summary statistics to log
    pub fn log_summary(&self, label: &str) {
        if self.total_records == 0 {
            info!("[{label}] No alignment records processed");
            return;
        }

        info!("=== Junction Summary: {label} ===");
        info!("Alignment records: {}", self.total_records);
        if self.malformed_records > 0 {
            info!("Malformed records: {}", self.malformed_records);
        }
        info!(
            "Unmapped / filtered MAPQ / untracked: {} / {} / {}",
            self.unmapped, self.filtered_mapq, self.untracked
        );
        if self.calibration_candidates > 0 {
            info!("Calibration candidates: {}", self.calibration_candidates);
        }
        if !self.rejected.is_empty() {
            info!("Rejected by classifier: {}", self.total_rejected());
        }
        for (reason, n) in &self.rejected {
            info!("  {reason}: {n}");
        }
        if self.outside_extent > 0 {
            info!("Outside segment extent: {}", self.outside_extent);
        }
        if self.no_calibration > 0 || self.out_of_range > 0 {
            info!(
                "No calibration data / outside calibrated window: {} / {}",
                self.no_calibration, self.out_of_range
            );
        }
        if self.missing_umi > 0 || self.duplicate_umi > 0 {
            info!(
                "Missing UMI / duplicate UMI: {} / {}",
                self.missing_umi, self.duplicate_umi
            );
        }
        info!(
            "Accepted junctions: {} ({:.2}%)",
            self.accepted,
            self.accepted_percent()
        );
    }
}
