// Per-file two-pass junction detection
//
// Pass 1 (`Collecting`) gathers raw candidate boundaries per segment, the
// calibration step (`Calibrated`) turns them into acceptance windows, and
// pass 2 (`Classifying`) re-classifies every record against those windows,
// the optional segment extents and the UMI deduplicator. Each state is
// consumed by the transition to the next, so pass 2 cannot start before
// calibration has finished. Detector state never outlives one input file.

use crate::error::Error;
use crate::io::extents::SegmentExtents;
use crate::io::sam::{SamReader, SamRecord, parse_record, reference_lengths};
use crate::junction::dedup::DedupOutcome;
use crate::junction::{BoundaryRange, JunctionCandidate, Rejection, UmiDeduplicator, calibrate};
use crate::params::DetectorConfig;
use crate::stats::DetectionStats;
use bstr::BString;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Accepted junctions of one segment in one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentJunctions {
    /// The segment had no calibration data in this file; reported as "no
    /// data", never as zero
    NoData,
    Accepted(Vec<JunctionCandidate>),
}

impl SegmentJunctions {
    /// Accepted count, `None` for no data
    pub fn count(&self) -> Option<usize> {
        match self {
            SegmentJunctions::NoData => None,
            SegmentJunctions::Accepted(v) => Some(v.len()),
        }
    }

    pub fn junctions(&self) -> &[JunctionCandidate] {
        match self {
            SegmentJunctions::NoData => &[],
            SegmentJunctions::Accepted(v) => v,
        }
    }
}

/// Final-pass outcome for one alignment record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Accepted(JunctionCandidate),
    Unmapped,
    FilteredMapq,
    Untracked,
    Rejected(Rejection),
    OutsideExtent,
    NoCalibration,
    OutOfRange,
    MissingUmi,
    DuplicateUmi,
}

/// Record-level selection shared by both passes
fn precheck(config: &DetectorConfig, rec: &SamRecord) -> Option<Disposition> {
    if rec.is_unmapped() {
        return Some(Disposition::Unmapped);
    }
    if let Some(q) = config.unique_mapq {
        if rec.mapq != Some(q) {
            return Some(Disposition::FilteredMapq);
        }
    }
    if !config.is_tracked(&rec.record.segment) {
        return Some(Disposition::Untracked);
    }
    None
}

// ---------------------------------------------------------------------------
// Collecting
// ---------------------------------------------------------------------------

/// Pass 1: raw candidate boundaries per segment (no UMI requirement)
pub struct Collecting<'a> {
    config: &'a DetectorConfig,
    boundaries: BTreeMap<String, (Vec<u64>, Vec<u64>)>,
    candidates: u64,
}

impl<'a> Collecting<'a> {
    pub fn new(config: &'a DetectorConfig) -> Self {
        Self {
            config,
            boundaries: BTreeMap::new(),
            candidates: 0,
        }
    }

    /// Offer one record; returns true if it contributed a candidate
    pub fn observe(&mut self, rec: &SamRecord) -> bool {
        if precheck(self.config, rec).is_some() {
            return false;
        }
        match self.config.classifier.classify(&rec.record) {
            Ok(cand) => {
                let (b5, b3) = self.boundaries.entry(cand.segment).or_default();
                b5.push(cand.boundary5);
                b3.push(cand.boundary3);
                self.candidates += 1;
                true
            }
            Err(_) => false,
        }
    }

    pub fn candidate_count(&self) -> u64 {
        self.candidates
    }

    /// Derive one acceptance window per segment that produced candidates
    pub fn calibrate(self, percentile: u32) -> Calibrated<'a> {
        let ranges: BTreeMap<String, BoundaryRange> = self
            .boundaries
            .iter()
            .filter_map(|(segment, (b5, b3))| {
                calibrate(b5, b3, percentile).map(|range| (segment.clone(), range))
            })
            .collect();

        for (segment, r) in &ranges {
            debug!(
                "{segment}: boundary5 [{}, {}], boundary3 [{}, {}] from {} candidates",
                r.boundary5_lo,
                r.boundary5_hi,
                r.boundary3_lo,
                r.boundary3_hi,
                self.boundaries[segment].0.len()
            );
        }

        Calibrated {
            config: self.config,
            ranges: Some(ranges),
            calibration_candidates: self.candidates,
        }
    }
}

// ---------------------------------------------------------------------------
// Calibrated
// ---------------------------------------------------------------------------

/// Acceptance windows ready for the classification pass
pub struct Calibrated<'a> {
    config: &'a DetectorConfig,
    /// `None` when calibration is disabled
    ranges: Option<BTreeMap<String, BoundaryRange>>,
    calibration_candidates: u64,
}

impl<'a> Calibrated<'a> {
    /// No calibration pass: every segment is classified without a window
    pub fn uncalibrated(config: &'a DetectorConfig) -> Self {
        Self {
            config,
            ranges: None,
            calibration_candidates: 0,
        }
    }

    #[cfg(test)]
    fn is_calibrated(&self) -> bool {
        self.ranges.is_some()
    }

    #[cfg(test)]
    fn range(&self, segment: &str) -> Option<&BoundaryRange> {
        self.ranges.as_ref().and_then(|r| r.get(segment))
    }

    pub fn into_classifying(self, extents: Option<Cow<'a, SegmentExtents>>) -> Classifying<'a> {
        let stats = DetectionStats {
            calibration_candidates: self.calibration_candidates,
            ..DetectionStats::default()
        };
        Classifying {
            config: self.config,
            ranges: self.ranges,
            extents,
            dedup: UmiDeduplicator::new(),
            accepted: BTreeMap::new(),
            seen_segments: BTreeSet::new(),
            stats,
        }
    }
}

// ---------------------------------------------------------------------------
// Classifying
// ---------------------------------------------------------------------------

/// Pass 2: classification, window check, extent check and UMI dedup
pub struct Classifying<'a> {
    config: &'a DetectorConfig,
    ranges: Option<BTreeMap<String, BoundaryRange>>,
    extents: Option<Cow<'a, SegmentExtents>>,
    dedup: UmiDeduplicator,
    accepted: BTreeMap<String, Vec<JunctionCandidate>>,
    seen_segments: BTreeSet<String>,
    stats: DetectionStats,
}

impl Classifying<'_> {
    /// Count a line that could not be parsed as an alignment
    pub fn record_malformed(&mut self) {
        self.stats.total_records += 1;
        self.stats.malformed_records += 1;
    }

    /// Classify one record and update statistics
    pub fn classify(&mut self, rec: &SamRecord) -> Disposition {
        self.stats.total_records += 1;
        let disposition = self.decide(rec);
        match &disposition {
            Disposition::Accepted(_) => self.stats.accepted += 1,
            Disposition::Unmapped => self.stats.unmapped += 1,
            Disposition::FilteredMapq => self.stats.filtered_mapq += 1,
            Disposition::Untracked => self.stats.untracked += 1,
            Disposition::Rejected(reason) => self.stats.record_rejection(*reason),
            Disposition::OutsideExtent => self.stats.outside_extent += 1,
            Disposition::NoCalibration => self.stats.no_calibration += 1,
            Disposition::OutOfRange => self.stats.out_of_range += 1,
            Disposition::MissingUmi => self.stats.missing_umi += 1,
            Disposition::DuplicateUmi => self.stats.duplicate_umi += 1,
        }
        disposition
    }

    fn decide(&mut self, rec: &SamRecord) -> Disposition {
        if let Some(skip) = precheck(self.config, rec) {
            return skip;
        }

        let segment = &rec.record.segment;
        if !self.seen_segments.contains(segment) {
            self.seen_segments.insert(segment.clone());
        }

        let cand = match self.config.classifier.classify(&rec.record) {
            Ok(cand) => cand,
            Err(reason) => return Disposition::Rejected(reason),
        };

        if let Some(extents) = &self.extents {
            let first = rec.record.position;
            let last = first + cand.reference_span - 1;
            if !extents.contains(segment, first, last) {
                return Disposition::OutsideExtent;
            }
        }

        if let Some(ranges) = &self.ranges {
            match ranges.get(segment) {
                None => return Disposition::NoCalibration,
                Some(range) if !range.contains(&cand) => return Disposition::OutOfRange,
                Some(_) => {}
            }
        }

        if self.config.require_umi {
            match self.dedup.observe(segment, cand.umi.as_deref()) {
                DedupOutcome::First => {}
                DedupOutcome::Duplicate => return Disposition::DuplicateUmi,
                DedupOutcome::MissingUmi => return Disposition::MissingUmi,
            }
        }

        self.accepted
            .entry(segment.clone())
            .or_default()
            .push(cand.clone());
        Disposition::Accepted(cand)
    }

    /// Close the pass: per-segment results and statistics.
    ///
    /// Reported segments are the tracked ones, or every segment seen when
    /// all are tracked. Under calibration a segment without a window is
    /// `NoData`.
    pub fn finish(mut self) -> (BTreeMap<String, SegmentJunctions>, DetectionStats) {
        let segments: BTreeSet<String> = if self.config.tracked_segments.is_empty() {
            let mut all = std::mem::take(&mut self.seen_segments);
            if let Some(ranges) = &self.ranges {
                all.extend(ranges.keys().cloned());
            }
            all
        } else {
            self.config.tracked_segments.clone()
        };

        let results = segments
            .into_iter()
            .map(|segment| {
                let calibrated = match &self.ranges {
                    Some(ranges) => ranges.contains_key(&segment),
                    None => true,
                };
                let result = if calibrated {
                    SegmentJunctions::Accepted(self.accepted.remove(&segment).unwrap_or_default())
                } else {
                    SegmentJunctions::NoData
                };
                (segment, result)
            })
            .collect();

        (results, self.stats)
    }
}

// ---------------------------------------------------------------------------
// File driver
// ---------------------------------------------------------------------------

/// Source of segment extents for the extent check
#[derive(Debug, Clone, Copy)]
pub enum ExtentPolicy<'a> {
    /// No extent check
    Ignore,
    /// One table shared by all inputs
    Table(&'a SegmentExtents),
    /// `[1, LN]` from each input's `@SQ` lines
    FromHeader,
}

/// Everything one input file produced
#[derive(Debug, Clone)]
pub struct FileJunctions {
    pub sample: String,
    pub header: Vec<BString>,
    pub segments: BTreeMap<String, SegmentJunctions>,
    /// Verbatim lines of accepted records per segment, when retained
    pub retained: BTreeMap<String, Vec<BString>>,
    pub stats: DetectionStats,
}

/// Sample or cell name: file name up to the first '.'
pub fn sample_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    name.split('.').next().unwrap_or_default().to_string()
}

/// Runs the two-pass detection on input files
#[derive(Debug, Clone, Copy)]
pub struct FileDetector<'a> {
    config: &'a DetectorConfig,
    extents: ExtentPolicy<'a>,
    retain_lines: bool,
}

impl<'a> FileDetector<'a> {
    pub fn new(config: &'a DetectorConfig) -> Self {
        Self {
            config,
            extents: ExtentPolicy::Ignore,
            retain_lines: false,
        }
    }

    pub fn with_extents(mut self, extents: ExtentPolicy<'a>) -> Self {
        self.extents = extents;
        self
    }

    /// Keep the verbatim lines of accepted records
    pub fn retain_lines(mut self, retain: bool) -> Self {
        self.retain_lines = retain;
        self
    }

    /// Process one input file
    pub fn run(&self, path: &Path) -> Result<FileJunctions, Error> {
        let sample = sample_name(path);
        info!("Processing file: {}", path.display());

        let calibrated = match self.config.percentile {
            Some(p) => {
                let collecting = self.collect(path)?;
                if collecting.candidate_count() == 0 {
                    warn!(
                        "{}: no junction candidates for calibration; all segments report no data",
                        path.display()
                    );
                }
                collecting.calibrate(p)
            }
            None => Calibrated::uncalibrated(self.config),
        };

        let mut reader = SamReader::open(path)?;
        self.warn_missing_tracked(path, reader.header());
        let extents = self.resolve_extents(path, reader.header());
        let mut classifying = calibrated.into_classifying(extents);
        let mut retained: BTreeMap<String, Vec<BString>> = BTreeMap::new();

        while let Some(line) = reader.next_line()? {
            match parse_record(&line, self.config.umi_tag) {
                Ok(rec) => {
                    if let Disposition::Accepted(cand) = classifying.classify(&rec) {
                        if self.retain_lines {
                            retained.entry(cand.segment).or_default().push(rec.line);
                        }
                    }
                }
                Err(e) => {
                    debug!("{}: skipping malformed record: {e}", path.display());
                    classifying.record_malformed();
                }
            }
        }

        let (segments, stats) = classifying.finish();
        stats.log_summary(&sample);

        Ok(FileJunctions {
            sample,
            header: reader.header().to_vec(),
            segments,
            retained,
            stats,
        })
    }

    fn collect(&self, path: &Path) -> Result<Collecting<'a>, Error> {
        let mut reader = SamReader::open(path)?;
        let mut collecting = Collecting::new(self.config);
        while let Some(line) = reader.next_line()? {
            if let Ok(rec) = parse_record(&line, self.config.umi_tag) {
                collecting.observe(&rec);
            }
        }
        Ok(collecting)
    }

    fn warn_missing_tracked(&self, path: &Path, header: &[BString]) {
        if self.config.tracked_segments.is_empty() {
            return;
        }
        let lengths = match reference_lengths(header) {
            Ok(lengths) => lengths,
            Err(e) => {
                if !matches!(self.extents, ExtentPolicy::FromHeader) {
                    warn!("{}: {e}", path.display());
                }
                return;
            }
        };
        if lengths.is_empty() {
            return;
        }
        for segment in &self.config.tracked_segments {
            if !lengths.contains_key(segment) {
                warn!("{}: tracked segment {segment} has no @SQ line", path.display());
            }
        }
    }

    fn resolve_extents(&self, path: &Path, header: &[BString]) -> Option<Cow<'a, SegmentExtents>> {
        match self.extents {
            ExtentPolicy::Ignore => None,
            ExtentPolicy::Table(table) => Some(Cow::Borrowed(table)),
            ExtentPolicy::FromHeader => {
                let extents = match reference_lengths(header) {
                    Ok(lengths) => SegmentExtents::from_reference_lengths(&lengths),
                    Err(e) => {
                        warn!("{}: {e}; no segment extents available", path.display());
                        SegmentExtents::default()
                    }
                };
                if extents.is_empty() {
                    warn!(
                        "{}: no @SQ lengths in header; every record fails the extent check",
                        path.display()
                    );
                }
                Some(Cow::Owned(extents))
            }
        }
    }

    /// Process input files in parallel on the current rayon pool.
    ///
    /// Results come back in input order; a failing file does not stop the
    /// others.
    pub fn run_all(&self, paths: &[PathBuf]) -> Vec<Result<FileJunctions, Error>> {
        paths.par_iter().map(|path| self.run(path)).collect()
    }
}
