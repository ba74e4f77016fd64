use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use clap::Parser;
use noodles::sam::alignment::record::data::field::Tag;

use crate::detect::sample_name;
use crate::error::Error;
use crate::io::sam::parse_tag;
use crate::junction::JunctionClassifier;

// ---------------------------------------------------------------------------
// Run mode enum
// ---------------------------------------------------------------------------

/// `--run-mode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Percentile-calibrated junction boundaries per sample
    Boundaries,
    /// UMI-deduplicated gapped read counts per segment
    UmiCount,
    /// First-fit grouping of a tabulated boundary CSV
    Group,
    /// CIGAR op-pattern census
    CigarPatterns,
}

impl std::str::FromStr for RunMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boundaries" => Ok(Self::Boundaries),
            "umi-count" => Ok(Self::UmiCount),
            "group" => Ok(Self::Group),
            "cigar-patterns" => Ok(Self::CigarPatterns),
            _ => Err(format!(
                "unknown run mode '{s}'; expected 'boundaries', 'umi-count', 'group' or 'cigar-patterns'"
            )),
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boundaries => write!(f, "boundaries"),
            Self::UmiCount => write!(f, "umi-count"),
            Self::Group => write!(f, "group"),
            Self::CigarPatterns => write!(f, "cigar-patterns"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters struct
// ---------------------------------------------------------------------------

/// ruDIP command-line parameters.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ruDIP",
    about = "Defective interfering particle junction detection from gapped viral alignments",
    version
)]
pub struct Parameters {
    // ── Run ─────────────────────────────────────────────────────────────
    /// Run mode: boundaries, umi-count, group or cigar-patterns
    #[arg(long = "run-mode", default_value = "boundaries")]
    pub run_mode: RunMode,

    /// Number of threads (input files are processed in parallel)
    #[arg(long = "threads", default_value_t = 1)]
    pub threads: usize,

    /// Input files: one SAM (optionally gzipped) per sample or cell, or a
    /// boundary CSV for the group mode
    #[arg(required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Directory for all output files
    #[arg(long = "output-dir", default_value = ".")]
    pub output_dir: PathBuf,

    // ── Junction filters ────────────────────────────────────────────────
    /// Minimum matched length on each side of the skip
    #[arg(long = "min-flank-length", default_value_t = 1)]
    pub min_flank_length: u32,

    /// Minimum length of the skipped region
    #[arg(long = "min-gap-length", default_value_t = 1)]
    pub min_gap_length: u32,

    /// Central percentile of observed boundaries accepted (e.g. 95 or 100);
    /// required for boundaries, optional for umi-count
    #[arg(long = "percentile")]
    pub percentile: Option<u32>,

    /// Maximum boundary spread within one group
    #[arg(long = "group-spread", default_value_t = 10)]
    pub group_spread: u64,

    // ── Record selection ────────────────────────────────────────────────
    /// Segments to track (comma separated); empty tracks every reference
    #[arg(long = "segments", value_delimiter = ',')]
    pub segments: Vec<String>,

    /// Only use records with this MAPQ (e.g. 255 for STAR unique mappers)
    #[arg(long = "unique-mapq")]
    pub unique_mapq: Option<u8>,

    /// Tab-separated segment extents (columns 1, 4, 5: segment, start, end);
    /// defaults to the @SQ lengths of each input
    #[arg(long = "segment-extents")]
    pub segment_extents: Option<PathBuf>,

    // ── UMI ─────────────────────────────────────────────────────────────
    /// Deduplicate accepted junctions by UMI in boundaries mode
    #[arg(long = "dedup-umi")]
    pub dedup_umi: bool,

    /// SAM tag holding the UMI
    #[arg(long = "umi-tag", default_value = "UB")]
    pub umi_tag: String,

    // ── Grouping input ──────────────────────────────────────────────────
    /// Column holding "<boundary5>-<boundary3>" in the group mode input
    #[arg(long = "boundary-column", default_value = "boundary_comb")]
    pub boundary_column: String,
}

/// Validated settings for per-file junction detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    pub classifier: JunctionClassifier,
    /// Calibration percentile; `None` skips the calibration pass
    pub percentile: Option<u32>,
    /// Drop candidates without a UMI and repeated UMIs per segment
    pub require_umi: bool,
    /// Empty means every segment is tracked
    pub tracked_segments: BTreeSet<String>,
    pub unique_mapq: Option<u8>,
    pub umi_tag: Tag,
}

impl DetectorConfig {
    pub fn is_tracked(&self, segment: &str) -> bool {
        self.tracked_segments.is_empty() || self.tracked_segments.contains(segment)
    }
}

impl Parameters {
    /// Validate parameter combinations that clap alone cannot enforce.
    pub fn validate(&self) -> Result<(), Error> {
        if self.threads == 0 {
            return Err(Error::Parameter(
                "--threads must be >= 1".into(),
            ));
        }

        if self.min_flank_length == 0 {
            return Err(Error::Parameter(
                "--min-flank-length must be a positive integer".into(),
            ));
        }

        if self.min_gap_length == 0 {
            return Err(Error::Parameter(
                "--min-gap-length must be a positive integer".into(),
            ));
        }

        if let Some(p) = self.percentile {
            if p > 100 {
                return Err(Error::Parameter(format!(
                    "--percentile must be within 0..=100, got {p}"
                )));
            }
        }

        if self.run_mode == RunMode::Boundaries && self.percentile.is_none() {
            return Err(Error::Parameter(
                "--percentile is required when --run-mode boundaries".into(),
            ));
        }

        if self.umi_tag.len() != 2 || !self.umi_tag.is_ascii() {
            return Err(Error::Parameter(format!(
                "--umi-tag must be a two-character SAM tag, got '{}'",
                self.umi_tag
            )));
        }

        if self.segments.iter().any(|s| s.is_empty()) {
            return Err(Error::Parameter(
                "--segments contains an empty segment name".into(),
            ));
        }

        self.check_sample_names()
    }

    /// Per-file outputs are named after the sample, so two inputs must not
    /// share one. The census writes no per-file output.
    fn check_sample_names(&self) -> Result<(), Error> {
        if self.run_mode == RunMode::CigarPatterns {
            return Ok(());
        }

        let mut seen: BTreeMap<String, &PathBuf> = BTreeMap::new();
        for path in &self.files {
            let name = sample_name(path);
            if let Some(first) = seen.insert(name.clone(), path) {
                return Err(Error::Parameter(format!(
                    "input files {} and {} both map to sample name '{name}'; \
                     rename one so their outputs do not collide",
                    first.display(),
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Build the per-file detector settings for the selected run mode
    pub fn detector_config(&self) -> Result<DetectorConfig, Error> {
        Ok(DetectorConfig {
            classifier: JunctionClassifier::new(self.min_flank_length, self.min_gap_length),
            percentile: self.percentile,
            require_umi: self.run_mode == RunMode::UmiCount || self.dedup_umi,
            tracked_segments: self.segments.iter().cloned().collect(),
            unique_mapq: self.unique_mapq,
            umi_tag: parse_tag(&self.umi_tag)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
