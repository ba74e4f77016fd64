#![allow(non_snake_case)]

pub mod detect;
pub mod error;
pub mod io;
pub mod junction;
pub mod params;
pub mod patterns;
pub mod stats;

use std::path::PathBuf;

use anyhow::Context;
use log::{error, info};
use rayon::prelude::*;

use crate::detect::{ExtentPolicy, FileDetector, FileJunctions};
use crate::io::extents::SegmentExtents;
use crate::io::tables;
use crate::params::{Parameters, RunMode};
use crate::patterns::CigarPatternStats;
use crate::stats::DetectionStats;

/// Top-level dispatcher. Called from `main()` after CLI parsing.
pub fn run(params: &Parameters) -> anyhow::Result<()> {
    params.validate()?;

    info!("ruDIP v{}", env!("CARGO_PKG_VERSION"));
    info!("runMode: {}", params.run_mode);
    info!("threads: {}", params.threads);
    info!("outputDir: {}", params.output_dir.display());

    std::fs::create_dir_all(&params.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            params.output_dir.display()
        )
    })?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(params.threads)
        .build()
        .context("failed to build thread pool")?;

    pool.install(|| match params.run_mode {
        RunMode::Boundaries => boundaries(params),
        RunMode::UmiCount => umi_count(params),
        RunMode::Group => group(params),
        RunMode::CigarPatterns => cigar_patterns(params),
    })
}

/// Pair each result with its input path; failures are logged and kept
fn split_results<T>(
    paths: &[PathBuf],
    results: Vec<Result<T, error::Error>>,
) -> (Vec<T>, Vec<anyhow::Error>) {
    let mut ok = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for (path, result) in paths.iter().zip(results) {
        match result.with_context(|| format!("failed to process {}", path.display())) {
            Ok(value) => ok.push(value),
            Err(e) => {
                error!("{e:#}");
                failed.push(e);
            }
        }
    }
    (ok, failed)
}

/// Turn per-file failures into the run's exit status
fn report_failures(failed: Vec<anyhow::Error>, total: usize) -> anyhow::Result<()> {
    let n = failed.len();
    match failed.into_iter().next() {
        None => Ok(()),
        Some(first) => Err(first.context(format!("{n} of {total} input files failed"))),
    }
}

fn log_overall(files: &[FileJunctions]) {
    if files.len() < 2 {
        return;
    }
    let mut total = DetectionStats::new();
    for file in files {
        total.merge(&file.stats);
    }
    total.log_summary("all files");
}

fn boundaries(params: &Parameters) -> anyhow::Result<()> {
    let config = params.detector_config()?;
    let detector = FileDetector::new(&config);
    let (files, failed) = split_results(&params.files, detector.run_all(&params.files));
    log_overall(&files);

    if !files.is_empty() {
        let dir = &params.output_dir;
        for segment in tables::reported_segments(&files) {
            tables::write_boundary_tables(dir, &segment, &files)
                .with_context(|| format!("failed to write boundary tables for {segment}"))?;
            let (path, n_groups) =
                tables::write_group_table(dir, &segment, &files, params.group_spread)
                    .with_context(|| format!("failed to write groups for {segment}"))?;
            info!("{segment}: {n_groups} junction groups -> {}", path.display());
        }
        let path = tables::write_junction_counts(dir, &files)
            .context("failed to write junction counts")?;
        info!("Junction counts written to {}", path.display());
    }

    report_failures(failed, params.files.len())
}

fn umi_count(params: &Parameters) -> anyhow::Result<()> {
    let config = params.detector_config()?;
    let extents = match &params.segment_extents {
        Some(path) => Some(SegmentExtents::from_file(path).with_context(|| {
            format!("failed to load segment extents {}", path.display())
        })?),
        None => None,
    };
    let policy = extents
        .as_ref()
        .map_or(ExtentPolicy::FromHeader, ExtentPolicy::Table);

    let detector = FileDetector::new(&config)
        .with_extents(policy)
        .retain_lines(true);
    let (files, failed) = split_results(&params.files, detector.run_all(&params.files));
    log_overall(&files);

    if !files.is_empty() {
        let dir = &params.output_dir;
        for file in &files {
            let path = tables::write_gapped_sam(dir, file)
                .with_context(|| format!("failed to write gapped SAM for {}", file.sample))?;
            info!("{}: gapped records -> {}", file.sample, path.display());
        }
        let path = tables::write_umi_counts(dir, &files).context("failed to write UMI counts")?;
        info!("UMI counts written to {}", path.display());
    }

    report_failures(failed, params.files.len())
}

fn group(params: &Parameters) -> anyhow::Result<()> {
    let results: Vec<_> = params
        .files
        .par_iter()
        .map(|input| {
            let output = tables::grouped_table_path(&params.output_dir, input);
            tables::group_table(input, &params.boundary_column, params.group_spread, &output)
                .map(|n| (output, n))
        })
        .collect();

    let (written, failed) = split_results(&params.files, results);
    for (path, n_groups) in &written {
        info!("{n_groups} junction groups -> {}", path.display());
    }
    report_failures(failed, params.files.len())
}

fn cigar_patterns(params: &Parameters) -> anyhow::Result<()> {
    let census = CigarPatternStats::new();
    let results: Vec<_> = params
        .files
        .par_iter()
        .map(|path| census.count_file(path))
        .collect();

    let (counted, failed) = split_results(&params.files, results);
    info!(
        "Counted {} alignment records from {} files",
        counted.iter().sum::<u64>(),
        counted.len()
    );

    if !counted.is_empty() {
        let path = params.output_dir.join(patterns::PATTERNS_FILE);
        census
            .write_output(&path)
            .context("failed to write CIGAR patterns")?;
    }

    report_failures(failed, params.files.len())
}
