// Reporting adapter: CSV tables and filtered SAM output
//
// Everything here works on the per-file results after all files finished;
// cross-file merging happens only in this module.

use crate::detect::{FileJunctions, SegmentJunctions, sample_name};
use crate::error::Error;
use crate::junction::JunctionCandidate;
use crate::junction::group::{assignments, group_junctions};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Cell value for "no data"; distinct from a numeric zero
pub const NO_DATA: &str = "na";

pub const JUNCTION_COUNTS_FILE: &str = "junction_counts.csv";
pub const UMI_COUNTS_FILE: &str = "gapped_umi_counts.csv";

fn create_csv(path: &Path) -> Result<csv::Writer<BufWriter<File>>, Error> {
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    Ok(csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file)))
}

fn finish_csv(mut writer: csv::Writer<BufWriter<File>>, path: &Path) -> Result<(), Error> {
    writer.flush().map_err(|e| Error::io(e, path))
}

/// Every segment reported by at least one file, sorted
pub fn reported_segments(files: &[FileJunctions]) -> BTreeSet<String> {
    files
        .iter()
        .flat_map(|f| f.segments.keys().cloned())
        .collect()
}

fn count_cell(result: Option<&SegmentJunctions>) -> String {
    match result.and_then(SegmentJunctions::count) {
        Some(n) => n.to_string(),
        None => NO_DATA.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Boundary tables (boundaries mode)
// ---------------------------------------------------------------------------

/// Write `<segment>_boundary_5prime-end.csv` and `<segment>_boundary_3prime-end.csv`.
///
/// Rows are samples in input order, columns the observation index; short
/// rows and samples without data are padded with `na`.
pub fn write_boundary_tables(
    dir: &Path,
    segment: &str,
    files: &[FileJunctions],
) -> Result<[PathBuf; 2], Error> {
    let path5 = dir.join(format!("{segment}_boundary_5prime-end.csv"));
    let path3 = dir.join(format!("{segment}_boundary_3prime-end.csv"));
    write_boundary_table(&path5, segment, files, |c| c.boundary5)?;
    write_boundary_table(&path3, segment, files, |c| c.boundary3)?;
    Ok([path5, path3])
}

fn write_boundary_table(
    path: &Path,
    segment: &str,
    files: &[FileJunctions],
    value: impl Fn(&JunctionCandidate) -> u64,
) -> Result<(), Error> {
    let width = files
        .iter()
        .filter_map(|f| f.segments.get(segment))
        .map(|s| s.junctions().len())
        .max()
        .unwrap_or(0);

    let mut writer = create_csv(path)?;
    let header: Vec<String> = std::iter::once(String::new())
        .chain((0..width).map(|i| i.to_string()))
        .collect();
    writer.write_record(&header)?;

    for file in files {
        let junctions = file
            .segments
            .get(segment)
            .map(SegmentJunctions::junctions)
            .unwrap_or(&[]);
        let mut row = Vec::with_capacity(width + 1);
        row.push(file.sample.clone());
        row.extend(junctions.iter().map(|c| value(c).to_string()));
        row.resize(width + 1, NO_DATA.to_string());
        writer.write_record(&row)?;
    }

    finish_csv(writer, path)
}

/// Write `<segment>_groups.csv`: every accepted junction of every sample
/// with its first-fit group id, group by group.
pub fn write_group_table(
    dir: &Path,
    segment: &str,
    files: &[FileJunctions],
    spread: u64,
) -> Result<(PathBuf, usize), Error> {
    let mut owners: Vec<&str> = Vec::new();
    let mut pairs: Vec<(u64, u64)> = Vec::new();
    for file in files {
        if let Some(result) = file.segments.get(segment) {
            for c in result.junctions() {
                owners.push(&file.sample);
                pairs.push((c.boundary5, c.boundary3));
            }
        }
    }

    let groups = group_junctions(&pairs, spread);
    let path = dir.join(format!("{segment}_groups.csv"));
    let mut writer = create_csv(&path)?;
    writer.write_record(["sample", "boundary5", "boundary3", "group"])?;
    for gp in assignments(&pairs, &groups) {
        writer.write_record([
            owners[gp.index].to_string(),
            gp.boundary5.to_string(),
            gp.boundary3.to_string(),
            gp.group.to_string(),
        ])?;
    }
    finish_csv(writer, &path)?;
    Ok((path, groups.len()))
}

/// Write `junction_counts.csv`: rows = samples, columns = segments
pub fn write_junction_counts(dir: &Path, files: &[FileJunctions]) -> Result<PathBuf, Error> {
    let segments = reported_segments(files);
    let path = dir.join(JUNCTION_COUNTS_FILE);
    let mut writer = create_csv(&path)?;

    let header: Vec<&str> = std::iter::once("sample")
        .chain(segments.iter().map(String::as_str))
        .collect();
    writer.write_record(&header)?;

    for file in files {
        let row: Vec<String> = std::iter::once(file.sample.clone())
            .chain(segments.iter().map(|s| count_cell(file.segments.get(s))))
            .collect();
        writer.write_record(&row)?;
    }

    finish_csv(writer, &path)?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// UMI counting outputs (umi-count mode)
// ---------------------------------------------------------------------------

/// Write `gapped_umi_counts.csv`: rows = segments, columns = samples.
///
/// Outer merge over files: a segment a sample never reported is `na`.
pub fn write_umi_counts(dir: &Path, files: &[FileJunctions]) -> Result<PathBuf, Error> {
    let segments = reported_segments(files);
    let path = dir.join(UMI_COUNTS_FILE);
    let mut writer = create_csv(&path)?;

    let header: Vec<&str> = std::iter::once("segment")
        .chain(files.iter().map(|f| f.sample.as_str()))
        .collect();
    writer.write_record(&header)?;

    for segment in &segments {
        let row: Vec<String> = std::iter::once(segment.clone())
            .chain(files.iter().map(|f| count_cell(f.segments.get(segment))))
            .collect();
        writer.write_record(&row)?;
    }

    finish_csv(writer, &path)?;
    Ok(path)
}

/// Write `<sample>.gapped.sam`: original header, then retained records
/// grouped by segment in sorted order
pub fn write_gapped_sam(dir: &Path, file: &FileJunctions) -> Result<PathBuf, Error> {
    let path = dir.join(format!("{}.gapped.sam", file.sample));
    let out = File::create(&path).map_err(|e| Error::io(e, &path))?;
    let mut writer = BufWriter::new(out);

    let lines = file
        .header
        .iter()
        .chain(file.retained.values().flatten());
    for line in lines {
        writer
            .write_all(line)
            .and_then(|_| writer.write_all(b"\n"))
            .map_err(|e| Error::io(e, &path))?;
    }

    writer.flush().map_err(|e| Error::io(e, &path))?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Standalone grouping (group mode)
// ---------------------------------------------------------------------------

/// Parse `"<boundary5>-<boundary3>"`
pub fn parse_boundary_pair(value: &str) -> Option<(u64, u64)> {
    let (b5, b3) = value.trim().split_once('-')?;
    Some((b5.trim().parse().ok()?, b3.trim().parse().ok()?))
}

/// Output path for a grouped table: `<input name up to first '.'>_grouped.csv`
pub fn grouped_table_path(dir: &Path, input: &Path) -> PathBuf {
    dir.join(format!("{}_grouped.csv", sample_name(input)))
}

/// Group a tabulated CSV by its boundary column.
///
/// The output carries every input column plus `group`; rows are emitted
/// group by group, members in join order. Returns the number of groups.
pub fn group_table(input: &Path, column: &str, spread: u64, output: &Path) -> Result<usize, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(input)
        .map_err(|e| Error::Table(format!("{}: {e}", input.display())))?;

    let headers = reader.headers()?.clone();
    let col = headers.iter().position(|h| h == column).ok_or_else(|| {
        Error::Table(format!(
            "{}: no '{column}' column in header",
            input.display()
        ))
    })?;

    let mut rows = Vec::new();
    let mut pairs = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let value = record.get(col).unwrap_or_default();
        let pair = parse_boundary_pair(value).ok_or_else(|| {
            Error::Table(format!(
                "{}: row {}: invalid boundary pair '{value}'",
                input.display(),
                i + 1
            ))
        })?;
        pairs.push(pair);
        rows.push(record);
    }

    let groups = group_junctions(&pairs, spread);

    let mut writer = create_csv(output)?;
    let mut header = headers.clone();
    header.push_field("group");
    writer.write_record(&header)?;
    for gp in assignments(&pairs, &groups) {
        let mut row = rows[gp.index].clone();
        row.push_field(&gp.group.to_string());
        writer.write_record(&row)?;
    }
    finish_csv(writer, output)?;

    Ok(groups.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::DetectionStats;
    use bstr::BString;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn cand(segment: &str, b5: u64, b3: u64) -> JunctionCandidate {
        JunctionCandidate {
            segment: segment.to_string(),
            boundary5: b5,
            boundary3: b3,
            flank5_length: 20,
            flank3_length: 30,
            gap_length: b3 - b5 - 1,
            reference_span: 100,
            umi: None,
        }
    }

    fn file(sample: &str, segments: Vec<(&str, SegmentJunctions)>) -> FileJunctions {
        FileJunctions {
            sample: sample.to_string(),
            header: vec![BString::from("@HD\tVN:1.4")],
            segments: segments
                .into_iter()
                .map(|(s, r)| (s.to_string(), r))
                .collect(),
            retained: BTreeMap::new(),
            stats: DetectionStats::default(),
        }
    }

    fn fixture() -> Vec<FileJunctions> {
        vec![
            file(
                "cellA",
                vec![
                    (
                        "PB2",
                        SegmentJunctions::Accepted(vec![cand("PB2", 100, 200), cand("PB2", 130, 260)]),
                    ),
                    ("PB1", SegmentJunctions::NoData),
                ],
            ),
            file(
                "cellB",
                vec![
                    ("PB2", SegmentJunctions::Accepted(vec![cand("PB2", 105, 203)])),
                    ("PB1", SegmentJunctions::Accepted(vec![])),
                ],
            ),
        ]
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_boundary_tables_padding() {
        let dir = TempDir::new().unwrap();
        let [p5, p3] = write_boundary_tables(dir.path(), "PB2", &fixture()).unwrap();
        assert!(p5.ends_with("PB2_boundary_5prime-end.csv"));
        assert_eq!(read(&p5), ",0,1\ncellA,100,130\ncellB,105,na\n");
        assert_eq!(read(&p3), ",0,1\ncellA,200,260\ncellB,203,na\n");
    }

    #[test]
    fn test_boundary_table_without_observations() {
        let dir = TempDir::new().unwrap();
        let [p5, _] = write_boundary_tables(dir.path(), "PB1", &fixture()).unwrap();
        let rows: Vec<String> = read(&p5).lines().skip(1).map(String::from).collect();
        assert_eq!(rows, vec!["cellA", "cellB"]);
    }

    #[test]
    fn test_group_table_across_samples() {
        let dir = TempDir::new().unwrap();
        let (path, n) = write_group_table(dir.path(), "PB2", &fixture(), 10).unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            read(&path),
            "sample,boundary5,boundary3,group\n\
             cellA,100,200,1\n\
             cellB,105,203,1\n\
             cellA,130,260,2\n"
        );
    }

    #[test]
    fn test_junction_counts_no_data_sentinel() {
        let dir = TempDir::new().unwrap();
        let path = write_junction_counts(dir.path(), &fixture()).unwrap();
        assert_eq!(read(&path), "sample,PB1,PB2\ncellA,na,2\ncellB,0,1\n");
    }

    #[test]
    fn test_umi_counts_outer_merge() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            file("c1", vec![("NP", SegmentJunctions::Accepted(vec![cand("NP", 10, 90)]))]),
            file("c2", vec![("PA", SegmentJunctions::Accepted(vec![]))]),
        ];
        let path = write_umi_counts(dir.path(), &files).unwrap();
        assert_eq!(read(&path), "segment,c1,c2\nNP,1,na\nPA,na,0\n");
    }

    #[test]
    fn test_gapped_sam_grouped_by_segment() {
        let dir = TempDir::new().unwrap();
        let mut f = file("cell7", vec![]);
        f.retained
            .insert("PB2".to_string(), vec![BString::from("r2\t0\tPB2\t5")]);
        f.retained
            .insert("NP".to_string(), vec![BString::from("r1\t0\tNP\t9")]);
        let path = write_gapped_sam(dir.path(), &f).unwrap();
        assert!(path.ends_with("cell7.gapped.sam"));
        assert_eq!(read(&path), "@HD\tVN:1.4\nr1\t0\tNP\t9\nr2\t0\tPB2\t5\n");
    }

    #[test]
    fn test_parse_boundary_pair() {
        assert_eq!(parse_boundary_pair("119-170"), Some((119, 170)));
        assert_eq!(parse_boundary_pair(" 5 - 9 "), Some((5, 9)));
        assert_eq!(parse_boundary_pair("119"), None);
        assert_eq!(parse_boundary_pair("a-b"), None);
    }

    #[test]
    fn test_group_table_mode() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("dips.all.csv");
        std::fs::write(
            &input,
            "cell,boundary_comb,count\nc1,130-260,4\nc2,100-200,7\nc3,105-203,1\n",
        )
        .unwrap();

        let output = grouped_table_path(dir.path(), &input);
        assert!(output.ends_with("dips_grouped.csv"));
        let n = group_table(&input, "boundary_comb", 10, &output).unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            read(&output),
            "cell,boundary_comb,count,group\n\
             c2,100-200,7,1\n\
             c3,105-203,1,1\n\
             c1,130-260,4,2\n"
        );
    }

    #[test]
    fn test_group_table_errors() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("bad.csv");
        std::fs::write(&input, "cell,pos\nc1,100-200\n").unwrap();
        let output = dir.path().join("out.csv");
        let err = group_table(&input, "boundary_comb", 10, &output).unwrap_err();
        assert!(err.to_string().contains("boundary_comb"));

        std::fs::write(&input, "cell,boundary_comb\nc1,100\n").unwrap();
        let err = group_table(&input, "boundary_comb", 10, &output).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }
}
