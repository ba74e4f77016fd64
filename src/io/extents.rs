//! Segment extents: the reference interval an alignment must stay within
use crate::error::Error;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Inclusive 1-based [start, end] interval per segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentExtents {
    extents: BTreeMap<String, (u64, u64)>,
}

impl SegmentExtents {
    /// Load a GTF-like table: tab separated, column 1 = segment,
    /// column 4 = start, column 5 = end. Blank and `#` lines are skipped; a
    /// later line for the same segment replaces an earlier one.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|e| Error::io(e, path))?;
        let reader = BufReader::new(file);

        let mut extents = BTreeMap::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::io(e, path))?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 5 {
                return Err(Error::Table(format!(
                    "{}:{}: expected at least 5 tab-separated columns",
                    path.display(),
                    line_no + 1
                )));
            }

            let parse = |s: &str| {
                s.trim().parse::<u64>().map_err(|_| {
                    Error::Table(format!(
                        "{}:{}: invalid coordinate '{}'",
                        path.display(),
                        line_no + 1,
                        s
                    ))
                })
            };
            let start = parse(fields[3])?;
            let end = parse(fields[4])?;
            extents.insert(fields[0].to_string(), (start, end));
        }

        log::info!(
            "Loaded extents for {} segments from {}",
            extents.len(),
            path.display()
        );
        Ok(Self { extents })
    }

    /// Extents spanning whole references, `[1, length]`
    pub fn from_reference_lengths(lengths: &BTreeMap<String, u64>) -> Self {
        Self {
            extents: lengths
                .iter()
                .map(|(name, &len)| (name.clone(), (1, len)))
                .collect(),
        }
    }

    pub fn get(&self, segment: &str) -> Option<(u64, u64)> {
        self.extents.get(segment).copied()
    }

    /// True if [first, last] lies inside the segment's extent; segments
    /// without an extent never contain anything
    pub fn contains(&self, segment: &str, first: u64, last: u64) -> bool {
        self.get(segment)
            .is_some_and(|(start, end)| start <= first && last <= end)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }
}
