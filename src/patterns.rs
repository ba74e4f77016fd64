//! CIGAR pattern census
//!
//! Counts the op-letter pattern of every alignment CIGAR (`5S20M50N30M`
//! -> `SMNM`) across all input files. Files are scanned in parallel, so the
//! counts live in a thread-safe map.
//!
//! Output format (2 tab-separated columns, no header):
//! 1. pattern (`*` for CIGARs that do not decode)
//! 2. number of records
use crate::error::Error;
use crate::io::sam::{SamReader, lazy_record};
use crate::junction::cigar::{parse_cigar, pattern};
use bstr::ByteSlice;
use dashmap::DashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bucket for malformed or missing CIGARs
pub const UNKNOWN_PATTERN: &str = "*";

pub const PATTERNS_FILE: &str = "cigar_patterns.tsv";

/// Thread-safe pattern counter
#[derive(Debug, Default)]
pub struct CigarPatternStats {
    patterns: DashMap<String, AtomicU64>,
}

impl CigarPatternStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one CIGAR string (thread-safe)
    pub fn record(&self, cigar: &str) {
        let key = match parse_cigar(cigar) {
            Ok(ops) => pattern(&ops),
            Err(_) => UNKNOWN_PATTERN.to_string(),
        };
        self.patterns
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .value()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Scan every alignment line of one SAM file; returns records counted
    pub fn count_file(&self, path: &Path) -> Result<u64, Error> {
        let mut reader = SamReader::open(path)?;
        let mut n = 0u64;
        while let Some(line) = reader.next_line()? {
            let record = lazy_record(&line).ok();
            let cigar = record
                .as_ref()
                .and_then(|r| r.cigar().as_ref().to_str().ok().map(str::to_string));
            self.record(cigar.as_deref().unwrap_or(UNKNOWN_PATTERN));
            n += 1;
        }
        Ok(n)
    }

    fn len(&self) -> usize {
        self.patterns.len()
    }

    #[cfg(test)]
    fn count(&self, pattern: &str) -> u64 {
        self.patterns
            .get(pattern)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Patterns sorted by descending count, then pattern
    pub fn sorted(&self) -> Vec<(String, u64)> {
        let mut rows: Vec<(String, u64)> = self
            .patterns
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        rows
    }

    /// Write the census table
    pub fn write_output(&self, path: &Path) -> Result<(), Error> {
        let file = File::create(path).map_err(|e| Error::io(e, path))?;
        let mut writer = BufWriter::new(file);
        for (pattern, count) in self.sorted() {
            writeln!(writer, "{pattern}\t{count}").map_err(|e| Error::io(e, path))?;
        }
        writer.flush().map_err(|e| Error::io(e, path))?;
        log::info!(
            "Wrote {} CIGAR patterns to {}",
            self.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    #[test]
    fn test_record_patterns() {
        let stats = CigarPatternStats::new();
        stats.record("5S20M50N30M");
        stats.record("10S25M80N30M2S");
        stats.record("50M");
        stats.record("20M5X");
        stats.record("bogus");
        stats.record("*");

        assert_eq!(stats.count("SMNM"), 1);
        assert_eq!(stats.count("SMNMS"), 1);
        assert_eq!(stats.count("M"), 1);
        assert_eq!(stats.count("MX"), 1);
        assert_eq!(stats.count(UNKNOWN_PATTERN), 2);
        assert_eq!(stats.len(), 5);
    }

    #[test]
    fn test_sorted_order() {
        let stats = CigarPatternStats::new();
        for c in ["50M", "20M50N30M", "60M", "10M5N10M", "1M"] {
            stats.record(c);
        }
        assert_eq!(
            stats.sorted(),
            vec![("M".to_string(), 3), ("MNM".to_string(), 2)]
        );
    }

    #[test]
    fn test_concurrent_record() {
        let stats = Arc::new(CigarPatternStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        stats.record("20M50N30M");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.count("MNM"), 1000);
    }

    #[test]
    fn test_count_file_and_write() {
        let mut sam = NamedTempFile::new().unwrap();
        writeln!(sam, "@SQ\tSN:seg\tLN:500").unwrap();
        writeln!(sam, "r1\t0\tseg\t10\t255\t20M50N30M\t*\t0\t0\tA\tI").unwrap();
        writeln!(sam, "r2\t0\tseg\t10\t255\t50M\t*\t0\t0\tA\tI").unwrap();
        writeln!(sam, "r3\t0\tseg\t10\t255\t40M\t*\t0\t0\tA\tI").unwrap();
        writeln!(sam, "r4\t4\t*\t0\t0\t*\t*\t0\t0\tA\tI").unwrap();
        writeln!(sam, "r5\t0\tseg\t10\t255\t20Q\t*\t0\t0\tA\tI").unwrap();
        sam.flush().unwrap();

        let stats = CigarPatternStats::new();
        assert_eq!(stats.count_file(sam.path()).unwrap(), 5);

        let out = NamedTempFile::new().unwrap();
        stats.write_output(out.path()).unwrap();
        let text = std::fs::read_to_string(out.path()).unwrap();
        assert_eq!(text, "*\t2\nM\t2\nMNM\t1\n");
    }
}
