//! Line-oriented SAM reader (plain or gzip compressed)
//!
//! Only the fields junction detection needs are extracted; every line is
//! kept verbatim so retained records and headers can be written back
//! unchanged.
use crate::error::Error;
use crate::junction::AlignmentRecord;
use bstr::{BString, ByteSlice};
use flate2::read::MultiGzDecoder;
use noodles::sam;
use noodles::sam::alignment::record::data::field::{Tag, Value};
use noodles::sam::alignment::record::Data as _;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// RNAME of an unplaced record
pub const UNMAPPED_SEGMENT: &str = "*";

/// One alignment line with its extracted fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamRecord {
    /// Original line without terminator
    pub line: BString,
    pub record: AlignmentRecord,
    /// MAPQ column, `None` if unparseable
    pub mapq: Option<u8>,
}

impl SamRecord {
    /// RNAME `*` or POS 0
    pub fn is_unmapped(&self) -> bool {
        self.record.segment == UNMAPPED_SEGMENT || self.record.position == 0
    }
}

/// SAM reader with eagerly captured header
pub struct SamReader {
    inner: Box<dyn BufRead + Send>,
    path: PathBuf,
    header: Vec<BString>,
    pending: Option<BString>,
    buf: Vec<u8>,
}

impl SamReader {
    /// Open a SAM file (plain or gzip compressed) and read its header lines
    pub fn open(path: &Path) -> Result<Self, Error> {
        let path_str = path.to_string_lossy();
        let is_gzipped = path_str.ends_with(".gz") || path_str.ends_with(".gzip");

        let file = File::open(path).map_err(|e| Error::io(e, path))?;
        let inner: Box<dyn BufRead + Send> = if is_gzipped {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let mut reader = Self {
            inner,
            path: path.to_path_buf(),
            header: Vec::new(),
            pending: None,
            buf: Vec::with_capacity(512),
        };

        while let Some(line) = reader.next_raw_line()? {
            if line.starts_with(b"@") {
                reader.header.push(line);
            } else {
                reader.pending = Some(line);
                break;
            }
        }

        Ok(reader)
    }

    /// Header lines (`@...`) in file order, without terminators
    pub fn header(&self) -> &[BString] {
        &self.header
    }

    /// Next non-empty alignment line, verbatim
    pub fn next_line(&mut self) -> Result<Option<BString>, Error> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        self.next_raw_line()
    }

    fn next_raw_line(&mut self) -> Result<Option<BString>, Error> {
        loop {
            self.buf.clear();
            let n = self
                .inner
                .read_until(b'\n', &mut self.buf)
                .map_err(|e| Error::io(e, &self.path))?;
            if n == 0 {
                return Ok(None);
            }
            let line = self.buf.trim_end_with(|c| c == '\n' || c == '\r');
            if !line.is_empty() {
                return Ok(Some(BString::from(line)));
            }
        }
    }
}

/// MAPQ value noodles reports as missing
const MAPQ_UNAVAILABLE: u8 = 255;

/// Decode one alignment line into a lazy noodles record
pub fn lazy_record(line: &[u8]) -> Result<sam::Record, Error> {
    let mut reader = sam::io::Reader::new(line);
    let mut record = sam::Record::default();
    match reader.read_record(&mut record) {
        Ok(0) => Err(Error::Sam("empty alignment line".into())),
        Ok(_) => Ok(record),
        Err(e) => Err(Error::Sam(e.to_string())),
    }
}

/// Two-letter SAM tag from its text form (e.g. `UB`)
pub fn parse_tag(tag: &str) -> Result<Tag, Error> {
    match tag.as_bytes() {
        &[a, b] => Ok(Tag::new(a, b)),
        _ => Err(Error::Parameter(format!("invalid SAM tag '{tag}'"))),
    }
}

/// Extract segment, position, MAPQ, CIGAR and UMI from one alignment line
///
/// # Arguments
/// * `line` - Tab-delimited alignment line
/// * `umi_tag` - Tag carrying the UMI as a `Z` value (e.g. `UB`)
pub fn parse_record(line: &[u8], umi_tag: Tag) -> Result<SamRecord, Error> {
    let lazy = lazy_record(line)?;

    let segment = match lazy.reference_sequence_name() {
        Some(name) => name
            .to_str()
            .map_err(|_| Error::Sam(format!("RNAME '{name}' is not valid UTF-8")))?
            .to_string(),
        None => UNMAPPED_SEGMENT.to_string(),
    };

    let position = match lazy.alignment_start() {
        Some(Ok(pos)) => usize::from(pos) as u64,
        Some(Err(e)) => return Err(Error::Sam(format!("invalid position: {e}"))),
        None => 0,
    };

    let mapq = match lazy.mapping_quality() {
        Some(Ok(mq)) => Some(u8::from(mq)),
        Some(Err(_)) => None,
        None => Some(MAPQ_UNAVAILABLE),
    };

    let cigar = lazy
        .cigar()
        .as_ref()
        .to_str()
        .map_err(|_| Error::Sam("CIGAR is not valid UTF-8".into()))?
        .to_string();

    let umi = match lazy.data().get(&umi_tag) {
        Some(Ok(Value::String(s))) => s.to_str().ok().map(str::to_string),
        _ => None,
    };

    Ok(SamRecord {
        line: BString::from(line),
        record: AlignmentRecord {
            segment,
            position,
            cigar,
            umi,
        },
        mapq,
    })
}

/// Reference sequence lengths declared by `@SQ` header lines
pub fn reference_lengths(header: &[BString]) -> Result<BTreeMap<String, u64>, Error> {
    let mut text = String::new();
    for line in header {
        text.push_str(&line.to_str_lossy());
        text.push('\n');
    }

    let parsed: sam::Header = text
        .parse()
        .map_err(|e| Error::Sam(format!("invalid header: {e}")))?;

    Ok(parsed
        .reference_sequences()
        .iter()
        .map(|(name, map)| (name.to_string(), map.length().get() as u64))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "@HD\tVN:1.4\tSO:coordinate\n\
                          @SQ\tSN:AF389115.1\tLN:2341\n\
                          @SQ\tSN:AF389116.1\tLN:2341\n\
                          @PG\tID:STAR\tPN:STAR\n";

    fn line(segment: &str, pos: u64, cigar: &str, tags: &str) -> String {
        format!("read1\t0\t{segment}\t{pos}\t255\t{cigar}\t*\t0\t0\tACGT\tIIII{tags}")
    }

    fn ub() -> Tag {
        parse_tag("UB").unwrap()
    }

    #[test]
    fn test_parse_record_fields() {
        let l = line("AF389115.1", 100, "20M50N30M", "\tNH:i:1\tCB:Z:AAAC-1\tUB:Z:GGTTAACC");
        let rec = parse_record(l.as_bytes(), ub()).unwrap();
        assert_eq!(rec.record.segment, "AF389115.1");
        assert_eq!(rec.record.position, 100);
        assert_eq!(rec.record.cigar, "20M50N30M");
        assert_eq!(rec.record.umi.as_deref(), Some("GGTTAACC"));
        assert_eq!(rec.mapq, Some(255));
        assert_eq!(rec.line, BString::from(l));
        assert!(!rec.is_unmapped());
    }

    #[test]
    fn test_parse_record_without_umi() {
        let l = line("AF389115.1", 100, "20M50N30M", "\tNH:i:1");
        let rec = parse_record(l.as_bytes(), ub()).unwrap();
        assert!(rec.record.umi.is_none());
    }

    #[test]
    fn test_parse_record_custom_tag() {
        let l = line("AF389115.1", 100, "20M50N30M", "\tUB:Z:AAAA\tRX:Z:CCCC");
        let rec = parse_record(l.as_bytes(), parse_tag("RX").unwrap()).unwrap();
        assert_eq!(rec.record.umi.as_deref(), Some("CCCC"));
    }

    #[test]
    fn test_parse_record_errors() {
        assert!(parse_record(b"read1\t0\tchr", ub()).is_err());
        let l = line("AF389115.1", 0, "*", "");
        assert!(parse_record(l.as_bytes(), ub()).unwrap().is_unmapped());
        let bad_pos = "read1\t0\tseg\tabc\t255\t20M\t*\t0\t0\tA\tI";
        assert!(matches!(
            parse_record(bad_pos.as_bytes(), ub()),
            Err(Error::Sam(_))
        ));
    }

    #[test]
    fn test_parse_record_mapq() {
        // noodles reads 255 as "unavailable"; it must still compare as 255
        let l = line("AF389115.1", 100, "20M50N30M", "");
        assert_eq!(parse_record(l.as_bytes(), ub()).unwrap().mapq, Some(255));

        let l = "r\t0\tseg\t100\t3\t20M\t*\t0\t0\tA\tI";
        assert_eq!(parse_record(l.as_bytes(), ub()).unwrap().mapq, Some(3));

        let l = "r\t0\tseg\t100\tq\t20M\t*\t0\t0\tA\tI";
        assert_eq!(parse_record(l.as_bytes(), ub()).unwrap().mapq, None);
    }

    #[test]
    fn test_parse_record_unplaced() {
        let l = "r\t4\t*\t0\t0\t*\t*\t0\t0\tA\tI";
        let rec = parse_record(l.as_bytes(), ub()).unwrap();
        assert_eq!(rec.record.segment, UNMAPPED_SEGMENT);
        assert_eq!(rec.record.position, 0);
        assert!(rec.is_unmapped());
    }

    #[test]
    fn test_parse_tag() {
        assert_eq!(parse_tag("UB").unwrap(), Tag::new(b'U', b'B'));
        assert!(parse_tag("UMI").is_err());
        assert!(parse_tag("").is_err());
    }

    #[test]
    fn test_reader_splits_header_and_records() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{HEADER}").unwrap();
        writeln!(file, "{}", line("AF389115.1", 100, "20M50N30M", "")).unwrap();
        writeln!(file).unwrap();
        write!(file, "{}\r\n", line("AF389116.1", 5, "50M", "")).unwrap();
        file.flush().unwrap();

        let mut reader = SamReader::open(file.path()).unwrap();
        assert_eq!(reader.header().len(), 4);
        assert!(reader.header()[0].starts_with(b"@HD"));

        let first = reader.next_line().unwrap().unwrap();
        assert!(first.contains_str("AF389115.1"));
        let second = reader.next_line().unwrap().unwrap();
        assert!(second.ends_with(b"IIII"));
        assert!(reader.next_line().unwrap().is_none());
    }

    #[test]
    fn test_reader_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell.sam.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        write!(enc, "{HEADER}").unwrap();
        writeln!(enc, "{}", line("AF389115.1", 100, "20M50N30M", "")).unwrap();
        enc.finish().unwrap();

        let mut reader = SamReader::open(&path).unwrap();
        assert_eq!(reader.header().len(), 4);
        assert!(reader.next_line().unwrap().is_some());
        assert!(reader.next_line().unwrap().is_none());
    }

    #[test]
    fn test_reader_missing_file_names_path() {
        let err = SamReader::open(Path::new("/nonexistent/cell9.sam"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("cell9.sam"));
    }

    #[test]
    fn test_reference_lengths() {
        let header: Vec<BString> = HEADER.lines().map(BString::from).collect();
        let lengths = reference_lengths(&header).unwrap();
        assert_eq!(lengths.len(), 2);
        assert_eq!(lengths["AF389115.1"], 2341);
    }
}
