//! CIGAR decoding for text SAM records
use crate::error::Error;
use std::fmt;

/// CIGAR operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    /// M: match/mismatch
    Match(u32),
    /// I: insertion to reference
    Ins(u32),
    /// D: deletion from reference
    Del(u32),
    /// N: skipped reference region (the DIP junction)
    RefSkip(u32),
    /// S: soft clip (clipped sequence present in read)
    SoftClip(u32),
    /// H: hard clip (clipped sequence not present)
    HardClip(u32),
    /// P: padding
    Pad(u32),
    /// =: exact match
    Equal(u32),
    /// X: mismatch
    Diff(u32),
}

impl CigarOp {
    fn from_parts(op: u8, len: u32) -> Option<Self> {
        let op = match op {
            b'M' => CigarOp::Match(len),
            b'I' => CigarOp::Ins(len),
            b'D' => CigarOp::Del(len),
            b'N' => CigarOp::RefSkip(len),
            b'S' => CigarOp::SoftClip(len),
            b'H' => CigarOp::HardClip(len),
            b'P' => CigarOp::Pad(len),
            b'=' => CigarOp::Equal(len),
            b'X' => CigarOp::Diff(len),
            _ => return None,
        };
        Some(op)
    }

    /// Get the operation character
    pub fn op_char(&self) -> char {
        match self {
            CigarOp::Match(_) => 'M',
            CigarOp::Ins(_) => 'I',
            CigarOp::Del(_) => 'D',
            CigarOp::RefSkip(_) => 'N',
            CigarOp::SoftClip(_) => 'S',
            CigarOp::HardClip(_) => 'H',
            CigarOp::Pad(_) => 'P',
            CigarOp::Equal(_) => '=',
            CigarOp::Diff(_) => 'X',
        }
    }

    /// Get the operation length
    pub fn len(&self) -> u32 {
        match self {
            CigarOp::Match(n)
            | CigarOp::Ins(n)
            | CigarOp::Del(n)
            | CigarOp::RefSkip(n)
            | CigarOp::SoftClip(n)
            | CigarOp::HardClip(n)
            | CigarOp::Pad(n)
            | CigarOp::Equal(n)
            | CigarOp::Diff(n) => *n,
        }
    }

    /// Check if operation is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Operations the junction detector understands (M, I, D, N, S)
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Ins(_)
                | CigarOp::Del(_)
                | CigarOp::RefSkip(_)
                | CigarOp::SoftClip(_)
        )
    }

    /// Check if operation consumes reference bases
    pub fn consumes_reference(&self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Equal(_)
                | CigarOp::Diff(_)
                | CigarOp::Del(_)
                | CigarOp::RefSkip(_)
        )
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.len(), self.op_char())
    }
}

/// Decode a CIGAR string into ordered operations.
///
/// Accepts exactly the grammar `(\d+[MIDNSHP=X])+`. Anything else, including
/// the unmapped placeholder `*`, lengths overflowing `u32` and trailing digits,
/// is reported as [`Error::MalformedCigar`].
pub fn parse_cigar(cigar: &str) -> Result<Vec<CigarOp>, Error> {
    let malformed = || Error::MalformedCigar(cigar.to_string());

    let mut ops = Vec::with_capacity(cigar.len() / 2);
    let mut len: Option<u32> = None;

    for &b in cigar.as_bytes() {
        if b.is_ascii_digit() {
            let digit = u32::from(b - b'0');
            let next = len
                .unwrap_or(0)
                .checked_mul(10)
                .and_then(|n| n.checked_add(digit))
                .ok_or_else(malformed)?;
            len = Some(next);
        } else {
            let n = len.take().ok_or_else(malformed)?;
            ops.push(CigarOp::from_parts(b, n).ok_or_else(malformed)?);
        }
    }

    if len.is_some() || ops.is_empty() {
        return Err(malformed());
    }
    Ok(ops)
}

/// Op-letter pattern of a CIGAR with lengths stripped (`5S20M50N30M` -> `SMNM`)
pub fn pattern(ops: &[CigarOp]) -> String {
    ops.iter().map(CigarOp::op_char).collect()
}

/// Reference span covered by an alignment (sum of M, D, N, =, X lengths)
pub fn reference_length(ops: &[CigarOp]) -> u64 {
    ops.iter()
        .filter(|op| op.consumes_reference())
        .map(|op| u64::from(op.len()))
        .sum()
}
