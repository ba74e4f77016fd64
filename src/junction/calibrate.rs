//! Percentile calibration of per-segment boundary acceptance windows
use super::JunctionCandidate;

/// Acceptance window for one segment, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryRange {
    pub boundary5_lo: u64,
    pub boundary5_hi: u64,
    pub boundary3_lo: u64,
    pub boundary3_hi: u64,
}

impl BoundaryRange {
    /// Check both boundaries of a candidate against the window
    pub fn contains(&self, candidate: &JunctionCandidate) -> bool {
        (self.boundary5_lo..=self.boundary5_hi).contains(&candidate.boundary5)
            && (self.boundary3_lo..=self.boundary3_hi).contains(&candidate.boundary3)
    }
}

/// Linear-interpolation percentile of an unsorted sample
///
/// `q` is in percent (0..=100). Returns `None` for an empty sample.
pub fn percentile(values: &[u64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;

    let lo_val = sorted[lo] as f64;
    let hi_val = sorted[hi] as f64;
    Some(lo_val + (hi_val - lo_val) * frac)
}

/// Derive the acceptance window covering the central `pct` percent of the
/// observed boundaries.
///
/// Window edges are truncated to whole positions. `pct = 100` yields the
/// sample min/max; an empty sample yields `None`.
pub fn calibrate(boundary5: &[u64], boundary3: &[u64], pct: u32) -> Option<BoundaryRange> {
    let p1 = f64::from(100 - pct.min(100)) / 2.0;
    let p2 = p1 + f64::from(pct.min(100));

    Some(BoundaryRange {
        boundary5_lo: percentile(boundary5, p1)? as u64,
        boundary5_hi: percentile(boundary5, p2)? as u64,
        boundary3_lo: percentile(boundary3, p1)? as u64,
        boundary3_hi: percentile(boundary3, p2)? as u64,
    })
}
