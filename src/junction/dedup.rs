//! Per-segment UMI deduplication in file scan order
use std::collections::{HashMap, HashSet};

/// Result of offering one observation to the deduplicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First observation of this UMI on this segment
    First,
    /// UMI already seen on this segment
    Duplicate,
    /// Record carries no UMI
    MissingUmi,
}

/// Tracks UMIs already counted for each segment.
///
/// The first occurrence in scan order wins; later observations with the same
/// UMI are dropped whatever their coordinates.
#[derive(Debug, Default)]
pub struct UmiDeduplicator {
    seen: HashMap<String, HashSet<String>>,
}

impl UmiDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a (segment, UMI) observation
    pub fn observe(&mut self, segment: &str, umi: Option<&str>) -> DedupOutcome {
        let Some(umi) = umi else {
            return DedupOutcome::MissingUmi;
        };

        let seen = self.seen.entry(segment.to_string()).or_default();
        if seen.insert(umi.to_string()) {
            DedupOutcome::First
        } else {
            DedupOutcome::Duplicate
        }
    }

    /// Number of distinct UMIs counted for a segment
    #[cfg(test)]
    fn unique_count(&self, segment: &str) -> usize {
        self.seen.get(segment).map_or(0, HashSet::len)
    }
}
