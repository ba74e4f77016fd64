// First-fit grouping of nearby junction boundary pairs
//
// Pairs are visited in ascending (boundary5, boundary3) order and each joins
// the first existing group whose boundary5 and boundary3 spreads both stay
// within the threshold once the pair is added. Groups are never merged or
// re-balanced, so the result depends on visit order and is not a minimal
// clustering.

/// A proximity-bounded group of boundary pairs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// 1-based id in creation order
    pub id: usize,
    /// Indices into the caller's input, in join order
    pub members: Vec<usize>,
    min5: u64,
    max5: u64,
    min3: u64,
    max3: u64,
}

impl Group {
    fn new(id: usize, idx: usize, boundary5: u64, boundary3: u64) -> Self {
        Self {
            id,
            members: vec![idx],
            min5: boundary5,
            max5: boundary5,
            min3: boundary3,
            max3: boundary3,
        }
    }

    /// Add the pair if both spreads stay within `spread`
    fn try_add(&mut self, idx: usize, boundary5: u64, boundary3: u64, spread: u64) -> bool {
        let min5 = self.min5.min(boundary5);
        let max5 = self.max5.max(boundary5);
        let min3 = self.min3.min(boundary3);
        let max3 = self.max3.max(boundary3);
        if max5 - min5 > spread || max3 - min3 > spread {
            return false;
        }
        self.min5 = min5;
        self.max5 = max5;
        self.min3 = min3;
        self.max3 = max3;
        self.members.push(idx);
        true
    }

    /// Current (min, max) of boundary5 across members
    #[cfg(test)]
    fn boundary5_span(&self) -> (u64, u64) {
        (self.min5, self.max5)
    }

    /// Current (min, max) of boundary3 across members
    #[cfg(test)]
    fn boundary3_span(&self) -> (u64, u64) {
        (self.min3, self.max3)
    }
}

/// Group assignment for one input pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupedPair {
    /// Index of the pair in the caller's input
    pub index: usize,
    pub boundary5: u64,
    pub boundary3: u64,
    pub group: usize,
}

/// Group boundary pairs with first-fit semantics.
///
/// Input may be in any order; it is stably sorted by (boundary5, boundary3)
/// before grouping so equal pairs keep their input order. Returns the groups
/// in creation order.
pub fn group_junctions(pairs: &[(u64, u64)], spread: u64) -> Vec<Group> {
    let mut order: Vec<usize> = (0..pairs.len()).collect();
    order.sort_by_key(|&i| pairs[i]);

    let mut groups: Vec<Group> = Vec::new();
    for idx in order {
        let (b5, b3) = pairs[idx];
        let joined = groups
            .iter_mut()
            .any(|group| group.try_add(idx, b5, b3, spread));
        if !joined {
            groups.push(Group::new(groups.len() + 1, idx, b5, b3));
        }
    }
    groups
}

/// Flatten groups into per-pair assignments, group by group in join order
pub fn assignments(pairs: &[(u64, u64)], groups: &[Group]) -> Vec<GroupedPair> {
    groups
        .iter()
        .flat_map(|group| {
            group.members.iter().map(move |&index| GroupedPair {
                index,
                boundary5: pairs[index].0,
                boundary3: pairs[index].1,
                group: group.id,
            })
        })
        .collect()
}
