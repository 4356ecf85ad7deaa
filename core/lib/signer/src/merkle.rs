//! Per-block online Merkle tree.
//!
//! The accumulator keeps one root per complete subtree, aligned with the
//! binary representation of the leaf count, so ingesting a leaf touches
//! O(log N) state. Leaf blinding (mask mixing) is the block controller's
//! concern; this module only folds ready-made nodes.

use logsig_basic_types::Imprint;

use crate::hasher::DataHasher;

/// Upper bound on the roots array; enough for 2^64 leaves.
pub(crate) const MAX_ROOTS: usize = 64;

/// `H(left ‖ right ‖ level)`. Level numbering starts at 1 for a leaf pair
/// and grows by one per fold.
pub(crate) fn hash_node_pair(
    hasher: &mut DataHasher,
    left: &Imprint,
    right: &Imprint,
    level: u8,
) -> Imprint {
    hasher.reset();
    hasher.add_imprint(left);
    hasher.add_imprint(right);
    hasher.add(&[level]);
    hasher.close()
}

/// Tree level declared to the aggregator for `leaves` leaves: the smallest
/// `l` with `2^l >= leaves`. The caller doubles the record count to account
/// for the blinding masks.
pub(crate) fn calc_level(leaves: u64) -> u8 {
    let mut level = 0u8;
    let mut c = leaves;
    while c > 1 {
        level += 1;
        c >>= 1;
    }
    if (1u64 << level) < leaves {
        level += 1;
    }
    level
}

#[derive(Debug, Default)]
pub(crate) struct TreeAccumulator {
    /// Slot `j` holds the root of a complete subtree of `2^j` leaves; the
    /// vector length is the high-water mark of addressed slots.
    roots: Vec<Option<Imprint>>,
    n_records: u64,
}

impl TreeAccumulator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_count(&self) -> u64 {
        self.n_records
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.n_records == 0
    }

    /// Folds a freshly produced level-1 node into the roots array and counts
    /// the leaf. Returns the interim nodes created by carries, in production
    /// order; the caller serializes them as tree hashes.
    pub(crate) fn push_node(&mut self, hasher: &mut DataHasher, node: Imprint) -> Vec<Imprint> {
        let mut interims = Vec::new();
        let mut carry = node;

        for j in 0..self.roots.len() {
            match self.roots[j].take() {
                None => {
                    self.roots[j] = Some(carry);
                    self.n_records += 1;
                    return interims;
                }
                Some(existing) => {
                    carry = hash_node_pair(hasher, &existing, &carry, (j + 2) as u8);
                    interims.push(carry.clone());
                }
            }
        }

        // All addressed slots were occupied: open a new level.
        assert!(self.roots.len() < MAX_ROOTS, "roots array exhausted");
        self.roots.push(Some(carry));
        self.n_records += 1;
        interims
    }

    /// Folds the remaining roots, low to high, into the block root. Returns
    /// `None` for an empty block.
    pub(crate) fn finish(&mut self, hasher: &mut DataHasher) -> Option<(Imprint, Vec<Imprint>)> {
        let mut interims = Vec::new();
        let mut root: Option<Imprint> = None;

        for j in 0..self.roots.len() {
            let Some(subtree) = self.roots[j].take() else {
                continue;
            };
            root = Some(match root {
                None => subtree,
                Some(lower) => {
                    let folded = hash_node_pair(hasher, &subtree, &lower, (j + 2) as u8);
                    interims.push(folded.clone());
                    folded
                }
            });
        }
        root.map(|root| (root, interims))
    }

    #[cfg(test)]
    pub(crate) fn occupied_slots(&self) -> Vec<usize> {
        self.roots
            .iter()
            .enumerate()
            .filter_map(|(j, slot)| slot.as_ref().map(|_| j))
            .collect()
    }
}
