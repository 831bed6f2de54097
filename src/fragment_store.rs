//! Interval-tree storage for haplotype fragments
//!
//! Fragments live as payloads of an [`IntervalTree`] keyed by their site-index span at insertion
//! time. Observed allele strings either fold into an agreeing fragment over the identical span
//! or seed a new fragment; weakly supported fragments are dropped in a final filtering pass.
//!

use log::debug;
use simple_error::SimpleResult;

use crate::contig_data::ReadId;
use crate::fragment::HaplotypeFragment;
use crate::int_range::IntRange;
use crate::interval_tree::IntervalTree;

pub type FragmentTree = IntervalTree<HaplotypeFragment>;

/// Fold an observed allele string into the store
///
/// Only a fragment spanning exactly `range` can accept the observation. Containment-based
/// matching is a known alternative and stays disabled: it commits short strings to a merge
/// before the better candidates are known, and cross-span merging belongs to the clustering
/// pass. Among exact-span fragments the first whose
/// called positions all agree absorbs the observation; conflicting same-span fragments coexist,
/// which is exactly how a second haplotype takes shape. With no compatible match a new fragment
/// is seeded.
///
pub fn merge_or_insert(
    tree: &mut FragmentTree,
    bases: &[u8],
    range: IntRange,
    rec: ReadId,
    mate_rec: Option<ReadId>,
) {
    debug_assert_eq!(bases.len() as i64, range.len());

    let mut iter = tree.range_iter(range.start, range.end);
    let mut matched = None;
    while let Some(id) = iter.next(tree) {
        if *tree.span(id) != range {
            continue;
        }
        if tree.payload(id).agrees_with(bases, &range) {
            matched = Some(id);
            break;
        }
    }

    match matched {
        Some(id) => tree.payload_mut(id).merge_observation(bases, rec, mate_rec),
        None => {
            let fragment = HaplotypeFragment::new(range.clone(), bases, rec, mate_rec);
            tree.insert(range, fragment);
        }
    }
}

/// Remove every fragment supported by fewer than `min_read_count` reads/pairs
///
/// Tree traversal and node removal can't interleave, so doomed ids are collected during one full
/// traversal and removed in a second pass. Returns the number removed.
///
pub fn filter_weak_fragments(
    tree: &mut FragmentTree,
    min_read_count: usize,
) -> SimpleResult<usize> {
    let mut weak = Vec::new();
    let mut iter = tree.range_iter(i64::MIN, i64::MAX);
    while let Some(id) = iter.next(tree) {
        if tree.payload(id).read_count() < min_read_count {
            weak.push(id);
        }
    }

    let removed = weak.len();
    for id in weak {
        tree.remove(id)?;
    }
    Ok(removed)
}

/// Debug-log every live fragment, indented to its site span
pub fn debug_dump_fragments(tree: &FragmentTree) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let mut iter = tree.range_iter(i64::MIN, i64::MAX);
    while let Some(id) = iter.next(tree) {
        let fragment = tree.payload(id);
        if fragment.is_husk() {
            continue;
        }
        let indent = std::cmp::max(fragment.range().start, 0) as usize;
        debug!(
            "{:>5} {:indent$}{}",
            fragment.read_count(),
            "",
            String::from_utf8_lossy(fragment.bases()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_on_exact_span_agreement() {
        let mut tree = FragmentTree::new();
        merge_or_insert(&mut tree, b"AC--T", IntRange::from_pair(0, 4), 1, None);
        merge_or_insert(&mut tree, b"-CG-T", IntRange::from_pair(0, 4), 2, None);
        assert_eq!(tree.len(), 1);

        let mut iter = tree.range_iter(i64::MIN, i64::MAX);
        let id = iter.next(&tree).unwrap();
        let fragment = tree.payload(id);
        assert_eq!(fragment.bases(), b"ACG-T");
        assert_eq!(fragment.read_count(), 2);
        assert_eq!(fragment.recs(), &[1, 2]);
    }

    #[test]
    fn test_conflicting_strings_stay_separate() {
        let mut tree = FragmentTree::new();
        merge_or_insert(&mut tree, b"AC--T", IntRange::from_pair(0, 4), 1, None);
        merge_or_insert(&mut tree, b"AG--T", IntRange::from_pair(0, 4), 2, None);
        assert_eq!(tree.len(), 2);

        // A third observation joins whichever haplotype it agrees with
        merge_or_insert(&mut tree, b"-G--T", IntRange::from_pair(0, 4), 3, None);
        assert_eq!(tree.len(), 2);

        let mut counts = Vec::new();
        let mut iter = tree.range_iter(i64::MIN, i64::MAX);
        while let Some(id) = iter.next(&tree) {
            counts.push(tree.payload(id).read_count());
        }
        counts.sort();
        assert_eq!(counts, vec![1, 2]);
    }

    #[test]
    fn test_exact_span_policy_rejects_containment() {
        let mut tree = FragmentTree::new();
        merge_or_insert(&mut tree, b"ACGT", IntRange::from_pair(0, 3), 1, None);
        // Contained and agreeing, but the span differs: a new fragment
        merge_or_insert(&mut tree, b"CG", IntRange::from_pair(1, 2), 2, None);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_pair_records_both_append() {
        let mut tree = FragmentTree::new();
        merge_or_insert(&mut tree, b"A--T", IntRange::from_pair(0, 3), 1, Some(2));
        merge_or_insert(&mut tree, b"AC-T", IntRange::from_pair(0, 3), 3, Some(4));

        let mut iter = tree.range_iter(i64::MIN, i64::MAX);
        let id = iter.next(&tree).unwrap();
        let fragment = tree.payload(id);
        // A pair counts once but contributes both records
        assert_eq!(fragment.read_count(), 2);
        assert_eq!(fragment.recs(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_filter_weak_fragments() {
        let mut tree = FragmentTree::new();
        merge_or_insert(&mut tree, b"AC", IntRange::from_pair(0, 1), 1, None);
        merge_or_insert(&mut tree, b"AC", IntRange::from_pair(0, 1), 2, None);
        merge_or_insert(&mut tree, b"GT", IntRange::from_pair(0, 1), 3, None);

        let removed = filter_weak_fragments(&mut tree, 2).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(tree.len(), 1);
        tree.validate().unwrap();

        let mut iter = tree.range_iter(i64::MIN, i64::MAX);
        let id = iter.next(&tree).unwrap();
        assert_eq!(tree.payload(id).read_count(), 2);
    }
}
