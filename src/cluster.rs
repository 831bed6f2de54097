//! Greedy clustering of overlapping, non-conflicting haplotype fragments
//!
//! A post-pass over the fragment store: fragments are chunked into blocks of transitively
//! overlapping spans, then each block is merged greedily. The merge is order-dependent and not
//! guaranteed to produce a transitively consistent partition; a fragment compatible with two
//! mutually incompatible anchors joins whichever anchor reaches it first. That limitation is
//! inherent to the pairwise heuristic and is kept as-is.
//!
//! Fragment spans recorded in the tree are never mutated here; all restructuring happens on
//! per-block scratch id lists, and the grown spans live only in the fragment payloads. The tree
//! is consulted again afterwards for filtering and teardown, which is why its keys must not move.
//!

use crate::fragment::HaplotypeFragment;
use crate::fragment_store::FragmentTree;
use crate::interval_tree::IntervalId;
use crate::run_stats::ClusterStats;

/// Anchor priority: long, well-supported fragments recruit the rest
fn merge_priority(fragment: &HaplotypeFragment) -> f64 {
    (fragment.range().len() as f64).sqrt() * fragment.read_count() as f64
}

/// Merge compatible overlapping fragments in place
///
/// Blocks bound the quadratic scan: a fragment whose span starts beyond the running maximum end
/// of everything seen so far opens a new block, so each scan stays within one patch of mutually
/// reachable fragments.
///
pub fn cluster_fragments(tree: &mut FragmentTree) -> ClusterStats {
    let mut stats = ClusterStats::default();

    let mut blocks: Vec<Vec<_>> = Vec::new();
    let mut block = Vec::new();
    let mut running_end = i64::MIN;
    let mut iter = tree.range_iter(i64::MIN, i64::MAX);
    while let Some(id) = iter.next(tree) {
        let span = tree.span(id);
        if !block.is_empty() && span.start > running_end {
            blocks.push(std::mem::take(&mut block));
            running_end = span.end;
        } else {
            running_end = std::cmp::max(running_end, span.end);
        }
        block.push(id);
        stats.input_fragment_count += 1;
    }
    if !block.is_empty() {
        blocks.push(block);
    }
    stats.block_count = blocks.len();

    for mut block in blocks {
        stats.absorbed_fragment_count += cluster_block(tree, &mut block);
    }
    stats
}

/// Greedy merge within one block; returns the number of fragments absorbed
fn cluster_block(tree: &mut FragmentTree, block: &mut Vec<IntervalId>) -> usize {
    if block.len() < 2 {
        return 0;
    }

    block.sort_by(|&a, &b| {
        let fa = tree.payload(a);
        let fb = tree.payload(b);
        merge_priority(fb)
            .total_cmp(&merge_priority(fa))
            .then_with(|| fa.range().start.cmp(&fb.range().start))
            .then_with(|| fa.range().end.cmp(&fb.range().end))
    });

    let mut absorbed = 0;
    let mut i = 0;
    while i < block.len() {
        loop {
            let mut recruited = false;
            let mut j = i + 1;
            while j < block.len() {
                let anchor = block[i];
                let candidate = block[j];
                let compatible = {
                    let fa = tree.payload(anchor);
                    let fc = tree.payload(candidate);
                    fa.range().intersect_range(fc.range()) && !fa.conflicts_with(fc)
                };
                if compatible {
                    let fragment = tree.payload_mut(candidate).take_absorbed();
                    tree.payload_mut(anchor).absorb(fragment);
                    block.remove(j);
                    absorbed += 1;
                    recruited = true;
                } else {
                    j += 1;
                }
            }
            // Bases recruited into the anchor can make fragments dismissed earlier in the scan
            // compatible now, so rescan until a pass absorbs nothing
            if !recruited {
                break;
            }
        }
        i += 1;
    }
    absorbed
}
