//! Split the reads of a contig region into haplotype groups
//!
//! Candidate variant sites are selected from consensus statistics; each read (joined with its
//! mate when pairing is enabled) contributes one allele string over the sites it covers; the
//! strings accumulate into haplotype fragments, which are clustered, filtered, and returned as
//! grouped read record ids.
//!

use std::collections::HashMap;

use itertools::Itertools;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use simple_error::SimpleResult;

use crate::cluster::cluster_fragments;
use crate::contig_data::{
    ConsensusSite, ConsensusSource, ContigSegment, ReadId, ReadInfo, ReadLayout, ReadStore,
};
use crate::fragment::WILDCARD;
use crate::fragment_store::{
    FragmentTree, debug_dump_fragments, filter_weak_fragments, merge_or_insert,
};
use crate::int_range::IntRange;
use crate::run_stats::SegmentHaplotypeStats;
use crate::seq_util::complement_base;

#[derive(Clone, Deserialize, Serialize)]
pub struct HaplotypeSettings {
    /// Assemble linked mate pairs into one allele string
    pub use_read_pairs: bool,

    /// Minimum heterozygosity confidence for a position to become a candidate site
    pub min_het_score: f32,

    /// Minimum discrepancy score for a position to become a candidate site
    ///
    /// Either threshold alone qualifies a position.
    ///
    pub min_discrepancy_score: f32,

    /// Haplotype fragments supported by fewer reads/pairs than this are dropped
    pub min_read_count: usize,
}

impl Default for HaplotypeSettings {
    fn default() -> Self {
        Self {
            use_read_pairs: true,
            min_het_score: 10.0,
            min_discrepancy_score: 40.0,
            min_read_count: 2,
        }
    }
}

/// One haplotype group: every read record recruited into a surviving fragment, in processing order
pub type HaplotypeGroup = Vec<ReadId>;

/// A selected candidate variant site; only used while allele strings are being built
struct VariantSite {
    pos: i64,
}

/// Select candidate variant sites from the segment consensus
///
/// Site order defines the site indexing (0..N-1) that fragments are anchored to.
///
fn select_candidate_sites(
    segment: &ContigSegment,
    consensus: &[ConsensusSite],
    settings: &HaplotypeSettings,
) -> Vec<VariantSite> {
    let mut sites = Vec::new();
    for (offset, site) in consensus.iter().enumerate() {
        if site.het_score >= settings.min_het_score
            || site.discrepancy >= settings.min_discrepancy_score
        {
            let pos = segment.range.start + offset as i64;
            let (first, second) = site.top_alleles();
            debug!(
                "Pos {:>5}: het {}/{}  score {} {}",
                pos, first as char, second as char, site.het_score, site.discrepancy
            );
            sites.push(VariantSite { pos });
        }
    }
    sites
}

/// Link each mate pair so it is assembled once, at the earlier-placed read
///
/// Returns, per read index, the index of its later-placed mate when the mate is present in the
/// layout. The hash consumes an entry on match, so at most one link forms per pair.
///
fn link_mate_pairs(reads: &[ReadLayout]) -> Vec<Option<usize>> {
    let mut paired_with = vec![None; reads.len()];
    let mut by_rec: HashMap<ReadId, usize> = HashMap::new();
    for (i, read) in reads.iter().enumerate() {
        match read.mate_rec.and_then(|mate| by_rec.remove(&mate)) {
            Some(prev) => paired_with[prev] = Some(i),
            None => {
                by_rec.insert(read.rec, i);
            }
        }
    }
    paired_with
}

/// Contig positions of the read's first and last unclipped base
///
/// Clip bookkeeping is in stored-read coordinates; when the stored representation and the
/// placement orientation disagree, the clip bounds mirror through the read length.
///
fn unclipped_placement(read: &ReadLayout, info: &ReadInfo) -> (i64, i64) {
    if info.is_complemented() ^ read.is_reverse {
        (
            read.start + info.abs_len() - (info.clip_right - 1) - 1,
            read.start + info.abs_len() - (info.clip_left - 1) - 1,
        )
    } else {
        (
            read.start + info.clip_left - 1,
            read.start + info.clip_right - 1,
        )
    }
}

/// The read's base call at a contig position it covers
fn call_at(read: &ReadLayout, info: &ReadInfo, pos: i64) -> u8 {
    let base = if info.is_complemented() ^ read.is_reverse {
        complement_base(info.seq[(info.abs_len() - 1 - (pos - read.start)) as usize])
    } else {
        info.seq[(pos - read.start) as usize]
    };
    debug_assert!(base.is_ascii_graphic());
    base
}

/// Group the reads of one contig segment into haplotypes
///
/// Returns the haplotype groups and the per-segment processing stats.
///
pub fn find_segment_haplotypes<S: ConsensusSource + ReadStore>(
    source: &S,
    segment: &ContigSegment,
    settings: &HaplotypeSettings,
) -> SimpleResult<(Vec<HaplotypeGroup>, SegmentHaplotypeStats)> {
    let mut stats = SegmentHaplotypeStats::default();

    let consensus = source.segment_consensus(segment)?;
    assert_eq!(
        consensus.len() as i64,
        segment.range.len(),
        "consensus must cover every segment position"
    );

    let sites = select_candidate_sites(segment, &consensus, settings);
    stats.candidate_site_count = sites.len();
    if sites.is_empty() {
        info!("{segment:?}: no candidate variant sites");
        return Ok((Vec::new(), stats));
    }

    let mut reads = source.segment_layout(segment)?;
    // The site sweep below expects reads in placement order
    reads.sort_by_key(|r| (r.start, r.end));
    stats.read_count = reads.len();

    let paired_with = link_mate_pairs(&reads);
    let mut consumed = vec![false; reads.len()];

    let mut tree = FragmentTree::new();

    // First site not left of the current read; advances monotonically with the sorted reads
    let mut site_cursor = 0usize;

    for i in 0..reads.len() {
        if consumed[i] {
            continue;
        }
        let read = &reads[i];
        let Some(info) = source.read_info(read.rec) else {
            warn!("no sequence record for read {}", read.rec);
            continue;
        };
        if !info.has_unclipped_bases() {
            continue;
        }

        let (left, right) = unclipped_placement(read, &info);
        let left = std::cmp::max(left, read.start);
        let right = std::cmp::min(right, read.end);

        while site_cursor < sites.len() && sites[site_cursor].pos < left {
            site_cursor += 1;
        }
        if site_cursor == sites.len() {
            break;
        }
        if right < sites[site_cursor].pos {
            continue;
        }

        // Allele string over the sites this read covers
        let mut bases = Vec::new();
        let mut next_site = site_cursor;
        while next_site < sites.len() && sites[next_site].pos <= right {
            bases.push(call_at(read, &info, sites[next_site].pos));
            next_site += 1;
        }

        let mate_index = if settings.use_read_pairs {
            paired_with[i]
        } else {
            None
        };
        let mate_rec = match mate_index {
            None => None,
            Some(mate_index) => {
                let mate = &reads[mate_index];
                let Some(mate_info) = source.read_info(mate.rec) else {
                    continue;
                };
                if !mate_info.has_unclipped_bases() {
                    continue;
                }
                let (mate_left, mate_right) = unclipped_placement(mate, &mate_info);

                // Sites falling in the gap between the two mate spans are unobserved
                while next_site < sites.len() && sites[next_site].pos < mate_left {
                    bases.push(WILDCARD);
                    next_site += 1;
                }
                while next_site < sites.len() && sites[next_site].pos <= mate_right {
                    bases.push(call_at(mate, &mate_info, sites[next_site].pos));
                    next_site += 1;
                }

                consumed[mate_index] = true;
                stats.pair_count += 1;
                Some(mate.rec)
            }
        };

        let range = IntRange::from_pair(site_cursor as i64, (site_cursor + bases.len() - 1) as i64);
        merge_or_insert(&mut tree, &bases, range, read.rec, mate_rec);
    }
    stats.fragment_count = tree.len();

    debug!("fragments before clustering:");
    debug_dump_fragments(&tree);

    stats.cluster = cluster_fragments(&mut tree);
    stats.filtered_fragment_count = filter_weak_fragments(&mut tree, settings.min_read_count)?;

    debug!("fragments after clustering and filtering:");
    debug_dump_fragments(&tree);

    // Extract one group per surviving fragment, taking ownership of the record lists so tree
    // teardown can't free them
    let mut survivors = Vec::new();
    let mut iter = tree.range_iter(i64::MIN, i64::MAX);
    while let Some(id) = iter.next(&tree) {
        survivors.push(id);
    }
    let mut groups = Vec::new();
    for id in survivors {
        let fragment = tree.payload_mut(id);
        if fragment.is_husk() {
            continue;
        }
        groups.push(fragment.take_recs());
    }
    stats.group_count = groups.len();

    info!(
        "{segment:?}: {} candidate sites, {} reads, {} fragments, group sizes [{}]",
        stats.candidate_site_count,
        stats.read_count,
        stats.fragment_count,
        groups.iter().map(|g| g.len()).join(", ")
    );

    Ok((groups, stats))
}

/// Group reads into haplotypes over a set of contig segments
///
/// Per-segment groups are concatenated; processing aborts on the first failing segment.
///
pub fn find_haplotypes<S: ConsensusSource + ReadStore>(
    source: &S,
    segments: &[ContigSegment],
    settings: &HaplotypeSettings,
) -> SimpleResult<Vec<HaplotypeGroup>> {
    let mut groups = Vec::new();
    for segment in segments {
        info!("find_haplotypes {segment:?}");
        let (segment_groups, _stats) = find_segment_haplotypes(source, segment, settings)?;
        groups.extend(segment_groups);
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_error::bail;

    /// In-memory contig fixture standing in for the enclosing application
    struct MockContig {
        segment: ContigSegment,
        consensus: Vec<ConsensusSite>,
        reads: Vec<ReadLayout>,
        seqs: HashMap<ReadId, ReadInfo>,
        fail_consensus: bool,
    }

    impl MockContig {
        fn new(start: i64, end: i64) -> Self {
            let segment = ContigSegment::new(1, start, end);
            let consensus = (start..=end)
                .map(|_| ConsensusSite {
                    het_score: 0.0,
                    het_call: 1,
                    discrepancy: 0.0,
                })
                .collect();
            Self {
                segment,
                consensus,
                reads: Vec::new(),
                seqs: HashMap::new(),
                fail_consensus: false,
            }
        }

        /// Mark a contig position as a strong candidate variant site
        fn add_site(&mut self, pos: i64) {
            let offset = (pos - self.segment.range.start) as usize;
            self.consensus[offset].het_score = 50.0;
        }

        /// Place a forward, fully unclipped read with the given stored bases
        fn add_read(&mut self, rec: ReadId, start: i64, seq: &[u8], mate_rec: Option<ReadId>) {
            let end = start + seq.len() as i64 - 1;
            self.reads.push(ReadLayout {
                rec,
                start,
                end,
                mate_rec,
                is_reverse: false,
            });
            self.seqs.insert(
                rec,
                ReadInfo {
                    seq: seq.to_vec(),
                    clip_left: 1,
                    clip_right: seq.len() as i64,
                    len: seq.len() as i64,
                },
            );
        }

        /// As add_read, but the placement is complemented relative to the stored sequence
        fn add_reverse_read(&mut self, rec: ReadId, start: i64, placed_seq: &[u8]) {
            let end = start + placed_seq.len() as i64 - 1;
            let stored = placed_seq
                .iter()
                .rev()
                .map(|&b| complement_base(b))
                .collect::<Vec<_>>();
            self.reads.push(ReadLayout {
                rec,
                start,
                end,
                mate_rec: None,
                is_reverse: true,
            });
            self.seqs.insert(
                rec,
                ReadInfo {
                    seq: stored,
                    clip_left: 1,
                    clip_right: placed_seq.len() as i64,
                    len: placed_seq.len() as i64,
                },
            );
        }
    }

    impl ConsensusSource for MockContig {
        fn segment_consensus(&self, _segment: &ContigSegment) -> SimpleResult<Vec<ConsensusSite>> {
            if self.fail_consensus {
                bail!("consensus unavailable");
            }
            Ok(self.consensus.clone())
        }
    }

    impl ReadStore for MockContig {
        fn segment_layout(&self, _segment: &ContigSegment) -> SimpleResult<Vec<ReadLayout>> {
            Ok(self.reads.clone())
        }

        fn read_info(&self, rec: ReadId) -> Option<ReadInfo> {
            self.seqs.get(&rec).cloned()
        }
    }

    /// A stored sequence of `len` filler bases with specific calls at the given contig positions
    fn seq_with(positions: &[(i64, u8)], start: i64, len: usize) -> Vec<u8> {
        let mut seq = vec![b'N'; len];
        for &(pos, base) in positions {
            seq[(pos - start) as usize] = base;
        }
        seq
    }

    fn settings(min_read_count: usize) -> HaplotypeSettings {
        HaplotypeSettings {
            min_read_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_two_haplotypes_grouped() {
        let mut contig = MockContig::new(0, 59);
        for pos in [10, 20, 30, 40] {
            contig.add_site(pos);
        }

        // Haplotype A-C-A-T, covered by two overlapping read chains
        contig.add_read(1, 5, &seq_with(&[(10, b'A'), (20, b'C'), (30, b'A')], 5, 31), None);
        contig.add_read(3, 5, &seq_with(&[(10, b'A'), (20, b'C'), (30, b'A')], 5, 31), None);
        contig.add_read(2, 25, &seq_with(&[(30, b'A'), (40, b'T')], 25, 21), None);
        contig.add_read(4, 25, &seq_with(&[(30, b'A'), (40, b'T')], 25, 21), None);

        // Haplotype C-A-C-G, covered end to end
        contig.add_read(
            5,
            5,
            &seq_with(&[(10, b'C'), (20, b'A'), (30, b'C'), (40, b'G')], 5, 41),
            None,
        );
        contig.add_read(
            6,
            5,
            &seq_with(&[(10, b'C'), (20, b'A'), (30, b'C'), (40, b'G')], 5, 41),
            None,
        );

        let (mut groups, stats) =
            find_segment_haplotypes(&contig, &contig.segment, &settings(2)).unwrap();

        assert_eq!(stats.candidate_site_count, 4);
        assert_eq!(stats.read_count, 6);
        assert_eq!(stats.fragment_count, 3);
        assert_eq!(stats.cluster.absorbed_fragment_count, 1);
        assert_eq!(stats.group_count, 2);

        groups.sort();
        assert_eq!(groups, vec![vec![1, 3, 2, 4], vec![5, 6]]);
    }

    #[test]
    fn test_min_read_count_filter() {
        let mut contig = MockContig::new(0, 29);
        contig.add_site(10);
        contig.add_site(20);

        contig.add_read(1, 5, &seq_with(&[(10, b'A'), (20, b'C')], 5, 21), None);
        contig.add_read(2, 5, &seq_with(&[(10, b'A'), (20, b'C')], 5, 21), None);
        // A conflicting singleton that should be filtered out
        contig.add_read(3, 5, &seq_with(&[(10, b'G'), (20, b'T')], 5, 21), None);

        let (groups, stats) =
            find_segment_haplotypes(&contig, &contig.segment, &settings(2)).unwrap();

        assert_eq!(stats.fragment_count, 2);
        assert_eq!(stats.filtered_fragment_count, 1);
        assert_eq!(groups, vec![vec![1, 2]]);
    }

    #[test]
    fn test_mate_pair_assembly_fills_gap_with_wildcards() {
        let mut contig = MockContig::new(0, 59);
        for pos in [10, 20, 30, 40] {
            contig.add_site(pos);
        }

        // Each pair covers sites 0 and 3, leaving 1 and 2 unobserved; the wildcard fill makes
        // the two pairs land in one fragment spanning all four sites
        contig.add_read(1, 5, &seq_with(&[(10, b'A')], 5, 11), Some(2));
        contig.add_read(2, 35, &seq_with(&[(40, b'T')], 35, 11), Some(1));
        contig.add_read(3, 5, &seq_with(&[(10, b'A')], 5, 11), Some(4));
        contig.add_read(4, 35, &seq_with(&[(40, b'T')], 35, 11), Some(3));

        let (groups, stats) =
            find_segment_haplotypes(&contig, &contig.segment, &settings(2)).unwrap();

        assert_eq!(stats.pair_count, 2);
        assert_eq!(stats.fragment_count, 1);
        assert_eq!(groups, vec![vec![1, 2, 3, 4]]);
    }

    #[test]
    fn test_pairing_disabled_processes_mates_separately() {
        let mut contig = MockContig::new(0, 59);
        for pos in [10, 40] {
            contig.add_site(pos);
        }

        contig.add_read(1, 5, &seq_with(&[(10, b'A')], 5, 11), Some(2));
        contig.add_read(2, 35, &seq_with(&[(40, b'T')], 35, 11), Some(1));

        let mut s = settings(1);
        s.use_read_pairs = false;
        let (mut groups, stats) = find_segment_haplotypes(&contig, &contig.segment, &s).unwrap();

        assert_eq!(stats.pair_count, 0);
        assert_eq!(stats.fragment_count, 2);
        groups.sort();
        assert_eq!(groups, vec![vec![1], vec![2]]);
    }

    #[test]
    fn test_reverse_read_calls_complement() {
        let mut contig = MockContig::new(0, 29);
        contig.add_site(10);
        contig.add_site(20);

        contig.add_read(1, 5, &seq_with(&[(10, b'A'), (20, b'C')], 5, 21), None);
        // Same placed bases, stored complemented; must merge with the forward read
        contig.add_reverse_read(2, 5, &seq_with(&[(10, b'A'), (20, b'C')], 5, 21));

        let (groups, stats) =
            find_segment_haplotypes(&contig, &contig.segment, &settings(2)).unwrap();

        assert_eq!(stats.fragment_count, 1);
        assert_eq!(groups, vec![vec![1, 2]]);
    }

    #[test]
    fn test_no_candidate_sites_yields_no_groups() {
        let mut contig = MockContig::new(0, 29);
        contig.add_read(1, 5, &seq_with(&[(10, b'A')], 5, 11), None);

        let (groups, stats) =
            find_segment_haplotypes(&contig, &contig.segment, &settings(1)).unwrap();
        assert_eq!(stats.candidate_site_count, 0);
        assert!(groups.is_empty());
    }

    #[test]
    fn test_consensus_failure_propagates() {
        let mut contig = MockContig::new(0, 29);
        contig.fail_consensus = true;
        let segments = [contig.segment.clone()];
        assert!(find_haplotypes(&contig, &segments, &settings(1)).is_err());
    }

    #[test]
    fn test_multi_segment_groups_concatenate() {
        let mut contig = MockContig::new(0, 29);
        contig.add_site(10);
        contig.add_read(1, 5, &seq_with(&[(10, b'A')], 5, 11), None);
        contig.add_read(2, 5, &seq_with(&[(10, b'A')], 5, 11), None);

        let segments = [contig.segment.clone(), contig.segment.clone()];
        let groups = find_haplotypes(&contig, &segments, &settings(1)).unwrap();
        assert_eq!(groups, vec![vec![1, 2], vec![1, 2]]);
    }
}
