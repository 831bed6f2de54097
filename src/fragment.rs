//! The haplotype fragment: a partial allele string over candidate variant sites
//!

use crate::contig_data::ReadId;
use crate::int_range::IntRange;

/// Allele-string symbol for a site with no observed base; compatible with anything on merge
pub const WILDCARD: u8 = b'-';

/// A partial allele string anchored to a closed range of variant-site indices
///
/// Each position holds one of `A C G T *` or the wildcard, plus an observation-depth counter.
/// Depth is non-zero only at non-wildcard positions. The read count tracks contributing
/// reads/pairs (one per observation, even when the observation carried two records), and `recs`
/// collects every contributing record id in processing order.
///
pub struct HaplotypeFragment {
    range: IntRange,
    bases: Vec<u8>,
    depth: Vec<u32>,
    read_count: usize,
    recs: Vec<ReadId>,
}

impl HaplotypeFragment {
    /// Seed a fragment from one observed allele string
    pub fn new(range: IntRange, bases: &[u8], rec: ReadId, mate_rec: Option<ReadId>) -> Self {
        assert_eq!(bases.len() as i64, range.len());
        let depth = bases
            .iter()
            .map(|&b| u32::from(b != WILDCARD))
            .collect::<Vec<_>>();
        let mut recs = vec![rec];
        if let Some(mate) = mate_rec {
            recs.push(mate);
        }
        Self {
            range,
            bases: bases.to_vec(),
            depth,
            read_count: 1,
            recs,
        }
    }

    pub fn range(&self) -> &IntRange {
        &self.range
    }

    pub fn bases(&self) -> &[u8] {
        &self.bases
    }

    pub fn read_count(&self) -> usize {
        self.read_count
    }

    pub fn recs(&self) -> &[ReadId] {
        &self.recs
    }

    /// Base call at an absolute site index; wildcard outside the fragment span
    pub fn base_at(&self, site: i64) -> u8 {
        if self.range.intersect_pos(site) {
            self.bases[(site - self.range.start) as usize]
        } else {
            WILDCARD
        }
    }

    /// Observation depth at an absolute site index; zero outside the fragment span
    pub fn depth_at(&self, site: i64) -> u32 {
        if self.range.intersect_pos(site) {
            self.depth[(site - self.range.start) as usize]
        } else {
            0
        }
    }

    /// True once the fragment has been absorbed or extracted and only its shell remains
    pub fn is_husk(&self) -> bool {
        self.read_count == 0
    }

    /// True if `bases` over `range` agrees with this fragment at every site where both are called
    ///
    /// Wildcards agree with everything; the check covers the intersection of the two spans.
    ///
    pub fn agrees_with(&self, bases: &[u8], range: &IntRange) -> bool {
        debug_assert_eq!(bases.len() as i64, range.len());
        let lo = std::cmp::max(self.range.start, range.start);
        let hi = std::cmp::min(self.range.end, range.end);
        for site in lo..=hi {
            let a = self.base_at(site);
            let b = bases[(site - range.start) as usize];
            if a != WILDCARD && b != WILDCARD && a != b {
                return false;
            }
        }
        true
    }

    /// True if the two fragments disagree at any site where both are called
    pub fn conflicts_with(&self, other: &HaplotypeFragment) -> bool {
        let lo = std::cmp::max(self.range.start, other.range.start);
        let hi = std::cmp::min(self.range.end, other.range.end);
        for site in lo..=hi {
            let a = self.base_at(site);
            let b = other.base_at(site);
            if a != WILDCARD && b != WILDCARD && a != b {
                return true;
            }
        }
        false
    }

    /// Fold one more same-span observation into the fragment
    ///
    /// Wildcard positions fill in from the observation, called positions deepen, and the
    /// supplied record id(s) append. The caller has already verified agreement.
    ///
    pub fn merge_observation(&mut self, bases: &[u8], rec: ReadId, mate_rec: Option<ReadId>) {
        assert_eq!(bases.len() as i64, self.range.len());
        for (i, &b) in bases.iter().enumerate() {
            if b != WILDCARD {
                self.bases[i] = b;
                self.depth[i] += 1;
            }
        }
        self.read_count += 1;
        self.recs.push(rec);
        if let Some(mate) = mate_rec {
            self.recs.push(mate);
        }
    }

    /// Cluster-phase merge: grow this fragment to the union span and absorb `other`
    ///
    /// Bases union with this fragment's non-wildcard calls taking precedence (the caller has
    /// verified the overlap is conflict-free, so precedence only decides wildcard fill). Depths
    /// sum positionwise, read counts sum, and the absorbed record list is appended.
    ///
    pub fn absorb(&mut self, other: HaplotypeFragment) {
        let merged = IntRange::from_pair(
            std::cmp::min(self.range.start, other.range.start),
            std::cmp::max(self.range.end, other.range.end),
        );
        let len = merged.len() as usize;
        let mut bases = vec![WILDCARD; len];
        let mut depth = vec![0u32; len];
        for (i, site) in (merged.start..=merged.end).enumerate() {
            let a = self.base_at(site);
            bases[i] = if a != WILDCARD { a } else { other.base_at(site) };
            depth[i] = self.depth_at(site) + other.depth_at(site);
        }

        self.range = merged;
        self.bases = bases;
        self.depth = depth;
        self.read_count += other.read_count;
        self.recs.extend(other.recs);
    }

    /// Remove the fragment's content for absorption elsewhere, leaving a husk in its place
    ///
    /// The husk keeps an empty span anchored at the old start and stays in the tree until
    /// filtering or teardown removes it.
    ///
    pub fn take_absorbed(&mut self) -> HaplotypeFragment {
        let husk = HaplotypeFragment {
            range: IntRange::from_pair(self.range.start, self.range.start - 1),
            bases: Vec::new(),
            depth: Vec::new(),
            read_count: 0,
            recs: Vec::new(),
        };
        std::mem::replace(self, husk)
    }

    /// Take ownership of the contributing record list
    ///
    /// Used when results are extracted so tree teardown can't free the ids a caller now owns.
    ///
    pub fn take_recs(&mut self) -> Vec<ReadId> {
        std::mem::take(&mut self.recs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depths(frag: &HaplotypeFragment) -> Vec<u32> {
        (frag.range().start..=frag.range().end)
            .map(|site| frag.depth_at(site))
            .collect()
    }

    #[test]
    fn test_new_seeds_depth_at_called_sites_only() {
        let frag = HaplotypeFragment::new(IntRange::from_pair(0, 4), b"AC--T", 11, None);
        assert_eq!(depths(&frag), vec![1, 1, 0, 0, 1]);
        assert_eq!(frag.read_count(), 1);
        assert_eq!(frag.recs(), &[11]);
    }

    #[test]
    fn test_same_span_merge() {
        let range = IntRange::from_pair(0, 4);
        let mut frag = HaplotypeFragment::new(range.clone(), b"AC--T", 11, None);

        assert!(frag.agrees_with(b"-CG-T", &range));
        frag.merge_observation(b"-CG-T", 12, None);

        assert_eq!(frag.bases(), b"ACG-T");
        assert_eq!(depths(&frag), vec![1, 2, 1, 0, 2]);
        assert_eq!(frag.read_count(), 2);
        assert_eq!(frag.recs(), &[11, 12]);
    }

    #[test]
    fn test_same_span_conflict_rejected() {
        let range = IntRange::from_pair(0, 4);
        let frag = HaplotypeFragment::new(range.clone(), b"AC--T", 11, None);
        assert!(!frag.agrees_with(b"AG--T", &range));
    }

    #[test]
    fn test_conflicts_with_overlap_only() {
        let a = HaplotypeFragment::new(IntRange::from_pair(0, 3), b"ACGT", 1, None);
        let b = HaplotypeFragment::new(IntRange::from_pair(2, 5), b"GTAA", 2, None);
        let c = HaplotypeFragment::new(IntRange::from_pair(2, 5), b"GCAA", 3, None);
        let d = HaplotypeFragment::new(IntRange::from_pair(10, 12), b"CCC", 4, None);

        assert!(!a.conflicts_with(&b));
        assert!(a.conflicts_with(&c));
        // Disjoint fragments can't conflict
        assert!(!a.conflicts_with(&d));
    }

    #[test]
    fn test_absorb_extends_span_and_sums_depth() {
        let mut a = HaplotypeFragment::new(IntRange::from_pair(0, 3), b"ACG-", 1, None);
        let mut b = HaplotypeFragment::new(IntRange::from_pair(2, 5), b"G-AT", 2, Some(3));

        a.absorb(b.take_absorbed());

        assert_eq!(a.range(), &IntRange::from_pair(0, 5));
        assert_eq!(a.bases(), b"ACG-AT");
        assert_eq!(a.read_count(), 2);
        assert_eq!(a.recs(), &[1, 2, 3]);
        // Overlap site 2 was called by both contributors
        assert_eq!(a.depth_at(2), 2);
        assert_eq!(a.depth_at(3), 0);

        assert!(b.is_husk());
        assert_eq!(b.read_count(), 0);
        assert!(b.range().is_empty());
    }

    #[test]
    fn test_take_recs_leaves_empty_list() {
        let mut frag = HaplotypeFragment::new(IntRange::from_pair(0, 1), b"AC", 5, Some(6));
        assert_eq!(frag.take_recs(), vec![5, 6]);
        assert!(frag.recs().is_empty());
    }
}
