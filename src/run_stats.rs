//! Track stats for haplotype detection over each contig segment
//!

use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct ClusterStats {
    pub input_fragment_count: usize,
    pub block_count: usize,
    pub absorbed_fragment_count: usize,
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct SegmentHaplotypeStats {
    pub candidate_site_count: usize,

    /// Read placements returned for the segment, usable or not
    pub read_count: usize,

    /// Mate pairs assembled into a single allele string
    pub pair_count: usize,

    /// Distinct fragments held by the store before clustering
    pub fragment_count: usize,

    pub cluster: ClusterStats,

    /// Fragments dropped by the minimum-support filter (absorbed husks included)
    pub filtered_fragment_count: usize,

    pub group_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_serialization_round_trip() {
        let stats = SegmentHaplotypeStats {
            candidate_site_count: 4,
            read_count: 12,
            pair_count: 3,
            fragment_count: 5,
            cluster: ClusterStats {
                input_fragment_count: 5,
                block_count: 2,
                absorbed_fragment_count: 2,
            },
            filtered_fragment_count: 3,
            group_count: 2,
        };

        let json = serde_json::to_string(&stats).unwrap();
        let restored: SegmentHaplotypeStats = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.candidate_site_count, 4);
        assert_eq!(restored.cluster.block_count, 2);
        assert_eq!(restored.group_count, 2);
    }
}
