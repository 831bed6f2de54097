//! > **Haplotype detection for assembled contig regions**
//!
//! Groups the reads of a contig region into haplotypes: candidate variant sites are selected
//! from consensus statistics, per-read allele strings accumulate into haplotype fragments held
//! in an augmented interval tree, and compatible fragments are clustered into read groups.
//!

pub use crate::cluster::*;
pub use crate::contig_data::*;
pub use crate::find_haplotypes::*;
pub use crate::fragment::*;
pub use crate::fragment_store::*;
pub use crate::int_range::*;
pub use crate::interval_tree::*;
pub use crate::run_stats::*;
pub use crate::seq_util::*;

pub mod cluster;
pub mod contig_data;
pub mod find_haplotypes;
pub mod fragment;
pub mod fragment_store;
pub mod int_range;
pub mod interval_tree;
pub mod run_stats;
pub mod seq_util;
