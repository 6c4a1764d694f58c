//! Structural similarity detection for submitted source code.
//!
//! The pipeline is: normalize the source into a canonical token stream,
//! hash sliding k-grams with FNV-1a, winnow the hash sequence into a
//! compact fingerprint set, and index fingerprints per problem in a banded
//! LSH structure so near-duplicates are retrieved without a full scan.

pub mod cache;
pub mod fingerprint;
pub mod lsh;
pub mod normalize;

pub use cache::FingerprintCache;
pub use fingerprint::{
    Fingerprint, K_GRAM_SIZE, SimilarityScores, WINNOW_WINDOW, fingerprint, score_pair,
};
pub use lsh::{CANDIDATE_LIMIT, DEFAULT_BAND_SIZE_HINT, DEFAULT_TABLES, LshIndex};
pub use normalize::normalize;
