use std::collections::HashMap;
use std::hash::Hasher;

use fnv::FnvHasher;

use crate::Fingerprint;

/// Number of hash tables (bands) per index.
pub const DEFAULT_TABLES: usize = 20;
/// Sizing hint for band buckets; the actual band size is derived per query.
pub const DEFAULT_BAND_SIZE_HINT: usize = 10;
/// Cap on candidates returned by a lookup.
pub const CANDIDATE_LIMIT: usize = 200;

/// Banded LSH index over fingerprints for one problem.
///
/// A fingerprint's hashes are sorted and partitioned into `T` contiguous
/// bands; each band hashes to a bucket in its table. Two fingerprints with
/// high overlap are likely to agree on at least one whole band, so a lookup
/// touches `T` buckets instead of scanning every stored submission. The
/// index holds submission ids only; dropping it loses nothing, the store
/// can always rebuild it.
pub struct LshIndex {
    tables: Vec<HashMap<u64, Vec<i32>>>,
}

impl LshIndex {
    pub fn new(num_tables: usize, band_size_hint: usize) -> Self {
        let num_tables = num_tables.max(1);
        Self {
            tables: (0..num_tables)
                .map(|_| HashMap::with_capacity(band_size_hint))
                .collect(),
        }
    }

    /// Number of hash tables.
    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    /// Insert a submission's fingerprint. Re-adding the same submission is
    /// tolerated: duplicate bucket entries only inflate vote counts
    /// uniformly and exact scoring decides anyway.
    pub fn add(&mut self, submission_id: i32, fingerprint: &Fingerprint) {
        let hashes = sorted_hashes(fingerprint);
        let num_tables = self.tables.len();

        for (table_index, table) in self.tables.iter_mut().enumerate() {
            let (start, end) = band_bounds(hashes.len(), table_index, num_tables);
            if start < end {
                table
                    .entry(band_hash(&hashes[start..end]))
                    .or_default()
                    .push(submission_id);
            }
        }
    }

    /// Return candidate submission ids for a query fingerprint, ordered by
    /// descending vote count (number of tables in which the candidate
    /// co-hashed with the query), capped at `limit`. A single-vote
    /// candidate is still returned.
    pub fn candidates(&self, fingerprint: &Fingerprint, limit: usize) -> Vec<i32> {
        if fingerprint.is_empty() {
            return Vec::new();
        }

        let hashes = sorted_hashes(fingerprint);
        let num_tables = self.tables.len();
        let mut votes: HashMap<i32, u32> = HashMap::new();

        for (table_index, table) in self.tables.iter().enumerate() {
            let (start, end) = band_bounds(hashes.len(), table_index, num_tables);
            if start < end
                && let Some(ids) = table.get(&band_hash(&hashes[start..end]))
            {
                for id in ids {
                    *votes.entry(*id).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(i32, u32)> = votes.into_iter().collect();
        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked.into_iter().map(|(id, _)| id).collect()
    }
}

fn sorted_hashes(fingerprint: &Fingerprint) -> Vec<u64> {
    let mut hashes: Vec<u64> = fingerprint.iter().copied().collect();
    hashes.sort_unstable();
    hashes
}

/// Bounds of band `t` over a sorted list of `len` hashes. The partition is
/// derived from the query size so recall stays stable across varying
/// fingerprint sizes; the last band absorbs any remainder.
fn band_bounds(len: usize, table_index: usize, num_tables: usize) -> (usize, usize) {
    let start = (table_index * len) / num_tables;
    let end = ((table_index + 1) * len) / num_tables;
    (start, end)
}

fn band_hash(band: &[u64]) -> u64 {
    let mut hasher = FnvHasher::default();
    for value in band {
        hasher.write_u64(*value);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score_pair;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn fp(values: impl IntoIterator<Item = u64>) -> Fingerprint {
        values.into_iter().collect()
    }

    #[test]
    fn test_band_bounds_cover_everything_once() {
        for len in [0usize, 1, 7, 19, 20, 53, 240] {
            let mut covered = 0;
            for t in 0..DEFAULT_TABLES {
                let (start, end) = band_bounds(len, t, DEFAULT_TABLES);
                assert!(start <= end && end <= len);
                covered += end - start;
            }
            assert_eq!(covered, len);
            // Bands are contiguous: band t ends where band t+1 starts.
            for t in 0..DEFAULT_TABLES - 1 {
                assert_eq!(
                    band_bounds(len, t, DEFAULT_TABLES).1,
                    band_bounds(len, t + 1, DEFAULT_TABLES).0
                );
            }
        }
    }

    #[test]
    fn test_identical_fingerprint_gets_full_votes() {
        let mut index = LshIndex::new(DEFAULT_TABLES, DEFAULT_BAND_SIZE_HINT);
        let a = fp((0..200).map(|i| i * 31 + 7));
        index.add(1, &a);
        assert_eq!(index.candidates(&a, CANDIDATE_LIMIT), vec![1]);
    }

    #[test]
    fn test_small_fingerprint_still_indexes() {
        // Fewer hashes than tables: some bands are empty, band size >= 1.
        let mut index = LshIndex::new(DEFAULT_TABLES, DEFAULT_BAND_SIZE_HINT);
        let a = fp([1, 2, 3]);
        index.add(9, &a);
        assert_eq!(index.candidates(&a, CANDIDATE_LIMIT), vec![9]);
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let mut index = LshIndex::new(DEFAULT_TABLES, DEFAULT_BAND_SIZE_HINT);
        index.add(1, &fp([1, 2, 3]));
        assert!(index.candidates(&fp([]), CANDIDATE_LIMIT).is_empty());
        // An empty fingerprint also never lands in any bucket.
        index.add(2, &fp([]));
        assert_eq!(index.candidates(&fp([1, 2, 3]), CANDIDATE_LIMIT), vec![1]);
    }

    #[test]
    fn test_candidates_ordered_by_votes() {
        let mut index = LshIndex::new(DEFAULT_TABLES, DEFAULT_BAND_SIZE_HINT);
        let query = fp((0..200).map(|i| i * 131 + 3));
        // Same fingerprint co-hashes in every table; a disjoint one never.
        index.add(1, &query);
        index.add(2, &fp((0..200).map(|i| i * 977 + 5)));
        let candidates = index.candidates(&query, CANDIDATE_LIMIT);
        assert_eq!(candidates.first(), Some(&1));
        assert!(!candidates.contains(&2));
    }

    #[test]
    fn test_candidate_cap() {
        let mut index = LshIndex::new(DEFAULT_TABLES, DEFAULT_BAND_SIZE_HINT);
        let shared = fp((0..200).map(|i| i * 31 + 7));
        for id in 0..50 {
            index.add(id, &shared);
        }
        assert_eq!(index.candidates(&shared, 10).len(), 10);
    }

    #[test]
    fn test_readd_is_tolerated() {
        let mut index = LshIndex::new(DEFAULT_TABLES, DEFAULT_BAND_SIZE_HINT);
        let a = fp((0..100).map(|i| i * 17 + 1));
        index.add(1, &a);
        index.add(1, &a);
        assert_eq!(index.candidates(&a, CANDIDATE_LIMIT), vec![1]);
    }

    /// Recall property: for pairs whose blended similarity clears the
    /// reporting threshold, each side retrieves the other essentially
    /// always under default parameters.
    #[test]
    fn test_recall_for_near_duplicate_pairs() {
        const TRIALS: usize = 150;
        const SIZE: usize = 240;
        const TAU: f64 = 0.75;

        let mut rng = StdRng::seed_from_u64(42);
        let mut eligible = 0u32;
        let mut hits = 0u32;

        for trial in 0..TRIALS {
            let mut base = Fingerprint::with_capacity(SIZE);
            while base.len() < SIZE {
                base.insert(rng.random());
            }

            // Near-duplicate: replace 0 or 1 elements, the realistic
            // distance winnowing leaves between lightly edited sources.
            let mut variant = base.clone();
            for _ in 0..(trial % 2) {
                if let Some(&victim) = variant.iter().next() {
                    variant.remove(&victim);
                    while !variant.insert(rng.random()) {}
                }
            }

            if score_pair(&base, &variant).blended < TAU {
                continue;
            }
            eligible += 1;

            let mut index = LshIndex::new(DEFAULT_TABLES, DEFAULT_BAND_SIZE_HINT);
            index.add(1, &base);
            index.add(2, &variant);

            let forward = index.candidates(&base, CANDIDATE_LIMIT).contains(&2);
            let backward = index.candidates(&variant, CANDIDATE_LIMIT).contains(&1);
            if forward && backward {
                hits += 1;
            }
        }

        assert!(eligible > 0);
        let recall = f64::from(hits) / f64::from(eligible);
        assert!(recall >= 0.95, "recall {recall} below 0.95");
    }
}
