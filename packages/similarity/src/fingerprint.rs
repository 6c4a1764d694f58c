use std::collections::HashSet;
use std::hash::Hasher;

use fnv::FnvHasher;

use crate::normalize::normalize;

/// Sliding window length over the normalized text.
pub const K_GRAM_SIZE: usize = 7;
/// Winnowing window length over the k-gram hash sequence.
pub const WINNOW_WINDOW: usize = 10;

/// A structural fingerprint: the winnowed set of 64-bit k-gram hashes.
pub type Fingerprint = HashSet<u64>;

/// Compute the fingerprint of a source text.
///
/// Deterministic and side-effect free: normalize, hash k-grams with FNV-1a,
/// winnow the minima of each window into a set.
pub fn fingerprint(source: &str) -> Fingerprint {
    let normalized = normalize(source);
    winnow(&kgram_hashes(normalized.as_bytes()))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Hash every k-gram of `text` in order. Text shorter than the window
/// hashes as a single gram so very short submissions still fingerprint.
pub(crate) fn kgram_hashes(text: &[u8]) -> Vec<u64> {
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() < K_GRAM_SIZE {
        return vec![fnv1a(text)];
    }
    text.windows(K_GRAM_SIZE).map(fnv1a).collect()
}

/// Winnow a hash sequence: keep the minimum of each sliding window.
/// Sequences shorter than the window pass through whole. Duplicates
/// collapse; the result is a set, not a multiset.
pub(crate) fn winnow(hashes: &[u64]) -> Fingerprint {
    if hashes.is_empty() {
        return Fingerprint::new();
    }
    if hashes.len() < WINNOW_WINDOW {
        return hashes.iter().copied().collect();
    }

    let mut fingerprints = Fingerprint::with_capacity(hashes.len() / WINNOW_WINDOW + 1);
    for window in hashes.windows(WINNOW_WINDOW) {
        if let Some(min) = window.iter().copied().min() {
            fingerprints.insert(min);
        }
    }
    fingerprints
}

/// All pairwise similarity metrics, computed in one pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityScores {
    /// `0.4 * jaccard + 0.6 * max(containment_a, containment_b)`. The
    /// containment term catches the subset case that Jaccard underweights.
    pub blended: f64,
    pub jaccard: f64,
    /// |A ∩ B| / |A|
    pub containment_a: f64,
    /// |A ∩ B| / |B|
    pub containment_b: f64,
}

/// Score a fingerprint pair. Iterates the smaller set into the larger so
/// the intersection is counted exactly once.
pub fn score_pair(a: &Fingerprint, b: &Fingerprint) -> SimilarityScores {
    let (len_a, len_b) = (a.len(), b.len());

    if len_a == 0 && len_b == 0 {
        return SimilarityScores {
            blended: 1.0,
            jaccard: 1.0,
            containment_a: 1.0,
            containment_b: 1.0,
        };
    }
    if len_a == 0 || len_b == 0 {
        return SimilarityScores {
            blended: 0.0,
            jaccard: 0.0,
            containment_a: 0.0,
            containment_b: 0.0,
        };
    }

    let (smaller, larger) = if len_a <= len_b { (a, b) } else { (b, a) };
    let intersection = smaller.iter().filter(|hash| larger.contains(hash)).count() as f64;

    let jaccard = intersection / ((len_a + len_b) as f64 - intersection);
    let containment_a = intersection / len_a as f64;
    let containment_b = intersection / len_b as f64;
    let blended = 0.4 * jaccard + 0.6 * containment_a.max(containment_b);

    SimilarityScores {
        blended,
        jaccard,
        containment_a,
        containment_b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[u64]) -> Fingerprint {
        values.iter().copied().collect()
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let source = "int main() { int a, b; std::cin >> a >> b; std::cout << a + b; }";
        assert_eq!(fingerprint(source), fingerprint(source));
    }

    #[test]
    fn test_fingerprint_survives_renames_and_formatting() {
        let a = "int main() { int x = 0; int y = 1; return x + y; }";
        let b = "// renamed\nint main() {\n  int left = 0;\n  int right = 1;\n  return left + right;\n}";
        assert_eq!(fingerprint(a), fingerprint(b));
    }

    #[test]
    fn test_fingerprint_of_empty_source_is_empty() {
        assert!(fingerprint("").is_empty());
    }

    #[test]
    fn test_short_text_hashes_whole() {
        assert_eq!(kgram_hashes(b"ab").len(), 1);
        assert!(kgram_hashes(b"").is_empty());
    }

    #[test]
    fn test_kgram_count() {
        let text = b"abcdefghij"; // 10 bytes, k = 7
        assert_eq!(kgram_hashes(text).len(), 10 - K_GRAM_SIZE + 1);
    }

    #[test]
    fn test_winnow_short_sequence_passes_through() {
        let hashes = [5u64, 3, 9];
        assert_eq!(winnow(&hashes), set(&[5, 3, 9]));
    }

    #[test]
    fn test_winnow_selects_window_minima() {
        // 11 hashes, window 10: two windows, minima 1 and then 1 again.
        let hashes: Vec<u64> = vec![8, 7, 6, 5, 4, 3, 2, 1, 9, 10, 11];
        let fp = winnow(&hashes);
        assert!(fp.contains(&1));
        // The global maximum can never be a window minimum here.
        assert!(!fp.contains(&11));
    }

    #[test]
    fn test_scores_both_empty() {
        let s = score_pair(&set(&[]), &set(&[]));
        assert_eq!(s.jaccard, 1.0);
        assert_eq!(s.blended, 1.0);
    }

    #[test]
    fn test_scores_one_empty() {
        let s = score_pair(&set(&[1, 2]), &set(&[]));
        assert_eq!(s.jaccard, 0.0);
        assert_eq!(s.blended, 0.0);
    }

    #[test]
    fn test_scores_identical_sets() {
        let fp = set(&[1, 2, 3, 4]);
        let s = score_pair(&fp, &fp);
        assert_eq!(s.jaccard, 1.0);
        assert_eq!(s.containment_a, 1.0);
        assert_eq!(s.containment_b, 1.0);
        assert_eq!(s.blended, 1.0);
    }

    #[test]
    fn test_scores_subset_weighted_by_containment() {
        // A ⊂ B: containment of A in B is 1, Jaccard is only 0.5.
        let a = set(&[1, 2, 3, 4]);
        let b = set(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let s = score_pair(&a, &b);
        assert_eq!(s.containment_a, 1.0);
        assert_eq!(s.containment_b, 0.5);
        assert!((s.jaccard - 0.5).abs() < 1e-9);
        assert!((s.blended - (0.4 * 0.5 + 0.6 * 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_scores_symmetric() {
        let a = set(&[1, 2, 3, 4, 5]);
        let b = set(&[3, 4, 5, 6]);
        let ab = score_pair(&a, &b);
        let ba = score_pair(&b, &a);
        assert_eq!(ab.jaccard, ba.jaccard);
        assert_eq!(ab.blended, ba.blended);
        assert_eq!(ab.containment_a, ba.containment_b);
        assert_eq!(ab.containment_b, ba.containment_a);
    }

    #[test]
    fn test_disjoint_sets_score_zero() {
        let s = score_pair(&set(&[1, 2]), &set(&[3, 4]));
        assert_eq!(s.jaccard, 0.0);
        assert_eq!(s.blended, 0.0);
    }
}
