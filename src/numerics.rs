//! Sparse bag-of-words vectors and the similarity kernels over them.
//!
//! A [`SparseVector`] holds `(word, weight)` pairs sorted by ascending word id
//! with no duplicate words. Every kernel here relies on that ordering to walk
//! two vectors with a single merge pass.

/// Sparse word-frequency vector, ascending by word id.
pub type SparseVector = Vec<(u32, f32)>;

/// Sort by word id and merge duplicate words by summing their weights.
pub fn canonicalize(vector: &mut SparseVector) {
    vector.sort_by_key(|(word, _)| *word);
    vector.dedup_by(|next, kept| {
        if next.0 == kept.0 {
            kept.1 += next.1;
            true
        } else {
            false
        }
    });
}

/// Whether a vector is sorted by strictly ascending word id.
pub fn is_canonical(vector: &[(u32, f32)]) -> bool {
    vector.windows(2).all(|pair| pair[0].0 < pair[1].0)
}

#[inline]
fn idf_of(idf: &[f32], word: u32) -> f32 {
    idf.get(word as usize).copied().unwrap_or(0.0)
}

/// idf-weighted mass of a vector: `Σ weight[w] * idf[w]`.
pub fn weighted_mass(vector: &[(u32, f32)], idf: &[f32]) -> f32 {
    vector.iter().map(|(w, v)| v * idf_of(idf, *w)).sum()
}

/// Weighted min-histogram intersection.
///
/// Each vector is normalized by its idf-weighted mass; for every shared word
/// the smaller normalized weight is accumulated, scaled by the word's idf.
/// Higher is more similar. Words outside `idf` carry zero weight; a vector
/// with zero mass scores zero against everything.
pub fn min_hist(a: &[(u32, f32)], b: &[(u32, f32)], idf: &[f32]) -> f32 {
    let mass_a = weighted_mass(a, idf);
    let mass_b = weighted_mass(b, idf);
    if mass_a <= 0.0 || mass_b <= 0.0 {
        return 0.0;
    }

    let (mut i, mut j) = (0, 0);
    let mut score = 0.0;
    while i < a.len() && j < b.len() {
        let (wa, va) = a[i];
        let (wb, vb) = b[j];
        if wa == wb {
            let min_val = (va / mass_a).min(vb / mass_b);
            score += min_val * idf_of(idf, wa);
            i += 1;
            j += 1;
        } else if wa < wb {
            i += 1;
        } else {
            j += 1;
        }
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_merges_duplicates() {
        let mut v = vec![(5, 1.0), (2, 1.0), (5, 2.0)];
        canonicalize(&mut v);
        assert_eq!(v, vec![(2, 1.0), (5, 3.0)]);
        assert!(is_canonical(&v));
        assert!(!is_canonical(&[(3, 1.0), (1, 1.0)]));
    }

    #[test]
    fn test_min_hist_identical_vectors() {
        let idf = vec![1.0, 2.0, 0.5];
        let v = vec![(0, 1.0), (1, 3.0), (2, 2.0)];
        // Σ min(q/m, q/m) * idf = Σ v*idf / m = 1
        assert!((min_hist(&v, &v, &idf) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_min_hist_disjoint_and_zero_mass() {
        let idf = vec![1.0, 1.0, 0.0];
        assert_eq!(min_hist(&[(0, 1.0)], &[(1, 1.0)], &idf), 0.0);
        assert_eq!(min_hist(&[(2, 1.0)], &[(2, 1.0)], &idf), 0.0);
    }

    #[test]
    fn test_min_hist_partial_overlap() {
        let idf = vec![1.0, 1.0];
        let a = vec![(0, 1.0), (1, 1.0)];
        let b = vec![(1, 1.0)];
        // a normalized: 0.5, 0.5; b normalized: 1.0; shared word 1 -> min 0.5
        assert!((min_hist(&a, &b, &idf) - 0.5).abs() < 1e-6);
    }
}
