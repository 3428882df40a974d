//! SIMD-accelerated vector kernels using the `wide` crate.
//!
//! Tree routing is dominated by descriptor·centroid dot products and ranking
//! by squared distances between dense path vectors, so both get an `f32x8`
//! fast path with a scalar tail.

use wide::f32x8;

const LANES: usize = 8;

#[inline]
fn load(chunk: &[f32]) -> f32x8 {
    let mut lanes = [0f32; LANES];
    lanes.copy_from_slice(chunk);
    f32x8::new(lanes)
}

#[inline]
fn horizontal_sum(v: f32x8) -> f32 {
    v.to_array().iter().sum()
}

/// Dot product of two equal-length slices.
///
/// Extra elements of the longer slice are ignored.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let (a, b) = (&a[..len], &b[..len]);

    if len < LANES {
        return a.iter().zip(b).map(|(x, y)| x * y).sum();
    }

    let mut acc = f32x8::splat(0.0);
    let chunks_a = a.chunks_exact(LANES);
    let chunks_b = b.chunks_exact(LANES);
    let tail_a = chunks_a.remainder();
    let tail_b = chunks_b.remainder();

    for (ca, cb) in chunks_a.zip(chunks_b) {
        acc = acc + load(ca) * load(cb);
    }

    horizontal_sum(acc) + tail_a.iter().zip(tail_b).map(|(x, y)| x * y).sum::<f32>()
}

/// Squared Euclidean distance between two equal-length slices.
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let (a, b) = (&a[..len], &b[..len]);

    if len < LANES {
        return a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    }

    let mut acc = f32x8::splat(0.0);
    let chunks_a = a.chunks_exact(LANES);
    let chunks_b = b.chunks_exact(LANES);
    let tail_a = chunks_a.remainder();
    let tail_b = chunks_b.remainder();

    for (ca, cb) in chunks_a.zip(chunks_b) {
        let diff = load(ca) - load(cb);
        acc = acc + diff * diff;
    }

    horizontal_sum(acc)
        + tail_a
            .iter()
            .zip(tail_b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
}

/// L2 norm of a slice.
pub fn l2_norm(values: &[f32]) -> f32 {
    dot_product(values, values).sqrt()
}

/// Scale `values` to unit L2 norm in place.
///
/// A zero vector stays zero. Returns the norm before scaling.
pub fn normalize_in_place(values: &mut [f32]) -> f32 {
    let norm = l2_norm(values);
    if norm > 0.0 {
        let inv = 1.0 / norm;
        values.iter_mut().for_each(|v| *v *= inv);
    } else {
        values.iter_mut().for_each(|v| *v = 0.0);
    }
    norm
}
