//! Base scalar kernels, same shape as `chroma-distance::distance`.

/// Squared Euclidean distance. The engine never takes the square root:
/// ordering by squared distance is identical to ordering by distance,
/// and skipping the `sqrt` keeps the per-tile kernel cheap.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

/// Raw dot product.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity, assuming neither input is pre-normalized.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot = inner_product(a, b);
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (na * nb + 1e-32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_of_identical_vectors_is_zero() {
        let v = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(squared_l2(&v, &v), 0.0);
    }

    #[test]
    fn inner_product_of_orthogonal_is_zero() {
        assert_eq!(inner_product(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_of_identical_direction_is_one() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 4.0, 6.0];
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-5);
    }
}
