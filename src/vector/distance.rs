//! Vector math used by centroid assignment and candidate scoring.
//!
//! # Metrics
//! - Cluster assignment: Euclidean distance to the centroid
//! - Candidate scoring: raw dot product (embeddings are pre-scaled by the
//!   embedding policy, so no per-chunk normalization happens here)

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Computes the Euclidean distance between two vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Computes the dot product of two vectors.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Returns the position of the centroid closest to `vector`.
///
/// Ties resolve to the first centroid in iteration order. Returns `None`
/// when `centroids` is empty.
pub fn nearest_centroid<'a, I>(vector: &[f32], centroids: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut best: Option<(usize, f32)> = None;

    for (i, centroid) in centroids.into_iter().enumerate() {
        let distance = euclidean_distance(vector, centroid);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((i, distance)),
        }
    }

    best.map(|(i, _)| i)
}

/// Normalizes a vector in-place to unit length.
///
/// Vectors with a near-zero norm are left untouched.
pub fn normalize_vector(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Running sum used to compute a centroid without holding every member.
#[derive(Debug, Clone)]
pub struct MeanAccumulator {
    sum: Vec<f64>,
    count: usize,
}

impl MeanAccumulator {
    pub fn new(dimension: usize) -> Self {
        Self {
            sum: vec![0.0; dimension],
            count: 0,
        }
    }

    /// Adds one member. Values beyond the accumulator's dimension are ignored.
    pub fn add<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = f32>,
    {
        for (acc, value) in self.sum.iter_mut().zip(values) {
            *acc += f64::from(value);
        }
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns the mean, or `None` if nothing was added.
    pub fn mean(&self) -> Option<Vec<f32>> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(self.sum.iter().map(|s| (s / n) as f32).collect())
    }
}
