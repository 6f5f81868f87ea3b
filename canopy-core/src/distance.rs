//! Distance metrics and splitting-hyperplane math.
//!
//! Both metrics are normalized so that lower values mean "more similar":
//! Euclidean is the plain L2 norm of the difference, and Angular is the L2
//! distance between the normalized vectors, `sqrt(2 - 2*cos(a, b))`. Ranking
//! logic elsewhere never needs to know which metric is active.

use serde::{Deserialize, Serialize};

/// Norms below this are treated as zero when constructing hyperplanes.
const MIN_SPLIT_NORM: f32 = 1e-10;

/// Distance metric fixed at index construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// Angular (cosine-like) distance. Lower is more similar.
    Angular,
    /// Euclidean distance (L2 norm). Lower is more similar.
    Euclidean,
}

impl Default for Metric {
    fn default() -> Self {
        Self::Angular
    }
}

impl Metric {
    /// Computes the distance between two vectors using this metric.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");

        match self {
            Metric::Angular => angular_distance(a, b),
            Metric::Euclidean => euclidean_distance(a, b),
        }
    }

    /// Constructs the splitting hyperplane through two sampled points.
    ///
    /// Returns `(normal, offset)` such that a point `v` lies on the left side
    /// when `dot(normal, v) + offset <= 0`. Returns None when the pair is
    /// degenerate (coincident points, or a zero-norm vector under Angular),
    /// in which case the caller resamples.
    pub fn hyperplane(&self, a: &[f32], b: &[f32]) -> Option<(Vec<f32>, f32)> {
        match self {
            Metric::Angular => {
                let na = normalized(a)?;
                let nb = normalized(b)?;
                let normal: Vec<f32> = na.iter().zip(nb.iter()).map(|(x, y)| x - y).collect();
                if norm(&normal) < MIN_SPLIT_NORM {
                    return None;
                }
                Some((normal, 0.0))
            }
            Metric::Euclidean => {
                let normal: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| x - y).collect();
                if norm(&normal) < MIN_SPLIT_NORM {
                    return None;
                }
                // Perpendicular bisector of the segment between a and b.
                let offset = -normal
                    .iter()
                    .zip(a.iter().zip(b.iter()))
                    .map(|(n, (x, y))| n * (x + y) * 0.5)
                    .sum::<f32>();
                Some((normal, offset))
            }
        }
    }

    /// Axis-aligned fallback plane used when sampling keeps degenerating.
    ///
    /// The normal is the first standard basis vector; for Euclidean the
    /// offset centers the plane on the first component of a reference point.
    pub fn fallback_hyperplane(&self, dimension: usize, reference: &[f32]) -> (Vec<f32>, f32) {
        let mut normal = vec![0.0; dimension];
        normal[0] = 1.0;
        let offset = match self {
            Metric::Angular => 0.0,
            Metric::Euclidean => -reference[0],
        };
        (normal, offset)
    }
}

/// Signed distance of a point from a splitting hyperplane.
#[inline]
pub fn margin(normal: &[f32], offset: f32, v: &[f32]) -> f32 {
    dot_product(normal, v) + offset
}

/// Computes dot product (inner product) between two vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Computes the L2 norm of a vector.
#[inline]
pub fn norm(v: &[f32]) -> f32 {
    dot_product(v, v).sqrt()
}

/// Returns a unit-length copy of `v`, or None for a zero-norm vector.
pub fn normalized(v: &[f32]) -> Option<Vec<f32>> {
    let n = norm(v);
    if n < MIN_SPLIT_NORM {
        None
    } else {
        Some(v.iter().map(|x| x / n).collect())
    }
}

/// Computes Euclidean (L2) distance between two vectors.
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    euclidean_distance_squared(a, b).sqrt()
}

/// Computes squared Euclidean distance (avoids sqrt for comparisons).
#[inline]
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Computes angular distance, `sqrt(2 - 2*cos(a, b))`.
///
/// This equals the L2 distance between the normalized vectors, so the range
/// is `[0, 2]`: 0 for identical direction, 2 for opposite direction. A
/// zero-norm input has no direction and is treated as maximally dissimilar
/// to everything, `sqrt(2)`.
#[inline]
pub fn angular_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_sq = dot_product(a, a) * dot_product(b, b);
    let cos = if norm_sq > 0.0 {
        dot / norm_sq.sqrt()
    } else {
        0.0
    };
    // Clamp against rounding pushing 2 - 2cos slightly negative.
    (2.0 - 2.0 * cos).max(0.0).sqrt()
}
