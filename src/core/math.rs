//! Numeric helpers shared by the model evaluators and transformers.

use crate::core::constants::PROBABILITY_EPSILON;

/// Logistic function.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse of [`sigmoid`], with `p` clamped away from 0 and 1.
#[inline]
pub fn logit(p: f64) -> f64 {
    let p = p.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON);
    (p / (1.0 - p)).ln()
}

/// Applies softmax in place.
/// Uses numerical stability by subtracting the maximum value.
pub fn softmax(values: &mut [f64]) {
    if values.is_empty() {
        return;
    }

    let max_val = values.iter().fold(f64::NEG_INFINITY, |max, &x| max.max(x));

    let mut sum = 0.0;
    for val in values.iter_mut() {
        *val = (*val - max_val).exp();
        sum += *val;
    }

    for val in values.iter_mut() {
        *val /= sum;
    }
}

/// Softmax of a slice into a new vector.
pub fn softmax_copy(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    softmax(&mut out);
    out
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Numpy-style closeness: `|a - b| < 1.5 * 10^-decimal`.
#[inline]
pub fn almost_equal(a: f64, b: f64, decimal: i32) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    (a - b).abs() < 1.5 * 10f64.powi(-decimal)
}
