#![warn(missing_docs)]
//! Sandbench Statistics Primitives
//!
//! Pure reductions over a sample buffer of f64 millisecond durations.
//! These are the *shared semantics*: the reference guest runtime applies them
//! to its own linear-memory sample buffer, and the host applies them to
//! samples copied out of guest memory. Both sides must agree bit-for-bit,
//! so everything here is deterministic and allocation-free.
//!
//! Conventions:
//! - An empty buffer reduces to `NaN` for every statistic.
//! - `median` sorts its input in place with a partition-exchange sort; the
//!   caller owns the (observable) reordering.
//! - `variance` is the population variance (divide by `n`, not `n - 1`).

/// Arithmetic mean of the samples. `NaN` when empty.
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Smallest sample. `NaN` when empty.
pub fn minimum(samples: &[f64]) -> f64 {
    samples.iter().copied().fold(f64::NAN, |acc, v| {
        if acc.is_nan() || v < acc { v } else { acc }
    })
}

/// Largest sample. `NaN` when empty.
pub fn maximum(samples: &[f64]) -> f64 {
    samples.iter().copied().fold(f64::NAN, |acc, v| {
        if acc.is_nan() || v > acc { v } else { acc }
    })
}

/// Median of the samples, sorting the buffer in place first.
///
/// Odd count returns the middle element after sorting; even count returns
/// the average of the two middle elements. `NaN` when empty.
pub fn median(samples: &mut [f64]) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    sort_samples(samples);
    let len = samples.len();
    let half = len / 2;
    if len & 1 == 1 {
        samples[half]
    } else {
        (samples[half - 1] + samples[half]) / 2.0
    }
}

/// Population variance of the samples around `mean`. `NaN` when empty.
pub fn variance(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    let avg = mean(samples);
    let sum: f64 = samples.iter().map(|v| (v - avg) * (v - avg)).sum();
    sum / samples.len() as f64
}

/// Standard deviation, the square root of the population variance.
pub fn std_dev(samples: &[f64]) -> f64 {
    variance(samples).sqrt()
}

/// In-place partition-exchange (quicksort) sort.
///
/// This is the sort the guest runtime performs on its raw sample buffer, so
/// the host-side copy uses the identical algorithm rather than the standard
/// library sort. Durations are finite and non-negative; NaN never occurs in
/// a sample buffer produced by the engine.
pub fn sort_samples(samples: &mut [f64]) {
    if samples.len() < 2 {
        return;
    }
    let pivot_at = hoare_partition(samples);
    let (lo, hi) = samples.split_at_mut(pivot_at + 1);
    sort_samples(lo);
    sort_samples(hi);
}

/// Hoare partition around the first element; returns the split index such
/// that everything at or below it is <= everything above it. Pivoting on the
/// first element keeps the split index below `len - 1`, so both recursive
/// halves of [`sort_samples`] strictly shrink.
fn hoare_partition(samples: &mut [f64]) -> usize {
    let pivot = samples[0];
    let mut i = 0usize;
    let mut j = samples.len() - 1;
    loop {
        while samples[i] < pivot {
            i += 1;
        }
        while samples[j] > pivot {
            j -= 1;
        }
        if i >= j {
            return j;
        }
        samples.swap(i, j);
        i += 1;
        j -= 1;
    }
}
