//! Scalar statistics helpers shared by the series, stabilizer, and report
//! code. Everything here works on plain `f64` slices; the callers own any
//! unit conversions.

/// Calculates the p-th percentile of a slice of f64 values.
///
/// Uses linear interpolation between values for non-integer positions.
///
/// # Arguments
/// * `values` - A mutable slice of f64 values (will be sorted in place)
/// * `p` - The percentile to calculate, must be in range [0.0, 1.0]
///
/// # Returns
/// * `Some(percentile)` - The calculated percentile value
/// * `None` - If the slice is empty or p is outside [0.0, 1.0]
pub fn percentile_f64(values: &mut [f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    if !(0.0..=1.0).contains(&p) {
        return None;
    }

    let len = values.len();

    if len == 1 {
        return Some(values[0]);
    }

    values.sort_by(|a, b| a.total_cmp(b));

    if p == 0.0 {
        return Some(values[0]);
    }
    if p == 1.0 {
        return Some(values[len - 1]);
    }

    // Position in the sorted array (0-indexed), interpolated.
    let pos = (len - 1) as f64 * p;
    let lower_idx = pos.floor() as usize;
    let upper_idx = pos.ceil() as usize;
    let fraction = pos - pos.floor();

    if lower_idx == upper_idx {
        return Some(values[lower_idx]);
    }

    let lower_val = values[lower_idx];
    let upper_val = values[upper_idx];
    Some(lower_val + fraction * (upper_val - lower_val))
}

/// Arithmetic mean of a slice, or `None` if it is empty.
pub fn mean_f64(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator) of a slice.
///
/// Returns `None` with fewer than two values.
pub fn std_dev_f64(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean_f64(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Sorts a copy of `values` and drops the lowest and highest `percent`% of
/// entries from each side.
///
/// The number trimmed per side is `len * percent / 100`, rounded down. The
/// returned values are sorted ascending.
pub fn double_sided_trim(values: &[f64], percent: usize) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let k = sorted.len() * percent / 100;
    if k * 2 >= sorted.len() {
        return Vec::new();
    }
    sorted[k..sorted.len() - k].to_vec()
}

/// Mean of the double-sided `percent`%-trimmed values.
pub fn trimmed_mean_f64(values: &[f64], percent: usize) -> Option<f64> {
    mean_f64(&double_sided_trim(values, percent))
}

/// Absolute percent difference between two values, relative to their mean.
pub fn abs_percent_difference(current: f64, previous: f64) -> f64 {
    ((current - previous).abs() / ((current + previous) / 2.0)) * 100.0
}
