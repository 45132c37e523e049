//! Summary statistics for simulated samples.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population (biased) standard deviation.
pub fn population_std(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / values.len() as f64).sqrt()
}

/// Location and spread of the baseline an effect is measured against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reference {
    pub mean: f64,
    pub std: f64,
}

impl Reference {
    pub fn of(values: &[f64]) -> Self {
        let m = mean(values);
        Self {
            mean: m,
            std: population_std(values, m),
        }
    }

    /// Standardised mean difference of `values` against this reference.
    ///
    /// Falls back to the pooled std when the reference has no spread and to
    /// the raw difference when neither sample does.
    pub fn effect_size(&self, values: &[f64]) -> f64 {
        let m = mean(values);
        let diff = m - self.mean;
        if self.std > 0.0 {
            return diff / self.std;
        }
        let other = population_std(values, m);
        let pooled = ((self.std.powi(2) + other.powi(2)) / 2.0).sqrt();
        if pooled > 0.0 {
            diff / pooled
        } else {
            diff
        }
    }
}

/// Percentile `q` in [0, 1] of sorted `values`, linearly interpolated.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Index of the most frequent label code among `0..classes`; ties go to the
/// smallest index. Codes outside the label range are ignored.
pub fn mode(codes: &[f64], classes: usize) -> f64 {
    let mut counts = vec![0usize; classes];
    for &c in codes {
        if c.is_finite() && c >= 0.0 && (c as usize) < classes {
            counts[c as usize] += 1;
        }
    }
    counts
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
        .map_or(0.0, |(i, _)| i as f64)
}
