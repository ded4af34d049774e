//! Statistical computation for experiment reports.
//!
//! - Bootstrap confidence intervals (seeded resampling)
//! - Welch t-tests with Bonferroni correction and Cohen's d
//! - Balanced factorial ANOVA with F-distribution p-values
//! - Tukey HSD post-hoc comparisons on the studentized range distribution
//! - Box-plot five-number summaries

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};
use statrs::function::erf::erfc;
use statrs::function::gamma::ln_gamma;
use std::collections::HashMap;
use thiserror::Error;

/// Compute mean of samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn compute_mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Compute standard deviation of samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn compute_std(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = compute_mean(samples);
    let variance =
        samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Statistical configuration for reports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatConfig {
    /// Number of bootstrap resamples
    pub bootstrap_n: usize,
    /// Confidence level (e.g., 0.95)
    pub confidence: f64,
    /// Significance threshold
    pub alpha: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for StatConfig {
    fn default() -> Self {
        Self {
            bootstrap_n: 10_000,
            confidence: 0.95,
            alpha: 0.05,
            seed: 42,
        }
    }
}

/// Bootstrap confidence interval of the mean (percentile method)
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]
pub fn bootstrap_ci(samples: &[f64], config: &StatConfig) -> (f64, f64) {
    if samples.len() < 2 || config.bootstrap_n == 0 {
        let mean = compute_mean(samples);
        return (mean, mean);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut bootstrap_means = Vec::with_capacity(config.bootstrap_n);

    for _ in 0..config.bootstrap_n {
        let resample_sum: f64 = (0..samples.len())
            .map(|_| {
                let idx = rng.next_u64() as usize % samples.len();
                samples[idx]
            })
            .sum();
        bootstrap_means.push(resample_sum / samples.len() as f64);
    }

    bootstrap_means.sort_by(f64::total_cmp);

    let alpha = 1.0 - config.confidence;
    let lower_idx = (config.bootstrap_n as f64 * (alpha / 2.0)).floor() as usize;
    let upper_idx = (config.bootstrap_n as f64 * (1.0 - alpha / 2.0)).ceil() as usize;

    let lower = bootstrap_means.get(lower_idx).copied().unwrap_or(0.0);
    let upper = bootstrap_means
        .get(upper_idx.min(bootstrap_means.len() - 1))
        .copied()
        .unwrap_or(0.0);

    (lower, upper)
}

/// Result of a significance test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// t-statistic
    pub t_statistic: f64,
    /// p-value
    pub p_value: f64,
    /// Degrees of freedom
    pub degrees_of_freedom: f64,
    /// Is result significant at the given alpha?
    pub is_significant: bool,
    /// Cohen's d effect size
    pub cohens_d: f64,
    /// Effect size interpretation
    pub effect_interpretation: String,
}

/// Independent samples t-test (Welch's t-test)
///
/// Returns `None` if either sample has fewer than two values or both have no variance.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::suboptimal_flops)]
pub fn welch_t_test(
    samples_a: &[f64],
    samples_b: &[f64],
    alpha: f64,
) -> Option<SignificanceResult> {
    if samples_a.len() < 2 || samples_b.len() < 2 {
        return None;
    }

    let n_a = samples_a.len() as f64;
    let n_b = samples_b.len() as f64;
    let mean_a = compute_mean(samples_a);
    let mean_b = compute_mean(samples_b);
    let var_a = compute_std(samples_a).powi(2);
    let var_b = compute_std(samples_b).powi(2);

    if var_a < f64::EPSILON && var_b < f64::EPSILON {
        return None;
    }

    let se = ((var_a / n_a) + (var_b / n_b)).sqrt();
    if se < f64::EPSILON {
        return None;
    }

    let t_statistic = (mean_a - mean_b) / se;

    // Welch-Satterthwaite degrees of freedom
    let df_num = ((var_a / n_a) + (var_b / n_b)).powi(2);
    let df_denom = ((var_a / n_a).powi(2) / (n_a - 1.0)) + ((var_b / n_b).powi(2) / (n_b - 1.0));
    let df = if df_denom > f64::EPSILON {
        df_num / df_denom
    } else {
        (n_a + n_b - 2.0).max(1.0)
    };

    let t_dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p_value = 2.0 * (1.0 - t_dist.cdf(t_statistic.abs()));

    // Pooled Cohen's d
    let pooled_std = (((n_a - 1.0) * var_a + (n_b - 1.0) * var_b) / (n_a + n_b - 2.0)).sqrt();
    let cohens_d = if pooled_std > f64::EPSILON {
        (mean_a - mean_b) / pooled_std
    } else {
        0.0
    };
    let effect_interpretation = interpret_cohens_d(cohens_d);

    Some(SignificanceResult {
        t_statistic,
        p_value,
        degrees_of_freedom: df,
        is_significant: p_value < alpha,
        cohens_d,
        effect_interpretation,
    })
}

/// Apply Bonferroni correction for multiple comparisons
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bonferroni_correction(alpha: f64, num_comparisons: usize) -> f64 {
    if num_comparisons == 0 {
        return alpha;
    }
    alpha / num_comparisons as f64
}

/// Interpret Cohen's d effect size
fn interpret_cohens_d(d: f64) -> String {
    let abs_d = d.abs();
    if abs_d < 0.2 {
        "negligible".to_string()
    } else if abs_d < 0.5 {
        "small".to_string()
    } else if abs_d < 0.8 {
        "medium".to_string()
    } else {
        "large".to_string()
    }
}

/// Linear-interpolation quantile of already sorted values
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Box-plot summary with 1.5 IQR whiskers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxStats {
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub mean: f64,
    /// Lowest value within 1.5 IQR of q1
    pub whisker_low: f64,
    /// Highest value within 1.5 IQR of q3
    pub whisker_high: f64,
    /// Values beyond the whiskers
    pub outliers: usize,
}

impl BoxStats {
    /// Summarize `samples`; `None` when empty
    #[must_use]
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);
        let (&min, &max) = (sorted.first()?, sorted.last()?);

        let q1 = quantile_sorted(&sorted, 0.25)?;
        let median = quantile_sorted(&sorted, 0.5)?;
        let q3 = quantile_sorted(&sorted, 0.75)?;
        let iqr = q3 - q1;
        let (fence_low, fence_high) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

        let inside = || sorted.iter().copied().filter(|v| *v >= fence_low && *v <= fence_high);
        let whisker_low = inside().next().unwrap_or(min);
        let whisker_high = inside().last().unwrap_or(max);
        let outliers = sorted.len() - inside().count();

        Some(Self {
            count: sorted.len(),
            min,
            q1,
            median,
            q3,
            max,
            mean: compute_mean(&sorted),
            whisker_low,
            whisker_high,
            outliers,
        })
    }
}

/// Errors raised by the ANOVA
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnovaError {
    #[error("No observations")]
    Empty,

    #[error("Observation {index} does not match the {factors} declared factors")]
    BadObservation { index: usize, factors: usize },

    #[error("Design is unbalanced: cell sizes range from {min} to {max}")]
    Unbalanced { min: usize, max: usize },

    #[error("No residual degrees of freedom (one observation per cell)")]
    NoResidualDf,
}

/// A categorical factor of the design
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Factor {
    pub name: String,
    pub levels: Vec<String>,
}

/// One observation: level index per factor, and the response
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub levels: Vec<usize>,
    pub value: f64,
}

/// One line of an ANOVA table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnovaRow {
    #[serde(rename = "Effect")]
    pub effect: String,
    pub sum_sq: f64,
    pub df: f64,
    #[serde(rename = "F")]
    pub f_value: Option<f64>,
    #[serde(rename = "PR(>F)")]
    pub p_value: Option<f64>,
}

/// Full-factorial ANOVA for a balanced design.
///
/// Effects are listed main effects first, then interactions by order, then
/// `Residual`. With equal cell sizes the sequential and type II sums of
/// squares coincide. Each effect's sum of squares is found by inclusion and
/// exclusion over the marginal-mean sums of squares of its factor subsets.
///
/// # Errors
///
/// Fails on empty or malformed input, unequal cell sizes, or a design with
/// no residual degrees of freedom.
#[allow(clippy::cast_precision_loss)]
pub fn factorial_anova(
    factors: &[Factor],
    observations: &[Observation],
) -> Result<Vec<AnovaRow>, AnovaError> {
    if observations.is_empty() || factors.is_empty() {
        return Err(AnovaError::Empty);
    }
    let k = factors.len();
    for (index, obs) in observations.iter().enumerate() {
        let valid = obs.levels.len() == k
            && obs
                .levels
                .iter()
                .zip(factors)
                .all(|(l, f)| *l < f.levels.len());
        if !valid {
            return Err(AnovaError::BadObservation { index, factors: k });
        }
    }

    let full_mask = (1usize << k) - 1;
    let cell_counts = group_by_mask(observations, full_mask);
    let cells: usize = factors.iter().map(|f| f.levels.len()).product();
    let sizes: Vec<usize> = cell_counts.values().map(|(_, n)| *n).collect();
    let min = if sizes.len() < cells {
        0
    } else {
        sizes.iter().copied().min().unwrap_or(0)
    };
    let max = sizes.iter().copied().max().unwrap_or(0);
    if min != max {
        return Err(AnovaError::Unbalanced { min, max });
    }

    let n = observations.len();
    let df_resid = n - cells;
    if df_resid == 0 {
        return Err(AnovaError::NoResidualDf);
    }

    let values: Vec<f64> = observations.iter().map(|o| o.value).collect();
    let grand = compute_mean(&values);
    let ss_total: f64 = values.iter().map(|v| (v - grand).powi(2)).sum();

    // Marginal sum of squares for every non-empty factor subset
    let marginal: Vec<f64> = (0..=full_mask)
        .map(|mask| {
            if mask == 0 {
                return 0.0;
            }
            group_by_mask(observations, mask)
                .values()
                .map(|(sum, count)| *count as f64 * (sum / *count as f64 - grand).powi(2))
                .sum()
        })
        .collect();

    let mut masks: Vec<usize> = (1..=full_mask).collect();
    masks.sort_by_key(|m| (m.count_ones(), *m));

    let ss_resid = (ss_total - marginal[full_mask]).max(0.0);
    let ms_resid = ss_resid / df_resid as f64;
    let f_dist_df2 = df_resid as f64;

    let mut rows = Vec::with_capacity(masks.len() + 1);
    for mask in masks {
        let df: usize = (0..k)
            .filter(|i| mask & (1 << i) != 0)
            .map(|i| factors[i].levels.len() - 1)
            .product();
        if df == 0 {
            continue;
        }

        let mut ss = 0.0;
        let mut sub = mask;
        while sub != 0 {
            let sign = if (mask.count_ones() - sub.count_ones()) % 2 == 0 {
                1.0
            } else {
                -1.0
            };
            ss += sign * marginal[sub];
            sub = (sub - 1) & mask;
        }
        let ss = ss.max(0.0);

        let effect = (0..k)
            .filter(|i| mask & (1 << i) != 0)
            .map(|i| format!("C({})", factors[i].name))
            .collect::<Vec<_>>()
            .join(":");

        let df = df as f64;
        let f_value = (ms_resid > f64::EPSILON).then(|| (ss / df) / ms_resid);
        let p_value = f_value.and_then(|f| {
            FisherSnedecor::new(df, f_dist_df2)
                .ok()
                .map(|dist| dist.sf(f))
        });

        rows.push(AnovaRow {
            effect,
            sum_sq: ss,
            df,
            f_value,
            p_value,
        });
    }

    rows.push(AnovaRow {
        effect: "Residual".to_string(),
        sum_sq: ss_resid,
        df: f_dist_df2,
        f_value: None,
        p_value: None,
    });
    Ok(rows)
}

/// Sum and count of observations per combination of the factors in `mask`
fn group_by_mask(observations: &[Observation], mask: usize) -> HashMap<Vec<usize>, (f64, usize)> {
    let mut groups: HashMap<Vec<usize>, (f64, usize)> = HashMap::new();
    for obs in observations {
        let key: Vec<usize> = obs
            .levels
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, l)| *l)
            .collect();
        let entry = groups.entry(key).or_insert((0.0, 0));
        entry.0 += obs.value;
        entry.1 += 1;
    }
    groups
}

/// Composite Simpson rule over `[a, b]` with an even number of intervals
#[allow(clippy::cast_precision_loss)]
fn simpson(a: f64, b: f64, intervals: usize, f: impl Fn(f64) -> f64) -> f64 {
    let h = (b - a) / intervals as f64;
    let mut sum = f(a) + f(b);
    for i in 1..intervals {
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * f((i as f64).mul_add(h, a));
    }
    sum * h / 3.0
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Range of `k` standard normals, i.e. the studentized range with known variance
#[allow(clippy::cast_precision_loss)]
fn normal_range_cdf(q: f64, k: usize) -> f64 {
    if q <= 0.0 {
        return 0.0;
    }
    let power = i32::try_from(k - 1).unwrap_or(i32::MAX);
    let integral = simpson(-8.0, 8.0, 400, |z| {
        normal_pdf(z) * (normal_cdf(z) - normal_cdf(z - q)).powi(power)
    });
    (k as f64 * integral).clamp(0.0, 1.0)
}

/// CDF of the studentized range for `k` groups and `df` error degrees of
/// freedom.
///
/// The known-variance range distribution is integrated against the density
/// of `s = sqrt(chi2(df) / df)`. Above 25 000 degrees of freedom (or with
/// `f64::INFINITY`) the known-variance form is returned directly.
#[must_use]
pub fn studentized_range_cdf(q: f64, k: usize, df: f64) -> f64 {
    if q.is_nan() || q <= 0.0 || k < 2 || df.is_nan() || df <= 0.0 {
        return 0.0;
    }
    if df > 25_000.0 {
        return normal_range_cdf(q, k);
    }

    let half = 0.5 * df;
    let log_norm = std::f64::consts::LN_2 + half * half.ln() - ln_gamma(half);
    let spread = 12.0 / (2.0 * df).sqrt();
    let integral = simpson((1.0 - spread).max(0.0), 1.0 + spread, 200, |s| {
        if s <= 0.0 {
            return 0.0;
        }
        let density = ((df - 1.0).mul_add(s.ln(), log_norm) - half * s * s).exp();
        density * normal_range_cdf(q * s, k)
    });
    integral.clamp(0.0, 1.0)
}

/// Quantile of the studentized range distribution, found by bisection
#[must_use]
pub fn studentized_range_quantile(p: f64, k: usize, df: f64) -> Option<f64> {
    if !(0.0..1.0).contains(&p) || k < 2 || df.is_nan() || df <= 0.0 {
        return None;
    }
    let mut hi = 2.0;
    while studentized_range_cdf(hi, k, df) < p {
        hi *= 2.0;
        if hi > 1.0e4 {
            return None;
        }
    }
    let mut lo = 0.0;
    while hi - lo > 1.0e-5 {
        let mid = 0.5 * (lo + hi);
        if studentized_range_cdf(mid, k, df) < p {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Some(0.5 * (lo + hi))
}

/// One pair of a Tukey HSD test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TukeyComparison {
    pub group1: String,
    pub group2: String,
    /// `mean(group2) - mean(group1)`
    pub meandiff: f64,
    #[serde(rename = "p-adj")]
    pub p_adj: f64,
    pub lower: f64,
    pub upper: f64,
    pub reject: bool,
}

/// Tukey's honestly significant difference test over every pair of groups.
///
/// The error term is the pooled within-group mean square on `N - k` degrees
/// of freedom. Unequal group sizes use the Tukey-Kramer standard error.
/// Pairs follow the order of `groups`; empty groups are ignored. When the
/// pooled variance is zero, equal means give `p-adj = 1` and different means
/// give `p-adj = 0`.
///
/// Returns `None` with fewer than two groups or no error degrees of freedom.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn tukey_hsd(groups: &[(String, Vec<f64>)], alpha: f64) -> Option<Vec<TukeyComparison>> {
    let groups: Vec<&(String, Vec<f64>)> = groups.iter().filter(|(_, v)| !v.is_empty()).collect();
    let k = groups.len();
    let n: usize = groups.iter().map(|(_, v)| v.len()).sum();
    if k < 2 || n <= k {
        return None;
    }

    let df = (n - k) as f64;
    let ss_within: f64 = groups
        .iter()
        .map(|(_, v)| {
            let mean = compute_mean(v);
            v.iter().map(|x| (x - mean).powi(2)).sum::<f64>()
        })
        .sum();
    let mse = ss_within / df;
    let q_crit = studentized_range_quantile(1.0 - alpha, k, df)?;

    let mut comparisons = Vec::with_capacity(k * (k - 1) / 2);
    for (i, (name1, v1)) in groups.iter().enumerate() {
        for (name2, v2) in &groups[i + 1..] {
            let meandiff = compute_mean(v2) - compute_mean(v1);
            let se = (mse / 2.0 * (1.0 / v1.len() as f64 + 1.0 / v2.len() as f64)).sqrt();
            let p_adj = if se > 0.0 {
                1.0 - studentized_range_cdf(meandiff.abs() / se, k, df)
            } else if meandiff.abs() < f64::EPSILON {
                1.0
            } else {
                0.0
            };
            let half_width = q_crit * se;
            comparisons.push(TukeyComparison {
                group1: name1.clone(),
                group2: name2.clone(),
                meandiff,
                p_adj: p_adj.clamp(0.0, 1.0),
                lower: meandiff - half_width,
                upper: meandiff + half_width,
                reject: meandiff.abs() > half_width,
            });
        }
    }
    Some(comparisons)
}

#[cfg(test)]
#[allow(
    clippy::float_cmp,
    clippy::suboptimal_flops,
    clippy::cast_precision_loss,
    clippy::unwrap_used
)]
mod tests {
    use super::*;

    fn factor(name: &str, levels: usize) -> Factor {
        Factor {
            name: name.to_string(),
            levels: (0..levels).map(|l| l.to_string()).collect(),
        }
    }

    fn obs(levels: &[usize], value: f64) -> Observation {
        Observation {
            levels: levels.to_vec(),
            value,
        }
    }

    #[test]
    fn test_compute_std() {
        let samples = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let std = compute_std(&samples);
        // Sample std for this data is ~2.138
        assert!(std > 2.0 && std < 2.2, "std = {std}");
    }

    #[test]
    fn test_compute_mean_empty() {
        assert!(compute_mean(&[]).abs() < f64::EPSILON);
        assert!(compute_std(&[5.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bootstrap_ci_reproducible() {
        let samples: Vec<f64> = (0..100).map(|i| 0.5 + (i as f64 * 0.004)).collect();
        let config = StatConfig::default();

        let (lower1, upper1) = bootstrap_ci(&samples, &config);
        let (lower2, upper2) = bootstrap_ci(&samples, &config);

        assert!((lower1 - lower2).abs() < f64::EPSILON);
        assert!((upper1 - upper2).abs() < f64::EPSILON);

        let mean = compute_mean(&samples);
        assert!(lower1 <= mean && upper1 >= mean);
    }

    #[test]
    fn test_bootstrap_ci_single_sample() {
        let (lower, upper) = bootstrap_ci(&[0.95], &StatConfig::default());
        assert!((lower - 0.95).abs() < f64::EPSILON);
        assert!((upper - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_welch_t_test_significant() {
        let samples_a: Vec<f64> = (0..50).map(|i| 0.95 + (i as f64 * 0.002)).collect();
        let samples_b: Vec<f64> = (0..50).map(|i| 0.75 + (i as f64 * 0.002)).collect();

        let result = welch_t_test(&samples_a, &samples_b, 0.05).unwrap();
        assert!(result.is_significant);
        assert!(result.p_value < 0.05);
        assert_eq!(result.effect_interpretation, "large");
    }

    #[test]
    fn test_welch_t_test_small_sample() {
        assert!(welch_t_test(&[0.9], &[0.8], 0.05).is_none());
    }

    #[test]
    fn test_bonferroni_correction() {
        assert!((bonferroni_correction(0.05, 5) - 0.01).abs() < f64::EPSILON);
        assert!((bonferroni_correction(0.05, 0) - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cohens_d_interpretation() {
        assert_eq!(interpret_cohens_d(0.1), "negligible");
        assert_eq!(interpret_cohens_d(0.3), "small");
        assert_eq!(interpret_cohens_d(0.6), "medium");
        assert_eq!(interpret_cohens_d(-0.9), "large");
    }

    #[test]
    fn test_quantile_sorted() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&sorted, 0.5), Some(2.5));
        assert_eq!(quantile_sorted(&sorted, 0.25), Some(1.75));
        assert_eq!(quantile_sorted(&sorted, 1.0), Some(4.0));
        assert_eq!(quantile_sorted(&[], 0.5), None);
    }

    #[test]
    fn test_box_stats_outliers() {
        let samples = [0.5, 0.6, 0.6, 0.7, 0.7, 0.7, 0.8, 0.0];
        let stats = BoxStats::from_samples(&samples).unwrap();
        assert_eq!(stats.count, 8);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 0.8);
        assert_eq!(stats.outliers, 1);
        assert_eq!(stats.whisker_low, 0.5);
        assert_eq!(stats.whisker_high, 0.8);
        assert!((stats.median - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_box_stats_empty() {
        assert!(BoxStats::from_samples(&[]).is_none());
        assert!(BoxStats::from_samples(&[f64::NAN]).is_none());
    }

    #[test]
    fn test_one_way_anova() {
        let factors = [factor("format", 2)];
        let observations = [
            obs(&[0], 1.0),
            obs(&[0], 2.0),
            obs(&[0], 3.0),
            obs(&[1], 4.0),
            obs(&[1], 5.0),
            obs(&[1], 6.0),
        ];
        let table = factorial_anova(&factors, &observations).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].effect, "C(format)");
        assert!((table[0].sum_sq - 13.5).abs() < 1e-9);
        assert!((table[0].f_value.unwrap() - 13.5).abs() < 1e-9);
        let p = table[0].p_value.unwrap();
        assert!(p > 0.015 && p < 0.03, "p = {p}");
        assert_eq!(table[1].effect, "Residual");
        assert!((table[1].sum_sq - 4.0).abs() < 1e-9);
        assert_eq!(table[1].df, 4.0);
    }

    #[test]
    fn test_two_way_anova_with_interaction() {
        let factors = [factor("model", 2), factor("shot", 2)];
        let observations = [
            obs(&[0, 0], 1.0),
            obs(&[0, 0], 3.0),
            obs(&[0, 1], 5.0),
            obs(&[0, 1], 7.0),
            obs(&[1, 0], 2.0),
            obs(&[1, 0], 4.0),
            obs(&[1, 1], 10.0),
            obs(&[1, 1], 12.0),
        ];
        let table = factorial_anova(&factors, &observations).unwrap();
        let effects: Vec<&str> = table.iter().map(|r| r.effect.as_str()).collect();
        assert_eq!(
            effects,
            vec!["C(model)", "C(shot)", "C(model):C(shot)", "Residual"]
        );
        let ss: Vec<f64> = table.iter().map(|r| r.sum_sq).collect();
        for (got, want) in ss.iter().zip([18.0, 72.0, 8.0, 8.0]) {
            assert!((got - want).abs() < 1e-9, "{got} != {want}");
        }
        assert!((table[0].f_value.unwrap() - 9.0).abs() < 1e-9);
        assert!((table[1].f_value.unwrap() - 36.0).abs() < 1e-9);
        assert!((table[2].f_value.unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_anova_drops_single_level_factor() {
        let factors = [factor("model", 1), factor("format", 2)];
        let observations = [
            obs(&[0, 0], 1.0),
            obs(&[0, 0], 2.0),
            obs(&[0, 1], 3.0),
            obs(&[0, 1], 5.0),
        ];
        let table = factorial_anova(&factors, &observations).unwrap();
        let effects: Vec<&str> = table.iter().map(|r| r.effect.as_str()).collect();
        assert_eq!(effects, vec!["C(format)", "Residual"]);
    }

    #[test]
    fn test_anova_rejects_unbalanced() {
        let factors = [factor("format", 2)];
        let observations = [obs(&[0], 1.0), obs(&[0], 2.0), obs(&[1], 3.0)];
        assert_eq!(
            factorial_anova(&factors, &observations).unwrap_err(),
            AnovaError::Unbalanced { min: 1, max: 2 }
        );
    }

    #[test]
    fn test_anova_rejects_missing_cell() {
        let factors = [factor("format", 3)];
        let observations = [obs(&[0], 1.0), obs(&[0], 2.0), obs(&[1], 3.0), obs(&[1], 4.0)];
        assert!(matches!(
            factorial_anova(&factors, &observations),
            Err(AnovaError::Unbalanced { min: 0, .. })
        ));
    }

    #[test]
    fn test_anova_no_residual() {
        let factors = [factor("format", 2)];
        let observations = [obs(&[0], 1.0), obs(&[1], 3.0)];
        assert_eq!(
            factorial_anova(&factors, &observations).unwrap_err(),
            AnovaError::NoResidualDf
        );
    }

    #[test]
    fn test_anova_bad_observation() {
        let factors = [factor("format", 2)];
        let observations = [obs(&[5], 1.0)];
        assert!(matches!(
            factorial_anova(&factors, &observations),
            Err(AnovaError::BadObservation { index: 0, .. })
        ));
    }

    #[test]
    fn test_studentized_range_two_groups_matches_t() {
        // With k = 2, P(range < q) = P(|T| < q / sqrt 2)
        for df in [5.0, 12.0, 40.0] {
            let t = StudentsT::new(0.0, 1.0, df).unwrap();
            for q in [1.0, 2.5, 4.0] {
                let expected = 1.0 - 2.0 * t.sf(q / std::f64::consts::SQRT_2);
                let got = studentized_range_cdf(q, 2, df);
                assert!((got - expected).abs() < 1e-4, "df {df} q {q}: {got} vs {expected}");
            }
        }
        let normal = studentized_range_cdf(2.772, 2, f64::INFINITY);
        assert!((normal - 0.95).abs() < 1e-3, "{normal}");
    }

    #[test]
    fn test_studentized_range_quantiles() {
        // Published 5% critical values
        let cases = [(3, 10.0, 3.877), (4, 20.0, 3.958), (2, 5.0, 3.635), (4, f64::INFINITY, 3.633)];
        for (k, df, expected) in cases {
            let q = studentized_range_quantile(0.95, k, df).unwrap();
            assert!((q - expected).abs() < 0.01, "k {k} df {df}: {q}");
        }
        assert!(studentized_range_quantile(0.95, 1, 10.0).is_none());
        assert!(studentized_range_quantile(1.0, 3, 10.0).is_none());
        assert_eq!(studentized_range_cdf(0.0, 3, 10.0), 0.0);
    }

    #[test]
    fn test_tukey_hsd_three_groups() {
        let groups = vec![
            ("a".to_string(), vec![1.0, 2.0, 3.0]),
            ("b".to_string(), vec![4.0, 5.0, 6.0]),
            ("c".to_string(), vec![7.0, 8.0, 9.0]),
        ];
        let table = tukey_hsd(&groups, 0.05).unwrap();
        let pairs: Vec<(&str, &str)> = table
            .iter()
            .map(|c| (c.group1.as_str(), c.group2.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "b"), ("a", "c"), ("b", "c")]);

        // MSE = 1 on 6 df; se = sqrt(1/3); q(0.95, 3, 6) = 4.339
        let ab = &table[0];
        assert_eq!(ab.meandiff, 3.0);
        assert!(((ab.upper - ab.lower) / 2.0 - 4.339 / 3.0_f64.sqrt()).abs() < 0.01);
        assert!(ab.p_adj > 0.001 && ab.p_adj < 0.05, "{}", ab.p_adj);
        assert!(ab.reject);
        assert!(table[1].p_adj < ab.p_adj);
    }

    #[test]
    fn test_tukey_hsd_unequal_sizes_and_no_difference() {
        let groups = vec![
            ("x".to_string(), vec![1.0, 2.0, 3.0, 2.0]),
            ("y".to_string(), vec![2.5, 1.5]),
        ];
        let table = tukey_hsd(&groups, 0.05).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table[0].meandiff.abs() < 1e-12);
        assert!(table[0].p_adj > 0.99);
        assert!(!table[0].reject);
        assert!(table[0].lower < 0.0 && table[0].upper > 0.0);
    }

    #[test]
    fn test_tukey_hsd_zero_variance_pairs_kept() {
        let groups = vec![
            ("x".to_string(), vec![1.0, 1.0]),
            ("y".to_string(), vec![1.0, 1.0]),
            ("z".to_string(), vec![0.5, 0.5]),
        ];
        let table = tukey_hsd(&groups, 0.05).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table[0].p_adj, 1.0);
        assert!(!table[0].reject);
        assert_eq!(table[1].p_adj, 0.0);
        assert!(table[1].reject);
    }

    #[test]
    fn test_tukey_hsd_degenerate() {
        assert!(tukey_hsd(&[("only".to_string(), vec![1.0, 2.0])], 0.05).is_none());
        let one_each = vec![("a".to_string(), vec![1.0]), ("b".to_string(), vec![2.0])];
        assert!(tukey_hsd(&one_each, 0.05).is_none());
    }
}
