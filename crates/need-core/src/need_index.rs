//! Composite need index built from cluster covariates.
//!
//! Each selected covariate is min-max scaled to [0,1] (inverted when its
//! polarity is `Inverse`), then combined as Σ wᵢ·fᵢ / Σ wᵢ. A cluster
//! missing a value in any present covariate gets no composite and is filled
//! with the median afterwards.

use crate::config::{CovariateSpec, Polarity};
use crate::tables::CovariateTable;

/// Min-max scale to [0,1]. Missing entries stay missing. A column with no
/// values, or a constant one, scales to all zeros and is flagged degenerate.
pub fn min_max(values: &[Option<f64>]) -> (Vec<Option<f64>>, bool) {
    let (lo, hi) = values.iter().flatten().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    });
    if !(lo.is_finite() && hi.is_finite()) || lo == hi {
        return (vec![Some(0.0); values.len()], true);
    }
    let span = hi - lo;
    (values.iter().map(|v| v.map(|x| (x - lo) / span)).collect(), false)
}

/// `1 − min_max`, for covariates where a higher raw value means less need.
/// A degenerate column scales to zeros first, so it inverts to all ones.
pub fn inverse_min_max(values: &[Option<f64>]) -> (Vec<Option<f64>>, bool) {
    let (scaled, degenerate) = min_max(values);
    (scaled.into_iter().map(|v| v.map(|x| 1.0 - x)).collect(), degenerate)
}

/// Median of the present values (mean of the two middle values for even
/// counts).
pub fn median(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut v: Vec<f64> = values.into_iter().filter(|x| !x.is_nan()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    Some(if v.len() % 2 == 0 { (v[mid - 1] + v[mid]) / 2.0 } else { v[mid] })
}

/// Per-cluster need index, aligned with the covariate table rows.
#[derive(Debug, Clone, PartialEq)]
pub struct NeedIndex {
    pub cluster_ids: Vec<String>,
    pub values: Vec<f64>,
    /// Covariates that were absent, empty or constant.
    pub degenerate: Vec<String>,
    /// True when the composite had nothing usable and every cluster got 1.0.
    pub uniform: bool,
}

impl NeedIndex {
    pub fn lookup(&self) -> std::collections::HashMap<&str, f64> {
        self.cluster_ids.iter().map(String::as_str).zip(self.values.iter().copied()).collect()
    }
}

pub struct NeedIndexBuilder<'a> {
    covariates: &'a [CovariateSpec],
}

impl<'a> NeedIndexBuilder<'a> {
    pub fn new(covariates: &'a [CovariateSpec]) -> Self {
        Self { covariates }
    }

    /// Weighted composite before the fallback chain. `None` marks clusters
    /// missing a value in a present covariate.
    pub fn composite(&self, table: &CovariateTable) -> (Vec<Option<f64>>, Vec<String>) {
        let n = table.len();
        let total_weight: f64 = self.covariates.iter().map(|c| c.weight).sum();
        let mut acc: Vec<Option<f64>> = vec![Some(0.0); n];
        let mut degenerate = Vec::new();

        let absent: Vec<Option<f64>> = vec![None; n];
        for cov in self.covariates {
            // An absent column scales like a fully missing one.
            let col = table.column(&cov.name).unwrap_or(absent.as_slice());
            let (scaled, is_degenerate) = match cov.polarity {
                Polarity::Direct => min_max(col),
                Polarity::Inverse => inverse_min_max(col),
            };
            if is_degenerate {
                tracing::warn!(
                    covariate = %cov.name,
                    polarity = ?cov.polarity,
                    "covariate is absent, empty or constant; contributes a constant"
                );
                degenerate.push(cov.name.clone());
            }
            for (a, s) in acc.iter_mut().zip(scaled) {
                *a = match (*a, s) {
                    (Some(sum), Some(x)) => Some(sum + cov.weight * x),
                    _ => None,
                };
            }
        }

        if total_weight > 0.0 {
            for a in acc.iter_mut().flatten() {
                *a /= total_weight;
            }
        }
        (acc, degenerate)
    }

    /// Composite plus the fallback chain: all missing or nothing positive
    /// → uniform 1.0; otherwise median-fill gaps, then lift exact zeros to
    /// the smallest positive value.
    pub fn build(&self, table: &CovariateTable) -> NeedIndex {
        let (composite, degenerate) = self.composite(table);
        let unused: Vec<&str> = table
            .column_names()
            .iter()
            .map(String::as_str)
            .filter(|c| !self.covariates.iter().any(|cov| cov.name == *c))
            .collect();
        if !unused.is_empty() {
            tracing::debug!(?unused, "covariate table columns not used by the need index");
        }
        let (values, uniform) = finalize(&composite);
        if uniform {
            tracing::warn!(
                clusters = values.len(),
                "need index has no usable signal; using uniform 1.0"
            );
        }
        tracing::info!(
            clusters = values.len(),
            degenerate = degenerate.len(),
            "need index built"
        );
        NeedIndex { cluster_ids: table.cluster_ids.clone(), values, degenerate, uniform }
    }
}

fn finalize(composite: &[Option<f64>]) -> (Vec<f64>, bool) {
    let uniform = || (vec![1.0; composite.len()], true);

    let Some(fill) = median(composite.iter().flatten().copied()) else {
        return uniform();
    };
    let filled: Vec<f64> = composite.iter().map(|v| v.unwrap_or(fill)).collect();

    let smallest_positive =
        filled.iter().copied().filter(|&v| v > 0.0).fold(f64::INFINITY, f64::min);
    if !smallest_positive.is_finite() {
        return uniform();
    }
    let values = filled.into_iter().map(|v| if v == 0.0 { smallest_positive } else { v }).collect();
    (values, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table(cols: Vec<(&str, Vec<Option<f64>>)>) -> CovariateTable {
        let n = cols.first().map(|(_, c)| c.len()).unwrap_or(0);
        let ids = (0..n).map(|i| format!("C{i}")).collect();
        CovariateTable::new(ids, cols.into_iter().map(|(n, c)| (n.to_string(), c)).collect())
    }

    #[test]
    fn min_max_scales() {
        let (v, deg) = min_max(&[Some(2.0), Some(4.0), None, Some(6.0)]);
        assert!(!deg);
        assert_eq!(v, vec![Some(0.0), Some(0.5), None, Some(1.0)]);
    }

    #[test]
    fn constant_column_is_zero_not_nan() {
        let (v, deg) = min_max(&[Some(3.0), Some(3.0), Some(3.0)]);
        assert!(deg);
        assert_eq!(v, vec![Some(0.0); 3]);

        let (v, deg) = inverse_min_max(&[Some(3.0), Some(3.0)]);
        assert!(deg);
        assert_eq!(v, vec![Some(1.0); 2]);

        let (v, deg) = inverse_min_max(&[None, None]);
        assert!(deg);
        assert_eq!(v, vec![Some(1.0); 2]);
    }

    #[test]
    fn all_missing_column_is_zero() {
        let (v, deg) = min_max(&[None, None]);
        assert!(deg);
        assert_eq!(v, vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn inverse_flips() {
        let (v, _) = inverse_min_max(&[Some(0.0), Some(10.0), Some(5.0)]);
        assert_eq!(v, vec![Some(1.0), Some(0.0), Some(0.5)]);
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median([3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median([4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(std::iter::empty::<f64>()), None);
    }

    #[test]
    fn weighted_composite_normalises_by_weight() {
        let t = table(vec![
            ("pop", vec![Some(0.0), Some(100.0)]),
            ("night", vec![Some(0.0), Some(1.0)]),
        ]);
        let specs = vec![CovariateSpec::direct("pop", 3.0), CovariateSpec::inverse("night", 1.0)];
        let (c, deg) = NeedIndexBuilder::new(&specs).composite(&t);
        assert!(deg.is_empty());
        // C0: pop 0, dark 1 → 1/4; C1: pop 1, dark 0 → 3/4
        assert_relative_eq!(c[0].unwrap(), 0.25);
        assert_relative_eq!(c[1].unwrap(), 0.75);
    }

    #[test]
    fn entirely_missing_covariate_gives_uniform_one() {
        let t = table(vec![("malaria", vec![None, None, None])]);
        let specs = vec![CovariateSpec::direct("malaria", 1.0)];
        let idx = NeedIndexBuilder::new(&specs).build(&t);
        assert_eq!(idx.values, vec![1.0, 1.0, 1.0]);
        assert!(idx.uniform);
        assert_eq!(idx.degenerate, vec!["malaria".to_string()]);
    }

    #[test]
    fn constant_inverse_covariate_adds_its_full_weight() {
        let t = table(vec![
            ("pop", vec![Some(0.0), Some(10.0)]),
            ("night", vec![Some(5.0), Some(5.0)]),
        ]);
        let specs = vec![CovariateSpec::direct("pop", 0.9), CovariateSpec::inverse("night", 0.1)];
        let idx = NeedIndexBuilder::new(&specs).build(&t);
        assert_eq!(idx.degenerate, vec!["night".to_string()]);
        // C0: 0.9·0 + 0.1·1, C1: 0.9·1 + 0.1·1; ranking kept at 1:10
        assert_relative_eq!(idx.values[0], 0.1);
        assert_relative_eq!(idx.values[1], 1.0);
    }

    #[test]
    fn absent_inverse_covariate_counts_as_all_missing() {
        let t = table(vec![("pop", vec![Some(0.0), Some(4.0)])]);
        let specs = vec![CovariateSpec::direct("pop", 0.5), CovariateSpec::inverse("night", 0.5)];
        let idx = NeedIndexBuilder::new(&specs).build(&t);
        assert_eq!(idx.degenerate, vec!["night".to_string()]);
        assert_relative_eq!(idx.values[0], 0.5);
        assert_relative_eq!(idx.values[1], 1.0);
    }

    #[test]
    fn absent_covariate_is_degenerate() {
        let t = table(vec![("pop", vec![Some(1.0), Some(2.0)])]);
        let specs = vec![CovariateSpec::direct("pop", 0.5), CovariateSpec::direct("travel", 0.5)];
        let idx = NeedIndexBuilder::new(&specs).build(&t);
        assert_eq!(idx.degenerate, vec!["travel".to_string()]);
        assert!(!idx.uniform);
        // C0 composite 0 → lifted to smallest positive (C1 = 0.5)
        assert_eq!(idx.values, vec![0.5, 0.5]);
    }

    #[test]
    fn missing_rows_are_median_filled_and_zeros_lifted() {
        let t = table(vec![("pop", vec![Some(0.0), Some(5.0), None, Some(10.0), Some(7.5)])]);
        let specs = vec![CovariateSpec::direct("pop", 1.0)];
        let idx = NeedIndexBuilder::new(&specs).build(&t);
        // scaled: 0, .5, None, 1, .75 → median of present = .625
        // zero lifted to smallest positive = .5
        assert_relative_eq!(idx.values[0], 0.5);
        assert_relative_eq!(idx.values[1], 0.5);
        assert_relative_eq!(idx.values[2], 0.625);
        assert_relative_eq!(idx.values[3], 1.0);
        assert_relative_eq!(idx.values[4], 0.75);
        assert!(idx.values.iter().all(|&v| v > 0.0 && v <= 1.0));
    }

    #[test]
    fn index_stays_in_unit_interval() {
        let t = table(vec![
            ("a", vec![Some(1.0), Some(9.0), Some(4.0), Some(2.0)]),
            ("b", vec![Some(-3.0), Some(0.0), Some(8.0), None]),
            ("c", vec![Some(5.0), Some(5.0), Some(5.0), Some(5.0)]),
        ]);
        let specs = vec![
            CovariateSpec::direct("a", 2.0),
            CovariateSpec::inverse("b", 0.7),
            CovariateSpec::direct("c", 0.4),
        ];
        let idx = NeedIndexBuilder::new(&specs).build(&t);
        assert_eq!(idx.values.len(), 4);
        for v in &idx.values {
            assert!(v.is_finite() && *v > 0.0 && *v <= 1.0, "value {v}");
        }
        assert_eq!(idx.degenerate, vec!["c".to_string()]);
    }

    #[test]
    fn lookup_by_cluster() {
        let t = table(vec![("pop", vec![Some(1.0), Some(3.0)])]);
        let specs = vec![CovariateSpec::direct("pop", 1.0)];
        let idx = NeedIndexBuilder::new(&specs).build(&t);
        let lookup = idx.lookup();
        assert_eq!(lookup.get("C1"), Some(&1.0));
        assert_eq!(lookup.get("nope"), None);
        // C0 scales to zero and is lifted to the smallest positive value
        assert_eq!(lookup["C0"], 1.0);
    }

    #[test]
    fn empty_table() {
        let specs = vec![CovariateSpec::direct("pop", 1.0)];
        let idx = NeedIndexBuilder::new(&specs).build(&CovariateTable::default());
        assert!(idx.values.is_empty());
    }
}
