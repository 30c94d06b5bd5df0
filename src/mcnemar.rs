/*!
McNemar's test over the paired disagreement counts of a contingency table:
given how often only one of two annotators matched a shared truth, is the
difference between the two annotators significant?

Small samples (fewer than 25 disagreements) use an exact two-sided binomial
test and report no chi-square statistic. Larger samples use the chi-square
approximation with one degree of freedom, optionally continuity-corrected.
*/
use crate::agree::ContingencyTable;
use serde::Serialize;
use statrs::distribution::{Binomial, ChiSquared, ContinuousCDF, Discrete, DiscreteCDF};

/// Below this many total disagreements, the chi-square approximation is not
/// trustworthy and the exact binomial test is used instead.
const EXACT_TEST_CUTOFF: usize = 25;

/// The outcome of one McNemar test. `statistic` is `None` on the exact
/// binomial path, where no chi-square statistic exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct McNemarResult {
    pub statistic: Option<f64>,
    pub p_value: f64,
}

/// Runs McNemar's test on the paired disagreement counts `b` (only the first
/// annotator was correct) and `c` (only the second annotator was correct).
pub fn mcnemar(b: usize, c: usize, continuity_correction: bool) -> McNemarResult {
    let (n_min, n_max) = if b <= c { (b, c) } else { (c, b) };
    let total = n_min + n_max;

    if total < EXACT_TEST_CUTOFF {
        // Exact two-sided binomial test under the null hypothesis that each
        // disagreement is equally likely to fall on either side.
        let binomial =
            Binomial::new(0.5, total as u64).expect("0.5 is always a valid probability");
        let successes = n_min as u64;
        let p_value = 2.0 * binomial.cdf(successes) - binomial.pmf(successes);
        McNemarResult {
            statistic: None,
            p_value,
        }
    } else {
        let correction = if continuity_correction { 1.0 } else { 0.0 };
        let statistic = ((n_max - n_min) as f64 - correction).powi(2) / total as f64;
        let chi_squared = ChiSquared::new(1.0).expect("1 degree of freedom is always valid");
        let p_value = 1.0 - chi_squared.cdf(statistic);
        McNemarResult {
            statistic: Some(statistic),
            p_value,
        }
    }
}

/// Runs McNemar's test on a contingency table, taking `b` and `c` from the
/// one-sided disagreement cells.
pub fn mcnemar_from_table(
    table: &ContingencyTable,
    continuity_correction: bool,
) -> McNemarResult {
    mcnemar(
        table.only_first.len(),
        table.only_second.len(),
        continuity_correction,
    )
}
