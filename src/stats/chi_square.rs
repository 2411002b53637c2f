//! Chi-square test of homogeneity over a 2×k success/failure table

use super::distributions::chi_square_upper_tail;
use super::{TestStatistic, MIN_EXPECTED_CELL};

/// One column of the contingency table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableColumn {
    /// Successes observed (may be fractional for continuous metrics)
    pub successes: f64,
    /// Total observations
    pub total: f64,
}

/// Pearson chi-square over all `2k` cells, `df = k - 1`.
///
/// Expected counts come from the pooled success rate. When every
/// variant has the same proportion (including all-zero and
/// all-success tables) the statistic is 0 and the p-value 1. Expected
/// cells below 5 set `low_power_warning` but do not stop the test.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn chi_square_test(columns: &[TableColumn]) -> TestStatistic {
    if columns.len() < 2 {
        return TestStatistic::undetermined("chi-square requires at least 2 variants");
    }
    if columns
        .iter()
        .any(|c| !(c.total > 0.0) || c.successes < 0.0 || c.successes > c.total)
    {
        return TestStatistic::undetermined(
            "chi-square requires positive totals and successes within [0, total]",
        );
    }

    let grand_total: f64 = columns.iter().map(|c| c.total).sum();
    let total_successes: f64 = columns.iter().map(|c| c.successes).sum();
    let pooled = total_successes / grand_total;
    let df = (columns.len() - 1) as f64;

    let mut statistic = 0.0;
    let mut low_power = false;
    for column in columns {
        let expected_success = column.total * pooled;
        let expected_failure = column.total - expected_success;
        let observed_failure = column.total - column.successes;

        for (observed, expected) in [
            (column.successes, expected_success),
            (observed_failure, expected_failure),
        ] {
            if expected < MIN_EXPECTED_CELL {
                low_power = true;
            }
            if expected > 0.0 {
                statistic += (observed - expected).powi(2) / expected;
            }
        }
    }

    match chi_square_upper_tail(statistic, df) {
        Some(p_value) => TestStatistic {
            statistic: Some(statistic),
            degrees_of_freedom: Some(df),
            p_value: Some(p_value),
            low_power_warning: low_power,
            reason: None,
        },
        None => TestStatistic::undetermined("chi-square statistic is not a number"),
    }
}
