/// 分割表に対するカイ二乗独立性検定。
use std::f64::consts::PI;

use serde::Serialize;

const MAX_ITERATIONS: usize = 500;
const EPSILON: f64 = 1e-14;
const TINY: f64 = 1e-300;

/// Lanczos近似の係数（g = 7, n = 9）。
const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// ln Γ(x)。
#[must_use]
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // 反射公式
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + 7.5;
    let series = LANCZOS
        .iter()
        .enumerate()
        .skip(1)
        .fold(LANCZOS[0], |acc, (i, coefficient)| {
            #[allow(clippy::cast_precision_loss)]
            let offset = i as f64;
            acc + coefficient / (x + offset)
        });
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// 正則化上側不完全ガンマ関数 Q(a, x)。
#[must_use]
pub fn regularized_upper_gamma(a: f64, x: f64) -> f64 {
    if x <= 0.0 || a <= 0.0 {
        return 1.0;
    }
    if x < a + 1.0 {
        1.0 - lower_series(a, x)
    } else {
        upper_continued_fraction(a, x)
    }
}

fn prefactor(a: f64, x: f64) -> f64 {
    (-x + a * x.ln() - ln_gamma(a)).exp()
}

/// P(a, x) の級数展開。
fn lower_series(a: f64, x: f64) -> f64 {
    let mut denominator = a;
    let mut term = 1.0 / a;
    let mut sum = term;
    for _ in 0..MAX_ITERATIONS {
        denominator += 1.0;
        term *= x / denominator;
        sum += term;
        if term.abs() < sum.abs() * EPSILON {
            break;
        }
    }
    (sum * prefactor(a, x)).clamp(0.0, 1.0)
}

/// Q(a, x) の連分数展開（修正Lentz法）。
fn upper_continued_fraction(a: f64, x: f64) -> f64 {
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..MAX_ITERATIONS {
        #[allow(clippy::cast_precision_loss)]
        let i = i as f64;
        let an = -i * (i - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    (prefactor(a, x) * h).clamp(0.0, 1.0)
}

/// 自由度 `dof` のカイ二乗分布の上側確率。
#[must_use]
pub fn chi_square_p_value(statistic: f64, dof: usize) -> f64 {
    if dof == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let half_dof = dof as f64 / 2.0;
    regularized_upper_gamma(half_dof, statistic / 2.0)
}

/// 行・列ラベル付きの度数表。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContingencyTable {
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    pub counts: Vec<Vec<u64>>,
}

impl ContingencyTable {
    #[must_use]
    pub fn new(rows: Vec<String>, columns: Vec<String>, counts: Vec<Vec<u64>>) -> Self {
        Self {
            rows,
            columns,
            counts,
        }
    }

    fn row_totals(&self) -> Vec<u64> {
        self.counts.iter().map(|row| row.iter().sum()).collect()
    }

    fn column_totals(&self) -> Vec<u64> {
        (0..self.columns.len())
            .map(|j| self.counts.iter().map(|row| row.get(j).copied().unwrap_or(0)).sum())
            .collect()
    }

    /// 合計が0の行・列を取り除く。
    #[must_use]
    pub fn without_empty(&self) -> Self {
        let row_totals = self.row_totals();
        let column_totals = self.column_totals();
        let keep_columns: Vec<usize> = (0..self.columns.len())
            .filter(|&j| column_totals[j] > 0)
            .collect();

        let mut rows = Vec::new();
        let mut counts = Vec::new();
        for (i, label) in self.rows.iter().enumerate() {
            if row_totals[i] == 0 {
                continue;
            }
            rows.push(label.clone());
            counts.push(keep_columns.iter().map(|&j| self.counts[i][j]).collect());
        }
        Self {
            rows,
            columns: keep_columns.iter().map(|&j| self.columns[j].clone()).collect(),
            counts,
        }
    }
}

/// 検定結果。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChiSquareResult {
    pub statistic: f64,
    pub dof: usize,
    pub p_value: f64,
    pub cramers_v: f64,
    pub total: u64,
    /// 期待度数が5未満のセル数（近似の妥当性の目安）
    pub low_expected_cells: usize,
    pub table: ContingencyTable,
}

/// カイ二乗独立性検定。空の行・列を除いたあと2×2に満たなければ `None`。
#[must_use]
pub fn chi_square_test(table: &ContingencyTable) -> Option<ChiSquareResult> {
    let table = table.without_empty();
    let (r, c) = (table.rows.len(), table.columns.len());
    if r < 2 || c < 2 {
        return None;
    }

    let row_totals = table.row_totals();
    let column_totals = table.column_totals();
    let total: u64 = row_totals.iter().sum();
    #[allow(clippy::cast_precision_loss)]
    let n = total as f64;

    let mut statistic = 0.0;
    let mut low_expected_cells = 0;
    for (i, row) in table.counts.iter().enumerate() {
        for (j, &observed) in row.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let expected = row_totals[i] as f64 * column_totals[j] as f64 / n;
            if expected < 5.0 {
                low_expected_cells += 1;
            }
            #[allow(clippy::cast_precision_loss)]
            let diff = observed as f64 - expected;
            statistic += diff * diff / expected;
        }
    }

    let dof = (r - 1) * (c - 1);
    #[allow(clippy::cast_precision_loss)]
    let min_dim = (r.min(c) - 1) as f64;
    Some(ChiSquareResult {
        statistic,
        dof,
        p_value: chi_square_p_value(statistic, dof),
        cramers_v: (statistic / (n * min_dim)).sqrt(),
        total,
        low_expected_cells,
        table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() < tolerance
    }

    #[rstest]
    #[case(1.0, 0.0)]
    #[case(5.0, 24.0_f64.ln())]
    #[case(0.5, PI.sqrt().ln())]
    fn ln_gamma_matches_known_values(#[case] x: f64, #[case] expected: f64) {
        assert!(close(ln_gamma(x), expected, 1e-10), "ln_gamma({x}) = {}", ln_gamma(x));
    }

    #[rstest]
    #[case(3.841_458_820_694_124, 1, 0.05)]
    #[case(5.991_464_547_107_979, 2, 0.05)]
    #[case(6.634_896_601_021_214, 1, 0.01)]
    #[case(0.0, 3, 1.0)]
    fn p_values_match_critical_values(#[case] statistic: f64, #[case] dof: usize, #[case] expected: f64) {
        let p = chi_square_p_value(statistic, dof);
        assert!(close(p, expected, 1e-6), "p = {p}");
    }

    #[test]
    fn two_by_two_table() {
        let table = ContingencyTable::new(
            vec!["a".into(), "b".into()],
            vec!["x".into(), "y".into()],
            vec![vec![10, 20], vec![30, 40]],
        );
        let result = chi_square_test(&table).expect("testable");
        // 期待度数 12, 18, 28, 42
        let expected_stat = 4.0 / 12.0 + 4.0 / 18.0 + 4.0 / 28.0 + 4.0 / 42.0;
        assert!(close(result.statistic, expected_stat, 1e-9));
        assert_eq!(result.dof, 1);
        assert_eq!(result.total, 100);
        assert!(close(result.cramers_v, (expected_stat / 100.0).sqrt(), 1e-9));
        assert!(result.p_value > 0.3 && result.p_value < 0.4);
        assert_eq!(result.low_expected_cells, 0);
    }

    #[test]
    fn empty_rows_and_columns_are_dropped() {
        let table = ContingencyTable::new(
            vec!["a".into(), "b".into(), "empty".into()],
            vec!["x".into(), "never".into(), "y".into()],
            vec![vec![3, 0, 1], vec![1, 0, 3], vec![0, 0, 0]],
        );
        let result = chi_square_test(&table).expect("testable");
        assert_eq!(result.table.rows, ["a", "b"]);
        assert_eq!(result.table.columns, ["x", "y"]);
        assert_eq!(result.low_expected_cells, 4);
    }

    #[test]
    fn single_column_is_not_testable() {
        let table = ContingencyTable::new(
            vec!["a".into(), "b".into()],
            vec!["x".into()],
            vec![vec![3], vec![4]],
        );
        assert!(chi_square_test(&table).is_none());
    }
}
