/// Natural-breaks (Fisher-Jenks) classification of a value vector.
///
/// Exact dynamic-programming optimum: the sorted values are cut into
/// contiguous runs minimising the total within-class sum of squared
/// deviations. Boundaries are the lowest value of each run, and a value
/// belongs to the last class whose lower edge it reaches.

#[derive(Debug, Clone, PartialEq)]
pub struct NaturalBreaks {
    lower_edges: Vec<f64>,
    upper: f64,
}

/// Number of distinct finite values.
pub fn distinct_count(values: &[f64]) -> usize {
    let mut sorted = sorted_finite(values);
    sorted.dedup();
    sorted.len()
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

impl NaturalBreaks {
    /// Optimal `n_classes` partition, or `None` when there are fewer distinct
    /// values than classes. Input order does not matter.
    pub fn compute(values: &[f64], n_classes: usize) -> Option<Self> {
        if n_classes == 0 || distinct_count(values) < n_classes {
            return None;
        }
        let sorted = sorted_finite(values);
        let n = sorted.len();

        // prefix sums for O(1) within-run sum of squares
        let mut sum = vec![0.0; n + 1];
        let mut sum_sq = vec![0.0; n + 1];
        for (i, v) in sorted.iter().enumerate() {
            sum[i + 1] = sum[i] + v;
            sum_sq[i + 1] = sum_sq[i] + v * v;
        }
        let ssd = |from: usize, to: usize| {
            let count = (to - from) as f64;
            let s = sum[to] - sum[from];
            (sum_sq[to] - sum_sq[from] - s * s / count).max(0.0)
        };

        // cost[k][j]: best cost of splitting sorted[..j] into k + 1 runs
        // start[k][j]: where the last of those runs begins
        let mut cost = vec![vec![f64::INFINITY; n + 1]; n_classes];
        let mut start = vec![vec![0usize; n + 1]; n_classes];
        for j in 1..=n {
            cost[0][j] = ssd(0, j);
        }
        for k in 1..n_classes {
            for j in (k + 1)..=n {
                for i in k..j {
                    let candidate = cost[k - 1][i] + ssd(i, j);
                    // strict: the earliest cut wins ties
                    if candidate < cost[k][j] {
                        cost[k][j] = candidate;
                        start[k][j] = i;
                    }
                }
            }
        }

        let mut lower_edges = vec![0.0; n_classes];
        let mut end = n;
        for k in (0..n_classes).rev() {
            let begin = if k == 0 { 0 } else { start[k][end] };
            lower_edges[k] = sorted[begin];
            end = begin;
        }

        Some(NaturalBreaks {
            lower_edges,
            upper: sorted[n - 1],
        })
    }

    /// Lowest value of each class, ascending.
    pub fn lower_edges(&self) -> &[f64] {
        &self.lower_edges
    }

    /// Largest value seen when the breaks were computed.
    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn n_classes(&self) -> usize {
        self.lower_edges.len()
    }

    /// Class of `value`, counting from zero. `None` below the first edge.
    pub fn class_index(&self, value: f64) -> Option<usize> {
        if !value.is_finite() {
            return None;
        }
        self.lower_edges.iter().rposition(|edge| value >= *edge)
    }
}
