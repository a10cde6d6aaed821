// THEORY:
// Detection-to-track association is a rectangular minimum-cost bipartite
// matching. Rows are tracks, columns are detections, and the Kuhn-Munkres
// (Hungarian) method with row/column potentials finds the assignment of least
// total cost in O(n² m).
//
// Algorithm steps:
// 1.  **Gating**: any cost above the gate is replaced by a large constant, so
//     the solver may still pick it when nothing else is left, and such pairs
//     are then discarded. A gated pair is never returned.
// 2.  **Solve**: potentials-based Hungarian over the (possibly transposed)
//     matrix so that rows never outnumber columns.
// 3.  **Tie resolution**: the solver breaks exact ties by column order, which
//     is an artifact of its scan. A post pass rebinds a row to an unclaimed
//     detection of identical cost when that detection has higher confidence,
//     or equal confidence and a lower index. Total cost is unchanged.
// 4.  **Ambiguity report**: ties that confidence could not separate are
//     returned so the caller can record them.

const GATED_COST: f64 = 1.0e9;
const TIE_EPSILON: f64 = 1.0e-9;

/// Result of one association round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    /// `(row, column)` pairs, sorted by row.
    pub pairs: Vec<(usize, usize)>,
    pub unmatched_rows: Vec<usize>,
    pub unmatched_columns: Vec<usize>,
    /// Rows whose binding was decided by column index alone, with every tied
    /// column (the bound one included), ascending.
    pub ambiguities: Vec<(usize, Vec<usize>)>,
}

/// Minimum-cost assignment of rows to columns under a gate.
///
/// `costs` is row-major with one row per track; `confidences` holds one entry
/// per column.
pub fn assign(costs: &[Vec<f64>], confidences: &[f64], gate: f64) -> Assignment {
    let rows = costs.len();
    let columns = confidences.len();

    let gated: Vec<Vec<f64>> = costs
        .iter()
        .map(|row| {
            row.iter()
                .map(|&cost| if cost.is_finite() && cost <= gate { cost } else { GATED_COST })
                .collect()
        })
        .collect();

    let mut by_row = hungarian(&gated, columns);
    for (row, column) in by_row.iter_mut().enumerate() {
        if let Some(c) = *column {
            if gated[row][c] >= GATED_COST {
                *column = None;
            }
        }
    }

    prefer_confident_ties(&gated, confidences, &mut by_row);
    let ambiguities = unresolved_ties(&gated, confidences, &by_row);

    let mut claimed = vec![false; columns];
    let mut pairs = Vec::new();
    let mut unmatched_rows = Vec::new();
    for (row, column) in by_row.iter().enumerate() {
        match column {
            Some(c) => {
                claimed[*c] = true;
                pairs.push((row, *c));
            }
            None => unmatched_rows.push(row),
        }
    }
    let unmatched_columns = (0..columns).filter(|c| !claimed[*c]).collect();

    debug_assert_eq!(pairs.len() + unmatched_rows.len(), rows);
    Assignment {
        pairs,
        unmatched_rows,
        unmatched_columns,
        ambiguities,
    }
}

/// Kuhn-Munkres with potentials. Returns the chosen column for every row.
fn hungarian(costs: &[Vec<f64>], columns: usize) -> Vec<Option<usize>> {
    let rows = costs.len();
    if rows == 0 || columns == 0 {
        return vec![None; rows];
    }
    if rows > columns {
        let transposed: Vec<Vec<f64>> = (0..columns)
            .map(|c| (0..rows).map(|r| costs[r][c]).collect())
            .collect();
        let by_column = hungarian(&transposed, rows);
        let mut by_row = vec![None; rows];
        for (column, row) in by_column.into_iter().enumerate() {
            if let Some(r) = row {
                by_row[r] = Some(column);
            }
        }
        return by_row;
    }

    // 1-based indices; slot 0 is the virtual root of each augmenting search.
    let mut u = vec![0.0; rows + 1];
    let mut v = vec![0.0; columns + 1];
    let mut owner = vec![0usize; columns + 1];
    let mut way = vec![0usize; columns + 1];

    for row in 1..=rows {
        owner[0] = row;
        let mut j0 = 0;
        let mut min_slack = vec![f64::INFINITY; columns + 1];
        let mut used = vec![false; columns + 1];
        loop {
            used[j0] = true;
            let i0 = owner[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=columns {
                if used[j] {
                    continue;
                }
                let slack = costs[i0 - 1][j - 1] - u[i0] - v[j];
                if slack < min_slack[j] {
                    min_slack[j] = slack;
                    way[j] = j0;
                }
                if min_slack[j] < delta {
                    delta = min_slack[j];
                    j1 = j;
                }
            }
            for j in 0..=columns {
                if used[j] {
                    u[owner[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_slack[j] -= delta;
                }
            }
            j0 = j1;
            if owner[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            owner[j0] = owner[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut by_row = vec![None; rows];
    for column in 1..=columns {
        if owner[column] != 0 {
            by_row[owner[column] - 1] = Some(column - 1);
        }
    }
    by_row
}

fn same_cost(a: f64, b: f64) -> bool {
    (a - b).abs() <= TIE_EPSILON
}

/// Whether column `a` should win a cost tie against column `b`.
fn preferred(confidences: &[f64], a: usize, b: usize) -> bool {
    let (ca, cb) = (confidences[a], confidences[b]);
    if same_cost(ca, cb) { a < b } else { ca > cb }
}

fn prefer_confident_ties(costs: &[Vec<f64>], confidences: &[f64], by_row: &mut [Option<usize>]) {
    let columns = confidences.len();
    let mut claimed = vec![false; columns];
    for column in by_row.iter().flatten() {
        claimed[*column] = true;
    }

    // Each rebinding strictly improves one row's column, so this terminates.
    let mut changed = true;
    while changed {
        changed = false;
        for row in 0..by_row.len() {
            let Some(current) = by_row[row] else { continue };
            let cost = costs[row][current];
            let mut best = current;
            for candidate in 0..columns {
                if claimed[candidate] || !same_cost(costs[row][candidate], cost) {
                    continue;
                }
                if preferred(confidences, candidate, best) {
                    best = candidate;
                }
            }
            if best != current {
                claimed[current] = false;
                claimed[best] = true;
                by_row[row] = Some(best);
                changed = true;
            }
        }
    }
}

fn unresolved_ties(
    costs: &[Vec<f64>],
    confidences: &[f64],
    by_row: &[Option<usize>],
) -> Vec<(usize, Vec<usize>)> {
    let mut claimed = vec![false; confidences.len()];
    for column in by_row.iter().flatten() {
        claimed[*column] = true;
    }

    let mut ambiguities = Vec::new();
    for (row, column) in by_row.iter().enumerate() {
        let Some(bound) = *column else { continue };
        let tied: Vec<usize> = (0..confidences.len())
            .filter(|&c| {
                c == bound
                    || (!claimed[c]
                        && same_cost(costs[row][c], costs[row][bound])
                        && same_cost(confidences[c], confidences[bound]))
            })
            .collect();
        if tied.len() > 1 {
            ambiguities.push((row, tied));
        }
    }
    ambiguities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_global_minimum_not_greedy() {
        // Greedy row-by-row would give row 0 column 0 (cost 1) and row 1
        // column 1 (cost 10); the optimum is 2 + 2.
        let costs = vec![vec![1.0, 2.0], vec![2.0, 10.0]];
        let result = assign(&costs, &[0.5, 0.5], 100.0);
        assert_eq!(result.pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn gate_rejects_expensive_pairs() {
        let costs = vec![vec![0.1, 5.0], vec![5.0, 6.0]];
        let result = assign(&costs, &[0.5, 0.5], 1.0);
        assert_eq!(result.pairs, vec![(0, 0)]);
        assert_eq!(result.unmatched_rows, vec![1]);
        assert_eq!(result.unmatched_columns, vec![1]);
    }

    #[test]
    fn rectangular_in_both_directions() {
        let wide = assign(&[vec![3.0, 1.0, 2.0]], &[0.1, 0.1, 0.1], 10.0);
        assert_eq!(wide.pairs, vec![(0, 1)]);
        assert_eq!(wide.unmatched_columns, vec![0, 2]);

        let tall = assign(&[vec![3.0], vec![1.0], vec![2.0]], &[0.1], 10.0);
        assert_eq!(tall.pairs, vec![(1, 0)]);
        assert_eq!(tall.unmatched_rows, vec![0, 2]);
    }

    #[test]
    fn empty_inputs() {
        let no_columns = assign(&[vec![], vec![]], &[], 1.0);
        assert_eq!(no_columns.unmatched_rows, vec![0, 1]);
        let no_rows = assign(&[], &[0.3, 0.4], 1.0);
        assert_eq!(no_rows.unmatched_columns, vec![0, 1]);
    }

    #[test]
    fn cost_tie_goes_to_higher_confidence() {
        let costs = vec![vec![0.05, 0.05]];
        let result = assign(&costs, &[0.7, 0.9], 0.15);
        assert_eq!(result.pairs, vec![(0, 1)]);
        assert!(result.ambiguities.is_empty());

        let flipped = assign(&costs, &[0.9, 0.7], 0.15);
        assert_eq!(flipped.pairs, vec![(0, 0)]);
    }

    #[test]
    fn full_tie_goes_to_lower_index_and_is_reported() {
        let costs = vec![vec![0.05, 0.05, 0.05]];
        let result = assign(&costs, &[0.4, 0.8, 0.8], 0.15);
        assert_eq!(result.pairs, vec![(0, 1)]);
        assert_eq!(result.ambiguities, vec![(0, vec![1, 2])]);
    }
}
