//! Combinatorial test-case solving.
//!
//! A [`Solver`] turns a set of factors with finite value domains into a
//! set of assignments that covers every t-way value combination while
//! avoiding forbidden tuples. The in-process [`GreedySolver`] builds the
//! covering greedily; an external tool can plug in behind the same trait.

use std::collections::{BTreeMap, HashSet};

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use thiserror::Error;

/// One factor and its candidate value descriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorDomain {
    pub name: String,
    pub values: Vec<String>,
}

/// A complete factor-to-value assignment for one test case.
pub type Assignment = BTreeMap<String, String>;

/// A partial assignment that must not appear in any produced case.
pub type ForbiddenTuple = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver subprocess failed: {0}")]
    Subprocess(String),
    #[error("solver timed out after {0} seconds")]
    Timeout(u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait Solver {
    /// Produce assignments covering every `strength`-way combination of
    /// factor values that is not excluded by `forbidden`.
    ///
    /// Empty `factors` yields a single empty assignment. An empty result
    /// means no satisfying set could be produced and the caller should
    /// fall back to independent random sampling.
    fn solve(
        &mut self,
        factors: &[FactorDomain],
        forbidden: &[ForbiddenTuple],
        strength: usize,
    ) -> Result<Vec<Assignment>, SolverError>;
}

fn violates(row: &Assignment, forbidden: &[ForbiddenTuple]) -> bool {
    forbidden.iter().any(|tuple| {
        !tuple.is_empty() && tuple.iter().all(|(k, v)| row.get(k) == Some(v))
    })
}

/// Greedy in-process covering-array construction.
pub struct GreedySolver {
    rng: SmallRng,
}

/// Random rows scored per greedy step.
const CANDIDATES_PER_STEP: usize = 30;
/// Consecutive zero-coverage steps before giving up on the remainder.
const STALL_LIMIT: usize = 20;
/// Resampling attempts when a candidate row keeps hitting forbidden tuples.
const ROW_ATTEMPTS: usize = 100;
/// Above this many target tuples the strength degrades to pairs, then
/// singles, to keep the enumeration tractable.
const MAX_TARGET_TUPLES: usize = 200_000;

impl GreedySolver {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn random_row(
        &mut self,
        factors: &[FactorDomain],
        forbidden: &[ForbiddenTuple],
    ) -> Option<Assignment> {
        for _ in 0..ROW_ATTEMPTS {
            let row: Assignment = factors
                .iter()
                .map(|f| {
                    let idx = self.rng.gen_range(0..f.values.len());
                    (f.name.clone(), f.values[idx].clone())
                })
                .collect();
            if !violates(&row, forbidden) {
                return Some(row);
            }
        }
        None
    }
}

/// Index pairs (factor, value) identifying one target tuple.
type Tuple = Vec<(usize, usize)>;

fn target_tuples(factors: &[FactorDomain], strength: usize) -> HashSet<Tuple> {
    let mut out = HashSet::new();
    let mut combo: Vec<usize> = (0..strength).collect();
    loop {
        let mut values = vec![0usize; strength];
        loop {
            out.insert(
                combo
                    .iter()
                    .zip(values.iter())
                    .map(|(&f, &v)| (f, v))
                    .collect(),
            );
            // Advance the mixed-radix value counter.
            let mut i = strength;
            loop {
                if i == 0 {
                    break;
                }
                i -= 1;
                values[i] += 1;
                if values[i] < factors[combo[i]].values.len() {
                    break;
                }
                values[i] = 0;
                if i == 0 {
                    i = usize::MAX;
                    break;
                }
            }
            if i == usize::MAX {
                break;
            }
        }
        // Advance the factor combination.
        let mut i = strength;
        loop {
            if i == 0 {
                return out;
            }
            i -= 1;
            combo[i] += 1;
            if combo[i] <= factors.len() - (strength - i) {
                for j in i + 1..strength {
                    combo[j] = combo[j - 1] + 1;
                }
                break;
            }
            if i == 0 {
                return out;
            }
        }
    }
}

fn tuple_forbidden(
    tuple: &Tuple,
    factors: &[FactorDomain],
    forbidden: &[ForbiddenTuple],
) -> bool {
    let partial: Assignment = tuple
        .iter()
        .map(|&(f, v)| (factors[f].name.clone(), factors[f].values[v].clone()))
        .collect();
    forbidden.iter().any(|t| {
        !t.is_empty() && t.iter().all(|(k, v)| partial.get(k) == Some(v))
    })
}

fn covered_by(tuple: &Tuple, factors: &[FactorDomain], row: &Assignment) -> bool {
    tuple
        .iter()
        .all(|&(f, v)| row.get(&factors[f].name) == Some(&factors[f].values[v]))
}

impl Solver for GreedySolver {
    fn solve(
        &mut self,
        factors: &[FactorDomain],
        forbidden: &[ForbiddenTuple],
        strength: usize,
    ) -> Result<Vec<Assignment>, SolverError> {
        let factors: Vec<FactorDomain> = factors
            .iter()
            .filter(|f| !f.values.is_empty())
            .cloned()
            .collect();
        if factors.is_empty() {
            return Ok(vec![Assignment::new()]);
        }

        let mut strength = strength.clamp(1, factors.len());
        let mut uncovered = target_tuples(&factors, strength);
        while uncovered.len() > MAX_TARGET_TUPLES && strength > 1 {
            strength -= 1;
            uncovered = target_tuples(&factors, strength);
        }
        uncovered.retain(|t| !tuple_forbidden(t, &factors, forbidden));

        let mut rows: Vec<Assignment> = Vec::new();
        let mut stalls = 0;
        while !uncovered.is_empty() && stalls < STALL_LIMIT {
            let mut best: Option<(Assignment, usize)> = None;
            for _ in 0..CANDIDATES_PER_STEP {
                let Some(row) = self.random_row(&factors, forbidden) else {
                    return Ok(Vec::new());
                };
                let gain = uncovered
                    .iter()
                    .filter(|t| covered_by(t, &factors, &row))
                    .count();
                if best.as_ref().map(|(_, g)| gain > *g).unwrap_or(true) {
                    best = Some((row, gain));
                }
            }
            match best {
                Some((row, gain)) if gain > 0 => {
                    uncovered.retain(|t| !covered_by(t, &factors, &row));
                    rows.push(row);
                    stalls = 0;
                }
                _ => stalls += 1,
            }
        }

        if rows.is_empty() {
            // Every target tuple was forbidden; a single valid row still
            // gives the caller something to run.
            if let Some(row) = self.random_row(&factors, forbidden) {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(name: &str, values: &[&str]) -> FactorDomain {
        FactorDomain {
            name: name.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn empty_factors_yield_single_empty_assignment() {
        let mut solver = GreedySolver::new(42);
        let out = solver.solve(&[], &[], 2).unwrap();
        assert_eq!(out, vec![Assignment::new()]);
    }

    #[test]
    fn pairwise_covers_all_pairs() {
        let factors = vec![
            domain("a", &["1", "2"]),
            domain("b", &["x", "y"]),
            domain("c", &["p", "q"]),
        ];
        let mut solver = GreedySolver::new(42);
        let rows = solver.solve(&factors, &[], 2).unwrap();
        for (i, fi) in factors.iter().enumerate() {
            for fj in &factors[i + 1..] {
                for vi in &fi.values {
                    for vj in &fj.values {
                        assert!(
                            rows.iter().any(|r| r[&fi.name] == *vi
                                && r[&fj.name] == *vj),
                            "pair ({}={vi}, {}={vj}) uncovered",
                            fi.name,
                            fj.name,
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn forbidden_tuples_never_appear() {
        let factors = vec![domain("a", &["1", "2"]), domain("b", &["x", "y"])];
        let forbidden: Vec<ForbiddenTuple> = vec![
            [("a".to_string(), "1".to_string()), ("b".to_string(), "x".to_string())]
                .into_iter()
                .collect(),
        ];
        let mut solver = GreedySolver::new(42);
        let rows = solver.solve(&factors, &forbidden, 2).unwrap();
        assert!(!rows.is_empty());
        for row in &rows {
            assert!(!(row["a"] == "1" && row["b"] == "x"));
        }
    }

    #[test]
    fn strength_clamps_to_factor_count() {
        let factors = vec![domain("a", &["1", "2"])];
        let mut solver = GreedySolver::new(42);
        let rows = solver.solve(&factors, &[], 3).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn unsatisfiable_domain_returns_empty() {
        let factors = vec![domain("a", &["1", "2"])];
        let forbidden: Vec<ForbiddenTuple> = vec![
            [("a".to_string(), "1".to_string())].into_iter().collect(),
            [("a".to_string(), "2".to_string())].into_iter().collect(),
        ];
        let mut solver = GreedySolver::new(42);
        let rows = solver.solve(&factors, &forbidden, 1).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn empty_value_domains_are_skipped() {
        let factors = vec![domain("a", &[]), domain("b", &["x"])];
        let mut solver = GreedySolver::new(42);
        let rows = solver.solve(&factors, &[], 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].contains_key("a"));
        assert_eq!(rows[0]["b"], "x");
    }
}
