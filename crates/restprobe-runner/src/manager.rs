//! Per-operation equivalence catalogs.
//!
//! `initialize` rebuilds the class catalog of every factor from the
//! operation's schema, documentation, and the current resource store.
//! `sample` turns the catalogs into concrete test cases, consulting the
//! solver when forbidden tuples exist. `mutate` draws type-confused
//! classes from a persistent per-factor pool with weight decay.

use std::collections::BTreeMap;

use rand::Rng;
use regex::Regex;
use serde_json::{Value, json};

use restprobe_core::resource::MatchTarget;
use restprobe_core::{
    ClassAssignment, Equivalence, FactorDomain, FactorKind, ForbiddenTuple, ResourceStore,
    RestOp, Solver, match_names,
};

/// Distinct classes offered to the solver per factor.
const MAX_DOMAIN: usize = 20;
/// Weight multiplier applied to a mutation class each time it is drawn.
const MUTATION_DECAY: f64 = 0.9;
/// Relative weight of assembling a container from children versus
/// sending it empty.
const COMPOSITE_WEIGHT: f64 = 3.0;

#[derive(Debug, Clone, Default)]
struct Catalog {
    classes: Vec<Equivalence>,
    weights: Vec<f64>,
}

impl Catalog {
    fn push(&mut self, class: Equivalence, weight: f64) {
        let desc = class.describe();
        if self.classes.iter().any(|c| c.describe() == desc) {
            return;
        }
        self.classes.push(class);
        self.weights.push(weight);
    }
}

/// One operation's catalogs plus its persistent mutation pools.
#[derive(Debug, Default)]
pub struct EquivalenceManager {
    catalogs: BTreeMap<String, Catalog>,
    mutation_pools: BTreeMap<String, Catalog>,
}

impl EquivalenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factor global names, catalog order.
    pub fn factors(&self) -> Vec<String> {
        self.catalogs.keys().cloned().collect()
    }

    /// Rebuild the catalogs for `op`. Binding candidates come from the
    /// resource store and, for factors the store cannot feed, from
    /// producer operations' response schemas.
    pub fn initialize<R: Rng>(
        &mut self,
        op: &RestOp,
        store: &ResourceStore,
        producers: &[&RestOp],
        rng: &mut R,
    ) {
        self.catalogs.clear();
        for id in op.tree.all_ids() {
            let factor = op.tree.get(id);
            let global = op.tree.global_name(id);
            let mut catalog = Catalog::default();

            if factor.kind.is_container() {
                catalog.push(Equivalence::Composite, COMPOSITE_WEIGHT);
                let empty = match factor.kind {
                    FactorKind::Array { .. } => json!([]),
                    _ => json!({}),
                };
                catalog.push(Equivalence::Enumerated(empty), 1.0);
            } else {
                for example in &factor.examples {
                    catalog.push(Equivalence::Enumerated(example.clone()), 1.0);
                }
                if let Some(default) = &factor.default {
                    catalog.push(Equivalence::Enumerated(default.clone()), 1.0);
                }
                if let Some(description) = &factor.description {
                    for snippet in quoted_snippets(description) {
                        catalog.push(Equivalence::Enumerated(Value::String(snippet)), 1.0);
                    }
                }
                for class in kind_classes(&factor.kind) {
                    catalog.push(class, 1.0);
                }
            }
            if !factor.required {
                catalog.push(Equivalence::Null, 1.0);
            }
            self.catalogs.insert(global, catalog);
        }

        self.add_store_bindings(op, store, rng);
        self.add_producer_bindings(op, store, producers);
        self.build_mutation_pools(op);
    }

    fn add_store_bindings<R: Rng>(&mut self, op: &RestOp, store: &ResourceStore, rng: &mut R) {
        let mut targets = BTreeMap::new();
        for id in op.tree.leaf_ids() {
            let factor = op.tree.get(id);
            targets.insert(
                op.tree.global_name(id),
                MatchTarget {
                    names: factor.tokens.iter().cloned().collect(),
                    kind: factor.kind.clone(),
                },
            );
        }
        let sources = store.binding_sources(&op.path.resource_node(), &targets, rng);
        for (global, candidates) in sources {
            let Some(catalog) = self.catalogs.get_mut(&global) else {
                continue;
            };
            for source in candidates {
                catalog.push(
                    Equivalence::Binding {
                        node: source.node,
                        field: source.field,
                    },
                    source.similarity.max(0.1),
                );
            }
        }
    }

    /// Factors the store offered nothing for are matched by name against
    /// producer response schemas; hits become bindings on the producer's
    /// resource node (resolvable once that producer has succeeded).
    fn add_producer_bindings(&mut self, op: &RestOp, store: &ResourceStore, producers: &[&RestOp]) {
        let unbound: BTreeMap<String, String> = op
            .tree
            .leaf_ids()
            .into_iter()
            .filter_map(|id| {
                let global = op.tree.global_name(id);
                let catalog = self.catalogs.get(&global)?;
                if catalog.classes.iter().any(Equivalence::is_binding) {
                    return None;
                }
                Some((global, op.tree.get(id).name.clone()))
            })
            .collect();
        if unbound.is_empty() {
            return;
        }

        for producer in producers {
            if producer.id() == op.id() {
                continue;
            }
            let node = producer.path.resource_node();
            if !store.pool(&node).is_some_and(|p| p.is_active()) {
                continue;
            }
            for response in &producer.responses {
                if response.status / 100 != 2 {
                    continue;
                }
                let matches = match_names(&response.tree, &unbound, &BTreeMap::new());
                for (global, results) in matches {
                    let Some(catalog) = self.catalogs.get_mut(&global) else {
                        continue;
                    };
                    for result in results {
                        catalog.push(
                            Equivalence::Binding {
                                node: node.clone(),
                                field: result
                                    .global_name
                                    .split('.')
                                    .map(str::to_string)
                                    .collect(),
                            },
                            result.probability,
                        );
                    }
                }
            }
        }
    }

    fn build_mutation_pools(&mut self, op: &RestOp) {
        for id in op.tree.all_ids() {
            let global = op.tree.global_name(id);
            if self.mutation_pools.contains_key(&global) {
                continue;
            }
            let factor = op.tree.get(id);
            let mut pool = Catalog::default();
            for class in confusion_classes(&factor.kind) {
                pool.push(class, 1.0);
            }
            if factor.required {
                pool.push(Equivalence::Null, 1.0);
            }
            self.mutation_pools.insert(global, pool);
        }
    }

    /// Draw one class per factor, weight-proportional.
    pub fn draw_all<R: Rng>(&self, rng: &mut R) -> BTreeMap<String, Equivalence> {
        self.catalogs
            .iter()
            .filter_map(|(global, catalog)| {
                weighted_draw(&catalog.classes, &catalog.weights, rng)
                    .map(|c| (global.clone(), c.clone()))
            })
            .collect()
    }

    /// Produce test cases. Without forbidden tuples this is a single
    /// weighted draw; with them, the solver covers `strength`-way
    /// combinations over truncated domains, degrading to solving only the
    /// constrained factors and finally to a plain draw.
    pub fn sample<R: Rng>(
        &self,
        solver: &mut dyn Solver,
        forbidden: &[ClassAssignment],
        strength: usize,
        rng: &mut R,
    ) -> Vec<BTreeMap<String, Equivalence>> {
        if forbidden.is_empty() {
            return vec![self.draw_all(rng)];
        }

        let (domains, lookup) = self.build_domains(rng);
        let forbidden: Vec<ForbiddenTuple> = forbidden.to_vec();

        match solver.solve(&domains, &forbidden, strength) {
            Ok(rows) if !rows.is_empty() => {
                return rows
                    .into_iter()
                    .map(|row| self.materialize(&row, &lookup, rng))
                    .collect();
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "solver failed, partitioning"),
        }

        // Solve only the factors the forbidden tuples mention; everything
        // else is independent anyway.
        let constrained: Vec<FactorDomain> = domains
            .iter()
            .filter(|d| forbidden.iter().any(|t| t.contains_key(&d.name)))
            .cloned()
            .collect();
        if !constrained.is_empty() {
            if let Ok(rows) = solver.solve(&constrained, &forbidden, strength) {
                if !rows.is_empty() {
                    return rows
                        .into_iter()
                        .map(|row| self.materialize(&row, &lookup, rng))
                        .collect();
                }
            }
        }
        vec![self.draw_all(rng)]
    }

    /// Truncate each catalog to a weighted sample of distinct class
    /// descriptions and keep the description -> class mapping for the trip
    /// back from the solver.
    fn build_domains<R: Rng>(
        &self,
        rng: &mut R,
    ) -> (Vec<FactorDomain>, BTreeMap<String, BTreeMap<String, Equivalence>>) {
        let mut domains = Vec::new();
        let mut lookup = BTreeMap::new();
        for (global, catalog) in &self.catalogs {
            let picked = weighted_sample_distinct(
                &catalog.classes,
                &catalog.weights,
                MAX_DOMAIN,
                rng,
            );
            let mut by_desc = BTreeMap::new();
            let mut values = Vec::new();
            for class in picked {
                let desc = class.describe();
                if !by_desc.contains_key(&desc) {
                    values.push(desc.clone());
                    by_desc.insert(desc, class.clone());
                }
            }
            domains.push(FactorDomain {
                name: global.clone(),
                values,
            });
            lookup.insert(global.clone(), by_desc);
        }
        (domains, lookup)
    }

    /// Map a solver row of descriptions back to classes; factors the row
    /// does not mention get a weighted draw.
    fn materialize<R: Rng>(
        &self,
        row: &BTreeMap<String, String>,
        lookup: &BTreeMap<String, BTreeMap<String, Equivalence>>,
        rng: &mut R,
    ) -> BTreeMap<String, Equivalence> {
        self.catalogs
            .iter()
            .filter_map(|(global, catalog)| {
                let class = row
                    .get(global)
                    .and_then(|desc| lookup.get(global)?.get(desc).cloned())
                    .or_else(|| {
                        weighted_draw(&catalog.classes, &catalog.weights, rng).cloned()
                    })?;
                Some((global.clone(), class))
            })
            .collect()
    }

    /// Type-confused class for one factor, weight decayed on every draw so
    /// repeated mutation explores the pool.
    pub fn mutate<R: Rng>(&mut self, global: &str, rng: &mut R) -> Option<Equivalence> {
        let pool = self.mutation_pools.get_mut(global)?;
        let idx = weighted_index(&pool.weights, rng)?;
        pool.weights[idx] *= MUTATION_DECAY;
        Some(pool.classes[idx].clone())
    }
}

/// Substrings quoted with `'..'`, `` `..` `` or `".."` inside a
/// documentation string; APIs frequently spell accepted literal values
/// this way.
fn quoted_snippets(description: &str) -> Vec<String> {
    let mut out = Vec::new();
    for pattern in [r"'([^']+)'", r"`([^`]+)`", r#""([^"]+)""#] {
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        for cap in re.captures_iter(description) {
            if let Some(m) = cap.get(1) {
                let s = m.as_str().trim().to_string();
                if !s.is_empty() && !out.contains(&s) {
                    out.push(s);
                }
            }
        }
    }
    out
}

/// Kind-appropriate generator classes.
fn kind_classes(kind: &FactorKind) -> Vec<Equivalence> {
    match kind {
        FactorKind::String { min_len, max_len } => vec![
            Equivalence::RandomString {
                min_len: *min_len,
                max_len: *max_len,
            },
            Equivalence::Empty,
            Equivalence::random_password(),
            Equivalence::random_byte(),
            Equivalence::random_binary(),
        ],
        FactorKind::Binary { min_len, max_len } => vec![
            Equivalence::RandomBinary {
                min_len: *min_len,
                max_len: *max_len,
            },
            Equivalence::random_byte(),
        ],
        FactorKind::Int { min, max } => vec![
            Equivalence::RandomInt {
                min: *min,
                max: *max,
            },
            Equivalence::Zero,
            Equivalence::PositiveOne,
            Equivalence::NegativeOne,
        ],
        FactorKind::Float { min, max } => vec![
            Equivalence::RandomFloat {
                min: *min,
                max: *max,
            },
            Equivalence::Zero,
            Equivalence::PositiveOne,
            Equivalence::NegativeOne,
        ],
        FactorKind::Bool => vec![
            Equivalence::Enumerated(Value::Bool(true)),
            Equivalence::Enumerated(Value::Bool(false)),
        ],
        FactorKind::Enum { values } => values
            .iter()
            .map(|v| Equivalence::Enumerated(v.clone()))
            .collect(),
        FactorKind::Date => vec![Equivalence::RandomDate],
        FactorKind::Time => vec![Equivalence::RandomTime],
        FactorKind::DateTime => vec![Equivalence::RandomDateTime],
        FactorKind::Array { .. } | FactorKind::Object { .. } => Vec::new(),
    }
}

/// Classes from every kind except the declared one.
fn confusion_classes(kind: &FactorKind) -> Vec<Equivalence> {
    let own: Vec<String> = kind_classes(kind)
        .iter()
        .map(Equivalence::describe)
        .collect();
    let candidates = [
        Equivalence::RandomString {
            min_len: 0,
            max_len: 100,
        },
        Equivalence::Empty,
        Equivalence::random_password(),
        Equivalence::random_byte(),
        Equivalence::random_binary(),
        Equivalence::RandomInt {
            min: -1000,
            max: 1000,
        },
        Equivalence::Zero,
        Equivalence::NegativeOne,
        Equivalence::RandomFloat {
            min: -1000.0,
            max: 1000.0,
        },
        Equivalence::RandomDate,
        Equivalence::RandomTime,
        Equivalence::RandomDateTime,
        Equivalence::Enumerated(json!([])),
        Equivalence::Enumerated(json!({})),
    ];
    let same_group = |c: &Equivalence| -> bool {
        match kind {
            FactorKind::String { .. } => matches!(
                c,
                Equivalence::RandomString { .. }
                    | Equivalence::Empty
                    | Equivalence::RandomPassword { .. }
                    | Equivalence::RandomByte { .. }
                    | Equivalence::RandomBinary { .. }
            ),
            FactorKind::Binary { .. } => {
                matches!(c, Equivalence::RandomBinary { .. } | Equivalence::RandomByte { .. })
            }
            FactorKind::Int { .. } | FactorKind::Float { .. } => matches!(
                c,
                Equivalence::RandomInt { .. }
                    | Equivalence::RandomFloat { .. }
                    | Equivalence::Zero
                    | Equivalence::NegativeOne
            ),
            FactorKind::Date => matches!(c, Equivalence::RandomDate),
            FactorKind::Time => matches!(c, Equivalence::RandomTime),
            FactorKind::DateTime => matches!(c, Equivalence::RandomDateTime),
            FactorKind::Array { .. } => matches!(c, Equivalence::Enumerated(Value::Array(_))),
            FactorKind::Object { .. } => matches!(c, Equivalence::Enumerated(Value::Object(_))),
            FactorKind::Bool | FactorKind::Enum { .. } => false,
        }
    };
    candidates
        .into_iter()
        .filter(|c| !own.contains(&c.describe()) && !same_group(c))
        .collect()
}

fn weighted_index<R: Rng>(weights: &[f64], rng: &mut R) -> Option<usize> {
    let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    if total <= 0.0 {
        return if weights.is_empty() {
            None
        } else {
            Some(rng.gen_range(0..weights.len()))
        };
    }
    let mut pick = rng.gen_range(0.0..total);
    for (i, &w) in weights.iter().enumerate() {
        if !(w.is_finite() && w > 0.0) {
            continue;
        }
        if pick < w {
            return Some(i);
        }
        pick -= w;
    }
    Some(weights.len() - 1)
}

fn weighted_draw<'a, R: Rng>(
    classes: &'a [Equivalence],
    weights: &[f64],
    rng: &mut R,
) -> Option<&'a Equivalence> {
    weighted_index(weights, rng).map(|i| &classes[i])
}

/// Up to `n` distinct items, drawn weight-proportionally without
/// replacement.
fn weighted_sample_distinct<'a, R: Rng>(
    classes: &'a [Equivalence],
    weights: &[f64],
    n: usize,
    rng: &mut R,
) -> Vec<&'a Equivalence> {
    if classes.len() <= n {
        return classes.iter().collect();
    }
    let mut remaining: Vec<usize> = (0..classes.len()).collect();
    let mut current: Vec<f64> = weights.to_vec();
    let mut out = Vec::with_capacity(n);
    while out.len() < n && !remaining.is_empty() {
        let filtered: Vec<f64> = remaining.iter().map(|&i| current[i]).collect();
        let Some(pos) = weighted_index(&filtered, rng) else {
            break;
        };
        let idx = remaining.swap_remove(pos);
        current[idx] = 0.0;
        out.push(&classes[idx]);
    }
    out
}
