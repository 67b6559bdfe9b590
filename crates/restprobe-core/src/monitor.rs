//! Online failure attribution.
//!
//! For every operation, two monitors (one for 4xx traffic, one for 5xx)
//! maintain per-fragment conditional-probability models over equivalence
//! assignments: how often did this combination of classes co-occur with
//! this failure fragment. Combinations whose trigger probability crosses
//! a threshold become forbidden tuples for the next generation round.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::fragment::{self, FragmentParams};

/// An assignment of equivalence-class descriptions, factor -> description.
pub type ClassAssignment = BTreeMap<String, String>;

/// Counts (T, F) per observed tuple of class descriptions for one
/// fragment over a fixed factor set.
#[derive(Debug, Clone)]
pub struct CondProbModel {
    pub factors: Vec<String>,
    pub fragment: String,
    index: BTreeMap<Vec<String>, usize>,
    t: Vec<u32>,
    f: Vec<u32>,
}

impl CondProbModel {
    pub fn new(factors: Vec<String>, fragment: impl Into<String>) -> Self {
        Self {
            factors,
            fragment: fragment.into(),
            index: BTreeMap::new(),
            t: Vec::new(),
            f: Vec::new(),
        }
    }

    fn key(&self, assignment: &ClassAssignment) -> Option<Vec<String>> {
        self.factors
            .iter()
            .map(|f| assignment.get(f).cloned())
            .collect()
    }

    pub fn add_true(&mut self, assignment: &ClassAssignment) {
        let Some(key) = self.key(assignment) else {
            return;
        };
        match self.index.get(&key) {
            Some(&idx) => self.t[idx] += 1,
            None => {
                self.index.insert(key, self.t.len());
                self.t.push(1);
                self.f.push(0);
            }
        }
    }

    pub fn add_false(&mut self, assignment: &ClassAssignment) {
        let Some(key) = self.key(assignment) else {
            return;
        };
        match self.index.get(&key) {
            Some(&idx) => self.f[idx] += 1,
            None => {
                self.index.insert(key, self.t.len());
                self.t.push(0);
                self.f.push(1);
            }
        }
    }

    /// Feed a batch: each case whose response carried this fragment is a
    /// T observation, the rest are F. Cases missing any of the model's
    /// factors are skipped.
    pub fn update(&mut self, data: &[ClassAssignment], fragments: &[BTreeSet<String>]) {
        for (assignment, f_set) in data.iter().zip(fragments) {
            if self.factors.iter().any(|f| !assignment.contains_key(f)) {
                continue;
            }
            if f_set.contains(&self.fragment) {
                self.add_true(assignment);
            } else {
                self.add_false(assignment);
            }
        }
    }

    /// Tuples with trigger probability `>= threshold`.
    pub fn forbidden_tuples(&self, threshold: f64) -> Vec<ClassAssignment> {
        self.index
            .iter()
            .filter(|&(_, &idx)| {
                let total = self.t[idx] + self.f[idx];
                total > 0 && f64::from(self.t[idx]) / f64::from(total) >= threshold
            })
            .map(|(key, _)| {
                self.factors
                    .iter()
                    .cloned()
                    .zip(key.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// Observed cells for reporting: (tuple, T, F, probability).
    pub fn cells(&self) -> Vec<(Vec<String>, u32, u32, f64)> {
        let mut out: Vec<_> = self
            .index
            .iter()
            .map(|(key, &idx)| {
                let total = self.t[idx] + self.f[idx];
                let p = if total == 0 {
                    0.0
                } else {
                    f64::from(self.t[idx]) / f64::from(total)
                };
                (key.clone(), self.t[idx], self.f[idx], p)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Attribution model for fragments with no identified causal factors:
/// one single-factor submodel per parameter; forbidden tuples come from
/// the submodel with the highest trigger probability.
#[derive(Debug, Clone)]
pub struct UncertainModel {
    pub fragment: String,
    models: Vec<CondProbModel>,
    max_probs: Vec<f64>,
}

impl UncertainModel {
    pub fn new(fragment: impl Into<String>, all_factors: &[String]) -> Self {
        let fragment = fragment.into();
        let models = all_factors
            .iter()
            .map(|f| CondProbModel::new(vec![f.clone()], fragment.clone()))
            .collect::<Vec<_>>();
        let max_probs = vec![0.0; models.len()];
        Self {
            fragment,
            models,
            max_probs,
        }
    }

    pub fn factors(&self) -> Vec<String> {
        self.models
            .iter()
            .flat_map(|m| m.factors.iter().cloned())
            .collect()
    }

    pub fn update(&mut self, data: &[ClassAssignment], fragments: &[BTreeSet<String>]) {
        for m in &mut self.models {
            m.update(data, fragments);
        }
        self.update_max_probs();
    }

    /// A cell seen far less often than the busiest cell of the same
    /// submodel is treated as stale: its probability is forced to zero
    /// (`5 * (T+F) < max(T+F)`), so a briefly-hot class cannot keep a
    /// phantom high trigger rate forever.
    fn update_max_probs(&mut self) {
        for (i, m) in self.models.iter().enumerate() {
            if m.t.is_empty() {
                self.max_probs[i] = 0.0;
                continue;
            }
            let totals: Vec<u32> = m.t.iter().zip(&m.f).map(|(a, b)| a + b).collect();
            let max_total = totals.iter().copied().max().unwrap_or(0);
            let mut best = 0.0f64;
            for (idx, &total) in totals.iter().enumerate() {
                let (t, total) = if total * 5 < max_total {
                    (0, 1)
                } else {
                    (m.t[idx], total.max(1))
                };
                best = best.max(f64::from(t) / f64::from(total));
            }
            self.max_probs[i] = best;
        }
    }

    pub fn forbidden_tuples(&self, threshold: f64) -> Vec<ClassAssignment> {
        let Some((best, _)) = self
            .max_probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
        else {
            return Vec::new();
        };
        self.models[best].forbidden_tuples(threshold)
    }
}

#[derive(Debug, Clone)]
pub enum FragmentModel {
    Direct(CondProbModel),
    Uncertain(UncertainModel),
}

impl FragmentModel {
    pub fn fragment(&self) -> &str {
        match self {
            FragmentModel::Direct(m) => &m.fragment,
            FragmentModel::Uncertain(m) => &m.fragment,
        }
    }

    pub fn factors(&self) -> Vec<String> {
        match self {
            FragmentModel::Direct(m) => m.factors.clone(),
            FragmentModel::Uncertain(m) => m.factors(),
        }
    }

    fn update(&mut self, data: &[ClassAssignment], fragments: &[BTreeSet<String>]) {
        match self {
            FragmentModel::Direct(m) => m.update(data, fragments),
            FragmentModel::Uncertain(m) => m.update(data, fragments),
        }
    }

    pub fn forbidden_tuples(&self, threshold: f64) -> Vec<ClassAssignment> {
        match self {
            FragmentModel::Direct(m) => m.forbidden_tuples(threshold),
            FragmentModel::Uncertain(m) => m.forbidden_tuples(threshold),
        }
    }
}

/// All fragment models of one failure class (4xx or 5xx) for one
/// operation, plus the discovery counter driving the stop rules.
#[derive(Debug, Clone)]
pub struct FailureMonitor {
    pub op_id: String,
    pub models: Vec<FragmentModel>,
    all_fragments: BTreeSet<String>,
    pub since_last_discover: u32,
}

impl FailureMonitor {
    pub fn new(op_id: impl Into<String>) -> Self {
        Self {
            op_id: op_id.into(),
            models: Vec::new(),
            all_fragments: BTreeSet::new(),
            since_last_discover: 0,
        }
    }

    /// Current vocabulary: fragment -> the factors its model conditions on.
    pub fn fragment_params(&self) -> FragmentParams {
        self.models
            .iter()
            .map(|m| {
                (
                    m.fragment().to_string(),
                    m.factors().into_iter().collect::<BTreeSet<_>>(),
                )
            })
            .collect()
    }

    /// Absorb one batch. `fragment_params` is the refreshed vocabulary
    /// from fragment analysis: models for vanished fragments are dropped,
    /// new fragments get a model (uncertain when no parameters were
    /// identified), and every model sees the batch.
    pub fn update(
        &mut self,
        assignments: &[ClassAssignment],
        fragments: &[BTreeSet<String>],
        fragment_params: &FragmentParams,
    ) {
        let Some(first) = assignments.first() else {
            return;
        };
        let all_factors: Vec<String> = first.keys().cloned().collect();

        self.models
            .retain(|m| fragment_params.contains_key(m.fragment()));
        let existing: BTreeSet<String> = self
            .models
            .iter()
            .map(|m| m.fragment().to_string())
            .collect();
        for (frag, params) in fragment_params {
            if existing.contains(frag) {
                continue;
            }
            if params.is_empty() {
                self.models
                    .push(FragmentModel::Uncertain(UncertainModel::new(
                        frag.clone(),
                        &all_factors,
                    )));
            } else {
                self.models.push(FragmentModel::Direct(CondProbModel::new(
                    params.iter().cloned().collect(),
                    frag.clone(),
                )));
            }
        }

        for m in &mut self.models {
            m.update(assignments, fragments);
        }

        let new_found: BTreeSet<String> = fragment_params.keys().cloned().collect();
        if new_found.difference(&self.all_fragments).next().is_some() {
            self.since_last_discover = 0;
        } else {
            self.since_last_discover += 1;
        }
        self.all_fragments = new_found;
    }

    pub fn forbidden_tuples(&self, threshold: f64) -> Vec<ClassAssignment> {
        self.models
            .iter()
            .flat_map(|m| m.forbidden_tuples(threshold))
            .collect()
    }

    pub fn fragment_count(&self) -> usize {
        self.all_fragments.len()
    }
}

/// Which loop the engine is running for the current operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generate,
    Mutate,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusTally {
    #[serde(rename = "20X")]
    pub ok: u64,
    #[serde(rename = "40X")]
    pub client_error: u64,
    #[serde(rename = "500")]
    pub server_error: u64,
}

/// Per-round counts, one window per executed batch.
#[derive(Debug, Clone, Serialize)]
pub struct Window {
    pub ok: u32,
    pub client_error: u32,
    pub server_error: u32,
}

/// Run-wide statistics: status tallies, round windows, timing, and both
/// monitors for every operation.
#[derive(Debug)]
pub struct Statistics {
    status: BTreeMap<String, StatusTally>,
    windows: BTreeMap<String, Vec<Window>>,
    times: BTreeMap<String, Vec<f64>>,
    started: Instant,
    pub error_monitors: BTreeMap<String, FailureMonitor>,
    pub bug_monitors: BTreeMap<String, FailureMonitor>,
    current_op: Option<String>,
    repeat_of_current_op: u32,
}

impl Statistics {
    pub fn new<I, S>(operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ops: Vec<String> = operations.into_iter().map(Into::into).collect();
        Self {
            status: ops
                .iter()
                .map(|op| (op.clone(), StatusTally::default()))
                .collect(),
            windows: ops.iter().map(|op| (op.clone(), Vec::new())).collect(),
            times: ops.iter().map(|op| (op.clone(), vec![0.0])).collect(),
            started: Instant::now(),
            error_monitors: ops
                .iter()
                .map(|op| (op.clone(), FailureMonitor::new(op.clone())))
                .collect(),
            bug_monitors: ops
                .iter()
                .map(|op| (op.clone(), FailureMonitor::new(op.clone())))
                .collect(),
            current_op: None,
            repeat_of_current_op: 0,
        }
    }

    /// Digest one executed batch for `op_id`.
    ///
    /// `equivalences` are the class-description assignments, `assignments`
    /// the stringified concrete values (used for value masking). When
    /// `learn_client_errors` is false (mutation rounds) 4xx bodies are
    /// blanked so only 5xx traffic feeds the bug monitor.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        op_id: &str,
        token_map: &BTreeMap<String, String>,
        equivalences: &[ClassAssignment],
        assignments: &[BTreeMap<String, String>],
        status_codes: &[u16],
        responses: &[serde_json::Value],
        learn_client_errors: bool,
    ) {
        if self.current_op.as_deref() != Some(op_id) {
            self.current_op = Some(op_id.to_string());
            self.repeat_of_current_op = 0;
        } else {
            self.repeat_of_current_op += 1;
        }

        let blanked: Vec<serde_json::Value>;
        let effective: &[serde_json::Value] = if learn_client_errors {
            responses
        } else {
            blanked = status_codes
                .iter()
                .zip(responses)
                .map(|(&sc, resp)| {
                    if sc / 100 == 4 {
                        serde_json::Value::String(String::new())
                    } else {
                        resp.clone()
                    }
                })
                .collect();
            &blanked
        };

        let error_monitor = self
            .error_monitors
            .entry(op_id.to_string())
            .or_insert_with(|| FailureMonitor::new(op_id));
        let mut error_params = error_monitor.fragment_params();
        let mut bug_params = self
            .bug_monitors
            .entry(op_id.to_string())
            .or_insert_with(|| FailureMonitor::new(op_id))
            .fragment_params();

        let batch = fragment::analyze_batch(
            token_map,
            assignments,
            status_codes,
            effective,
            &mut error_params,
            &mut bug_params,
        );

        let mut window = Window {
            ok: 0,
            client_error: 0,
            server_error: 0,
        };
        for &sc in status_codes {
            match sc / 100 {
                2 => window.ok += 1,
                5 => window.server_error += 1,
                _ => window.client_error += 1,
            }
        }
        let tally = self.status.entry(op_id.to_string()).or_default();
        tally.ok += u64::from(window.ok);
        tally.client_error += u64::from(window.client_error);
        tally.server_error += u64::from(window.server_error);
        self.windows
            .entry(op_id.to_string())
            .or_default()
            .push(window);
        self.times
            .entry(op_id.to_string())
            .or_default()
            .push(self.started.elapsed().as_secs_f64());

        if let Some(m) = self.error_monitors.get_mut(op_id) {
            m.update(equivalences, &batch.per_case_error, &error_params);
        }
        if let Some(m) = self.bug_monitors.get_mut(op_id) {
            m.update(equivalences, &batch.per_case_bug, &bug_params);
        }

        tracing::debug!(
            op = op_id,
            ok = tally.ok,
            client_error = tally.client_error,
            server_error = tally.server_error,
            "batch digested"
        );
    }

    /// Stop working the current operation: more than 10 consecutive
    /// rounds, or more than 3 rounds without discovering a new fragment
    /// of the stage's failure class.
    pub fn should_stop(&self, op_id: &str, stage: Stage) -> bool {
        if self.repeat_of_current_op > 10 {
            return true;
        }
        let monitors = match stage {
            Stage::Generate => &self.error_monitors,
            Stage::Mutate => &self.bug_monitors,
        };
        monitors
            .get(op_id)
            .is_some_and(|m| m.since_last_discover > 3)
    }

    pub fn reset(&mut self, op_id: &str) {
        if let Some(m) = self.error_monitors.get_mut(op_id) {
            m.since_last_discover = 0;
        }
        if let Some(m) = self.bug_monitors.get_mut(op_id) {
            m.since_last_discover = 0;
        }
    }

    /// An operation that never produced a 2xx but did produce failures.
    pub fn is_failed(&self, op_id: &str) -> bool {
        self.status.get(op_id).is_some_and(|t| {
            t.ok == 0 && (t.client_error > 0 || t.server_error > 0)
        })
    }

    pub fn failed_operations(&self) -> Vec<String> {
        self.status
            .keys()
            .filter(|op| self.is_failed(op))
            .cloned()
            .collect()
    }

    pub fn tally(&self, op_id: &str) -> Option<&StatusTally> {
        self.status.get(op_id)
    }

    pub fn status_tallies(&self) -> &BTreeMap<String, StatusTally> {
        &self.status
    }

    /// Distinct 5xx fragments seen for an operation; drives bug-weighted
    /// scheduling.
    pub fn bug_fragment_count(&self, op_id: &str) -> usize {
        self.bug_monitors
            .get(op_id)
            .map_or(0, FailureMonitor::fragment_count)
    }

    /// Persist the run's evidence as JSON under `directory`.
    pub fn report(&self, directory: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(directory)?;
        write_json(&directory.join("status_codes.json"), &self.status)?;

        let deltas: BTreeMap<&String, Vec<f64>> = self
            .times
            .iter()
            .map(|(op, ts)| {
                let d = ts.windows(2).map(|w| w[1] - w[0]).collect();
                (op, d)
            })
            .collect();
        write_json(&directory.join("time_deltas.json"), &deltas)?;

        for (op, windows) in &self.windows {
            let op_dir = directory.join(sanitize_name(op));
            std::fs::create_dir_all(&op_dir)?;
            write_json(&op_dir.join("status_by_round.json"), windows)?;

            if let Some(monitor) = self.error_monitors.get(op) {
                write_json(
                    &op_dir.join("error_forbidden_tuples.json"),
                    &monitor.forbidden_tuples(0.5),
                )?;
            }
            if let Some(monitor) = self.bug_monitors.get(op) {
                write_json(
                    &op_dir.join("bug_forbidden_tuples.json"),
                    &monitor.forbidden_tuples(0.7),
                )?;
            }
        }
        tracing::info!(directory = %directory.display(), "report written");
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    let body = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    file.write_all(body.as_bytes())
}

fn sanitize_name(op: &str) -> String {
    op.chars()
        .map(|c| if c == '/' || c == ':' { '_' } else { c })
        .filter(|c| !c.is_whitespace())
        .take(120)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assign(pairs: &[(&str, &str)]) -> ClassAssignment {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn frags(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn cond_prob_counts_and_threshold() {
        let mut m = CondProbModel::new(vec!["a".to_string()], "boom");
        let bad = assign(&[("a", "Null")]);
        let good = assign(&[("a", "RandomInt(-1000,1000)")]);
        m.update(
            &[bad.clone(), bad.clone(), good.clone(), good.clone()],
            &[frags(&["boom"]), frags(&["boom"]), frags(&[]), frags(&[])],
        );
        let forbidden = m.forbidden_tuples(0.7);
        assert_eq!(forbidden.len(), 1);
        assert_eq!(forbidden[0]["a"], "Null");
        // Lowering the threshold can only add tuples.
        assert!(m.forbidden_tuples(0.1).len() >= forbidden.len());
    }

    #[test]
    fn cond_prob_skips_cases_missing_factors() {
        let mut m = CondProbModel::new(vec!["a".to_string(), "b".to_string()], "boom");
        m.update(&[assign(&[("a", "Null")])], &[frags(&["boom"])]);
        assert!(m.cells().is_empty());
    }

    #[test]
    fn uncertain_model_picks_strongest_factor() {
        let mut m = UncertainModel::new("boom", &["a".to_string(), "b".to_string()]);
        // "a = Null" always triggers; b varies freely.
        let cases = vec![
            assign(&[("a", "Null"), ("b", "Zero")]),
            assign(&[("a", "Null"), ("b", "PositiveOne")]),
            assign(&[("a", "Empty"), ("b", "Zero")]),
            assign(&[("a", "Empty"), ("b", "PositiveOne")]),
        ];
        let observed = vec![
            frags(&["boom"]),
            frags(&["boom"]),
            frags(&[]),
            frags(&[]),
        ];
        m.update(&cases, &observed);
        let forbidden = m.forbidden_tuples(0.9);
        assert!(forbidden.iter().all(|t| t.len() == 1));
        assert!(forbidden.iter().any(|t| t.get("a") == Some(&"Null".to_string())));
    }

    #[test]
    fn uncertain_model_outlier_rule_steers_selection() {
        let mut m = UncertainModel::new("boom", &["a".to_string(), "b".to_string()]);
        // One early hit for a=Empty, then a long run where the failure
        // tracks b=Zero and a stays at Null.
        let mut cases = vec![assign(&[("a", "Empty"), ("b", "Zero")])];
        let mut observed = vec![frags(&["boom"])];
        for i in 0..20 {
            let b = if i % 2 == 0 { "Zero" } else { "PositiveOne" };
            cases.push(assign(&[("a", "Null"), ("b", b)]));
            observed.push(if b == "Zero" { frags(&["boom"]) } else { frags(&[]) });
        }
        m.update(&cases, &observed);
        // a=Empty has raw probability 1.0 but was seen once against 20
        // observations of a=Null: the outlier rule zeroes it, so the
        // consistently failing b submodel is selected instead.
        let forbidden = m.forbidden_tuples(0.9);
        assert!(!forbidden.is_empty());
        assert!(forbidden.iter().all(|t| t.contains_key("b")));
        assert!(forbidden.iter().any(|t| t["b"] == "Zero"));
    }

    #[test]
    fn monitor_discovery_counter() {
        let mut monitor = FailureMonitor::new("POST:/users");
        let cases = vec![assign(&[("a", "Null")])];
        let observed = vec![frags(&["boom"])];

        let mut params = FragmentParams::new();
        params.insert("boom".to_string(), frags(&["a"]));
        monitor.update(&cases, &observed, &params);
        assert_eq!(monitor.since_last_discover, 0);

        monitor.update(&cases, &observed, &params);
        assert_eq!(monitor.since_last_discover, 1);

        params.insert("crash".to_string(), BTreeSet::new());
        monitor.update(&cases, &observed, &params);
        assert_eq!(monitor.since_last_discover, 0);
    }

    #[test]
    fn monitor_prunes_vanished_fragments() {
        let mut monitor = FailureMonitor::new("POST:/users");
        let cases = vec![assign(&[("a", "Null")])];
        let mut params = FragmentParams::new();
        params.insert("boom".to_string(), frags(&["a"]));
        monitor.update(&cases, &[frags(&["boom"])], &params);
        assert_eq!(monitor.models.len(), 1);

        let mut replaced = FragmentParams::new();
        replaced.insert("other".to_string(), frags(&["a"]));
        monitor.update(&cases, &[frags(&["other"])], &replaced);
        assert_eq!(monitor.models.len(), 1);
        assert_eq!(monitor.models[0].fragment(), "other");
    }

    #[test]
    fn statistics_stop_rules() {
        let mut stats = Statistics::new(["POST:/users"]);
        let tokens = BTreeMap::new();
        let eq = vec![assign(&[("a", "Null")])];
        let values = vec![BTreeMap::new()];
        // Same 4xx fragment every round: after round 1 nothing new is
        // discovered, and round 5 pushes since_last_discover past 3.
        for i in 0..6 {
            stats.update(
                "POST:/users",
                &tokens,
                &eq,
                &values,
                &[400],
                &[json!({"message": "name must not be blank"})],
                true,
            );
            let stop = stats.should_stop("POST:/users", Stage::Generate);
            assert_eq!(stop, i >= 4, "round {i}");
        }
        stats.reset("POST:/users");
        assert!(!stats.should_stop("POST:/users", Stage::Generate));
    }

    #[test]
    fn statistics_repeat_cap() {
        let mut stats = Statistics::new(["GET:/users"]);
        let tokens = BTreeMap::new();
        for _ in 0..12 {
            stats.update(
                "GET:/users",
                &tokens,
                &[assign(&[("a", "Zero")])],
                &[BTreeMap::new()],
                &[200],
                &[json!({"id": 1})],
                true,
            );
        }
        assert!(stats.should_stop("GET:/users", Stage::Generate));
        assert!(stats.should_stop("GET:/users", Stage::Mutate));
    }

    #[test]
    fn mutation_rounds_blank_client_errors() {
        let mut stats = Statistics::new(["POST:/users"]);
        let tokens = BTreeMap::new();
        stats.update(
            "POST:/users",
            &tokens,
            &[assign(&[("a", "Null")])],
            &[BTreeMap::new()],
            &[400],
            &[json!({"message": "name must not be blank"})],
            false,
        );
        // The 4xx body was blanked: no error fragments were learned.
        let monitor = &stats.error_monitors["POST:/users"];
        assert_eq!(monitor.fragment_count(), 0);
    }

    #[test]
    fn failed_operations_need_failures_and_no_success() {
        let mut stats = Statistics::new(["A", "B", "C"]);
        let tokens = BTreeMap::new();
        let eq = vec![assign(&[("a", "Zero")])];
        let values = vec![BTreeMap::new()];
        stats.update("A", &tokens, &eq, &values, &[404], &[json!("")], true);
        stats.update("B", &tokens, &eq, &values, &[200], &[json!({"id": 1})], true);
        assert_eq!(stats.failed_operations(), vec!["A".to_string()]);
        assert!(!stats.is_failed("C"));
    }

    #[test]
    fn report_writes_json_files() {
        let mut stats = Statistics::new(["POST:/users"]);
        let tokens = BTreeMap::new();
        stats.update(
            "POST:/users",
            &tokens,
            &[assign(&[("a", "Null")])],
            &[BTreeMap::new()],
            &[400],
            &[json!({"message": "name must not be blank"})],
            true,
        );
        let dir = tempfile::tempdir().unwrap();
        stats.report(dir.path()).unwrap();
        assert!(dir.path().join("status_codes.json").exists());
        assert!(dir.path().join("time_deltas.json").exists());
        let op_dir = dir.path().join("POST__users");
        assert!(op_dir.join("status_by_round.json").exists());
        assert!(op_dir.join("error_forbidden_tuples.json").exists());
    }
}
