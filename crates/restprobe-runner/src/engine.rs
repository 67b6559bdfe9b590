//! The adaptive drive loop.
//!
//! One `Engine` owns the whole run: the parsed operations, the resource
//! store, the statistics, the scheduler, and the solver. The generation
//! phase walks operations in dependency order, learning valid inputs and
//! forbidden combinations; the mutation phase revisits operations with
//! type-confused values and content types, hunting 5xx responses.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use restprobe_core::{
    ClassAssignment, Config, ContentType, Equivalence, FactorId, FactorKind, FactorTree,
    GreedySolver, ParamLocation, RestOp, Scheduler, Solver, SolverKind, Stage, Statistics,
};

use crate::executor::{Executor, ExecutorError, PreparedRequest};
use crate::manager::EquivalenceManager;
use crate::pict::PictSolver;
use crate::spec::{self, SpecError};

/// Trigger-probability threshold applied to the 4xx monitor when forming
/// the solver's forbidden tuples.
const GENERATION_THRESHOLD: f64 = 0.7;
/// Bounded wait for the external solver.
const SOLVER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Final per-operation tallies handed to the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct OpSummary {
    pub op_id: String,
    pub ok: u64,
    pub client_error: u64,
    pub server_error: u64,
    pub bug_fragments: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub operations: Vec<OpSummary>,
    #[serde(rename = "elapsed_secs", serialize_with = "secs_f64")]
    pub elapsed: Duration,
}

fn secs_f64<S>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(elapsed.as_secs_f64())
}

impl RunSummary {
    pub fn total_server_errors(&self) -> u64 {
        self.operations.iter().map(|o| o.server_error).sum()
    }

    pub fn total_bug_fragments(&self) -> usize {
        self.operations.iter().map(|o| o.bug_fragments).sum()
    }
}

enum RoundOutcome {
    Completed,
    /// Every case in the round was skipped on an unresolved binding.
    Empty,
    TransportFailed,
}

/// Consecutive empty rounds tolerated before giving up on an operation.
const EMPTY_ROUND_LIMIT: u32 = 3;

pub struct Engine {
    config: Config,
    ops: Vec<RestOp>,
    store: restprobe_core::ResourceStore,
    stats: Statistics,
    scheduler: Scheduler,
    managers: BTreeMap<String, EquivalenceManager>,
    solver: Box<dyn Solver>,
    executor: Executor,
    rng: SmallRng,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self, EngineError> {
        let doc = spec::load_document(&config.spec)?;
        let ops = spec::extract_operations(&doc)?;
        tracing::info!(operations = ops.len(), spec = %config.spec.display(), "loaded document");

        let executor = Executor::new(
            &config.base_url,
            config.headers.clone(),
            config.query_auth.clone(),
        )?;
        let seed = config.seed.unwrap_or_else(rand::random);
        let solver: Box<dyn Solver> = match config.solver {
            SolverKind::Pict => {
                let binary = config
                    .pict_path
                    .clone()
                    .unwrap_or_else(|| "pict".into());
                Box::new(PictSolver::new(
                    binary,
                    config.output_dir.join("pict"),
                    SOLVER_TIMEOUT,
                ))
            }
            SolverKind::Greedy => Box::new(GreedySolver::new(seed)),
        };

        let stats = Statistics::new(ops.iter().map(RestOp::id));
        let scheduler = Scheduler::new(&ops);
        Ok(Self {
            config,
            ops,
            store: restprobe_core::ResourceStore::new(),
            stats,
            scheduler,
            managers: BTreeMap::new(),
            solver,
            executor,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Run both phases within the wall-clock budget and write the report.
    pub fn run(&mut self) -> Result<RunSummary, EngineError> {
        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.time_budget_secs);

        tracing::info!("generation phase");
        while Instant::now() < deadline {
            let Some(op_id) = self.scheduler.next_op() else {
                break;
            };
            self.work(&op_id, Stage::Generate, deadline)?;
        }

        tracing::info!("mutation phase");
        while Instant::now() < deadline {
            let op_id = match self.scheduler.next_buggy_op() {
                Some(id) => id,
                None => {
                    let stats = &self.stats;
                    match self
                        .scheduler
                        .next_weighted_op(&mut self.rng, |id| stats.bug_fragment_count(id))
                    {
                        Some(id) => id,
                        None => break,
                    }
                }
            };
            self.work(&op_id, Stage::Mutate, deadline)?;
        }

        self.stats.report(&self.config.output_dir)?;
        Ok(self.summary(started.elapsed()))
    }

    fn summary(&self, elapsed: Duration) -> RunSummary {
        let operations = self
            .stats
            .status_tallies()
            .iter()
            .map(|(op_id, tally)| OpSummary {
                op_id: op_id.clone(),
                ok: tally.ok,
                client_error: tally.client_error,
                server_error: tally.server_error,
                bug_fragments: self.stats.bug_fragment_count(op_id),
            })
            .collect();
        RunSummary {
            operations,
            elapsed,
        }
    }

    /// Work one operation until its stop rule fires.
    fn work(&mut self, op_id: &str, stage: Stage, deadline: Instant) -> Result<(), EngineError> {
        let Some(op) = self.ops.iter().find(|o| o.id() == op_id).cloned() else {
            return Ok(());
        };
        tracing::debug!(op = op_id, ?stage, "working operation");

        let mut empty_rounds = 0;
        while Instant::now() < deadline {
            match self.round(&op, stage)? {
                RoundOutcome::TransportFailed => {
                    self.scheduler.failed(op_id);
                    self.stats.reset(op_id);
                    return Ok(());
                }
                RoundOutcome::Empty => {
                    empty_rounds += 1;
                    if empty_rounds >= EMPTY_ROUND_LIMIT {
                        break;
                    }
                    continue;
                }
                RoundOutcome::Completed => empty_rounds = 0,
            }
            if self.stats.should_stop(op_id, stage) {
                break;
            }
        }

        if self.stats.tally(op_id).is_none_or(|t| t.ok == 0) {
            self.scheduler.failed(op_id);
        }
        self.stats.reset(op_id);
        Ok(())
    }

    fn round(&mut self, op: &RestOp, stage: Stage) -> Result<RoundOutcome, EngineError> {
        let op_id = op.id();
        let manager = self.managers.entry(op_id.clone()).or_default();

        let (cases, content_type) = match stage {
            Stage::Generate => {
                let producers: Vec<&RestOp> = self.ops.iter().collect();
                manager.initialize(op, &self.store, &producers, &mut self.rng);

                let forbidden: Vec<ClassAssignment> = self
                    .stats
                    .error_monitors
                    .get(&op_id)
                    .map(|m| m.forbidden_tuples(GENERATION_THRESHOLD))
                    .unwrap_or_default();
                // No success yet and no fresh discoveries: spend more on
                // combination coverage.
                let struggling = self.stats.tally(&op_id).is_none_or(|t| t.ok == 0)
                    && self
                        .stats
                        .error_monitors
                        .get(&op_id)
                        .is_some_and(|m| m.since_last_discover > 0);
                let strength = if struggling {
                    self.config.strength.max(2)
                } else {
                    1
                };
                let cases =
                    manager.sample(self.solver.as_mut(), &forbidden, strength, &mut self.rng);
                let ct = op.content_types.first().copied().unwrap_or(ContentType::Json);
                (cases, ct)
            }
            Stage::Mutate => {
                if manager.factors().is_empty() {
                    let producers: Vec<&RestOp> = self.ops.iter().collect();
                    manager.initialize(op, &self.store, &producers, &mut self.rng);
                }
                let mut case = manager.draw_all(&mut self.rng);
                for global in manager.factors() {
                    if self.rng.gen_bool(0.5) {
                        if let Some(class) = manager.mutate(&global, &mut self.rng) {
                            case.insert(global, class);
                        }
                    }
                }
                let ct = if self.rng.gen_bool(0.5) {
                    ContentType::ALL
                        .choose(&mut self.rng)
                        .copied()
                        .unwrap_or(ContentType::Json)
                } else {
                    op.content_types.first().copied().unwrap_or(ContentType::Json)
                };
                (vec![case], ct)
            }
        };

        self.execute_batch(op, cases, content_type, stage)
    }

    /// Execute a batch of class assignments and digest the results.
    fn execute_batch(
        &mut self,
        op: &RestOp,
        cases: Vec<BTreeMap<String, Equivalence>>,
        content_type: ContentType,
        stage: Stage,
    ) -> Result<RoundOutcome, EngineError> {
        let op_id = op.id();
        let mut binding_cache: BTreeMap<(String, Vec<String>), Option<Value>> = BTreeMap::new();

        let mut equivalences: Vec<ClassAssignment> = Vec::new();
        let mut value_strings: Vec<BTreeMap<String, String>> = Vec::new();
        let mut status_codes: Vec<u16> = Vec::new();
        let mut responses: Vec<Value> = Vec::new();

        for case in cases {
            let Some(concrete) = self.resolve_case(&case, &mut binding_cache) else {
                tracing::debug!(op = %op_id, "unresolved binding, case skipped");
                continue;
            };

            let request = assemble_request(op, &case, &concrete, content_type);
            let (status, body) = match self.executor.send(&request) {
                Ok(result) => result,
                Err(ExecutorError::Transport { url, reason }) => {
                    tracing::warn!(%url, %reason, op = %op_id, "target unreachable");
                    return Ok(RoundOutcome::TransportFailed);
                }
                Err(e) => return Err(e.into()),
            };

            if status / 100 == 2 {
                let entry = if is_empty_body(&body) {
                    assignment_object(op, &concrete)
                } else {
                    body.clone()
                };
                self.store.add_resources(&op.path.resource_node(), &entry);
            }

            equivalences.push(
                case.iter()
                    .map(|(g, c)| (g.clone(), c.describe()))
                    .collect(),
            );
            value_strings.push(
                concrete
                    .iter()
                    .filter_map(|(g, v)| {
                        v.as_ref().map(|v| (g.clone(), value_string(v)))
                    })
                    .collect(),
            );
            status_codes.push(status);
            responses.push(body);
        }

        if status_codes.is_empty() {
            return Ok(RoundOutcome::Empty);
        }
        self.stats.update(
            &op_id,
            &op.token_map(),
            &equivalences,
            &value_strings,
            &status_codes,
            &responses,
            stage == Stage::Generate,
        );
        Ok(RoundOutcome::Completed)
    }

    /// Resolve every class of one case to an optional concrete value.
    /// `None` means at least one binding could not be resolved and the
    /// case should be skipped.
    fn resolve_case(
        &mut self,
        case: &BTreeMap<String, Equivalence>,
        cache: &mut BTreeMap<(String, Vec<String>), Option<Value>>,
    ) -> Option<BTreeMap<String, Option<Value>>> {
        let mut concrete = BTreeMap::new();
        for (global, class) in case {
            let value = match class {
                Equivalence::Binding { node, field } => {
                    let key = (node.clone(), field.clone());
                    let resolved = match cache.get(&key) {
                        Some(v) => v.clone(),
                        None => {
                            let fetched = self
                                .store
                                .retrieve(node, std::slice::from_ref(field), &mut self.rng)
                                .remove(field)
                                .flatten();
                            cache.insert(key, fetched.clone());
                            fetched
                        }
                    };
                    match resolved {
                        Some(v) => Some(v),
                        None => return None,
                    }
                }
                Equivalence::Composite => None,
                other => other.generate(&mut self.rng),
            };
            concrete.insert(global.clone(), value);
        }
        Some(concrete)
    }
}

/// Build the wire request for one case.
fn assemble_request(
    op: &RestOp,
    case: &BTreeMap<String, Equivalence>,
    concrete: &BTreeMap<String, Option<Value>>,
    content_type: ContentType,
) -> PreparedRequest {
    let mut path_values = BTreeMap::new();
    let mut query = Vec::new();
    let mut headers = Vec::new();
    let mut body = None;

    for param in &op.params {
        let name = op.tree.get(param.factor).name.clone();
        match param.location {
            ParamLocation::Body => {
                body = build_value(&op.tree, param.factor, case, concrete);
            }
            location => {
                let global = op.tree.global_name(param.factor);
                let Some(Some(value)) = concrete.get(&global) else {
                    continue;
                };
                let text = value_string(value);
                match location {
                    ParamLocation::Path => {
                        path_values.insert(name, text);
                    }
                    ParamLocation::Query => query.push((name, text)),
                    ParamLocation::Header => headers.push((name, text)),
                    ParamLocation::Body => unreachable!(),
                }
            }
        }
    }

    PreparedRequest {
        method: op.verb,
        path: op.path.resolve(&path_values),
        query,
        headers,
        body: if op.verb.has_body() { body } else { None },
        content_type,
    }
}

/// Recursively build a JSON value for a factor subtree. Containers follow
/// their assigned class: `Composite` (or no assignment) assembles from
/// children, `Enumerated`/`Null` short-circuit.
fn build_value(
    tree: &FactorTree,
    id: FactorId,
    case: &BTreeMap<String, Equivalence>,
    concrete: &BTreeMap<String, Option<Value>>,
) -> Option<Value> {
    let global = tree.global_name(id);
    match &tree.get(id).kind {
        FactorKind::Object { properties } => match case.get(&global) {
            Some(Equivalence::Null) => None,
            Some(Equivalence::Enumerated(v)) => Some(v.clone()),
            _ => {
                let mut map = serde_json::Map::new();
                for &child in properties {
                    if let Some(v) = build_value(tree, child, case, concrete) {
                        map.insert(tree.get(child).name.clone(), v);
                    }
                }
                Some(Value::Object(map))
            }
        },
        FactorKind::Array { item } => match case.get(&global) {
            Some(Equivalence::Null) => None,
            Some(Equivalence::Enumerated(v)) => Some(v.clone()),
            _ => {
                let element = (tree.get(*item).parent == Some(id))
                    .then(|| build_value(tree, *item, case, concrete))
                    .flatten();
                Some(Value::Array(element.into_iter().collect()))
            }
        },
        _ => concrete.get(&global).cloned().flatten(),
    }
}

fn value_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_empty_body(body: &Value) -> bool {
    match body {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// A 2xx with an empty body still proves the request's values were
/// accepted; store them as the created resource.
fn assignment_object(op: &RestOp, concrete: &BTreeMap<String, Option<Value>>) -> Value {
    let mut map = serde_json::Map::new();
    for id in op.tree.leaf_ids() {
        let global = op.tree.global_name(id);
        if let Some(Some(v)) = concrete.get(&global) {
            map.insert(op.tree.get(id).name.clone(), v.clone());
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use restprobe_core::op::RestPath;
    use restprobe_core::{Factor, Method, RootParam};
    use serde_json::json;
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;

    fn order_op() -> RestOp {
        let mut tree = FactorTree::new();
        let id = tree.add_root(Factor::new("orderId", FactorKind::int()));
        let verbose = tree.add_root(Factor::new("verbose", FactorKind::Bool));
        let body = tree.add_root(Factor::new(
            "body",
            FactorKind::Object {
                properties: Vec::new(),
            },
        ));
        tree.add_child(body, Factor::new("note", FactorKind::string()));
        let lines = tree.add_child(
            body,
            Factor::new("lines", FactorKind::Array { item: 0 }),
        );
        tree.add_child(lines, Factor::new("_item", FactorKind::string()));
        tree.compute_tokens(&["orders".to_string(), "{orderId}".to_string()]);

        RestOp {
            verb: Method::Put,
            path: RestPath::parse("/orders/{orderId}"),
            tree,
            params: vec![
                RootParam {
                    factor: id,
                    location: ParamLocation::Path,
                },
                RootParam {
                    factor: verbose,
                    location: ParamLocation::Query,
                },
                RootParam {
                    factor: body,
                    location: ParamLocation::Body,
                },
            ],
            content_types: vec![ContentType::Json],
            responses: Vec::new(),
        }
    }

    fn class_case(pairs: &[(&str, Equivalence)]) -> BTreeMap<String, Equivalence> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn assemble_builds_path_query_and_body() {
        let op = order_op();
        let case = class_case(&[
            ("orderId", Equivalence::PositiveOne),
            ("verbose", Equivalence::Enumerated(json!(true))),
            ("body", Equivalence::Composite),
            ("body.note", Equivalence::Enumerated(json!("hi"))),
            ("body.lines", Equivalence::Composite),
            ("body.lines._item", Equivalence::Enumerated(json!("x"))),
        ]);
        let concrete: BTreeMap<String, Option<Value>> = [
            ("orderId".to_string(), Some(json!(1))),
            ("verbose".to_string(), Some(json!(true))),
            ("body".to_string(), None),
            ("body.note".to_string(), Some(json!("hi"))),
            ("body.lines".to_string(), None),
            ("body.lines._item".to_string(), Some(json!("x"))),
        ]
        .into_iter()
        .collect();

        let req = assemble_request(&op, &case, &concrete, ContentType::Json);
        assert_eq!(req.path, "/orders/1");
        assert_eq!(req.query, vec![("verbose".to_string(), "true".to_string())]);
        assert_eq!(
            req.body,
            Some(json!({"note": "hi", "lines": ["x"]}))
        );
    }

    #[test]
    fn omitted_values_drop_out_of_the_request() {
        let op = order_op();
        let case = class_case(&[
            ("orderId", Equivalence::Null),
            ("verbose", Equivalence::Null),
            ("body", Equivalence::Composite),
            ("body.note", Equivalence::Null),
            ("body.lines", Equivalence::Enumerated(json!([]))),
        ]);
        let concrete: BTreeMap<String, Option<Value>> = [
            ("orderId".to_string(), None),
            ("verbose".to_string(), None),
            ("body".to_string(), None),
            ("body.note".to_string(), None),
            ("body.lines".to_string(), None),
        ]
        .into_iter()
        .collect();

        let req = assemble_request(&op, &case, &concrete, ContentType::Json);
        // Blank path parameter falls back to "1".
        assert_eq!(req.path, "/orders/1");
        assert!(req.query.is_empty());
        assert_eq!(req.body, Some(json!({"lines": []})));
    }

    #[test]
    fn get_requests_never_carry_a_body() {
        let mut op = order_op();
        op.verb = Method::Get;
        let case = class_case(&[("body", Equivalence::Composite)]);
        let concrete: BTreeMap<String, Option<Value>> =
            [("body".to_string(), None)].into_iter().collect();
        let req = assemble_request(&op, &case, &concrete, ContentType::Json);
        assert_eq!(req.body, None);
    }

    #[test]
    fn assignment_object_collects_present_leaves() {
        let op = order_op();
        let concrete: BTreeMap<String, Option<Value>> = [
            ("orderId".to_string(), Some(json!(7))),
            ("body.note".to_string(), Some(json!("n"))),
            ("verbose".to_string(), None),
        ]
        .into_iter()
        .collect();
        let obj = assignment_object(&op, &concrete);
        assert_eq!(obj, json!({"orderId": 7, "note": "n"}));
    }

    #[test]
    fn summaries_serialize_for_the_json_output() {
        let summary = RunSummary {
            operations: vec![OpSummary {
                op_id: "GET:/pets".to_string(),
                ok: 3,
                client_error: 1,
                server_error: 0,
                bug_fragments: 2,
            }],
            elapsed: Duration::from_millis(1500),
        };
        let v = serde_json::to_value(&summary).unwrap();
        assert_eq!(v["elapsed_secs"], json!(1.5));
        assert_eq!(v["operations"][0]["op_id"], json!("GET:/pets"));
        assert_eq!(v["operations"][0]["bug_fragments"], json!(2));
        assert!(v["operations"][0].get("elapsed").is_none());
    }

    /// Serve every incoming request with the same response until dropped.
    fn serve_all(response: &'static str) -> (String, std::sync::mpsc::Receiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
                if tx.send(()).is_err() {
                    break;
                }
            }
        });
        (format!("http://{addr}"), rx)
    }

    #[test]
    fn engine_runs_a_tiny_spec_and_reports() {
        let (base, requests) = serve_all(
            "HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\n{\"id\": 42}",
        );
        let dir = tempfile::tempdir().unwrap();
        let spec_path = dir.path().join("api.json");
        std::fs::write(
            &spec_path,
            serde_json::to_string(&json!({
                "openapi": "3.0.0",
                "paths": {
                    "/pets": {
                        "get": {
                            "parameters": [
                                {"name": "limit", "in": "query",
                                 "schema": {"type": "integer"}}
                            ],
                            "responses": {"200": {"description": "ok"}}
                        }
                    }
                }
            }))
            .unwrap(),
        )
        .unwrap();

        let config = Config {
            spec: spec_path,
            base_url: base,
            time_budget_secs: 2,
            output_dir: dir.path().join("out"),
            seed: Some(42),
            ..Config::default()
        };
        let mut engine = Engine::new(config).unwrap();
        let summary = engine.run().unwrap();

        assert_eq!(summary.operations.len(), 1);
        assert!(summary.operations[0].ok > 0);
        assert!(requests.try_iter().count() > 0);
        assert!(dir.path().join("out/status_codes.json").exists());
    }
}
