//! Covering-array generation through the external `pict` tool.
//!
//! The model file uses indexed parameters (`P0`, `P1`, ...) and value
//! indices so factor names and class descriptions never have to survive
//! PICT's syntax. The subprocess gets a bounded wait; a hung solver is
//! killed and the caller degrades to random sampling.

use std::io::Read as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use restprobe_core::{Assignment, FactorDomain, ForbiddenTuple, Solver, SolverError};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub struct PictSolver {
    binary: PathBuf,
    work_dir: PathBuf,
    timeout: Duration,
    counter: u32,
}

impl PictSolver {
    pub fn new(binary: PathBuf, work_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            binary,
            work_dir,
            timeout,
            counter: 0,
        }
    }
}

/// Render the PICT model: one indexed parameter per factor, one
/// disjunction constraint per applicable forbidden tuple.
fn model_text(factors: &[FactorDomain], forbidden: &[ForbiddenTuple]) -> String {
    let mut out = String::new();
    for (i, factor) in factors.iter().enumerate() {
        let indices: Vec<String> = (0..factor.values.len()).map(|v| v.to_string()).collect();
        out.push_str(&format!("P{i}: {}\n", indices.join(",")));
    }
    out.push('\n');
    for tuple in forbidden {
        let mut clauses = Vec::new();
        for (name, value) in tuple {
            let Some(fi) = factors.iter().position(|f| &f.name == name) else {
                clauses.clear();
                break;
            };
            let Some(vi) = factors[fi].values.iter().position(|v| v == value) else {
                // The forbidden value is outside this round's truncated
                // domain; the tuple cannot occur anyway.
                clauses.clear();
                break;
            };
            clauses.push(format!("[P{fi}] <> {vi}"));
        }
        if !clauses.is_empty() {
            out.push_str(&format!("{};\n", clauses.join(" OR ")));
        }
    }
    out
}

impl Solver for PictSolver {
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
        let strength = strength.clamp(1, factors.len());

        std::fs::create_dir_all(&self.work_dir)?;
        self.counter += 1;
        let model_path = self.work_dir.join(format!("pict_model_{}.txt", self.counter));
        std::fs::write(&model_path, model_text(&factors, forbidden))?;

        let mut child = Command::new(&self.binary)
            .arg(&model_path)
            .arg(format!("/o:{strength}"))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SolverError::Subprocess(e.to_string()))?;

        let mut stdout_pipe = child.stdout.take();
        let reader = std::thread::spawn(move || {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf);
            }
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = reader.join();
                    return Err(SolverError::Timeout(self.timeout.as_secs()));
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        };
        let stdout = reader.join().unwrap_or_default();

        if !status.success() {
            let mut stderr = String::new();
            if let Some(pipe) = child.stderr.as_mut() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(SolverError::Subprocess(format!(
                "exit {status}: {}",
                stderr.trim()
            )));
        }

        Ok(parse_output(&stdout, &factors))
    }
}

/// PICT prints a TSV: a header of parameter labels, then one row of value
/// indices per generated case.
fn parse_output(stdout: &str, factors: &[FactorDomain]) -> Vec<Assignment> {
    let mut lines = stdout.lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<Option<usize>> = header
        .split('\t')
        .map(|label| label.trim().strip_prefix('P')?.parse().ok())
        .collect();

    let mut out = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let mut row = Assignment::new();
        for (cell, column) in line.split('\t').zip(&columns) {
            let Some(fi) = column else { continue };
            let Ok(vi) = cell.trim().parse::<usize>() else {
                continue;
            };
            if let Some(factor) = factors.get(*fi) {
                if let Some(value) = factor.values.get(vi) {
                    row.insert(factor.name.clone(), value.clone());
                }
            }
        }
        if !row.is_empty() {
            out.push(row);
        }
    }
    out
}
