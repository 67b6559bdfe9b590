//! Operation scheduling: ordered traversal, retry queue, and the random
//! policies used once the ordered queues drain.

use std::collections::{BTreeMap, VecDeque};

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use crate::op::{Method, RestOp};

/// Retries granted to an operation that never produced a 2xx.
pub const MAX_RETRIES: u32 = 3;

/// Sort key snapshot of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpKey {
    pub id: String,
    pub verb: Method,
    pub depth: usize,
}

impl OpKey {
    fn of(op: &RestOp) -> Self {
        Self {
            id: op.id(),
            verb: op.verb,
            depth: op.path.depth(),
        }
    }
}

/// Descending path depth first (more specific paths before their
/// ancestors), POST before other verbs at equal depth.
fn sort_ops(mut ops: Vec<OpKey>) -> (Vec<OpKey>, Vec<OpKey>) {
    ops.sort_by_key(|k| {
        (
            std::cmp::Reverse(k.depth),
            if k.verb == Method::Post { 0 } else { 1 },
        )
    });
    let (deletes, rest): (Vec<OpKey>, Vec<OpKey>) =
        ops.into_iter().partition(|k| k.verb == Method::Delete);
    (rest, deletes)
}

#[derive(Debug)]
pub struct Scheduler {
    queue: VecDeque<OpKey>,
    deletes: VecDeque<OpKey>,
    failed: Vec<OpKey>,
    buggy: VecDeque<OpKey>,
    random_pool: Vec<OpKey>,
    attempts: BTreeMap<String, u32>,
    all: Vec<OpKey>,
}

impl Scheduler {
    pub fn new(ops: &[RestOp]) -> Self {
        let keys: Vec<OpKey> = ops.iter().map(OpKey::of).collect();
        let (queue, deletes) = sort_ops(keys.clone());
        let buggy: VecDeque<OpKey> =
            queue.iter().chain(deletes.iter()).cloned().collect();
        Self {
            queue: queue.into(),
            deletes: deletes.into(),
            failed: Vec::new(),
            buggy,
            random_pool: keys.clone(),
            attempts: keys.iter().map(|k| (k.id.clone(), 0)).collect(),
            all: keys,
        }
    }

    fn record(&mut self, key: &OpKey) {
        *self.attempts.entry(key.id.clone()).or_insert(0) += 1;
    }

    /// Ordered policy: drain the main queue, then re-sort and re-queue the
    /// retry list, then fall back to the delete queue. Dequeued deletes
    /// are recycled to the delete queue's tail and stay retryable until
    /// their attempt counter reaches the cap.
    pub fn next_op(&mut self) -> Option<String> {
        let key = if let Some(k) = self.queue.pop_front() {
            Some(k)
        } else if !self.failed.is_empty() {
            let (cur, del) = sort_ops(std::mem::take(&mut self.failed));
            for d in del.into_iter().rev() {
                self.deletes.push_front(d);
            }
            self.queue.extend(cur);
            self.queue.pop_front().or_else(|| self.pop_delete())
        } else {
            self.pop_delete()
        };

        let key = key?;
        self.record(&key);
        Some(key.id)
    }

    fn pop_delete(&mut self) -> Option<OpKey> {
        while let Some(key) = self.deletes.pop_front() {
            if self.attempts.get(&key.id).copied().unwrap_or(0) >= MAX_RETRIES {
                continue;
            }
            self.deletes.push_back(key.clone());
            return Some(key);
        }
        None
    }

    /// Uniform-random policy without ordering; previously failed
    /// operations re-enter the pool first.
    pub fn next_random_op<R: Rng>(&mut self, rng: &mut R) -> Option<String> {
        if !self.failed.is_empty() {
            self.random_pool.append(&mut self.failed);
        }
        if self.random_pool.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.random_pool.len());
        let key = self.random_pool.swap_remove(idx);
        self.record(&key);
        Some(key.id)
    }

    /// One sweep over every operation in initial order, used when the
    /// engine switches to mutation.
    pub fn next_buggy_op(&mut self) -> Option<String> {
        self.buggy.pop_front().map(|k| k.id)
    }

    /// Bug-weighted random selection across all operations; the weight of
    /// an operation is `1 + bug_weight(op)` (its distinct 5xx fragment
    /// count), biasing toward operations known to be fruitful to mutate.
    pub fn next_weighted_op<R, W>(&mut self, rng: &mut R, bug_weight: W) -> Option<String>
    where
        R: Rng,
        W: Fn(&str) -> usize,
    {
        if self.all.is_empty() {
            return None;
        }
        let weights: Vec<f64> = self
            .all
            .iter()
            .map(|k| 1.0 + bug_weight(&k.id) as f64)
            .collect();
        let dist = WeightedIndex::new(&weights).ok()?;
        let key = self.all[dist.sample(rng)].clone();
        self.record(&key);
        Some(key.id)
    }

    /// Queue an operation for retry; ignored once its attempt counter
    /// reaches the cap (the operation stays eligible for the random
    /// policies only).
    pub fn failed(&mut self, op_id: &str) {
        if self.attempts.get(op_id).copied().unwrap_or(0) >= MAX_RETRIES {
            return;
        }
        if let Some(key) = self.all.iter().find(|k| k.id == op_id) {
            self.failed.push(key.clone());
        }
    }

    pub fn attempts(&self, op_id: &str) -> u32 {
        self.attempts.get(op_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::FactorTree;
    use crate::op::{ContentType, RestPath};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn op(verb: Method, path: &str) -> RestOp {
        RestOp {
            verb,
            path: RestPath::parse(path),
            tree: FactorTree::new(),
            params: Vec::new(),
            content_types: vec![ContentType::Json],
            responses: Vec::new(),
        }
    }

    #[test]
    fn deeper_paths_dequeue_first_post_breaks_ties() {
        let ops = vec![
            op(Method::Get, "/a"),
            op(Method::Post, "/a/{x}"),
            op(Method::Get, "/a/{x}"),
            op(Method::Post, "/a"),
        ];
        let mut s = Scheduler::new(&ops);
        assert_eq!(s.next_op(), Some("POST:/a/{x}".to_string()));
        assert_eq!(s.next_op(), Some("GET:/a/{x}".to_string()));
        assert_eq!(s.next_op(), Some("POST:/a".to_string()));
        assert_eq!(s.next_op(), Some("GET:/a".to_string()));
    }

    #[test]
    fn deletes_wait_in_tail_queue_and_recycle() {
        let ops = vec![
            op(Method::Delete, "/a/{x}"),
            op(Method::Get, "/a"),
            op(Method::Delete, "/b/{x}"),
        ];
        let mut s = Scheduler::new(&ops);
        assert_eq!(s.next_op(), Some("GET:/a".to_string()));
        // Deletes are recycled in order until each hits the attempt cap.
        for _ in 0..MAX_RETRIES {
            assert_eq!(s.next_op(), Some("DELETE:/a/{x}".to_string()));
            assert_eq!(s.next_op(), Some("DELETE:/b/{x}".to_string()));
        }
        assert_eq!(s.next_op(), None);
    }

    #[test]
    fn failed_ops_requeue_until_retry_cap() {
        let ops = vec![op(Method::Post, "/a")];
        let mut s = Scheduler::new(&ops);
        let id = s.next_op().unwrap();

        for _ in 0..2 {
            s.failed(&id);
            assert_eq!(s.next_op(), Some(id.clone()));
        }
        assert_eq!(s.attempts(&id), 3);
        // The cap is reached: failed() is a no-op, the queue stays empty.
        s.failed(&id);
        assert_eq!(s.next_op(), None);
    }

    #[test]
    fn buggy_sweep_returns_each_once() {
        let ops = vec![op(Method::Post, "/a"), op(Method::Get, "/b")];
        let mut s = Scheduler::new(&ops);
        assert!(s.next_buggy_op().is_some());
        assert!(s.next_buggy_op().is_some());
        assert_eq!(s.next_buggy_op(), None);
    }

    #[test]
    fn weighted_selection_prefers_buggy_ops() {
        let ops = vec![op(Method::Post, "/quiet"), op(Method::Post, "/noisy")];
        let mut s = Scheduler::new(&ops);
        let mut rng = SmallRng::seed_from_u64(42);
        let mut noisy = 0;
        for _ in 0..200 {
            let picked = s
                .next_weighted_op(&mut rng, |id| if id.contains("noisy") { 50 } else { 0 })
                .unwrap();
            if picked.contains("noisy") {
                noisy += 1;
            }
        }
        assert!(noisy > 150);
    }

    #[test]
    fn random_policy_drains_pool() {
        let ops = vec![op(Method::Get, "/a"), op(Method::Get, "/b")];
        let mut s = Scheduler::new(&ops);
        let mut rng = SmallRng::seed_from_u64(42);
        assert!(s.next_random_op(&mut rng).is_some());
        assert!(s.next_random_op(&mut rng).is_some());
        assert_eq!(s.next_random_op(&mut rng), None);
    }
}
