//! Random, well-formed operation sequences.
//!
//! The generator tracks which transactions are open and which sites are
//! down, so every operation it emits is accepted by the engine: no
//! duplicate `begin`, no operation after `end`, no write by a read-only
//! transaction. Conflicts, deadlocks and failure aborts arise naturally.

use std::collections::BTreeSet;

use repdb_types::{Operation, SiteId, TxnId, VarId};

use crate::rng::SimRng;
use crate::SimConfig;

/// Largest value written by generated `W` operations (exclusive).
const MAX_WRITE_VALUE: i64 = 1000;

/// Generates operations from a seeded RNG.
#[derive(Debug, Clone)]
pub struct WorkloadGenerator {
    rng: SimRng,
    site_count: u32,
    variable_count: u32,
    transactions: u64,
    fail_probability: f64,
    read_only_probability: f64,
    next_txn: u64,
    open: Vec<(TxnId, bool)>,
    down: BTreeSet<SiteId>,
}

impl WorkloadGenerator {
    pub fn new(rng: SimRng, config: &SimConfig) -> Self {
        Self {
            rng,
            site_count: config.engine.site_count,
            variable_count: config.engine.variable_count,
            transactions: config.transactions,
            fail_probability: config.fail_probability,
            read_only_probability: config.read_only_probability,
            next_txn: 1,
            open: Vec::new(),
            down: BTreeSet::new(),
        }
    }

    /// Produces `steps` operations followed by an `end` for every
    /// transaction still open.
    pub fn generate(&mut self, steps: usize) -> Vec<Operation> {
        let mut ops: Vec<Operation> = (0..steps).map(|_| self.next_op()).collect();
        ops.extend(self.finish());
        ops
    }

    /// Emits an `end` for every open transaction, oldest first.
    pub fn finish(&mut self) -> Vec<Operation> {
        self.open
            .drain(..)
            .map(|(txn, _)| Operation::end(txn))
            .collect()
    }

    pub fn next_op(&mut self) -> Operation {
        if self.rng.next_bool_with_probability(self.fail_probability) {
            return self.site_op();
        }

        let can_begin = self.next_txn <= self.transactions;
        if self.open.is_empty() {
            return if can_begin {
                self.begin()
            } else {
                Operation::Dump
            };
        }

        match self.rng.next_usize(20) {
            0..=2 if can_begin => self.begin(),
            3 | 4 => self.end(),
            5 => Operation::Dump,
            _ => self.access(),
        }
    }

    fn begin(&mut self) -> Operation {
        let txn = TxnId::new(self.next_txn);
        self.next_txn += 1;
        let read_only = self
            .rng
            .next_bool_with_probability(self.read_only_probability);
        self.open.push((txn, read_only));
        if read_only {
            Operation::begin_read_only(txn)
        } else {
            Operation::begin(txn)
        }
    }

    fn end(&mut self) -> Operation {
        let index = self.rng.next_usize(self.open.len());
        let (txn, _) = self.open.remove(index);
        Operation::end(txn)
    }

    fn access(&mut self) -> Operation {
        let (txn, read_only) = *self.rng.choose(&self.open);
        let var = VarId::new(self.rng.next_u32_inclusive(1, self.variable_count));
        if read_only || self.rng.next_bool_with_probability(0.5) {
            Operation::read(txn, var)
        } else {
            let value = self.rng.next_i64_range(0, MAX_WRITE_VALUE);
            Operation::write(txn, var, value)
        }
    }

    /// Fails an up site or recovers a down one.
    fn site_op(&mut self) -> Operation {
        let all_down = self.down.len() == self.site_count as usize;
        if !self.down.is_empty() && (all_down || self.rng.next_bool_with_probability(0.5)) {
            let down: Vec<SiteId> = self.down.iter().copied().collect();
            let site = *self.rng.choose(&down);
            self.down.remove(&site);
            return Operation::recover(site);
        }

        let up: Vec<SiteId> = (1..=self.site_count)
            .map(SiteId::new)
            .filter(|site| !self.down.contains(site))
            .collect();
        let site = *self.rng.choose(&up);
        self.down.insert(site);
        Operation::fail(site)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn generator(seed: u64, config: &SimConfig) -> WorkloadGenerator {
        WorkloadGenerator::new(SimRng::new(seed), config)
    }

    #[test]
    fn same_seed_same_workload() {
        let config = SimConfig::default();
        assert_eq!(
            generator(9, &config).generate(200),
            generator(9, &config).generate(200)
        );
    }

    #[test]
    fn workload_is_well_formed() {
        let config = SimConfig::default()
            .with_transactions(12)
            .with_fail_probability(0.2);
        let ops = generator(3, &config).generate(500);

        // (read_only, ended) per transaction.
        let mut seen: BTreeMap<TxnId, (bool, bool)> = BTreeMap::new();
        for op in &ops {
            match *op {
                Operation::Begin { txn } | Operation::BeginReadOnly { txn } => {
                    let read_only = matches!(op, Operation::BeginReadOnly { .. });
                    assert!(seen.insert(txn, (read_only, false)).is_none());
                }
                Operation::Read { txn, var } => {
                    assert!(matches!(seen.get(&txn), Some((_, false))));
                    assert!((1..=20).contains(&var.index()));
                }
                Operation::Write { txn, .. } => {
                    assert!(matches!(seen.get(&txn), Some((false, false))));
                }
                Operation::End { txn } => {
                    let entry = seen.get_mut(&txn).expect("begun before end");
                    assert!(!entry.1);
                    entry.1 = true;
                }
                Operation::Fail { site } | Operation::Recover { site } => {
                    assert!((1..=10).contains(&site.as_u32()));
                }
                Operation::Dump | Operation::QueryState => {}
            }
        }

        assert!(seen.len() <= 12);
        assert!(seen.values().all(|(_, ended)| *ended));
    }

    #[test]
    fn site_operations_alternate_sensibly() {
        let config = SimConfig::default().with_fail_probability(1.0);
        let mut down = BTreeSet::new();
        for op in generator(11, &config).generate(300) {
            match op {
                Operation::Fail { site } => assert!(down.insert(site)),
                Operation::Recover { site } => assert!(down.remove(&site)),
                _ => {}
            }
        }
    }
}
