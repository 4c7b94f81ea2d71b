//! Unit tests for repdb-kernel
//!
//! The engine is deterministic, so every scenario is a short operation
//! sequence followed by assertions on events and state.

use std::collections::BTreeSet;

use repdb_types::{LockMode, Operation, SiteId, SiteStatus, Tick, TxnId, VarId};

use crate::{
    AbortReason, Engine, EngineConfig, Event, KernelError, PendingAction, TxnStatus, WaitEdge,
};

// ============================================================================
// Test Helpers
// ============================================================================

const T1: TxnId = TxnId::new(1);
const T2: TxnId = TxnId::new(2);
const T3: TxnId = TxnId::new(3);

fn x(index: u32) -> VarId {
    VarId::new(index)
}

fn s(id: u32) -> SiteId {
    SiteId::new(id)
}

/// Feeds operations at consecutive ticks, the way a script would.
struct Harness {
    engine: Engine,
    tick: Tick,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        Self {
            engine: Engine::new(config).expect("valid config"),
            tick: Tick::ZERO,
        }
    }

    fn step(&mut self, op: Operation) -> Vec<Event> {
        self.try_step(op).expect("operation should be accepted")
    }

    fn try_step(&mut self, op: Operation) -> Result<Vec<Event>, KernelError> {
        self.tick = self.tick.next();
        self.engine.apply(self.tick, op)
    }

    fn run(&mut self, ops: impl IntoIterator<Item = Operation>) -> Vec<Event> {
        ops.into_iter().flat_map(|op| self.step(op)).collect()
    }

    fn committed(&self, site: u32, var: u32) -> i64 {
        self.engine
            .site(s(site))
            .and_then(|site| site.history(x(var)))
            .map(|history| history.latest().value)
            .expect("variable stored at site")
    }

    fn status(&self, txn: TxnId) -> TxnStatus {
        self.engine
            .transaction(txn)
            .map(|t| t.status())
            .expect("known transaction")
    }
}

fn reads(events: &[Event]) -> Vec<(TxnId, VarId, i64, SiteId)> {
    events
        .iter()
        .filter_map(|event| match *event {
            Event::ReadValue {
                txn,
                var,
                value,
                site,
            } => Some((txn, var, value, site)),
            _ => None,
        })
        .collect()
}

fn aborted(events: &[Event]) -> Vec<(TxnId, AbortReason)> {
    events
        .iter()
        .filter_map(|event| match *event {
            Event::Aborted { txn, reason } => Some((txn, reason)),
            _ => None,
        })
        .collect()
}

fn committed(events: &[Event]) -> Vec<TxnId> {
    events
        .iter()
        .filter_map(|event| match *event {
            Event::Committed { txn, .. } => Some(txn),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Basic Reads and Writes
// ============================================================================

#[test]
fn initial_state_matches_layout() {
    let h = Harness::new();
    assert_eq!(h.committed(1, 2), 20);
    assert_eq!(h.committed(2, 1), 10);
    assert_eq!(h.committed(10, 19), 190);
    assert!(h.engine.site(s(1)).is_some_and(|site| !site.stores(x(1))));
}

#[test]
fn write_reaches_every_replica() {
    let mut h = Harness::new();
    h.step(Operation::begin(T1));
    let events = h.step(Operation::write(T1, x(4), 7));

    let applied = events
        .iter()
        .filter(|event| matches!(event, Event::WriteApplied { .. }))
        .count();
    assert_eq!(applied, 10);
    for site in h.engine.sites() {
        assert_eq!(site.current_value(x(4)), Some(7));
        assert_eq!(
            site.lock(x(4)).map(|lock| lock.mode()),
            Some(LockMode::Exclusive)
        );
    }
    // Not committed yet.
    assert_eq!(h.committed(3, 4), 40);
}

#[test]
fn read_returns_first_available_copy() {
    let mut h = Harness::new();
    h.step(Operation::begin(T1));
    let events = h.step(Operation::read(T1, x(2)));
    assert_eq!(reads(&events), vec![(T1, x(2), 20, s(1))]);

    let events = h.step(Operation::read(T1, x(3)));
    assert_eq!(reads(&events), vec![(T1, x(3), 30, s(4))]);
}

#[test]
fn transaction_reads_its_own_write() {
    let mut h = Harness::new();
    h.run([Operation::begin(T1), Operation::write(T1, x(6), 99)]);
    let events = h.step(Operation::read(T1, x(6)));
    assert_eq!(reads(&events), vec![(T1, x(6), 99, s(1))]);
}

#[test]
fn last_writer_wins_on_every_site() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin(T2),
        Operation::write(T1, x(2), 1),
        Operation::write(T2, x(2), 2),
        Operation::end(T1),
        Operation::end(T2),
    ]);

    for site in 1..=10 {
        assert_eq!(h.committed(site, 2), 2);
    }
    assert_eq!(h.status(T1), TxnStatus::Committed);
    assert_eq!(h.status(T2), TxnStatus::Committed);
}

#[test]
fn blocked_write_is_queued_with_edge() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin(T2),
        Operation::write(T1, x(2), 1),
    ]);
    let events = h.step(Operation::write(T2, x(2), 2));

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Event::Waiting { blockers, .. } if *blockers == BTreeSet::from([T1])
    ));
    assert_eq!(h.engine.queue().len(), 1);
    assert_eq!(h.engine.wait_for().blockers_of(T2), BTreeSet::from([T1]));
    // Nothing was written by T2.
    assert!(h.engine.sites().all(|site| site.current_value(x(2)) == Some(1)));
}

#[test]
fn write_is_atomic_across_sites() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin(T2),
        // T1 read-locks x8 at site 1 only.
        Operation::read(T1, x(8)),
    ]);
    h.step(Operation::write(T2, x(8), 5));

    // Sites 2..=10 were free, but the write is all or nothing.
    for site in h.engine.sites() {
        assert_eq!(site.current_value(x(8)), Some(80));
        assert!(site.lock(x(8)).is_none_or(|lock| !lock.is_held_by(T2)));
    }
    // Only the conflicting site queued the request.
    let site1 = h.engine.site(s(1)).expect("site 1");
    assert_eq!(site1.waiting(x(8)).count(), 1);
    let site2 = h.engine.site(s(2)).expect("site 2");
    assert_eq!(site2.waiting(x(8)).count(), 0);
}

#[test]
fn later_operations_queue_behind_a_waiting_one() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin(T2),
        Operation::write(T1, x(2), 7),
        Operation::read(T2, x(2)),
    ]);
    let events = h.step(Operation::read(T2, x(4)));
    assert!(matches!(&events[..], [Event::Deferred { .. }]));

    let events = h.step(Operation::end(T1));
    assert_eq!(committed(&events), vec![T1]);
    assert_eq!(
        reads(&events),
        vec![(T2, x(2), 7, s(1)), (T2, x(4), 40, s(1))]
    );
    assert!(h.engine.queue().is_empty());
}

#[test]
fn end_waits_for_queued_operations() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin(T2),
        Operation::write(T1, x(2), 7),
        Operation::write(T2, x(2), 8),
    ]);
    let events = h.step(Operation::end(T2));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::Deferred { op } if op.action == PendingAction::End
    )));
    assert_eq!(h.status(T2), TxnStatus::Active);

    let events = h.step(Operation::end(T1));
    assert_eq!(committed(&events), vec![T1, T2]);
    assert_eq!(h.committed(5, 2), 8);
}

#[test]
fn commits_in_one_tick_get_increasing_stamps() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin(T2),
        Operation::write(T1, x(2), 7),
        Operation::write(T2, x(2), 8),
        Operation::end(T2),
        Operation::end(T1),
    ]);

    let site = h.engine.site(s(1)).expect("site 1");
    let stamps: Vec<_> = site
        .history(x(2))
        .expect("stored")
        .iter()
        .map(|version| version.stamp)
        .collect();
    assert_eq!(stamps.len(), 3);
    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(stamps[1].tick(), stamps[2].tick());
}

// ============================================================================
// Deadlock
// ============================================================================

#[test]
fn youngest_in_cycle_is_aborted_at_end() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin(T2),
        Operation::write(T1, x(1), 5),
        Operation::write(T2, x(2), 6),
        Operation::write(T1, x(2), 7),
        Operation::write(T2, x(1), 8),
    ]);
    assert_eq!(h.engine.wait_for().len(), 2);

    let events = h.step(Operation::end(T1));

    assert_eq!(aborted(&events), vec![(T2, AbortReason::Deadlock)]);
    assert_eq!(committed(&events), vec![T1]);
    assert_eq!(h.committed(2, 1), 5);
    assert_eq!(h.committed(7, 2), 7);
    assert!(h.engine.wait_for().is_empty());
    assert!(h.engine.queue().is_empty());

    let events = h.step(Operation::end(T2));
    assert!(matches!(
        &events[..],
        [Event::EndedAborted {
            txn: T2,
            reason: AbortReason::Deadlock
        }]
    ));
}

#[test]
fn ending_the_victim_reports_only_its_abort() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin(T2),
        Operation::write(T1, x(1), 5),
        Operation::write(T2, x(2), 6),
        Operation::write(T1, x(2), 7),
        Operation::write(T2, x(1), 8),
    ]);

    let events = h.step(Operation::end(T2));

    assert_eq!(aborted(&events), vec![(T2, AbortReason::Deadlock)]);
    assert!(!events
        .iter()
        .any(|event| matches!(event, Event::EndedAborted { .. })));
    // T1's write went through once T2 released x2.
    assert!(h.engine.queue().is_empty());
    assert_eq!(h.status(T1), TxnStatus::Active);
    assert!(h.engine.sites().all(|site| site.current_value(x(2)) == Some(7)));
}

#[test]
fn three_way_cycle_aborts_only_the_youngest() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin(T2),
        Operation::begin(T3),
        Operation::write(T1, x(1), 1),
        Operation::write(T2, x(3), 3),
        Operation::write(T3, x(5), 5),
        Operation::write(T1, x(3), 31),
        Operation::write(T2, x(5), 52),
        Operation::write(T3, x(1), 13),
    ]);
    assert_eq!(h.engine.wait_for().len(), 3);

    let events = h.step(Operation::end(T1));

    assert_eq!(aborted(&events), vec![(T3, AbortReason::Deadlock)]);
    assert!(events.contains(&Event::WriteApplied {
        txn: T2,
        var: x(5),
        value: 52,
        site: s(6),
    }));
    let edges: Vec<WaitEdge> = h.engine.wait_for().edges().copied().collect();
    assert_eq!(edges, vec![WaitEdge::new(T1, T2)]);
    assert_eq!(h.status(T1), TxnStatus::Active);

    // T2 finishing unblocks T1, whose deferred end then commits.
    let events = h.step(Operation::end(T2));
    assert_eq!(committed(&events), vec![T2, T1]);
    assert_eq!(h.committed(4, 3), 31);
    assert_eq!(h.committed(6, 5), 52);
    assert!(h.engine.queue().is_empty());
}

#[test]
fn finished_transactions_leave_no_edges() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin(T2),
        Operation::begin(T3),
        Operation::write(T1, x(2), 1),
        Operation::write(T2, x(2), 2),
        Operation::write(T3, x(2), 3),
    ]);
    assert!(h.engine.wait_for().touches(T1));

    h.step(Operation::end(T1));
    assert!(!h.engine.wait_for().touches(T1));

    h.step(Operation::fail(s(4)));
    for txn in [T1, T2, T3] {
        if h.status(txn) != TxnStatus::Active {
            assert!(!h.engine.wait_for().touches(txn));
        }
    }
}

// ============================================================================
// Failure and Recovery
// ============================================================================

#[test]
fn failure_aborts_transactions_that_accessed_the_site() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin(T2),
        Operation::write(T1, x(1), 5),
        Operation::read(T2, x(3)),
    ]);

    let events = h.step(Operation::fail(s(2)));

    assert_eq!(aborted(&events), vec![(T1, AbortReason::SiteFailure(s(2)))]);
    assert_eq!(h.status(T2), TxnStatus::Active);
    assert_eq!(h.committed(2, 1), 10);

    // Later operations of T1 are dropped; end reports the abort.
    let events = h.step(Operation::write(T1, x(4), 1));
    assert!(matches!(&events[..], [Event::Ignored { .. }]));
    let events = h.step(Operation::end(T1));
    assert!(matches!(&events[..], [Event::EndedAborted { txn: T1, .. }]));
}

#[test]
fn failure_does_not_abort_read_only_transactions() {
    let mut h = Harness::new();
    h.run([
        Operation::begin_read_only(T1),
        Operation::read(T1, x(1)),
    ]);
    let events = h.step(Operation::fail(s(2)));
    assert!(aborted(&events).is_empty());

    let events = h.step(Operation::end(T1));
    assert_eq!(committed(&events), vec![T1]);
}

#[test]
fn write_skips_down_sites() {
    let mut h = Harness::new();
    h.run([Operation::fail(s(3)), Operation::begin(T1)]);
    let events = h.step(Operation::write(T1, x(2), 4));

    assert!(events.contains(&Event::WriteSkipped {
        txn: T1,
        var: x(2),
        site: s(3)
    }));
    h.step(Operation::end(T1));
    assert_eq!(h.committed(1, 2), 4);
    assert_eq!(h.committed(3, 2), 20);
}

#[test]
fn write_with_no_live_copy_waits_without_locks() {
    let mut h = Harness::new();
    h.run((1..=10).map(|site| Operation::fail(s(site))));
    h.step(Operation::begin(T1));

    let events = h.step(Operation::write(T1, x(2), 3));
    assert!(matches!(
        &events[..],
        [Event::Waiting { blockers, .. }] if blockers.is_empty()
    ));
    assert!(h.engine.wait_for().is_empty());
    assert!(h.engine.sites().all(|site| site.locks_held_by(T1).is_empty()));

    let events = h.step(Operation::recover(s(1)));
    assert!(events.contains(&Event::WriteApplied {
        txn: T1,
        var: x(2),
        value: 3,
        site: s(1)
    }));
    assert!(h.engine.queue().is_empty());
}

#[test]
fn recovered_replica_is_unreadable_until_fresh_commit() {
    let mut h = Harness::new();
    h.run([Operation::fail(s(1)), Operation::recover(s(1))]);
    assert_eq!(
        h.engine.site(s(1)).map(|site| site.status()),
        Some(SiteStatus::Recovering)
    );

    h.step(Operation::begin(T1));
    let events = h.step(Operation::read(T1, x(4)));
    assert_eq!(reads(&events), vec![(T1, x(4), 40, s(2))]);

    // Unreplicated variables are readable right away.
    let mut h = Harness::new();
    h.run([
        Operation::fail(s(2)),
        Operation::recover(s(2)),
        Operation::begin(T1),
    ]);
    let events = h.step(Operation::read(T1, x(1)));
    assert_eq!(reads(&events), vec![(T1, x(1), 10, s(2))]);
}

#[test]
fn recovering_site_comes_up_after_commits() {
    let config = EngineConfig::default()
        .with_site_count(2)
        .with_variable_count(2);
    let mut h = Harness::with_config(config);
    h.run([
        Operation::fail(s(1)),
        Operation::recover(s(1)),
        Operation::begin(T1),
        Operation::write(T1, x(2), 7),
    ]);

    let events = h.step(Operation::end(T1));
    assert!(events.contains(&Event::SiteUp { site: s(1) }));
    assert_eq!(
        h.engine.site(s(1)).map(|site| site.status()),
        Some(SiteStatus::Up)
    );
}

#[test]
fn writer_reads_own_write_after_total_outage() {
    let mut h = Harness::new();
    h.run((1..=10).map(|id| Operation::fail(s(id))));
    h.run((1..=10).map(|id| Operation::recover(s(id))));
    h.run([Operation::begin(T1), Operation::write(T1, x(2), 7)]);

    let events = h.step(Operation::read(T1, x(2)));
    assert_eq!(reads(&events), vec![(T1, x(2), 7, s(1))]);

    let events = h.step(Operation::end(T1));
    assert_eq!(committed(&events), vec![T1]);

    h.run([Operation::begin(T2), Operation::write(T2, x(2), 9)]);
    let events = h.step(Operation::end(T2));
    assert_eq!(committed(&events), vec![T2]);
    assert!((1..=10).all(|id| h.committed(id, 2) == 9));
    assert!(h.engine.wait_for().is_empty());
}

#[test]
fn uncommitted_write_lost_on_failure() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin_read_only(T2),
        Operation::write(T1, x(4), 55),
        Operation::fail(s(2)),
        Operation::recover(s(2)),
    ]);

    assert_eq!(h.status(T1), TxnStatus::Aborted);
    assert!(h.engine.sites().all(|site| site.current_value(x(4)) == Some(40)));
    assert!(h
        .engine
        .site(s(2))
        .is_some_and(|site| site.is_just_recovered(x(4))));

    let Event::Dump { sites } = h.step(Operation::Dump).remove(0) else {
        panic!("expected dump");
    };
    assert_eq!(sites.len(), 10);
    assert_eq!(sites[1].status, SiteStatus::Recovering);
    assert!(sites[1].values.contains(&(x(4), 40)));
}

#[test]
fn repeated_fail_and_recover_are_no_ops() {
    let mut h = Harness::new();
    h.step(Operation::fail(s(5)));
    assert!(h.step(Operation::fail(s(5))).is_empty());
    h.step(Operation::recover(s(5)));
    assert!(h.step(Operation::recover(s(5))).is_empty());
}

// ============================================================================
// Read-Only Transactions
// ============================================================================

#[test]
fn snapshot_read_ignores_later_commits() {
    let mut h = Harness::new();
    h.run([
        Operation::begin_read_only(T1),
        Operation::begin(T2),
        Operation::write(T2, x(2), 99),
        Operation::end(T2),
    ]);
    let events = h.step(Operation::read(T1, x(2)));
    assert_eq!(reads(&events), vec![(T1, x(2), 20, s(1))]);
    assert!(h.engine.site(s(1)).is_some_and(|site| site.lock(x(2)).is_none()));
}

#[test]
fn snapshot_read_skips_site_that_failed_since_commit() {
    let mut h = Harness::new();
    h.run([
        Operation::fail(s(1)),
        Operation::recover(s(1)),
        Operation::begin_read_only(T1),
    ]);
    let events = h.step(Operation::read(T1, x(4)));
    assert_eq!(reads(&events), vec![(T1, x(4), 40, s(2))]);
}

#[test]
fn snapshot_read_waits_for_home_site() {
    let mut h = Harness::new();
    h.run([Operation::fail(s(2)), Operation::begin_read_only(T1)]);

    let events = h.step(Operation::read(T1, x(1)));
    assert!(matches!(
        &events[..],
        [Event::Waiting { blockers, .. }] if blockers.is_empty()
    ));

    let events = h.step(Operation::recover(s(2)));
    assert_eq!(reads(&events), vec![(T1, x(1), 10, s(2))]);
}

#[test]
fn read_only_transaction_is_never_blocked() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::write(T1, x(2), 5),
        Operation::begin_read_only(T2),
    ]);
    let events = h.step(Operation::read(T2, x(2)));
    assert_eq!(reads(&events), vec![(T2, x(2), 20, s(1))]);
}

// ============================================================================
// Protocol Errors
// ============================================================================

#[test]
fn protocol_violations_are_errors() {
    let mut h = Harness::new();
    h.step(Operation::begin(T1));
    h.step(Operation::begin_read_only(T2));

    assert_eq!(
        h.try_step(Operation::begin(T1)),
        Err(KernelError::DuplicateTransaction(T1))
    );
    assert_eq!(
        h.try_step(Operation::read(T3, x(2))),
        Err(KernelError::UnknownTransaction(T3))
    );
    assert_eq!(
        h.try_step(Operation::write(T2, x(2), 1)),
        Err(KernelError::ReadOnlyWrite(T2))
    );
    assert_eq!(
        h.try_step(Operation::read(T1, x(21))),
        Err(KernelError::UnknownVariable(x(21)))
    );
    assert_eq!(
        h.try_step(Operation::fail(s(11))),
        Err(KernelError::UnknownSite(s(11)))
    );

    h.step(Operation::end(T1));
    assert_eq!(
        h.try_step(Operation::end(T1)),
        Err(KernelError::TransactionEnded(T1))
    );
}

#[test]
fn tick_must_not_go_backwards() {
    let mut engine = Engine::new(EngineConfig::default()).expect("valid config");
    engine
        .apply(Tick::new(5), Operation::begin(T1))
        .expect("begin");

    let err = engine
        .apply(Tick::new(4), Operation::end(T1))
        .expect_err("regression");
    assert_eq!(
        err,
        KernelError::TickRegression {
            current: Tick::new(5),
            attempted: Tick::new(4)
        }
    );
    // Rejected operations change nothing.
    assert_eq!(engine.now(), Tick::new(5));
    assert!(engine.transaction(T1).is_some_and(|t| t.is_active()));
}

#[test]
fn invalid_config_is_rejected() {
    let err = Engine::new(EngineConfig::default().with_site_count(0)).expect_err("invalid");
    assert!(matches!(err, KernelError::InvalidConfig(_)));
}

// ============================================================================
// Query State
// ============================================================================

#[test]
fn query_state_reports_queue_and_edges() {
    let mut h = Harness::new();
    h.run([
        Operation::begin(T1),
        Operation::begin(T2),
        Operation::write(T1, x(2), 1),
        Operation::write(T2, x(2), 2),
    ]);

    let events = h.step(Operation::QueryState);
    let [Event::State(state)] = &events[..] else {
        panic!("expected state");
    };
    assert_eq!(state.transactions.len(), 2);
    assert_eq!(state.waiting.len(), 1);
    assert_eq!(state.wait_for.len(), 1);
    assert_eq!(state.sites.len(), 10);
    assert!(state.to_string().contains("T2->T1"));
}
