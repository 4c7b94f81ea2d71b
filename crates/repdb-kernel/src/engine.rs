//! The transaction manager.
//!
//! [`Engine`] owns every site and every transaction. Each call to
//! [`Engine::apply`] validates one operation, mutates state, and returns the
//! events it produced. Operations that cannot run yet are queued and
//! re-attempted by the retry pass after every commit, abort, failure and
//! recovery.

use std::collections::{BTreeMap, BTreeSet};

use repdb_site::{Site, SiteReply};
use repdb_types::{CommitStamp, Operation, SiteId, SiteStatus, Tick, TxnId, Value, VarId};

use crate::config::EngineConfig;
use crate::deadlock;
use crate::event::{Event, SiteSnapshot, StateSnapshot, TxnSummary};
use crate::transaction::{AbortReason, Transaction, TxnStatus};
use crate::waiting::{PendingAction, PendingOp, WaitForGraph, WaitQueue};
use crate::KernelError;

/// Result of trying to run an operation once.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Attempt {
    Done,
    /// Conflicting locks are held or requested by these transactions.
    Blocked(BTreeSet<TxnId>),
    /// No site storing the variable can serve the request.
    Unavailable,
}

/// The transaction manager and the sites it coordinates.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    sites: BTreeMap<SiteId, Site>,
    transactions: BTreeMap<TxnId, Transaction>,
    queue: WaitQueue,
    wait_for: WaitForGraph,
    now: Tick,
    /// Commits so far; orders commits that share a tick.
    commit_seq: u64,
}

impl Engine {
    /// Creates an engine with every site up and every variable at its
    /// initial value.
    pub fn new(config: EngineConfig) -> Result<Self, KernelError> {
        config.validate()?;

        let sites = config
            .site_ids()
            .map(|id| {
                let variables = config
                    .variables_at(id)
                    .into_iter()
                    .map(|var| (var, config.initial_value(var)));
                (id, Site::new(id, variables))
            })
            .collect();

        Ok(Self {
            config,
            sites,
            transactions: BTreeMap::new(),
            queue: WaitQueue::new(),
            wait_for: WaitForGraph::new(),
            now: Tick::ZERO,
            commit_seq: 0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Tick of the most recently applied operation.
    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn site(&self, id: SiteId) -> Option<&Site> {
        self.sites.get(&id)
    }

    pub fn sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.values()
    }

    pub fn transaction(&self, id: TxnId) -> Option<&Transaction> {
        self.transactions.get(&id)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    pub fn queue(&self) -> &WaitQueue {
        &self.queue
    }

    pub fn wait_for(&self) -> &WaitForGraph {
        &self.wait_for
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Applies one operation at logical time `tick`.
    ///
    /// Ticks must not go backwards. Protocol violations are returned as
    /// errors before any state is touched; blocking, unavailability and
    /// aborts are reported as events.
    pub fn apply(&mut self, tick: Tick, op: Operation) -> Result<Vec<Event>, KernelError> {
        if tick < self.now {
            return Err(KernelError::TickRegression {
                current: self.now,
                attempted: tick,
            });
        }
        self.validate(&op)?;
        self.now = tick;

        tracing::debug!(tick = %tick, op = %op, "applying operation");

        let mut events = Vec::new();
        match op {
            Operation::Begin { txn } => self.begin(txn, false, &mut events),
            Operation::BeginReadOnly { txn } => self.begin(txn, true, &mut events),
            Operation::Read { txn, var } => {
                let action = if self.is_read_only(txn) {
                    PendingAction::SnapshotRead { var }
                } else {
                    PendingAction::Read { var }
                };
                self.submit(PendingOp::new(txn, action), &mut events)?;
            }
            Operation::Write { txn, var, value } => {
                self.submit(
                    PendingOp::new(txn, PendingAction::Write { var, value }),
                    &mut events,
                )?;
            }
            Operation::End { txn } => self.end(txn, &mut events)?,
            Operation::Fail { site } => self.fail(site, &mut events)?,
            Operation::Recover { site } => self.recover(site, &mut events)?,
            Operation::Dump => events.push(self.dump()),
            Operation::QueryState => events.push(Event::State(self.query_state())),
        }
        Ok(events)
    }

    /// Latest committed values at every site.
    pub fn dump(&self) -> Event {
        let sites = self
            .sites
            .values()
            .map(|site| SiteSnapshot {
                site: site.id(),
                status: site.status(),
                values: site.snapshot(),
            })
            .collect();
        Event::Dump { sites }
    }

    /// Registry, site statuses, queue and wait-for edges.
    pub fn query_state(&self) -> StateSnapshot {
        StateSnapshot {
            tick: self.now,
            transactions: self
                .transactions
                .values()
                .map(|txn| TxnSummary {
                    txn: txn.id(),
                    start: txn.start(),
                    read_only: txn.is_read_only(),
                    status: txn.status(),
                })
                .collect(),
            sites: self
                .sites
                .values()
                .map(|site| (site.id(), site.status()))
                .collect(),
            waiting: self.queue.iter().copied().collect(),
            wait_for: self.wait_for.edges().copied().collect(),
        }
    }

    fn validate(&self, op: &Operation) -> Result<(), KernelError> {
        match *op {
            Operation::Begin { txn } | Operation::BeginReadOnly { txn } => {
                if self.transactions.contains_key(&txn) {
                    return Err(KernelError::DuplicateTransaction(txn));
                }
            }
            Operation::Read { txn, var } => {
                self.validate_open(txn)?;
                self.validate_variable(var)?;
            }
            Operation::Write { txn, var, .. } => {
                if self.validate_open(txn)?.is_read_only() {
                    return Err(KernelError::ReadOnlyWrite(txn));
                }
                self.validate_variable(var)?;
            }
            Operation::End { txn } => {
                self.validate_open(txn)?;
            }
            Operation::Fail { site } | Operation::Recover { site } => {
                if !self.config.contains_site(site) {
                    return Err(KernelError::UnknownSite(site));
                }
            }
            Operation::Dump | Operation::QueryState => {}
        }
        Ok(())
    }

    fn validate_open(&self, txn: TxnId) -> Result<&Transaction, KernelError> {
        let entry = self
            .transactions
            .get(&txn)
            .ok_or(KernelError::UnknownTransaction(txn))?;
        if entry.has_ended() {
            return Err(KernelError::TransactionEnded(txn));
        }
        Ok(entry)
    }

    fn validate_variable(&self, var: VarId) -> Result<(), KernelError> {
        if self.config.contains_variable(var) {
            Ok(())
        } else {
            Err(KernelError::UnknownVariable(var))
        }
    }

    fn is_read_only(&self, txn: TxnId) -> bool {
        self.transactions
            .get(&txn)
            .is_some_and(Transaction::is_read_only)
    }

    fn txn_mut(&mut self, txn: TxnId) -> Result<&mut Transaction, KernelError> {
        self.transactions
            .get_mut(&txn)
            .ok_or(KernelError::UnknownTransaction(txn))
    }

    fn begin(&mut self, txn: TxnId, read_only: bool, events: &mut Vec<Event>) {
        self.transactions
            .insert(txn, Transaction::new(txn, self.now, read_only));
        tracing::debug!(txn = %txn, read_only, "transaction began");
        events.push(Event::Began {
            txn,
            read_only,
            tick: self.now,
        });
    }

    /// Runs a read or write now, or queues it.
    fn submit(&mut self, op: PendingOp, events: &mut Vec<Event>) -> Result<(), KernelError> {
        if self.transactions.get(&op.txn).is_some_and(|t| !t.is_active()) {
            tracing::debug!(txn = %op.txn, op = %op, "ignoring operation of aborted transaction");
            events.push(Event::Ignored { op });
            return Ok(());
        }

        if self.queue.has_txn(op.txn) {
            self.queue.push(op);
            events.push(Event::Deferred { op });
            return Ok(());
        }

        match self.attempt(op, events)? {
            Attempt::Done => {}
            Attempt::Blocked(blockers) => {
                tracing::debug!(op = %op, ?blockers, "operation blocked");
                self.queue.push(op);
                self.wait_for.add(op.txn, blockers.iter().copied());
                events.push(Event::Waiting { op, blockers });
            }
            Attempt::Unavailable => {
                tracing::debug!(op = %op, "no site available");
                self.queue.push(op);
                events.push(Event::Waiting {
                    op,
                    blockers: BTreeSet::new(),
                });
            }
        }
        Ok(())
    }

    fn attempt(&mut self, op: PendingOp, events: &mut Vec<Event>) -> Result<Attempt, KernelError> {
        match op.action {
            PendingAction::Read { var } => self.read(op.txn, var, events),
            PendingAction::SnapshotRead { var } => self.snapshot_read(op.txn, var, events),
            PendingAction::Write { var, value } => self.write(op.txn, var, value, events),
            PendingAction::End => {
                self.commit(op.txn, events)?;
                Ok(Attempt::Done)
            }
        }
    }

    fn read(
        &mut self,
        txn: TxnId,
        var: VarId,
        events: &mut Vec<Event>,
    ) -> Result<Attempt, KernelError> {
        for id in self.config.sites_for(var) {
            let site = self
                .sites
                .get_mut(&id)
                .ok_or(KernelError::UnknownSite(id))?;
            match site.read(txn, var)? {
                SiteReply::Granted(value) => {
                    self.txn_mut(txn)?.record_access(id);
                    events.push(Event::ReadValue {
                        txn,
                        var,
                        value,
                        site: id,
                    });
                    return Ok(Attempt::Done);
                }
                SiteReply::Down => {}
                SiteReply::Blocked(holders) => return Ok(Attempt::Blocked(holders)),
            }
        }
        Ok(Attempt::Unavailable)
    }

    fn snapshot_read(
        &mut self,
        txn: TxnId,
        var: VarId,
        events: &mut Vec<Event>,
    ) -> Result<Attempt, KernelError> {
        let begin = self.txn_mut(txn)?.start();
        for id in self.config.sites_for(var) {
            let site = self.sites.get(&id).ok_or(KernelError::UnknownSite(id))?;
            if let Some(value) = site.read_only(var, begin)? {
                events.push(Event::ReadValue {
                    txn,
                    var,
                    value,
                    site: id,
                });
                return Ok(Attempt::Done);
            }
        }
        Ok(Attempt::Unavailable)
    }

    /// Writes `var` at every live site that stores it, or at none.
    fn write(
        &mut self,
        txn: TxnId,
        var: VarId,
        value: Value,
        events: &mut Vec<Event>,
    ) -> Result<Attempt, KernelError> {
        let targets = self.config.sites_for(var);

        let mut live = Vec::new();
        let mut conflicting = Vec::new();
        let mut blockers = BTreeSet::new();
        for &id in &targets {
            let site = self.sites.get(&id).ok_or(KernelError::UnknownSite(id))?;
            match site.check_write(txn, var)? {
                SiteReply::Granted(()) => live.push(id),
                SiteReply::Down => {}
                SiteReply::Blocked(conflicts) => {
                    conflicting.push(id);
                    blockers.extend(conflicts);
                }
            }
        }

        if !conflicting.is_empty() {
            // Only the conflicting sites learn about the request.
            for id in conflicting {
                if let Some(site) = self.sites.get_mut(&id) {
                    site.write(txn, var, value)?;
                }
            }
            return Ok(Attempt::Blocked(blockers));
        }
        if live.is_empty() {
            return Ok(Attempt::Unavailable);
        }

        for id in targets {
            if !live.contains(&id) {
                events.push(Event::WriteSkipped { txn, var, site: id });
                continue;
            }
            let site = self
                .sites
                .get_mut(&id)
                .ok_or(KernelError::UnknownSite(id))?;
            site.write(txn, var, value)?;
            self.txn_mut(txn)?.record_write(var, id);
            events.push(Event::WriteApplied {
                txn,
                var,
                value,
                site: id,
            });
        }
        Ok(Attempt::Done)
    }

    fn end(&mut self, txn: TxnId, events: &mut Vec<Event>) -> Result<(), KernelError> {
        let entry = self.txn_mut(txn)?;
        entry.mark_ended();
        let aborted_earlier = entry.abort_reason();

        let victims = {
            let transactions = &self.transactions;
            deadlock::detect(self.wait_for.edges(), |id| {
                transactions
                    .get(&id)
                    .map_or(Tick::ZERO, Transaction::start)
            })
        };
        for victim in victims {
            tracing::warn!(txn = %victim, "aborting deadlock victim");
            self.abort(victim, AbortReason::Deadlock, events)?;
        }

        let status = self.txn_mut(txn)?.status();
        if status == TxnStatus::Aborted {
            self.queue.remove_txn(txn);
            if let Some(reason) = aborted_earlier {
                events.push(Event::EndedAborted { txn, reason });
            }
        } else if self.queue.has_txn(txn) {
            let op = PendingOp::new(txn, PendingAction::End);
            self.queue.push(op);
            events.push(Event::Deferred { op });
        } else {
            self.commit(txn, events)?;
        }

        self.retry(events)
    }

    /// Makes every write of `txn` durable and releases its locks.
    fn commit(&mut self, txn: TxnId, events: &mut Vec<Event>) -> Result<(), KernelError> {
        self.commit_seq += 1;
        let stamp = CommitStamp::new(self.now, self.commit_seq);
        let writes = self.txn_mut(txn)?.writes().clone();

        for (var, sites) in writes {
            for id in sites {
                let site = self
                    .sites
                    .get_mut(&id)
                    .ok_or(KernelError::UnknownSite(id))?;
                let was_recovering = site.status() == SiteStatus::Recovering;
                site.commit_value(var, stamp)?;
                if was_recovering && site.status() == SiteStatus::Up {
                    events.push(Event::SiteUp { site: id });
                }
            }
        }

        for site in self.sites.values_mut() {
            site.release_locks(txn);
        }
        self.wait_for.remove_txn(txn);
        self.txn_mut(txn)?.mark_committed();

        tracing::info!(txn = %txn, stamp = %stamp, "transaction committed");
        events.push(Event::Committed {
            txn,
            tick: self.now,
        });
        Ok(())
    }

    /// Rolls back `txn` everywhere. Does nothing if it is no longer active.
    fn abort(
        &mut self,
        txn: TxnId,
        reason: AbortReason,
        events: &mut Vec<Event>,
    ) -> Result<(), KernelError> {
        let entry = self.txn_mut(txn)?;
        if !entry.is_active() {
            return Ok(());
        }
        entry.mark_aborted(reason);

        for site in self.sites.values_mut() {
            site.revert_to_last_commit_value(txn);
            site.release_locks(txn);
        }
        self.queue.remove_txn(txn);
        self.wait_for.remove_txn(txn);

        tracing::info!(txn = %txn, %reason, "transaction aborted");
        events.push(Event::Aborted { txn, reason });
        Ok(())
    }

    fn fail(&mut self, id: SiteId, events: &mut Vec<Event>) -> Result<(), KernelError> {
        let now = self.now;
        let site = self
            .sites
            .get_mut(&id)
            .ok_or(KernelError::UnknownSite(id))?;
        if !site.fail(now) {
            tracing::debug!(site = %id, "site already down");
            return Ok(());
        }
        events.push(Event::SiteFailed { site: id });

        let affected: Vec<TxnId> = self
            .transactions
            .values()
            .filter(|txn| txn.is_active() && !txn.is_read_only() && txn.has_accessed(id))
            .map(Transaction::id)
            .collect();
        for txn in affected {
            self.abort(txn, AbortReason::SiteFailure(id), events)?;
        }

        self.retry(events)
    }

    fn recover(&mut self, id: SiteId, events: &mut Vec<Event>) -> Result<(), KernelError> {
        let now = self.now;
        let site = self
            .sites
            .get_mut(&id)
            .ok_or(KernelError::UnknownSite(id))?;
        if !site.recover(now) {
            tracing::debug!(site = %id, "site already up");
            return Ok(());
        }
        events.push(Event::SiteRecovered {
            site: id,
            status: site.status(),
        });

        self.retry(events)
    }

    /// Re-attempts queued operations until a full pass makes no progress.
    ///
    /// An operation is eligible when its transaction waits on nobody and no
    /// earlier operation of the same transaction is still stuck in this
    /// pass. Every success restarts the pass from the head of the queue.
    fn retry(&mut self, events: &mut Vec<Event>) -> Result<(), KernelError> {
        loop {
            let mut stalled = BTreeSet::new();
            let mut progressed = false;
            let mut index = 0;

            while let Some(op) = self.queue.get(index) {
                if stalled.contains(&op.txn) || self.wait_for.has_outgoing(op.txn) {
                    stalled.insert(op.txn);
                    index += 1;
                    continue;
                }

                match self.attempt(op, events)? {
                    Attempt::Done => {
                        tracing::debug!(op = %op, "queued operation completed");
                        self.queue.remove(index);
                        progressed = true;
                        break;
                    }
                    Attempt::Blocked(blockers) => {
                        self.wait_for.add(op.txn, blockers);
                        stalled.insert(op.txn);
                        index += 1;
                    }
                    Attempt::Unavailable => {
                        stalled.insert(op.txn);
                        index += 1;
                    }
                }
            }

            if !progressed {
                return Ok(());
            }
        }
    }
}
