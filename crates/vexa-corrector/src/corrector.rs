//! Index-consistency correction engine.
//!
//! One correction pass walks every object on every agent exactly once,
//! cross-checks its replicas, and repairs three kinds of divergence:
//! - Stale timestamps: replicas older than the newest copy are rewritten
//! - Shortage: fewer live replicas than configured get filled by inserts
//! - Oversupply: excess replicas get removed
//!
//! Agents are visited strictly one at a time in descending stored-count
//! order; within one agent's stream, objects are reconciled concurrently up
//! to a configured bound. Objects written after the pass started are left
//! alone so the corrector never races live traffic.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use vexa_core::{CorrectorConfig, Error, IndexDetail, ObjectVector, Result};
use vexa_rpc::{AgentDiscoverer, GatewayClient};

use crate::ledger::CheckedLedger;

/// Terminal state of one agent's object stream.
#[derive(Debug)]
pub enum StreamOutcome {
    /// The stream ended normally.
    Completed,
    /// The stream was canceled before completion.
    Canceled(String),
    /// The stream terminated with an error.
    Failed(Error),
}

/// The cluster-wide index-consistency corrector.
///
/// Construction opens the durable checked ledger; [`start`](Self::start)
/// runs one full correction pass; [`pre_stop`](Self::pre_stop) closes the
/// ledger and must run before process exit.
pub struct Corrector<D, G> {
    core: Arc<Core<D, G>>,
}

struct Core<D, G> {
    config: CorrectorConfig,
    discoverer: Arc<D>,
    gateway: Arc<G>,
    ledger: CheckedLedger,
    checked: AtomicU64,
    corrected_timestamp: AtomicU64,
    corrected_replication: AtomicU64,
}

impl<D, G> Corrector<D, G>
where
    D: AgentDiscoverer + 'static,
    G: GatewayClient + 'static,
{
    /// Creates a corrector and opens its checked ledger.
    ///
    /// Fails when the configuration is invalid or the ledger cannot be
    /// opened at the configured path.
    pub fn new(config: CorrectorConfig, discoverer: Arc<D>, gateway: Arc<G>) -> Result<Self> {
        config.validate().map_err(|e| Error::Config(e.to_string()))?;
        let ledger = CheckedLedger::open(&config.ledger_path)?;
        Ok(Self {
            core: Arc::new(Core {
                config,
                discoverer,
                gateway,
                ledger,
                checked: AtomicU64::new(0),
                corrected_timestamp: AtomicU64::new(0),
                corrected_replication: AtomicU64::new(0),
            }),
        })
    }

    /// Runs one full correction pass over the cluster.
    ///
    /// Per-object and per-agent failures never stop the pass; they are
    /// collected and joined into the returned error once every agent has
    /// been processed.
    pub async fn start(&self) -> Result<()> {
        let run_started = Instant::now();
        let start_time = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);

        let detail = self.core.gateway.index_detail().await?;

        // Largest agents first: the bulk of the data is reconciled early,
        // and the small agents at the tail become the shortage-only case.
        let mut agents: Vec<String> = detail.counts.keys().cloned().collect();
        agents.sort_by(|a, b| {
            let stored_a = detail.counts.get(a).map_or(0, |c| c.stored);
            let stored_b = detail.counts.get(b).map_or(0, |c| c.stored);
            stored_b.cmp(&stored_a).then_with(|| a.cmp(b))
        });

        let skip: Arc<HashSet<String>> = Arc::new(
            detail
                .counts
                .iter()
                .filter(|(_, count)| count.is_empty())
                .map(|(addr, _)| addr.clone())
                .collect(),
        );

        info!(
            agents = agents.len(),
            replica = detail.replica,
            "Starting index correction pass"
        );

        let mut errs = Vec::new();
        for idx in 0..agents.len() {
            let addr = &agents[idx];
            if skip.contains(addr) {
                debug!(addr = %addr, "Agent holds no objects, skipping");
                continue;
            }
            if let Err(e) = self
                .correct_agent(addr, &agents[idx + 1..], &detail, &skip, start_time)
                .await
            {
                warn!(addr = %addr, error = %e, "Agent correction failed");
                errs.push(e);
            }
        }

        histogram!("vexa_corrector_pass_duration_seconds")
            .record(run_started.elapsed().as_secs_f64());
        info!(
            checked = self.checked_count(),
            timestamp_fixes = self.corrected_timestamp_count(),
            replication_fixes = self.corrected_replication_count(),
            "Index correction pass finished"
        );

        match Error::join(errs) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Streams one agent's objects and reconciles each of them.
    ///
    /// Object reconciliation runs in spawned tasks bounded by the configured
    /// stream concurrency; every in-flight task drains before this returns,
    /// so agents never overlap.
    async fn correct_agent(
        &self,
        addr: &str,
        remaining: &[String],
        detail: &IndexDetail,
        skip: &Arc<HashSet<String>>,
        start_time: i64,
    ) -> Result<()> {
        let mut stream = self.core.gateway.stream_list_object(addr).await?;
        debug!(addr = %addr, remaining = remaining.len(), "Streaming agent objects");

        let concurrency = self.core.config.stream_list_concurrency;
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let errs: Arc<Mutex<Vec<Error>>> = Arc::new(Mutex::new(Vec::new()));
        let lost_connection = Arc::new(AtomicBool::new(false));
        let remaining: Arc<Vec<String>> = Arc::new(remaining.to_vec());
        let replica = detail.replica;

        let outcome = loop {
            match stream.recv().await {
                Some(Ok(object)) => {
                    if object.id.is_empty() {
                        continue;
                    }
                    if object.timestamp >= start_time {
                        debug!(id = %object.id, "Object written after pass start, skipping");
                        continue;
                    }
                    let permit = match Arc::clone(&semaphore).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            break StreamOutcome::Canceled(
                                "concurrency limiter closed".to_string(),
                            )
                        }
                    };
                    // A lost connection fails every later object the same
                    // way; stop consuming the stream instead of piling up
                    // identical errors.
                    if lost_connection.load(Ordering::Acquire) {
                        break StreamOutcome::Canceled("agent connection lost".to_string());
                    }

                    let core = Arc::clone(&self.core);
                    let addr = addr.to_string();
                    let remaining = Arc::clone(&remaining);
                    let skip = Arc::clone(skip);
                    let errs = Arc::clone(&errs);
                    let lost_connection = Arc::clone(&lost_connection);
                    tokio::spawn(async move {
                        if let Err(e) = core
                            .correct_object(&addr, object, &remaining, &skip, replica, start_time)
                            .await
                        {
                            warn!(addr = %addr, error = %e, "Object correction failed");
                            if e.is_connection_not_found() {
                                lost_connection.store(true, Ordering::Release);
                            }
                            errs.lock().expect("lock poisoned").push(e);
                        }
                        drop(permit);
                    });
                }
                Some(Err(e)) if e.is_canceled() => {
                    break StreamOutcome::Canceled("stream canceled by peer".to_string())
                }
                Some(Err(e)) => break StreamOutcome::Failed(e),
                None => break StreamOutcome::Completed,
            }
        };

        // Reacquiring every permit drains the in-flight object tasks
        // before the next agent starts.
        let _drain = semaphore
            .acquire_many(concurrency as u32)
            .await
            .map_err(|_| Error::Canceled)?;

        match outcome {
            StreamOutcome::Completed => debug!(addr = %addr, "Agent stream completed"),
            StreamOutcome::Canceled(reason) => {
                // The cause is already in the error set when we broke off
                // ourselves; a peer cancel carries no error of its own.
                info!(addr = %addr, reason = %reason, "Agent stream canceled");
            }
            StreamOutcome::Failed(e) => {
                warn!(addr = %addr, error = %e, "Agent stream failed");
                errs.lock().expect("lock poisoned").push(e);
            }
        }

        let errs = std::mem::take(&mut *errs.lock().expect("lock poisoned"));
        match Error::join(errs) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Objects reconciled so far, including unchanged ones.
    pub fn checked_count(&self) -> u64 {
        self.core.checked.load(Ordering::Relaxed)
    }

    /// Timestamp corrections applied so far.
    pub fn corrected_timestamp_count(&self) -> u64 {
        self.core.corrected_timestamp.load(Ordering::Relaxed)
    }

    /// Replica inserts and removes applied so far.
    pub fn corrected_replication_count(&self) -> u64 {
        self.core.corrected_replication.load(Ordering::Relaxed)
    }

    /// Closes the checked ledger. Must run before process exit.
    pub fn pre_stop(&self) -> Result<()> {
        self.core.ledger.close()
    }
}

impl<D, G> Core<D, G>
where
    D: AgentDiscoverer + 'static,
    G: GatewayClient + 'static,
{
    /// Reconciles a single streamed object.
    ///
    /// The ID lands in the checked ledger whether or not the repair
    /// succeeded; a failed repair surfaces through the returned error and is
    /// retried no earlier than the next pass with a fresh ledger.
    async fn correct_object(
        &self,
        self_addr: &str,
        mut object: ObjectVector,
        remaining: &[String],
        skip: &HashSet<String>,
        replica: usize,
        start_time: i64,
    ) -> Result<()> {
        if self.ledger.contains(&object.id).await? {
            debug!(id = %object.id, "Already checked, skipping");
            return Ok(());
        }

        let result = if remaining.is_empty() {
            // Last agent in the visit order: no replicas left to compare
            // against, so only the replica count can be off.
            self.correct_replica_count(self_addr, &object, &HashMap::new(), replica)
                .await
        } else {
            self.reconcile(self_addr, &mut object, remaining, skip, replica, start_time)
                .await
        };

        let mut errs = Vec::new();
        if let Err(e) = result {
            errs.push(e);
        }
        match self.ledger.mark(&object.id).await {
            Ok(()) => {
                self.checked.fetch_add(1, Ordering::Relaxed);
                counter!("vexa_corrector_checked").increment(1);
            }
            Err(e) => errs.push(e),
        }
        match Error::join(errs) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn reconcile(
        &self,
        self_addr: &str,
        object: &mut ObjectVector,
        remaining: &[String],
        skip: &HashSet<String>,
        replica: usize,
        start_time: i64,
    ) -> Result<()> {
        let (found, skipped) = self
            .load_replica_info(&object.id, remaining, skip, start_time)
            .await?;
        debug!(
            id = %object.id,
            found = found.len(),
            skipped = skipped.len(),
            "Replica lookup finished"
        );

        if !found.is_empty() {
            self.correct_timestamps(self_addr, object, &found).await?;
        }
        self.correct_replica_count(self_addr, object, &found, replica)
            .await
    }

    /// Fans out timestamp lookups to the not-yet-visited agents.
    ///
    /// Returns the agents holding the object with a timestamp from before
    /// the pass started, plus the agents skipped as empty or answering
    /// NotFound/Canceled. Any other lookup failure fails the whole call: a
    /// replica set with unknown holes must not drive inserts or removes.
    async fn load_replica_info(
        &self,
        id: &str,
        remaining: &[String],
        skip: &HashSet<String>,
        start_time: i64,
    ) -> Result<(HashMap<String, i64>, Vec<String>)> {
        let found = Arc::new(Mutex::new(HashMap::new()));
        let skipped = Arc::new(Mutex::new(Vec::new()));
        let errs: Arc<Mutex<Vec<Error>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::with_capacity(remaining.len());
        for agent in remaining {
            if skip.contains(agent) {
                skipped.lock().expect("lock poisoned").push(agent.clone());
                continue;
            }
            let gateway = Arc::clone(&self.gateway);
            let agent = agent.clone();
            let id = id.to_string();
            let found = Arc::clone(&found);
            let skipped = Arc::clone(&skipped);
            let errs = Arc::clone(&errs);
            handles.push(tokio::spawn(async move {
                match gateway.get_timestamp(&agent, &id).await {
                    Ok(ts) if ts.timestamp < start_time => {
                        found.lock().expect("lock poisoned").insert(agent, ts.timestamp);
                    }
                    Ok(_) => {
                        debug!(agent = %agent, id = %id, "Replica written after pass start");
                    }
                    Err(e) if e.is_not_found() || e.is_canceled() => {
                        skipped.lock().expect("lock poisoned").push(agent);
                    }
                    Err(e) => {
                        warn!(agent = %agent, id = %id, error = %e, "Timestamp lookup failed");
                        errs.lock().expect("lock poisoned").push(e);
                    }
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        if let Some(err) = Error::join(std::mem::take(&mut *errs.lock().expect("lock poisoned"))) {
            return Err(err);
        }
        let found = std::mem::take(&mut *found.lock().expect("lock poisoned"));
        let skipped = std::mem::take(&mut *skipped.lock().expect("lock poisoned"));
        Ok((found, skipped))
    }

    /// Rewrites stale replica timestamps to the newest observed value.
    ///
    /// When a replica is newer than the streamed copy, the full object is
    /// fetched from that agent first so later shortage inserts replicate the
    /// newest data, and the streamed copy's own timestamp is repaired too.
    async fn correct_timestamps(
        &self,
        self_addr: &str,
        object: &mut ObjectVector,
        found: &HashMap<String, i64>,
    ) -> Result<()> {
        let mut latest = object.timestamp;
        let mut latest_agent: Option<&String> = None;
        for (agent, &ts) in found {
            // Only a strictly newer replica may become the source copy.
            if ts > latest {
                latest = ts;
                latest_agent = Some(agent);
            }
        }

        if let Some(agent) = latest_agent {
            *object = self.gateway.get_object(agent, &object.id).await?;
        }

        let mut errs = Vec::new();
        let mut fixed = 0u64;
        for (agent, &ts) in found {
            if ts < latest {
                match self.gateway.update_timestamp(agent, &object.id, latest, true).await {
                    Ok(()) => fixed += 1,
                    Err(e) => errs.push(e),
                }
            }
        }
        if latest_agent.is_some() {
            match self.gateway.update_timestamp(self_addr, &object.id, latest, true).await {
                Ok(()) => fixed += 1,
                Err(e) => errs.push(e),
            }
        }

        if fixed > 0 {
            self.corrected_timestamp.fetch_add(fixed, Ordering::Relaxed);
            counter!("vexa_corrector_timestamp_fixes").increment(fixed);
        }
        match Error::join(errs) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Repairs the replica count toward the configured target.
    async fn correct_replica_count(
        &self,
        self_addr: &str,
        object: &ObjectVector,
        found: &HashMap<String, i64>,
        replica: usize,
    ) -> Result<()> {
        let diff = replica as i64 - (found.len() as i64 + 1);
        match diff.cmp(&0) {
            std::cmp::Ordering::Greater => {
                self.correct_shortage(self_addr, object, found, diff as usize).await
            }
            std::cmp::Ordering::Less => {
                self.correct_oversupply(self_addr, &object.id, found, (-diff) as usize).await
            }
            std::cmp::Ordering::Equal => Ok(()),
        }
    }

    /// Inserts the object onto agents until the shortage is filled.
    ///
    /// Candidates come from the full discovered fleet minus the agents
    /// already known to hold the object. An `AlreadyExists` answer means a
    /// copy slipped past the replica lookup; it is re-read and refreshed
    /// only when genuinely older, and either way that agent satisfies one
    /// missing replica.
    async fn correct_shortage(
        &self,
        self_addr: &str,
        object: &ObjectVector,
        found: &HashMap<String, i64>,
        need: usize,
    ) -> Result<()> {
        let candidates: Vec<String> = self
            .discoverer
            .agent_addrs()
            .await
            .into_iter()
            .filter(|addr| addr != self_addr && !found.contains_key(addr))
            .collect();
        if candidates.is_empty() {
            return Err(Error::NoAvailableAgents { operation: "insert" });
        }

        let mut errs = Vec::new();
        let mut satisfied = 0usize;
        for addr in candidates {
            if satisfied == need {
                break;
            }
            match self.gateway.insert(&addr, object).await {
                Ok(()) => {
                    debug!(addr = %addr, id = %object.id, "Inserted missing replica");
                    satisfied += 1;
                    self.corrected_replication.fetch_add(1, Ordering::Relaxed);
                    counter!("vexa_corrector_replication_fixes").increment(1);
                }
                Err(e) if e.is_already_exists() => {
                    match self.gateway.get_object(&addr, &object.id).await {
                        Ok(existing) if existing.timestamp < object.timestamp => {
                            // The agent's write queue orders an update at the
                            // same timestamp behind the original insert;
                            // writing one tick earlier keeps the refresh from
                            // being dropped.
                            let mut refreshed = object.clone();
                            refreshed.timestamp = object.timestamp - 1;
                            match self.gateway.update(&addr, &refreshed).await {
                                Ok(()) => {
                                    debug!(addr = %addr, id = %object.id, "Refreshed stale replica");
                                    satisfied += 1;
                                    self.corrected_replication.fetch_add(1, Ordering::Relaxed);
                                    counter!("vexa_corrector_replication_fixes").increment(1);
                                }
                                Err(e) => errs.push(e),
                            }
                        }
                        Ok(_) => {
                            // Existing copy is current; it fills the slot.
                            satisfied += 1;
                        }
                        Err(e) => errs.push(e),
                    }
                }
                Err(e) => errs.push(e),
            }
        }

        match Error::join(errs) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Removes excess replicas.
    ///
    /// The full discovered fleet is scanned in order, but removal only
    /// targets agents confirmed to hold the object: the consulted replica
    /// set or the streaming agent itself.
    async fn correct_oversupply(
        &self,
        self_addr: &str,
        id: &str,
        found: &HashMap<String, i64>,
        excess: usize,
    ) -> Result<()> {
        let addrs = self.discoverer.agent_addrs().await;
        if addrs.is_empty() {
            return Err(Error::NoAvailableAgents { operation: "remove" });
        }

        let mut errs = Vec::new();
        let mut removed = 0usize;
        for addr in addrs {
            if removed == excess {
                break;
            }
            if addr != self_addr && !found.contains_key(&addr) {
                continue;
            }
            match self.gateway.remove(&addr, id).await {
                Ok(()) => {
                    debug!(addr = %addr, id = %id, "Removed excess replica");
                    removed += 1;
                    self.corrected_replication.fetch_add(1, Ordering::Relaxed);
                    counter!("vexa_corrector_replication_fixes").increment(1);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => errs.push(e),
            }
        }

        match Error::join(errs) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
