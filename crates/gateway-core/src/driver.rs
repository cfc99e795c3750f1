//! The fan-out driver: coordinates N subqueries under one deadline, §4.6.
//!
//! The source models this as a single-threaded event loop with condition
//! variables (§5, §9). `gateway-server` runs request handlers as `Send`
//! tokio tasks on a multi-threaded runtime, so a literal translation using
//! `Rc`/`RefCell` back-references isn't available here: axum spawns each
//! handler's future on its work-stealing scheduler, which requires `Send`.
//! Each subquery instead runs as its own task over `Arc<TokioMutex<Subquery>>`;
//! the "back-reference to the driver" the spec describes becomes an index
//! into `Shared`'s parallel `completions`/`resolved_values` vectors, so a
//! dependent subquery can await another's completion signal without ever
//! holding a reference to the driver itself. Cooperative suspension is
//! preserved: every task only proceeds past an `.await` when its event
//! (HTTP completion, tick, dependency signal) actually fires — the
//! scheduler may interleave tasks across cores, but nothing is ever
//! preempted mid-subquery.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use gateway_ident::Domain;
use serde_json::Value;
use tokio::sync::{Mutex as TokioMutex, Notify};
use url::Url;

use crate::adapter::UpstreamAdapter;
use crate::adapters::{self, paleo, PaleoAdapter, QuaternaryAdapter};
use crate::record::Record;
use crate::request::{AgeField, RequestContext};
use crate::subquery::Subquery;

/// §9's resolution of the tick-period open question: the source carried
/// both 3s and 5s in different drafts. 3s is what we ship; it only governs
/// how promptly retries and the deadline are noticed, never correctness.
const TICK_PERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    List,
    Single,
}

#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    /// Zero disables the deadline (and, as a consequence, all retries —
    /// retries are only drained on the same tick that watches the deadline).
    pub timeout: Duration,
    pub retries: u32,
}

/// How a subquery's URL comes to be, decided once at planning time.
enum Plan {
    /// Built from the request via the adapter trait; may depend on a
    /// secondary lookup's resolved name.
    Primary { domain: Domain },
    /// The fixed paleobiology taxon-name lookup a quaternary primary
    /// depends on (§4.4's secondary-subquery flow).
    SecondaryLookup { id: u64 },
}

struct Shared {
    req: RequestContext,
    http: reqwest::Client,
    paleo: PaleoAdapter,
    quaternary: QuaternaryAdapter,
    query_kind: QueryKind,
    completions: Vec<Arc<Notify>>,
    resolved_values: Vec<Arc<StdMutex<Option<String>>>>,
}

impl Shared {
    fn adapter_for(&self, domain: Domain) -> &dyn UpstreamAdapter {
        match domain {
            Domain::Paleo => &self.paleo,
            Domain::Quaternary => &self.quaternary,
        }
    }
}

pub struct CompositeDriver {
    shared: Arc<Shared>,
    subqueries: Vec<Subquery>,
    plans: Vec<Plan>,
    retries_budget: u32,
    timeout: Duration,
    timed_out: bool,
}

impl CompositeDriver {
    pub fn new(
        req: RequestContext,
        http: reqwest::Client,
        paleo: PaleoAdapter,
        quaternary: QuaternaryAdapter,
        query_kind: QueryKind,
        opts: DriverOptions,
    ) -> CompositeDriver {
        let mut subqueries: Vec<Subquery> = Vec::new();
        let mut plans: Vec<Plan> = Vec::new();
        let mut paleo_seq = 0u32;
        let mut quaternary_seq = 0u32;

        for &domain in &req.enabled {
            match domain {
                Domain::Paleo => {
                    subqueries.push(Subquery::new(
                        format!("{}:{}", paleo::LABEL, paleo_seq),
                        Domain::Paleo,
                        true,
                    ));
                    plans.push(Plan::Primary { domain: Domain::Paleo });
                    paleo_seq += 1;
                }
                Domain::Quaternary => {
                    let depends_on = adapters::quaternary_taxon_lookup_id(&req).map(|id| {
                        let idx = subqueries.len();
                        subqueries.push(Subquery::new(
                            format!("{}:{}", paleo::LABEL, paleo_seq),
                            Domain::Paleo,
                            false,
                        ));
                        plans.push(Plan::SecondaryLookup { id });
                        paleo_seq += 1;
                        idx
                    });

                    let mut sq = Subquery::new(
                        format!("{}:{}", crate::adapters::quaternary::LABEL, quaternary_seq),
                        Domain::Quaternary,
                        true,
                    );
                    if let Some(idx) = depends_on {
                        sq = sq.depending_on(idx);
                    }
                    subqueries.push(sq);
                    plans.push(Plan::Primary { domain: Domain::Quaternary });
                    quaternary_seq += 1;
                }
            }
        }

        let completions = subqueries.iter().map(|s| s.completion.clone()).collect();
        let resolved_values = subqueries.iter().map(|s| s.resolved_value.clone()).collect();

        let shared = Arc::new(Shared {
            req,
            http,
            paleo,
            quaternary,
            query_kind,
            completions,
            resolved_values,
        });

        CompositeDriver {
            shared,
            subqueries,
            plans,
            retries_budget: opts.retries,
            timeout: opts.timeout,
            timed_out: false,
        }
    }

    /// The URLs this composite request would issue (or has issued), for
    /// diagnostics. `include_secondary` also reports cross-translation
    /// lookup subqueries, which otherwise never surface outside a warning.
    pub fn urls(&self, include_secondary: bool) -> Vec<String> {
        self.subqueries
            .iter()
            .filter(|s| include_secondary || s.main)
            .filter_map(|s| s.url.as_ref().map(Url::to_string))
            .collect()
    }

    /// Runs every subquery to completion or until the deadline trips,
    /// whichever comes first (§4.6). Consumes and returns `self` so
    /// `results()`/`warnings()` reflect the final state.
    pub async fn run(mut self) -> CompositeDriver {
        let n = self.subqueries.len();
        if n == 0 {
            return self;
        }

        let cells: Vec<Arc<TokioMutex<Subquery>>> = std::mem::take(&mut self.subqueries)
            .into_iter()
            .map(|sq| Arc::new(TokioMutex::new(sq)))
            .collect();

        let tick = Arc::new(Notify::new());
        let mut join_set = tokio::task::JoinSet::new();
        for (idx, cell) in cells.iter().cloned().enumerate() {
            let shared = self.shared.clone();
            let tick = tick.clone();
            let plan_kind = match &self.plans[idx] {
                Plan::Primary { domain } => PlanKind::Primary(*domain),
                Plan::SecondaryLookup { id } => PlanKind::SecondaryLookup(*id),
            };
            let retries_budget = self.retries_budget;
            join_set.spawn(async move {
                drive_one(idx, plan_kind, cell, shared, tick, retries_budget).await;
            });
        }

        let deadline_sleep = async {
            if self.timeout.is_zero() {
                futures::future::pending::<()>().await
            } else {
                tokio::time::sleep(self.timeout).await
            }
        };
        tokio::pin!(deadline_sleep);

        let timeout_active = !self.timeout.is_zero();
        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut completed = 0usize;
        loop {
            if completed >= n {
                break;
            }
            tokio::select! {
                biased;
                _ = &mut deadline_sleep, if timeout_active => {
                    self.timed_out = true;
                    tracing::warn!(timeout = ?self.timeout, completed, total = n, "composite deadline tripped; cancelling in-flight subqueries");
                    break;
                }
                _ = ticker.tick(), if timeout_active => {
                    tick.notify_waiters();
                }
                res = join_set.join_next() => {
                    match res {
                        Some(_) => completed += 1,
                        None => break,
                    }
                }
            }
        }

        // Teardown: drop/cancel whatever is still in flight (§4.6 step 4).
        join_set.abort_all();
        while join_set.join_next().await.is_some() {}

        self.subqueries = cells
            .into_iter()
            .map(|c| {
                Arc::try_unwrap(c)
                    .unwrap_or_else(|_| unreachable!("every driving task has been drained"))
                    .into_inner()
            })
            .collect();

        self
    }

    /// Main-subquery records in registration order, then stably sorted by
    /// `order` (§4.7). Missing order keys sort after present ones.
    pub fn results(&self) -> Vec<&Record> {
        let mut out: Vec<&Record> = self
            .subqueries
            .iter()
            .filter(|s| s.main)
            .flat_map(|s| s.records.iter())
            .collect();

        for key in self.shared.req.order.iter().rev() {
            out.sort_by(|a, b| {
                let av = match key.field {
                    AgeField::Older => a.age_older_ybp,
                    AgeField::Younger => a.age_younger_ybp,
                };
                let bv = match key.field {
                    AgeField::Older => b.age_older_ybp,
                    AgeField::Younger => b.age_younger_ybp,
                };
                let ord = match (av, bv) {
                    (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                if key.desc {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        out
    }

    /// Synthesizes the composite response's warning list: a leading TIMEOUT
    /// notice if the deadline tripped, then each subquery's own non-2xx and
    /// adapter-pushed warnings, prefixed by its label (§4.6, §4.7, §8).
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.timed_out {
            out.push("TIMEOUT: composite request exceeded its deadline; results may be incomplete".to_string());
        }
        for sq in &self.subqueries {
            if let Some(status) = sq.http_status {
                if !(200..300).contains(&status) {
                    out.push(format!(
                        "{}: HTTP {} {}",
                        sq.label,
                        status,
                        sq.http_reason.as_deref().unwrap_or("")
                    ));
                }
            }
            for w in &sq.warnings {
                out.push(format!("{}: {}", sq.label, w));
            }
            if let Some(dep_idx) = sq.depends_on {
                let resolved = self.subqueries[dep_idx].resolved_value.lock().unwrap().is_some();
                if !resolved {
                    out.push(format!(
                        "{}: taxon cross-translation lookup failed; no records returned",
                        sq.label
                    ));
                }
            }
        }
        out
    }
}

/// Per-subquery diagnostics, surfaced via `show=diagnostics` (§6) rather
/// than growing the warning strings into something machine-parseable.
#[derive(Debug, Clone)]
pub struct SubqueryDiagnostics {
    pub label: String,
    pub http_status: Option<u16>,
    pub retry_count: u32,
    pub removed: u64,
    pub record_count: usize,
}

impl CompositeDriver {
    pub fn diagnostics(&self) -> Vec<SubqueryDiagnostics> {
        self.subqueries
            .iter()
            .map(|s| SubqueryDiagnostics {
                label: s.label.clone(),
                http_status: s.http_status,
                retry_count: s.retry_count,
                removed: s.removed,
                record_count: s.records.len(),
            })
            .collect()
    }
}

#[derive(Clone, Copy)]
enum PlanKind {
    Primary(Domain),
    SecondaryLookup(u64),
}

async fn drive_one(
    idx: usize,
    plan: PlanKind,
    cell: Arc<TokioMutex<Subquery>>,
    shared: Arc<Shared>,
    tick: Arc<Notify>,
    retries_budget: u32,
) {
    loop {
        {
            let mut s = cell.lock().await;
            s.status = crate::subquery::Status::Init;
        }

        let depends_on = { cell.lock().await.depends_on };
        let resolved_name = if let Some(dep_idx) = depends_on {
            shared.completions[dep_idx].notified().await;
            let name = shared.resolved_values[dep_idx].lock().unwrap().clone();
            if name.is_none() {
                let mut s = cell.lock().await;
                s.status = crate::subquery::Status::Abort;
                tracing::debug!(label = %s.label, status = ?s.status, "aborting: dependency lookup never resolved a name");
                drop(s);
                shared.completions[idx].notify_one();
                return;
            }
            name
        } else {
            None
        };

        let url = match plan {
            PlanKind::SecondaryLookup(id) => paleo::build_taxon_lookup_url(&shared.paleo.base_url, id),
            PlanKind::Primary(domain) => {
                let adapter = shared.adapter_for(domain);
                let built = match shared.query_kind {
                    QueryKind::List => adapter.build_list_url(&shared.req, resolved_name.as_deref()),
                    QueryKind::Single => adapter.build_single_url(&shared.req, resolved_name.as_deref()),
                };
                match built {
                    Ok(Some(u)) => u,
                    Ok(None) => {
                        let mut s = cell.lock().await;
                        s.status = crate::subquery::Status::Abort;
                        tracing::debug!(label = %s.label, status = ?s.status, "aborting: no URL to build for this request");
                        drop(s);
                        shared.completions[idx].notify_one();
                        return;
                    }
                    Err(e) => {
                        let mut s = cell.lock().await;
                        s.status = crate::subquery::Status::Abort;
                        s.warnings.push(e.to_string());
                        tracing::debug!(label = %s.label, status = ?s.status, error = %e, "aborting: URL build failed");
                        drop(s);
                        shared.completions[idx].notify_one();
                        return;
                    }
                }
            }
        };

        {
            let mut s = cell.lock().await;
            s.url = Some(url.clone());
            s.status = crate::subquery::Status::Get;
            tracing::debug!(label = %s.label, %url, "issuing subquery");
        }

        let adapter = match plan {
            PlanKind::SecondaryLookup(_) => shared.adapter_for(Domain::Paleo),
            PlanKind::Primary(domain) => shared.adapter_for(domain),
        };

        let (status, reason, response) = match shared.http.get(url.clone()).send().await {
            Ok(r) => {
                let status = r.status().as_u16();
                let reason = r.status().canonical_reason().unwrap_or("").to_string();
                (Some(status), reason, Some(r))
            }
            Err(_) => (
                Some(596),
                "transport error".to_string(),
                None,
            ),
        };

        {
            let mut s = cell.lock().await;
            s.http_status = status;
            s.http_reason = Some(reason);
        }

        if let Some(mut resp) = response {
            let mut extractor = gateway_json::Extractor::new(adapter.targets());
            loop {
                match resp.chunk().await {
                    Ok(Some(bytes)) => match extractor.feed(&bytes) {
                        Ok(values) => {
                            let mut s = cell.lock().await;
                            for v in values {
                                adapter.on_value(&shared.req, &v.path, v.value, &mut s);
                            }
                        }
                        Err(_) => {
                            let mut s = cell.lock().await;
                            s.warnings.push("malformed response body; stopped reading".to_string());
                            break;
                        }
                    },
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
        }

        {
            let mut s = cell.lock().await;
            s.status = crate::subquery::Status::Comp;
        }

        let (retryable, retry_count) = {
            let s = cell.lock().await;
            (s.is_retryable(), s.retry_count)
        };

        if retryable && retry_count < retries_budget {
            {
                let mut s = cell.lock().await;
                let status = s.http_status.unwrap_or(0);
                s.reset_for_retry();
                s.retry_count += 1;
                tracing::warn!(
                    label = %s.label,
                    retry_count = s.retry_count,
                    http_status = status,
                    "retrying subquery after retryable upstream failure"
                );
            }
            tick.notified().await;
            continue;
        }

        if retryable {
            let mut s = cell.lock().await;
            let status = s.http_status.unwrap_or(0);
            let url = s.url.as_ref().map(Url::to_string).unwrap_or_default();
            s.warnings.push(format!(
                "gave up after {} retr{}: last status was HTTP {status}, url={url}",
                s.retry_count,
                if s.retry_count == 1 { "y" } else { "ies" }
            ));
            tracing::warn!(label = %s.label, retry_count = s.retry_count, http_status = status, %url, "retry budget exhausted");
        }

        let is_secondary = { !cell.lock().await.main };
        if is_secondary {
            let s = cell.lock().await;
            if let Some(rec) = s.records.first() {
                if let Some(name) = rec.fields.get("taxon_name").and_then(Value::as_str) {
                    *shared.resolved_values[idx].lock().unwrap() = Some(name.to_string());
                }
            }
        }

        {
            let s = cell.lock().await;
            tracing::debug!(
                label = %s.label,
                status = ?s.status,
                http_status = ?s.http_status,
                url = ?s.url.as_ref().map(Url::to_string),
                "subquery complete"
            );
        }

        shared.completions[idx].notify_one();
        return;
    }
}
