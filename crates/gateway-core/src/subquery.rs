//! One outbound HTTP request as part of a composite request, §3 / §4.5.

use std::sync::{Arc, Mutex};

use gateway_ident::Domain;
use tokio::sync::Notify;
use url::Url;

use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Created,
    Init,
    Get,
    Comp,
    Abort,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Comp | Status::Abort)
    }
}

/// HTTP statuses the upstreams use for transport-layer failures, retried
/// per §4.5 up to the driver's retry budget.
pub const RETRYABLE_STATUSES: [u16; 3] = [595, 596, 597];

/// A state-machine record for one outbound HTTP request. The driver owns
/// every `Subquery` in a `Vec`; there is no back-reference to the driver —
/// a dependent subquery instead holds the *index* of the subquery it
/// depends on (`depends_on`), and reads its resolved value out of
/// `resolved_name` after awaiting `completion`. This is the ownership split
/// spec §9 asks for without a literal weak reference.
pub struct Subquery {
    pub label: String,
    pub domain: Domain,
    /// Only subqueries with `main = true` contribute to the final result set.
    pub main: bool,
    pub status: Status,
    pub url: Option<Url>,
    pub records: Vec<Record>,
    pub warnings: Vec<String>,
    pub http_status: Option<u16>,
    pub http_reason: Option<String>,
    pub retry_count: u32,
    pub removed: u64,
    /// Index of the subquery whose completion this one awaits before
    /// building its own URL (the secondary-then-primary chain, §4.4).
    pub depends_on: Option<usize>,
    /// Signaled exactly once, when this subquery reaches a terminal state.
    pub completion: Arc<Notify>,
    /// The value a dependent primary reads after awaiting `completion`,
    /// e.g. a cross-translated taxon name. `None` if the secondary failed
    /// or produced nothing usable.
    pub resolved_value: Arc<Mutex<Option<String>>>,
}

impl Subquery {
    pub fn new(label: impl Into<String>, domain: Domain, main: bool) -> Subquery {
        Subquery {
            label: label.into(),
            domain,
            main,
            status: Status::Created,
            url: None,
            records: Vec::new(),
            warnings: Vec::new(),
            http_status: None,
            http_reason: None,
            retry_count: 0,
            removed: 0,
            depends_on: None,
            completion: Arc::new(Notify::new()),
            resolved_value: Arc::new(Mutex::new(None)),
        }
    }

    pub fn depending_on(mut self, index: usize) -> Subquery {
        self.depends_on = Some(index);
        self
    }

    /// §4.5 edge case: on retry, previously accumulated records and
    /// warnings are discarded, per the spec's resolution of the "reset
    /// both" open question (§9).
    pub fn reset_for_retry(&mut self) {
        self.records.clear();
        self.warnings.clear();
        self.removed = 0;
        self.http_status = None;
        self.http_reason = None;
    }

    pub fn is_retryable(&self) -> bool {
        self.http_status
            .map(|s| RETRYABLE_STATUSES.contains(&s))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Subquery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subquery")
            .field("label", &self.label)
            .field("domain", &self.domain)
            .field("main", &self.main)
            .field("status", &self.status)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("records", &self.records.len())
            .field("warnings", &self.warnings)
            .field("http_status", &self.http_status)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}
