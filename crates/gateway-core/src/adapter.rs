//! Per-upstream translation, §4.4.

use gateway_json::Pointer;
use serde_json::Value;
use url::Url;

use crate::request::RequestContext;
use crate::subquery::Subquery;
use crate::Error;

/// The three operations §4.4 gives every upstream adapter. New upstreams
/// register by implementing these, not by the driver inspecting records
/// (§9, "Dynamic field dispatch"). URL building is synchronous: the
/// secondary-subquery case (§4.4) is resolved by the driver *before*
/// calling in here, by awaiting the secondary's completion and passing its
/// result as `resolved_name`.
pub trait UpstreamAdapter: Send + Sync {
    fn domain(&self) -> gateway_ident::Domain;

    /// The label subquery warnings and URLs are prefixed with, e.g. `"PaleoBioDB"`.
    fn label(&self) -> &'static str;

    /// JSON-pointer paths (with wildcard tail where relevant) this
    /// upstream's streaming extractor watches for, §4.3/§6.
    fn targets(&self) -> Vec<Pointer>;

    /// Builds the list-query URL, or `Ok(None)` if this upstream has
    /// nothing matching the request (not an error, §4.4). `resolved_name`
    /// carries a cross-translated taxon name when this adapter's subquery
    /// depends on a secondary lookup.
    fn build_list_url(
        &self,
        req: &RequestContext,
        resolved_name: Option<&str>,
    ) -> Result<Option<Url>, Error>;

    /// Builds the single-record-by-identifier URL, or `Ok(None)`.
    fn build_single_url(
        &self,
        req: &RequestContext,
        resolved_name: Option<&str>,
    ) -> Result<Option<Url>, Error>;

    /// Does this adapter need a cross-translated name before it can build
    /// its primary URL (the secondary-subquery case, §4.4)?
    fn needs_name_resolution(&self, req: &RequestContext) -> bool;

    /// Classifies one extracted `(path, value)` pair and folds it into the
    /// owning subquery's accumulated records/warnings, per §4.4's
    /// data/status/message dispatch.
    fn on_value(&self, req: &RequestContext, path: &Pointer, value: Value, sq: &mut Subquery);
}

pub fn number(v: &Value) -> Option<f64> {
    v.as_f64()
}

pub fn string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
