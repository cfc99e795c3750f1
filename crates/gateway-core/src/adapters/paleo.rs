use gateway_ident::{Domain, IdType};
use gateway_json::Pointer;
use serde_json::Value;
use url::Url;

use crate::adapter::{self, UpstreamAdapter};
use crate::record::Record;
use crate::request::RequestContext;
use crate::subquery::Subquery;
use crate::time::{ybp_to_unit, AgeUnit, TimeRule};
use crate::urlenc::QueryBuilder;
use crate::Error;

pub const LABEL: &str = "PaleoBioDB";

/// The paleobiology upstream. Accepts Ma and named time rules natively
/// (§4.4, §6): no post-merge re-filtering is needed for its own records
/// under `contain`/`overlap`.
pub struct PaleoAdapter {
    pub base_url: Url,
}

impl PaleoAdapter {
    pub fn new(base_url: Url) -> PaleoAdapter {
        PaleoAdapter { base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    fn push_common_filters(&self, req: &RequestContext, qb: &mut QueryBuilder) -> bool {
        let mut any = false;

        let occ = ids_for(req.occ_ids.iter().copied(), Domain::Paleo);
        if !occ.is_empty() {
            qb.push("occ_id", join_numbers(&occ));
            any = true;
        }
        let site = ids_for(req.site_ids.iter().copied(), Domain::Paleo);
        if !site.is_empty() {
            qb.push("site_id", join_numbers(&site));
            any = true;
        }
        let taxon = ids_for(req.taxon_ids.iter().copied(), Domain::Paleo);
        if !taxon.is_empty() {
            qb.push("base_id", join_numbers(&taxon));
            any = true;
        }

        if let Some(nf) = &req.name_filter {
            qb.push(nf.kind.param_name(), &nf.value);
            any = true;
        }

        if let Some(bbox) = req.bbox {
            qb.push("lngmin", bbox.w);
            qb.push("lngmax", bbox.e);
            qb.push("latmin", bbox.s);
            qb.push("latmax", bbox.n);
            any = true;
        }

        if let Some(min_ybp) = req.min_ybp {
            qb.push("min_ma", ybp_to_unit(min_ybp, AgeUnit::Ma));
            any = true;
        }
        if let Some(max_ybp) = req.max_ybp {
            qb.push("max_ma", ybp_to_unit(max_ybp, AgeUnit::Ma));
            any = true;
        }

        qb.push("timerule", timerule_token(req.time_rule));
        if req.time_rule == TimeRule::Buffer {
            if let Some(v) = req.oldbuffer_ybp {
                qb.push("oldbuffer", ybp_to_unit(v, AgeUnit::Ma));
            }
            if let Some(v) = req.youngbuffer_ybp {
                qb.push("youngbuffer", ybp_to_unit(v, AgeUnit::Ma));
            }
        }

        for (k, v) in &req.passthrough {
            qb.push(k, v);
        }

        any
    }
}

impl UpstreamAdapter for PaleoAdapter {
    fn domain(&self) -> Domain {
        Domain::Paleo
    }

    fn label(&self) -> &'static str {
        LABEL
    }

    fn targets(&self) -> Vec<Pointer> {
        vec![
            Pointer::parse("/records/^"),
            Pointer::parse("/status_code"),
            Pointer::parse("/warnings"),
            Pointer::parse("/errors"),
        ]
    }

    fn build_list_url(
        &self,
        req: &RequestContext,
        _resolved_name: Option<&str>,
    ) -> Result<Option<Url>, Error> {
        let mut qb = QueryBuilder::new();
        if !self.push_common_filters(req, &mut qb) {
            return Ok(None);
        }
        parse_built(qb.build(&self.endpoint("occs/list.json")))
    }

    fn build_single_url(
        &self,
        req: &RequestContext,
        _resolved_name: Option<&str>,
    ) -> Result<Option<Url>, Error> {
        let ids = ids_for(req.occ_ids.iter().copied(), Domain::Paleo);
        if ids.is_empty() {
            return Ok(None);
        }
        let mut qb = QueryBuilder::new();
        qb.push("id", join_numbers(&ids));
        parse_built(qb.build(&self.endpoint("occs/single.json")))
    }

    fn needs_name_resolution(&self, _req: &RequestContext) -> bool {
        false
    }

    fn on_value(&self, req: &RequestContext, path: &Pointer, value: Value, sq: &mut Subquery) {
        if *path == Pointer::parse("/records/^") {
            let mut record = normalize_record(req, value);
            let pass = apply_time_filter(req, &record);
            if pass {
                record.set_database_and_type(LABEL, req.vocab);
                sq.records.push(record);
            } else {
                sq.removed += 1;
            }
        } else if *path == Pointer::parse("/status_code") {
            if value.as_u64() != Some(200) {
                sq.warnings.push("Request failed".to_string());
            }
        } else if *path == Pointer::parse("/warnings") || *path == Pointer::parse("/errors") {
            if let Value::Array(items) = value {
                for item in items {
                    if let Some(s) = adapter::string(&item) {
                        sq.warnings.push(s);
                    }
                }
            }
        }
    }
}

fn parse_built(url: String) -> Result<Option<Url>, Error> {
    Url::parse(&url)
        .map(Some)
        .map_err(|e| Error::internal(format!("built an invalid URL '{url}': {e}")))
}

fn ids_for(ids: impl Iterator<Item = crate::request::ResolvedId>, domain: Domain) -> Vec<u64> {
    ids.filter(|id| id.domain == domain).map(|id| id.number).collect()
}

fn join_numbers(ids: &[u64]) -> String {
    ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",")
}

fn timerule_token(rule: TimeRule) -> &'static str {
    match rule {
        TimeRule::Contain => "contain",
        TimeRule::Major => "major",
        TimeRule::Buffer => "buffer",
        TimeRule::Overlap => "overlap",
    }
}

/// Reads a corner-coordinate bounding rectangle and two age bounds out of
/// one upstream record, and folds them into the unified shape (§3, §4.7).
fn normalize_record(req: &RequestContext, value: Value) -> Record {
    let obj = match value {
        Value::Object(o) => o,
        other => {
            let mut o = serde_json::Map::new();
            o.insert("value".to_string(), other);
            o
        }
    };
    let mut record = Record::new(obj);

    let older = record.fields.get("max_ma").and_then(adapter::number).map(|v| v * 1_000_000.0);
    let younger = record.fields.get("min_ma").and_then(adapter::number).map(|v| v * 1_000_000.0);
    record.set_age(older, younger, req.ageunit);

    let lng1 = record.fields.get("lng1").and_then(adapter::number);
    let lng2 = record.fields.get("lng2").and_then(adapter::number);
    let lat1 = record.fields.get("lat1").and_then(adapter::number);
    let lat2 = record.fields.get("lat2").and_then(adapter::number);
    record.set_midpoint(lng1, lng2, lat1, lat2);

    if let Some(n) = record.fields.get("occurrence_no").and_then(Value::as_u64) {
        record.set_external_id("occurrence_no", Domain::Paleo, IdType::Occ, n);
    }

    record
}

fn apply_time_filter(req: &RequestContext, record: &Record) -> bool {
    match req.time_rule {
        TimeRule::Contain | TimeRule::Overlap => true,
        TimeRule::Major => {
            let (Some(min), Some(max)) = (req.min_ybp, req.max_ybp) else {
                return true;
            };
            crate::record::major_overlap_passes(record, min, max)
        }
        TimeRule::Buffer => {
            let (Some(min), Some(max), Some(old), Some(young)) =
                (req.min_ybp, req.max_ybp, req.oldbuffer_ybp, req.youngbuffer_ybp)
            else {
                return true;
            };
            crate::record::buffer_passes(record, min, max, old, young)
        }
    }
}

impl crate::request::NameFilterKind {
    fn param_name(self) -> &'static str {
        match self {
            crate::request::NameFilterKind::TaxonName => "taxon_name",
            crate::request::NameFilterKind::BaseName => "base_name",
            crate::request::NameFilterKind::MatchName => "match_name",
        }
    }
}

/// Builds the URL for the secondary taxon-name lookup the quaternary
/// adapter depends on when it only has a paleobiology-domain taxon id
/// (§4.4). This lives here, not on the trait, because only the
/// paleobiology upstream ever plays this role.
pub fn build_taxon_lookup_url(base_url: &Url, id: u64) -> Url {
    let mut qb = QueryBuilder::new();
    qb.push("id", id);
    Url::parse(&qb.build(&format!(
        "{}/taxa/single.json",
        base_url.as_str().trim_end_matches('/')
    )))
    .expect("query-built URL is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestContext;
    use std::collections::BTreeMap;

    fn ctx(pairs: &[(&str, &str)]) -> RequestContext {
        let params: BTreeMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        RequestContext::parse(&params).unwrap().0
    }

    #[test]
    fn build_list_url_converts_ma_and_encodes_names() {
        let req = ctx(&[("base_name", "Canis lupus"), ("min_ma", "1"), ("max_ma", "2")]);
        let adapter = PaleoAdapter::new(Url::parse("https://paleo.example").unwrap());
        let url = adapter.build_list_url(&req, None).unwrap().unwrap();
        let s = url.as_str();
        assert!(s.contains("base_name=Canis%20lupus"));
        assert!(s.contains("min_ma=1"));
        assert!(s.contains("max_ma=2"));
        assert!(s.contains("timerule=major"));
    }

    #[test]
    fn build_list_url_maps_bbox_corners_correctly() {
        let req = ctx(&[("base_name", "Canis"), ("bbox", "-10,-5,10,5")]);
        let adapter = PaleoAdapter::new(Url::parse("https://paleo.example").unwrap());
        let url = adapter.build_list_url(&req, None).unwrap().unwrap();
        let s = url.as_str();
        assert!(s.contains("lngmin=-10"));
        assert!(s.contains("lngmax=10"));
        assert!(s.contains("latmin=-5"));
        assert!(s.contains("latmax=5"));
    }

    #[test]
    fn build_list_url_returns_none_when_no_own_domain_filters() {
        let req = ctx(&[("occ_id", "neotoma:99"), ("ds", "p,n")]);
        let adapter = PaleoAdapter::new(Url::parse("https://paleo.example").unwrap());
        assert!(adapter.build_list_url(&req, None).unwrap().is_none());
    }
}
