use gateway_ident::{Domain, IdType};
use gateway_json::Pointer;
use serde_json::Value;
use url::Url;

use crate::adapter::{self, UpstreamAdapter};
use crate::record::Record;
use crate::request::RequestContext;
use crate::subquery::Subquery;
use crate::time::TimeRule;
use crate::urlenc::QueryBuilder;
use crate::Error;

pub const LABEL: &str = "Neotoma";

/// The quaternary-fauna upstream. Accepts years-before-present directly and
/// a binary `agedocontain` switch; it cannot express `major` or `buffer`
/// natively (§4.4), so it always asks for a coarse overlap and relies on
/// the same post-filter every record goes through regardless of source.
pub struct QuaternaryAdapter {
    pub base_url: Url,
}

impl QuaternaryAdapter {
    pub fn new(base_url: Url) -> QuaternaryAdapter {
        QuaternaryAdapter { base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    /// A taxon identifier that arrived tagged for the paleobiology source
    /// but that this adapter has no name to query with yet, per §4.4.
    fn unresolved_paleo_taxon(&self, req: &RequestContext) -> Option<u64> {
        if req.name_filter.is_some() {
            return None;
        }
        if req
            .taxon_ids
            .iter()
            .any(|id| id.domain == Domain::Quaternary)
        {
            return None;
        }
        req.taxon_ids
            .iter()
            .find(|id| id.domain == Domain::Paleo)
            .map(|id| id.number)
    }
}

impl UpstreamAdapter for QuaternaryAdapter {
    fn domain(&self) -> Domain {
        Domain::Quaternary
    }

    fn label(&self) -> &'static str {
        LABEL
    }

    fn targets(&self) -> Vec<Pointer> {
        vec![
            Pointer::parse("/data/^"),
            Pointer::parse("/success"),
            Pointer::parse("/message"),
        ]
    }

    fn build_list_url(
        &self,
        req: &RequestContext,
        resolved_name: Option<&str>,
    ) -> Result<Option<Url>, Error> {
        let mut qb = QueryBuilder::new();
        let mut any = false;

        let occ = ids_for(req.occ_ids.iter().copied(), Domain::Quaternary);
        if !occ.is_empty() {
            qb.push("occid", join_numbers(&occ));
            any = true;
        }
        let site = ids_for(req.site_ids.iter().copied(), Domain::Quaternary);
        if !site.is_empty() {
            qb.push("siteid", join_numbers(&site));
            any = true;
        }

        let name = resolved_name
            .map(str::to_string)
            .or_else(|| req.name_filter.as_ref().map(|nf| nf.value.clone()));
        if let Some(name) = name {
            qb.push("taxonname", name);
            any = true;
        } else {
            let taxon = ids_for(req.taxon_ids.iter().copied(), Domain::Quaternary);
            if !taxon.is_empty() {
                qb.push("taxonid", join_numbers(&taxon));
                any = true;
            }
        }

        if let Some(bbox) = req.bbox {
            qb.push("lngmin", bbox.w);
            qb.push("lngmax", bbox.e);
            qb.push("latmin", bbox.s);
            qb.push("latmax", bbox.n);
            any = true;
        }

        if req.min_ybp.is_some() || req.max_ybp.is_some() {
            qb.push_opt("ageyoung", req.min_ybp);
            qb.push_opt("ageold", req.max_ybp);
            qb.push("agedocontain", 0);
            any = true;
        }

        for (k, v) in &req.passthrough {
            qb.push(k, v);
        }

        if !any {
            return Ok(None);
        }
        qb.push("limit", 999_999);
        parse_built(qb.build(&self.endpoint("occs/list.json")))
    }

    fn build_single_url(
        &self,
        req: &RequestContext,
        _resolved_name: Option<&str>,
    ) -> Result<Option<Url>, Error> {
        let ids = ids_for(req.occ_ids.iter().copied(), Domain::Quaternary);
        if ids.is_empty() {
            return Ok(None);
        }
        let mut qb = QueryBuilder::new();
        qb.push("occid", join_numbers(&ids));
        parse_built(qb.build(&self.endpoint("occs/single.json")))
    }

    fn needs_name_resolution(&self, req: &RequestContext) -> bool {
        self.unresolved_paleo_taxon(req).is_some()
    }

    fn on_value(&self, req: &RequestContext, path: &Pointer, value: Value, sq: &mut Subquery) {
        if *path == Pointer::parse("/data/^") {
            let mut record = normalize_record(req, value);
            let pass = apply_time_filter(req, &record);
            if pass {
                record.set_database_and_type(LABEL, req.vocab);
                sq.records.push(record);
            } else {
                sq.removed += 1;
            }
        } else if *path == Pointer::parse("/success") {
            if value.as_bool() == Some(false) {
                sq.warnings.push("Request failed".to_string());
            }
        } else if *path == Pointer::parse("/message") {
            if let Some(s) = adapter::string(&value) {
                if !s.is_empty() {
                    sq.warnings.push(s);
                }
            }
        }
    }
}

/// The paleobiology taxon identifier this adapter needs resolved to a
/// name before it can build its primary URL, if any.
pub fn taxon_lookup_id(req: &RequestContext) -> Option<u64> {
    QuaternaryAdapter {
        base_url: Url::parse("http://unused.invalid").unwrap(),
    }
    .unresolved_paleo_taxon(req)
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

    let older = record.fields.get("ageold").and_then(adapter::number);
    let younger = record.fields.get("ageyoung").and_then(adapter::number);
    record.set_age(older, younger, req.ageunit);

    let lng1 = record.fields.get("lngw").and_then(adapter::number);
    let lng2 = record.fields.get("lnge").and_then(adapter::number);
    let lat1 = record.fields.get("lats").and_then(adapter::number);
    let lat2 = record.fields.get("latn").and_then(adapter::number);
    record.set_midpoint(lng1, lng2, lat1, lat2);

    if let Some(n) = record.fields.get("siteid").and_then(Value::as_u64) {
        record.set_external_id("siteid", Domain::Quaternary, IdType::Sit, n);
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ctx(pairs: &[(&str, &str)]) -> RequestContext {
        let params: BTreeMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        RequestContext::parse(&params).unwrap().0
    }

    #[test]
    fn build_list_url_always_adds_coarse_overlap_and_limit() {
        let req = ctx(&[("base_name", "Canis"), ("min_ma", "1"), ("max_ma", "2")]);
        let adapter = QuaternaryAdapter::new(Url::parse("https://neotoma.example").unwrap());
        let url = adapter.build_list_url(&req, None).unwrap().unwrap();
        let s = url.as_str();
        assert!(s.contains("agedocontain=0"));
        assert!(s.contains("limit=999999"));
        assert!(s.contains("ageold=2000000"));
        assert!(s.contains("ageyoung=1000000"));
    }

    #[test]
    fn needs_name_resolution_when_only_a_paleo_taxon_id_is_given() {
        let req = ctx(&[("base_id", "pbdb:txn:41055"), ("ds", "n")]);
        let adapter = QuaternaryAdapter::new(Url::parse("https://neotoma.example").unwrap());
        assert!(adapter.needs_name_resolution(&req));
        assert_eq!(taxon_lookup_id(&req), Some(41055));
    }

    #[test]
    fn resolved_name_is_used_over_a_bare_taxon_id() {
        let req = ctx(&[("base_id", "pbdb:txn:41055"), ("ds", "n")]);
        let adapter = QuaternaryAdapter::new(Url::parse("https://neotoma.example").unwrap());
        let url = adapter.build_list_url(&req, Some("Canis")).unwrap().unwrap();
        assert!(url.as_str().contains("taxonname=Canis"));
    }
}
