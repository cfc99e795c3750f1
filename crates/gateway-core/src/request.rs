//! Request context: parsing and canonicalizing composite-level parameters,
//! §3 and §4.7.

use std::collections::BTreeMap;

use gateway_ident::{Domain, ExternalId, IdType};

use crate::time::{self, AgeUnit, TimeRule};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vocab {
    Neotoma,
    Pbdb,
    Com,
    Dwc,
}

impl Vocab {
    pub fn parse(s: &str) -> Result<Vocab, Error> {
        match s.to_ascii_lowercase().as_str() {
            "neotoma" => Ok(Vocab::Neotoma),
            "pbdb" => Ok(Vocab::Pbdb),
            "com" => Ok(Vocab::Com),
            "dwc" => Ok(Vocab::Dwc),
            other => Err(Error::caller_input(format!("unknown vocab '{other}'"))),
        }
    }
}

impl Default for Vocab {
    fn default() -> Self {
        Vocab::Com
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeField {
    Older,
    Younger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub field: AgeField,
    pub desc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub w: f64,
    pub s: f64,
    pub e: f64,
    pub n: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameFilterKind {
    TaxonName,
    BaseName,
    MatchName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    pub kind: NameFilterKind,
    pub value: String,
}

/// An identifier after domain resolution: one that survived §4.2
/// classification against the request's enabled-upstream set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedId {
    pub domain: Domain,
    pub kind: IdType,
    pub number: u64,
}

/// Parameter names the transform itself consumes. Everything else is
/// forwarded verbatim as a pass-through parameter, per §6.
const CONSUMED_PARAMS: &[&str] = &[
    "occ_id",
    "site_id",
    "taxon_name",
    "base_name",
    "match_name",
    "base_id",
    "taxon_id",
    "bbox",
    "min_age",
    "max_age",
    "min_ma",
    "max_ma",
    "timerule",
    "timebuffer",
    "ds",
    "ageunit",
    "order",
    "vocab",
    "show",
];

/// An immutable-after-parse bundle of the composite request's parameters,
/// read-only to every subquery for the life of the request (§3).
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub vocab: Vocab,
    pub min_ybp: Option<f64>,
    pub max_ybp: Option<f64>,
    pub time_rule: TimeRule,
    pub oldbuffer_ybp: Option<f64>,
    pub youngbuffer_ybp: Option<f64>,
    pub bbox: Option<BBox>,
    pub occ_ids: Vec<ResolvedId>,
    pub site_ids: Vec<ResolvedId>,
    pub taxon_ids: Vec<ResolvedId>,
    pub name_filter: Option<NameFilter>,
    pub enabled: Vec<Domain>,
    pub ageunit: AgeUnit,
    pub order: Vec<OrderKey>,
    pub show: Vec<String>,
    pub passthrough: BTreeMap<String, String>,
}

impl RequestContext {
    /// Parses raw query parameters into a `RequestContext`. Returns any
    /// non-fatal identifier-classification problems (§4.2) as warning
    /// strings alongside it; the context itself carries none of its own
    /// mutable state.
    pub fn parse(params: &BTreeMap<String, String>) -> Result<(RequestContext, Vec<String>), Error> {
        let mut warnings = Vec::new();

        let enabled = match params.get("ds") {
            Some(s) => {
                let mut out = Vec::new();
                for tok in s.split(',').filter(|t| !t.is_empty()) {
                    match Domain::from_alias(tok) {
                        Some(d) => {
                            if !out.contains(&d) {
                                out.push(d);
                            }
                        }
                        None => {
                            return Err(Error::caller_input(format!(
                                "unknown upstream selector '{tok}'"
                            )))
                        }
                    }
                }
                out
            }
            None => Domain::all().to_vec(),
        };

        at_most_one(params, &["min_age", "min_ma"])?;
        at_most_one(params, &["max_age", "max_ma"])?;
        at_most_one(params, &["taxon_name", "base_name", "match_name"])?;

        let min_ybp = parse_age_bound(params, "min_age", "min_ma")?;
        let max_ybp = parse_age_bound(params, "max_age", "max_ma")?;

        let ageunit = match params.get("ageunit") {
            Some(s) => AgeUnit::parse(s)?,
            None => AgeUnit::default(),
        };

        let has_timebuffer = params.get("timebuffer").is_some();
        if has_timebuffer {
            if let Some(explicit) = params.get("timerule") {
                if TimeRule::parse(explicit)? != TimeRule::Buffer {
                    return Err(Error::caller_input(
                        "timebuffer was given but timerule is not 'buffer'",
                    ));
                }
            }
        }

        let time_rule = if has_timebuffer {
            TimeRule::Buffer
        } else if let Some(s) = params.get("timerule") {
            TimeRule::parse(s)?
        } else {
            TimeRule::default()
        };

        let (oldbuffer_ybp, youngbuffer_ybp) = if let Some(s) = params.get("timebuffer") {
            let range = max_ybp.unwrap_or(0.0) - min_ybp.unwrap_or(0.0);
            let (old, young) = time::parse_timebuffer(s, range, ageunit)?;
            (Some(old), Some(young))
        } else {
            (None, None)
        };

        let bbox = match params.get("bbox") {
            Some(s) => Some(parse_bbox(s)?),
            None => None,
        };

        let name_filter = ["taxon_name", "base_name", "match_name"]
            .iter()
            .find_map(|&p| {
                params.get(p).map(|v| NameFilter {
                    kind: match p {
                        "taxon_name" => NameFilterKind::TaxonName,
                        "base_name" => NameFilterKind::BaseName,
                        _ => NameFilterKind::MatchName,
                    },
                    value: v.clone(),
                })
            });

        let occ_ids = parse_id_list(params, "occ_id", IdType::Occ, &enabled, &mut warnings);
        let site_ids = parse_id_list(params, "site_id", IdType::Sit, &enabled, &mut warnings);
        let mut taxon_ids = parse_id_list(params, "taxon_id", IdType::Txn, &enabled, &mut warnings);
        taxon_ids.extend(parse_id_list(params, "base_id", IdType::Txn, &enabled, &mut warnings));

        let order = match params.get("order") {
            Some(s) => parse_order(s),
            None => Vec::new(),
        };

        let vocab = match params.get("vocab") {
            Some(s) => Vocab::parse(s)?,
            None => Vocab::default(),
        };

        let show = match params.get("show") {
            Some(s) => s.split(',').filter(|t| !t.is_empty()).map(String::from).collect(),
            None => Vec::new(),
        };

        let has_selector = occ_ids_present(params)
            || bbox.is_some()
            || min_ybp.is_some()
            || max_ybp.is_some()
            || name_filter.is_some();
        if !has_selector {
            return Err(Error::caller_input(
                "at least one selector parameter is required",
            ));
        }

        let passthrough = params
            .iter()
            .filter(|(k, _)| !CONSUMED_PARAMS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let ctx = RequestContext {
            vocab,
            min_ybp,
            max_ybp,
            time_rule,
            oldbuffer_ybp,
            youngbuffer_ybp,
            bbox,
            occ_ids,
            site_ids,
            taxon_ids,
            name_filter,
            enabled,
            ageunit,
            order,
            show,
            passthrough,
        };
        Ok((ctx, warnings))
    }

    pub fn range(&self) -> f64 {
        self.max_ybp.unwrap_or(0.0) - self.min_ybp.unwrap_or(0.0)
    }
}

fn occ_ids_present(params: &BTreeMap<String, String>) -> bool {
    ["occ_id", "site_id", "taxon_id", "base_id"]
        .iter()
        .any(|p| params.get(*p).is_some())
}

fn at_most_one(params: &BTreeMap<String, String>, names: &[&str]) -> Result<(), Error> {
    let present = names.iter().filter(|n| params.contains_key(**n)).count();
    if present > 1 {
        return Err(Error::caller_input(format!(
            "at most one of {} may be given",
            names.join(", ")
        )));
    }
    Ok(())
}

fn parse_age_bound(
    params: &BTreeMap<String, String>,
    years_key: &str,
    ma_key: &str,
) -> Result<Option<f64>, Error> {
    if let Some(s) = params.get(years_key) {
        let v: f64 = s
            .parse()
            .map_err(|_| Error::caller_input(format!("invalid {years_key} '{s}'")))?;
        return Ok(Some(v));
    }
    if let Some(s) = params.get(ma_key) {
        let v: f64 = s
            .parse()
            .map_err(|_| Error::caller_input(format!("invalid {ma_key} '{s}'")))?;
        return Ok(Some(time::unit_to_ybp(v, AgeUnit::Ma)));
    }
    Ok(None)
}

fn parse_bbox(s: &str) -> Result<BBox, Error> {
    let parts: Vec<&str> = s.split(',').collect();
    let [w, south, e, n]: [&str; 4] = parts
        .try_into()
        .map_err(|_| Error::caller_input(format!("bbox '{s}' is not W,S,E,N")))?;
    let parse = |v: &str| -> Result<f64, Error> {
        v.parse()
            .map_err(|_| Error::caller_input(format!("bbox coordinate '{v}' is not a number")))
    };
    Ok(BBox {
        w: parse(w)?,
        s: parse(south)?,
        e: parse(e)?,
        n: parse(n)?,
    })
}

/// Parses a comma-separated identifier list arriving via `key`, dropping
/// (with a warning) any identifier whose explicit `type` tag doesn't match
/// `expected` — e.g. a `txn:...` id handed to `occ_id` (§4.2).
/// An identifier with no type tag (`Unk`) is permissive and always kept.
fn parse_id_list(
    params: &BTreeMap<String, String>,
    key: &str,
    expected: IdType,
    enabled: &[Domain],
    warnings: &mut Vec<String>,
) -> Vec<ResolvedId> {
    let Some(raw) = params.get(key) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for tok in raw.split(',').filter(|t| !t.is_empty()) {
        match ExternalId::parse(tok) {
            Ok(id) => {
                if id.kind != IdType::Unk && id.kind != expected {
                    warnings.push(format!(
                        "{key} '{tok}': wrong identifier type '{}', expected '{}'",
                        id.kind.tag(),
                        expected.tag()
                    ));
                    continue;
                }
                match id.resolve_domain(enabled) {
                    Ok(domain) => out.push(ResolvedId {
                        domain,
                        kind: id.kind,
                        number: id.number,
                    }),
                    Err(e) => warnings.push(format!("{key} '{tok}': {e}")),
                }
            }
            Err(e) => warnings.push(format!("{key} '{tok}': {e}")),
        }
    }
    out
}

fn parse_order(s: &str) -> Vec<OrderKey> {
    let mut out = Vec::new();
    for tok in s.split(',').filter(|t| !t.is_empty()) {
        let mut it = tok.splitn(2, '.');
        let field = it.next().unwrap_or("");
        let dir = it.next().unwrap_or("asc");
        let field = match field.to_ascii_lowercase().as_str() {
            "ageolder" => AgeField::Older,
            "ageyounger" => AgeField::Younger,
            _ => continue,
        };
        let desc = dir.eq_ignore_ascii_case("desc");
        out.push(OrderKey { field, desc });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn rejects_requests_with_no_selector() {
        let p = params(&[("vocab", "pbdb")]);
        assert!(RequestContext::parse(&p).is_err());
    }

    #[test]
    fn min_ma_is_converted_to_ybp() {
        let (ctx, _) = RequestContext::parse(&params(&[("min_ma", "1"), ("max_ma", "2")])).unwrap();
        assert_eq!(ctx.min_ybp, Some(1_000_000.0));
        assert_eq!(ctx.max_ybp, Some(2_000_000.0));
    }

    #[test]
    fn rejects_both_min_age_and_min_ma() {
        let p = params(&[("min_age", "1"), ("min_ma", "1")]);
        assert!(RequestContext::parse(&p).is_err());
    }

    #[test]
    fn timebuffer_forces_buffer_rule() {
        let (ctx, _) = RequestContext::parse(&params(&[
            ("min_ma", "1"),
            ("max_ma", "2"),
            ("timebuffer", "10%"),
        ]))
        .unwrap();
        assert_eq!(ctx.time_rule, TimeRule::Buffer);
        assert_eq!(ctx.oldbuffer_ybp, Some(100_000.0));
    }

    #[test]
    fn timebuffer_conflicting_with_explicit_timerule_is_rejected() {
        let p = params(&[
            ("min_ma", "1"),
            ("max_ma", "2"),
            ("timerule", "contain"),
            ("timebuffer", "10%"),
        ]);
        assert!(RequestContext::parse(&p).is_err());
    }

    #[test]
    fn ds_selects_a_single_upstream() {
        let (ctx, _) = RequestContext::parse(&params(&[("base_name", "Canis"), ("ds", "n")])).unwrap();
        assert_eq!(ctx.enabled, vec![Domain::Quaternary]);
    }

    #[test]
    fn default_enables_both_upstreams() {
        let (ctx, _) = RequestContext::parse(&params(&[("base_name", "Canis")])).unwrap();
        assert_eq!(ctx.enabled, Domain::all().to_vec());
    }

    #[test]
    fn unresolvable_identifier_becomes_a_warning_not_an_error() {
        let (ctx, warnings) = RequestContext::parse(&params(&[
            ("occ_id", "99"),
            ("ds", "n,p"),
        ]))
        .unwrap();
        assert!(ctx.occ_ids.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn wrong_identifier_type_for_the_parameter_becomes_a_warning_not_an_error() {
        let (ctx, warnings) = RequestContext::parse(&params(&[
            ("occ_id", "pbdb:txn:41055"),
            ("ds", "p"),
        ]))
        .unwrap();
        assert!(ctx.occ_ids.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("wrong identifier type"));
    }

    #[test]
    fn untyped_identifier_is_accepted_for_any_parameter() {
        let (ctx, warnings) = RequestContext::parse(&params(&[
            ("occ_id", "pbdb:99"),
            ("ds", "p"),
        ]))
        .unwrap();
        assert_eq!(ctx.occ_ids.len(), 1);
        assert!(warnings.is_empty());
    }

    #[test]
    fn order_parses_recognized_age_keys_only() {
        let order = parse_order("ageolder.desc,unknown,ageyounger");
        assert_eq!(
            order,
            vec![
                OrderKey { field: AgeField::Older, desc: true },
                OrderKey { field: AgeField::Younger, desc: false },
            ]
        );
    }

    #[test]
    fn unconsumed_params_become_passthrough() {
        let (ctx, _) = RequestContext::parse(&params(&[
            ("base_name", "Canis"),
            ("limit", "50"),
            ("offset", "10"),
        ]))
        .unwrap();
        assert_eq!(ctx.passthrough.get("limit").map(String::as_str), Some("50"));
        assert_eq!(ctx.passthrough.get("offset").map(String::as_str), Some("10"));
    }
}
