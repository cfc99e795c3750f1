//! The internal record shape (§3) and the post-merge shaping/filtering
//! steps of §4.7.

use gateway_ident::{Domain, IdType};
use serde_json::{Map, Value};

use crate::request::Vocab;
use crate::time::{ybp_to_unit, AgeUnit};

/// A heterogeneous key/value bag populated from one upstream's schema, then
/// augmented with the unified fields §3 names. `age_older_ybp` /
/// `age_younger_ybp` are kept out of the serialized bag proper because
/// they exist purely for filtering and ordering, never for display —
/// `AgeOlder`/`AgeYounger` in the requested unit are what clients see.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub fields: Map<String, Value>,
    pub age_older_ybp: Option<f64>,
    pub age_younger_ybp: Option<f64>,
}

impl Record {
    pub fn new(fields: Map<String, Value>) -> Record {
        Record {
            fields,
            age_older_ybp: None,
            age_younger_ybp: None,
        }
    }

    pub fn set_database_and_type(&mut self, database: &'static str, vocab: Vocab) {
        self.fields
            .insert("database".to_string(), Value::String(database.to_string()));
        self.fields.insert(
            "record_type".to_string(),
            Value::String(record_type_for(vocab).to_string()),
        );
    }

    /// Stores the canonical ybp ages for filtering/ordering, and the
    /// requested-unit `AgeOlder`/`AgeYounger` fields for display.
    pub fn set_age(&mut self, older_ybp: Option<f64>, younger_ybp: Option<f64>, unit: AgeUnit) {
        self.age_older_ybp = older_ybp;
        self.age_younger_ybp = younger_ybp;
        if let Some(v) = older_ybp {
            self.fields
                .insert("AgeOlder".to_string(), json_number(ybp_to_unit(v, unit)));
        }
        if let Some(v) = younger_ybp {
            self.fields
                .insert("AgeYounger".to_string(), json_number(ybp_to_unit(v, unit)));
        }
    }

    /// Derives `lng`/`lat` as the midpoint of a bounding rectangle's
    /// corners, when the upstream exposes one.
    pub fn set_midpoint(&mut self, lng1: Option<f64>, lng2: Option<f64>, lat1: Option<f64>, lat2: Option<f64>) {
        if let (Some(a), Some(b)) = (lng1, lng2) {
            self.fields.insert("lng".to_string(), json_number((a + b) / 2.0));
        }
        if let (Some(a), Some(b)) = (lat1, lat2) {
            self.fields.insert("lat".to_string(), json_number((a + b) / 2.0));
        }
    }

    pub fn set_external_id(&mut self, field: &str, domain: Domain, kind: IdType, number: u64) {
        self.fields.insert(
            field.to_string(),
            Value::String(gateway_ident::format(domain, kind, number)),
        );
    }

    pub fn database(&self) -> Option<&str> {
        self.fields.get("database").and_then(Value::as_str)
    }

    pub fn record_type(&self) -> Option<&str> {
        self.fields.get("record_type").and_then(Value::as_str)
    }
}

fn json_number(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn record_type_for(vocab: Vocab) -> &'static str {
    match vocab {
        Vocab::Pbdb => "occ",
        Vocab::Dwc => "Occurrence",
        Vocab::Neotoma | Vocab::Com => "occurrence",
    }
}

/// §4.7 / §8: a record with non-zero span passes `major` iff its overlap
/// with `[min_ybp, max_ybp]` is at least half of its own span. A zero-span
/// record passes iff it falls inside the closed window.
pub fn major_overlap_passes(record: &Record, min_ybp: f64, max_ybp: f64) -> bool {
    let (Some(older), Some(younger)) = (record.age_older_ybp, record.age_younger_ybp) else {
        return false;
    };
    let span = older - younger;
    if span <= 0.0 {
        return younger >= min_ybp && younger <= max_ybp;
    }
    let overlap = (older.min(max_ybp) - younger.max(min_ybp)).max(0.0);
    overlap / span >= 0.5
}

/// §4.7: a record passes `buffer` iff its older edge doesn't exceed the
/// buffered ceiling and its younger edge doesn't fall below the buffered
/// (non-negative) floor.
pub fn buffer_passes(
    record: &Record,
    min_ybp: f64,
    max_ybp: f64,
    oldbuffer_ybp: f64,
    youngbuffer_ybp: f64,
) -> bool {
    let (Some(older), Some(younger)) = (record.age_older_ybp, record.age_younger_ybp) else {
        return false;
    };
    older <= max_ybp + oldbuffer_ybp && younger >= (min_ybp - youngbuffer_ybp).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(older: f64, younger: f64) -> Record {
        let mut r = Record::default();
        r.age_older_ybp = Some(older);
        r.age_younger_ybp = Some(younger);
        r
    }

    #[test]
    fn major_rule_scenario_from_spec() {
        // §8 scenario 5: window [1e6, 2e6].
        assert!(major_overlap_passes(&rec(2.1e6, 1.4e6), 1e6, 2e6));
        assert!(!major_overlap_passes(&rec(5.0e6, 1.9e6), 1e6, 2e6));
    }

    #[test]
    fn zero_span_passes_iff_inside_closed_window() {
        assert!(major_overlap_passes(&rec(1.5e6, 1.5e6), 1e6, 2e6));
        assert!(!major_overlap_passes(&rec(2.5e6, 2.5e6), 1e6, 2e6));
        assert!(major_overlap_passes(&rec(2e6, 2e6), 1e6, 2e6));
    }

    #[test]
    fn buffer_zero_accepts_only_exact_window() {
        assert!(buffer_passes(&rec(2e6, 1e6), 1e6, 2e6, 0.0, 0.0));
        assert!(!buffer_passes(&rec(2.1e6, 1e6), 1e6, 2e6, 0.0, 0.0));
        assert!(!buffer_passes(&rec(2e6, 0.9e6), 1e6, 2e6, 0.0, 0.0));
    }

    #[test]
    fn buffer_floor_never_goes_negative() {
        assert!(buffer_passes(&rec(1e6, 0.0), 0.5e6, 2e6, 0.0, 10e6));
    }

    #[test]
    fn age_conversion_round_trips_display_unit() {
        let mut r = Record::default();
        r.set_age(Some(2_000_000.0), Some(1_000_000.0), AgeUnit::Ma);
        assert_eq!(r.fields.get("AgeOlder").and_then(Value::as_f64), Some(2.0));
        assert_eq!(r.fields.get("AgeYounger").and_then(Value::as_f64), Some(1.0));
    }

    #[test]
    fn midpoint_is_averaged_from_corners() {
        let mut r = Record::default();
        r.set_midpoint(Some(10.0), Some(20.0), Some(-5.0), Some(5.0));
        assert_eq!(r.fields.get("lng").and_then(Value::as_f64), Some(15.0));
        assert_eq!(r.fields.get("lat").and_then(Value::as_f64), Some(0.0));
    }
}
