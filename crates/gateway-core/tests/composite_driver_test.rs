//! End-to-end scenarios against both upstreams, run over real local HTTP
//! servers (wiremock) instead of unit-level adapter calls.

use std::collections::BTreeMap;
use std::time::Duration;

use gateway_core::{CompositeDriver, DriverOptions, PaleoAdapter, QuaternaryAdapter, QueryKind, RequestContext};
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn driver_for(
    pairs: &[(&str, &str)],
    paleo_base: &str,
    quaternary_base: &str,
    opts: DriverOptions,
) -> CompositeDriver {
    let (req, _warnings) = RequestContext::parse(&params(pairs)).unwrap();
    let paleo = PaleoAdapter::new(Url::parse(paleo_base).unwrap());
    let quaternary = QuaternaryAdapter::new(Url::parse(quaternary_base).unwrap());
    CompositeDriver::new(req, reqwest::Client::new(), paleo, quaternary, QueryKind::List, opts)
}

fn default_opts() -> DriverOptions {
    DriverOptions { timeout: Duration::from_secs(5), retries: 2 }
}

#[tokio::test]
async fn happy_fan_out_concatenates_both_upstreams() {
    let paleo_server = MockServer::start().await;
    let quaternary_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/occs/list.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{"occurrence_no": 1, "max_ma": 2.0, "min_ma": 1.0}],
            "status_code": 200,
            "warnings": [],
            "errors": []
        })))
        .mount(&paleo_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/occs/list.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"siteid": 7, "ageold": 2_000_000.0, "ageyoung": 1_000_000.0}],
            "success": true,
            "message": ""
        })))
        .mount(&quaternary_server)
        .await;

    let driver = driver_for(
        &[("base_name", "Canis"), ("vocab", "pbdb")],
        paleo_server.uri().as_str(),
        quaternary_server.uri().as_str(),
        default_opts(),
    )
    .run()
    .await;

    assert_eq!(driver.results().len(), 2);
    assert!(driver.warnings().is_empty());
}

#[tokio::test]
async fn one_upstream_down_still_returns_the_other() {
    let paleo_server = MockServer::start().await;
    let quaternary_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/occs/list.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&paleo_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/occs/list.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"siteid": 1, "ageold": 2_000_000.0, "ageyoung": 1_000_000.0}],
            "success": true,
            "message": ""
        })))
        .mount(&quaternary_server)
        .await;

    let driver = driver_for(
        &[("base_name", "Canis")],
        paleo_server.uri().as_str(),
        quaternary_server.uri().as_str(),
        default_opts(),
    )
    .run()
    .await;

    assert_eq!(driver.results().len(), 1);
    assert!(driver.warnings().iter().any(|w| w.starts_with("PaleoBioDB:0") && w.contains("500")));
}

#[tokio::test]
async fn deadline_trip_cancels_the_slow_upstream() {
    let paleo_server = MockServer::start().await;
    let quaternary_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/occs/list.json"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&paleo_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/occs/list.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"siteid": 1, "ageold": 2_000_000.0, "ageyoung": 1_000_000.0}],
            "success": true,
            "message": ""
        })))
        .mount(&quaternary_server)
        .await;

    let opts = DriverOptions { timeout: Duration::from_secs(1), retries: 0 };
    let driver = driver_for(
        &[("base_name", "Canis")],
        paleo_server.uri().as_str(),
        quaternary_server.uri().as_str(),
        opts,
    )
    .run()
    .await;

    assert_eq!(driver.results().len(), 1);
    assert!(driver.warnings().iter().any(|w| w.starts_with("TIMEOUT")));
}

#[tokio::test]
async fn identifier_cross_translation_resolves_a_paleo_taxon_to_a_quaternary_name() {
    let paleo_server = MockServer::start().await;
    let quaternary_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/taxa/single.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{"taxon_name": "Canis"}],
            "status_code": 200,
            "warnings": [],
            "errors": []
        })))
        .mount(&paleo_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/occs/list.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"siteid": 1, "ageold": 2_000_000.0, "ageyoung": 1_000_000.0}],
            "success": true,
            "message": ""
        })))
        .mount(&quaternary_server)
        .await;

    let driver = driver_for(
        &[("base_id", "pbdb:txn:41055"), ("ds", "n"), ("ageunit", "ma")],
        paleo_server.uri().as_str(),
        quaternary_server.uri().as_str(),
        default_opts(),
    )
    .run()
    .await;

    assert_eq!(driver.results().len(), 1);
    let record = driver.results()[0];
    assert_eq!(record.fields.get("AgeOlder").and_then(serde_json::Value::as_f64), Some(2.0));

    let secondary_urls = driver.urls(true);
    let primary_urls = driver.urls(false);
    assert_eq!(secondary_urls.len(), 2);
    assert_eq!(primary_urls.len(), 1);
    assert!(secondary_urls.iter().any(|u| u.contains("taxonname=Canis")));
}

#[tokio::test]
async fn major_overlap_rule_drops_the_weakly_overlapping_record() {
    let paleo_server = MockServer::start().await;
    let quaternary_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/occs/list.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"siteid": 1, "ageold": 2_100_000.0, "ageyoung": 1_400_000.0},
                {"siteid": 2, "ageold": 5_000_000.0, "ageyoung": 1_900_000.0}
            ],
            "success": true,
            "message": ""
        })))
        .mount(&quaternary_server)
        .await;

    let driver = driver_for(
        &[("min_ma", "1"), ("max_ma", "2"), ("ds", "n")],
        paleo_server.uri().as_str(),
        quaternary_server.uri().as_str(),
        default_opts(),
    )
    .run()
    .await;

    assert_eq!(driver.results().len(), 1);
    let diag = driver.diagnostics();
    assert_eq!(diag.len(), 1);
    assert_eq!(diag[0].removed, 1);
}

#[tokio::test]
async fn retryable_transport_failure_recovers_within_budget() {
    let paleo_server = MockServer::start().await;
    let quaternary_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/occs/list.json"))
        .respond_with(ResponseTemplate::new(596))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&paleo_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/occs/list.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [
                {"occurrence_no": 1},
                {"occurrence_no": 2},
                {"occurrence_no": 3}
            ],
            "status_code": 200,
            "warnings": [],
            "errors": []
        })))
        .with_priority(2)
        .mount(&paleo_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/occs/list.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [],
            "success": true,
            "message": ""
        })))
        .mount(&quaternary_server)
        .await;

    let opts = DriverOptions { timeout: Duration::from_secs(10), retries: 3 };
    let driver = driver_for(
        &[("base_name", "Canis")],
        paleo_server.uri().as_str(),
        quaternary_server.uri().as_str(),
        opts,
    )
    .run()
    .await;

    let diag = driver.diagnostics();
    let paleo_diag = diag.iter().find(|d| d.label.starts_with("PaleoBioDB")).unwrap();
    assert_eq!(paleo_diag.record_count, 3);
    assert_eq!(paleo_diag.retry_count, 2);
    assert_eq!(paleo_diag.http_status, Some(200));
}
