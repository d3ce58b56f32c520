use std::collections::HashSet;

use httptest::matchers::{all_of, request};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use secrecy::SecretString;
use serde_json::{json, Value};
use tempfile::tempdir;

use where_to_go::{
    AppConfig, DiscoveryEngine, EnginePhase, GeoService, TelemetryClient, VenueService,
};

fn test_config(server: &Server) -> AppConfig {
    AppConfig {
        foursquare_client_id: Some(SecretString::from("test-client".to_string())),
        foursquare_client_secret: Some(SecretString::from("test-secret".to_string())),
        foursquare_api_base: server.url("/v2").to_string(),
        foursquare_api_version: "20180323".into(),
        explore_limit: 50,
        explore_radius_m: 1500,
        explore_section: "food".into(),
        explore_open_now: true,
        reroll_budget: 4,
        geoip_endpoint: server.url("/geo").to_string(),
        fixed_latitude: None,
        fixed_longitude: None,
        telemetry_enabled_by_default: true,
        telemetry_batch_size: 25,
        telemetry_buffer_max_bytes: 1024 * 1024,
        telemetry_buffer_max_files: 3,
        data_dir: None,
    }
}

fn build_engine(config: &AppConfig) -> (DiscoveryEngine, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let telemetry = TelemetryClient::new(dir.path(), config).unwrap();
    let engine = DiscoveryEngine::new(
        GeoService::new(config),
        VenueService::new(config),
        telemetry,
        config,
    );
    (engine, dir)
}

fn expect_geoip(server: &Server) {
    server.expect(
        Expectation::matching(request::method_path("GET", "/geo")).respond_with(json_encoded(
            json!({ "status": "success", "lat": 44.97, "lon": -93.26 }),
        )),
    );
}

fn venue_json(id: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Spot {id}"),
        "categories": [{
            "id": format!("cat-{id}"),
            "name": "Diner",
            "pluralName": "Diners",
            "shortName": "Diner",
            "primary": true
        }],
        "location": {
            "address": format!("{id} Hennepin Ave"),
            "formattedAddress": [format!("{id} Hennepin Ave"), "Minneapolis, MN"]
        }
    })
}

fn explore_body(ids: &[&str]) -> Value {
    let items: Vec<Value> = ids.iter().map(|id| json!({ "venue": venue_json(id) })).collect();
    json!({ "response": { "groups": [{ "items": items }] } })
}

fn detail_body(id: &str) -> Value {
    let mut venue = venue_json(id);
    venue["bestPhoto"] = json!({ "prefix": "https://img.example/", "suffix": "/best.jpg" });
    venue["rating"] = json!(9.1);
    venue["ratingSignals"] = json!(321);
    venue["canonicalUrl"] = json!(format!("https://foursquare.com/v/{id}"));
    json!({ "response": { "venue": venue } })
}

#[tokio::test]
async fn single_candidate_roll_settles_with_enriched_detail() {
    let server = Server::run();
    expect_geoip(&server);
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path("/v2/venues/explore"),
        ])
        .respond_with(json_encoded(explore_body(&["v1"]))),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/v2/venues/v1"))
            .respond_with(json_encoded(detail_body("v1"))),
    );

    let config = test_config(&server);
    let (engine, _dir) = build_engine(&config);
    engine.request_discovery().await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.phase, EnginePhase::Settled);
    // One candidate means no reroll affordance at all.
    assert_eq!(snapshot.remaining_rerolls, 0);
    assert!(!snapshot.can_reroll());
    let current = snapshot.current.unwrap();
    assert_eq!(current.id, "v1");
    assert_eq!(current.name, "Spot v1");
    assert!(!current.degraded);
    assert_eq!(current.rating, Some(9.1));
    assert_eq!(
        current.photo_url.as_deref(),
        Some("https://img.example/1024x1024/best.jpg")
    );
}

#[tokio::test]
async fn rerolls_walk_the_pool_without_repeats_until_exhausted() {
    let server = Server::run();
    expect_geoip(&server);
    let ids = ["v1", "v2", "v3"];
    server.expect(
        Expectation::matching(request::method_path("GET", "/v2/venues/explore"))
            .respond_with(json_encoded(explore_body(&ids))),
    );
    for id in ids {
        server.expect(
            Expectation::matching(request::method_path("GET", format!("/v2/venues/{id}")))
                .respond_with(json_encoded(detail_body(id))),
        );
    }

    let config = test_config(&server);
    let (engine, _dir) = build_engine(&config);
    engine.request_discovery().await.unwrap();

    // Budget is 4 but only two unseen candidates remain after the first pick.
    assert_eq!(engine.snapshot().remaining_rerolls, 2);

    let mut seen = HashSet::new();
    seen.insert(engine.snapshot().current.unwrap().id);
    while engine.snapshot().can_reroll() {
        engine.request_reroll().await.unwrap();
        seen.insert(engine.snapshot().current.unwrap().id);
    }

    let snapshot = engine.snapshot();
    assert_eq!(seen.len(), ids.len());
    assert_eq!(snapshot.history.len(), ids.len());
    assert_eq!(snapshot.remaining_rerolls, 0);

    // Exhausted pools make further rerolls no-ops.
    engine.request_reroll().await.unwrap();
    assert_eq!(engine.snapshot().history.len(), ids.len());
}

#[tokio::test]
async fn detail_outage_degrades_to_base_display() {
    let server = Server::run();
    expect_geoip(&server);
    let ids = ["v1", "v2"];
    server.expect(
        Expectation::matching(request::method_path("GET", "/v2/venues/explore"))
            .respond_with(json_encoded(explore_body(&ids))),
    );
    for id in ids {
        server.expect(
            Expectation::matching(request::method_path("GET", format!("/v2/venues/{id}")))
                .respond_with(status_code(500)),
        );
    }

    let config = test_config(&server);
    let (engine, _dir) = build_engine(&config);
    engine.request_discovery().await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.phase, EnginePhase::Settled);
    let current = snapshot.current.unwrap();
    assert!(current.degraded);
    assert_eq!(current.name, format!("Spot {}", current.id));
    assert_eq!(current.category.as_deref(), Some("Diner"));
    assert!(current.rating.is_none());
    assert!(current.photo_url.is_none());
    assert!(current.canonical_url.is_none());

    // The degraded pick is burned; the reroll settles on the other venue.
    let first_id = current.id;
    engine.request_reroll().await.unwrap();
    let next = engine.snapshot().current.unwrap();
    assert_ne!(next.id, first_id);
    assert_eq!(engine.snapshot().history.len(), 2);
}

#[tokio::test]
async fn empty_explore_result_is_a_blocking_no_candidates_error() {
    let server = Server::run();
    expect_geoip(&server);
    server.expect(
        Expectation::matching(request::method_path("GET", "/v2/venues/explore"))
            .respond_with(json_encoded(json!({ "response": { "groups": [] } }))),
    );

    let config = test_config(&server);
    let (engine, _dir) = build_engine(&config);
    engine.request_discovery().await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.phase, EnginePhase::NoCandidatesError);
    assert!(snapshot.current.is_none());
    assert!(snapshot.history.is_empty());
    assert!(snapshot.last_error.is_some());

    // No detail call may ever have been issued; reroll stays a no-op.
    engine.request_reroll().await.unwrap();
    assert_eq!(engine.snapshot().phase, EnginePhase::NoCandidatesError);
}

#[tokio::test]
async fn failed_geoip_lookup_blocks_the_session_with_location_error() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/geo")).respond_with(json_encoded(
            json!({ "status": "fail", "message": "reserved range" }),
        )),
    );

    let config = test_config(&server);
    let (engine, _dir) = build_engine(&config);
    engine.request_discovery().await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.phase, EnginePhase::LocationError);
    assert!(snapshot.current.is_none());
    assert!(snapshot.last_error.unwrap().contains("reserved range"));
}
