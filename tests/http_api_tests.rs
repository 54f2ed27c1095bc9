//! HTTP surface tests driven through the router with `oneshot`.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use opentelemetry::KeyValue;
use promsearch::api::{build_http_router, ApiConfig, ApiState};
use promsearch::backend::MemoryBackend;
use promsearch::clock::ManualClock;
use promsearch::codec;
use promsearch::config::{AdapterConfig, ComponentFactory};
use promsearch::metrics::{InMemoryMetrics, MetricsSink, OtelMetrics};
use promsearch::model::WriteBatch;
use promsearch::prompb::{
    label_matcher, Label, LabelMatcher, Query, ReadRequest, Sample, TimeSeries, WriteRequest,
};
use promsearch::telemetry::MetricsExporter;
use promsearch::writer::WriteDispatcher;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    backend: Arc<MemoryBackend>,
    metrics: Arc<InMemoryMetrics>,
    dispatcher: WriteDispatcher,
}

fn setup_test_app_with(api: ApiConfig) -> TestApp {
    let config = AdapterConfig::default();
    let backend = Arc::new(MemoryBackend::new());
    let metrics = Arc::new(InMemoryMetrics::new());
    let sink: Arc<dyn MetricsSink> = metrics.clone();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ));

    let dispatcher =
        ComponentFactory::create_write_dispatcher(&config, backend.clone(), sink.clone(), clock);
    let reader = Arc::new(ComponentFactory::create_read_service(
        &config,
        backend.clone(),
        sink,
    ));
    let router = build_http_router(
        ApiState {
            dispatcher: dispatcher.clone(),
            reader,
            registry: prometheus::Registry::new(),
        },
        &api,
    );

    TestApp {
        router,
        backend,
        metrics,
        dispatcher,
    }
}

fn setup_test_app() -> TestApp {
    setup_test_app_with(ApiConfig::default())
}

fn write_body(values: &[(i64, f64)]) -> Vec<u8> {
    let batch = WriteBatch::new(WriteRequest {
        timeseries: vec![TimeSeries {
            labels: vec![Label::new("__name__", "up"), Label::new("job", "api")],
            samples: values
                .iter()
                .map(|(timestamp, value)| Sample {
                    value: *value,
                    timestamp: *timestamp,
                })
                .collect(),
        }],
    });
    codec::encode_write(&batch).unwrap().to_vec()
}

fn read_body(matchers: Vec<LabelMatcher>, start: i64, end: i64) -> Vec<u8> {
    codec::encode_read_request(&ReadRequest {
        queries: vec![Query {
            start_timestamp_ms: start,
            end_timestamp_ms: end,
            matchers,
            hints: None,
        }],
    })
    .unwrap()
    .to_vec()
}

fn post(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, codec::PROTOBUF_CONTENT_TYPE)
        .header(header::CONTENT_ENCODING, codec::SNAPPY_ENCODING)
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn test_write_is_acknowledged_with_no_content() {
    let app = setup_test_app();

    let response = app
        .router
        .clone()
        .oneshot(post("/write", write_body(&[(1200, 1.0), (1500, 2.0)])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(body_bytes(response).await.is_empty());

    app.dispatcher.shutdown().await;
    assert_eq!(app.backend.documents("prometheus-2024-01-01").len(), 2);
    assert_eq!(app.metrics.received(), 2);
}

#[tokio::test]
async fn test_corrupt_write_is_bad_request() {
    let app = setup_test_app();

    let response = app
        .router
        .clone()
        .oneshot(post("/write", b"definitely not snappy".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.metrics.received(), 0);
}

#[tokio::test]
async fn test_write_backend_failure_is_not_visible_to_caller() {
    let app = setup_test_app();
    app.backend.set_unavailable(true);

    let response = app
        .router
        .clone()
        .oneshot(post("/api/v1/write", write_body(&[(1200, 1.0)])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    app.dispatcher.shutdown().await;
    assert_eq!(app.metrics.failed("memory"), 1);
}

#[tokio::test]
async fn test_write_then_read_round_trip() {
    let app = setup_test_app();

    let response = app
        .router
        .clone()
        .oneshot(post(
            "/write",
            write_body(&[(1200, 1.0), (1500, 2.0), (1800, f64::NAN)]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    app.dispatcher.shutdown().await;

    let response = app
        .router
        .clone()
        .oneshot(post(
            "/read",
            read_body(vec![LabelMatcher::equal("job", "api")], 1000, 2000),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        codec::PROTOBUF_CONTENT_TYPE
    );
    assert_eq!(
        response.headers()[header::CONTENT_ENCODING],
        codec::SNAPPY_ENCODING
    );

    let decoded = codec::decode_read_response(&body_bytes(response).await).unwrap();
    assert_eq!(decoded.results.len(), 1);
    let series = &decoded.results[0].timeseries;
    assert_eq!(series.len(), 1);
    assert_eq!(
        series[0].labels,
        vec![Label::new("__name__", "up"), Label::new("job", "api")]
    );
    let samples: Vec<(i64, f64)> = series[0]
        .samples
        .iter()
        .map(|s| (s.timestamp, s.value))
        .collect();
    assert_eq!(samples, vec![(1200, 1.0), (1500, 2.0)]);
    assert_eq!(app.metrics.ignored(), 1);
}

#[tokio::test]
async fn test_read_without_matches_is_empty_result() {
    let app = setup_test_app();

    let response = app
        .router
        .clone()
        .oneshot(post(
            "/api/v1/read",
            read_body(vec![LabelMatcher::equal("job", "missing")], 0, 10_000),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let decoded = codec::decode_read_response(&body_bytes(response).await).unwrap();
    assert_eq!(decoded.results.len(), 1);
    assert!(decoded.results[0].timeseries.is_empty());
}

#[tokio::test]
async fn test_read_with_regex_matcher_is_bad_request() {
    let app = setup_test_app();
    let matcher = LabelMatcher {
        r#type: label_matcher::Type::Re as i32,
        name: "job".to_string(),
        value: "a.*".to_string(),
    };

    let response = app
        .router
        .clone()
        .oneshot(post("/read", read_body(vec![matcher], 0, 10)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_read_with_two_queries_is_bad_request() {
    let app = setup_test_app();
    let query = Query {
        start_timestamp_ms: 0,
        end_timestamp_ms: 10,
        matchers: vec![LabelMatcher::equal("job", "api")],
        hints: None,
    };
    let body = codec::encode_read_request(&ReadRequest {
        queries: vec![query.clone(), query],
    })
    .unwrap()
    .to_vec();

    let response = app.router.clone().oneshot(post("/read", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_read_backend_failure_is_server_error() {
    let app = setup_test_app();
    app.backend.set_unavailable(true);

    let response = app
        .router
        .clone()
        .oneshot(post(
            "/read",
            read_body(vec![LabelMatcher::equal("job", "api")], 0, 10),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.metrics.read_failures(), 1);
}

#[tokio::test]
async fn test_body_limit_is_enforced() {
    let app = setup_test_app_with(ApiConfig {
        max_body_bytes: 16,
        ..ApiConfig::default()
    });

    let response = app
        .router
        .clone()
        .oneshot(post("/write", vec![0u8; 1024]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_health_and_readiness() {
    let app = setup_test_app();

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    app.dispatcher.shutdown().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_closed_intake_reports_not_ready_and_rejects_writes() {
    let app = setup_test_app();
    app.dispatcher.close();

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = app
        .router
        .clone()
        .oneshot(post("/write", write_body(&[(1200, 1.0)])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.metrics.received(), 0);

    app.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_metrics_endpoint_renders_registry() {
    let exporter = MetricsExporter::new(vec![KeyValue::new("service.name", "promsearch-test")])
        .unwrap();
    let otel: Arc<dyn MetricsSink> = Arc::new(OtelMetrics::new(&exporter.meter()));

    let config = AdapterConfig::default();
    let backend = Arc::new(MemoryBackend::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ));
    let dispatcher =
        ComponentFactory::create_write_dispatcher(&config, backend.clone(), otel.clone(), clock);
    let reader = Arc::new(ComponentFactory::create_read_service(&config, backend, otel));
    let router = build_http_router(
        ApiState {
            dispatcher: dispatcher.clone(),
            reader,
            registry: exporter.registry().clone(),
        },
        &ApiConfig {
            telemetry_path: "/telemetry".to_string(),
            ..ApiConfig::default()
        },
    );

    let response = router
        .clone()
        .oneshot(post("/write", write_body(&[(1200, 1.0), (1500, f64::INFINITY)])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    dispatcher.shutdown().await;

    let response = router
        .oneshot(Request::get("/telemetry").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("received_samples"));
    assert!(text.contains("es_sent_samples"));
    assert!(text.contains("prometheus_elasticsearch_ignored_samples"));
}
