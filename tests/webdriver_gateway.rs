mod support;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{Method, Uri};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};

use flight_harvest::config::RenderConfig;
use flight_harvest::{RenderError, RenderGateway, WebDriverGateway};
use support::{json_response, serve};

const LANDMARK: &str = "div[role='main']";
const PAGE: &str = "<html><body><div role=\"main\"></div></body></html>";
const URL: &str = "https://www.google.com/travel/flights?q=Flights%20from%20DEL%20to%20DXB";

/// Minimal chromedriver stand-in: one session `S1`, anchor window `A0`.
#[derive(Default)]
struct Driver {
    current: String,
    next_tab: usize,
    open_tabs: Vec<String>,
    closed: Vec<String>,
    reject_switch_once: Option<String>,
    navigation_error: Option<(u16, &'static str)>,
    landmark_present: bool,
    fail_close: bool,
    xpath_lookups: usize,
}

type Shared = Arc<Mutex<Driver>>;

fn ok(value: Value) -> Response {
    json_response(200, json!({ "value": value }))
}

fn fail(status: u16, error: &str, message: &str) -> Response {
    json_response(status, json!({ "value": { "error": error, "message": message } }))
}

async fn driver(State(state): State<Shared>, method: Method, uri: Uri, body: String) -> Response {
    let mut driver = state.lock().unwrap();
    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

    match (method.as_str(), uri.path()) {
        ("POST", "/session") => ok(json!({ "sessionId": "S1", "capabilities": {} })),
        ("DELETE", "/session/S1") => ok(Value::Null),
        ("POST", "/session/S1/timeouts") => ok(Value::Null),
        ("GET", "/session/S1/window") => ok(json!(driver.current)),
        ("POST", "/session/S1/window/new") => {
            driver.next_tab += 1;
            let handle = format!("T{}", driver.next_tab);
            driver.open_tabs.push(handle.clone());
            ok(json!({ "handle": handle, "type": "tab" }))
        }
        ("POST", "/session/S1/window") => {
            let handle = body["handle"].as_str().unwrap_or_default().to_string();
            if driver.reject_switch_once.as_deref() == Some(handle.as_str()) {
                driver.reject_switch_once = None;
                return fail(404, "no such window", "web view not found");
            }
            driver.current = handle;
            ok(Value::Null)
        }
        ("DELETE", "/session/S1/window") => {
            if driver.fail_close {
                return fail(500, "unknown error", "cannot close window");
            }
            let current = driver.current.clone();
            driver.open_tabs.retain(|tab| *tab != current);
            driver.closed.push(current);
            ok(json!(driver.open_tabs))
        }
        ("POST", "/session/S1/url") => match driver.navigation_error {
            Some((status, error)) => fail(status, error, "net::ERR_NAME_NOT_RESOLVED"),
            None => ok(Value::Null),
        },
        ("POST", "/session/S1/element") if body["using"] == "xpath" => {
            driver.xpath_lookups += 1;
            fail(404, "no such element", "Unable to locate element")
        }
        ("POST", "/session/S1/element") if driver.landmark_present => {
            ok(json!({ "element-6066-11e4-a52e-4f735466cecf": "E1" }))
        }
        ("POST", "/session/S1/element") => fail(404, "no such element", "Unable to locate element"),
        ("GET", "/session/S1/source") => ok(json!(PAGE)),
        (_, path) => fail(404, "unknown command", path),
    }
}

async fn start(script: Driver) -> (WebDriverGateway, Shared) {
    start_with(script, |_| {}).await
}

async fn start_with(
    script: Driver,
    tweak: impl FnOnce(&mut RenderConfig),
) -> (WebDriverGateway, Shared) {
    let state = Arc::new(Mutex::new(Driver {
        current: "A0".to_string(),
        ..script
    }));
    let base = serve(Router::new().fallback(driver).with_state(state.clone())).await;
    let mut settings = RenderConfig {
        webdriver_url: base,
        navigation_timeout_secs: 5,
        landmark_timeout_secs: 0,
        content_settle_delay_secs: 0,
        landmark_poll_millis: 10,
        ..RenderConfig::default()
    };
    tweak(&mut settings);
    let gateway = WebDriverGateway::connect(&settings, LANDMARK).await.unwrap();
    (gateway, state)
}

#[tokio::test]
async fn render_snapshots_source_and_release_closes_the_tab() {
    let (gateway, state) = start(Driver {
        landmark_present: true,
        ..Driver::default()
    })
    .await;

    let page = gateway.render(URL).await.unwrap();
    assert_eq!(page.html(), PAGE);
    assert_eq!(page.tab(), "T1");
    assert_eq!(state.lock().unwrap().current, "T1");

    gateway.release(page).await;
    let driver = state.lock().unwrap();
    assert_eq!(driver.closed, vec!["T1"]);
    assert!(driver.open_tabs.is_empty());
    assert_eq!(driver.current, "A0");
}

#[tokio::test]
async fn navigation_failure_is_reported_and_the_tab_closed() {
    let (gateway, state) = start(Driver {
        navigation_error: Some((500, "unknown error")),
        landmark_present: true,
        ..Driver::default()
    })
    .await;

    let err = gateway.render(URL).await.unwrap_err();
    match &err {
        RenderError::Navigation { url, reason } => {
            assert_eq!(url, URL);
            assert!(reason.contains("ERR_NAME_NOT_RESOLVED"));
        }
        other => panic!("expected a navigation error, got {:?}", other),
    }
    assert!(!err.is_fatal());

    let driver = state.lock().unwrap();
    assert_eq!(driver.closed, vec!["T1"]);
    assert_eq!(driver.current, "A0");
}

#[tokio::test]
async fn missing_landmark_times_out_and_closes_the_tab() {
    let (gateway, state) = start(Driver::default()).await;

    let err = gateway.render(URL).await.unwrap_err();
    match &err {
        RenderError::ContentTimeout { url, selector, .. } => {
            assert_eq!(url, URL);
            assert_eq!(selector, LANDMARK);
        }
        other => panic!("expected a content timeout, got {:?}", other),
    }

    let driver = state.lock().unwrap();
    assert_eq!(driver.closed, vec!["T1"]);
    assert!(driver.open_tabs.is_empty());
}

#[tokio::test]
async fn invalid_session_is_fatal() {
    let (gateway, _state) = start(Driver {
        navigation_error: Some((404, "invalid session id")),
        ..Driver::default()
    })
    .await;

    let err = gateway.render(URL).await.unwrap_err();
    assert!(matches!(err, RenderError::SessionLost(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn tab_is_closed_when_switching_to_it_fails() {
    let (gateway, state) = start(Driver {
        reject_switch_once: Some("T1".to_string()),
        landmark_present: true,
        ..Driver::default()
    })
    .await;

    let err = gateway.render(URL).await.unwrap_err();
    assert!(matches!(err, RenderError::Driver(_)));

    let driver = state.lock().unwrap();
    assert_eq!(driver.closed, vec!["T1"]);
    assert!(driver.open_tabs.is_empty());
    assert_eq!(driver.current, "A0");
}

#[tokio::test]
async fn failed_close_still_returns_to_the_anchor_window() {
    let (gateway, state) = start(Driver {
        landmark_present: true,
        fail_close: true,
        ..Driver::default()
    })
    .await;

    let page = gateway.render(URL).await.unwrap();
    gateway.release(page).await;
    assert_eq!(state.lock().unwrap().current, "A0");

    // The session stays usable for the next unit.
    state.lock().unwrap().fail_close = false;
    let page = gateway.render(URL).await.unwrap();
    assert_eq!(page.tab(), "T2");
    gateway.release(page).await;
    assert_eq!(state.lock().unwrap().closed, vec!["T2"]);

    gateway.shutdown().await;
}

#[tokio::test]
async fn page_settles_again_when_no_trip_toggle_is_found() {
    let (gateway, state) = start_with(
        Driver {
            landmark_present: true,
            ..Driver::default()
        },
        |settings| {
            settings.prefer_one_way = true;
            settings.content_settle_delay_secs = 1;
        },
    )
    .await;

    let started = Instant::now();
    let page = gateway.render(URL).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(state.lock().unwrap().xpath_lookups, 1);
    gateway.release(page).await;
}
