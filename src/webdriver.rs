use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};

use crate::config::RenderConfig;
use crate::error::{RenderError, WebDriverError};
use crate::render_gateway::{RenderGateway, RenderedPage};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const TRIP_TYPE_TOGGLE_XPATH: &str = "//div[@role='tablist']\
    //div[contains(text(),'Round trip') or contains(text(),'One-way')]";
const ONE_WAY_OPTION_XPATH: &str = "//div[@role='menu']//div[contains(text(),'One-way')]";

pub struct WebDriverGateway {
    client: Client,
    endpoint: String,
    session_id: String,
    // Window opened with the session. Never closed, so there is always a
    // valid context to return to.
    anchor: String,
    landmark: String,
    settings: RenderConfig,
    // The driver has one "current window" per session.
    current: Mutex<()>,
}

impl WebDriverGateway {
    pub async fn connect(settings: &RenderConfig, landmark: &str) -> Result<Self, RenderError> {
        let client = Client::builder()
            .timeout(settings.navigation_timeout() + Duration::from_secs(60))
            .build()
            .map_err(|e| RenderError::SessionLost(format!("failed to build HTTP client: {}", e)))?;
        let endpoint = settings.webdriver_url.trim_end_matches('/').to_string();

        let session_url = format!("{}/session", endpoint);
        let created = send(&client, Method::POST, &session_url, Some(capabilities(settings)))
            .await
            .map_err(|e| RenderError::SessionLost(format!("could not start session: {}", e)))?;
        let session_id = created
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| RenderError::SessionLost(format!("no sessionId in {}", created)))?
            .to_string();

        let mut gateway = WebDriverGateway {
            client,
            endpoint,
            session_id,
            anchor: String::new(),
            landmark: landmark.to_string(),
            settings: settings.clone(),
            current: Mutex::new(()),
        };

        gateway
            .command(
                Method::POST,
                "/timeouts",
                Some(json!({
                    "pageLoad": settings.navigation_timeout().as_millis() as u64,
                    "implicit": 0,
                })),
            )
            .await
            .map_err(|e| gateway.driver_failure(e))?;

        let anchor = gateway
            .command(Method::GET, "/window", None)
            .await
            .map_err(|e| gateway.driver_failure(e))?;
        gateway.anchor = anchor.as_str().unwrap_or_default().to_string();

        info!(
            "Browser session {} started on {} ({})",
            gateway.session_id, gateway.endpoint, settings.browser
        );
        Ok(gateway)
    }

    pub async fn shutdown(self) {
        match send(&self.client, Method::DELETE, &self.session_url(""), None).await {
            Ok(_) => info!("Browser session {} closed", self.session_id),
            Err(e) => warn!("Failed to close browser session {}: {}", self.session_id, e),
        }
    }

    fn session_url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.endpoint, self.session_id, path)
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, WebDriverError> {
        send(&self.client, method, &self.session_url(path), body).await
    }

    fn driver_failure(&self, err: WebDriverError) -> RenderError {
        let gone = match &err {
            WebDriverError::Http(e) => e.is_connect(),
            other => other.is_invalid_session(),
        };
        if gone {
            RenderError::SessionLost(err.to_string())
        } else {
            RenderError::Driver(err)
        }
    }

    async fn open_tab(&self) -> Result<String, WebDriverError> {
        let created = self
            .command(Method::POST, "/window/new", Some(json!({ "type": "tab" })))
            .await?;
        let handle = created
            .get("handle")
            .and_then(Value::as_str)
            .ok_or_else(|| WebDriverError::Parse(format!("no handle in {}", created)))?
            .to_string();
        if let Err(e) = self.switch_to(&handle).await {
            if let Err(close) = self.close_tab(&handle).await {
                warn!("Failed to close tab {} after switch error: {}", handle, close);
            }
            return Err(e);
        }
        Ok(handle)
    }

    async fn switch_to(&self, handle: &str) -> Result<(), WebDriverError> {
        self.command(Method::POST, "/window", Some(json!({ "handle": handle })))
            .await
            .map(|_| ())
    }

    // Always ends back on the anchor window, even when the close failed.
    async fn close_tab(&self, handle: &str) -> Result<(), WebDriverError> {
        let closed = match self.switch_to(handle).await {
            Ok(()) => self.command(Method::DELETE, "/window", None).await.map(|_| ()),
            Err(e) => Err(e),
        };
        let restored = self.switch_to(&self.anchor).await;
        closed.and(restored)
    }

    async fn navigate(&self, url: &str) -> Result<(), RenderError> {
        let budget = self.settings.navigation_timeout() + Duration::from_secs(5);
        let navigation = self.command(Method::POST, "/url", Some(json!({ "url": url })));

        match timeout(budget, navigation).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(WebDriverError::Protocol { error, message, .. }))
                if error != "invalid session id" =>
            {
                Err(RenderError::Navigation {
                    url: url.to_string(),
                    reason: format!("{}: {}", error, message),
                })
            }
            Ok(Err(e)) => Err(self.driver_failure(e)),
            Err(_) => Err(RenderError::Navigation {
                url: url.to_string(),
                reason: format!("timed out after {:?}", budget),
            }),
        }
    }

    async fn find(&self, using: &str, value: &str) -> Result<Option<String>, WebDriverError> {
        let query = json!({ "using": using, "value": value });
        match self.command(Method::POST, "/element", Some(query)).await {
            Ok(found) => Ok(found.get(ELEMENT_KEY).and_then(Value::as_str).map(str::to_string)),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn wait_for_landmark(&self, url: &str) -> Result<(), RenderError> {
        let limit = self.settings.landmark_timeout();
        let deadline = Instant::now() + limit;

        loop {
            match self.find("css selector", &self.landmark).await {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => {}
                Err(e) => return Err(self.driver_failure(e)),
            }
            if Instant::now() >= deadline {
                return Err(RenderError::ContentTimeout {
                    url: url.to_string(),
                    selector: self.landmark.clone(),
                    timeout: limit,
                });
            }
            sleep(self.settings.landmark_poll_interval()).await;
        }
    }

    async fn element_text(&self, element: &str) -> Result<String, WebDriverError> {
        let text = self
            .command(Method::GET, &format!("/element/{}/text", element), None)
            .await?;
        Ok(text.as_str().unwrap_or_default().to_string())
    }

    async fn click(&self, element: &str) -> Result<(), WebDriverError> {
        let path = format!("/element/{}/click", element);
        self.command(Method::POST, &path, Some(json!({})))
            .await
            .map(|_| ())
    }

    /// Flips the trip type from "Round trip" to "One-way" when offered.
    async fn switch_to_one_way(&self) -> Result<(), WebDriverError> {
        let Some(toggle) = self.find("xpath", TRIP_TYPE_TOGGLE_XPATH).await? else {
            warn!("Could not find trip type toggle");
            return Ok(());
        };
        if !self.element_text(&toggle).await?.contains("Round trip") {
            debug!("One-way already selected");
            return Ok(());
        }

        self.click(&toggle).await?;
        sleep(Duration::from_secs(1)).await;

        let Some(option) = self.find("xpath", ONE_WAY_OPTION_XPATH).await? else {
            warn!("One-way option not found in trip type menu");
            return Ok(());
        };
        self.click(&option).await?;
        sleep(Duration::from_secs(5)).await;
        info!("Switched to one-way trip");
        Ok(())
    }

    async fn load(&self, url: &str) -> Result<String, RenderError> {
        self.navigate(url).await?;
        self.wait_for_landmark(url).await?;
        sleep(self.settings.content_settle_delay()).await;

        // The second settle runs whether or not the toggle was found.
        if self.settings.prefer_one_way {
            if let Err(e) = self.switch_to_one_way().await {
                warn!("Failed to switch to one-way: {}", e);
            }
            sleep(self.settings.content_settle_delay()).await;
        }

        let source = self
            .command(Method::GET, "/source", None)
            .await
            .map_err(|e| self.driver_failure(e))?;
        Ok(source.as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl RenderGateway for WebDriverGateway {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError> {
        let _current = self.current.lock().await;
        let tab = self.open_tab().await.map_err(|e| self.driver_failure(e))?;
        debug!("Opened tab {} for {}", tab, url);

        match self.load(url).await {
            Ok(html) => Ok(RenderedPage::new(url, tab, html)),
            Err(err) => {
                if let Err(e) = self.close_tab(&tab).await {
                    warn!("Failed to close tab {} after error: {}", tab, e);
                }
                Err(err)
            }
        }
    }

    async fn release(&self, page: RenderedPage) {
        let _current = self.current.lock().await;
        match self.close_tab(page.tab()).await {
            Ok(()) => debug!("Closed tab {}", page.tab()),
            Err(e) => warn!("Failed to close tab {} for {}: {}", page.tab(), page.url(), e),
        }
    }
}

fn capabilities(settings: &RenderConfig) -> Value {
    let mut always = json!({
        "browserName": settings.browser,
        "pageLoadStrategy": "eager",
    });
    let options = match settings.browser.as_str() {
        "firefox" => {
            let args: Vec<&str> = if settings.headless { vec!["-headless"] } else { vec![] };
            ("moz:firefoxOptions", json!({ "args": args }))
        }
        _ => {
            let mut args = vec!["--window-size=1366,900"];
            if settings.headless {
                args.push("--headless=new");
            }
            ("goog:chromeOptions", json!({ "args": args }))
        }
    };
    always[options.0] = options.1;
    json!({ "capabilities": { "alwaysMatch": always } })
}

async fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, WebDriverError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let status = response.status().as_u16();
    let text = response.text().await?;
    parse_envelope(status, &text)
}

// Every WebDriver response wraps its payload in `{"value": ...}`.
fn parse_envelope(status: u16, body: &str) -> Result<Value, WebDriverError> {
    let mut parsed: Value = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        WebDriverError::Parse(format!("{} in {:?}", e, preview))
    })?;
    let value = parsed.get_mut("value").map(Value::take).unwrap_or(Value::Null);

    if (200..300).contains(&status) {
        return Ok(value);
    }
    Err(WebDriverError::Protocol {
        status,
        error: value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
        message: value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_unwraps_value() {
        let body = r#"{"value":{"handle":"CDwindow-1","type":"tab"}}"#;
        let value = parse_envelope(200, body).unwrap();
        assert_eq!(value["handle"], "CDwindow-1");

        let value = parse_envelope(200, r#"{"value":null}"#).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_error_envelope() {
        let body = r#"{"value":{"error":"no such element","message":"Unable to locate element"}}"#;
        let err = parse_envelope(404, body).unwrap_err();
        assert!(err.is_no_such_element());
        assert!(!err.is_invalid_session());

        let body = r#"{"value":{"error":"invalid session id","message":""}}"#;
        let err = parse_envelope(404, body).unwrap_err();
        assert!(err.is_invalid_session());
    }

    #[test]
    fn test_non_json_body() {
        let err = parse_envelope(502, "Bad Gateway").unwrap_err();
        assert!(matches!(err, WebDriverError::Parse(_)));
    }

    #[test]
    fn test_chrome_capabilities() {
        let settings = RenderConfig {
            headless: true,
            ..RenderConfig::default()
        };
        let caps = capabilities(&settings);
        let always = &caps["capabilities"]["alwaysMatch"];
        assert_eq!(always["browserName"], "chrome");
        assert_eq!(always["pageLoadStrategy"], "eager");
        let args = always["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(args.iter().any(|a| a == "--headless=new"));
    }

    #[test]
    fn test_firefox_capabilities() {
        let settings = RenderConfig {
            browser: "firefox".to_string(),
            headless: false,
            ..RenderConfig::default()
        };
        let caps = capabilities(&settings);
        let args = caps["capabilities"]["alwaysMatch"]["moz:firefoxOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(args.is_empty());
    }
}
