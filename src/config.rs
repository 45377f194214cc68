use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate};
use log::info;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::harvester::HarvestSettings;
use crate::route_enumerator::{self, QueryUnit, DEFAULT_SOURCE_BASE};

pub const DEFAULT_CONFIG_FILE: &str = "harvest.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub source: SourceConfig,
    pub routes: RouteConfig,
    pub render: RenderConfig,
    pub harvest: RunConfig,
    pub sink: SinkConfig,
    pub selectors: SelectorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            base_url: DEFAULT_SOURCE_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    #[serde(alias = "departures")]
    pub origins: Vec<String>,
    #[serde(alias = "arrivals")]
    pub destinations: Vec<String>,
    /// Defaults to today.
    pub start_date: Option<NaiveDate>,
    pub months_ahead: u32,
}

impl RouteConfig {
    pub fn start_date(&self) -> NaiveDate {
        self.start_date.unwrap_or_else(|| Local::now().date_naive())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub webdriver_url: String,
    pub browser: String,
    pub headless: bool,
    pub navigation_timeout_secs: u64,
    pub landmark_timeout_secs: u64,
    pub content_settle_delay_secs: u64,
    pub landmark_poll_millis: u64,
    pub prefer_one_way: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            webdriver_url: "http://localhost:9515".to_string(),
            browser: "chrome".to_string(),
            headless: false,
            navigation_timeout_secs: 30,
            landmark_timeout_secs: 30,
            content_settle_delay_secs: 10,
            landmark_poll_millis: 250,
            prefer_one_way: false,
        }
    }
}

impl RenderConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn landmark_timeout(&self) -> Duration {
        Duration::from_secs(self.landmark_timeout_secs)
    }

    pub fn content_settle_delay(&self) -> Duration {
        Duration::from_secs(self.content_settle_delay_secs)
    }

    pub fn landmark_poll_interval(&self) -> Duration {
        Duration::from_millis(self.landmark_poll_millis.max(10))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub inter_unit_delay_secs: u64,
    pub inter_unit_jitter_secs: u64,
    pub progress_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            inter_unit_delay_secs: 5,
            inter_unit_jitter_secs: 0,
            progress_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Sheets,
    Csv,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub spreadsheet_id: Option<String>,
    pub sheet_name: String,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub csv_path: PathBuf,
    pub probe: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            kind: SinkKind::Sheets,
            spreadsheet_id: None,
            sheet_name: "Flights".to_string(),
            credentials_path: PathBuf::from("credentials.json"),
            token_path: PathBuf::from("token.json"),
            csv_path: PathBuf::from("flights.csv"),
            probe: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub landmark: String,
    pub card: String,
    pub airline: String,
    pub departure: String,
    pub departure_fallback: String,
    pub arrival: String,
    pub arrival_fallback: String,
    pub price: String,
    pub stops: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        SelectorConfig {
            landmark: "div[role='main']".to_string(),
            card: ".pIav2d".to_string(),
            airline: ".sSHqwe.tPgKwe.ogfYpf".to_string(),
            departure: "[aria-label*='Departure time']".to_string(),
            departure_fallback: ".mv1WYe span:nth-child(1)".to_string(),
            arrival: "[aria-label*='Arrival time']".to_string(),
            arrival_fallback: ".mv1WYe span:nth-child(2)".to_string(),
            price: ".YMlIz.FpEdX".to_string(),
            stops: ".J0lOec".to_string(),
        }
    }
}

impl HarvestConfig {
    /// Reads `path` if given (it must exist), else `harvest.toml` when
    /// present, else defaults, then applies environment overrides. Callers
    /// run [`validate`](Self::validate) once their own overrides are in.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                info!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                HarvestConfig::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.normalize();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("SPREADSHEET_ID").filter(|v| !v.trim().is_empty()) {
            self.sink.spreadsheet_id = Some(id.trim().to_string());
        }
        if let Some(url) = lookup("WEBDRIVER_URL").filter(|v| !v.trim().is_empty()) {
            self.render.webdriver_url = url.trim().to_string();
        }
    }

    pub fn normalize(&mut self) {
        let clean = |codes: &mut Vec<String>| {
            *codes = codes
                .iter()
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .collect();
        };
        clean(&mut self.routes.origins);
        clean(&mut self.routes.destinations);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routes.origins.is_empty() {
            return Err(ConfigError::Invalid("routes.origins is empty".to_string()));
        }
        if self.routes.destinations.is_empty() {
            return Err(ConfigError::Invalid("routes.destinations is empty".to_string()));
        }
        let start = self.routes.start_date();
        if route_enumerator::window_end(start, self.routes.months_ahead).is_none() {
            return Err(ConfigError::Invalid(format!(
                "routes.months_ahead = {} overflows the calendar",
                self.routes.months_ahead
            )));
        }
        if self.sink.kind == SinkKind::Sheets && self.sink.spreadsheet_id.is_none() {
            return Err(ConfigError::Invalid(
                "sink.spreadsheet_id (or SPREADSHEET_ID) is required for the sheets sink"
                    .to_string(),
            ));
        }
        url::Url::parse(&self.source.base_url).map_err(|e| {
            ConfigError::Invalid(format!("source.base_url {:?}: {}", self.source.base_url, e))
        })?;
        url::Url::parse(&self.render.webdriver_url).map_err(|e| {
            let url = &self.render.webdriver_url;
            ConfigError::Invalid(format!("render.webdriver_url {:?}: {}", url, e))
        })?;
        Ok(())
    }

    pub fn query_units(&self) -> Vec<QueryUnit> {
        route_enumerator::enumerate(
            &self.routes.origins,
            &self.routes.destinations,
            self.routes.start_date(),
            self.routes.months_ahead,
        )
    }

    pub fn harvest_settings(&self) -> HarvestSettings {
        HarvestSettings {
            source_base: self.source.base_url.clone(),
            inter_unit_delay: Duration::from_secs(self.harvest.inter_unit_delay_secs),
            inter_unit_jitter: Duration::from_secs(self.harvest.inter_unit_jitter_secs),
        }
    }

    pub fn sheet_range(&self) -> String {
        format!("{}!A:I", self.sink.sheet_name)
    }
}
