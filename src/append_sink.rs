use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, info};
use serde::Serialize;
use serde_json::json;

use crate::auth::TokenProvider;
use crate::error::PersistenceError;
use crate::extractor::FlightRecord;
use crate::route_enumerator::QueryUnit;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";

pub const ROW_HEADER: [&str; 9] = [
    "origin",
    "destination",
    "departure_time",
    "arrival_time",
    "airline",
    "price",
    "stop_description",
    "date",
    "source_url",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestRow {
    pub origin: String,
    pub destination: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub airline: String,
    pub price: String,
    pub stop_description: String,
    pub date: NaiveDate,
    pub source_url: String,
}

impl HarvestRow {
    pub fn new(unit: &QueryUnit, record: &FlightRecord) -> Self {
        HarvestRow {
            origin: unit.origin.clone(),
            destination: unit.destination.clone(),
            departure_time: record.departure_time.clone(),
            arrival_time: record.arrival_time.clone(),
            airline: record.airline.clone(),
            price: record.price.clone(),
            stop_description: record.stop_description.clone(),
            date: unit.date,
            source_url: record.source_url.clone(),
        }
    }

    pub fn values(&self) -> [String; 9] {
        [
            self.origin.clone(),
            self.destination.clone(),
            self.departure_time.clone(),
            self.arrival_time.clone(),
            self.airline.clone(),
            self.price.clone(),
            self.stop_description.clone(),
            self.date.format("%Y-%m-%d").to_string(),
            self.source_url.clone(),
        ]
    }

    /// Reads a row back from its nine stored cells. `None` when the cell
    /// count is wrong or the date cell does not parse.
    pub fn from_values(cells: &[String]) -> Option<Self> {
        let [origin, destination, departure, arrival, airline, price, stops, date, source_url] =
            cells
        else {
            return None;
        };
        Some(HarvestRow {
            origin: origin.clone(),
            destination: destination.clone(),
            departure_time: departure.clone(),
            arrival_time: arrival.clone(),
            airline: airline.clone(),
            price: price.clone(),
            stop_description: stops.clone(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?,
            source_url: source_url.clone(),
        })
    }

    pub fn unit(&self) -> QueryUnit {
        QueryUnit::new(self.origin.clone(), self.destination.clone(), self.date)
    }
}

/// Append-only destination for harvested rows. One call per query unit.
#[async_trait]
pub trait AppendSink: Send + Sync {
    async fn append(&self, rows: &[HarvestRow]) -> Result<(), PersistenceError>;
}

pub struct SheetsSink {
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    spreadsheet_id: String,
    range: String,
    api_base: String,
}

impl SheetsSink {
    pub fn new(
        tokens: Arc<dyn TokenProvider>,
        spreadsheet_id: impl Into<String>,
        range: impl Into<String>,
    ) -> Self {
        SheetsSink {
            client: reqwest::Client::new(),
            tokens,
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
            api_base: SHEETS_API.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn append_url(&self, range: &str) -> String {
        format!(
            "{}/{}/values/{}:append?valueInputOption=RAW",
            self.api_base,
            urlencoding::encode(&self.spreadsheet_id),
            urlencoding::encode(range)
        )
    }

    async fn append_values(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), PersistenceError> {
        let auth = self.tokens.authorized_client().await?;
        let response = self
            .client
            .post(self.append_url(range))
            .bearer_auth(auth.bearer())
            .json(&json!({ "values": values }))
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }

    pub async fn probe(&self, marker: &str) -> Result<(), PersistenceError> {
        let sheet = self.range.split('!').next().unwrap_or(&self.range);
        let values = vec![vec![marker.to_string(), chrono::Utc::now().to_rfc3339()]];
        self.append_values(&format!("{}!A1", sheet), values).await?;
        info!("Sheets probe row written to {}", sheet);
        Ok(())
    }
}

#[async_trait]
impl AppendSink for SheetsSink {
    async fn append(&self, rows: &[HarvestRow]) -> Result<(), PersistenceError> {
        if rows.is_empty() {
            return Ok(());
        }
        let values = rows.iter().map(|r| r.values().to_vec()).collect();
        self.append_values(&self.range, values).await?;
        debug!("Appended {} rows to {}", rows.len(), self.range);
        Ok(())
    }
}

async fn check_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, PersistenceError> {
    if !response.status().is_success() {
        return Err(PersistenceError::Rejected {
            status: response.status().as_u16(),
            body: response.text().await.unwrap_or_default(),
        });
    }
    Ok(response)
}

pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvSink { path: path.into() }
    }
}

#[async_trait]
impl AppendSink for CsvSink {
    async fn append(&self, rows: &[HarvestRow]) -> Result<(), PersistenceError> {
        if rows.is_empty() {
            return Ok(());
        }
        let needs_header = std::fs::metadata(&self.path).map_or(true, |m| m.len() == 0);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record(ROW_HEADER)?;
        }
        for row in rows {
            writer.write_record(row.values())?;
        }
        writer.flush()?;
        Ok(())
    }
}
