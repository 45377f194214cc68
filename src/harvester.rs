//! Drives query units through render, extract and append, one at a time.
//!
//! A unit that fails to render or persist costs only that unit: the failure
//! is logged, counted, and the run moves on. Only a lost browser session ends
//! the run early.

use std::fmt;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::append_sink::{AppendSink, HarvestRow};
use crate::delay_manager::RateLimiter;
use crate::error::{HarvestError, PersistenceError, RenderError};
use crate::extractor::Extractor;
use crate::render_gateway::RenderGateway;
use crate::resume_manager::ProgressState;
use crate::route_enumerator::{QueryUnit, DEFAULT_SOURCE_BASE};

const PREVIEW_FLIGHTS: usize = 5;

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub source_base: String,
    pub inter_unit_delay: Duration,
    pub inter_unit_jitter: Duration,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        HarvestSettings {
            source_base: DEFAULT_SOURCE_BASE.to_string(),
            inter_unit_delay: Duration::from_secs(5),
            inter_unit_jitter: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Render,
    Persist,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Render => f.write_str("render"),
            FailureStage::Persist => f.write_str("persist"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub unit: QueryUnit,
    pub stage: FailureStage,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HarvestSummary {
    pub run_id: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Succeeded units whose page had no persistable flights.
    pub no_flights: usize,
    /// Units already recorded in the progress file.
    pub skipped: usize,
    pub rows_appended: usize,
    pub failures: Vec<UnitFailure>,
}

impl HarvestSummary {
    fn record_failure(&mut self, unit: &QueryUnit, stage: FailureStage, message: String) {
        self.failed += 1;
        self.failures.push(UnitFailure {
            unit: unit.clone(),
            stage,
            message,
        });
    }

    pub fn log(&self) {
        info!(
            "Harvest {} finished: {} attempted, {} succeeded ({} without flights), \
             {} failed, {} skipped, {} rows appended.",
            self.run_id,
            self.attempted,
            self.succeeded,
            self.no_flights,
            self.failed,
            self.skipped,
            self.rows_appended
        );
        for failure in &self.failures {
            warn!("  {} failed at {}: {}", failure.unit, failure.stage, failure.message);
        }
    }
}

enum UnitOutcome {
    Persisted(usize),
    NoFlights,
    RenderFailed(RenderError),
    PersistFailed(PersistenceError),
}

pub struct Harvester {
    settings: HarvestSettings,
    limiter: RateLimiter,
    progress: ProgressState,
}

impl Harvester {
    pub fn new(settings: HarvestSettings) -> Self {
        let limiter = RateLimiter::new(settings.inter_unit_delay, settings.inter_unit_jitter);
        Harvester {
            settings,
            limiter,
            progress: ProgressState::ephemeral(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressState) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }

    /// Processes `units` in order and reports what happened to each.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Aborted`] only when the gateway reports the
    /// browser session lost; rows appended before that stay appended.
    pub async fn run<G, S>(
        &mut self,
        units: &[QueryUnit],
        gateway: &G,
        extractor: &Extractor,
        sink: &S,
    ) -> Result<HarvestSummary, HarvestError>
    where
        G: RenderGateway + ?Sized,
        S: AppendSink + ?Sized,
    {
        let mut summary = HarvestSummary {
            run_id: Uuid::new_v4().to_string(),
            ..HarvestSummary::default()
        };
        let total = units.len();
        info!("Harvest {} starting: {} query units.", summary.run_id, total);

        for (i, unit) in units.iter().enumerate() {
            if self.progress.contains(unit) {
                debug!("Skipping {} (already harvested)", unit);
                summary.skipped += 1;
                continue;
            }

            if summary.attempted > 0 {
                self.limiter.wait().await;
            }
            summary.attempted += 1;
            info!("Processing {} / {} : {}", i + 1, total, unit);

            let outcome = self.process_unit(unit, gateway, extractor, sink).await;
            match outcome {
                UnitOutcome::Persisted(rows) => {
                    summary.succeeded += 1;
                    summary.rows_appended += rows;
                    self.progress.mark_complete(unit);
                }
                UnitOutcome::NoFlights => {
                    summary.succeeded += 1;
                    summary.no_flights += 1;
                }
                UnitOutcome::RenderFailed(err) if err.is_fatal() => {
                    error!("Error scraping {}: {}", unit, err);
                    summary.record_failure(unit, FailureStage::Render, err.to_string());
                    summary.log();
                    return Err(HarvestError::Aborted {
                        source: err,
                        summary,
                    });
                }
                UnitOutcome::RenderFailed(err) => {
                    error!("Error scraping {}: {}", unit, err);
                    summary.record_failure(unit, FailureStage::Render, err.to_string());
                }
                UnitOutcome::PersistFailed(err) => {
                    error!("Failed to append rows for {}: {}", unit, err);
                    summary.record_failure(unit, FailureStage::Persist, err.to_string());
                }
            }
        }

        summary.log();
        Ok(summary)
    }

    async fn process_unit<G, S>(
        &self,
        unit: &QueryUnit,
        gateway: &G,
        extractor: &Extractor,
        sink: &S,
    ) -> UnitOutcome
    where
        G: RenderGateway + ?Sized,
        S: AppendSink + ?Sized,
    {
        let url = unit.query_url(&self.settings.source_base);
        info!("=== Scraping: {} ===", unit);

        let page = match gateway.render(&url).await {
            Ok(page) => page,
            Err(err) => return UnitOutcome::RenderFailed(err),
        };
        // Records own their data, so the tab can go before the sink call.
        let records = extractor.extract(&page, &url);
        gateway.release(page).await;

        let rows: Vec<HarvestRow> = records
            .iter()
            .filter(|r| r.is_persistable())
            .map(|r| HarvestRow::new(unit, r))
            .collect();
        info!("Found {} flights ({} usable).", records.len(), rows.len());

        if rows.is_empty() {
            warn!("No flights found for {} or structure may have changed.", unit);
            return UnitOutcome::NoFlights;
        }
        for (n, row) in rows.iter().take(PREVIEW_FLIGHTS).enumerate() {
            debug!(
                "  {}. {} | {} -> {} | {} | {}",
                n + 1,
                row.airline,
                row.departure_time,
                row.arrival_time,
                row.price,
                row.stop_description
            );
        }

        match sink.append(&rows).await {
            Ok(()) => UnitOutcome::Persisted(rows.len()),
            Err(err) => UnitOutcome::PersistFailed(err),
        }
    }
}
