pub mod append_sink;
pub mod auth;
pub mod config;
pub mod delay_manager;
pub mod error;
pub mod extractor;
pub mod harvester;
pub mod logger;
pub mod render_gateway;
pub mod resume_manager;
pub mod route_enumerator;
pub mod webdriver;

// Exporting types for convenience
pub use append_sink::{AppendSink, CsvSink, HarvestRow, SheetsSink};
pub use auth::{AuthHandle, FileTokenProvider, TokenProvider};
pub use config::HarvestConfig;
pub use error::{AuthError, ConfigError, HarvestError, PersistenceError, RenderError};
pub use extractor::{Extractor, FlightRecord};
pub use harvester::{HarvestSettings, HarvestSummary, Harvester};
pub use render_gateway::{RenderGateway, RenderedPage};
pub use resume_manager::ProgressState;
pub use route_enumerator::QueryUnit;
pub use webdriver::WebDriverGateway;
