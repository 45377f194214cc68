use log::{debug, trace};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::config::SelectorConfig;
use crate::error::ConfigError;
use crate::render_gateway::RenderedPage;

/// One offer read from a result card. Empty strings mean "not found".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightRecord {
    pub airline: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub raw_departure_text: String,
    pub raw_arrival_text: String,
    pub price: String,
    pub stop_description: String,
    pub source_url: String,
}

impl FlightRecord {
    /// A record is only worth appending when it names an airline, a price and
    /// at least one of its times.
    pub fn is_persistable(&self) -> bool {
        let has_time = !self.raw_departure_text.is_empty() || !self.raw_arrival_text.is_empty();
        !self.airline.is_empty() && has_time && !self.price.is_empty()
    }
}

pub trait CardStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn try_extract(&self, card: &ElementRef<'_>) -> Option<String>;
}

pub struct SelectorText {
    name: String,
    selector: Selector,
}

impl SelectorText {
    pub fn parse(name: &str, field: &'static str, css: &str) -> Result<Self, ConfigError> {
        let selector = Selector::parse(css).map_err(|_| ConfigError::Selector {
            field,
            selector: css.to_string(),
        })?;
        Ok(SelectorText {
            name: name.to_string(),
            selector,
        })
    }
}

impl CardStrategy for SelectorText {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_extract(&self, card: &ElementRef<'_>) -> Option<String> {
        card.select(&self.selector)
            .next()
            .map(|el| element_text(&el))
            .filter(|text| !text.is_empty())
    }
}

pub struct TextPattern {
    name: String,
    pattern: Regex,
}

impl TextPattern {
    pub fn new(name: &str, pattern: Regex) -> Self {
        TextPattern {
            name: name.to_string(),
            pattern,
        }
    }
}

impl CardStrategy for TextPattern {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_extract(&self, card: &ElementRef<'_>) -> Option<String> {
        let text = element_text(card);
        self.pattern.find(&text).map(|m| m.as_str().to_string())
    }
}

/// Ordered strategies for one field; the first non-empty result wins.
pub struct FieldChain {
    field: &'static str,
    strategies: Vec<Box<dyn CardStrategy>>,
}

impl FieldChain {
    pub fn new(field: &'static str) -> Self {
        FieldChain {
            field,
            strategies: Vec::new(),
        }
    }

    pub fn then(mut self, strategy: impl CardStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    #[cfg(test)]
    fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn resolve(&self, card: &ElementRef<'_>) -> String {
        for strategy in &self.strategies {
            if let Some(text) = strategy.try_extract(card) {
                trace!("{} resolved by {}", self.field, strategy.name());
                return text;
            }
        }
        trace!("{} unresolved", self.field);
        String::new()
    }
}

pub struct Extractor {
    cards: Selector,
    airline: FieldChain,
    departure: FieldChain,
    arrival: FieldChain,
    price: FieldChain,
    stops: FieldChain,
    time_regex: Regex,
}

impl Extractor {
    pub fn new() -> Self {
        // Defaults are known-good selectors and patterns.
        Self::from_selectors(&SelectorConfig::default()).expect("default selectors must parse")
    }

    pub fn from_selectors(selectors: &SelectorConfig) -> Result<Self, ConfigError> {
        let card_css = format!("{} {}", selectors.landmark, selectors.card);
        let cards = Selector::parse(&card_css).map_err(|_| ConfigError::Selector {
            field: "card",
            selector: card_css.clone(),
        })?;

        let airline = FieldChain::new("airline").then(SelectorText::parse(
            "airline-label",
            "airline",
            &selectors.airline,
        )?);

        let departure = FieldChain::new("departure")
            .then(SelectorText::parse(
                "departure-aria-label",
                "departure",
                &selectors.departure,
            )?)
            .then(SelectorText::parse(
                "departure-position",
                "departure_fallback",
                &selectors.departure_fallback,
            )?);

        let arrival = FieldChain::new("arrival")
            .then(SelectorText::parse(
                "arrival-aria-label",
                "arrival",
                &selectors.arrival,
            )?)
            .then(SelectorText::parse(
                "arrival-position",
                "arrival_fallback",
                &selectors.arrival_fallback,
            )?);

        let price = FieldChain::new("price").then(SelectorText::parse(
            "price-label",
            "price",
            &selectors.price,
        )?);

        let stops = FieldChain::new("stops")
            .then(SelectorText::parse("stops-badge", "stops", &selectors.stops)?)
            .then(TextPattern::new(
                "stops-card-text",
                Regex::new(r"(?i)\b(?:nonstop|\d+\s+stops?)\b").expect("valid stops regex"),
            ));

        Ok(Extractor {
            cards,
            airline,
            departure,
            arrival,
            price,
            stops,
            time_regex: Regex::new(r"(?i)\b\d{1,2}:\d{2}\s?[ap]m\b").expect("valid time regex"),
        })
    }

    /// Records for every card on the page, in document order.
    pub fn extract(&self, page: &RenderedPage, context_url: &str) -> Vec<FlightRecord> {
        self.extract_html(page.html(), context_url)
    }

    pub fn extract_html(&self, html: &str, context_url: &str) -> Vec<FlightRecord> {
        let document = Html::parse_document(html);
        let records: Vec<FlightRecord> = document
            .select(&self.cards)
            .map(|card| self.read_card(&card, context_url))
            .collect();

        let degraded = records.iter().filter(|r| r.airline.is_empty()).count();
        if degraded > 0 {
            debug!("{} of {} cards had no airline", degraded, records.len());
        }
        records
    }

    fn read_card(&self, card: &ElementRef<'_>, context_url: &str) -> FlightRecord {
        let raw_departure_text = self.departure.resolve(card);
        let raw_arrival_text = self.arrival.resolve(card);

        FlightRecord {
            airline: self.airline.resolve(card),
            departure_time: self.parse_time(&raw_departure_text),
            arrival_time: self.parse_time(&raw_arrival_text),
            raw_departure_text,
            raw_arrival_text,
            price: self.price.resolve(card),
            stop_description: self.stops.resolve(card),
            source_url: context_url.to_string(),
        }
    }

    pub fn parse_time(&self, raw: &str) -> String {
        self.time_regex
            .find(raw)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn chains(&self) -> [&FieldChain; 5] {
        [&self.airline, &self.departure, &self.arrival, &self.price, &self.stops]
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

// Elements that break the text flow the way `innerText` does.
const BLOCK_TAGS: &[&str] = &[
    "div", "p", "li", "ul", "ol", "section", "header", "footer", "table", "tr", "td", "th",
    "br", "h1", "h2", "h3", "h4", "h5", "h6",
];

/// Visible text of an element with whitespace runs collapsed. Inline children
/// run together (`<span>$</span>250` reads `$250`); block children are
/// separated by a single space.
fn element_text(el: &ElementRef<'_>) -> String {
    let mut raw = String::new();
    collect_text(*el, &mut raw);
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            let block = BLOCK_TAGS.contains(&child.value().name());
            if block {
                out.push(' ');
            }
            collect_text(child, out);
            if block {
                out.push(' ');
            }
        }
    }
}
