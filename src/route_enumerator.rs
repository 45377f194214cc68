use std::fmt;

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SOURCE_BASE: &str = "https://www.google.com";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryUnit {
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
}

impl QueryUnit {
    pub fn new(origin: impl Into<String>, destination: impl Into<String>, date: NaiveDate) -> Self {
        QueryUnit {
            origin: origin.into(),
            destination: destination.into(),
            date,
        }
    }

    /// Stable identity used by the progress file, e.g. `DEL-DXB-2025-06-01`.
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.origin, self.destination, self.date.format("%Y-%m-%d"))
    }

    pub fn query_url(&self, base: &str) -> String {
        let query = format!(
            "Flights from {} to {} on {}",
            self.origin,
            self.destination,
            self.date.format("%Y-%m-%d")
        );
        format!(
            "{}/travel/flights?q={}",
            base.trim_end_matches('/'),
            urlencoding::encode(&query)
        )
    }
}

impl fmt::Display for QueryUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} on {}", self.origin, self.destination, self.date.format("%Y-%m-%d"))
    }
}

/// Last date covered by a window starting at `start`. Month arithmetic clamps
/// instead of rolling over: Jan 31 + 1 month is Feb 28, never Mar 3.
pub fn window_end(start: NaiveDate, months_ahead: u32) -> Option<NaiveDate> {
    start.checked_add_months(Months::new(months_ahead))
}

pub fn dates_in_window(start: NaiveDate, months_ahead: u32) -> Vec<NaiveDate> {
    let Some(end) = window_end(start, months_ahead) else {
        return Vec::new();
    };
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Cartesian expansion of origins × destinations × days, origin-major.
pub fn enumerate(
    origins: &[String],
    destinations: &[String],
    start: NaiveDate,
    months_ahead: u32,
) -> Vec<QueryUnit> {
    let dates = dates_in_window(start, months_ahead);
    let mut units = Vec::with_capacity(origins.len() * destinations.len() * dates.len());

    for origin in origins {
        for destination in destinations {
            for date in &dates {
                units.push(QueryUnit::new(origin.clone(), destination.clone(), *date));
            }
        }
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_day_window() {
        let units = enumerate(&codes(&["DEL"]), &codes(&["DXB"]), day(2025, 6, 1), 0);
        assert_eq!(units, vec![QueryUnit::new("DEL", "DXB", day(2025, 6, 1))]);
    }

    #[test]
    fn test_length_is_full_product() {
        let origins = codes(&["DEL", "BOM"]);
        let destinations = codes(&["DXB", "HKT", "DPS"]);
        let units = enumerate(&origins, &destinations, day(2025, 6, 1), 1);

        // June 1 .. July 1 inclusive
        let days = 31;
        assert_eq!(units.len(), 2 * 3 * days);
        assert_eq!(units.first().unwrap().date, day(2025, 6, 1));
        assert_eq!(units.last().unwrap().date, day(2025, 7, 1));
    }

    #[test]
    fn test_order_is_origin_then_destination_then_date() {
        let units = enumerate(&codes(&["DEL"]), &codes(&["DXB", "HKT"]), day(2025, 6, 2), 0);
        let keys: Vec<String> = units.iter().map(QueryUnit::key).collect();
        assert_eq!(keys, vec!["DEL-DXB-2025-06-02", "DEL-HKT-2025-06-02"]);
    }

    #[test]
    fn test_enumeration_is_deterministic() {
        let origins = codes(&["DEL", "BLR"]);
        let destinations = codes(&["DXB"]);
        let a = enumerate(&origins, &destinations, day(2024, 12, 15), 2);
        let b = enumerate(&origins, &destinations, day(2024, 12, 15), 2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_month_end_clamps() {
        assert_eq!(window_end(day(2025, 1, 31), 1), Some(day(2025, 2, 28)));
        assert_eq!(window_end(day(2024, 1, 31), 1), Some(day(2024, 2, 29)));
        assert_eq!(dates_in_window(day(2025, 1, 31), 1).len(), 29);
    }

    #[test]
    fn test_empty_inputs_yield_nothing() {
        assert!(enumerate(&[], &codes(&["DXB"]), day(2025, 6, 1), 3).is_empty());
        assert!(enumerate(&codes(&["DEL"]), &[], day(2025, 6, 1), 3).is_empty());
    }

    #[test]
    fn test_query_url() {
        let unit = QueryUnit::new("DEL", "DXB", day(2025, 6, 1));
        assert_eq!(
            unit.query_url(DEFAULT_SOURCE_BASE),
            "https://www.google.com/travel/flights?q=Flights%20from%20DEL%20to%20DXB%20on%202025-06-01"
        );
        assert_eq!(
            unit.query_url("http://localhost:8080/"),
            "http://localhost:8080/travel/flights?q=Flights%20from%20DEL%20to%20DXB%20on%202025-06-01"
        );
    }

    #[test]
    fn test_display_names_the_route() {
        let unit = QueryUnit::new("DEL", "HKT", day(2025, 6, 3));
        assert_eq!(unit.to_string(), "DEL -> HKT on 2025-06-03");
    }
}
