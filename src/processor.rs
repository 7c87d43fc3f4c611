// Flight collection processing: pulls offers out of the raw search payload, drops the
// invalid ones and picks the cheapest

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::{FlightOption, FlightOptionSet};

pub const OFFERS_SECTION: &str = "other_flights";

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Missing section: {0}")]
    MissingSection(String),

    #[error("Section {section} is not an array")]
    NotAnArray { section: String },

    #[error("Malformed offer in {section}: {message}")]
    MalformedOffer { section: String, message: String },
}

/// Parse the offers section of a raw provider payload.
///
/// A missing or non-array section means the provider changed its contract, so it
/// is reported instead of being treated as "no offers".
pub fn parse_flight_options(raw: &Value) -> Result<FlightOptionSet, ProcessingError> {
    let section = raw
        .get(OFFERS_SECTION)
        .ok_or_else(|| ProcessingError::MissingSection(OFFERS_SECTION.to_string()))?;

    let entries = section.as_array().ok_or_else(|| ProcessingError::NotAnArray {
        section: OFFERS_SECTION.to_string(),
    })?;

    entries
        .iter()
        .map(|entry| {
            FlightOption::deserialize(entry).map_err(|e| ProcessingError::MalformedOffer {
                section: OFFERS_SECTION.to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

/// Keeps options priced above zero, in their original order.
pub fn filter_valid(set: &FlightOptionSet) -> FlightOptionSet {
    set.iter().filter(|o| o.is_valid()).cloned().collect()
}

/// Cheapest option; the first one seen wins a tie.
pub fn min_by_price(set: &FlightOptionSet) -> Option<&FlightOption> {
    let mut best: Option<&FlightOption> = None;
    for option in set {
        match best {
            Some(current) if option.price >= current.price => {}
            _ => best = Some(option),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn option(token: &str, price: i64) -> FlightOption {
        FlightOption {
            departure_token: token.to_string(),
            price,
            ..Default::default()
        }
    }

    fn tokens(set: &FlightOptionSet) -> Vec<&str> {
        set.iter().map(|o| o.departure_token.as_str()).collect()
    }

    #[test]
    fn test_filter_valid_preserves_order() {
        let set = FlightOptionSet::new(vec![
            option("a", 500),
            option("b", 0),
            option("c", 300),
            option("d", -20),
            option("e", 1),
        ]);

        let filtered = filter_valid(&set);
        assert_eq!(tokens(&filtered), vec!["a", "c", "e"]);
        assert!(filtered.iter().all(|o| o.price > 0));
    }

    #[test]
    fn test_filter_valid_on_empty_set() {
        assert!(filter_valid(&FlightOptionSet::default()).is_empty());
    }

    #[test]
    fn test_min_by_price_first_wins_on_tie() {
        let set = FlightOptionSet::new(vec![
            option("a", 400),
            option("b", 250),
            option("c", 900),
            option("d", 250),
        ]);

        let best = min_by_price(&set).unwrap();
        assert_eq!(best.departure_token, "b");
        assert!(set.iter().all(|o| best.price <= o.price));
    }

    #[test]
    fn test_min_by_price_empty() {
        assert!(min_by_price(&FlightOptionSet::default()).is_none());
    }

    #[test]
    fn test_parse_offers_section() {
        let raw = json!({
            "search_metadata": {"status": "Success"},
            "other_flights": [
                {"price": 500, "departure_token": "t1", "type": "Round trip", "flights": []},
                {"price": 300, "departure_token": "t2"},
                {"departure_token": "t3"}
            ]
        });

        let set = parse_flight_options(&raw).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(tokens(&set), vec!["t1", "t2", "t3"]);
        assert_eq!(filter_valid(&set).len(), 2);
    }

    #[test]
    fn test_parse_missing_section() {
        let raw = json!({"best_flights": []});
        assert!(matches!(
            parse_flight_options(&raw),
            Err(ProcessingError::MissingSection(_))
        ));
    }

    #[test]
    fn test_parse_section_not_an_array() {
        let raw = json!({"other_flights": {"price": 10}});
        assert!(matches!(
            parse_flight_options(&raw),
            Err(ProcessingError::NotAnArray { .. })
        ));
    }

    #[test]
    fn test_parse_malformed_offer() {
        let raw = json!({"other_flights": [{"price": "cheap"}]});
        assert!(matches!(
            parse_flight_options(&raw),
            Err(ProcessingError::MalformedOffer { .. })
        ));
    }
}
