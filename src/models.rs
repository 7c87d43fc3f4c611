// Flight offer model
// Field names follow the provider's JSON so offers deserialize straight out of the search payload

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Airport {
    pub id: String,
    pub name: String,
    // Local time as the provider formats it, passed through untouched
    pub time: String,
}

/// One directional segment bundle of an itinerary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlightLeg {
    pub airline: String,
    pub airline_logo: String,
    pub departure_airport: Airport,
    pub arrival_airport: Airport,
    /// Minutes.
    pub duration: u32,
}

/// One priced, bookable itinerary returned by the search provider.
///
/// An option priced at zero or below is invalid: it is never persisted and never
/// takes part in a price comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlightOption {
    pub airline_logo: String,
    /// Opaque provider token, stable across searches for the same itinerary.
    pub departure_token: String,
    #[serde(rename = "flights")]
    pub legs: Vec<FlightLeg>,
    /// Whole currency units.
    pub price: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FlightOption {
    pub fn is_valid(&self) -> bool {
        self.price > 0
    }

    // The first leg is the one shown to recipients
    pub fn primary_leg(&self) -> Option<&FlightLeg> {
        self.legs.first()
    }
}

/// Ordered batch of options from a single search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FlightOptionSet(Vec<FlightOption>);

impl FlightOptionSet {
    pub fn new(options: Vec<FlightOption>) -> Self {
        Self(options)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FlightOption> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<FlightOption> {
        self.0
    }
}

impl From<Vec<FlightOption>> for FlightOptionSet {
    fn from(options: Vec<FlightOption>) -> Self {
        Self(options)
    }
}

impl FromIterator<FlightOption> for FlightOptionSet {
    fn from_iter<I: IntoIterator<Item = FlightOption>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for FlightOptionSet {
    type Item = FlightOption;
    type IntoIter = std::vec::IntoIter<FlightOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FlightOptionSet {
    type Item = &'a FlightOption;
    type IntoIter = std::slice::Iter<'a, FlightOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
