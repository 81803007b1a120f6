//! Common data types for demandcast

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Product category: dense index plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    /// Dense index, equal to the category's position in the observation set.
    pub id: usize,
    /// Human-readable name.
    pub name: String,
}

impl Category {
    /// Create a category.
    pub fn new(id: usize, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// One historical demand record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Day index within the historical window.
    pub day: u32,
    /// Category index.
    pub category: usize,
    /// Observed demand count.
    pub demand: u64,
}

#[derive(Deserialize)]
struct ObservationSetJson {
    categories: Vec<String>,
    observations: Vec<Observation>,
}

/// Validated historical demand for all categories over one shared window.
///
/// Invariants (checked by [`ObservationSet::new`]):
/// - at least one category and one observation;
/// - every category covers the same contiguous day range with exactly one
///   record per day.
///
/// Observations are stored sorted by `(category, day)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ObservationSetJson", into = "ObservationSetOut")]
pub struct ObservationSet {
    categories: Vec<Category>,
    observations: Vec<Observation>,
    first_day: u32,
    last_day: u32,
}

#[derive(Serialize)]
struct ObservationSetOut {
    categories: Vec<String>,
    observations: Vec<Observation>,
}

impl From<ObservationSet> for ObservationSetOut {
    fn from(set: ObservationSet) -> Self {
        Self {
            categories: set.categories.into_iter().map(|c| c.name).collect(),
            observations: set.observations,
        }
    }
}

impl TryFrom<ObservationSetJson> for ObservationSet {
    type Error = Error;

    fn try_from(raw: ObservationSetJson) -> Result<Self> {
        ObservationSet::from_names(raw.categories, raw.observations)
    }
}

impl ObservationSet {
    /// Build from category names (indices assigned by position).
    pub fn from_names(names: Vec<String>, observations: Vec<Observation>) -> Result<Self> {
        let categories = names.into_iter().enumerate().map(|(i, n)| Category::new(i, n)).collect();
        Self::new(categories, observations)
    }

    /// Validate and build an observation set.
    pub fn new(categories: Vec<Category>, mut observations: Vec<Observation>) -> Result<Self> {
        if categories.is_empty() {
            return Err(Error::Validation("at least one category required".into()));
        }
        if observations.is_empty() {
            return Err(Error::Validation("observation set is empty".into()));
        }
        let mut names = HashSet::new();
        for (i, c) in categories.iter().enumerate() {
            if c.id != i {
                return Err(Error::Validation(format!(
                    "category '{}' has id {} but position {}",
                    c.name, c.id, i
                )));
            }
            if !names.insert(c.name.as_str()) {
                return Err(Error::Validation(format!("duplicate category name '{}'", c.name)));
            }
        }
        if let Some(o) = observations.iter().find(|o| o.category >= categories.len()) {
            return Err(Error::Validation(format!(
                "observation on day {} references unknown category {}",
                o.day, o.category
            )));
        }

        observations.sort_by_key(|o| (o.category, o.day));

        let first_day = observations.iter().map(|o| o.day).min().unwrap_or(0);
        let last_day = observations.iter().map(|o| o.day).max().unwrap_or(0);
        let n_days = (last_day - first_day) as usize + 1;

        for c in &categories {
            let days: Vec<u32> =
                observations.iter().filter(|o| o.category == c.id).map(|o| o.day).collect();
            if days.len() != n_days {
                return Err(Error::Validation(format!(
                    "category '{}' has {} records, expected {} (days {}..={})",
                    c.name,
                    days.len(),
                    n_days,
                    first_day,
                    last_day
                )));
            }
            for (k, &d) in days.iter().enumerate() {
                let expected = first_day + k as u32;
                if d != expected {
                    return Err(Error::Validation(format!(
                        "category '{}': gap or duplicate at day {} (expected {})",
                        c.name, d, expected
                    )));
                }
            }
        }

        Ok(Self { categories, observations, first_day, last_day })
    }

    /// Categories in index order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Number of categories.
    pub fn n_categories(&self) -> usize {
        self.categories.len()
    }

    /// All observations, sorted by `(category, day)`.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// First day of the historical window.
    pub fn first_day(&self) -> u32 {
        self.first_day
    }

    /// Last day of the historical window.
    pub fn last_day(&self) -> u32 {
        self.last_day
    }

    /// Number of days in the window.
    pub fn n_days(&self) -> usize {
        (self.last_day - self.first_day) as usize + 1
    }

    /// Look up a category index by name.
    pub fn category_index(&self, name: &str) -> Option<usize> {
        self.categories.iter().position(|c| c.name == name)
    }

    /// Demand series for one category in day order.
    pub fn series(&self, category: usize) -> Vec<u64> {
        self.observations.iter().filter(|o| o.category == category).map(|o| o.demand).collect()
    }

    /// Sample mean of demand across all records.
    pub fn demand_mean(&self) -> f64 {
        let n = self.observations.len() as f64;
        self.observations.iter().map(|o| o.demand as f64).sum::<f64>() / n
    }

    /// Sample standard deviation of demand across all records (0 for a single record).
    pub fn demand_sd(&self) -> f64 {
        let n = self.observations.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.demand_mean();
        let ss: f64 = self.observations.iter().map(|o| (o.demand as f64 - mean).powi(2)).sum();
        (ss / (n as f64 - 1.0)).sqrt()
    }
}

/// Newsvendor cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostScenario {
    /// Holding cost per unit of leftover stock (`h > 0`).
    pub holding_cost: f64,
    /// Stockout penalty per unit of unmet demand (`p > 0`).
    pub stockout_penalty: f64,
}

impl CostScenario {
    /// Create a validated cost scenario.
    pub fn new(holding_cost: f64, stockout_penalty: f64) -> Result<Self> {
        let s = Self { holding_cost, stockout_penalty };
        s.validate()?;
        Ok(s)
    }

    /// Reject non-positive or non-finite costs.
    pub fn validate(&self) -> Result<()> {
        if !self.holding_cost.is_finite() || self.holding_cost <= 0.0 {
            return Err(Error::InvalidCostParameter(format!(
                "holding cost must be finite and > 0, got {}",
                self.holding_cost
            )));
        }
        if !self.stockout_penalty.is_finite() || self.stockout_penalty <= 0.0 {
            return Err(Error::InvalidCostParameter(format!(
                "stockout penalty must be finite and > 0, got {}",
                self.stockout_penalty
            )));
        }
        Ok(())
    }

    /// Critical fractile `p / (h + p)`.
    pub fn critical_fractile(&self) -> f64 {
        self.stockout_penalty / (self.holding_cost + self.stockout_penalty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(day: u32, category: usize, demand: u64) -> Observation {
        Observation { day, category, demand }
    }

    fn two_categories() -> Vec<Category> {
        vec![Category::new(0, "bread"), Category::new(1, "milk")]
    }

    #[test]
    fn test_observation_set_sorts_and_summarizes() {
        let set = ObservationSet::new(
            two_categories(),
            vec![obs(1, 1, 4), obs(0, 0, 1), obs(0, 1, 3), obs(1, 0, 2)],
        )
        .unwrap();
        assert_eq!(set.n_days(), 2);
        assert_eq!(set.series(0), vec![1, 2]);
        assert_eq!(set.series(1), vec![3, 4]);
        assert!((set.demand_mean() - 2.5).abs() < 1e-12);
        assert_eq!(set.category_index("milk"), Some(1));
    }

    #[test]
    fn test_observation_set_rejects_gap() {
        let err = ObservationSet::new(
            vec![Category::new(0, "bread")],
            vec![obs(0, 0, 1), obs(2, 0, 2), obs(3, 0, 2)],
        );
        assert!(matches!(err, Err(Error::Validation(_))));
    }

    #[test]
    fn test_observation_set_rejects_misaligned_windows() {
        let err = ObservationSet::new(
            two_categories(),
            vec![obs(0, 0, 1), obs(1, 0, 1), obs(1, 1, 1), obs(2, 1, 1)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_observation_set_rejects_empty_and_unknown_category() {
        assert!(ObservationSet::new(two_categories(), vec![]).is_err());
        assert!(ObservationSet::new(two_categories(), vec![obs(0, 5, 1)]).is_err());
    }

    #[test]
    fn test_observation_set_json_roundtrip_shape() {
        let json = r#"{
            "categories": ["bread"],
            "observations": [
                {"day": 0, "category": 0, "demand": 10},
                {"day": 1, "category": 0, "demand": 12}
            ]
        }"#;
        let set: ObservationSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.categories()[0].name, "bread");
        let back = serde_json::to_value(&set).unwrap();
        assert_eq!(back["observations"].as_array().unwrap().len(), 2);

        let bad = r#"{"categories": ["bread"], "observations": [{"day": 0, "category": 0, "demand": -1}]}"#;
        assert!(serde_json::from_str::<ObservationSet>(bad).is_err());
    }

    #[test]
    fn test_cost_scenario_validation() {
        assert!(CostScenario::new(2.0, 5.0).is_ok());
        assert!(matches!(CostScenario::new(0.0, 5.0), Err(Error::InvalidCostParameter(_))));
        assert!(matches!(CostScenario::new(2.0, -1.0), Err(Error::InvalidCostParameter(_))));
        let c = CostScenario::new(2.0, 5.0).unwrap();
        assert!((c.critical_fractile() - 5.0 / 7.0).abs() < 1e-15);
    }
}
