// stoic_core/src/parameters.rs

//! Tunable parameters and their bounds.
//! Names are kept in a `BTreeMap` so that iteration order, and therefore every
//! seeded search, is reproducible.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use rand::Rng;

use crate::error::{TunerError, TunerResult};

/// Inclusive range a single parameter may take.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterBound {
    pub min: f64,
    pub max: f64,
}

impl ParameterBound {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Declared bounds for every tunable parameter of a strategy.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ParameterBounds {
    bounds: BTreeMap<String, ParameterBound>,
}

impl ParameterBounds {
    /// Validates and wraps the bounds map.
    /// Fails if the map is empty, a bound or its width is not finite, or `min > max`.
    pub fn new(bounds: BTreeMap<String, ParameterBound>) -> TunerResult<Self> {
        if bounds.is_empty() {
            return Err(TunerError::config("at least one parameter bound is required"));
        }

        for (name, bound) in &bounds {
            if !bound.min.is_finite() || !bound.max.is_finite() {
                return Err(TunerError::config(format!(
                    "parameter '{}' has a non-finite bound [{}, {}]",
                    name, bound.min, bound.max
                )));
            }
            if bound.min > bound.max {
                return Err(TunerError::config(format!(
                    "parameter '{}' has min {} greater than max {}",
                    name, bound.min, bound.max
                )));
            }
            if !bound.width().is_finite() {
                return Err(TunerError::config(format!(
                    "parameter '{}' has a range [{}, {}] too wide to sample",
                    name, bound.min, bound.max
                )));
            }
        }

        Ok(Self { bounds })
    }

    /// Convenience constructor from `(name, min, max)` triples.
    pub fn from_ranges<'a, I>(ranges: I) -> TunerResult<Self>
    where
        I: IntoIterator<Item = (&'a str, f64, f64)>,
    {
        let bounds = ranges
            .into_iter()
            .map(|(name, min, max)| (name.to_string(), ParameterBound::new(min, max)))
            .collect();
        Self::new(bounds)
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterBound> {
        self.bounds.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterBound)> {
        self.bounds.iter()
    }

    /// Draws every parameter uniformly within its bound.
    pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterSet {
        let values = self.bounds
            .iter()
            .map(|(name, bound)| {
                let value = if bound.width() > 0.0 {
                    rng.gen_range(bound.min..=bound.max)
                } else {
                    bound.min
                };
                (name.clone(), value)
            })
            .collect();

        ParameterSet { values }
    }

    /// Returns a copy of `params` restricted to the declared names and clamped into bounds.
    /// Missing parameters are filled with the bound midpoint.
    pub fn clamp(&self, params: &ParameterSet) -> ParameterSet {
        let values = self.bounds
            .iter()
            .map(|(name, bound)| {
                let value = params
                    .get(name)
                    .map(|v| bound.clamp(v))
                    .unwrap_or(bound.min + bound.width() / 2.0);
                (name.clone(), value)
            })
            .collect();

        ParameterSet { values }
    }

    /// True when every declared parameter is present and inside its bound.
    pub fn contains(&self, params: &ParameterSet) -> bool {
        self.bounds
            .iter()
            .all(|(name, bound)| params.get(name).is_some_and(|v| bound.contains(v)))
    }

    /// Maps a parameter set onto the unit cube, one coordinate per bound in name order.
    /// Degenerate bounds map to 0.5.
    pub fn normalize(&self, params: &ParameterSet) -> Vec<f64> {
        self.bounds
            .iter()
            .map(|(name, bound)| {
                let value = params.get(name).unwrap_or(bound.min);
                if bound.width() > 0.0 {
                    ((value - bound.min) / bound.width()).clamp(0.0, 1.0)
                } else {
                    0.5
                }
            })
            .collect()
    }
}

/// One candidate configuration of a strategy's numeric knobs.
/// Always owned: recombination builds new sets instead of sharing storage.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, f64>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self { values: BTreeMap::new() }
    }

    /// Sets a single parameter value.
    pub fn with_value(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Key used by the fitness cache. Two sets share a key only if every value is bit-identical.
    pub fn cache_key(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for (name, value) in &self.values {
            name.hash(&mut hasher);
            value.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Generates a human-readable string representation for logging and display.
    pub fn format_for_display(&self) -> String {
        if self.values.is_empty() {
            return "{}".to_string();
        }

        let params_str = self.values
            .iter()
            .map(|(k, v)| format!("'{}': {:.6}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{}}}", params_str)
    }
}
