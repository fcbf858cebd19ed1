use std::fmt;

use serde::{Deserialize, Serialize};

use crate::browser::session::Selectable;

/// One chosen value per selectable, in discovery order. Identifies a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Combination(Vec<String>);

impl Combination {
    pub fn new(values: Vec<String>) -> Self {
        Self(values)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// This combination extended by one more value.
    pub fn with(&self, value: &str) -> Self {
        let mut values = self.0.clone();
        values.push(value.to_string());
        Self(values)
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(no selection)");
        }
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Number of combinations `enumerate_combinations` yields.
pub fn combination_count(selectables: &[Selectable]) -> usize {
    selectables.iter().map(|s| s.values.len()).product()
}

/// Cartesian product of the selectables' values in odometer order: the first
/// selectable varies slowest, the last fastest. No selectables yields a single
/// empty combination.
pub fn enumerate_combinations(selectables: &[Selectable]) -> Vec<Combination> {
    if selectables.iter().any(|s| s.values.is_empty()) {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(combination_count(selectables));
    let mut odometer = vec![0usize; selectables.len()];

    loop {
        out.push(Combination(
            selectables
                .iter()
                .zip(&odometer)
                .map(|(s, &i)| s.values[i].clone())
                .collect(),
        ));

        // advance the last dial, carrying leftwards
        let mut dial = selectables.len();
        loop {
            if dial == 0 {
                return out;
            }
            dial -= 1;
            odometer[dial] += 1;
            if odometer[dial] < selectables[dial].values.len() {
                break;
            }
            odometer[dial] = 0;
        }
    }
}
