//! Class taxonomy: which detector labels are selected, actuated, counted and
//! reported.
//!
//! Defaults reproduce the appliance's field setup. Note that the `dogs`
//! counter is fed by the `pig` label there; the mapping is data here so a
//! corrected model taxonomy only needs a profile change.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unordered set of labels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassSet(HashSet<String>);

impl ClassSet {
    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ClassSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Label driving each of the three output channels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActuationLabels {
    pub a: String,
    pub b: String,
    pub c: String,
}

impl Default for ActuationLabels {
    fn default() -> Self {
        Self {
            a: "cow".into(),
            b: "sheep".into(),
            c: "horse".into(),
        }
    }
}

/// Counters exposed in the metrics snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackedClass {
    Cows,
    Dogs,
    Sheep,
}

/// Labels feeding each counter. A label listed under several counters only
/// increments the first one, in `cows`, `dogs`, `sheep` order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CounterLabels {
    pub cows: Vec<String>,
    pub dogs: Vec<String>,
    pub sheep: Vec<String>,
}

impl Default for CounterLabels {
    fn default() -> Self {
        Self {
            cows: vec!["cow".into()],
            dogs: vec!["pig".into()],
            sheep: vec!["sheep".into()],
        }
    }
}

impl CounterLabels {
    pub fn classify(&self, label: &str) -> Option<TrackedClass> {
        let listed = |labels: &[String]| labels.iter().any(|l| l == label);
        if listed(&self.cows) {
            Some(TrackedClass::Cows)
        } else if listed(&self.dogs) {
            Some(TrackedClass::Dogs)
        } else if listed(&self.sheep) {
            Some(TrackedClass::Sheep)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Taxonomy {
    /// Labels eligible as the dominant entity of a frame.
    pub interest: ClassSet,
    pub actuation: ActuationLabels,
    pub counters: CounterLabels,
    /// Labels eligible for `largest_animal` in the metrics snapshot.
    pub reportable: ClassSet,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self {
            interest: ["cow", "sheep", "horse"].into_iter().collect(),
            actuation: ActuationLabels::default(),
            counters: CounterLabels::default(),
            reportable: ["cow", "pig", "sheep", "horse"].into_iter().collect(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaxonomyError {
    #[error("actuation label for channel {0} is empty")]
    EmptyActuationLabel(char),
    #[error("label {0:?} is assigned to more than one actuation channel")]
    DuplicateActuationLabel(String),
}

impl Taxonomy {
    pub fn validate(&self) -> Result<(), TaxonomyError> {
        let ActuationLabels { a, b, c } = &self.actuation;
        for (channel, label) in [('a', a), ('b', b), ('c', c)] {
            if label.trim().is_empty() {
                return Err(TaxonomyError::EmptyActuationLabel(channel));
            }
        }
        if a == b || a == c {
            return Err(TaxonomyError::DuplicateActuationLabel(a.clone()));
        }
        if b == c {
            return Err(TaxonomyError::DuplicateActuationLabel(b.clone()));
        }
        Ok(())
    }
}
