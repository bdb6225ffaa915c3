use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value of a named per-event observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservableValue {
    Int(i64),
    Real(f64),
    Map(BTreeMap<i32, f64>),
}

impl ObservableValue {
    /// Scalar view used by cuts; maps have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ObservableValue::Int(value) => Some(*value as f64),
            ObservableValue::Real(value) => Some(*value),
            ObservableValue::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<i32, f64>> {
        match self {
            ObservableValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<i64> for ObservableValue {
    fn from(value: i64) -> Self {
        ObservableValue::Int(value)
    }
}

impl From<f64> for ObservableValue {
    fn from(value: f64) -> Self {
        ObservableValue::Real(value)
    }
}

impl From<BTreeMap<i32, f64>> for ObservableValue {
    fn from(value: BTreeMap<i32, f64>) -> Self {
        ObservableValue::Map(value)
    }
}

/// Ordered table of named observables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Observables {
    values: BTreeMap<String, ObservableValue>,
}

impl Observables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ObservableValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ObservableValue> {
        self.values.get(name)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ObservableValue::as_f64)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ObservableValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// Copies every entry of `other` under `<prefix>_<name>`.
    pub fn merge_prefixed(&mut self, prefix: &str, other: &Observables) {
        for (name, value) in other.iter() {
            self.values
                .insert(format!("{}_{}", prefix, name), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ObservableValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_views() {
        let mut observables = Observables::new();
        observables.set("tag_id", 12i64);
        observables.set("sigma", 0.5);
        observables.set("amplitudes", BTreeMap::from([(3, 1.0)]));

        assert_eq!(observables.get_i64("tag_id"), Some(12));
        assert_eq!(observables.get_f64("tag_id"), Some(12.0));
        assert_eq!(observables.get_f64("sigma"), Some(0.5));
        assert_eq!(observables.get_f64("amplitudes"), None);
        assert_eq!(observables.get_f64("missing"), None);
    }

    #[test]
    fn merge_prefixes_names() {
        let mut stage = Observables::new();
        stage.set("detector_side", 2i64);
        let mut table = Observables::new();
        table.merge_prefixed("sides", &stage);
        assert_eq!(table.get_i64("sides_detector_side"), Some(2));
    }
}
