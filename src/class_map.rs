//! Gesture label <-> class id bookkeeping.
//!
//! On disk the map is a JSON object of label to id, e.g.
//! `{"Hello": 0, "Yes": 1, "No": 2}`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::GestureError;

/// Append-only label -> id map. Ids are assigned in first-seen order and are
/// never reassigned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassMap {
    ids: HashMap<String, usize>,
    /// labels[id] == label for ids assigned by this map
    labels: Vec<String>,
}

impl ClassMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `label`, assigning the next unused id if it is new.
    pub fn get_or_insert(&mut self, label: &str) -> usize {
        if let Some(&id) = self.ids.get(label) {
            return id;
        }
        let id = self.labels.len();
        self.ids.insert(label.to_string(), id);
        self.labels.push(label.to_string());
        id
    }

    pub fn id(&self, label: &str) -> Option<usize> {
        self.ids.get(label).copied()
    }

    pub fn label(&self, id: usize) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels in id order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn to_json(&self) -> Result<String> {
        // Emit in id order so the file reads naturally
        let mut out = serde_json::Map::new();
        for (id, label) in self.labels.iter().enumerate() {
            out.insert(label.clone(), serde_json::Value::from(id));
        }
        Ok(serde_json::to_string_pretty(&serde_json::Value::Object(out))?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write class map {}", path.display()))?;
        Ok(())
    }
}

/// id -> label lookup used while serving.
///
/// Built from a class map file; ids need not be contiguous.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReverseClassMap {
    labels: BTreeMap<usize, String>,
}

impl ReverseClassMap {
    /// Parse a label -> id JSON object. Duplicate ids are rejected.
    pub fn from_json(json: &str) -> Result<Self, GestureError> {
        let parsed: HashMap<String, usize> = serde_json::from_str(json)
            .map_err(|e| GestureError::artifact("<class map>", e))?;
        Self::from_pairs(parsed)
    }

    pub fn from_pairs<I>(pairs: I) -> Result<Self, GestureError>
    where
        I: IntoIterator<Item = (String, usize)>,
    {
        let mut labels = BTreeMap::new();
        for (label, id) in pairs {
            if let Some(existing) = labels.insert(id, label.clone()) {
                return Err(GestureError::artifact(
                    "<class map>",
                    format!("id {} used by both {:?} and {:?}", id, existing, label),
                ));
            }
        }
        Ok(Self { labels })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GestureError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| GestureError::artifact(path, e))?;
        Self::from_json(&json).map_err(|e| match e {
            GestureError::ArtifactLoadFailure { reason, .. } => GestureError::artifact(path, reason),
            other => other,
        })
    }

    pub fn label_for(&self, id: usize) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl From<&ClassMap> for ReverseClassMap {
    fn from(map: &ClassMap) -> Self {
        let labels = map
            .labels()
            .iter()
            .enumerate()
            .map(|(id, label)| (id, label.clone()))
            .collect();
        Self { labels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_first_seen_order() {
        let mut map = ClassMap::new();
        assert_eq!(map.get_or_insert("Hello"), 0);
        assert_eq!(map.get_or_insert("Yes"), 1);
        assert_eq!(map.get_or_insert("Hello"), 0);
        assert_eq!(map.get_or_insert("No"), 2);
        assert_eq!(map.len(), 3);
        assert_eq!(map.labels(), &["Hello", "Yes", "No"]);
        assert_eq!(map.id("No"), Some(2));
        assert_eq!(map.label(1), Some("Yes"));
        assert_eq!(map.label(3), None);
    }

    #[test]
    fn test_json_round_trip_through_reverse_map() {
        let mut map = ClassMap::new();
        for label in ["Hello", "Yes", "No"] {
            map.get_or_insert(label);
        }
        let json = map.to_json().unwrap();
        let reverse = ReverseClassMap::from_json(&json).unwrap();
        assert_eq!(reverse, ReverseClassMap::from(&map));
        assert_eq!(reverse.label_for(2), Some("No"));
    }

    #[test]
    fn test_reverse_map_unknown_index() {
        let reverse = ReverseClassMap::from_json(r#"{"Hello":0,"Yes":1,"No":2}"#).unwrap();
        assert_eq!(reverse.len(), 3);
        assert_eq!(reverse.label_for(3), None);
    }

    #[test]
    fn test_reverse_map_accepts_gaps() {
        let reverse = ReverseClassMap::from_json(r#"{"Hello":0,"Thanks":5}"#).unwrap();
        assert_eq!(reverse.label_for(5), Some("Thanks"));
        assert_eq!(reverse.label_for(1), None);
    }

    #[test]
    fn test_reverse_map_rejects_duplicate_ids() {
        let err = ReverseClassMap::from_json(r#"{"Hello":0,"Hi":0}"#).unwrap_err();
        assert!(matches!(err, GestureError::ArtifactLoadFailure { .. }), "{:?}", err);
    }

    #[test]
    fn test_reverse_map_rejects_garbage() {
        assert!(ReverseClassMap::from_json(r#"["Hello"]"#).is_err());
        assert!(ReverseClassMap::from_json(r#"{"Hello":-1}"#).is_err());
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let err = ReverseClassMap::load("/nonexistent/classes.json").unwrap_err();
        match err {
            GestureError::ArtifactLoadFailure { path, .. } => {
                assert_eq!(path, std::path::PathBuf::from("/nonexistent/classes.json"))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
