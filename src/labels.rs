use crate::error::ConfigError;
use crate::frame::{Column, Scalar};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct LabelFile {
    label: Vec<Map<String, Value>>,
}

/// Metadata for one subject, attribute order as written in the label file.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectLabel {
    pub id: String,
    pub attributes: Vec<(String, Option<Scalar>)>,
}

impl SubjectLabel {
    pub fn attribute(&self, name: &str) -> Option<&Scalar> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_ref())
    }

    /// Constant categorical columns (`id` first) sized for a recording.
    pub fn columns(&self, len: usize) -> Vec<Column> {
        let mut columns = Vec::with_capacity(self.attributes.len() + 1);
        columns.push(Column::constant(
            "id",
            Some(Scalar::Text(self.id.clone())),
            len,
        ));
        for (name, value) in &self.attributes {
            columns.push(Column::constant(name.clone(), value.clone(), len));
        }
        columns
    }

    fn from_entry(entry: Map<String, Value>) -> Option<Self> {
        let mut id = None;
        let mut attributes = Vec::new();
        for (key, value) in entry {
            if key == "id" {
                id = scalar_from_json(&value).map(|s| s.to_string());
            } else {
                attributes.push((key, scalar_from_json(&value)));
            }
        }
        id.map(|id| SubjectLabel { id, attributes })
    }
}

fn scalar_from_json(value: &Value) -> Option<Scalar> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Scalar::Bool(*b)),
        Value::Number(n) => n.as_f64().map(Scalar::Number),
        Value::String(s) => Some(Scalar::Text(s.clone())),
        other => Some(Scalar::Text(other.to_string())),
    }
}

/// Subject metadata keyed by upper-cased id. Built once, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    by_id: HashMap<String, SubjectLabel>,
}

impl LabelTable {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file =
            File::open(path).map_err(|_| ConfigError::MissingLabelTable(path.to_path_buf()))?;
        let parsed: LabelFile = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            ConfigError::InvalidLabelTable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let table = Self::from_entries(parsed.label);
        debug!("Loaded {} subject labels from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let parsed: LabelFile = serde_json::from_str(json)?;
        Ok(Self::from_entries(parsed.label))
    }

    fn from_entries(entries: Vec<Map<String, Value>>) -> Self {
        let mut by_id = HashMap::new();
        for entry in entries {
            let Some(label) = SubjectLabel::from_entry(entry) else {
                warn!("Skipping label entry without an id");
                continue;
            };
            let key = label.id.to_uppercase();
            if by_id.contains_key(&key) {
                warn!("Duplicate label for subject {}, keeping the first", label.id);
                continue;
            }
            by_id.insert(key, label);
        }
        Self { by_id }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, subject_id: &str) -> Option<&SubjectLabel> {
        self.by_id.get(&subject_id.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Subject id from a recording filename: the token before the first `_`,
/// upper-cased. Files without an underscore use their whole stem.
pub fn subject_id_from_filename(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let token = stem.split('_').next().unwrap_or(stem).trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const LABELS: &str = r#"{"label": [
        {"id": "S01", "gender": "F", "type": "A", "sleep": 7, "bmi": 22.5, "bmi_category": "normal"},
        {"id": "s02", "gender": "M", "bmi": null},
        {"id": "S01", "gender": "X"}
    ]}"#;

    #[test]
    fn lookup_is_case_insensitive_and_first_duplicate_wins() {
        let table = LabelTable::from_json_str(LABELS).unwrap();
        assert_eq!(table.len(), 2);
        let s01 = table.get("s01").unwrap();
        assert_eq!(s01.attribute("gender"), Some(&Scalar::Text("F".into())));
        assert_eq!(s01.attribute("bmi"), Some(&Scalar::Number(22.5)));
        assert!(table.get("S02").unwrap().attribute("bmi").is_none());
        assert!(table.get("S03").is_none());
    }

    #[test]
    fn attributes_keep_file_order() {
        let table = LabelTable::from_json_str(LABELS).unwrap();
        let names: Vec<_> = table
            .get("S01")
            .unwrap()
            .columns(3)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["id", "gender", "type", "sleep", "bmi", "bmi_category"]);
    }

    #[test]
    fn subject_id_is_first_token_upper_cased() {
        assert_eq!(
            subject_id_from_filename(&PathBuf::from("Raw/eda/s01_eda_2023.csv")).as_deref(),
            Some("S01")
        );
        assert_eq!(
            subject_id_from_filename(&PathBuf::from("p7.csv")).as_deref(),
            Some("P7")
        );
        assert_eq!(subject_id_from_filename(&PathBuf::from("_x.csv")), None);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = LabelTable::load(Path::new("/nonexistent/label.json")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingLabelTable(_)));
    }
}
