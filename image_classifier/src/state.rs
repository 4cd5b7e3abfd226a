use crate::config::{LabelsConfig, Validatable};
use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::BufReader,
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse labels file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid class index: {0}")]
    InvalidIndex(String),
    #[error("Missing label for class index {0}")]
    MissingIndex(usize),
    #[error("Labels file contains no classes")]
    Empty,
}

/// Class index to human-readable label, ordered by index.
#[derive(Debug, Clone)]
pub struct ClassLabelTable {
    labels: Vec<String>,
}

impl ClassLabelTable {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn from_config(labels_cfg: &LabelsConfig) -> Result<Self, LabelsError> {
        let table = load_imagenet_labels(&labels_cfg.get_path())?;
        tracing::info!("Loaded {} class labels", table.len());
        Ok(table)
    }

    /// Parses an `imagenet_class_index.json` document:
    /// `{"0": ["n01440764", "tench"], "1": [...], ...}`.
    pub fn from_json(json: &str) -> Result<Self, LabelsError> {
        let entries: HashMap<String, (String, String)> = serde_json::from_str(json)?;
        Self::from_entries(entries)
    }

    fn from_entries(entries: HashMap<String, (String, String)>) -> Result<Self, LabelsError> {
        if entries.is_empty() {
            return Err(LabelsError::Empty);
        }

        let mut indexed = BTreeMap::new();
        for (key, (_wordnet_id, label)) in entries {
            let index: usize = key
                .trim()
                .parse()
                .map_err(|_| LabelsError::InvalidIndex(key.clone()))?;
            indexed.insert(index, label);
        }

        let num_classes = indexed.len();
        let labels = (0..num_classes)
            .map(|index| indexed.remove(&index).ok_or(LabelsError::MissingIndex(index)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { labels })
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub fn load_imagenet_labels(filepath: &Path) -> Result<ClassLabelTable, LabelsError> {
    let file = File::open(filepath)?;
    let reader = BufReader::new(file);
    let entries: HashMap<String, (String, String)> = serde_json::from_reader(reader)?;
    ClassLabelTable::from_entries(entries)
}
