//! Label catalog: model output index to display name
//!
//! Reads the AudioSet `class_labels_indices.csv` layout
//! (`index,mid,display_name`, header row, quoted names may contain commas)
//! or a plain file with one label per line.

use std::path::Path;
use tracing::debug;

use crate::error::{Result, TaggerError};

/// Ordered list of class names, index-aligned with the model outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCatalog {
    labels: Vec<String>,
}

impl LabelCatalog {
    /// Build from names already in output order
    pub fn from_labels(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(TaggerError::Labels("catalog is empty".into()));
        }
        Ok(Self { labels })
    }

    /// Load a catalog file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TaggerError::Labels(format!("cannot read {}: {e}", path.display()))
        })?;
        let catalog = Self::parse(&text)?;
        debug!("Loaded {} labels from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Parse catalog text in either supported layout
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty()).peekable();

        let is_csv = lines
            .peek()
            .map(|first| split_csv_line(first).len() >= 3)
            .unwrap_or(false);

        if !is_csv {
            return Self::from_labels(lines.map(|l| l.trim().to_string()).collect());
        }

        let mut labels = Vec::new();
        for (row, line) in lines.enumerate() {
            let fields = split_csv_line(line);
            if fields.len() < 3 {
                return Err(TaggerError::Labels(format!(
                    "row {}: expected 3 fields, found {}",
                    row + 1,
                    fields.len()
                )));
            }

            let index = match fields[0].trim().parse::<usize>() {
                Ok(index) => index,
                // Header row
                Err(_) if row == 0 => continue,
                Err(_) => {
                    return Err(TaggerError::Labels(format!(
                        "row {}: invalid index {:?}",
                        row + 1,
                        fields[0]
                    )))
                }
            };
            if index != labels.len() {
                return Err(TaggerError::Labels(format!(
                    "row {}: index {} out of order, expected {}",
                    row + 1,
                    index,
                    labels.len()
                )));
            }
            labels.push(fields[2].trim().to_string());
        }

        Self::from_labels(labels)
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True for an empty catalog
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Display name for an output index
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Labels in index order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

/// Split one CSV record, honoring double quotes and `""` escapes
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUDIOSET_HEAD: &str = "index,mid,display_name\n\
0,/m/09x0r,\"Speech\"\n\
1,/m/05zppz,\"Male speech, man speaking\"\n\
2,/m/02zsn,\"Female speech, woman speaking\"\n";

    #[test]
    fn test_parse_audioset_csv() {
        let catalog = LabelCatalog::parse(AUDIOSET_HEAD).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.get(0), Some("Speech"));
        assert_eq!(catalog.get(1), Some("Male speech, man speaking"));
        assert_eq!(catalog.get(3), None);
    }

    #[test]
    fn test_parse_plain_lines() {
        let catalog = LabelCatalog::parse("Music\nSpeech\n\nDog\n").unwrap();
        let labels: Vec<_> = catalog.iter().collect();
        assert_eq!(labels, vec!["Music", "Speech", "Dog"]);
    }

    #[test]
    fn test_rejects_gap_in_index() {
        let text = "index,mid,display_name\n0,/m/a,A\n2,/m/b,B\n";
        assert!(matches!(
            LabelCatalog::parse(text),
            Err(TaggerError::Labels(_))
        ));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(LabelCatalog::parse("").is_err());
        assert!(LabelCatalog::parse("index,mid,display_name\n").is_err());
    }

    #[test]
    fn test_split_csv_escapes() {
        assert_eq!(
            split_csv_line("3,/m/x,\"Say \"\"hi\"\", please\"\r"),
            vec!["3", "/m/x", "Say \"hi\", please"]
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        std::fs::write(&path, AUDIOSET_HEAD).unwrap();
        assert_eq!(LabelCatalog::load(&path).unwrap().len(), 3);
    }
}
