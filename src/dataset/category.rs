use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A drawable category as described by the kiosk's dataset metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

impl Category {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            desc: None,
        }
    }
}

/// Ordered category names; position defines the one-hot and confidence index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelSet {
    /// Build from names, keeping the first occurrence of duplicates.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for name in names {
            let name = name.into();
            if set.index.contains_key(&name) {
                continue;
            }
            set.index.insert(name.clone(), set.names.len());
            set.names.push(name);
        }
        set
    }

    pub fn from_categories(categories: &[Category]) -> Self {
        Self::new(categories.iter().map(|category| category.name.clone()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// One-hot target row for `label`, or `None` if it is not in the set.
    pub fn one_hot(&self, label: &str) -> Option<Vec<f32>> {
        let idx = self.index_of(label)?;
        let mut row = vec![0.0; self.len()];
        row[idx] = 1.0;
        Some(row)
    }
}
