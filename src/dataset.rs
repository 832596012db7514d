//! Datasets of labeled and unlabeled examples.
//!
//! A [`Dataset`] is an ordered pool of [`Example`]s sharing one [`Schema`].
//! Three datasets are live during an active-learning run (labeled, unlabeled
//! and test), bundled together as [`Pools`].
//!
//! Batch removal always happens in descending index order so that earlier
//! removals never shift the positions of indices still waiting to be removed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Errors raised by dataset operations
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Index {index} out of bounds for pool of size {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Index {0} selected more than once")]
    DuplicateIndex(usize),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid record on line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },

    #[error("Dataset file is empty: {0}")]
    Empty(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Whether examples carry one class or a set of labels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    /// Exactly one class per example
    SingleLabel,
    /// Any subset of a fixed label set per example
    MultiLabel,
}

/// Attribute schema shared by every example of a dataset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schema {
    /// Number of features per example
    pub num_features: usize,
    /// Label kind
    pub kind: LabelKind,
    /// Class names (single-label) or label names (multi-label)
    pub label_names: Vec<String>,
}

impl Schema {
    /// Single-label schema over the given class names
    #[must_use]
    pub fn single_label(num_features: usize, classes: Vec<String>) -> Self {
        Self {
            num_features,
            kind: LabelKind::SingleLabel,
            label_names: classes,
        }
    }

    /// Multi-label schema over the given label names
    #[must_use]
    pub fn multi_label(num_features: usize, labels: Vec<String>) -> Self {
        Self {
            num_features,
            kind: LabelKind::MultiLabel,
            label_names: labels,
        }
    }

    /// Number of classes or labels
    #[must_use]
    pub fn num_labels(&self) -> usize {
        self.label_names.len()
    }

    /// Check that an example conforms to this schema
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` on a wrong feature count or label shape.
    pub fn check(&self, example: &Example) -> Result<(), DatasetError> {
        if example.features.len() != self.num_features {
            return Err(DatasetError::SchemaMismatch(format!(
                "expected {} features, found {}",
                self.num_features,
                example.features.len()
            )));
        }
        match (&example.label, self.kind) {
            (Label::Single(class), LabelKind::SingleLabel) if *class < self.num_labels() => Ok(()),
            (Label::Multi(labels), LabelKind::MultiLabel) if labels.len() == self.num_labels() => {
                Ok(())
            }
            (label, kind) => Err(DatasetError::SchemaMismatch(format!(
                "label {label:?} does not fit a {kind:?} schema with {} labels",
                self.num_labels()
            ))),
        }
    }
}

/// Label of one example
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Label {
    /// Class index into the schema's label names
    Single(usize),
    /// Relevance flag per schema label
    Multi(Vec<bool>),
}

/// One example: a fixed-length feature vector plus its label
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Example {
    /// Feature values
    pub features: Vec<f64>,
    /// Ground truth (hidden while the example sits in the unlabeled pool)
    pub label: Label,
}

impl Example {
    /// Single-label example
    #[must_use]
    pub fn single(features: Vec<f64>, class: usize) -> Self {
        Self {
            features,
            label: Label::Single(class),
        }
    }

    /// Multi-label example
    #[must_use]
    pub fn multi(features: Vec<f64>, labels: Vec<bool>) -> Self {
        Self {
            features,
            label: Label::Multi(labels),
        }
    }

    /// Class index of a single-label example
    #[must_use]
    pub const fn class(&self) -> Option<usize> {
        match self.label {
            Label::Single(class) => Some(class),
            Label::Multi(_) => None,
        }
    }

    /// Relevance flags of a multi-label example
    #[must_use]
    pub fn labels(&self) -> Option<&[bool]> {
        match &self.label {
            Label::Multi(labels) => Some(labels),
            Label::Single(_) => None,
        }
    }
}

/// Ordered collection of examples sharing one schema
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    schema: Schema,
    examples: Vec<Example>,
}

impl Dataset {
    /// Create an empty dataset
    #[must_use]
    pub const fn new(schema: Schema) -> Self {
        Self {
            schema,
            examples: Vec::new(),
        }
    }

    /// Create a dataset from examples, checking each against the schema
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if any example does not fit the schema.
    pub fn from_examples(schema: Schema, examples: Vec<Example>) -> Result<Self, DatasetError> {
        for example in &examples {
            schema.check(example)?;
        }
        Ok(Self { schema, examples })
    }

    /// Load a dataset from a JSON Lines file
    ///
    /// Each line holds `{"features": [..], "label": "a"}` for single-label
    /// data or `{"features": [..], "labels": ["a", "b"]}` for multi-label
    /// data. Label names are sorted so loading is deterministic.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a line is malformed,
    /// or examples disagree on the feature count.
    pub fn load_jsonl<P: AsRef<Path>>(path: P, kind: LabelKind) -> Result<Self, DatasetError> {
        let records = read_jsonl(path.as_ref())?;
        let schema = schema_of(&[&records], kind);
        Self::from_records(schema, records)
    }

    /// Load a training and a test file sharing one label vocabulary
    ///
    /// # Errors
    ///
    /// As [`Dataset::load_jsonl`], and `SchemaMismatch` if the two files
    /// disagree on the feature count.
    pub fn load_jsonl_split<P: AsRef<Path>, Q: AsRef<Path>>(
        train: P,
        test: Q,
        kind: LabelKind,
    ) -> Result<(Self, Self), DatasetError> {
        let train = read_jsonl(train.as_ref())?;
        let test = read_jsonl(test.as_ref())?;
        let schema = schema_of(&[&train, &test], kind);
        Ok((
            Self::from_records(schema.clone(), train)?,
            Self::from_records(schema, test)?,
        ))
    }

    fn from_records(schema: Schema, records: Vec<(usize, JsonlRecord)>) -> Result<Self, DatasetError> {
        let mut examples = Vec::with_capacity(records.len());
        for (line, record) in records {
            examples.push(record.into_example(&schema, line)?);
        }
        Self::from_examples(schema, examples)
    }

    /// Shared schema
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of examples
    #[must_use]
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Whether the dataset holds no examples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Example at position `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Example> {
        self.examples.get(index)
    }

    /// Mutable example at position `index`
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Example> {
        self.examples.get_mut(index)
    }

    /// Replace the example at `index`
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is out of bounds or the example does not
    /// fit the schema.
    pub fn set(&mut self, index: usize, example: Example) -> Result<(), DatasetError> {
        self.schema.check(&example)?;
        let len = self.examples.len();
        let slot = self
            .examples
            .get_mut(index)
            .ok_or(DatasetError::IndexOutOfBounds { index, len })?;
        *slot = example;
        Ok(())
    }

    /// Append an example
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the example does not fit the schema.
    pub fn append(&mut self, example: Example) -> Result<(), DatasetError> {
        self.schema.check(&example)?;
        self.examples.push(example);
        Ok(())
    }

    /// Remove and return the example at `index`
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if `index` is past the end.
    pub fn remove_at(&mut self, index: usize) -> Result<Example, DatasetError> {
        if index >= self.examples.len() {
            return Err(DatasetError::IndexOutOfBounds {
                index,
                len: self.examples.len(),
            });
        }
        Ok(self.examples.remove(index))
    }

    /// Independent copy of this dataset
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Append every example of `other`
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the schemas differ.
    pub fn concat(&mut self, other: &Self) -> Result<(), DatasetError> {
        if self.schema != other.schema {
            return Err(DatasetError::SchemaMismatch(
                "cannot concatenate datasets with different schemas".to_string(),
            ));
        }
        self.examples.extend(other.examples.iter().cloned());
        Ok(())
    }

    /// Subset of examples at the given positions, in the given order
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` for any position past the end.
    pub fn subset(&self, indices: &[usize]) -> Result<Self, DatasetError> {
        let len = self.examples.len();
        let examples = indices
            .iter()
            .map(|&index| {
                self.examples
                    .get(index)
                    .cloned()
                    .ok_or(DatasetError::IndexOutOfBounds { index, len })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            schema: self.schema.clone(),
            examples,
        })
    }

    /// Remove a batch of positions, returning the removed examples in the
    /// order the positions were given.
    ///
    /// Positions are validated up front (in bounds, no duplicates) and then
    /// removed in descending order.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` or `DuplicateIndex` without modifying the
    /// dataset.
    pub fn take_batch(&mut self, indices: &[usize]) -> Result<Vec<Example>, DatasetError> {
        validate_indices(indices, self.examples.len())?;

        let mut order: Vec<(usize, usize)> = indices.iter().copied().enumerate().collect();
        order.sort_by(|a, b| b.1.cmp(&a.1));

        let mut taken: Vec<Option<Example>> = vec![None; indices.len()];
        for (slot, index) in order {
            taken[slot] = Some(self.examples.remove(index));
        }

        Ok(taken.into_iter().flatten().collect())
    }

    /// Iterate over the examples in pool order
    pub fn iter(&self) -> std::slice::Iter<'_, Example> {
        self.examples.iter()
    }

    /// Class index of every example (single-label datasets)
    #[must_use]
    pub fn classes(&self) -> Vec<Option<usize>> {
        self.examples.iter().map(Example::class).collect()
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Example;
    type IntoIter = std::slice::Iter<'a, Example>;

    fn into_iter(self) -> Self::IntoIter {
        self.examples.iter()
    }
}

/// Non-empty lines of a JSON Lines file with their 1-based line numbers
fn read_jsonl(path: &Path) -> Result<Vec<(usize, JsonlRecord)>, DatasetError> {
    let file = std::fs::File::open(path)?;
    let mut records = Vec::new();

    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: JsonlRecord =
            serde_json::from_str(&line).map_err(|e| DatasetError::InvalidRecord {
                line: i + 1,
                reason: e.to_string(),
            })?;
        records.push((i + 1, record));
    }

    if records.is_empty() {
        return Err(DatasetError::Empty(path.display().to_string()));
    }
    Ok(records)
}

/// Schema over the sorted union of every file's label names; the feature
/// count comes from the first record
fn schema_of(files: &[&Vec<(usize, JsonlRecord)>], kind: LabelKind) -> Schema {
    let num_features = files
        .iter()
        .find_map(|records| records.first())
        .map_or(0, |(_, r)| r.features.len());
    let names: BTreeSet<&str> = files
        .iter()
        .flat_map(|records| records.iter())
        .flat_map(|(_, r)| match kind {
            LabelKind::SingleLabel => r.label.as_slice(),
            LabelKind::MultiLabel => r.labels.as_deref().unwrap_or_default(),
        })
        .map(String::as_str)
        .collect();

    Schema {
        num_features,
        kind,
        label_names: names.into_iter().map(str::to_string).collect(),
    }
}

/// Check a selection against a pool of size `len`
///
/// # Errors
///
/// Returns `IndexOutOfBounds` or `DuplicateIndex` on the first offending index.
pub fn validate_indices(indices: &[usize], len: usize) -> Result<(), DatasetError> {
    let mut seen = HashSet::with_capacity(indices.len());
    for &index in indices {
        if index >= len {
            return Err(DatasetError::IndexOutOfBounds { index, len });
        }
        if !seen.insert(index) {
            return Err(DatasetError::DuplicateIndex(index));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct JsonlRecord {
    features: Vec<f64>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    labels: Option<Vec<String>>,
}

impl JsonlRecord {
    fn into_example(self, schema: &Schema, line: usize) -> Result<Example, DatasetError> {
        let position = |name: &str| schema.label_names.iter().position(|n| n == name);

        let label = match schema.kind {
            LabelKind::SingleLabel => {
                let name = self.label.ok_or_else(|| DatasetError::InvalidRecord {
                    line,
                    reason: "missing \"label\" field".to_string(),
                })?;
                let class = position(&name).ok_or_else(|| DatasetError::InvalidRecord {
                    line,
                    reason: format!("unknown class {name}"),
                })?;
                Label::Single(class)
            }
            LabelKind::MultiLabel => {
                let names = self.labels.ok_or_else(|| DatasetError::InvalidRecord {
                    line,
                    reason: "missing \"labels\" field".to_string(),
                })?;
                let mut flags = vec![false; schema.num_labels()];
                for name in &names {
                    let j = position(name).ok_or_else(|| DatasetError::InvalidRecord {
                        line,
                        reason: format!("unknown label {name}"),
                    })?;
                    flags[j] = true;
                }
                Label::Multi(flags)
            }
        };

        if self.features.len() != schema.num_features {
            return Err(DatasetError::InvalidRecord {
                line,
                reason: format!(
                    "expected {} features, found {}",
                    schema.num_features,
                    self.features.len()
                ),
            });
        }

        Ok(Example {
            features: self.features,
            label,
        })
    }
}

/// The three datasets live during one active-learning run
#[derive(Debug, Clone)]
pub struct Pools {
    /// Examples whose labels are known to the learner
    pub labeled: Dataset,
    /// Candidate examples to query
    pub unlabeled: Dataset,
    /// Held-out evaluation examples
    pub test: Dataset,
}

impl Pools {
    /// Bundle the three pools, checking that they share one schema
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the schemas differ.
    pub fn new(labeled: Dataset, unlabeled: Dataset, test: Dataset) -> Result<Self, DatasetError> {
        if labeled.schema() != unlabeled.schema() || labeled.schema() != test.schema() {
            return Err(DatasetError::SchemaMismatch(
                "labeled, unlabeled and test pools must share one schema".to_string(),
            ));
        }
        Ok(Self {
            labeled,
            unlabeled,
            test,
        })
    }

    /// Shared schema
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        self.labeled.schema()
    }

    /// Labeled plus unlabeled size; constant over one run
    #[must_use]
    pub fn training_size(&self) -> usize {
        self.labeled.len() + self.unlabeled.len()
    }

    /// Move the selected unlabeled positions into the labeled pool
    ///
    /// # Errors
    ///
    /// Returns an error if the selection references positions outside the
    /// unlabeled pool or repeats a position; the pools are left untouched.
    pub fn move_to_labeled(&mut self, selected: &[usize]) -> Result<(), DatasetError> {
        let taken = self.unlabeled.take_batch(selected)?;
        for example in taken {
            self.labeled.append(example)?;
        }
        Ok(())
    }
}
