//! Partitioned tabular data passed into and out of classifiers.
//!
//! A [`Dataset`] is an ordered list of partitions plus an ordered column
//! schema. Rows are JSON objects. Classifiers append columns; they never
//! rewrite a column that is already in the schema.

use std::io::{BufRead, Write};

use serde_json::{Map, Value};

use crate::classifier::ClassifierError;

/// One row: column name to value.
pub type Record = Map<String, Value>;

/// A contiguous shard of rows, processed as a unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    records: Vec<Record>,
}

impl Partition {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    partitions: Vec<Partition>,
}

impl Dataset {
    /// An empty dataset with the given schema.
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, partitions: Vec::new() }
    }

    /// Splits `records` into partitions of at most `partition_size` rows. A
    /// size of 0 keeps everything in one partition. The schema is the union of
    /// record keys in first-seen order.
    pub fn from_records(records: Vec<Record>, partition_size: usize) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, partitions: split(records, partition_size) }
    }

    /// Builds a single-column dataset of strings.
    pub fn from_texts<S: Into<String>>(
        field: &str,
        texts: impl IntoIterator<Item = S>,
        partition_size: usize,
    ) -> Self {
        let records = texts.into_iter()
            .map(|text| {
                let mut record = Record::new();
                record.insert(field.to_string(), Value::String(text.into()));
                record
            })
            .collect();
        let mut dataset = Self::from_records(records, partition_size);
        if dataset.columns.is_empty() {
            dataset.columns.push(field.to_string());
        }
        dataset
    }

    /// Reads one JSON object per line. Blank lines are skipped.
    pub fn read_jsonl<R: BufRead>(reader: R, partition_size: usize) -> Result<Self, ClassifierError> {
        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| {
                ClassifierError::DatasetError(format!("Failed to read line {}: {}", line_no + 1, e))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line).map_err(|e| {
                ClassifierError::DatasetError(format!("Invalid JSON on line {}: {}", line_no + 1, e))
            })?;
            match value {
                Value::Object(record) => records.push(record),
                other => {
                    return Err(ClassifierError::DatasetError(format!(
                        "Line {} is not a JSON object: {}", line_no + 1, other
                    )))
                }
            }
        }
        Ok(Self::from_records(records, partition_size))
    }

    /// Writes one JSON object per line, partitions in order.
    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> Result<(), ClassifierError> {
        for record in self.records() {
            serde_json::to_writer(&mut writer, record)
                .map_err(|e| ClassifierError::DatasetError(format!("Failed to serialize record: {}", e)))?;
            writer.write_all(b"\n")
                .map_err(|e| ClassifierError::DatasetError(format!("Failed to write record: {}", e)))?;
        }
        writer.flush()
            .map_err(|e| ClassifierError::DatasetError(format!("Failed to flush output: {}", e)))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Total number of rows across partitions.
    pub fn len(&self) -> usize {
        self.partitions.iter().map(Partition::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.partitions.iter().flat_map(|p| p.records.iter())
    }

    /// Values of one column in row order; `None` where a row lacks it.
    pub fn column(&self, name: &str) -> Vec<Option<&Value>> {
        self.records().map(|r| r.get(name)).collect()
    }

    /// Re-splits the rows into partitions of at most `partition_size`.
    pub fn repartition(self, partition_size: usize) -> Self {
        let records = self.partitions.into_iter().flat_map(Partition::into_records).collect();
        Self { columns: self.columns, partitions: split(records, partition_size) }
    }

    /// Appends columns to the schema.
    ///
    /// # Errors
    /// - `ConfigurationError` if a column is already present or listed twice
    pub fn append_columns(&mut self, names: &[&str]) -> Result<(), ClassifierError> {
        for (i, name) in names.iter().enumerate() {
            if self.has_column(name) || names[..i].contains(name) {
                return Err(ClassifierError::ConfigurationError(format!(
                    "Column '{}' already exists; result columns are never overwritten", name
                )));
            }
        }
        self.columns.extend(names.iter().map(|n| n.to_string()));
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<Partition>) {
        (self.columns, self.partitions)
    }

    pub(crate) fn from_parts(columns: Vec<String>, partitions: Vec<Partition>) -> Self {
        Self { columns, partitions }
    }
}

fn split(records: Vec<Record>, partition_size: usize) -> Vec<Partition> {
    if records.is_empty() {
        return Vec::new();
    }
    if partition_size == 0 {
        return vec![Partition::new(records)];
    }
    let mut partitions = Vec::with_capacity(records.len().div_ceil(partition_size));
    let mut current = Vec::with_capacity(partition_size);
    for record in records {
        current.push(record);
        if current.len() == partition_size {
            partitions.push(Partition::new(std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        partitions.push(Partition::new(current));
    }
    partitions
}
