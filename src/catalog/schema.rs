use crate::catalog::types::ColumnType;
use crate::error::KvRelError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const MAX_TABLE_NAME_LEN: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// How members of an ordered index are scored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexOrder {
    /// Score is the value of a timestamp or integer column.
    Column(String),
    /// Score is a per-table sequence assigned on first insert.
    Insertion,
}

/// What a row contributes as group key(s) to an index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexKey {
    /// One group per row, formed from the listed column values.
    Columns(Vec<String>),
    /// One group per top-level entry of a JSON object column, as `[key, value]`.
    JsonEntries(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDef {
    pub index_name: String,
    pub key: IndexKey,
    pub order: IndexOrder,
    /// Keep a directory of distinct group values, which prefix lookups need.
    pub track_groups: bool,
}

impl IndexDef {
    pub fn columns(index_name: impl Into<String>, columns: &[&str], order: IndexOrder) -> Self {
        Self {
            index_name: index_name.into(),
            key: IndexKey::Columns(columns.iter().map(|c| (*c).to_string()).collect()),
            order,
            track_groups: false,
        }
    }

    pub fn json_entries(
        index_name: impl Into<String>,
        column: impl Into<String>,
        order: IndexOrder,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            key: IndexKey::JsonEntries(column.into()),
            order,
            track_groups: false,
        }
    }

    pub fn with_group_directory(mut self) -> Self {
        self.track_groups = true;
        self
    }

    pub fn key_columns(&self) -> Vec<&str> {
        match &self.key {
            IndexKey::Columns(cols) => cols.iter().map(String::as_str).collect(),
            IndexKey::JsonEntries(col) => vec![col.as_str()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    /// Ordering of the table's row registry.
    pub order: IndexOrder,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            order: IndexOrder::Insertion,
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    pub fn ordered_by(mut self, column: impl Into<String>) -> Self {
        self.order = IndexOrder::Column(column.into());
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn find_index(&self, index_name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.index_name == index_name)
    }

    pub fn uses_insertion_order(&self) -> bool {
        self.order == IndexOrder::Insertion
            || self.indexes.iter().any(|i| i.order == IndexOrder::Insertion)
    }

    pub fn validate(&self) -> Result<(), KvRelError> {
        let invalid = |reason: String| KvRelError::InvalidSchema {
            table: self.table_name.clone(),
            reason,
        };
        if !is_valid_table_name(&self.table_name) {
            return Err(invalid(format!(
                "table name must be 1..={MAX_TABLE_NAME_LEN} chars of [A-Za-z0-9_-] and not start with '__'"
            )));
        }
        if self.columns.is_empty() {
            return Err(invalid("at least one column is required".into()));
        }
        let mut seen = BTreeSet::new();
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(invalid("column names must not be empty".into()));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(invalid(format!("duplicate column '{}'", column.name)));
            }
        }
        if self.primary_key.is_empty() {
            return Err(invalid("primary key must name at least one column".into()));
        }
        for pk in &self.primary_key {
            let column = self
                .find_column(pk)
                .ok_or_else(|| invalid(format!("primary key column '{pk}' is not declared")))?;
            if column.nullable {
                return Err(invalid(format!("primary key column '{pk}' cannot be nullable")));
            }
        }
        self.validate_order(&self.order)?;
        let mut index_names = BTreeSet::new();
        for index in &self.indexes {
            if index.index_name.is_empty() || index.index_name.starts_with("__") {
                return Err(invalid(format!(
                    "index name '{}' is empty or reserved",
                    index.index_name
                )));
            }
            if !index_names.insert(index.index_name.as_str()) {
                return Err(invalid(format!("duplicate index '{}'", index.index_name)));
            }
            match &index.key {
                IndexKey::Columns(cols) => {
                    if cols.is_empty() {
                        return Err(invalid(format!(
                            "index '{}' has no key columns",
                            index.index_name
                        )));
                    }
                    for col in cols {
                        if self.find_column(col).is_none() {
                            return Err(invalid(format!(
                                "index '{}' references undeclared column '{col}'",
                                index.index_name
                            )));
                        }
                    }
                }
                IndexKey::JsonEntries(col) => match self.find_column(col) {
                    Some(c) if c.col_type == ColumnType::Json => {}
                    Some(_) => {
                        return Err(invalid(format!(
                            "index '{}' needs a json column, '{col}' is not one",
                            index.index_name
                        )));
                    }
                    None => {
                        return Err(invalid(format!(
                            "index '{}' references undeclared column '{col}'",
                            index.index_name
                        )));
                    }
                },
            }
            self.validate_order(&index.order)?;
        }
        Ok(())
    }

    fn validate_order(&self, order: &IndexOrder) -> Result<(), KvRelError> {
        let IndexOrder::Column(col) = order else {
            return Ok(());
        };
        match self.find_column(col) {
            Some(c) if c.col_type.is_orderable() => Ok(()),
            Some(c) => Err(KvRelError::InvalidSchema {
                table: self.table_name.clone(),
                reason: format!(
                    "ordering column '{col}' has type {}, expected timestamp or integer",
                    c.col_type.as_str()
                ),
            }),
            None => Err(KvRelError::InvalidSchema {
                table: self.table_name.clone(),
                reason: format!("ordering column '{col}' is not declared"),
            }),
        }
    }

    /// Checks a redeclaration of an existing table. Returns `None` when nothing
    /// changes and the merged schema when `incoming` adds nullable columns.
    pub fn merge_redeclaration(
        &self,
        incoming: &TableSchema,
    ) -> Result<Option<TableSchema>, KvRelError> {
        let incompatible = |reason: String| KvRelError::IncompatibleSchema {
            table: self.table_name.clone(),
            reason,
        };
        if incoming.primary_key != self.primary_key {
            return Err(incompatible(format!(
                "primary key {:?} differs from declared {:?}",
                incoming.primary_key, self.primary_key
            )));
        }
        if incoming.order != self.order {
            return Err(incompatible("table ordering differs".into()));
        }
        if incoming.indexes != self.indexes {
            return Err(incompatible("index definitions differ".into()));
        }

        let mut merged = self.clone();
        let mut changed = false;
        for column in &incoming.columns {
            match self.find_column(&column.name) {
                Some(existing) if existing.col_type != column.col_type => {
                    return Err(incompatible(format!(
                        "column '{}' redeclared as {} but stored as {}",
                        column.name,
                        column.col_type.as_str(),
                        existing.col_type.as_str()
                    )));
                }
                Some(existing) if existing.nullable && !column.nullable => {
                    return Err(incompatible(format!(
                        "column '{}' cannot become NOT NULL",
                        column.name
                    )));
                }
                Some(existing) => {
                    if column.nullable && !existing.nullable {
                        if let Some(slot) =
                            merged.columns.iter_mut().find(|c| c.name == column.name)
                        {
                            slot.nullable = true;
                        }
                        changed = true;
                    }
                }
                None if !column.nullable => {
                    return Err(incompatible(format!(
                        "new column '{}' must be nullable, existing rows have no value for it",
                        column.name
                    )));
                }
                None => {
                    merged.columns.push(column.clone());
                    changed = true;
                }
            }
        }
        Ok(changed.then_some(merged))
    }
}

pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TABLE_NAME_LEN
        && !name.starts_with("__")
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
