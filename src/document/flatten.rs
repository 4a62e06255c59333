//! Flat record sets
//!
//! Conversion between the normalized document tree and flat,
//! deduplicated table records ready for a storage collaborator, and the
//! inverse. Local keys are assigned in depth-first order starting at 1
//! per table; a reused table's hash index guarantees at most one record
//! per distinct content hash within one pass.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::Serialize;

use crate::document::tree::{Content, DocumentNode, NodeHash, NodeValue};
use crate::errors::{Error, Result};
use crate::models::column::Column;
use crate::models::table::TableField;
use crate::models::DataModel;

/// One cell value of a flat record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    DateTime(DateTime<FixedOffset>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Plain string rendering used when rebuilding XML values
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Str(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Bytes(bytes) => hex::encode(bytes),
            Value::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, false),
        }
    }
}

/// Minimal decimal rendering of a float (no trailing `.0`)
fn format_float(value: f64) -> String {
    format!("{value}")
}

/// One flat record: column name → value
pub type Record = HashMap<String, Value>;

/// Flat data of one table
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableData {
    /// Next local key, starting at 1
    pub next_pk: i64,
    /// Records in creation order
    pub records: Vec<Record>,
    /// Content hash → local key, kept for reused tables
    pub hash_index: HashMap<NodeHash, i64>,
    /// Join-table records for multi relations to reused targets, keyed
    /// by join-table name
    pub relations: BTreeMap<String, Vec<Record>>,
}

impl TableData {
    fn new() -> TableData {
        TableData {
            next_pk: 1,
            ..Default::default()
        }
    }
}

/// Flat records of a whole document, keyed by table type name
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlatTables {
    pub tables: BTreeMap<String, TableData>,
}

impl FlatTables {
    /// Total number of records across all tables
    pub fn record_count(&self) -> usize {
        self.tables.values().map(|t| t.records.len()).sum()
    }
}

/// Join multiple values into one comma-separated string. Values
/// containing a comma, quote or newline are quoted; quotes are escaped
/// with a backslash.
pub fn join_values(values: &[String]) -> String {
    values
        .iter()
        .map(|value| {
            let escaped = value.replace('"', "\\\"");
            if escaped.contains(',')
                || escaped.contains('\n')
                || escaped.contains('\r')
                || escaped.contains('"')
            {
                format!("\"{escaped}\"")
            } else {
                escaped
            }
        })
        .collect::<Vec<String>>()
        .join(",")
}

/// Inverse of [`join_values`]
pub fn split_joined_values(joined: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = joined.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => current.push(next),
                None => current.push('\\'),
            },
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => out.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    out.push(current);
    out
}

/// Convert a document tree into flat table records.
///
/// `metadata` fills the configured metadata columns on the root record;
/// `file_path` and the processing timestamp are recorded there as well.
pub(crate) fn doc_tree_to_flat_data(
    model: &DataModel,
    tree: &Rc<DocumentNode>,
    file_path: Option<&str>,
    metadata: Option<&HashMap<String, Value>>,
) -> Result<FlatTables> {
    let mut flat = FlatTables::default();
    extract_node(model, tree, 0, 0, &mut flat)?;

    // root-record bookkeeping and caller-supplied metadata
    if let Some(root_data) = flat.tables.get_mut(&model.root_table) {
        let root_pk_column = model.root().pk_column(true);
        if let Some(record) = root_data
            .records
            .iter_mut()
            .find(|r| r.get(&root_pk_column).and_then(Value::as_int) == Some(1))
        {
            if let Some(path) = file_path {
                record.insert(
                    "xtab_input_file_path".to_string(),
                    Value::Str(path.to_string()),
                );
            }
            record.insert(
                "xtab_processed_at".to_string(),
                Value::DateTime(Utc::now().fixed_offset()),
            );
            if let Some(metadata) = metadata {
                for meta_col in &model.config.metadata_columns {
                    if let Some(value) = metadata.get(&meta_col.name) {
                        record.insert(meta_col.name.clone(), value.clone());
                    }
                }
            }
        }
    }
    Ok(flat)
}

fn extract_node(
    model: &DataModel,
    node: &DocumentNode,
    pk_parent: i64,
    row_number: i64,
    flat: &mut FlatTables,
) -> Result<i64> {
    let table = model
        .tables
        .get(&node.type_name)
        .ok_or_else(|| Error::Invariant(format!("no table for node type '{}'", node.type_name)))?;

    let pk = {
        let data = flat
            .tables
            .entry(node.type_name.clone())
            .or_insert_with(TableData::new);
        if table.is_reused {
            if let Some(&existing) = data.hash_index.get(&node.hash) {
                return Ok(existing);
            }
        }
        let pk = data.next_pk;
        data.next_pk += 1;
        pk
    };

    let mut record = Record::new();
    record.insert(table.pk_column(true), Value::Int(pk));

    if !table.is_reused {
        if let Some(parent_type) = &table.parent {
            let parent_name = &model.tables[parent_type].name;
            record.insert(
                format!("temp_fk_parent_{parent_name}"),
                Value::Int(pk_parent),
            );
        }
        if model.config.row_numbers {
            record.insert("xtab_row_number".to_string(), Value::Int(row_number));
        }
    }

    for field in &table.fields {
        match field {
            TableField::Column(col) => {
                let value = match node.content.values(&col.name) {
                    Some(raw) if !raw.is_empty() => coerce_column_value(col, raw)?,
                    _ => Value::Null,
                };
                record.insert(col.name.clone(), value);
            }
            TableField::Single(rel) => {
                let key = format!("temp_{}", rel.key_field_name());
                let value = match node.content.nodes(&rel.name).and_then(|n| n.first()) {
                    Some(child) => Value::Int(extract_node(model, child, pk, 0, flat)?),
                    None => Value::Null,
                };
                record.insert(key, value);
            }
            TableField::Multi(_) => {}
        }
    }

    record.insert(
        model.config.record_hash.column_name.clone(),
        Value::Bytes(node.hash.clone()),
    );

    // multi relations: join-table rows for reused targets, plain
    // back-referenced child rows otherwise
    for rel in table.multi_relations() {
        let Some(children) = node.content.nodes(&rel.name) else {
            continue;
        };
        let target_reused = model
            .tables
            .get(&rel.target_type)
            .map(|t| t.is_reused)
            .ok_or_else(|| {
                Error::Invariant(format!("relation targets unknown type '{}'", rel.target_type))
            })?;
        if target_reused {
            let join_name = rel.join_table_name(&table.name);
            let mut rows = Vec::with_capacity(children.len());
            for (i, child) in children.iter().enumerate() {
                let child_pk = extract_node(model, child, pk, i as i64 + 1, flat)?;
                let mut row = Record::new();
                row.insert(format!("temp_fk_{}", table.name), Value::Int(pk));
                row.insert(format!("temp_fk_{}", rel.target_name), Value::Int(child_pk));
                if model.config.row_numbers {
                    row.insert("xtab_row_number".to_string(), Value::Int(i as i64 + 1));
                }
                rows.push(row);
            }
            flat.tables
                .get_mut(&node.type_name)
                .expect("entry created above")
                .relations
                .entry(join_name)
                .or_default()
                .extend(rows);
        } else {
            for (i, child) in children.iter().enumerate() {
                extract_node(model, child, pk, i as i64 + 1, flat)?;
            }
        }
    }

    let data = flat
        .tables
        .get_mut(&node.type_name)
        .expect("entry created above");
    data.records.push(record);
    if table.is_reused {
        data.hash_index.insert(node.hash.clone(), pk);
    }
    Ok(pk)
}

/// Coerce raw XML values into one typed cell. Columns admitting several
/// values are always stored joined, so a lone value containing a comma
/// survives the round trip.
fn coerce_column_value(col: &Column, raw: &[String]) -> Result<Value> {
    if col.occurs.is_multiple() || raw.len() > 1 {
        return Ok(Value::Str(join_values(raw)));
    }
    let value = &raw[0];
    if col.data_type.is_float() {
        let parsed: f64 = value.parse().map_err(|_| {
            Error::MalformedInput(format!(
                "invalid {} value '{value}' for column '{}'",
                col.data_type.xsd_name(),
                col.name
            ))
        })?;
        Ok(Value::Float(parsed))
    } else if col.data_type.is_integer() {
        let parsed: i64 = value.parse().map_err(|_| {
            Error::MalformedInput(format!(
                "invalid {} value '{value}' for column '{}'",
                col.data_type.xsd_name(),
                col.name
            ))
        })?;
        Ok(Value::Int(parsed))
    } else if col.data_type == crate::models::DataType::Boolean {
        Ok(Value::Bool(value == "true" || value == "1"))
    } else {
        Ok(Value::Str(value.clone()))
    }
}

/// Rebuild a document tree from flat table records (inverse of
/// [`doc_tree_to_flat_data`]).
///
/// Handles both "temp" (pre-merge) and final (persisted) key column
/// naming, detected from the first root record.
pub(crate) fn flat_data_to_doc_tree(
    model: &DataModel,
    flat: &FlatTables,
) -> Result<Rc<DocumentNode>> {
    let root_table = model.root();
    let root_data = flat
        .tables
        .get(&model.root_table)
        .ok_or_else(|| Error::Invariant("no data for the root table".to_string()))?;
    let first_root = root_data
        .records
        .first()
        .ok_or_else(|| Error::Invariant("root table has no records".to_string()))?;
    let temp = if first_root.contains_key(&root_table.pk_column(false)) {
        ""
    } else {
        "temp_"
    };

    // index records by local key, and children by parent key
    let mut records_by_pk: HashMap<&str, HashMap<i64, &Record>> = HashMap::new();
    let mut relation_index: HashMap<(String, String), HashMap<i64, Vec<i64>>> = HashMap::new();
    for (type_name, table) in &model.tables {
        let pk_key = format!("{temp}pk_{}", table.name);
        if let Some(data) = flat.tables.get(type_name) {
            let index = records_by_pk.entry(type_name.as_str()).or_default();
            for row in &data.records {
                if let Some(pk) = row.get(&pk_key).and_then(Value::as_int) {
                    index.insert(pk, row);
                }
            }
        }
        for rel in table.multi_relations() {
            let join_name = rel.join_table_name(&table.name);
            let mut index: HashMap<i64, Vec<i64>> = HashMap::new();
            let target_reused = model
                .tables
                .get(&rel.target_type)
                .map(|t| t.is_reused)
                .unwrap_or(true);
            if target_reused {
                if let Some(rows) = flat
                    .tables
                    .get(type_name)
                    .and_then(|data| data.relations.get(&join_name))
                {
                    let fk_self = format!("{temp}fk_{}", table.name);
                    let fk_other = format!("{temp}fk_{}", rel.target_name);
                    for row in rows {
                        if let (Some(parent), Some(child)) = (
                            row.get(&fk_self).and_then(Value::as_int),
                            row.get(&fk_other).and_then(Value::as_int),
                        ) {
                            index.entry(parent).or_default().push(child);
                        }
                    }
                }
            } else if let Some(child_data) = flat.tables.get(&rel.target_type) {
                let fk_parent = format!("{temp}fk_parent_{}", table.name);
                let child_pk = format!("{temp}pk_{}", rel.target_name);
                for row in &child_data.records {
                    if let (Some(parent), Some(child)) = (
                        row.get(&fk_parent).and_then(Value::as_int),
                        row.get(&child_pk).and_then(Value::as_int),
                    ) {
                        index.entry(parent).or_default().push(child);
                    }
                }
            }
            relation_index.insert((type_name.clone(), join_name), index);
        }
    }

    let root_pk = first_root
        .get(&format!("{temp}pk_{}", root_table.name))
        .and_then(Value::as_int)
        .ok_or_else(|| Error::Invariant("root record has no local key".to_string()))?;

    build_node(
        model,
        &records_by_pk,
        &relation_index,
        temp,
        &model.root_table,
        root_pk,
    )
}

fn build_node(
    model: &DataModel,
    records_by_pk: &HashMap<&str, HashMap<i64, &Record>>,
    relation_index: &HashMap<(String, String), HashMap<i64, Vec<i64>>>,
    temp: &str,
    type_name: &str,
    pk: i64,
) -> Result<Rc<DocumentNode>> {
    let table = model
        .tables
        .get(type_name)
        .ok_or_else(|| Error::Invariant(format!("unknown table type '{type_name}'")))?;
    let record = records_by_pk
        .get(type_name)
        .and_then(|index| index.get(&pk))
        .ok_or_else(|| {
            Error::Invariant(format!("missing record {pk} in table '{}'", table.name))
        })?;

    let mut content = Content::new();
    for field in &table.fields {
        match field {
            TableField::Column(col) => {
                if let Some(value) = record.get(&col.name) {
                    if !value.is_null() {
                        content.insert(
                            col.name.clone(),
                            NodeValue::Values(render_column_values(col, value)),
                        );
                    }
                }
            }
            TableField::Single(rel) => {
                let key = format!("{temp}{}", rel.key_field_name());
                if let Some(fk) = record.get(&key).and_then(Value::as_int) {
                    let child = build_node(
                        model,
                        records_by_pk,
                        relation_index,
                        temp,
                        &rel.target_type,
                        fk,
                    )?;
                    content.insert(rel.name.clone(), NodeValue::Nodes(vec![child]));
                }
            }
            TableField::Multi(rel) => {
                let join_name = rel.join_table_name(&table.name);
                let child_pks = relation_index
                    .get(&(type_name.to_string(), join_name))
                    .and_then(|index| index.get(&pk));
                if let Some(child_pks) = child_pks {
                    let mut children = Vec::with_capacity(child_pks.len());
                    for child_pk in child_pks {
                        children.push(build_node(
                            model,
                            records_by_pk,
                            relation_index,
                            temp,
                            &rel.target_type,
                            *child_pk,
                        )?);
                    }
                    if !children.is_empty() {
                        content.insert(rel.name.clone(), NodeValue::Nodes(children));
                    }
                }
            }
        }
    }

    let hash = record
        .get(&model.config.record_hash.column_name)
        .and_then(Value::as_bytes)
        .map(|b| b.to_vec())
        .unwrap_or_default();

    Ok(Rc::new(DocumentNode {
        type_name: type_name.to_string(),
        content,
        hash,
    }))
}

/// Render one stored cell back into XML text values, inverting the
/// flatten-side coercion and joining
fn render_column_values(col: &Column, value: &Value) -> Vec<String> {
    if col.data_type.is_float() {
        // strip trailing zeros so 2.50 comes back as 2.5
        return value
            .to_plain_string()
            .split(',')
            .map(strip_float_zeros)
            .collect();
    }
    if let Value::DateTime(dt) = value {
        return vec![dt.to_rfc3339_opts(SecondsFormat::Millis, false)];
    }
    let rendered = value.to_plain_string();
    if col.occurs.is_multiple() {
        split_joined_values(&rendered)
    } else {
        vec![rendered]
    }
}

fn strip_float_zeros(piece: &str) -> String {
    if piece.contains('.') {
        piece.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        piece.to_string()
    }
}
