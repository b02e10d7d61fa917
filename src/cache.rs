//! CSV persistence for derived tables.
//!
//! The header carries each column's kind and key membership as
//! `name:kind` or `name:kind:key`, so a stored table loads back with the same
//! field kinds and composite key. Floats are written in their shortest
//! round-trip form.

use crate::table::Table;
use crate::types::Field;
use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Number,
    Text,
}

impl ColumnKind {
    fn as_str(self) -> &'static str {
        match self {
            ColumnKind::Int => "int",
            ColumnKind::Float => "float",
            ColumnKind::Number => "number",
            ColumnKind::Text => "text",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "int" => Some(ColumnKind::Int),
            "float" => Some(ColumnKind::Float),
            "number" => Some(ColumnKind::Number),
            "text" => Some(ColumnKind::Text),
            _ => None,
        }
    }

    fn of(field: &Field) -> Self {
        match field {
            Field::Int(_) => ColumnKind::Int,
            Field::Float(_) => ColumnKind::Float,
            Field::Text(_) => ColumnKind::Text,
        }
    }

    fn combine(self, other: Self) -> Option<Self> {
        use ColumnKind::*;
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Text, _) | (_, Text) => None,
            _ => Some(Number),
        }
    }

    fn read(self, raw: &str) -> Result<Field> {
        let field = match self {
            ColumnKind::Int => Field::Int(raw.parse().with_context(|| format!("'{}' is not an integer", raw))?),
            ColumnKind::Float => Field::Float(raw.parse().with_context(|| format!("'{}' is not a float", raw))?),
            ColumnKind::Number => match raw.parse::<i64>() {
                Ok(i) => Field::Int(i),
                Err(_) => Field::Float(raw.parse().with_context(|| format!("'{}' is not a number", raw))?),
            },
            ColumnKind::Text => Field::Text(raw.to_string()),
        };
        Ok(field)
    }
}

fn column_kinds(table: &Table) -> Result<Vec<ColumnKind>> {
    let mut kinds: Vec<Option<ColumnKind>> = vec![None; table.columns().len()];
    for row in table.rows() {
        for (i, field) in row.iter().enumerate() {
            let kind = ColumnKind::of(field);
            kinds[i] = match kinds[i] {
                None => Some(kind),
                Some(prev) => Some(prev.combine(kind).ok_or_else(|| {
                    anyhow!(
                        "column '{}' of '{}' mixes text and numbers",
                        table.columns()[i],
                        table.name()
                    )
                })?),
            };
        }
    }
    Ok(kinds.into_iter().map(|k| k.unwrap_or(ColumnKind::Text)).collect())
}

pub fn store_cache(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create cache directory: {:?}", parent))?;
        }
    }

    let kinds = column_kinds(table)?;
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to create cache file: {:?}", path))?;

    let header: Vec<String> = table
        .columns()
        .iter()
        .zip(&kinds)
        .enumerate()
        .map(|(i, (name, kind))| {
            if table.is_key_column(i) {
                format!("{}:{}:key", name, kind.as_str())
            } else {
                format!("{}:{}", name, kind.as_str())
            }
        })
        .collect();
    writer.write_record(&header)?;

    for row in table.rows() {
        writer.write_record(row.iter().map(|f| f.to_string()))?;
    }
    writer.flush()?;

    debug!(table = table.name(), rows = table.len(), path = ?path, "stored cache");
    Ok(())
}

pub fn load_cached(path: &Path, name: &str) -> Result<Table> {
    let mut reader = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to open cache file: {:?}", path))?;

    let mut columns = Vec::new();
    let mut kinds = Vec::new();
    let mut key_columns = Vec::new();
    for cell in reader.headers()?.iter() {
        let mut parts = cell.split(':');
        let (Some(column), Some(kind)) = (parts.next(), parts.next()) else {
            bail!("cache header '{}' in {:?} has no column kind", cell, path);
        };
        let kind = ColumnKind::parse(kind).ok_or_else(|| anyhow!("unknown column kind in header '{}'", cell))?;
        match parts.next() {
            Some("key") => key_columns.push(column.to_string()),
            Some(other) => bail!("unexpected header flag '{}' in '{}'", other, cell),
            None => {}
        }
        columns.push(column.to_string());
        kinds.push(kind);
    }

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result?;
        let row = record
            .iter()
            .zip(&kinds)
            .map(|(raw, kind)| kind.read(raw))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Bad value on row {} of {:?}", line + 1, path))?;
        rows.push(row);
    }

    let key_refs: Vec<&str> = key_columns.iter().map(String::as_str).collect();
    Ok(Table::from_rows(name, columns, &key_refs, rows)?)
}

/// True when `path` exists and is at least as new as every input. Inputs
/// that cannot be inspected are ignored; the computation reports them.
pub fn is_fresh(path: &Path, inputs: &[&Path]) -> bool {
    let Ok(cached) = fs::metadata(path).and_then(|m| m.modified()) else {
        return false;
    };
    inputs.iter().all(|input| match fs::metadata(input).and_then(|m| m.modified()) {
        Ok(modified) => modified <= cached,
        Err(_) => true,
    })
}

/// Loads `path` when it is fresh against `inputs` and `refresh` is off,
/// otherwise computes the table and stores it there.
pub fn cached_stage<F>(path: &Path, name: &str, refresh: bool, inputs: &[&Path], compute: F) -> Result<Table>
where
    F: FnOnce() -> Result<Table>,
{
    if !refresh && is_fresh(path, inputs) {
        let table = load_cached(path, name)?;
        info!(stage = name, rows = table.len(), path = ?path, "loaded from cache");
        return Ok(table);
    }
    if !refresh && path.exists() {
        info!(stage = name, path = ?path, "cache is older than its inputs");
    }
    let table = compute()?;
    store_cache(&table, path)?;
    info!(stage = name, rows = table.len(), path = ?path, "computed and cached");
    Ok(table)
}

/// Sidecar holding the row accounting of the run that wrote `path`.
pub fn report_path(path: &Path) -> PathBuf {
    path.with_extension("report.json")
}

pub fn store_report<T: Serialize>(report: &T, path: &Path) -> Result<()> {
    let sidecar = report_path(path);
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&sidecar, json).with_context(|| format!("Failed to write stage report: {:?}", sidecar))?;
    Ok(())
}

/// A missing or unreadable sidecar yields `None`; the cached table is still usable.
pub fn load_report<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let sidecar = report_path(path);
    let text = fs::read_to_string(&sidecar).ok()?;
    match serde_json::from_str(&text) {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(path = ?sidecar, error = %e, "ignoring unreadable stage report");
            None
        }
    }
}
