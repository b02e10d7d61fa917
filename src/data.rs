use crate::config::{CountyInput, PopulationInput, StadiumInput, TeamColorInput};
use crate::processing::StageReport;
use crate::table::Table;
use crate::types::{Field, GeoPoint};
use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use geojson::{GeoJson, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

/// A freshly loaded table and what happened to the raw records on the way.
#[derive(Debug)]
pub struct Loaded {
    pub table: Table,
    pub report: StageReport,
}

fn column(headers: &StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| anyhow!("Column '{}' not found in {:?}", name, path))
}

fn int_at(record: &StringRecord, idx: usize) -> Option<i64> {
    record.get(idx).and_then(|v| v.trim().parse().ok())
}

/// Population estimates keyed by `(state_id, county_id)`. Whole-state
/// aggregate rows are excluded; rows with unparseable codes are skipped.
pub fn load_population(input: &PopulationInput) -> Result<Loaded> {
    let path = &input.path;
    let file = File::open(path).with_context(|| format!("Failed to open population file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);
    let headers = rdr.headers()?.clone();

    let state_idx = column(&headers, &input.state_column, path)?;
    let county_idx = column(&headers, &input.county_column, path)?;
    let pop_idx = column(&headers, &input.population_column, path)?;

    let mut table = Table::new(
        "population",
        vec!["state_id".into(), "county_id".into(), "pop_2020".into()],
        &["state_id", "county_id"],
    )?;
    let mut rows_in = 0;
    let mut malformed = 0;

    for result in rdr.records() {
        let record = result?;
        rows_in += 1;

        let (Some(state), Some(county), Some(pop)) =
            (int_at(&record, state_idx), int_at(&record, county_idx), int_at(&record, pop_idx))
        else {
            malformed += 1;
            continue;
        };
        if county == input.aggregate_county {
            continue;
        }
        table.push(vec![Field::Int(state), Field::Int(county), Field::Int(pop)])?;
    }

    let report = StageReport::loaded("population", rows_in, table.len(), malformed);
    info!(%report, "loaded population estimates");
    Ok(Loaded { table, report })
}

/// County centers keyed by `(state_id, county_id)`, with the `"lat,lon"`
/// column split into `latitude` and `longitude`.
pub fn load_counties(input: &CountyInput) -> Result<Loaded> {
    let path = &input.path;
    let file = File::open(path).with_context(|| format!("Failed to open county file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().delimiter(input.delimiter as u8).from_reader(file);
    let headers = rdr.headers()?.clone();

    let name_idx = column(&headers, &input.name_column, path)?;
    let state_name_idx = column(&headers, &input.state_name_column, path)?;
    let state_idx = column(&headers, &input.state_column, path)?;
    let county_idx = column(&headers, &input.county_column, path)?;
    let location_idx = column(&headers, &input.location_column, path)?;

    let mut table = Table::new(
        "county_centers",
        vec![
            "state_id".into(),
            "county_id".into(),
            "county_name".into(),
            "state_name".into(),
            "latitude".into(),
            "longitude".into(),
        ],
        &["state_id", "county_id"],
    )?;
    let mut rows_in = 0;
    let mut malformed = 0;

    for result in rdr.records() {
        let record = result?;
        rows_in += 1;

        let (Some(state), Some(county)) = (int_at(&record, state_idx), int_at(&record, county_idx)) else {
            malformed += 1;
            continue;
        };
        let location = match record.get(location_idx).unwrap_or("").parse::<GeoPoint>() {
            Ok(p) => p,
            Err(e) => {
                warn!(state, county, error = %e, "skipping county without a usable center");
                malformed += 1;
                continue;
            }
        };

        table.push(vec![
            Field::Int(state),
            Field::Int(county),
            Field::Text(record.get(name_idx).unwrap_or("").to_string()),
            Field::Text(record.get(state_name_idx).unwrap_or("").to_string()),
            Field::Float(location.latitude()),
            Field::Float(location.longitude()),
        ])?;
    }

    let report = StageReport::loaded("county_centers", rows_in, table.len(), malformed);
    info!(%report, "loaded county centers");
    Ok(Loaded { table, report })
}

/// Stadium points keyed by team name. GeoJSON positions are `[lon, lat]`.
pub fn load_stadiums(input: &StadiumInput) -> Result<Loaded> {
    let path = &input.path;
    let file = File::open(path).with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);
    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("Stadium GeoJSON must be a FeatureCollection")),
    };

    let mut table = Table::new(
        "stadiums",
        vec![
            "team".into(),
            "conference".into(),
            "stadium".into(),
            "latitude".into(),
            "longitude".into(),
        ],
        &["team"],
    )?;
    let rows_in = collection.features.len();
    let mut malformed = 0;

    for feature in collection.features {
        let property = |name: &str| -> Option<String> {
            match feature.properties.as_ref()?.get(name)? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };

        let Some(team) = property(&input.team_property) else {
            malformed += 1;
            continue;
        };
        let location = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::Point(position)) if position.len() >= 2 => GeoPoint::new(position[1], position[0]).ok(),
            _ => None,
        };
        let Some(location) = location else {
            warn!(team = %team, "skipping stadium without a valid point geometry");
            malformed += 1;
            continue;
        };

        table.push(vec![
            Field::Text(team),
            Field::Text(property(&input.conference_property).unwrap_or_default()),
            Field::Text(property(&input.stadium_property).unwrap_or_default()),
            Field::Float(location.latitude()),
            Field::Float(location.longitude()),
        ])?;
    }

    let report = StageReport::loaded("stadiums", rows_in, table.len(), malformed);
    info!(%report, "loaded stadiums");
    Ok(Loaded { table, report })
}

/// Team styling keyed by team name: hex color and numeric id.
pub fn load_team_colors(input: &TeamColorInput) -> Result<Loaded> {
    let path = &input.path;
    let file = File::open(path).with_context(|| format!("Failed to open team color file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);
    let headers = rdr.headers()?.clone();

    let team_idx = column(&headers, &input.team_column, path)?;
    let color_idx = column(&headers, &input.color_column, path)?;
    let id_idx = column(&headers, &input.id_column, path)?;

    let mut table = Table::new(
        "team_colors",
        vec!["team".into(), "color".into(), "team_id".into()],
        &["team"],
    )?;
    let mut rows_in = 0;
    let mut malformed = 0;

    for result in rdr.records() {
        let record = result?;
        rows_in += 1;

        let team = record.get(team_idx).unwrap_or("").trim();
        let Some(id) = int_at(&record, id_idx) else {
            malformed += 1;
            continue;
        };
        if team.is_empty() {
            malformed += 1;
            continue;
        }
        table.push(vec![
            Field::Text(team.to_string()),
            Field::Text(record.get(color_idx).unwrap_or("").trim().to_string()),
            Field::Int(id),
        ])?;
    }

    let report = StageReport::loaded("team_colors", rows_in, table.len(), malformed);
    info!(%report, "loaded team colors");
    Ok(Loaded { table, report })
}

/// Plain CSV for downstream consumers: header of column names, one row per record.
pub fn write_table(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
    }
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to create output file: {:?}", path))?;
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|f| f.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a plain CSV back into a table. Values are inferred as int, float or
/// text, except `text_columns`, which are kept verbatim.
pub fn read_table(path: &Path, name: &str, key_columns: &[&str], text_columns: &[&str]) -> Result<Table> {
    let file = File::open(path).with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);
    let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let verbatim: Vec<bool> = columns.iter().map(|c| text_columns.contains(&c.as_str())).collect();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(
            record
                .iter()
                .zip(&verbatim)
                .map(|(raw, &keep)| if keep { Field::Text(raw.to_string()) } else { Field::infer(raw) })
                .collect(),
        );
    }
    Ok(Table::from_rows(name, columns, key_columns, rows)?)
}
