//! Batch assignment: the forward pass (team to home county), the main pass
//! (county to nearest team) and the merges and caches between them.

use crate::cache;
use crate::config::AppConfig;
use crate::data;
use crate::error::AssignError;
use crate::metric::{DistanceMetric, GeoMetric};
use crate::places::{Place, PlaceTable};
use crate::resolver::{resolve, Assignment};
use crate::table::Table;
use crate::types::{fips_code, CompositeKey, Field, GeoPoint, KeyPart};
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

const LATITUDE: &str = "latitude";
const LONGITUDE: &str = "longitude";

pub const OUTPUT_COLUMNS: [&str; 7] = [
    "state_id",
    "county_id",
    "fips",
    "pop_2020",
    "team_id",
    "closest_team",
    "closest_team_distance",
];

/// Row accounting for one stage, so large join losses are visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub rows_in: usize,
    pub rows_dropped: usize,
    pub rows_out: usize,
    /// Rows skipped because they could not be parsed; part of `rows_dropped`.
    pub malformed: usize,
    /// Right-hand rows of a merge that found no partner on the left.
    #[serde(default)]
    pub unmatched_right: usize,
}

impl StageReport {
    pub fn new(stage: &str, rows_in: usize, rows_out: usize) -> Self {
        Self::loaded(stage, rows_in, rows_out, 0)
    }

    pub fn loaded(stage: &str, rows_in: usize, rows_out: usize, malformed: usize) -> Self {
        Self {
            stage: stage.to_string(),
            rows_in,
            rows_dropped: rows_in.saturating_sub(rows_out),
            rows_out,
            malformed,
            unmatched_right: 0,
        }
    }

    /// Report for an inner join: left rows in, merged rows out.
    pub fn merged(stage: &str, left: usize, right: usize, rows_out: usize) -> Self {
        Self {
            unmatched_right: right.saturating_sub(rows_out),
            ..Self::new(stage, left, rows_out)
        }
    }

    fn cached(mut self) -> Self {
        self.stage = format!("{} (cached)", self.stage);
        self
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} in, {} dropped, {} out",
            self.stage, self.rows_in, self.rows_dropped, self.rows_out
        )?;
        if self.malformed > 0 {
            write!(f, " ({} malformed)", self.malformed)?;
        }
        if self.unmatched_right > 0 {
            write!(f, " ({} unmatched on the right)", self.unmatched_right)?;
        }
        Ok(())
    }
}

/// How resolved sites are written back onto the query table.
#[derive(Debug, Clone)]
pub struct AssignmentColumns {
    /// Prepended to each site key column name.
    pub key_prefix: String,
    pub distance_column: String,
    /// Site fields copied onto the query row as-is.
    pub carry: Vec<String>,
}

/// Resolves every query against `sites`, in parallel, keeping input order.
/// Any failure aborts the whole batch.
pub fn assign_all<M: DistanceMetric + ?Sized>(
    queries: &PlaceTable,
    sites: &PlaceTable,
    metric: &M,
) -> Result<Vec<Assignment>, AssignError> {
    if sites.is_empty() {
        return Err(AssignError::EmptySiteTable);
    }
    queries
        .places()
        .par_iter()
        .map(|query| resolve(query, sites, metric))
        .collect()
}

/// Query table plus one column per site key component, the distance and
/// the carried site fields.
pub fn augment(
    queries: &PlaceTable,
    sites: &PlaceTable,
    assignments: &[Assignment],
    columns: &AssignmentColumns,
    name: &str,
) -> Result<Table, AssignError> {
    let mut new_columns: Vec<String> = sites
        .key_columns()
        .iter()
        .map(|c| format!("{}{}", columns.key_prefix, c))
        .collect();
    new_columns.push(columns.distance_column.clone());
    new_columns.extend(columns.carry.iter().cloned());

    let values = assignments
        .iter()
        .map(|a| -> Result<Vec<Field>, AssignError> {
            let site = sites.get(&a.site_key).ok_or_else(|| {
                AssignError::InvalidKey(format!("resolved key {} is not in '{}'", a.site_key, sites.table().name()))
            })?;
            let mut row = a.to_fields();
            for field in &columns.carry {
                let value = site.field(field).cloned().ok_or_else(|| AssignError::MissingColumn {
                    table: sites.table().name().to_string(),
                    column: field.clone(),
                })?;
                row.push(value);
            }
            Ok(row)
        })
        .collect::<Result<Vec<_>, _>>()?;

    queries.table().with_columns(name, &new_columns, values)
}

/// Each team's nearest county, appended as `state_id`, `county_id` and
/// `county_distance`. Uses the raw metric.
pub fn forward_pass(teams: &PlaceTable, counties: &PlaceTable, metric: &GeoMetric) -> Result<Table, AssignError> {
    let plain = GeoMetric::new(metric.formula());
    let assignments = assign_all(teams, counties, &plain)?;
    let columns = AssignmentColumns {
        key_prefix: String::new(),
        distance_column: "county_distance".into(),
        carry: Vec::new(),
    };
    augment(teams, counties, &assignments, &columns, "teams")
}

/// Each county's nearest team under `metric`, with the team id and the
/// five-digit county code, projected onto [`OUTPUT_COLUMNS`].
pub fn main_pass<M: DistanceMetric + ?Sized>(
    counties: &PlaceTable,
    teams: &PlaceTable,
    metric: &M,
) -> Result<Table, AssignError> {
    let assignments = assign_all(counties, teams, metric)?;
    let columns = AssignmentColumns {
        key_prefix: "closest_".into(),
        distance_column: "closest_team_distance".into(),
        carry: vec!["team_id".into()],
    };
    let assigned = augment(counties, teams, &assignments, &columns, "assignments")?;
    let with_fips = with_fips_column(&assigned)?;
    with_fips.select("assignments", &OUTPUT_COLUMNS, &["state_id", "county_id"])
}

fn with_fips_column(table: &Table) -> Result<Table, AssignError> {
    let state_idx = table.column_index("state_id")?;
    let county_idx = table.column_index("county_id")?;
    let values = table
        .rows()
        .iter()
        .map(|row| match (row[state_idx].as_i64(), row[county_idx].as_i64()) {
            (Some(state), Some(county)) => Ok(vec![Field::Text(fips_code(state, county))]),
            _ => Err(AssignError::InvalidKey(format!(
                "county code ({}, {}) is not numeric",
                row[state_idx], row[county_idx]
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    table.with_columns(table.name(), &["fips".to_string()], values)
}

/// Population covered by one team.
#[derive(Debug, Clone, PartialEq)]
pub struct FanBase {
    pub team: String,
    pub population: i64,
    pub counties: usize,
}

/// Sums `weight_column` per value of `site_column`, largest first. A weight
/// that is not an integer fails the whole summary.
pub fn summarize(table: &Table, site_column: &str, weight_column: &str) -> Result<Vec<FanBase>, AssignError> {
    let site_idx = table.column_index(site_column)?;
    let weight_idx = table.column_index(weight_column)?;

    let mut totals: HashMap<String, (i64, usize)> = HashMap::new();
    for (i, row) in table.rows().iter().enumerate() {
        let weight = row[weight_idx].as_i64().ok_or_else(|| {
            AssignError::MalformedRecord(format!(
                "{} of {} in '{}' is '{}', not an integer",
                weight_column,
                table.key_at(i),
                table.name(),
                row[weight_idx]
            ))
        })?;
        let entry = totals.entry(row[site_idx].to_string()).or_default();
        entry.0 += weight;
        entry.1 += 1;
    }

    let mut fan_bases: Vec<FanBase> = totals
        .into_iter()
        .map(|(team, (population, counties))| FanBase {
            team,
            population,
            counties,
        })
        .collect();
    fan_bases.sort_by(|a, b| b.population.cmp(&a.population).then_with(|| a.team.cmp(&b.team)));
    Ok(fan_bases)
}

pub struct PipelineOutput {
    pub assignments: Table,
    pub reports: Vec<StageReport>,
    pub fan_bases: Vec<FanBase>,
}

/// Loads `file` from the cache directory if it is newer than `inputs` and
/// allowed, otherwise runs `compute`. The computed report is stored beside
/// the cache and replayed, marked `(cached)`, on later hits.
fn stage<F>(
    config: &AppConfig,
    file: &str,
    name: &str,
    refresh: bool,
    inputs: &[&Path],
    reports: &mut Vec<StageReport>,
    compute: F,
) -> Result<Table>
where
    F: FnOnce() -> Result<data::Loaded>,
{
    let mut report = None;
    let run = || -> Result<Table> {
        let loaded = compute()?;
        report = Some(loaded.report);
        Ok(loaded.table)
    };
    let Some(path) = config.cache_path(file) else {
        let table = run()?;
        reports.extend(report);
        return Ok(table);
    };
    let table = cache::cached_stage(&path, name, refresh, inputs, run)?;
    match report {
        Some(report) => {
            cache::store_report(&report, &path)?;
            reports.push(report);
        }
        None => {
            let stored = cache::load_report::<StageReport>(&path)
                .unwrap_or_else(|| StageReport::new(name, table.len(), table.len()));
            reports.push(stored.cached());
        }
    }
    Ok(table)
}

fn merge_reported(left: &Table, right: &Table, name: &str, reports: &mut Vec<StageReport>) -> Result<Table> {
    let merged = left.merge(right, name)?;
    let report = StageReport::merged(name, left.len(), right.len(), merged.len());
    if report.rows_dropped > 0 || report.unmatched_right > 0 {
        warn!(%report, "rows without a match on both sides were dropped");
    } else {
        info!(%report, "merged");
    }
    reports.push(report);
    Ok(merged)
}

fn places(table: &Table, reports: &mut Vec<StageReport>) -> Result<PlaceTable> {
    let parsed = PlaceTable::from_table(table, LATITUDE, LONGITUDE)?;
    if parsed.skipped > 0 {
        reports.push(StageReport::loaded(
            &format!("{} locations", table.name()),
            table.len(),
            parsed.value.len(),
            parsed.skipped,
        ));
    }
    Ok(parsed.value)
}

/// Stadiums joined with their colors and ids.
pub fn load_teams(config: &AppConfig, reports: &mut Vec<StageReport>) -> Result<Table> {
    let stadiums = data::load_stadiums(&config.input.stadiums)?;
    let colors = data::load_team_colors(&config.input.team_colors)?;
    reports.push(stadiums.report);
    reports.push(colors.report);
    merge_reported(&stadiums.table, &colors.table, "teams_with_colors", reports)
}

fn build_metric(config: &AppConfig) -> GeoMetric {
    let metric = GeoMetric::new(config.pipeline.metric);
    match (&config.pipeline.adjustment, config.pipeline.forward_pass) {
        (Some(adj), true) => metric.with_adjustment(adj.clone()),
        (Some(_), false) => {
            warn!("regional adjustment needs the forward pass; ignoring it");
            metric
        }
        (None, _) => metric,
    }
}

/// Runs the whole county assignment. `refresh` ignores existing caches.
pub fn run_pipeline(config: &AppConfig, refresh: bool) -> Result<PipelineOutput> {
    let mut reports = Vec::new();

    let population = data::load_population(&config.input.population)?;
    reports.push(population.report);

    let counties_input = config.input.counties.path.as_path();
    let centers = stage(
        config,
        "county_centers.csv",
        "county_centers",
        refresh,
        &[counties_input],
        &mut reports,
        || data::load_counties(&config.input.counties),
    )?;
    let counties = merge_reported(&centers, &population.table, "counties", &mut reports)?;
    let counties = places(&counties, &mut reports)?;

    let metric = build_metric(config);

    let teams = if config.pipeline.forward_pass {
        let mut team_reports = Vec::new();
        // Home counties depend on the formula and on every input file.
        let file = format!("teams_{}.csv", metric.formula().as_str());
        let inputs = [
            config.input.stadiums.path.as_path(),
            config.input.team_colors.path.as_path(),
            counties_input,
            config.input.population.path.as_path(),
        ];
        let enriched = stage(config, &file, "teams", refresh, &inputs, &mut reports, || {
            let teams = load_teams(config, &mut team_reports)?;
            let teams = places(&teams, &mut team_reports)?;
            let enriched = forward_pass(&teams, &counties, &metric)?;
            let report = StageReport::new("forward_pass", teams.len(), enriched.len());
            info!(%report, "resolved home counties");
            Ok(data::Loaded { table: enriched, report })
        })?;
        // Loader reports come before the pass that consumed them.
        let pass_report = reports.pop();
        reports.extend(team_reports);
        reports.extend(pass_report);
        enriched
    } else {
        load_teams(config, &mut reports)?
    };
    let teams = places(&teams, &mut reports)?;

    let assignments = main_pass(&counties, &teams, &metric).context("Main assignment pass failed")?;
    let report = StageReport::new("main_pass", counties.len(), assignments.len());
    info!(%report, "assigned counties");
    reports.push(report);

    let fan_bases = summarize(&assignments, "closest_team", "pop_2020")?;

    Ok(PipelineOutput {
        assignments,
        reports,
        fan_bases,
    })
}

/// The team nearest to an arbitrary point, by raw distance.
pub fn nearest_team(config: &AppConfig, point: GeoPoint) -> Result<(Assignment, Place)> {
    let mut reports = Vec::new();
    let teams = load_teams(config, &mut reports)?;
    let teams = places(&teams, &mut reports)?;
    let query = Place {
        key: CompositeKey::new(vec![KeyPart::Text("query".into())])?,
        location: point,
        fields: HashMap::new(),
    };
    let metric = GeoMetric::new(config.pipeline.metric);
    let assignment = resolve(&query, &teams, &metric)?;
    let team = teams
        .get(&assignment.site_key)
        .cloned()
        .context("resolved team missing from team table")?;
    Ok((assignment, team))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Formula, RegionalAdjustment};
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn counties() -> PlaceTable {
        let table = Table::from_rows(
            "counties",
            vec![
                "state_id".into(),
                "county_id".into(),
                "pop_2020".into(),
                "latitude".into(),
                "longitude".into(),
            ],
            &["state_id", "county_id"],
            vec![
                // Los Angeles, Clark (NV), Brown (WI), Cook (IL)
                vec![Field::Int(6), Field::Int(37), Field::Int(10_014_009), Field::Float(34.32), Field::Float(-118.22)],
                vec![Field::Int(32), Field::Int(3), Field::Int(2_265_461), Field::Float(36.21), Field::Float(-115.01)],
                vec![Field::Int(55), Field::Int(9), Field::Int(268_740), Field::Float(44.45), Field::Float(-87.99)],
                vec![Field::Int(17), Field::Int(31), Field::Int(5_275_541), Field::Float(41.84), Field::Float(-87.82)],
            ],
        )
        .unwrap();
        PlaceTable::from_table(&table, LATITUDE, LONGITUDE).unwrap().value
    }

    fn teams() -> PlaceTable {
        let table = Table::from_rows(
            "teams",
            vec!["team".into(), "team_id".into(), "latitude".into(), "longitude".into()],
            &["team"],
            vec![
                vec!["Los Angeles Rams".into(), Field::Int(1), Field::Float(33.9535), Field::Float(-118.3392)],
                vec!["Las Vegas Raiders".into(), Field::Int(2), Field::Float(36.0909), Field::Float(-115.1833)],
                vec!["Green Bay Packers".into(), Field::Int(3), Field::Float(44.5013), Field::Float(-88.0622)],
                vec!["Chicago Bears".into(), Field::Int(4), Field::Float(41.8623), Field::Float(-87.6167)],
            ],
        )
        .unwrap();
        PlaceTable::from_table(&table, LATITUDE, LONGITUDE).unwrap().value
    }

    fn text(s: &str) -> Field {
        Field::Text(s.to_string())
    }

    #[test]
    fn test_assign_all_preserves_order() {
        let result = assign_all(&counties(), &teams(), &GeoMetric::default()).unwrap();
        let names: Vec<String> = result.iter().map(|a| a.site_key.to_string()).collect();
        assert_eq!(
            names,
            vec!["(Los Angeles Rams)", "(Las Vegas Raiders)", "(Green Bay Packers)", "(Chicago Bears)"]
        );
        let query_keys: Vec<&CompositeKey> = result.iter().map(|a| &a.query_key).collect();
        assert_eq!(query_keys, counties().table().keys().iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_assign_all_empty_sites_aborts() {
        let empty = Table::new("none", vec!["team".into(), "latitude".into(), "longitude".into()], &["team"]).unwrap();
        let empty = PlaceTable::from_table(&empty, LATITUDE, LONGITUDE).unwrap().value;
        assert!(matches!(
            assign_all(&counties(), &empty, &GeoMetric::default()),
            Err(AssignError::EmptySiteTable)
        ));
    }

    #[test]
    fn test_forward_pass_expands_composite_key() {
        let enriched = forward_pass(&teams(), &counties(), &GeoMetric::default()).unwrap();
        let state = enriched.column_index("state_id").unwrap();
        let county = enriched.column_index("county_id").unwrap();
        let distance = enriched.column_index("county_distance").unwrap();

        let packers = &enriched.rows()[2];
        assert_eq!(packers[state], Field::Int(55));
        assert_eq!(packers[county], Field::Int(9));
        assert!(packers[distance].as_f64().unwrap() < 10.0);
    }

    #[test]
    fn test_main_pass_output_columns() {
        let out = main_pass(&counties(), &teams(), &GeoMetric::default()).unwrap();
        assert_eq!(out.columns(), &OUTPUT_COLUMNS);
        let la = &out.rows()[0];
        assert_eq!(la[2], text("06037"));
        assert_eq!(la[4], Field::Int(1));
        assert_eq!(la[5], text("Los Angeles Rams"));
        let clark = &out.rows()[1];
        assert_eq!(clark[2], text("32003"));
    }

    #[test]
    fn test_main_pass_adjustment_uses_forward_pass_state() {
        // A county just over the Nevada line from a home team farther away.
        let table = Table::from_rows(
            "counties",
            vec!["state_id".into(), "county_id".into(), "pop_2020".into(), "latitude".into(), "longitude".into()],
            &["state_id", "county_id"],
            vec![
                vec![Field::Int(6), Field::Int(37), Field::Int(1), Field::Float(34.32), Field::Float(-118.22)],
                vec![Field::Int(32), Field::Int(3), Field::Int(1), Field::Float(36.21), Field::Float(-115.01)],
                vec![Field::Int(6), Field::Int(71), Field::Int(1), Field::Float(35.2), Field::Float(-116.2)],
            ],
        )
        .unwrap();
        let counties = PlaceTable::from_table(&table, LATITUDE, LONGITUDE).unwrap().value;
        let two_teams = Table::from_rows(
            "teams",
            vec!["team".into(), "team_id".into(), "latitude".into(), "longitude".into()],
            &["team"],
            vec![
                vec!["Los Angeles Rams".into(), Field::Int(1), Field::Float(33.9535), Field::Float(-118.3392)],
                vec!["Las Vegas Raiders".into(), Field::Int(2), Field::Float(36.0909), Field::Float(-115.1833)],
            ],
        )
        .unwrap();
        let two_teams = PlaceTable::from_table(&two_teams, LATITUDE, LONGITUDE).unwrap().value;

        let enriched = forward_pass(&two_teams, &counties, &GeoMetric::default()).unwrap();
        let enriched = PlaceTable::from_table(&enriched, LATITUDE, LONGITUDE).unwrap().value;

        let plain = main_pass(&counties, &enriched, &GeoMetric::default()).unwrap();
        assert_eq!(plain.rows()[2][5], text("Las Vegas Raiders"));

        let biased = GeoMetric::new(Formula::Geodesic).with_adjustment(RegionalAdjustment {
            query_field: "state_id".into(),
            site_field: "state_id".into(),
            factor: 2.5,
        });
        let out = main_pass(&counties, &enriched, &biased).unwrap();
        assert_eq!(out.rows()[2][5], text("Los Angeles Rams"));
        // Reported distance stays the raw distance.
        let raw = biased.distance(
            counties.places()[2].location,
            enriched.get(&CompositeKey::new(vec![KeyPart::Text("Los Angeles Rams".into())]).unwrap()).unwrap().location,
        );
        assert_eq!(out.rows()[2][6], Field::Float(raw));
    }

    #[test]
    fn test_summarize_sorts_by_population() {
        let out = main_pass(&counties(), &teams(), &GeoMetric::default()).unwrap();
        let fan_bases = summarize(&out, "closest_team", "pop_2020").unwrap();
        assert_eq!(fan_bases[0].team, "Los Angeles Rams");
        assert_eq!(fan_bases[0].population, 10_014_009);
        assert_eq!(fan_bases[1].team, "Chicago Bears");
        assert_eq!(fan_bases.iter().map(|f| f.counties).sum::<usize>(), 4);
    }

    #[test]
    fn test_summarize_rejects_non_integer_weight() {
        let table = Table::from_rows(
            "assignments",
            vec!["county".into(), "closest_team".into(), "pop_2020".into()],
            &["county"],
            vec![
                vec![Field::Int(1), text("Chicago Bears"), Field::Int(5_275_541)],
                vec![Field::Int(2), text("Chicago Bears"), text("n/a")],
            ],
        )
        .unwrap();
        let err = summarize(&table, "closest_team", "pop_2020").unwrap_err();
        assert!(matches!(err, AssignError::MalformedRecord(ref msg) if msg.contains("(2)")), "{}", err);
    }

    #[test]
    fn test_stage_report_display() {
        let report = StageReport::loaded("counties", 10, 7, 2);
        assert_eq!(report.rows_dropped, 3);
        assert_eq!(report.to_string(), "counties: 10 in, 3 dropped, 7 out (2 malformed)");
    }

    #[test]
    fn test_merge_reports_unmatched_right_rows() {
        let keyed = |name: &str, ids: &[i64]| {
            Table::from_rows(
                name,
                vec!["state_id".into(), name.to_string()],
                &["state_id"],
                ids.iter().map(|&i| vec![Field::Int(i), Field::Int(i)]),
            )
            .unwrap()
        };
        let mut reports = Vec::new();
        let merged = merge_reported(&keyed("left", &[1, 2, 3]), &keyed("right", &[2, 3, 4, 5]), "joined", &mut reports)
            .unwrap();
        assert_eq!(merged.len(), 2);
        let report = &reports[0];
        assert_eq!((report.rows_in, report.rows_dropped, report.rows_out), (3, 1, 2));
        assert_eq!(report.unmatched_right, 2);
        assert_eq!(report.to_string(), "joined: 3 in, 1 dropped, 2 out (2 unmatched on the right)");
    }

    const POPULATION: &str = "STATE,COUNTY,POPESTIMATE2020
6,0,39368078
6,37,10014009
6,71,2181654
32,3,2265461
48,201,4731145
";

    const COUNTIES: &str = "Geo Point;STATEFP;COUNTYFP;NAME;STATE_NAME
34.32,-118.22;06;037;Los Angeles;California
36.21,-115.01;32;003;Clark;Nevada
35.2,-116.2;06;071;San Bernardino;California
somewhere;06;059;Orange;California
";

    const STADIUMS: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "properties": {"Team": "Los Angeles Rams", "Conference": "NFC", "Stadium": "SoFi Stadium"},
         "geometry": {"type": "Point", "coordinates": [-118.3392, 33.9535]}},
        {"type": "Feature", "properties": {"Team": "Las Vegas Raiders", "Conference": "AFC", "Stadium": "Allegiant Stadium"},
         "geometry": {"type": "Point", "coordinates": [-115.1833, 36.0909]}}
    ]}"#;

    const COLORS: &str = "team,color,team_id
Los Angeles Rams,#003594,1
Las Vegas Raiders,#000000,2
";

    fn write_inputs(dir: &TempDir) {
        fs::write(dir.path().join("population.csv"), POPULATION).unwrap();
        fs::write(dir.path().join("counties.csv"), COUNTIES).unwrap();
        fs::write(dir.path().join("stadiums.json"), STADIUMS).unwrap();
        fs::write(dir.path().join("team_colors.csv"), COLORS).unwrap();
    }

    fn pipeline_config(dir: &TempDir, pipeline: &str) -> AppConfig {
        let root = dir.path().display();
        AppConfig::from_toml(&format!(
            r#"
            [input.population]
            path = "{root}/population.csv"

            [input.counties]
            path = "{root}/counties.csv"

            [input.stadiums]
            path = "{root}/stadiums.json"

            [input.team_colors]
            path = "{root}/team_colors.csv"

            [cache]
            dir = "{root}/cache"

            [pipeline]
            {pipeline}

            [pipeline.adjustment]
            query_field = "state_id"
            site_field = "state_id"
            "#
        ))
        .unwrap()
    }

    fn stage_names(output: &PipelineOutput) -> Vec<&str> {
        output.reports.iter().map(|r| r.stage.as_str()).collect()
    }

    fn closest_team(output: &PipelineOutput, row: usize) -> &Field {
        &output.assignments.rows()[row][5]
    }

    #[test]
    fn test_run_pipeline_reuses_caches() {
        let dir = TempDir::new().unwrap();
        write_inputs(&dir);
        let config = pipeline_config(&dir, "forward_pass = true");

        let first = run_pipeline(&config, false).unwrap();
        assert_eq!(
            stage_names(&first),
            vec![
                "population",
                "county_centers",
                "counties",
                "stadiums",
                "team_colors",
                "teams_with_colors",
                "forward_pass",
                "main_pass"
            ]
        );
        assert_eq!(first.assignments.columns(), &OUTPUT_COLUMNS);
        assert_eq!(first.assignments.len(), 3);
        // San Bernardino goes to its home-state team once the adjustment applies.
        assert_eq!(closest_team(&first, 2), &text("Los Angeles Rams"));
        assert_eq!(first.reports[2].unmatched_right, 1);

        let second = run_pipeline(&config, false).unwrap();
        assert_eq!(
            stage_names(&second),
            vec!["population", "county_centers (cached)", "counties", "forward_pass (cached)", "main_pass"]
        );
        assert_eq!(second.assignments, first.assignments);
        assert_eq!(second.fan_bases, first.fan_bases);
        let centers = &second.reports[1];
        assert_eq!((centers.rows_in, centers.rows_out, centers.malformed), (4, 3, 1));

        let teams = cache::load_cached(&dir.path().join("cache").join("teams_geodesic.csv"), "teams").unwrap();
        let state = teams.column_index("state_id").unwrap();
        assert!(teams.rows().iter().all(|row| matches!(row[state], Field::Int(_))));

        let refreshed = run_pipeline(&config, true).unwrap();
        assert_eq!(stage_names(&refreshed), stage_names(&first));
    }

    #[test]
    fn test_run_pipeline_without_forward_pass_ignores_adjustment() {
        let dir = TempDir::new().unwrap();
        write_inputs(&dir);
        let config = pipeline_config(&dir, "forward_pass = false");

        let output = run_pipeline(&config, false).unwrap();
        assert!(!stage_names(&output).contains(&"forward_pass"));
        assert_eq!(closest_team(&output, 0), &text("Los Angeles Rams"));
        assert_eq!(closest_team(&output, 1), &text("Las Vegas Raiders"));
        assert_eq!(closest_team(&output, 2), &text("Las Vegas Raiders"));
    }

    #[test]
    fn test_team_cache_follows_formula_and_inputs() {
        let dir = TempDir::new().unwrap();
        write_inputs(&dir);
        run_pipeline(&pipeline_config(&dir, "metric = \"geodesic\""), false).unwrap();

        let haversine = run_pipeline(&pipeline_config(&dir, "metric = \"haversine\""), false).unwrap();
        assert!(stage_names(&haversine).contains(&"forward_pass"));
        assert!(dir.path().join("cache").join("teams_haversine.csv").exists());

        let geodesic = pipeline_config(&dir, "metric = \"geodesic\"");
        assert!(stage_names(&run_pipeline(&geodesic, false).unwrap()).contains(&"forward_pass (cached)"));

        let later = SystemTime::now() + Duration::from_secs(120);
        fs::File::options()
            .write(true)
            .open(dir.path().join("stadiums.json"))
            .unwrap()
            .set_modified(later)
            .unwrap();
        let names = stage_names(&run_pipeline(&geodesic, false).unwrap()).join(",");
        assert!(names.contains("county_centers (cached)"), "{}", names);
        assert!(names.contains("forward_pass,"), "{}", names);
    }
}
