use crate::metric::{Formula, RegionalAdjustment};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub population: PopulationInput,
    pub counties: CountyInput,
    pub stadiums: StadiumInput,
    pub team_colors: TeamColorInput,
}

/// Census county population estimates.
#[derive(Debug, Deserialize, Clone)]
pub struct PopulationInput {
    pub path: PathBuf,
    #[serde(default = "default_state_column")]
    pub state_column: String,
    #[serde(default = "default_county_column")]
    pub county_column: String,
    #[serde(default = "default_population_column")]
    pub population_column: String,
    /// County code used for whole-state aggregate rows.
    #[serde(default)]
    pub aggregate_county: i64,
}

/// County boundary table with a `"lat,lon"` center column.
#[derive(Debug, Deserialize, Clone)]
pub struct CountyInput {
    pub path: PathBuf,
    #[serde(default = "default_county_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_name_column")]
    pub name_column: String,
    #[serde(default = "default_state_name_column")]
    pub state_name_column: String,
    #[serde(default = "default_statefp_column")]
    pub state_column: String,
    #[serde(default = "default_countyfp_column")]
    pub county_column: String,
    #[serde(default = "default_location_column")]
    pub location_column: String,
}

/// GeoJSON feature collection of stadium points.
#[derive(Debug, Deserialize, Clone)]
pub struct StadiumInput {
    pub path: PathBuf,
    #[serde(default = "default_team_property")]
    pub team_property: String,
    #[serde(default = "default_conference_property")]
    pub conference_property: String,
    #[serde(default = "default_stadium_property")]
    pub stadium_property: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TeamColorInput {
    pub path: PathBuf,
    #[serde(default = "default_team_column")]
    pub team_column: String,
    #[serde(default = "default_color_column")]
    pub color_column: String,
    #[serde(default = "default_team_id_column")]
    pub id_column: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
        }
    }
}

/// Switches between the pipeline variants.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Resolve each team's home county before the main pass.
    #[serde(default = "default_true")]
    pub forward_pass: bool,
    #[serde(default)]
    pub metric: Formula,
    /// Only takes effect together with `forward_pass`.
    #[serde(default)]
    pub adjustment: Option<RegionalAdjustment>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            forward_pass: true,
            metric: Formula::default(),
            adjustment: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_state_column() -> String {
    "STATE".into()
}
fn default_county_column() -> String {
    "COUNTY".into()
}
fn default_population_column() -> String {
    "POPESTIMATE2020".into()
}
fn default_county_delimiter() -> char {
    ';'
}
fn default_name_column() -> String {
    "NAME".into()
}
fn default_state_name_column() -> String {
    "STATE_NAME".into()
}
fn default_statefp_column() -> String {
    "STATEFP".into()
}
fn default_countyfp_column() -> String {
    "COUNTYFP".into()
}
fn default_location_column() -> String {
    "Geo Point".into()
}
fn default_team_property() -> String {
    "Team".into()
}
fn default_conference_property() -> String {
    "Conference".into()
}
fn default_stadium_property() -> String {
    "Stadium".into()
}
fn default_team_column() -> String {
    "team".into()
}
fn default_color_column() -> String {
    "color".into()
}
fn default_team_id_column() -> String {
    "team_id".into()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache")
}
fn default_output_path() -> PathBuf {
    PathBuf::from("county_info.csv")
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.input.counties.delimiter.is_ascii() {
            bail!("County delimiter must be a single ASCII character");
        }
        if let Some(adj) = &self.pipeline.adjustment {
            if !(adj.factor.is_finite() && adj.factor > 0.0) {
                bail!("Adjustment factor must be a positive number, got {}", adj.factor);
            }
        }
        Ok(())
    }

    pub fn cache_path(&self, file: &str) -> Option<PathBuf> {
        self.cache.enabled.then(|| self.cache.dir.join(file))
    }
}
