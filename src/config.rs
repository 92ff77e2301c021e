use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants;
use crate::domain::{Metric, SourceId};
use crate::error::{FusionError, Result};

/// Immutable run configuration. Loaded once, validated, then passed by
/// reference into every stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: PathsConfig,
    pub selection: SelectionConfig,
    pub join: JoinConfig,
    pub imputation: ImputationConfig,
    pub scoring: ScoringConfig,
    pub output: OutputConfig,
    pub sources: SourcesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data/raw"),
            output_dir: PathBuf::from("data/processed"),
        }
    }
}

/// Scenario/timeframe applied to every scenario-bearing source unless the
/// source overrides it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    pub scenario: String,
    pub timeframe: String,
    /// Documentation only; copied into the run metadata.
    pub poverty_threshold_label: String,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            scenario: "ssp245".to_string(),
            timeframe: "2041_2060".to_string(),
            poverty_threshold_label: "GSAP_poor365 ($3.65/day)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct JoinConfig {
    /// Sources inner-joined to form the anchor key set.
    pub required_sources: Vec<SourceId>,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            required_sources: vec![SourceId::Hazard, SourceId::Erosion, SourceId::AgriculturalValue],
        }
    }
}

impl JoinConfig {
    /// Every source not listed as required, in canonical order.
    pub fn optional_sources(&self) -> Vec<SourceId> {
        SourceId::ALL
            .iter()
            .copied()
            .filter(|s| !self.required_sources.contains(s))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ImputationConfig {
    pub fields: Vec<Metric>,
}

impl Default for ImputationConfig {
    fn default() -> Self {
        Self {
            fields: vec![Metric::PovertyRatio],
        }
    }
}

/// What to do when a metric has zero variance across the corpus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DegenerateRangePolicy {
    /// Every non-null normalized value becomes 0; recorded in run metadata.
    ZeroFill,
    /// Abort the run with `DegenerateRange`.
    Fail,
}

/// One row of the risk category table. A score belongs to the first band
/// whose `upper` bound is >= the score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RiskBand {
    pub label: String,
    pub upper: f64,
}

impl RiskBand {
    pub fn new(label: &str, upper: f64) -> Self {
        Self {
            label: label.to_string(),
            upper,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    /// Weight of social vulnerability in the combined vulnerability; the
    /// environmental component gets `1 - social_weight`.
    pub social_weight: f64,
    pub hazard_metrics: Vec<Metric>,
    pub environmental_metrics: Vec<Metric>,
    pub degenerate_range: DegenerateRangePolicy,
    pub risk_category_thresholds: Vec<RiskBand>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            social_weight: 0.5,
            hazard_metrics: vec![Metric::HazardDays],
            environmental_metrics: vec![Metric::ErosionProxy],
            degenerate_range: DegenerateRangePolicy::ZeroFill,
            risk_category_thresholds: vec![
                RiskBand::new("Low", 0.25),
                RiskBand::new("Moderate", 0.5),
                RiskBand::new("High", 0.75),
                RiskBand::new("Very High", 1.0),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Labels copied into the high-risk subset table.
    pub high_risk_labels: Vec<String>,
    /// Number of sub-regions listed in the metadata's top-risk section.
    pub top_n: usize,
    /// Write the rendered Prometheus metrics next to the outputs.
    pub write_metrics: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            high_risk_labels: vec!["High".to_string(), "Very High".to_string()],
            top_n: 20,
            write_metrics: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_name: "atlas_risk.log".to_string(),
        }
    }
}

/// How a source's row multiplicity is collapsed to one row per key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReductionPolicy {
    /// Keep rows matching the configured scenario (and timeframe, when the
    /// source has a timeframe column).
    ScenarioSelection,
    /// Sum the value over every category of a key.
    CategorySum,
    /// Source is expected to already hold one row per key.
    Passthrough,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// File name relative to `paths.input_dir` (or an absolute path).
    pub file: PathBuf,
    #[serde(default = "default_reduction")]
    pub reduction: ReductionPolicy,
    /// Overrides `selection.scenario` for this source.
    #[serde(default)]
    pub scenario: Option<String>,
    /// Overrides `selection.timeframe` for this source.
    #[serde(default)]
    pub timeframe: Option<String>,
    /// Categorical column → value, applied before the reduction policy.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

fn default_reduction() -> ReductionPolicy {
    ReductionPolicy::Passthrough
}

impl SourceConfig {
    fn new(file: &str, reduction: ReductionPolicy) -> Self {
        Self {
            file: PathBuf::from(file),
            reduction,
            scenario: None,
            timeframe: None,
            filters: BTreeMap::new(),
        }
    }

    fn with_selection(mut self, scenario: &str, timeframe: &str) -> Self {
        self.scenario = Some(scenario.to_string());
        self.timeframe = Some(timeframe.to_string());
        self
    }

    fn with_filter(mut self, column: &str, value: &str) -> Self {
        self.filters.insert(column.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    #[serde(default = "default_hazard_source")]
    pub hazard: SourceConfig,
    #[serde(default = "default_erosion_source")]
    pub erosion: SourceConfig,
    #[serde(default = "default_population_source")]
    pub population: SourceConfig,
    #[serde(default = "default_agricultural_value_source")]
    pub agricultural_value: SourceConfig,
    #[serde(default = "default_poverty_source")]
    pub poverty: SourceConfig,
}

fn default_hazard_source() -> SourceConfig {
    SourceConfig::new(constants::HAZARD_FILE, ReductionPolicy::ScenarioSelection)
}

/// Aridity index from the historic baseline; the export also carries other
/// indicators and projected timeframes.
fn default_erosion_source() -> SourceConfig {
    SourceConfig::new(constants::EROSION_FILE, ReductionPolicy::ScenarioSelection)
        .with_selection(constants::BASELINE_SCENARIO, constants::BASELINE_TIMEFRAME)
        .with_filter(constants::INDICATOR_COLUMN, constants::EROSION_INDICATOR)
}

fn default_population_source() -> SourceConfig {
    SourceConfig::new(constants::POPULATION_FILE, ReductionPolicy::ScenarioSelection)
        .with_filter(constants::POPULATION_TYPE_COLUMN, constants::TOTAL_POPULATION_TYPE)
}

fn default_agricultural_value_source() -> SourceConfig {
    SourceConfig::new(constants::AGRICULTURAL_VALUE_FILE, ReductionPolicy::CategorySum)
}

fn default_poverty_source() -> SourceConfig {
    SourceConfig::new(constants::POVERTY_FILE, ReductionPolicy::Passthrough)
        .with_filter(constants::VARIABLE_COLUMN, constants::POVERTY_VARIABLE)
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            hazard: default_hazard_source(),
            erosion: default_erosion_source(),
            population: default_population_source(),
            agricultural_value: default_agricultural_value_source(),
            poverty: default_poverty_source(),
        }
    }
}

impl SourcesConfig {
    pub fn get(&self, source: SourceId) -> &SourceConfig {
        match source {
            SourceId::Hazard => &self.hazard,
            SourceId::Erosion => &self.erosion,
            SourceId::Population => &self.population,
            SourceId::AgriculturalValue => &self.agricultural_value,
            SourceId::Poverty => &self.poverty,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            selection: SelectionConfig::default(),
            join: JoinConfig::default(),
            imputation: ImputationConfig::default(),
            scoring: ScoringConfig::default(),
            output: OutputConfig::default(),
            sources: SourcesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from `atlas_risk.toml` when no path
    /// is given. A missing default file yields the built-in defaults; a missing
    /// explicit file is an error. Environment overrides are applied and the
    /// result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new(constants::DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    debug!("No {} found, using built-in defaults", constants::DEFAULT_CONFIG_PATH);
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            FusionError::Configuration(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// `ATLAS_INPUT_DIR`, `ATLAS_OUTPUT_DIR`, `ATLAS_SCENARIO` and
    /// `ATLAS_TIMEFRAME` take precedence over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = non_empty_env("ATLAS_INPUT_DIR") {
            self.paths.input_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty_env("ATLAS_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty_env("ATLAS_SCENARIO") {
            self.selection.scenario = v;
        }
        if let Some(v) = non_empty_env("ATLAS_TIMEFRAME") {
            self.selection.timeframe = v;
        }
    }

    /// Resolved path of a source's input file.
    pub fn source_path(&self, source: SourceId) -> PathBuf {
        let file = &self.sources.get(source).file;
        if file.is_absolute() {
            file.clone()
        } else {
            self.paths.input_dir.join(file)
        }
    }

    /// Scenario a scenario-selection source filters on.
    pub fn scenario_for(&self, source: SourceId) -> &str {
        self.sources
            .get(source)
            .scenario
            .as_deref()
            .unwrap_or(&self.selection.scenario)
    }

    /// Timeframe a scenario-selection source filters on.
    pub fn timeframe_for(&self, source: SourceId) -> &str {
        self.sources
            .get(source)
            .timeframe
            .as_deref()
            .unwrap_or(&self.selection.timeframe)
    }

    pub fn validate(&self) -> Result<()> {
        let required = &self.join.required_sources;
        if required.is_empty() {
            return Err(FusionError::Configuration(
                "join.required_sources must name at least one source".to_string(),
            ));
        }
        for (i, source) in required.iter().enumerate() {
            if required[..i].contains(source) {
                return Err(FusionError::Configuration(format!(
                    "join.required_sources lists '{}' more than once",
                    source
                )));
            }
        }

        let weight = self.scoring.social_weight;
        if !(0.0..=1.0).contains(&weight) {
            return Err(FusionError::Configuration(format!(
                "scoring.social_weight must be within [0, 1], got {}",
                weight
            )));
        }
        if self.scoring.hazard_metrics.is_empty() {
            return Err(FusionError::Configuration(
                "scoring.hazard_metrics must not be empty".to_string(),
            ));
        }
        if self.scoring.environmental_metrics.is_empty() {
            return Err(FusionError::Configuration(
                "scoring.environmental_metrics must not be empty".to_string(),
            ));
        }
        validate_thresholds(&self.scoring.risk_category_thresholds)?;

        if self.selection.scenario.trim().is_empty() {
            return Err(FusionError::Configuration("selection.scenario must not be empty".to_string()));
        }
        if self.selection.timeframe.trim().is_empty() {
            return Err(FusionError::Configuration("selection.timeframe must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Bands must be non-empty, strictly ascending within (0, 1], and end at 1.0
/// so every score in [0, 1] gets a label.
pub fn validate_thresholds(bands: &[RiskBand]) -> Result<()> {
    let last = bands.last().ok_or_else(|| {
        FusionError::Configuration("scoring.risk_category_thresholds must not be empty".to_string())
    })?;
    let mut previous = 0.0;
    for band in bands {
        if band.label.trim().is_empty() {
            return Err(FusionError::Configuration("risk category labels must not be empty".to_string()));
        }
        if !(band.upper > previous && band.upper <= 1.0) {
            return Err(FusionError::Configuration(format!(
                "risk category '{}' upper bound {} must be ascending and within (0, 1]",
                band.label, band.upper
            )));
        }
        previous = band.upper;
    }
    if last.upper != 1.0 {
        return Err(FusionError::Configuration(format!(
            "last risk category '{}' must end at 1.0, got {}",
            last.label, last.upper
        )));
    }
    Ok(())
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
