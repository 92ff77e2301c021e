//! Column and file name constants shared by the loader, the configuration
//! defaults and the output publisher.

// Canonical administrative key columns, with the Atlas Explorer export headers
// accepted as aliases.
pub const COUNTRY_COLUMN: &str = "country";
pub const REGION_COLUMN: &str = "region";
pub const SUB_REGION_COLUMN: &str = "sub_region";
pub const COUNTRY_ALIASES: &[&str] = &["admin0_name"];
pub const REGION_ALIASES: &[&str] = &["admin1_name"];
pub const SUB_REGION_ALIASES: &[&str] = &["admin2_name"];

pub const VALUE_COLUMN: &str = "value";

// Categorical dimension columns
pub const SCENARIO_COLUMN: &str = "scenario";
pub const TIMEFRAME_COLUMN: &str = "timeframe";
pub const INDICATOR_COLUMN: &str = "hazard_indicator_name";
pub const ITEM_COLUMN: &str = "item";
pub const POPULATION_TYPE_COLUMN: &str = "population_type";
pub const EXPOSURE_COLUMN: &str = "exposure";
pub const VARIABLE_COLUMN: &str = "variable";

// Default input file names (Atlas Explorer exports)
pub const HAZARD_FILE: &str = "atlas_hazard_ndws_future.csv";
pub const EROSION_FILE: &str = "atlas_hazard_erosion_proxy.csv";
pub const POPULATION_FILE: &str = "atlas_exposure_population.csv";
pub const AGRICULTURAL_VALUE_FILE: &str = "atlas_exposure_vop_crops.csv";
pub const POVERTY_FILE: &str = "atlas_adaptive_capacity_poverty.csv";

// Default dimension selections for the Atlas exports
pub const BASELINE_SCENARIO: &str = "historic";
pub const BASELINE_TIMEFRAME: &str = "historic";
pub const EROSION_INDICATOR: &str = "TAI";
pub const TOTAL_POPULATION_TYPE: &str = "total_pop";
pub const POVERTY_VARIABLE: &str = "GSAP_poor365";

// Output file names
pub const SUB_REGION_OUTPUT: &str = "sub_region_risk.csv";
pub const REGION_OUTPUT: &str = "region_risk.csv";
pub const COUNTRY_OUTPUT: &str = "country_risk.csv";
pub const HIGH_RISK_OUTPUT: &str = "high_risk_sub_regions.csv";
pub const METADATA_OUTPUT: &str = "run_metadata.json";
pub const METRICS_OUTPUT: &str = "metrics.prom";

pub const DEFAULT_CONFIG_PATH: &str = "atlas_risk.toml";

// Plausibility bounds checked after the join (non-fatal)
pub const HAZARD_DAYS_RANGE: (f64, f64) = (0.0, 365.0);
pub const POVERTY_RATIO_RANGE: (f64, f64) = (0.0, 1.0);
