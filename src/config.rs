//! TOML acquisition file: search criteria, order options, polling and download settings
use crate::batch::{check_chunk_size, render_basename, PROVIDER_MAX_BATCH};
use crate::error::{Error, Result};
use crate::filter::{Filter, SearchRequest};
use crate::orders::OrderTemplate;
use crate::poll::PollBudget;
use crate::session::{Session, API_KEY_ENV, DEFAULT_DATA_URL, DEFAULT_ORDERS_URL};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct AcquisitionConfig {
    #[serde(default)]
    pub api: ApiConfig,
    pub search: SearchConfig,
    pub order: OrderConfig,
    #[serde(default)]
    pub poll: PollConfig,
    pub download: DownloadConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ApiConfig {
    /// Falls back to `PL_API_KEY` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_data_url")]
    pub data_url: String,
    #[serde(default = "default_orders_url")]
    pub orders_url: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SearchConfig {
    #[serde(default = "default_item_types")]
    pub item_types: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    /// GeoJSON geometry of the area of interest.
    pub aoi: Value,
    #[serde(default = "default_max_cloud_cover")]
    pub max_cloud_cover: f64,
    #[serde(default)]
    pub min_cloud_cover: f64,
    #[serde(default)]
    pub quality_categories: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub instruments: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct OrderConfig {
    pub product_bundle: String,
    #[serde(default = "default_item_type")]
    pub item_type: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    pub name_template: String,
    #[serde(default = "default_order_type")]
    pub order_type: String,
    #[serde(default = "default_archive_type")]
    pub archive_type: String,
    #[serde(default = "default_true")]
    pub single_archive: bool,
    #[serde(default = "default_submit_delay_secs")]
    pub submit_delay_secs: f64,
    /// Prepends a clip to the search AOI ahead of `tools`.
    #[serde(default)]
    pub clip_to_aoi: bool,
    #[serde(default)]
    pub tools: Vec<Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct PollConfig {
    #[serde(default = "default_num_loops")]
    pub num_loops: u32,
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct DownloadConfig {
    pub output_dir: PathBuf,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_true")]
    pub subdirectory_per_basename: bool,
}

fn default_data_url() -> String {
    DEFAULT_DATA_URL.to_string()
}
fn default_orders_url() -> String {
    DEFAULT_ORDERS_URL.to_string()
}
fn default_item_types() -> Vec<String> {
    vec![default_item_type()]
}
fn default_item_type() -> String {
    "PSScene".to_string()
}
fn default_max_cloud_cover() -> f64 {
    1.0
}
fn default_chunk_size() -> usize {
    PROVIDER_MAX_BATCH
}
fn default_order_type() -> String {
    "partial".to_string()
}
fn default_archive_type() -> String {
    "zip".to_string()
}
fn default_true() -> bool {
    true
}
fn default_submit_delay_secs() -> f64 {
    1.0
}
fn default_num_loops() -> u32 {
    300
}
fn default_wait_secs() -> u64 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            data_url: default_data_url(),
            orders_url: default_orders_url(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            num_loops: default_num_loops(),
            wait_secs: default_wait_secs(),
        }
    }
}

const TEMPLATE: &str = r#"
[search]
item_types = ["PSScene"]
start_date = "2013-01-01"
end_date = "2024-12-31"
max_cloud_cover = 0.99
min_cloud_cover = 0.0
quality_categories = ["standard"]
permissions = ["assets.ortho_analytic_4b_sr:download", "assets.ortho_udm2:download"]

[search.aoi]
type = "Polygon"
coordinates = [[
    [-122.78314758004296, 53.33052904360998],
    [-122.70020261459693, 53.3282536221804],
    [-122.69657565349696, 53.37451376544108],
    [-122.779611532762, 53.37679163403286],
    [-122.78314758004296, 53.33052904360998],
]]

[order]
# analytic_sr_udm2 is 4 band surface reflectance, analytic_8b_sr_udm2 is 8 band
product_bundle = "analytic_sr_udm2"
item_type = "PSScene"
chunk_size = 500
name_template = "Quesnel_Clipped_Product={product_bundle}_Time={start_date}to{end_date}_MaxCloudProp={max_cloud_cover}_MaxChunkSize={chunk_size}"
order_type = "partial"
archive_type = "zip"
single_archive = true
submit_delay_secs = 1.0
clip_to_aoi = true
tools = []

[poll]
num_loops = 300
wait_secs = 60

[download]
output_dir = "data/planet_scenes"
overwrite = false
subdirectory_per_basename = true
"#;

impl AcquisitionConfig {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn template() -> Result<Self> {
        Ok(toml::from_str(TEMPLATE)?)
    }

    /// Writes the commented template verbatim.
    pub fn write_template<P: AsRef<Path>>(path: P) -> Result<()> {
        fs::write(path, TEMPLATE.trim_start())?;
        Ok(())
    }

    /// Checks everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<()> {
        let start = parse_date("start_date", &self.search.start_date)?;
        let end = parse_date("end_date", &self.search.end_date)?;
        if start > end {
            return Err(Error::Configuration(format!(
                "start_date {start} is after end_date {end}"
            )));
        }

        let (min, max) = (self.search.min_cloud_cover, self.search.max_cloud_cover);
        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) || min > max {
            return Err(Error::Configuration(format!(
                "Cloud cover bounds must satisfy 0 <= min <= max <= 1, got {min} and {max}"
            )));
        }

        if self.search.item_types.is_empty() {
            return Err(Error::Configuration("No item types selected".to_string()));
        }
        if !self.search.aoi.is_object() {
            return Err(Error::Configuration(
                "aoi must be a GeoJSON geometry object".to_string(),
            ));
        }
        if self.order.product_bundle.trim().is_empty() {
            return Err(Error::Configuration("No product bundle selected".to_string()));
        }
        check_chunk_size(self.order.chunk_size)?;
        if !self.order.submit_delay_secs.is_finite() || self.order.submit_delay_secs < 0.0 {
            return Err(Error::Configuration(format!(
                "submit_delay_secs must be a non-negative number, got {}",
                self.order.submit_delay_secs
            )));
        }
        if self.poll.num_loops == 0 {
            return Err(Error::Configuration(
                "Poll loop count must be at least 1".to_string(),
            ));
        }
        self.order_basename()?;
        Ok(())
    }

    pub fn session(&self) -> Result<Session> {
        let api_key = match &self.api.api_key {
            Some(key) => key.clone(),
            None => std::env::var(API_KEY_ENV).map_err(|_| {
                Error::Configuration(format!(
                    "No api_key configured and {API_KEY_ENV} is not set"
                ))
            })?,
        };
        Session::new(&api_key, &self.api.data_url, &self.api.orders_url)
    }

    /// Conjunction of every configured criterion.
    pub fn search_filter(&self) -> Filter {
        let search = &self.search;
        let mut filters = vec![
            Filter::acquired_between(&search.start_date, &search.end_date),
            Filter::intersects(search.aoi.clone()),
            Filter::range(
                "cloud_cover",
                Some(search.min_cloud_cover),
                Some(search.max_cloud_cover),
            ),
        ];
        if !search.quality_categories.is_empty() {
            filters.push(Filter::string_in("quality_category", &search.quality_categories));
        }
        if !search.instruments.is_empty() {
            filters.push(Filter::string_in("instrument", &search.instruments));
        }
        if !search.assets.is_empty() {
            filters.push(Filter::assets(&search.assets));
        }
        if !search.permissions.is_empty() {
            filters.push(Filter::permissions(&search.permissions));
        }
        Filter::and(filters)
    }

    pub fn search_request(&self) -> SearchRequest {
        SearchRequest {
            item_types: self.search.item_types.clone(),
            filter: self.search_filter(),
        }
    }

    pub fn order_basename(&self) -> Result<String> {
        let params = HashMap::from([
            ("product_bundle", self.order.product_bundle.clone()),
            ("item_type", self.order.item_type.clone()),
            ("start_date", self.search.start_date.clone()),
            ("end_date", self.search.end_date.clone()),
            ("max_cloud_cover", self.search.max_cloud_cover.to_string()),
            ("chunk_size", self.order.chunk_size.to_string()),
        ]);
        render_basename(&self.order.name_template, &params)
    }

    pub fn order_template(&self) -> OrderTemplate {
        let mut tools = vec![];
        if self.order.clip_to_aoi {
            tools.push(json!({"clip": {"aoi": self.search.aoi}}));
        }
        tools.extend(self.order.tools.iter().cloned());
        OrderTemplate {
            item_type: self.order.item_type.clone(),
            product_bundle: self.order.product_bundle.clone(),
            order_type: self.order.order_type.clone(),
            archive_type: self.order.archive_type.clone(),
            single_archive: self.order.single_archive,
            tools,
        }
    }

    pub fn submit_delay(&self) -> Duration {
        Duration::from_secs_f64(self.order.submit_delay_secs.max(0.0))
    }

    pub fn poll_budget(&self) -> PollBudget {
        PollBudget {
            num_loops: self.poll.num_loops,
            wait: Duration::from_secs(self.poll.wait_secs),
        }
    }

    pub fn output_dir(&self) -> Result<PathBuf> {
        let dir = &self.download.output_dir;
        if self.download.subdirectory_per_basename {
            Ok(dir.join(self.order_basename()?))
        } else {
            Ok(dir.clone())
        }
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| Error::Configuration(format!("{field} {value:?} is not YYYY-MM-DD: {e}")))
}
