//! Composite search filters in the provider's JSON shape
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum Filter {
    AndFilter {
        config: Vec<Filter>,
    },
    OrFilter {
        config: Vec<Filter>,
    },
    NotFilter {
        config: Box<Filter>,
    },
    DateRangeFilter {
        field_name: String,
        config: RangeConfig<String>,
    },
    GeometryFilter {
        field_name: String,
        relation: String,
        config: Value,
    },
    RangeFilter {
        field_name: String,
        config: RangeConfig<f64>,
    },
    StringInFilter {
        field_name: String,
        config: Vec<String>,
    },
    PermissionFilter {
        config: Vec<String>,
    },
    AssetFilter {
        config: Vec<String>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RangeConfig<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<T>,
}

impl Filter {
    pub fn and(filters: Vec<Filter>) -> Self {
        Self::AndFilter { config: filters }
    }

    /// Acquisition date range, inclusive on both calendar days.
    pub fn acquired_between(start_date: &str, end_date: &str) -> Self {
        Self::DateRangeFilter {
            field_name: "acquired".to_string(),
            config: RangeConfig {
                gte: Some(format!("{start_date}T00:00:00.000Z")),
                lte: Some(format!("{end_date}T23:59:59.999Z")),
            },
        }
    }

    pub fn intersects(geometry: Value) -> Self {
        Self::GeometryFilter {
            field_name: "geometry".to_string(),
            relation: "intersects".to_string(),
            config: geometry,
        }
    }

    pub fn range(field_name: &str, gte: Option<f64>, lte: Option<f64>) -> Self {
        Self::RangeFilter {
            field_name: field_name.to_string(),
            config: RangeConfig { gte, lte },
        }
    }

    pub fn string_in(field_name: &str, values: &[String]) -> Self {
        Self::StringInFilter {
            field_name: field_name.to_string(),
            config: values.to_vec(),
        }
    }

    pub fn permissions(permissions: &[String]) -> Self {
        Self::PermissionFilter {
            config: permissions.to_vec(),
        }
    }

    pub fn assets(assets: &[String]) -> Self {
        Self::AssetFilter {
            config: assets.to_vec(),
        }
    }
}

/// Body of a catalog search request.
#[derive(Serialize, Clone, Debug)]
pub struct SearchRequest {
    pub item_types: Vec<String>,
    pub filter: Filter,
}
