//! Authenticated client context shared by every stage of an acquisition
use crate::error::{Error, Result};
use reqwest::{Client, RequestBuilder};
use url::Url;

pub const API_KEY_ENV: &str = "PL_API_KEY";
pub const DEFAULT_DATA_URL: &str = "https://api.planet.com/data/v1";
pub const DEFAULT_ORDERS_URL: &str = "https://api.planet.com/compute/ops/orders/v2";

#[derive(Clone, Debug)]
pub struct Session {
    client: Client,
    api_key: String,
    data_url: Url,
    orders_url: Url,
}

impl Session {
    pub fn new(api_key: &str, data_url: &str, orders_url: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Configuration("API key is empty".to_string()));
        }
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            data_url: parse_base_url(data_url)?,
            orders_url: parse_base_url(orders_url)?,
        })
    }

    /// Builds a session against the public endpoints, reading the key from `PL_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| {
            Error::Configuration(format!("Environment variable {API_KEY_ENV} is not set"))
        })?;
        Self::new(&api_key, DEFAULT_DATA_URL, DEFAULT_ORDERS_URL)
    }

    pub fn quick_search_url(&self) -> String {
        format!("{}/quick-search", self.data_url.as_str().trim_end_matches('/'))
    }

    pub fn orders_url(&self) -> &Url {
        &self.orders_url
    }

    pub fn order_url(&self, order_id: &str) -> Result<Url> {
        let url = format!("{}/{}", self.orders_url.as_str().trim_end_matches('/'), order_id);
        Url::parse(&url).map_err(|e| Error::Configuration(format!("Bad order url {url}: {e}")))
    }

    /// Authenticated GET against the provider API.
    pub fn get(&self, url: &str) -> RequestBuilder {
        log::debug!("GET {url}");
        self.client.get(url).basic_auth(&self.api_key, Some(""))
    }

    /// Authenticated POST against the provider API.
    pub fn post(&self, url: &str) -> RequestBuilder {
        log::debug!("POST {url}");
        self.client.post(url).basic_auth(&self.api_key, Some(""))
    }

    /// Unauthenticated GET, used for pre-signed result locations.
    pub fn get_anon(&self, url: &str) -> RequestBuilder {
        log::debug!("GET {url}");
        self.client.get(url)
    }
}

fn parse_base_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::Configuration(format!("Bad base url {url}: {e}")))
}
