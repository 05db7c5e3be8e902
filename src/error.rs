use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Search request failed with status {status}: {body}")]
    SearchRequest { status: StatusCode, body: String },

    #[error("Invalid pagination link: {0}")]
    Pagination(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Order listing failed with status {status}: {body}")]
    RegistryRequest { status: StatusCode, body: String },

    #[error("Order submission failed with status {status}: {body}")]
    OrderSubmission { status: StatusCode, body: String },

    #[error("Order status request failed with status {status}: {body}")]
    StatusRequest { status: StatusCode, body: String },

    #[error("Order {order} did not reach a terminal state (last state: {state})")]
    TimeoutIncomplete { order: String, state: String },

    #[error("Failed to download {name}: {reason}")]
    Download { name: String, reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Drains a failed response into its status and body text.
pub(crate) async fn status_and_body(response: reqwest::Response) -> (StatusCode, String) {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    (status, body)
}
