use crate::error::{status_and_body, Error, Result};
use crate::filter::SearchRequest;
use crate::session::Session;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use url::Url;

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Feature {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Deserialize, Debug)]
struct SearchPage {
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(rename = "_links", default)]
    links: PageLinks,
}

#[derive(Deserialize, Debug, Default)]
struct PageLinks {
    #[serde(rename = "_next")]
    next: Option<Value>,
}

/// Runs a catalog search and follows `_next` links until the last page.
///
/// Features are deduplicated by id, keeping the first occurrence.
pub async fn search(session: &Session, request: &SearchRequest) -> Result<Vec<Feature>> {
    let response = session
        .post(&session.quick_search_url())
        .json(request)
        .send()
        .await?;
    let mut page = read_page(response).await?;

    let mut features: Vec<Feature> = vec![];
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut visited: HashSet<Url> = HashSet::new();
    let mut page_count = 1;

    loop {
        let next = next_page_url(&page.links)?;
        for feature in page.features {
            if seen_ids.insert(feature.id.clone()) {
                features.push(feature);
            }
        }

        let Some(next) = next else { break };
        if !visited.insert(next.clone()) {
            return Err(Error::Pagination(format!("Page {next} was already visited")));
        }

        let response = session.get(next.as_str()).send().await?;
        page = read_page(response).await?;
        page_count += 1;
    }

    log::info!(
        "Search returned {} unique scenes over {} page(s)",
        features.len(),
        page_count
    );
    Ok(features)
}

/// Ids of the features, in result order.
pub fn feature_ids(features: &[Feature]) -> Vec<String> {
    features.iter().map(|f| f.id.clone()).collect()
}

async fn read_page(response: reqwest::Response) -> Result<SearchPage> {
    if !response.status().is_success() {
        let (status, body) = status_and_body(response).await;
        return Err(Error::SearchRequest { status, body });
    }
    Ok(response.json::<SearchPage>().await?)
}

fn next_page_url(links: &PageLinks) -> Result<Option<Url>> {
    match &links.next {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(href)) if href.is_empty() => Ok(None),
        Some(Value::String(href)) => Url::parse(href)
            .map(Some)
            .map_err(|e| Error::Pagination(format!("{href}: {e}"))),
        Some(other) => Err(Error::Pagination(format!(
            "Expected a url string, found {other}"
        ))),
    }
}
