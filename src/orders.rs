//! Order registry lookups and idempotent order submission
use crate::batch::Batch;
use crate::error::{status_and_body, Error, Result};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct OrderHandle {
    pub id: String,
    pub name: String,
    pub url: Url,
}

/// Snapshot of previously placed orders, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct OrderRegistry {
    by_name: HashMap<String, OrderHandle>,
}

#[derive(Deserialize, Debug)]
struct OrderListPage {
    #[serde(default)]
    orders: Vec<OrderSummary>,
    #[serde(rename = "_links", default)]
    links: OrderListLinks,
}

#[derive(Deserialize, Debug)]
struct OrderSummary {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize, Debug, Default)]
struct OrderListLinks {
    next: Option<String>,
}

impl OrderRegistry {
    /// Lists every order on the account, following `next` links.
    pub async fn fetch(session: &Session) -> Result<Self> {
        let mut registry = Self::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut next = Some(session.orders_url().to_string());

        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                return Err(Error::Pagination(format!("Order page {url} was already visited")));
            }
            let response = session.get(&url).send().await?;
            if !response.status().is_success() {
                let (status, body) = status_and_body(response).await;
                return Err(Error::RegistryRequest { status, body });
            }
            let page: OrderListPage = response.json().await?;
            for order in page.orders {
                // Unnamed orders can never match a batch
                if order.name.is_empty() {
                    continue;
                }
                let url = session.order_url(&order.id)?;
                registry.insert(OrderHandle {
                    id: order.id,
                    name: order.name,
                    url,
                });
            }
            next = page.links.next.filter(|n| !n.is_empty());
        }

        log::info!("Found {} previously placed orders", registry.len());
        Ok(registry)
    }

    /// Keeps the first handle seen for a name.
    pub fn insert(&mut self, handle: OrderHandle) -> bool {
        if let Some(existing) = self.by_name.get(&handle.name) {
            log::warn!(
                "Ignoring order {} because order {} already has the name {:?}",
                handle.id,
                existing.id,
                handle.name
            );
            return false;
        }
        self.by_name.insert(handle.name.clone(), handle);
        true
    }

    pub fn get(&self, name: &str) -> Option<&OrderHandle> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// The parts of an order request shared by every batch of a run.
#[derive(Clone, Debug)]
pub struct OrderTemplate {
    pub item_type: String,
    pub product_bundle: String,
    pub order_type: String,
    pub archive_type: String,
    pub single_archive: bool,
    /// Post-processing directives, forwarded verbatim.
    pub tools: Vec<Value>,
}

#[derive(Serialize, Debug)]
pub struct OrderRequest<'a> {
    pub name: &'a str,
    pub order_type: &'a str,
    pub products: Vec<OrderProduct<'a>>,
    pub delivery: Delivery<'a>,
    pub tools: &'a [Value],
}

#[derive(Serialize, Debug)]
pub struct OrderProduct<'a> {
    pub item_ids: &'a [String],
    pub item_type: &'a str,
    pub product_bundle: &'a str,
}

#[derive(Serialize, Debug)]
pub struct Delivery<'a> {
    pub archive_type: &'a str,
    pub single_archive: bool,
}

impl OrderTemplate {
    pub fn request_for<'a>(&'a self, batch: &'a Batch) -> OrderRequest<'a> {
        OrderRequest {
            name: &batch.name,
            order_type: &self.order_type,
            products: vec![OrderProduct {
                item_ids: &batch.item_ids,
                item_type: &self.item_type,
                product_bundle: &self.product_bundle,
            }],
            delivery: Delivery {
                archive_type: &self.archive_type,
                single_archive: self.single_archive,
            },
            tools: &self.tools,
        }
    }
}

#[derive(Deserialize, Debug)]
struct SubmittedOrder {
    id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconciled {
    Reused(OrderHandle),
    Submitted(OrderHandle),
}

impl Reconciled {
    pub fn handle(&self) -> &OrderHandle {
        match self {
            Self::Reused(handle) | Self::Submitted(handle) => handle,
        }
    }

    pub fn into_handle(self) -> OrderHandle {
        match self {
            Self::Reused(handle) | Self::Submitted(handle) => handle,
        }
    }
}

/// Places orders for batches that the registry does not already know by name.
///
/// The registry is the snapshot fetched at the start of the run; each new
/// order is added to it, so a batch seen twice in one run is only ordered once.
pub struct Reconciler<'a> {
    session: &'a Session,
    registry: OrderRegistry,
    template: OrderTemplate,
    submit_delay: Duration,
    last_submission: Option<Instant>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        session: &'a Session,
        registry: OrderRegistry,
        template: OrderTemplate,
        submit_delay: Duration,
    ) -> Self {
        Self {
            session,
            registry,
            template,
            submit_delay,
            last_submission: None,
        }
    }

    pub fn registry(&self) -> &OrderRegistry {
        &self.registry
    }

    pub async fn reconcile(&mut self, batch: &Batch) -> Result<Reconciled> {
        if let Some(existing) = self.registry.get(&batch.name) {
            log::info!(
                "Order exists for chunk {} of {}: {}",
                batch.index,
                batch.count,
                existing.id
            );
            return Ok(Reconciled::Reused(existing.clone()));
        }

        self.wait_for_submit_slot().await;
        log::info!(
            "Placing order for chunk {} of {} ({} scenes)",
            batch.index,
            batch.count,
            batch.item_ids.len()
        );

        let request = self.template.request_for(batch);
        let response = self
            .session
            .post(self.session.orders_url().as_str())
            .json(&request)
            .send()
            .await;
        self.last_submission = Some(Instant::now());
        let response = response?;

        if !response.status().is_success() {
            let (status, body) = status_and_body(response).await;
            return Err(Error::OrderSubmission { status, body });
        }
        let submitted: SubmittedOrder = response.json().await?;
        let handle = OrderHandle {
            url: self.session.order_url(&submitted.id)?,
            id: submitted.id,
            name: batch.name.clone(),
        };
        log::info!("Placed order {} ({})", handle.id, handle.name);

        self.registry.insert(handle.clone());
        Ok(Reconciled::Submitted(handle))
    }

    async fn wait_for_submit_slot(&self) {
        let Some(last) = self.last_submission else {
            return;
        };
        let ready_at = last + self.submit_delay;
        if ready_at > Instant::now() {
            log::debug!(
                "Waiting {:.1}s before placing next order",
                (ready_at - Instant::now()).as_secs_f64()
            );
            tokio::time::sleep_until(ready_at).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::plan_batches;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_session(server: &MockServer) -> Session {
        Session::new("test-key", &server.uri(), &format!("{}/orders", server.uri())).unwrap()
    }

    fn test_template() -> OrderTemplate {
        OrderTemplate {
            item_type: "PSScene".to_string(),
            product_bundle: "analytic_sr_udm2".to_string(),
            order_type: "partial".to_string(),
            archive_type: "zip".to_string(),
            single_archive: true,
            tools: vec![json!({"clip": {"aoi": {"type": "Polygon", "coordinates": []}}})],
        }
    }

    #[test]
    fn test_order_request_json() {
        let template = test_template();
        let batch = &plan_batches(vec!["b", "a"], 10, "base").unwrap()[0];
        let value = serde_json::to_value(template.request_for(batch)).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "base_chunk_1_of_1",
                "order_type": "partial",
                "products": [{
                    "item_ids": ["a", "b"],
                    "item_type": "PSScene",
                    "product_bundle": "analytic_sr_udm2"
                }],
                "delivery": {"archive_type": "zip", "single_archive": true},
                "tools": [{"clip": {"aoi": {"type": "Polygon", "coordinates": []}}}]
            })
        );
    }

    #[test]
    fn test_registry_first_name_wins() {
        let url = Url::parse("http://x/orders/1").unwrap();
        let mut registry = OrderRegistry::default();
        assert!(registry.insert(OrderHandle {
            id: "1".to_string(),
            name: "dup".to_string(),
            url: url.clone(),
        }));
        assert!(!registry.insert(OrderHandle {
            id: "2".to_string(),
            name: "dup".to_string(),
            url,
        }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("dup").unwrap().id, "1");
    }

    #[tokio::test]
    async fn test_fetch_registry_follows_next() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orders": [{"id": "o1", "name": "first", "state": "success"}],
                "_links": {"next": format!("{}/orders/page2", server.uri())}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orders/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orders": [{"id": "o2", "name": "second"}],
                "_links": {}
            })))
            .mount(&server)
            .await;

        let registry = OrderRegistry::fetch(&test_session(&server)).await.unwrap();
        assert_eq!(registry.len(), 2);
        let second = registry.get("second").unwrap();
        assert_eq!(second.url.as_str(), format!("{}/orders/o2", server.uri()));
    }

    #[tokio::test]
    async fn test_unnamed_orders_are_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orders": [
                    {"id": "o1"},
                    {"id": "o2", "name": ""},
                    {"id": "o3", "name": "named"}
                ],
                "_links": {}
            })))
            .mount(&server)
            .await;

        let registry = OrderRegistry::fetch(&test_session(&server)).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("named").unwrap().id, "o3");
        assert!(registry.get("").is_none());
    }

    #[tokio::test]
    async fn test_fetch_registry_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let err = OrderRegistry::fetch(&test_session(&server)).await.unwrap_err();
        assert!(matches!(err, Error::RegistryRequest { .. }));
    }

    #[tokio::test]
    async fn test_existing_order_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"id": "new"})))
            .expect(0)
            .mount(&server)
            .await;

        let session = test_session(&server);
        let batch = &plan_batches(vec!["a"], 10, "base").unwrap()[0];
        let mut registry = OrderRegistry::default();
        registry.insert(OrderHandle {
            id: "old".to_string(),
            name: batch.name.clone(),
            url: session.order_url("old").unwrap(),
        });

        let mut reconciler =
            Reconciler::new(&session, registry, test_template(), Duration::from_secs(60));
        let reconciled = reconciler.reconcile(batch).await.unwrap();
        assert!(matches!(reconciled, Reconciled::Reused(ref h) if h.id == "old"));
    }

    #[tokio::test]
    async fn test_submitted_once_then_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(body_partial_json(json!({"name": "base_chunk_1_of_1"})))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"id": "o-42"})))
            .expect(1)
            .mount(&server)
            .await;

        let session = test_session(&server);
        let batch = &plan_batches(vec!["a", "b"], 10, "base").unwrap()[0];
        let mut reconciler = Reconciler::new(
            &session,
            OrderRegistry::default(),
            test_template(),
            Duration::ZERO,
        );

        let first = reconciler.reconcile(batch).await.unwrap();
        assert!(matches!(first, Reconciled::Submitted(_)));
        assert_eq!(
            first.handle().url.as_str(),
            format!("{}/orders/o-42", server.uri())
        );

        let second = reconciler.reconcile(batch).await.unwrap();
        assert_eq!(second, Reconciled::Reused(first.into_handle()));
    }

    #[tokio::test]
    async fn test_submission_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let session = test_session(&server);
        let batch = &plan_batches(vec!["a"], 10, "base").unwrap()[0];
        let mut reconciler = Reconciler::new(
            &session,
            OrderRegistry::default(),
            test_template(),
            Duration::ZERO,
        );
        let err = reconciler.reconcile(batch).await.unwrap_err();
        match err {
            Error::OrderSubmission { status, .. } => assert_eq!(status.as_u16(), 429),
            other => panic!("Unexpected error: {other:?}"),
        }
        assert!(reconciler.registry().is_empty());
    }

    #[tokio::test]
    async fn test_delay_between_submissions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"id": "o"})))
            .mount(&server)
            .await;

        let session = test_session(&server);
        let batches = plan_batches(vec!["a", "b"], 1, "base").unwrap();
        let mut reconciler = Reconciler::new(
            &session,
            OrderRegistry::default(),
            test_template(),
            Duration::from_millis(200),
        );

        let start = Instant::now();
        reconciler.reconcile(&batches[0]).await.unwrap();
        reconciler.reconcile(&batches[1]).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
