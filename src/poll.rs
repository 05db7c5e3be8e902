use crate::error::{status_and_body, Error, Result};
use crate::orders::OrderHandle;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Provider-reported order state. Anything that is not terminal is kept verbatim.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum OrderState {
    Success,
    Failed,
    Partial,
    Pending(String),
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Partial => "partial",
            Self::Pending(state) => state,
        }
    }
}

impl From<String> for OrderState {
    fn from(state: String) -> Self {
        match state.as_str() {
            "success" => Self::Success,
            "failed" => Self::Failed,
            "partial" => Self::Partial,
            _ => Self::Pending(state),
        }
    }
}

impl From<OrderState> for String {
    fn from(state: OrderState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One deliverable file of a completed order.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ResultArtifact {
    pub location: String,
    pub name: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct OrderStatus {
    pub state: OrderState,
    #[serde(rename = "_links", default)]
    links: StatusLinks,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
struct StatusLinks {
    #[serde(default)]
    results: Option<Vec<ResultArtifact>>,
}

impl OrderStatus {
    pub fn results(&self) -> &[ResultArtifact] {
        self.links.results.as_deref().unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PollBudget {
    pub num_loops: u32,
    pub wait: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    Terminal(OrderStatus),
    /// The budget ran out; carries the last status seen.
    TimeoutIncomplete(OrderStatus),
}

impl PollOutcome {
    pub fn status(&self) -> &OrderStatus {
        match self {
            Self::Terminal(status) | Self::TimeoutIncomplete(status) => status,
        }
    }
}

pub async fn fetch_status(session: &Session, order: &OrderHandle) -> Result<OrderStatus> {
    let response = session.get(order.url.as_str()).send().await?;
    if !response.status().is_success() {
        let (status, body) = status_and_body(response).await;
        return Err(Error::StatusRequest { status, body });
    }
    Ok(response.json().await?)
}

/// Polls the order until it is terminal or `budget.num_loops` polls have been made.
pub async fn poll_order(
    session: &Session,
    order: &OrderHandle,
    budget: PollBudget,
) -> Result<PollOutcome> {
    if budget.num_loops == 0 {
        return Err(Error::Configuration(
            "Poll loop count must be at least 1".to_string(),
        ));
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        let status = fetch_status(session, order).await?;
        log::info!(
            "Order {} is {} (poll {attempt}/{})",
            order.name,
            status.state,
            budget.num_loops
        );

        if status.state.is_terminal() {
            return Ok(PollOutcome::Terminal(status));
        }
        if attempt >= budget.num_loops {
            log::warn!(
                "Order {} still {} after {attempt} polls",
                order.name,
                status.state
            );
            return Ok(PollOutcome::TimeoutIncomplete(status));
        }
        tokio::time::sleep(budget.wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn setup(server: &MockServer) -> (Session, OrderHandle) {
        let session =
            Session::new("test-key", &server.uri(), &format!("{}/orders", server.uri())).unwrap();
        let order = OrderHandle {
            id: "o1".to_string(),
            name: "base_chunk_1_of_1".to_string(),
            url: session.order_url("o1").unwrap(),
        };
        (session, order)
    }

    fn budget(num_loops: u32) -> PollBudget {
        PollBudget {
            num_loops,
            wait: Duration::ZERO,
        }
    }

    #[test]
    fn test_state_parsing() {
        let status: OrderStatus = serde_json::from_value(json!({
            "state": "running",
            "_links": {"_self": "http://x"}
        }))
        .unwrap();
        assert_eq!(status.state, OrderState::Pending("running".to_string()));
        assert!(!status.state.is_terminal());
        assert!(status.results().is_empty());

        for (raw, state) in [
            ("success", OrderState::Success),
            ("failed", OrderState::Failed),
            ("partial", OrderState::Partial),
        ] {
            let parsed: OrderState = serde_json::from_value(json!(raw)).unwrap();
            assert_eq!(parsed, state);
            assert!(parsed.is_terminal());
        }
    }

    #[tokio::test]
    async fn test_stops_at_terminal_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/o1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "queued"})))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orders/o1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "state": "success",
                "_links": {"results": [{"location": "http://x/a.zip", "name": "o1/a.zip"}]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (session, order) = setup(&server);
        let outcome = poll_order(&session, &order, budget(10)).await.unwrap();
        match outcome {
            PollOutcome::Terminal(status) => {
                assert_eq!(status.state, OrderState::Success);
                assert_eq!(status.results()[0].name, "o1/a.zip");
            }
            other => panic!("Unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/o1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "running"})))
            .expect(3)
            .mount(&server)
            .await;

        let (session, order) = setup(&server);
        let outcome = poll_order(&session, &order, budget(3)).await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::TimeoutIncomplete(OrderStatus {
                state: OrderState::Pending("running".to_string()),
                links: StatusLinks::default(),
            })
        );
    }

    #[tokio::test]
    async fn test_failed_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/o1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "failed"})))
            .expect(1)
            .mount(&server)
            .await;

        let (session, order) = setup(&server);
        let outcome = poll_order(&session, &order, budget(5)).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Terminal(ref s) if s.state == OrderState::Failed));
        assert!(outcome.status().results().is_empty());
    }

    #[tokio::test]
    async fn test_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/o1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (session, order) = setup(&server);
        let err = poll_order(&session, &order, budget(5)).await.unwrap_err();
        assert!(matches!(err, Error::StatusRequest { .. }));
    }
}
