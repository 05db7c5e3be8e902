//! End to end acquisition: search, plan, reconcile orders, poll, download.
use crate::batch::{plan_batches, Batch};
use crate::config::AcquisitionConfig;
use crate::download::{download_results, DownloadReport};
use crate::error::{Error, Result};
use crate::orders::{OrderHandle, OrderRegistry, Reconciled, Reconciler};
use crate::poll::{poll_order, OrderState, PollOutcome};
use crate::search::{feature_ids, search, Feature};
use crate::session::Session;
use std::path::PathBuf;

#[derive(Debug)]
pub struct SearchPlan {
    pub basename: String,
    pub features: Vec<Feature>,
    pub batches: Vec<Batch>,
}

#[derive(Debug)]
pub enum BatchOutcome {
    /// The order reached a terminal state and its results were fetched.
    Finished {
        state: OrderState,
        downloads: DownloadReport,
    },
    /// Polling gave up; holds an `Error::TimeoutIncomplete`.
    Incomplete(Error),
    /// The order status could not be read.
    Failed(Error),
}

#[derive(Debug)]
pub struct BatchReport {
    pub batch: String,
    pub order: OrderHandle,
    pub submitted: bool,
    pub outcome: BatchOutcome,
}

#[derive(Debug)]
pub struct AcquisitionReport {
    pub scenes: usize,
    pub output_dir: PathBuf,
    pub batches: Vec<BatchReport>,
}

impl AcquisitionReport {
    pub fn submitted(&self) -> usize {
        self.batches.iter().filter(|b| b.submitted).count()
    }

    /// Timeouts, unreadable orders and failed downloads across all batches.
    pub fn problems(&self) -> Vec<&Error> {
        self.batches
            .iter()
            .flat_map(|b| match &b.outcome {
                BatchOutcome::Finished { downloads, .. } => downloads.failed.iter().collect(),
                BatchOutcome::Incomplete(e) | BatchOutcome::Failed(e) => vec![e],
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.problems().is_empty()
    }
}

/// Runs the search and splits the results into named batches, without placing orders.
pub async fn plan(session: &Session, config: &AcquisitionConfig) -> Result<SearchPlan> {
    config.validate()?;
    let basename = config.order_basename()?;

    let features = search(session, &config.search_request()).await?;
    let batches = plan_batches(feature_ids(&features), config.order.chunk_size, &basename)?;
    log::info!(
        "Planned {} batch(es) of at most {} scenes",
        batches.len(),
        config.order.chunk_size
    );

    Ok(SearchPlan {
        basename,
        features,
        batches,
    })
}

/// Places (or reuses) one order per batch, then waits on each and downloads its results.
///
/// Search and submission errors abort the run. Timeouts, status request
/// failures and download failures are collected in the report.
pub async fn run(session: &Session, config: &AcquisitionConfig) -> Result<AcquisitionReport> {
    let output_dir = config.output_dir()?;
    let plan = plan(session, config).await?;

    let registry = OrderRegistry::fetch(session).await?;
    let mut reconciler = Reconciler::new(
        session,
        registry,
        config.order_template(),
        config.submit_delay(),
    );

    let mut placed: Vec<(&Batch, Reconciled)> = vec![];
    for batch in &plan.batches {
        let reconciled = reconciler.reconcile(batch).await?;
        placed.push((batch, reconciled));
    }

    tokio::fs::create_dir_all(&output_dir).await?;

    let mut batches = vec![];
    for (batch, reconciled) in placed {
        let submitted = matches!(reconciled, Reconciled::Submitted(_));
        let order = reconciled.into_handle();
        log::info!("Processing order: {}", order.url);

        let outcome = match poll_order(session, &order, config.poll_budget()).await {
            Ok(PollOutcome::Terminal(status)) => {
                let downloads = download_results(
                    session,
                    status.results(),
                    &output_dir,
                    config.download.overwrite,
                )
                .await;
                BatchOutcome::Finished {
                    state: status.state,
                    downloads,
                }
            }
            Ok(PollOutcome::TimeoutIncomplete(status)) => {
                BatchOutcome::Incomplete(Error::TimeoutIncomplete {
                    order: order.name.clone(),
                    state: status.state.to_string(),
                })
            }
            Err(e) => {
                log::warn!("Giving up on order {}: {e}", order.name);
                BatchOutcome::Failed(e)
            }
        };

        batches.push(BatchReport {
            batch: batch.name.clone(),
            order,
            submitted,
            outcome,
        });
    }

    Ok(AcquisitionReport {
        scenes: plan.features.len(),
        output_dir,
        batches,
    })
}
