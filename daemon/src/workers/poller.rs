//! Polls one deployment until it reaches a terminal state

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use colored::Colorize;
use deploy_api::{Deployment, DeploymentStatus, StatusUpdate};
use tracing::{debug, info, warn};

use crate::errors::DeploydError;
use crate::http::client::DeploymentFetcher;

/// Poller options
#[derive(Debug, Clone)]
pub struct Options {
    /// Polling interval
    pub interval: Duration,

    /// Consecutive transient errors tolerated before giving up
    pub max_consecutive_errors: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_consecutive_errors: 5,
        }
    }
}

/// Poll `job_id`, handing each new update to `on_update` in order.
///
/// Returns the final document, or `None` if `shutdown_signal` fired first.
pub async fn run<S, F, U>(
    options: &Options,
    fetcher: &dyn DeploymentFetcher,
    job_id: &str,
    mut on_update: U,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) -> Result<Option<Deployment>, DeploydError>
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
    U: FnMut(&StatusUpdate),
{
    info!("Polling deployment {}", job_id);
    let mut seen = 0usize;
    let mut errors = 0u32;

    loop {
        match fetcher.fetch(job_id).await {
            Ok(deployment) => {
                errors = 0;
                for update in deployment.updates.iter().skip(seen) {
                    on_update(update);
                }
                seen = deployment.updates.len();
                if deployment.status.is_terminal() {
                    debug!("Deployment {} finished as {}", job_id, deployment.status);
                    return Ok(Some(deployment));
                }
            }
            Err(e @ DeploydError::NotFound(_)) => return Err(e),
            Err(e) => {
                errors += 1;
                warn!("Poll {} of {} failed: {}", errors, options.max_consecutive_errors, e);
                if errors >= options.max_consecutive_errors {
                    return Err(e);
                }
            }
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Poller shutting down...");
                return Ok(None);
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}

/// One terminal line per update
pub fn format_update(update: &StatusUpdate) -> String {
    let status = format!("{:>14}", update.status.as_str());
    let status = match update.status {
        DeploymentStatus::Completed => status.green().bold(),
        DeploymentStatus::Failed => status.red().bold(),
        _ => status.cyan(),
    };
    let mut line = format!(
        "{} {} {}",
        update.timestamp.format("%H:%M:%S").to_string().dimmed(),
        status,
        update.message
    );
    if let Some(details) = &update.details {
        for detail in details.lines() {
            line.push('\n');
            line.push_str(&format!("{:>24}{}", "", detail.dimmed()));
        }
    }
    line
}
