use std::{sync::Arc, time::Duration};

use callqa_service::{CallQaService, ReapReport, RetryReport};

#[derive(Debug, Default)]
pub struct PassReport {
	pub organizations: usize,
	pub failed_organizations: usize,
	pub fetched: u64,
	pub reap: Option<ReapReport>,
	pub retry: Option<RetryReport>,
}

/// Runs passes every `sync.interval_seconds` until Ctrl-C.
pub async fn run_worker(service: Arc<CallQaService>) -> color_eyre::Result<()> {
	let interval = Duration::from_secs(service.cfg.sync.interval_seconds);
	let mut ticker = tokio::time::interval(interval);

	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	tracing::info!(interval_seconds = interval.as_secs(), "Worker started.");

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				run_once(&service).await;
			},
			signal = tokio::signal::ctrl_c() => {
				if let Err(err) = signal {
					tracing::error!(error = %err, "Failed to listen for shutdown signal.");
				}

				tracing::info!("Worker stopping.");

				return Ok(());
			},
		}
	}
}

/// One sync, reap and retry pass. Each step logs its own failure and the pass continues.
pub async fn run_once(service: &CallQaService) -> PassReport {
	let mut report = PassReport::default();

	match service.sync_all(None, None).await {
		Ok(outcomes) => {
			report.organizations = outcomes.len();
			report.failed_organizations =
				outcomes.iter().filter(|outcome| outcome.error.is_some()).count();
			report.fetched = outcomes.iter().filter_map(|outcome| outcome.fetched).sum();
		},
		Err(err) => {
			tracing::error!(error = %err, "Scheduled sync failed.");
		},
	}

	match service.reap_stale_claims().await {
		Ok(reap) => report.reap = Some(reap),
		Err(err) => {
			tracing::error!(error = %err, "Stale-claim reaping failed.");
		},
	}

	match service.retry_failed().await {
		Ok(retry) => report.retry = Some(retry),
		Err(err) => {
			tracing::error!(error = %err, "Failed-call retry failed.");
		},
	}

	tracing::info!(
		organizations = report.organizations,
		failed_organizations = report.failed_organizations,
		fetched = report.fetched,
		reaped = report.reap.as_ref().map_or(0, |reap| reap.reaped),
		retried = report.retry.as_ref().map_or(0, |retry| retry.retried),
		"Worker pass finished."
	);

	report
}
