pub mod worker;

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use callqa_service::{BackfillOrder, BackfillRequest, CallQaService};
use callqa_storage::db::Db;

#[derive(Debug, Parser)]
#[command(
	version = callqa_cli::VERSION,
	rename_all = "kebab",
	styles = callqa_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Run the sync, reap and retry loop until interrupted (default).
	Run,
	/// Run a single pass of the loop and exit.
	Once,
	/// Sync a historical range for one organization in fixed-size chunks.
	Backfill {
		#[arg(long)]
		org_id: Uuid,
		#[arg(long, value_parser = parse_time)]
		start: OffsetDateTime,
		#[arg(long, value_parser = parse_time)]
		end: OffsetDateTime,
		#[arg(long)]
		chunk_hours: Option<i64>,
		/// Walk chunks oldest first instead of newest first.
		#[arg(long)]
		fifo: bool,
	},
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = callqa_config::load(&args.config)?;
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema().await?;

	let service = Arc::new(CallQaService::new(config, db)?);

	match args.command.unwrap_or(Command::Run) {
		Command::Run => worker::run_worker(service).await,
		Command::Once => {
			worker::run_once(&service).await;

			Ok(())
		},
		Command::Backfill { org_id, start, end, chunk_hours, fifo } => {
			let order = if fifo { BackfillOrder::Fifo } else { BackfillOrder::Lifo };
			let report = service
				.backfill(BackfillRequest { org_id, start, end, chunk_hours, order })
				.await?;

			tracing::info!(
				org_id = %org_id,
				chunks = report.chunks,
				fetched = report.fetched,
				failed_chunks = report.failed_chunks,
				"Backfill finished."
			);

			Ok(())
		},
	}
}

fn parse_time(raw: &str) -> Result<OffsetDateTime, String> {
	OffsetDateTime::parse(raw.trim(), &Rfc3339)
		.map_err(|err| format!("expected an RFC 3339 timestamp: {err}"))
}
