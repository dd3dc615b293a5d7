use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = callqa_worker::Args::parse();

	callqa_worker::run(args).await
}
