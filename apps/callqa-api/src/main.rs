use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = callqa_api::Args::parse();

	callqa_api::run(args).await
}
