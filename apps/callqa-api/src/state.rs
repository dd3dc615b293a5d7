use std::sync::Arc;

use callqa_service::CallQaService;
use callqa_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<CallQaService>,
}
impl AppState {
	pub async fn new(config: callqa_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		let service = CallQaService::new(config, db)?;

		Ok(Self { service: Arc::new(service) })
	}
}
