pub mod access;
pub mod bulk;
pub mod calls;
pub mod onboarding;
pub mod recovery;
pub mod sync;
pub mod transition;

mod error;

pub use access::require_admin;
pub use bulk::{BulkRequest, BulkResponse};
pub use calls::{AudioLink, CallView, ListCallsRequest, ListCallsResponse, PatchCallRequest};
pub use error::{Error, Result};
pub use onboarding::{CreateOrganizationRequest, CreateOrganizationResponse};
pub use recovery::{ReapReport, RetryReport};
pub use sync::{BackfillOrder, BackfillReport, BackfillRequest, OrgSyncOutcome, SyncRequest, SyncResponse};
pub use transition::{ClaimRequest, TransitionFields, TransitionRequest};

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use callqa_config::{Config, Upstream};
use callqa_providers::call_logs::{self, Account, CallLogPage, TimeWindow};
use callqa_storage::db::Db;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Paginated source of provider call records.
pub trait CallLogSource
where
	Self: Send + Sync,
{
	fn fetch_page<'a>(
		&'a self,
		cfg: &'a Upstream,
		account: &'a Account,
		window: TimeWindow,
		offset: u32,
		size: u32,
	) -> BoxFuture<'a, callqa_providers::Result<CallLogPage>>;
}

struct HttpCallLogSource {
	client: reqwest::Client,
}
impl CallLogSource for HttpCallLogSource {
	fn fetch_page<'a>(
		&'a self,
		cfg: &'a Upstream,
		account: &'a Account,
		window: TimeWindow,
		offset: u32,
		size: u32,
	) -> BoxFuture<'a, callqa_providers::Result<CallLogPage>> {
		Box::pin(call_logs::fetch_page(&self.client, cfg, account, window, offset, size))
	}
}

pub struct CallQaService {
	pub cfg: Config,
	pub db: Db,
	pub source: Arc<dyn CallLogSource>,
}
impl CallQaService {
	pub fn new(cfg: Config, db: Db) -> Result<Self> {
		let client = callqa_providers::http_client(&cfg.upstream)?;

		Ok(Self { cfg, db, source: Arc::new(HttpCallLogSource { client }) })
	}

	pub fn with_source(cfg: Config, db: Db, source: Arc<dyn CallLogSource>) -> Self {
		Self { cfg, db, source }
	}

	pub(crate) fn upstream_timeout(&self) -> Duration {
		Duration::from_millis(self.cfg.upstream.timeout_ms)
	}
}
