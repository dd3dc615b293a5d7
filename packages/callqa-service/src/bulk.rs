use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CallQaService, Error, Result, transition};
use callqa_domain::{AuthContext, BulkAction};
use callqa_storage::calls;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkRequest {
	pub ids: Vec<String>,
	pub action: BulkAction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BulkResponse {
	pub requested: usize,
	pub updated: usize,
	pub ids_updated: Vec<Uuid>,
}

impl CallQaService {
	/// Applies a reviewer action to the caller-owned subset of `ids`. Foreign, unknown and
	/// malformed ids are dropped without error.
	pub async fn bulk_apply(&self, ctx: &AuthContext, req: BulkRequest) -> Result<BulkResponse> {
		let requested = req.ids.len();

		if requested == 0 {
			return Err(Error::InvalidRequest {
				message: "ids must contain at least one call id.".to_string(),
			});
		}
		if requested > self.cfg.bulk.max_ids {
			return Err(Error::InvalidRequest {
				message: format!("ids must contain at most {} call ids.", self.cfg.bulk.max_ids),
			});
		}

		let candidates = parse_ids(&req.ids);
		let (from, to) = req.action.transition();
		let mut tx = self.db.pool.begin().await?;
		let owned = calls::owned_call_ids(&mut *tx, ctx.org_id, &candidates).await?;
		let ids_updated = transition::transition_many(&mut tx, ctx.org_id, &owned, from, to).await?;

		tx.commit().await?;

		tracing::info!(
			org_id = %ctx.org_id,
			user_id = %ctx.user_id,
			action = req.action.as_str(),
			requested,
			owned = owned.len(),
			updated = ids_updated.len(),
			"Bulk action applied."
		);

		Ok(BulkResponse { requested, updated: ids_updated.len(), ids_updated })
	}
}

fn parse_ids(raw: &[String]) -> Vec<Uuid> {
	let mut seen = HashSet::with_capacity(raw.len());

	raw.iter()
		.filter_map(|id| Uuid::parse_str(id.trim()).ok())
		.filter(|id| seen.insert(*id))
		.collect()
}
