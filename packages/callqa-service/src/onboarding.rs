use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{CallQaService, Error, Result};
use callqa_domain::{Identity, Role};
use callqa_storage::{
	models::{Organization, OrganizationMember},
	organizations,
};

const DEFAULT_PLAN: &str = "free";
const MAX_NAME_CHARS: usize = 120;
const MAX_PLAN_CHARS: usize = 32;
const MAX_SLUG_CHARS: usize = 48;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateOrganizationRequest {
	pub name: String,
	pub plan: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateOrganizationResponse {
	pub org_id: Uuid,
	pub name: String,
	pub slug: String,
	pub plan: String,
	pub role: Role,
}

impl CallQaService {
	/// Creates an organization with the caller as accepted owner. Single use per identity; the
	/// organization and membership commit together or not at all.
	pub async fn create_organization(
		&self,
		identity: &Identity,
		req: CreateOrganizationRequest,
	) -> Result<CreateOrganizationResponse> {
		let name = req.name.trim();

		if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
			return Err(Error::InvalidRequest {
				message: format!("name must be 1-{MAX_NAME_CHARS} characters."),
			});
		}

		let plan = req
			.plan
			.as_deref()
			.map(|plan| plan.trim().to_ascii_lowercase())
			.filter(|plan| !plan.is_empty())
			.unwrap_or_else(|| DEFAULT_PLAN.to_string());

		if plan.len() > MAX_PLAN_CHARS
			|| !plan.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
		{
			return Err(Error::InvalidRequest {
				message: "plan must be a short identifier.".to_string(),
			});
		}

		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;

		organizations::lock_user_onboarding(&mut *tx, identity.user_id).await?;

		if organizations::membership_for_user(&mut *tx, identity.user_id).await?.is_some() {
			return Err(Error::InvalidRequest {
				message: "Identity already belongs to an organization.".to_string(),
			});
		}

		let org_id = Uuid::new_v4();
		let base = slugify(name);
		let slug = if organizations::slug_taken(&mut *tx, &base).await? {
			format!("{base}-{}", &org_id.simple().to_string()[..8])
		} else {
			base
		};
		let org = Organization {
			id: org_id,
			name: name.to_string(),
			slug,
			plan,
			is_active: true,
			created_at: now,
		};
		let member = OrganizationMember {
			org_id,
			user_id: identity.user_id,
			role: Role::Owner.as_str().to_string(),
			accepted_at: Some(now),
			created_at: now,
		};

		organizations::insert_organization(&mut *tx, &org).await?;
		organizations::insert_member(&mut *tx, &member).await?;

		tx.commit().await?;

		tracing::info!(
			org_id = %org.id,
			user_id = %identity.user_id,
			slug = org.slug.as_str(),
			"Organization created."
		);

		Ok(CreateOrganizationResponse {
			org_id: org.id,
			name: org.name,
			slug: org.slug,
			plan: org.plan,
			role: Role::Owner,
		})
	}
}

pub(crate) fn slugify(name: &str) -> String {
	let mut slug = String::with_capacity(name.len());

	for c in name.chars() {
		if c.is_ascii_alphanumeric() {
			slug.push(c.to_ascii_lowercase());
		} else if !slug.is_empty() && !slug.ends_with('-') {
			slug.push('-');
		}
	}

	let slug: String = slug.chars().take(MAX_SLUG_CHARS).collect();
	let slug = slug.trim_end_matches('-');

	if slug.is_empty() { "org".to_string() } else { slug.to_string() }
}
