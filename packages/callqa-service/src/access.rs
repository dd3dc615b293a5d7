use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{CallQaService, Error, Result};
use callqa_domain::{AuthContext, Identity, identity};
use callqa_storage::{calls, models::Call};

impl CallQaService {
	/// Verifies a bearer token. A missing or unverifiable token is `AuthenticationRequired`.
	pub fn authenticate(&self, token: Option<&str>) -> Result<Identity> {
		let token = token.map(str::trim).filter(|token| !token.is_empty());
		let Some(token) = token else {
			return Err(Error::AuthenticationRequired);
		};

		identity::verify_token(token, &self.cfg.auth, OffsetDateTime::now_utc()).map_err(|err| {
			tracing::debug!(error = %err, "Rejected identity token.");

			Error::AuthenticationRequired
		})
	}

	/// Tenant and role of a token, or `None` when the token is invalid or carries no
	/// organization.
	pub fn resolve(&self, token: &str) -> Option<AuthContext> {
		self.authenticate(Some(token)).ok()?.auth_context()
	}

	/// Like [`CallQaService::resolve`], but tells unauthenticated callers apart from
	/// authenticated ones without an organization.
	pub fn authorize(&self, token: Option<&str>) -> Result<AuthContext> {
		self.authenticate(token)?.auth_context().ok_or(Error::OrganizationRequired)
	}
}

pub fn require_admin(ctx: &AuthContext) -> Result<()> {
	if ctx.role.is_admin() {
		Ok(())
	} else {
		Err(Error::Forbidden { message: "Owner or admin role is required.".to_string() })
	}
}

/// Loads a call only if it belongs to the caller's organization. Foreign and missing calls are
/// indistinguishable.
pub(crate) async fn verify_call_ownership<'e, E>(
	executor: E,
	ctx: &AuthContext,
	call_id: Uuid,
) -> Result<Call>
where
	E: PgExecutor<'e>,
{
	calls::get_call(executor, ctx.org_id, call_id).await?.ok_or_else(call_not_found)
}

pub(crate) async fn lock_owned_call<'e, E>(
	executor: E,
	ctx: &AuthContext,
	call_id: Uuid,
) -> Result<Call>
where
	E: PgExecutor<'e>,
{
	calls::lock_call(executor, ctx.org_id, call_id).await?.ok_or_else(call_not_found)
}

fn call_not_found() -> Error {
	Error::NotFound { message: "Call not found.".to_string() }
}
