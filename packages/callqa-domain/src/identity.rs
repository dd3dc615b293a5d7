use std::{fmt, str::FromStr};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_ALGORITHM: &str = "HS256";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
	#[error("Identity token is malformed.")]
	Malformed,
	#[error("Identity token uses an unsupported algorithm.")]
	UnsupportedAlgorithm,
	#[error("Identity token signature is invalid.")]
	BadSignature,
	#[error("Identity token has expired.")]
	Expired,
	#[error("Identity token is not valid yet.")]
	NotYetValid,
	#[error("Identity token issuer is not accepted.")]
	WrongIssuer,
	#[error("Identity token subject is not a valid user id.")]
	InvalidSubject,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	Owner,
	Admin,
	Reviewer,
}
impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Role::Owner => "owner",
			Role::Admin => "admin",
			Role::Reviewer => "reviewer",
		}
	}

	pub fn is_admin(self) -> bool {
		matches!(self, Role::Owner | Role::Admin)
	}
}
impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for Role {
	type Err = ();

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw {
			"owner" => Ok(Role::Owner),
			"admin" => Ok(Role::Admin),
			"reviewer" => Ok(Role::Reviewer),
			_ => Err(()),
		}
	}
}

/// Registered and private claims carried by an identity token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
	pub sub: String,
	pub exp: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nbf: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iss: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub org_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrgMembership {
	pub org_id: Uuid,
	pub role: Role,
}

/// A verified caller. `org` is `None` for identities that have not joined an organization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
	pub user_id: Uuid,
	pub org: Option<OrgMembership>,
}
impl Identity {
	pub fn auth_context(&self) -> Option<AuthContext> {
		self.org.map(|org| AuthContext { user_id: self.user_id, org_id: org.org_id, role: org.role })
	}
}

/// Tenant and role of a request. Produced once per request and passed explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthContext {
	pub user_id: Uuid,
	pub org_id: Uuid,
	pub role: Role,
}

#[derive(Deserialize)]
struct Header {
	alg: String,
}

pub fn verify_token(
	token: &str,
	cfg: &callqa_config::Auth,
	now: OffsetDateTime,
) -> Result<Identity, TokenError> {
	let mut parts = token.trim().split('.');
	let (Some(header_part), Some(payload_part), Some(sig_part), None) =
		(parts.next(), parts.next(), parts.next(), parts.next())
	else {
		return Err(TokenError::Malformed);
	};
	let header: Header = decode_json(header_part)?;

	if header.alg != TOKEN_ALGORITHM {
		return Err(TokenError::UnsupportedAlgorithm);
	}

	let signature = URL_SAFE_NO_PAD.decode(sig_part).map_err(|_| TokenError::Malformed)?;
	let mut mac = HmacSha256::new_from_slice(cfg.token_secret.as_bytes())
		.map_err(|_| TokenError::BadSignature)?;

	mac.update(header_part.as_bytes());
	mac.update(b".");
	mac.update(payload_part.as_bytes());
	mac.verify_slice(&signature).map_err(|_| TokenError::BadSignature)?;

	let claims: Claims = decode_json(payload_part)?;
	let now = now.unix_timestamp();

	if now > claims.exp.saturating_add(cfg.leeway_seconds) {
		return Err(TokenError::Expired);
	}
	if claims.nbf.is_some_and(|nbf| now.saturating_add(cfg.leeway_seconds) < nbf) {
		return Err(TokenError::NotYetValid);
	}
	if cfg.issuer.is_some() && claims.iss != cfg.issuer {
		return Err(TokenError::WrongIssuer);
	}

	let user_id = Uuid::parse_str(&claims.sub).map_err(|_| TokenError::InvalidSubject)?;

	Ok(Identity { user_id, org: org_membership(&claims) })
}

/// Mints an HS256 token for `claims`. Issuance belongs to the identity provider; this exists
/// for local tooling and tests.
pub fn sign_token(claims: &Claims, secret: &str) -> Result<String, TokenError> {
	let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
	let payload = serde_json::to_vec(claims).map_err(|_| TokenError::Malformed)?;
	let payload = URL_SAFE_NO_PAD.encode(payload);
	let mut mac =
		HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| TokenError::BadSignature)?;

	mac.update(header.as_bytes());
	mac.update(b".");
	mac.update(payload.as_bytes());

	let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

	Ok(format!("{header}.{payload}.{signature}"))
}

fn org_membership(claims: &Claims) -> Option<OrgMembership> {
	let org_id = Uuid::parse_str(claims.org_id.as_deref()?).ok()?;
	let role = claims.role.as_deref()?.parse().ok()?;

	Some(OrgMembership { org_id, role })
}

fn decode_json<T>(part: &str) -> Result<T, TokenError>
where
	T: for<'de> Deserialize<'de>,
{
	let bytes = URL_SAFE_NO_PAD.decode(part).map_err(|_| TokenError::Malformed)?;

	serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}
