use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use time::{Duration, OffsetDateTime};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Where a call's audio lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioRef<'a> {
	/// Object key in the internal audio store.
	Stored(&'a str),
	/// URL hosted by the upstream provider.
	Provider(&'a str),
}
impl<'a> AudioRef<'a> {
	pub fn parse(raw: &'a str) -> Option<Self> {
		let raw = raw.trim();

		if raw.is_empty() {
			return None;
		}

		let lower = raw.to_ascii_lowercase();

		if lower.starts_with("http://") || lower.starts_with("https://") {
			Some(AudioRef::Provider(raw))
		} else {
			Some(AudioRef::Stored(raw.trim_start_matches('/')))
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SignedAudioUrl {
	pub url: String,
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
}

/// Builds an expiring link to a stored object. Each key segment is percent-encoded, so the path
/// the media host sees is exactly the signed key.
pub fn sign_stored_audio(
	key: &str,
	cfg: &callqa_config::Audio,
	now: OffsetDateTime,
) -> Option<SignedAudioUrl> {
	let key = key.trim_start_matches('/');
	let expires_at = now.checked_add(Duration::seconds(cfg.signed_url_ttl_seconds))?;
	let expires = expires_at.unix_timestamp();
	let signature = signature(key, expires, &cfg.signing_secret)?;
	let mut url = Url::parse(&cfg.public_base_url).ok()?;

	url.path_segments_mut().ok()?.pop_if_empty().extend(key.split('/'));
	url.query_pairs_mut()
		.append_pair("expires", &expires.to_string())
		.append_pair("signature", &signature);

	let expires_at = OffsetDateTime::from_unix_timestamp(expires).ok()?;

	Some(SignedAudioUrl { url: url.into(), expires_at })
}

fn signature(key: &str, expires: i64, secret: &str) -> Option<String> {
	let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;

	mac.update(signing_input(key, expires).as_bytes());

	Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

fn signing_input(key: &str, expires: i64) -> String {
	format!("{key}\n{expires}")
}
