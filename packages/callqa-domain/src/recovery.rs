use regex::Regex;

pub const MAX_PROCESSING_ERROR_CHARS: usize = 500;
pub const DEFAULT_PROCESSING_ERROR: &str = "Unknown error";

const PERMANENT_PATTERNS: [&str; 8] = [
	r"(?i)no audio",
	r"(?i)empty audio",
	r"(?i)\bHTTP\s*(401|403|404|410)\b",
	r"(?i)corrupt",
	r"(?i)invalid audio",
	r"(?i)not found",
	r"(?i)access denied",
	r"(?i)unauthorized",
];
const TRANSIENT_PATTERNS: [&str; 11] = [
	r"(?i)out of memory",
	r"(?i)OutOfMemoryError",
	r"(?i)timed?\s?out",
	r"(?i)connection\s?reset",
	r"(?i)network is unreachable",
	r"(?i)temporary failure",
	r"(?i)service\s?unavailable",
	r"(?i)upstream unavailable",
	r"(?i)stale claim",
	r"(?i)zombie",
	r"(?i)transient",
];

/// Text stored in `processing_error` when a call fails: blank input becomes the default
/// message and long input is cut to the column budget.
pub fn normalize_processing_error(raw: Option<&str>) -> String {
	let trimmed = raw.map(str::trim).unwrap_or_default();

	if trimmed.is_empty() {
		return DEFAULT_PROCESSING_ERROR.to_string();
	}

	trimmed.chars().take(MAX_PROCESSING_ERROR_CHARS).collect()
}

pub fn stale_claim_message(minutes: i64) -> String {
	format!("Stale claim reset after {minutes} minutes.")
}

/// Whether a failure looks transient enough to retry. Permanent patterns win over transient
/// ones; unmatched errors are not retried.
pub fn is_recoverable(error: &str) -> bool {
	if matches_any(&PERMANENT_PATTERNS, error) {
		return false;
	}

	matches_any(&TRANSIENT_PATTERNS, error)
}

fn matches_any(patterns: &[&str], text: &str) -> bool {
	patterns.iter().any(|pattern| Regex::new(pattern).map(|re| re.is_match(text)).unwrap_or(false))
}
