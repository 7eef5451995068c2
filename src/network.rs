//! Host identity helpers.
//!
//! Job names installed by a node are suffixed with that node's instance id
//! so that residue left behind by a crashed process can be purged on
//! recovery. The id must be stable for the lifetime of the process and
//! safe to embed in job names and DNS-ish labels.

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

/// The local host name, taken from the `HOSTNAME`/`HOST` environment, or
/// `"unknown"` if neither is set.
pub fn host_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".into())
}

/// Lowercases `raw` and replaces everything outside `[a-z0-9]` with `-`,
/// trimming leading/trailing dashes. Never returns an empty string.
pub fn sanitize_dns_label(raw: &str) -> String {
    let label: String = raw
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let label = label.trim_matches('-');
    if label.is_empty() {
        "unknown".into()
    } else {
        label.to_string()
    }
}

/// First 4 bytes of the digest of `input`, lower hex (8 characters).
/// Used for length, not security.
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

static INSTANCE_ID: Lazy<String> = Lazy::new(|| {
    let host = host_name();
    format!("{}-{}", sanitize_dns_label(&host), short_hash(&host))
});

/// This node's instance id: `<sanitized-host>-<short-hash>`. Cached for the
/// process lifetime.
pub fn instance_id() -> &'static str {
    &INSTANCE_ID
}
