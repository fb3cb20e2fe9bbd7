//! GitHub integration: webhook validation and commit status updates.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Validate a GitHub webhook signature (X-Hub-Signature-256).
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        tracing::warn!("Webhook secret not configured, skipping validation");
        return true;
    }

    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// A commit status to publish on GitHub.
#[derive(Debug, Clone)]
pub struct CommitStatus<'a> {
    pub repo: &'a str,
    pub sha: &'a str,
    /// One of `pending`, `success`, `failure`, `error`.
    pub state: &'a str,
    pub description: &'a str,
    pub target_url: &'a str,
}

/// Post a commit status to GitHub.
pub async fn post_status(token: &str, status: &CommitStatus<'_>) -> anyhow::Result<()> {
    if token.is_empty() {
        tracing::debug!("GitHub token not set, skipping status update");
        return Ok(());
    }

    let url = format!(
        "https://api.github.com/repos/{}/statuses/{}",
        status.repo, status.sha
    );
    let body = serde_json::json!({
        "state": status.state,
        "description": truncate(status.description, 140),
        "target_url": status.target_url,
        "context": "zapp",
    });

    let client = reqwest::Client::new();
    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {token}"))
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "zapp")
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        tracing::warn!("GitHub status update failed: {} {}", status, text);
    }

    Ok(())
}

// GitHub rejects descriptions longer than 140 characters.
fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_matching_signature() {
        let payload = br#"{"ref":"refs/heads/master"}"#;
        assert!(validate_signature("s3cret", payload, &sign("s3cret", payload)));
    }

    #[test]
    fn rejects_wrong_or_malformed_signature() {
        let payload = b"{}";
        assert!(!validate_signature("s3cret", payload, &sign("other", payload)));
        assert!(!validate_signature("s3cret", payload, "sha256=not-hex"));
        assert!(!validate_signature("s3cret", payload, ""));
    }

    #[test]
    fn empty_secret_skips_validation() {
        assert!(validate_signature("", b"{}", ""));
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 140), "short");
    }
}
