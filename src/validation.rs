//! Input validation and log sanitisation.
//!
//! This module provides validation functions including:
//! - EVM address validation for operator and feed input
//! - Provider URL validation with HTTPS enforcement
//! - Redaction of secrets before they reach the logs

use anyhow::{anyhow, Result};
use regex::Regex;
use url::Url;

/// Validate a 0x-prefixed, 20-byte hex EVM address.
///
/// # Returns
/// * `Ok(String)` with the lowercased address
/// * `Err` if the format is wrong
pub fn validate_evm_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    if !is_evm_address(trimmed) {
        return Err(anyhow!("Invalid EVM address: {}", trimmed));
    }
    Ok(trimmed.to_lowercase())
}

/// Whether `address` looks like an EVM address
pub fn is_evm_address(address: &str) -> bool {
    let address = address.trim();
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate a provider URL.
///
/// # Returns
/// * `Ok(String)` if valid HTTPS URL (HTTP allowed for localhost)
/// * `Err` if invalid or not HTTPS
pub fn validate_api_url(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str).map_err(|e| anyhow!("Invalid URL format: {}", e))?;

    let host = url.host_str().unwrap_or("");
    if url.scheme() != "https" && !host.contains("localhost") && !host.starts_with("127.0.0.1") {
        return Err(anyhow!("Provider URL must use HTTPS: {}", url_str));
    }

    Ok(url.to_string())
}

/// Sanitize log output to prevent API keys and bot tokens leaking.
pub fn sanitize_for_logging(input: &str) -> String {
    let patterns = [
        (r"bot\d+:[A-Za-z0-9_\-]+", "bot[REDACTED]"),
        (r"sk-[A-Za-z0-9_\-]{16,}", "[REDACTED-KEY]"),
        (r"[a-zA-Z0-9]{64,}", "[REDACTED-KEY]"),
        (r"Bearer [a-zA-Z0-9\-._~+/%]+=*", "Bearer [REDACTED]"),
        (r"(?i)(api_?key|apikey|token)[=:]\s*[a-zA-Z0-9\-._~+/]+=*", "$1=[REDACTED]"),
    ];

    let mut output = input.to_string();
    for (pattern, replacement) in patterns {
        if let Ok(re) = Regex::new(pattern) {
            output = re.replace_all(&output, replacement).to_string();
        }
    }
    output
}
