//! Telegram MarkdownV2 rendering for breakdowns, approval requests and stats

use crate::types::{AnalysisStats, Claim, TokenBreakdown};

/// Telegram hard limit per message
pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;
/// Claims below this confidence are tagged "(unverified)"
pub const VERIFIED_CONFIDENCE: f64 = 0.7;

const MAX_PROS: usize = 5;
const MAX_CONS: usize = 4;
const TRUNCATION_MARKER: &str = "\n\n\\[Truncated\\]";

/// Escape every MarkdownV2 reserved character
pub fn escape_markdown(text: &str) -> String {
    const SPECIAL: &[char] = &[
        '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.',
        '!',
    ];
    let mut escaped = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        if SPECIAL.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Cut to the Telegram limit without leaving a dangling escape
pub fn truncate_message(message: String) -> String {
    if message.chars().count() <= TELEGRAM_MAX_MESSAGE_LENGTH {
        return message;
    }
    let keep = TELEGRAM_MAX_MESSAGE_LENGTH - 100;
    let mut cut: String = message.chars().take(keep).collect();

    let trailing_backslashes = cut.chars().rev().take_while(|c| *c == '\\').count();
    if trailing_backslashes % 2 == 1 {
        cut.pop();
    }
    cut.push_str(TRUNCATION_MARKER);
    cut
}

fn claim_lines(claims: &[Claim], limit: usize, bullet: &str, empty: &str) -> String {
    if claims.is_empty() {
        return format!("{} {}", bullet, escape_markdown(empty));
    }
    claims
        .iter()
        .take(limit)
        .map(|claim| {
            let mut line = format!("{} {}", bullet, escape_markdown(&claim.text));
            if claim.confidence < VERIFIED_CONFIDENCE {
                line.push_str(" \\(unverified\\)");
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn dev_link(breakdown: &TokenBreakdown) -> String {
    match (&breakdown.dev_twitter_url, &breakdown.dev_twitter_handle) {
        (Some(url), _) => escape_markdown(url),
        (None, Some(handle)) => escape_markdown(&format!("https://twitter.com/{}", handle)),
        (None, None) => "Anonymous".to_string(),
    }
}

fn render_breakdown(breakdown: &TokenBreakdown) -> String {
    format!(
        "{emoji} ${symbol} \\- ${fdv} FDV\n\nDev: {dev}\n\nPros:\n{pros}\n\nCons:\n{cons}\n\nContract: `{address}`\n{dexscreener}",
        emoji = breakdown.risk_rating.emoji(),
        symbol = escape_markdown(&breakdown.symbol),
        fdv = escape_markdown(&breakdown.fdv_display),
        dev = dev_link(breakdown),
        pros = claim_lines(&breakdown.pros, MAX_PROS, "\\+", "No clear pros identified"),
        cons = claim_lines(&breakdown.cons, MAX_CONS, "\\-", "No significant cons found"),
        address = breakdown.token_address.replace(['`', '\\'], ""),
        dexscreener = escape_markdown(&breakdown.dexscreener_url),
    )
}

pub fn format_breakdown(breakdown: &TokenBreakdown) -> String {
    truncate_message(render_breakdown(breakdown))
}

/// Admin-chat message for a breakdown held for review
pub fn format_approval_request(breakdown: &TokenBreakdown, job_id: &str) -> String {
    let reasons = breakdown
        .human_review_reasons
        .iter()
        .map(|r| format!("\\- {}", escape_markdown(r)))
        .collect::<Vec<_>>()
        .join("\n");

    let footer = format!(
        "\n\nReview reasons:\n{}\n\n/approve {} or /reject {}",
        reasons,
        escape_markdown(job_id),
        escape_markdown(job_id)
    );

    // Reasons and commands must survive truncation
    let body_budget = TELEGRAM_MAX_MESSAGE_LENGTH
        .saturating_sub(footer.chars().count())
        .saturating_sub("APPROVAL REQUIRED\n\n".len());
    let mut body = render_breakdown(breakdown);
    if body.chars().count() > body_budget {
        body = body.chars().take(body_budget.saturating_sub(TRUNCATION_MARKER.len())).collect();
        if body.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1 {
            body.pop();
        }
        body.push_str(TRUNCATION_MARKER);
    }

    truncate_message(format!("APPROVAL REQUIRED\n\n{}{}", body, footer))
}

pub fn format_stats(stats: &AnalysisStats) -> String {
    let status = |key: &str| stats.by_status.get(key).copied().unwrap_or(0);
    let rating = |key: &str| stats.by_rating.get(key).copied().unwrap_or(0);

    let message = format!(
        "Token Analysis Stats ({}h)\n\nTotal analyzed: {}\nPublished: {}\nRejected: {}\nFailed: {}\nPending approval: {}\n\nBy rating:\n  GREEN: {}\n  YELLOW: {}\n  ORANGE: {}\n  RED: {}",
        stats.window_hours,
        stats.total,
        status("published"),
        status("rejected"),
        status("failed"),
        status("awaiting_approval"),
        rating("green"),
        rating("yellow"),
        rating("orange"),
        rating("red"),
    );
    escape_markdown(&message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RiskRating;
    use chrono::Utc;

    fn breakdown() -> TokenBreakdown {
        TokenBreakdown {
            token_address: "0xabc".to_string(),
            analyzed_at: Utc::now(),
            symbol: "MOON_AI".to_string(),
            name: "Moon".to_string(),
            fdv_usd: 2_500_000.0,
            fdv_display: "2.5M".to_string(),
            risk_rating: RiskRating::Yellow,
            primary_reason: "Moderate liquidity - watch for changes".to_string(),
            overall_confidence: 0.8,
            overall_assessment: None,
            dev_twitter_url: None,
            dev_twitter_handle: Some("moon_dev".to_string()),
            pros: vec![Claim::pro("Strong liquidity ($80,000)", 0.95, "DexScreener")],
            cons: vec![Claim::con("Team claims an audit", 0.4, "analysis")],
            requires_human_review: true,
            human_review_reasons: vec!["Low confidence score: 0.55".to_string()],
            dexscreener_url: "https://dexscreener.com/base/0xabc".to_string(),
            contract_url: "https://basescan.org/token/0xabc".to_string(),
            processing_time_seconds: 1.2,
            contract_analysis: None,
            dev_profile: None,
            on_chain_metrics: None,
        }
    }

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("a_b.c!"), "a\\_b\\.c\\!");
        assert_eq!(escape_markdown("(x)"), "\\(x\\)");
    }

    #[test]
    fn test_breakdown_layout() {
        let message = format_breakdown(&breakdown());

        assert!(message.starts_with("\u{1F7E8} $MOON\\_AI \\- $2\\.5M FDV"));
        assert!(message.contains("Dev: https://twitter\\.com/moon\\_dev"));
        assert!(message.contains("\\+ Strong liquidity \\($80,000\\)"));
        assert!(message.contains("\\- Team claims an audit \\(unverified\\)"));
        assert!(message.contains("Contract: `0xabc`"));
    }

    #[test]
    fn test_long_message_is_truncated() {
        let mut long = breakdown();
        long.pros = (0..5)
            .map(|i| Claim::pro(format!("{} {}", i, "x".repeat(1500)), 0.9, "test"))
            .collect();

        let message = format_breakdown(&long);
        assert!(message.chars().count() <= TELEGRAM_MAX_MESSAGE_LENGTH);
        assert!(message.ends_with("\\[Truncated\\]"));
    }

    #[test]
    fn test_approval_request_keeps_commands() {
        let mut long = breakdown();
        long.cons = (0..4)
            .map(|i| Claim::con(format!("{} {}", i, "y".repeat(1500)), 0.9, "test"))
            .collect();

        let message = format_approval_request(&long, "abcd1234");
        assert!(message.chars().count() <= TELEGRAM_MAX_MESSAGE_LENGTH);
        assert!(message.starts_with("APPROVAL REQUIRED"));
        assert!(message.contains("Low confidence score: 0\\.55"));
        assert!(message.ends_with("/approve abcd1234 or /reject abcd1234"));
    }
}
