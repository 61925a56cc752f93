//! Content risk classifier for outbound messages.
//!
//! Stateless and deterministic: text in, score/flags/verdict out. The
//! scoring weights and thresholds are a fixed policy shared with the
//! moderation backoffice — do not tune them here.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Verdict driving the send pipeline: deliver, deliver with metadata
/// for moderation review, or reject outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskAction {
    Allow,
    Flag,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskReport {
    /// 0..=100.
    pub risk_score: u8,
    pub risk_flags: Vec<String>,
    pub action: RiskAction,
}

impl RiskReport {
    /// Report for content that skips analysis entirely (media-only
    /// messages).
    pub fn allow() -> Self {
        Self {
            risk_score: 0,
            risk_flags: Vec::new(),
            action: RiskAction::Allow,
        }
    }
}

const FLAG_SUSPICIOUS_LINK: &str = "suspicious_link";
const FLAG_WHATSAPP_OR_PHONE: &str = "whatsapp_or_phone";
const FLAG_PHONE_NUMBER: &str = "phone_number";
const FLAG_WHATSAPP_MENTION: &str = "whatsapp_mention";
const FLAG_MONEY_REQUEST: &str = "money_request";
const FLAG_HIGH_RISK_COMBO: &str = "high_risk_combo";

const BLOCK_THRESHOLD: u32 = 85;
const FLAG_THRESHOLD: u32 = 40;

/// Link and phone patterns run against the original text; keyword
/// vocabularies run against the normalized text.
static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(https?://|www\.)").expect("url pattern"));

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\s().-]{7,}\d").expect("phone pattern"));

const WHATSAPP_TERMS: &[&str] = &["whatsapp", "whatsap", "watsap", "wa.me"];

/// Money/payment vocabulary: currencies, transfer services, and the
/// urgency phrasing typical of romance-scam openers.
const MONEY_TERMS: &[&str] = &[
    "fcfa",
    "cfa",
    "franc",
    "argent",
    "money",
    "cash",
    "euro",
    "dollar",
    "western union",
    "moneygram",
    "orange money",
    "mtn money",
    "moov money",
    "wave",
    "paypal",
    "virement",
    "transfert",
    "urgent",
    "aide",
];

/// Score a piece of message text. Empty or whitespace-only input
/// short-circuits to an allow with no flags.
pub fn analyze(text: &str) -> RiskReport {
    if text.trim().is_empty() {
        return RiskReport::allow();
    }

    let normalized = normalize(text);

    let has_url = URL_PATTERN.is_match(text);
    let has_phone = PHONE_PATTERN.is_match(text);
    let has_whatsapp = WHATSAPP_TERMS.iter().any(|t| normalized.contains(t));
    let has_money = MONEY_TERMS.iter().any(|t| normalized.contains(t));

    let mut score: u32 = 0;
    let mut flags: Vec<String> = Vec::new();

    if has_url {
        flags.push(FLAG_SUSPICIOUS_LINK.into());
        score += 25;
    }

    if has_phone && has_whatsapp {
        flags.push(FLAG_WHATSAPP_OR_PHONE.into());
        score += 35;
    } else if has_phone {
        flags.push(FLAG_PHONE_NUMBER.into());
        score += 15;
    } else if has_whatsapp {
        flags.push(FLAG_WHATSAPP_MENTION.into());
        score += 15;
    }

    if has_money {
        flags.push(FLAG_MONEY_REQUEST.into());
        score += 35;
    }

    // A money ask combined with an off-platform contact route is the
    // classic scam shape; escalate on top of the individual signals.
    if has_money && (has_url || (has_phone && has_whatsapp)) {
        flags.push(FLAG_HIGH_RISK_COMBO.into());
        score += 35;
    }

    let score = score.min(100);
    flags.dedup();

    let action = if score >= BLOCK_THRESHOLD {
        RiskAction::Block
    } else if score >= FLAG_THRESHOLD {
        RiskAction::Flag
    } else {
        RiskAction::Allow
    };

    RiskReport {
        risk_score: score as u8,
        risk_flags: flags,
        action,
    }
}

/// Lowercase and fold the diacritics common in French-language profiles
/// so keyword matching is accent-insensitive.
fn normalize(text: &str) -> String {
    text.to_lowercase().chars().map(fold_diacritic).collect()
}

fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ä' | 'ã' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        _ => c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_short_circuit() {
        for text in ["", "   ", "\n\t  "] {
            let report = analyze(text);
            assert_eq!(report.risk_score, 0);
            assert!(report.risk_flags.is_empty());
            assert_eq!(report.action, RiskAction::Allow);
        }
    }

    #[test]
    fn analyze_is_pure() {
        let text = "envoie de l'argent via www.scam.example";
        assert_eq!(analyze(text), analyze(text));
    }

    #[test]
    fn bare_phone_number_scores_fifteen_and_allows() {
        let report = analyze("Hello, call me at 0102030405");
        assert_eq!(report.risk_score, 15);
        assert_eq!(report.risk_flags, vec!["phone_number"]);
        assert_eq!(report.action, RiskAction::Allow);
    }

    #[test]
    fn whatsapp_mention_alone_scores_fifteen() {
        let report = analyze("add me on whatsapp");
        assert_eq!(report.risk_score, 15);
        assert_eq!(report.risk_flags, vec!["whatsapp_mention"]);
        assert_eq!(report.action, RiskAction::Allow);
    }

    #[test]
    fn phone_plus_whatsapp_collapses_to_one_signal() {
        let report = analyze("whatsapp moi au 0102030405");
        assert_eq!(report.risk_score, 35);
        assert_eq!(report.risk_flags, vec!["whatsapp_or_phone"]);
        assert_eq!(report.action, RiskAction::Allow);
    }

    #[test]
    fn url_alone_scores_twenty_five() {
        let report = analyze("look at https://example.com");
        assert_eq!(report.risk_score, 25);
        assert_eq!(report.risk_flags, vec!["suspicious_link"]);
        assert_eq!(report.action, RiskAction::Allow);
    }

    #[test]
    fn url_plus_money_blocks() {
        let report = analyze("envoie 5000 FCFA ici: www.paiement.example");
        assert_eq!(report.risk_score, 95);
        assert_eq!(report.action, RiskAction::Block);
        for flag in ["suspicious_link", "money_request", "high_risk_combo"] {
            assert!(
                report.risk_flags.iter().any(|f| f == flag),
                "missing flag {flag}: {:?}",
                report.risk_flags
            );
        }
    }

    #[test]
    fn money_plus_phone_and_whatsapp_clamps_to_hundred() {
        let report = analyze("Envoie 5000 FCFA via whatsapp +2250102030405");
        assert_eq!(report.risk_score, 100);
        assert_eq!(report.action, RiskAction::Block);
        assert!(report.risk_flags.iter().any(|f| f == "high_risk_combo"));
        assert!(report.risk_flags.iter().any(|f| f == "whatsapp_or_phone"));
        assert!(report.risk_flags.iter().any(|f| f == "money_request"));
    }

    #[test]
    fn money_plus_phone_without_whatsapp_only_flags() {
        let report = analyze("j'ai besoin d'argent, appelle le 0102030405");
        assert_eq!(report.risk_score, 50);
        assert_eq!(report.action, RiskAction::Flag);
        assert!(!report.risk_flags.iter().any(|f| f == "high_risk_combo"));
    }

    #[test]
    fn keyword_match_is_accent_insensitive() {
        let report = analyze("URGENT: j'ai besoin d'àrgent");
        assert!(report.risk_flags.iter().any(|f| f == "money_request"));
    }

    #[test]
    fn plain_conversation_passes_clean() {
        let report = analyze("Salut, tu vas bien ? On se voit demain ?");
        assert_eq!(report.risk_score, 0);
        assert!(report.risk_flags.is_empty());
        assert_eq!(report.action, RiskAction::Allow);
    }
}
