//! Content screening — flags concerning inbound messages for operator
//! review. Flagged messages are still processed; the flag only surfaces
//! them in the inbox.

use std::sync::LazyLock;

use regex::RegexSet;

const PATTERNS: &[(&str, &str)] = &[
    (r"(?i)\b(kill|hurt|attack)\b.*\b(you|your)\b", "threat"),
    (r"(?i)\b(lawsuit|lawyer|attorney|sue|legal action)\b", "legal"),
    (r"(?i)\b(refund|chargeback|dispute|fraud|scam)\b", "billing_dispute"),
    (r"(?i)\b(emergency|urgent|911)\b", "urgent"),
];

static FLAG_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new(PATTERNS.iter().map(|(p, _)| *p)).expect("flagger patterns are valid")
});

/// Returns the first matching flag reason, or None for ordinary messages.
pub fn screen(body: &str) -> Option<&'static str> {
    FLAG_SET
        .matches(body)
        .iter()
        .next()
        .map(|index| PATTERNS[index].1)
}
