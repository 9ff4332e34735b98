//! Rule matching — canned responses tried before the model is consulted.

use tracing::debug;

use crate::store::{AutoReplyRule, MatchMode};

/// Find the first rule matching the message body. Rules must already be
/// ordered by priority (the store returns them highest-priority first,
/// ties broken by longer trigger).
pub fn match_rule<'a>(rules: &'a [AutoReplyRule], body: &str) -> Option<&'a AutoReplyRule> {
    let trimmed = body.trim();
    for rule in rules {
        if rule_matches(rule, trimmed) {
            debug!(rule_id = rule.id, trigger = %rule.trigger, "Auto-reply rule matched");
            return Some(rule);
        }
    }
    None
}

fn rule_matches(rule: &AutoReplyRule, trimmed_body: &str) -> bool {
    let (body, trigger) = if rule.case_sensitive {
        (trimmed_body.to_string(), rule.trigger.clone())
    } else {
        (trimmed_body.to_lowercase(), rule.trigger.to_lowercase())
    };
    match rule.match_mode {
        MatchMode::Exact => body == trigger.trim(),
        MatchMode::Contains => body.contains(&trigger),
    }
}
