//! Rule Engine - evaluates an account's rules against a message
//!
//! Rules run in stored order; only active rules participate, and all
//! criteria within a rule AND together. The first rule whose actions
//! include Delete is terminal for this recipient. Unmatched rules and
//! unparsable criteria values are simply skipped, never errors.

use mailflow_common::types::{EmailAddress, MessageInfo};
use mailflow_directory::{Account, RuleAction, RuleCriteria, RuleField, RuleMatchType};
use tracing::{debug, warn};

/// The Rule Engine's per-recipient outcome, prior to forwarding and
/// auto-reply being applied
#[derive(Debug, Clone, Default)]
pub struct Disposition {
    /// A Delete action fired: no local delivery, no account-level
    /// forward or auto-reply for this copy
    pub deleted: bool,
    /// Additional envelopes requested by rule-level Forward actions
    pub rule_forwards: Vec<EmailAddress>,
}

/// Rule engine
#[derive(Debug, Default)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate the account's rules against a message
    pub fn evaluate(&self, account: &Account, message: &MessageInfo) -> Disposition {
        let mut disposition = Disposition::default();

        for rule in account.rules.iter().filter(|r| r.active) {
            if !rule
                .criteria
                .iter()
                .all(|c| criterion_matches(c, message))
            {
                continue;
            }

            debug!("Rule '{}' matched for {}", rule.name, account.address);

            for action in &rule.actions {
                match action {
                    RuleAction::Forward { to } => match EmailAddress::parse(to) {
                        Some(target) => disposition.rule_forwards.push(target),
                        None => warn!(
                            "Rule '{}' has an invalid forward address {:?}, skipping action",
                            rule.name, to
                        ),
                    },
                    RuleAction::Delete => {
                        // Terminal: remaining actions and rules are skipped
                        disposition.deleted = true;
                        return disposition;
                    }
                }
            }
        }

        disposition
    }
}

fn criterion_matches(criteria: &RuleCriteria, message: &MessageInfo) -> bool {
    match &criteria.field {
        RuleField::MessageSize => numeric_matches(criteria.match_type, message.size, &criteria.value),
        RuleField::Subject => text_matches(criteria.match_type, &message.subject, &criteria.value),
        RuleField::Body => text_matches(criteria.match_type, &message.body, &criteria.value),
        RuleField::From => header_matches(criteria, message, "From"),
        RuleField::To => header_matches(criteria, message, "To"),
        RuleField::Cc => header_matches(criteria, message, "Cc"),
        RuleField::Header(name) => header_matches(criteria, message, name),
    }
}

fn header_matches(criteria: &RuleCriteria, message: &MessageInfo, name: &str) -> bool {
    match message.header_value(name) {
        Some(value) => text_matches(criteria.match_type, value, &criteria.value),
        None => false,
    }
}

fn text_matches(match_type: RuleMatchType, value: &str, expected: &str) -> bool {
    let value = value.to_lowercase();
    let expected = expected.to_lowercase();

    match match_type {
        RuleMatchType::Equals => value == expected,
        RuleMatchType::NotEquals => value != expected,
        RuleMatchType::Contains => value.contains(&expected),
        RuleMatchType::NotContains => !value.contains(&expected),
        RuleMatchType::RegexMatch => regex_is_match(&expected, &value),
        RuleMatchType::Wildcard => regex_is_match(&wildcard_to_regex(&expected), &value),
        // Numeric comparisons make no sense on text fields
        RuleMatchType::LessThan | RuleMatchType::GreaterThan => false,
    }
}

fn numeric_matches(match_type: RuleMatchType, value: u64, expected: &str) -> bool {
    let Ok(expected) = expected.trim().parse::<u64>() else {
        return false;
    };

    match match_type {
        RuleMatchType::Equals => value == expected,
        RuleMatchType::NotEquals => value != expected,
        RuleMatchType::GreaterThan => value > expected,
        RuleMatchType::LessThan => value < expected,
        _ => false,
    }
}

fn regex_is_match(pattern: &str, value: &str) -> bool {
    // Size limit guards against pathological user-supplied patterns
    match regex::RegexBuilder::new(pattern)
        .size_limit(1 << 20)
        .build()
    {
        Ok(re) => re.is_match(value),
        Err(_) => false,
    }
}

/// Translate a `*`/`?` wildcard pattern into an anchored regex
fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}
