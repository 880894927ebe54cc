//! Directory models
//!
//! Snapshot value structures, not live objects: once built into a
//! `DirectorySnapshot` they are never mutated.

use mailflow_common::types::{AccountId, AliasId, DomainId, ListId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    /// Canonical domain name
    pub name: String,
    /// Alternate names treated as fully equivalent to the canonical name
    pub aliases: Vec<String>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            aliases: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

/// Account-level forward settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardSettings {
    pub enabled: bool,
    pub address: String,
    /// When false, the forwarded message is not stored in this account's
    /// own mailbox.
    pub keep_original: bool,
}

/// Account-level vacation responder settings
///
/// Both templates support the `%SUBJECT%` macro, substituted with the
/// original message's subject. An empty subject template defaults to
/// `Re: <original subject>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VacationSettings {
    pub enabled: bool,
    pub subject: String,
    pub message: String,
}

/// Account model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub address: String,
    pub active: bool,
    /// Ordered rules; only active rules participate in evaluation
    pub rules: Vec<Rule>,
    pub forward: Option<ForwardSettings>,
    pub vacation: Option<VacationSettings>,
}

impl Account {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            address: address.into(),
            active: true,
            rules: Vec::new(),
            forward: None,
            vacation: None,
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_forward(mut self, address: impl Into<String>, keep_original: bool) -> Self {
        self.forward = Some(ForwardSettings {
            enabled: true,
            address: address.into(),
            keep_original,
        });
        self
    }

    pub fn with_vacation(
        mut self,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.vacation = Some(VacationSettings {
            enabled: true,
            subject: subject.into(),
            message: message.into(),
        });
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Address alias: maps one address to another
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    pub id: AliasId,
    pub source: String,
    pub target: String,
}

impl Alias {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Access-control policy governing who may post to a distribution list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListMode {
    /// Any sender may post
    Public,
    /// Only senders who are themselves members may post
    Membership,
    /// Only the configured announcer address may post
    Announcement,
}

/// Distribution list model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionList {
    pub id: ListId,
    pub address: String,
    /// Member addresses; members may be accounts, aliases or other lists
    pub members: Vec<String>,
    pub mode: ListMode,
    /// Required sender for Announcement mode
    pub require_sender: Option<String>,
    /// For Public mode: require an authenticated SMTP session to post
    pub require_smtp_auth: bool,
}

impl DistributionList {
    pub fn new(address: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            address: address.into(),
            members,
            mode: ListMode::Public,
            require_sender: None,
            require_smtp_auth: false,
        }
    }

    pub fn with_mode(mut self, mode: ListMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_require_sender(mut self, sender: impl Into<String>) -> Self {
        self.require_sender = Some(sender.into());
        self
    }

    pub fn with_require_smtp_auth(mut self, required: bool) -> Self {
        self.require_smtp_auth = required;
        self
    }
}

/// Message field a rule criterion inspects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    MessageSize,
    From,
    To,
    Cc,
    Subject,
    Body,
    /// Arbitrary header by name
    Header(String),
}

/// How a criterion value is compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMatchType {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    LessThan,
    GreaterThan,
    RegexMatch,
    Wildcard,
}

/// A single rule criterion; all criteria in a rule AND together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCriteria {
    pub field: RuleField,
    pub match_type: RuleMatchType,
    pub value: String,
}

impl RuleCriteria {
    pub fn new(field: RuleField, match_type: RuleMatchType, value: impl Into<String>) -> Self {
        Self {
            field,
            match_type,
            value: value.into(),
        }
    }
}

/// Rule action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Produce an additional envelope to this address. Does not by itself
    /// suppress local delivery.
    Forward { to: String },
    /// Terminal: suppress delivery and any forward/auto-reply for this copy
    Delete,
}

/// Account rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub active: bool,
    pub criteria: Vec<RuleCriteria>,
    pub actions: Vec<RuleAction>,
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            criteria: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_criteria(mut self, criteria: RuleCriteria) -> Self {
        self.criteria.push(criteria);
        self
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}
