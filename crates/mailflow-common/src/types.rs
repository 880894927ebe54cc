//! Common types for Mailflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for domains
pub type DomainId = Uuid;

/// Unique identifier for accounts
pub type AccountId = Uuid;

/// Unique identifier for address aliases
pub type AliasId = Uuid;

/// Unique identifier for distribution lists
pub type ListId = Uuid;

/// Unique identifier for messages
pub type MessageId = Uuid;

/// Unique identifier for envelopes
pub type EnvelopeId = Uuid;

/// Email address
///
/// The local part is treated as an opaque string: quote characters and
/// arbitrary punctuation are legal and never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.splitn(2, '@').collect();
        if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            Some(Self::new(parts[0], parts[1]))
        } else {
            None
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation("Invalid email address".to_string()))
    }
}

/// How an envelope came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Submitted by a client
    Original,
    /// Derived by account or rule forwarding
    Forward,
    /// Derived by a vacation responder
    AutoReply,
}

/// Routing envelope
///
/// Immutable once created. Forwarding and auto-replies never mutate an
/// envelope in place; they derive a child envelope carrying the same
/// original message id and an incremented hop count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope id, unique per copy
    pub id: EnvelopeId,
    /// Id of the originally submitted message, shared by all derived copies
    pub message_id: MessageId,
    /// Return-Path: where delivery failures bounce to. None is the null
    /// sender (`<>`), used by bounces.
    pub return_path: Option<EmailAddress>,
    /// Recipients of this copy
    pub recipients: Vec<EmailAddress>,
    /// Reference to the stored message content
    pub storage_path: String,
    /// Forward/auto-reply hop count, inherited from the parent plus one
    pub hops: u32,
    pub kind: EnvelopeKind,
    pub received_at: DateTime<Utc>,
}

impl Envelope {
    /// Create an envelope for a newly submitted message
    pub fn submitted(
        return_path: Option<EmailAddress>,
        recipients: Vec<EmailAddress>,
        storage_path: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            message_id: Uuid::now_v7(),
            return_path,
            recipients,
            storage_path: storage_path.into(),
            hops: 0,
            kind: EnvelopeKind::Original,
            received_at: Utc::now(),
        }
    }

    /// Derive a forwarded copy addressed to `to`.
    ///
    /// The Return-Path is inherited unchanged: a forward never rewrites the
    /// originating sender, so bounces for the forwarded copy return to the
    /// original sender.
    pub fn derive_forward(&self, to: EmailAddress) -> Self {
        Self {
            id: Uuid::now_v7(),
            message_id: self.message_id,
            return_path: self.return_path.clone(),
            recipients: vec![to],
            storage_path: self.storage_path.clone(),
            hops: self.hops + 1,
            kind: EnvelopeKind::Forward,
            received_at: Utc::now(),
        }
    }

    /// Derive an auto-reply addressed to `to`, bouncing to `responder`.
    ///
    /// The Return-Path is the vacationing account, never the original
    /// sender: a failed auto-reply must bounce back to the responder.
    pub fn derive_auto_reply(
        &self,
        to: EmailAddress,
        responder: EmailAddress,
        storage_path: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            message_id: self.message_id,
            return_path: Some(responder),
            recipients: vec![to],
            storage_path: storage_path.into(),
            hops: self.hops + 1,
            kind: EnvelopeKind::AutoReply,
            received_at: Utc::now(),
        }
    }
}

/// Message view used by rule evaluation and event handlers
///
/// Headers are an ordered list of opaque name/value pairs. No MIME
/// structure is parsed or preserved beyond individual headers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageInfo {
    pub subject: String,
    /// Total message size in bytes
    pub size: u64,
    /// Text body (or preview of it) for rule matching and auto-replies
    pub body: String,
    headers: Vec<(String, String)>,
}

impl MessageInfo {
    pub fn new(subject: impl Into<String>, size: u64, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            size,
            body: body.into(),
            headers: Vec::new(),
        }
    }

    /// Value of the first header with this name, compared case-insensitively
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the first header with this name, or append it
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    /// Append a header without touching existing ones of the same name
    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// Per-recipient delivery result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Stored in the recipient's mailbox
    Delivered,
    /// A forwarded envelope was produced
    Forwarded,
    /// An auto-reply envelope was produced
    Replied,
    /// Suppressed by a Delete rule action
    Deleted,
    /// Refused with a descriptive reason
    Rejected { reason: String },
    /// A derived envelope could not be handed off for delivery
    Bounced,
}

/// A delivery outcome attributed to one recipient address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientOutcome {
    pub address: EmailAddress,
    pub outcome: DeliveryOutcome,
}

impl RecipientOutcome {
    pub fn new(address: EmailAddress, outcome: DeliveryOutcome) -> Self {
        Self { address, outcome }
    }
}
