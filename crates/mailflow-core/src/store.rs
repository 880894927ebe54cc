//! Storage and outbound transport seams
//!
//! The routing pipeline never touches disk or network directly; it hands
//! finished decisions to these traits. In-memory implementations back the
//! tests and any embedded use.

use mailflow_common::types::{AccountId, Envelope, MessageInfo};
use mailflow_common::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Destination for locally delivered messages
#[async_trait::async_trait]
pub trait MailboxStore: Send + Sync {
    async fn store(
        &self,
        account: AccountId,
        envelope: &Envelope,
        message: &MessageInfo,
    ) -> Result<()>;
}

/// Hand-off point for envelopes addressed outside the local directory
#[async_trait::async_trait]
pub trait OutboundQueue: Send + Sync {
    async fn enqueue(&self, envelope: Envelope, message: MessageInfo) -> Result<()>;
}

/// In-memory mailbox store
#[derive(Default)]
pub struct MemoryMailboxStore {
    mailboxes: Mutex<HashMap<AccountId, Vec<(Envelope, MessageInfo)>>>,
}

impl MemoryMailboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_count(&self, account: AccountId) -> usize {
        self.mailboxes
            .lock()
            .expect("mailbox store poisoned")
            .get(&account)
            .map_or(0, Vec::len)
    }

    pub fn messages_for(&self, account: AccountId) -> Vec<(Envelope, MessageInfo)> {
        self.mailboxes
            .lock()
            .expect("mailbox store poisoned")
            .get(&account)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl MailboxStore for MemoryMailboxStore {
    async fn store(
        &self,
        account: AccountId,
        envelope: &Envelope,
        message: &MessageInfo,
    ) -> Result<()> {
        debug!("Storing message {} for account {}", envelope.id, account);
        self.mailboxes
            .lock()
            .expect("mailbox store poisoned")
            .entry(account)
            .or_default()
            .push((envelope.clone(), message.clone()));
        Ok(())
    }
}

/// In-memory outbound queue; can be switched into a failing mode to
/// exercise bounce paths
#[derive(Default)]
pub struct MemoryOutboundQueue {
    queued: Mutex<Vec<(Envelope, MessageInfo)>>,
    failing: AtomicBool,
}

impl MemoryOutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn queued(&self) -> Vec<(Envelope, MessageInfo)> {
        self.queued.lock().expect("outbound queue poisoned").clone()
    }
}

#[async_trait::async_trait]
impl OutboundQueue for MemoryOutboundQueue {
    async fn enqueue(&self, envelope: Envelope, message: MessageInfo) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Queue("Outbound queue unavailable".to_string()));
        }
        debug!(
            "Queued envelope {} for remote delivery to {:?}",
            envelope.id, envelope.recipients
        );
        self.queued
            .lock()
            .expect("outbound queue poisoned")
            .push((envelope, message));
        Ok(())
    }
}
