//! Forwarding and auto-reply coordination
//!
//! Applies a recipient account's rule disposition, forward settings and
//! vacation responder to one envelope, producing the local-store decision
//! and any derived envelopes. Derivation is bounded by the hop count
//! carried on each envelope, so forward cycles spanning accounts (or
//! servers) terminate instead of ping-ponging forever.

use crate::rules::Disposition;
use mailflow_common::types::{
    AccountId, DeliveryOutcome, EmailAddress, Envelope, EnvelopeKind, MessageId, MessageInfo,
};
use mailflow_common::{Error, RoutingConfig};
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

/// Once-per-message auto-reply bookkeeping.
///
/// Owned by the routing run, not the coordinator: all copies of one
/// message (including locally re-routed forwards) flow through a single
/// run, so the registry can be dropped when the run completes instead of
/// accumulating an entry per message for the life of the server.
pub type ReplyRegistry = HashSet<(MessageId, AccountId)>;

/// A derived envelope ready for routing, with the outcome it represents
/// for the deriving account
#[derive(Debug)]
pub struct DerivedDelivery {
    pub envelope: Envelope,
    pub message: MessageInfo,
    pub outcome: DeliveryOutcome,
}

/// Result of applying delivery policy for one recipient account
#[derive(Debug, Default)]
pub struct AppliedDelivery {
    /// Store the message in the recipient's own mailbox
    pub store_local: bool,
    /// Forward and auto-reply envelopes to route next
    pub derived: Vec<DerivedDelivery>,
    /// Per-derivation failures; these never cancel the rest of the plan
    pub failures: Vec<Error>,
}

/// Forwarding and auto-reply coordinator
///
/// Stateless between routing runs; the caller threads one [`ReplyRegistry`]
/// through every `apply` of the same run.
pub struct DeliveryCoordinator {
    config: RoutingConfig,
}

impl DeliveryCoordinator {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    /// Apply the account's delivery policy to one envelope copy
    pub fn apply(
        &self,
        account: &mailflow_directory::Account,
        disposition: &Disposition,
        envelope: &Envelope,
        message: &MessageInfo,
        replied: &mut ReplyRegistry,
    ) -> AppliedDelivery {
        let mut applied = AppliedDelivery {
            store_local: true,
            ..AppliedDelivery::default()
        };

        for target in &disposition.rule_forwards {
            self.derive_forward(envelope, message, target.clone(), &mut applied);
        }

        if disposition.deleted {
            // A Delete action suppresses local delivery and the
            // account-level forward and auto-reply for this copy. Rule
            // forwards collected before the Delete still fire, which is
            // what makes a Forward+Delete rule a redirect.
            debug!("Message to {} deleted by rule", account.address);
            applied.store_local = false;
            return applied;
        }

        if let Some(forward) = account.forward.as_ref().filter(|f| f.enabled) {
            match EmailAddress::parse(&forward.address) {
                Some(target) => {
                    if !forward.keep_original {
                        applied.store_local = false;
                    }
                    self.derive_forward(envelope, message, target, &mut applied);
                }
                None => applied.failures.push(Error::Resolution(format!(
                    "Forward address {:?} configured on {} is not a valid address",
                    forward.address, account.address
                ))),
            }
        }

        self.maybe_auto_reply(account, envelope, message, replied, &mut applied);

        applied
    }

    fn derive_forward(
        &self,
        envelope: &Envelope,
        message: &MessageInfo,
        target: EmailAddress,
        applied: &mut AppliedDelivery,
    ) {
        if envelope.hops >= self.config.max_hops {
            warn!(
                "Refusing forward to {}: hop count {} reached the bound",
                target, envelope.hops
            );
            applied.failures.push(Error::LoopGuard(format!(
                "Forward to {} refused after {} hops",
                target, envelope.hops
            )));
            return;
        }

        debug!("Deriving forward to {}", target);
        applied.derived.push(DerivedDelivery {
            envelope: envelope.derive_forward(target),
            message: message.clone(),
            outcome: DeliveryOutcome::Forwarded,
        });
    }

    fn maybe_auto_reply(
        &self,
        account: &mailflow_directory::Account,
        envelope: &Envelope,
        message: &MessageInfo,
        replied: &mut ReplyRegistry,
        applied: &mut AppliedDelivery,
    ) {
        let Some(vacation) = account.vacation.as_ref().filter(|v| v.enabled) else {
            return;
        };

        // Never answer another auto-reply or the null sender; both are the
        // classic mail-loop ingredients.
        if envelope.kind == EnvelopeKind::AutoReply {
            return;
        }
        let Some(sender) = envelope.return_path.as_ref() else {
            return;
        };
        if message
            .header_value("Auto-Submitted")
            .is_some_and(|v| !v.eq_ignore_ascii_case("no"))
        {
            return;
        }

        if !replied.insert((envelope.message_id, account.id)) {
            debug!(
                "Auto-reply from {} already sent for this message",
                account.address
            );
            return;
        }

        let Some(responder) = EmailAddress::parse(&account.address) else {
            applied.failures.push(Error::Internal(format!(
                "Account address {:?} is not a valid address",
                account.address
            )));
            return;
        };

        if envelope.hops >= self.config.max_hops {
            applied.failures.push(Error::LoopGuard(format!(
                "Auto-reply from {} refused after {} hops",
                responder, envelope.hops
            )));
            return;
        }

        let subject = if vacation.subject.is_empty() {
            format!("Re: {}", message.subject)
        } else {
            vacation.subject.replace("%SUBJECT%", &message.subject)
        };
        let body = vacation.message.replace("%SUBJECT%", &message.subject);

        let mut reply = MessageInfo::new(subject.clone(), body.len() as u64, body);
        reply.append_header("From", responder.to_string());
        reply.append_header("To", sender.to_string());
        reply.append_header("Subject", subject);
        reply.append_header("Auto-Submitted", "auto-replied");

        debug!("Deriving auto-reply from {} to {}", responder, sender);
        applied.derived.push(DerivedDelivery {
            envelope: envelope.derive_auto_reply(
                sender.clone(),
                responder,
                format!("auto-reply-{}", Uuid::now_v7()),
            ),
            message: reply,
            outcome: DeliveryOutcome::Replied,
        });
    }
}
