//! Routing pipeline
//!
//! Drives one submitted envelope through resolution, list expansion, rule
//! evaluation, forwarding and auto-replies, and the event hooks, producing
//! a per-recipient outcome report. The directory snapshot is pinned once
//! per submission, so a concurrent directory update never splits a single
//! message across two directory states.

use crate::delivery::{DeliveryCoordinator, ReplyRegistry};
use crate::hooks::{EventContext, EventDispatcher, EventPoint, SessionInfo};
use crate::lists::ListExpander;
use crate::resolver::{Resolution, Resolver};
use crate::rules::RuleEngine;
use crate::store::{MailboxStore, OutboundQueue};
use mailflow_common::types::{
    AccountId, DeliveryOutcome, EmailAddress, Envelope, MessageInfo, RecipientOutcome,
};
use mailflow_common::{Error, RoutingConfig};
use mailflow_directory::DirectorySnapshot;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Source of directory snapshots
pub trait DirectoryProvider: Send + Sync {
    fn snapshot(&self) -> Arc<DirectorySnapshot>;
}

/// Swappable directory: updates replace the snapshot atomically, and
/// in-flight submissions keep the snapshot they pinned
pub struct SharedDirectory {
    current: RwLock<Arc<DirectorySnapshot>>,
}

impl SharedDirectory {
    pub fn new(snapshot: DirectorySnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn update(&self, snapshot: DirectorySnapshot) {
        *self.current.write().expect("directory lock poisoned") = Arc::new(snapshot);
    }
}

impl DirectoryProvider for SharedDirectory {
    fn snapshot(&self) -> Arc<DirectorySnapshot> {
        self.current.read().expect("directory lock poisoned").clone()
    }
}

/// Caller-supplied facts about the submitting session
#[derive(Debug, Clone, Default)]
pub struct SubmissionContext {
    /// Whether the session authenticated; gates lists that require it
    pub smtp_authenticated: bool,
    pub session: SessionInfo,
}

/// Message routing pipeline
pub struct RoutingPipeline {
    directory: Arc<dyn DirectoryProvider>,
    store: Arc<dyn MailboxStore>,
    queue: Arc<dyn OutboundQueue>,
    events: Arc<EventDispatcher>,
    coordinator: DeliveryCoordinator,
    rules: RuleEngine,
    config: RoutingConfig,
}

impl RoutingPipeline {
    pub fn new(
        directory: Arc<dyn DirectoryProvider>,
        store: Arc<dyn MailboxStore>,
        queue: Arc<dyn OutboundQueue>,
        events: Arc<EventDispatcher>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            directory,
            store,
            queue,
            events,
            coordinator: DeliveryCoordinator::new(config.clone()),
            rules: RuleEngine::new(),
            config,
        }
    }

    /// Route one submitted envelope to its final deliveries.
    ///
    /// Every recipient gets at least one outcome; a failing recipient never
    /// aborts the others. Derived envelopes addressed to local accounts are
    /// routed in the same call; remote ones are handed to the outbound
    /// queue.
    pub async fn submit(
        &self,
        envelope: Envelope,
        message: MessageInfo,
        ctx: &SubmissionContext,
    ) -> Vec<RecipientOutcome> {
        let snapshot = self.directory.snapshot();
        let resolver = Resolver::new(snapshot, self.config.clone());
        let expander = ListExpander::new(&resolver);

        info!(
            "Routing message {} to {} recipient(s)",
            envelope.message_id,
            envelope.recipients.len()
        );

        let mut outcomes = Vec::new();
        // All copies of this message, including locally re-routed forwards,
        // pass through this work queue, so once-per-message auto-reply
        // bookkeeping lives and dies with the call.
        let mut replied = ReplyRegistry::new();
        let mut work = VecDeque::new();
        work.push_back((envelope, message));

        while let Some((envelope, message)) = work.pop_front() {
            // Each terminal account gets this envelope at most once, no
            // matter how many recipients or nested lists reach it.
            let mut delivered: HashSet<AccountId> = HashSet::new();

            for recipient in envelope.recipients.clone() {
                match resolver.resolve(&recipient) {
                    Resolution::Account(id) => {
                        self.deliver_to_account(
                            id,
                            &recipient,
                            &envelope,
                            &message,
                            &resolver,
                            ctx,
                            &mut delivered,
                            &mut replied,
                            &mut outcomes,
                            &mut work,
                        )
                        .await;
                    }
                    Resolution::List(list_id) => {
                        match expander.expand(
                            list_id,
                            envelope.return_path.as_ref(),
                            ctx.smtp_authenticated,
                        ) {
                            Ok(members) => {
                                for id in members {
                                    self.deliver_to_account(
                                        id,
                                        &recipient,
                                        &envelope,
                                        &message,
                                        &resolver,
                                        ctx,
                                        &mut delivered,
                                        &mut replied,
                                        &mut outcomes,
                                        &mut work,
                                    )
                                    .await;
                                }
                            }
                            Err(e) => {
                                self.delivery_failed(&envelope, &recipient, &e).await;
                                outcomes.push(RecipientOutcome::new(
                                    recipient.clone(),
                                    DeliveryOutcome::Rejected {
                                        reason: e.to_string(),
                                    },
                                ));
                            }
                        }
                    }
                    Resolution::Unresolved => {
                        let err =
                            Error::Resolution(format!("Unknown recipient {}", recipient));
                        warn!("{}", err);
                        self.delivery_failed(&envelope, &recipient, &err).await;
                        outcomes.push(RecipientOutcome::new(
                            recipient.clone(),
                            DeliveryOutcome::Rejected {
                                reason: err.to_string(),
                            },
                        ));
                    }
                }
            }
        }

        outcomes
    }

    #[allow(clippy::too_many_arguments)]
    async fn deliver_to_account(
        &self,
        id: AccountId,
        as_addressed: &EmailAddress,
        envelope: &Envelope,
        message: &MessageInfo,
        resolver: &Resolver,
        ctx: &SubmissionContext,
        delivered: &mut HashSet<AccountId>,
        replied: &mut ReplyRegistry,
        outcomes: &mut Vec<RecipientOutcome>,
        work: &mut VecDeque<(Envelope, MessageInfo)>,
    ) {
        if !delivered.insert(id) {
            debug!("Account {} already received this envelope, skipping", id);
            return;
        }

        let Some(account) = resolver.snapshot().account(id) else {
            let err = Error::Internal(format!("Resolved account {} missing from directory", id));
            self.delivery_failed(envelope, as_addressed, &err).await;
            outcomes.push(RecipientOutcome::new(
                as_addressed.clone(),
                DeliveryOutcome::Rejected {
                    reason: err.to_string(),
                },
            ));
            return;
        };

        // Attribute outcomes to the terminal account, not the list or
        // alias address the message arrived under.
        let address = EmailAddress::parse(&account.address)
            .unwrap_or_else(|| as_addressed.clone());

        if !account.active {
            let err = Error::Resolution(format!("Account {} is not active", address));
            self.delivery_failed(envelope, &address, &err).await;
            outcomes.push(RecipientOutcome::new(
                address,
                DeliveryOutcome::Rejected {
                    reason: err.to_string(),
                },
            ));
            return;
        }

        let disposition = self.rules.evaluate(account, message);

        // Per-recipient copy: header edits made by the accept-message
        // handler affect this delivery only.
        let mut message = message.clone();
        self.events
            .dispatch(
                EventPoint::AcceptMessage,
                EventContext::new()
                    .with_session(&ctx.session)
                    .with_envelope(envelope)
                    .with_recipient(&address)
                    .with_message(&mut message),
            )
            .await;

        let applied = self
            .coordinator
            .apply(account, &disposition, envelope, &message, replied);

        if disposition.deleted {
            outcomes.push(RecipientOutcome::new(
                address.clone(),
                DeliveryOutcome::Deleted,
            ));
        }

        for failure in &applied.failures {
            self.delivery_failed(envelope, &address, failure).await;
            outcomes.push(RecipientOutcome::new(
                address.clone(),
                DeliveryOutcome::Rejected {
                    reason: failure.to_string(),
                },
            ));
        }

        if applied.store_local {
            // Edits here affect the stored copy only; forwards and replies
            // were derived from the accepted message above.
            self.events
                .dispatch(
                    EventPoint::DeliverMessage,
                    EventContext::new()
                        .with_session(&ctx.session)
                        .with_envelope(envelope)
                        .with_recipient(&address)
                        .with_message(&mut message),
                )
                .await;

            match self.store.store(id, envelope, &message).await {
                Ok(()) => {
                    debug!("Delivered message {} to {}", envelope.message_id, address);
                    outcomes.push(RecipientOutcome::new(
                        address.clone(),
                        DeliveryOutcome::Delivered,
                    ));
                }
                Err(e) => {
                    self.delivery_failed(envelope, &address, &e).await;
                    outcomes.push(RecipientOutcome::new(
                        address.clone(),
                        DeliveryOutcome::Rejected {
                            reason: e.to_string(),
                        },
                    ));
                }
            }
        }

        for derived in applied.derived {
            outcomes.push(RecipientOutcome::new(address.clone(), derived.outcome));
            self.events
                .dispatch(
                    EventPoint::DeliveryStart,
                    EventContext::new().with_envelope(&derived.envelope),
                )
                .await;

            let target = derived.envelope.recipients[0].clone();
            if resolver.is_local(&target) {
                work.push_back((derived.envelope, derived.message));
            } else {
                let for_report = derived.envelope.clone();
                if let Err(e) = self.queue.enqueue(derived.envelope, derived.message).await {
                    self.delivery_failed(&for_report, &target, &e).await;
                    outcomes.push(RecipientOutcome::new(target, DeliveryOutcome::Bounced));
                }
            }
        }
    }

    async fn delivery_failed(&self, envelope: &Envelope, recipient: &EmailAddress, error: &Error) {
        self.events
            .dispatch(
                EventPoint::DeliveryFailed,
                EventContext::new()
                    .with_envelope(envelope)
                    .with_recipient(recipient)
                    .with_detail(format!("{}: {}", error.code(), error)),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{EventDecision, EventHandler};
    use crate::store::{MemoryMailboxStore, MemoryOutboundQueue};
    use mailflow_common::types::EnvelopeKind;
    use mailflow_common::Result;
    use mailflow_directory::{
        Account, DirectoryBuilder, DistributionList, Domain, Rule, RuleAction, RuleCriteria,
        RuleField, RuleMatchType,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn addr(s: &str) -> EmailAddress {
        EmailAddress::parse(s).unwrap()
    }

    struct Fixture {
        pipeline: RoutingPipeline,
        store: Arc<MemoryMailboxStore>,
        queue: Arc<MemoryOutboundQueue>,
    }

    fn fixture(snapshot: DirectorySnapshot) -> Fixture {
        fixture_with_events(snapshot, EventDispatcher::new(&RoutingConfig::default()))
    }

    fn fixture_with_events(snapshot: DirectorySnapshot, events: EventDispatcher) -> Fixture {
        let store = Arc::new(MemoryMailboxStore::new());
        let queue = Arc::new(MemoryOutboundQueue::new());
        let pipeline = RoutingPipeline::new(
            Arc::new(SharedDirectory::new(snapshot)),
            store.clone(),
            queue.clone(),
            Arc::new(events),
            RoutingConfig::default(),
        );
        Fixture {
            pipeline,
            store,
            queue,
        }
    }

    fn submit_to(recipients: &[&str]) -> (Envelope, MessageInfo) {
        let envelope = Envelope::submitted(
            Some(addr("original-sender@example.org")),
            recipients.iter().map(|r| addr(r)).collect(),
            "msg-1",
        );
        let mut message = MessageInfo::new("Test message", 1024, "This is the body");
        message.append_header("From", "original-sender@example.org");
        (envelope, message)
    }

    fn outcome_for<'a>(
        outcomes: &'a [RecipientOutcome],
        address: &str,
    ) -> Vec<&'a DeliveryOutcome> {
        outcomes
            .iter()
            .filter(|o| o.address == addr(address))
            .map(|o| &o.outcome)
            .collect()
    }

    #[tokio::test]
    async fn test_plain_delivery() {
        let account = Account::new("account1@test.com");
        let id = account.id;
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(account)
            .build()
            .unwrap();
        let fx = fixture(snapshot);

        let (envelope, message) = submit_to(&["account1@test.com"]);
        let outcomes = fx
            .pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        assert_eq!(
            outcomes,
            vec![RecipientOutcome::new(
                addr("account1@test.com"),
                DeliveryOutcome::Delivered
            )]
        );
        assert_eq!(fx.store.message_count(id), 1);
    }

    #[tokio::test]
    async fn test_unknown_recipient_rejected() {
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .build()
            .unwrap();
        let fx = fixture(snapshot);

        let (envelope, message) = submit_to(&["nobody@test.com"]);
        let outcomes = fx
            .pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0].outcome,
            DeliveryOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_self_referential_list_delivers_once_per_member() {
        let account1 = Account::new("account1@test.com");
        let account2 = Account::new("account2@test.com");
        let (id1, id2) = (account1.id, account2.id);
        let list = DistributionList::new(
            "list1@test.com",
            vec![
                "account1@test.com".to_string(),
                "list1@test.com".to_string(),
                "account2@test.com".to_string(),
            ],
        );
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(account1)
            .account(account2)
            .list(list)
            .build()
            .unwrap();
        let fx = fixture(snapshot);

        let (envelope, message) = submit_to(&["list1@test.com"]);
        let outcomes = fx
            .pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        assert_eq!(fx.store.message_count(id1), 1);
        assert_eq!(fx.store.message_count(id2), 1);
        assert_eq!(
            outcome_for(&outcomes, "account1@test.com"),
            vec![&DeliveryOutcome::Delivered]
        );
        assert_eq!(
            outcome_for(&outcomes, "account2@test.com"),
            vec![&DeliveryOutcome::Delivered]
        );
    }

    #[tokio::test]
    async fn test_forward_chain_without_keeping_original() {
        let forward1 = Account::new("forward1@test.com").with_forward("forward2@test.com", false);
        let forward2 = Account::new("forward2@test.com");
        let (id1, id2) = (forward1.id, forward2.id);
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(forward1)
            .account(forward2)
            .build()
            .unwrap();
        let fx = fixture(snapshot);

        let (envelope, message) = submit_to(&["forward1@test.com"]);
        let outcomes = fx
            .pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        assert_eq!(fx.store.message_count(id1), 0);
        assert_eq!(fx.store.message_count(id2), 1);
        assert_eq!(
            outcome_for(&outcomes, "forward1@test.com"),
            vec![&DeliveryOutcome::Forwarded]
        );
        assert_eq!(
            outcome_for(&outcomes, "forward2@test.com"),
            vec![&DeliveryOutcome::Delivered]
        );

        // The stored copy is the forwarded envelope, still bouncing to the
        // original sender.
        let stored = fx.store.messages_for(id2);
        assert_eq!(stored[0].0.kind, EnvelopeKind::Forward);
        assert_eq!(
            stored[0].0.return_path,
            Some(addr("original-sender@example.org"))
        );
    }

    #[tokio::test]
    async fn test_forward_to_remote_goes_to_outbound_queue() {
        let account = Account::new("forward1@test.com").with_forward("someone@elsewhere.org", false);
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(account)
            .build()
            .unwrap();
        let fx = fixture(snapshot);

        let (envelope, message) = submit_to(&["forward1@test.com"]);
        fx.pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        let queued = fx.queue.queued();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0.recipients, vec![addr("someone@elsewhere.org")]);
    }

    #[tokio::test]
    async fn test_outbound_queue_failure_bounces() {
        let account = Account::new("forward1@test.com").with_forward("someone@elsewhere.org", true);
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(account)
            .build()
            .unwrap();
        let fx = fixture(snapshot);
        fx.queue.set_failing(true);

        let (envelope, message) = submit_to(&["forward1@test.com"]);
        let outcomes = fx
            .pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        assert_eq!(
            outcome_for(&outcomes, "someone@elsewhere.org"),
            vec![&DeliveryOutcome::Bounced]
        );
        // Local delivery for the forwarding account still happened
        assert_eq!(
            outcome_for(&outcomes, "forward1@test.com"),
            vec![&DeliveryOutcome::Delivered, &DeliveryOutcome::Forwarded]
        );
    }

    #[tokio::test]
    async fn test_forward_loop_terminates() {
        // forward1 -> forward2 -> forward1, neither keeping the original
        let forward1 = Account::new("forward1@test.com").with_forward("forward2@test.com", false);
        let forward2 = Account::new("forward2@test.com").with_forward("forward1@test.com", false);
        let (id1, id2) = (forward1.id, forward2.id);
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(forward1)
            .account(forward2)
            .build()
            .unwrap();
        let fx = fixture(snapshot);

        let (envelope, message) = submit_to(&["forward1@test.com"]);
        let outcomes = fx
            .pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        // The loop guard refused a derivation at the hop bound
        assert!(outcomes
            .iter()
            .any(|o| matches!(&o.outcome, DeliveryOutcome::Rejected { reason } if reason.contains("Loop guard"))));
        assert_eq!(fx.store.message_count(id1), 0);
        assert_eq!(fx.store.message_count(id2), 0);
    }

    #[tokio::test]
    async fn test_delete_rule_is_isolated_per_recipient() {
        let deleter = Account::new("account1@test.com").with_rule(
            Rule::new("drop everything")
                .with_criteria(RuleCriteria::new(
                    RuleField::MessageSize,
                    RuleMatchType::GreaterThan,
                    "0",
                ))
                .with_action(RuleAction::Delete),
        );
        let keeper = Account::new("account2@test.com");
        let (id1, id2) = (deleter.id, keeper.id);
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(deleter)
            .account(keeper)
            .build()
            .unwrap();
        let fx = fixture(snapshot);

        let (envelope, message) = submit_to(&["account1@test.com", "account2@test.com"]);
        let outcomes = fx
            .pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        assert_eq!(
            outcome_for(&outcomes, "account1@test.com"),
            vec![&DeliveryOutcome::Deleted]
        );
        assert_eq!(
            outcome_for(&outcomes, "account2@test.com"),
            vec![&DeliveryOutcome::Delivered]
        );
        assert_eq!(fx.store.message_count(id1), 0);
        assert_eq!(fx.store.message_count(id2), 1);
    }

    #[tokio::test]
    async fn test_delete_rule_suppresses_account_forward() {
        let account = Account::new("account1@test.com")
            .with_forward("account2@test.com", true)
            .with_rule(
                Rule::new("drop")
                    .with_criteria(RuleCriteria::new(
                        RuleField::Subject,
                        RuleMatchType::Contains,
                        "test",
                    ))
                    .with_action(RuleAction::Delete),
            );
        let other = Account::new("account2@test.com");
        let other_id = other.id;
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(account)
            .account(other)
            .build()
            .unwrap();
        let fx = fixture(snapshot);

        let (envelope, message) = submit_to(&["account1@test.com"]);
        let outcomes = fx
            .pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        assert_eq!(
            outcome_for(&outcomes, "account1@test.com"),
            vec![&DeliveryOutcome::Deleted]
        );
        assert_eq!(fx.store.message_count(other_id), 0);
    }

    #[tokio::test]
    async fn test_auto_reply_sent_once_through_forwarding() {
        // account1 forwards to the vacationer, who is also a direct
        // recipient: two copies arrive, one auto-reply leaves.
        let account1 = Account::new("account1@test.com").with_forward("vacationer@test.com", true);
        let vacationer =
            Account::new("vacationer@test.com").with_vacation("Away: %SUBJECT%", "On vacation");
        let vac_id = vacationer.id;
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(account1)
            .account(vacationer)
            .build()
            .unwrap();
        let fx = fixture(snapshot);

        let (envelope, message) = submit_to(&["account1@test.com", "vacationer@test.com"]);
        let outcomes = fx
            .pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        // Both copies delivered to the vacationer's mailbox
        assert_eq!(fx.store.message_count(vac_id), 2);

        // Exactly one auto-reply, queued for the remote original sender
        let replied: Vec<_> = outcomes
            .iter()
            .filter(|o| o.outcome == DeliveryOutcome::Replied)
            .collect();
        assert_eq!(replied.len(), 1);

        let queued = fx.queue.queued();
        assert_eq!(queued.len(), 1);
        let (reply_env, reply_msg) = &queued[0];
        assert_eq!(reply_env.kind, EnvelopeKind::AutoReply);
        assert_eq!(
            reply_env.recipients,
            vec![addr("original-sender@example.org")]
        );
        assert_eq!(reply_env.return_path, Some(addr("vacationer@test.com")));
        assert_eq!(reply_msg.subject, "Away: Test message");
        assert_eq!(reply_msg.header_value("Auto-Submitted"), Some("auto-replied"));
    }

    #[tokio::test]
    async fn test_auto_reply_bookkeeping_dropped_between_submissions() {
        // The pipeline retains no per-message reply state once a submission
        // completes: resubmitting the very same message gets answered again
        // rather than being remembered forever.
        let vacationer = Account::new("vacationer@test.com").with_vacation("Away", "On vacation");
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(vacationer)
            .build()
            .unwrap();
        let fx = fixture(snapshot);

        let (envelope, message) = submit_to(&["vacationer@test.com"]);
        let resubmitted = envelope.clone();
        fx.pipeline
            .submit(envelope, message.clone(), &SubmissionContext::default())
            .await;
        assert_eq!(fx.queue.queued().len(), 1);

        fx.pipeline
            .submit(resubmitted, message, &SubmissionContext::default())
            .await;
        assert_eq!(fx.queue.queued().len(), 2);
    }

    #[tokio::test]
    async fn test_inactive_account_rejected() {
        let account = Account::new("account1@test.com").inactive();
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(account)
            .build()
            .unwrap();
        let fx = fixture(snapshot);

        let (envelope, message) = submit_to(&["account1@test.com"]);
        let outcomes = fx
            .pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        assert!(matches!(
            outcomes[0].outcome,
            DeliveryOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_announcement_list_rejects_foreign_sender() {
        let member = Account::new("account1@test.com");
        let list = DistributionList::new("announce@test.com", vec!["account1@test.com".to_string()])
            .with_mode(mailflow_directory::ListMode::Announcement)
            .with_require_sender("owner@test.com");
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(member)
            .list(list)
            .build()
            .unwrap();
        let fx = fixture(snapshot);

        let (envelope, message) = submit_to(&["announce@test.com"]);
        let outcomes = fx
            .pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            &outcomes[0].outcome,
            DeliveryOutcome::Rejected { reason } if reason.contains("Access denied")
        ));
    }

    /// Stamps a header at accept-message
    struct StampingHandler;

    #[async_trait::async_trait]
    impl EventHandler for StampingHandler {
        async fn handle(&self, point: EventPoint, ctx: EventContext<'_>) -> Result<EventDecision> {
            if point == EventPoint::AcceptMessage {
                if let Some(message) = ctx.message {
                    message.set_header("X-Processed", "routing");
                }
            }
            Ok(EventDecision::Default)
        }
    }

    #[tokio::test]
    async fn test_accept_message_handler_can_edit_headers() {
        let account = Account::new("account1@test.com");
        let id = account.id;
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(account)
            .build()
            .unwrap();
        let events = EventDispatcher::new(&RoutingConfig::default())
            .with_handler(EventPoint::AcceptMessage, Arc::new(StampingHandler));
        let fx = fixture_with_events(snapshot, events);

        let (envelope, message) = submit_to(&["account1@test.com"]);
        fx.pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        let stored = fx.store.messages_for(id);
        assert_eq!(stored[0].1.header_value("X-Processed"), Some("routing"));
    }

    /// Fails at every point; records delivery-failed notifications
    struct FaultyHandler {
        failures_seen: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl EventHandler for FaultyHandler {
        async fn handle(&self, point: EventPoint, ctx: EventContext<'_>) -> Result<EventDecision> {
            if point == EventPoint::DeliveryFailed {
                self.failures_seen
                    .lock()
                    .unwrap()
                    .push(ctx.detail.clone().unwrap_or_default());
                return Ok(EventDecision::Default);
            }
            Err(Error::Handler("scripted failure".to_string()))
        }
    }

    #[tokio::test]
    async fn test_handler_fault_does_not_block_delivery() {
        let account = Account::new("account1@test.com");
        let id = account.id;
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(account)
            .build()
            .unwrap();
        let handler = Arc::new(FaultyHandler {
            failures_seen: Mutex::new(Vec::new()),
        });
        let events = EventDispatcher::new(&RoutingConfig::default())
            .with_handler(EventPoint::AcceptMessage, handler.clone())
            .with_handler(EventPoint::DeliverMessage, handler.clone());
        let fx = fixture_with_events(snapshot, events);

        let (envelope, message) = submit_to(&["account1@test.com"]);
        let outcomes = fx
            .pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        assert_eq!(outcomes[0].outcome, DeliveryOutcome::Delivered);
        assert_eq!(fx.store.message_count(id), 1);
    }

    #[tokio::test]
    async fn test_delivery_failed_hook_fires_for_unknown_recipient() {
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .build()
            .unwrap();
        let handler = Arc::new(FaultyHandler {
            failures_seen: Mutex::new(Vec::new()),
        });
        let events = EventDispatcher::new(&RoutingConfig::default())
            .with_handler(EventPoint::DeliveryFailed, handler.clone());
        let fx = fixture_with_events(snapshot, events);

        let (envelope, message) = submit_to(&["nobody@test.com"]);
        fx.pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;

        let seen = handler.failures_seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("RESOLUTION_ERROR"));
    }

    #[tokio::test]
    async fn test_directory_update_swaps_snapshot() {
        let directory = Arc::new(SharedDirectory::new(
            DirectoryBuilder::new()
                .domain(Domain::new("test.com"))
                .build()
                .unwrap(),
        ));
        let store = Arc::new(MemoryMailboxStore::new());
        let queue = Arc::new(MemoryOutboundQueue::new());
        let pipeline = RoutingPipeline::new(
            directory.clone(),
            store.clone(),
            queue,
            Arc::new(EventDispatcher::new(&RoutingConfig::default())),
            RoutingConfig::default(),
        );

        let (envelope, message) = submit_to(&["account1@test.com"]);
        let outcomes = pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;
        assert!(matches!(
            outcomes[0].outcome,
            DeliveryOutcome::Rejected { .. }
        ));

        let account = Account::new("account1@test.com");
        let id = account.id;
        directory.update(
            DirectoryBuilder::new()
                .domain(Domain::new("test.com"))
                .account(account)
                .build()
                .unwrap(),
        );

        let (envelope, message) = submit_to(&["account1@test.com"]);
        let outcomes = pipeline
            .submit(envelope, message, &SubmissionContext::default())
            .await;
        assert_eq!(outcomes[0].outcome, DeliveryOutcome::Delivered);
        assert_eq!(store.message_count(id), 1);
    }
}
