//! Mailflow Core - message routing and delivery-policy engine
//!
//! This crate decides the final set of concrete deliveries for a submitted
//! message: address and alias resolution, distribution list expansion with
//! access control and cycle breaking, per-account rule evaluation,
//! forwarding and vacation auto-replies, and the event hook extension
//! points. It performs no network or disk I/O itself; storage and outbound
//! transport are collaborator traits.

pub mod delivery;
pub mod hooks;
pub mod lists;
pub mod pipeline;
pub mod resolver;
pub mod rules;
pub mod store;

pub use delivery::{AppliedDelivery, DeliveryCoordinator, DerivedDelivery};
pub use hooks::{
    DownloadAction, EventContext, EventDecision, EventDispatcher, EventHandler, EventPoint,
    Severity, SessionInfo,
};
pub use lists::ListExpander;
pub use pipeline::{DirectoryProvider, RoutingPipeline, SharedDirectory, SubmissionContext};
pub use resolver::{Resolution, Resolver};
pub use rules::{Disposition, RuleEngine};
pub use store::{MailboxStore, MemoryMailboxStore, MemoryOutboundQueue, OutboundQueue};
