//! Event hook dispatch
//!
//! Named extension points invoked at fixed spots in the routing pipeline
//! and session handling. A handler may observe context, mutate the
//! message view it is given, or override a built-in decision. Handler
//! faults and timeouts never take the pipeline down: the fault is
//! reported through the `error` point and the built-in behavior applies.

use mailflow_common::types::{EmailAddress, Envelope, MessageInfo};
use mailflow_common::{Result, RoutingConfig};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Extension points a handler can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPoint {
    /// A message copy was accepted for a recipient, before policy runs
    AcceptMessage,
    /// A message copy is about to be stored in a local mailbox
    DeliverMessage,
    /// A derived envelope is about to be routed
    DeliveryStart,
    /// Delivery to one recipient failed
    DeliveryFailed,
    /// A client opened a session
    ClientConnect,
    /// A client authenticated
    ClientLogon,
    /// A client sent HELO/EHLO
    Helo,
    /// A password is being checked; the handler may override the verdict
    ValidatePassword,
    /// A message was fetched from an external account
    ExternalAccountDownload,
    BackupCompleted,
    BackupFailed,
    /// A server error is being reported
    Error,
}

impl fmt::Display for EventPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventPoint::AcceptMessage => "accept-message",
            EventPoint::DeliverMessage => "deliver-message",
            EventPoint::DeliveryStart => "delivery-start",
            EventPoint::DeliveryFailed => "delivery-failed",
            EventPoint::ClientConnect => "client-connect",
            EventPoint::ClientLogon => "client-logon",
            EventPoint::Helo => "helo",
            EventPoint::ValidatePassword => "validate-password",
            EventPoint::ExternalAccountDownload => "external-account-download",
            EventPoint::BackupCompleted => "backup-completed",
            EventPoint::BackupFailed => "backup-failed",
            EventPoint::Error => "error",
        };
        f.write_str(name)
    }
}

/// Severity of a reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Client session details exposed to session-level points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub remote_ip: IpAddr,
    pub port: u16,
    /// Empty until the client authenticates
    pub username: String,
}

impl SessionInfo {
    pub fn new(remote_ip: IpAddr, port: u16) -> Self {
        Self {
            remote_ip,
            port,
            username: String::new(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }
}

/// Context handed to a handler; which fields are populated depends on
/// the point
#[derive(Default)]
pub struct EventContext<'a> {
    pub session: Option<&'a SessionInfo>,
    pub envelope: Option<&'a Envelope>,
    pub recipient: Option<&'a EmailAddress>,
    /// Mutable at `accept-message`: header edits made here are carried
    /// through delivery
    pub message: Option<&'a mut MessageInfo>,
    pub severity: Option<Severity>,
    /// Free-form detail, e.g. the HELO hostname or an error description
    pub detail: Option<String>,
}

impl<'a> EventContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session: &'a SessionInfo) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_envelope(mut self, envelope: &'a Envelope) -> Self {
        self.envelope = Some(envelope);
        self
    }

    pub fn with_recipient(mut self, recipient: &'a EmailAddress) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn with_message(mut self, message: &'a mut MessageInfo) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A handler's verdict for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDecision {
    /// Apply the built-in behavior
    Default,
    /// Override the built-in behavior with a point-specific value
    Override(i32),
}

/// What to do with a message fetched from an external account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadAction {
    /// Leave the message on the external server
    Keep,
    /// Delete it from the external server after this many days
    DeleteAfterDays(u32),
}

/// Attached event handler
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, point: EventPoint, ctx: EventContext<'_>) -> Result<EventDecision>;
}

/// Event hook dispatcher
///
/// Holds at most one handler per point. Points without a handler are
/// no-ops returning the default decision.
pub struct EventDispatcher {
    handlers: HashMap<EventPoint, Arc<dyn EventHandler>>,
    timeout: Duration,
}

impl EventDispatcher {
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            timeout: Duration::from_millis(config.hook_timeout_ms),
        }
    }

    /// Attach a handler to one point, replacing any previous one
    pub fn with_handler(mut self, point: EventPoint, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(point, handler);
        self
    }

    /// Invoke the point's handler, bounding it by the configured timeout.
    /// Faults and timeouts yield the default decision.
    pub async fn dispatch(&self, point: EventPoint, ctx: EventContext<'_>) -> EventDecision {
        let Some(handler) = self.handlers.get(&point) else {
            return EventDecision::Default;
        };

        debug!("Dispatching {} event", point);
        match tokio::time::timeout(self.timeout, handler.handle(point, ctx)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                self.report_fault(point, format!("Handler fault at {}: {}", point, e))
                    .await;
                EventDecision::Default
            }
            Err(_) => {
                self.report_fault(
                    point,
                    format!(
                        "Handler at {} timed out after {}ms",
                        point,
                        self.timeout.as_millis()
                    ),
                )
                .await;
                EventDecision::Default
            }
        }
    }

    async fn report_fault(&self, point: EventPoint, text: String) {
        error!("{}", text);
        // A fault in the error handler itself is only logged; reporting it
        // again would recurse.
        if point == EventPoint::Error {
            return;
        }
        let Some(handler) = self.handlers.get(&EventPoint::Error) else {
            return;
        };
        let ctx = EventContext::new()
            .with_severity(Severity::Error)
            .with_detail(text);
        if tokio::time::timeout(self.timeout, handler.handle(EventPoint::Error, ctx))
            .await
            .map_or(true, |r| r.is_err())
        {
            error!("Error handler failed while reporting a {} fault", point);
        }
    }

    pub async fn client_connected(&self, session: &SessionInfo) {
        self.dispatch(
            EventPoint::ClientConnect,
            EventContext::new().with_session(session),
        )
        .await;
    }

    pub async fn client_logon(&self, session: &SessionInfo) {
        self.dispatch(
            EventPoint::ClientLogon,
            EventContext::new().with_session(session),
        )
        .await;
    }

    pub async fn helo(&self, session: &SessionInfo, hostname: &str) {
        self.dispatch(
            EventPoint::Helo,
            EventContext::new()
                .with_session(session)
                .with_detail(hostname),
        )
        .await;
    }

    /// Check a password verdict, letting the handler override the built-in
    /// result in either direction. `Override(0)` accepts; any non-zero
    /// override rejects.
    pub async fn validate_password(&self, session: &SessionInfo, builtin_ok: bool) -> bool {
        match self
            .dispatch(
                EventPoint::ValidatePassword,
                EventContext::new().with_session(session),
            )
            .await
        {
            EventDecision::Default => builtin_ok,
            EventDecision::Override(v) => v == 0,
        }
    }

    /// Decide what to do with a message downloaded from an external
    /// account. `Override(0)` keeps it; a positive `Override(n)` deletes
    /// it after `n` days. Any other override is ignored.
    pub async fn external_account_download(
        &self,
        session: &SessionInfo,
        message: &mut MessageInfo,
    ) -> DownloadAction {
        match self
            .dispatch(
                EventPoint::ExternalAccountDownload,
                EventContext::new()
                    .with_session(session)
                    .with_message(message),
            )
            .await
        {
            EventDecision::Override(days) if days > 0 => {
                DownloadAction::DeleteAfterDays(days as u32)
            }
            EventDecision::Override(days) if days < 0 => {
                warn!(
                    "Ignoring external-account-download override {}, keeping the message",
                    days
                );
                DownloadAction::Keep
            }
            _ => DownloadAction::Keep,
        }
    }

    pub async fn backup_completed(&self, detail: &str) {
        self.dispatch(
            EventPoint::BackupCompleted,
            EventContext::new().with_detail(detail),
        )
        .await;
    }

    pub async fn backup_failed(&self, detail: &str) {
        self.dispatch(
            EventPoint::BackupFailed,
            EventContext::new().with_detail(detail),
        )
        .await;
    }

    pub async fn report_error(&self, severity: Severity, text: &str) {
        error!("Reported error ({:?}): {}", severity, text);
        self.dispatch(
            EventPoint::Error,
            EventContext::new()
                .with_severity(severity)
                .with_detail(text),
        )
        .await;
    }
}
