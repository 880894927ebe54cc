//! Address Resolver - classifies recipient addresses
//!
//! Domain aliasing is applied first, so `user@alias.com` and
//! `user@canonical.com` resolve identically. Alias links are chased
//! transitively up to a configured bound; exceeding the bound yields
//! `Unresolved` (a configuration error, not a crash).

use mailflow_common::types::{AccountId, EmailAddress, ListId};
use mailflow_common::RoutingConfig;
use mailflow_directory::DirectorySnapshot;
use std::sync::Arc;
use tracing::{debug, warn};

/// Classification of a recipient address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A local account, possibly reached through one or more aliases
    Account(AccountId),
    /// A distribution list
    List(ListId),
    /// Unknown or external address
    Unresolved,
}

/// Address resolver bound to one directory snapshot
pub struct Resolver {
    snapshot: Arc<DirectorySnapshot>,
    config: RoutingConfig,
}

impl Resolver {
    pub fn new(snapshot: Arc<DirectorySnapshot>, config: RoutingConfig) -> Self {
        Self { snapshot, config }
    }

    pub fn snapshot(&self) -> &DirectorySnapshot {
        &self.snapshot
    }

    /// Lowercased lookup key with the domain rewritten to its canonical
    /// form when it matches a domain alias.
    pub fn canonical_key(&self, addr: &EmailAddress) -> String {
        let domain = addr.domain.to_lowercase();
        let domain = self
            .snapshot
            .canonical_domain(&domain)
            .map(str::to_string)
            .unwrap_or(domain);
        format!("{}@{}", addr.local.to_lowercase(), domain)
    }

    /// Whether two addresses refer to the same mailbox name, after domain
    /// alias normalization and the configured local-part case policy.
    pub fn equivalent(&self, a: &EmailAddress, b: &EmailAddress) -> bool {
        if self.canonical_key(a) != self.canonical_key(b) {
            return false;
        }
        !self.config.case_sensitive_local_parts || a.local == b.local
    }

    /// Whether the address's domain is served by this directory, either
    /// canonically or through a domain alias.
    pub fn is_local(&self, addr: &EmailAddress) -> bool {
        self.snapshot.is_local_domain(&addr.domain)
    }

    /// Resolve an address to an account, a list, or `Unresolved`.
    pub fn resolve(&self, addr: &EmailAddress) -> Resolution {
        let mut current = addr.clone();

        for _ in 0..=self.config.max_alias_depth {
            let key = self.canonical_key(&current);

            if let Some(id) = self.snapshot.account_id_by_key(&key) {
                let stored = self.snapshot.account(id).map(|a| a.address.as_str());
                if self.stored_local_matches(&current, stored) {
                    return Resolution::Account(id);
                }
                return Resolution::Unresolved;
            }

            if let Some(id) = self.snapshot.list_id_by_key(&key) {
                let stored = self.snapshot.list(id).map(|l| l.address.as_str());
                if self.stored_local_matches(&current, stored) {
                    return Resolution::List(id);
                }
                return Resolution::Unresolved;
            }

            if let Some(alias) = self.snapshot.alias_by_key(&key) {
                if !self.stored_local_matches(&current, Some(&alias.source)) {
                    return Resolution::Unresolved;
                }
                debug!("Alias {} -> {}", current, alias.target);
                match EmailAddress::parse(&alias.target) {
                    Some(next) => current = next,
                    None => return Resolution::Unresolved,
                }
                continue;
            }

            return Resolution::Unresolved;
        }

        warn!(
            "Alias chain starting at {} exceeded depth bound {}",
            addr, self.config.max_alias_depth
        );
        Resolution::Unresolved
    }

    /// Under the case-sensitive policy, the lowercased lookup hit counts
    /// only if the given local part equals the stored one exactly. Applied
    /// uniformly to account, list and alias hits.
    fn stored_local_matches(&self, given: &EmailAddress, stored: Option<&str>) -> bool {
        if !self.config.case_sensitive_local_parts {
            return true;
        }
        stored
            .and_then(EmailAddress::parse)
            .map(|stored| stored.local == given.local)
            .unwrap_or(false)
    }
}
