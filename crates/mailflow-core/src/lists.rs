//! List Expander - distribution list access control and expansion
//!
//! Expansion turns one list address plus a sender into a deduplicated set
//! of terminal account ids. Nested lists are legal; a `visited` set of list
//! ids breaks cycles, so a list containing itself is simply skipped once
//! already seen in the current expansion.

use crate::resolver::{Resolution, Resolver};
use mailflow_common::types::{AccountId, EmailAddress, ListId};
use mailflow_common::{Error, Result};
use mailflow_directory::{DistributionList, ListMode};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Distribution list expander bound to one resolver (and thus one
/// directory snapshot)
pub struct ListExpander<'a> {
    resolver: &'a Resolver,
}

impl<'a> ListExpander<'a> {
    pub fn new(resolver: &'a Resolver) -> Self {
        Self { resolver }
    }

    /// Expand a list to the terminal accounts it delivers to.
    ///
    /// `sender` is the envelope Return-Path (None for the null sender);
    /// `smtp_authenticated` reports whether the submitting session was
    /// authenticated. Access violations are `AccessDenied` delivery
    /// failures, never silent drops.
    pub fn expand(
        &self,
        list_id: ListId,
        sender: Option<&EmailAddress>,
        smtp_authenticated: bool,
    ) -> Result<Vec<AccountId>> {
        let list = self
            .resolver
            .snapshot()
            .list(list_id)
            .ok_or_else(|| Error::Internal(format!("Unknown list id {}", list_id)))?;

        self.check_access(list, sender, smtp_authenticated)?;

        let mut visited = HashSet::new();
        visited.insert(list_id);
        let mut seen = HashSet::new();
        let mut accounts = Vec::new();
        self.expand_members(list, &mut visited, &mut seen, &mut accounts);

        debug!(
            "List {} expanded to {} terminal account(s)",
            list.address,
            accounts.len()
        );
        Ok(accounts)
    }

    fn expand_members(
        &self,
        list: &DistributionList,
        visited: &mut HashSet<ListId>,
        seen: &mut HashSet<AccountId>,
        accounts: &mut Vec<AccountId>,
    ) {
        for member in &list.members {
            let Some(member_addr) = EmailAddress::parse(member) else {
                warn!("List {} member {:?} is not an address, skipping", list.address, member);
                continue;
            };

            match self.resolver.resolve(&member_addr) {
                Resolution::Account(id) => {
                    // First-seen order, each terminal account exactly once
                    if seen.insert(id) {
                        accounts.push(id);
                    }
                }
                Resolution::List(nested_id) => {
                    if !visited.insert(nested_id) {
                        debug!(
                            "List {} already visited in this expansion, skipping",
                            member_addr
                        );
                        continue;
                    }
                    if let Some(nested) = self.resolver.snapshot().list(nested_id) {
                        self.expand_members(nested, visited, seen, accounts);
                    }
                }
                Resolution::Unresolved => {
                    warn!(
                        "List {} member {} does not resolve, skipping",
                        list.address, member_addr
                    );
                }
            }
        }
    }

    fn check_access(
        &self,
        list: &DistributionList,
        sender: Option<&EmailAddress>,
        smtp_authenticated: bool,
    ) -> Result<()> {
        match list.mode {
            ListMode::Public => {
                if list.require_smtp_auth && !smtp_authenticated {
                    return Err(Error::AccessDenied(format!(
                        "The list {} requires SMTP authentication",
                        list.address
                    )));
                }
                Ok(())
            }
            ListMode::Announcement => {
                let required = list.require_sender.as_deref().unwrap_or("");
                let allowed = match (sender, EmailAddress::parse(required)) {
                    (Some(sender), Some(required)) => self.resolver.equivalent(sender, &required),
                    _ => false,
                };
                if !allowed {
                    return Err(Error::AccessDenied(format!(
                        "Only the announcer may send to the list {}",
                        list.address
                    )));
                }
                Ok(())
            }
            ListMode::Membership => {
                let is_member = sender
                    .map(|sender| self.is_member(list, sender))
                    .unwrap_or(false);
                if !is_member {
                    return Err(Error::AccessDenied(format!(
                        "Only members may send to the list {}",
                        list.address
                    )));
                }
                Ok(())
            }
        }
    }

    /// Whether the sender is a member of the list, directly or via a
    /// resolvable alias or domain alias.
    fn is_member(&self, list: &DistributionList, sender: &EmailAddress) -> bool {
        let sender_resolution = self.resolver.resolve(sender);

        for member in &list.members {
            let Some(member_addr) = EmailAddress::parse(member) else {
                continue;
            };
            if self.resolver.equivalent(&member_addr, sender) {
                return true;
            }
            if let (Resolution::Account(member_id), Resolution::Account(sender_id)) =
                (self.resolver.resolve(&member_addr), sender_resolution)
            {
                if member_id == sender_id {
                    return true;
                }
            }
        }
        false
    }
}
