//! Directory snapshot and builder
//!
//! The builder is the save-time boundary: structural configuration errors
//! (empty list members, malformed or duplicate addresses) are rejected here,
//! never during expansion.

use crate::models::{Account, Alias, DistributionList, Domain};
use mailflow_common::types::{AccountId, EmailAddress, ListId};
use mailflow_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable directory snapshot
///
/// All lookup keys are the full lowercased address. Callers that need
/// case-sensitive local parts compare against the stored model's address
/// after lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    domains: Vec<Domain>,
    accounts: HashMap<AccountId, Account>,
    lists: HashMap<ListId, DistributionList>,
    /// alias or canonical domain (lowercased) -> canonical domain (lowercased)
    canonical_domains: HashMap<String, String>,
    accounts_by_address: HashMap<String, AccountId>,
    lists_by_address: HashMap<String, ListId>,
    /// lowercased alias source address -> alias record
    aliases_by_address: HashMap<String, Alias>,
}

impl DirectorySnapshot {
    /// Canonical domain for a (lowercased) domain name, chasing domain
    /// aliases. None if the domain is not served here.
    pub fn canonical_domain(&self, domain: &str) -> Option<&str> {
        self.canonical_domains
            .get(&domain.to_lowercase())
            .map(|s| s.as_str())
    }

    pub fn is_local_domain(&self, domain: &str) -> bool {
        self.canonical_domains.contains_key(&domain.to_lowercase())
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn list(&self, id: ListId) -> Option<&DistributionList> {
        self.lists.get(&id)
    }

    /// Account id for a lowercased `local@domain` key
    pub fn account_id_by_key(&self, key: &str) -> Option<AccountId> {
        self.accounts_by_address.get(key).copied()
    }

    /// List id for a lowercased `local@domain` key
    pub fn list_id_by_key(&self, key: &str) -> Option<ListId> {
        self.lists_by_address.get(key).copied()
    }

    /// Alias record for a lowercased `local@domain` key. The record keeps
    /// the source address as stored, original casing included.
    pub fn alias_by_key(&self, key: &str) -> Option<&Alias> {
        self.aliases_by_address.get(key)
    }

    /// Alias target address for a lowercased `local@domain` key
    pub fn alias_target_by_key(&self, key: &str) -> Option<&str> {
        self.aliases_by_address.get(key).map(|a| a.target.as_str())
    }
}

/// Builder for a [`DirectorySnapshot`]
#[derive(Debug, Default)]
pub struct DirectoryBuilder {
    domains: Vec<Domain>,
    accounts: Vec<Account>,
    aliases: Vec<Alias>,
    lists: Vec<DistributionList>,
}

impl DirectoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: Domain) -> Self {
        self.domains.push(domain);
        self
    }

    pub fn account(mut self, account: Account) -> Self {
        self.accounts.push(account);
        self
    }

    pub fn alias(mut self, alias: Alias) -> Self {
        self.aliases.push(alias);
        self
    }

    pub fn list(mut self, list: DistributionList) -> Self {
        self.lists.push(list);
        self
    }

    /// Validate and build the snapshot
    pub fn build(self) -> Result<DirectorySnapshot> {
        let mut snapshot = DirectorySnapshot::default();

        for domain in &self.domains {
            let canonical = domain.name.to_lowercase();
            snapshot
                .canonical_domains
                .insert(canonical.clone(), canonical.clone());
            for alias in &domain.aliases {
                snapshot
                    .canonical_domains
                    .insert(alias.to_lowercase(), canonical.clone());
            }
        }
        snapshot.domains = self.domains;

        let mut used = HashMap::new();
        let mut claim = |addr: &str, what: &str| -> Result<String> {
            let key = address_key(addr)?;
            if used.insert(key.clone(), what.to_string()).is_some() {
                return Err(Error::Config(format!(
                    "The address {} is already in use",
                    addr
                )));
            }
            Ok(key)
        };

        for account in self.accounts {
            let key = claim(&account.address, "account")?;
            if let Some(forward) = account.forward.as_ref() {
                if forward.enabled && forward.address.trim().is_empty() {
                    return Err(Error::Config(format!(
                        "The forward address of {} is empty",
                        account.address
                    )));
                }
            }
            snapshot.accounts_by_address.insert(key, account.id);
            snapshot.accounts.insert(account.id, account);
        }

        for alias in self.aliases {
            let key = claim(&alias.source, "alias")?;
            address_key(&alias.target)?;
            snapshot.aliases_by_address.insert(key, alias);
        }

        for list in self.lists {
            let key = claim(&list.address, "list")?;
            for member in &list.members {
                if member.trim().is_empty() {
                    return Err(Error::Config(
                        "The recipient address is empty".to_string(),
                    ));
                }
                address_key(member)?;
            }
            snapshot.lists_by_address.insert(key, list.id);
            snapshot.lists.insert(list.id, list);
        }

        Ok(snapshot)
    }
}

/// Lowercased lookup key for an address string
fn address_key(addr: &str) -> Result<String> {
    EmailAddress::parse(addr)
        .map(|a| format!("{}@{}", a.local.to_lowercase(), a.domain.to_lowercase()))
        .ok_or_else(|| Error::Config(format!("Invalid address: {}", addr)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListMode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_domain_alias_canonicalization() {
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com").with_alias("Dummy-Example.COM"))
            .build()
            .unwrap();

        assert_eq!(snapshot.canonical_domain("dummy-example.com"), Some("test.com"));
        assert_eq!(snapshot.canonical_domain("TEST.com"), Some("test.com"));
        assert_eq!(snapshot.canonical_domain("other.com"), None);
        assert!(snapshot.is_local_domain("dummy-example.com"));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let account = Account::new("Forward1@test.com");
        let id = account.id;
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(account)
            .build()
            .unwrap();

        assert_eq!(snapshot.account_id_by_key("forward1@test.com"), Some(id));
        assert_eq!(snapshot.account(id).unwrap().address, "Forward1@test.com");
    }

    #[test]
    fn test_empty_list_member_rejected_at_save_time() {
        let list = DistributionList::new(
            "list1@test.com",
            vec![
                "recipient1@test.com".to_string(),
                "recipient2@test.com".to_string(),
                "".to_string(),
                "recipient4@test.com".to_string(),
            ],
        );

        let err = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .list(list)
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("The recipient address is empty"));
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let err = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(Account::new("a@test.com"))
            .alias(Alias::new("A@test.com", "b@test.com"))
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("already in use"));
    }

    #[test]
    fn test_quoted_local_part_round_trip() {
        let account = Account::new("Addr'ess2@test.com");
        let id = account.id;
        let snapshot = DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .account(account)
            .alias(Alias::new("alias2'quoted@test.com", "Addr'ess2@test.com"))
            .build()
            .unwrap();

        assert_eq!(snapshot.account_id_by_key("addr'ess2@test.com"), Some(id));
        assert_eq!(
            snapshot.alias_target_by_key("alias2'quoted@test.com"),
            Some("Addr'ess2@test.com")
        );
        // The record keeps the source as stored, casing included
        assert_eq!(
            snapshot
                .alias_by_key("alias2'quoted@test.com")
                .map(|a| a.source.as_str()),
            Some("alias2'quoted@test.com")
        );
    }

    #[test]
    fn test_self_referential_list_is_valid_configuration() {
        let list = DistributionList::new(
            "list1@test.com",
            vec![
                "recipient1@test.com".to_string(),
                "list1@test.com".to_string(),
            ],
        )
        .with_mode(ListMode::Public);

        // Cycles are broken at expansion time, not rejected at save time.
        assert!(DirectoryBuilder::new()
            .domain(Domain::new("test.com"))
            .list(list)
            .build()
            .is_ok());
    }
}
