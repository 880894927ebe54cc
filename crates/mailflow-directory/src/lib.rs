//! Mailflow Directory - configuration snapshot models
//!
//! Domains, accounts, aliases and distribution lists are modeled as
//! immutable value structures addressed by stable ids. A pipeline run pins
//! one [`snapshot::DirectorySnapshot`] at submission time, so configuration
//! updates can never corrupt an expansion already in flight.

pub mod models;
pub mod snapshot;

pub use models::{
    Account, Alias, DistributionList, Domain, ForwardSettings, ListMode, Rule, RuleAction,
    RuleCriteria, RuleField, RuleMatchType, VacationSettings,
};
pub use snapshot::{DirectoryBuilder, DirectorySnapshot};
