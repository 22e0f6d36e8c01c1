pub mod api;
pub mod audit;
pub mod auth;
pub mod ballot;
pub mod common;
pub mod db;
pub mod eligibility;
pub mod ledger;
pub mod mongodb;
pub mod pagination;
pub mod tally;

#[cfg(test)]
pub mod fixtures;
