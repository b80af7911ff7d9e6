pub mod app;
pub mod chunking;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod facets;
pub mod output;
pub mod probe;
pub mod reconcile;
pub mod replica;
pub mod search;
