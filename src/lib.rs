//! Session event merge: validates a sorted events CSV and joins each
//! engagement to the latest market context at or before its bar.

pub mod config;
pub mod dedup;
pub mod errors;
pub mod event;
pub mod loader;
pub mod logging;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod validate;
