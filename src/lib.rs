//! Beacon: background alerting and recommendation scheduler.
//!
//! A single worker thread ticks through a fixed task roster: scan events for
//! upcoming starts, conflicts, and overdue follow-ups; analyze logged
//! activities into habit summaries; generate and promote recommendations;
//! and drive push delivery of the resulting alerts. All state lives in one
//! SQLite database owned by that thread.

pub mod alerts;
pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod push;
pub mod scheduler;
pub mod tasks;
pub mod timing;
pub mod types;

mod migrations;
