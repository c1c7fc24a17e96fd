//! # Gazette Clip
//!
//! A batch pipeline that monitors a gazette portal for daily publication
//! bundles, filters their text against organization and keyword rules, and
//! mails a clipping digest.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────┐
//! │  Portal  │──▶│ Extractor │──▶│  Matcher │──▶│  SQLite  │
//! │ list/dl  │   │ zip/pdf/  │   │ org gate │   │ dedupe + │
//! │ + retry  │   │ markup    │   │ keywords │   │ audit    │
//! └──────────┘   └───────────┘   └──────────┘   └────┬─────┘
//!                                                    │
//!                                               ┌────▼─────┐
//!                                               │   SMTP   │
//!                                               │  digest  │
//!                                               └──────────┘
//! ```
//!
//! The orchestrator in [`pipeline`] walks a lookback window of dates, skips
//! artifacts already recorded in the store, and contains per-artifact
//! failures so one bad bundle never aborts a run.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with env-var credential overrides |
//! | [`models`] | Core data types |
//! | [`portal`] | Authenticated portal client (listing, download, retry) |
//! | [`extract`] | ZIP/PDF/markup text extraction |
//! | [`matcher`] | Organization gate + keyword search with snippets |
//! | [`store`] | SQLite dedupe and audit store |
//! | [`mailer`] | SMTP digest notifier |
//! | [`pipeline`] | End-to-end orchestration |

pub mod config;
pub mod extract;
pub mod mailer;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod portal;
pub mod store;
