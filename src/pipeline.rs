//! Pipeline orchestration: the end-to-end clipping loop.
//!
//! Drives list → dedupe → download → extract → match → record over a
//! lookback window of dates and the configured filters, then persists the
//! accumulated matches, decides whether to notify, and appends one audit
//! row. Failures are contained at the narrowest scope: one bad artifact (or
//! one failed listing) is logged and skipped, never aborting the run. An
//! artifact is marked processed only after extraction and matching succeed,
//! so a failed artifact is retried by a later run.

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::{Config, FilterConfig};
use crate::extract;
use crate::mailer::{Digest, Notifier};
use crate::matcher;
use crate::models::{Artifact, ContainerKind, MatchRow, RunReport};
use crate::portal::{Catalog, PortalError};
use crate::store;

/// When a digest email goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailPolicy {
    /// Never send (backfill, `--no-email`).
    Disabled,
    /// Send only when the run found matches.
    OnMatches,
    /// Send even a zero-match status digest. The scheduler passes this for
    /// designated confirmation runs; the pipeline never looks at the clock.
    Forced,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub date: NaiveDate,
    /// Trailing days scanned, ending at `date`. 1 means `date` only.
    pub lookback_days: u32,
    pub email: EmailPolicy,
}

/// Execute one clipping invocation and return its summary (also persisted
/// as a `runs` row).
pub async fn run_clip<C: Catalog>(
    config: &Config,
    pool: &SqlitePool,
    catalog: &mut C,
    notifier: &dyn Notifier,
    opts: RunOptions,
) -> Result<RunReport> {
    let window = lookback_window(opts.date, opts.lookback_days);
    let window_note = match window.first() {
        Some(first) if window.len() > 1 => format!("window={}..{}", first, opts.date),
        _ => format!("window={}", opts.date),
    };
    info!(date = %opts.date, lookback = opts.lookback_days, "starting clip run");

    let mut files_seen: u64 = 0;
    let mut files_new: u64 = 0;
    let mut all_matches: Vec<MatchRow> = Vec::new();
    let mut notes: Vec<String> = vec![window_note];

    for date in &window {
        for (section, filters) in filters_by_section(&config.filters) {
            let artifacts = match list_with_refresh(catalog, *date, section).await {
                Ok(artifacts) => artifacts,
                Err(e) => {
                    // Containment: a failed listing skips this date/section.
                    warn!(date = %date, section, error = %e, "listing failed");
                    notes.push(format!("listing {} {} failed: {}", date, section, e));
                    continue;
                }
            };
            files_seen += artifacts.len() as u64;

            let mut pending = Vec::new();
            for artifact in artifacts {
                if store::was_processed(pool, &artifact.id).await? {
                    debug!(artifact = %artifact.id, "already processed, skipping");
                } else {
                    pending.push(artifact);
                }
            }
            files_new += pending.len() as u64;

            for artifact in &pending {
                if artifact.kind == ContainerKind::Unknown {
                    debug!(artifact = %artifact.id, "unknown container kind, skipping");
                    continue;
                }
                match process_artifact(catalog, *date, artifact, &filters).await {
                    Ok(rows) => {
                        all_matches.extend(rows);
                        store::mark_processed(pool, &artifact.id, &date.to_string()).await?;
                    }
                    Err(e) => {
                        // Containment: the artifact stays unmarked so a
                        // later run retries it.
                        warn!(artifact = %artifact.id, error = %format!("{:#}", e), "artifact failed");
                        notes.push(format!("{} failed: {:#}", artifact.id, e));
                    }
                }
            }
        }
    }

    let matches_found = store::insert_matches(pool, &all_matches).await?;

    let want_email = match opts.email {
        EmailPolicy::Disabled => false,
        EmailPolicy::OnMatches => matches_found > 0,
        EmailPolicy::Forced => true,
    };

    let mut email_sent = false;
    if want_email {
        let digest = Digest {
            run_date: opts.date,
            matches: &all_matches,
        };
        match notifier.send(&digest).await {
            Ok(()) => email_sent = true,
            Err(e) => {
                // Matches are already durable; a failed digest only gets a note.
                warn!(error = %format!("{:#}", e), "digest email failed");
                notes.push(format!("email failed: {:#}", e));
            }
        }
    }

    let report = RunReport {
        run_date: opts.date,
        files_seen,
        files_new,
        matches_found,
        email_sent,
        notes: notes.join("; "),
    };

    if let Err(e) = store::log_run(pool, &report).await {
        // The run's work is done; a failed audit row must not undo it.
        warn!(error = %format!("{:#}", e), "failed to append run log");
    }

    println!("clip {}", report.run_date);
    println!("  files seen: {}", report.files_seen);
    println!("  files new: {}", report.files_new);
    println!("  matches found: {}", report.matches_found);
    println!("  email sent: {}", report.email_sent);

    Ok(report)
}

/// Download, extract, and match one artifact against every filter of its
/// section. Returns the match rows; the caller records them and marks the
/// artifact processed.
async fn process_artifact<C: Catalog>(
    catalog: &mut C,
    date: NaiveDate,
    artifact: &Artifact,
    filters: &[&FilterConfig],
) -> Result<Vec<MatchRow>> {
    let bytes = download_with_refresh(catalog, date, artifact)
        .await
        .with_context(|| format!("download of {}", artifact.id))?;

    let text = extract::extract_artifact(artifact.kind, &bytes)
        .with_context(|| format!("extraction of {}", artifact.id))?;

    let mut rows = Vec::new();
    for &filter in filters {
        for hit in matcher::find_hits(&text, filter) {
            rows.push(MatchRow {
                run_date: date.to_string(),
                source_file: artifact.id.clone(),
                filter_name: filter.name.clone(),
                keyword: hit.keyword,
                snippet: hit.snippet,
            });
        }
    }
    Ok(rows)
}

/// Listing with one re-authentication on session expiry.
async fn list_with_refresh<C: Catalog>(
    catalog: &mut C,
    date: NaiveDate,
    section: &str,
) -> Result<Vec<Artifact>, PortalError> {
    match catalog.list_artifacts(date, section).await {
        Err(PortalError::SessionExpired) => {
            info!("session expired during listing, re-authenticating");
            catalog.refresh_session().await?;
            catalog.list_artifacts(date, section).await
        }
        other => other,
    }
}

/// Download with one re-authentication on session expiry.
async fn download_with_refresh<C: Catalog>(
    catalog: &mut C,
    date: NaiveDate,
    artifact: &Artifact,
) -> Result<Vec<u8>, PortalError> {
    match catalog.download_artifact(date, artifact).await {
        Err(PortalError::SessionExpired) => {
            info!("session expired during download, re-authenticating");
            catalog.refresh_session().await?;
            catalog.download_artifact(date, artifact).await
        }
        other => other,
    }
}

/// Contiguous date range of `lookback_days` days ending at `date`,
/// oldest first.
fn lookback_window(date: NaiveDate, lookback_days: u32) -> Vec<NaiveDate> {
    let days = lookback_days.max(1);
    (0..days)
        .rev()
        .filter_map(|back| date.checked_sub_days(Days::new(back as u64)))
        .collect()
}

/// Group filters by section, preserving configuration order. Each section
/// is listed once per date; every filter of that section runs against each
/// downloaded artifact.
fn filters_by_section(filters: &[FilterConfig]) -> Vec<(&str, Vec<&FilterConfig>)> {
    let mut grouped: Vec<(&str, Vec<&FilterConfig>)> = Vec::new();
    for filter in filters {
        match grouped.iter_mut().find(|(s, _)| *s == filter.section) {
            Some((_, list)) => list.push(filter),
            None => grouped.push((filter.section.as_str(), vec![filter])),
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(name: &str, section: &str) -> FilterConfig {
        FilterConfig {
            name: name.to_string(),
            section: section.to_string(),
            organization_contains: "agency".to_string(),
            keywords_any: vec!["decree".to_string()],
        }
    }

    #[test]
    fn window_is_oldest_first() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let window = lookback_window(date, 3);
        assert_eq!(
            window,
            vec![
                NaiveDate::from_ymd_opt(2025, 6, 8).unwrap(),
                NaiveDate::from_ymd_opt(2025, 6, 9).unwrap(),
                date,
            ]
        );
    }

    #[test]
    fn window_of_one_is_the_date_itself() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        assert_eq!(lookback_window(date, 1), vec![date]);
        // A zero lookback is clamped rather than producing an empty run.
        assert_eq!(lookback_window(date, 0), vec![date]);
    }

    #[test]
    fn filters_group_by_section_in_config_order() {
        let filters = vec![filter("a", "DO1"), filter("b", "DO2"), filter("c", "DO1")];
        let grouped = filters_by_section(&filters);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "DO1");
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[1].0, "DO2");
    }
}
