//! Outbound email digest.
//!
//! One multipart message per sent run: plain-text part plus an HTML body
//! listing every finding with its context snippet. Submission is a single
//! SMTP transaction over STARTTLS with login auth. Transport failures are
//! the caller's to contain; matches are already durable by the time a
//! digest is sent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::MailConfig;
use crate::models::MatchRow;

/// Everything a notification needs from one completed run.
#[derive(Debug)]
pub struct Digest<'a> {
    pub run_date: NaiveDate,
    pub matches: &'a [MatchRow],
}

/// Notification sink for run digests. The pipeline is written against this
/// trait; tests substitute a recording fake.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, digest: &Digest<'_>) -> Result<()>;
}

/// SMTP-backed notifier (STARTTLS + login).
pub struct SmtpNotifier {
    config: MailConfig,
}

impl SmtpNotifier {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, digest: &Digest<'_>) -> Result<()> {
        let subject = format!(
            "{} {} - {} finding(s)",
            self.config.subject_prefix,
            digest.run_date,
            digest.matches.len()
        );

        let from: Mailbox = self
            .config
            .from_email
            .parse()
            .with_context(|| format!("invalid from_email: {}", self.config.from_email))?;

        let mut builder = Message::builder().from(from).subject(subject);
        for to in &self.config.to_emails {
            let mailbox: Mailbox = to
                .parse()
                .with_context(|| format!("invalid to_email: {}", to))?;
            builder = builder.to(mailbox);
        }

        let html = build_digest_html(digest);
        let plain = build_digest_plain(digest);
        let message = builder
            .multipart(MultiPart::alternative_plain_html(plain, html))
            .context("failed to build digest message")?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
            .with_context(|| format!("invalid SMTP host: {}", self.config.smtp_host))?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                self.config.smtp_user.clone(),
                self.config.smtp_pass.clone(),
            ))
            .build();

        transport
            .send(message)
            .await
            .context("SMTP submission failed")?;
        Ok(())
    }
}

/// HTML digest body: a heading, the total, and one block per finding.
pub fn build_digest_html(digest: &Digest<'_>) -> String {
    let mut out = String::new();
    out.push_str("<html><body style=\"font-family: Arial, sans-serif;\">\n");
    out.push_str(&format!(
        "<h2>Gazette clipping - {}</h2>\n<p>Total findings: <b>{}</b></p>\n",
        digest.run_date,
        digest.matches.len()
    ));

    if digest.matches.is_empty() {
        out.push_str(
            "<p>No findings for this run. This is a scheduled status message confirming the pipeline ran.</p>\n",
        );
    }

    for (i, m) in digest.matches.iter().enumerate() {
        out.push_str(&format!(
            "<hr/>\n<h3>Finding #{} [{}] keyword: <code>{}</code></h3>\n\
             <p><b>Source file:</b> {}</p>\n\
             <pre style=\"white-space: pre-wrap; font-family: monospace; background: #f5f5f5; padding: 10px;\">{}</pre>\n",
            i + 1,
            html_escape(&m.filter_name),
            html_escape(&m.keyword),
            html_escape(&m.source_file),
            html_escape(&m.snippet)
        ));
    }

    out.push_str("</body></html>\n");
    out
}

fn build_digest_plain(digest: &Digest<'_>) -> String {
    let mut out = format!(
        "Gazette clipping {}\nTotal findings: {}\n",
        digest.run_date,
        digest.matches.len()
    );
    for (i, m) in digest.matches.iter().enumerate() {
        out.push_str(&format!(
            "\n#{} [{}] {} in {}\n{}\n",
            i + 1,
            m.filter_name,
            m.keyword,
            m.source_file,
            m.snippet
        ));
    }
    out
}

/// Minimal escaping for snippet text interpolated into the HTML body.
fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
