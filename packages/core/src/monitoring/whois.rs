//! WHOIS domain-expiry lookup.
//!
//! Speaks the plain port-43 protocol: connect, send `domain\r\n`, read until
//! the server closes. The server is chosen from a small TLD table; unknown
//! TLDs go to IANA, whose answer is only used to find the authoritative
//! server (`refer:` / `whois:`) and query it in turn.
//!
//! Expiry extraction is best effort. Registries change their output without
//! notice, so an unsupported format surfaces as [`ExpiryError::NotFound`] or
//! [`ExpiryError::Unparsed`] instead of a guessed date. New labels and
//! layouts are added through [`ExpiryTable`] without touching the parser.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

use crate::monitoring::error::ExpiryError;

pub const DEFAULT_WHOIS_TIMEOUT: Duration = Duration::from_secs(8);
pub const WHOIS_PORT: u16 = 43;
pub const IANA_WHOIS: &str = "whois.iana.org";

/// Known registry servers by TLD.
const TLD_SERVERS: &[(&str, &str)] = &[
    ("com", "whois.verisign-grs.com"),
    ("net", "whois.verisign-grs.com"),
    ("org", "whois.pir.org"),
    ("io", "whois.nic.io"),
    ("dev", "whois.nic.google"),
    ("app", "whois.nic.google"),
];

/// How to read the value that follows an expiry label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateLayout {
    Rfc3339,
    /// `chrono` format carrying a numeric offset (`%z`).
    WithOffset(&'static str),
    /// Date and time without offset, taken as UTC.
    NaiveUtc(&'static str),
    /// Date only, midnight UTC.
    Date(&'static str),
}

impl DateLayout {
    fn parse(&self, value: &str) -> Option<DateTime<Utc>> {
        match self {
            Self::Rfc3339 => DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Self::WithOffset(fmt) => DateTime::parse_from_str(value, fmt)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Self::NaiveUtc(fmt) => NaiveDateTime::parse_from_str(value, fmt)
                .ok()
                .map(|dt| dt.and_utc()),
            Self::Date(fmt) => NaiveDate::parse_from_str(value, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc()),
        }
    }
}

/// Layouts tried, in order, for every built-in label.
pub const DEFAULT_LAYOUTS: &[DateLayout] = &[
    DateLayout::Rfc3339,
    DateLayout::WithOffset("%Y-%m-%dT%H:%M:%S%z"),
    DateLayout::NaiveUtc("%Y-%m-%d %H:%M:%SZ"),
    DateLayout::WithOffset("%Y-%m-%d %H:%M:%S%z"),
    DateLayout::NaiveUtc("%Y-%m-%d %H:%M:%S"),
    DateLayout::NaiveUtc("%Y-%m-%dT%H:%M:%S"),
    DateLayout::Date("%Y-%m-%d"),
    DateLayout::Date("%Y.%m.%d"),
    DateLayout::Date("%Y/%m/%d"),
    DateLayout::Date("%d-%b-%Y"),
];

/// One registry label and the layouts its value may use.
#[derive(Debug, Clone)]
pub struct ExpiryField {
    pub label: String,
    pub layouts: Vec<DateLayout>,
}

impl ExpiryField {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_layouts(label, DEFAULT_LAYOUTS.to_vec())
    }

    pub fn with_layouts(label: impl Into<String>, layouts: Vec<DateLayout>) -> Self {
        Self {
            label: label.into(),
            layouts,
        }
    }
}

/// Ordered label table used to pull an expiry date out of WHOIS text.
#[derive(Debug, Clone)]
pub struct ExpiryTable {
    fields: Vec<ExpiryField>,
}

impl Default for ExpiryTable {
    fn default() -> Self {
        Self {
            fields: vec![
                ExpiryField::new("Registry Expiry Date"),
                ExpiryField::new("Registrar Registration Expiration Date"),
                ExpiryField::new("Expiration Time"),
                ExpiryField::new("Expiry Date"),
                ExpiryField::new("paid-till"),
            ],
        }
    }
}

impl ExpiryTable {
    /// Append a field; it is tried after the existing ones.
    pub fn with_field(mut self, field: ExpiryField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[ExpiryField] {
        &self.fields
    }

    /// Scan `text` line by line for a known label and parse its value.
    ///
    /// `NotFound` when no label occurs at all, `Unparsed` when a label was
    /// seen but none of its values could be read.
    pub fn parse(&self, text: &str) -> Result<DateTime<Utc>, ExpiryError> {
        let mut label_seen = false;

        for line in text.lines() {
            let line = line.trim();
            let lowered = line.to_lowercase();

            for field in &self.fields {
                if !lowered.starts_with(&field.label.to_lowercase()) {
                    continue;
                }
                let Some((_, value)) = line.split_once(':') else {
                    continue;
                };
                label_seen = true;

                if let Some(expiry) = parse_value(value, line, &field.layouts) {
                    return Ok(expiry);
                }
            }
        }

        if label_seen {
            Err(ExpiryError::Unparsed)
        } else {
            Err(ExpiryError::NotFound)
        }
    }
}

/// Parse with the default table.
pub fn parse_expiry(text: &str) -> Result<DateTime<Utc>, ExpiryError> {
    ExpiryTable::default().parse(text)
}

fn parse_value(value: &str, line: &str, layouts: &[DateLayout]) -> Option<DateTime<Utc>> {
    let value = value.trim();
    // Whole value first, then with trailing commentary cut off.
    let first_token = value.split_whitespace().next().unwrap_or_default();
    let mut candidates = vec![value, first_token];

    // Fall back to a bare date token anywhere on the line.
    if let Some(token) = date_token().find(line) {
        candidates.push(token.as_str());
    }

    candidates
        .into_iter()
        .filter(|candidate| !candidate.is_empty())
        .find_map(|candidate| layouts.iter().find_map(|layout| layout.parse(candidate)))
}

fn date_token() -> &'static Regex {
    static DATE_TOKEN: OnceLock<Regex> = OnceLock::new();
    DATE_TOKEN.get_or_init(|| {
        Regex::new(
            r"[0-9]{4}[-./][0-9]{2}[-./][0-9]{2}([T ][0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]+)?(Z|[+-][0-9]{2}:?[0-9]{2})?)?",
        )
        .expect("date token pattern should be valid")
    })
}

/// Find the authoritative server named in an IANA answer.
fn find_referral(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let line = line.trim();
        let lowered = line.to_lowercase();
        if !(lowered.starts_with("refer:") || lowered.starts_with("whois:")) {
            return None;
        }
        line.split_once(':')
            .map(|(_, server)| server.trim().to_string())
            .filter(|server| !server.is_empty())
    })
}

/// WHOIS client with a configurable server table.
#[derive(Debug, Clone)]
pub struct WhoisClient {
    servers: HashMap<String, String>,
    fallback: String,
    port: u16,
    timeout: Duration,
    table: ExpiryTable,
}

impl WhoisClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            servers: TLD_SERVERS
                .iter()
                .map(|(tld, server)| (tld.to_string(), server.to_string()))
                .collect(),
            fallback: IANA_WHOIS.to_string(),
            port: WHOIS_PORT,
            timeout,
            table: ExpiryTable::default(),
        }
    }

    /// Route `tld` to `server`, replacing any existing entry.
    pub fn with_server(mut self, tld: &str, server: impl Into<String>) -> Self {
        self.servers.insert(tld.to_lowercase(), server.into());
        self
    }

    /// Referral server used for TLDs missing from the table.
    pub fn with_fallback(mut self, server: impl Into<String>) -> Self {
        self.fallback = server.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_table(mut self, table: ExpiryTable) -> Self {
        self.table = table;
        self
    }

    /// Server responsible for `domain`, or `None` if it has no TLD.
    pub fn server_for(&self, domain: &str) -> Option<&str> {
        let (_, tld) = domain.rsplit_once('.')?;
        if tld.is_empty() {
            return None;
        }
        Some(
            self.servers
                .get(&tld.to_lowercase())
                .map(String::as_str)
                .unwrap_or(self.fallback.as_str()),
        )
    }

    /// Look up the registration expiry of `domain`.
    pub async fn fetch_expiry(&self, domain: &str) -> Result<DateTime<Utc>, ExpiryError> {
        let domain = domain.trim().trim_end_matches('.').to_lowercase();
        let server = self
            .server_for(&domain)
            .ok_or_else(|| ExpiryError::InvalidHost { host: domain.clone() })?
            .to_string();

        let answer = self.query(&server, &domain).await?;

        let mut referral_error = None;
        if server == self.fallback {
            if let Some(referral) = find_referral(&answer) {
                tracing::debug!("WHOIS referral for {}: {}", domain, referral);
                match self.query(&referral, &domain).await {
                    Ok(text) => match self.table.parse(&text) {
                        Ok(expiry) => return Ok(expiry),
                        Err(err) => referral_error = Some(err),
                    },
                    Err(err) => {
                        tracing::warn!("WHOIS referral {} failed for {}: {}", referral, domain, err);
                        referral_error = Some(err);
                    }
                }
            }
        }

        self.table
            .parse(&answer)
            .map_err(|err| referral_error.unwrap_or(err))
    }

    /// Send one query and return the full answer.
    pub async fn query(&self, server: &str, domain: &str) -> Result<String, ExpiryError> {
        let peer = format!("{}:{}", server, self.port);

        let exchange = async {
            let mut stream = TcpStream::connect((server, self.port))
                .await
                .map_err(|err| ExpiryError::transport(&peer, err))?;

            stream
                .write_all(format!("{}\r\n", domain).as_bytes())
                .await
                .map_err(|err| ExpiryError::transport(&peer, err))?;

            let mut raw = Vec::new();
            stream
                .read_to_end(&mut raw)
                .await
                .map_err(|err| ExpiryError::transport(&peer, err))?;

            Ok::<_, ExpiryError>(String::from_utf8_lossy(&raw).into_owned())
        };

        time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ExpiryError::timeout(&peer, self.timeout))?
    }
}

/// Look up `domain` with the default server table.
pub async fn fetch_domain_expiry(
    domain: &str,
    timeout: Duration,
) -> Result<DateTime<Utc>, ExpiryError> {
    WhoisClient::new(timeout).fetch_expiry(domain).await
}
