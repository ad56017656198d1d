//! Postfix policy-delegation request parsing.
//!
//! A request is a block of `key=value` lines terminated by a blank line.
//! Only the attributes named by the greylist triple (plus `client_name` and
//! the `request` kind) are extracted; everything else is ignored.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

/// The only request kind this daemon answers.
pub const POLICY_REQUEST_KIND: &str = "smtpd_access_policy";

/// Attributes as extracted from the protocol stream, before validation.
#[derive(Debug, Default)]
pub struct RawRequest {
    pub kind: Option<String>,
    pub client_address: Option<String>,
    pub client_name: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
}

/// A validated request, owned by a single evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRequest {
    pub client_address: String,
    pub client_name: String,
    pub sender: String,
    pub recipient: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("missing request attribute {0}")]
pub struct IncompleteRequest(pub &'static str);

/// Reads one request block from the stream. Returns `None` on EOF before
/// any line. Malformed lines (no `=`) are skipped; once an unsupported
/// request kind is seen the remaining attributes are ignored but the block
/// is still consumed up to its terminating blank line.
pub async fn read_request<R>(reader: &mut R) -> std::io::Result<Option<RawRequest>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = RawRequest::default();
    let mut saw_line = false;
    let mut ignore_rest = false;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(if saw_line { Some(raw) } else { None });
        }

        let attr = line.trim_end_matches(&['\r', '\n'][..]);
        if attr.is_empty() {
            return Ok(Some(raw));
        }
        saw_line = true;

        if ignore_rest {
            continue;
        }

        let Some((key, value)) = attr.split_once('=') else {
            debug!(line = attr, "malformed request attribute, skipping");
            continue;
        };
        let value = value.trim();

        match key {
            "request" => {
                raw.kind = Some(value.to_owned());
                if value != POLICY_REQUEST_KIND {
                    ignore_rest = true;
                }
            }
            "client_address" => raw.client_address = Some(value.to_owned()),
            "client_name" => raw.client_name = Some(value.to_owned()),
            "sender" => raw.sender = Some(value.to_owned()),
            "recipient" => raw.recipient = Some(value.to_owned()),
            _ => {}
        }
    }
}

impl RawRequest {
    /// `request` attributes other than `smtpd_access_policy` are not ours to
    /// answer; an absent kind is accepted for compatibility.
    pub fn is_supported(&self) -> bool {
        self.kind
            .as_deref()
            .map_or(true, |kind| kind == POLICY_REQUEST_KIND)
    }

    /// Validates that the full triple plus client name is present and stamps
    /// the request with the current time. No syntactic validation is done;
    /// values reach the store verbatim.
    pub fn normalize(self) -> Result<PolicyRequest, IncompleteRequest> {
        fn require(
            field: Option<String>,
            name: &'static str,
        ) -> Result<String, IncompleteRequest> {
            field
                .filter(|value| !value.is_empty())
                .ok_or(IncompleteRequest(name))
        }

        Ok(PolicyRequest {
            client_address: require(self.client_address, "client_address")?,
            client_name: require(self.client_name, "client_name")?,
            sender: require(self.sender, "sender")?,
            recipient: require(self.recipient, "recipient")?,
            timestamp: Utc::now(),
        })
    }
}
