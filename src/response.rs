//! Maps an engine outcome to the two observables: the protocol action line
//! and an audit log line. Nothing here touches the store.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::engine::Outcome;
use crate::request::PolicyRequest;

/// Permissive action: let the rest of the restriction chain decide.
pub const RESPOND_QUEUE: &str = "DUNNO";
/// Deferral action, honored only if the message would otherwise be permitted.
pub const RESPOND_DEFER: &str = "DEFER_IF_PERMIT";
pub const DEFAULT_DEFER_MSG: &str = "Service temporarily unavailable.";

pub fn permissive_line() -> String {
    format!("action={RESPOND_QUEUE}")
}

/// `Okay` and `Error` permit (fail open); `New` and `Cooling` defer with the
/// configured message or the built-in default.
pub fn action_line(outcome: Outcome, defer_message: Option<&str>) -> String {
    match outcome {
        Outcome::Okay | Outcome::Error => permissive_line(),
        Outcome::New | Outcome::Cooling => format!(
            "action={RESPOND_DEFER} {}",
            defer_message.unwrap_or(DEFAULT_DEFER_MSG)
        ),
    }
}

/// One audit line per decision, carrying the outcome and the triple.
pub fn log_decision(outcome: Outcome, request: &PolicyRequest) {
    let client = &request.client_address;
    let from = &request.sender;
    let to = &request.recipient;
    match outcome {
        Outcome::Okay => {
            info!(%client, %from, %to, "greylist: action={RESPOND_QUEUE}");
        }
        Outcome::Cooling => {
            info!(%client, %from, %to, "greylist: action={RESPOND_DEFER}, cooling");
        }
        Outcome::New => {
            info!(%client, %from, %to, "greylist: action={RESPOND_DEFER}, new");
        }
        Outcome::Error => {
            info!(%client, %from, %to, "greylist: action={RESPOND_QUEUE}, internal error");
        }
    }
}

/// Writes the action line and the terminating blank line.
pub async fn write_response<W>(writer: &mut W, action: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(action.as_bytes()).await?;
    writer.write_all(b"\n\n").await?;
    writer.flush().await
}
