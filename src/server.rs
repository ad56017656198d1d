//! Wires the pipeline together over a pair of async streams: request
//! reader -> normalizer -> exemptions -> decision engine -> reporter.
//!
//! Each request block is one independent evaluation; nothing is carried
//! across iterations. Requests that never reach the engine (unsupported
//! kind, incomplete attributes, exempt client) are answered with the
//! permissive action.

use std::net::IpAddr;

use ipnet::IpNet;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{info, warn};

use crate::engine;
use crate::request::{self, PolicyRequest};
use crate::response;
use crate::settings::Settings;
use crate::store::GreylistStore;

pub async fn serve<R, W, S>(
    reader: R,
    mut writer: W,
    store: &S,
    settings: &Settings,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    S: GreylistStore + ?Sized,
{
    let mut reader = BufReader::new(reader);
    let exempt_networks = settings.get_allow_from_networks();
    let cooldown_seconds = settings.get_cooldown_seconds();
    let defer_message = settings.get_defer_message();

    while let Some(raw) = request::read_request(&mut reader).await? {
        if !raw.is_supported() {
            warn!(
                kind = raw.kind.as_deref().unwrap_or(""),
                "unsupported request kind, allowing"
            );
            response::write_response(&mut writer, &response::permissive_line()).await?;
            continue;
        }

        let policy_request = match raw.normalize() {
            Ok(policy_request) => policy_request,
            Err(e) => {
                warn!("skipping lookup, received incomplete request criteria: {e}");
                response::write_response(&mut writer, &response::permissive_line()).await?;
                continue;
            }
        };

        if let Some(network) = exempt_network(&exempt_networks, &policy_request) {
            info!(
                client = %policy_request.client_address,
                %network,
                "client exempt from greylisting"
            );
            response::write_response(&mut writer, &response::permissive_line()).await?;
            continue;
        }

        let outcome = engine::evaluate(store, &policy_request, cooldown_seconds).await;
        response::log_decision(outcome, &policy_request);
        response::write_response(&mut writer, &response::action_line(outcome, defer_message))
            .await?;
    }

    Ok(())
}

/// An unparseable client address is simply not exempt; it still greylists
/// on byte equality like any other string.
fn exempt_network(networks: &[IpNet], request: &PolicyRequest) -> Option<IpNet> {
    let ip: IpAddr = request.client_address.parse().ok()?;
    networks.iter().find(|network| network.contains(&ip)).copied()
}
