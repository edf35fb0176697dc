//! Session token commands: minting and live elevation.
//!
//! Minting is an offline operation against the shared secret file; it never
//! touches the daemon. Elevation presents a minted token on a live session
//! and shows the tier change taking effect.

use std::path::Path;

use anyhow::{Context, Result};
use secrecy::SecretString;

use procwarden_core::TrustTier;
use procwarden_core::token::{self, unix_now};
use procwarden_daemon::protocol::messages::FailureCode;

use crate::client::{BrokerClient, ClientError};

use super::{ensure_success, status_label, tier_label};

/// Mint a token granting `tier` for `ttl_secs` seconds.
///
/// The token is printed alone on stdout so it can be piped straight into
/// `procwarden elevate`.
pub fn mint(
    secret_file: Option<&Path>,
    secret_env: Option<&str>,
    tier: TrustTier,
    ttl_secs: u64,
) -> Result<()> {
    let secret = load_signing_secret(secret_file, secret_env)?;
    let expires_at = unix_now().saturating_add(ttl_secs);

    let minted = token::mint(&secret, tier, expires_at).context("failed to mint session token")?;
    println!("{minted}");
    Ok(())
}

fn load_signing_secret(
    secret_file: Option<&Path>,
    secret_env: Option<&str>,
) -> Result<SecretString> {
    if let Some(path) = secret_file {
        return token::load_secret(path)
            .with_context(|| format!("failed to load token secret from {}", path.display()));
    }
    if let Some(var) = secret_env {
        let value = std::env::var(var)
            .with_context(|| format!("environment variable {var} is not set"))?;
        // Strength is checked by the minting call itself.
        return Ok(SecretString::from(value));
    }
    anyhow::bail!("either --secret-file or --secret-env is required");
}

/// Tier-elevation smoke flow.
///
/// Probes a medium-tier operation, presents the token, and probes again, so
/// the transcript shows the elevation taking effect on this very session.
pub fn elevate(socket_path: &Path, token_hex: &str) -> Result<()> {
    // Catch paste accidents before the broker sees them.
    hex::decode(token_hex).context("token is not valid hex")?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        let mut client = BrokerClient::connect(socket_path)
            .await
            .context("failed to connect to broker")?;

        let before = probe_medium(&mut client).await?;
        println!("medium-tier probe before: {before}");

        let reply = client
            .assign_session_token(token_hex.to_string())
            .await
            .context("failed to present session token")?;
        ensure_success("assign session token", reply.status)?;
        println!(
            "session tier now {}, token valid until unix {}",
            tier_label(reply.tier),
            reply.expires_at
        );

        let after = probe_medium(&mut client).await?;
        println!("medium-tier probe after:  {after}");
        Ok(())
    })
}

/// Issues a medium-tier request that cannot change anything: enumerating
/// descriptors through broker handle 0, which no session ever holds.
async fn probe_medium(client: &mut BrokerClient) -> Result<String> {
    match client.enumerate_process_handles(0).await {
        Ok(reply) => Ok(format!("dispatched ({})", status_label(reply.status))),
        Err(ClientError::Refused {
            code: FailureCode::AccessDenied,
            ..
        }) => Ok("refused (access denied)".to_string()),
        Err(err) => Err(err).context("medium-tier probe failed"),
    }
}
