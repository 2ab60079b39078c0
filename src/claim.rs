//! One-time provider claim performed before the session loop starts.
//!
//! The backend binds the local peer id to the operator account that issued
//! the token. Anything but HTTP 200 is a fatal startup condition.

use reqwest::StatusCode;
use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::config::ClaimConfig;
use crate::protocol::single_line;
use crate::{AppError, Result};

/// Longest slice of a rejection body carried into the error.
const MAX_BODY_PREVIEW: usize = 256;

/// JSON body of the claim request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest<'a> {
    /// One-time provider token.
    pub token: &'a str,
    /// Local peer identifier being claimed.
    pub peer_id: &'a str,
}

/// Claim `peer_id` with `token` at the configured backend.
///
/// # Errors
///
/// Returns `AppError::Claim` if the request cannot be sent or the backend
/// answers with any status other than 200.
pub async fn claim_peer_id(config: &ClaimConfig, token: &str, peer_id: &str) -> Result<()> {
    let url = config.claim_url();
    let span = info_span!("claim", url = %url, peer_id);

    async {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| AppError::Claim(format!("failed to build http client: {err}")))?;

        let response = client
            .post(&url)
            .json(&ClaimRequest { token, peer_id })
            .send()
            .await
            .map_err(|err| AppError::Claim(format!("HTTP POST failed: {err}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let preview: String = single_line(&body).chars().take(MAX_BODY_PREVIEW).collect();
            return Err(AppError::Claim(format!(
                "server returned HTTP {}: {preview}",
                status.as_u16()
            )));
        }

        info!("peer id claimed");
        Ok(())
    }
    .instrument(span)
    .await
}
