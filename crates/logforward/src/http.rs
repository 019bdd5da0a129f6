// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client shared by the remote adapters.

use core::time::Duration;

use reqwest::Url;

use crate::errors::SetupError;

/// Builds the client used for one remote.
///
/// Proxies come from the standard `HTTPS_PROXY`/`NO_PROXY` variables, which
/// reqwest reads on its own.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, SetupError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        // detect dead connections to the remote
        .tcp_keepalive(Some(Duration::from_secs(120)))
        .build()
        .map_err(|e| SetupError::HttpClient(e.to_string()))
}

/// Parses a base endpoint, dropping any trailing slash.
pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Url, SetupError> {
    let url = Url::parse(endpoint.trim_end_matches('/')).map_err(|e| SetupError::Endpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    if url.host_str().is_none() {
        return Err(SetupError::Endpoint {
            endpoint: endpoint.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

/// Reads a response body for an error message without failing.
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"))
}
