// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hostname detection for object keys.

use std::env;
use std::io;

use tracing::warn;

/// Returns the host name used as object key suffix.
///
/// 1. `HOSTNAME` environment variable, when non-empty
/// 2. system hostname via `gethostname(2)`
///
/// Unlike most lookups in the agent there is no `"unknown"` fallback: keys of
/// different hosts must not collide, so failing here stops writer setup.
pub fn get_hostname() -> io::Result<String> {
    hostname_from(env::var("HOSTNAME").ok())
}

fn hostname_from(env_value: Option<String>) -> io::Result<String> {
    if let Some(hostname) = env_value.filter(|h| !h.is_empty()) {
        return Ok(hostname);
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => match hostname.into_string() {
            Ok(hostname) if !hostname.is_empty() => Ok(hostname),
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "system hostname is empty",
            )),
            Err(raw) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("system hostname is not valid UTF-8: {raw:?}"),
            )),
        },
        Err(e) => {
            warn!("Failed to get system hostname: {e}");
            Err(io::Error::from(e))
        }
    }
}
