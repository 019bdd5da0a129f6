// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! AWS Signature Version 4 request signing.

use std::collections::BTreeMap;
use std::env;
use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use reqwest::{Method, Url};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Credentials {
    #[must_use]
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Credentials {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN`. Returns `None` unless both keys are set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let non_empty = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());
        Some(Credentials {
            access_key_id: non_empty("AWS_ACCESS_KEY_ID")?,
            secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY")?,
            session_token: non_empty("AWS_SESSION_TOKEN"),
        })
    }
}

/// Signs a request in place: adds `host`, `x-amz-date`, the payload hash for
/// S3, the session token when present, and finally `authorization`.
#[allow(clippy::too_many_arguments)]
pub fn sign(
    method: &Method,
    url: &Url,
    headers: &mut HeaderMap,
    payload: &[u8],
    region: &str,
    service: &str,
    credentials: &Credentials,
    time: DateTime<Utc>,
) -> Result<(), InvalidHeaderValue> {
    let amz_date = time.format("%Y%m%dT%H%M%SZ").to_string();
    let date = time.format("%Y%m%d").to_string();
    let payload_hash = hex::encode(Sha256::digest(payload));

    headers.insert(reqwest::header::HOST, HeaderValue::from_str(&host(url))?);
    headers.insert(
        HeaderName::from_static("x-amz-date"),
        HeaderValue::from_str(&amz_date)?,
    );
    if service == "s3" {
        headers.insert(
            HeaderName::from_static("x-amz-content-sha256"),
            HeaderValue::from_str(&payload_hash)?,
        );
    }
    if let Some(token) = &credentials.session_token {
        headers.insert(
            HeaderName::from_static("x-amz-security-token"),
            HeaderValue::from_str(token)?,
        );
    }

    let (canonical, signed_headers) = canonical_request(method, url, headers, &payload_hash);
    let scope = format!("{date}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical.as_bytes()))
    );
    let key = signing_key(&credentials.secret_access_key, &date, region, service);
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id
    );
    headers.insert(
        reqwest::header::AUTHORIZATION,
        HeaderValue::from_str(&authorization)?,
    );
    Ok(())
}

fn host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Builds the canonical request and the `;`-joined list of signed headers.
fn canonical_request(
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    payload_hash: &str,
) -> (String, String) {
    let mut signed: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.as_str();
        if name == "host" || name == "content-type" || name.starts_with("x-amz-") {
            let value = value.to_str().unwrap_or_default().trim();
            signed.entry(name).or_default().push(value);
        }
    }
    let canonical_headers: String = signed
        .iter()
        .map(|(name, values)| format!("{name}:{}\n", values.join(",")))
        .collect();
    let signed_headers = signed.keys().copied().collect::<Vec<_>>().join(";");

    let mut query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k, true), uri_encode(&v, true)))
        .collect();
    query.sort();
    let canonical_query = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let path = if url.path().is_empty() { "/" } else { url.path() };
    let canonical = format!(
        "{}\n{path}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
        method.as_str()
    );
    (canonical, signed_headers)
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

#[allow(clippy::expect_used)]
fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encodes everything but the unreserved characters. Slashes are kept
/// unless `encode_slash` is set, which is how object keys are written in paths.
#[must_use]
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn example_credentials() -> Credentials {
        Credentials::new("AKIDEXAMPLE", SECRET, None)
    }

    #[test]
    fn test_signing_key_derivation() {
        let key = signing_key(SECRET, "20120215", "us-east-1", "iam");
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_get_vanilla() {
        let url = Url::parse("https://example.amazonaws.com/").unwrap();
        let mut headers = HeaderMap::new();
        let time = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();

        sign(
            &Method::GET,
            &url,
            &mut headers,
            b"",
            "us-east-1",
            "service",
            &example_credentials(),
            time,
        )
        .unwrap();

        assert_eq!(headers["x-amz-date"], "20150830T123600Z");
        assert_eq!(
            headers["authorization"],
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
             SignedHeaders=host;x-amz-date, \
             Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
    }

    #[test]
    fn test_canonical_request_layout() {
        let url = Url::parse("http://127.0.0.1:9000/bucket/a%20b.log?b=2&a=1").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("127.0.0.1:9000"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.insert("x-amz-acl", HeaderValue::from_static(" private "));
        headers.insert("content-encoding", HeaderValue::from_static("gzip"));

        let (canonical, signed) = canonical_request(&Method::PUT, &url, &headers, "HASH");
        assert_eq!(signed, "content-type;host;x-amz-acl");
        assert_eq!(
            canonical,
            "PUT\n/bucket/a%20b.log\na=1&b=2\n\
             content-type:text/plain\nhost:127.0.0.1:9000\nx-amz-acl:private\n\n\
             content-type;host;x-amz-acl\nHASH"
        );
    }

    #[test]
    fn test_s3_and_session_headers() {
        let url = Url::parse("https://bucket.s3.us-west-2.amazonaws.com/logs/x.log").unwrap();
        let mut headers = HeaderMap::new();
        let credentials = Credentials::new("AK", "SK", Some("session".to_string()));
        sign(
            &Method::PUT,
            &url,
            &mut headers,
            b"payload",
            "us-west-2",
            "s3",
            &credentials,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(
            headers["x-amz-content-sha256"],
            hex::encode(Sha256::digest(b"payload")).as_str()
        );
        assert_eq!(headers["x-amz-security-token"], "session");
        let authorization = headers["authorization"].to_str().unwrap();
        assert!(authorization.contains(
            "SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token,"
        ));
        assert!(authorization.contains("/us-west-2/s3/aws4_request"));
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("logs/2024 01/a+b.log", false), "logs/2024%2001/a%2Bb.log");
        assert_eq!(uri_encode("a/b", true), "a%2Fb");
        assert_eq!(uri_encode("é~", false), "%C3%A9~");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let credentials = Credentials::new("AK", "very-secret", Some("tok".to_string()));
        let debug = format!("{credentials:?}");
        assert!(debug.contains("AK"));
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("tok\""));
    }
}
