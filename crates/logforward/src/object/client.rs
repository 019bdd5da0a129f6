// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! S3 REST client for the two calls the object sink needs.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Method, Url};
use tracing::debug;

use crate::constants;
use crate::errors::{SetupError, UploadError};
use crate::http;
use crate::sigv4::{self, uri_encode, Credentials};

use super::ObjectStoreApi;

const SERVICE: &str = "s3";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3ClientConfig {
    pub region: String,
    pub bucket: String,
    /// Custom endpoint. Objects are then addressed path-style,
    /// `{endpoint}/{bucket}/{key}`.
    pub endpoint: Option<String>,
    pub public_read: bool,
    pub reduced_redundancy: bool,
}

#[derive(Debug, Clone)]
pub struct S3Client {
    http: reqwest::Client,
    base: Url,
    path_style: bool,
    bucket: String,
    region: String,
    credentials: Option<Credentials>,
    public_read: bool,
    reduced_redundancy: bool,
}

impl S3Client {
    pub fn new(
        config: S3ClientConfig,
        credentials: Option<Credentials>,
    ) -> Result<Self, SetupError> {
        let (endpoint, path_style) = match &config.endpoint {
            Some(endpoint) => (endpoint.clone(), true),
            None => (
                format!("https://{}.s3.{}.amazonaws.com", config.bucket, config.region),
                false,
            ),
        };
        Ok(S3Client {
            http: http::build_client(constants::HTTP_TIMEOUT)?,
            base: http::parse_endpoint(&endpoint)?,
            path_style,
            bucket: config.bucket,
            region: config.region,
            credentials,
            public_read: config.public_read,
            reduced_redundancy: config.reduced_redundancy,
        })
    }

    fn object_url(&self, key: &str) -> Result<Url, UploadError> {
        let base = self.base.as_str().trim_end_matches('/');
        let url = if self.path_style {
            format!(
                "{base}/{}/{}",
                uri_encode(&self.bucket, true),
                uri_encode(key, false)
            )
        } else {
            format!("{base}/{}", uri_encode(key, false))
        };
        Url::parse(&url)
            .map_err(|e| UploadError::Transport(format!("invalid object url {url}: {e}")))
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, UploadError> {
        let url = self.object_url(key)?;
        if let Some(credentials) = &self.credentials {
            sigv4::sign(
                &method,
                &url,
                &mut headers,
                &body,
                &self.region,
                SERVICE,
                credentials,
                Utc::now(),
            )
            .map_err(|e| UploadError::Transport(format!("failed to sign request: {e}")))?;
        }

        let response = self
            .http
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = http::error_body(response).await;
            let message = if message.is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                message
            };
            Err(UploadError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl ObjectStoreApi for S3Client {
    async fn put_object(&self, key: &str, body: Bytes) -> Result<(), UploadError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(
            HeaderName::from_static("x-amz-acl"),
            HeaderValue::from_static(if self.public_read {
                "public-read"
            } else {
                "private"
            }),
        );
        if self.reduced_redundancy {
            headers.insert(
                HeaderName::from_static("x-amz-storage-class"),
                HeaderValue::from_static("REDUCED_REDUNDANCY"),
            );
        }

        let response = self.send(Method::PUT, key, headers, body).await?;
        if let Some(etag) = response.headers().get(reqwest::header::ETAG) {
            debug!("s3 etag {}", etag.to_str().unwrap_or_default());
        }
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<(), UploadError> {
        self.send(Method::HEAD, key, HeaderMap::new(), Bytes::new())
            .await
            .map(|_| ())
    }
}
