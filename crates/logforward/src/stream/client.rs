// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CloudWatch Logs client speaking the JSON 1.1 protocol.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants;
use crate::errors::{FlushError, SetupError};
use crate::event::LogEvent;
use crate::http;
use crate::sigv4::{self, Credentials};

use super::token::{ALREADY_ACCEPTED_CODE, CONFLICT_CODE};
use super::{AppendOutcome, LogStreamApi, RejectedEvents, StreamInfo};

const CONTENT_TYPE_JSON: &str = "application/x-amz-json-1.1";
const TARGET_PREFIX: &str = "Logs_20140328";
const SERVICE: &str = "logs";

#[derive(Debug, Clone)]
pub struct CloudWatchLogsClient {
    http: reqwest::Client,
    url: Url,
    region: String,
    credentials: Option<Credentials>,
}

impl CloudWatchLogsClient {
    /// Creates a client for `region`. `endpoint` overrides the regional
    /// endpoint, e.g. to reach a local emulator.
    pub fn new(
        region: &str,
        endpoint: Option<&str>,
        credentials: Option<Credentials>,
    ) -> Result<Self, SetupError> {
        let endpoint = endpoint.map_or_else(
            || format!("https://logs.{region}.amazonaws.com"),
            str::to_string,
        );
        Ok(CloudWatchLogsClient {
            http: http::build_client(constants::HTTP_TIMEOUT)?,
            url: http::parse_endpoint(&endpoint)?,
            region: region.to_string(),
            credentials,
        })
    }

    async fn call<Req, Resp>(&self, action: &str, request: &Req) -> Result<Resp, FlushError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request)
            .map_err(|e| FlushError::Transport(format!("failed to encode {action}: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        headers.insert(
            HeaderName::from_static("x-amz-target"),
            HeaderValue::from_str(&format!("{TARGET_PREFIX}.{action}"))
                .map_err(|e| FlushError::Transport(e.to_string()))?,
        );
        if let Some(credentials) = &self.credentials {
            sigv4::sign(
                &Method::POST,
                &self.url,
                &mut headers,
                &body,
                &self.region,
                SERVICE,
                credentials,
                Utc::now(),
            )
            .map_err(|e| FlushError::Transport(format!("failed to sign {action}: {e}")))?;
        }

        let response = self
            .http
            .post(self.url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| FlushError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = http::error_body(response).await;
            return Err(api_error(status.as_u16(), &text));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FlushError::Transport(e.to_string()))?;
        let bytes: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
        serde_json::from_slice(bytes)
            .map_err(|e| FlushError::Transport(format!("invalid {action} response: {e}")))
    }
}

#[async_trait]
impl LogStreamApi for CloudWatchLogsClient {
    async fn list_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<StreamInfo>, FlushError> {
        let mut streams = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let request = DescribeLogStreamsRequest {
                log_group_name: group,
                log_stream_name_prefix: prefix,
                next_token: next_token.as_deref(),
            };
            let page: DescribeLogStreamsResponse =
                self.call("DescribeLogStreams", &request).await?;
            streams.extend(page.log_streams.into_iter().map(|s| StreamInfo {
                name: s.log_stream_name,
                upload_sequence_token: s.upload_sequence_token,
            }));

            match page.next_token {
                Some(token) if next_token.as_deref() != Some(token.as_str()) => {
                    next_token = Some(token);
                }
                _ => break,
            }
        }
        debug!("described {} log streams in {group}", streams.len());
        Ok(streams)
    }

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), FlushError> {
        let request = CreateLogStreamRequest {
            log_group_name: group,
            log_stream_name: stream,
        };
        let _: IgnoredAny = self.call("CreateLogStream", &request).await?;
        Ok(())
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEvent],
        token: Option<&str>,
    ) -> Result<AppendOutcome, FlushError> {
        let request = PutLogEventsRequest {
            log_group_name: group,
            log_stream_name: stream,
            log_events: events
                .iter()
                .map(|e| InputLogEvent {
                    timestamp: e.timestamp(),
                    message: String::from_utf8_lossy(e.message()),
                })
                .collect(),
            sequence_token: token,
        };
        let response: PutLogEventsResponse = self.call("PutLogEvents", &request).await?;

        Ok(AppendOutcome {
            next_token: response.next_sequence_token,
            rejected: response
                .rejected_log_events_info
                .map(|info| RejectedEvents {
                    too_new_start_index: info.too_new_log_event_start_index,
                    too_old_end_index: info.too_old_log_event_end_index,
                    expired_end_index: info.expired_log_event_end_index,
                }),
        })
    }
}

/// Maps an error answer to a [`FlushError`]. Token conflicts and already
/// accepted batches keep the `"<code>: <message>"` text the next token is
/// parsed from.
fn api_error(status: u16, body: &str) -> FlushError {
    let parsed: ErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let code = parsed
        .kind
        .as_deref()
        .map(|kind| kind.rsplit('#').next().unwrap_or(kind).to_string())
        .unwrap_or_else(|| format!("HTTP{status}"));
    let message = parsed
        .message
        .or(parsed.message_upper)
        .unwrap_or_else(|| body.to_string());

    match code.as_str() {
        CONFLICT_CODE => FlushError::TokenConflict(format!("{code}: {message}")),
        ALREADY_ACCEPTED_CODE => FlushError::AlreadyAccepted(format!("{code}: {message}")),
        _ => FlushError::Api {
            status,
            code,
            message,
        },
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name_prefix: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct DescribeLogStreamsResponse {
    log_streams: Vec<LogStreamEntry>,
    next_token: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct LogStreamEntry {
    log_stream_name: String,
    upload_sequence_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogStreamRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: Vec<InputLogEvent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a str>,
}

#[derive(Serialize)]
struct InputLogEvent<'a> {
    timestamp: i64,
    message: Cow<'a, str>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PutLogEventsResponse {
    next_sequence_token: Option<String>,
    rejected_log_events_info: Option<RejectedLogEventsInfo>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RejectedLogEventsInfo {
    too_new_log_event_start_index: Option<usize>,
    too_old_log_event_end_index: Option<usize>,
    expired_log_event_end_index: Option<usize>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ErrorResponse {
    #[serde(rename = "__type")]
    kind: Option<String>,
    message: Option<String>,
    #[serde(rename = "Message")]
    message_upper: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_conflict_error() {
        let body = r#"{"__type":"com.amazonaws.logs#InvalidSequenceTokenException","expectedSequenceToken":"4963","message":"The given sequenceToken is invalid. The next expected sequenceToken is: 4963"}"#;
        let err = api_error(400, body);
        assert!(matches!(err, FlushError::TokenConflict(_)));
        assert_eq!(
            err.to_string(),
            "InvalidSequenceTokenException: The given sequenceToken is invalid. The next expected sequenceToken is: 4963"
        );
        assert_eq!(err.expected_token().as_deref(), Some("4963"));
    }

    #[test]
    fn test_already_accepted_error() {
        let body = r#"{"__type":"com.amazonaws.logs#DataAlreadyAcceptedException","expectedSequenceToken":"4970","message":"The given batch of log events has already been accepted. The next batch can be sent with sequenceToken: 4970"}"#;
        let err = api_error(400, body);
        assert!(matches!(err, FlushError::AlreadyAccepted(_)));
        assert_eq!(err.expected_token().as_deref(), Some("4970"));
    }

    #[test]
    fn test_other_api_error() {
        let body = r#"{"__type":"ResourceNotFoundException","message":"The specified log group does not exist."}"#;
        assert_eq!(
            api_error(400, body),
            FlushError::Api {
                status: 400,
                code: "ResourceNotFoundException".to_string(),
                message: "The specified log group does not exist.".to_string(),
            }
        );
    }

    #[test]
    fn test_unparseable_error_body() {
        let err = api_error(503, "Service Unavailable");
        assert_eq!(
            err.to_string(),
            "HTTP503: Service Unavailable".to_string()
        );
        assert_eq!(err.expected_token(), None);
    }

    #[test]
    fn test_put_request_shape() {
        let events = [LogEvent::with_timestamp("hello", 1_000)];
        let request = PutLogEventsRequest {
            log_group_name: "g",
            log_stream_name: "s",
            log_events: events
                .iter()
                .map(|e| InputLogEvent {
                    timestamp: e.timestamp(),
                    message: String::from_utf8_lossy(e.message()),
                })
                .collect(),
            sequence_token: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "logGroupName": "g",
                "logStreamName": "s",
                "logEvents": [{"timestamp": 1000, "message": "hello"}],
            })
        );
    }

    #[test]
    fn test_default_endpoint() {
        let client = CloudWatchLogsClient::new("eu-west-1", None, None).unwrap();
        assert_eq!(client.url.as_str(), "https://logs.eu-west-1.amazonaws.com/");
    }
}
