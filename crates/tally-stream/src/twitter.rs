//! Filtered status stream over HTTP.
//!
//! [`FilteredStream`] opens a long-lived `POST statuses/filter` request
//! tracking the configured options and reads newline-delimited JSON from
//! the response body:
//!
//! - blank lines are keep-alives;
//! - objects with `text` are statuses (the extended `full_text` wins when
//!   present);
//! - `disconnect` notices end the stream (reported as a transient
//!   disconnect so the consumer reconnects);
//! - `warning` notices (stall warnings) are logged;
//! - anything else, including malformed lines, is skipped.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tally_core::TrackedOptions;
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::oauth::{OAuthCredentials, encode};
use crate::source::EventSource;

/// Default filtered stream endpoint.
pub const FILTER_ENDPOINT: &str = "https://stream.twitter.com/1.1/statuses/filter.json";

/// Default time without any bytes before the stream counts as stalled.
///
/// The upstream sends a keep-alive roughly every 30 seconds.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(90);

/// Time allowed to open the TCP/TLS connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest partial line buffered while waiting for its newline.
const MAX_LINE_BYTES: usize = 1_048_576;

/// A single decoded line of the stream body.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StreamLine {
    /// A status text.
    Text(String),
    /// Blank keep-alive.
    KeepAlive,
    /// Upstream is closing the stream.
    Disconnect(String),
    /// Upstream warning (e.g. falling behind).
    Warning(String),
    /// Any other message type.
    Other,
    /// Not valid JSON.
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    text: Option<String>,
    extended_tweet: Option<ExtendedTweet>,
    disconnect: Option<DisconnectNotice>,
    warning: Option<WarningNotice>,
}

#[derive(Debug, Deserialize)]
struct ExtendedTweet {
    full_text: String,
}

#[derive(Debug, Deserialize)]
struct DisconnectNotice {
    code: Option<u32>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WarningNotice {
    code: Option<String>,
    message: Option<String>,
}

/// Decode one line of the stream body.
pub(crate) fn parse_line(line: &str) -> StreamLine {
    let line = line.trim();
    if line.is_empty() {
        return StreamLine::KeepAlive;
    }

    let message: RawMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => return StreamLine::Malformed(e.to_string()),
    };

    if let Some(notice) = message.disconnect {
        return StreamLine::Disconnect(format!(
            "code {}: {}",
            notice.code.unwrap_or_default(),
            notice.reason.unwrap_or_default()
        ));
    }
    if let Some(warning) = message.warning {
        return StreamLine::Warning(format!(
            "{}: {}",
            warning.code.unwrap_or_default(),
            warning.message.unwrap_or_default()
        ));
    }

    match (message.extended_tweet, message.text) {
        (Some(extended), _) => StreamLine::Text(extended.full_text),
        (None, Some(text)) => StreamLine::Text(text),
        (None, None) => StreamLine::Other,
    }
}

/// Whether a non-success status on connect is worth retrying.
fn is_retryable_status(status: StatusCode) -> bool {
    // 420 is the upstream's legacy "enhance your calm" rate limit
    status.as_u16() == 420 || status.as_u16() == 429 || status.is_server_error()
}

/// HTTP streaming client for the filtered status endpoint.
pub struct FilteredStream {
    client: reqwest::Client,
    credentials: OAuthCredentials,
    endpoint: String,
    track: String,
    stall_timeout: Duration,
    response: Option<reqwest::Response>,
    buffer: Vec<u8>,
}

impl FilteredStream {
    /// Create a client that tracks every option in `options`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Connect`] if the HTTP client cannot be built.
    pub fn new(
        credentials: OAuthCredentials,
        options: &TrackedOptions,
        stall_timeout: Duration,
    ) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| StreamError::Connect(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            credentials,
            endpoint: FILTER_ENDPOINT.to_owned(),
            track: options.iter().collect::<Vec<_>>().join(","),
            stall_timeout,
            response: None,
            buffer: Vec::new(),
        })
    }

    /// Point the client at a different endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// The comma-joined `track` parameter sent upstream.
    pub fn track(&self) -> &str {
        &self.track
    }

    fn form_params(&self) -> [(&str, &str); 2] {
        [("stall_warnings", "true"), ("track", self.track.as_str())]
    }

    fn form_body(&self) -> String {
        self.form_params()
            .iter()
            .map(|(key, value)| format!("{}={}", encode(key), encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Pop one complete line off the read buffer, if there is one.
    fn take_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl EventSource for FilteredStream {
    async fn connect(&mut self) -> Result<(), StreamError> {
        self.close();

        let params = self.form_params();
        let authorization = self
            .credentials
            .authorization_header("POST", &self.endpoint, &params)?;
        let body = self.form_body();

        info!(endpoint = %self.endpoint, track = %self.track, "opening filtered stream");
        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| StreamError::Connect(format!("request to {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        if status.is_success() {
            self.response = Some(response);
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_owned());
        if is_retryable_status(status) {
            Err(StreamError::Connect(format!("upstream returned {status}: {body}")))
        } else {
            Err(StreamError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn next_text(&mut self) -> Result<Option<String>, StreamError> {
        loop {
            while let Some(line) = self.take_line() {
                match parse_line(&line) {
                    StreamLine::Text(text) => return Ok(Some(text)),
                    StreamLine::KeepAlive => {}
                    StreamLine::Disconnect(reason) => {
                        self.close();
                        return Err(StreamError::Disconnected(format!(
                            "upstream disconnect notice ({reason})"
                        )));
                    }
                    StreamLine::Warning(message) => {
                        warn!(message = %message, "stream warning from upstream");
                    }
                    StreamLine::Other => debug!("skipping non-status stream message"),
                    StreamLine::Malformed(e) => warn!(error = %e, "skipping malformed stream line"),
                }
            }

            if self.buffer.len() > MAX_LINE_BYTES {
                self.close();
                return Err(StreamError::Disconnected(format!(
                    "stream line exceeds {MAX_LINE_BYTES} bytes"
                )));
            }

            let Some(response) = self.response.as_mut() else {
                return Err(StreamError::NotConnected);
            };

            let read = tokio::time::timeout(self.stall_timeout, response.chunk()).await;
            match read {
                Ok(Ok(Some(chunk))) => self.buffer.extend_from_slice(&chunk),
                Ok(Ok(None)) => {
                    self.close();
                    return Ok(None);
                }
                Ok(Err(e)) => {
                    self.close();
                    return Err(StreamError::Disconnected(e.to_string()));
                }
                Err(_) => {
                    self.close();
                    return Err(StreamError::Stalled {
                        timeout_secs: self.stall_timeout.as_secs(),
                    });
                }
            }
        }
    }

    fn close(&mut self) {
        if self.response.take().is_some() {
            debug!("filtered stream connection closed");
        }
        self.buffer.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn credentials() -> OAuthCredentials {
        OAuthCredentials {
            consumer_key: "ck".to_owned(),
            consumer_secret: "cs".to_owned(),
            access_token: "at".to_owned(),
            access_secret: "as".to_owned(),
        }
    }

    fn stream() -> FilteredStream {
        let options = TrackedOptions::new(["Messi", "Suarez"]).unwrap();
        FilteredStream::new(credentials(), &options, DEFAULT_STALL_TIMEOUT).unwrap()
    }

    #[test]
    fn parse_status_text() {
        assert_eq!(
            parse_line(r#"{"id":1,"text":"I love Messi"}"#),
            StreamLine::Text("I love Messi".to_owned())
        );
    }

    #[test]
    fn parse_prefers_extended_full_text() {
        let line = r#"{"text":"Suarez and…","extended_tweet":{"full_text":"Suarez and Messi both"}}"#;
        assert_eq!(
            parse_line(line),
            StreamLine::Text("Suarez and Messi both".to_owned())
        );
    }

    #[test]
    fn parse_keep_alive_and_crlf() {
        assert_eq!(parse_line("\r\n"), StreamLine::KeepAlive);
        assert_eq!(
            parse_line("{\"text\":\"hi\"}\r\n"),
            StreamLine::Text("hi".to_owned())
        );
    }

    #[test]
    fn parse_control_messages() {
        assert_eq!(
            parse_line(r#"{"disconnect":{"code":4,"stream_name":"x","reason":"duplicate stream"}}"#),
            StreamLine::Disconnect("code 4: duplicate stream".to_owned())
        );
        assert_eq!(
            parse_line(r#"{"warning":{"code":"FALLING_BEHIND","message":"queue full","percent_full":60}}"#),
            StreamLine::Warning("FALLING_BEHIND: queue full".to_owned())
        );
        assert_eq!(parse_line(r#"{"limit":{"track":12}}"#), StreamLine::Other);
        assert!(matches!(parse_line("{not json"), StreamLine::Malformed(_)));
    }

    #[test]
    fn track_and_form_body() {
        let stream = stream();
        assert_eq!(stream.track(), "Messi,Suarez");
        assert_eq!(stream.form_body(), "stall_warnings=true&track=Messi%2CSuarez");
    }

    #[test]
    fn take_line_splits_buffered_chunks() {
        let mut stream = stream();
        stream.buffer.extend_from_slice(b"{\"text\":\"a\"}\r\n\r\n{\"te");
        assert_eq!(stream.take_line().as_deref(), Some("{\"text\":\"a\"}\r\n"));
        assert_eq!(stream.take_line().as_deref(), Some("\r\n"));
        assert_eq!(stream.take_line(), None);

        stream.buffer.extend_from_slice(b"xt\":\"b\"}\n");
        assert_eq!(stream.take_line().as_deref(), Some("{\"text\":\"b\"}\n"));
    }

    #[tokio::test]
    async fn oversized_line_drops_the_connection() {
        let mut stream = stream();
        stream.buffer = vec![b'a'; MAX_LINE_BYTES];
        stream.buffer.push(b'a');

        let err = stream.next_text().await.unwrap_err();
        assert!(matches!(err, StreamError::Disconnected(_)));
        assert!(err.is_transient());
        assert!(stream.buffer.is_empty());
    }

    #[tokio::test]
    async fn reading_without_connection_is_transient_error() {
        let mut stream = stream();
        let err = stream.next_text().await.unwrap_err();
        assert!(matches!(err, StreamError::NotConnected));
        assert!(err.is_transient());
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::from_u16(420).unwrap()));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::NOT_ACCEPTABLE));
    }
}
