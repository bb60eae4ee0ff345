//! Bounded fetch of remote image attachments.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;

use crate::error::{HearthError, Result};

/// Fetch `url`, returning its MIME type and body.
///
/// The whole transfer is bounded by `timeout` and the body by `max_bytes`.
/// Cancelling `cancel` abandons the transfer at the next suspension point.
pub async fn fetch_image(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    max_bytes: usize,
    cancel: &CancellationToken,
) -> Result<(String, Vec<u8>)> {
    let transfer = async {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| HearthError::Fetch(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HearthError::Fetch(format!("{url} returned {status}")));
        }
        if let Some(length) = response.content_length() {
            if length > max_bytes as u64 {
                return Err(HearthError::Fetch(format!(
                    "{url} is {length} bytes, limit is {max_bytes}"
                )));
            }
        }

        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "application/octet-stream".to_owned());

        let mut body = Vec::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk =
                chunk.map_err(|e| HearthError::Fetch(format!("reading {url} failed: {e}")))?;
            if body.len() + chunk.len() > max_bytes {
                return Err(HearthError::Fetch(format!(
                    "{url} exceeds the {max_bytes} byte limit"
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok((mime, body))
    };

    tokio::select! {
        () = cancel.cancelled() => Err(HearthError::cancelled("remote attachment fetch cancelled")),
        bounded = tokio::time::timeout(timeout, transfer) => match bounded {
            Ok(result) => result,
            Err(_) => Err(HearthError::Timeout(format!(
                "fetching {url} took longer than {}s",
                timeout.as_secs_f32()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn returns_body_and_mime() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cat.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png; charset=binary")
                    .set_body_bytes(vec![1u8, 2, 3]),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let (mime, body) = fetch_image(
            &client,
            &format!("{}/cat.png", server.uri()),
            Duration::from_secs(5),
            1024,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(body, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let err = fetch_image(
            &reqwest::Client::new(),
            &server.uri(),
            Duration::from_secs(5),
            16,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HearthError::Fetch(_)));
    }

    #[tokio::test]
    async fn http_error_status_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetch_image(
            &reqwest::Client::new(),
            &server.uri(),
            Duration::from_secs(5),
            1024,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.message().contains("404"));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let err = fetch_image(
            &reqwest::Client::new(),
            &server.uri(),
            Duration::from_millis(100),
            1024,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HearthError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancellation_wins_over_transfer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetch_image(
            &reqwest::Client::new(),
            &server.uri(),
            Duration::from_secs(10),
            1024,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
