//! HTTP transport for revocation data with bounded retries

use super::RevocationBudget;
use crate::error::CertificateValidationError;
use reqwest::{Client, RequestBuilder};
use std::future::Future;
use tracing::debug;

/// HTTP client bound to one validator call's network budget
#[derive(Debug, Clone)]
pub struct RevocationTransport {
    client: Client,
    budget: RevocationBudget,
}

impl RevocationTransport {
    /// Build a client whose connect and read timeouts follow `budget`.
    ///
    /// # Errors
    ///
    /// Returns `CertificateValidationError::Client` if the HTTP client cannot be created.
    pub fn new(budget: RevocationBudget) -> Result<Self, CertificateValidationError> {
        let client = Client::builder()
            .connect_timeout(budget.connect_timeout)
            .timeout(budget.connection_request_timeout.saturating_add(budget.socket_timeout))
            .build()
            .map_err(|e| CertificateValidationError::Client(e.to_string()))?;

        Ok(Self { client, budget })
    }

    pub fn budget(&self) -> &RevocationBudget {
        &self.budget
    }

    /// Run one validator call under the budget's overall deadline.
    ///
    /// Attempts against several endpoints share this deadline, so a call never outlasts
    /// `retry_count` attempt timeouts.
    ///
    /// # Errors
    ///
    /// Returns the call's own error, or `CertificateValidationError::Timeout` naming `target`
    /// once the deadline passes.
    pub async fn within_call_budget<T, F>(&self, target: &str, call: F) -> Result<T, CertificateValidationError>
    where
        F: Future<Output = Result<T, CertificateValidationError>>,
    {
        let deadline = self.budget.worst_case();
        tokio::time::timeout(deadline, call).await.unwrap_or_else(|_| {
            Err(CertificateValidationError::Timeout {
                url: target.to_string(),
                timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            })
        })
    }

    /// GET `url`, returning the response body.
    pub async fn get(&self, url: &str) -> Result<Vec<u8>, CertificateValidationError> {
        self.send_with_retries(url, |client| client.get(url)).await
    }

    /// POST `body` to `url` with the given content type, returning the response body.
    pub async fn post(
        &self,
        url: &str,
        content_type: &'static str,
        body: &[u8],
    ) -> Result<Vec<u8>, CertificateValidationError> {
        self.send_with_retries(url, |client| {
            client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body.to_vec())
        })
        .await
    }

    /// Make up to `retry_count` attempts, each under the per-attempt deadline.
    async fn send_with_retries<F>(
        &self,
        url: &str,
        build: F,
    ) -> Result<Vec<u8>, CertificateValidationError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let deadline = self.budget.attempt_timeout();
        let mut last_error = None;

        for attempt in 1..=self.budget.retry_count {
            let outcome = tokio::time::timeout(deadline, Self::attempt(url, build(&self.client))).await;
            let error = match outcome {
                Ok(Ok(body)) => return Ok(body),
                Ok(Err(e)) => e,
                Err(_) => CertificateValidationError::Timeout {
                    url: url.to_string(),
                    timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                },
            };
            debug!(url, attempt, error = %error, "Revocation endpoint attempt failed");
            last_error = Some(error);
        }

        Err(last_error.unwrap_or(CertificateValidationError::NoAttempts))
    }

    async fn attempt(url: &str, request: RequestBuilder) -> Result<Vec<u8>, CertificateValidationError> {
        let response = request.send().await.map_err(|e| CertificateValidationError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CertificateValidationError::Transport {
                url: url.to_string(),
                reason: format!("HTTP status {}", status),
            });
        }

        let body = response.bytes().await.map_err(|e| CertificateValidationError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ca.crl")
            .with_status(200)
            .with_body(vec![1u8, 2, 3])
            .create_async()
            .await;

        let transport = RevocationTransport::new(RevocationBudget::new(2, 1000, 1000, 1000)).unwrap();
        let body = transport.get(&format!("{}/ca.crl", server.url())).await.unwrap();
        assert_eq!(body, vec![1, 2, 3]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_retries_up_to_retry_count() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ocsp")
            .match_header("content-type", "application/ocsp-request")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let transport = RevocationTransport::new(RevocationBudget::new(3, 1000, 1000, 1000)).unwrap();
        let err = transport
            .post(&format!("{}/ocsp", server.url()), "application/ocsp-request", &[0x30, 0x00])
            .await
            .unwrap_err();
        assert!(matches!(err, CertificateValidationError::Transport { reason, .. } if reason.contains("500")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_zero_retries_makes_no_attempt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/ca.crl").expect(0).create_async().await;

        let transport = RevocationTransport::new(RevocationBudget::new(0, 1000, 1000, 1000)).unwrap();
        let err = transport.get(&format!("{}/ca.crl", server.url())).await.unwrap_err();
        assert!(matches!(err, CertificateValidationError::NoAttempts));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_call_budget_cuts_off_a_slow_call() {
        let transport = RevocationTransport::new(RevocationBudget::new(2, 20, 20, 10)).unwrap();
        let err = transport
            .within_call_budget("CRL distribution points", std::future::pending::<Result<(), CertificateValidationError>>())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CertificateValidationError::Timeout { ref url, timeout_ms: 100 } if url == "CRL distribution points"
        ));
    }

    #[tokio::test]
    async fn test_call_budget_passes_through_results() {
        let transport = RevocationTransport::new(RevocationBudget::new(0, 1000, 1000, 1000)).unwrap();
        let err = transport
            .within_call_budget("OCSP responders", transport.get("http://127.0.0.1:9/ca.crl"))
            .await
            .unwrap_err();
        assert!(matches!(err, CertificateValidationError::NoAttempts));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_transport_error() {
        let transport = RevocationTransport::new(RevocationBudget::new(1, 200, 200, 200)).unwrap();
        let err = transport.get("http://127.0.0.1:9/ca.crl").await.unwrap_err();
        assert!(matches!(
            err,
            CertificateValidationError::Transport { .. } | CertificateValidationError::Timeout { .. }
        ));
    }
}
