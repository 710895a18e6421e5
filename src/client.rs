// Client side of the command service wire protocol

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use crate::messages::{ErrorBody, MoveResponse, SteeringDecision};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Command service did not answer within {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service refused the command as invalid (4xx)
    #[error("Command rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The service accepted the command but could not drive the motors (5xx)
    #[error("Actuation failed ({status}): {message}")]
    Actuation { status: u16, message: String },
}

impl TransportError {
    /// Whether sending again later may succeed. Rejected commands will be
    /// rejected again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Rejected { .. })
    }
}

/// Where the perception loop sends its decisions
pub trait CommandLink {
    /// Send one decision and wait for the outcome
    fn send(
        &mut self,
        decision: SteeringDecision,
    ) -> impl Future<Output = Result<MoveResponse, TransportError>> + Send;

    /// Unconditional stop, used on every exit path
    fn halt(&mut self) -> impl Future<Output = Result<MoveResponse, TransportError>> + Send;
}

/// `CommandLink` over HTTP with a per-request timeout
#[derive(Debug, Clone)]
pub struct HttpCommandLink {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpCommandLink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(
        &self,
        path: &str,
        body: Option<&SteeringDecision>,
    ) -> Result<MoveResponse, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if status.is_success() {
            let body = response.json::<MoveResponse>().await.map_err(|e| self.classify(e))?;
            debug!("{} -> {}", path, body.message);
            return Ok(body);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        Err(error_for_status(status, message))
    }

    fn classify(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Http(e)
        }
    }
}

fn error_for_status(status: StatusCode, message: String) -> TransportError {
    if status.is_client_error() {
        TransportError::Rejected {
            status: status.as_u16(),
            message,
        }
    } else {
        TransportError::Actuation {
            status: status.as_u16(),
            message,
        }
    }
}

impl CommandLink for HttpCommandLink {
    async fn send(&mut self, decision: SteeringDecision) -> Result<MoveResponse, TransportError> {
        self.post("/move", Some(&decision)).await
    }

    async fn halt(&mut self) -> Result<MoveResponse, TransportError> {
        self.post("/stop", None).await
    }
}
