use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ApiResult};

/// Shared http client with a per-call deadline.
///
/// The deadline covers the whole exchange, body included. Requests may also
/// be aborted early through a [`CancellationToken`].
#[derive(Clone, Debug)]
pub struct Transport {
    http: reqwest::Client,
    timeout: Duration,
}

impl Transport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(timeout: Duration) -> ApiResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, timeout })
    }

    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send with the default deadline.
    pub async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        fetch_with_timeout(request, self.timeout, None).await
    }
}

/// Send `request`, failing with [`ApiError::Timeout`] once `timeout` has
/// elapsed, or with [`ApiError::Cancelled`] as soon as `cancel` fires.
pub async fn fetch_with_timeout(
    request: RequestBuilder,
    timeout: Duration,
    cancel: Option<&CancellationToken>,
) -> ApiResult<Response> {
    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        res = tokio::time::timeout(timeout, request.timeout(timeout).send()) => match res {
            Ok(response) => Ok(response?),
            Err(_) => Err(ApiError::Timeout(timeout)),
        },
        () = cancelled => Err(ApiError::Cancelled),
    }
}
