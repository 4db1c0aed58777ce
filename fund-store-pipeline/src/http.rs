//! HTTP client whose requests go through a [`RetryExecutor`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::errors::RetryExhausted;
use crate::executor::{ExecuteOptions, RetryExecutor};

/// Some sources refuse requests without a browser user agent.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.2; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/56.0.2924.87 Safari/537.36";

/// Errors from a single HTTP attempt.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Result of a request that went through the executor.
pub type HttpResult<T> = Result<T, RetryExhausted<HttpError>>;

/// HTTP client with a browser user agent, a per-request timeout and
/// bounded retries.
///
/// Every request is one executor task: a status of 400 or above, a
/// transport error or an undecodable body fails the attempt.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    executor: Arc<RetryExecutor>,
}

impl HttpClient {
    pub fn new(executor: Arc<RetryExecutor>, timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, executor })
    }

    pub fn executor(&self) -> &Arc<RetryExecutor> {
        &self.executor
    }

    /// GET `url` and return the body as text.
    pub async fn get_text(&self, url: &str) -> HttpResult<String> {
        self.request(Method::GET, url, |builder| builder, |response| async move {
            Ok(response.text().await?)
        })
        .await
    }

    /// GET `url` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> HttpResult<T> {
        self.request(Method::GET, url, |builder| builder, |response| decode_json(response))
            .await
    }

    /// POST `body` as JSON to `url` and decode the JSON answer.
    ///
    /// A retried POST is sent again in full.
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> HttpResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(
            Method::POST,
            url,
            |builder| builder.json(body),
            |response| decode_json(response),
        )
        .await
    }

    async fn request<T, P, D, Fut>(
        &self,
        method: Method,
        url: &str,
        prepare: P,
        decode: D,
    ) -> HttpResult<T>
    where
        P: Fn(RequestBuilder) -> RequestBuilder,
        D: Fn(reqwest::Response) -> Fut,
        Fut: std::future::Future<Output = Result<T, HttpError>>,
    {
        let description = format!("{method} request to {url}");
        let result = self
            .executor
            .execute(ExecuteOptions::new(description), || async {
                let response = prepare(self.client.request(method.clone(), url)).send().await?;
                let status = response.status();
                if status.as_u16() >= 400 {
                    return Err(HttpError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                decode(response).await
            })
            .await;

        if result.is_ok() {
            debug!(method = %method, url = url, "Request succeeded");
        }
        result
    }
}

async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, HttpError> {
    let url = response.url().to_string();
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| HttpError::Decode {
        url,
        message: e.to_string(),
    })
}
