//! Blocking HTTP client for the edge API.

use rebar_core::wire::{ImageResponse, LatestResponse, StatusResponse};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::config::EdgeTimeouts;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("edge answered {status} for {url}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Status code and raw body of a forwarded request, passed back to the caller
/// untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Forwarded {
    pub status: u16,
    pub body: String,
}

impl Forwarded {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Operations the relay performs against the edge.
pub trait EdgeClient: Send + Sync {
    fn status(&self) -> Result<StatusResponse, RelayError>;

    fn latest(&self) -> Result<LatestResponse, RelayError>;

    fn latest_image(&self) -> Result<ImageResponse, RelayError>;

    fn trigger_capture(&self) -> Result<Forwarded, RelayError>;

    fn get_config(&self) -> Result<Forwarded, RelayError>;

    fn set_config(&self, body: &serde_json::Value) -> Result<Forwarded, RelayError>;
}

pub struct HttpEdgeClient {
    http: Client,
    base: String,
    timeouts: EdgeTimeouts,
}

impl HttpEdgeClient {
    /// `base` is the edge API root without a trailing slash.
    pub fn new(base: impl Into<String>, timeouts: EdgeTimeouts) -> Result<Self, RelayError> {
        let http = Client::builder().build().map_err(RelayError::Client)?;
        Ok(Self {
            http,
            base: base.into(),
            timeouts,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, RelayError> {
        debug!("edge request {url}");
        request.send().map_err(|source| RelayError::Http {
            url: url.to_string(),
            source,
        })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        timeout: std::time::Duration,
    ) -> Result<T, RelayError> {
        let url = self.url(path);
        let response = self.send(&url, self.http.get(&url).timeout(timeout))?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(RelayError::Status {
                url,
                status,
                body: response.text().unwrap_or_default(),
            });
        }
        response
            .json::<T>()
            .map_err(|err| RelayError::Decode {
                url,
                message: err.to_string(),
            })
    }

    fn forward(&self, url: &str, request: RequestBuilder) -> Result<Forwarded, RelayError> {
        let response = self.send(url, request)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|source| RelayError::Http {
            url: url.to_string(),
            source,
        })?;
        Ok(Forwarded { status, body })
    }
}

impl EdgeClient for HttpEdgeClient {
    fn status(&self) -> Result<StatusResponse, RelayError> {
        self.get_json("status", self.timeouts.status)
    }

    fn latest(&self) -> Result<LatestResponse, RelayError> {
        self.get_json("latest", self.timeouts.data)
    }

    fn latest_image(&self) -> Result<ImageResponse, RelayError> {
        self.get_json("latest_image", self.timeouts.data)
    }

    fn trigger_capture(&self) -> Result<Forwarded, RelayError> {
        let url = self.url("capture");
        let request = self.http.post(&url).timeout(self.timeouts.capture);
        self.forward(&url, request)
    }

    fn get_config(&self) -> Result<Forwarded, RelayError> {
        let url = self.url("config");
        let request = self.http.get(&url).timeout(self.timeouts.data);
        self.forward(&url, request)
    }

    fn set_config(&self, body: &serde_json::Value) -> Result<Forwarded, RelayError> {
        let url = self.url("config");
        let request = self.http.post(&url).json(body).timeout(self.timeouts.data);
        self.forward(&url, request)
    }
}
