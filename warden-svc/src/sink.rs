//! HTTP remote sink: one POST per delivery attempt.
//!
//! Runs on the delivery worker's blocking thread, so the blocking reqwest
//! client is the right shape — the worker owns the call end to end and no
//! cross-runtime bridging is needed.

use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use warden_core::{RemoteSink, Result, ResultEvent, WardenError};

pub struct HttpSink {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpSink {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

impl RemoteSink for HttpSink {
    fn post(&self, payload: &ResultEvent) -> Result<u16> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .map_err(|e| WardenError::RemoteSink(e.to_string()))?;
        let status = response.status().as_u16();
        debug!(endpoint = %self.endpoint, status, "sink POST completed");
        Ok(status)
    }
}
