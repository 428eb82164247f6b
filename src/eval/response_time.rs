//! `responseTime(url)`: wall-clock seconds until an HTTP GET returns headers

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;

use super::functions::{expect_arity, string_arg, CallContext, ExtensionFunction, FunctionError};
use super::value::Value;

/// Request timeout used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Measures how long `url` takes to answer a GET request.
///
/// The request is bounded by `timeout` and aborted when the invocation is
/// cancelled. The body is never read.
#[derive(Debug, Clone)]
pub struct ResponseTime {
    client: reqwest::Client,
    timeout: Duration,
}

impl ResponseTime {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ExtensionFunction for ResponseTime {
    async fn call(&self, args: Vec<Value>, ctx: &CallContext) -> Result<Value, FunctionError> {
        expect_arity(&args, 1)?;
        let url = string_arg(&args, 0)?.to_string();

        let start = Instant::now();
        let request = self.client.get(&url).timeout(self.timeout).send();

        let response = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => return Err(FunctionError::Cancelled),
            response = request => response,
        };

        match response {
            Ok(response) => {
                let elapsed = start.elapsed();
                debug!(url = %url, status = %response.status(), ?elapsed, "Measured response time");
                Ok(Value::Number(elapsed.as_secs_f64()))
            }
            Err(err) if err.is_timeout() => Err(FunctionError::Timeout {
                url,
                timeout: self.timeout,
            }),
            Err(err) => Err(FunctionError::Request {
                url,
                reason: err.to_string(),
            }),
        }
    }
}
