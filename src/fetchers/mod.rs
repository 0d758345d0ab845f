// =============================================================================
// fetchers/mod.rs - THE RUNNERS
// =============================================================================
//
// A fetcher makes exactly one GET against exactly one backend and reports
// exactly one Outcome. Success, failure, cancellation: whatever happens, the
// coordinator hears about it. A fetcher that goes silent would leave the
// coordinator staring at an empty channel until the deadline, and we don't
// do that to people.
//
// Both backends behave identically apart from three things: where they live
// (the endpoint template), what they answer (the record type) and how to
// read that answer (the decode function). So there is one Fetcher, generic
// over the record, and each backend module only fills in those three blanks.
// =============================================================================

pub mod brasilapi;
pub mod viacep;

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::de::Error as _;
use reqwest::{Client, StatusCode};
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::error::{CancelReason, FetchError};
use crate::models::{AddressRecord, Backend, Outcome, PostalCode};

/// Turns a response body into a backend-shaped record.
pub type Decoder<R> = fn(&[u8]) -> Result<R, serde_json::Error>;

/// The receiving half of the cancellation signal. `None` means keep going.
pub type CancelSignal = watch::Receiver<Option<CancelReason>>;

/// One backend lookup, parameterized by endpoint template, decoder and
/// record type.
///
/// The template holds two placeholders: `{base}` for the configured base URL
/// and `{code}` for the percent-encoded postal code.
pub struct Fetcher<R> {
    backend: Backend,
    base_url: String,
    endpoint_template: &'static str,
    decode: Decoder<R>,
}

impl<R> Fetcher<R>
where
    R: Into<AddressRecord> + Send + 'static,
{
    pub fn new(
        backend: Backend,
        base_url: impl Into<String>,
        endpoint_template: &'static str,
        decode: Decoder<R>,
    ) -> Self {
        Self {
            backend,
            base_url: base_url.into(),
            endpoint_template,
            decode,
        }
    }

    /// Interpolate the query into the template.
    pub fn endpoint(&self, query: &PostalCode) -> Result<Url, url::ParseError> {
        let raw = self
            .endpoint_template
            .replace("{base}", self.base_url.trim_end_matches('/'))
            .replace("{code}", &urlencoding::encode(query.as_str()));
        Url::parse(&raw)
    }

    /// The request itself. The response (and its connection) lives only
    /// inside this future, so dropping the future releases it on every path.
    async fn lookup(&self, client: &Client, query: &PostalCode) -> Result<AddressRecord, FetchError> {
        let url = self.endpoint(query)?;
        debug!(backend = %self.backend, url = %url, "sending lookup");

        let response = client.get(url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::BadStatus {
                backend: self.backend,
                code: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let record = (self.decode)(&body)?;
        Ok(record.into())
    }
}

/// What the coordinator sees: something with a name that can be raced.
///
/// Object safe so both fetchers can sit in one `Vec<Arc<dyn Lookup>>`
/// despite producing different record types.
pub trait Lookup: Send + Sync {
    fn backend(&self) -> Backend;

    /// Run the lookup until it finishes or the signal fires, whichever
    /// comes first. Always resolves to exactly one Outcome.
    fn fetch<'a>(
        &'a self,
        client: &'a Client,
        query: &'a PostalCode,
        cancel: CancelSignal,
    ) -> BoxFuture<'a, Outcome>;
}

impl<R> Lookup for Fetcher<R>
where
    R: Into<AddressRecord> + Send + 'static,
{
    fn backend(&self) -> Backend {
        self.backend
    }

    fn fetch<'a>(
        &'a self,
        client: &'a Client,
        query: &'a PostalCode,
        mut cancel: CancelSignal,
    ) -> BoxFuture<'a, Outcome> {
        async move {
            let result = tokio::select! {
                result = self.lookup(client, query) => result,
                reason = cancelled(&mut cancel) => Err(FetchError::Cancelled(reason)),
            };

            match result {
                Ok(record) => {
                    debug!(backend = %self.backend, "lookup succeeded");
                    Outcome::success(record)
                }
                Err(cause) => {
                    match &cause {
                        FetchError::Cancelled(reason) => {
                            debug!(backend = %self.backend, reason = %reason, "lookup cancelled");
                        }
                        other if other.is_transport() => {
                            warn!(backend = %self.backend, error = %other, "backend unreachable");
                        }
                        other => {
                            warn!(backend = %self.backend, error = %other, "lookup failed");
                        }
                    }
                    Outcome::failure(self.backend, cause)
                }
            }
        }
        .boxed()
    }
}

/// One fetcher per known backend, pointed wherever the config says.
pub fn from_config(config: &Config) -> Vec<Arc<dyn Lookup>> {
    Backend::ALL
        .iter()
        .map(|backend| -> Arc<dyn Lookup> {
            match backend {
                Backend::ViaCep => Arc::new(viacep::fetcher(config.viacep_base_url.clone())),
                Backend::BrasilApi => Arc::new(brasilapi::fetcher(config.brasilapi_base_url.clone())),
            }
        })
        .collect()
}

/// Parse a body that must be a single JSON object. Derived `Deserialize`
/// would happily fill a struct from an array by position.
pub fn json_object(body: &[u8]) -> Result<serde_json::Value, serde_json::Error> {
    match serde_json::from_slice(body)? {
        value @ serde_json::Value::Object(_) => Ok(value),
        _ => Err(serde_json::Error::custom("expected a JSON object")),
    }
}

/// Resolves once the coordinator asks us to stop. A dropped sender counts
/// as a request to stop.
pub async fn cancelled(signal: &mut CancelSignal) -> CancelReason {
    match signal.wait_for(Option::is_some).await {
        Ok(reason) => (*reason).unwrap_or(CancelReason::CoordinatorGone),
        Err(_) => CancelReason::CoordinatorGone,
    }
}
