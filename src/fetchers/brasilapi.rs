// brasilapi.com.br: CEP v1. Unknown codes come back as a plain 404.

use super::{json_object, Fetcher};
use crate::models::{Backend, BrasilApiAddress};

pub const ENDPOINT_TEMPLATE: &str = "{base}/api/cep/v1/{code}";

pub const DEFAULT_BASE_URL: &str = "https://brasilapi.com.br";

pub fn fetcher(base_url: impl Into<String>) -> Fetcher<BrasilApiAddress> {
    Fetcher::new(Backend::BrasilApi, base_url, ENDPOINT_TEMPLATE, decode)
}

pub fn decode(body: &[u8]) -> Result<BrasilApiAddress, serde_json::Error> {
    serde_json::from_value(json_object(body)?)
}
