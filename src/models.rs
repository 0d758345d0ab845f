// =============================================================================
// models.rs - THE SHAPES OF AN ADDRESS
// =============================================================================
//
// Two services, two opinions about what an address looks like. ViaCEP speaks
// Portuguese field names and throws in tax codes nobody asked for. BrasilAPI
// keeps it short and tells you which upstream it borrowed the answer from.
//
// We do not reconcile them. Each record is surfaced exactly as its backend
// shaped it, wrapped in a tagged enum so the presenter can match on it
// exhaustively instead of guessing at runtime.
// =============================================================================

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FetchError;

/// The query: a postal code, forwarded verbatim to every backend.
///
/// No validation happens here. A malformed code is the backend's problem,
/// and it will tell us so with a status code or a body we can't decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PostalCode(String);

impl PostalCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which backend produced a record or a failure.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub enum Backend {
    /// viacep.com.br, the long-running favourite.
    ViaCep,
    /// brasilapi.com.br, an aggregator that itself asks several upstreams.
    BrasilApi,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::ViaCep, Backend::BrasilApi];
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::ViaCep => write!(f, "ViaCEP"),
            Backend::BrasilApi => write!(f, "BrasilAPI"),
        }
    }
}

/// ViaCEP's answer, field names and all.
///
/// Every field is optional: ViaCEP omits what it doesn't know, and for
/// unknown postal codes it returns nothing but `{"erro": true}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViaCepAddress {
    pub cep: Option<String>,
    pub logradouro: Option<String>,
    pub complemento: Option<String>,
    pub unidade: Option<String>,
    pub bairro: Option<String>,
    pub localidade: Option<String>,
    pub uf: Option<String>,
    pub estado: Option<String>,
    pub regiao: Option<String>,
    pub ibge: Option<String>,
    pub gia: Option<String>,
    pub ddd: Option<String>,
    pub siafi: Option<String>,
}

/// BrasilAPI's answer. Shorter, English, and honest about its sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrasilApiAddress {
    pub cep: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub street: Option<String>,
    /// The upstream service BrasilAPI actually got the answer from.
    pub service: Option<String>,
}

/// A decoded address, tagged by the backend that shaped it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "backend", content = "address")]
pub enum AddressRecord {
    ViaCep(ViaCepAddress),
    BrasilApi(BrasilApiAddress),
}

impl AddressRecord {
    pub fn backend(&self) -> Backend {
        match self {
            AddressRecord::ViaCep(_) => Backend::ViaCep,
            AddressRecord::BrasilApi(_) => Backend::BrasilApi,
        }
    }
}

impl From<ViaCepAddress> for AddressRecord {
    fn from(address: ViaCepAddress) -> Self {
        AddressRecord::ViaCep(address)
    }
}

impl From<BrasilApiAddress> for AddressRecord {
    fn from(address: BrasilApiAddress) -> Self {
        AddressRecord::BrasilApi(address)
    }
}

/// What a single fetcher reports back. Exactly one per invocation, always.
#[derive(Debug)]
pub struct Outcome {
    pub backend: Backend,
    pub result: Result<AddressRecord, FetchError>,
}

impl Outcome {
    pub fn success(record: AddressRecord) -> Self {
        Self {
            backend: record.backend(),
            result: Ok(record),
        }
    }

    pub fn failure(backend: Backend, cause: FetchError) -> Self {
        Self {
            backend,
            result: Err(cause),
        }
    }
}

/// The race result handed to the presenter when a backend came through.
#[derive(Debug, Clone, Serialize)]
pub struct RaceWinner {
    /// Unique per race, so two runs never get confused in the logs.
    pub race_id: Uuid,
    pub postal_code: PostalCode,
    pub record: AddressRecord,
    pub started_at: DateTime<Utc>,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

impl RaceWinner {
    pub fn backend(&self) -> Backend {
        self.record.backend()
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }
}
