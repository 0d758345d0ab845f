// =============================================================================
// error.rs - EVERY WAY A RACE CAN GO WRONG
// =============================================================================
//
// Fetchers never panic and never go quiet. Whatever goes wrong inside one
// becomes a FetchError and gets sent down the channel like any other result.
// The coordinator adds exactly one failure mode of its own: running out of
// time.
// =============================================================================

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::models::Backend;

/// Why a fetcher was told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The shared deadline fired before this fetcher finished.
    DeadlineExceeded,
    /// Someone else already won. Unwind and release the connection.
    RaceDecided,
    /// The coordinator disappeared without saying goodbye.
    CoordinatorGone,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
            CancelReason::RaceDecided => write!(f, "race already decided"),
            CancelReason::CoordinatorGone => write!(f, "coordinator dropped"),
        }
    }
}

/// Everything that can go wrong inside a single fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The endpoint template plus the query did not make a valid URL.
    #[error("failed to build request: {0}")]
    RequestConstruction(#[from] url::ParseError),

    /// Connection refused, TLS trouble, reqwest's own timeout, a body that
    /// stopped halfway. The network had a bad day.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The request was abandoned mid-flight. Still a transport error, just
    /// one we caused ourselves.
    #[error("transport error: request cancelled ({0})")]
    Cancelled(CancelReason),

    /// Anything other than 200.
    #[error("{backend} returned status {code}")]
    BadStatus { backend: Backend, code: u16 },

    /// The body wasn't the shape this backend promised.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// Cancellation counts as transport trouble.
    pub fn is_transport(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::Cancelled(_))
    }
}

/// The terminal failures a race can end in.
#[derive(Debug, Error)]
pub enum RaceError {
    /// The first fetcher to report had bad news, and under the
    /// first-completed policy bad news still wins.
    #[error("{backend} lookup failed: {source}")]
    Fetch {
        backend: Backend,
        #[source]
        source: FetchError,
    },

    /// Every fetcher reported and none succeeded (first-success policy).
    #[error("every backend failed: {}", summarize(.0))]
    AllFailed(Vec<(Backend, FetchError)>),

    /// The deadline fired before any result we were willing to accept.
    #[error("lookup timed out after {}ms", .deadline.as_millis())]
    Timeout { deadline: Duration },

    /// The outcome channel closed before anyone reported.
    #[error("every fetcher exited without reporting")]
    NoOutcome,

    /// Nothing to race.
    #[error("no fetchers configured")]
    NoFetchers,
}

fn summarize(failures: &[(Backend, FetchError)]) -> String {
    failures
        .iter()
        .map(|(backend, cause)| format!("{backend}: {cause}"))
        .collect::<Vec<_>>()
        .join("; ")
}
