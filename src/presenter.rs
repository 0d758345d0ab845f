// =============================================================================
// presenter.rs - ANNOUNCING THE WINNER
// =============================================================================
//
// One race, one log line. The winning record is surfaced exactly as its
// backend shaped it: ViaCEP keeps its Portuguese field names and its tax
// codes, BrasilAPI keeps its `service`. No merging, no normalizing.
//
// Dispatch is a match on the tagged record, so adding a third backend
// without teaching the presenter about it is a compile error, not a
// silently missing log line.
// =============================================================================

use tracing::{error, info};

use crate::error::RaceError;
use crate::models::{AddressRecord, RaceWinner};

/// Process exit statuses, one per kind of ending.
pub const EXIT_FOUND: u8 = 0;
pub const EXIT_FAILED: u8 = 1;
pub const EXIT_TIMED_OUT: u8 = 2;
pub const EXIT_STARTUP: u8 = 3;

/// Log the result of a race as a single structured event.
pub fn present(result: &Result<RaceWinner, RaceError>) {
    match result {
        Ok(winner) => present_winner(winner),
        Err(err) => present_error(err),
    }
}

pub fn present_winner(winner: &RaceWinner) {
    let elapsed_ms = u64::try_from(winner.elapsed.as_millis()).unwrap_or(u64::MAX);
    let summary = render(&winner.record);

    match &winner.record {
        AddressRecord::ViaCep(data) => {
            info!(
                race_id = %winner.race_id,
                backend = %winner.backend(),
                postal_code = %winner.postal_code,
                started_at = %winner.started_at.to_rfc3339(),
                elapsed_ms = elapsed_ms,
                address = %summary,
                data = %serde_json::to_string(data).unwrap_or_default(),
                "ViaCEP response"
            );
        }
        AddressRecord::BrasilApi(data) => {
            info!(
                race_id = %winner.race_id,
                backend = %winner.backend(),
                postal_code = %winner.postal_code,
                started_at = %winner.started_at.to_rfc3339(),
                elapsed_ms = elapsed_ms,
                address = %summary,
                data = %serde_json::to_string(data).unwrap_or_default(),
                "BrasilAPI response"
            );
        }
    }
}

pub fn present_error(err: &RaceError) {
    match err {
        RaceError::Timeout { .. } => error!(error = %err, "request timed out"),
        _ => error!(error = %err, "request failed"),
    }
}

/// A human-readable one-liner built from whatever fields the backend gave
/// us. Empty and missing fields are skipped.
pub fn render(record: &AddressRecord) -> String {
    let (parts, source) = match record {
        AddressRecord::ViaCep(a) => (
            vec![
                a.logradouro.as_deref(),
                a.complemento.as_deref(),
                a.bairro.as_deref(),
                a.localidade.as_deref(),
                a.uf.as_deref(),
                a.cep.as_deref(),
            ],
            None,
        ),
        AddressRecord::BrasilApi(a) => (
            vec![
                a.street.as_deref(),
                a.neighborhood.as_deref(),
                a.city.as_deref(),
                a.state.as_deref(),
                a.cep.as_deref(),
            ],
            a.service.as_deref(),
        ),
    };

    let mut line = parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .collect::<Vec<_>>()
        .join(", ");

    if let Some(service) = source.filter(|s| !s.is_empty()) {
        line.push_str(&format!(" (via {service})"));
    }
    line
}

/// Exit status for a finished race.
pub fn exit_code(result: &Result<RaceWinner, RaceError>) -> u8 {
    match result {
        Ok(_) => EXIT_FOUND,
        Err(RaceError::Timeout { .. }) => EXIT_TIMED_OUT,
        Err(_) => EXIT_FAILED,
    }
}
