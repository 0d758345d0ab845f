// =============================================================================
// race.rs - THE FINISH LINE
// =============================================================================
//
// The coordinator fires the starting pistol for every fetcher at once, then
// waits for exactly one of two things: an Outcome on the channel, or the
// deadline. Whichever comes first ends the race. There is no second lap.
//
//   Idle ──start──▶ Racing ──first signal──▶ Done(Success | Failure | Timeout)
//
// Under the default policy the first Outcome wins even when it's a failure.
// Latency over completeness: if ViaCEP says 404 in 30ms, we don't sit around
// hoping BrasilAPI knows better. Callers who'd rather wait for good news can
// pick `FirstSuccess`, which keeps draining the channel until a Success shows
// up or every fetcher has reported. Both policies share the same deadline.
//
// When the race is decided the losers are told to stop through the watch
// channel, so their in-flight requests are dropped instead of idling until
// reqwest's own timeout. The outcome channel holds one slot per fetcher, so
// a loser that finished just before the cancellation can still drop its
// result in without anyone reading it.
// =============================================================================

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Client;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CancelReason, RaceError};
use crate::fetchers::Lookup;
use crate::metrics::RaceMetrics;
use crate::models::{Outcome, PostalCode, RaceWinner};

/// How the coordinator decides who won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RacePolicy {
    /// The first Outcome ends the race, success or not.
    #[default]
    FirstCompleted,
    /// Keep listening until someone succeeds or everyone has failed.
    FirstSuccess,
}

impl fmt::Display for RacePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RacePolicy::FirstCompleted => write!(f, "first-completed"),
            RacePolicy::FirstSuccess => write!(f, "first-success"),
        }
    }
}

impl FromStr for RacePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first-completed" | "first_completed" | "completed" => Ok(RacePolicy::FirstCompleted),
            "first-success" | "first_success" | "success" => Ok(RacePolicy::FirstSuccess),
            other => Err(format!("unknown race policy '{other}'")),
        }
    }
}

/// Arbitrates the race between fetchers under one shared deadline.
pub struct Coordinator {
    client: Client,
    fetchers: Vec<Arc<dyn Lookup>>,
    policy: RacePolicy,
    metrics: Arc<RaceMetrics>,
}

impl Coordinator {
    pub fn new(
        client: Client,
        fetchers: Vec<Arc<dyn Lookup>>,
        policy: RacePolicy,
        metrics: Arc<RaceMetrics>,
    ) -> Self {
        Self {
            client,
            fetchers,
            policy,
            metrics,
        }
    }

    pub fn metrics(&self) -> &RaceMetrics {
        &self.metrics
    }

    /// Race every fetcher for `query`. Returns within `deadline` plus
    /// scheduling overhead, with exactly one terminal result.
    pub async fn race(&self, query: &PostalCode, deadline: Duration) -> Result<RaceWinner, RaceError> {
        if self.fetchers.is_empty() {
            return Err(RaceError::NoFetchers);
        }

        let race_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let runners = self.fetchers.len();
        self.metrics.increment_races();

        // The deadline starts with the query, not with the first fetcher.
        let expiry = tokio::time::sleep(deadline);
        tokio::pin!(expiry);

        let (cancel_tx, cancel_rx) = watch::channel(None);
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<Outcome>(runners);

        for fetcher in &self.fetchers {
            let fetcher = Arc::clone(fetcher);
            let client = self.client.clone();
            let query = query.clone();
            let cancel = cancel_rx.clone();
            let outcome_tx = outcome_tx.clone();
            tokio::spawn(async move {
                let outcome = fetcher.fetch(&client, &query, cancel).await;
                if outcome_tx.send(outcome).await.is_err() {
                    debug!(backend = %fetcher.backend(), "race already over, outcome discarded");
                }
            });
        }
        // Only the spawned tasks hold senders now, so `recv` returns None
        // once every one of them is gone.
        drop(outcome_tx);
        drop(cancel_rx);

        info!(
            race_id = %race_id,
            postal_code = %query,
            runners = runners,
            deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            policy = %self.policy,
            "race started"
        );

        let mut reported = 0usize;
        let mut failures = Vec::new();

        let verdict = loop {
            tokio::select! {
                biased;

                received = outcome_rx.recv() => {
                    let Some(outcome) = received else {
                        // Every sender dropped and some never reported.
                        // Only a panicking fetcher task gets us here.
                        if failures.is_empty() {
                            break Err(RaceError::NoOutcome);
                        }
                        break Err(RaceError::AllFailed(std::mem::take(&mut failures)));
                    };
                    reported += 1;

                    match outcome.result {
                        Ok(record) => break Ok(record),
                        Err(cause) => {
                            self.metrics.increment_failures(outcome.backend);
                            match self.policy {
                                RacePolicy::FirstCompleted => {
                                    break Err(RaceError::Fetch {
                                        backend: outcome.backend,
                                        source: cause,
                                    });
                                }
                                RacePolicy::FirstSuccess => {
                                    debug!(
                                        race_id = %race_id,
                                        backend = %outcome.backend,
                                        error = %cause,
                                        "runner failed, still waiting for the others"
                                    );
                                    failures.push((outcome.backend, cause));
                                    if reported == runners {
                                        break Err(RaceError::AllFailed(std::mem::take(&mut failures)));
                                    }
                                }
                            }
                        }
                    }
                }

                _ = &mut expiry => {
                    break Err(RaceError::Timeout { deadline });
                }
            }
        };

        let reason = match &verdict {
            Err(RaceError::Timeout { .. }) => CancelReason::DeadlineExceeded,
            _ => CancelReason::RaceDecided,
        };
        cancel_tx.send_replace(Some(reason));

        let abandoned = runners.saturating_sub(reported);
        self.metrics.add_abandoned(u64::try_from(abandoned).unwrap_or(u64::MAX));
        let elapsed = clock.elapsed();

        match verdict {
            Ok(record) => {
                let backend = record.backend();
                self.metrics.increment_wins(backend);
                info!(
                    race_id = %race_id,
                    winner = %backend,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    abandoned = abandoned,
                    "race decided"
                );
                Ok(RaceWinner {
                    race_id,
                    postal_code: query.clone(),
                    record,
                    started_at,
                    elapsed,
                })
            }
            Err(err) => {
                if matches!(err, RaceError::Timeout { .. }) {
                    self.metrics.increment_timeouts();
                    if !failures.is_empty() {
                        debug!(
                            race_id = %race_id,
                            failures = failures.len(),
                            "deadline fired after some runners had already failed"
                        );
                    }
                }
                warn!(
                    race_id = %race_id,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    abandoned = abandoned,
                    error = %err,
                    "race ended without an address"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetchers::{brasilapi, viacep};
    use crate::fetchers::CancelSignal;
    use crate::models::{AddressRecord, Backend};
    use futures::future::{BoxFuture, FutureExt};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VIACEP_BODY: &str = r#"{"cep":"01153-000","logradouro":"Rua X","bairro":"Barra Funda","localidade":"São Paulo","uf":"SP"}"#;
    const BRASILAPI_BODY: &str = r#"{"cep":"01153000","state":"SP","city":"São Paulo","neighborhood":"Barra Funda","street":"Rua X","service":"open-cep"}"#;

    struct Backends {
        viacep: MockServer,
        brasilapi: MockServer,
    }

    async fn backends(viacep: ResponseTemplate, brasilapi: ResponseTemplate) -> Backends {
        let viacep_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ws/01153000/json/"))
            .respond_with(viacep)
            .mount(&viacep_server)
            .await;

        let brasilapi_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/cep/v1/01153000"))
            .respond_with(brasilapi)
            .mount(&brasilapi_server)
            .await;

        Backends {
            viacep: viacep_server,
            brasilapi: brasilapi_server,
        }
    }

    fn coordinator(backends: &Backends, policy: RacePolicy) -> Coordinator {
        let fetchers: Vec<Arc<dyn Lookup>> = vec![
            Arc::new(viacep::fetcher(backends.viacep.uri())),
            Arc::new(brasilapi::fetcher(backends.brasilapi.uri())),
        ];
        Coordinator::new(Client::new(), fetchers, policy, Arc::new(RaceMetrics::new()))
    }

    fn ok(body: &str, delay_ms: u64) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_string(body)
            .set_delay(Duration::from_millis(delay_ms))
    }

    #[tokio::test]
    async fn test_faster_backend_wins() {
        let backends = backends(ok(VIACEP_BODY, 50), ok(BRASILAPI_BODY, 200)).await;
        let coordinator = coordinator(&backends, RacePolicy::FirstCompleted);

        let winner = coordinator
            .race(&PostalCode::new("01153000"), Duration::from_millis(1000))
            .await
            .unwrap();

        assert_eq!(winner.backend(), Backend::ViaCep);
        match &winner.record {
            AddressRecord::ViaCep(address) => assert_eq!(address.logradouro.as_deref(), Some("Rua X")),
            other => panic!("expected ViaCEP record, got {other:?}"),
        }
        assert_eq!(winner.postal_code.as_str(), "01153000");
        assert_eq!(coordinator.metrics().snapshot().viacep_wins, 1);
    }

    #[tokio::test]
    async fn test_other_order_other_winner() {
        let backends = backends(ok(VIACEP_BODY, 300), ok(BRASILAPI_BODY, 20)).await;
        let coordinator = coordinator(&backends, RacePolicy::FirstCompleted);

        let winner = coordinator
            .race(&PostalCode::new("01153000"), Duration::from_millis(1000))
            .await
            .unwrap();

        assert_eq!(winner.backend(), Backend::BrasilApi);
    }

    #[tokio::test]
    async fn test_deadline_beats_both_backends() {
        let backends = backends(ok(VIACEP_BODY, 500), ok(BRASILAPI_BODY, 500)).await;
        let coordinator = coordinator(&backends, RacePolicy::FirstCompleted);

        let started = Instant::now();
        let err = coordinator
            .race(&PostalCode::new("01153000"), Duration::from_millis(1))
            .await
            .unwrap_err();

        assert!(matches!(err, RaceError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(250));

        let snapshot = coordinator.metrics().snapshot();
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.losers_abandoned, 2);
    }

    #[tokio::test]
    async fn test_first_failure_still_wins_by_default() {
        let backends = backends(ResponseTemplate::new(404), ok(BRASILAPI_BODY, 150)).await;
        let coordinator = coordinator(&backends, RacePolicy::FirstCompleted);

        let err = coordinator
            .race(&PostalCode::new("01153000"), Duration::from_millis(1000))
            .await
            .unwrap_err();

        match err {
            RaceError::Fetch { backend, source } => {
                assert_eq!(backend, Backend::ViaCep);
                assert!(matches!(source, FetchError::BadStatus { code: 404, .. }));
            }
            other => panic!("expected a fetch failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_success_waits_past_a_failure() {
        let backends = backends(ResponseTemplate::new(404), ok(BRASILAPI_BODY, 150)).await;
        let coordinator = coordinator(&backends, RacePolicy::FirstSuccess);

        let winner = coordinator
            .race(&PostalCode::new("01153000"), Duration::from_millis(1000))
            .await
            .unwrap();

        assert_eq!(winner.backend(), Backend::BrasilApi);
        let snapshot = coordinator.metrics().snapshot();
        assert_eq!(snapshot.viacep_failures, 1);
        assert_eq!(snapshot.brasilapi_wins, 1);
        assert_eq!(snapshot.losers_abandoned, 0);
    }

    #[tokio::test]
    async fn test_first_success_reports_every_failure() {
        let backends = backends(
            ResponseTemplate::new(500),
            ResponseTemplate::new(200).set_body_string("nope"),
        )
        .await;
        let coordinator = coordinator(&backends, RacePolicy::FirstSuccess);

        let err = coordinator
            .race(&PostalCode::new("01153000"), Duration::from_millis(1000))
            .await
            .unwrap_err();

        match err {
            RaceError::AllFailed(failures) => {
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().any(|(b, e)| *b == Backend::ViaCep
                    && matches!(e, FetchError::BadStatus { code: 500, .. })));
                assert!(failures.iter().any(|(b, e)| *b == Backend::BrasilApi
                    && matches!(e, FetchError::Decode(_))));
            }
            other => panic!("expected every backend to fail, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_loser_is_abandoned_not_awaited() {
        let backends = backends(ok(VIACEP_BODY, 20), ok(BRASILAPI_BODY, 10_000)).await;
        let coordinator = coordinator(&backends, RacePolicy::FirstCompleted);

        let started = Instant::now();
        let winner = coordinator
            .race(&PostalCode::new("01153000"), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(winner.backend(), Backend::ViaCep);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(coordinator.metrics().snapshot().losers_abandoned, 1);
    }

    #[tokio::test]
    async fn test_no_fetchers_is_an_error() {
        let coordinator = Coordinator::new(
            Client::new(),
            Vec::new(),
            RacePolicy::FirstCompleted,
            Arc::new(RaceMetrics::new()),
        );

        let err = coordinator
            .race(&PostalCode::new("01153000"), Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(matches!(err, RaceError::NoFetchers));
    }

    #[test]
    fn test_policy_parses() {
        assert_eq!("first-success".parse::<RacePolicy>().unwrap(), RacePolicy::FirstSuccess);
        assert_eq!(" First-Completed ".parse::<RacePolicy>().unwrap(), RacePolicy::FirstCompleted);
        assert!("best-of-three".parse::<RacePolicy>().is_err());
        assert_eq!(RacePolicy::default().to_string(), "first-completed");
    }

    struct Crashing;

    impl Lookup for Crashing {
        fn backend(&self) -> Backend {
            Backend::ViaCep
        }

        fn fetch<'a>(
            &'a self,
            _client: &'a Client,
            _query: &'a PostalCode,
            _cancel: CancelSignal,
        ) -> BoxFuture<'a, Outcome> {
            async { panic!("fetcher blew up before reporting") }.boxed()
        }
    }

    #[tokio::test]
    async fn test_runners_vanishing_is_not_all_failed() {
        let fetchers: Vec<Arc<dyn Lookup>> = vec![Arc::new(Crashing), Arc::new(Crashing)];
        let coordinator = Coordinator::new(
            Client::new(),
            fetchers,
            RacePolicy::FirstCompleted,
            Arc::new(RaceMetrics::new()),
        );

        let err = coordinator
            .race(&PostalCode::new("01153000"), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, RaceError::NoOutcome), "got {err:?}");
        assert_eq!(err.to_string(), "every fetcher exited without reporting");
    }
}
