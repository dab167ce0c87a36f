//! Staggered candidate racing (RFC 8305 "Happy Eyeballs").

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};

use super::config::EstablishmentConfig;
use super::connector::{Connector, TransportSession};
use crate::error::{CandidateFailure, EstablishmentError, FailureReason};
use crate::resolver::ResolvedCandidate;

const TARGET: &str = "transport_services::establishment";

/// Where a race is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacePhase {
    /// No attempt started yet.
    Idle,
    /// At least one attempt is pending.
    Racing,
    /// One attempt won.
    Succeeded,
    /// Every attempt failed or the deadline passed.
    AllFailed,
}

/// Final outcome of one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// This attempt produced the connection.
    Won,
    /// The attempt failed on its own.
    Failed(FailureReason),
    /// The attempt was aborted or never started because another one won.
    Cancelled,
}

/// What happened to every candidate in a race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceReport {
    /// Index of the winning candidate.
    pub winner: Option<usize>,
    /// One outcome per candidate, in candidate order.
    pub outcomes: Vec<AttemptOutcome>,
    /// Number of attempts that were started.
    pub started: usize,
    /// Final phase.
    pub phase: RacePhase,
}

impl RaceReport {
    fn failures(&self, candidates: &[ResolvedCandidate]) -> Vec<CandidateFailure> {
        candidates
            .iter()
            .zip(&self.outcomes)
            .map(|(candidate, outcome)| CandidateFailure {
                candidate: candidate.clone(),
                reason: match outcome {
                    AttemptOutcome::Failed(reason) => reason.clone(),
                    AttemptOutcome::Won | AttemptOutcome::Cancelled => FailureReason::Cancelled,
                },
            })
            .collect()
    }
}

/// The result of a successful race.
pub struct RaceWinner {
    /// Index of the winning candidate.
    pub index: usize,
    /// The winning candidate.
    pub candidate: ResolvedCandidate,
    /// The session it established.
    pub session: TransportSession,
    /// Outcomes of every candidate.
    pub report: RaceReport,
}

impl fmt::Debug for RaceWinner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaceWinner")
            .field("index", &self.index)
            .field("candidate", &self.candidate)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

enum AttemptResult {
    Won(TransportSession),
    Failed(FailureReason),
    Lost,
}

struct RaceState {
    phase: RacePhase,
    outcomes: Vec<Option<AttemptOutcome>>,
    started: usize,
}

impl RaceState {
    fn new(len: usize) -> Self {
        Self {
            phase: RacePhase::Idle,
            outcomes: vec![None; len],
            started: 0,
        }
    }

    fn start_attempt(&mut self) {
        self.phase = RacePhase::Racing;
        self.started += 1;
    }

    fn record(&mut self, index: usize, outcome: AttemptOutcome) {
        if let Some(slot) = self.outcomes.get_mut(index) {
            *slot = Some(outcome);
        }
    }

    /// Settle every candidate without an outcome and produce the report.
    fn finish(self, winner: Option<usize>, timed_out: bool) -> RaceReport {
        let unsettled = if winner.is_none() && timed_out {
            AttemptOutcome::Failed(FailureReason::TimedOut)
        } else {
            AttemptOutcome::Cancelled
        };
        RaceReport {
            winner,
            outcomes: self
                .outcomes
                .into_iter()
                .map(|outcome| outcome.unwrap_or_else(|| unsettled.clone()))
                .collect(),
            started: self.started,
            phase: if winner.is_some() {
                RacePhase::Succeeded
            } else {
                RacePhase::AllFailed
            },
        }
    }
}

/// Race `candidates` in order, returning the first to connect.
///
/// Candidate 0 starts immediately. Each later candidate starts after
/// `stagger_delay`, or as soon as a pending attempt fails. The first
/// attempt to finish its handshake wins; the rest are aborted. When the
/// deadline passes first every unsettled candidate is reported as timed out.
pub async fn race(
    connector: Arc<dyn Connector>,
    candidates: Vec<ResolvedCandidate>,
    config: &EstablishmentConfig,
) -> Result<RaceWinner, EstablishmentError> {
    if candidates.is_empty() {
        return Err(EstablishmentError::InvalidParameters(
            "no candidates to race".to_string(),
        ));
    }

    let count = candidates.len();
    let decided = Arc::new(AtomicBool::new(false));
    let mut state = RaceState::new(count);
    let mut tasks: JoinSet<(usize, AttemptResult)> = JoinSet::new();
    let mut next = 0;
    let mut winner: Option<(usize, TransportSession)> = None;
    let mut timed_out = false;
    let mut deadline_passed = false;

    let deadline = sleep(config.deadline);
    tokio::pin!(deadline);
    let stagger = sleep(std::time::Duration::ZERO);
    tokio::pin!(stagger);

    tracing::debug!(target: TARGET, "Racing {} candidates", count);

    loop {
        if tasks.is_empty() && (next >= count || deadline_passed) {
            break;
        }

        tokio::select! {
            biased;

            () = &mut deadline, if !deadline_passed => {
                deadline_passed = true;
                if decided
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    timed_out = true;
                    break;
                }
                // An attempt already won; keep joining until it is collected.
            }

            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                match joined {
                    Ok((index, AttemptResult::Won(session))) => {
                        state.record(index, AttemptOutcome::Won);
                        winner = Some((index, session));
                        break;
                    }
                    Ok((index, AttemptResult::Failed(reason))) => {
                        tracing::debug!(target: TARGET, "Attempt {} ({}) failed: {}", index, candidates[index], reason);
                        state.record(index, AttemptOutcome::Failed(reason));
                        stagger.as_mut().reset(Instant::now());
                    }
                    Ok((index, AttemptResult::Lost)) => {
                        state.record(index, AttemptOutcome::Cancelled);
                    }
                    Err(e) => {
                        tracing::warn!(target: TARGET, "Attempt task ended abnormally: {}", e);
                    }
                }
            }

            () = &mut stagger, if next < count && !deadline_passed => {
                let index = next;
                next += 1;
                state.start_attempt();
                tracing::debug!(target: TARGET, "Starting attempt {}: {}", index, candidates[index]);
                tasks.spawn(attempt(
                    Arc::clone(&connector),
                    candidates[index].clone(),
                    index,
                    config.attempt_timeout,
                    Arc::clone(&decided),
                ));
                stagger.as_mut().reset(Instant::now() + config.stagger_delay);
            }
        }
    }

    // Losers drop their sockets when aborted.
    tasks.abort_all();

    let report = state.finish(winner.as_ref().map(|(index, _)| *index), timed_out);
    match winner {
        Some((index, session)) => {
            tracing::info!(target: TARGET, "Connected to {} (attempt {} of {})", candidates[index], index + 1, count);
            let candidate = candidates[index].clone();
            Ok(RaceWinner {
                index,
                candidate,
                session,
                report,
            })
        }
        None => {
            let failures = report.failures(&candidates);
            tracing::warn!(target: TARGET, "All {} candidates failed{}", count, if timed_out { " before the deadline" } else { "" });
            Err(EstablishmentError::AllFailed(failures))
        }
    }
}

async fn attempt(
    connector: Arc<dyn Connector>,
    candidate: ResolvedCandidate,
    index: usize,
    timeout: Option<std::time::Duration>,
    decided: Arc<AtomicBool>,
) -> (usize, AttemptResult) {
    let connect = AssertUnwindSafe(connector.connect(&candidate)).catch_unwind();
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, connect).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(Err(FailureReason::TimedOut)),
        },
        None => connect.await,
    };

    let result = match outcome {
        Ok(Ok(session)) => {
            if decided
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                AttemptResult::Won(session)
            } else {
                drop(session);
                AttemptResult::Lost
            }
        }
        Ok(Err(reason)) => AttemptResult::Failed(reason),
        Err(_) => AttemptResult::Failed(FailureReason::Io("connector panicked".to_string())),
    };
    (index, result)
}
