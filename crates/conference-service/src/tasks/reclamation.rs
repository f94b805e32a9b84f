//! Reclamation scheduler.
//!
//! Two independent loops: one reclaims unused conferences, the other stale
//! temporary participants. Each loop re-reads its interval from the durable
//! settings before every sleep, so operators can retune it without a restart,
//! and is re-armed only after the previous cycle has finished.
//!
//! # Graceful Shutdown
//!
//! Both loops watch a cancellation token. A cycle that is already running
//! completes before its loop exits.

use crate::errors::CsError;
use crate::models::{CONFERENCE_INTERVAL_SETTING, USER_INTERVAL_SETTING};
use crate::repositories::Store;
use crate::services::{ConferenceRegistry, IdentityResolver};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Scheduler timing taken from the service configuration.
#[derive(Debug, Clone)]
pub struct ReclamationSettings {
    /// Used when `conferenceInterval` is unset or invalid.
    pub conference_interval: Duration,

    /// Used when `userInterval` is unset or invalid.
    pub participant_interval: Duration,

    /// Temporary participants older than this are reclaimed.
    pub participant_max_age: chrono::Duration,
}

pub struct ReclamationScheduler {
    store: Arc<dyn Store>,
    registry: Arc<ConferenceRegistry>,
    identity: Arc<IdentityResolver>,
    settings: ReclamationSettings,
}

/// Running scheduler. Dropping it leaves the loops running until the token
/// is cancelled elsewhere.
pub struct ReclamationHandle {
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ReclamationHandle {
    /// Cancel both loops and wait for them to finish.
    pub async fn stop(self) {
        self.cancel_token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(target: "cs.task.reclamation", error = %e, "Reclamation task panicked");
            }
        }
        info!(target: "cs.task.reclamation", "Reclamation scheduler stopped");
    }
}

impl ReclamationScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ConferenceRegistry>,
        identity: Arc<IdentityResolver>,
        settings: ReclamationSettings,
    ) -> Self {
        Self {
            store,
            registry,
            identity,
            settings,
        }
    }

    /// Spawn both loops. They stop when `cancel_token` is cancelled.
    pub fn start(self: Arc<Self>, cancel_token: CancellationToken) -> ReclamationHandle {
        info!(
            target: "cs.task.reclamation",
            conference_interval_ms = self.settings.conference_interval.as_millis() as u64,
            participant_interval_ms = self.settings.participant_interval.as_millis() as u64,
            "Starting reclamation scheduler"
        );

        let conferences = {
            let scheduler = Arc::clone(&self);
            let token = cancel_token.clone();
            tokio::spawn(async move {
                let defaults = scheduler.settings.conference_interval;
                run_loop(
                    "conferences",
                    token,
                    || scheduler.interval(CONFERENCE_INTERVAL_SETTING, defaults),
                    || scheduler.reclaim_conferences(),
                )
                .await;
            })
        };

        let participants = {
            let scheduler = Arc::clone(&self);
            let token = cancel_token.clone();
            tokio::spawn(async move {
                let defaults = scheduler.settings.participant_interval;
                run_loop(
                    "participants",
                    token,
                    || scheduler.interval(USER_INTERVAL_SETTING, defaults),
                    || scheduler.reclaim_participants(),
                )
                .await;
            })
        };

        ReclamationHandle {
            cancel_token,
            tasks: vec![conferences, participants],
        }
    }

    /// One conference reclamation cycle.
    #[instrument(skip_all, name = "cs.task.reclamation.conferences")]
    pub async fn reclaim_conferences(&self) -> Result<(), CsError> {
        let report = self.registry.reclaim_unused().await?;
        tracing::debug!(
            target: "cs.task.reclamation",
            reclaimed = report.conferences_reclaimed,
            skipped_active = report.skipped_active,
            failed = report.failed,
            "Conference reclamation cycle finished"
        );
        Ok(())
    }

    /// One temporary participant reclamation cycle.
    #[instrument(skip_all, name = "cs.task.reclamation.participants")]
    pub async fn reclaim_participants(&self) -> Result<(), CsError> {
        let deleted = self
            .identity
            .reclaim_stale_temporaries(self.settings.participant_max_age)
            .await?;
        tracing::debug!(
            target: "cs.task.reclamation",
            deleted = deleted,
            "Participant reclamation cycle finished"
        );
        Ok(())
    }

    /// Interval for the next cycle: the durable setting in milliseconds,
    /// or `default` when it is unset, unreadable or not a positive integer.
    pub async fn interval(&self, key: &str, default: Duration) -> Duration {
        match self.store.get_setting(key).await {
            Ok(Some(raw)) => match raw.trim().parse::<u64>() {
                Ok(millis) if millis > 0 => Duration::from_millis(millis),
                _ => {
                    warn!(
                        target: "cs.task.reclamation",
                        setting = key,
                        value = %raw,
                        "Invalid interval setting, using default"
                    );
                    default
                }
            },
            Ok(None) => default,
            Err(e) => {
                warn!(
                    target: "cs.task.reclamation",
                    setting = key,
                    error = %e,
                    "Failed to read interval setting, using default"
                );
                default
            }
        }
    }
}

async fn run_loop<I, IF, C, CF>(
    name: &'static str,
    cancel_token: CancellationToken,
    next_interval: I,
    cycle: C,
) where
    I: Fn() -> IF,
    IF: Future<Output = Duration>,
    C: Fn() -> CF,
    CF: Future<Output = Result<(), CsError>>,
{
    loop {
        let wait = next_interval().await;

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel_token.cancelled() => {
                info!(
                    target: "cs.task.reclamation",
                    loop_name = name,
                    "Reclamation loop received shutdown signal, exiting"
                );
                break;
            }
        }

        if let Err(e) = cycle().await {
            // Next cycle is scheduled regardless
            tracing::error!(
                target: "cs.task.reclamation",
                loop_name = name,
                error = %e,
                "Reclamation cycle failed"
            );
        }
    }
}
