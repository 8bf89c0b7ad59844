use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::config::CONFIG;
use crate::llm::interactions::{Interaction, InteractionBackend};

/// Percentage shown while a job is still running never exceeds this.
pub const RUNNING_PROGRESS_CAP: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub fn from_config() -> Self {
        PollSettings {
            interval: Duration::from_secs(CONFIG.research_poll_interval_seconds),
            timeout: Duration::from_secs(CONFIG.research_timeout_seconds),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The job left the running states.
    Finished(Interaction),
    /// Still running when the ceiling was reached.
    TimedOut { waited: Duration },
}

pub(crate) fn running_progress(elapsed: Duration, timeout: Duration) -> u8 {
    if timeout.is_zero() {
        return RUNNING_PROGRESS_CAP;
    }
    let percent = elapsed.as_millis() * 100 / timeout.as_millis().max(1);
    percent.min(RUNNING_PROGRESS_CAP as u128) as u8
}

/// Polls `id` at a fixed interval until it is no longer running or the
/// timeout is spent, then takes one last look. `progress` receives a
/// percentage that only reaches 100 once the job has finished.
///
/// Dropping the returned future stops polling; the remote job keeps running
/// and can be polled again by id.
pub async fn poll_until_done<B, F>(
    backend: &B,
    id: &str,
    settings: PollSettings,
    mut progress: F,
) -> Result<PollOutcome>
where
    B: InteractionBackend + ?Sized,
    F: FnMut(u8),
{
    let mut elapsed = Duration::ZERO;
    while elapsed < settings.timeout {
        let interaction = backend.get(id).await?;
        if !interaction.status.is_running() {
            progress(100);
            return Ok(PollOutcome::Finished(interaction));
        }
        elapsed += settings.interval;
        debug!(
            "Interaction {} still {} after {}s",
            id,
            interaction.status,
            elapsed.as_secs()
        );
        progress(running_progress(elapsed, settings.timeout));
        tokio::time::sleep(settings.interval).await;
    }

    let interaction = backend.get(id).await?;
    if interaction.status.is_running() {
        return Ok(PollOutcome::TimedOut { waited: elapsed });
    }
    progress(100);
    Ok(PollOutcome::Finished(interaction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{interaction, ScriptedBackend};

    fn settings(interval: u64, timeout: u64) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(interval),
            timeout: Duration::from_secs(timeout),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_terminal_status() {
        let backend = ScriptedBackend::default();
        for _ in 0..3 {
            backend.push_get(Ok(interaction("r", "in_progress", None)));
        }
        backend.push_get(Ok(interaction("r", "completed", Some("done"))));

        let mut seen = Vec::new();
        let outcome = poll_until_done(&backend, "r", settings(3, 300), |p| seen.push(p))
            .await
            .expect("poll succeeds");

        assert!(matches!(outcome, PollOutcome::Finished(ref i) if i.text() == "done"));
        assert_eq!(backend.fetch_count(), 4);
        assert_eq!(seen, vec![1, 2, 3, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_finishing_job_times_out_after_final_check() {
        let backend = ScriptedBackend::default();
        // 9s ceiling at 3s interval: three polls in the loop, one after it.
        for _ in 0..4 {
            backend.push_get(Ok(interaction("r", "pending", None)));
        }

        let mut seen = Vec::new();
        let outcome = poll_until_done(&backend, "r", settings(3, 9), |p| seen.push(p))
            .await
            .expect("poll succeeds");

        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                waited: Duration::from_secs(9)
            }
        );
        assert_eq!(backend.fetch_count(), 4);
        assert!(seen.iter().all(|p| *p <= RUNNING_PROGRESS_CAP));
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn job_finishing_at_the_ceiling_is_still_collected() {
        let backend = ScriptedBackend::default();
        backend.push_get(Ok(interaction("r", "in_progress", None)));
        backend.push_get(Ok(interaction("r", "failed", None)));

        let outcome = poll_until_done(&backend, "r", settings(3, 3), |_| {})
            .await
            .expect("poll succeeds");
        assert!(matches!(outcome, PollOutcome::Finished(_)));
    }

    #[test]
    fn running_progress_is_capped() {
        assert_eq!(running_progress(Duration::from_secs(150), Duration::from_secs(300)), 50);
        assert_eq!(running_progress(Duration::from_secs(299), Duration::from_secs(300)), 90);
        assert_eq!(running_progress(Duration::from_secs(1), Duration::ZERO), 90);
    }
}
