use tracing::{info, warn};

use crate::config::{
    CONFIG, INFOGRAPHIC_PROMPT, RESEARCH_PLAN_PROMPT, RESEARCH_REPORT_PROMPT,
    RESEARCH_TASKS_PROMPT,
};
use crate::llm::interactions::{
    CreateInteraction, Interaction, InteractionBackend, InteractionStatus, InteractionTool,
};
use crate::research::error::ResearchError;
use crate::research::poller::{poll_until_done, PollOutcome, PollSettings};
use crate::research::session::{Phase, ResearchSession, Task};
use crate::research::tasks::parse_tasks;

#[derive(Debug, Clone)]
pub struct ResearchSettings {
    pub plan_model: String,
    pub research_agent: String,
    pub report_model: String,
    pub infographic_model: String,
    pub poll: PollSettings,
}

impl ResearchSettings {
    pub fn from_config() -> Self {
        ResearchSettings {
            plan_model: CONFIG.research_plan_model.clone(),
            research_agent: CONFIG.research_agent.clone(),
            report_model: CONFIG.research_report_model.clone(),
            infographic_model: CONFIG.infographic_model.clone(),
            poll: PollSettings::from_config(),
        }
    }
}

/// Current state of a research job as seen by a single fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchStatus {
    pub research_id: String,
    pub status: InteractionStatus,
    pub error: Option<String>,
}

/// Drives a [`ResearchSession`] through plan, research and report.
///
/// Every operation writes its fields to the session only once all remote
/// calls it depends on have succeeded, so a failure leaves the session in
/// the last good phase.
pub struct ResearchOrchestrator<B> {
    backend: B,
    settings: ResearchSettings,
}

pub(crate) fn build_research_input(tasks: &[Task]) -> String {
    let listed = tasks
        .iter()
        .map(|task| format!("{}. {}", task.ordinal, task.description))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{RESEARCH_TASKS_PROMPT}{listed}")
}

fn failure_message(interaction: &Interaction) -> String {
    interaction
        .error
        .clone()
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| format!("research ended with status {}", interaction.status))
}

impl<B: InteractionBackend> ResearchOrchestrator<B> {
    pub fn new(backend: B, settings: ResearchSettings) -> Self {
        ResearchOrchestrator { backend, settings }
    }

    pub async fn generate_plan(
        &self,
        session: &mut ResearchSession,
        goal: &str,
    ) -> Result<(), ResearchError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(ResearchError::InvalidInput(
                "research goal must not be empty".to_string(),
            ));
        }

        let request = CreateInteraction::for_model(
            &self.settings.plan_model,
            RESEARCH_PLAN_PROMPT.replace("{goal}", goal),
        )
        .with_tool(InteractionTool::GoogleSearch);
        let interaction = self
            .backend
            .create(request)
            .await
            .map_err(|err| ResearchError::PlanGeneration(err.to_string()))?;

        if matches!(
            interaction.status,
            InteractionStatus::Failed | InteractionStatus::Cancelled
        ) {
            return Err(ResearchError::PlanGeneration(failure_message(&interaction)));
        }
        let plan_text = interaction.text();
        if plan_text.trim().is_empty() {
            return Err(ResearchError::PlanGeneration(
                "the planner returned no text".to_string(),
            ));
        }

        let tasks = parse_tasks(&plan_text);
        info!(
            "Plan {} created with {} tasks",
            interaction.id,
            tasks.len()
        );

        session.clear_downstream();
        session.goal = Some(goal.to_string());
        session.plan_id = Some(interaction.id);
        session.plan_text = Some(plan_text);
        session.tasks = tasks;
        Ok(())
    }

    /// Starts the background research job for `selected` and waits for it.
    ///
    /// The job id is stored on the session as soon as the job exists, so a
    /// timeout, failure or abandoned wait can be resumed by id.
    pub async fn start_research<F>(
        &self,
        session: &mut ResearchSession,
        selected: &[Task],
        progress: F,
    ) -> Result<(), ResearchError>
    where
        F: FnMut(u8),
    {
        let plan_id = match (session.phase(), session.plan_id.clone()) {
            (Phase::Planned | Phase::Researching, Some(plan_id)) => plan_id,
            (phase, _) => {
                return Err(ResearchError::InvalidPhase {
                    operation: "start research",
                    phase,
                })
            }
        };
        if selected.is_empty() {
            return Err(ResearchError::NoTasksSelected);
        }

        let request =
            CreateInteraction::for_agent(&self.settings.research_agent, build_research_input(selected))
                .chained_to(&plan_id)
                .in_background();
        let interaction = self
            .backend
            .create(request)
            .await
            .map_err(|err| ResearchError::ResearchFailed {
                research_id: None,
                message: err.to_string(),
            })?;

        info!(
            "Research {} started for {} tasks",
            interaction.id,
            selected.len()
        );
        session.research_id = Some(interaction.id.clone());
        session.research_text = None;
        session.report_text = None;
        session.infographic = None;

        self.wait_for_research(session, interaction.id, progress).await
    }

    /// Waits again on a research job that timed out or was abandoned.
    pub async fn resume_research<F>(
        &self,
        session: &mut ResearchSession,
        progress: F,
    ) -> Result<(), ResearchError>
    where
        F: FnMut(u8),
    {
        let research_id = match (session.phase(), session.research_id.clone()) {
            (Phase::Researching, Some(research_id)) => research_id,
            (phase, _) => {
                return Err(ResearchError::InvalidPhase {
                    operation: "resume research",
                    phase,
                })
            }
        };
        self.wait_for_research(session, research_id, progress).await
    }

    async fn wait_for_research<F>(
        &self,
        session: &mut ResearchSession,
        research_id: String,
        progress: F,
    ) -> Result<(), ResearchError>
    where
        F: FnMut(u8),
    {
        let outcome = poll_until_done(&self.backend, &research_id, self.settings.poll, progress)
            .await
            .map_err(|err| ResearchError::ResearchFailed {
                research_id: Some(research_id.clone()),
                message: err.to_string(),
            })?;

        let interaction = match outcome {
            PollOutcome::Finished(interaction) => interaction,
            PollOutcome::TimedOut { waited } => {
                warn!("Research {} still running after {}s", research_id, waited.as_secs());
                return Err(ResearchError::ResearchTimeout {
                    research_id,
                    waited_secs: waited.as_secs(),
                });
            }
        };

        if interaction.status != InteractionStatus::Completed {
            return Err(ResearchError::ResearchFailed {
                research_id: Some(research_id),
                message: failure_message(&interaction),
            });
        }
        let research_text = interaction.text();
        if research_text.trim().is_empty() {
            return Err(ResearchError::ResearchFailed {
                research_id: Some(research_id),
                message: "research completed without any text output".to_string(),
            });
        }

        info!("Research {} completed", research_id);
        session.research_text = Some(research_text);
        Ok(())
    }

    /// One fetch of the stored research job, without waiting.
    pub async fn research_status(
        &self,
        session: &ResearchSession,
    ) -> Result<ResearchStatus, ResearchError> {
        let Some(research_id) = session.research_id.clone() else {
            return Err(ResearchError::InvalidPhase {
                operation: "check research status",
                phase: session.phase(),
            });
        };
        let interaction = self
            .backend
            .get(&research_id)
            .await
            .map_err(|err| ResearchError::ResearchFailed {
                research_id: Some(research_id.clone()),
                message: err.to_string(),
            })?;
        Ok(ResearchStatus {
            research_id,
            status: interaction.status,
            error: interaction.error,
        })
    }

    pub async fn generate_report(&self, session: &mut ResearchSession) -> Result<(), ResearchError> {
        let phase = session.phase();
        let (research_id, research_text) = match (
            phase,
            session.research_id.clone(),
            session.research_text.clone(),
        ) {
            (Phase::Researched | Phase::Reported, Some(id), Some(text)) if !text.trim().is_empty() => {
                (id, text)
            }
            _ => {
                return Err(ResearchError::InvalidPhase {
                    operation: "generate the report",
                    phase,
                })
            }
        };

        let request = CreateInteraction::for_model(
            &self.settings.report_model,
            format!("{RESEARCH_REPORT_PROMPT}{research_text}"),
        )
        .chained_to(&research_id);
        let interaction = self
            .backend
            .create(request)
            .await
            .map_err(|err| ResearchError::ReportGeneration(err.to_string()))?;

        if matches!(
            interaction.status,
            InteractionStatus::Failed | InteractionStatus::Cancelled
        ) {
            return Err(ResearchError::ReportGeneration(failure_message(&interaction)));
        }
        let report_text = interaction.text();
        if report_text.trim().is_empty() {
            return Err(ResearchError::ReportGeneration(
                "the report model returned no text".to_string(),
            ));
        }

        info!("Report {} generated", interaction.id);
        session.report_text = Some(report_text);
        Ok(())
    }

    /// Best-effort summary image for `source_text`. Any failure, or a
    /// response without an image, yields `None`.
    pub async fn generate_infographic(&self, source_text: &str) -> Option<Vec<u8>> {
        if source_text.trim().is_empty() {
            warn!("Skipping infographic for empty source text");
            return None;
        }
        let prompt = format!("{INFOGRAPHIC_PROMPT}{source_text}");
        match self
            .backend
            .generate(&self.settings.infographic_model, &prompt)
            .await
        {
            Ok(segments) => {
                let image = segments
                    .into_iter()
                    .find_map(|segment| segment.as_image().map(|bytes| bytes.to_vec()));
                if image.is_none() {
                    warn!("Infographic response contained no image");
                }
                image
            }
            Err(err) => {
                warn!("Infographic generation failed: {err}");
                None
            }
        }
    }

    /// Renders an infographic from the report, or from the research findings
    /// when there is no report yet, and stores it on the session.
    pub async fn render_infographic(&self, session: &mut ResearchSession) -> bool {
        let Some(source) = session
            .report_text
            .clone()
            .or_else(|| session.research_text.clone())
        else {
            warn!("No report or research text to build an infographic from");
            return false;
        };
        match self.generate_infographic(&source).await {
            Some(image) => {
                session.infographic = Some(image);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::gemini::OutputSegment;
    use crate::llm::mock::{interaction, ScriptedBackend};

    const SEVEN_TASK_PLAN: &str = "1. Identify top 5 competitors - pricing and positioning\n\
        2. Estimate market size - SMB and mid-market\n\
        3. Map regulatory constraints - works councils and GDPR\n\
        4. Survey buyer personas - HR leads\n\
        5. Analyze distribution channels - partners\n\
        6. Review funding activity - last three years\n\
        7. Summarize entry risks - localization";

    fn orchestrator() -> ResearchOrchestrator<ScriptedBackend> {
        ResearchOrchestrator::new(
            ScriptedBackend::default(),
            ResearchSettings {
                plan_model: "plan-model".to_string(),
                research_agent: "research-agent".to_string(),
                report_model: "report-model".to_string(),
                infographic_model: "image-model".to_string(),
                poll: PollSettings {
                    interval: Duration::from_secs(3),
                    timeout: Duration::from_secs(30),
                },
            },
        )
    }

    async fn planned(orch: &ResearchOrchestrator<ScriptedBackend>) -> ResearchSession {
        orch.backend
            .push_create(Ok(interaction("plan-1", "completed", Some(SEVEN_TASK_PLAN))));
        let mut session = ResearchSession::default();
        orch.generate_plan(&mut session, "  Research B2B HR SaaS market in Germany  ")
            .await
            .expect("plan succeeds");
        session
    }

    #[tokio::test]
    async fn plan_populates_session_and_requests_search() {
        let orch = orchestrator();
        let session = planned(&orch).await;

        assert_eq!(session.phase(), Phase::Planned);
        assert_eq!(session.goal.as_deref(), Some("Research B2B HR SaaS market in Germany"));
        assert_eq!(session.tasks.len(), 7);

        let request = &orch.backend.created_requests()[0];
        assert_eq!(request.target(), "plan-model");
        assert!(request.input.contains("Research B2B HR SaaS market in Germany"));
        assert_eq!(request.tools, vec![InteractionTool::GoogleSearch]);
        assert!(!request.background);
    }

    #[tokio::test]
    async fn empty_goal_is_rejected_without_remote_call() {
        let orch = orchestrator();
        let mut session = ResearchSession::default();
        let err = orch.generate_plan(&mut session, "   ").await.unwrap_err();
        assert!(matches!(err, ResearchError::InvalidInput(_)));
        assert!(orch.backend.created_requests().is_empty());
    }

    #[tokio::test]
    async fn failed_plan_leaves_session_untouched() {
        let orch = orchestrator();
        let mut session = planned(&orch).await;
        session.research_id = Some("res-old".to_string());
        let before = session.clone();

        orch.backend.push_create(Err("status 503 UNAVAILABLE"));
        let err = orch.generate_plan(&mut session, "another goal").await.unwrap_err();
        assert!(matches!(err, ResearchError::PlanGeneration(ref m) if m.contains("503")));
        assert_eq!(session, before);
    }

    #[tokio::test]
    async fn research_before_plan_is_an_invalid_phase() {
        let orch = orchestrator();
        let mut session = ResearchSession::default();
        let err = orch
            .start_research(&mut session, &[Task::new("1", "x")], |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::InvalidPhase { phase: Phase::Idle, .. }));
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn research_requires_a_selection() {
        let orch = orchestrator();
        let mut session = planned(&orch).await;
        let err = orch.start_research(&mut session, &[], |_| {}).await.unwrap_err();
        assert!(matches!(err, ResearchError::NoTasksSelected));
        assert_eq!(session.phase(), Phase::Planned);
    }

    #[tokio::test]
    async fn failed_research_create_leaves_session_untouched() {
        let orch = orchestrator();
        let mut session = planned(&orch).await;
        let selected = session.selected_tasks();
        let before = session.clone();

        orch.backend.push_create(Err("status 429 RESOURCE_EXHAUSTED"));
        let err = orch
            .start_research(&mut session, &selected, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResearchError::ResearchFailed { research_id: None, ref message } if message.contains("429")
        ));
        assert_eq!(session, before);
        assert_eq!(session.phase(), Phase::Planned);

        // A retry from a timed-out job keeps the old id when the new job never starts.
        session.research_id = Some("res-old".to_string());
        let before = session.clone();
        orch.backend.push_create(Err("connection reset"));
        orch.start_research(&mut session, &selected, |_| {})
            .await
            .unwrap_err();
        assert_eq!(session, before);
        assert_eq!(session.research_id.as_deref(), Some("res-old"));
        assert!(session.research_text.is_none() && session.report_text.is_none());
        assert_eq!(session.phase(), Phase::Researching);
        assert_eq!(orch.backend.fetch_count(), 0);
    }

    #[tokio::test]
    async fn status_fetches_the_stored_job_once() {
        let orch = orchestrator();
        let mut session = planned(&orch).await;
        session.research_id = Some("res-7".to_string());

        let mut failed = interaction("res-7", "failed", None);
        failed.error = Some("agent crashed".to_string());
        orch.backend.push_get(Ok(failed));

        let status = orch.research_status(&session).await.expect("status succeeds");
        assert_eq!(
            status,
            ResearchStatus {
                research_id: "res-7".to_string(),
                status: InteractionStatus::Failed,
                error: Some("agent crashed".to_string()),
            }
        );
        assert_eq!(orch.backend.fetch_count(), 1);
        assert_eq!(session.phase(), Phase::Researching);
    }

    #[tokio::test]
    async fn status_without_research_id_is_an_invalid_phase() {
        let orch = orchestrator();
        let session = planned(&orch).await;
        let err = orch.research_status(&session).await.unwrap_err();
        assert!(matches!(err, ResearchError::InvalidPhase { phase: Phase::Planned, .. }));
        assert_eq!(orch.backend.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn selected_tasks_are_sent_in_order_and_chained_to_the_plan() {
        let orch = orchestrator();
        let mut session = planned(&orch).await;
        session.set_selection(&["1".to_string(), "3".to_string(), "5".to_string()]);
        let selected = session.selected_tasks();

        orch.backend.push_create(Ok(interaction("res-1", "in_progress", None)));
        orch.backend.push_get(Ok(interaction("res-1", "in_progress", None)));
        orch.backend.push_get(Ok(interaction("res-1", "completed", Some("Findings"))));

        orch.start_research(&mut session, &selected, |_| {})
            .await
            .expect("research succeeds");

        let request = &orch.backend.created_requests()[1];
        assert_eq!(request.target(), "research-agent");
        assert_eq!(request.previous_interaction_id.as_deref(), Some("plan-1"));
        assert!(request.background);
        assert_eq!(
            request.input,
            format!(
                "{RESEARCH_TASKS_PROMPT}1. Identify top 5 competitors - pricing and positioning\n\n\
                 3. Map regulatory constraints - works councils and GDPR\n\n\
                 5. Analyze distribution channels - partners"
            )
        );
        assert!(!request.input.contains("Estimate market size"));
        assert_eq!(session.research_id.as_deref(), Some("res-1"));
        assert_eq!(session.research_text.as_deref(), Some("Findings"));
        assert_eq!(session.phase(), Phase::Researched);
        assert_eq!(orch.backend.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_research_id_and_resume_finishes() {
        let orch = orchestrator();
        let mut session = planned(&orch).await;
        let selected = session.selected_tasks();

        orch.backend.push_create(Ok(interaction("res-2", "pending", None)));
        // 30s ceiling at 3s interval: ten polls in the loop plus the final one.
        for _ in 0..11 {
            orch.backend.push_get(Ok(interaction("res-2", "in_progress", None)));
        }

        let err = orch
            .start_research(&mut session, &selected, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResearchError::ResearchTimeout { ref research_id, waited_secs: 30 } if research_id == "res-2"
        ));
        assert_eq!(orch.backend.fetch_count(), 11);
        assert_eq!(session.research_id.as_deref(), Some("res-2"));
        assert!(session.research_text.is_none());
        assert_eq!(session.phase(), Phase::Researching);

        orch.backend.push_get(Ok(interaction("res-2", "completed", Some("Late findings"))));
        let mut last = 0;
        orch.resume_research(&mut session, |p| last = p)
            .await
            .expect("resume succeeds");
        assert_eq!(last, 100);
        assert_eq!(session.research_text.as_deref(), Some("Late findings"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_research_reports_remote_diagnostic() {
        let orch = orchestrator();
        let mut session = planned(&orch).await;
        let selected = session.selected_tasks();

        orch.backend.push_create(Ok(interaction("res-3", "in_progress", None)));
        let mut failed = interaction("res-3", "failed", None);
        failed.error = Some("quota exhausted".to_string());
        orch.backend.push_get(Ok(failed));

        let err = orch
            .start_research(&mut session, &selected, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResearchError::ResearchFailed { ref message, .. } if message == "quota exhausted"
        ));
        assert_eq!(err.research_id(), Some("res-3"));
        assert_eq!(session.phase(), Phase::Researching);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_research_without_diagnostic_gets_placeholder() {
        let orch = orchestrator();
        let mut session = planned(&orch).await;
        let selected = session.selected_tasks();

        orch.backend.push_create(Ok(interaction("res-4", "in_progress", None)));
        orch.backend.push_get(Ok(interaction("res-4", "cancelled", None)));

        let err = orch
            .start_research(&mut session, &selected, |_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("research ended with status cancelled"));
    }

    #[tokio::test(start_paused = true)]
    async fn full_flow_then_replan_discards_downstream_state() {
        let orch = orchestrator();
        let mut session = planned(&orch).await;
        let selected = session.selected_tasks();

        orch.backend.push_create(Ok(interaction("res-5", "in_progress", None)));
        orch.backend.push_get(Ok(interaction("res-5", "completed", Some("Findings"))));
        orch.start_research(&mut session, &selected, |_| {})
            .await
            .expect("research succeeds");

        orch.backend.push_create(Ok(interaction("rep-5", "completed", Some("## Summary"))));
        orch.generate_report(&mut session).await.expect("report succeeds");
        assert_eq!(session.phase(), Phase::Reported);
        assert!(session.report_text.is_some() && session.research_text.is_some());
        assert!(session.plan_text.is_some());

        let report_request = &orch.backend.created_requests()[2];
        assert_eq!(report_request.previous_interaction_id.as_deref(), Some("res-5"));
        assert!(report_request.input.starts_with(RESEARCH_REPORT_PROMPT));

        session.infographic = Some(vec![1, 2, 3]);
        orch.backend
            .push_create(Ok(interaction("plan-2", "completed", Some("1. Only task"))));
        orch.generate_plan(&mut session, "a new goal")
            .await
            .expect("replan succeeds");

        assert_eq!(session.phase(), Phase::Planned);
        assert_eq!(session.plan_id.as_deref(), Some("plan-2"));
        assert!(session.research_id.is_none());
        assert!(session.research_text.is_none());
        assert!(session.report_text.is_none());
        assert!(session.infographic.is_none());
    }

    #[tokio::test]
    async fn report_requires_research_text() {
        let orch = orchestrator();
        let mut session = planned(&orch).await;
        let err = orch.generate_report(&mut session).await.unwrap_err();
        assert!(matches!(err, ResearchError::InvalidPhase { phase: Phase::Planned, .. }));
    }

    #[tokio::test]
    async fn report_failure_keeps_phase() {
        let orch = orchestrator();
        let mut session = planned(&orch).await;
        session.research_id = Some("res-6".to_string());
        session.research_text = Some("Findings".to_string());

        orch.backend.push_create(Err("status 500 internal"));
        let err = orch.generate_report(&mut session).await.unwrap_err();
        assert!(matches!(err, ResearchError::ReportGeneration(_)));
        assert_eq!(session.phase(), Phase::Researched);
        assert!(session.report_text.is_none());
    }

    #[tokio::test]
    async fn infographic_without_image_is_none_not_error() {
        let orch = orchestrator();
        orch.backend
            .push_generation(Ok(vec![OutputSegment::Text("I cannot draw that".to_string())]));
        assert_eq!(orch.generate_infographic("report").await, None);

        orch.backend.push_generation(Err("status 503"));
        assert_eq!(orch.generate_infographic("report").await, None);

        orch.backend.push_generation(Ok(vec![
            OutputSegment::Unknown,
            OutputSegment::Image {
                mime_type: "image/png".to_string(),
                bytes: vec![7],
            },
            OutputSegment::Image {
                mime_type: "image/png".to_string(),
                bytes: vec![8],
            },
        ]));
        assert_eq!(orch.generate_infographic("report").await, Some(vec![7]));
    }

    #[tokio::test]
    async fn rendered_infographic_prefers_report_text() {
        let orch = orchestrator();
        let mut session = ResearchSession {
            research_text: Some("findings".to_string()),
            ..Default::default()
        };
        orch.backend.push_generation(Ok(vec![OutputSegment::Image {
            mime_type: "image/png".to_string(),
            bytes: vec![5],
        }]));
        assert!(orch.render_infographic(&mut session).await);
        assert_eq!(session.infographic, Some(vec![5]));

        let mut empty = ResearchSession::default();
        assert!(!orch.render_infographic(&mut empty).await);
    }
}
