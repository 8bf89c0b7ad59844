use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::config::CONFIG;
use crate::llm::GeminiInteractions;
use crate::research::{
    Phase, ResearchError, ResearchOrchestrator, ResearchSession, ResearchSettings, Task,
};
use crate::state::SessionStore;
use crate::utils::progress::Progress;
use crate::utils::telegram::send_text_log;
use crate::utils::timing::{complete_command_timer, start_command_timer, CommandTimer};

pub const DEFAULT_INFOGRAPHIC_PATH: &str = "research_infographic.png";
const TEXT_PREVIEW_LIMIT: usize = 1500;

fn orchestrator() -> ResearchOrchestrator<GeminiInteractions> {
    ResearchOrchestrator::new(GeminiInteractions, ResearchSettings::from_config())
}

/// Closes the timer and turns a research failure into the message shown to
/// the user.
fn fail(timer: &mut CommandTimer, err: ResearchError) -> anyhow::Error {
    let kind = match &err {
        ResearchError::InvalidInput(_) => "invalid_input",
        ResearchError::InvalidPhase { .. } => "invalid_phase",
        ResearchError::NoTasksSelected => "no_tasks",
        ResearchError::PlanGeneration(_) => "plan_failed",
        ResearchError::ResearchFailed { .. } => "research_failed",
        ResearchError::ResearchTimeout { .. } => "research_timeout",
        ResearchError::ReportGeneration(_) => "report_failed",
    };
    complete_command_timer(timer, "error", Some(kind.to_string()));
    anyhow!(err.user_message())
}

fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit).collect();
    format!("{kept}\n... ({} characters in total, see `show`)", text.chars().count())
}

fn print_tasks(session: &ResearchSession) {
    if session.tasks.is_empty() {
        println!("No selectable tasks were found in the plan.");
        return;
    }
    for task in &session.tasks {
        let mark = if task.selected { "x" } else { " " };
        println!("  [{mark}] {}. {}", task.ordinal, task.description);
    }
}

/// Parses `1,3 5` style ordinal lists.
pub fn parse_ordinals(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|chunk| chunk.split([',', ' ']))
        .map(str::trim)
        .filter(|ordinal| !ordinal.is_empty())
        .map(|ordinal| ordinal.to_string())
        .collect()
}

pub async fn plan_command(goal: &str) -> Result<()> {
    CONFIG.require_gemini_api_key()?;
    let store = SessionStore::from_config();
    let mut session = store.load().await?;
    let mut timer = start_command_timer("plan", Some(goal));

    let progress = Progress::spinner("Creating research plan...");
    if let Err(err) = orchestrator().generate_plan(&mut session, goal).await {
        progress.finish_err("Plan failed");
        return Err(fail(&mut timer, err));
    }
    progress.finish_clear();
    store.save(&session).await?;

    println!("{}\n", session.plan_text.as_deref().unwrap_or_default());
    println!("Tasks (all selected; change with `select`):");
    print_tasks(&session);
    complete_command_timer(&mut timer, "success", Some(format!("tasks={}", session.tasks.len())));
    Ok(())
}

pub async fn tasks_command() -> Result<()> {
    let session = SessionStore::from_config().load().await?;
    if session.phase() == Phase::Idle {
        println!("No plan yet. Start with `plan <goal>`.");
        return Ok(());
    }
    print_tasks(&session);
    Ok(())
}

pub async fn select_command(selection: &[String]) -> Result<()> {
    let store = SessionStore::from_config();
    let mut session = store.load().await?;
    if session.tasks.is_empty() {
        return Err(anyhow!("There are no tasks to select. Run `plan <goal>` first."));
    }

    match selection {
        [only] if only.eq_ignore_ascii_case("all") => session.select_all(),
        [only] if only.eq_ignore_ascii_case("none") => {
            session.set_selection(&[]);
        }
        _ => {
            let ordinals = parse_ordinals(selection);
            if ordinals.is_empty() {
                return Err(anyhow!("Usage: select <ordinals>|all|none"));
            }
            let unknown = session.set_selection(&ordinals);
            if !unknown.is_empty() {
                warn!("Ignoring unknown task numbers: {}", unknown.join(", "));
                eprintln!("Ignoring unknown task numbers: {}", unknown.join(", "));
            }
        }
    }

    store.save(&session).await?;
    print_tasks(&session);
    Ok(())
}

enum Wait {
    Start(Vec<Task>),
    Resume,
}

/// Waits on the research job behind a percentage bar, stopping early on
/// Ctrl-C. The session is saved in every case so the research id survives.
async fn wait_with_progress(
    store: &SessionStore,
    session: &mut ResearchSession,
    timer: &mut CommandTimer,
    wait: Wait,
) -> Result<()> {
    let orchestrator = orchestrator();
    let progress = Progress::percent("Researching");
    let report = |percent: u8| progress.set_percent(percent);

    let outcome = {
        let run = async {
            match &wait {
                Wait::Start(selected) => {
                    orchestrator
                        .start_research(&mut *session, selected, report)
                        .await
                }
                Wait::Resume => orchestrator.resume_research(&mut *session, report).await,
            }
        };
        tokio::select! {
            result = run => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        }
    };
    store.save(session).await?;

    match outcome {
        Some(Ok(())) => {
            progress.finish_ok("Research complete");
            let text = session.research_text.as_deref().unwrap_or_default();
            println!("\n{}", preview(text, TEXT_PREVIEW_LIMIT));
            println!("\nNext: `report` to synthesize an executive report.");
            complete_command_timer(timer, "success", session.research_id.clone());
            Ok(())
        }
        Some(Err(err)) => {
            progress.finish_err("Research did not complete");
            Err(fail(timer, err))
        }
        None => {
            progress.finish_err("Stopped waiting");
            complete_command_timer(timer, "abandoned", session.research_id.clone());
            let id = session.research_id.as_deref().unwrap_or("(not started)");
            println!(
                "Stopped waiting. The research job keeps running remotely.\nResearch ID: {id}\nUse `resume` to keep waiting."
            );
            Ok(())
        }
    }
}

pub async fn research_command(selection: Option<Vec<String>>) -> Result<()> {
    CONFIG.require_gemini_api_key()?;
    let store = SessionStore::from_config();
    let mut session = store.load().await?;
    let mut timer = start_command_timer("research", session.goal.as_deref());

    if let Some(selection) = selection {
        let unknown = session.set_selection(&parse_ordinals(&selection));
        if !unknown.is_empty() {
            eprintln!("Ignoring unknown task numbers: {}", unknown.join(", "));
        }
    }
    let selected = session.selected_tasks();
    info!("Starting research with {} selected tasks", selected.len());

    wait_with_progress(&store, &mut session, &mut timer, Wait::Start(selected)).await
}

pub async fn resume_command() -> Result<()> {
    CONFIG.require_gemini_api_key()?;
    let store = SessionStore::from_config();
    let mut session = store.load().await?;
    let mut timer = start_command_timer("resume", session.research_id.as_deref());

    wait_with_progress(&store, &mut session, &mut timer, Wait::Resume).await
}

pub async fn status_command() -> Result<()> {
    CONFIG.require_gemini_api_key()?;
    let session = SessionStore::from_config().load().await?;
    let mut timer = start_command_timer("status", session.research_id.as_deref());

    let status = orchestrator()
        .research_status(&session)
        .await
        .map_err(|err| fail(&mut timer, err))?;
    println!("Research ID: {}", status.research_id);
    println!("Remote status: {}", status.status);
    if let Some(error) = status.error {
        println!("Remote error: {error}");
    }
    println!("Local phase: {}", session.phase());
    if status.status.is_running() {
        println!("Still running. Use `resume` to wait for it.");
    } else if session.phase() == Phase::Researching {
        println!("Finished remotely. Use `resume` to collect the result.");
    }
    complete_command_timer(&mut timer, "success", Some(status.status.to_string()));
    Ok(())
}

pub async fn report_command(out: Option<PathBuf>) -> Result<()> {
    CONFIG.require_gemini_api_key()?;
    let store = SessionStore::from_config();
    let mut session = store.load().await?;
    let mut timer = start_command_timer("report", session.research_id.as_deref());

    let progress = Progress::spinner("Writing executive report...");
    if let Err(err) = orchestrator().generate_report(&mut session).await {
        progress.finish_err("Report failed");
        return Err(fail(&mut timer, err));
    }
    progress.finish_clear();
    store.save(&session).await?;

    let report = session.report_text.clone().unwrap_or_default();
    println!("{report}");
    if let Some(path) = out {
        write_report(&path, &session, &report).await?;
        println!("\nSaved report to {}", path.display());
    }

    let title = format!(
        "📊 Research report: {}",
        session.goal.as_deref().unwrap_or("untitled")
    );
    send_text_log(&report, Some(&title)).await;
    complete_command_timer(&mut timer, "success", None);
    Ok(())
}

async fn write_report(path: &Path, session: &ResearchSession, report: &str) -> Result<()> {
    let goal = session.goal.as_deref().unwrap_or("Research report");
    let body = format!("# {goal}\n\n{report}\n");
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Could not write {}", path.display()))
}

pub async fn infographic_command(out: Option<PathBuf>) -> Result<()> {
    CONFIG.require_gemini_api_key()?;
    let store = SessionStore::from_config();
    let mut session = store.load().await?;
    if session.report_text.is_none() && session.research_text.is_none() {
        return Err(anyhow!(
            "An infographic needs research findings or a report. Run `research` first."
        ));
    }
    let mut timer = start_command_timer("infographic", session.research_id.as_deref());

    let progress = Progress::spinner("Drawing infographic...");
    if !orchestrator().render_infographic(&mut session).await {
        progress.finish_err("No infographic");
        println!("The model did not return an infographic this time. The report is unaffected; try again later.");
        complete_command_timer(&mut timer, "empty", None);
        return Ok(());
    }
    progress.finish_clear();
    store.save(&session).await?;

    let path = out.unwrap_or_else(|| PathBuf::from(DEFAULT_INFOGRAPHIC_PATH));
    let bytes = session.infographic.as_deref().unwrap_or_default();
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Could not write {}", path.display()))?;
    println!("Saved infographic to {}", path.display());
    complete_command_timer(&mut timer, "success", Some(format!("bytes={}", bytes.len())));
    Ok(())
}

pub async fn show_command() -> Result<()> {
    let session = SessionStore::from_config().load().await?;
    print!("{}", render_session(&session));
    Ok(())
}

pub(crate) fn render_session(session: &ResearchSession) -> String {
    let mut out = String::new();
    out.push_str(&format!("Phase: {}\n", session.phase()));
    if session.phase() == Phase::Idle {
        out.push_str("No research in progress. Start with `plan <goal>`.\n");
        return out;
    }
    if let Some(goal) = &session.goal {
        out.push_str(&format!("Goal: {goal}\n"));
    }
    if let Some(plan_id) = &session.plan_id {
        out.push_str(&format!("Plan ID: {plan_id}\n"));
    }
    if !session.tasks.is_empty() {
        out.push_str("Tasks:\n");
        for task in &session.tasks {
            let mark = if task.selected { "x" } else { " " };
            out.push_str(&format!("  [{mark}] {}. {}\n", task.ordinal, task.description));
        }
    }
    if let Some(research_id) = &session.research_id {
        out.push_str(&format!("Research ID: {research_id}\n"));
    }
    match (&session.research_text, session.phase()) {
        (Some(text), _) => out.push_str(&format!("\n## Research findings\n\n{text}\n")),
        (None, Phase::Researching) => out.push_str("Research has not finished. Use `resume` or `status`.\n"),
        _ => {}
    }
    if let Some(report) = &session.report_text {
        out.push_str(&format!("\n## Executive report\n\n{report}\n"));
    }
    if let Some(image) = &session.infographic {
        out.push_str(&format!("\nInfographic: {} bytes stored\n", image.len()));
    }
    out
}

pub async fn reset_command() -> Result<()> {
    let store = SessionStore::from_config();
    store.clear().await?;
    info!("Research session reset");
    println!("Research session cleared.");
    Ok(())
}
