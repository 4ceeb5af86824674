use anyhow::{Context, Result};

pub mod args;
pub mod sessions;

pub use args::{
    Cli, CliCommand, PollCliArgs, ProcessCliArgs, SessionsCliArgs, SessionsCommand,
};
pub use sessions::handle_sessions_command;

use crate::app::Components;
use crate::approval::PollReport;
use crate::ingress::{MeetingRequest, ProcessingOutcome, Refusal};

pub async fn handle_process_command(components: &Components, args: ProcessCliArgs) -> Result<()> {
    let mut request = MeetingRequest::new(&args.meeting_id);
    request.title = args.title;
    if let Some(path) = &args.transcript_file {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read transcript file {:?}", path))?;
        request.content = Some(content);
    }

    let admission = components.ingress.admit(request).await?;

    match (admission.refusal, admission.outcome) {
        (Some(Refusal::AlreadyProcessed), _) => {
            println!("Meeting {} was already processed.", args.meeting_id);
        }
        (Some(Refusal::InFlight), _) => {
            println!("Meeting {} is being processed right now.", args.meeting_id);
        }
        (None, Some(ProcessingOutcome::SessionOpened { session_id, posted, failed })) => {
            println!("Opened session {}", session_id);
            println!("Posted {} task(s) for approval", posted);
            if failed > 0 {
                println!("{} task(s) could not be posted; see the log for details", failed);
            }
        }
        (None, Some(ProcessingOutcome::NoTasks)) => {
            println!("No tasks found in meeting {}.", args.meeting_id);
        }
        (None, Some(ProcessingOutcome::Failed { reason })) => {
            println!("Processing meeting {} failed: {}", args.meeting_id, reason);
            println!("The meeting is marked as processed and will not be retried.");
        }
        (None, None) => {}
    }

    Ok(())
}

pub async fn handle_poll_command(components: &Components, args: PollCliArgs) -> Result<()> {
    if args.all {
        let reports = components.poller.poll_open_sessions().await?;
        if reports.is_empty() {
            println!("No open sessions.");
        }
        for report in &reports {
            print_report(report);
        }
        return Ok(());
    }

    match components.poller.poll_session(args.session.as_deref()).await? {
        Some(report) => print_report(&report),
        None => println!("No approval sessions yet."),
    }
    Ok(())
}

fn print_report(report: &PollReport) {
    println!("Session {}", report.session_id);
    println!("  Newly approved: {}", report.newly_approved.len());
    for task in &report.committed {
        println!(
            "  Committed: {} -> board task {}",
            task.title, task.committed_task_id
        );
    }
    println!("  Awaiting approval: {}", report.awaiting_approval);
    println!("  Awaiting commit: {}", report.awaiting_commit);
    if report.failures > 0 {
        println!("  Failures (retried next poll): {}", report.failures);
    }
    if report.complete {
        println!("  All tasks committed.");
    }
}
