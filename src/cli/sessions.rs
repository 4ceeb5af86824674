use anyhow::{anyhow, Result};

use super::args::{SessionsCliArgs, SessionsCommand};
use crate::app::Components;
use crate::session::{ApprovalSession, SessionSummary, TaskStatus};

pub fn handle_sessions_command(components: &Components, args: SessionsCliArgs) -> Result<()> {
    match args.command {
        SessionsCommand::List { limit } => {
            let sessions = components.sessions.list_sessions(Some(limit))?;
            if sessions.is_empty() {
                println!("No approval sessions yet.");
                return Ok(());
            }

            println!("Found {} session(s):\n", sessions.len());
            for session in &sessions {
                print_summary(&SessionSummary::from(session));
            }
            println!("\nTo see the tasks of a session, use: meetbridge sessions show <ID>");
        }
        SessionsCommand::Show { session_id } => {
            let session = components.sessions.get_session(&session_id)?;
            print_session(&session);
        }
        SessionsCommand::Latest => {
            let session = components
                .sessions
                .get_latest_session()?
                .ok_or_else(|| anyhow!("No approval sessions yet"))?;
            print_session(&session);
        }
    }
    Ok(())
}

fn print_summary(summary: &SessionSummary) {
    println!("ID: {}", summary.session_id);
    println!("Meeting: {} ({})", summary.meeting_title, summary.meeting_id);
    println!("Created: {}", summary.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!(
        "Tasks: {} posted, {} approved, {} committed{}",
        summary.posted,
        summary.approved,
        summary.committed,
        if summary.complete { " (complete)" } else { "" }
    );
    println!("---");
}

pub fn print_session(session: &ApprovalSession) {
    print_summary(&SessionSummary::from(session));
    println!("Channel: {}", session.channel_ref);

    for status in [TaskStatus::Posted, TaskStatus::Approved, TaskStatus::Committed] {
        for task in session.tasks_with_status(status) {
            print!("[{}] {} ({})", task.status, task.title, task.priority);
            if let Some(due_at) = task.due_at {
                print!(" due {}", due_at.format("%Y-%m-%d"));
            }
            println!();
            println!("    draft: {}  message: {}", task.board_draft_id, task.message_ref);
            if let Some(count) = task.approval_count {
                println!("    approvals: {}", count);
            }
            if let Some(id) = &task.committed_task_id {
                println!("    board task: {}", id);
            }
        }
    }
}
