//! `palaver chat`: one single-shot turn against a fresh session.

use console::style;
use uuid::Uuid;

use palaver_core::chat::turn::ChatRequest;

use crate::state::AppState;

/// Open a session with `agent_id`, send `message`, and print the reply.
pub async fn run_chat(
    state: &AppState,
    agent_id: Uuid,
    caller_id: &str,
    model_id: Option<String>,
    message: String,
) -> anyhow::Result<()> {
    let session = state.engine.create_session(agent_id, caller_id).await?;

    let mut request = ChatRequest::new(session.id, message);
    request.model_id = model_id;

    let reply = state.engine.chat_sync(request, caller_id).await?;

    println!();
    println!("{}", reply.content);
    println!();
    println!(
        "  {} session {}",
        style("·").dim(),
        style(session.id).dim()
    );
    Ok(())
}
