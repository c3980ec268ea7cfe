//! Hive - 对话轮次编排引擎演示 REPL
//!
//! 命令：exit | summary | suggest | branch <message_id> | list threads | switch <thread_id> |
//! delete thread <thread_id> | history；其它输入作为一轮对话发送。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hive::config::load_config;
use hive::memory::UserInfo;
use hive::observability;
use hive::{HiveBuilder, TurnOrchestrator};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    let assistant = config.app.name.clone();
    let orchestrator = Arc::new(
        HiveBuilder::new(config)
            .build()
            .context("Failed to build orchestrator")?,
    );

    let username = std::env::var("USER").unwrap_or_else(|_| "user".to_string());
    let user_info = UserInfo::new(username);
    let mut thread_id: Option<String> = None;

    println!("{} ready. Type 'exit' to quit.", assistant);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" {
            break;
        }
        if let Err(e) = handle_line(&orchestrator, input, &mut thread_id, &user_info).await {
            println!("Error: {e}");
        }
    }
    Ok(())
}

async fn handle_line(
    orchestrator: &Arc<TurnOrchestrator>,
    input: &str,
    thread_id: &mut Option<String>,
    user_info: &UserInfo,
) -> anyhow::Result<()> {
    match input {
        "summary" => {
            let id = current(thread_id)?;
            println!("Summary: {}", orchestrator.summarize_thread(id).await?);
        }
        "suggest" => {
            for suggestion in orchestrator.suggest_next_action(current(thread_id)?).await? {
                println!("- {suggestion}");
            }
        }
        "list threads" => {
            for t in orchestrator.list_threads().await? {
                let marker = if thread_id.as_deref() == Some(t.id.as_str()) { "*" } else { " " };
                println!(
                    "{} {} [{} turns, updated {}] {}",
                    marker,
                    t.id,
                    t.interaction_count,
                    t.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    t.summary
                );
            }
        }
        "history" => {
            let thread = orchestrator.get_thread(current(thread_id)?).await?;
            for m in thread.messages() {
                println!("{} {:>9}: {}", m.id, m.role.as_str(), m.content);
            }
        }
        _ => {
            if let Some(message_id) = input.strip_prefix("branch ") {
                let new_id = orchestrator
                    .branch(current(thread_id)?, message_id.trim())
                    .await?;
                println!("Branched into {new_id}");
                *thread_id = Some(new_id);
            } else if let Some(id) = input.strip_prefix("switch ") {
                let thread = orchestrator.get_thread(id.trim()).await?;
                println!("Switched to {} ({})", thread.id, thread.summary);
                *thread_id = Some(thread.id);
            } else if let Some(id) = input.strip_prefix("delete thread ") {
                let id = id.trim();
                orchestrator.delete_thread(id).await?;
                if thread_id.as_deref() == Some(id) {
                    *thread_id = None;
                }
                println!("Deleted {id}");
            } else {
                let outcome = orchestrator
                    .spawn_turn(thread_id.clone(), input.to_string(), Some(user_info.clone()))
                    .await?;
                if !outcome.capability_log.is_empty() {
                    println!("{}", outcome.capability_log);
                }
                println!("{}", outcome.assistant_text);
                *thread_id = Some(outcome.thread_id);
            }
        }
    }
    Ok(())
}

fn current(thread_id: &Option<String>) -> anyhow::Result<&str> {
    thread_id
        .as_deref()
        .context("No active thread yet; say something first")
}
