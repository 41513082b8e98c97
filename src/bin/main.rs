use credit_pack_orchestrator::{
    models::{OrchestratorResponse, UploadedFile},
    Orchestrator, OrchestratorConfig,
};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const HELP: &str = "Commands:
  /upload <path>            attach a file to your next message
  /steps                    list recorded steps
  /replay <n> [instruction] re-run step n, discarding later steps
  /quit                     exit
Anything else is sent to the orchestrator.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr so the conversation on stdout stays readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = OrchestratorConfig::from_env()?;
    if !config.has_api_key() {
        warn!("GEMINI_API_KEY not set in .env, model calls will fail");
    }

    info!(model = %config.agent_model, "Credit Pack Orchestrator starting");
    let mut orchestrator = Orchestrator::from_config(config);

    println!("Credit Pack Orchestrator\n{}\n", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_files = Vec::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(path) = line.strip_prefix("/upload ") {
            match tokio::fs::read_to_string(path.trim()).await {
                Ok(content) => {
                    let name = Path::new(path.trim())
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.trim().to_string());
                    println!("📎 {} attached ({} chars)", name, content.len());
                    pending_files.push(UploadedFile::new(name, content));
                }
                Err(e) => println!("❌ Could not read {}: {}", path.trim(), e),
            }
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{}", HELP);
                continue;
            }
            "/steps" => {
                for step in orchestrator.get_step_history() {
                    println!("{}. {}: {}", step.step_index, step.label, step.response_preview);
                }
                continue;
            }
            _ => {}
        }

        let response = if let Some(args) = line.strip_prefix("/replay ") {
            let (index, instruction) = args.trim().split_once(' ').unwrap_or((args.trim(), ""));
            match index.parse::<usize>() {
                Ok(index) => orchestrator.replay_from_step(index, instruction).await,
                Err(_) => {
                    println!("❌ Step number expected, got {:?}", index);
                    continue;
                }
            }
        } else {
            let files = std::mem::take(&mut pending_files);
            orchestrator.process_message(line, files).await
        };

        print_response(&response);
    }

    Ok(())
}

fn print_response(response: &OrchestratorResponse) {
    println!("\n[{}]", response.intent);
    for step in &response.thinking {
        println!("  · {}", step);
    }
    println!("\n{}\n", response.response);
    if let Some(suggestion) = &response.next_suggestion {
        println!("➡️  {}", suggestion);
    }
    if response.requires_approval {
        println!("(awaiting your approval)");
    }
    if let Some(step) = response.step_index {
        println!("(recorded as step {})", step);
    }
    println!();
}
