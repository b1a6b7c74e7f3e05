//! tern - streaming LLM agent CLI

mod config;
mod session;
mod tools;
mod utils;

use async_trait::async_trait;
use clap::Parser;
use std::io::{self, IsTerminal, Write};
use tern_agent::{Agent, AgentCallbacks, AgentConfig, TurnCompletion, TurnOutcome};
use tern_ai::{ProviderConfig, ProviderRegistry};
use tracing_subscriber::EnvFilter;

use config::Config;
use session::{Session, SessionStore};

/// tern - streaming LLM agent
#[derive(Parser, Debug)]
#[command(name = "tern")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Provider (anthropic, openai, groq, openrouter, ollama)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model to use (default depends on the provider)
    #[arg(short, long)]
    model: Option<String>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Resume a previous session by ID
    #[arg(long)]
    resume: Option<String>,

    /// List saved sessions
    #[arg(long)]
    sessions: bool,

    /// Run dangerous tools without asking
    #[arg(short = 'y', long)]
    yes: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// Terminal rendering and confirmation prompts
struct CliCallbacks {
    auto_approve: bool,
}

#[async_trait]
impl AgentCallbacks for CliCallbacks {
    async fn on_text(&self, text: &str) {
        print!("{}", text);
        let _ = io::stdout().flush();
    }

    async fn on_tool_call(&self, name: &str, input: &serde_json::Value) {
        let preview = utils::truncate_chars(&input.to_string(), 120);
        println!("\n[Running {} {}]", name, preview);
    }

    async fn on_tool_result(&self, name: &str, result: &str, is_error: bool) {
        let preview = utils::truncate_chars(result, 200);
        if is_error {
            println!("[{} failed: {}]", name, preview);
        } else {
            println!("[{}: {}]", name, preview);
        }
    }

    async fn on_context_truncation(&self, dropped: usize) {
        println!("[Context trimmed: {} older messages left out]", dropped);
    }

    async fn confirm_tool(&self, name: &str, input: &serde_json::Value) -> bool {
        if self.auto_approve {
            return true;
        }
        println!(
            "\nAllow {} {}? [y/N] ",
            name,
            utils::truncate_chars(&input.to_string(), 200)
        );
        let _ = io::stdout().flush();

        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;

        matches!(answer, Ok(Ok(line)) if matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so they never mix with streamed output
    let filter = if args.verbose {
        EnvFilter::new("tern=debug,tern_ai=debug,tern_agent=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if args.init_config {
        let path = Config::init()?;
        println!("Config file at: {}", path.display());
        return Ok(());
    }

    let store = SessionStore::new(SessionStore::default_dir());

    if args.sessions {
        return list_sessions(&store);
    }

    let cfg = Config::load();

    // CLI args take precedence over the config file
    let provider_name = args
        .provider
        .or(cfg.provider.clone())
        .unwrap_or_else(|| "anthropic".to_string());
    let model = args
        .model
        .or(cfg.model.clone())
        .unwrap_or_else(|| config::default_model(&provider_name).to_string());

    let registry = ProviderRegistry::builtin();
    let provider = registry.get(&provider_name).map_err(|e| {
        anyhow::anyhow!("{} (available: {})", e, registry.names().join(", "))
    })?;

    let mut provider_config = ProviderConfig::new(&model);
    provider_config.api_key = cfg.api_key(&provider_name);
    provider_config.base_url = cfg.base_url.clone();
    if let Some(max_tokens) = cfg.max_tokens {
        provider_config.max_tokens = max_tokens;
    }

    if provider_config.api_key.is_none() {
        if let Some(var) = provider.api_key_env_var() {
            if std::env::var(var).map(|v| v.is_empty()).unwrap_or(true) {
                tracing::warn!(
                    "No API key for {}: set {} or add it to the config file (tern --init-config)",
                    provider_name,
                    var
                );
            }
        }
    }

    let mut agent_config = AgentConfig::new(provider_config);
    agent_config.context = cfg.context.clone();
    if let Some(max_iterations) = cfg.max_iterations {
        agent_config.max_iterations = max_iterations;
    }

    let mut agent = Agent::new(agent_config, provider, tools::builtin());
    let system_prompt = match cfg.system_prompt()? {
        Some(prompt) => prompt,
        None => build_system_prompt(&agent.tool_names()),
    };
    agent.set_system_prompt(system_prompt);

    let mut session = match args.resume {
        Some(ref id) => {
            let session = store.load(id)?;
            println!(
                "Resuming session {} ({} messages)",
                session.short_id(),
                session.state.messages.len()
            );
            // The current system prompt wins over the saved one
            let mut state = session.state.clone();
            state.system_prompt = agent.state().system_prompt.clone();
            agent.restore(state);
            session
        }
        None => Session::new(&provider_name, &model),
    };

    let callbacks = CliCallbacks {
        auto_approve: args.yes,
    };

    if let Some(command) = args.command {
        let result = agent.run_turn(command, &callbacks).await;
        save_session(&store, &mut session, &agent);
        let outcome = result?;
        print_outcome(&outcome);
        return Ok(());
    }

    run_interactive(&mut agent, &callbacks, &store, &mut session).await
}

async fn run_interactive(
    agent: &mut Agent,
    callbacks: &CliCallbacks,
    store: &SessionStore,
    session: &mut Session,
) -> anyhow::Result<()> {
    if io::stderr().is_terminal() {
        eprintln!(
            "tern ({}) session: {}",
            session.model,
            session.short_id()
        );
        eprintln!("Type /clear to reset the conversation, /exit to quit.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/exit" | "/quit" => break,
            "/clear" => {
                agent.clear();
                save_session(store, session, agent);
                println!("Cleared conversation.");
                continue;
            }
            _ => {}
        }

        let result = agent.run_turn(input, callbacks).await;
        save_session(store, session, agent);
        match result {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => eprintln!("\nError: {}", e),
        }
    }

    Ok(())
}

fn save_session(store: &SessionStore, session: &mut Session, agent: &Agent) {
    session.state = agent.state().clone();
    if let Err(e) = store.save(session) {
        tracing::warn!("Failed to save session {}: {}", session.id, e);
    }
}

fn print_outcome(outcome: &TurnOutcome) {
    println!();
    if outcome.completion == TurnCompletion::IterationLimit {
        println!(
            "[Stopped after {} model calls; send another message to continue]",
            outcome.iterations
        );
    }
    println!(
        "[Tokens: {} in, {} out]",
        outcome.usage.input_tokens, outcome.usage.output_tokens
    );
}

fn list_sessions(store: &SessionStore) -> anyhow::Result<()> {
    let sessions = store.list()?;
    if sessions.is_empty() {
        println!("No saved sessions found.");
        println!("Sessions are stored in: {}", store.dir().display());
        return Ok(());
    }

    println!("Saved sessions:\n");
    println!(
        "{:<38} {:<20} {:<28} {:<6} Working Dir",
        "ID", "Updated", "Model", "Msgs"
    );
    println!("{}", "-".repeat(110));
    for s in sessions {
        println!(
            "{:<38} {:<20} {:<28} {:<6} {}",
            s.id,
            s.updated_at_display(),
            s.model,
            s.message_count,
            s.working_dir
        );
    }
    println!("\nResume with: tern --resume <session-id>");
    Ok(())
}

/// Build the default system prompt from the registered tools
fn build_system_prompt(tool_names: &[&str]) -> String {
    let mut prompt = String::from(
        "You are tern, a coding assistant running in the user's terminal. \
         Be concise and prefer doing over describing.",
    );

    let mut guidelines = Vec::new();
    if tool_names.contains(&"read_file") {
        guidelines.push("Read files before changing them.");
    }
    if tool_names.contains(&"write_file") {
        guidelines.push("write_file replaces the whole file; include the complete new contents.");
    }
    if tool_names.contains(&"execute_command") {
        guidelines.push("Use execute_command for builds, tests and searches.");
    }

    if !tool_names.is_empty() {
        prompt.push_str(&format!("\n\nAvailable tools: {}.", tool_names.join(", ")));
    }
    for line in guidelines {
        prompt.push_str("\n- ");
        prompt.push_str(line);
    }

    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_string());
    prompt.push_str(&format!("\n\nWorking directory: {}", cwd));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["tern", "-p", "groq", "-c", "hi", "--yes"]);
        assert_eq!(args.provider.as_deref(), Some("groq"));
        assert_eq!(args.command.as_deref(), Some("hi"));
        assert!(args.yes);
        assert!(!args.sessions);
    }

    #[test]
    fn test_system_prompt_lists_tools() {
        let prompt = build_system_prompt(&["read_file", "execute_command"]);
        assert!(prompt.contains("Available tools: read_file, execute_command."));
        assert!(prompt.contains("Read files before changing them."));
        assert!(!prompt.contains("write_file"));
    }

    #[tokio::test]
    async fn test_auto_approve_skips_prompt() {
        let callbacks = CliCallbacks { auto_approve: true };
        assert!(
            callbacks
                .confirm_tool("execute_command", &serde_json::json!({"command": "ls"}))
                .await
        );
    }
}
