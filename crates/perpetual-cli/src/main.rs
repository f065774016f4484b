//! perpetual - persistent streaming chat client

mod api;
mod chat;
mod config;
mod storage;

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;

use api::ChatClient;
use chat::{ChatSession, TurnOutcome};
use config::Params;
use perpetual_core::Role;
use storage::{BACKUP_FILE_NAME, Store};

/// perpetual - a chat client that keeps one conversation forever
#[derive(Parser, Debug)]
#[command(name = "perpetual")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Path to the session state file
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Export a backup of the session to PATH and exit
    #[arg(long, value_name = "PATH")]
    export: Option<PathBuf>,

    /// Import a backup from PATH, replacing the session, and exit
    #[arg(long, value_name = "PATH")]
    import: Option<PathBuf>,

    /// Discard the stored session and exit
    #[arg(long)]
    reset: bool,

    /// Print an example config file and exit
    #[arg(long)]
    print_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("perpetual=debug")
            .init();
    }

    if args.print_config {
        println!("# {}", Params::config_path().display());
        print!("{}", config::example_config());
        return Ok(());
    }

    let mut params = Params::load();
    if let Some(model) = args.model {
        params.model = model;
    }

    let store = Store::new(args.state_file.unwrap_or_else(Store::default_path));

    if args.reset {
        store.save(&Default::default());
        println!("Session cleared.");
        return Ok(());
    }

    if let Some(path) = args.import {
        let state = store.import(&path)?;
        let count = state.messages.len();
        store.save(&state);
        println!("Imported {} message(s) from {}", count, path.display());
        return Ok(());
    }

    let mut state = store.load();

    if let Some(path) = args.export {
        store.export(&state, &params.model, &path)?;
        println!("Exported session to {}", path.display());
        return Ok(());
    }

    // First run: ask for the credential before anything else.
    if state.api_key.is_empty() {
        state.api_key = prompt_line("API key: ")?;
        if state.api_key.is_empty() {
            anyhow::bail!("an API key is required");
        }
        store.save(&state);
    }

    let client = ChatClient::new(state.api_key.clone());
    let mut session = ChatSession::new(state, params, store, client);

    eprintln!("perpetual ({})", session.model());
    if !session.state().messages.is_empty() {
        eprintln!("{} message(s) in history", session.state().messages.len());
    }
    eprintln!("Type /help for commands.");
    eprintln!();

    run_interactive(&mut session).await
}

async fn run_interactive(session: &mut ChatSession<ChatClient>) -> anyhow::Result<()> {
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

        if let Some(command) = input.strip_prefix('/') {
            if handle_command(command, session)? {
                break;
            }
            continue;
        }

        let outcome = session
            .send(input, |delta| {
                print!("{delta}");
                io::stdout().flush().ok();
            })
            .await;

        match outcome {
            TurnOutcome::Completed => println!("\n"),
            TurnOutcome::Rejected => {}
            TurnOutcome::Failed(reason) => {
                println!();
                eprintln!("Error: {reason}");
            }
        }
    }

    Ok(())
}

/// Execute a slash command; returns true when the loop should exit
fn handle_command(command: &str, session: &mut ChatSession<ChatClient>) -> anyhow::Result<bool> {
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .unwrap_or((command, ""));

    match name {
        "exit" | "quit" => return Ok(true),
        "clear" => {
            session.clear_messages();
            println!("Cleared conversation.");
        }
        "system" => {
            if rest.trim().is_empty() {
                println!("System prompt: {:?}", session.state().system_prompt);
            } else {
                session.set_system_prompt(rest.trim());
                println!("System prompt updated.");
            }
        }
        "export" => {
            let path = if rest.trim().is_empty() {
                PathBuf::from(BACKUP_FILE_NAME)
            } else {
                PathBuf::from(rest.trim())
            };
            match session.export(&path) {
                Ok(()) => println!("Exported session to {}", path.display()),
                Err(e) => eprintln!("Export failed: {e}"),
            }
        }
        "history" => {
            for message in &session.state().messages {
                let tag = match message.role {
                    Role::User => "you",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                };
                let preview: String = message.content.chars().take(80).collect();
                println!("[{tag}] {}", preview.replace('\n', " "));
            }
        }
        "help" => {
            println!("Commands:");
            println!("  /system [text]  show or set the system prompt");
            println!("  /history        list conversation messages");
            println!("  /export [path]  write a backup document");
            println!("  /clear          drop all history");
            println!("  /exit           quit");
        }
        _ => {
            println!("Unknown command: /{name}");
            println!("Type /help for available commands.");
        }
    }

    Ok(false)
}

fn prompt_line(prompt: &str) -> anyhow::Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
