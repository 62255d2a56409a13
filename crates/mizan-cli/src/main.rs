//! mizan - chat with the mizan question-answering service

mod commands;
mod config;
mod store;
mod utils;

use anyhow::Context;
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mizan_ai::providers::HttpAnswerProvider;
use mizan_engine::{ChatState, ConversationStore, Engine, EngineEvent, SessionIdentity};
use tracing_subscriber::EnvFilter;

use crate::commands::CommandResult;
use crate::store::FileStore;

/// mizan - Islamic Q&A in your terminal
#[derive(Parser, Debug)]
#[command(name = "mizan")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Ask a single question and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Fact-check the text given with -c against this image
    #[arg(long, value_name = "IMAGE")]
    fact_check: Option<PathBuf>,

    /// Chat as a guest even if a token is configured
    #[arg(long)]
    guest: bool,

    /// Auth token (overrides config and MIZAN_AUTH_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Service base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Wait for whole answers instead of streaming
    #[arg(long)]
    no_stream: bool,

    /// Don't ask for thinking notes
    #[arg(long)]
    no_thinking: bool,

    /// Continue a stored conversation by ID
    #[arg(long)]
    resume: Option<String>,

    /// List conversations
    #[arg(long)]
    list: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// What the user asked the engine to send
enum Outgoing {
    Question(String),
    FactCheck { text: String, image: Option<Vec<u8>> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut cfg = config::Config::load();
    let guest = args.guest || cfg.guest.unwrap_or(false);
    let token = if guest {
        None
    } else {
        cfg.auth_token(args.token.as_deref())
    };
    let identity = match token {
        Some(token) => SessionIdentity::authenticated(token),
        None => SessionIdentity::guest(Some(guest_session_id(&mut cfg))),
    };

    let mut engine_config = cfg.engine_config();
    if args.no_stream {
        engine_config.streaming = false;
    }
    if args.no_thinking {
        engine_config.enable_thinking = false;
    }
    let show_thinking = engine_config.enable_thinking;

    // No overall timeout: answers stream for as long as the server writes.
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .build()
        .context("building HTTP client")?;
    let base_url = args.base_url.clone().unwrap_or_else(|| cfg.base_url());
    let provider = Arc::new(HttpAnswerProvider::with_client(client, base_url));
    let store = Arc::new(
        FileStore::open(FileStore::default_path()).context("opening conversation store")?,
    );

    let mut engine = Engine::new(engine_config, provider.clone(), store, identity)
        .with_history(provider);
    let mut printer = Printer::new(show_thinking);

    if args.list {
        return list_conversations(&mut engine).await;
    }

    if let Some(ref id) = args.resume {
        if let Err(e) = engine.load_conversation(id).await {
            eprintln!("Error loading conversation {}: {}", id, e.user_message());
            std::process::exit(1);
        }
        print_history(engine.state());
    }

    if let Some(ref path) = args.fact_check {
        let Some(text) = args.command else {
            anyhow::bail!("--fact-check needs the text to check, passed with -c");
        };
        let image = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let outgoing = Outgoing::FactCheck {
            text,
            image: Some(image),
        };
        if run_send(&mut engine, &mut printer, outgoing).await.is_err() {
            std::process::exit(1);
        }
        return Ok(());
    }

    // Non-interactive mode
    if let Some(command) = args.command {
        if run_send(&mut engine, &mut printer, Outgoing::Question(command))
            .await
            .is_err()
        {
            std::process::exit(1);
        }
        return Ok(());
    }

    run_interactive(&mut engine, &mut printer).await
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("mizan=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// The sticky guest session id, generated and saved on first use
fn guest_session_id(cfg: &mut config::Config) -> String {
    if let Some(ref id) = cfg.guest_session_id {
        return id.clone();
    }
    let id = uuid::Uuid::new_v4().to_string();
    cfg.guest_session_id = Some(id.clone());
    if let Err(e) = cfg.save() {
        tracing::warn!("Couldn't save guest session id: {}", e);
    }
    id
}

/// Renders engine events on the terminal
struct Printer {
    printed: String,
    show_thinking: bool,
}

impl Printer {
    fn new(show_thinking: bool) -> Self {
        Self {
            printed: String::new(),
            show_thinking,
        }
    }

    fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::MessageAdded { message } if !message.is_user_message => {
                self.print_answer(&message.content);
            }
            EngineEvent::MessageUpdated { content, .. } => self.print_answer(&content),
            EngineEvent::ThinkingUpdated { text: Some(text) } if self.show_thinking => {
                eprintln!("[thinking] {}", text);
            }
            EngineEvent::ConversationCreated {
                title,
                is_local_only,
                ..
            } => {
                let scope = if is_local_only { "local" } else { "synced" };
                tracing::info!("New {} conversation: {}", scope, title);
            }
            EngineEvent::AnswerCompleted { message } => {
                if message.content == self.printed {
                    println!();
                } else {
                    // The final answer replaced what was streamed.
                    if !self.printed.is_empty() {
                        println!("\n");
                    }
                    println!("{}", message.content);
                }
                if !message.sources.is_empty() {
                    println!("\nSources:\n{}", utils::format_sources(&message.sources));
                }
                self.printed.clear();
            }
            EngineEvent::Failed { code, message } => {
                if !self.printed.is_empty() {
                    println!();
                }
                eprintln!("Error [{}]: {}", code, message);
                self.printed.clear();
            }
            EngineEvent::SignInRequired => {
                eprintln!("Set a fresh token with MIZAN_AUTH_TOKEN, or run with --guest.");
            }
            _ => {}
        }
    }

    fn print_answer(&mut self, content: &str) {
        if let Some(delta) = content.strip_prefix(self.printed.as_str()) {
            print!("{}", delta);
            io::stdout().flush().ok();
            self.printed = content.to_string();
        }
    }
}

/// Send while rendering events; Ctrl-C cancels the answer in flight
async fn run_send(
    engine: &mut Engine,
    printer: &mut Printer,
    outgoing: Outgoing,
) -> mizan_engine::Result<()> {
    let mut receiver = engine.subscribe();
    let handle = engine.handle();

    let result = {
        let send = async {
            match outgoing {
                Outgoing::Question(text) => engine.send(&text).await,
                Outgoing::FactCheck { text, image } => engine.send_fact_check(&text, image).await,
            }
        };
        tokio::pin!(send);
        loop {
            tokio::select! {
                result = &mut send => break result,
                event = receiver.recv() => {
                    if let Ok(event) = event {
                        printer.handle(event);
                    }
                }
                _ = tokio::signal::ctrl_c() => handle.abort(),
            }
        }
    };

    while let Ok(event) = receiver.try_recv() {
        printer.handle(event);
    }
    if let Err(ref e) = result {
        // Rejected before anything was emitted.
        if matches!(e.kind(), mizan_engine::ErrorKind::Precondition) {
            eprintln!("{}", e.user_message());
        }
    }
    result
}

async fn run_interactive(engine: &mut Engine, printer: &mut Printer) -> anyhow::Result<()> {
    if std::io::IsTerminal::is_terminal(&io::stderr()) {
        let mode = if engine.identity().is_guest() {
            "guest"
        } else {
            "signed in"
        };
        eprintln!("mizan ({}) - /help for commands", mode);
        eprintln!();
    }
    if let Err(e) = engine.refresh_conversations(false).await {
        tracing::warn!("History sync failed: {}", e);
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

        if let Some(command) = commands::parse_command(input) {
            match command {
                CommandResult::Exit => break,
                CommandResult::Message(msg) => println!("{}", msg),
                CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
                CommandResult::New => match engine.start_new_conversation() {
                    Ok(()) => println!("Started a new conversation."),
                    Err(e) => eprintln!("Error: {}", e.user_message()),
                },
                CommandResult::List => list_conversations(engine).await?,
                CommandResult::Open(id) => match engine.load_conversation(&id).await {
                    Ok(()) => print_history(engine.state()),
                    Err(e) => eprintln!("Error: {}", e.user_message()),
                },
                CommandResult::Delete(id) => match engine.delete_conversation(&id).await {
                    Ok(()) => println!("Deleted {}.", id),
                    Err(e) => eprintln!("Error: {}", e.user_message()),
                },
                CommandResult::DeleteAll => match engine.delete_all_conversations().await {
                    Ok(()) => println!("Deleted all conversations."),
                    Err(e) => eprintln!("Error: {}", e.user_message()),
                },
                CommandResult::Sync => sync(engine).await,
                CommandResult::FactCheck { image, text } => {
                    let image = match image.map(std::fs::read).transpose() {
                        Ok(image) => image,
                        Err(e) => {
                            eprintln!("Error reading image: {}", e);
                            continue;
                        }
                    };
                    println!();
                    let _ = run_send(engine, printer, Outgoing::FactCheck { text, image }).await;
                }
            }
            println!();
            continue;
        }

        println!();
        let _ = run_send(engine, printer, Outgoing::Question(input.to_string())).await;
        println!();
    }

    Ok(())
}

async fn sync(engine: &mut Engine) {
    match engine.refresh_conversations(true).await {
        Ok(true) => println!("Conversation list refreshed."),
        Ok(false) => println!("Nothing to sync for guests."),
        Err(e) => eprintln!("Error: {}", e.user_message()),
    }
    if let Some(id) = engine.state().conversation_id.clone() {
        if let Err(e) = engine.refresh_messages(&id, true).await {
            eprintln!("Error: {}", e.user_message());
        }
    }
}

async fn list_conversations(engine: &mut Engine) -> anyhow::Result<()> {
    if let Err(e) = engine.refresh_conversations(false).await {
        eprintln!("Showing stored conversations ({})", e.user_message());
    }
    let conversations = engine.store().fetch_conversations().await?;
    if conversations.is_empty() {
        println!("No conversations yet.");
        println!("Conversations are stored in: {}", FileStore::default_path().display());
        return Ok(());
    }

    println!("{:<38} {:<17} {:<5} Title", "ID", "Updated", "Msgs");
    println!("{}", "-".repeat(90));
    for c in conversations {
        let marker = if c.is_local_only { "*" } else { " " };
        println!(
            "{:<38} {:<17} {:<5}{}{}",
            c.id,
            c.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            c.messages.len(),
            marker,
            utils::preview(&c.title, 40)
        );
    }
    println!("\n* local only. Continue with: mizan --resume <id>");
    Ok(())
}

fn print_history(state: &ChatState) {
    for message in &state.messages {
        if message.is_user_message {
            println!("> {}", message.content);
        } else {
            println!("{}\n", message.content);
        }
    }
}
