use anyhow::Result;
use clap::{Parser, Subcommand};
use confab_cli::config::Config;
use confab_cli::core::{ChatClient, ClientState, ModelSwitcher, Role};
use confab_cli::protocol::{AuthContext, ChatService, SessionService};
use confab_cli::responder::{create_responder, Responder};
use confab_cli::store::{FileStore, MessageStore};
use confab_cli::transport;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "confab")]
#[command(author, version, about = "Confab - chat client with optimistic reconciliation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server for the chat mutation protocol
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Data directory for the message store (default: platform data dir)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Interactive chat against an in-process service
    Chat {
        /// Initial message to send
        message: Option<String>,

        /// Model tag to chat on (defaults to config)
        #[arg(short, long)]
        model: Option<String>,

        /// Responder backend (echo, openai)
        #[arg(short, long)]
        responder: Option<String>,

        /// Caller identity
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Data directory for the message store
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// List chat sessions
    Sessions {
        /// Filter by model tag
        #[arg(short, long)]
        model: Option<String>,

        /// Caller identity
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Data directory for the message store
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "confab_cli=debug"
    } else {
        "confab_cli=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load().unwrap_or_default();

    match cli.command {
        Commands::Serve {
            port,
            host,
            data_dir,
        } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let (chat, sessions, _) = build_services(&config, data_dir)?;
            tracing::info!("Starting HTTP server on {}:{}", host, port);
            transport::http::run_http_server(&host, port, chat, sessions).await?;
        }
        Commands::Chat {
            message,
            model,
            responder,
            user,
            data_dir,
        } => {
            let model = model.unwrap_or_else(|| config.responder.default_model.clone());
            let backend = responder.unwrap_or_else(|| config.responder.backend.clone());
            run_chat(&config, data_dir, &model, &backend, &user, message).await?;
        }
        Commands::Sessions {
            model,
            user,
            data_dir,
        } => {
            let (_, sessions, _) = build_services(&config, data_dir)?;
            let ctx = AuthContext::new(&user);
            for session in sessions.list_sessions(&ctx, model.as_deref(), 50)? {
                println!(
                    "{}  {}  [{}]  updated {}",
                    session.id, session.title, session.model_tag, session.updated_at
                );
            }
        }
    }

    Ok(())
}

fn build_services(
    config: &Config,
    data_dir: Option<PathBuf>,
) -> Result<(Arc<ChatService>, Arc<SessionService>, PathBuf)> {
    let data_dir = match data_dir {
        Some(dir) => dir,
        None => Config::data_dir()?,
    };
    let store: Arc<dyn MessageStore> = Arc::new(FileStore::new(&data_dir)?);

    let responder: Option<Arc<dyn Responder>> = match create_responder(&config.responder.backend) {
        Ok(responder) => Some(responder),
        Err(err) => {
            tracing::warn!("Responder unavailable, replies will echo: {}", err);
            None
        }
    };

    let chat = Arc::new(ChatService::new(store.clone(), responder));
    let sessions = Arc::new(SessionService::new(store));
    Ok((chat, sessions, data_dir))
}

async fn run_chat(
    config: &Config,
    data_dir: Option<PathBuf>,
    model: &str,
    backend: &str,
    user: &str,
    initial_message: Option<String>,
) -> Result<()> {
    let data_dir = match data_dir {
        Some(dir) => dir,
        None => Config::data_dir()?,
    };
    let store: Arc<dyn MessageStore> = Arc::new(FileStore::new(&data_dir)?);
    let responder: Option<Arc<dyn Responder>> = match create_responder(backend) {
        Ok(responder) => Some(responder),
        Err(err) => {
            tracing::warn!("Responder unavailable, replies will echo: {}", err);
            None
        }
    };
    let chat = Arc::new(ChatService::new(store.clone(), responder));
    let sessions = Arc::new(SessionService::new(store));

    let state = Arc::new(Mutex::new(ClientState::load(&data_dir)));
    {
        let mut state = state.lock().expect("client state poisoned");
        state.set_selected_model(model);
    }

    let mut client = ChatClient::new(
        chat,
        sessions,
        AuthContext::new(user),
        Arc::clone(&state),
    );
    client.activate().await?;
    if client.state().lock().expect("client state poisoned").current_session(None).is_none() {
        client.new_session(None).await?;
    }

    for msg in client.messages() {
        print_message(msg);
    }

    if let Some(message) = initial_message {
        client.send(&message).await?;
        print_turn(&client);
        persist_state(&state, &data_dir);
        return Ok(());
    }

    println!("Chatting on {} (/model <tag> to switch, ctrl-d or /quit to exit)", model);
    let mut switcher = ModelSwitcher::new(
        Arc::clone(&state),
        std::time::Duration::from_millis(config.client.model_switch_debounce_ms),
    );
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Some(tag) = line.strip_prefix("/model ") {
            let tag = tag.trim();
            if tag.is_empty() {
                eprintln!("usage: /model <tag>");
                continue;
            }
            let _ = switcher.switch_to(tag).await;
            client.activate().await?;
            if client
                .state()
                .lock()
                .expect("client state poisoned")
                .current_session(None)
                .is_none()
            {
                client.new_session(None).await?;
            }
            println!("Now chatting on {}", tag);
            for msg in client.messages() {
                print_message(msg);
            }
            continue;
        }
        if let Err(err) = client.send(line).await {
            eprintln!("send failed: {}", err);
            continue;
        }
        print_turn(&client);
    }

    persist_state(&state, &data_dir);
    Ok(())
}

fn print_turn(client: &ChatClient) {
    let messages = client.messages();
    let start = messages.len().saturating_sub(2);
    for msg in &messages[start..] {
        print_message(msg);
    }
}

fn print_message(msg: &confab_cli::core::Message) {
    let label = match msg.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    println!("[{}] {}", label, msg.content);
}

fn persist_state(state: &Arc<Mutex<ClientState>>, data_dir: &std::path::Path) {
    let state = state.lock().expect("client state poisoned");
    if let Err(err) = state.save(data_dir) {
        tracing::warn!("Could not persist client state: {}", err);
    }
}
