use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use forkchat::config::{AppConfig, APP_NAME, VERSION};
use forkchat::models::{LlmModel, Role};
use forkchat::providers::OpenRouterProvider;
use forkchat::services::export::export_to_markdown;
use forkchat::services::presenter::{render_items, RenderItem};
use forkchat::services::{
    BranchStep, ChatSession, CredentialProvider, KeyValueStore, SessionError, SqliteStore,
    StoredCredentials,
};

const HELP: &str = "\
Commands:
  <text>              send a message
  /rooms              list rooms
  /new [model-id]     open a new room
  /room <n>           switch to room n
  /rm <n>             delete room n
  /rename <name>      rename the current room
  /models [query]     list or search models
  /model <model-id>   use a model in the current room
  /edit <n> <text>    edit message n as a new branch
  /next <n>, /prev <n>  switch branch of message n
  /show               print the visible conversation
  /export <file>      save the visible conversation as Markdown
  /key <api-key>      store the OpenRouter API key
  /credits            show account balance
  /stream on|off      toggle streamed replies
  /quit

Ctrl-C stops a reply in progress; at the prompt it quits.";

enum Outgoing<'a> {
    Message(&'a str),
    Edit { id: String, text: &'a str },
}

/// Token of the reply being generated, if any.
type Generation = Arc<Mutex<Option<CancellationToken>>>;

struct Cli {
    session: ChatSession,
    provider: Arc<OpenRouterProvider>,
    credentials: StoredCredentials,
    generation: Generation,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&config.db_path)?);
    let provider = Arc::new(OpenRouterProvider::new(&config.api_base)?);
    let credentials = StoredCredentials::new(store.clone());

    let mut session = ChatSession::load(
        store.clone(),
        provider.clone(),
        Arc::new(credentials.clone()),
    )
    .await
    .context("Failed to load conversations")?;

    if let Err(e) = session.refresh_catalog(provider.as_ref()).await {
        println!("Model list unavailable: {}", e);
    }
    if let Some(first) = session.rooms().first().map(|r| r.id.clone()) {
        session.switch_room(&first)?;
    }

    println!("{} {} (type /help for commands)", APP_NAME, VERSION);
    let generation = Generation::default();
    let shutdown = CancellationToken::new();
    watch_interrupts(generation.clone(), shutdown.clone());

    let mut cli = Cli {
        session,
        provider,
        credentials,
        generation,
    };
    if cli.credentials.api_key().await?.is_none() {
        println!("No API key stored yet. Set one with /key <api-key>.");
    }
    cli.print_path();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match cli.handle(line).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => report(e),
        }
    }

    Ok(())
}

impl Cli {
    /// Run one input line. Returns `true` when the user asked to quit.
    async fn handle(&mut self, line: &str) -> Result<bool, SessionError> {
        let Some(command) = line.strip_prefix('/') else {
            self.send(Outgoing::Message(line)).await?;
            return Ok(false);
        };

        let (name, arg) = match command.split_once(' ') {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };

        match name {
            "help" => println!("{}", HELP),
            "quit" | "exit" => return Ok(true),
            "rooms" => self.print_rooms(),
            "new" => {
                let model = (!arg.is_empty()).then(|| self.model_by_id(arg));
                self.session.create_room(model).await?;
                self.print_rooms();
            }
            "room" => {
                let id = self.room_id(arg)?;
                self.session.switch_room(&id)?;
                self.print_path();
            }
            "rm" => {
                let id = self.room_id(arg)?;
                self.session.remove_room(&id).await?;
                self.print_rooms();
                self.print_path();
            }
            "rename" => {
                let id = self
                    .session
                    .selection()
                    .room_id
                    .clone()
                    .ok_or(SessionError::Validation("No active room"))?;
                self.session.rename_room(&id, arg).await?;
            }
            "models" => {
                for model in self.session.search_models(arg) {
                    println!("{:<48} {}", model.id, model.name);
                }
            }
            "model" if arg.is_empty() => self.print_rooms(),
            "model" => {
                let model = self.model_by_id(arg);
                self.session.select_model(model).await?;
                self.print_rooms();
            }
            "edit" => {
                let (index, text) = arg.split_once(' ').unwrap_or((arg, ""));
                let id = self.message_id(index)?;
                self.send(Outgoing::Edit { id, text }).await?;
            }
            "next" | "prev" => {
                let id = self.message_id(arg)?;
                let step = if name == "next" {
                    BranchStep::Next
                } else {
                    BranchStep::Previous
                };
                if self.session.step_branch(&id, step)? {
                    self.print_path();
                }
            }
            "show" => self.print_path(),
            "export" => self.export(arg),
            "key" => match self.credentials.set_api_key(arg).await {
                Ok(()) => println!("API key saved."),
                Err(e) => return Err(SessionError::Persistence(e)),
            },
            "credits" => self.print_credits().await?,
            "stream" => {
                let mut settings = self.session.settings().clone();
                settings.stream_responses = arg != "off";
                self.session.update_settings(settings).await?;
            }
            _ => println!("Unknown command. Type /help for the list."),
        }
        Ok(false)
    }

    /// Run a send while Ctrl-C stops generation, then print the result.
    async fn send(&mut self, outgoing: Outgoing<'_>) -> Result<(), SessionError> {
        let cancel = CancellationToken::new();
        self.set_generation(Some(cancel.clone()));

        println!("...");
        let result = match outgoing {
            Outgoing::Message(text) => self.session.send_message(text, &cancel).await,
            Outgoing::Edit { id, text } => self.session.edit_message(&id, text, &cancel).await,
        };
        self.set_generation(None);

        // Partial replies are committed even on failure, so show them first.
        self.print_path();
        result.map(|_| ())
    }

    fn set_generation(&self, cancel: Option<CancellationToken>) {
        if let Ok(mut slot) = self.generation.lock() {
            *slot = cancel;
        }
    }

    fn model_by_id(&self, id: &str) -> LlmModel {
        self.session
            .find_model(id)
            .cloned()
            .unwrap_or_else(|| LlmModel::bare(id))
    }

    fn room_id(&self, arg: &str) -> Result<String, SessionError> {
        let index: usize = arg
            .parse()
            .map_err(|_| SessionError::Validation("Expected a room number"))?;
        index
            .checked_sub(1)
            .and_then(|i| self.session.rooms().get(i))
            .map(|r| r.id.clone())
            .ok_or_else(|| SessionError::NotFound(format!("room {}", arg)))
    }

    fn message_id(&self, arg: &str) -> Result<String, SessionError> {
        let index: usize = arg
            .parse()
            .map_err(|_| SessionError::Validation("Expected a message number"))?;
        index
            .checked_sub(1)
            .and_then(|i| self.session.visible_path().get(i).map(|m| m.id.clone()))
            .ok_or_else(|| SessionError::NotFound(format!("message {}", arg)))
    }

    fn print_rooms(&self) {
        let current = self.session.selection().room_id.as_deref();
        for (i, room) in self.session.rooms().iter().enumerate() {
            let marker = if Some(room.id.as_str()) == current { "*" } else { " " };
            println!("{} {}. {} [{}]", marker, i + 1, room.name, room.model.short_name());
        }
    }

    fn print_path(&self) {
        for (i, item) in render_items(&self.session).iter().enumerate() {
            println!("{}", format_item(i + 1, item));
        }
    }

    fn export(&self, path: &str) {
        let Some(room) = self.session.current_room() else {
            return;
        };
        let markdown = export_to_markdown(room, &self.session.visible_path());
        match std::fs::write(path, markdown) {
            Ok(()) => println!("Exported to {}", path),
            Err(e) => println!("Export failed: {}", e),
        }
    }

    async fn print_credits(&self) -> Result<(), SessionError> {
        let Some(api_key) = self
            .credentials
            .api_key()
            .await
            .map_err(SessionError::Persistence)?
        else {
            return Err(SessionError::Validation("API key not set"));
        };
        let credits = self.provider.credits(&api_key).await?;
        println!(
            "Used {:.2} of {:.2} credits ({:.2} left)",
            credits.total_usage,
            credits.total_credits,
            credits.remaining()
        );
        Ok(())
    }
}

/// Ctrl-C cancels the running reply, or requests shutdown when idle.
fn watch_interrupts(generation: Generation, shutdown: CancellationToken) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            let running = generation.lock().ok().and_then(|slot| slot.clone());
            match running {
                Some(cancel) => cancel.cancel(),
                None => {
                    shutdown.cancel();
                    break;
                }
            }
        }
    });
}

fn format_item(index: usize, item: &RenderItem) -> String {
    let label = match item.role {
        Role::User => "You",
        Role::Assistant => item.model_name.as_deref().unwrap_or("Assistant"),
    };
    let mut out = format!("[{}] {}: {}", index, label, item.content);
    if let Some(branch) = &item.branch {
        out.push_str(&format!("  <{}/{}>", branch.position, branch.total));
    }
    out
}

fn report(err: SessionError) {
    if err.is_user_visible() {
        println!("Error: {}", err);
    } else {
        tracing::debug!("Ignored: {}", err);
    }
}
