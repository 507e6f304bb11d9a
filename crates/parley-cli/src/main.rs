mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Instant, sleep_until};
use tracing::info;
use uuid::Uuid;

use parley_backend::{LocalBackend, LocalConnection};
use parley_client::drafts::DraftCache;
use parley_client::store::Applied;
use parley_client::view::MessageView;
use parley_client::{ChatClient, ClientConfig, MessageActions, RemoteChange, ScrollCommand};
use parley_db::Database;
use parley_db::drafts::DraftDb;
use parley_types::ChatError;
use parley_types::api::Viewer;

use commands::{Command, HELP};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the transcript
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let drafts_path = std::env::var("PARLEY_DRAFTS_PATH").unwrap_or_else(|_| "parley-drafts.db".into());
    let display_name = std::env::var("PARLEY_USER")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "me".into());
    let elevated = std::env::var("PARLEY_ELEVATED")
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let user_id = match std::env::var("PARLEY_USER_ID") {
        Ok(raw) => Uuid::parse_str(&raw)?,
        Err(_) => {
            let id = Uuid::new_v4();
            info!("No PARLEY_USER_ID set, using {} for this session", id);
            id
        }
    };
    let channel_id = match std::env::var("PARLEY_CHANNEL") {
        Ok(raw) => Uuid::parse_str(&raw)?,
        Err(_) => LocalBackend::general_channel_id(),
    };
    let config = ClientConfig::from_env();

    // Init storage
    let backend = LocalBackend::new(Database::open(&PathBuf::from(&db_path))?);
    let drafts = DraftCache::open(
        DraftDb::open(&PathBuf::from(&drafts_path))?,
        config.draft_ttl,
        config.draft_capacity,
        config.draft_debounce,
    )?;

    let viewer = Viewer {
        user_id,
        display_name,
        elevated,
    };
    info!(user = %viewer.display_name, elevated, "Signed in");
    let remote = Arc::new(backend.connect(viewer.clone()));
    let client = ChatClient::new(remote, viewer, config).with_drafts(drafts);

    let mut repl = Repl {
        client,
        backend,
        listing: Vec::new(),
    };
    repl.open(channel_id).await?;
    println!("type /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut feed_open = true;
    loop {
        let deadline = repl.client.next_deadline();
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match commands::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => {
                        if matches!(command, Command::Switch(_) | Command::NewChannel(_)) {
                            feed_open = true;
                        }
                        if let Err(e) = repl.run(command).await {
                            println!("! {}", e.user_message());
                        }
                    }
                    Ok(None) => {}
                    Err(usage) => println!("! {}", usage),
                }
            }
            change = repl.client.next_remote_change(), if feed_open => match change {
                Some(change) => repl.on_change(change),
                None => feed_open = false,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if repl.client.tick(Instant::now()) {
                    repl.print_toast();
                }
            }
        }
    }

    repl.client.close_channel();
    info!("Bye");
    Ok(())
}

struct Repl {
    client: ChatClient<LocalConnection>,
    backend: LocalBackend,
    /// Message ids in the order last printed; `/cmd N` refers to these.
    listing: Vec<Uuid>,
}

impl Repl {
    async fn open(&mut self, channel_id: Uuid) -> Result<(), ChatError> {
        self.client.open_channel(channel_id).await?;
        if let Some(channel) = self.client.channel() {
            println!("#{} ({} members)", channel.name, channel.member_count());
        }
        self.print_channel();
        if let Some(draft) = self.client.draft(None) {
            println!("draft: {}", draft);
        }
        Ok(())
    }

    async fn run(&mut self, command: Command) -> Result<(), ChatError> {
        match command {
            Command::Help => println!("{}", HELP),
            Command::Quit => {}
            Command::List => self.print_channel(),
            Command::Send(text) => {
                let sent = self.client.send_message(text, Vec::new()).await?;
                if sent.scroll == ScrollCommand::ToBottom {
                    self.print_message(sent.message.id);
                }
            }
            Command::Draft(text) => {
                self.client.stage_draft(None, text, Instant::now());
                println!("draft saved");
            }
            Command::Older => match self.client.load_more_messages().await? {
                ScrollCommand::PreserveAnchor(_) => self.print_channel(),
                _ => println!("no older messages"),
            },
            Command::Edit { index, text } => {
                let id = self.resolve(index)?;
                let message = self.client.on_edit(id, text).await?;
                self.print_message(message.id);
            }
            Command::Delete { index, options } => {
                let id = self.resolve(index)?;
                self.client.on_delete(id, options).await?;
                self.print_message(id);
                self.print_toast();
            }
            Command::Undo => {
                let id = self
                    .client
                    .toast(Instant::now())
                    .map(|t| t.message_id)
                    .ok_or_else(|| ChatError::Conflict("Nothing to undo".into()))?;
                let result = self.client.on_undo(id).await;
                self.print_toast();
                result?;
                self.print_message(id);
            }
            Command::Dismiss => self.client.dismiss_toast(),
            Command::React { index, emoji } => {
                let id = self.resolve(index)?;
                self.client.on_react(id, &emoji).await?;
                self.print_message(id);
            }
            Command::Pin { index, pinned } => {
                let id = self.resolve(index)?;
                self.client.on_pin(id, pinned).await?;
                self.print_message(id);
            }
            Command::Thread { index } => {
                let root = self.resolve(index)?;
                self.client.open_thread(root).await?;
                let views = self.client.thread_views(root, Instant::now());
                self.listing = views.iter().map(|v| v.id).collect();
                for (i, view) in views.iter().enumerate() {
                    println!("{}", format_view(i + 1, view));
                }
                println!("(/list to go back to the channel)");
            }
            Command::Reply { index, text } => {
                let root = self.resolve(index)?;
                let reply = self.client.on_reply(root, text).await?;
                println!("replied in thread ({})", short(reply.id));
            }
            Command::Jump { index } => {
                let id = self.resolve(index)?;
                if let ScrollCommand::ToMessage(id) = self.client.jump_to_message(id, Instant::now()) {
                    self.print_message(id);
                }
            }
            Command::Switch(channel_id) => self.open(channel_id).await?,
            Command::NewChannel(name) => {
                let channel_id = self
                    .backend
                    .create_channel(&name)
                    .map_err(|e| ChatError::Validation(format!("Could not create channel: {e}")))?;
                self.open(channel_id).await?;
            }
        }
        Ok(())
    }

    fn on_change(&mut self, change: RemoteChange) {
        match change.applied {
            Applied::Inserted { message_id, .. } if change.scroll == ScrollCommand::ToBottom => {
                self.print_message(message_id);
            }
            Applied::Inserted { .. } => {
                println!("({} new below)", self.client.unseen_count());
            }
            Applied::Updated(id) | Applied::Reaction(id) | Applied::Deleted { message_id: id, .. } => {
                if self.listing.contains(&id) {
                    self.print_message(id);
                }
            }
            Applied::Ignored => {}
        }
    }

    fn resolve(&self, index: usize) -> Result<Uuid, ChatError> {
        self.listing
            .get(index - 1)
            .copied()
            .ok_or_else(|| ChatError::Validation(format!("No message {index} in the listing")))
    }

    fn print_channel(&mut self) {
        let views = self.client.message_views(Instant::now());
        self.listing = views.iter().map(|v| v.id).collect();
        if self.client.has_more_messages() {
            println!("(/older for earlier messages)");
        }
        for (i, view) in views.iter().enumerate() {
            println!("{}", format_view(i + 1, view));
        }
    }

    /// Prints one message, adding it to the listing when it is new.
    fn print_message(&mut self, id: Uuid) {
        let now = Instant::now();
        let Some(view) = self
            .client
            .message_views(now)
            .into_iter()
            .chain(self.thread_views_for(id, now))
            .find(|v| v.id == id)
        else {
            return;
        };
        let index = match self.listing.iter().position(|l| *l == id) {
            Some(pos) => pos + 1,
            None => {
                self.listing.push(id);
                self.listing.len()
            }
        };
        println!("{}", format_view(index, &view));
    }

    fn thread_views_for(&self, id: Uuid, now: Instant) -> Vec<MessageView> {
        self.client
            .store()
            .and_then(|s| s.get(id))
            .and_then(|m| m.thread_id)
            .map(|root| self.client.thread_views(root, now))
            .unwrap_or_default()
    }

    fn print_toast(&self) {
        if let Some(toast) = self.client.toast(Instant::now()) {
            if toast.can_undo {
                println!("[{} /undo within {}s]", toast.text, toast.remaining_secs);
            } else {
                println!("[{}]", toast.text);
            }
        }
    }
}

fn short(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn format_view(index: usize, view: &MessageView) -> String {
    let mut line = format!(
        "{}{:>3} {} {}: {}",
        if view.highlighted { ">" } else { " " },
        index,
        view.created_at.with_timezone(&Local).format("%H:%M"),
        view.author,
        view.body
    );
    if let Some(edited) = view.edited_label() {
        line.push(' ');
        line.push_str(&edited);
    }
    if view.pinned {
        line.push_str(" [pinned]");
    }
    if let Some(task) = view.task_id {
        line.push_str(&format!(" [task {}]", short(task)));
    }
    for chip in &view.reactions {
        let mark = if chip.reacted_by_me { "*" } else { "" };
        line.push_str(&format!(" {}{}{}", chip.emoji, chip.count, mark));
    }
    if view.reply_count > 0 {
        line.push_str(&format!(" ({} replies)", view.reply_count));
    }
    line
}
