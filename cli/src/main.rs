use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chat_sync_core::memory::{InMemoryRemoteLog, InMemoryUserDirectory};
use chat_sync_core::model::{conversation_id_for, NewMessage};
use chat_sync_core::{AppAction, AppState, ChatApp, FeedHealth, MessageDeliveryState, RemoteLog};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::time::Instant;

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Parser)]
#[command(name = "chatsync")]
#[command(about = "Drive the chat sync engine against an in-memory message log")]
struct Cli {
    /// Per-user data directories (engine config) live here; logs go to stderr
    #[arg(long, default_value = ".chatsync")]
    state_dir: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Two engines talk over one log; prints both sides when done
    Demo {
        /// Number of messages to exchange
        #[arg(long, default_value_t = 6)]
        messages: usize,
    },

    /// Interactive session; `>text` is sent by the peer, `/state` dumps JSON, `/quit` exits
    Chat {
        /// User to sign in as
        #[arg(long)]
        user: String,

        /// User to chat with
        #[arg(long)]
        peer: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.state_dir)
        .with_context(|| format!("create state dir {}", cli.state_dir.display()))?;

    match cli.cmd {
        Command::Demo { messages } => cmd_demo(&cli.state_dir, messages).await,
        Command::Chat { user, peer } => cmd_chat(&cli.state_dir, &user, &peer).await,
    }
}

async fn wait_for(
    app: &ChatApp,
    what: &str,
    mut f: impl FnMut(&AppState) -> bool,
) -> anyhow::Result<AppState> {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        let state = app.state();
        if f(&state) {
            return Ok(state);
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(POLL).await;
    }
}

async fn sign_in(
    state_dir: &Path,
    user: &str,
    log: &InMemoryRemoteLog,
    directory: &InMemoryUserDirectory,
) -> anyhow::Result<Arc<ChatApp>> {
    let data_dir = state_dir.join(user);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("create {}", data_dir.display()))?;
    let app = ChatApp::new(
        data_dir.to_string_lossy().to_string(),
        Arc::new(log.clone()),
        Arc::new(directory.clone()),
    );
    app.dispatch(AppAction::SignIn {
        user_id: user.to_string(),
    });
    wait_for(&app, &format!("{user}'s chat list"), |s| {
        s.feeds.chat_list == FeedHealth::Live
    })
    .await?;
    Ok(app)
}

async fn open_conversation(app: &ChatApp, peer: &str) -> anyhow::Result<()> {
    app.dispatch(AppAction::StartChat {
        peer_id: peer.to_string(),
    });
    wait_for(app, "conversation", |s| {
        s.current_chat.as_ref().is_some_and(|c| c.peer_id == peer)
            && s.feeds.messages == FeedHealth::Live
    })
    .await?;
    Ok(())
}

fn delivered(state: &AppState) -> usize {
    state.current_chat.as_ref().map_or(0, |c| {
        c.messages
            .iter()
            .filter(|m| m.delivery == MessageDeliveryState::Sent)
            .count()
    })
}

fn print_state(who: &str, state: &AppState) {
    println!("== {who} ==");
    println!("chats:");
    for row in &state.chat_list {
        let marker = if state.selected_chat_id.as_deref() == Some(row.chat_id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            " {marker} {:<12} {:<32} {:>10}  unread={}",
            row.peer_name, row.last_message_preview, row.time_label, row.unread_count
        );
    }
    if let Some(chat) = &state.current_chat {
        println!("conversation with {}:", chat.peer_name);
        for m in &chat.messages {
            let status = match &m.delivery {
                MessageDeliveryState::Sent => String::new(),
                MessageDeliveryState::Pending => " (sending)".to_string(),
                MessageDeliveryState::Failed { reason } => format!(" (failed: {reason})"),
            };
            println!("  [{}] {}: {}{status}", m.time_label, m.sender_id, m.text);
        }
    }
}

async fn cmd_demo(state_dir: &Path, messages: usize) -> anyhow::Result<()> {
    let log = InMemoryRemoteLog::new();
    let directory = InMemoryUserDirectory::new();
    directory.insert_named("alice", "Alice");
    directory.insert_named("bob", "Bob");

    let alice = sign_in(state_dir, "alice", &log, &directory).await?;
    let bob = sign_in(state_dir, "bob", &log, &directory).await?;
    open_conversation(&alice, "bob").await?;
    let chat_id = conversation_id_for("alice", "bob");

    for i in 0..messages {
        let (from, app) = if i % 2 == 0 {
            ("alice", &alice)
        } else {
            ("bob", &bob)
        };
        // Bob can only reply once the conversation reaches his list.
        wait_for(app, &format!("{from}'s chat row"), |s| {
            from == "alice" || s.chat_list.iter().any(|c| c.chat_id == chat_id)
        })
        .await?;
        tracing::debug!(from, n = i + 1, "demo send");
        app.dispatch(AppAction::SendMessage {
            chat_id: chat_id.clone(),
            text: format!("message {} from {from}", i + 1),
        });
        wait_for(&alice, "delivery", |s| delivered(s) == i + 1).await?;
    }

    if messages > 0 {
        wait_for(&bob, "bob's copy", |s| delivered(s) == messages).await?;
    }

    print_state("alice", &alice.state());
    println!();
    print_state("bob", &bob.state());

    alice.dispatch(AppAction::SignOut);
    bob.dispatch(AppAction::SignOut);
    Ok(())
}

async fn cmd_chat(state_dir: &Path, user: &str, peer: &str) -> anyhow::Result<()> {
    let (user, peer) = (user.trim(), peer.trim());
    if user.is_empty() || peer.is_empty() || user == peer {
        bail!("--user and --peer must be two different ids");
    }

    let log = InMemoryRemoteLog::new();
    let directory = InMemoryUserDirectory::new();
    directory.insert_named(user, user);
    directory.insert_named(peer, peer);

    let app = sign_in(state_dir, user, &log, &directory).await?;
    open_conversation(&app, peer).await?;
    let chat_id = conversation_id_for(user, peer);
    eprintln!("chatting as {user} with {peer}; `>text` speaks as {peer}, /state, /quit");

    let mut printed: HashSet<String> = HashSet::new();
    let mut peer_seq = 0u64;
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line.context("read stdin")? else {
                    break;
                };
                let line = line.trim();
                match line {
                    "" => {}
                    "/quit" => break,
                    "/state" => println!("{}", serde_json::to_string_pretty(&app.state())?),
                    _ => {
                        if let Some(text) = line.strip_prefix('>') {
                            peer_seq += 1;
                            log.append(NewMessage {
                                conversation_id: chat_id.clone(),
                                participants: vec![user.to_string(), peer.to_string()],
                                sender_id: peer.to_string(),
                                text: text.trim().to_string(),
                                local_id: format!("{peer}-cli-{peer_seq}"),
                            })
                            .await
                            .with_context(|| format!("send as {peer}"))?;
                            tracing::debug!(%peer, seq = peer_seq, "simulated peer message");
                        } else {
                            app.dispatch(AppAction::SendMessage {
                                chat_id: chat_id.clone(),
                                text: line.to_string(),
                            });
                        }
                    }
                }
            }
            _ = tick.tick() => print_new(&app, &mut printed),
        }
    }

    app.dispatch(AppAction::SignOut);
    Ok(())
}

/// Print settled messages not shown yet, plus any toast.
fn print_new(app: &ChatApp, printed: &mut HashSet<String>) {
    let state = app.state();
    if let Some(toast) = &state.toast {
        eprintln!("! {toast}");
        app.dispatch(AppAction::ClearToast);
    }
    let Some(chat) = &state.current_chat else {
        return;
    };
    for m in &chat.messages {
        let key = match &m.delivery {
            MessageDeliveryState::Pending => continue,
            MessageDeliveryState::Sent => m.id.clone(),
            MessageDeliveryState::Failed { .. } => format!("failed:{}", m.id),
        };
        if !printed.insert(key) {
            continue;
        }
        match &m.delivery {
            MessageDeliveryState::Failed { reason } => {
                println!("[{}] {}: {} (failed: {reason})", m.time_label, m.sender_id, m.text)
            }
            _ => println!("[{}] {}: {}", m.time_label, m.sender_id, m.text),
        }
    }
}
