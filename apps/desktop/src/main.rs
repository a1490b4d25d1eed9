use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use client_core::{
    load_settings, ClientEvent, ClientHandle, HttpConversationApi, RealtimeClient,
    SessionIdentity, SessionState, WebSocketTransport,
};
use shared::domain::{MessageKind, UserId};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{Command, HELP};

#[derive(Parser, Debug)]
struct Args {
    /// Overrides the configured server url.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    user_id: String,
    /// Session token; falls back to CHAT_TOKEN.
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    let token = args
        .token
        .or_else(|| std::env::var("CHAT_TOKEN").ok())
        .ok_or_else(|| anyhow!("no session token: pass --token or set CHAT_TOKEN"))?;
    let identity = SessionIdentity {
        user_id: UserId::new(args.user_id),
        token: token.clone(),
    };

    let transport = WebSocketTransport::new(&settings.websocket_url()?)?;
    let api = HttpConversationApi::new(&settings.server_url, token);
    let client = RealtimeClient::connect(&settings, identity, Arc::new(transport), Arc::new(api))
        .context("failed to start sync engine")?;

    let mut events = client.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ClientEvent::StateChanged) => {}
                Ok(ClientEvent::Connection(state)) => println!("* channel {state:?}"),
                Ok(ClientEvent::Notice(notice)) => println!("! {}", notice.message),
                Ok(ClientEvent::Error(err)) => eprintln!("error: {err}"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let count = client.load_directory().await.context("failed to load conversations")?;
    println!("{count} conversations; /help for commands");
    print_directory(&client.snapshot().await?);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match commands::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(err) = run(&client, command).await {
            eprintln!("error: {err}");
        }
    }

    client.shutdown().await;
    Ok(())
}

async fn run(client: &RealtimeClient, command: Command) -> Result<()> {
    match command {
        Command::List => print_directory(&client.snapshot().await?),
        Command::Show => print_messages(&client.snapshot().await?),
        Command::Help => println!("{HELP}"),
        Command::Open(id) => client.select_conversation(id).await?,
        Command::Say(text) => {
            client.notify_typing().await?;
            let id = client.send_message(&text, MessageKind::Text, None).await?;
            println!("> sent {id}");
        }
        Command::React(id, emoji) => client.react(id, &emoji).await?,
        Command::Unreact(id) => client.remove_reaction(id).await?,
        Command::Edit(id, text) => client.edit_message(id, &text).await?,
        Command::Delete(id) => client.delete_message(id).await?,
        Command::Pin(id, pinned) => client.set_pinned(id, pinned).await?,
        Command::CreateGroup(name, users) => client.create_group(&name, users).await?,
        Command::Join(id) => client.join_group(id).await?,
        Command::Leave(id) => client.leave_group(id).await?,
        Command::Add(id, users) => client.add_users(id, users).await?,
        Command::Remove(id, users) => client.remove_users(id, users).await?,
        Command::DeleteGroup(id) => client.delete_group(id).await?,
        Command::Quit => {}
    }
    Ok(())
}

fn print_directory(state: &SessionState) {
    for conversation in state.directory().ordered() {
        let marker = if state.active() == Some(&conversation.id) { "*" } else { " " };
        let name = conversation.name.as_deref().unwrap_or(conversation.id.as_str());
        let online = conversation
            .counterpart()
            .filter(|user| !conversation.is_group() && state.presence().is_online(user))
            .map(|_| " (online)")
            .unwrap_or_default();
        let preview = conversation
            .last_message
            .as_ref()
            .map(|preview| preview.content.as_str())
            .unwrap_or_default();
        println!(
            "{marker} {:<24} {name}{online} [{}] {preview}",
            conversation.id, conversation.unread_count
        );
    }
}

fn print_messages(state: &SessionState) {
    let Some(active) = state.active() else {
        println!("no active conversation");
        return;
    };
    for run in state.messages().runs(active) {
        println!("{}:", run.sender_id);
        for message in run.messages {
            let edited = if message.edited { " (edited)" } else { "" };
            let pinned = if message.pinned { " [pinned]" } else { "" };
            println!(
                "  {} {}{edited}{pinned} ({:?})",
                message.id, message.content, message.status
            );
        }
    }
    let typing: Vec<&str> = state.presence().typing_users().map(UserId::as_str).collect();
    if !typing.is_empty() {
        println!("typing: {}", typing.join(", "));
    }
}
