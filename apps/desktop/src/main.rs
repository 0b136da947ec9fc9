mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use client_core::{
    AuthApi, ChatEvent, RestApi, SearchController, SearchEvent, Session, SyncEngine,
    WebSocketTransport,
};
use shared::domain::{MessageId, UserId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "CHAT_EMAIL")]
    email: String,
    #[arg(long, env = "CHAT_PASSWORD")]
    password: String,
    /// Overrides the configured backend URL.
    #[arg(long)]
    server_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();
    let mut settings = config::load_settings();
    if let Some(url) = args.server_url {
        settings.server_url = url;
    }

    let auth = RestApi::new(&settings.server_url);
    let token = auth.login(&args.email, &args.password).await?;
    let session = Session::establish(&token)?;
    println!(
        "Logged in as {} ({})",
        session.display_name(),
        session.user_id()
    );

    let api = Arc::new(RestApi::with_credential(
        &settings.server_url,
        session.bearer_token(),
    ));
    let transport = Arc::new(WebSocketTransport::new(&settings.server_url)?);
    let engine = SyncEngine::start(
        session,
        api.clone(),
        transport,
        settings.connection_config(),
    );
    let search = SearchController::new(api, settings.search_debounce());

    tokio::spawn(print_chat_events(engine.subscribe()));
    tokio::spawn(print_search_events(search.subscribe()));

    println!("Commands: /search <text>, /focus <user-id>, /retry <message-id>, /quit");
    println!("Anything else is sent to the focused peer.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "/quit" {
            break;
        } else if let Some(text) = line.strip_prefix("/search") {
            search.query(text.trim()).await;
        } else if let Some(id) = line.strip_prefix("/focus ") {
            let peer = UserId::from(id.trim());
            if let Err(err) = engine.focus_peer(&peer).await {
                warn!(peer = %peer, error = %err, "focus failed");
            } else {
                for message in engine.store().lock().await.messages(&peer) {
                    println!("  [{}] {}: {}", message.sent_at, message.sender, message.content);
                }
            }
        } else if let Some(id) = line.strip_prefix("/retry ") {
            match engine.focused_peer().await {
                Some(peer) => {
                    if let Err(err) = engine.retry(&peer, &MessageId::from(id.trim())).await {
                        warn!(error = %err, "retry failed");
                    }
                }
                None => println!("No peer focused."),
            }
        } else if !line.is_empty() {
            match engine.focused_peer().await {
                Some(peer) => {
                    if let Err(err) = engine.send(&peer, line).await {
                        warn!(error = %err, "send failed, use /retry to try again");
                    }
                }
                None => println!("No peer focused. Use /focus <user-id> first."),
            }
        }
    }

    engine.teardown().await;
    Ok(())
}

async fn print_chat_events(mut events: tokio::sync::broadcast::Receiver<ChatEvent>) {
    while let Ok(event) = events.recv().await {
        match event {
            ChatEvent::MessageAppended { peer, message } => {
                println!("[{peer}] {}: {}", message.sender, message.content);
            }
            ChatEvent::MessageFailed { peer, message_id } => {
                println!("[{peer}] send failed ({message_id}), /retry {message_id}");
            }
            ChatEvent::UnreadChanged { peer, unread } if unread > 0 => {
                println!("[{peer}] {unread} unread");
            }
            ChatEvent::ConnectionOnline => println!("(connected)"),
            ChatEvent::ConnectionLost { reason } => println!("(connection lost: {reason})"),
            ChatEvent::SessionEnded => return,
            _ => {}
        }
    }
}

async fn print_search_events(mut events: tokio::sync::broadcast::Receiver<SearchEvent>) {
    while let Ok(event) = events.recv().await {
        match event {
            SearchEvent::ResultsUpdated { query, peers } => {
                println!("Search \"{query}\": {} result(s)", peers.len());
                for peer in peers {
                    let name = [peer.first_name.as_deref(), peer.last_name.as_deref()]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(" ");
                    println!("  {} <{}> {}", peer.user_id, peer.email, name);
                }
            }
            SearchEvent::LookupFailed { query, reason } => {
                println!("Search \"{query}\" failed: {reason}");
            }
        }
    }
}
