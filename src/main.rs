#![deny(dead_code)]
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{debug, error, info, warn, LevelFilter};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

mod credentials;
mod utils;

use crate::credentials::{clear_session, load_session, save_session, SavedSession};
use marketchat::config::{DEFAULT_API_URL, DEFAULT_SOCKET_URL};
use marketchat::connection::ConnectionEvent;
use marketchat::{ChatClient, ClientConfig, Contact, Message, UserId};

/// Command line arguments for marketchat
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "marketchat: buyer and seller messaging from the terminal.",
    long_about = "marketchat keeps a live connection to the marketplace and lets you chat with \
    the people you buy from and sell to.\n\n\
    Run `marketchat login` once, then `marketchat chat`."
)]
struct Args {
    /// Directory holding session.json and the log file
    #[arg(long, value_name = "PATH")]
    config_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save the user id and token used by `chat`
    Login {
        #[arg(long)]
        api_url: Option<String>,
        #[arg(long)]
        socket_url: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
        /// Bearer token; prompted for when omitted
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Forget the saved session
    Logout,
    /// Open the interactive chat
    Chat {
        /// Open the conversation with this user right away
        #[arg(long, value_name = "USER_ID")]
        with: Option<String>,
    },
}

/// One line typed at the chat prompt
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Contacts,
    Open(&'a str),
    History,
    Close,
    Status,
    Help,
    Quit,
    Text(&'a str),
    Empty,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if !line.starts_with('/') {
        return Input::Text(line);
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let argument = parts.next().map(str::trim).filter(|arg| !arg.is_empty());
    match (command, argument) {
        ("/contacts", None) => Input::Contacts,
        ("/open", Some(user)) => Input::Open(user),
        ("/history", None) => Input::History,
        ("/close", None) => Input::Close,
        ("/status", None) => Input::Status,
        ("/help", None) => Input::Help,
        ("/quit", None) | ("/exit", None) => Input::Quit,
        _ => Input::Unknown(line),
    }
}

/// Prompts for whatever was not given on the command line or in the environment
fn prompt_value(given: Option<String>, env_key: &str, prompt: &str) -> String {
    given
        .or_else(|| env::var(env_key).ok())
        .or_else(|| utils::prompt(prompt))
        .unwrap_or_default()
}

fn print_contacts(contacts: &[Contact]) {
    if contacts.is_empty() {
        println!("* no contacts yet");
        return;
    }
    for contact in contacts {
        if contact.unread_count > 0 {
            println!("  {} ({}) [{} unread]", contact.display_name, contact.user_id, contact.unread_count);
        } else {
            println!("  {} ({})", contact.display_name, contact.user_id);
        }
    }
}

fn print_message(message: &Message, me: &UserId) {
    let who = if message.is_from(me) { "you" } else { message.sender_id.as_str() };
    println!(
        "[{}] {}: {}",
        message.created_at.with_timezone(&chrono::Local).format("%H:%M"),
        who,
        message.content
    );
}

fn print_help() {
    println!("  /contacts        list contacts and unread counts");
    println!("  /open <user id>  open a conversation");
    println!("  /history         show the open conversation again");
    println!("  /close           close the open conversation");
    println!("  /status          show the connection state");
    println!("  /quit            leave");
    println!("  anything else is sent to the open conversation");
}

fn login(
    api_url: Option<String>,
    socket_url: Option<String>,
    user_id: Option<String>,
    token: Option<String>,
    name: Option<String>,
) -> Result<()> {
    let api_url = api_url
        .or_else(|| env::var("MARKETCHAT_API_URL").ok())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let socket_url = socket_url
        .or_else(|| env::var("MARKETCHAT_SOCKET_URL").ok())
        .unwrap_or_else(|| DEFAULT_SOCKET_URL.to_string());
    let user_id = prompt_value(user_id, "MARKETCHAT_USER_ID", "Enter your user id:");
    let token = prompt_value(token, "MARKETCHAT_TOKEN", "Enter your access token:");

    let saved = SavedSession::new(&api_url, &socket_url, &user_id, name.as_deref(), &token);
    // Refuse to save something `chat` could never use
    saved.to_session_context()?;
    save_session(&saved)?;
    println!("Logged in as {}", user_id);
    Ok(())
}

async fn open_conversation(client: &ChatClient, contact: &UserId) {
    match client.open(contact).await {
        Ok(history) => {
            println!("* conversation with {} ({} messages)", contact, history.len());
            for message in &history {
                print_message(message, client.session().user_id());
            }
        }
        Err(e) => {
            // The conversation stays open; new messages still arrive
            warn!("History for {} failed: {}", contact, e);
            println!("* conversation with {} (history unavailable: {})", contact, e);
        }
    }
}

async fn print_event(client: &ChatClient, event: ConnectionEvent) {
    match event {
        ConnectionEvent::MessageReceived { message, sender_name } => {
            let me = client.session().user_id();
            let Some(counterpart) = message.conversation_key().counterpart(me).cloned() else {
                return;
            };
            if client.active_contact().await.as_ref() == Some(&counterpart) {
                print_message(&message, me);
            } else if !message.is_from(me) {
                let from = sender_name.unwrap_or_else(|| counterpart.to_string());
                println!("* new message from {}", from);
            }
        }
        ConnectionEvent::Connected => println!("* connected"),
        ConnectionEvent::Disconnected(reason) => println!("* disconnected: {}", reason),
        ConnectionEvent::TransportError(detail) => debug!("Transport error: {}", detail),
    }
}

async fn chat(saved: SavedSession, with: Option<String>) -> Result<()> {
    let session = saved.to_session_context()?;
    let mut config = ClientConfig::from_env()?;
    if env::var("MARKETCHAT_API_URL").is_err() {
        config.api_base_url = saved.api_url.clone();
    }
    if env::var("MARKETCHAT_SOCKET_URL").is_err() {
        config.socket_url = saved.socket_url.clone();
    }

    println!("Connecting to {} ...", config.socket_url);
    let client = match ChatClient::connect(session, &config).await {
        Ok(client) => Arc::new(client),
        Err(e) if e.is_auth_failure() => {
            error!("Session rejected: {}", e);
            return Err(anyhow!("Session rejected, run `marketchat login` again ({})", e));
        }
        Err(e) => return Err(e.into()),
    };
    println!("* {}", client.connection_state());

    match client.refresh_contacts().await {
        Ok(contacts) => print_contacts(&contacts),
        Err(e) => {
            warn!("Failed to load contacts: {}", e);
            println!("* contacts unavailable: {}", e);
        }
    }
    if let Some(with) = with {
        open_conversation(&client, &UserId::new(with)).await;
    }

    let mut events = client.subscribe();
    let printer = {
        let client = client.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                print_event(&client, event).await;
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Help => print_help(),
            Input::Status => println!("* {}, {} unread", client.connection_state(), client.total_unread().await),
            Input::Contacts => match client.refresh_contacts().await {
                Ok(contacts) => print_contacts(&contacts),
                Err(e) => {
                    warn!("Contact refresh failed: {}", e);
                    print_contacts(&client.contacts().await);
                }
            },
            Input::Open(user) => open_conversation(&client, &UserId::new(user)).await,
            Input::History => match client.active_contact().await {
                Some(contact) => {
                    for message in client.messages(&contact).await {
                        print_message(&message, client.session().user_id());
                    }
                }
                None => println!("* no conversation open"),
            },
            Input::Close => {
                client.close_conversation().await;
                println!("* conversation closed");
            }
            Input::Unknown(command) => println!("* unknown command {}, try /help", command),
            Input::Text(text) => match client.send(text).await {
                Ok(outgoing) => {
                    debug!("Pending message {}", outgoing.pending().local_id);
                    tokio::spawn(async move {
                        let (pending, result) = outgoing.settle().await;
                        match result {
                            Ok(message) => debug!("Message {} confirmed as {}", pending.local_id, message.id),
                            Err(e) => println!("! not sent ({:?}): {}: {}", pending.status, pending.content, e),
                        }
                    });
                }
                Err(e) => println!("! {}", e),
            },
        }
    }

    printer.abort();
    let _ = printer.await;
    match Arc::try_unwrap(client) {
        Ok(client) => client.logout().await,
        Err(_) => warn!("Chat client still in use at exit"),
    }
    info!("Chat closed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(dir) = &args.config_dir {
        credentials::set_config_dir_override(dir.clone());
    }
    let log_file = credentials::get_config_dir()?.join("marketchat.log");
    utils::setup_logging(Some(log_file.as_path()), args.log_level)?;

    match args.command {
        Command::Login {
            api_url,
            socket_url,
            user_id,
            token,
            name,
        } => login(api_url, socket_url, user_id, token, name),
        Command::Logout => {
            if clear_session()? {
                println!("Logged out");
            } else {
                println!("No saved session");
            }
            Ok(())
        }
        Command::Chat { with } => {
            let saved = load_session()?.ok_or_else(|| anyhow!("No saved session, run `marketchat login` first"))?;
            info!("Starting chat as {}", saved.user_id);
            chat(saved, with).await
        }
    }
}
