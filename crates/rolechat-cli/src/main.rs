//! Rolechat CLI - a terminal front end for the rolechat service.
//!
//! Bootstraps the client core, restores any stored session, and runs one
//! command against it. Stored credentials persist between runs.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rolechat_core::auth::LOGOUT_REDIRECT_DELAY;
use rolechat_core::models::{CharacterQuery, ConversationQuery, LoginCredentials, NewUser};
use rolechat_core::{ApiError, AppContext, Config, MemoryNavigator, NavigationOutcome};

const USAGE: &str = "\
Usage: rolechat <command> [args]

Commands:
  login [email]               Sign in (password is prompted)
  register <username> <email> Create an account (password is prompted)
  logout                      Sign out and clear local data
  whoami                      Show the signed-in user
  status                      Show session details
  open <path>                 Navigate to an app route through the access guard
  characters [search]         List public characters
  conversations               List your conversations";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr (filtered by RUST_LOG, default warn) and to a daily
/// rolling file in the storage directory. The guard must outlive main.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "rolechat.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load()?;
    config.apply_env();

    let log_dir = config.storage_dir().ok();
    if let Some(ref dir) = log_dir {
        std::fs::create_dir_all(dir)?;
    }
    let _log_guard = init_tracing(log_dir.as_deref());
    info!("rolechat starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let navigator = Arc::new(MemoryNavigator::default());
    let ctx = AppContext::from_config(config, navigator.clone())?;
    ctx.session.initialize().await;

    let result = match command {
        "login" => login(&ctx, args.get(1).cloned()).await,
        "register" => register(&ctx, &args[1..]).await,
        "logout" => {
            ctx.session.logout().await;
            // Let the deferred redirect fire before exiting
            tokio::time::sleep(LOGOUT_REDIRECT_DELAY * 2).await;
            println!("Signed out.");
            Ok(())
        }
        "whoami" => {
            match ctx.session.user().filter(|_| ctx.session.is_logged_in()) {
                Some(user) => println!("{} <{}>", user.display_name(), user.email),
                None => println!("Not signed in."),
            }
            Ok(())
        }
        "status" => {
            print_status(&ctx);
            Ok(())
        }
        "open" => open(&ctx, &navigator, args.get(1).map(String::as_str).unwrap_or("/")).await,
        "characters" => list_characters(&ctx, args.get(1).cloned()).await,
        "conversations" => list_conversations(&ctx).await,
        _ => {
            eprintln!("Unknown command: {}\n\n{}", command, USAGE);
            Ok(())
        }
    };

    for href in navigator.hard_navigations() {
        println!("(navigated to {})", href);
    }

    if let Err(ref e) = result {
        if let Some(ApiError::Unauthorized) = e.downcast_ref::<ApiError>() {
            eprintln!("Session expired or credentials rejected. Please log in again.");
        }
    }

    info!("rolechat shutting down");
    result
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_password() -> Result<String> {
    Ok(rpassword::prompt_password("Password: ")?)
}

async fn login(ctx: &AppContext, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| ctx.config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    if email.is_empty() {
        return Err(anyhow::anyhow!("Email required"));
    }
    let password = prompt_password()?;

    let credentials = LoginCredentials {
        email: email.clone(),
        password,
    };
    ctx.session.login(&credentials).await?;

    let mut config = ctx.config.clone();
    config.last_email = Some(email);
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }

    match ctx.session.user() {
        Some(user) => println!("Signed in as {}.", user.display_name()),
        None => println!("Signed in."),
    }
    Ok(())
}

async fn register(ctx: &AppContext, args: &[String]) -> Result<()> {
    let (Some(username), Some(email)) = (args.first(), args.get(1)) else {
        return Err(anyhow::anyhow!("Usage: rolechat register <username> <email>"));
    };
    let password = prompt_password()?;

    let new_user = NewUser {
        username: username.clone(),
        email: email.clone(),
        password,
    };
    let response = ctx.session.register(&new_user).await?;

    if ctx.session.is_logged_in() {
        println!("Account created and signed in.");
    } else {
        println!(
            "{} Sign in with `rolechat login {}`.",
            response.message.as_deref().unwrap_or("Account created."),
            email
        );
    }
    Ok(())
}

fn print_status(ctx: &AppContext) {
    let logged_in = ctx.session.is_logged_in();
    let session = ctx.session.snapshot();
    println!("API:        {}", ctx.api.base_url());
    println!("Signed in:  {}", if logged_in { "yes" } else { "no" });
    if let Some(user) = session.user {
        println!("User:       {} <{}>", user.display_name(), user.email);
    }
    if let Some(expiry) = session.token_expiry {
        println!("Expires:    {}", expiry_display(expiry));
    }
}

fn expiry_display(epoch_millis: i64) -> String {
    match rolechat_core::auth::session::expiry_datetime(epoch_millis) {
        Some(dt) => dt.to_rfc3339(),
        None => epoch_millis.to_string(),
    }
}

async fn open(ctx: &AppContext, navigator: &MemoryNavigator, path: &str) -> Result<()> {
    let outcome = ctx.router.push(path).await;
    match &outcome {
        NavigationOutcome::Proceeded(p) => println!("Opened {}", p),
        NavigationOutcome::RedirectedToLogin(p) => println!("Sign-in required: redirected to {}", p),
        NavigationOutcome::Redirected(p) => println!("Redirected to {}", p),
        NavigationOutcome::Aborted => println!("Navigation to {} was aborted", path),
    }
    if let Some(title) = navigator.title() {
        println!("Title: {}", title);
    }
    Ok(())
}

async fn list_characters(ctx: &AppContext, search: Option<String>) -> Result<()> {
    let query = CharacterQuery {
        search,
        ..Default::default()
    };
    let list = ctx.api.characters(&query).await?;
    for c in &list.characters {
        println!("{:<38} {:<24} chats: {}", c.id, c.name, c.chat_count);
    }
    println!("{} of {} characters", list.characters.len(), list.total);
    Ok(())
}

async fn list_conversations(ctx: &AppContext) -> Result<()> {
    if !ctx.session.is_logged_in() {
        println!("Not signed in.");
        return Ok(());
    }
    let list = ctx.api.conversations(&ConversationQuery::default()).await?;
    for conv in &list.conversations {
        println!(
            "{:<38} {:<24} {}",
            conv.id,
            conv.character.name,
            conv.summary.as_deref().unwrap_or("")
        );
    }
    println!("{} of {} conversations", list.conversations.len(), list.total);
    Ok(())
}
