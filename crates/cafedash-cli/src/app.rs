//! Application state and the terminal flows.
//!
//! The protected hub is rendered through a [`RouteGuard`]; a redirect from
//! the guard queues the login screen on the app's route channel.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use cafedash_core::{
    AuthContext, Config, GateDecision, Navigator, Rendered, RouteGuard, SessionSnapshot,
};

pub const USAGE: &str = "\
Usage: cafedash [COMMAND]

Without a command, restores the saved session (or asks you to log in)
and shows the hub.

Commands:
  --status        Print the current session as JSON
  --logout        Sign out and forget the saved session
  --refresh       Exchange the session token for a fresh one
  --fetch <path>  GET an API path with the session token and print the JSON
  --help          Show this message";

/// Failed logins allowed in one run before giving up
const MAX_LOGIN_ATTEMPTS: u32 = 3;

/// How long the hub waits on a session that is still loading
const LOADING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    Status,
    Logout,
    Refresh,
    Fetch(String),
    Help,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        match args.first().map(String::as_str) {
            None => Ok(Command::Run),
            Some("--status") => Ok(Command::Status),
            Some("--logout") => Ok(Command::Logout),
            Some("--refresh") => Ok(Command::Refresh),
            Some("--fetch") => match args.get(1) {
                Some(path) if !path.trim().is_empty() => Ok(Command::Fetch(path.clone())),
                _ => bail!("--fetch requires a path\n\n{}", USAGE),
            },
            Some("--help") | Some("-h") => Ok(Command::Help),
            Some(other) => bail!("Unknown argument '{}'\n\n{}", other, USAGE),
        }
    }
}

/// Screens the app can be sent to from outside the current flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
}

pub struct TerminalNavigator {
    routes: mpsc::UnboundedSender<Route>,
}

impl Navigator for TerminalNavigator {
    fn redirect_to_login(&self) {
        debug!("Queueing login screen");
        // The receiver lives as long as the app
        let _ = self.routes.send(Route::Login);
    }
}

pub struct App {
    config: Config,
    ctx: AuthContext,
    guard: RouteGuard<TerminalNavigator>,
    routes: mpsc::UnboundedReceiver<Route>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let ctx = AuthContext::from_config(&config)?;
        Ok(Self::with_context(config, ctx))
    }

    pub fn with_context(config: Config, ctx: AuthContext) -> Self {
        let (tx, routes) = mpsc::unbounded_channel();
        let guard = ctx.guard(TerminalNavigator { routes: tx });
        Self {
            config,
            ctx,
            guard,
            routes,
        }
    }

    pub async fn execute(&mut self, command: Command) -> Result<()> {
        self.boot().await;

        match command {
            Command::Run => self.run().await,
            Command::Status => self.print_status(),
            Command::Logout => {
                self.ctx.session.logout().await;
                println!("Logged out.");
                Ok(())
            }
            Command::Refresh => {
                self.require_session()?;
                self.ctx
                    .session
                    .refresh()
                    .await
                    .map_err(|e| anyhow!(e.user_message()))?;
                println!("Session refreshed.");
                Ok(())
            }
            Command::Fetch(path) => self.fetch(&path).await,
            Command::Help => {
                println!("{}", USAGE);
                Ok(())
            }
        }
    }

    pub fn shutdown(&self) {
        self.ctx.shutdown();
    }

    /// Consult the credential store once. A store that cannot be read only
    /// costs the user a fresh login.
    async fn boot(&self) {
        match self.ctx.session.initialize().await {
            Ok(status) => debug!(?status, "Session restored"),
            Err(e) => {
                warn!(error = %e, "Could not read the saved session");
                eprintln!(
                    "Warning: could not read the saved session ({}). You will need to log in.",
                    e
                );
            }
        }
    }

    /// Render the hub through the guard until it lets us in.
    async fn run(&mut self) -> Result<()> {
        loop {
            let session = &self.ctx.session;
            match self.guard.render(|| hub_view(&session.snapshot())) {
                Rendered::Placeholder => {
                    println!("Loading...");
                    match tokio::time::timeout(LOADING_TIMEOUT, self.guard.changed()).await {
                        Ok(Some(_)) => {}
                        Ok(None) | Err(_) => bail!("The session did not finish loading"),
                    }
                }
                Rendered::Redirected => {
                    let mut navigated = false;
                    while let Ok(route) = self.routes.try_recv() {
                        navigated = true;
                        match route {
                            Route::Login => self.login_screen().await?,
                        }
                    }
                    if !navigated {
                        bail!("Not logged in");
                    }
                }
                Rendered::Content(view) => {
                    println!("{}", view);
                    return Ok(());
                }
            }
        }
    }

    async fn login_screen(&mut self) -> Result<()> {
        println!("\n=== Cafe-Dash Login ===\n");

        for attempt in 1..=MAX_LOGIN_ATTEMPTS {
            let identifier = self.prompt_identifier()?;
            let secret = rpassword::prompt_password("Password: ")?;

            println!("\nSigning in...");
            match self.ctx.session.login(&identifier, &secret).await {
                Ok(snapshot) => {
                    let name = snapshot
                        .user
                        .as_ref()
                        .map(|u| u.display_name().to_string())
                        .unwrap_or_else(|| identifier.clone());
                    println!("Welcome, {}!\n", name);
                    self.remember_identifier(identifier);
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Login failed");
                    println!("Login failed: {}\n", e.user_message());
                }
            }
        }

        bail!("Too many failed login attempts")
    }

    fn prompt_identifier(&self) -> Result<String> {
        let last = self.config.last_identifier.as_deref();
        match last {
            Some(last) => print!("Email or username [{}]: ", last),
            None => print!("Email or username: "),
        }
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(resolve_identifier(&input, last))
    }

    fn remember_identifier(&mut self, identifier: String) {
        if self.config.last_identifier.as_deref() == Some(identifier.as_str()) {
            return;
        }
        self.config.last_identifier = Some(identifier);
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }
    }

    fn print_status(&self) -> Result<()> {
        let snapshot = self.ctx.session.snapshot();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        Ok(())
    }

    async fn fetch(&self, path: &str) -> Result<()> {
        self.require_session()?;

        let value: serde_json::Value = self.ctx.client.get_json(path).await.map_err(|e| {
            if e.is_session_invalidated() {
                anyhow!("Session expired. Run `cafedash` to log in again.")
            } else {
                anyhow!("{}", e.user_message())
            }
        })?;
        info!(path, "Fetched");
        println!("{}", serde_json::to_string_pretty(&value)?);
        Ok(())
    }

    fn require_session(&self) -> Result<()> {
        if self.guard.decision() != GateDecision::Allow {
            bail!("Not logged in. Run `cafedash` to log in.");
        }
        Ok(())
    }
}

/// Empty input accepts the remembered identifier.
fn resolve_identifier(input: &str, last: Option<&str>) -> String {
    let input = input.trim();
    match last {
        Some(last) if input.is_empty() => last.to_string(),
        _ => input.to_string(),
    }
}

fn hub_view(snapshot: &SessionSnapshot) -> String {
    let name = snapshot
        .user
        .as_ref()
        .map(|u| u.display_name())
        .unwrap_or("guest");

    let mut view = format!("=== Cafe-Dash ===\nSigned in as {}", name);
    if let Some(at) = snapshot.authenticated_at {
        view.push_str(&format!(" (since {})", at.format("%Y-%m-%d %H:%M UTC")));
    }
    view
}
