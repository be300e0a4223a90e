mod api;
mod auth;
mod cli;
mod config;
mod logging;
mod models;
mod ratelimit;
mod services;
mod tui;

use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Parser};
use dotenvy::dotenv;
use tracing::info;

use crate::api::{BackendClient, user_facing};
use crate::auth::{AuthManager, AuthSession, SessionStore};
use crate::config::AppConfig;
use crate::models::{DiagramType, GenerationStatus, Repository};
use crate::services::repos::DiagramSelection;
use crate::services::{BillingService, OrgService, RepoService};
use crate::tui::commands::TuiExecutor;
use crate::tui::view::TuiApp;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "mivna",
    version,
    about = "Terminal client for the Mivna diagram service (CLI/TUI)"
)]
pub struct Cli {
    /// Use plain CLI mode (disable TUI)
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_tui: bool,

    /// Backend root URL
    #[arg(long, default_value = "")]
    pub backend_url: String,

    /// Publishable API key (set via env MIVNA_ANON_KEY recommended)
    #[arg(long)]
    pub anon_key: Option<String>,

    /// Organization to work in
    #[arg(long)]
    pub org: Option<String>,

    /// Log level (error,warn,info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level)?;

    let no_tui = cli.no_tui;
    let cfg = AppConfig::from_cli(cli)?;
    info!(backend=%cfg.backend_url, "app config resolved");

    if no_tui {
        run_cli_loop(cfg).await
    } else {
        run_tui(cfg).await
    }
}

async fn run_tui(cfg: AppConfig) -> Result<()> {
    let default_org = cfg.default_org.clone();
    let mut exec = TuiExecutor::new(cfg)?;
    let mut app = TuiApp::new("mivna - /help, /quit to exit");
    app.push_log("Welcome to mivna");
    app.push_log("Type /help to list commands");
    if let Some(org) = default_org {
        app.push_log(format!("[org] configured default: {org}; /org use {org} after signing in"));
    }
    if let Some(tx) = app.sender() {
        exec.attach(tx);
    }
    exec.spawn_bootstrap();
    let mut app = app.with_handler(Box::new(exec));
    app.run()
}

struct CliSession {
    auth: AuthManager,
    repos: RepoService,
    orgs: OrgService,
    billing: BillingService,
    session: Option<AuthSession>,
    repo_cache: Vec<Repository>,
    poll_interval: Duration,
    poll_deadline: Duration,
}

impl CliSession {
    fn new(cfg: &AppConfig) -> Result<Self> {
        let client = BackendClient::new(
            cfg.backend_url.clone(),
            cfg.anon_key.clone().unwrap_or_default(),
        )?
        .with_backend_config(cfg.backend.clone());
        let store = match &cfg.session_dir {
            Some(dir) => SessionStore::new(dir.clone()),
            None => SessionStore::new_default(),
        }?;
        let auth = AuthManager::new(
            client.clone(),
            store,
            Duration::from_millis(cfg.bootstrap_timeout_ms),
        );
        Ok(Self {
            auth,
            repos: RepoService::new(client.clone()),
            orgs: OrgService::new(client.clone()),
            billing: BillingService::new(client),
            session: None,
            repo_cache: Vec::new(),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            poll_deadline: Duration::from_millis(cfg.poll_deadline_ms),
        })
    }

    fn user_id(&self) -> Option<uuid::Uuid> {
        self.session.as_ref().map(|s| s.user.id)
    }

    async fn resolve_repo(&mut self, name: &str) -> Result<Option<Repository>> {
        if let Some(repo) = self.repo_cache.iter().find(|r| r.full_name == name) {
            return Ok(Some(repo.clone()));
        }
        let Some(user_id) = self.user_id() else {
            return Ok(None);
        };
        self.repo_cache = self.repos.list(user_id, None).await?;
        Ok(self
            .repo_cache
            .iter()
            .find(|r| r.full_name == name)
            .cloned())
    }
}

async fn run_cli_loop(cfg: AppConfig) -> Result<()> {
    use std::io::{BufRead, BufReader};

    println!("mivna (CLI) - type /help for commands");
    let mut state = CliSession::new(&cfg)?;

    match state.auth.bootstrap().await {
        Ok(Some(session)) => {
            println!("signed in as {}", session.user.email);
            state.session = Some(session);
        }
        Ok(None) => println!("not signed in; use /login <email> <password>"),
        Err(e) => eprintln!("session error: {}", user_facing(&e)),
    }

    let stdin = io::stdin();
    let reader = BufReader::new(stdin).lines();
    for line in reader {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Some(quit) = cli::handle_command(&line) {
            if quit {
                break;
            }
            continue;
        }
        if let Err(e) = handle_backend_command(&mut state, &line).await {
            eprintln!("error: {}", user_facing(&e));
        }
    }
    Ok(())
}

async fn handle_backend_command(state: &mut CliSession, line: &str) -> Result<()> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (cmd, args.as_slice()) {
        ("/login", [email, password]) => {
            let session = state.auth.sign_in(email, password).await?;
            println!("signed in as {}", session.user.email);
            state.session = Some(session);
        }
        ("/signup", [email, password]) => {
            let session = state.auth.sign_up(email, password).await?;
            println!("signed in as {}", session.user.email);
            state.session = Some(session);
        }
        ("/logout", []) => {
            state.auth.sign_out().await?;
            state.session = None;
            state.repo_cache.clear();
            println!("signed out");
        }
        ("/repos", []) => {
            let Some(user_id) = state.user_id() else {
                println!("sign in first");
                return Ok(());
            };
            state.repo_cache = state.repos.list(user_id, None).await?;
            if state.repo_cache.is_empty() {
                println!("no repositories connected; use /connect <owner/name>");
            }
            for r in &state.repo_cache {
                println!("{}  [{}]", r.full_name, r.status.as_str());
            }
        }
        ("/connect", [name]) => {
            let Some(user_id) = state.user_id() else {
                println!("sign in first");
                return Ok(());
            };
            let repo = state.repos.connect(user_id, None, name).await?;
            println!("connected {}", repo.full_name);
            state.repo_cache.push(repo);
        }
        ("/disconnect", [name]) => {
            let Some(repo) = state.resolve_repo(name).await? else {
                println!("unknown repository: {name}");
                return Ok(());
            };
            state.repos.disconnect(repo.id).await?;
            state.repo_cache.retain(|r| r.id != repo.id);
            println!("disconnected {}", repo.full_name);
        }
        ("/diagram", [name, ty]) => {
            let ty: DiagramType = match ty.parse() {
                Ok(t) => t,
                Err(e) => {
                    println!("{e}");
                    return Ok(());
                }
            };
            let Some(repo) = state.resolve_repo(name).await? else {
                println!("unknown repository: {name}");
                return Ok(());
            };
            match state.repos.select_diagram(repo.id, ty, None).await? {
                DiagramSelection::Ready(row) => {
                    println!("{}", row.content.unwrap_or_default());
                }
                DiagramSelection::Requested(_) => {
                    println!("generating {ty} diagram for {}...", repo.full_name);
                    let status = state
                        .repos
                        .poll_diagram_status(
                            repo.id,
                            ty,
                            state.poll_interval,
                            state.poll_deadline,
                            None,
                        )
                        .await?;
                    match status {
                        GenerationStatus::Ready => {
                            let content = state
                                .repos
                                .diagrams(repo.id)
                                .await?
                                .into_iter()
                                .find(|d| d.diagram_type == ty)
                                .and_then(|d| d.content)
                                .unwrap_or_default();
                            println!("{content}");
                        }
                        other => println!("generation ended as: {}", other.as_str()),
                    }
                }
            }
        }
        ("/readme", [name]) => {
            let Some(repo) = state.resolve_repo(name).await? else {
                println!("unknown repository: {name}");
                return Ok(());
            };
            if repo.status == GenerationStatus::Ready
                && let Some(content) = repo.readme_content
            {
                println!("{content}");
                return Ok(());
            }
            state.repos.generate_readme(repo.id, None).await?;
            println!("generating README for {}...", repo.full_name);
            let status = state
                .repos
                .poll_readme_status(repo.id, state.poll_interval, state.poll_deadline, None)
                .await?;
            match status {
                GenerationStatus::Ready => {
                    let fresh = state.repos.get(repo.id).await?;
                    println!("{}", fresh.readme_content.unwrap_or_default());
                }
                other => println!("generation ended as: {}", other.as_str()),
            }
        }
        ("/orgs", []) => {
            let Some(user_id) = state.user_id() else {
                println!("sign in first");
                return Ok(());
            };
            let orgs = state.orgs.list_for_user(user_id).await?;
            if orgs.is_empty() {
                println!("no organizations");
            }
            for org in orgs {
                println!("{}", org.name);
            }
        }
        ("/pricing", []) => {
            for row in state.billing.pricing() {
                println!(
                    "{:<12} ${}/mo  {} repos, {} diagrams/mo, {} READMEs/mo",
                    row.tier.label(),
                    row.price_usd_month,
                    row.max_repos,
                    row.diagrams_per_month,
                    row.readmes_per_month,
                );
            }
        }
        _ => println!("unknown command or bad arguments; see /help"),
    }
    Ok(())
}
