use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::api::{BackendClient, user_facing};
use crate::auth::{AuthManager, AuthSession, SessionHealth, SessionStore};
use crate::config::AppConfig;
use crate::models::{
    DiagramType, GenerationStatus, OrgMember, OrgRole, Organization, Repository, Tier,
};
use crate::ratelimit::{ActionKind, RateLimitTracker};
use crate::services::{BillingService, OrgService, RepoService};
use crate::tui::view::TuiApp;

pub trait CommandHandler {
    fn handle(&mut self, line: &str, ui: &mut TuiApp);
}

/// Org context the user has switched into; absent means the personal space,
/// where the user acts as owner.
#[derive(Debug, Clone)]
struct OrgContext {
    org: Organization,
    role: OrgRole,
}

/// Shared pieces that background tasks mutate and later commands read.
#[derive(Clone)]
struct Shared {
    session: Arc<Mutex<Option<AuthSession>>>,
    org: Arc<Mutex<Option<OrgContext>>>,
    repos: Arc<Mutex<Vec<Repository>>>,
    members: Arc<Mutex<Vec<OrgMember>>>,
    tier: Arc<Mutex<Tier>>,
    limiter: Arc<Mutex<RateLimitTracker>>,
}

pub struct TuiExecutor {
    pub(crate) cfg: AppConfig,
    auth: AuthManager,
    repos: RepoService,
    orgs: OrgService,
    billing: BillingService,
    shared: Shared,
    pub(crate) ui_tx: Option<std::sync::mpsc::Sender<String>>,
    cancel: Option<CancellationToken>,
}

impl TuiExecutor {
    pub fn new(cfg: AppConfig) -> Result<Self> {
        let anon_key = cfg.anon_key.clone().unwrap_or_default();
        if anon_key.is_empty() {
            warn!("no anon key configured; backend will reject requests");
        }
        let client = BackendClient::new(cfg.backend_url.clone(), anon_key)?
            .with_backend_config(cfg.backend.clone());
        let store = match &cfg.session_dir {
            Some(dir) => SessionStore::new(dir.clone()),
            None => SessionStore::new_default(),
        }
        .context("open session store")?;
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
            shared: Shared {
                session: Arc::new(Mutex::new(None)),
                org: Arc::new(Mutex::new(None)),
                repos: Arc::new(Mutex::new(Vec::new())),
                members: Arc::new(Mutex::new(Vec::new())),
                tier: Arc::new(Mutex::new(Tier::Free)),
                limiter: Arc::new(Mutex::new(RateLimitTracker::new(Tier::Free))),
            },
            cfg,
            ui_tx: None,
            cancel: None,
        })
    }

    pub fn attach(&mut self, tx: std::sync::mpsc::Sender<String>) {
        self.ui_tx = Some(tx);
    }

    fn send(&self, msg: impl Into<String>) {
        if let Some(tx) = &self.ui_tx {
            let _ = tx.send(msg.into());
        }
    }

    /// Startup: load the cached credential, render optimistically, validate
    /// in the background. Runs off the UI thread so the login screen stays
    /// responsive.
    pub fn spawn_bootstrap(&self) {
        let Some(tx) = self.ui_tx.clone() else {
            return;
        };
        let auth = self.auth.clone();
        let billing = self.billing.clone();
        let shared = self.shared.clone();
        let rt = tokio::runtime::Handle::current();
        rt.spawn(async move {
            let _ = tx.send("::status:working".into());
            match auth.bootstrap().await {
                Ok(Some(session)) => {
                    let _ = tx.send(format!("::identity:{}", session.user.email));
                    let _ = tx.send("::screen:dashboard".into());
                    match session.health {
                        SessionHealth::Verified => {
                            let _ = tx.send(format!("[ok] signed in as {}", session.user.email));
                        }
                        SessionHealth::Unverified => {
                            let _ = tx.send(format!(
                                "[session] showing cached session for {}; could not verify with the server",
                                session.user.email
                            ));
                        }
                    }
                    let user_id = session.user.id;
                    *shared.session.lock().unwrap() = Some(session);
                    sync_tier(&billing, &shared, user_id).await;
                    let _ = tx.send("::status:idle".into());
                }
                Ok(None) => {
                    let _ = tx.send("[session] not signed in; use /login <email> <password>".into());
                    let _ = tx.send("::status:idle".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn current_user_id(&self) -> Option<Uuid> {
        self.shared
            .session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.user.id)
    }

    fn current_role(&self) -> OrgRole {
        self.shared
            .org
            .lock()
            .unwrap()
            .as_ref()
            .map(|ctx| ctx.role)
            .unwrap_or(OrgRole::Owner)
    }

    fn current_org_id(&self) -> Option<Uuid> {
        self.shared.org.lock().unwrap().as_ref().map(|c| c.org.id)
    }

    fn require_login(&self, ui: &mut TuiApp) -> Option<Uuid> {
        let id = self.current_user_id();
        if id.is_none() {
            ui.push_log("[denied] sign in first: /login <email> <password>");
        }
        id
    }

    /// Advisory rate-limit gate; the backend still enforces its own.
    fn acquire(&self, ui: &mut TuiApp, kind: ActionKind) -> bool {
        let mut limiter = self.shared.limiter.lock().unwrap();
        match limiter.try_acquire(kind, Utc::now()) {
            Ok(()) => true,
            Err(wait) => {
                ui.push_log(format!(
                    "[denied] {} limit reached; next slot in {}",
                    kind.label(),
                    fmt_duration(wait)
                ));
                false
            }
        }
    }

    fn gate_generate(&self, ui: &mut TuiApp) -> bool {
        let role = self.current_role();
        if !role.can_generate() {
            ui.push_log(format!("[denied] the {role} role is read-only"));
            return false;
        }
        true
    }

    fn new_cancel(&mut self) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancel = Some(token.clone());
        token
    }

    fn find_repo(&self, name: &str) -> Option<Repository> {
        self.shared
            .repos
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.full_name == name)
            .cloned()
    }

    fn find_member(&self, email: &str) -> Option<OrgMember> {
        self.shared
            .members
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.email == email)
            .cloned()
    }
}

/// Pull the profile row and size the advisory rate limits to its tier, so a
/// paid user is not held to free-tier limits before opening /billing.
async fn sync_tier(billing: &BillingService, shared: &Shared, user_id: Uuid) {
    match billing.profile(user_id).await {
        Ok(Some(profile)) => {
            {
                let mut limiter = shared.limiter.lock().unwrap();
                limiter.set_tier(profile.tier);
            }
            *shared.tier.lock().unwrap() = profile.tier;
        }
        Ok(None) => {}
        Err(e) => warn!("could not load profile for tier sync: {e:#}"),
    }
}

pub(crate) fn fmt_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs >= 86_400 {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3_600)
    } else if secs >= 3_600 {
        format!("{}h {}m", secs / 3_600, (secs % 3_600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

const HELP: &str = "/login <email> <pw>, /signup <email> <pw>, /logout\n\
/repos, /connect <owner/name>, /disconnect <owner/name>\n\
/diagram <owner/name> <flowchart|erd|sequence|component>, /readme <owner/name>\n\
/explain <owner/name> <type> <node-id>\n\
/orgs, /org create <name>, /org use <name>, /team\n\
/invite <email> <role>, /role <email> <role>, /remove <email>\n\
/billing, /upgrade <tier>, /portal, /pricing, /limits\n\
/cancel, /clear, /quit";

impl CommandHandler for TuiExecutor {
    fn handle(&mut self, line: &str, ui: &mut TuiApp) {
        if self.ui_tx.is_none() {
            self.ui_tx = ui.sender();
        }
        let line = line.trim().to_string();
        if line.is_empty() {
            return;
        }
        ui.push_log(format!("> {line}"));
        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        match cmd {
            "/help" => {
                for l in HELP.lines() {
                    ui.push_log(l.to_string());
                }
            }
            "/clear" => ui.log.clear(),
            "/cancel" => {
                if let Some(token) = self.cancel.take() {
                    token.cancel();
                    self.send("::status:cancelled");
                    ui.push_log("[Cancelled]");
                } else {
                    ui.push_log("[no running task]");
                }
            }
            "/login" | "/signup" => self.cmd_login(ui, cmd, &args),
            "/logout" => self.cmd_logout(ui),
            "/repos" => self.cmd_repos(ui),
            "/connect" => self.cmd_connect(ui, &args),
            "/disconnect" => self.cmd_disconnect(ui, &args),
            "/diagram" => self.cmd_diagram(ui, &args),
            "/readme" => self.cmd_readme(ui, &args),
            "/explain" => self.cmd_explain(ui, &args),
            "/orgs" => self.cmd_orgs(ui),
            "/org" => self.cmd_org(ui, &args),
            "/team" => self.cmd_team(ui),
            "/invite" => self.cmd_invite(ui, &args),
            "/role" => self.cmd_role(ui, &args),
            "/remove" => self.cmd_remove(ui, &args),
            "/billing" => self.cmd_billing(ui),
            "/upgrade" => self.cmd_upgrade(ui, &args),
            "/portal" => self.cmd_portal(ui),
            "/pricing" => self.cmd_pricing(ui),
            "/limits" => self.cmd_limits(ui),
            _ => ui.push_log("[unknown command] see /help"),
        }
    }
}

impl TuiExecutor {
    fn cmd_login(&mut self, ui: &mut TuiApp, cmd: &str, args: &[&str]) {
        let [email, password] = args else {
            ui.push_log(format!("usage: {cmd} <email> <password>"));
            return;
        };
        let signup = cmd == "/signup";
        let auth = self.auth.clone();
        let billing = self.billing.clone();
        let shared = self.shared.clone();
        let (email, password) = (email.to_string(), password.to_string());
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            let res = if signup {
                auth.sign_up(&email, &password).await
            } else {
                auth.sign_in(&email, &password).await
            };
            match res {
                Ok(session) => {
                    let _ = tx.send(format!("::identity:{}", session.user.email));
                    let _ = tx.send("::screen:dashboard".into());
                    let _ = tx.send(format!("[ok] signed in as {}", session.user.email));
                    let user_id = session.user.id;
                    *shared.session.lock().unwrap() = Some(session);
                    sync_tier(&billing, &shared, user_id).await;
                    let _ = tx.send("::status:idle".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_logout(&mut self, ui: &mut TuiApp) {
        if self.current_user_id().is_none() {
            ui.push_log("[session] not signed in");
            return;
        }
        let auth = self.auth.clone();
        let shared = self.shared.clone();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            match auth.sign_out().await {
                Ok(()) => {
                    *shared.session.lock().unwrap() = None;
                    *shared.org.lock().unwrap() = None;
                    shared.repos.lock().unwrap().clear();
                    shared.members.lock().unwrap().clear();
                    let _ = tx.send("::identity:clear".into());
                    let _ = tx.send("[ok] signed out".into());
                    let _ = tx.send("::status:idle".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_repos(&mut self, ui: &mut TuiApp) {
        let Some(user_id) = self.require_login(ui) else {
            return;
        };
        let repos = self.repos.clone();
        let shared = self.shared.clone();
        let org_id = self.current_org_id();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            match repos.list(user_id, org_id).await {
                Ok(rows) => {
                    let _ = tx.send("::screen:dashboard".into());
                    if rows.is_empty() {
                        let _ = tx.send("[repos] none connected; use /connect <owner/name>".into());
                    }
                    for r in &rows {
                        let _ = tx.send(format!("{}  [{}]", r.full_name, r.status.as_str()));
                    }
                    *shared.repos.lock().unwrap() = rows;
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_connect(&mut self, ui: &mut TuiApp, args: &[&str]) {
        let [name] = args else {
            ui.push_log("usage: /connect <owner/name>");
            return;
        };
        let Some(user_id) = self.require_login(ui) else {
            return;
        };
        if !self.gate_generate(ui) {
            return;
        }
        let repos = self.repos.clone();
        let shared = self.shared.clone();
        let org_id = self.current_org_id();
        let name = name.to_string();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            match repos.connect(user_id, org_id, &name).await {
                Ok(repo) => {
                    let _ = tx.send(format!("[ok] connected {}", repo.full_name));
                    shared.repos.lock().unwrap().push(repo);
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_disconnect(&mut self, ui: &mut TuiApp, args: &[&str]) {
        let [name] = args else {
            ui.push_log("usage: /disconnect <owner/name>");
            return;
        };
        if self.require_login(ui).is_none() || !self.gate_generate(ui) {
            return;
        }
        let Some(repo) = self.find_repo(name) else {
            ui.push_log(format!("[error] unknown repository {name}; run /repos first"));
            return;
        };
        let repos = self.repos.clone();
        let shared = self.shared.clone();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            match repos.disconnect(repo.id).await {
                Ok(()) => {
                    shared.repos.lock().unwrap().retain(|r| r.id != repo.id);
                    let _ = tx.send(format!("[ok] disconnected {}", repo.full_name));
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_diagram(&mut self, ui: &mut TuiApp, args: &[&str]) {
        let [name, ty] = args else {
            ui.push_log("usage: /diagram <owner/name> <flowchart|erd|sequence|component>");
            return;
        };
        let ty: DiagramType = match ty.parse() {
            Ok(t) => t,
            Err(e) => {
                ui.push_log(format!("[error] {e}"));
                return;
            }
        };
        if self.require_login(ui).is_none() {
            return;
        }
        let Some(repo) = self.find_repo(name) else {
            ui.push_log(format!("[error] unknown repository {name}; run /repos first"));
            return;
        };
        let role = self.current_role();
        let repos = self.repos.clone();
        let shared = self.shared.clone();
        let cancel = self.new_cancel();
        let interval = Duration::from_millis(self.cfg.poll_interval_ms);
        let deadline = Duration::from_millis(self.cfg.poll_deadline_ms);
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            let _ = tx.send("::screen:diagram".into());
            // A stored diagram renders for every role and consumes no budget;
            // the role and rate-limit gates apply to generation only.
            match repos.diagrams(repo.id).await {
                Ok(rows) => {
                    if let Some(row) = rows.into_iter().find(|d| {
                        d.diagram_type == ty && d.status == GenerationStatus::Ready
                    }) {
                        let _ = tx.send(format!("[ok] {ty} diagram for {}", repo.full_name));
                        for line in row.content.unwrap_or_default().lines() {
                            let _ = tx.send(line.to_string());
                        }
                        let _ = tx.send("::status:done".into());
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                    return;
                }
            }
            if !role.can_generate() {
                let _ = tx.send(format!("[denied] the {role} role is read-only"));
                let _ = tx.send("::status:idle".into());
                return;
            }
            let wait = {
                let mut limiter = shared.limiter.lock().unwrap();
                limiter.try_acquire(ActionKind::Diagram, Utc::now()).err()
            };
            if let Some(wait) = wait {
                let _ = tx.send(format!(
                    "[denied] {} limit reached; next slot in {}",
                    ActionKind::Diagram.label(),
                    fmt_duration(wait)
                ));
                let _ = tx.send("::status:idle".into());
                return;
            }
            match repos.generate_diagram(repo.id, ty, Some(cancel.clone())).await {
                Ok(_) => {
                    let _ = tx.send(format!(
                        "[generating] {ty} diagram for {}; waiting for the service",
                        repo.full_name
                    ));
                    match repos
                        .poll_diagram_status(repo.id, ty, interval, deadline, Some(cancel.clone()))
                        .await
                    {
                        Ok(GenerationStatus::Ready) => {
                            match repos.diagrams(repo.id).await {
                                Ok(rows) => {
                                    let content = rows
                                        .into_iter()
                                        .find(|d| d.diagram_type == ty)
                                        .and_then(|d| d.content)
                                        .unwrap_or_default();
                                    let _ = tx.send(format!(
                                        "[ok] {ty} diagram for {}",
                                        repo.full_name
                                    ));
                                    for line in content.lines() {
                                        let _ = tx.send(line.to_string());
                                    }
                                    let _ = tx.send("::status:done".into());
                                }
                                Err(e) => {
                                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                                    let _ = tx.send("::status:error".into());
                                }
                            }
                        }
                        Ok(GenerationStatus::Error) => {
                            let _ = tx.send("[error] generation failed on the server".into());
                            let _ = tx.send("::status:error".into());
                        }
                        Ok(status) => {
                            let _ = tx.send(format!(
                                "[pending] generation still {}; check again with /diagram",
                                status.as_str()
                            ));
                            let _ = tx.send("::status:idle".into());
                        }
                        Err(e) => {
                            let _ = tx.send(format!("[error] {}", user_facing(&e)));
                            let _ = tx.send("::status:error".into());
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_readme(&mut self, ui: &mut TuiApp, args: &[&str]) {
        let [name] = args else {
            ui.push_log("usage: /readme <owner/name>");
            return;
        };
        if self.require_login(ui).is_none() {
            return;
        }
        let Some(repo) = self.find_repo(name) else {
            ui.push_log(format!("[error] unknown repository {name}; run /repos first"));
            return;
        };
        // A stored README renders for every role and consumes no budget;
        // only the generation branch below is gated.
        if repo.status == GenerationStatus::Ready
            && let Some(content) = repo.readme_content.clone()
        {
            self.send("::screen:readme");
            ui.push_log(format!("[ok] README for {}", repo.full_name));
            for line in content.lines() {
                ui.push_log(line.to_string());
            }
            return;
        }
        if !self.gate_generate(ui) || !self.acquire(ui, ActionKind::Readme) {
            return;
        }
        let repos = self.repos.clone();
        let cancel = self.new_cancel();
        let interval = Duration::from_millis(self.cfg.poll_interval_ms);
        let deadline = Duration::from_millis(self.cfg.poll_deadline_ms);
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            let _ = tx.send("::screen:readme".into());
            let res: Result<()> = async {
                repos.generate_readme(repo.id, Some(cancel.clone())).await?;
                let status = repos
                    .poll_readme_status(repo.id, interval, deadline, Some(cancel.clone()))
                    .await?;
                match status {
                    GenerationStatus::Ready => {
                        let fresh = repos.get(repo.id).await?;
                        let _ = tx.send(format!("[ok] README for {}", fresh.full_name));
                        for line in fresh.readme_content.unwrap_or_default().lines() {
                            let _ = tx.send(line.to_string());
                        }
                        let _ = tx.send("::status:done".into());
                    }
                    GenerationStatus::Error => {
                        let _ = tx.send("[error] generation failed on the server".into());
                        let _ = tx.send("::status:error".into());
                    }
                    status => {
                        let _ = tx.send(format!(
                            "[pending] generation still {}; check again with /readme",
                            status.as_str()
                        ));
                        let _ = tx.send("::status:idle".into());
                    }
                }
                Ok(())
            }
            .await;
            if let Err(e) = res {
                let _ = tx.send(format!("[error] {}", user_facing(&e)));
                let _ = tx.send("::status:error".into());
            }
        });
    }

    fn cmd_explain(&mut self, ui: &mut TuiApp, args: &[&str]) {
        let [name, ty, node_id] = args else {
            ui.push_log("usage: /explain <owner/name> <type> <node-id>");
            return;
        };
        let ty: DiagramType = match ty.parse() {
            Ok(t) => t,
            Err(e) => {
                ui.push_log(format!("[error] {e}"));
                return;
            }
        };
        if self.require_login(ui).is_none() {
            return;
        }
        let Some(repo) = self.find_repo(name) else {
            ui.push_log(format!("[error] unknown repository {name}; run /repos first"));
            return;
        };
        if !self.acquire(ui, ActionKind::Explain) {
            return;
        }
        let repos = self.repos.clone();
        let cancel = self.new_cancel();
        let node_id = node_id.to_string();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            match repos.explain_node(repo.id, ty, &node_id, Some(cancel)).await {
                Ok(explanation) => {
                    let _ = tx.send(format!("[ok] {node_id}:"));
                    for line in explanation.lines() {
                        let _ = tx.send(line.to_string());
                    }
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_orgs(&mut self, ui: &mut TuiApp) {
        let Some(user_id) = self.require_login(ui) else {
            return;
        };
        let orgs = self.orgs.clone();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            match orgs.list_for_user(user_id).await {
                Ok(rows) => {
                    if rows.is_empty() {
                        let _ = tx.send("[orgs] none; use /org create <name>".into());
                    }
                    for org in rows {
                        let _ = tx.send(format!("{}", org.name));
                    }
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_org(&mut self, ui: &mut TuiApp, args: &[&str]) {
        match args {
            ["create", name @ ..] if !name.is_empty() => {
                let name = name.join(" ");
                let Some(user_id) = self.require_login(ui) else {
                    return;
                };
                let email = self
                    .shared
                    .session
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|s| s.user.email.clone())
                    .unwrap_or_default();
                let orgs = self.orgs.clone();
                let shared = self.shared.clone();
                let Some(tx) = self.ui_tx.clone() else { return };
                self.send("::status:working");
                tokio::runtime::Handle::current().spawn(async move {
                    match orgs.create(&name, user_id, &email).await {
                        Ok(org) => {
                            let _ = tx.send(format!("[ok] created organization {}", org.name));
                            *shared.org.lock().unwrap() = Some(OrgContext {
                                org,
                                role: OrgRole::Owner,
                            });
                            let _ = tx.send("::status:done".into());
                        }
                        Err(e) => {
                            let _ = tx.send(format!("[error] {}", user_facing(&e)));
                            let _ = tx.send("::status:error".into());
                        }
                    }
                });
            }
            ["use", name] => self.cmd_org_use(ui, name),
            ["none"] => {
                *self.shared.org.lock().unwrap() = None;
                ui.push_log("[ok] back to your personal space");
            }
            _ => ui.push_log("usage: /org create <name> | /org use <name> | /org none"),
        }
    }

    fn cmd_org_use(&mut self, ui: &mut TuiApp, name: &str) {
        let Some(user_id) = self.require_login(ui) else {
            return;
        };
        let orgs = self.orgs.clone();
        let shared = self.shared.clone();
        let name = name.to_string();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            let res: Result<()> = async {
                let all = orgs.list_for_user(user_id).await?;
                let org = all
                    .into_iter()
                    .find(|o| o.name == name)
                    .ok_or_else(|| anyhow!("you are not a member of {name}"))?;
                let role = orgs
                    .memberships(user_id)
                    .await?
                    .into_iter()
                    .find(|m| m.org_id == org.id)
                    .map(|m| m.role)
                    .unwrap_or(OrgRole::Viewer);
                let _ = tx.send(format!("[ok] switched to {} as {}", org.name, role));
                *shared.org.lock().unwrap() = Some(OrgContext { org, role });
                shared.repos.lock().unwrap().clear();
                Ok(())
            }
            .await;
            match res {
                Ok(()) => {
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {e:#}"));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_team(&mut self, ui: &mut TuiApp) {
        if self.require_login(ui).is_none() {
            return;
        }
        let Some(org_id) = self.current_org_id() else {
            ui.push_log("[team] no organization selected; use /org use <name>");
            return;
        };
        let orgs = self.orgs.clone();
        let shared = self.shared.clone();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            match orgs.members(org_id).await {
                Ok(rows) => {
                    let _ = tx.send("::screen:team".into());
                    for m in &rows {
                        let _ = tx.send(format!("{}  [{}]", m.email, m.role));
                    }
                    *shared.members.lock().unwrap() = rows;
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_invite(&mut self, ui: &mut TuiApp, args: &[&str]) {
        let [email, role] = args else {
            ui.push_log("usage: /invite <email> <owner|admin|member|viewer>");
            return;
        };
        let role: OrgRole = match role.parse() {
            Ok(r) => r,
            Err(e) => {
                ui.push_log(format!("[error] {e}"));
                return;
            }
        };
        if self.require_login(ui).is_none() {
            return;
        }
        let Some(org_id) = self.current_org_id() else {
            ui.push_log("[team] no organization selected; use /org use <name>");
            return;
        };
        let actor_role = self.current_role();
        let orgs = self.orgs.clone();
        let shared = self.shared.clone();
        let email = email.to_string();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            match orgs.invite(actor_role, org_id, &email, role).await {
                Ok(member) => {
                    let _ = tx.send(format!("[ok] invited {} as {}", member.email, member.role));
                    shared.members.lock().unwrap().push(member);
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[denied] {e:#}"));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_role(&mut self, ui: &mut TuiApp, args: &[&str]) {
        let [email, role] = args else {
            ui.push_log("usage: /role <email> <owner|admin|member|viewer>");
            return;
        };
        let new_role: OrgRole = match role.parse() {
            Ok(r) => r,
            Err(e) => {
                ui.push_log(format!("[error] {e}"));
                return;
            }
        };
        if self.require_login(ui).is_none() {
            return;
        }
        let Some(member) = self.find_member(email) else {
            ui.push_log(format!("[error] unknown member {email}; run /team first"));
            return;
        };
        let actor_role = self.current_role();
        let orgs = self.orgs.clone();
        let shared = self.shared.clone();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            match orgs.change_role(actor_role, &member, new_role).await {
                Ok(updated) => {
                    let _ = tx.send(format!("[ok] {} is now {}", updated.email, updated.role));
                    let mut members = shared.members.lock().unwrap();
                    if let Some(slot) = members.iter_mut().find(|m| m.id == updated.id) {
                        *slot = updated;
                    }
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[denied] {e:#}"));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_remove(&mut self, ui: &mut TuiApp, args: &[&str]) {
        let [email] = args else {
            ui.push_log("usage: /remove <email>");
            return;
        };
        if self.require_login(ui).is_none() {
            return;
        }
        let Some(member) = self.find_member(email) else {
            ui.push_log(format!("[error] unknown member {email}; run /team first"));
            return;
        };
        let actor_role = self.current_role();
        let orgs = self.orgs.clone();
        let shared = self.shared.clone();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            match orgs.remove(actor_role, &member).await {
                Ok(()) => {
                    shared.members.lock().unwrap().retain(|m| m.id != member.id);
                    let _ = tx.send(format!("[ok] removed {}", member.email));
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[denied] {e:#}"));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_billing(&mut self, ui: &mut TuiApp) {
        let Some(user_id) = self.require_login(ui) else {
            return;
        };
        if !self.current_role().can_manage_billing() {
            ui.push_log("[denied] only the owner can view billing");
            return;
        }
        let billing = self.billing.clone();
        let shared = self.shared.clone();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            let res: Result<()> = async {
                let _ = tx.send("::screen:billing".into());
                let sub = billing.subscription(user_id).await?;
                match &sub {
                    Some(sub) => {
                        let period = sub
                            .current_period_end
                            .map(|t| t.format(" until %Y-%m-%d").to_string())
                            .unwrap_or_default();
                        let _ = tx.send(format!(
                            "[billing] {} ({:?}){}{}",
                            sub.tier,
                            sub.status,
                            period,
                            if sub.cancel_at_period_end {
                                ", cancels at period end"
                            } else {
                                ""
                            }
                        ));
                        let mut limiter = shared.limiter.lock().unwrap();
                        limiter.set_tier(sub.tier);
                        *shared.tier.lock().unwrap() = sub.tier;
                    }
                    None => {
                        // No subscription row: the profile still tells us the
                        // effective tier and usage so far.
                        let profile = billing.profile(user_id).await?;
                        let tier = profile.as_ref().map(|p| p.tier).unwrap_or(Tier::Free);
                        let _ = tx.send(format!(
                            "[billing] {tier} tier; /upgrade pro to change"
                        ));
                        if let Some(p) = profile {
                            let _ = tx.send(format!(
                                "[billing] used so far: {} diagrams, {} READMEs",
                                p.diagrams_generated, p.readmes_generated
                            ));
                        }
                        let mut limiter = shared.limiter.lock().unwrap();
                        limiter.set_tier(tier);
                        *shared.tier.lock().unwrap() = tier;
                    }
                }
                let payments = billing.payments(user_id).await?;
                if payments.is_empty() {
                    let _ = tx.send("[billing] no payments yet".into());
                }
                for p in payments.iter().take(10) {
                    let _ = tx.send(format!(
                        "{}  {:>8.2} {}  {}  {}",
                        p.created_at.format("%Y-%m-%d"),
                        p.amount_cents as f64 / 100.0,
                        p.currency,
                        p.status,
                        p.description.as_deref().unwrap_or("-"),
                    ));
                }
                Ok(())
            }
            .await;
            match res {
                Ok(()) => {
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_upgrade(&mut self, ui: &mut TuiApp, args: &[&str]) {
        let [tier] = args else {
            ui.push_log("usage: /upgrade <free|pro|enterprise>");
            return;
        };
        let tier: Tier = match tier.parse() {
            Ok(t) => t,
            Err(e) => {
                ui.push_log(format!("[error] {e}"));
                return;
            }
        };
        if self.require_login(ui).is_none() {
            return;
        }
        if !self.current_role().can_manage_billing() {
            ui.push_log("[denied] only the owner can change billing");
            return;
        }
        let billing = self.billing.clone();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            match billing.checkout_url(tier).await {
                Ok(url) => {
                    let _ = tx.send(format!("[ok] open this checkout link: {url}"));
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_portal(&mut self, ui: &mut TuiApp) {
        if self.require_login(ui).is_none() {
            return;
        }
        if !self.current_role().can_manage_billing() {
            ui.push_log("[denied] only the owner can change billing");
            return;
        }
        let billing = self.billing.clone();
        let Some(tx) = self.ui_tx.clone() else { return };
        self.send("::status:working");
        tokio::runtime::Handle::current().spawn(async move {
            match billing.portal_url().await {
                Ok(url) => {
                    let _ = tx.send(format!("[ok] open the billing portal: {url}"));
                    let _ = tx.send("::status:done".into());
                }
                Err(e) => {
                    let _ = tx.send(format!("[error] {}", user_facing(&e)));
                    let _ = tx.send("::status:error".into());
                }
            }
        });
    }

    fn cmd_pricing(&mut self, ui: &mut TuiApp) {
        self.send("::screen:pricing");
        for row in self.billing.pricing() {
            ui.push_log(format!(
                "{:<12} ${}/mo  {} repos, {} diagrams/mo, {} READMEs/mo",
                row.tier.label(),
                row.price_usd_month,
                row.max_repos,
                row.diagrams_per_month,
                row.readmes_per_month,
            ));
        }
    }

    fn cmd_limits(&mut self, ui: &mut TuiApp) {
        let now = Utc::now();
        let tier = *self.shared.tier.lock().unwrap();
        let mut limiter = self.shared.limiter.lock().unwrap();
        ui.push_log(format!("[limits] tier: {tier}"));
        for kind in [ActionKind::Diagram, ActionKind::Readme, ActionKind::Explain] {
            let remaining = limiter.remaining(kind, now);
            let wait = limiter.cooldown(kind, now);
            if wait > chrono::Duration::zero() {
                ui.push_log(format!(
                    "{}: exhausted, next slot in {}",
                    kind.label(),
                    fmt_duration(wait)
                ));
            } else {
                ui.push_log(format!("{}: {} remaining", kind.label(), remaining));
            }
        }
    }
}
