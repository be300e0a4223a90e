//! Records mirrored from the hosted database, plus the small pure helpers
//! the UI needs (tier limits, role gating, diagram variants).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

/// Usage ceilings displayed in the UI and used for client-side bookkeeping.
/// The backend enforces its own copy of these numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub max_repos: u32,
    pub diagrams_per_month: u32,
    pub readmes_per_month: u32,
    pub explains_per_day: u32,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Pro, Tier::Enterprise];

    pub fn limits(&self) -> TierLimits {
        match self {
            Tier::Free => TierLimits {
                max_repos: 3,
                diagrams_per_month: 10,
                readmes_per_month: 5,
                explains_per_day: 20,
            },
            Tier::Pro => TierLimits {
                max_repos: 25,
                diagrams_per_month: 200,
                readmes_per_month: 100,
                explains_per_day: 500,
            },
            Tier::Enterprise => TierLimits {
                max_repos: 500,
                diagrams_per_month: 5_000,
                readmes_per_month: 2_500,
                explains_per_day: 10_000,
            },
        }
    }

    /// Monthly price in whole US dollars, for the pricing screen.
    pub fn price_usd_month(&self) -> u32 {
        match self {
            Tier::Free => 0,
            Tier::Pro => 19,
            Tier::Enterprise => 99,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Free => "Free",
            Tier::Pro => "Pro",
            Tier::Enterprise => "Enterprise",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub tier: Tier,
    #[serde(default)]
    pub diagrams_generated: u32,
    #[serde(default)]
    pub readmes_generated: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

impl GenerationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Ready | GenerationStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Ready => "ready",
            GenerationStatus::Error => "error",
        }
    }
}

/// A connected GitHub repository. `full_name` is the GitHub `owner/name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(default)]
    pub org_id: Option<Uuid>,
    pub full_name: String,
    pub status: GenerationStatus,
    #[serde(default)]
    pub readme_content: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramType {
    Flowchart,
    Erd,
    Sequence,
    Component,
}

impl DiagramType {
    pub const ALL: [DiagramType; 4] = [
        DiagramType::Flowchart,
        DiagramType::Erd,
        DiagramType::Sequence,
        DiagramType::Component,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramType::Flowchart => "flowchart",
            DiagramType::Erd => "erd",
            DiagramType::Sequence => "sequence",
            DiagramType::Component => "component",
        }
    }
}

impl fmt::Display for DiagramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiagramType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flowchart" => Ok(DiagramType::Flowchart),
            "erd" => Ok(DiagramType::Erd),
            "sequence" => Ok(DiagramType::Sequence),
            "component" => Ok(DiagramType::Component),
            other => Err(format!(
                "unknown diagram type: {other} (expected flowchart, erd, sequence or component)"
            )),
        }
    }
}

/// One row per (repository, diagram type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDiagram {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub diagram_type: DiagramType,
    pub status: GenerationStatus,
    #[serde(default)]
    pub content: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Owner => "owner",
            OrgRole::Admin => "admin",
            OrgRole::Member => "member",
            OrgRole::Viewer => "viewer",
        }
    }

    /// Everyone in the org can read repos and diagrams.
    pub fn can_view(&self) -> bool {
        true
    }

    /// Viewers are read-only; everyone else may trigger generation.
    pub fn can_generate(&self) -> bool {
        !matches!(self, OrgRole::Viewer)
    }

    pub fn can_manage_members(&self) -> bool {
        matches!(self, OrgRole::Owner | OrgRole::Admin)
    }

    pub fn can_manage_billing(&self) -> bool {
        matches!(self, OrgRole::Owner)
    }

    /// Whether this role may set a member to `target` or modify a member that
    /// currently holds `target`. Admins cannot touch owners.
    pub fn can_assign(&self, target: OrgRole) -> bool {
        match self {
            OrgRole::Owner => true,
            OrgRole::Admin => !matches!(target, OrgRole::Owner),
            _ => false,
        }
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(OrgRole::Owner),
            "admin" => Ok(OrgRole::Admin),
            "member" => Ok(OrgRole::Member),
            "viewer" => Ok(OrgRole::Viewer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgMember {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub role: OrgRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Validate a GitHub `owner/name` string before sending it anywhere.
pub fn parse_full_name(input: &str) -> Result<String, String> {
    let trimmed = input.trim().trim_matches('/');
    let mut parts = trimmed.split('/');
    let (owner, name) = match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => (owner, name),
        _ => return Err(format!("expected owner/name, got: {input}")),
    };
    let ok = |s: &str| {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if !ok(owner) || !ok(name) {
        return Err(format!("invalid characters in repository name: {input}"));
    }
    Ok(format!("{owner}/{name}"))
}
