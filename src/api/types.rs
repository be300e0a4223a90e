use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DiagramType, GenerationStatus, Tier};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Response of the token grant endpoints (password and refresh_token grants).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub user: AuthUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordGrant {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshGrant {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateDiagramRequest {
    pub repository_id: Uuid,
    pub diagram_type: DiagramType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateReadmeRequest {
    pub repository_id: Uuid,
}

/// Acknowledgement from the generation functions; actual content lands in the
/// database rows once the function finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub status: GenerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainNodeRequest {
    pub repository_id: Uuid,
    pub diagram_type: DiagramType,
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainNodeResponse {
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    pub tier: Tier,
}

/// Checkout and portal session functions both answer with a URL to open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUrlResponse {
    pub url: String,
}
