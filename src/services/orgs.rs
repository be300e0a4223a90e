use anyhow::{Result, anyhow, bail};
use tracing::info;
use uuid::Uuid;

use crate::api::BackendClient;
use crate::models::{OrgMember, OrgRole, Organization};

const ORGANIZATIONS: &str = "organizations";
const ORG_MEMBERS: &str = "org_members";

/// Team management over the hosted backend. Role gates are checked here
/// before any request goes out; the backend's row policies are the backstop.
#[derive(Debug, Clone)]
pub struct OrgService {
    client: BackendClient,
}

impl OrgService {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    pub async fn memberships(&self, user_id: Uuid) -> Result<Vec<OrgMember>> {
        self.client
            .select(ORG_MEMBERS, &[("user_id", format!("eq.{user_id}"))])
            .await
    }

    /// Orgs the user belongs to, resolved through their membership rows.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Organization>> {
        let memberships = self.memberships(user_id).await?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }
        let ids = memberships
            .iter()
            .map(|m| m.org_id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.client
            .select(ORGANIZATIONS, &[("id", format!("in.({ids})"))])
            .await
    }

    /// Create an org; the creator becomes its owner member.
    pub async fn create(&self, name: &str, owner_id: Uuid, owner_email: &str) -> Result<Organization> {
        let name = name.trim();
        if name.is_empty() {
            bail!("organization name must not be empty");
        }
        let row = serde_json::json!({ "name": name, "owner_id": owner_id });
        let mut orgs: Vec<Organization> = self.client.insert(ORGANIZATIONS, &row).await?;
        let org = orgs
            .pop()
            .ok_or_else(|| anyhow!("create organization returned no row"))?;

        let member_row = serde_json::json!({
            "org_id": org.id,
            "user_id": owner_id,
            "email": owner_email,
            "role": OrgRole::Owner,
        });
        let _members: Vec<OrgMember> = self.client.insert(ORG_MEMBERS, &member_row).await?;
        info!(org=%org.name, id=%org.id, "created organization");
        Ok(org)
    }

    pub async fn members(&self, org_id: Uuid) -> Result<Vec<OrgMember>> {
        self.client
            .select(ORG_MEMBERS, &[("org_id", format!("eq.{org_id}"))])
            .await
    }

    pub async fn invite(
        &self,
        actor_role: OrgRole,
        org_id: Uuid,
        email: &str,
        role: OrgRole,
    ) -> Result<OrgMember> {
        if !actor_role.can_manage_members() {
            bail!("role {actor_role} may not invite members");
        }
        if !actor_role.can_assign(role) {
            bail!("role {actor_role} may not grant the {role} role");
        }
        let row = serde_json::json!({
            "org_id": org_id,
            "email": email,
            "role": role,
        });
        let mut rows: Vec<OrgMember> = self.client.insert(ORG_MEMBERS, &row).await?;
        let member = rows.pop().ok_or_else(|| anyhow!("invite returned no row"))?;
        info!(org=%org_id, email=%member.email, role=%member.role, "invited member");
        Ok(member)
    }

    pub async fn change_role(
        &self,
        actor_role: OrgRole,
        member: &OrgMember,
        new_role: OrgRole,
    ) -> Result<OrgMember> {
        if !actor_role.can_manage_members() {
            bail!("role {actor_role} may not change member roles");
        }
        // Touching a member requires authority over both their current and
        // their new role.
        if !actor_role.can_assign(member.role) || !actor_role.can_assign(new_role) {
            bail!("role {actor_role} may not change {} to {new_role}", member.role);
        }
        let patch = serde_json::json!({ "role": new_role });
        let mut rows: Vec<OrgMember> = self
            .client
            .update(ORG_MEMBERS, &[("id", format!("eq.{}", member.id))], patch)
            .await?;
        let updated = rows
            .pop()
            .ok_or_else(|| anyhow!("role change returned no row"))?;
        info!(member=%updated.email, role=%updated.role, "changed member role");
        Ok(updated)
    }

    pub async fn remove(&self, actor_role: OrgRole, member: &OrgMember) -> Result<()> {
        if !actor_role.can_manage_members() {
            bail!("role {actor_role} may not remove members");
        }
        if !actor_role.can_assign(member.role) {
            bail!("role {actor_role} may not remove a {}", member.role);
        }
        self.client
            .delete(ORG_MEMBERS, &[("id", format!("eq.{}", member.id))])
            .await?;
        info!(member=%member.email, "removed member");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use chrono::Utc;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    const USER_ID: &str = "7f8a9e1c-2f6d-4f0a-bb1f-111111111111";
    const ORG_ID: &str = "7f8a9e1c-2f6d-4f0a-bb1f-444444444444";

    fn service(server: &Server) -> OrgService {
        let client = BackendClient::new(server.url_str(""), "anon")
            .unwrap()
            .with_backend_config(BackendConfig {
                max_retries: 0,
                retry_base_ms: 1,
                retry_jitter_ms: 0,
                respect_retry_after: false,
                ..BackendConfig::default()
            });
        OrgService::new(client)
    }

    fn member(role: OrgRole) -> OrgMember {
        OrgMember {
            id: Uuid::new_v4(),
            org_id: Uuid::parse_str(ORG_ID).unwrap(),
            user_id: Uuid::new_v4(),
            email: "teammate@example.com".to_string(),
            role,
            joined_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn viewer_cannot_invite_and_no_request_is_sent() {
        // No expectations: a gate failure must never reach the network.
        let server = Server::run();
        let svc = service(&server);
        let err = svc
            .invite(
                OrgRole::Viewer,
                Uuid::parse_str(ORG_ID).unwrap(),
                "x@y.z",
                OrgRole::Member,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("may not invite"));
    }

    #[tokio::test]
    async fn admin_cannot_grant_owner() {
        let server = Server::run();
        let svc = service(&server);
        let err = svc
            .invite(
                OrgRole::Admin,
                Uuid::parse_str(ORG_ID).unwrap(),
                "x@y.z",
                OrgRole::Owner,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("may not grant"));
    }

    #[tokio::test]
    async fn admin_cannot_demote_owner() {
        let server = Server::run();
        let svc = service(&server);
        let owner = member(OrgRole::Owner);
        let err = svc
            .change_role(OrgRole::Admin, &owner, OrgRole::Member)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("may not change"));
        let err = svc.remove(OrgRole::Admin, &owner).await.unwrap_err();
        assert!(err.to_string().contains("may not remove"));
    }

    #[tokio::test]
    async fn admin_invites_member() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/rest/v1/org_members"),
                request::body(json_decoded(eq(serde_json::json!({
                    "org_id": ORG_ID,
                    "email": "x@y.z",
                    "role": "member"
                })))),
            ])
            .respond_with(json_encoded(serde_json::json!([{
                "id": "7f8a9e1c-2f6d-4f0a-bb1f-555555555555",
                "org_id": ORG_ID,
                "user_id": USER_ID,
                "email": "x@y.z",
                "role": "member",
                "joined_at": "2025-01-01T00:00:00Z"
            }]))),
        );

        let svc = service(&server);
        let invited = svc
            .invite(
                OrgRole::Admin,
                Uuid::parse_str(ORG_ID).unwrap(),
                "x@y.z",
                OrgRole::Member,
            )
            .await
            .unwrap();
        assert_eq!(invited.role, OrgRole::Member);
    }

    #[tokio::test]
    async fn list_for_user_resolves_membership_orgs() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/rest/v1/org_members"),
                request::query(url_decoded(contains((
                    "user_id",
                    format!("eq.{USER_ID}")
                )))),
            ])
            .respond_with(json_encoded(serde_json::json!([{
                "id": "7f8a9e1c-2f6d-4f0a-bb1f-555555555555",
                "org_id": ORG_ID,
                "user_id": USER_ID,
                "email": "a@b.c",
                "role": "owner",
                "joined_at": "2025-01-01T00:00:00Z"
            }]))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/rest/v1/organizations"),
                request::query(url_decoded(contains(("id", format!("in.({ORG_ID})"))))),
            ])
            .respond_with(json_encoded(serde_json::json!([{
                "id": ORG_ID,
                "name": "acme",
                "owner_id": USER_ID,
                "created_at": "2025-01-01T00:00:00Z"
            }]))),
        );

        let svc = service(&server);
        let orgs = svc
            .list_for_user(Uuid::parse_str(USER_ID).unwrap())
            .await
            .unwrap();
        assert_eq!(orgs.len(), 1);
        assert_eq!(orgs[0].name, "acme");
    }

    #[tokio::test]
    async fn empty_org_name_is_rejected() {
        let server = Server::run();
        let svc = service(&server);
        let err = svc
            .create("  ", Uuid::parse_str(USER_ID).unwrap(), "a@b.c")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }
}
