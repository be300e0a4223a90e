use anyhow::{Result, anyhow, bail};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::BackendClient;
use crate::api::types::{
    ExplainNodeRequest, ExplainNodeResponse, GenerateDiagramRequest, GenerateReadmeRequest,
    GenerateResponse,
};
use crate::models::{DiagramType, GenerationStatus, Repository, RepositoryDiagram, parse_full_name};

const REPOSITORIES: &str = "repositories";
const DIAGRAMS: &str = "repository_diagrams";

/// What came back from selecting a diagram variant.
#[derive(Debug, Clone)]
pub enum DiagramSelection {
    /// A stored diagram was available.
    Ready(RepositoryDiagram),
    /// No usable row existed; generation has been requested.
    Requested(GenerateResponse),
}

#[derive(Debug, Clone)]
pub struct RepoService {
    client: BackendClient,
}

impl RepoService {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// Repos connected by this user, or by the org when one is selected.
    pub async fn list(&self, user_id: Uuid, org_id: Option<Uuid>) -> Result<Vec<Repository>> {
        let filters: [(&str, String); 1] = match org_id {
            Some(org) => [("org_id", format!("eq.{org}"))],
            None => [("owner_id", format!("eq.{user_id}"))],
        };
        self.client.select(REPOSITORIES, &filters).await
    }

    pub async fn get(&self, repo_id: Uuid) -> Result<Repository> {
        let rows: Vec<Repository> = self
            .client
            .select(REPOSITORIES, &[("id", format!("eq.{repo_id}"))])
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("repository not found: {repo_id}"))
    }

    pub async fn connect(
        &self,
        user_id: Uuid,
        org_id: Option<Uuid>,
        full_name: &str,
    ) -> Result<Repository> {
        let full_name = parse_full_name(full_name).map_err(|e| anyhow!(e))?;
        let row = serde_json::json!({
            "owner_id": user_id,
            "org_id": org_id,
            "full_name": full_name,
            "status": GenerationStatus::Pending,
        });
        let mut rows: Vec<Repository> = self.client.insert(REPOSITORIES, &row).await?;
        let repo = rows
            .pop()
            .ok_or_else(|| anyhow!("connect returned no row"))?;
        info!(repo=%repo.full_name, id=%repo.id, "connected repository");
        Ok(repo)
    }

    pub async fn disconnect(&self, repo_id: Uuid) -> Result<()> {
        self.client
            .delete(REPOSITORIES, &[("id", format!("eq.{repo_id}"))])
            .await?;
        info!(id=%repo_id, "disconnected repository");
        Ok(())
    }

    pub async fn diagrams(&self, repo_id: Uuid) -> Result<Vec<RepositoryDiagram>> {
        self.client
            .select(DIAGRAMS, &[("repository_id", format!("eq.{repo_id}"))])
            .await
    }

    /// Toggle to a diagram variant: return the stored row when one is ready,
    /// otherwise kick off generation for that variant.
    pub async fn select_diagram(
        &self,
        repo_id: Uuid,
        ty: DiagramType,
        cancel: Option<CancellationToken>,
    ) -> Result<DiagramSelection> {
        let rows = self.diagrams(repo_id).await?;
        if let Some(row) = rows
            .into_iter()
            .find(|d| d.diagram_type == ty && d.status == GenerationStatus::Ready)
        {
            return Ok(DiagramSelection::Ready(row));
        }
        debug!(repo=%repo_id, ty=%ty, "no stored diagram; requesting generation");
        let ack = self.generate_diagram(repo_id, ty, cancel).await?;
        Ok(DiagramSelection::Requested(ack))
    }

    pub async fn generate_diagram(
        &self,
        repo_id: Uuid,
        ty: DiagramType,
        cancel: Option<CancellationToken>,
    ) -> Result<GenerateResponse> {
        let req = GenerateDiagramRequest {
            repository_id: repo_id,
            diagram_type: ty,
        };
        self.client.invoke("generate-diagram", &req, cancel).await
    }

    pub async fn generate_readme(
        &self,
        repo_id: Uuid,
        cancel: Option<CancellationToken>,
    ) -> Result<GenerateResponse> {
        let req = GenerateReadmeRequest {
            repository_id: repo_id,
        };
        self.client.invoke("generate-readme", &req, cancel).await
    }

    pub async fn explain_node(
        &self,
        repo_id: Uuid,
        ty: DiagramType,
        node_id: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<String> {
        let req = ExplainNodeRequest {
            repository_id: repo_id,
            diagram_type: ty,
            node_id: node_id.to_string(),
        };
        let resp: ExplainNodeResponse = self.client.invoke("explain-node", &req, cancel).await?;
        Ok(resp.explanation)
    }

    /// Poll the repository row until generation reaches a terminal status or
    /// the deadline passes; the last observed status is returned either way.
    pub async fn poll_readme_status(
        &self,
        repo_id: Uuid,
        interval: Duration,
        deadline: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<GenerationStatus> {
        self.poll_until(interval, deadline, cancel, || async {
            Ok(self.get(repo_id).await?.status)
        })
        .await
    }

    /// Same, but for a single diagram variant row.
    pub async fn poll_diagram_status(
        &self,
        repo_id: Uuid,
        ty: DiagramType,
        interval: Duration,
        deadline: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<GenerationStatus> {
        self.poll_until(interval, deadline, cancel, || async {
            let rows = self.diagrams(repo_id).await?;
            Ok(rows
                .into_iter()
                .find(|d| d.diagram_type == ty)
                .map(|d| d.status)
                .unwrap_or(GenerationStatus::Pending))
        })
        .await
    }

    async fn poll_until<F, Fut>(
        &self,
        interval: Duration,
        deadline: Duration,
        cancel: Option<CancellationToken>,
        fetch: F,
    ) -> Result<GenerationStatus>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<GenerationStatus>>,
    {
        let cancel_token = cancel.unwrap_or_default();
        let started = Instant::now();
        loop {
            let last = fetch().await?;
            if last.is_terminal() {
                return Ok(last);
            }
            if started.elapsed() >= deadline {
                debug!(status=?last, "generation polling hit deadline");
                return Ok(last);
            }
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    bail!("generation polling cancelled (last status: {})", last.as_str());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    const USER_ID: &str = "7f8a9e1c-2f6d-4f0a-bb1f-111111111111";
    const REPO_ID: &str = "7f8a9e1c-2f6d-4f0a-bb1f-222222222222";

    fn service(server: &Server) -> RepoService {
        let client = BackendClient::new(server.url_str(""), "anon")
            .unwrap()
            .with_backend_config(BackendConfig {
                max_retries: 0,
                retry_base_ms: 1,
                retry_jitter_ms: 0,
                respect_retry_after: false,
                ..BackendConfig::default()
            });
        RepoService::new(client)
    }

    fn repo_row(status: &str) -> serde_json::Value {
        serde_json::json!({
            "id": REPO_ID,
            "owner_id": USER_ID,
            "org_id": null,
            "full_name": "acme/widgets",
            "status": status,
            "readme_content": null,
            "error_message": null,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-02T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn connect_rejects_malformed_names_without_network() {
        let server = Server::run();
        let svc = service(&server);
        let err = svc
            .connect(Uuid::parse_str(USER_ID).unwrap(), None, "not-a-repo")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("owner/name"));
    }

    #[tokio::test]
    async fn connect_inserts_pending_row() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/rest/v1/repositories"),
                request::headers(contains(("prefer", "return=representation"))),
                request::body(json_decoded(eq(serde_json::json!({
                    "owner_id": USER_ID,
                    "org_id": null,
                    "full_name": "acme/widgets",
                    "status": "pending"
                })))),
            ])
            .respond_with(json_encoded(serde_json::json!([repo_row("pending")]))),
        );

        let svc = service(&server);
        let repo = svc
            .connect(Uuid::parse_str(USER_ID).unwrap(), None, " acme/widgets ")
            .await
            .unwrap();
        assert_eq!(repo.full_name, "acme/widgets");
        assert_eq!(repo.status, GenerationStatus::Pending);
    }

    #[tokio::test]
    async fn select_diagram_returns_stored_row() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/rest/v1/repository_diagrams"))
                .respond_with(json_encoded(serde_json::json!([{
                    "id": "7f8a9e1c-2f6d-4f0a-bb1f-333333333333",
                    "repository_id": REPO_ID,
                    "diagram_type": "erd",
                    "status": "ready",
                    "content": "erDiagram",
                    "updated_at": "2025-01-02T00:00:00Z"
                }]))),
        );

        let svc = service(&server);
        let selection = svc
            .select_diagram(Uuid::parse_str(REPO_ID).unwrap(), DiagramType::Erd, None)
            .await
            .unwrap();
        match selection {
            DiagramSelection::Ready(row) => assert_eq!(row.content.as_deref(), Some("erDiagram")),
            other => panic!("expected stored diagram, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn select_diagram_requests_generation_when_missing() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/rest/v1/repository_diagrams"))
                .respond_with(json_encoded(serde_json::json!([]))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/functions/v1/generate-diagram"),
                request::body(json_decoded(eq(serde_json::json!({
                    "repository_id": REPO_ID,
                    "diagram_type": "sequence"
                })))),
            ])
            .respond_with(json_encoded(serde_json::json!({"status": "pending"}))),
        );

        let svc = service(&server);
        let selection = svc
            .select_diagram(Uuid::parse_str(REPO_ID).unwrap(), DiagramType::Sequence, None)
            .await
            .unwrap();
        match selection {
            DiagramSelection::Requested(ack) => {
                assert_eq!(ack.status, GenerationStatus::Pending)
            }
            other => panic!("expected generation request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_stops_on_terminal_status() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/rest/v1/repositories"))
                .times(2)
                .respond_with(cycle![
                    json_encoded(serde_json::json!([repo_row("processing")])),
                    json_encoded(serde_json::json!([repo_row("ready")])),
                ]),
        );

        let svc = service(&server);
        let status = svc
            .poll_readme_status(
                Uuid::parse_str(REPO_ID).unwrap(),
                Duration::from_millis(1),
                Duration::from_secs(5),
                None,
            )
            .await
            .unwrap();
        assert_eq!(status, GenerationStatus::Ready);
    }

    #[tokio::test]
    async fn poll_returns_last_status_at_deadline() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/rest/v1/repositories"))
                .times(1..)
                .respond_with(json_encoded(serde_json::json!([repo_row("processing")]))),
        );

        let svc = service(&server);
        let status = svc
            .poll_readme_status(
                Uuid::parse_str(REPO_ID).unwrap(),
                Duration::from_millis(1),
                Duration::from_millis(0),
                None,
            )
            .await
            .unwrap();
        assert_eq!(status, GenerationStatus::Processing);
    }
}
