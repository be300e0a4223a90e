use anyhow::Result;
use uuid::Uuid;

use crate::api::BackendClient;
use crate::api::types::{CheckoutSessionRequest, SessionUrlResponse};
use crate::models::{PaymentRecord, Profile, Subscription, Tier};

const PROFILES: &str = "profiles";
const SUBSCRIPTIONS: &str = "subscriptions";
const PAYMENTS: &str = "payment_records";

/// One row of the pricing screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingRow {
    pub tier: Tier,
    pub price_usd_month: u32,
    pub max_repos: u32,
    pub diagrams_per_month: u32,
    pub readmes_per_month: u32,
}

/// Billing display plus checkout/portal session creation. Payment handling
/// itself happens in the hosted functions and the processor's own pages.
#[derive(Debug, Clone)]
pub struct BillingService {
    client: BackendClient,
}

impl BillingService {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// Account profile row; carries the effective tier and usage counters.
    pub async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>> {
        let rows: Vec<Profile> = self
            .client
            .select(PROFILES, &[("id", format!("eq.{user_id}"))])
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn subscription(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        let rows: Vec<Subscription> = self
            .client
            .select(SUBSCRIPTIONS, &[("user_id", format!("eq.{user_id}"))])
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Payment history, newest first.
    pub async fn payments(&self, user_id: Uuid) -> Result<Vec<PaymentRecord>> {
        self.client
            .select(
                PAYMENTS,
                &[
                    ("user_id", format!("eq.{user_id}")),
                    ("order", "created_at.desc".to_string()),
                ],
            )
            .await
    }

    /// Start a checkout session for a tier upgrade; returns the URL to open.
    pub async fn checkout_url(&self, tier: Tier) -> Result<String> {
        let req = CheckoutSessionRequest { tier };
        let resp: SessionUrlResponse = self
            .client
            .invoke("create-checkout-session", &req, None)
            .await?;
        Ok(resp.url)
    }

    /// Open the billing portal for managing an existing subscription.
    pub async fn portal_url(&self) -> Result<String> {
        let resp: SessionUrlResponse = self
            .client
            .invoke("create-portal-session", &serde_json::json!({}), None)
            .await?;
        Ok(resp.url)
    }

    pub fn pricing(&self) -> Vec<PricingRow> {
        Tier::ALL
            .iter()
            .map(|tier| {
                let limits = tier.limits();
                PricingRow {
                    tier: *tier,
                    price_usd_month: tier.price_usd_month(),
                    max_repos: limits.max_repos,
                    diagrams_per_month: limits.diagrams_per_month,
                    readmes_per_month: limits.readmes_per_month,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    const USER_ID: &str = "7f8a9e1c-2f6d-4f0a-bb1f-111111111111";

    fn service(server: &Server) -> BillingService {
        let client = BackendClient::new(server.url_str(""), "anon")
            .unwrap()
            .with_backend_config(BackendConfig {
                max_retries: 0,
                retry_base_ms: 1,
                retry_jitter_ms: 0,
                respect_retry_after: false,
                ..BackendConfig::default()
            });
        BillingService::new(client)
    }

    #[tokio::test]
    async fn profile_carries_tier_and_usage() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/rest/v1/profiles"),
                request::query(url_decoded(contains(("id", format!("eq.{USER_ID}"))))),
            ])
            .respond_with(json_encoded(serde_json::json!([{
                "id": USER_ID,
                "email": "a@b.c",
                "display_name": null,
                "tier": "pro",
                "diagrams_generated": 12,
                "readmes_generated": 4,
                "created_at": "2025-01-01T00:00:00Z"
            }]))),
        );
        let svc = service(&server);
        let profile = svc
            .profile(Uuid::parse_str(USER_ID).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.tier, Tier::Pro);
        assert_eq!(profile.diagrams_generated, 12);
    }

    #[tokio::test]
    async fn subscription_is_optional() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/rest/v1/subscriptions"))
                .respond_with(json_encoded(serde_json::json!([]))),
        );
        let svc = service(&server);
        let sub = svc
            .subscription(Uuid::parse_str(USER_ID).unwrap())
            .await
            .unwrap();
        assert!(sub.is_none());
    }

    #[tokio::test]
    async fn payments_are_ordered_newest_first() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/rest/v1/payment_records"),
                request::query(url_decoded(contains(("order", "created_at.desc")))),
            ])
            .respond_with(json_encoded(serde_json::json!([{
                "id": "7f8a9e1c-2f6d-4f0a-bb1f-666666666666",
                "user_id": USER_ID,
                "amount_cents": 1900,
                "currency": "usd",
                "description": "Pro monthly",
                "status": "paid",
                "created_at": "2025-02-01T00:00:00Z"
            }]))),
        );
        let svc = service(&server);
        let payments = svc
            .payments(Uuid::parse_str(USER_ID).unwrap())
            .await
            .unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount_cents, 1900);
    }

    #[tokio::test]
    async fn checkout_returns_url() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/functions/v1/create-checkout-session"),
                request::body(json_decoded(eq(serde_json::json!({"tier": "pro"})))),
            ])
            .respond_with(json_encoded(
                serde_json::json!({"url": "https://pay.example.com/cs_123"}),
            )),
        );
        let svc = service(&server);
        let url = svc.checkout_url(Tier::Pro).await.unwrap();
        assert_eq!(url, "https://pay.example.com/cs_123");
    }

    #[test]
    fn pricing_covers_every_tier() {
        let server = Server::run();
        let svc = service(&server);
        let rows = svc.pricing();
        assert_eq!(rows.len(), Tier::ALL.len());
        assert_eq!(rows[0].tier, Tier::Free);
        assert_eq!(rows[0].price_usd_month, 0);
        assert!(rows[2].diagrams_per_month > rows[1].diagrams_per_month);
    }
}
