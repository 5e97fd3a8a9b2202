use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use gatekeep_api::app::services::AppServices;
use gatekeep_auth::{Entitlement, EntitlementStatus, JwtClaims, Permission, Role};
use gatekeep_core::{OrganizationId, RoleId, UserId};
use gatekeep_infra::{AuthzConfig, EntitlementStore, InMemoryAuthzStore, Organization, RoleStore};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    store: Arc<InMemoryAuthzStore>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over an in-memory store the test can seed.
        let store = Arc::new(InMemoryAuthzStore::new());
        let services = Arc::new(AppServices::in_memory(store.clone(), AuthzConfig::default()));
        let app = gatekeep_api::app::router(services, SECRET);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            store,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn organization(&self) -> OrganizationId {
        let id = OrganizationId::new();
        self.store
            .upsert_organization(Organization {
                id,
                name: format!("org-{id}"),
                active: true,
            })
            .unwrap();
        id
    }

    async fn entitle(&self, organization_id: OrganizationId, module: &str) {
        self.store
            .upsert_entitlement(Entitlement {
                organization_id,
                module: module.to_string(),
                submodule: None,
                status: EntitlementStatus::Enabled,
                expires_at: None,
            })
            .await
            .unwrap();
    }

    /// A fresh user holding one role with `permissions`.
    async fn user_with(
        &self,
        organization_id: OrganizationId,
        permissions: &[&'static str],
    ) -> (UserId, RoleId) {
        let role = Role::new(organization_id, format!("role-{}", RoleId::new()))
            .with_permissions(permissions.iter().map(|p| Permission::parse(*p).unwrap()));
        let role_id = role.id;
        self.store.save_role(role).await.unwrap();

        let user_id = UserId::new();
        self.store
            .assign_role(organization_id, user_id, role_id)
            .await
            .unwrap();
        (user_id, role_id)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(user_id: UserId, organization_id: Option<OrganizationId>) -> String {
    let now = Utc::now();
    encode(&JwtClaims {
        sub: user_id,
        organization_id,
        act_as_organization_id: None,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    })
}

fn encode(claims: &JwtClaims) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn check(
    client: &reqwest::Client,
    srv: &TestServer,
    token: &str,
    body: serde_json::Value,
) -> reqwest::Response {
    client
        .post(srv.url("/authz/check"))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_token_is_rejected_at_the_edge() {
    let srv = TestServer::spawn().await;
    let now = Utc::now();
    let token = encode(&JwtClaims {
        sub: UserId::new(),
        organization_id: Some(OrganizationId::new()),
        act_as_organization_id: None,
        issued_at: now - ChronoDuration::hours(2),
        expires_at: now - ChronoDuration::hours(1),
    });

    let res = reqwest::Client::new()
        .get(srv.url("/whoami"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn whoami_reflects_token_claims() {
    let srv = TestServer::spawn().await;
    let user_id = UserId::new();
    let organization_id = OrganizationId::new();

    let res = reqwest::Client::new()
        .get(srv.url("/whoami"))
        .bearer_auth(mint_jwt(user_id, Some(organization_id)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["user_id"].as_str().unwrap(), user_id.to_string());
    assert_eq!(body["organization_id"].as_str().unwrap(), organization_id.to_string());
    assert!(body["act_as_organization_id"].is_null());
}

#[tokio::test]
async fn check_grants_entitled_and_permitted_request() {
    let srv = TestServer::spawn().await;
    let org = srv.organization();
    srv.entitle(org, "sales").await;
    let (user, _) = srv.user_with(org, &["sales.read"]).await;

    let client = reqwest::Client::new();
    let res = check(
        &client,
        &srv,
        &mint_jwt(user, Some(org)),
        json!({ "module": "sales", "action": "read" }),
    )
    .await;

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["organization_id"].as_str().unwrap(), org.to_string());
    assert_eq!(body["user_id"].as_str().unwrap(), user.to_string());
}

#[tokio::test]
async fn hidden_denials_are_indistinguishable() {
    let srv = TestServer::spawn().await;
    let org = srv.organization();
    srv.entitle(org, "sales").await;
    let (user, _) = srv.user_with(org, &["sales.read", "inventory.read"]).await;
    let token = mint_jwt(user, Some(org));
    let client = reqwest::Client::new();

    let probes = [
        // not entitled
        json!({ "module": "inventory", "action": "read" }),
        // no permission
        json!({ "module": "sales", "action": "delete" }),
        // no such module
        json!({ "module": "payroll", "action": "read" }),
    ];

    let mut bodies = Vec::new();
    for probe in probes {
        let res = check(&client, &srv, &token, probe).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        bodies.push(res.text().await.unwrap());
    }

    let expected: serde_json::Value = json!({ "error": "not_found", "message": "not found" });
    for body in &bodies {
        let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(parsed, expected);
    }
    assert!(bodies.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn missing_organization_is_a_bad_request() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = check(
        &client,
        &srv,
        &mint_jwt(UserId::new(), None),
        json!({ "module": "sales", "action": "read" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "tenant_context_missing");

    // An organization the directory does not know is treated the same.
    let res = check(
        &client,
        &srv,
        &mint_jwt(UserId::new(), Some(OrganizationId::new())),
        json!({ "module": "sales", "action": "read" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_are_gated() {
    let srv = TestServer::spawn().await;
    let org = srv.organization();
    let (user, _) = srv.user_with(org, &["sales.read"]).await;
    let token = mint_jwt(user, Some(org));
    let client = reqwest::Client::new();

    for path in ["/admin/roles", "/admin/entitlements", "/admin/audit"] {
        let res = client
            .get(srv.url(path))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn admin_flow_role_entitlement_assignment_and_revocation() {
    let srv = TestServer::spawn().await;
    let org = srv.organization();
    let (admin, _) = srv.user_with(org, &["*.*"]).await;
    let admin_token = mint_jwt(admin, Some(org));
    let member = UserId::new();
    let member_token = mint_jwt(member, Some(org));
    let client = reqwest::Client::new();

    // Role
    let res = client
        .post(srv.url("/admin/roles"))
        .bearer_auth(&admin_token)
        .json(&json!({ "name": "analyst", "permissions": ["analytics.read"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let role: serde_json::Value = res.json().await.unwrap();
    let role_id = role["id"].as_str().unwrap().to_string();

    // Entitlement
    let res = client
        .put(srv.url("/admin/entitlements"))
        .bearer_auth(&admin_token)
        .json(&json!({ "module": "analytics", "status": "enabled" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let probe = json!({ "module": "analytics", "action": "read" });
    assert_eq!(
        check(&client, &srv, &member_token, probe.clone()).await.status(),
        StatusCode::NOT_FOUND
    );

    // Assign
    let res = client
        .post(srv.url(&format!("/admin/users/{member}/roles")))
        .bearer_auth(&admin_token)
        .json(&json!({ "role_id": role_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["changed"], true);

    assert_eq!(
        check(&client, &srv, &member_token, probe.clone()).await.status(),
        StatusCode::OK
    );

    // Revoke takes effect on the very next request.
    let res = client
        .delete(srv.url(&format!("/admin/users/{member}/roles/{role_id}")))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    assert_eq!(
        check(&client, &srv, &member_token, probe).await.status(),
        StatusCode::NOT_FOUND
    );

    // Audit
    let res = client
        .get(srv.url(&format!("/admin/audit?user_id={member}&decision=denied&limit=10")))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page: serde_json::Value = res.json().await.unwrap();
    assert_eq!(page["total"], 2);
    assert_eq!(page["has_more"], false);
    let entries = page["entries"].as_array().unwrap();
    assert!(entries.iter().all(|e| e["organization_id"] == org.to_string()));
    assert!(entries.iter().all(|e| e["decision"] == "denied"));
}

#[tokio::test]
async fn role_creation_cannot_exceed_actor_permissions() {
    let srv = TestServer::spawn().await;
    let org = srv.organization();
    let (manager, _) = srv
        .user_with(org, &["rbac.roles.manage", "sales.read"])
        .await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/admin/roles"))
        .bearer_auth(mint_jwt(manager, Some(org)))
        .json(&json!({ "name": "too-much", "permissions": ["sales.*"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "privilege_escalation");
}

#[tokio::test]
async fn explain_reports_precise_denial() {
    let srv = TestServer::spawn().await;
    let org = srv.organization();
    srv.entitle(org, "sales").await;
    let (support, _) = srv.user_with(org, &["diagnostics.explain"]).await;
    let (clerk, _) = srv.user_with(org, &["sales.read"]).await;

    let res = reqwest::Client::new()
        .get(srv.url(&format!(
            "/admin/diagnostics/explain?user_id={clerk}&module=sales&action=delete"
        )))
        .bearer_auth(mint_jwt(support, Some(org)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["granted"], false);
    assert_eq!(body["denial_kind"], "permission_denied");
    assert_eq!(body["entitlement"]["status"], "enabled");
}

#[tokio::test]
async fn access_summary_lists_visible_modules() {
    let srv = TestServer::spawn().await;
    let org = srv.organization();
    srv.entitle(org, "sales").await;
    let (user, _) = srv.user_with(org, &["sales.read", "email.send"]).await;

    let res = reqwest::Client::new()
        .get(srv.url("/access"))
        .bearer_auth(mint_jwt(user, Some(org)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    let modules: Vec<&str> = body["modules"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["module"].as_str().unwrap())
        .collect();
    assert!(modules.contains(&"sales"));
    assert!(modules.contains(&"email"));
    assert!(!modules.contains(&"inventory"));

    let permissions = body["permissions"].as_array().unwrap();
    assert!(permissions.iter().any(|p| p == "sales.read"));
}
