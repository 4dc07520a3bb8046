mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{TestApp, project_uri};
use tenantgate::audit::AuditEvent;
use tenantgate::config::Settings;
use tenantgate::server::pow::{POW_HEADER, body_hash};

fn ssh_key(seed: u8) -> String {
    let mut blob = Vec::new();
    blob.extend_from_slice(&11u32.to_be_bytes());
    blob.extend_from_slice(b"ssh-ed25519");
    blob.extend_from_slice(&32u32.to_be_bytes());
    blob.extend_from_slice(&[seed; 32]);
    format!("ssh-ed25519 {} laptop", STANDARD.encode(blob))
}

#[tokio::test]
async fn test_health_sets_trace_cookie() {
    let app = TestApp::new();

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(cookie.starts_with("traceId="), "{cookie}");
}

#[tokio::test]
async fn test_sign_up_enforces_password_policy() {
    let app = TestApp::new();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v2/signUp",
            None,
            Some(json!({"name": "weak", "email": "weak@example.com", "password": "short"})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["data"].is_null());
    assert!(body["error"].as_str().unwrap().contains("password"));
}

#[tokio::test]
async fn test_sign_in_with_wrong_password_is_audited() {
    let app = TestApp::new();
    app.user("alice").await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v2/signIn",
            None,
            Some(json!({"login": "alice", "password": "Wrong1234"})),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let failed = app
        .audit
        .records()
        .into_iter()
        .filter(|r| r.event == AuditEvent::UserLogin)
        .any(|r| r.params.get("login").map(String::as_str) == Some("alice") && r.params.contains_key("error"));
    assert!(failed);
}

#[tokio::test]
async fn test_sign_out_revokes_token() {
    let app = TestApp::new();
    let (_, token) = app.user("alice").await;

    let (status, _) = app
        .request(Method::POST, "/api/v2/signOut", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v2/projects",
            Some(&token),
            Some(json!({"name": "alpha"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.events().contains(&AuditEvent::UserLogout));
}

#[tokio::test]
async fn test_proof_of_work_guards_account_routes() {
    let mut settings = Settings::default();
    settings.proof_of_work.enabled = true;
    settings.proof_of_work.zero_count = 1;
    let app = TestApp::with_settings(settings);

    let fields = r#""name":"alice","email":"alice@example.com","password":"Secret123""#;
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v2/signUp",
            None,
            Some(serde_json::from_str(&format!("{{{fields},\"payload\":1}}")).unwrap()),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (body, hash) = (0..)
        .map(|n| format!("{{{fields},\"payload\":{n}}}"))
        .map(|body| {
            let hash = body_hash(body.as_bytes());
            (body, hash)
        })
        .find(|(_, hash)| hash.starts_with('0'))
        .unwrap();

    let request = Request::post("/api/v2/signUp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(POW_HEADER, hash)
        .body(Body::from(body))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

#[tokio::test]
async fn test_project_read_paths_hide_denials() {
    let app = TestApp::new();
    let (_, alice) = app.user("alice").await;
    let (_, bob) = app.user("bob").await;
    app.project(&alice, "alpha", "limited").await;
    app.project(&alice, "secret", "private").await;

    let uri = project_uri("/api/v2/projects", "alpha");
    let (status, _) = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.request(Method::GET, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["project_key"], "alpha");
    assert_eq!(body["data"]["visibility"], "limited");

    // Limited projects are inner source for any signed-in user.
    let (status, _) = app.request(Method::GET, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);

    let uri = project_uri("/api/v2/projects", "secret");
    let (status, _) = app.request(Method::GET, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(app.events().contains(&AuditEvent::ProjectCreate));
}

#[tokio::test]
async fn test_keys_are_required() {
    let app = TestApp::new();

    let (status, body) = app
        .request(Method::GET, "/api/v2/projects?project_key=alpha", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["messages"], json!(["tenant_key is required"]));

    let (status, body) = app
        .request(Method::GET, "/api/v2/repos", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["messages"].as_array().unwrap().len(), 3);

    let (status, _) = app
        .request(Method::GET, &project_uri("/api/v2/projects", "nope"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_public_projects_rejected_in_role_mode() {
    let app = TestApp::new();
    let (_, alice) = app.user("alice").await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v2/projects",
            Some(&alice),
            Some(json!({"name": "open", "visibility": "public"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_write_paths_deny_non_owners() {
    let app = TestApp::new();
    let (_, alice) = app.user("alice").await;
    let (_, bob) = app.user("bob").await;
    app.project(&alice, "alpha", "limited").await;
    let uri = project_uri("/api/v2/projects", "alpha");

    let (status, _) = app
        .request(Method::PATCH, &uri, Some(&bob), Some(json!({"name": "beta"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.request(Method::DELETE, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(
            Method::PATCH,
            &uri,
            Some(&alice),
            Some(json!({"visibility": "private"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["visibility"], "private");
    assert!(app.events().contains(&AuditEvent::ProjectSettingsChange));
}

#[tokio::test]
async fn test_privileges_grant_then_query() {
    let app = TestApp::new();
    let (_, alice) = app.user("alice").await;
    let (bob_key, bob) = app.user("bob").await;
    app.project(&alice, "alpha", "private").await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v2/admin/privileges",
            Some(&app.admin_token),
            Some(json!({"apply_privilege_groups": {"grant": [{
                "user_key": bob_key,
                "privilege_groups": [
                    {"tenant_key": "tenant", "project_key": "alpha", "privilege_group": "WRITER"},
                    {"tenant_key": "tenant", "project_key": "alpha", "privilege_group": "boss"}
                ]
            }]}})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["applied_status"]["granted"][0]["user_key"], bob_key.as_str());
    assert_eq!(
        body["applied_status"]["granted"][0]["privilege_groups"]
            .as_array()
            .unwrap()
            .len(),
        1
    );
    assert_eq!(body["errors"]["grant"][0]["privilege_groups"][0]["privilege_group"], "boss");

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v2/admin/privileges",
            Some(&app.admin_token),
            Some(json!([{"user_key": bob_key, "tenant_key": "tenant", "project_key": "alpha"}])),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["granted"][0]["privilege_groups"][0]["privilege_group"],
        json!(["writer"])
    );

    // Writers may create repositories.
    let (status, _) = app
        .request(
            Method::POST,
            &project_uri("/api/v2/repos", "alpha"),
            Some(&bob),
            Some(json!({"name": "app"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let grants = app
        .events()
        .into_iter()
        .filter(|e| *e == AuditEvent::PrivilegesGrant)
        .count();
    assert_eq!(grants, 2);
}

#[tokio::test]
async fn test_privileges_require_admin_and_a_batch() {
    let app = TestApp::new();
    let (_, alice) = app.user("alice").await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v2/admin/privileges",
            Some(&alice),
            Some(json!({"apply_privilege_groups": {}})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v2/admin/privileges",
            Some(&app.admin_token),
            Some(json!({"apply_privilege_groups": {"grant": [], "revoke": []}})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_repository_create_and_get() {
    let app = TestApp::new();
    let (_, alice) = app.user("alice").await;
    app.project(&alice, "alpha", "limited").await;
    app.project(&alice, "beta", "limited").await;

    let (status, body) = app
        .request(
            Method::POST,
            &project_uri("/api/v2/repos", "alpha"),
            Some(&alice),
            Some(json!({"name": "app", "default_branch": "trunk"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let repo_key = body["data"]["repo_key"].as_str().unwrap().to_string();
    assert!(app.temp_dir.path().join("repos/alpha/app.git").exists());

    let uri = format!("{}&repo_key={repo_key}", project_uri("/api/v2/repos", "alpha"));
    let (status, body) = app.request(Method::GET, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["default_branch"], "trunk");
    assert_eq!(body["data"]["unique_clones"], 0);

    let uri = format!("{}&repo_key={repo_key}", project_uri("/api/v2/repos", "beta"));
    let (status, _) = app.request(Method::GET, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(app.events().contains(&AuditEvent::RepositoryCreate));
}

#[tokio::test]
async fn test_project_delete() {
    let app = TestApp::new();
    let (_, alice) = app.user("alice").await;
    app.project(&alice, "alpha", "limited").await;
    let uri = project_uri("/api/v2/projects", "alpha");

    let (status, _) = app.request(Method::DELETE, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.request(Method::GET, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.events().contains(&AuditEvent::ProjectDelete));
}

#[tokio::test]
async fn test_team_members_become_readers() {
    let app = TestApp::new();
    let (_, alice) = app.user("alice").await;
    let (bob_key, bob) = app.user("bob").await;
    app.project(&alice, "secret", "private").await;
    let uri = project_uri("/api/v2/projects", "secret");

    let (status, body) = app
        .request(
            Method::POST,
            &project_uri("/api/v2/projects/teams", "secret"),
            Some(&alice),
            Some(json!({"name": "devs", "user_keys": [bob_key]})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["members"], json!([bob_key]));

    let (status, _) = app.request(Method::GET, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.events().contains(&AuditEvent::TeamAddToProject));
}

#[tokio::test]
async fn test_tenant_administration() {
    let app = TestApp::new();
    let admin = app.admin_token.clone();
    let (_, alice) = app.user("alice").await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v2/admin/tenants",
            Some(&admin),
            Some(json!({"name": "acme", "org_key": "acme"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (_, body) = app
        .request(Method::GET, "/api/v2/admin/tenants", Some(&admin), None)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) = app
        .request(
            Method::PATCH,
            &format!("/api/v2/admin/tenants/{id}"),
            Some(&admin),
            Some(json!({"is_active": false})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_active"], false);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v2/projects",
            Some(&alice),
            Some(json!({"name": "gamma", "tenant_key": "acme"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, tenants) = app
        .request(Method::GET, "/api/v2/admin/tenants", Some(&admin), None)
        .await;
    let default_id = tenants["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["is_default"] == true)
        .and_then(|t| t["id"].as_str())
        .unwrap()
        .to_string();
    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v2/admin/tenants/{default_id}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v2/admin/tenants/{id}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let events = app.events();
    for event in [
        AuditEvent::TenantCreate,
        AuditEvent::TenantDeactivate,
        AuditEvent::TenantDelete,
    ] {
        assert!(events.contains(&event), "{event:?}");
    }
}

#[tokio::test]
async fn test_ssh_key_registration() {
    let app = TestApp::new();
    let (_, alice) = app.user("alice").await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v2/user/keys",
            Some(&alice),
            Some(json!({"title": "laptop", "key": ssh_key(7)})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["fingerprint"].as_str().unwrap().starts_with("SHA256:"));

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v2/user/keys",
            Some(&alice),
            Some(json!({"title": "again", "key": ssh_key(7)})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v2/user/keys",
            Some(&alice),
            Some(json!({"title": "junk", "key": "ssh-ed25519 !!!"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.events().contains(&AuditEvent::SshKeyAdd));
}

#[tokio::test]
async fn test_unauthenticated_errors_use_envelope() {
    let app = TestApp::new();

    let (status, body): (StatusCode, Value) = app
        .request(Method::GET, "/api/v2/admin/tenants", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication required");
}

#[tokio::test]
async fn test_admin_sign_out_revokes_admin_token() {
    let app = TestApp::new();
    let admin = app.admin_token.clone();

    let (status, _) = app
        .request(Method::POST, "/api/v2/signOut", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(app.events().contains(&AuditEvent::UserLogout));

    let (status, _) = app
        .request(Method::GET, "/api/v2/admin/tenants", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
