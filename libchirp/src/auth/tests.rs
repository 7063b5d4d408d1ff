use super::*;
use crate::accounts::StoredCredential;
use crate::error::ChirpError;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use httpmock::Method::POST;
use httpmock::MockServer;
use tempfile::TempDir;

fn test_context() -> (TempDir, Context) {
    let temp = TempDir::new().unwrap();
    let ctx = Context::at(temp.path().to_path_buf());
    (temp, ctx)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn oauth_credential(expires_at: Option<i64>) -> StoredCredential {
    StoredCredential::oauth2(
        "stored-access".to_string(),
        Some("stored-refresh".to_string()),
        expires_at,
        "client-1".to_string(),
        vec!["tweet.read".to_string()],
    )
}

fn store_with(ctx: &Context, name: &str, credential: StoredCredential) -> AccountStore {
    let mut store = AccountStore::open(ctx).unwrap();
    store.set(name, credential);
    store.save(ctx).unwrap();
    store
}

fn fresh_token() -> RefreshedToken {
    RefreshedToken {
        access_token: "fresh-access".to_string(),
        refresh_token: Some("fresh-refresh".to_string()),
        expires_at: now_ms() + 3_600_000,
        scopes: vec!["tweet.read".to_string(), "users.read".to_string()],
    }
}

#[derive(Default)]
struct MockRefresher {
    calls: AtomicUsize,
    token: Option<RefreshedToken>,
    fail_with: Option<String>,
    last_request: Mutex<Option<RefreshRequest>>,
}

impl MockRefresher {
    fn returning(token: RefreshedToken) -> Self {
        Self {
            token: Some(token),
            ..Default::default()
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Default::default()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for MockRefresher {
    async fn refresh(&self, request: &RefreshRequest) -> Result<RefreshedToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if let Some(message) = &self.fail_with {
            return Err(AuthError::RefreshFailed(message.clone()).into());
        }
        match &self.token {
            Some(token) => Ok(token.clone()),
            None => Err(AuthError::RefreshFailed("mock has no token".to_string()).into()),
        }
    }
}

mod resolve {
    use super::*;

    #[tokio::test]
    async fn bearer_token_is_returned_verbatim() {
        let (_temp, ctx) = test_context();
        let mut store = store_with(&ctx, "main", StoredCredential::bearer("tok-123".to_string()));
        let refresher = MockRefresher::default();

        let token = resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap();
        assert_eq!(token, "tok-123");
        assert_eq!(refresher.call_count(), 0);
    }

    #[tokio::test]
    async fn blank_bearer_token_is_rejected() {
        let (_temp, ctx) = test_context();
        let mut store = store_with(&ctx, "main", StoredCredential::bearer("   ".to_string()));
        let refresher = MockRefresher::default();

        let err = resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChirpError::Auth(AuthError::EmptyBearerToken)
        ));
    }

    #[tokio::test]
    async fn empty_store_fails_with_no_account() {
        let (_temp, ctx) = test_context();
        let mut store = AccountStore::open(&ctx).unwrap();
        let refresher = MockRefresher::default();

        let err = resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChirpError::Auth(AuthError::NoAccountConfigured)
        ));
    }

    #[tokio::test]
    async fn unknown_named_account_is_reported_by_name() {
        let (_temp, ctx) = test_context();
        let mut store = store_with(&ctx, "main", StoredCredential::bearer("t".to_string()));
        let refresher = MockRefresher::default();

        let err = resolve_token(&ctx, &mut store, &refresher, Some("other"))
            .await
            .unwrap_err();
        assert!(format!("{}", err).contains("'other'"));
    }

    #[tokio::test]
    async fn valid_oauth_token_is_returned_without_refresh() {
        let (_temp, ctx) = test_context();
        // Comfortably outside the 60s margin.
        let mut store = store_with(&ctx, "main", oauth_credential(Some(now_ms() + 600_000)));
        let refresher = MockRefresher::returning(fresh_token());

        let token = resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap();
        assert_eq!(token, "stored-access");
        assert_eq!(refresher.call_count(), 0);
    }

    #[tokio::test]
    async fn expired_oauth_token_triggers_exactly_one_refresh() {
        let (_temp, ctx) = test_context();
        let mut store = store_with(&ctx, "main", oauth_credential(Some(now_ms() - 1_000)));
        let refresher = MockRefresher::returning(fresh_token());

        let token = resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap();
        assert_eq!(token, "fresh-access");
        assert_eq!(refresher.call_count(), 1);
    }

    #[tokio::test]
    async fn token_inside_the_margin_is_refreshed_early() {
        let (_temp, ctx) = test_context();
        // Still valid for 30s, but that is inside the 60s margin.
        let mut store = store_with(&ctx, "main", oauth_credential(Some(now_ms() + 30_000)));
        let refresher = MockRefresher::returning(fresh_token());

        let token = resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap();
        assert_eq!(token, "fresh-access");
        assert_eq!(refresher.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_expiry_is_treated_as_already_expired() {
        let (_temp, ctx) = test_context();
        let mut store = store_with(&ctx, "main", oauth_credential(None));
        let refresher = MockRefresher::returning(fresh_token());

        resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap();
        assert_eq!(refresher.call_count(), 1);
    }

    #[tokio::test]
    async fn refresh_request_carries_stored_client_id_and_refresh_token() {
        let (_temp, ctx) = test_context();
        let mut store = store_with(&ctx, "main", oauth_credential(Some(0)));
        let refresher = MockRefresher::returning(fresh_token());

        resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap();
        let request = refresher.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.client_id, "client-1");
        assert_eq!(request.refresh_token, "stored-refresh");
    }

    #[tokio::test]
    async fn successful_refresh_is_persisted_to_disk() {
        let (_temp, ctx) = test_context();
        let mut store = store_with(&ctx, "main", oauth_credential(Some(0)));
        let token = fresh_token();
        let expected_expiry = token.expires_at;
        let refresher = MockRefresher::returning(token);

        resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap();

        let reloaded = AccountStore::open(&ctx).unwrap();
        let (_, credential) = reloaded.get(Some("main")).unwrap();
        assert_eq!(credential.access_token.as_deref(), Some("fresh-access"));
        assert_eq!(credential.refresh_token.as_deref(), Some("fresh-refresh"));
        assert_eq!(credential.expires_at, Some(expected_expiry));
        // Untouched fields survive the merge.
        assert_eq!(credential.client_id.as_deref(), Some("client-1"));
        assert_eq!(
            credential.scopes.as_deref(),
            Some(&["tweet.read".to_string(), "users.read".to_string()][..])
        );
    }

    #[tokio::test]
    async fn old_refresh_token_is_kept_when_response_omits_one() {
        let (_temp, ctx) = test_context();
        let mut store = store_with(&ctx, "main", oauth_credential(Some(0)));
        let refresher = MockRefresher::returning(RefreshedToken {
            refresh_token: None,
            ..fresh_token()
        });

        resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap();

        let reloaded = AccountStore::open(&ctx).unwrap();
        let (_, credential) = reloaded.get(Some("main")).unwrap();
        assert_eq!(credential.refresh_token.as_deref(), Some("stored-refresh"));
        assert_eq!(credential.access_token.as_deref(), Some("fresh-access"));
    }

    #[tokio::test]
    async fn missing_access_token_is_an_error() {
        let (_temp, ctx) = test_context();
        let mut credential = oauth_credential(Some(now_ms() + 600_000));
        credential.access_token = None;
        let mut store = store_with(&ctx, "main", credential);
        let refresher = MockRefresher::default();

        let err = resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChirpError::Auth(AuthError::MissingAccessToken)
        ));
    }

    #[tokio::test]
    async fn expired_without_refresh_token_cannot_refresh() {
        let (_temp, ctx) = test_context();
        let mut credential = oauth_credential(Some(0));
        credential.refresh_token = None;
        let mut store = store_with(&ctx, "main", credential);
        let refresher = MockRefresher::returning(fresh_token());

        let err = resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChirpError::Auth(AuthError::CannotRefresh)));
        assert_eq!(refresher.call_count(), 0);
    }

    #[tokio::test]
    async fn expired_without_client_id_cannot_refresh() {
        let (_temp, ctx) = test_context();
        let mut credential = oauth_credential(Some(0));
        credential.client_id = None;
        let mut store = store_with(&ctx, "main", credential);
        let refresher = MockRefresher::returning(fresh_token());

        let err = resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChirpError::Auth(AuthError::CannotRefresh)));
    }

    #[tokio::test]
    async fn refresh_failure_propagates_and_leaves_disk_unchanged() {
        let (_temp, ctx) = test_context();
        let mut store = store_with(&ctx, "main", oauth_credential(Some(0)));
        let refresher = MockRefresher::failing("HTTP 400: invalid_grant");

        let err = resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap_err();
        let message = format!("{}", err);
        assert!(message.contains("Token refresh failed"));
        assert!(message.contains("invalid_grant"));
        assert_eq!(refresher.call_count(), 1);

        let reloaded = AccountStore::open(&ctx).unwrap();
        let (_, credential) = reloaded.get(Some("main")).unwrap();
        assert_eq!(credential.access_token.as_deref(), Some("stored-access"));
        assert_eq!(credential.expires_at, Some(0));
    }

    #[tokio::test]
    async fn unknown_auth_type_is_rejected_at_resolution() {
        let (_temp, ctx) = test_context();
        let mut credential = StoredCredential::bearer("x".to_string());
        credential.auth_type = "webauthn".to_string();
        let mut store = store_with(&ctx, "main", credential);
        let refresher = MockRefresher::default();

        let err = resolve_token(&ctx, &mut store, &refresher, None)
            .await
            .unwrap_err();
        assert!(format!("{}", err).contains("'webauthn'"));
    }
}

mod pkce {
    use super::*;

    #[test]
    fn verifier_is_86_url_safe_chars() {
        let pkce = generate_pkce();
        assert_eq!(pkce.verifier.len(), 86);
        assert!(pkce
            .verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn challenge_is_s256_of_verifier() {
        let pkce = generate_pkce();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes()));
        assert_eq!(pkce.challenge, expected);
    }

    #[test]
    fn each_login_attempt_gets_fresh_material() {
        let first = generate_pkce();
        let second = generate_pkce();
        assert_ne!(first.verifier, second.verifier);
        assert_ne!(first.state, second.state);
    }

    #[test]
    fn authorize_url_carries_the_flow_parameters() {
        let pkce = generate_pkce();
        let scopes = vec!["tweet.read".to_string(), "offline.access".to_string()];
        let url = build_authorize_url("client-1", "http://127.0.0.1:8585/callback", &scopes, &pkce)
            .unwrap();

        let parsed = Url::parse(&url).unwrap();
        let params: std::collections::HashMap<String, String> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8585/callback");
        assert_eq!(params["scope"], "tweet.read offline.access");
        assert_eq!(params["state"], pkce.state);
        assert_eq!(params["code_challenge"], pkce.challenge);
        assert_eq!(params["code_challenge_method"], "S256");
    }
}

mod http_refresher {
    use super::*;

    #[tokio::test]
    async fn parses_a_full_token_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/2/oauth2/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"new-access","refresh_token":"new-refresh","expires_in":7200,"scope":"tweet.read users.read"}"#);
        });

        let refresher = HttpTokenRefresher::with_token_url(server.url("/2/oauth2/token"));
        let before = now_ms();
        let token = refresher
            .refresh(&RefreshRequest {
                client_id: "cid".to_string(),
                refresh_token: "rt".to_string(),
            })
            .await
            .unwrap();
        let after = now_ms();

        assert_eq!(token.access_token, "new-access");
        assert_eq!(token.refresh_token.as_deref(), Some("new-refresh"));
        assert!(token.expires_at >= before + 7_200_000);
        assert!(token.expires_at <= after + 7_200_000);
        assert_eq!(token.scopes, vec!["tweet.read", "users.read"]);
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn omitted_fields_get_sensible_defaults() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/2/oauth2/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"a"}"#);
        });

        let refresher = HttpTokenRefresher::with_token_url(server.url("/2/oauth2/token"));
        let before = now_ms();
        let token = refresher
            .refresh(&RefreshRequest {
                client_id: "cid".to_string(),
                refresh_token: "rt".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(token.refresh_token, None);
        assert!(token.scopes.is_empty());
        // Falls back to the provider-default TTL.
        assert!(token.expires_at >= before + 7_200_000);
    }

    #[tokio::test]
    async fn non_success_status_fails_with_body_detail() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/2/oauth2/token");
            then.status(400)
                .header("content-type", "application/json")
                .body(r#"{"error":"invalid_grant"}"#);
        });

        let refresher = HttpTokenRefresher::with_token_url(server.url("/2/oauth2/token"));
        let err = refresher
            .refresh(&RefreshRequest {
                client_id: "cid".to_string(),
                refresh_token: "rt".to_string(),
            })
            .await
            .unwrap_err();

        let message = format!("{}", err);
        assert!(message.contains("Token refresh failed"));
        assert!(message.contains("HTTP 400"));
        assert!(message.contains("invalid_grant"));
    }

    #[tokio::test]
    async fn exchange_code_returns_the_token_set() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/2/oauth2/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"first-access","refresh_token":"first-refresh","expires_in":3600,"scope":"tweet.read"}"#);
        });

        let refresher = HttpTokenRefresher::with_token_url(server.url("/2/oauth2/token"));
        let token = refresher
            .exchange_code("cid", "auth-code", "http://127.0.0.1:8585/callback", "verifier")
            .await
            .unwrap();

        assert_eq!(token.access_token, "first-access");
        assert_eq!(token.refresh_token.as_deref(), Some("first-refresh"));
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn exchange_code_maps_errors_to_login_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/2/oauth2/token");
            then.status(401).body("unauthorized_client");
        });

        let refresher = HttpTokenRefresher::with_token_url(server.url("/2/oauth2/token"));
        let err = refresher
            .exchange_code("cid", "auth-code", "http://127.0.0.1:8585/callback", "verifier")
            .await
            .unwrap_err();

        let message = format!("{}", err);
        assert!(message.contains("Login failed"));
        assert!(message.contains("HTTP 401"));
        assert!(message.contains("unauthorized_client"));
    }
}

mod callback {
    use super::*;
    use std::time::Duration;

    async fn send_request(addr: std::net::SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn returns_the_code_on_a_matching_callback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let wait = tokio::spawn(async move {
            wait_for_callback(listener, "STATE123", Duration::from_secs(5)).await
        });

        let response = send_request(
            addr,
            "GET /callback?code=abc123&state=STATE123 HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .await;
        assert!(response.contains("200 OK"));
        assert!(response.contains("close this window"));

        let code = wait.await.unwrap().unwrap();
        assert_eq!(code, "abc123");
    }

    #[tokio::test]
    async fn ignores_unrelated_requests_and_keeps_waiting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let wait = tokio::spawn(async move {
            wait_for_callback(listener, "S", Duration::from_secs(5)).await
        });

        let favicon = send_request(addr, "GET /favicon.ico HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(favicon.contains("404"));

        send_request(
            addr,
            "GET /callback?code=later&state=S HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await;
        assert_eq!(wait.await.unwrap().unwrap(), "later");
    }

    #[tokio::test]
    async fn state_mismatch_aborts_the_login() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let wait = tokio::spawn(async move {
            wait_for_callback(listener, "EXPECTED", Duration::from_secs(5)).await
        });

        let response = send_request(
            addr,
            "GET /callback?code=abc&state=FORGED HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await;
        assert!(response.contains("400"));

        let err = wait.await.unwrap().unwrap_err();
        assert!(format!("{}", err).contains("state mismatch"));
    }

    #[tokio::test]
    async fn provider_denial_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let wait = tokio::spawn(async move {
            wait_for_callback(listener, "S", Duration::from_secs(5)).await
        });

        send_request(
            addr,
            "GET /callback?error=access_denied&state=S HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await;

        let err = wait.await.unwrap().unwrap_err();
        assert!(format!("{}", err).contains("access_denied"));
    }

    #[tokio::test]
    async fn times_out_when_nobody_calls_back() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let err = wait_for_callback(listener, "S", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(format!("{}", err).contains("timed out"));
    }
}
