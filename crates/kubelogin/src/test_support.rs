//! In-process identity provider and scripted users for tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::oidc::{DeviceAuthorization, UserInteraction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenBehavior {
    Issue,
    Reject,
    /// Signed by a key that is not the published one under the same key ID
    BadSignature,
    /// Signed by a key whose ID the key set never lists
    UnknownKid,
    NoIdToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceBehavior {
    /// Answer `authorization_pending` this many times, then issue tokens
    ApproveAfter(usize),
    AlwaysPending,
    Deny,
    Expire,
}

/// ES256 key pair with its public JWK
#[derive(Clone)]
struct SigningKey {
    kid: String,
    encoding: EncodingKey,
    jwk: Value,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey").field("kid", &self.kid).finish_non_exhaustive()
    }
}

impl SigningKey {
    fn generate(kid: &str) -> Self {
        let pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let encoding = EncodingKey::from_ec_pem(pair.serialize_pem().as_bytes()).unwrap();
        // Uncompressed SEC1 point: 0x04 || x || y
        let raw = pair.public_key_raw();
        let jwk = json!({
            "kty": "EC",
            "crv": "P-256",
            "alg": "ES256",
            "use": "sig",
            "kid": kid,
            "x": URL_SAFE_NO_PAD.encode(&raw[1..33]),
            "y": URL_SAFE_NO_PAD.encode(&raw[33..65]),
        });
        Self {
            kid: kid.to_string(),
            encoding,
            jwk,
        }
    }
}

#[derive(Debug, Default)]
struct PendingAuthorization {
    code_challenge: Option<String>,
    nonce: Option<String>,
}

#[derive(Debug)]
struct ProviderState {
    issuer: String,
    requests: AtomicUsize,
    jwks_fetches: AtomicUsize,
    device_polls: AtomicUsize,
    issued: AtomicUsize,
    pkce_verified: AtomicBool,
    token_behavior: Mutex<TokenBehavior>,
    device_behavior: Mutex<DeviceBehavior>,
    last_grant: Mutex<Option<String>>,
    last_scope: Mutex<Option<String>>,
    pending: Mutex<PendingAuthorization>,
    signing_key: Mutex<SigningKey>,
}

/// Identity provider served on an ephemeral loopback port
#[derive(Debug)]
pub struct FakeProvider {
    state: Arc<ProviderState>,
    stop: CancellationToken,
}

impl FakeProvider {
    pub const CLIENT_ID: &'static str = "c1";
    pub const SECRET: &'static str = "fake-provider-client-secret-0123456789";

    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let state = Arc::new(ProviderState {
            issuer: format!("http://{addr}"),
            requests: AtomicUsize::new(0),
            jwks_fetches: AtomicUsize::new(0),
            device_polls: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            pkce_verified: AtomicBool::new(false),
            token_behavior: Mutex::new(TokenBehavior::Issue),
            device_behavior: Mutex::new(DeviceBehavior::ApproveAfter(0)),
            last_grant: Mutex::new(None),
            last_scope: Mutex::new(None),
            pending: Mutex::new(PendingAuthorization::default()),
            signing_key: Mutex::new(SigningKey::generate("key-1")),
        });

        let router = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/jwks", get(jwks))
            .route("/authorize", get(authorize))
            .route("/token", post(token))
            .route("/device", post(device))
            .with_state(Arc::clone(&state));

        let stop = CancellationToken::new();
        let shutdown = stop.clone().cancelled_owned();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
                .unwrap();
        });

        Self { state, stop }
    }

    pub fn issuer(&self) -> String {
        self.state.issuer.clone()
    }

    /// Requests served so far, discovery included
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn device_polls(&self) -> usize {
        self.state.device_polls.load(Ordering::SeqCst)
    }

    pub fn last_grant(&self) -> Option<String> {
        self.state.last_grant.lock().clone()
    }

    pub fn last_scope(&self) -> Option<String> {
        self.state.last_scope.lock().clone()
    }

    pub fn pkce_verified(&self) -> bool {
        self.state.pkce_verified.load(Ordering::SeqCst)
    }

    pub fn set_token_behavior(&self, behavior: TokenBehavior) {
        *self.state.token_behavior.lock() = behavior;
    }

    pub fn set_device_behavior(&self, behavior: DeviceBehavior) {
        *self.state.device_behavior.lock() = behavior;
    }

    pub fn jwks_uri(&self) -> Url {
        Url::parse(&format!("{}/jwks", self.state.issuer)).unwrap()
    }

    /// Key set downloads, the one made during discovery included
    pub fn jwks_fetches(&self) -> usize {
        self.state.jwks_fetches.load(Ordering::SeqCst)
    }

    pub fn current_kid(&self) -> String {
        self.state.signing_key.lock().kid.clone()
    }

    /// Replace the published signing key with a new one and return its ID
    pub fn rotate_key(&self) -> String {
        let mut key = self.state.signing_key.lock();
        let serial = key.kid.trim_start_matches("key-").parse::<u32>().unwrap_or(0) + 1;
        *key = SigningKey::generate(&format!("key-{serial}"));
        key.kid.clone()
    }

    /// ID token for this client signed with the published key
    pub fn sign_id_token(&self, exp_offset_secs: i64) -> String {
        let key = self.state.signing_key.lock().clone();
        sign(&self.state, None, exp_offset_secs, &key)
    }
}

impl Drop for FakeProvider {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn sign(
    state: &ProviderState,
    nonce: Option<String>,
    exp_offset_secs: i64,
    key: &SigningKey,
) -> String {
    let now = chrono::Utc::now().timestamp();
    let serial = state.issued.fetch_add(1, Ordering::SeqCst);
    let mut claims = json!({
        "iss": state.issuer,
        "aud": FakeProvider::CLIENT_ID,
        "sub": "user-1",
        "exp": now + exp_offset_secs,
        "iat": now,
        "jti": format!("token-{serial}"),
    });
    if let Some(nonce) = nonce {
        claims["nonce"] = Value::String(nonce);
    }
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(key.kid.clone());
    jsonwebtoken::encode(&header, &claims, &key.encoding).unwrap()
}

async fn discovery(State(state): State<Arc<ProviderState>>) -> Json<Value> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let issuer = &state.issuer;
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "jwks_uri": format!("{issuer}/jwks"),
        "device_authorization_endpoint": format!("{issuer}/device"),
        "response_types_supported": ["code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["ES256"],
        "code_challenge_methods_supported": ["plain", "S256"],
    }))
}

async fn jwks(State(state): State<Arc<ProviderState>>) -> Json<Value> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    state.jwks_fetches.fetch_add(1, Ordering::SeqCst);
    let published = state.signing_key.lock().jwk.clone();
    Json(json!({"keys": [published]}))
}

async fn authorize(
    State(state): State<Arc<ProviderState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Redirect {
    state.requests.fetch_add(1, Ordering::SeqCst);
    *state.pending.lock() = PendingAuthorization {
        code_challenge: query.get("code_challenge").cloned(),
        nonce: query.get("nonce").cloned(),
    };
    let redirect = query.get("redirect_uri").cloned().unwrap_or_default();
    let state_param = query.get("state").cloned().unwrap_or_default();
    let mut location = Url::parse(&redirect).unwrap();
    location
        .query_pairs_mut()
        .append_pair("code", "code-1")
        .append_pair("state", &state_param);
    Redirect::to(location.as_str())
}

async fn device(State(state): State<Arc<ProviderState>>) -> Json<Value> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "device_code": "dc-1",
        "user_code": "WDJB-MJHT",
        "verification_uri": format!("{}/activate", state.issuer),
        "expires_in": 600,
        "interval": 1,
    }))
}

fn oauth_error(code: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": code}))).into_response()
}

async fn token(
    State(state): State<Arc<ProviderState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let grant = form.get("grant_type").cloned().unwrap_or_default();
    *state.last_grant.lock() = Some(grant.clone());
    *state.last_scope.lock() = form.get("scope").cloned();

    let behavior = *state.token_behavior.lock();
    if behavior == TokenBehavior::Reject {
        return oauth_error("invalid_client");
    }

    let mut nonce = None;
    let refresh_token = match grant.as_str() {
        crate::constants::DEVICE_CODE_GRANT_TYPE => {
            let polls = state.device_polls.fetch_add(1, Ordering::SeqCst) + 1;
            match *state.device_behavior.lock() {
                DeviceBehavior::ApproveAfter(pending) if polls > pending => {}
                DeviceBehavior::ApproveAfter(_) | DeviceBehavior::AlwaysPending => {
                    return oauth_error("authorization_pending");
                }
                DeviceBehavior::Deny => return oauth_error("access_denied"),
                DeviceBehavior::Expire => return oauth_error("expired_token"),
            }
            Some("refresh-1")
        }
        "authorization_code" => {
            if form.get("code").map(String::as_str) != Some("code-1") {
                return oauth_error("invalid_grant");
            }
            let pending = std::mem::take(&mut *state.pending.lock());
            if let Some(challenge) = pending.code_challenge {
                let verifier = form.get("code_verifier").cloned().unwrap_or_default();
                let computed = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
                if computed != challenge {
                    return oauth_error("invalid_grant");
                }
                state.pkce_verified.store(true, Ordering::SeqCst);
            }
            nonce = pending.nonce;
            Some("refresh-1")
        }
        "refresh_token" => {
            if form.get("refresh_token").map(String::as_str) == Some("revoked") {
                return oauth_error("invalid_grant");
            }
            None
        }
        "password" => Some("refresh-1"),
        "client_credentials" => None,
        _ => return oauth_error("unsupported_grant_type"),
    };

    let serial = state.issued.load(Ordering::SeqCst);
    let mut body = json!({
        "access_token": format!("access-{serial}"),
        "token_type": "Bearer",
        "expires_in": 3600,
    });
    let published = state.signing_key.lock().clone();
    let key = match behavior {
        TokenBehavior::NoIdToken => None,
        TokenBehavior::BadSignature => Some(SigningKey::generate(&published.kid)),
        TokenBehavior::UnknownKid => Some(SigningKey::generate("unpublished")),
        TokenBehavior::Issue | TokenBehavior::Reject => Some(published),
    };
    if let Some(key) = key {
        body["id_token"] = Value::String(sign(&state, nonce, 3600, &key));
    }
    if let Some(refresh) = refresh_token {
        body["refresh_token"] = Value::String(refresh.to_string());
    }
    Json(body).into_response()
}

/// Follows the authorization redirect the way a browser would
#[derive(Debug, Default)]
pub struct BrowserSimulator {
    visited: Mutex<Option<Url>>,
}

impl BrowserSimulator {
    pub fn visited(&self) -> Option<Url> {
        self.visited.lock().clone()
    }
}

#[async_trait]
impl UserInteraction for BrowserSimulator {
    async fn show_authorization_url(&self, url: &Url, _open_browser: bool) {
        *self.visited.lock() = Some(url.clone());

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        let response = client.get(url.clone()).send().await.unwrap();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .replace("//localhost:", "//127.0.0.1:");
        client.get(location).send().await.unwrap();
    }

    async fn show_device_code(&self, _device: &DeviceAuthorization, _open_browser: bool) {}
}

/// Records prompts without acting on them
#[derive(Debug, Default)]
pub struct RecordingInteraction {
    user_code: Mutex<Option<String>>,
}

impl RecordingInteraction {
    pub fn user_code(&self) -> Option<String> {
        self.user_code.lock().clone()
    }
}

#[async_trait]
impl UserInteraction for RecordingInteraction {
    async fn show_authorization_url(&self, _url: &Url, _open_browser: bool) {}

    async fn show_device_code(&self, device: &DeviceAuthorization, _open_browser: bool) {
        *self.user_code.lock() = Some(device.user_code.clone());
    }
}
