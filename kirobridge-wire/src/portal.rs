//! Web portal RPC client.
//!
//! The portal speaks Smithy RPC-v2 with CBOR bodies and authenticates the
//! way a browser session does: a bearer header plus a cookie jar carrying
//! the identity provider, access token, and (for refresh) the CSRF and
//! session tokens. Operations covered:
//!
//! - `GetUserUsageAndLimits` - quota usage, retried on transient failure
//! - `GetUserInfo` - account identity
//! - `RefreshToken` - rotate the access token for an existing session
//! - `InitiateLogin` / `ExchangeToken` - the OAuth acquisition handshake
//!
//! Status classification is shared by every operation: `423` (or an
//! `AccountSuspendedException` body) means the account is suspended, `401`
//! means the token is dead, anything else non-2xx is a generic RPC failure
//! carrying the decoded-or-raw error body.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE, ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use kirobridge_core::{
    redact, BonusGrant, Credential, IdentityProvider, ResourceUsage, Settings, TrialInfo,
    UsageSnapshot,
};

use crate::cbor::{self, Value};
use crate::error::WireError;
use crate::retry::RetryStrategy;

// ============================================================================
// Constants
// ============================================================================

/// Default web portal endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://prod.us-east-1.webportal.kiro.dev";

/// Portal service name in the operation path.
const SERVICE: &str = "KiroWebPortalService";

/// Protocol marker the portal rejects requests without.
const SMITHY_PROTOCOL: &str = "rpc-v2-cbor";

/// Origin tag the portal expects from the IDE.
const ORIGIN: &str = "KIRO_IDE";

const OP_GET_USAGE: &str = "GetUserUsageAndLimits";
const OP_GET_USER_INFO: &str = "GetUserInfo";
const OP_REFRESH_TOKEN: &str = "RefreshToken";
const OP_INITIATE_LOGIN: &str = "InitiateLogin";
const OP_EXCHANGE_TOKEN: &str = "ExchangeToken";

/// Fallback access-token lifetime when the portal omits `expiresIn`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

// ============================================================================
// Result Types
// ============================================================================

/// Account identity from `GetUserInfo`.
#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    /// Account email.
    pub email: String,
    /// Opaque backend user id.
    pub user_id: String,
    /// Display name, if the backend returned one.
    pub name: String,
}

/// New token material from `RefreshToken`.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    /// Rotated access token.
    pub access_token: String,
    /// Rotated CSRF token, if the portal returned one.
    pub csrf_token: Option<String>,
    /// Absolute expiry of the new access token.
    pub expires_at: DateTime<Utc>,
    /// Profile ARN, if the portal returned one.
    pub profile_arn: Option<String>,
}

/// Credential-shaped record minted by `ExchangeToken`.
#[derive(Debug, Clone)]
pub struct MintedCredential {
    /// Identity provider the code was issued for.
    pub idp: IdentityProvider,
    /// Fresh access token.
    pub access_token: String,
    /// CSRF token for subsequent portal calls.
    pub csrf_token: Option<String>,
    /// Session token harvested from the `Set-Cookie` response headers.
    pub session_token: Option<String>,
    /// Absolute expiry of the access token.
    pub expires_at: DateTime<Utc>,
    /// Profile ARN, if the portal returned one.
    pub profile_arn: Option<String>,
}

// ============================================================================
// Portal Auth
// ============================================================================

/// Cookie-jar material for an authenticated portal call.
struct PortalAuth<'a> {
    idp: IdentityProvider,
    access_token: &'a str,
    csrf_token: Option<&'a str>,
    session_token: Option<&'a str>,
}

impl<'a> PortalAuth<'a> {
    fn from_credential(credential: &'a Credential) -> Self {
        Self {
            idp: credential.idp,
            access_token: &credential.access_token,
            csrf_token: credential.csrf_token.as_deref(),
            session_token: credential.session_token.as_deref(),
        }
    }

    /// Assembles the browser-style cookie header.
    fn cookie_header(&self) -> String {
        let mut cookies = vec![
            format!("Idp={}", self.idp.as_str()),
            format!("AccessToken={}", self.access_token),
        ];
        if let Some(csrf) = self.csrf_token {
            cookies.push(format!("csrfToken={csrf}"));
        }
        if let Some(session) = self.session_token {
            cookies.push(format!("RefreshToken={session}"));
        }
        cookies.join("; ")
    }
}

// ============================================================================
// Portal Client
// ============================================================================

/// Client for the web portal RPC protocol.
///
/// Carries two timeout budgets: the client default for usage/identity
/// queries, and a distinct exchange budget for token refresh and the
/// OAuth handshake operations.
#[derive(Debug)]
pub struct PortalClient {
    http: reqwest::Client,
    endpoint: String,
    retry: RetryStrategy,
    exchange_timeout: Duration,
}

impl PortalClient {
    /// Creates a client against the default endpoint with 30 s budgets.
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, Duration::from_secs(30))
    }

    /// Creates a client from the settings layer.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_endpoint(&settings.portal_endpoint, settings.usage_timeout())
            .with_exchange_timeout(settings.exchange_timeout())
    }

    /// Creates a client against a specific endpoint.
    ///
    /// `timeout` becomes the usage budget; the exchange budget starts
    /// equal and is set separately via
    /// [`with_exchange_timeout`](Self::with_exchange_timeout).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built, which only happens when
    /// the system TLS configuration is fundamentally broken.
    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| panic!("Failed to create HTTP client: {e}"));

        Self {
            http,
            endpoint: endpoint.into(),
            retry: RetryStrategy::default(),
            exchange_timeout: timeout,
        }
    }

    /// Overrides the retry strategy for the usage path.
    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the budget for token refresh and code exchange.
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    fn operation_url(&self, operation: &str) -> String {
        format!("{}/service/{SERVICE}/operation/{operation}", self.endpoint)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Fetches quota usage and limits for a credential.
    ///
    /// Transient failures are retried per the client's retry strategy;
    /// `Suspended` and `Unauthorized` are returned immediately so the
    /// caller can report them to the pool.
    #[instrument(skip(self, credential), fields(account = %credential.label()))]
    pub async fn get_usage(&self, credential: &Credential) -> Result<UsageSnapshot, WireError> {
        let request = Value::object([
            ("isEmailRequired", Value::Bool(true)),
            ("origin", Value::from(ORIGIN)),
        ]);
        let auth = PortalAuth::from_credential(credential);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.call(OP_GET_USAGE, &request, Some(&auth)).await {
                Ok(value) => return parse_usage_response(&value),
                Err(err) if attempt < self.retry.max_attempts && self.retry.should_retry(&err) => {
                    warn!(attempt, error = %err, "Usage query failed, retrying");
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fetches account identity for a credential.
    #[instrument(skip(self, credential), fields(account = %credential.label()))]
    pub async fn get_user_info(&self, credential: &Credential) -> Result<UserInfo, WireError> {
        let request = Value::object([("origin", Value::from(ORIGIN))]);
        let auth = PortalAuth::from_credential(credential);
        let value = self.call(OP_GET_USER_INFO, &request, Some(&auth)).await?;

        Ok(UserInfo {
            email: text_field(&value, "email"),
            user_id: text_field(&value, "userId"),
            name: text_field(&value, "name"),
        })
    }

    /// Rotates the access token for an existing portal session.
    ///
    /// Requires the CSRF and session tokens captured at exchange time; a
    /// credential without them cannot be refreshed through the portal.
    #[instrument(skip(self, credential), fields(account = %credential.label()))]
    pub async fn refresh_token(
        &self,
        credential: &Credential,
    ) -> Result<RefreshedTokens, WireError> {
        let csrf = credential.csrf_token.as_deref().ok_or_else(|| {
            WireError::InvalidRequest("credential has no CSRF token for refresh".to_string())
        })?;
        if credential.session_token.is_none() {
            return Err(WireError::InvalidRequest(
                "credential has no session token for refresh".to_string(),
            ));
        }

        let request = Value::object([("csrfToken", Value::from(csrf))]);
        let auth = PortalAuth::from_credential(credential);
        let value = self.call(OP_REFRESH_TOKEN, &request, Some(&auth)).await?;

        let access_token = value
            .get("accessToken")
            .and_then(Value::as_str)
            .ok_or_else(|| WireError::Decode("RefreshToken response without accessToken".to_string()))?
            .to_string();
        let expires_in = value
            .get("expiresIn")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        debug!(token = %redact(&access_token), expires_in, "Token refreshed");

        Ok(RefreshedTokens {
            access_token,
            csrf_token: value.get("csrfToken").and_then(Value::as_str).map(String::from),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
            profile_arn: value.get("profileArn").and_then(Value::as_str).map(String::from),
        })
    }

    /// Starts the OAuth login flow; returns the authorization URL to open.
    ///
    /// The challenge method comes from the caller's PKCE material rather
    /// than being assumed here.
    #[instrument(skip(self, code_challenge, state))]
    pub async fn initiate_login(
        &self,
        idp: IdentityProvider,
        redirect_uri: &str,
        code_challenge: &str,
        code_challenge_method: &str,
        state: &str,
    ) -> Result<String, WireError> {
        let request = Value::object([
            ("idp", Value::from(idp.as_str())),
            ("redirectUri", Value::from(redirect_uri)),
            ("codeChallenge", Value::from(code_challenge)),
            ("codeChallengeMethod", Value::from(code_challenge_method)),
            ("state", Value::from(state)),
        ]);
        let value = self.call(OP_INITIATE_LOGIN, &request, None).await?;

        value
            .get("redirectUrl")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| WireError::Decode("InitiateLogin response without redirectUrl".to_string()))
    }

    /// Exchanges an authorization code for a credential-shaped record.
    ///
    /// The portal returns the session token only as a `Set-Cookie` header,
    /// so this operation reads response headers before the body.
    #[instrument(skip(self, code, code_verifier, state))]
    pub async fn exchange_code(
        &self,
        idp: IdentityProvider,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        state: &str,
    ) -> Result<MintedCredential, WireError> {
        let request = Value::object([
            ("idp", Value::from(idp.as_str())),
            ("code", Value::from(code)),
            ("codeVerifier", Value::from(code_verifier)),
            ("redirectUri", Value::from(redirect_uri)),
            ("state", Value::from(state)),
        ]);

        let response = self.dispatch(OP_EXCHANGE_TOKEN, &request, None).await?;
        let status = response.status().as_u16();
        let session_token = extract_session_token(
            response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        );
        let body = response.bytes().await?;
        classify(OP_EXCHANGE_TOKEN, status, &body)?;
        let value = cbor::decode(&body)?;

        let access_token = value
            .get("accessToken")
            .and_then(Value::as_str)
            .ok_or_else(|| WireError::Decode("ExchangeToken response without accessToken".to_string()))?
            .to_string();
        let expires_in = value
            .get("expiresIn")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        debug!(
            token = %redact(&access_token),
            has_session = session_token.is_some(),
            "Code exchanged"
        );

        Ok(MintedCredential {
            idp,
            access_token,
            csrf_token: value.get("csrfToken").and_then(Value::as_str).map(String::from),
            session_token,
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
            profile_arn: value.get("profileArn").and_then(Value::as_str).map(String::from),
        })
    }

    // ========================================================================
    // Request Pipeline
    // ========================================================================

    /// Shared encode → POST → classify → decode pipeline.
    async fn call(
        &self,
        operation: &str,
        request: &Value,
        auth: Option<&PortalAuth<'_>>,
    ) -> Result<Value, WireError> {
        let response = self.dispatch(operation, request, auth).await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        debug!(operation, status, bytes = body.len(), "Portal response");
        classify(operation, status, &body)?;
        Ok(cbor::decode(&body)?)
    }

    async fn dispatch(
        &self,
        operation: &str,
        request: &Value,
        auth: Option<&PortalAuth<'_>>,
    ) -> Result<reqwest::Response, WireError> {
        let url = self.operation_url(operation);
        let body = cbor::encode(request);
        let headers = build_headers(auth)?;

        debug!(operation, bytes = body.len(), "Portal request");

        let mut builder = self.http.post(&url).headers(headers).body(body);
        if is_exchange_operation(operation) {
            builder = builder.timeout(self.exchange_timeout);
        }
        builder.send().await.map_err(WireError::from)
    }
}

/// Operations that run under the exchange budget rather than the usage
/// budget.
fn is_exchange_operation(operation: &str) -> bool {
    matches!(operation, OP_REFRESH_TOKEN | OP_INITIATE_LOGIN | OP_EXCHANGE_TOKEN)
}

impl Default for PortalClient {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Request Assembly & Classification
// ============================================================================

fn build_headers(auth: Option<&PortalAuth<'_>>) -> Result<HeaderMap, WireError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/cbor"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/cbor"));
    headers.insert("smithy-protocol", HeaderValue::from_static(SMITHY_PROTOCOL));

    if let Some(auth) = auth {
        let bearer = format!("Bearer {}", auth.access_token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| WireError::InvalidRequest(format!("bad access token: {e}")))?,
        );
        if let Some(csrf) = auth.csrf_token {
            headers.insert(
                "x-csrf-token",
                HeaderValue::from_str(csrf)
                    .map_err(|e| WireError::InvalidRequest(format!("bad CSRF token: {e}")))?,
            );
        }
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&auth.cookie_header())
                .map_err(|e| WireError::InvalidRequest(format!("bad cookie value: {e}")))?,
        );
    }

    Ok(headers)
}

/// Maps a portal HTTP status to the error taxonomy.
fn classify(operation: &str, status: u16, body: &[u8]) -> Result<(), WireError> {
    if (200..300).contains(&status) {
        return Ok(());
    }

    // Error bodies are usually CBOR too; fall back to raw text.
    let detail = match cbor::decode(body) {
        Ok(value) => format!("{value:?}"),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    };

    if status == 423 || detail.contains("AccountSuspendedException") {
        return Err(WireError::Suspended);
    }
    if status == 401 {
        return Err(WireError::Unauthorized);
    }

    Err(WireError::Rpc {
        operation: operation.to_string(),
        status,
        detail,
    })
}

/// Pulls the `RefreshToken` session cookie out of `Set-Cookie` values.
fn extract_session_token<'a>(cookies: impl Iterator<Item = &'a str>) -> Option<String> {
    for cookie in cookies {
        if let Some(rest) = cookie.split("RefreshToken=").nth(1) {
            let token = rest.split(';').next().unwrap_or("");
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

// ============================================================================
// Response Parsing
// ============================================================================

fn text_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn timestamp_field(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    let secs = value.get(key).and_then(Value::as_f64)?;
    #[allow(clippy::cast_possible_truncation)]
    let secs = secs as i64;
    DateTime::from_timestamp(secs, 0)
}

/// Decodes a `GetUserUsageAndLimits` envelope into a [`UsageSnapshot`].
fn parse_usage_response(value: &Value) -> Result<UsageSnapshot, WireError> {
    let mut snapshot = UsageSnapshot {
        days_until_reset: value.get("daysUntilReset").and_then(Value::as_i64).unwrap_or(0),
        fetched_at: Some(Utc::now()),
        ..Default::default()
    };

    if let Some(user_info) = value.get("userInfo") {
        snapshot.email = text_field(user_info, "email");
        snapshot.user_id = text_field(user_info, "userId");
    }

    if let Some(sub_info) = value.get("subscriptionInfo") {
        snapshot.subscription_tier = value_or(sub_info, "type", "Free");
        snapshot.subscription_title = text_field(sub_info, "subscriptionTitle");
    } else {
        snapshot.subscription_tier = "Free".to_string();
    }

    if let Some(breakdowns) = value.get("usageBreakdownList").and_then(Value::as_array) {
        for breakdown in breakdowns {
            snapshot.resources.push(parse_breakdown(breakdown));
        }
    }

    debug!(
        email = %snapshot.email,
        resources = snapshot.resources.len(),
        "Usage snapshot parsed"
    );

    Ok(snapshot)
}

fn value_or(value: &Value, key: &str, fallback: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

fn parse_breakdown(breakdown: &Value) -> ResourceUsage {
    let mut resource = ResourceUsage {
        limit: breakdown.get("usageLimit").and_then(Value::as_u64).unwrap_or(0),
        used: breakdown.get("currentUsage").and_then(Value::as_u64).unwrap_or(0),
        display_name: text_field(breakdown, "displayName"),
        resource_type: text_field(breakdown, "resourceType"),
        next_reset: timestamp_field(breakdown, "nextDateReset"),
        trial: None,
        bonuses: Vec::new(),
    };

    if let Some(trial) = breakdown.get("freeTrialInfo") {
        if !trial.is_null() {
            resource.trial = Some(TrialInfo {
                limit: trial.get("usageLimit").and_then(Value::as_u64).unwrap_or(0),
                used: trial.get("currentUsage").and_then(Value::as_u64).unwrap_or(0),
                status: text_field(trial, "freeTrialStatus"),
                expires_at: timestamp_field(trial, "freeTrialExpiry"),
            });
        }
    }

    if let Some(bonuses) = breakdown.get("bonuses").and_then(Value::as_array) {
        for bonus in bonuses {
            resource.bonuses.push(BonusGrant {
                code: text_field(bonus, "bonusCode"),
                display_name: text_field(bonus, "displayName"),
                limit: bonus.get("usageLimit").and_then(Value::as_u64).unwrap_or(0),
                used: bonus.get("currentUsage").and_then(Value::as_u64).unwrap_or(0),
                status: text_field(bonus, "status"),
                expires_at: timestamp_field(bonus, "expiresAt"),
            });
        }
    }

    resource
}

// ============================================================================
// Tests
// ============================================================================
