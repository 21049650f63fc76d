//! OAuth and ImageServer session token acquisition.
//!
//! The management server hands out two distinct tokens:
//! - an OAuth bearer (JWT) for REST and SOAP calls, from the IDP
//! - an opaque ImageServer session token from SOAP `Login`, required in the
//!   `connectparam` of the TCP `connect` call
//!
//! An ImageServer token is never requested without a live OAuth token, and
//! refreshing the OAuth token does not by itself refresh the session token.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{MilestoneError, MilestoneResult};

/// Refresh the OAuth token when less than this much lifetime remains.
const OAUTH_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Session token lifetime assumed when the Login response carries no
/// `<TimeToLive>` element.
const DEFAULT_SOAP_TTL: Duration = Duration::from_secs(240);

const SOAP_ACTION_LOGIN: &str =
    "http://videoos.net/2/XProtectCSServerCommand/IServerCommandService/Login";

#[derive(Debug, Deserialize)]
struct OauthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_live(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }
}

#[derive(Default)]
struct AuthState {
    oauth: Option<CachedToken>,
    imageserver: Option<CachedToken>,
    soap_ttl: Option<Duration>,
}

/// Broker for the two-token Milestone handshake.
///
/// Shared process-wide; mutations are serialized behind one async lock, so
/// whichever worker first observes an imminent expiry performs the refresh
/// while the rest block briefly and re-read.
pub struct AuthBroker {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    /// Fresh per process lifetime, sent as the SOAP `instanceId`
    instance_id: String,
    state: Mutex<AuthState>,
}

impl AuthBroker {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            instance_id: Uuid::new_v4().to_string(),
            state: Mutex::new(AuthState::default()),
        }
    }

    /// Current OAuth bearer, acquiring or refreshing as needed.
    pub async fn oauth_token(&self) -> MilestoneResult<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = &state.oauth {
            if token.is_live(OAUTH_REFRESH_MARGIN) {
                return Ok(token.value.clone());
            }
        }

        let token = self.fetch_oauth_token().await?;
        let value = token.value.clone();
        state.oauth = Some(token);
        Ok(value)
    }

    /// Current ImageServer session token, acquiring via SOAP Login as needed.
    pub async fn imageserver_token(&self) -> MilestoneResult<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = &state.imageserver {
            if token.is_live(Duration::ZERO) {
                return Ok(token.value.clone());
            }
        }
        self.login_locked(&mut state).await
    }

    /// Force a fresh SOAP Login, e.g. for a `connectupdate` mid-export.
    pub async fn renew_imageserver_token(&self) -> MilestoneResult<String> {
        let mut state = self.state.lock().await;
        self.login_locked(&mut state).await
    }

    /// Session token lifetime reported by the last SOAP Login.
    pub async fn soap_ttl(&self) -> Duration {
        self.state
            .lock()
            .await
            .soap_ttl
            .unwrap_or(DEFAULT_SOAP_TTL)
    }

    /// Drop all cached tokens. Callers retry once after a 401.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.oauth = None;
        state.imageserver = None;
    }

    async fn login_locked(&self, state: &mut AuthState) -> MilestoneResult<String> {
        // The session token rides on a live OAuth bearer. A bearer that
        // passed the liveness check can still be rejected by the time the
        // SOAP POST lands; retry once with freshly fetched tokens.
        for attempt in 0..2 {
            let oauth = match &state.oauth {
                Some(token) if token.is_live(OAUTH_REFRESH_MARGIN) => token.value.clone(),
                _ => {
                    let token = self.fetch_oauth_token().await?;
                    let value = token.value.clone();
                    state.oauth = Some(token);
                    value
                }
            };

            match self.soap_login(&oauth).await {
                Ok((token, ttl)) => {
                    state.soap_ttl = Some(ttl);
                    state.imageserver = Some(CachedToken {
                        value: token.clone(),
                        expires_at: Instant::now() + ttl,
                    });
                    return Ok(token);
                }
                Err(MilestoneError::TokenExpired) if attempt == 0 => {
                    debug!("Bearer rejected by SOAP Login, refreshing OAuth token");
                    state.oauth = None;
                }
                Err(e) => return Err(e),
            }
        }
        Err(MilestoneError::TokenExpired)
    }

    async fn fetch_oauth_token(&self) -> MilestoneResult<CachedToken> {
        let url = format!("{}/API/IDP/connect/token", self.base_url);
        debug!(url = %url, username = %self.username, "Requesting OAuth token");

        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
                ("client_id", "GrantValidatorClient"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(MilestoneError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(MilestoneError::unexpected(format!(
                "OAuth endpoint returned {}",
                status
            )));
        }

        let body: OauthTokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(body.expires_in.max(60));
        Ok(CachedToken {
            value: body.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }

    async fn soap_login(&self, oauth: &str) -> MilestoneResult<(String, Duration)> {
        let url = format!(
            "{}/ManagementServer/ServerCommandServiceOAuth.svc",
            self.base_url
        );
        let envelope = login_envelope(&self.instance_id);

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", SOAP_ACTION_LOGIN)
            .bearer_auth(oauth)
            .body(envelope)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Distinguished so the caller can refresh the bearer and retry
            return Err(MilestoneError::TokenExpired);
        }
        if !status.is_success() {
            return Err(MilestoneError::soap_login_failed(format!(
                "status {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let token = extract_token(&text).ok_or_else(|| {
            MilestoneError::soap_login_failed("Login response carried no <Token> element")
        })?;

        let ttl = extract_ttl(&text).unwrap_or_else(|| {
            warn!("Login response carried no <TimeToLive>, assuming {:?}", DEFAULT_SOAP_TTL);
            DEFAULT_SOAP_TTL
        });

        debug!(ttl_secs = ttl.as_secs(), "SOAP Login succeeded");
        Ok((token, ttl))
    }
}

/// Build the SOAP Login envelope with a fresh instance id and no current
/// token (full login rather than renewal).
fn login_envelope(instance_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"
               xmlns:xsc="http://videoos.net/2/XProtectCSServerCommand">
  <soap:Body>
    <xsc:Login>
      <xsc:instanceId>{instance_id}</xsc:instanceId>
      <xsc:currentToken></xsc:currentToken>
    </xsc:Login>
  </soap:Body>
</soap:Envelope>"#
    )
}

/// Extract the session token, tolerant of namespace prefixes.
fn extract_token(body: &str) -> Option<String> {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    let re = TOKEN_RE
        .get_or_init(|| Regex::new(r"<(?:\w+:)?Token>([^<]+)</(?:\w+:)?Token>").expect("token regex"));
    re.captures(body).map(|c| c[1].to_string())
}

/// Extract the token lifetime from `<TimeToLive><MicroSeconds>`.
fn extract_ttl(body: &str) -> Option<Duration> {
    static TTL_RE: OnceLock<Regex> = OnceLock::new();
    let re = TTL_RE.get_or_init(|| {
        Regex::new(r"<(?:\w+:)?MicroSeconds>(\d+)</(?:\w+:)?MicroSeconds>").expect("ttl regex")
    });
    let micros: u64 = re.captures(body)?.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_micros(micros))
}
