//! Mock Milestone management server.
//!
//! Serves just enough of the OAuth, SOAP Login, and configuration REST
//! surface for the exporter to resolve a recorder and acquire its two
//! tokens. The recorder it advertises points at a mock ImageServer.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
struct MockState {
    imageserver: SocketAddr,
    soap_ttl_micros: u64,
    logins: Arc<AtomicU64>,
}

/// Running mock handle.
pub struct MockMilestone {
    pub base_url: String,
    logins: Arc<AtomicU64>,
}

impl MockMilestone {
    /// Spawn with the recorder pointing at `imageserver`.
    pub async fn spawn(imageserver: SocketAddr, soap_ttl_micros: u64) -> Self {
        let logins = Arc::new(AtomicU64::new(0));
        let state = MockState {
            imageserver,
            soap_ttl_micros,
            logins: Arc::clone(&logins),
        };

        let app = Router::new()
            .route("/API/IDP/connect/token", post(oauth_token))
            .route(
                "/ManagementServer/ServerCommandServiceOAuth.svc",
                post(soap_login),
            )
            .route("/api/rest/v1/cameras", get(cameras))
            .route("/api/rest/v1/recordingServers", get(recording_servers))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            logins,
        }
    }

    /// Number of SOAP Logins served so far.
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::SeqCst)
    }
}

async fn oauth_token() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "access_token": "test-oauth-token",
        "token_type": "Bearer",
        "expires_in": 3600
    }))
}

async fn soap_login(State(state): State<MockState>) -> ([(&'static str, &'static str); 1], String) {
    let count = state.logins.fetch_add(1, Ordering::SeqCst);
    let body = format!(
        r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <LoginResponse xmlns="http://videoos.net/2/XProtectCSServerCommand">
      <LoginResult xmlns:a="http://schemas.datacontract.org/2004/07/VideoOS">
        <a:TimeToLive><a:MicroSeconds>{}</a:MicroSeconds></a:TimeToLive>
        <a:Token>TOKEN#mock-{count}#recorder//ServerConnector#</a:Token>
      </LoginResult>
    </LoginResponse>
  </s:Body>
</s:Envelope>"#,
        state.soap_ttl_micros
    );
    ([("content-type", "text/xml; charset=utf-8")], body)
}

async fn cameras() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "array": [
            {"id": "cam-1", "name": "Mock Camera", "displayName": "Mock Camera", "enabled": true}
        ]
    }))
}

async fn recording_servers(State(state): State<MockState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "array": [
            {
                "id": "rs-1",
                "hostName": state.imageserver.ip().to_string(),
                "portNumber": state.imageserver.port(),
                "relations": {
                    "children": [
                        {"type": "cameras", "id": "cam-1"}
                    ]
                }
            }
        ]
    }))
}
