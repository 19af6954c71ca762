/*!
Stub du service d'ingestion Harbor Scale pour tests sans réseau externe

Démarre un vrai serveur HTTP local (axum) qui enregistre toutes les requêtes reçues
et répond avec une séquence de statuts scriptée (200 par défaut).
Permet de tester l'agent de bout en bout : URL, en-têtes, corps JSON, gestion du 429.
*/

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use anyhow::Result;

/// Requête reçue par le stub
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub api_key: Option<String>,
    pub content_type: Option<String>,
    /// Corps parsé en JSON, `Value::Null` si le corps n'est pas du JSON
    pub body: Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Default)]
struct StubInner {
    requests: Vec<RecordedRequest>,
    scripted: VecDeque<u16>,
    default_status: u16,
}

type StubState = Arc<Mutex<StubInner>>;

/// Serveur d'ingestion local, arrêté au drop
pub struct IngestStub {
    addr: SocketAddr,
    inner: StubState,
    server: JoinHandle<()>,
}

impl IngestStub {
    /// Démarre le stub sur un port libre de 127.0.0.1
    pub async fn start() -> Result<Self> {
        let inner: StubState = Arc::new(Mutex::new(StubInner {
            default_status: 200,
            ..Default::default()
        }));

        let app = Router::new()
            .fallback(record_request)
            .with_state(inner.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ [STUB] ingest server stopped: {}", e);
            }
        });

        log::info!("🛰️ [STUB] ingest service listening on http://{}", addr);
        Ok(Self { addr, inner, server })
    }

    /// URL de base à utiliser comme `endpoint` d'une instance
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Ajoute des statuts à renvoyer, dans l'ordre, aux prochaines requêtes
    pub fn push_responses<I: IntoIterator<Item = u16>>(&self, statuses: I) {
        self.inner.lock().unwrap().scripted.extend(statuses);
    }

    /// Statut renvoyé quand la séquence scriptée est épuisée
    pub fn set_default_status(&self, status: u16) {
        self.inner.lock().unwrap().default_status = status;
    }

    /// Toutes les requêtes reçues (pour assertions de tests)
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Requêtes reçues sur un chemin donné
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.inner
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.inner.lock().unwrap().requests.len()
    }
}

impl Drop for IngestStub {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn record_request(
    State(inner): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let request = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        api_key: header("x-api-key"),
        content_type: header("content-type"),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        received_at: Utc::now(),
    };

    let mut inner = inner.lock().unwrap();
    let status = inner.scripted.pop_front().unwrap_or(inner.default_status);
    log::info!("📥 [STUB] {} {} -> {}", request.method, request.path, status);
    inner.requests.push(request);

    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_records_requests() {
        let stub = IngestStub::start().await.unwrap();
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/api/v2/ingest/42/gps", stub.base_url()))
            .header("X-API-Key", "secret")
            .json(&serde_json::json!({"lat": 1.0}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let requests = stub.requests_to("/api/v2/ingest/42/gps");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].api_key.as_deref(), Some("secret"));
        assert_eq!(requests[0].body["lat"], 1.0);
    }

    #[tokio::test]
    async fn test_scripted_statuses_then_default() {
        let stub = IngestStub::start().await.unwrap();
        stub.push_responses([429, 500]);
        let client = reqwest::Client::new();
        let url = format!("{}/batch", stub.base_url());

        let mut seen = Vec::new();
        for _ in 0..3 {
            let resp = client.post(&url).body("[]").send().await.unwrap();
            seen.push(resp.status().as_u16());
        }

        assert_eq!(seen, vec![429, 500, 200]);
        assert_eq!(stub.request_count(), 3);
        assert_eq!(stub.requests()[0].body, serde_json::json!([]));
    }
}
