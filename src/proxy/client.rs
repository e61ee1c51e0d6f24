//! Client for the proxy engine's loopback admin API.

use std::time::Duration;

use crate::errors::{Error, Result};

use super::translate::RouteTable;

/// Talks to the engine's admin endpoint over plain HTTP on loopback.
#[derive(Debug, Clone)]
pub struct AdminClient {
    admin_addr: String,
    http: reqwest::Client,
}

impl AdminClient {
    pub fn new<S: Into<String>>(admin_addr: S) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { admin_addr: admin_addr.into(), http }
    }

    pub fn admin_addr(&self) -> &str {
        &self.admin_addr
    }

    /// Push a full configuration document via `POST /load`. The engine
    /// applies it atomically: on rejection the previous table keeps
    /// serving, and the response body explains the refusal.
    pub async fn load_routes(&self, table: &RouteTable) -> Result<()> {
        let url = format!("http://{}/load", self.admin_addr);
        let response = self
            .http
            .post(&url)
            .json(table)
            .send()
            .await
            .map_err(|e| Error::transport(format!("posting proxy config: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(format!(
                "proxy rejected config (HTTP {}): {}",
                status.as_u16(),
                body
            )));
        }
        Ok(())
    }

    /// Whether the admin API answers `GET /config/` yet.
    pub async fn ready(&self) -> bool {
        let url = format!("http://{}/config/", self.admin_addr);
        matches!(
            self.http.get(&url).send().await.map(|r| r.status()),
            Ok(status) if status.is_success()
        )
    }

    /// Ask the engine to shut down gracefully.
    pub async fn stop_engine(&self) -> Result<()> {
        let url = format!("http://{}/stop", self.admin_addr);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| Error::transport(format!("stopping proxy engine: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::transport(format!(
                "proxy stop returned HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;

    use super::*;
    use crate::certs::CaMaterial;
    use crate::config::Config;
    use crate::proxy::translate;

    async fn spawn_admin(status: StatusCode, body: &'static str) -> std::net::SocketAddr {
        let app = Router::new().route("/load", post(move || async move { (status, body) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn table() -> crate::proxy::RouteTable {
        let pki = CaMaterial {
            root_cert: "c".into(),
            root_key: "k".into(),
            intermediate_cert: "ic".into(),
            intermediate_key: "ik".into(),
        };
        translate(&Config::default(), &pki)
    }

    #[tokio::test]
    async fn test_load_routes_accepts_2xx() {
        let addr = spawn_admin(StatusCode::OK, "").await;
        let client = AdminClient::new(addr.to_string());
        client.load_routes(&table()).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_routes_surfaces_rejection_body() {
        let addr = spawn_admin(StatusCode::BAD_REQUEST, "unknown field").await;
        let client = AdminClient::new(addr.to_string());
        let err = client.load_routes(&table()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("HTTP 400"), "{}", message);
        assert!(message.contains("unknown field"), "{}", message);
    }

    #[tokio::test]
    async fn test_load_routes_fails_when_unreachable() {
        // Bind-then-drop: nothing listens on this port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = AdminClient::new(addr.to_string());
        assert!(client.load_routes(&table()).await.is_err());
        assert!(!client.ready().await);
    }
}
