use anyhow::Result;
use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use reconciler::memory::MemoryDataplane;
use serde_json::Value;
use tower::ServiceExt;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{config::AgentConfig, routes::create_routes, service::Service};

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Agent wired to an in-memory dataplane the test can inspect.
pub struct TestService {
    pub service: Service,
    pub dataplane: MemoryDataplane,
}

impl TestService {
    pub fn new() -> Result<Self> {
        Self::with_config(AgentConfig::default())
    }

    pub fn with_config(config: AgentConfig) -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        config.validate()?;
        let dataplane = MemoryDataplane::new();
        let service = Service::with_drivers(config, dataplane.drivers());
        Ok(Self { service, dataplane })
    }

    pub fn router(&self) -> Router {
        create_routes(self.service.route_state())
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Result<TestResponse> {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };
        let response = self.router().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await?.to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Ok(TestResponse {
            status,
            headers,
            body,
        })
    }
}
