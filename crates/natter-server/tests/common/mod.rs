#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use natter_core::{IdentityGate, Services};
use natter_db::Database;
use natter_gateway::Dispatcher;
use natter_server::app;

pub const PREFIX: &str = "/api/v1";

pub struct TestApp {
    pub router: Router,
    pub services: Services,
    pub dispatcher: Dispatcher,
}

pub struct TestUser {
    pub id: String,
    pub token: String,
}

pub fn test_app() -> TestApp {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let (services, dispatcher) = app::wire(db, IdentityGate::new("integration-secret"));
    let router = app::router(services.clone(), dispatcher.clone(), PREFIX);
    TestApp {
        router,
        services,
        dispatcher,
    }
}

impl TestApp {
    /// Sends one request through the router. The body is parsed as JSON when
    /// possible, otherwise returned as a string.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let uri = if path == "/health" || path.starts_with(PREFIX) {
            path.to_string()
        } else {
            format!("{}{}", PREFIX, path)
        };

        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::GET, path, Some(token), None).await
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, path, Some(token), Some(body)).await
    }

    /// Signs a user up and in. The username doubles as the email local part.
    pub async fn user(&self, username: &str) -> TestUser {
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/signup",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{}@example.com", username),
                    "password": "correct horse",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "signup failed: {}", body);

        let (status, body) = self
            .call(
                Method::POST,
                "/auth/signin",
                None,
                Some(json!({
                    "email": format!("{}@example.com", username),
                    "password": "correct horse",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "signin failed: {}", body);

        TestUser {
            id: body["id"].as_str().unwrap().to_string(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    /// Direct chat between `a` and `b`, returns its id.
    pub async fn direct_chat(&self, a: &TestUser, b: &TestUser) -> String {
        let (status, chat) = self
            .post("/chats", &a.token, json!({"type": "direct", "participantId": b.id}))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create chat failed: {}", chat);
        chat["id"].as_str().unwrap().to_string()
    }
}
