#![allow(dead_code)]

use chat_service::config::{BlurbMode, ChatConfig};
use chat_service::services::providers::mock::MockModelClient;
use chat_service::services::secrets::StaticSecrets;
use chat_service::services::storage::MemoryStorage;
use chat_service::startup::{AppState, Application};
use std::sync::Arc;
use std::time::Duration;

pub const EXAMPLE_SECRET_ID: &str = "example-secret";
pub const EXAMPLE_SECRET_VALUE: &str = "open sesame";

pub struct TestApp {
    pub address: String,
    pub model: Arc<MockModelClient>,
    pub storage: Arc<MemoryStorage>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn(mode: BlurbMode) -> Self {
        Self::spawn_with(MockModelClient::default(), MemoryStorage::new(), |config| {
            config.chat.blurb_mode = mode
        })
        .await
    }

    pub async fn spawn_with(
        model: MockModelClient,
        storage: MemoryStorage,
        configure: impl FnOnce(&mut ChatConfig),
    ) -> Self {
        let mut config = ChatConfig::default();
        config.common.port = 0; // Random port for testing
        config.secrets.example_secret_id = Some(EXAMPLE_SECRET_ID.to_string());
        configure(&mut config);

        let model = Arc::new(model);
        let storage = Arc::new(storage);
        let secrets =
            Arc::new(StaticSecrets::new().with_secret(EXAMPLE_SECRET_ID, EXAMPLE_SECRET_VALUE));

        let state = AppState::new(config, model.clone(), storage.clone(), secrets);
        let app = Application::build_with_state(state)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let address = format!("http://127.0.0.1:{}", port);
        for _ in 0..50 {
            if client
                .get(format!("{}/healthcheck", address))
                .send()
                .await
                .is_ok()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            model,
            storage,
            client,
        }
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .json(&body)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to send request")
    }
}

/// A single-turn conversation whose last message may carry attachments.
pub fn chat_body(content: &str, attachments: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "id": "chat-1",
        "selectedChatModel": "gemini-2.0-flash",
        "messages": [
            {"role": "user", "content": "earlier turn", "id": "m1"},
            {"role": "assistant", "content": "earlier reply", "id": "m2"},
            {
                "role": "user",
                "content": content,
                "id": "m3",
                "createdAt": "2025-03-01T10:00:00.000Z",
                "parts": [{"type": "text", "text": content}],
                "experimental_attachments": attachments
            }
        ]
    })
}
