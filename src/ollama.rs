use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::stream::{FragmentSink, StreamDecoder};

/// One chat turn, built fresh per send. `images` holds base64-encoded
/// file contents and is left off the wire entirely when empty.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: String,
    pub images: Vec<String>,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<&'a [String]>,
}

#[derive(Serialize)]
struct DeleteBody<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Send a prompt and stream the response into `sink`, one fragment per
    /// decoded record. Returns once the server closes the stream.
    pub async fn chat<S: FragmentSink>(&self, request: &ChatRequest, sink: &mut S) -> Result<()> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            stream: true,
            images: if request.images.is_empty() {
                None
            } else {
                Some(&request.images)
            },
        };

        debug!(model = %request.model, images = request.images.len(), "sending chat request");

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "requisição ao Ollama falhou com status {}. O servidor está rodando? (ollama serve)",
                response.status()
            ));
        }

        let mut decoder = StreamDecoder::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            decoder.feed(&chunk?, sink);
        }
        decoder.finish(sink);
        Ok(())
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("falha ao listar modelos: {}", response.status()));
        }

        let models_response: OllamaModelsResponse = response.json().await?;
        Ok(models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect())
    }

    /// Fire-and-forget delete; the response body is not consumed.
    pub async fn delete_model(&self, name: &str) -> Result<()> {
        let url = format!("{}/api/delete", self.base_url);

        let response = self
            .client
            .delete(&url)
            .json(&DeleteBody { name })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("falha ao deletar modelo: {}", response.status()));
        }

        info!(model = name, "model deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct CollectSink {
        text: String,
    }

    impl FragmentSink for CollectSink {
        fn replace(&mut self, text: &str) {
            self.text = text.to_string();
        }

        fn append(&mut self, text: &str) {
            self.text.push_str(text);
        }
    }

    #[tokio::test]
    async fn list_models_returns_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llama3.2:latest"}, {"name": "gemma3:latest"}]
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri());
        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3.2:latest", "gemma3:latest"]);
    }

    #[tokio::test]
    async fn list_models_empty_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri());
        assert!(client.list_models().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_streams_fragments_into_sink() {
        let server = MockServer::start().await;
        let ndjson = concat!(
            "{\"response\":\"Hel\"}\n",
            "{\"response\":\"lo\"}\n",
            "{\"response\":\"\",\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri());
        let request = ChatRequest {
            model: "llama3.2:latest".into(),
            prompt: "oi".into(),
            images: Vec::new(),
        };
        let mut sink = CollectSink::default();
        client.chat(&request, &mut sink).await.unwrap();
        assert_eq!(sink.text, "Hello");
    }

    #[tokio::test]
    async fn chat_non_2xx_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri());
        let request = ChatRequest {
            model: "x".into(),
            prompt: "y".into(),
            images: Vec::new(),
        };
        let mut sink = CollectSink::default();
        let err = client.chat(&request, &mut sink).await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert!(sink.text.is_empty());
    }

    #[tokio::test]
    async fn delete_model_sends_name() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/delete"))
            .and(body_json(serde_json::json!({"name": "gemma3:latest"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri());
        client.delete_model("gemma3:latest").await.unwrap();
    }
}
