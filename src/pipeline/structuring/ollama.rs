use std::io::{BufRead, BufReader};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::ollama_types::{
    validate_base_url, ChatChunk, ChatMessage, ChatRequest, CompletionConfig, CompletionEndpoint,
    GenerateRequest, GenerateResponse, GenerationOptions, TagsResponse,
};
use super::types::LlmClient;
use super::StructuringError;

/// Ollama HTTP client, configured once at construction.
pub struct OllamaClient {
    base_url: String,
    model: String,
    endpoint: CompletionEndpoint,
    options: GenerationOptions,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(config: &CompletionConfig) -> Result<Self, StructuringError> {
        validate_base_url(&config.base_url).map_err(StructuringError::HttpClient)?;
        let timeout_secs = config.effective_timeout_secs();

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StructuringError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            endpoint: config.endpoint,
            options: config.options.clone(),
            client,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn send_error(&self, e: reqwest::Error) -> StructuringError {
        if e.is_timeout() {
            StructuringError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            StructuringError::OllamaConnection(self.base_url.clone())
        } else {
            StructuringError::HttpClient(e.to_string())
        }
    }

    fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::blocking::Response, StructuringError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| self.send_error(e))?;
        ensure_success(response)
    }

    fn generate_single(&self, prompt: &str) -> Result<String, StructuringError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: &self.options,
        };
        let parsed: GenerateResponse = self
            .post_json("/api/generate", &body)?
            .json()
            .map_err(|e| {
                if e.is_timeout() {
                    StructuringError::Timeout(self.timeout_secs)
                } else {
                    StructuringError::ResponseParsing(e.to_string())
                }
            })?;
        Ok(parsed.response)
    }

    fn chat_stream(&self, prompt: &str) -> Result<String, StructuringError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: true,
            options: &self.options,
        };
        let response = self.post_json("/api/chat", &body)?;
        collect_chat_stream(BufReader::new(response))
    }
}

impl LlmClient for OllamaClient {
    fn generate(&self, prompt: &str) -> Result<String, StructuringError> {
        let start = Instant::now();
        let result = match self.endpoint {
            CompletionEndpoint::Generate => self.generate_single(prompt),
            CompletionEndpoint::ChatStream => self.chat_stream(prompt),
        };

        match &result {
            Ok(text) => tracing::debug!(
                model = %self.model,
                endpoint = ?self.endpoint,
                response_chars = text.chars().count(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Completion received"
            ),
            Err(e) => tracing::debug!(
                model = %self.model,
                error = %e,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Completion failed"
            ),
        }
        result
    }

    fn is_model_available(&self, model: &str) -> Result<bool, StructuringError> {
        Ok(has_model(&self.list_models()?, model))
    }

    fn list_models(&self) -> Result<Vec<String>, StructuringError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.send_error(e))?;

        let parsed: TagsResponse = ensure_success(response)?
            .json()
            .map_err(|e| StructuringError::ResponseParsing(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

/// Non-2xx responses become `OllamaError` carrying the body text.
fn ensure_success(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, StructuringError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(StructuringError::OllamaError {
        status: status.as_u16(),
        body,
    })
}

/// Concatenate `message.content` of each NDJSON chunk until one reports `done`.
pub fn collect_chat_stream<R: BufRead>(reader: R) -> Result<String, StructuringError> {
    let mut content = String::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: ChatChunk = serde_json::from_str(&line)
            .map_err(|e| StructuringError::ResponseParsing(format!("bad stream chunk: {e}")))?;
        if let Some(message) = chunk.message {
            content.push_str(&message.content);
        }
        if chunk.done {
            return Ok(content);
        }
    }

    Err(StructuringError::StreamIncomplete)
}

/// True when `model` is installed, either by exact name or as any tag of a
/// bare name (`llama3.2` matches `llama3.2:3b`).
pub fn has_model(installed: &[String], model: &str) -> bool {
    installed
        .iter()
        .any(|m| m == model || m.strip_prefix(model).is_some_and(|rest| rest.starts_with(':')))
}

/// Mock LLM client for testing: returns a configured response, remembers the last prompt.
pub struct MockLlmClient {
    response: String,
    available_models: Vec<String>,
    last_prompt: Mutex<Option<String>>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            available_models: vec!["llama3.2:3b".to_string()],
            last_prompt: Mutex::new(None),
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.available_models = models;
        self
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().ok().and_then(|p| p.clone())
    }
}

impl LlmClient for MockLlmClient {
    fn generate(&self, prompt: &str) -> Result<String, StructuringError> {
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = Some(prompt.to_string());
        }
        Ok(self.response.clone())
    }

    fn is_model_available(&self, model: &str) -> Result<bool, StructuringError> {
        Ok(has_model(&self.available_models, model))
    }

    fn list_models(&self) -> Result<Vec<String>, StructuringError> {
        Ok(self.available_models.clone())
    }
}

/// Client whose every call fails as if the service were down.
pub struct FailingLlmClient;

impl LlmClient for FailingLlmClient {
    fn generate(&self, _prompt: &str) -> Result<String, StructuringError> {
        Err(StructuringError::OllamaConnection("unreachable".into()))
    }

    fn is_model_available(&self, _model: &str) -> Result<bool, StructuringError> {
        Err(StructuringError::OllamaConnection("unreachable".into()))
    }

    fn list_models(&self) -> Result<Vec<String>, StructuringError> {
        Err(StructuringError::OllamaConnection("unreachable".into()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    use super::*;

    /// Serve one canned HTTP response; the join handle yields the raw request.
    fn serve_once(status: &str, content_type: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            request
        });
        (url, handle)
    }

    fn read_request(stream: &mut std::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn config(url: &str, endpoint: CompletionEndpoint) -> CompletionConfig {
        CompletionConfig {
            base_url: url.to_string(),
            endpoint,
            timeout_secs: 5,
            ..CompletionConfig::default()
        }
    }

    #[test]
    fn generate_returns_response_field() {
        let (url, handle) = serve_once(
            "200 OK",
            "application/json",
            r#"{"model":"llama3.2:3b","response":"{\"policy_number\":\"AP-1\"}","done":true}"#,
        );
        let client = OllamaClient::new(&config(&url, CompletionEndpoint::Generate)).unwrap();
        let text = client.generate("extract this").unwrap();
        assert_eq!(text, r#"{"policy_number":"AP-1"}"#);

        let request = handle.join().unwrap();
        assert!(request.starts_with("POST /api/generate"));
        assert!(request.contains(r#""stream":false"#));
        assert!(request.contains(r#""temperature":0.0"#));
        assert!(request.contains(r#""num_predict":800"#));
        assert!(request.contains("extract this"));
    }

    #[test]
    fn chat_stream_concatenates_until_done() {
        let body = concat!(
            r#"{"message":{"role":"assistant","content":"{\"policy"},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":"_number\":\"AP-2\"}"},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":""},"done":true}"#,
            "\n",
        );
        let (url, handle) = serve_once("200 OK", "application/x-ndjson", body);
        let client = OllamaClient::new(&config(&url, CompletionEndpoint::ChatStream)).unwrap();
        let text = client.generate("prompt").unwrap();
        assert_eq!(text, r#"{"policy_number":"AP-2"}"#);

        let request = handle.join().unwrap();
        assert!(request.starts_with("POST /api/chat"));
        assert!(request.contains(r#""stream":true"#));
        assert!(request.contains(r#""role":"user""#));
    }

    #[test]
    fn non_success_status_is_error() {
        let (url, handle) = serve_once("404 Not Found", "application/json", r#"{"error":"model not found"}"#);
        let client = OllamaClient::new(&config(&url, CompletionEndpoint::Generate)).unwrap();
        let err = client.generate("p").unwrap_err();
        match err {
            StructuringError::OllamaError { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("model not found"));
            }
            other => panic!("expected OllamaError, got {other:?}"),
        }
        handle.join().unwrap();
    }

    #[test]
    fn refused_connection_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = OllamaClient::new(&config(&url, CompletionEndpoint::Generate)).unwrap();
        let err = client.generate("p").unwrap_err();
        assert!(matches!(err, StructuringError::OllamaConnection(_)));
    }

    #[test]
    fn slow_service_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = read_request(&mut stream);
            std::thread::sleep(Duration::from_secs(3));
        });

        let mut cfg = config(&url, CompletionEndpoint::Generate);
        cfg.timeout_secs = 1;
        let client = OllamaClient::new(&cfg).unwrap();
        let err = client.generate("p").unwrap_err();
        assert!(matches!(err, StructuringError::Timeout(1)));
        handle.join().unwrap();
    }

    #[test]
    fn list_models_reads_tags() {
        let (url, handle) = serve_once(
            "200 OK",
            "application/json",
            r#"{"models":[{"name":"llama3.2:3b"},{"name":"mistral:7b"}]}"#,
        );
        let client = OllamaClient::new(&config(&url, CompletionEndpoint::Generate)).unwrap();
        assert!(client.is_model_available("llama3.2").unwrap());
        let request = handle.join().unwrap();
        assert!(request.starts_with("GET /api/tags"));
    }

    #[test]
    fn stream_without_done_is_incomplete() {
        let body = "{\"message\":{\"content\":\"{\"},\"done\":false}\n";
        let err = collect_chat_stream(body.as_bytes()).unwrap_err();
        assert!(matches!(err, StructuringError::StreamIncomplete));
    }

    #[test]
    fn stream_with_garbage_line_is_parse_error() {
        let err = collect_chat_stream("not json\n".as_bytes()).unwrap_err();
        assert!(matches!(err, StructuringError::ResponseParsing(_)));
    }

    #[test]
    fn invalid_base_url_rejected() {
        let cfg = CompletionConfig {
            base_url: "ftp://example.com".into(),
            ..CompletionConfig::default()
        };
        assert!(OllamaClient::new(&cfg).is_err());
    }

    #[test]
    fn constructor_trims_trailing_slash() {
        let cfg = CompletionConfig {
            base_url: "http://localhost:11434/".into(),
            ..CompletionConfig::default()
        };
        let client = OllamaClient::new(&cfg).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.model(), "llama3.2:3b");
    }

    #[test]
    fn mock_client_records_prompt() {
        let client = MockLlmClient::new("{}");
        assert_eq!(client.generate("hello").unwrap(), "{}");
        assert_eq!(client.last_prompt().as_deref(), Some("hello"));
    }

    #[test]
    fn mock_client_model_lookup() {
        let client = MockLlmClient::new("").with_models(vec!["mistral:7b".into()]);
        assert!(client.is_model_available("mistral").unwrap());
        assert!(client.is_model_available("mistral:7b").unwrap());
        assert!(!client.is_model_available("mist").unwrap());
        assert!(!client.is_model_available("llama3.2").unwrap());
    }

    #[test]
    fn model_match_requires_exact_name_or_tag() {
        let installed = vec!["llama3.2:3b".to_string(), "phi3".to_string()];
        assert!(has_model(&installed, "llama3.2"));
        assert!(has_model(&installed, "llama3.2:3b"));
        assert!(has_model(&installed, "phi3"));
        assert!(!has_model(&installed, "llama3"));
        assert!(!has_model(&installed, "llama3.2:1b"));
        assert!(!has_model(&installed, "phi"));
        assert!(!has_model(&[], "phi3"));
    }

    #[test]
    fn failing_client_always_errors() {
        assert!(FailingLlmClient.generate("p").is_err());
        assert!(FailingLlmClient.list_models().is_err());
    }
}
