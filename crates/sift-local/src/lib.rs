//! reqwest-backed collaborators for `sift-core`: search engines, an https scraper, and chat /
//! embedding clients for Ollama and OpenAI-compatible servers.
//!
//! Configuration is env-driven. Empty or whitespace-only variables count as unset.

use serde::Serialize;
use sift_core::{ChatModel, Embedder, Error, Result, Scraper, SearchProvider};
use std::sync::Arc;
use std::time::Duration;

pub mod ollama;
pub mod openai_compat;
pub mod scrape;
pub mod search;

pub use ollama::OllamaClient;
pub use openai_compat::OpenAiCompatClient;
pub use scrape::HttpsScraper;
pub use search::{DuckDuckGoSearch, SearxngSearch};

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_SUMMARY_MODEL: &str = "qwen2.5:3b-instruct";
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_CONTEXT_WINDOW: usize = 8192;
pub const DEFAULT_EMBED_CONTEXT_WINDOW: usize = 2048;
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env(key).and_then(|s| s.parse::<T>().ok())
}

/// Comma/whitespace separated list, deduplicated, order kept.
pub(crate) fn env_list(key: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(v) = env(key) {
        for raw in v.split(|c: char| c == ',' || c.is_whitespace()) {
            let s = raw.trim();
            if !s.is_empty() && !out.iter().any(|o| o == s) {
                out.push(s.to_string());
            }
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmBackend {
    Ollama,
    OpenaiCompat,
}

impl LlmBackend {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai_compat" | "openai-compat" | "openai" => Ok(Self::OpenaiCompat),
            other => Err(Error::NotConfigured(format!(
                "unknown SIFT_LLM_BACKEND: {other} (expected ollama|openai_compat)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchBackend {
    Duckduckgo,
    Searxng,
}

impl SearchBackend {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duckduckgo" | "ddg" => Ok(Self::Duckduckgo),
            "searxng" => Ok(Self::Searxng),
            other => Err(Error::NotConfigured(format!(
                "unknown SIFT_SEARCH_PROVIDER: {other} (expected duckduckgo|searxng)"
            ))),
        }
    }
}

/// Everything the binary needs to assemble a researcher.
#[derive(Debug, Clone, Serialize)]
pub struct LocalConfig {
    pub llm_backend: LlmBackend,
    pub ollama_base_url: String,
    pub openai_compat_base_url: Option<String>,
    #[serde(skip)]
    pub openai_compat_api_key: Option<String>,
    /// One summary worker per endpoint.
    pub summary_endpoints: Vec<String>,
    pub summary_model: String,
    pub embed_model: String,
    pub context_window: usize,
    pub embed_context_window: usize,
    pub search_provider: SearchBackend,
    pub searxng_endpoints: Vec<String>,
    pub timeout_ms: u64,
}

impl LocalConfig {
    pub fn from_env() -> Result<Self> {
        let llm_backend = match env("SIFT_LLM_BACKEND") {
            Some(s) => LlmBackend::parse(&s)?,
            None => LlmBackend::Ollama,
        };
        let search_provider = match env("SIFT_SEARCH_PROVIDER") {
            Some(s) => SearchBackend::parse(&s)?,
            None => SearchBackend::Duckduckgo,
        };
        let ollama_base_url =
            env("SIFT_OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string());
        let openai_compat_base_url = env("SIFT_OPENAI_COMPAT_BASE_URL");

        let mut summary_endpoints = env_list("SIFT_SUMMARY_ENDPOINTS");
        if summary_endpoints.is_empty() {
            let primary = match llm_backend {
                LlmBackend::Ollama => Some(ollama_base_url.clone()),
                LlmBackend::OpenaiCompat => openai_compat_base_url.clone(),
            };
            summary_endpoints.extend(primary);
        }

        let mut searxng_endpoints = env_list("SIFT_SEARXNG_ENDPOINTS");
        if let Some(single) = env("SIFT_SEARXNG_ENDPOINT") {
            if !searxng_endpoints.contains(&single) {
                searxng_endpoints.push(single);
            }
        }

        Ok(Self {
            llm_backend,
            ollama_base_url,
            openai_compat_base_url,
            openai_compat_api_key: env("SIFT_OPENAI_COMPAT_API_KEY"),
            summary_endpoints,
            summary_model: env("SIFT_SUMMARY_MODEL")
                .unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string()),
            embed_model: env("SIFT_EMBED_MODEL").unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string()),
            context_window: env_parse("SIFT_CONTEXT_WINDOW").unwrap_or(DEFAULT_CONTEXT_WINDOW),
            embed_context_window: env_parse("SIFT_EMBED_CONTEXT_WINDOW")
                .unwrap_or(DEFAULT_EMBED_CONTEXT_WINDOW),
            search_provider,
            searxng_endpoints,
            timeout_ms: env_parse("SIFT_TIMEOUT_MS").unwrap_or(DEFAULT_TIMEOUT_MS),
        })
    }

    /// Doctor report: the config plus which secrets are present, never their values.
    pub fn report(&self) -> serde_json::Value {
        let mut v = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = v.as_object_mut() {
            obj.insert(
                "openai_compat_api_key_present".to_string(),
                serde_json::Value::Bool(self.openai_compat_api_key.is_some()),
            );
        }
        v
    }
}

/// Shared client with connect/overall timeouts so no call can hang forever.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("sift/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .map_err(|e| Error::NotConfigured(format!("http client: {e}")))
}

/// Concrete collaborators assembled from a [`LocalConfig`].
pub struct Backends {
    pub search: Arc<dyn SearchProvider>,
    pub scraper: Arc<dyn Scraper>,
    pub embedder: Arc<dyn Embedder>,
    pub summary_agents: Vec<Arc<dyn ChatModel>>,
}

impl Backends {
    pub fn from_config(cfg: &LocalConfig) -> Result<Self> {
        let client = http_client(Duration::from_millis(cfg.timeout_ms))?;

        let search: Arc<dyn SearchProvider> = match cfg.search_provider {
            SearchBackend::Duckduckgo => Arc::new(DuckDuckGoSearch::new(client.clone())),
            SearchBackend::Searxng => Arc::new(SearxngSearch::new(
                client.clone(),
                cfg.searxng_endpoints.clone(),
            )?),
        };
        let scraper: Arc<dyn Scraper> = Arc::new(HttpsScraper::new()?);

        if cfg.summary_endpoints.is_empty() {
            return Err(Error::NotConfigured(
                "no summary endpoints (set SIFT_SUMMARY_ENDPOINTS or a base url)".to_string(),
            ));
        }
        let (embedder, summary_agents): (Arc<dyn Embedder>, Vec<Arc<dyn ChatModel>>) =
            match cfg.llm_backend {
                LlmBackend::Ollama => {
                    let embedder = OllamaClient::new(
                        client.clone(),
                        &cfg.ollama_base_url,
                        &cfg.embed_model,
                        cfg.embed_context_window,
                    );
                    let agents = cfg
                        .summary_endpoints
                        .iter()
                        .map(|url| {
                            Arc::new(OllamaClient::new(
                                client.clone(),
                                url,
                                &cfg.summary_model,
                                cfg.context_window,
                            )) as Arc<dyn ChatModel>
                        })
                        .collect();
                    (Arc::new(embedder), agents)
                }
                LlmBackend::OpenaiCompat => {
                    let base = cfg.openai_compat_base_url.as_deref().ok_or_else(|| {
                        Error::NotConfigured("missing SIFT_OPENAI_COMPAT_BASE_URL".to_string())
                    })?;
                    let key = cfg.openai_compat_api_key.clone();
                    let embedder = OpenAiCompatClient::new(
                        client.clone(),
                        base,
                        key.clone(),
                        &cfg.embed_model,
                        cfg.embed_context_window,
                    );
                    let agents = cfg
                        .summary_endpoints
                        .iter()
                        .map(|url| {
                            Arc::new(OpenAiCompatClient::new(
                                client.clone(),
                                url,
                                key.clone(),
                                &cfg.summary_model,
                                cfg.context_window,
                            )) as Arc<dyn ChatModel>
                        })
                        .collect();
                    (Arc::new(embedder), agents)
                }
            };

        Ok(Self {
            search,
            scraper,
            embedder,
            summary_agents,
        })
    }
}
