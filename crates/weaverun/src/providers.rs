//! Provider endpoint patterns and the built-in provider table.

use regex::{Regex, RegexBuilder};

/// A named matcher for (path, host) pairs.
#[derive(Debug, Clone)]
pub struct ProviderPattern {
    pub name: String,
    path_patterns: Vec<PathPattern>,
    host_patterns: Vec<Regex>,
}

#[derive(Debug, Clone)]
enum PathPattern {
    Regex(Regex),
    Suffix(String),
}

impl ProviderPattern {
    /// Build a pattern set. Invalid regexes are skipped with a warning so a
    /// bad user-supplied pattern never disables the whole provider.
    pub fn new(name: &str, path_patterns: &[&str], host_patterns: &[&str], is_regex: bool) -> Self {
        let path_patterns = path_patterns
            .iter()
            .filter_map(|pattern| {
                if is_regex {
                    match Regex::new(pattern) {
                        Ok(re) => Some(PathPattern::Regex(re)),
                        Err(error) => {
                            tracing::warn!(provider = name, pattern, %error, "invalid path pattern");
                            None
                        }
                    }
                } else {
                    Some(PathPattern::Suffix(pattern.to_string()))
                }
            })
            .collect();

        let host_patterns = host_patterns
            .iter()
            .filter_map(|pattern| {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(re) => Some(re),
                    Err(error) => {
                        tracing::warn!(provider = name, pattern, %error, "invalid host pattern");
                        None
                    }
                }
            })
            .collect();

        Self {
            name: name.to_string(),
            path_patterns,
            host_patterns,
        }
    }

    /// Check whether `path` matches any of this provider's path patterns.
    pub fn matches_path(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        let normalized = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        self.path_patterns.iter().any(|pattern| match pattern {
            PathPattern::Regex(re) => re.is_match(&normalized),
            PathPattern::Suffix(suffix) => {
                normalized.ends_with(suffix.as_str())
                    || normalized
                        .split('?')
                        .next()
                        .is_some_and(|p| p.ends_with(suffix.as_str()))
            }
        })
    }

    /// Check whether `host` matches. An empty pattern list means unrestricted.
    pub fn matches_host(&self, host: &str) -> bool {
        if host.is_empty() || self.host_patterns.is_empty() {
            return true;
        }
        self.host_patterns.iter().any(|re| re.is_match(host))
    }
}

/// Built-in provider definitions, in match-priority order.
pub fn builtin_providers() -> Vec<ProviderPattern> {
    vec![
        ProviderPattern::new(
            "openai",
            &[
                // Chat & Completions
                r"/v1/chat/completions",
                r"/v1/completions",
                r"/v1/responses",
                r"/v1/embeddings",
                // Assistants API
                r"/v1/assistants",
                r"/v1/threads",
                r"/v1/threads/.+/messages",
                r"/v1/threads/.+/runs",
                // Audio
                r"/v1/audio/transcriptions",
                r"/v1/audio/translations",
                r"/v1/audio/speech",
                // Images
                r"/v1/images/generations",
                r"/v1/images/edits",
                r"/v1/images/variations",
                // Other
                r"/v1/moderations",
                r"/v1/files",
                r"/v1/batches",
                // Without /v1 prefix (some compatible APIs)
                r"/chat/completions$",
                r"/completions$",
                r"/embeddings$",
            ],
            &[
                r"api\.openai\.com",
                r"localhost",
                r"127\.0\.0\.1",
                // OpenAI-compatible endpoints can be anywhere
                r".*",
            ],
            true,
        ),
        ProviderPattern::new(
            "anthropic",
            &[r"/v1/messages", r"/v1/complete"],
            &[r"api\.anthropic\.com"],
            true,
        ),
        ProviderPattern::new(
            "gemini",
            &[
                r"/v1beta/models/.+:generateContent",
                r"/v1beta/models/.+:streamGenerateContent",
                r"/v1beta/models/.+:countTokens",
                r"/v1beta/models/.+:embedContent",
                r"/v1/models/.+:generateContent",
                r"/v1/models/.+:streamGenerateContent",
                // Vertex AI
                r"/v1/projects/.+/locations/.+/publishers/.+/models/.+:predict",
                r"/v1/projects/.+/locations/.+/publishers/.+/models/.+:streamPredict",
                r"/v1/projects/.+/locations/.+/publishers/.+/models/.+:generateContent",
            ],
            &[
                r"generativelanguage\.googleapis\.com",
                r".*-aiplatform\.googleapis\.com",
            ],
            true,
        ),
        ProviderPattern::new(
            "bedrock",
            &[
                r"/model/.+/invoke",
                r"/model/.+/invoke-with-response-stream",
                r"/model/.+/converse",
                r"/model/.+/converse-stream",
            ],
            &[
                r"bedrock-runtime\..*\.amazonaws\.com",
                r"bedrock\..*\.amazonaws\.com",
            ],
            true,
        ),
        ProviderPattern::new(
            "azure_openai",
            &[
                r"/openai/deployments/.+/chat/completions",
                r"/openai/deployments/.+/completions",
                r"/openai/deployments/.+/embeddings",
                r"/openai/deployments/.+/images/generations",
                r"/openai/deployments/.+/audio/transcriptions",
                r"/openai/deployments/.+/audio/translations",
            ],
            &[r".*\.openai\.azure\.com", r".*\.azure-api\.net"],
            true,
        ),
        ProviderPattern::new(
            "wandb_inference",
            &[
                r"/v1/chat/completions",
                r"/v1/completions",
                r"/v1/embeddings",
            ],
            &[r".*\.wandb\.ai", r"api\.wandb\.ai"],
            true,
        ),
        ProviderPattern::new(
            "cohere",
            &[
                r"/v1/chat",
                r"/v1/generate",
                r"/v1/embed",
                r"/v1/rerank",
                r"/v1/summarize",
            ],
            &[r"api\.cohere\.ai", r"api\.cohere\.com"],
            true,
        ),
        ProviderPattern::new(
            "mistral",
            &[
                r"/v1/chat/completions",
                r"/v1/embeddings",
                r"/v1/fim/completions",
            ],
            &[r"api\.mistral\.ai"],
            true,
        ),
        ProviderPattern::new(
            "groq",
            &[r"/openai/v1/chat/completions", r"/v1/chat/completions"],
            &[r"api\.groq\.com"],
            true,
        ),
        ProviderPattern::new(
            "together",
            &[
                r"/v1/chat/completions",
                r"/v1/completions",
                r"/v1/embeddings",
                r"/inference",
            ],
            &[r"api\.together\.xyz", r".*\.together\.ai"],
            true,
        ),
        ProviderPattern::new(
            "replicate",
            &[r"/v1/predictions", r"/v1/models/.+/predictions"],
            &[r"api\.replicate\.com"],
            true,
        ),
        ProviderPattern::new(
            "fireworks",
            &[
                r"/inference/v1/chat/completions",
                r"/inference/v1/completions",
                r"/inference/v1/embeddings",
            ],
            &[r"api\.fireworks\.ai"],
            true,
        ),
        ProviderPattern::new(
            "perplexity",
            &[r"/chat/completions"],
            &[r"api\.perplexity\.ai"],
            true,
        ),
        ProviderPattern::new(
            "ollama",
            &[
                r"/api/generate",
                r"/api/chat",
                r"/api/embeddings",
                // OpenAI compatible endpoint
                r"/v1/chat/completions",
            ],
            &[r"localhost", r"127\.0\.0\.1", r".*:11434"],
            true,
        ),
        ProviderPattern::new(
            "google_adk",
            &[r"/run$", r"/run_sse$", r"/api/run$", r"/api/run_sse$"],
            &[r"localhost", r"127\.0\.0\.1"],
            true,
        ),
    ]
}
