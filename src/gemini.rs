// SPDX-License-Identifier: GPL-3.0

//! Gemini API client for content generation.
//!
//! Holds the serde types for the generativelanguage wire format (shared with
//! the streaming search module) and the non-streaming operations: page
//! summarization and page-grounded Q&A.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Production API host; tests substitute a local listener.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Prompt wrapped around page text for summarization.
const SUMMARY_PROMPT: &str = "\
Please read the following text and provide a concise summary.

Here are the requirements for the summary:
1. The summary must be concise.
2. The summary must be no more than 300 words.

[Text to Summarize]:
";

/// System prompt for page-grounded Q&A.
const CHAT_SYSTEM_PROMPT: &str = "\
You are a Knowledge Assistant designed to answer questions based on the text provided.

Here are the rules you must follow:
1. **Prioritize the Text:** Always attempt to answer questions solely using the \
information found within the text provided below.
2. **Handle Unrelated Questions with General Knowledge:** If a question cannot be \
answered using only the provided text, but you do possess relevant general knowledge \
about the topic: explicitly state that the information is not found within the \
provided text, then provide the answer based on your general knowledge.
3. **Handle Unanswerable Questions:** If a question cannot be answered from the \
provided text and you also do not have relevant general knowledge on the topic, \
simply state that you cannot answer the question.

[Provided Text]:
";

/// Canned model turn acknowledging the system prompt before the real question.
const CHAT_ACK: &str = "Understood. I will answer questions based on the provided text.";

/// A piece of content in a Gemini conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::text(text)],
            role: Some("user".to_string()),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::text(text)],
            role: Some("model".to_string()),
        }
    }
}

/// One part of a content entry. Non-text parts arrive with `text` absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }
}

/// Request payload for generateContent / streamGenerateContent.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

impl GenerateRequest {
    /// Plain generation request with no tools.
    pub fn new(contents: Vec<Content>) -> Self {
        Self {
            contents,
            tools: Vec::new(),
        }
    }

    /// Generation request with the grounded web-search tool enabled.
    pub fn grounded(contents: Vec<Content>) -> Self {
        Self {
            contents,
            tools: vec![Tool {
                google_search: GoogleSearch {},
            }],
        }
    }
}

/// A tool made available to the model.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    google_search: GoogleSearch,
}

/// Marker enabling the built-in web-search grounding capability.
#[derive(Debug, Clone, Serialize)]
pub struct GoogleSearch {}

/// One generation response, complete or incremental. Every level is optional:
/// a chunk missing a field has nothing to contribute there, which is not an
/// error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Text of the first part of the first candidate, if any.
    pub fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
}

/// Web-source citations the model attached to generated text.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroundingChunk {
    #[serde(default)]
    pub web: Option<WebSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSource {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

/// Gemini client for non-streaming generation requests.
pub struct Client {
    base_url: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl Client {
    /// Create a client against the production API host.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, GEMINI_API_BASE)
    }

    /// Create a client against a custom host (self-hosted proxy, tests).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Summarize page text.
    ///
    /// # Arguments
    /// * `content` - The extracted page text to summarize
    ///
    /// # Returns
    /// The generated summary, or an error message.
    pub async fn generate_summary(&self, content: &str) -> Result<String, String> {
        let prompt = format!("{}{}", SUMMARY_PROMPT, content);
        self.generate(GenerateRequest::new(vec![Content::user(prompt)]))
            .await
    }

    /// Answer a question about page text.
    ///
    /// The exchange seeds the conversation with a system prompt embedding the
    /// page text and a canned model acknowledgement, then asks the question.
    pub async fn chat(&self, content: &str, question: &str) -> Result<String, String> {
        let system_prompt = format!("{}{}", CHAT_SYSTEM_PROMPT, content);
        let contents = vec![
            Content::user(system_prompt),
            Content::model(CHAT_ACK),
            Content::user(question),
        ];
        self.generate(GenerateRequest::new(contents)).await
    }

    /// Send one generateContent request and extract the response text.
    async fn generate(&self, request: GenerateRequest) -> Result<String, String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url,
            self.model,
            urlencoding::encode(&self.api_key)
        );

        debug!(model = %self.model, "sending generateContent request");

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Connection error: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("Gemini error: {}", response.status()));
        }

        let generate_response: GenerateResponse = response
            .json()
            .await
            .map_err(|e| format!("Parse error: {}", e))?;

        generate_response
            .first_text()
            .ok_or_else(|| "Gemini returned no content".to_string())
    }
}
