use anyhow::{Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use quill_core::summary::{Summarizer, Summary, SummaryKind, SummaryRequest};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Configuration for the OpenAI summarizer.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub model: String,
    pub api_base: Option<String>,
}

impl OpenAiSettings {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "gpt-4o-mini".to_string(),
            api_base: None,
        }
    }
}

/// OpenAI-backed summarizer using chat completions with a JSON reply.
pub struct OpenAiSummarizer {
    client: Client<OpenAIConfig>,
    settings: OpenAiSettings,
}

impl OpenAiSummarizer {
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        let mut config = OpenAIConfig::new().with_api_key(&settings.api_key);
        if let Some(base) = &settings.api_base {
            config = config.with_api_base(base);
        }
        let client = Client::with_config(config);
        Ok(Self { client, settings })
    }

    fn system_prompt(&self) -> String {
        "You summarize private diary entries. Reply with JSON only: \
         {\"mood\": string, \"themes\": [string], \"recommendations\": [string]}. \
         Keep mood to one or two words, at most five themes and three recommendations."
            .to_string()
    }
}

fn user_prompt(request: &SummaryRequest) -> String {
    let period = match request.kind {
        SummaryKind::Daily => "day",
        SummaryKind::Weekly => "week",
    };
    let mut prompt = format!(
        "Summarize the {period} starting {}. Entries:\n",
        request.period_start
    );
    for (i, entry) in request.entries.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, entry.trim()));
    }
    prompt
}

/// Parse the model reply, tolerating a fenced code block around the JSON.
fn parse_summary(content: &str) -> Result<Summary> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).context("summary reply is not the expected JSON")
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    fn name(&self) -> &'static str {
        "openai"
    }

    #[instrument(skip_all, fields(summarizer = "openai", entries = request.entries.len()))]
    async fn summarize(&self, request: SummaryRequest) -> Result<Summary> {
        let system = ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(ChatCompletionRequestSystemMessageContent::Text(
                    self.system_prompt(),
                ))
                .build()
                .context("building system message")?,
        );

        let user = ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Text(user_prompt(
                    &request,
                )))
                .build()
                .context("building user message")?,
        );

        let req = CreateChatCompletionRequestArgs::default()
            .model(self.settings.model.clone())
            .messages(vec![system, user])
            .build()
            .context("building chat completion request")?;

        let resp = self
            .client
            .chat()
            .create(req)
            .await
            .context("openai chat completion failed")?;

        let choice = resp
            .choices
            .into_iter()
            .next()
            .context("openai returned no choices")?;
        let content = choice.message.content.unwrap_or_default();

        parse_summary(&content)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn settings_default_model_and_base() {
        let settings = OpenAiSettings::new("key".into());
        assert_eq!(settings.model, "gpt-4o-mini");
        assert_eq!(settings.api_base, None);
    }

    #[test]
    fn parses_plain_and_fenced_replies() {
        let plain = r#"{"mood":"calm","themes":["work"],"recommendations":["rest"]}"#;
        let fenced = format!("```json\n{plain}\n```");

        let expected = Summary {
            mood: "calm".into(),
            themes: vec!["work".into()],
            recommendations: vec!["rest".into()],
        };
        assert_eq!(parse_summary(plain).expect("plain"), expected);
        assert_eq!(parse_summary(&fenced).expect("fenced"), expected);
        assert!(parse_summary("I feel fine").is_err());
    }

    #[test]
    fn prompt_numbers_entries() {
        let prompt = user_prompt(&SummaryRequest {
            kind: SummaryKind::Weekly,
            period_start: NaiveDate::from_ymd_opt(2025, 4, 7).expect("date"),
            entries: vec![" first ".into(), "second".into()],
        });
        assert!(prompt.starts_with("Summarize the week starting 2025-04-07."));
        assert!(prompt.contains("1. first\n2. second\n"));
    }
}
