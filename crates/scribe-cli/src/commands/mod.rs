//! CLI command implementations for `scribe`.
//!
//! - [`complete`] -- Single completion, async or blocking.
//! - [`stream`] -- Streaming completion, async or blocking.
//!
//! Shared helpers load settings, build the gateway and turn the prompt
//! arguments into a [`CompletionRequest`].

pub mod complete;
pub mod stream;

use std::path::Path;

use clap::Args;
use scribe_llm::{
    CompletionRequest, Gateway, Settings, Turn, format_conversation,
    format_conversation_from_buffer,
};

/// Prompt arguments shared by every subcommand.
#[derive(Args, Debug)]
pub struct PromptArgs {
    /// Use the blocking calling convention.
    #[arg(long)]
    pub sync: bool,

    /// Model identifier. Defaults to `anthropic.default_model` from settings.
    #[arg(short, long)]
    pub model: Option<String>,

    /// System instruction. Defaults to "You are a helpful assistant".
    #[arg(short, long)]
    pub system: Option<String>,

    /// Maximum number of tokens to generate.
    #[arg(long, default_value_t = scribe_llm::types::DEFAULT_MAX_TOKENS)]
    pub max_tokens: u32,

    /// Sampling temperature in [0, 1].
    #[arg(long, default_value_t = scribe_llm::types::DEFAULT_TEMPERATURE)]
    pub temperature: f64,

    /// JSON file holding prior turns (`[{"role": "user", "content": ".."}]`).
    #[arg(long)]
    pub buffer: Option<String>,

    /// User text. Appended after the buffered turns when both are given.
    pub prompt: Option<String>,
}

/// Load settings from `path`, or defaults when no path is given.
pub fn load_settings(path: Option<&str>) -> anyhow::Result<Settings> {
    let Some(path_str) = path else {
        return Ok(Settings::default());
    };
    if !Path::new(path_str).exists() {
        anyhow::bail!("config file not found: {path_str}");
    }
    let contents = std::fs::read_to_string(path_str)
        .map_err(|e| anyhow::anyhow!("failed to read config: {e}"))?;
    Settings::from_json(&contents).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))
}

/// Build a gateway over the configured Anthropic endpoint.
///
/// The API key is read from the environment variable named by
/// `anthropic.api_key_env`.
pub fn build_gateway(settings: &Settings) -> anyhow::Result<Gateway> {
    let gateway = Gateway::anthropic(settings.anthropic.clone(), settings.gateway.to_config())?;
    Ok(gateway)
}

/// Turn prompt arguments into a request.
pub fn build_request(args: &PromptArgs, settings: &Settings) -> anyhow::Result<CompletionRequest> {
    let system = args.system.as_deref();

    let conversation = match (&args.buffer, &args.prompt) {
        (None, None) => anyhow::bail!("nothing to send: pass a prompt or --buffer"),
        (None, Some(prompt)) => format_conversation(prompt.as_str(), system),
        (Some(path), prompt) => {
            let mut turns = read_buffer(path)?;
            if let Some(prompt) = prompt {
                turns.push(Turn::user(prompt.as_str()));
            }
            format_conversation_from_buffer(turns, system)
        }
    };

    let model = args
        .model
        .clone()
        .unwrap_or_else(|| settings.anthropic.default_model.clone());

    Ok(CompletionRequest::new(model, conversation)
        .with_max_tokens(args.max_tokens)
        .with_temperature(args.temperature))
}

fn read_buffer(path: &str) -> anyhow::Result<Vec<Turn>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read buffer {path}: {e}"))?;
    let turns: Vec<Turn> = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse buffer {path}: {e}"))?;
    Ok(turns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_llm::{DEFAULT_SYSTEM_PROMPT, Role};
    use std::io::Write;

    fn args(prompt: Option<&str>, buffer: Option<String>) -> PromptArgs {
        PromptArgs {
            sync: false,
            model: None,
            system: None,
            max_tokens: 1024,
            temperature: 0.8,
            buffer,
            prompt: prompt.map(String::from),
        }
    }

    #[test]
    fn load_settings_defaults_without_path() {
        assert_eq!(load_settings(None).unwrap(), Settings::default());
    }

    #[test]
    fn load_settings_missing_file() {
        let err = load_settings(Some("/nonexistent/scribe.json")).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn load_settings_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"gateway": {{"in_flight_limit": 3}}}}"#).unwrap();
        let settings = load_settings(file.path().to_str()).unwrap();
        assert_eq!(settings.gateway.in_flight_limit, 3);
    }

    #[test]
    fn request_from_prompt_uses_defaults() {
        let request = build_request(&args(Some("Hi"), None), &Settings::default()).unwrap();
        assert_eq!(request.model, scribe_llm::config::DEFAULT_MODEL);
        assert_eq!(request.conversation.system, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(request.conversation.turns, vec![Turn::user("Hi")]);
    }

    #[test]
    fn request_from_buffer_appends_prompt() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"role": "user", "content": "Hi"}}, {{"role": "assistant", "content": "Hello"}}]"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let mut prompt_args = args(Some("And then?"), Some(path));
        prompt_args.system = Some("Be brief.".into());
        prompt_args.model = Some("claude-3-opus-20240229".into());

        let request = build_request(&prompt_args, &Settings::default()).unwrap();
        assert_eq!(request.model, "claude-3-opus-20240229");
        assert_eq!(request.conversation.system, "Be brief.");
        let roles: Vec<Role> = request.conversation.turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(request.conversation.turns[2].content, "And then?");
    }

    #[test]
    fn request_needs_prompt_or_buffer() {
        let err = build_request(&args(None, None), &Settings::default()).unwrap_err();
        assert!(err.to_string().contains("nothing to send"));
    }
}
