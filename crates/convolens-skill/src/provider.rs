use std::fmt;
use std::str::FromStr;

/// Closed set of Skill inference backends.
///
/// The two CLI providers run on local login/subscription; the two HTTP
/// providers require API key environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    ClaudeCli,
    CodexCli,
    OpenAi,
    Anthropic,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::ClaudeCli,
        Provider::CodexCli,
        Provider::OpenAi,
        Provider::Anthropic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::ClaudeCli => "claude_cli",
            Provider::CodexCli => "codex_cli",
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::ClaudeCli => "sonnet",
            Provider::CodexCli => "gpt-5-codex",
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Anthropic => "claude-3-5-sonnet-latest",
        }
    }

    /// Environment variable carrying the API key, for HTTP providers.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::ClaudeCli | Provider::CodexCli => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude_cli" => Ok(Provider::ClaudeCli),
            "codex_cli" => Ok(Provider::CodexCli),
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(format!("unsupported provider: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_names() {
        for provider in Provider::ALL {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
        assert!("mock".parse::<Provider>().is_err());
    }

    #[test]
    fn key_env_only_for_http_providers() {
        assert_eq!(Provider::OpenAi.api_key_env(), Some("OPENAI_API_KEY"));
        assert_eq!(Provider::Anthropic.api_key_env(), Some("ANTHROPIC_API_KEY"));
        assert_eq!(Provider::ClaudeCli.api_key_env(), None);
    }
}
