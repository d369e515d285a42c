//! Supported chat providers and their site metadata.

use serde::{Deserialize, Serialize};

/// A chat provider an agent can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Chatgpt,
    Gemini,
    Claude,
}

/// Static site information for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSite {
    pub label: &'static str,
    /// Page a new session is opened on.
    pub url: &'static str,
    /// Pattern matching any page of the provider (`*` is a trailing wildcard).
    pub url_pattern: &'static str,
    pub default_color: &'static str,
}

impl ProviderKind {
    pub fn all() -> &'static [ProviderKind] {
        &[ProviderKind::Chatgpt, ProviderKind::Gemini, ProviderKind::Claude]
    }

    pub fn site(self) -> ProviderSite {
        match self {
            Self::Chatgpt => ProviderSite {
                label: "ChatGPT",
                url: "https://chatgpt.com/",
                url_pattern: "https://chatgpt.com/*",
                default_color: "#10A37F",
            },
            Self::Gemini => ProviderSite {
                label: "Gemini",
                url: "https://gemini.google.com/app",
                url_pattern: "https://gemini.google.com/*",
                default_color: "#4285F4",
            },
            Self::Claude => ProviderSite {
                label: "Claude",
                url: "https://claude.ai/new",
                url_pattern: "https://claude.ai/*",
                default_color: "#D97706",
            },
        }
    }

    /// Whether a page URL belongs to this provider.
    pub fn matches_url(self, url: &str) -> bool {
        url_matches(self.site().url_pattern, url)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chatgpt => write!(f, "chatgpt"),
            Self::Gemini => write!(f, "gemini"),
            Self::Claude => write!(f, "claude"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chatgpt" => Ok(Self::Chatgpt),
            "gemini" => Ok(Self::Gemini),
            "claude" => Ok(Self::Claude),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Match a URL against a pattern whose only wildcard is a trailing `*`.
pub fn url_matches(pattern: &str, url: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => url.starts_with(prefix),
        None => url == pattern,
    }
}
