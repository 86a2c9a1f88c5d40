//! Provider registry: maps provider names to endpoint configurations.
//!
//! Every supported backend speaks the OpenAI chat-completions dialect; they
//! differ only in base URL, auth style and where the key comes from.

/// How to attach auth credentials to requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// No authentication required (local servers).
    None,
}

/// Configuration for a single provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: &'static str,
    pub base_url: &'static str,
    /// Appended to `base_url`.
    pub chat_path: &'static str,
    /// Environment variable names to try for the API key (in order).
    pub env_keys: &'static [&'static str],
    pub auth_style: AuthStyle,
    /// Environment variable that overrides the base URL (e.g. OLLAMA_HOST).
    pub base_url_env: Option<&'static str>,
    /// Used when a chain entry names no model.
    pub default_model: &'static str,
    /// Extra headers some gateways ask for.
    pub extra_headers: &'static [(&'static str, &'static str)],
}

static PROVIDERS: &[ProviderConfig] = &[
    ProviderConfig {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        chat_path: "/chat/completions",
        env_keys: &["OPENROUTER_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: None,
        default_model: "openrouter/auto",
        extra_headers: &[("X-Title", "PingBox")],
    },
    ProviderConfig {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        chat_path: "/chat/completions",
        env_keys: &["GROQ_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: None,
        default_model: "llama-3.1-8b-instant",
        extra_headers: &[],
    },
    ProviderConfig {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        chat_path: "/chat/completions",
        env_keys: &["OPENAI_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: Some("OPENAI_API_BASE"),
        default_model: "gpt-4o-mini",
        extra_headers: &[],
    },
    ProviderConfig {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        chat_path: "/chat/completions",
        env_keys: &[],
        auth_style: AuthStyle::None,
        base_url_env: Some("OLLAMA_HOST"),
        default_model: "llama3.2",
        extra_headers: &[],
    },
];

/// Look up a provider config by name or alias.
pub fn get_provider_config(name: &str) -> Option<&'static ProviderConfig> {
    let lookup = match name.trim() {
        "open_router" | "open-router" => "openrouter",
        "groqcloud" => "groq",
        "local" => "ollama",
        other => other,
    };
    PROVIDERS.iter().find(|p| p.name == lookup)
}

/// All registry names, in registry order.
pub fn all_provider_names() -> Vec<&'static str> {
    PROVIDERS.iter().map(|p| p.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_aliases() {
        assert_eq!(get_provider_config("groq").unwrap().env_keys, &["GROQ_API_KEY"]);
        assert_eq!(get_provider_config("open-router").unwrap().name, "openrouter");
        assert_eq!(get_provider_config(" local ").unwrap().auth_style, AuthStyle::None);
        assert!(get_provider_config("brain").is_none());
    }

    #[test]
    fn test_names_are_unique() {
        let names = all_provider_names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
    }
}
