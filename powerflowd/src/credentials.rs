use std::fmt;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKeyKind {
    Pocket,
    Notion,
}

impl ApiKeyKind {
    pub fn env_var(self) -> &'static str {
        match self {
            ApiKeyKind::Pocket => "POCKET_API_KEY",
            ApiKeyKind::Notion => "NOTION_API_KEY",
        }
    }

    pub fn service_name(self) -> &'static str {
        match self {
            ApiKeyKind::Pocket => "Pocket",
            ApiKeyKind::Notion => "Notion",
        }
    }

    /// Cheap local sanity check, run before any network verification.
    pub fn check_format(self, key: &str) -> Result<(), KeyFormatError> {
        if key.is_empty() {
            return Err(KeyFormatError::Empty(self));
        }
        if key.chars().any(char::is_whitespace) {
            return Err(KeyFormatError::Whitespace(self));
        }
        match self {
            ApiKeyKind::Pocket if key.len() < POCKET_KEY_MIN_LEN => {
                Err(KeyFormatError::TooShort(self))
            }
            ApiKeyKind::Notion if !NOTION_KEY_PREFIXES.iter().any(|p| key.starts_with(p)) => {
                Err(KeyFormatError::NotionPrefix)
            }
            ApiKeyKind::Notion if key.len() < NOTION_KEY_MIN_LEN => {
                Err(KeyFormatError::TooShort(self))
            }
            _ => Ok(()),
        }
    }
}

const POCKET_KEY_MIN_LEN: usize = 20;
const NOTION_KEY_MIN_LEN: usize = 30;
const NOTION_KEY_PREFIXES: [&str; 2] = ["secret_", "ntn_"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KeyFormatError {
    #[error("{0} API key is empty")]
    Empty(ApiKeyKind),
    #[error("{0} API key contains whitespace; check for a stray space or line break")]
    Whitespace(ApiKeyKind),
    #[error("{0} API key looks too short; copy the whole key")]
    TooShort(ApiKeyKind),
    #[error("Notion API keys start with 'secret_' or 'ntn_'")]
    NotionPrefix,
}

impl fmt::Display for ApiKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

/// Where a resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Environment,
    ConfigFile,
    Prompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub value: String,
    pub source: KeySource,
}

/// One place an API key may be found.
pub trait CredentialProvider {
    fn source(&self) -> KeySource;
    fn lookup(&self, kind: ApiKeyKind) -> Option<String>;
}

/// Process environment (after `.env` has been loaded).
pub struct EnvProvider;

impl CredentialProvider for EnvProvider {
    fn source(&self) -> KeySource {
        KeySource::Environment
    }

    fn lookup(&self, kind: ApiKeyKind) -> Option<String> {
        std::env::var(kind.env_var()).ok()
    }
}

pub struct ConfigFileProvider {
    pocket: Option<String>,
    notion: Option<String>,
}

impl ConfigFileProvider {
    pub fn new(config: &Config) -> Self {
        Self {
            pocket: config.credentials.pocket_api_key.clone(),
            notion: config.credentials.notion_api_key.clone(),
        }
    }
}

impl CredentialProvider for ConfigFileProvider {
    fn source(&self) -> KeySource {
        KeySource::ConfigFile
    }

    fn lookup(&self, kind: ApiKeyKind) -> Option<String> {
        match kind {
            ApiKeyKind::Pocket => self.pocket.clone(),
            ApiKeyKind::Notion => self.notion.clone(),
        }
    }
}

/// Asks on the terminal. Only interactive commands put this in a chain.
pub struct PromptProvider;

impl CredentialProvider for PromptProvider {
    fn source(&self) -> KeySource {
        KeySource::Prompt
    }

    fn lookup(&self, kind: ApiKeyKind) -> Option<String> {
        loop {
            let input = dialoguer::Password::new()
                .with_prompt(format!("{kind} API key"))
                .allow_empty_password(true)
                .interact()
                .ok()?;
            let key = input.trim();
            if key.is_empty() {
                return None;
            }
            match kind.check_format(key) {
                Ok(()) => return Some(key.to_string()),
                Err(err) => eprintln!("  {}", console::style(err).red()),
            }
        }
    }
}

/// Ordered providers; the first non-blank value wins.
pub struct CredentialChain {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl CredentialChain {
    pub fn new(providers: Vec<Box<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    /// Environment, then config file. Used by the daemon and scripted runs.
    pub fn non_interactive(config: &Config) -> Self {
        Self::new(vec![
            Box::new(EnvProvider),
            Box::new(ConfigFileProvider::new(config)),
        ])
    }

    pub fn interactive(config: &Config) -> Self {
        let mut chain = Self::non_interactive(config);
        chain.providers.push(Box::new(PromptProvider));
        chain
    }

    pub fn resolve(&self, kind: ApiKeyKind) -> Option<ResolvedKey> {
        self.providers.iter().find_map(|provider| {
            provider
                .lookup(kind)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(|value| ResolvedKey {
                    value,
                    source: provider.source(),
                })
        })
    }

    pub fn resolve_both(&self) -> Result<ApiKeys, MissingKeys> {
        let pocket = self.resolve(ApiKeyKind::Pocket);
        let notion = self.resolve(ApiKeyKind::Notion);
        match (pocket, notion) {
            (Some(pocket), Some(notion)) => Ok(ApiKeys {
                pocket: pocket.value,
                notion: notion.value,
            }),
            (pocket, notion) => {
                let mut missing = Vec::new();
                if pocket.is_none() {
                    missing.push(ApiKeyKind::Pocket);
                }
                if notion.is_none() {
                    missing.push(ApiKeyKind::Notion);
                }
                Err(MissingKeys(missing))
            }
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ApiKeys {
    pub pocket: String,
    pub notion: String,
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeys").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Missing API key(s): {}", .0.iter().map(|k| k.env_var()).collect::<Vec<_>>().join(", "))]
pub struct MissingKeys(pub Vec<ApiKeyKind>);
