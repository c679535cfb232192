use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::extract::{SelectorKind, SelectorSpec};
use crate::fetcher::{FetchTarget, FetcherSettings};
use crate::retry::RetryPolicy;
use crate::utils::default_user_agents;

/// One scraper run as written in a TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperDefinition {
    pub url: String,
    #[serde(default)]
    pub proxies: Vec<String>,
    /// Omitted means the built-in list; an explicit empty list sends no User-Agent
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub fetcher: FetcherSettings,
    #[serde(default)]
    pub selectors: Vec<SelectorSpec>,
}

impl ScraperDefinition {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let definition: Self = toml::from_str(text).context("Failed to parse TOML")?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url).with_context(|| format!("Invalid URL '{}'", self.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("URL '{}' must use http or https", self.url);
        }

        for (index, spec) in self.selectors.iter().enumerate() {
            if spec.selector.trim().is_empty() {
                anyhow::bail!("Selector #{} is empty", index + 1);
            }
            if spec.class.is_some() && spec.kind != SelectorKind::Tag {
                anyhow::bail!(
                    "Selector #{} ('{}'): class filters only apply to tag selectors",
                    index + 1,
                    spec.selector
                );
            }
        }

        if self.fetcher.timeout_secs == 0 {
            anyhow::bail!("fetcher.timeout_secs must be greater than zero");
        }

        Ok(())
    }

    pub fn target(&self) -> FetchTarget {
        FetchTarget {
            url: self.url.clone(),
            proxies: self.proxies.clone(),
            user_agents: self.user_agents.clone(),
            retry: self.retry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::USER_AGENTS;

    #[test]
    fn test_minimal_definition_uses_defaults() {
        let definition = ScraperDefinition::from_toml_str(r#"url = "https://example.com""#).unwrap();

        assert!(definition.proxies.is_empty());
        assert_eq!(definition.user_agents.len(), USER_AGENTS.len());
        assert_eq!(definition.retry, RetryPolicy::default());
        assert_eq!(definition.fetcher, FetcherSettings::default());
        assert!(definition.selectors.is_empty());
    }

    #[test]
    fn test_full_definition() {
        let definition = ScraperDefinition::from_toml_str(
            r#"
            url = "https://example.com"
            proxies = ["http://10.0.0.1:3128", "http://10.0.0.2:3128"]
            user_agents = []

            [retry]
            max_retries = 5
            retry_statuses = [429, 503]

            [fetcher]
            cache_ttl_secs = 60

            [[selectors]]
            kind = "tag"
            selector = "p"
            class = "specific-class"

            [[selectors]]
            kind = "xpath"
            selector = "//h1"
            "#,
        )
        .unwrap();

        let target = definition.target();
        assert_eq!(target.proxies.len(), 2);
        assert!(target.user_agents.is_empty());
        assert_eq!(target.retry.max_retries, 5);
        assert_eq!(target.retry.retry_statuses, vec![429, 503]);
        assert_eq!(definition.fetcher.cache_ttl_secs, 60);
        assert_eq!(definition.fetcher.timeout_secs, 10);
        assert_eq!(definition.selectors.len(), 2);
        assert_eq!(definition.selectors[1], SelectorSpec::xpath("//h1"));
    }

    #[test]
    fn test_rejects_invalid_definitions() {
        assert!(ScraperDefinition::from_toml_str(r#"url = "example.com""#).is_err());
        assert!(ScraperDefinition::from_toml_str(r#"url = "file:///etc/hosts""#).is_err());
        assert!(
            ScraperDefinition::from_toml_str(
                r#"
                url = "https://example.com"
                [[selectors]]
                kind = "css"
                selector = "  "
                "#
            )
            .is_err()
        );
        assert!(
            ScraperDefinition::from_toml_str(
                r#"
                url = "https://example.com"
                [[selectors]]
                kind = "css"
                selector = "p"
                class = "x"
                "#
            )
            .is_err()
        );
        assert!(ScraperDefinition::from_toml_str(r#"url = "https://example.com" kind = 1"#).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ScraperDefinition::from_file("/nonexistent/scraper.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
