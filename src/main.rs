use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use page_extract::{
    ExtractionResult, Fetcher, FetcherSettings, RetryPolicy, ScraperDefinition, SelectorSpec,
};
use page_extract::utils::default_user_agents;

/// Fetch one page and extract records by tag, CSS selector or XPath
#[derive(Debug, Parser)]
#[command(name = "page-extract", version, about)]
struct Cli {
    /// TOML scraper definition; command-line selectors are added to its list
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Page to fetch (required without --config)
    #[arg(short, long)]
    url: Option<String>,

    /// CSS selector to extract (repeatable)
    #[arg(long)]
    css: Vec<String>,

    /// XPath expression to extract (repeatable)
    #[arg(long)]
    xpath: Vec<String>,

    /// Tag name to extract (repeatable)
    #[arg(long)]
    tag: Vec<String>,

    /// Class filter applied to every --tag
    #[arg(long)]
    class: Option<String>,

    /// Proxy address, rotated per fetch (repeatable)
    #[arg(long)]
    proxy: Vec<String>,

    /// User-Agent string, one picked at random per fetch (repeatable)
    #[arg(long = "user-agent")]
    user_agent: Vec<String>,

    /// Retries after the first attempt
    #[arg(long)]
    retries: Option<u32>,

    /// Write the JSON results here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn definition(&self) -> Result<ScraperDefinition> {
        let mut definition = match (&self.config, &self.url) {
            (Some(path), _) => ScraperDefinition::from_file(path)?,
            (None, Some(url)) => ScraperDefinition {
                url: url.clone(),
                proxies: Vec::new(),
                user_agents: default_user_agents(),
                retry: RetryPolicy::default(),
                fetcher: FetcherSettings::default(),
                selectors: Vec::new(),
            },
            (None, None) => anyhow::bail!("Either --config or --url is required"),
        };

        if let (Some(_), Some(url)) = (&self.config, &self.url) {
            definition.url = url.clone();
        }
        if !self.proxy.is_empty() {
            definition.proxies = self.proxy.clone();
        }
        if !self.user_agent.is_empty() {
            definition.user_agents = self.user_agent.clone();
        }
        if let Some(retries) = self.retries {
            definition.retry.max_retries = retries;
        }

        let class = self.class.as_deref();
        definition
            .selectors
            .extend(self.tag.iter().map(|tag| SelectorSpec::tag(tag, class)));
        definition
            .selectors
            .extend(self.css.iter().map(|css| SelectorSpec::css(css)));
        definition
            .selectors
            .extend(self.xpath.iter().map(|xpath| SelectorSpec::xpath(xpath)));

        if definition.selectors.is_empty() {
            definition.selectors.push(SelectorSpec::tag("h1", None));
        }

        definition.validate()?;
        Ok(definition)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_level));

    let definition = cli.definition()?;
    log::info!(
        "Fetching {} with {} selector(s)",
        definition.url,
        definition.selectors.len()
    );

    let mut fetcher = Fetcher::new(definition.target(), definition.fetcher.clone())
        .context("Failed to create fetcher")?;
    fetcher.fetch().await.context("Failed to fetch page")?;

    let mut results: Vec<ExtractionResult> = Vec::with_capacity(definition.selectors.len());
    for spec in &definition.selectors {
        let result = fetcher
            .extract(spec)
            .with_context(|| format!("Extraction failed for '{}'", spec.selector))?;

        for (idx, element) in result.elements.iter().enumerate() {
            log::info!("{} {}: {}", element.element_type(), idx + 1, element.content());
        }
        results.push(result);
    }
    fetcher.close();

    let json = serde_json::to_string_pretty(&results).context("Failed to serialize results")?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Results written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
