use rand::Rng;

/// Desktop browser User-Agent strings used when a definition does not supply its own
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
];

pub fn default_user_agents() -> Vec<String> {
    USER_AGENTS.iter().map(|ua| ua.to_string()).collect()
}

/// Pick a User-Agent uniformly at random. An empty list means no header is sent.
pub fn pick_user_agent(user_agents: &[String]) -> Option<String> {
    if user_agents.is_empty() {
        return None;
    }

    let mut rng = rand::rng();
    let index = rng.random_range(0..user_agents.len());
    Some(user_agents[index].clone())
}

/// Whether a declared Content-Type names an HTML document
pub fn is_html_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    mime == "text/html" || mime == "application/xhtml+xml"
}

/// Collapse runs of whitespace into single spaces and trim the ends
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
