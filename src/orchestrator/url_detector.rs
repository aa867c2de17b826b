//! Ready-URL detection in dev-server output.
//!
//! Patterns are tried in order; framework phrasings win over the generic
//! loopback pattern so `Local: http://…` is preferred on lines that carry
//! several URLs. ANSI colour sequences are stripped first.

use std::sync::LazyLock;

use regex::Regex;

static ANSI_ESCAPE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").ok());

static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Vite, Astro, SvelteKit.
        r"(?i)\blocal:\s+(https?://[^\s]+)",
        // Next.js, Nuxt.
        r"(?i)\bready on\s+(https?://[^\s]+)",
        // Express, Fastify, Bun.
        r"(?i)\blistening on\s+(https?://[^\s]+)",
        // Vue CLI, generic servers.
        r"(?i)\bserver running at\s+(https?://[^\s]+)",
        r"(https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):\d{1,5}[^\s]*)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// First ready URL found on `line`, if any.
#[must_use]
pub fn detect_url(line: &str) -> Option<String> {
    let cleaned = match ANSI_ESCAPE.as_ref() {
        Some(re) => re.replace_all(line, "").into_owned(),
        None => line.to_owned(),
    };

    URL_PATTERNS.iter().find_map(|re| {
        re.captures(&cleaned)
            .and_then(|caps| caps.get(1))
            .map(|m| trim_url(m.as_str()))
    })
}

fn trim_url(raw: &str) -> String {
    raw.trim_end_matches(['.', ',', ';', ')', '\'', '"'])
        .to_owned()
}

/// URL assumed for a server that never printed one.
#[must_use]
pub fn fallback_url(port: u16) -> String {
    format!("http://localhost:{port}")
}
