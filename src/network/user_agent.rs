//! User agent generation

use rand::seq::SliceRandom;

const BROWSERS: &[&str] = &[
    "Mozilla/5.0 ({os}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 ({os}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 ({os}; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 ({os}; rv:124.0) Gecko/20100101 Firefox/124.0",
];

const OPERATING_SYSTEMS: &[&str] = &[
    "Windows NT 10.0; Win64; x64",
    "Macintosh; Intel Mac OS X 10_15_7",
    "X11; Linux x86_64",
    "X11; Ubuntu; Linux x86_64",
];

/// Generate a random but realistic user agent string
pub fn generate_user_agent() -> String {
    let mut rng = rand::thread_rng();
    let browser = BROWSERS.choose(&mut rng).copied().unwrap_or(BROWSERS[0]);
    let os = OPERATING_SYSTEMS
        .choose(&mut rng)
        .copied()
        .unwrap_or(OPERATING_SYSTEMS[0]);
    browser.replace("{os}", os)
}

/// Accept header for HTML pages
pub fn accept_html() -> &'static str {
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_generation() {
        let ua = generate_user_agent();
        assert!(ua.starts_with("Mozilla/5.0"));
        assert!(!ua.contains("{os}"));
    }
}
