//! Robots.txt rules
//!
//! Wraps the robotstxt crate's matcher. Rules are kept as raw text and matched
//! on demand.

use robotstxt::DefaultMatcher;

/// What a host's robots.txt allows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRobots {
    /// No usable robots.txt; everything is allowed
    AllowAll,
    /// The server failed; everything is disallowed until the entry expires
    DisallowAll,
    /// Rules from a fetched robots.txt body
    Rules(String),
}

impl ParsedRobots {
    /// Creates rules from raw robots.txt content
    ///
    /// Empty content allows everything.
    pub fn from_content(content: &str) -> Self {
        if content.trim().is_empty() {
            ParsedRobots::AllowAll
        } else {
            ParsedRobots::Rules(content.to_string())
        }
    }

    /// Interprets a robots.txt response
    ///
    /// # Arguments
    ///
    /// * `status` - HTTP status of the robots.txt request
    /// * `body` - Response body
    ///
    /// # Returns
    ///
    /// Rules for 2xx, allow-all for 4xx (no robots.txt), disallow-all for 5xx,
    /// allow-all for anything else
    pub fn from_response(status: u16, body: &str) -> Self {
        match status {
            200..=299 => Self::from_content(body),
            400..=499 => ParsedRobots::AllowAll,
            500..=599 => ParsedRobots::DisallowAll,
            _ => ParsedRobots::AllowAll,
        }
    }

    /// Checks if a URL is allowed for the given user agent
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL or path to check
    /// * `user_agent` - The user agent string
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        match self {
            ParsedRobots::AllowAll => true,
            ParsedRobots::DisallowAll => false,
            ParsedRobots::Rules(content) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(content, user_agent, url)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let robots = ParsedRobots::AllowAll;
        assert!(robots.is_allowed("/any/path", "delver"));
    }

    #[test]
    fn test_disallow_specific() {
        let robots = ParsedRobots::from_content("User-agent: *\nDisallow: /admin");
        assert!(robots.is_allowed("http://example.com/", "delver"));
        assert!(!robots.is_allowed("http://example.com/admin", "delver"));
        assert!(!robots.is_allowed("http://example.com/admin/users", "delver"));
    }

    #[test]
    fn test_allow_overrides_disallow() {
        let robots =
            ParsedRobots::from_content("User-agent: *\nDisallow: /private\nAllow: /private/public");
        assert!(!robots.is_allowed("/private", "delver"));
        assert!(robots.is_allowed("/private/public", "delver"));
    }

    #[test]
    fn test_specific_user_agent() {
        let robots =
            ParsedRobots::from_content("User-agent: delver\nDisallow: /\n\nUser-agent: *\nAllow: /");
        assert!(!robots.is_allowed("/page", "delver"));
        assert!(robots.is_allowed("/page", "otherbot"));
    }

    #[test]
    fn test_empty_content_allows_all() {
        assert_eq!(ParsedRobots::from_content("  \n"), ParsedRobots::AllowAll);
    }

    #[test]
    fn test_from_response_status_classes() {
        assert_eq!(ParsedRobots::from_response(404, "ignored"), ParsedRobots::AllowAll);
        assert_eq!(ParsedRobots::from_response(503, ""), ParsedRobots::DisallowAll);
        assert!(matches!(
            ParsedRobots::from_response(200, "User-agent: *\nDisallow: /"),
            ParsedRobots::Rules(_)
        ));
    }
}
