//! Window matching: conjunctive predicates over a window's instance name,
//! class, role and desktop, with a process-lifetime regex cache.

use std::collections::HashMap;

use regex::Regex;
use tracing::error;

/// Compiled patterns keyed by their raw text. Unbounded: the pattern set is
/// bounded by configuration, not by event volume.
#[derive(Default)]
pub struct RegexCache {
    patterns: HashMap<String, Option<Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `text` matches `pattern` starting at the beginning of the
    /// string. An absent attribute never matches. A pattern that fails to
    /// compile is logged once and never matches.
    pub fn match_start(&mut self, pattern: &str, text: Option<&str>) -> bool {
        let text = match text {
            Some(text) => text,
            None => return false,
        };
        let regex = self.patterns.entry(pattern.to_string()).or_insert_with(|| {
            match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    error!("Invalid match pattern [{}]: {}", pattern, e);
                    None
                }
            }
        });
        match regex {
            Some(regex) => regex.find(text).is_some_and(|m| m.start() == 0),
            None => false,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.patterns.len()
    }
}

/// Attribute values fetched for one window, `None` where the window does
/// not carry the attribute.
#[derive(Debug, Default, Clone)]
pub struct WindowFacts {
    pub name: Option<String>,
    pub class: Option<String>,
    pub role: Option<String>,
    pub desktop: Option<i32>,
}

/// Criteria a window must satisfy. All supplied criteria are ANDed; omitted
/// criteria always pass. `name`, `class` and `role` are regex patterns
/// matched from the start of the attribute; `desktop` is exact equality.
#[derive(Debug, Default, Clone)]
pub struct MatchSpec {
    pub name: Option<String>,
    pub class: Option<String>,
    pub role: Option<String>,
    pub desktop: Option<i32>,
}

impl MatchSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, pattern: &str) -> Self {
        self.name = Some(pattern.to_string());
        self
    }

    pub fn class(mut self, pattern: &str) -> Self {
        self.class = Some(pattern.to_string());
        self
    }

    pub fn role(mut self, pattern: &str) -> Self {
        self.role = Some(pattern.to_string());
        self
    }

    pub fn desktop(mut self, desktop: i32) -> Self {
        self.desktop = Some(desktop);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.class.is_none() && self.role.is_none() && self.desktop.is_none()
    }

    pub(crate) fn matches(&self, cache: &mut RegexCache, facts: &WindowFacts) -> bool {
        if let Some(pattern) = &self.name {
            if !cache.match_start(pattern, facts.name.as_deref()) {
                return false;
            }
        }
        if let Some(pattern) = &self.class {
            if !cache.match_start(pattern, facts.class.as_deref()) {
                return false;
            }
        }
        if let Some(pattern) = &self.role {
            if !cache.match_start(pattern, facts.role.as_deref()) {
                return false;
            }
        }
        if let Some(desktop) = self.desktop {
            if facts.desktop != Some(desktop) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(name: &str, class: &str) -> WindowFacts {
        WindowFacts {
            name: Some(name.to_string()),
            class: Some(class.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_match_is_anchored_at_start() {
        let mut cache = RegexCache::new();
        assert!(cache.match_start("urxvt", Some("urxvt-unicode")));
        assert!(!cache.match_start("unicode", Some("urxvt-unicode")));
        assert!(cache.match_start("u.xvt", Some("urxvt")));
    }

    #[test]
    fn test_absent_attribute_never_matches() {
        let mut cache = RegexCache::new();
        assert!(!cache.match_start(".*", None));
    }

    #[test]
    fn test_invalid_pattern_never_matches() {
        let mut cache = RegexCache::new();
        assert!(!cache.match_start("(unclosed", Some("anything")));
        assert!(!cache.match_start("(unclosed", Some("(unclosed")));
    }

    #[test]
    fn test_cache_reuses_compiled_patterns() {
        let mut cache = RegexCache::new();
        assert!(cache.match_start("Navigator", Some("Navigator")));
        assert!(cache.match_start("Navigator", Some("NavigatorWindow")));
        assert!(!cache.match_start("Navigator", Some("firefox")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_criteria_are_conjunctive() {
        let mut cache = RegexCache::new();
        let spec = MatchSpec::new().name("Navigator").class("Firefox");
        assert!(spec.matches(&mut cache, &facts("Navigator", "Firefox")));
        assert!(!spec.matches(&mut cache, &facts("Navigator", "Chromium")));
        assert!(!spec.matches(&mut cache, &facts("Terminal", "Firefox")));
    }

    #[test]
    fn test_empty_spec_matches_everything() {
        let mut cache = RegexCache::new();
        let spec = MatchSpec::new();
        assert!(spec.is_empty());
        assert!(spec.matches(&mut cache, &WindowFacts::default()));
    }

    #[test]
    fn test_desktop_is_exact_equality() {
        let mut cache = RegexCache::new();
        let spec = MatchSpec::new().desktop(2);
        let mut window = WindowFacts::default();
        window.desktop = Some(2);
        assert!(spec.matches(&mut cache, &window));
        window.desktop = Some(12);
        assert!(!spec.matches(&mut cache, &window));
        window.desktop = None;
        assert!(!spec.matches(&mut cache, &window));
    }
}
