//! Plain-text settings store.
//!
//! The settings file is a list of `key = value` or `key : value` lines.
//! Lines starting with `#`, `/` or `!` are comments. Unknown keys are kept
//! verbatim so consumers can probe for whatever they understand.

use crate::logging::{self, Logger};
use hashbrown::HashMap;
use std::fs;
use std::io;
use std::path::Path;

pub struct Settings {
    values: HashMap<String, String>,
    log: Logger,
}

impl Settings {
    /// Creates an empty settings store.
    #[inline]
    pub fn new<'a, L: Into<Option<&'a Logger>>>(log: L) -> Settings {
        Settings {
            values: HashMap::new(),
            log: logging::child_or_discard(log),
        }
    }

    /// Loads the settings from the given file. Malformed lines are reported
    /// and skipped; a missing file is reported to the caller.
    pub fn load<'a, P, L>(path: P, log: L) -> io::Result<Settings>
    where
        P: AsRef<Path>,
        L: Into<Option<&'a Logger>>,
    {
        let mut settings = Settings::new(log);
        let contents = fs::read_to_string(path.as_ref())?;

        settings.parse(&contents);

        logging::debug!(settings.log, "settings loaded";
                        "context" => "load",
                        "file" => %path.as_ref().display(),
                        "entries" => settings.len());

        Ok(settings)
    }

    /// Parses settings lines into the store, overwriting duplicate keys.
    pub fn parse(&mut self, contents: &str) {
        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with('/') || line.starts_with('!') {
                continue;
            }

            let split = line
                .split_once('=')
                .or_else(|| line.split_once(':'));

            match split {
                Some((key, value)) if !key.trim().is_empty() => {
                    self.set(key.trim(), value.trim());
                }
                _ => {
                    logging::warn!(self.log, "invalid settings line";
                                   "context" => "parse",
                                   "line" => number + 1,
                                   "contents" => line);
                }
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the value for `key`, or `default` when the key is absent.
    #[inline]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    #[inline]
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    #[inline]
    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
    }

    /// True when the value is one of `true`, `yes` or `on`.
    pub fn is_enabled(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true") | Some("yes") | Some("on"))
    }

    /// Parses the value as an integer. Non-numeric values count as absent.
    pub fn get_number(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|value| value.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> Settings {
        let mut settings = Settings::new(None);
        settings.parse(contents);
        settings
    }

    #[test]
    fn test_parse_both_separators() {
        let settings = parse("server.port = 4000\nserver.game.world : ./data/world\n");

        assert_eq!(settings.get("server.port"), Some("4000"));
        assert_eq!(settings.get("server.game.world"), Some("./data/world"));
        assert_eq!(settings.len(), 2);
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let settings = parse("# comment\n/ another\n! third\n\nkey = value\n");

        assert_eq!(settings.len(), 1);
        assert_eq!(settings.get("key"), Some("value"));
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let settings = parse("no separator here\n= empty key\nkey = ok\n");

        assert_eq!(settings.len(), 1);
        assert_eq!(settings.get("key"), Some("ok"));
    }

    #[test]
    fn test_duplicate_key_overwrites() {
        let settings = parse("key = first\nkey = second\n");

        assert_eq!(settings.get("key"), Some("second"));
    }

    #[test]
    fn test_is_enabled() {
        let settings = parse("a = true\nb = yes\nc = on\nd = off\n");

        assert!(settings.is_enabled("a"));
        assert!(settings.is_enabled("b"));
        assert!(settings.is_enabled("c"));
        assert!(!settings.is_enabled("d"));
        assert!(!settings.is_enabled("missing"));
    }

    #[test]
    fn test_get_number() {
        let settings = parse("port = 4000\nname = midgaard\n");

        assert_eq!(settings.get_number("port"), Some(4000));
        assert_eq!(settings.get_number("name"), None);
        assert_eq!(settings.get_number("missing"), None);
    }

    #[test]
    fn test_get_or() {
        let settings = parse("key = value\n");

        assert_eq!(settings.get_or("key", "fallback"), "value");
        assert_eq!(settings.get_or("missing", "fallback"), "fallback");
    }

    #[test]
    fn test_load_missing_file() {
        let result = Settings::load("/nonexistent/settings.ini", None);

        assert!(result.is_err());
    }
}
