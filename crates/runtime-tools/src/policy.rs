// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use regex::Regex;

/// Glob-style allow/deny lists over tool *names*, matching the session's
/// `permissions` field. Deny takes priority over allow; an empty allow list
/// means "no restriction" rather than "deny everything".
#[derive(Debug, Clone, Default)]
pub struct ToolPermissions {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl ToolPermissions {
    pub fn new(allow_globs: &[String], deny_globs: &[String]) -> Self {
        ToolPermissions {
            allow: allow_globs.iter().filter_map(|g| glob_to_regex(g).ok()).collect(),
            deny: deny_globs.iter().filter_map(|g| glob_to_regex(g).ok()).collect(),
        }
    }

    /// Deny-first: a name matching any deny pattern is never permitted, even
    /// if it also matches an allow pattern.
    pub fn permits(&self, tool_name: &str) -> bool {
        if self.deny.iter().any(|re| re.is_match(tool_name)) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|re| re.is_match(tool_name))
    }
}

/// Translates a `*`/`?` shell glob into an anchored regex. Any other
/// character is escaped literally.
fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            _ => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_permits_everything_not_denied() {
        let perms = ToolPermissions::new(&[], &[]);
        assert!(perms.permits("write_file"));
    }

    #[test]
    fn deny_glob_blocks_matching_names() {
        let perms = ToolPermissions::new(&[], &["write_*".to_string()]);
        assert!(!perms.permits("write_file"));
        assert!(perms.permits("read_file"));
    }

    #[test]
    fn deny_takes_priority_over_allow() {
        let perms = ToolPermissions::new(&["write_*".to_string()], &["write_file".to_string()]);
        assert!(!perms.permits("write_file"));
    }

    #[test]
    fn allow_list_restricts_to_matching_names() {
        let perms = ToolPermissions::new(&["list_*".to_string()], &[]);
        assert!(perms.permits("list_files"));
        assert!(!perms.permits("write_file"));
    }
}
