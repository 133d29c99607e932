//! Command policy engine
//!
//! Decides whether a shell command line may be submitted to a console. The
//! check is a pure function of the command and a [`ConsoleConfig`] snapshot,
//! applied in a fixed order where the first rejection wins:
//!
//! 1. blank input is always allowed
//! 2. `sudo` when the config forbids it
//! 3. `su` (and `sudo su`), which is never allowed
//! 4. built-in dangerous patterns
//! 5. operator rules from `blocked_commands`
//! 6. write-style access (`>`, `tee`, `mv`, `cp`, `dd of=`) to a blocked path

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::config::ConsoleConfig;

/// Outcome of a policy check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandValidationResult {
    /// Whether the command may run
    pub allowed: bool,
    /// Why it may not
    pub reason: Option<String>,
}

impl CommandValidationResult {
    /// An allowed command
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// A rejected command
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

struct DangerousPattern {
    pattern: Regex,
    reason: &'static str,
}

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| panic!("built-in pattern {:?} must compile: {}", pattern, e))
}

pub const SUDO_DISABLED_REASON: &str =
    "sudo commands are disabled. Enable allow_sudo in the console settings to allow.";
pub const SU_BLOCKED_REASON: &str = "su command is blocked for security.";

static SUDO: LazyLock<Regex> = LazyLock::new(|| ci(r"^\s*sudo(\s|$)"));

static SU: LazyLock<Regex> = LazyLock::new(|| ci(r"^\s*su(\s|$)"));

// `sudo [-opt [arg]]... su`
static SUDO_SU: LazyLock<Regex> =
    LazyLock::new(|| ci(r"^\s*sudo(\s+-[a-z]+(\s+[a-z_][a-z0-9_-]*)?)*\s+su(\s|$)"));

static DANGEROUS: LazyLock<Vec<DangerousPattern>> = LazyLock::new(|| {
    [
        (
            r"\brm\s+(-{1,2}[a-z-]*\s+)*/(\s|$|[;&|])",
            "Deleting root directory is blocked",
        ),
        (
            r"\brm\s+(-{1,2}[a-z-]*\s+)*/\*(\s|$|[;&|])",
            "Deleting all files in root is blocked",
        ),
        (
            r"\b(mkfs|mke2fs)\b",
            "Filesystem formatting commands are blocked",
        ),
        (r"\bdd\s+.*\bof=/dev/", "Raw disk write commands are blocked"),
        (
            r">\s*/dev/(sd|hd|nvme|vd|xvd|mmcblk)",
            "Direct device writes are blocked",
        ),
        (
            r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            "Fork bombs are blocked",
        ),
        (
            r"\bchmod\s+(\S+\s+)*(-[a-z]*r[a-z]*|--recursive)\s+(\S+\s+)*/\*?(\s|$|[;&|])",
            "Recursive chmod on root is blocked",
        ),
        (
            r"\bch(own|grp)\s+(\S+\s+)*(-[a-z]*r[a-z]*|--recursive)\s+(\S+\s+)*/\*?(\s|$|[;&|])",
            "Recursive chown on root is blocked",
        ),
        (
            r"\b(shutdown|reboot|poweroff|halt)\b|\b(init|telinit)\s+[06]\b",
            "System power commands are blocked from console",
        ),
    ]
    .into_iter()
    .map(|(pattern, reason)| DangerousPattern {
        pattern: ci(pattern),
        reason,
    })
    .collect()
});

/// Evaluate a command line against the console policy.
///
/// Deterministic and free of side effects: the same command and config
/// always produce the same result, and nothing is logged or recorded.
pub fn validate(command: &str, config: &ConsoleConfig) -> CommandValidationResult {
    if command.trim().is_empty() {
        return CommandValidationResult::allow();
    }

    if !config.allow_sudo && SUDO.is_match(command) {
        return CommandValidationResult::deny(SUDO_DISABLED_REASON);
    }

    if SU.is_match(command) || SUDO_SU.is_match(command) {
        return CommandValidationResult::deny(SU_BLOCKED_REASON);
    }

    if let Some(rule) = DANGEROUS.iter().find(|rule| rule.pattern.is_match(command)) {
        return CommandValidationResult::deny(rule.reason);
    }

    for rule in &config.blocked_commands {
        if let Some(pattern) = compile_operator_rule(&rule.pattern) {
            if pattern.is_match(command) {
                return CommandValidationResult::deny(rule.reason.clone());
            }
        }
    }

    for path in &config.blocked_paths {
        if writes_to_path(command, path) {
            return CommandValidationResult::deny(format!(
                "Modifications to {} are blocked",
                path
            ));
        }
    }

    CommandValidationResult::allow()
}

fn compile_operator_rule(pattern: &str) -> Option<Regex> {
    if pattern.trim().is_empty() {
        return None;
    }
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(pattern))
                .case_insensitive(true)
                .build()
        })
        .ok()
}

fn writes_to_path(command: &str, path: &str) -> bool {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return false;
    }
    let p = regex::escape(trimmed);
    // The path must end at a component boundary so `/proc` does not match `/processed`.
    let end = r"(/|\s|$|[;&|])";
    let patterns = [
        format!(r">\s*{p}{end}"),
        format!(r"\btee\s+(-\S+\s+)*{p}{end}"),
        format!(r"\bmv\s+.*\s{p}{end}"),
        format!(r"\bcp\s+.*\s{p}{end}"),
        format!(r"\bdd\s+.*\bof={p}{end}"),
    ];
    patterns.iter().any(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(|re| re.is_match(command))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlockedCommand;

    fn permissive() -> ConsoleConfig {
        ConsoleConfig {
            allow_sudo: true,
            blocked_paths: Vec::new(),
            ..ConsoleConfig::default()
        }
    }

    fn assert_blocked(command: &str, config: &ConsoleConfig, reason_fragment: &str) {
        let result = validate(command, config);
        assert!(!result.allowed, "expected {:?} to be blocked", command);
        let reason = result.reason.unwrap_or_default();
        assert!(
            reason.to_lowercase().contains(&reason_fragment.to_lowercase()),
            "reason {:?} for {:?} should mention {:?}",
            reason,
            command,
            reason_fragment
        );
    }

    #[test]
    fn test_blank_input_allowed() {
        assert!(validate("", &ConsoleConfig::default()).allowed);
        assert!(validate("   \t ", &ConsoleConfig::default()).allowed);
    }

    #[test]
    fn test_ordinary_commands_allowed() {
        let config = ConsoleConfig::default();
        for command in [
            "ls -la",
            "cat /etc/passwd",
            "rm -rf /tmp/build",
            "chmod -R 755 /var/www",
            "echo hi > /tmp/out.txt",
            "cp notes.txt /processed/notes.txt",
            "tail -f /var/log/syslog | grep sudo",
            "suricata --version",
        ] {
            let result = validate(command, &config);
            assert!(result.allowed, "{:?} rejected: {:?}", command, result.reason);
            assert!(result.reason.is_none());
        }
    }

    #[test]
    fn test_sudo_disabled_by_default() {
        assert_blocked("sudo apt update", &ConsoleConfig::default(), "sudo");
        assert_blocked("   sudo ls", &ConsoleConfig::default(), "sudo");
        assert_blocked("sudo", &ConsoleConfig::default(), "sudo");
    }

    #[test]
    fn test_sudo_check_precedes_dangerous_patterns() {
        let result = validate("sudo rm -rf /", &ConsoleConfig::default());
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some(SUDO_DISABLED_REASON));
    }

    #[test]
    fn test_sudo_allowed_when_enabled() {
        assert!(validate("sudo systemctl status nginx", &permissive()).allowed);
    }

    #[test]
    fn test_dangerous_pattern_still_applies_under_sudo() {
        assert_blocked("sudo rm -rf /", &permissive(), "root directory");
    }

    #[test]
    fn test_su_always_blocked() {
        for config in [ConsoleConfig::default(), permissive()] {
            assert_blocked("su", &config, "su command");
            assert_blocked("su root", &config, "su command");
            assert_blocked("  SU - admin", &config, "su command");
        }
        assert_blocked("sudo su -", &permissive(), "su command");
        assert_blocked("sudo -u root su", &permissive(), "su command");
        assert!(validate("sudo grep su /var/log/auth.log", &permissive()).allowed);
    }

    #[test]
    fn test_dangerous_patterns_ignore_settings() {
        let cases = [
            ("rm -rf /", "root directory"),
            ("rm -r -f / --no-preserve-root", "root directory"),
            ("rm -rf /*", "all files in root"),
            ("mkfs.ext4 /dev/sdb1", "formatting"),
            ("mkfs -t xfs /dev/vdb", "formatting"),
            ("dd if=/dev/zero of=/dev/sda bs=1M", "raw disk"),
            ("cat image.bin > /dev/nvme0n1", "device writes"),
            (":(){ :|:& };:", "fork bomb"),
            ("chmod -R 777 /", "chmod"),
            ("chown -R nobody:nogroup /", "chown"),
            ("shutdown -h now", "power"),
            ("reboot", "power"),
            ("systemctl poweroff", "power"),
            ("init 0", "power"),
        ];
        for config in [ConsoleConfig::default(), permissive()] {
            for (command, fragment) in cases {
                assert_blocked(command, &config, fragment);
            }
        }
    }

    #[test]
    fn test_first_matching_pattern_wins() {
        // Both the root-delete and power rules match; root delete is earlier.
        assert_blocked("rm -rf / && reboot", &permissive(), "root directory");
    }

    #[test]
    fn test_blocked_paths() {
        let config = ConsoleConfig::default();
        assert_blocked("echo x > /etc/passwd", &config, "/etc/passwd");
        assert_blocked("echo x >> /etc/shadow", &config, "/etc/shadow");
        assert_blocked("echo 'ops ALL=(ALL) ALL' | tee -a /etc/sudoers", &config, "/etc/sudoers");
        assert_blocked("mv vmlinuz /boot/vmlinuz", &config, "/boot");
        assert_blocked("cp evil /etc/passwd", &config, "/etc/passwd");
        assert_blocked("echo 1 > /proc/sys/kernel/sysrq", &config, "/proc");
    }

    #[test]
    fn test_blocked_paths_are_configurable() {
        let config = ConsoleConfig {
            blocked_paths: vec!["/srv/data/".to_string()],
            ..ConsoleConfig::default()
        };
        assert_blocked("echo x > /srv/data/file", &config, "/srv/data");
        assert!(validate("echo x > /etc/passwd", &config).allowed);
    }

    #[test]
    fn test_operator_rules() {
        let mut config = ConsoleConfig::default();
        config
            .blocked_commands
            .push(BlockedCommand::new(r"^\s*docker\s+rm\b", "Removing containers is blocked"));
        config
            .blocked_commands
            .push(BlockedCommand::new("kill -9 (1", "Killing init is blocked"));

        assert_blocked("docker rm -f web", &config, "removing containers");
        assert_blocked("kill -9 (1", &config, "killing init");
        assert!(validate("docker ps", &config).allowed);
    }

    #[test]
    fn test_builtin_rules_precede_operator_rules() {
        let mut config = permissive();
        config
            .blocked_commands
            .push(BlockedCommand::new("reboot", "custom reason"));
        assert_blocked("reboot", &config, "power");
    }

    #[test]
    fn test_validation_is_deterministic() {
        let config = ConsoleConfig::default();
        let first = validate("dd if=/dev/zero of=/dev/sda", &config);
        let second = validate("dd if=/dev/zero of=/dev/sda", &config);
        assert_eq!(first, second);
    }
}
