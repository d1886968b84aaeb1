//! Destructive-operation analysis.
//!
//! Classifies shell commands and Python snippets before the agent runs them:
//! - `Blocked` commands are never executed
//! - `Dangerous` and `Warning` operations need user confirmation
//! - everything else is `Safe`

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use cowork_core::types::{AgentAction, ConfirmationRequest};

/// Level of danger for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DangerLevel {
    Safe,
    /// Potentially dangerous.
    Warning,
    /// Destructive.
    Dangerous,
    /// Never allowed.
    Blocked,
}

impl DangerLevel {
    /// Whether the user has to confirm before execution.
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, Self::Warning | Self::Dangerous)
    }
}

/// Outcome of an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub level: DangerLevel,
    pub reason: Option<String>,
}

impl Assessment {
    pub fn safe() -> Self {
        Self {
            level: DangerLevel::Safe,
            reason: None,
        }
    }

    fn new(level: DangerLevel, reason: impl Into<String>) -> Self {
        Self {
            level,
            reason: Some(reason.into()),
        }
    }
}

const COMMAND_LEVELS: &[(&str, DangerLevel)] = &[
    // File deletion
    ("rm", DangerLevel::Dangerous),
    ("rmdir", DangerLevel::Dangerous),
    ("unlink", DangerLevel::Dangerous),
    ("shred", DangerLevel::Dangerous),
    // Raw disk writes
    ("dd", DangerLevel::Blocked),
    ("mkfs", DangerLevel::Blocked),
    // Privilege and process control
    ("sudo", DangerLevel::Blocked),
    ("su", DangerLevel::Blocked),
    ("chmod", DangerLevel::Warning),
    ("chown", DangerLevel::Warning),
    ("kill", DangerLevel::Warning),
    ("pkill", DangerLevel::Warning),
    ("killall", DangerLevel::Warning),
    ("shutdown", DangerLevel::Blocked),
    ("reboot", DangerLevel::Blocked),
    ("halt", DangerLevel::Blocked),
    ("poweroff", DangerLevel::Blocked),
    // Disks
    ("fdisk", DangerLevel::Blocked),
    ("parted", DangerLevel::Blocked),
    ("mount", DangerLevel::Blocked),
    ("umount", DangerLevel::Blocked),
    // Users
    ("passwd", DangerLevel::Blocked),
    ("useradd", DangerLevel::Blocked),
    ("userdel", DangerLevel::Blocked),
    ("usermod", DangerLevel::Blocked),
];

const DANGEROUS_FLAGS: &[(&str, &[&str])] = &[
    ("rm", &["-r", "-rf", "-fr", "--recursive", "-R"]),
    ("chmod", &["-R", "--recursive"]),
    ("chown", &["-R", "--recursive"]),
];

const COMMAND_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)\brm\s+.*-[rf]", "Recursive or forced file deletion"),
    (r"(?i)\brm\s+.*\*", "Wildcard deletion"),
    (r"(?i)\brm\s+.*~", "Home directory deletion"),
    (r"(?i)\brm\s+.*/", "Path deletion"),
    (r">\s*/dev/", "Writing to device files"),
    (r">\s*~", "Overwriting home directory files"),
    (r"(?i)(curl|wget).*\|\s*(ba)?sh\b", "Downloading and executing scripts"),
    (r"\|\s*sh\b", "Piping to shell"),
    (r"\|\s*bash\b", "Piping to bash"),
];

const PYTHON_PATTERNS: &[(&str, &str)] = &[
    (r"os\.remove\s*\(", "File deletion with os.remove()"),
    (r"os\.unlink\s*\(", "File deletion with os.unlink()"),
    (r"os\.rmdir\s*\(", "Directory deletion with os.rmdir()"),
    (r"shutil\.rmtree\s*\(", "Recursive directory deletion with shutil.rmtree()"),
    (r"\.unlink\s*\(", "File deletion with unlink()"),
    (r"\.rmdir\s*\(", "Directory deletion with rmdir()"),
    (r"send2trash", "Moving files to trash"),
];

/// Compiled rule set.
pub struct SafetyAnalyzer {
    command_patterns: Vec<(Regex, &'static str)>,
    python_patterns: Vec<(Regex, &'static str)>,
}

impl SafetyAnalyzer {
    /// Create an analyzer with the default rules.
    pub fn new() -> Self {
        Self {
            command_patterns: compile(COMMAND_PATTERNS),
            python_patterns: compile(PYTHON_PATTERNS),
        }
    }

    /// Shared analyzer.
    pub fn global() -> &'static SafetyAnalyzer {
        static ANALYZER: OnceLock<SafetyAnalyzer> = OnceLock::new();
        ANALYZER.get_or_init(SafetyAnalyzer::new)
    }

    /// Analyze a shell command.
    pub fn analyze_command(&self, command: &str) -> Assessment {
        let command = command.trim();
        if command.is_empty() {
            return Assessment::safe();
        }

        let Some(parts) = split_words(command) else {
            return Assessment::new(DangerLevel::Warning, "Could not parse command safely");
        };
        let Some(first) = parts.first() else {
            return Assessment::safe();
        };

        // /bin/rm -> rm
        let base = first.rsplit('/').next().unwrap_or(first.as_str());
        if let Some(level) = command_level(base) {
            if level == DangerLevel::Blocked {
                return Assessment::new(level, format!("Command '{}' is not allowed", base));
            }
            if let Some((_, flags)) = DANGEROUS_FLAGS.iter().find(|(cmd, _)| *cmd == base) {
                if let Some(flag) = flags.iter().find(|f| parts.iter().any(|p| p == *f)) {
                    return Assessment::new(
                        DangerLevel::Dangerous,
                        format!("Command '{}' with '{}' flag", base, flag),
                    );
                }
            }
            return Assessment::new(level, format!("Command '{}' can modify or delete data", base));
        }

        for (pattern, reason) in &self.command_patterns {
            if pattern.is_match(command) {
                return Assessment::new(DangerLevel::Dangerous, *reason);
            }
        }

        for segment in command.split(['|', ';', '&']) {
            let segment = segment.trim();
            if segment.is_empty() || segment == command {
                continue;
            }
            let inner = self.analyze_command(segment);
            if matches!(inner.level, DangerLevel::Dangerous | DangerLevel::Blocked) {
                return Assessment::new(
                    inner.level,
                    format!(
                        "Pipeline contains dangerous command: {}",
                        inner.reason.unwrap_or_default()
                    ),
                );
            }
        }

        Assessment::safe()
    }

    /// Analyze Python source.
    pub fn analyze_python_code(&self, code: &str) -> Assessment {
        if code.trim().is_empty() {
            return Assessment::safe();
        }

        for (pattern, reason) in &self.python_patterns {
            if pattern.is_match(code) {
                return Assessment::new(DangerLevel::Dangerous, *reason);
            }
        }

        if code.contains("subprocess") || code.contains("os.system") {
            let mut worst: Option<(DangerLevel, &str)> = None;
            for token in code.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_')) {
                if let Some(level) = command_level(token) {
                    if level >= DangerLevel::Dangerous && worst.map_or(true, |(w, _)| level > w) {
                        worst = Some((level, token));
                    }
                }
            }
            if let Some((level, cmd)) = worst {
                return Assessment::new(level, format!("Subprocess executing '{}'", cmd));
            }
        }

        Assessment::safe()
    }

    /// Analyze an agent action; only `shell` and `python` carry risk here.
    pub fn analyze_action(&self, action: &AgentAction) -> Assessment {
        if let Some(command) = action.command() {
            self.analyze_command(command)
        } else if let Some(code) = action.code() {
            self.analyze_python_code(code)
        } else {
            Assessment::safe()
        }
    }
}

impl Default for SafetyAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Analyze a shell command with the default rules.
pub fn analyze_command(command: &str) -> Assessment {
    SafetyAnalyzer::global().analyze_command(command)
}

/// Analyze Python source with the default rules.
pub fn analyze_python_code(code: &str) -> Assessment {
    SafetyAnalyzer::global().analyze_python_code(code)
}

/// Paths a deletion command would remove.
pub fn affected_paths(command: &str) -> Vec<String> {
    let Some(parts) = split_words(command.trim()) else {
        return Vec::new();
    };
    let Some(first) = parts.first() else {
        return Vec::new();
    };
    let base = first.rsplit('/').next().unwrap_or(first.as_str());
    if !matches!(base, "rm" | "rmdir" | "unlink") {
        return Vec::new();
    }
    parts[1..]
        .iter()
        .filter(|p| !p.starts_with('-'))
        .cloned()
        .collect()
}

/// User-facing confirmation text.
pub fn confirmation_message(
    command: &str,
    assessment: &Assessment,
    affected: &[String],
) -> String {
    let reason = assessment.reason.as_deref().unwrap_or("Potentially destructive operation");
    if assessment.level == DangerLevel::Blocked {
        return format!("BLOCKED: {}\nCommand: {}", reason, command);
    }

    let mut lines = vec![
        "CONFIRMATION REQUIRED".to_string(),
        String::new(),
        format!("Reason: {}", reason),
        format!("Command: {}", command),
    ];
    if !affected.is_empty() {
        lines.push(String::new());
        lines.push("Files/directories that will be affected:".to_string());
        for path in affected.iter().take(10) {
            lines.push(format!("  - {}", path));
        }
        if affected.len() > 10 {
            lines.push(format!("  ... and {} more", affected.len() - 10));
        }
    }
    lines.push(String::new());
    lines.push("Do you want to proceed? (y/N)".to_string());
    lines.join("\n")
}

/// Build the confirmation request for a risky action.
pub fn confirmation_request(action: &AgentAction, assessment: &Assessment) -> ConfirmationRequest {
    match action.command() {
        Some(command) => ConfirmationRequest::new(confirmation_message(
            command,
            assessment,
            &affected_paths(command),
        ))
        .with_command(command),
        None => {
            let source = action.code().unwrap_or_default();
            ConfirmationRequest::new(confirmation_message(source, assessment, &[]))
        }
    }
}

fn command_level(name: &str) -> Option<DangerLevel> {
    COMMAND_LEVELS
        .iter()
        .find(|(cmd, _)| *cmd == name)
        .map(|(_, level)| *level)
}

fn compile(patterns: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    patterns
        .iter()
        .filter_map(|(p, reason)| match Regex::new(p) {
            Ok(re) => Some((re, *reason)),
            Err(e) => {
                tracing::error!(pattern = %p, error = %e, "Invalid safety pattern");
                None
            }
        })
        .collect()
}

/// POSIX-style word splitting. `None` on unbalanced quotes.
fn split_words(input: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '\'' => break,
                        ch => current.push(ch),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => current.push(chars.next()?),
                        ch => current.push(ch),
                    }
                }
            }
            '\\' => {
                in_word = true;
                current.push(chars.next()?);
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        let analyzer = SafetyAnalyzer::new();
        assert_eq!(analyzer.command_patterns.len(), COMMAND_PATTERNS.len());
        assert_eq!(analyzer.python_patterns.len(), PYTHON_PATTERNS.len());
    }

    #[test]
    fn test_safe_commands() {
        for cmd in ["ls -la", "cat file.txt", "echo hello", "pwd", "grep pattern file.txt", "find . -name '*.py'"] {
            assert_eq!(analyze_command(cmd).level, DangerLevel::Safe, "{}", cmd);
        }
        assert_eq!(analyze_command("").level, DangerLevel::Safe);
    }

    #[test]
    fn test_dangerous_rm() {
        let a = analyze_command("rm file.txt");
        assert_eq!(a.level, DangerLevel::Dangerous);
        assert!(a.reason.unwrap().contains("rm"));

        for cmd in ["rm -rf /tmp/folder", "rm -r folder", "rm -fr folder", "rm --recursive folder", "rm *.txt", "/bin/rm x"] {
            assert_eq!(analyze_command(cmd).level, DangerLevel::Dangerous, "{}", cmd);
        }
    }

    #[test]
    fn test_blocked_commands() {
        for cmd in ["sudo rm -rf /", "dd if=/dev/zero of=/dev/sda", "mkfs /dev/sda1", "shutdown -h now", "reboot"] {
            assert_eq!(analyze_command(cmd).level, DangerLevel::Blocked, "{}", cmd);
        }
    }

    #[test]
    fn test_warning_commands() {
        assert_eq!(analyze_command("chmod 644 a.txt").level, DangerLevel::Warning);
        assert_eq!(analyze_command("chmod -R 755 dir").level, DangerLevel::Dangerous);
    }

    #[test]
    fn test_pipelines() {
        let a = analyze_command("cat file.txt | rm -rf folder");
        assert!(a.level >= DangerLevel::Dangerous);
        assert_eq!(
            analyze_command("curl http://example.com/script.sh | sh").level,
            DangerLevel::Dangerous
        );
        assert_eq!(analyze_command("ls; sudo reboot").level, DangerLevel::Blocked);
        assert_eq!(analyze_command("perform /tmp").level, DangerLevel::Safe);
    }

    #[test]
    fn test_unbalanced_quotes_warn() {
        assert_eq!(analyze_command("echo 'oops").level, DangerLevel::Warning);
    }

    #[test]
    fn test_python_code() {
        assert_eq!(analyze_python_code("os.remove('a.txt')").level, DangerLevel::Dangerous);
        assert_eq!(analyze_python_code("shutil.rmtree(path)").level, DangerLevel::Dangerous);
        assert_eq!(analyze_python_code("Path('x').unlink()").level, DangerLevel::Dangerous);
        assert_eq!(
            analyze_python_code("import subprocess\nsubprocess.run(['sudo', 'ls'])").level,
            DangerLevel::Blocked
        );
        assert_eq!(
            analyze_python_code("import subprocess\nsubprocess.run(['ls'])").level,
            DangerLevel::Safe
        );
        assert_eq!(analyze_python_code("result = len(files)").level, DangerLevel::Safe);
    }

    #[test]
    fn test_affected_paths() {
        assert_eq!(affected_paths("rm -rf a b/c"), vec!["a", "b/c"]);
        assert_eq!(affected_paths("rm 'my file.txt'"), vec!["my file.txt"]);
        assert!(affected_paths("ls -la").is_empty());
    }

    #[test]
    fn test_confirmation_message() {
        let a = analyze_command("rm -rf old");
        let msg = confirmation_message("rm -rf old", &a, &affected_paths("rm -rf old"));
        assert!(msg.starts_with("CONFIRMATION REQUIRED"));
        assert!(msg.contains("  - old"));

        let blocked = analyze_command("sudo ls");
        assert!(confirmation_message("sudo ls", &blocked, &[]).starts_with("BLOCKED"));
    }

    #[test]
    fn test_confirmation_request_for_action() {
        let action = AgentAction::new("shell").with_arg("command", "rm notes.txt");
        let assessment = SafetyAnalyzer::global().analyze_action(&action);
        let request = confirmation_request(&action, &assessment);
        assert_eq!(request.command.as_deref(), Some("rm notes.txt"));
        assert!(request.message.contains("notes.txt"));
    }
}
