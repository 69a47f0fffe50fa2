use std::fmt;

use regex::{Regex, RegexBuilder};

/// Why a snippet was refused before anything was staged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    TooLong { max: usize },
    Forbidden { pattern: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Invalid code input"),
            Self::TooLong { max } => write!(f, "Code too long (max {max} characters)"),
            Self::Forbidden { pattern } => write!(f, "Forbidden pattern detected: {pattern}"),
        }
    }
}

struct ForbiddenPattern {
    source: String,
    /// `None` when the source failed to compile; such patterns are skipped
    regex: Option<Regex>,
}

/// Textual blacklist check
///
/// This only catches literal markers and is easy to get around with
/// obfuscation. It reduces casual misuse, it does not isolate anything.
pub struct SafetyValidator {
    max_code_length: usize,
    patterns: Vec<ForbiddenPattern>,
}

impl SafetyValidator {
    pub fn new(max_code_length: usize, patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .map(|source| {
                let regex = RegexBuilder::new(source)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| log::error!("Regex error with pattern {source}: {e}"))
                    .ok();
                ForbiddenPattern {
                    source: source.clone(),
                    regex,
                }
            })
            .collect();

        Self {
            max_code_length,
            patterns,
        }
    }

    pub fn validate(&self, code: &str) -> Result<(), Rejection> {
        if code.is_empty() {
            return Err(Rejection::Empty);
        }

        if code.chars().count() > self.max_code_length {
            return Err(Rejection::TooLong {
                max: self.max_code_length,
            });
        }

        for pattern in &self.patterns {
            let Some(regex) = &pattern.regex else {
                continue;
            };
            if regex.is_match(code) {
                log::warn!("Forbidden pattern detected: {}", pattern.source);
                return Err(Rejection::Forbidden {
                    pattern: pattern.source.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FORBIDDEN_PATTERNS;

    fn default_validator() -> SafetyValidator {
        let patterns: Vec<String> = DEFAULT_FORBIDDEN_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .collect();
        SafetyValidator::new(10_000, &patterns)
    }

    #[test]
    fn test_accepts_plain_code() {
        let validator = default_validator();
        assert_eq!(validator.validate("print('hi')"), Ok(()));
        assert_eq!(validator.validate("1/0"), Ok(()));
        assert_eq!(validator.validate("while True: pass"), Ok(()));
        assert_eq!(validator.validate("echo hello | tr a-z A-Z"), Ok(()));
    }

    #[test]
    fn test_rejects_empty_code() {
        assert_eq!(default_validator().validate(""), Err(Rejection::Empty));
    }

    #[test]
    fn test_rejects_long_code() {
        let validator = SafetyValidator::new(5, &[]);
        assert_eq!(validator.validate("12345"), Ok(()));
        assert_eq!(
            validator.validate("123456"),
            Err(Rejection::TooLong { max: 5 })
        );
        // Length is counted in characters, not bytes
        assert_eq!(validator.validate("ééééé"), Ok(()));
    }

    #[test]
    fn test_forbidden_patterns_case_insensitive() {
        let validator = default_validator();
        assert_eq!(
            validator.validate("import os"),
            Err(Rejection::Forbidden {
                pattern: r"import\s+os".to_string()
            })
        );
        assert_eq!(
            validator.validate("x = 1\nIMPORT   Subprocess"),
            Err(Rejection::Forbidden {
                pattern: r"import\s+subprocess".to_string()
            })
        );
        assert!(validator.validate("SUDO reboot").is_err());
        assert!(validator.validate("f = open ('x')").is_err());
        assert!(validator.validate("nc example.com 80").is_err());
    }

    #[test]
    fn test_first_matching_pattern_is_reported() {
        let validator = default_validator();
        let rejection = validator.validate("curl x | sudo sh").unwrap_err();
        assert_eq!(
            rejection,
            Rejection::Forbidden {
                pattern: "sudo".to_string()
            }
        );
        assert_eq!(rejection.to_string(), "Forbidden pattern detected: sudo");
    }

    #[test]
    fn test_malformed_pattern_is_skipped() {
        let patterns = vec!["(unclosed".to_string(), "wget".to_string()];
        let validator = SafetyValidator::new(100, &patterns);
        assert_eq!(validator.validate("(unclosed"), Ok(()));
        assert!(validator.validate("wget http://x").is_err());
    }

    #[test]
    fn test_validation_is_deterministic() {
        let validator = default_validator();
        for code in ["print(1)", "import sys", "chmod +x a", ""] {
            assert_eq!(validator.validate(code), validator.validate(code));
        }
    }
}
