use std::collections::HashSet;

use crate::config::LanguageConfig;
use crate::error::ConfigError;

/// How one language is staged and started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageProfile {
    pub id: String,
    pub file_extension: String,
    pub interpreter_command: Vec<String>,
}

impl LanguageProfile {
    /// Name of the interpreter binary, used in diagnostics
    pub fn interpreter(&self) -> &str {
        &self.interpreter_command[0]
    }
}

/// Immutable table of supported languages, in configuration order
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: Vec<LanguageProfile>,
}

impl LanguageRegistry {
    pub fn build(languages: &[LanguageConfig]) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut profiles = Vec::with_capacity(languages.len());

        for language in languages {
            let id = language.name.to_lowercase();
            if !seen.insert(id.clone()) {
                return Err(ConfigError::DuplicateLanguage(id));
            }
            if language.command.is_empty() || language.command[0].is_empty() {
                return Err(ConfigError::EmptyCommand(id));
            }
            profiles.push(LanguageProfile {
                id,
                file_extension: language.extension.clone(),
                interpreter_command: language.command.clone(),
            });
        }

        Ok(Self { profiles })
    }

    /// Exact lookup; callers lower-case the id first
    pub fn resolve(&self, language_id: &str) -> Option<&LanguageProfile> {
        self.profiles.iter().find(|p| p.id == language_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.id.as_str())
    }

    pub fn profiles(&self) -> &[LanguageProfile] {
        &self.profiles
    }

    /// Comma separated ids, as shown in "unsupported language" messages
    pub fn supported(&self) -> String {
        self.ids().collect::<Vec<_>>().join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn language(name: &str, command: &[&str]) -> LanguageConfig {
        LanguageConfig {
            name: name.to_string(),
            extension: ".txt".to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_resolve_default_languages() {
        let registry = LanguageRegistry::build(&Config::default().languages).unwrap();

        let python = registry.resolve("python").unwrap();
        assert_eq!(python.file_extension, ".py");
        assert_eq!(python.interpreter(), "python3");

        let bash = registry.resolve("bash").unwrap();
        let shell = registry.resolve("shell").unwrap();
        assert_eq!(bash.interpreter_command, shell.interpreter_command);

        assert!(registry.resolve("ruby").is_none());
        assert!(registry.resolve("Python").is_none());
        assert_eq!(registry.supported(), "python, javascript, bash, shell");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = LanguageRegistry::build(&[
            language("python", &["python3"]),
            language("Python", &["python"]),
        ]);
        assert_eq!(
            result.unwrap_err(),
            ConfigError::DuplicateLanguage("python".to_string())
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        let result = LanguageRegistry::build(&[language("lua", &[])]);
        assert_eq!(result.unwrap_err(), ConfigError::EmptyCommand("lua".to_string()));
    }
}
