use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "sniprun", version = "0.1", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand)]
pub enum CliCommand {
    /// Execute one snippet and print the result as JSON
    Run {
        /// Language of the snippet
        #[arg(long, short)]
        language: String,

        /// Snippet text given inline
        #[arg(long, conflicts_with = "file")]
        code: Option<String>,

        /// File holding the snippet, `-` for stdin
        file: Option<PathBuf>,

        /// Indent the JSON report
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
    /// List the supported language ids
    Languages,
    /// Check that every configured interpreter can be started
    Check,
}

impl CliArgs {
    /// Load the configuration from the given file, the user config dir, or the defaults
    pub fn to_config(&self) -> std::io::Result<Config> {
        match &self.config_path {
            Some(path) => Config::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    log::info!("Using configuration at {}", path.display());
                    Config::from_file(&path)
                }
                _ => Ok(Config::default()),
            },
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    use directories::ProjectDirs;

    ProjectDirs::from("", "", "sniprun").map(|dirs| dirs.config_dir().join("config.json"))
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub limits: LimitsConfig,
    pub languages: Vec<LanguageConfig>,
    pub forbidden_patterns: Vec<String>,
}

impl Config {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            languages: default_languages(),
            forbidden_patterns: DEFAULT_FORBIDDEN_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    /// Longest accepted snippet, in characters
    pub max_code_length: usize,
    /// Longest reported stream, in characters
    pub max_output_length: usize,
    #[serde(rename = "timeout_ms")]
    pub timeout: MilliSecond,
    #[serde(rename = "grace_period_ms")]
    pub grace_period: MilliSecond,
    /// Bytes kept per output stream while the program runs
    pub capture_limit: ByteSize,
    /// Directory for staged files, the OS temp dir when absent
    pub temp_dir: Option<PathBuf>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_code_length: 10_000,
            max_output_length: 4_000,
            timeout: MilliSecond(10_000),
            grace_period: MilliSecond(3_000),
            capture_limit: ByteSize(1024 * 1024),
            temp_dir: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl From<MilliSecond> for Duration {
    fn from(value: MilliSecond) -> Self {
        Duration::from_millis(value.0)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl From<ByteSize> for usize {
    fn from(value: ByteSize) -> Self {
        usize::try_from(value.0).unwrap_or(usize::MAX)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LanguageConfig {
    pub name: String,
    pub extension: String,
    pub command: Vec<String>,
}

impl LanguageConfig {
    fn new(name: &str, extension: &str, command: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            extension: extension.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn default_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig::new("python", ".py", &["python3"]),
        LanguageConfig::new("javascript", ".js", &["node"]),
        LanguageConfig::new("bash", ".sh", &["bash"]),
        LanguageConfig::new("shell", ".sh", &["bash"]),
    ]
}

pub const DEFAULT_FORBIDDEN_PATTERNS: &[&str] = &[
    r"import\s+os",
    r"import\s+subprocess",
    r"import\s+sys",
    r"__import__",
    r"eval\s*\(",
    r"exec\s*\(",
    r"open\s*\(",
    r"file\s*\(",
    r"input\s*\(",
    r"raw_input\s*\(",
    r"rm\s+-rf",
    r"sudo",
    r"chmod",
    r"chown",
    r"curl",
    r"wget",
    r"nc\s",
    r"netcat",
];
