use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: String,
    pub server_args: Vec<String>,
    pub workspace: String,
    pub document: String,
    pub language_id: String,
    pub line: u32,
    pub character: u32,
    pub timeout_secs: u64,
}

impl Config {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Parser, Debug)]
#[command(name = "lsp-probe")]
#[command(about = "Smoke-test an LSP server over stdio: handshake, open a document, request completion", long_about = None)]
pub struct Cli {
    /// Document to open and probe for completion
    #[arg(default_value = "test_lsp.grease")]
    pub document: String,

    /// Server executable to spawn
    #[arg(long, default_value = "grease")]
    pub server: String,

    /// Arguments passed to the server executable
    #[arg(long = "server-arg", value_name = "ARG", default_values_t = vec![String::from("lsp")])]
    pub server_args: Vec<String>,

    /// Workspace root path (or file:// URL) reported to the server
    #[arg(long)]
    pub workspace: Option<String>,

    /// Language id announced in didOpen
    #[arg(long, default_value = "grease")]
    pub language_id: String,

    /// Zero-based cursor line for the completion request
    #[arg(long, default_value_t = 0)]
    pub line: u32,

    /// Zero-based cursor column for the completion request
    #[arg(long, default_value_t = 4)]
    pub character: u32,

    /// Seconds to wait for each reply before reporting a timeout
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,
}

impl Cli {
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn into_config(self) -> Config {
        Config {
            server: self.server,
            server_args: self.server_args,
            workspace: self.workspace.unwrap_or_else(|| {
                std::env::current_dir()
                    .ok()
                    .and_then(|p| p.to_str().map(|s| s.to_string()))
                    .unwrap_or_else(|| String::from("."))
            }),
            document: self.document,
            language_id: self.language_id,
            line: self.line,
            character: self.character,
            timeout_secs: self.timeout_secs,
        }
    }
}
