use clap::Subcommand;

/// The various kinds of commands that can be run directly from the
/// command line instead of the REPL, e.g. `kvdb get foo`.
#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Fetch a single key.
    Get { key: String },

    /// Write a key/value pair, optionally with a TTL in milliseconds.
    Set {
        key: String,
        value: String,
        #[clap(long = "expire-in-ms")]
        expire_in_ms: Option<i64>,
    },

    /// Remove a key.
    Delete { key: String },

    /// List keys under a prefix.
    List {
        prefix: Option<String>,
        #[clap(long)]
        limit: Option<usize>,
    },

    /// Compact the on-disk log.
    Compact,
}

impl Default for Command {
    fn default() -> Self {
        Command::List { prefix: None, limit: None }
    }
}

/// Renders a [`Command`] as the equivalent REPL query line, so direct CLI
/// invocation and the REPL share one dispatch path in `Session`.
pub fn as_query_line(command: &Command) -> String {
    match command {
        Command::Get { key } => format!("GET {}", key),
        Command::Set { key, value, expire_in_ms } => match expire_in_ms {
            Some(ms) => format!("SET {} {} EX {}", key, value, ms),
            None => format!("SET {} {}", key, value),
        },
        Command::Delete { key } => format!("DELETE {}", key),
        Command::List { prefix, limit } => {
            let mut line = "LIST".to_string();
            if let Some(p) = prefix {
                line.push(' ');
                line.push_str(p);
            }
            if let Some(l) = limit {
                line.push_str(&format!(" LIMIT {}", l));
            }
            line
        }
        Command::Compact => "COMPACT".to_string(),
    }
}
