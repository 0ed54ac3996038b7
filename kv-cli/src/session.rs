use std::io::BufRead;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use kvdb::db::{Database, OpenOptions, SetOptions};
use kvdb::encoding::{Base64Codec, DataCodec, EncodingEngine, EncodingFormat, HexCodec, JsonCodec};
use kvdb::key::KeyPart;
use kvdb::list::{ListOptions, Selector};
use kvdb::row::rows::ServerStats;
use kvdb::storage::log_cask::LogCask;
use kvdb::value::Value;
use rustyline::config::Builder;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Editor};
use tokio::time::Instant;
use tokio_stream::StreamExt;

use crate::config::ConfigLoad;
use crate::rusty::CliHelper;
use crate::show::Show;

const DEFAULT_PROMPT: &str = "kvdb";

fn key_from_token(token: &str) -> Vec<KeyPart> {
    vec![KeyPart::Text(token.to_string())]
}

/// Every REPL-supplied value is stored verbatim as a string, not parsed as
/// JSON: `ENCODE`/`DECODE` round-trip the exact bytes the user typed.
fn value_from_str(s: &str) -> Value {
    Value::Json(serde_json::Value::String(s.to_string()))
}

fn value_as_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::Json(serde_json::Value::String(s)) => s.clone().into_bytes(),
        Value::Json(other) => other.to_string().into_bytes(),
        Value::U64(n) => n.0.to_string().into_bytes(),
    }
}

fn encoding_engine() -> EncodingEngine {
    let mut engine = EncodingEngine::new(EncodingFormat::Base64);
    engine.register_codec(EncodingFormat::Base64, Box::new(Base64Codec::new()));
    engine.register_codec(EncodingFormat::Hex, Box::new(HexCodec::new()));
    engine.register_codec(EncodingFormat::Json, Box::new(JsonCodec::new()));
    engine
}

pub struct Session {
    is_repl: bool,
    quiet: bool,
    settings: ConfigLoad,
    query: String,
    in_comment_block: bool,
    keywords: Arc<Vec<String>>,
    running: Arc<AtomicBool>,
    db: Database<LogCask>,
    encoding: EncodingEngine,
}

impl Session {
    pub async fn try_new(settings: ConfigLoad, is_repl: bool, quiet: bool, running: Arc<AtomicBool>) -> Result<Self> {
        if is_repl && !quiet {
            println!("Welcome to kvdb.");
            println!();
        }

        let keywords = vec![
            "GET", "SET", "DEL", "DELETE", "LIST", "WATCH", "COMPACT", "CLEAR", "ENCODE", "DECODE", "STATUS", "exit",
            "quit",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let path = settings.get_storage_path();
        std::fs::create_dir_all(&path)?;
        let db = Database::open(&path, OpenOptions::default())?;

        Ok(Self {
            is_repl,
            quiet,
            settings,
            query: String::new(),
            in_comment_block: false,
            keywords: Arc::new(keywords),
            running,
            db,
            encoding: encoding_engine(),
        })
    }

    async fn prompt(&self) -> String {
        if !self.query.trim().is_empty() {
            format!("{} > ", DEFAULT_PROMPT)
        } else if let Some(prompt) = self.settings.prompt.as_ref() {
            format!("{} ", prompt.trim_end())
        } else {
            format!("{} > ", DEFAULT_PROMPT)
        }
    }

    pub async fn handle_repl(&mut self) {
        let config = Builder::new().completion_prompt_limit(5).completion_type(CompletionType::Circular).build();
        let mut rl = Editor::<CliHelper, DefaultHistory>::with_config(config).unwrap();

        rl.set_helper(Some(CliHelper::with_keywords(self.keywords.clone())));
        rl.load_history(&get_history_path()).ok();

        'outer: loop {
            match rl.readline(&self.prompt().await) {
                Ok(line) => {
                    let queries = self.append_query(&line);
                    for query in queries {
                        let _ = rl.add_history_entry(&query);

                        match self.handle_query(true, &query).await {
                            Ok(None) => break 'outer,
                            Ok(Some(_)) => {}
                            Err(e) => {
                                eprintln!("error: {}", e);
                                self.query.clear();
                                break;
                            }
                        }
                    }
                }
                Err(e) => match e {
                    ReadlineError::Io(err) => eprintln!("io err: {err}"),
                    ReadlineError::Interrupted => {
                        self.query.clear();
                        println!("^C");
                    }
                    ReadlineError::Eof => break,
                    _ => {}
                },
            }
        }

        println!("Bye~");
        let _ = rl.save_history(&get_history_path());
    }

    pub async fn handle_reader<R: BufRead>(&mut self, r: R) -> Result<()> {
        let start = Instant::now();
        let mut lines = r.lines();
        let mut stats: Option<ServerStats> = None;

        loop {
            match lines.next() {
                Some(Ok(line)) => {
                    let queries = self.append_query(&line);
                    for query in queries {
                        stats = self.handle_query(false, &query).await?;
                    }
                }
                Some(Err(e)) => return Err(anyhow!("read lines err: {}", e)),
                None => break,
            }
        }

        let query = self.query.trim().to_owned();
        if !query.is_empty() {
            self.query.clear();
            stats = self.handle_query(false, &query).await?;
        }

        if self.settings.show_stats.unwrap_or(false) {
            if let Some(mut stats) = stats {
                stats.normalize();
                println!("{:?}", stats);
            }
        }
        println!("{:.3}", start.elapsed().as_secs_f64());

        Ok(())
    }

    fn append_query(&mut self, line: &str) -> Vec<String> {
        let line = line.trim();
        if line.is_empty() {
            return vec![];
        }

        if self.query.is_empty()
            && (line.starts_with('.') || line == "exit" || line == "quit" || line.to_uppercase().starts_with("SET"))
        {
            return vec![line.to_owned()];
        }

        if let Some(false) = self.settings.multi_line {
            if line.starts_with("--") {
                return vec![];
            }
            return vec![line.to_owned()];
        }

        let queries = vec![line.to_owned()];
        self.query.clear();
        queries
    }

    async fn handle_query(&mut self, is_repl: bool, query: &str) -> Result<Option<ServerStats>> {
        let query = query.trim_end_matches(';').trim();
        if is_repl && (query == "exit" || query == "quit") {
            return Ok(None);
        }
        if query.is_empty() {
            return Ok(Some(ServerStats::default()));
        }

        if is_repl && query.starts_with('.') {
            let parts = query.trim_start_matches('.').split_whitespace().collect::<Vec<_>>();
            if parts.len() != 2 {
                return Err(anyhow!("Control command error, must be syntax of `.cmd_name cmd_value`."));
            }
            self.settings.inject_cmd(parts[0], parts[1])?;
            return Ok(Some(ServerStats::default()));
        }

        let show = Show::new(self.settings.is_show_affected(), is_repl);
        let tokens: Vec<&str> = query.split_whitespace().collect();
        let verb = tokens.first().copied().unwrap_or_default().to_uppercase();
        let mut stats = ServerStats::default();

        match verb.as_str() {
            "GET" => {
                let key = tokens.get(1).ok_or_else(|| anyhow!("GET requires a key"))?;
                let entry = self.db.get(&key_from_token(key))?;
                stats.read_rows = 1;
                match entry.value {
                    Some(v) => println!("{}", serde_json::to_string(&v_to_json(&v))?),
                    None => println!("(nil)"),
                }
            }
            "SET" => {
                if tokens.len() < 3 {
                    return Err(anyhow!("SET requires a key and a value"));
                }
                let key = tokens[1];
                let value_tokens = &tokens[2..];
                let (value_str, expire_in_ms) = split_expire(value_tokens);
                let versionstamp =
                    self.db.set(key_from_token(key), value_from_str(&value_str), SetOptions { expire_in_ms })?;
                stats.write_rows = 1;
                println!("OK {}", versionstamp);
            }
            "DEL" | "DELETE" => {
                let key = tokens.get(1).ok_or_else(|| anyhow!("{} requires a key", verb))?;
                self.db.delete(key_from_token(key))?;
                stats.write_rows = 1;
                println!("OK ~");
            }
            "LIST" => {
                let prefix = match tokens.get(1) {
                    Some(p) if !p.eq_ignore_ascii_case("LIMIT") => key_from_token(p),
                    _ => Vec::new(),
                };
                let limit = parse_named_usize(&tokens, "LIMIT");
                let opts = ListOptions { limit, ..ListOptions::default() };
                let mut count = 0usize;
                for entry in self.db.list(Selector::Prefix { prefix }, opts)? {
                    let entry = entry?;
                    println!("{:?} => {}", entry.key, serde_json::to_string(&v_to_json(&entry.value))?);
                    count += 1;
                }
                stats.read_rows = count;
            }
            "WATCH" => {
                let key = tokens.get(1).ok_or_else(|| anyhow!("WATCH requires a key"))?;
                let count = tokens.get(2).and_then(|s| s.parse::<usize>().ok()).unwrap_or(1);
                let (mut stream, _handle) = self.db.watch(vec![key_from_token(key)])?;
                let mut seen = 0usize;
                while seen < count && self.running.load(std::sync::atomic::Ordering::SeqCst) {
                    match stream.next().await {
                        Some(snapshot) => {
                            for entry in snapshot {
                                println!("{:?} => {:?}", entry.key, entry.value.map(|v| v_to_json(&v)));
                            }
                            seen += 1;
                        }
                        None => break,
                    }
                }
                stats.read_rows = seen;
            }
            "COMPACT" => {
                self.db.compact()?;
                println!("OK ~");
            }
            "CLEAR" => {
                self.db.clear()?;
                println!("OK ~");
            }
            "ENCODE" => {
                let key = tokens.get(1).ok_or_else(|| anyhow!("ENCODE requires a key"))?;
                let format_token = tokens.get(2).ok_or_else(|| anyhow!("ENCODE requires a format"))?;
                let format: EncodingFormat = format_token.parse()?;
                let entry = self.db.get(&key_from_token(key))?;
                let value = entry.value.ok_or_else(|| anyhow!("no such key: {}", key))?;
                let encoded = self.encoding.encode(&value_as_bytes(&value), format)?;
                stats.read_rows = 1;
                println!("{}", encoded);
            }
            "DECODE" => {
                let key = tokens.get(1).ok_or_else(|| anyhow!("DECODE requires a key"))?;
                let entry = self.db.get(&key_from_token(key))?;
                let value = entry.value.ok_or_else(|| anyhow!("no such key: {}", key))?;
                let raw = value_as_bytes(&value);
                let encoded = String::from_utf8_lossy(&raw).to_string();
                let format = match tokens.get(2) {
                    Some(f) => f.parse::<EncodingFormat>()?,
                    None => self
                        .encoding
                        .detect(&encoded)
                        .first()
                        .map(|(f, _)| *f)
                        .ok_or_else(|| anyhow!("could not detect encoding for {}", key))?,
                };
                let decoded = self.encoding.decode(&encoded, format)?;
                stats.read_rows = 1;
                println!("{}", String::from_utf8_lossy(&decoded));
            }
            "STATUS" => {
                let status = self.db.status()?;
                stats.read_rows = 1;
                println!("keys={} size={}", status.keys, status.size);
            }
            _ => return Err(anyhow!("unknown command: {}", verb)),
        }

        show.output(stats.write_rows as i64 + stats.read_rows as i64);
        Ok(Some(stats))
    }
}

fn v_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Json(v) => v.clone(),
        Value::U64(n) => serde_json::json!(n.0),
    }
}

fn split_expire(tokens: &[&str]) -> (String, Option<i64>) {
    if tokens.len() >= 3 && tokens[tokens.len() - 2].eq_ignore_ascii_case("EX") {
        let ms = tokens[tokens.len() - 1].parse::<i64>().ok();
        let value = tokens[..tokens.len() - 2].join(" ");
        (value, ms)
    } else {
        (tokens.join(" "), None)
    }
}

fn parse_named_usize(tokens: &[&str], name: &str) -> Option<usize> {
    tokens.iter().position(|t| t.eq_ignore_ascii_case(name)).and_then(|i| tokens.get(i + 1)).and_then(|v| v.parse().ok())
}

fn get_history_path() -> String {
    format!("{}/.kvdb_history", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}
