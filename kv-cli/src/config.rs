use std::path::PathBuf;

use anyhow::{anyhow, Result};
use kvdb::encoding::EncodingFormat;
use serde_derive::{Deserialize, Serialize};

const DEFAULT_STORAGE_PATH: &str = "storage/kvdb";
pub const DEFAULT_PROMPT: &str = "kvdb";
pub const DEFAULT_DB_NAME: &str = "kvdb";
const MAX_BATCH_SIZE: usize = 10_000;

/// Display preferences for `ENCODE`/`DECODE`/`SHOW ENCODINGS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingConfig {
    pub default_format: String,
    pub auto_detect: bool,
    pub batch_size: usize,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self { default_format: "base64".to_string(), auto_detect: true, batch_size: 100 }
    }
}

impl EncodingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(anyhow!("batch_size must be between 1 and {}", MAX_BATCH_SIZE));
        }
        self.default_format.parse::<EncodingFormat>()?;
        Ok(())
    }

    pub fn get_default_format(&self) -> Result<EncodingFormat> {
        Ok(self.default_format.parse::<EncodingFormat>()?)
    }

    pub fn set_default_format(&mut self, format: EncodingFormat) {
        self.default_format = format.to_string();
    }
}

/// load configration
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CliConfig {
    /// Show rows affected
    show_affected: Option<bool>,

    /// progress
    pub progress_color: Option<String>,

    /// Show progress [bar] when executing queries.
    pub show_progress: Option<bool>,
}

impl Default for CliConfig {
    fn default() -> Self {
        CliConfig { show_affected: Some(false), progress_color: None, show_progress: Some(false) }
    }
}

impl CliConfig {
    pub fn is_show_affected(&self) -> Option<&bool> {
        self.show_affected.as_ref()
    }

    pub fn set_show_affected(&mut self, show_affected: bool) {
        self.show_affected = Some(show_affected);
    }

    pub fn set_show_progress(&mut self, show_progress: bool) {
        self.show_progress = Some(show_progress);
    }
}

/// load configration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLoad {
    version: u8,

    /// load config path, default '${pwd}/storage/kvdb'
    storage_path: Option<PathBuf>,

    /// prompt
    pub prompt: Option<String>,

    /// Show stats after executing queries.  Only works with non-interactive mode.
    pub show_stats: Option<bool>,

    /// fix part cmd options. default false
    auto_append_part_cmd: Option<bool>,
    /// Division symbol
    auto_append_part_cmd_symbol: Option<char>,

    /// Multi line mode, default is true.
    pub multi_line: Option<bool>,

    /// whether replace '\n' with '\\n', default true.
    pub replace_newline: Option<bool>,

    cli: Option<CliConfig>,

    /// `ENCODE`/`DECODE`/`SHOW ENCODINGS` display preferences.
    pub encoding: Option<EncodingConfig>,
}

impl Default for ConfigLoad {
    fn default() -> Self {
        ConfigLoad {
            version: 0,
            storage_path: None,
            prompt: Some(DEFAULT_PROMPT.to_string()),
            show_stats: Some(false),
            auto_append_part_cmd: Some(false),
            auto_append_part_cmd_symbol: Some(';'),
            multi_line: Some(true),
            replace_newline: Some(true),
            cli: Some(CliConfig::default()),
            encoding: Some(EncodingConfig::default()),
        }
    }
}

impl ConfigLoad {
    pub fn new(path: &str) -> Result<Self> {
        confy::load_path(path).map_err(|e| anyhow!("failed to load config at {}: {}", path, e))
    }

    pub fn is_show_affected(&self) -> bool {
        self.cli.as_ref().and_then(|c| c.is_show_affected()).copied().unwrap_or(false)
    }

    /// load config path
    pub fn get_storage_path(&self) -> PathBuf {
        self.storage_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_PATH))
    }

    pub fn set_storage_path(&mut self, path: PathBuf) {
        self.storage_path = Some(path);
    }

    /// fix part cmd options. default false
    pub fn get_auto_append_part_cmd(&self) -> bool {
        self.auto_append_part_cmd.unwrap_or(false)
    }

    /// Division symbol
    pub fn get_auto_append_part_cmd_symbol(&self) -> char {
        self.auto_append_part_cmd_symbol.unwrap_or(';')
    }

    pub fn terminal_update(&mut self) {
        self.set_show_progress(true);
        self.show_stats = Some(true);
    }

    pub fn fix_settings(&mut self) {
        let path = self.storage_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_PATH));
        self.storage_path = Some(path.join(DEFAULT_DB_NAME));
    }

    fn set_show_progress(&mut self, v: bool) {
        self.cli.get_or_insert_with(CliConfig::default).set_show_progress(v);
    }

    fn set_show_affected(&mut self, v: bool) {
        self.cli.get_or_insert_with(CliConfig::default).set_show_affected(v);
    }

    pub fn get_encoding_config(&self) -> EncodingConfig {
        self.encoding.clone().unwrap_or_default()
    }

    pub fn set_encoding_config(&mut self, cfg: EncodingConfig) {
        self.encoding = Some(cfg);
    }

    pub fn get_default_encoding_format(&self) -> Result<EncodingFormat> {
        self.get_encoding_config().get_default_format()
    }

    pub fn set_default_encoding_format(&mut self, format: EncodingFormat) {
        let mut cfg = self.get_encoding_config();
        cfg.set_default_format(format);
        self.encoding = Some(cfg);
    }

    pub fn is_auto_detect_enabled(&self) -> bool {
        self.get_encoding_config().auto_detect
    }

    pub fn set_auto_detect(&mut self, v: bool) {
        let mut cfg = self.get_encoding_config();
        cfg.auto_detect = v;
        self.encoding = Some(cfg);
    }

    pub fn get_batch_size(&self) -> usize {
        self.get_encoding_config().batch_size
    }

    pub fn set_batch_size(&mut self, size: usize) -> Result<()> {
        if size == 0 || size > MAX_BATCH_SIZE {
            return Err(anyhow!("batch_size must be between 1 and {}", MAX_BATCH_SIZE));
        }
        let mut cfg = self.get_encoding_config();
        cfg.batch_size = size;
        self.encoding = Some(cfg);
        Ok(())
    }

    pub fn validate_encoding_config(&self) -> Result<()> {
        self.get_encoding_config().validate()
    }

    /// change cmd:
    /// show_progress、show_affected、show_stats、auto_append_part_cmd、
    /// auto_append_part_cmd_symbol、multi_line、replace_newline、
    /// default_encoding_format、auto_detect、batch_size
    pub fn inject_cmd(&mut self, cmd_name: &str, cmd_value: &str) -> Result<()> {
        match cmd_name {
            "show_progress" => self.set_show_progress(cmd_value.parse()?),
            "show_affected" => self.set_show_affected(cmd_value.parse()?),
            "show_stats" => self.show_stats = Some(cmd_value.parse()?),
            "auto_append_part_cmd" => self.auto_append_part_cmd = Some(cmd_value.parse()?),
            "auto_append_part_cmd_symbol" => self.auto_append_part_cmd_symbol = Some(cmd_value.parse()?),
            "multi_line" => self.multi_line = Some(cmd_value.parse()?),
            "replace_newline" => self.replace_newline = Some(cmd_value.parse()?),
            "default_encoding_format" => self.set_default_encoding_format(cmd_value.parse::<EncodingFormat>()?),
            "auto_detect" => self.set_auto_detect(cmd_value.parse()?),
            "batch_size" => self.set_batch_size(cmd_value.parse()?)?,
            _ => return Err(anyhow!("Unknown command: {}", cmd_name)),
        }
        Ok(())
    }
}
