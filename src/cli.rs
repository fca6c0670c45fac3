// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Command-line options and their mapping onto [`SyncConfig`].
//!
//! Flags override values from `--config`. Without a config file every
//! mandatory option must be given as a flag.

use clap::Parser;
use index_sync::config::{
    IndexConfig, InsertAction, RetrySettings, SourceConfig, SyncConfig, TransformConfig, WriteMode,
};
use index_sync::{Result, SyncError};
use std::path::PathBuf;

/// Resumable one-way bulk sync from MongoDB into Elasticsearch.
#[derive(Debug, Parser)]
#[command(name = "index-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML config file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Source connection string
    #[arg(long)]
    pub source_uri: Option<String>,

    /// Source database name
    #[arg(long)]
    pub source_db: Option<String>,

    /// Source collection name
    #[arg(long)]
    pub source_collection: Option<String>,

    /// Documents per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Comma-separated fields to fetch
    #[arg(long)]
    pub fields: Option<String>,

    /// Source query as (extended) JSON
    #[arg(long)]
    pub query: Option<String>,

    /// Resume after this source id
    #[arg(long)]
    pub start_after: Option<String>,

    /// Lua script defining transform(doc)
    #[arg(long)]
    pub transform: Option<PathBuf>,

    /// Index store base URL
    #[arg(long)]
    pub index_url: Option<String>,

    /// Target index
    #[arg(long)]
    pub index_name: Option<String>,

    /// Mapping type (stores older than 7.x only)
    #[arg(long)]
    pub index_type: Option<String>,

    /// Index store user
    #[arg(long)]
    pub index_user: Option<String>,

    /// Index store password
    #[arg(long, env = "INDEX_SYNC_INDEX_PASSWORD", hide_env_values = true)]
    pub index_password: Option<String>,

    /// Insert mode: source field used as the index document id
    #[arg(long)]
    pub doc_id_field: Option<String>,

    /// Insert mode bulk action (index, create)
    #[arg(long)]
    pub action: Option<String>,

    /// Update mode: FIELD to look up by, or FIELD,true when it is the index id
    #[arg(long)]
    pub update_key: Option<String>,

    /// Cap on concurrent lookups in update mode
    #[arg(long)]
    pub lookup_concurrency: Option<usize>,

    /// Give up after this many attempts (default: retry forever)
    #[arg(long)]
    pub max_retries: Option<usize>,

    /// Delay between attempts (e.g. 500ms, 2s)
    #[arg(long)]
    pub retry_delay: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Merge the config file (if any) with the flags and validate.
    pub fn to_config(&self) -> Result<SyncConfig> {
        let base = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    SyncError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Some(SyncConfig::from_toml_str(&text)?)
            }
            None => None,
        };
        let file_write = base.as_ref().map(|c| c.write.clone());
        let mut config = base.unwrap_or_else(blank_config);

        let source = &mut config.source;
        override_with(&mut source.uri, &self.source_uri);
        override_with(&mut source.database, &self.source_db);
        override_with(&mut source.collection, &self.source_collection);
        if let Some(n) = self.batch_size {
            source.batch_size = n;
        }
        if let Some(fields) = &self.fields {
            source.fields = Some(split_fields(fields));
        }
        if let Some(query) = &self.query {
            let parsed = serde_json::from_str(query)
                .map_err(|e| SyncError::Config(format!("invalid --query: {}", e)))?;
            source.query = Some(parsed);
        }
        if self.start_after.is_some() {
            source.start_after = self.start_after.clone();
        }

        let index = &mut config.index;
        override_with(&mut index.url, &self.index_url);
        override_with(&mut index.index, &self.index_name);
        if self.index_type.is_some() {
            index.doc_type = self.index_type.clone();
        }
        if self.index_user.is_some() {
            index.username = self.index_user.clone();
        }
        if self.index_password.is_some() {
            index.password = self.index_password.clone();
        }

        if self.transform.is_some() {
            config.transform.script = self.transform.clone();
        }
        if self.max_retries.is_some() {
            config.retry.max_attempts = self.max_retries;
        }
        if let Some(delay) = &self.retry_delay {
            config.retry.initial_delay = delay.clone();
        }

        config.write = self.write_mode(file_write)?;
        config.validate()?;
        Ok(config)
    }

    fn write_mode(&self, from_file: Option<WriteMode>) -> Result<WriteMode> {
        let action = self.action.as_deref().map(str::parse::<InsertAction>).transpose()?;

        let mut mode = if let Some(raw) = &self.update_key {
            let (field, key_is_id) = parse_update_key(raw)?;
            WriteMode::update(field, key_is_id)
        } else if let Some(field) = &self.doc_id_field {
            WriteMode::Insert {
                id_field: field.clone(),
                action: action.unwrap_or_default(),
            }
        } else if let Some(mode) = from_file {
            mode
        } else {
            return Err(SyncError::Config(
                "missing mandatory option: --doc-id-field or --update-key".into(),
            ));
        };

        if action.is_some() && !matches!(mode, WriteMode::Insert { .. }) {
            return Err(SyncError::Config(
                "--action applies to insert mode only".into(),
            ));
        }

        match &mut mode {
            WriteMode::Insert { action: current, .. } => {
                if let Some(action) = action {
                    *current = action;
                }
            }
            WriteMode::LookupUpdate { concurrency, .. } => {
                if self.lookup_concurrency.is_some() {
                    *concurrency = self.lookup_concurrency;
                }
            }
            WriteMode::DirectUpdate { .. } => {}
        }
        Ok(mode)
    }
}

fn blank_config() -> SyncConfig {
    SyncConfig {
        source: SourceConfig {
            uri: String::new(),
            database: String::new(),
            collection: String::new(),
            batch_size: 100,
            fields: None,
            query: None,
            start_after: None,
        },
        index: IndexConfig {
            url: String::new(),
            index: String::new(),
            doc_type: None,
            username: None,
            password: None,
            request_timeout: "60s".to_string(),
        },
        write: WriteMode::insert(""),
        transform: TransformConfig::default(),
        retry: RetrySettings::default(),
    }
}

fn override_with(target: &mut String, value: &Option<String>) {
    if let Some(v) = value {
        *target = v.clone();
    }
}

fn split_fields(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

/// `FIELD` or `FIELD,true|false`.
pub fn parse_update_key(raw: &str) -> Result<(String, bool)> {
    let mut parts = raw.splitn(2, ',');
    let field = parts.next().unwrap_or_default().trim();
    if field.is_empty() {
        return Err(SyncError::Config(format!("invalid --update-key {:?}", raw)));
    }
    let key_is_id = match parts.next().map(|s| s.trim().to_ascii_lowercase()) {
        None => false,
        Some(flag) if flag == "true" => true,
        Some(flag) if flag == "false" => false,
        Some(flag) => {
            return Err(SyncError::Config(format!(
                "invalid --update-key flag {:?} (expected true or false)",
                flag
            )))
        }
    };
    Ok((field.to_string(), key_is_id))
}
