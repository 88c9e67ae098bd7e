use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::stage::RetryPolicy;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub ingest: IngestConfig,
    pub pipeline: PipelineConfig,
    pub schedule: ScheduleConfig,
    pub enrich: EnrichConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub data_root: String,
    pub manifest_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub max_attempts: u32,
    pub backoff_delay_secs: u64,
    pub scrape_command: Vec<String>,
    pub transform_command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds-first cron expression
    pub cron: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    pub detector_command: Vec<String>,
    pub image_root: String,
    pub output_csv: Option<String>,
    pub subject_classes: Vec<String>,
    pub product_classes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub bind_address: String,
    pub default_limit: u32,
    /// Default for message search, which returns more rows than the reports
    pub search_default_limit: u32,
    pub max_limit: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/warehouse.db".to_string(),
                max_connections: 4,
                busy_timeout_secs: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            ingest: IngestConfig {
                data_root: "data/raw/telegram_messages".to_string(),
                manifest_suffix: "_manifest.json".to_string(),
            },
            pipeline: PipelineConfig {
                max_attempts: 3,
                backoff_delay_secs: 60,
                scrape_command: vec!["python".to_string(), "scripts/telegram.py".to_string()],
                transform_command: vec![
                    "dbt".to_string(),
                    "run".to_string(),
                    "--project-dir".to_string(),
                    "medical_warehouse".to_string(),
                ],
            },
            schedule: ScheduleConfig {
                cron: "0 0 2 * * *".to_string(),
                enabled: true,
            },
            enrich: EnrichConfig {
                detector_command: vec!["python".to_string(), "src/yolo_detect.py".to_string()],
                image_root: "data/raw/images".to_string(),
                output_csv: Some("data/enriched/yolo_detections.csv".to_string()),
                subject_classes: vec!["person".to_string()],
                product_classes: vec!["bottle".to_string(), "cup".to_string()],
            },
            api: ApiConfig {
                bind_address: "127.0.0.1:8000".to_string(),
                default_limit: 10,
                search_default_limit: 20,
                max_limit: 500,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&Self::default())?)
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("warehouse").required(false))
            // Add environment variables with prefix, e.g. WAREHOUSE_DATABASE__URL
            .add_source(
                Environment::with_prefix("WAREHOUSE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate database config
        if self.database.url.trim().is_empty() {
            return Err(anyhow::anyhow!("database url cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        // Validate pipeline config
        if self.pipeline.max_attempts == 0 {
            return Err(anyhow::anyhow!("max_attempts must be greater than 0"));
        }
        if self.pipeline.scrape_command.is_empty() {
            return Err(anyhow::anyhow!("scrape_command cannot be empty"));
        }
        if self.pipeline.transform_command.is_empty() {
            return Err(anyhow::anyhow!("transform_command cannot be empty"));
        }

        // Validate schedule
        if let Err(e) = cron::Schedule::from_str(&self.schedule.cron) {
            return Err(anyhow::anyhow!("Invalid cron expression {:?}: {}", self.schedule.cron, e));
        }

        // Validate enrichment config
        if self.enrich.detector_command.is_empty() {
            return Err(anyhow::anyhow!("detector_command cannot be empty"));
        }
        if self.enrich.subject_classes.is_empty() || self.enrich.product_classes.is_empty() {
            return Err(anyhow::anyhow!("subject_classes and product_classes cannot be empty"));
        }

        // Validate API config
        if self.api.max_limit == 0 {
            return Err(anyhow::anyhow!("max_limit must be greater than 0"));
        }
        for (name, limit) in [
            ("default_limit", self.api.default_limit),
            ("search_default_limit", self.api.search_default_limit),
        ] {
            if limit == 0 || limit > self.api.max_limit {
                return Err(anyhow::anyhow!(
                    "{name} must be between 1 and max_limit ({})",
                    self.api.max_limit
                ));
            }
        }

        Ok(())
    }

    /// Get database URL from environment or config
    pub fn get_database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }

    /// Retry policy shared by every stage
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.pipeline.max_attempts,
            backoff_delay: Duration::from_secs(self.pipeline.backoff_delay_secs),
        }
    }

    pub fn data_root(&self) -> PathBuf {
        PathBuf::from(&self.ingest.data_root)
    }
}
