//! Worker configuration from environment variables and AWS Secrets Manager

use std::env;
use std::str::FromStr;

use aws_sdk_secretsmanager::Client as SecretsClient;
use tracing::{info, warn};

use crate::analyzer::{AnalysisOptions, DEFAULT_FLASHCARD_MIN_GAIN_CP};
use crate::classify::{
    Thresholds, DEFAULT_BLUNDER_CP, DEFAULT_INACCURACY_CP, DEFAULT_MISTAKE_CP,
};
use crate::engine::{SearchLimits, DEFAULT_DEPTH};
use crate::error::WorkerError;
use crate::pool::DEFAULT_POOL_SIZE;

const DEFAULT_ENGINE_PATH: &str = "/usr/local/bin/stockfish";

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// SQS queue URL for analysis jobs (only required in queue mode)
    pub sqs_queue_url: Option<String>,

    /// Custom SQS endpoint URL (for LocalStack)
    pub sqs_endpoint_url: Option<String>,

    /// Path to the UCI engine binary
    pub engine_path: String,

    /// Number of engine processes in the pool
    pub pool_size: usize,

    pub analysis: AnalysisOptions,

    /// Consecutive empty SQS receives before exiting
    pub max_empty_receives: u32,

    /// SQS visibility timeout in seconds
    pub visibility_timeout_secs: u32,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, WorkerError> {
        let engine_path = env::var("ENGINE_PATH")
            .or_else(|_| env::var("STOCKFISH_PATH"))
            .unwrap_or_else(|_| DEFAULT_ENGINE_PATH.to_string());

        let pool_size = pool_size_from(env::var("ENGINE_POOL_SIZE").ok().as_deref());

        let depth = parse_or("ANALYSIS_DEPTH", DEFAULT_DEPTH);
        let movetime_ms = env::var("ANALYSIS_MOVETIME_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0);

        let thresholds = Thresholds {
            blunder: parse_or("BLUNDER_THRESHOLD_CP", DEFAULT_BLUNDER_CP),
            mistake: parse_or("MISTAKE_THRESHOLD_CP", DEFAULT_MISTAKE_CP),
            inaccuracy: parse_or("INACCURACY_THRESHOLD_CP", DEFAULT_INACCURACY_CP),
        };
        validate_thresholds(&thresholds)?;

        let analysis = AnalysisOptions {
            limits: SearchLimits::new(depth, movetime_ms),
            thresholds,
            flashcard_min_gain_cp: parse_or("FLASHCARD_MIN_GAIN_CP", DEFAULT_FLASHCARD_MIN_GAIN_CP),
        };

        Ok(Self {
            sqs_queue_url: env::var("SQS_QUEUE_URL").ok(),
            sqs_endpoint_url: env::var("SQS_ENDPOINT_URL").ok(),
            engine_path,
            pool_size,
            analysis,
            max_empty_receives: parse_or("MAX_EMPTY_RECEIVES", 5),
            visibility_timeout_secs: parse_or("VISIBILITY_TIMEOUT_SECS", 300),
        })
    }

    pub fn require_queue_url(&self) -> Result<&str, WorkerError> {
        self.sqs_queue_url
            .as_deref()
            .ok_or(WorkerError::Config("SQS_QUEUE_URL not set"))
    }
}

/// Resolve the database URL. In production it comes from Secrets Manager.
pub async fn database_url() -> Result<String, WorkerError> {
    if env::var("LOCAL_DEV").is_ok() {
        info!("Local dev mode: using DATABASE_URL from environment");
        return env::var("DATABASE_URL")
            .map_err(|_| WorkerError::Config("DATABASE_URL not set (LOCAL_DEV mode)"));
    }

    let secret_arn =
        env::var("DB_SECRET_ARN").map_err(|_| WorkerError::Config("DB_SECRET_ARN not set"))?;

    info!(secret_arn = %secret_arn, "Fetching database URL from Secrets Manager");
    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let client = SecretsClient::new(&config);

    let response = client
        .get_secret_value()
        .secret_id(&secret_arn)
        .send()
        .await
        .map_err(|e| WorkerError::SecretsManager(e.to_string()))?;

    let secret = response
        .secret_string()
        .ok_or_else(|| WorkerError::SecretsManager("Secret has no string value".into()))?;

    database_url_from_secret(secret)
}

/// A secret is either a plain connection string or an RDS-style JSON object.
fn database_url_from_secret(secret: &str) -> Result<String, WorkerError> {
    if secret.starts_with("postgresql://") || secret.starts_with("postgres://") {
        return Ok(secret.to_string());
    }

    let value: serde_json::Value = serde_json::from_str(secret)
        .map_err(|e| WorkerError::SecretsManager(format!("Failed to parse secret JSON: {e}")))?;

    if let Some(url) = value.get("url").or(value.get("DATABASE_URL")) {
        return url
            .as_str()
            .map(String::from)
            .ok_or_else(|| WorkerError::SecretsManager("Database URL is not a string".into()));
    }

    let field = |name: &'static str| {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| WorkerError::SecretsManager(format!("Missing '{name}' in secret")))
    };
    let host = field("host")?;
    let username = field("username")?;
    let password = field("password")?;
    let database = field("dbname").or_else(|_| field("database"))?;
    let port = value.get("port").and_then(|v| v.as_u64()).unwrap_or(5432);

    Ok(format!(
        "postgresql://{username}:{password}@{host}:{port}/{database}"
    ))
}

/// Pool size from `ENGINE_POOL_SIZE`. Unset means one engine per CPU; a
/// non-positive or unparsable value falls back to the default of two.
pub fn pool_size_from(raw: Option<&str>) -> usize {
    match raw {
        None => num_cpus::get().max(1),
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(n) if n > 0 => n as usize,
            _ => {
                warn!(value = raw, "Invalid ENGINE_POOL_SIZE, using default");
                DEFAULT_POOL_SIZE
            }
        },
    }
}

fn validate_thresholds(t: &Thresholds) -> Result<(), WorkerError> {
    if t.inaccuracy <= t.mistake && t.mistake <= t.blunder {
        Ok(())
    } else {
        Err(WorkerError::Config(
            "classification thresholds must satisfy inaccuracy <= mistake <= blunder",
        ))
    }
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
