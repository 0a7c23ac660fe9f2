use std::env;
use std::fmt::Display;
use std::str::FromStr;

use permsync_application::ResourcePermissionOptions;
use permsync_core::{AppError, AppResult};
use permsync_infrastructure::HttpTupleWriterConfig;
use tracing_subscriber::EnvFilter;

const WRITE_RETRY_BACKOFF_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    Run,
    Migrate,
    FullSync,
}

impl WorkerMode {
    fn parse(argument: Option<&str>) -> AppResult<Self> {
        match argument {
            None | Some("run") => Ok(Self::Run),
            Some("migrate") => Ok(Self::Migrate),
            Some("full-sync") => Ok(Self::FullSync),
            Some(other) => Err(AppError::Validation(format!(
                "unknown worker mode '{other}', expected 'run', 'migrate' or 'full-sync'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub mode: WorkerMode,
    pub database_url: String,
    pub tuple_writer: HttpTupleWriterConfig,
    pub http_timeout_ms: u64,
    pub options: ResourcePermissionOptions,
    pub reconcile_interval_ms: u64,
    pub reconcile_batch_size: usize,
    pub full_sync_interval_secs: u64,
}

impl WorkerConfig {
    pub fn load() -> AppResult<Self> {
        let argument = env::args().nth(1);
        Self::from_lookup(argument.as_deref(), |name| env::var(name).ok())
    }

    fn from_lookup(
        argument: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> AppResult<Self> {
        let mode = WorkerMode::parse(argument)?;
        let database_url = required(&lookup, "DATABASE_URL")?;

        let api_url = required(&lookup, "OPENFGA_API_URL")?;
        let parsed_api_url = url::Url::parse(&api_url).map_err(|error| {
            AppError::Validation(format!("invalid OPENFGA_API_URL '{api_url}': {error}"))
        })?;
        if !matches!(parsed_api_url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "OPENFGA_API_URL must use http or https, got '{}'",
                parsed_api_url.scheme()
            )));
        }

        let tuple_writer = HttpTupleWriterConfig {
            api_url,
            store_id: required(&lookup, "OPENFGA_STORE_ID")?,
            authorization_model_id: required(&lookup, "OPENFGA_AUTHORIZATION_MODEL_ID")?,
            api_token: lookup("OPENFGA_API_TOKEN").filter(|token| !token.trim().is_empty()),
            max_attempts: parsed(&lookup, "PERMSYNC_WRITE_MAX_ATTEMPTS", 3)?,
            retry_backoff_ms: WRITE_RETRY_BACKOFF_MS,
        };

        let options = ResourcePermissionOptions {
            action_sets_enabled: lookup("PERMSYNC_ACTION_SETS_ENABLED")
                .map(|value| value.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            max_sync_attempts: parsed(&lookup, "PERMSYNC_SYNC_MAX_ATTEMPTS", 10)?,
        };

        let http_timeout_ms = parsed(&lookup, "PERMSYNC_HTTP_TIMEOUT_MS", 10_000)?;
        let reconcile_interval_ms = parsed(&lookup, "PERMSYNC_RECONCILE_INTERVAL_MS", 5_000)?;
        let reconcile_batch_size = parsed(&lookup, "PERMSYNC_RECONCILE_BATCH_SIZE", 50)?;
        let full_sync_interval_secs = parsed(&lookup, "PERMSYNC_FULL_SYNC_INTERVAL_SECS", 3_600)?;

        if reconcile_interval_ms == 0 {
            return Err(AppError::Validation(
                "PERMSYNC_RECONCILE_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        if reconcile_batch_size == 0 {
            return Err(AppError::Validation(
                "PERMSYNC_RECONCILE_BATCH_SIZE must be greater than zero".to_owned(),
            ));
        }

        if options.max_sync_attempts <= 0 {
            return Err(AppError::Validation(
                "PERMSYNC_SYNC_MAX_ATTEMPTS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            mode,
            database_url,
            tuple_writer,
            http_timeout_ms,
            options,
            reconcile_interval_ms,
            reconcile_batch_size,
            full_sync_interval_secs,
        })
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> AppResult<String> {
    lookup(name)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{name} is required")))
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use permsync_core::AppError;

    use super::{WorkerConfig, WorkerMode};

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/permsync".to_owned()),
            ("OPENFGA_API_URL", "http://openfga:8080".to_owned()),
            ("OPENFGA_STORE_ID", "store-1".to_owned()),
            ("OPENFGA_AUTHORIZATION_MODEL_ID", "model-1".to_owned()),
        ])
    }

    fn load(
        argument: Option<&str>,
        vars: &HashMap<&'static str, String>,
    ) -> Result<WorkerConfig, AppError> {
        WorkerConfig::from_lookup(argument, |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_optional_values_are_missing() {
        let config = load(None, &base_env());
        assert!(config.is_ok());

        let Ok(config) = config else {
            return;
        };
        assert_eq!(config.mode, WorkerMode::Run);
        assert_eq!(config.reconcile_interval_ms, 5_000);
        assert_eq!(config.reconcile_batch_size, 50);
        assert_eq!(config.full_sync_interval_secs, 3_600);
        assert_eq!(config.http_timeout_ms, 10_000);
        assert_eq!(config.tuple_writer.max_attempts, 3);
        assert!(config.tuple_writer.api_token.is_none());
        assert!(config.options.action_sets_enabled);
        assert_eq!(config.options.max_sync_attempts, 10);
    }

    #[test]
    fn first_argument_selects_mode() {
        let vars = base_env();
        assert_eq!(
            load(Some("migrate"), &vars).map(|config| config.mode).ok(),
            Some(WorkerMode::Migrate)
        );
        assert_eq!(
            load(Some("full-sync"), &vars).map(|config| config.mode).ok(),
            Some(WorkerMode::FullSync)
        );
        assert!(matches!(
            load(Some("serve"), &vars),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn missing_store_is_rejected() {
        let mut vars = base_env();
        vars.remove("OPENFGA_STORE_ID");

        assert!(matches!(load(None, &vars), Err(AppError::Validation(_))));
    }

    #[test]
    fn api_url_must_be_http() {
        let mut vars = base_env();
        vars.insert("OPENFGA_API_URL", "not a url".to_owned());
        assert!(matches!(load(None, &vars), Err(AppError::Validation(_))));

        vars.insert("OPENFGA_API_URL", "ftp://openfga:8080".to_owned());
        assert!(matches!(load(None, &vars), Err(AppError::Validation(_))));
    }

    #[test]
    fn numeric_overrides_are_parsed_and_validated() {
        let mut vars = base_env();
        vars.insert("PERMSYNC_RECONCILE_BATCH_SIZE", "200".to_owned());
        vars.insert("PERMSYNC_FULL_SYNC_INTERVAL_SECS", "0".to_owned());
        vars.insert("PERMSYNC_ACTION_SETS_ENABLED", "FALSE".to_owned());

        let config = load(None, &vars);
        assert_eq!(
            config
                .as_ref()
                .map(|config| config.reconcile_batch_size)
                .ok(),
            Some(200)
        );
        assert_eq!(
            config.map(|config| config.options.action_sets_enabled).ok(),
            Some(false)
        );

        vars.insert("PERMSYNC_RECONCILE_BATCH_SIZE", "0".to_owned());
        assert!(matches!(load(None, &vars), Err(AppError::Validation(_))));

        vars.insert("PERMSYNC_RECONCILE_BATCH_SIZE", "many".to_owned());
        assert!(matches!(load(None, &vars), Err(AppError::Validation(_))));
    }
}
