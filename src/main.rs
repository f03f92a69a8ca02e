//! `fancy` - run SQL statements through the connection/transaction resolver.
//!
//! Each statement's result is printed to stdout as one JSON line. Logs go to
//! stderr.

use fancy_sqlx::config::{Config, ExecutionMode};
use fancy_sqlx::models::QueryOutput;
use fancy_sqlx::{AsyncEngine, FancyResult, SqlxConnector};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(
    engine: &AsyncEngine<SqlxConnector>,
    mode: ExecutionMode,
    statements: &[String],
) -> FancyResult<Vec<QueryOutput>> {
    match mode {
        ExecutionMode::Connect => {
            let mut outputs = Vec::with_capacity(statements.len());
            for sql in statements {
                outputs.push(engine.x(None, sql.as_str()).await?);
            }
            Ok(outputs)
        }
        ExecutionMode::Transact => {
            let mut outputs = Vec::with_capacity(statements.len());
            for sql in statements {
                outputs.push(engine.tx(None, sql.as_str()).await?);
            }
            Ok(outputs)
        }
        ExecutionMode::Atomic => {
            engine
                .atomic(|_| async move {
                    let mut outputs = Vec::with_capacity(statements.len());
                    for sql in statements {
                        outputs.push(engine.ax(sql.as_str()).await?);
                    }
                    Ok(outputs)
                })
                .await
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    let engine_config = config.engine_config()?;
    info!(
        database = %engine_config.masked_connection_string(),
        mode = ?config.mode,
        statements = config.statements.len(),
        "Starting fancy v{}",
        env!("CARGO_PKG_VERSION")
    );

    let connector = SqlxConnector::open(&engine_config).await?;
    let engine = AsyncEngine::new(connector);

    let result = run(&engine, config.mode, &config.statements).await;
    debug!(
        idle_connections = engine.connector().pool().num_idle(),
        "Closing connection pool"
    );
    engine.connector().pool().close().await;

    match result {
        Ok(outputs) => {
            for output in &outputs {
                println!("{}", serde_json::to_string(output)?);
            }
            Ok(())
        }
        Err(e) => {
            error!(
                error = %e,
                suggestion = ?e.suggestion(),
                retryable = e.is_retryable(),
                usage_error = e.is_usage_error(),
                "Execution failed"
            );
            Err(e.into())
        }
    }
}
