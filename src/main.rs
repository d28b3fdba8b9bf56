//! Application entry point.

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::{ExposeSecret, SecretString};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use payment_watcher::app::{
    AggregatorConfig, ChainWatcher, DashPaymentHandler, DispatchSummary, DispatcherConfig,
    EthPaymentHandler, JobDispatcher, JobHandler, OutcomeNotifier, PaymentAggregator,
    WatcherConfig,
};
use payment_watcher::domain::{AppError, ConfigError, QueueName, User, UserDirectory};
use payment_watcher::infra::blockchain::DEFAULT_DASH_API_URL;
use payment_watcher::infra::{
    BrokerConfig, BrokerConnection, DashClient, DashClientConfig, EthereumClient,
    EthereumClientConfig, PostgresUserDirectory, QueueManager,
    UnavailableUserDirectory,
};

/// Dash API settings
struct DashSettings {
    api_url: String,
    api_token: SecretString,
    mainnet: bool,
}

/// Ethereum RPC settings
struct EthSettings {
    rpc_url: String,
    payment_contract: String,
    token_address: Option<String>,
    mainnet: bool,
}

/// Application configuration
struct Config {
    amqp_url: SecretString,
    /// Optional: without it every notification goes to the operator
    database_url: Option<SecretString>,
    dash: Option<DashSettings>,
    eth: Option<EthSettings>,
    queues: Vec<QueueName>,
    /// Overrides the per-chain poll interval
    poll_interval: Option<Duration>,
    /// Overrides the per-chain and per-forward wait limit
    max_wait: Option<Duration>,
    broker: BrokerConfig,
    dispatcher: DispatcherConfig,
    reconnect_delay: Duration,
    operator: User,
    json_logs: bool,
}

fn required(key: &str) -> Result<String> {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()).into())
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| {
            ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }
            .into()
        }),
        None => Ok(default),
    }
}

impl Config {
    fn from_env() -> Result<Self> {
        let amqp_url = SecretString::from(required("AMQP_URL")?);
        let database_url = optional("DATABASE_URL").map(SecretString::from);

        let queues = optional("QUEUES")
            .unwrap_or_else(|| "dash-payment-confirmation,eth-payment-confirmation".to_string())
            .split(',')
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| {
                q.parse::<QueueName>().map_err(|message| ConfigError::InvalidValue {
                    key: "QUEUES".to_string(),
                    message,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let dash = if queues.contains(&QueueName::DashPaymentConfirmation) {
            Some(DashSettings {
                api_url: optional("DASH_API_URL")
                    .unwrap_or_else(|| DEFAULT_DASH_API_URL.to_string()),
                api_token: SecretString::from(required("DASH_API_TOKEN")?),
                mainnet: optional("DASH_NETWORK").is_some_and(|n| n == "main"),
            })
        } else {
            None
        };

        let eth = if queues.contains(&QueueName::EthPaymentConfirmation) {
            Some(EthSettings {
                rpc_url: required("ETH_RPC_URL")?,
                payment_contract: required("ETH_PAYMENT_CONTRACT_ADDRESS")?,
                token_address: optional("ETH_TOKEN_ADDRESS"),
                mainnet: optional("ETH_NETWORK").is_some_and(|n| n == "main"),
            })
        } else {
            None
        };

        let poll_interval = optional("POLL_INTERVAL_SECS")
            .map(|_| parsed::<u64>("POLL_INTERVAL_SECS", 0))
            .transpose()?
            .map(Duration::from_secs);
        let max_wait = optional("MAX_WAIT_SECS")
            .map(|_| parsed::<u64>("MAX_WAIT_SECS", 0))
            .transpose()?
            .map(Duration::from_secs);

        let broker = BrokerConfig {
            prefetch_count: parsed("PREFETCH_COUNT", 10)?,
            ..Default::default()
        };
        let dispatcher = DispatcherConfig {
            max_redeliveries: parsed("MAX_REDELIVERIES", 3)?,
            shutdown_timeout: Duration::from_secs(parsed("SHUTDOWN_TIMEOUT_SECS", 30)?),
        };
        let reconnect_delay = Duration::from_secs(parsed("RECONNECT_DELAY_SECS", 5)?);

        let operator = User {
            user_name: optional("OPERATOR_USER_NAME").unwrap_or_else(|| "operator".to_string()),
            email_address: required("OPERATOR_EMAIL")?,
            email_enabled: true,
        };

        let json_logs = optional("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json"));

        Ok(Self {
            amqp_url,
            database_url,
            dash,
            eth,
            queues,
            poll_interval,
            max_wait,
            broker,
            dispatcher,
            reconnect_delay,
            operator,
            json_logs,
        })
    }

    fn watcher_config(&self, mut config: WatcherConfig) -> WatcherConfig {
        if let Some(interval) = self.poll_interval {
            config.poll_interval = interval;
            config.max_idle_interval = config.max_idle_interval.max(interval);
        }
        if let Some(wait) = self.max_wait {
            config.max_wait = Some(wait);
        }
        config
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lapin=warn,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Build the handler for one served queue
fn build_handler(config: &Config, queue: QueueName) -> Result<Arc<dyn JobHandler>> {
    match queue {
        QueueName::DashPaymentConfirmation => {
            let dash = config
                .dash
                .as_ref()
                .context("Dash settings missing for Dash queue")?;
            let client = Arc::new(DashClient::new(DashClientConfig::new(
                dash.api_url.clone(),
                SecretString::from(dash.api_token.expose_secret().to_string()),
            ))?);
            let watcher = Arc::new(ChainWatcher::new(
                client.clone(),
                config.watcher_config(WatcherConfig::dash(dash.mainnet)),
            ));
            let mut aggregator_config = AggregatorConfig::default();
            if let Some(interval) = config.poll_interval {
                aggregator_config.poll_interval = interval;
            }
            if let Some(wait) = config.max_wait {
                aggregator_config.max_wait = Some(wait);
            }
            info!(
                mainnet = dash.mainnet,
                confirmations = watcher.required_confirmations(),
                "Dash payment handler ready"
            );
            Ok(Arc::new(DashPaymentHandler::new(PaymentAggregator::new(
                client,
                watcher,
                aggregator_config,
            ))))
        }
        QueueName::EthPaymentConfirmation => {
            let eth = config
                .eth
                .as_ref()
                .context("Ethereum settings missing for Ethereum queue")?;
            let client = Arc::new(EthereumClient::new(EthereumClientConfig::new(
                eth.rpc_url.clone(),
            ))?);
            let watcher = Arc::new(ChainWatcher::new(
                client,
                config.watcher_config(WatcherConfig::ethereum(eth.mainnet)),
            ));
            info!(
                mainnet = eth.mainnet,
                confirmations = watcher.required_confirmations(),
                contract = %eth.payment_contract,
                "Ethereum payment handler ready"
            );
            Ok(Arc::new(EthPaymentHandler::new(
                watcher,
                eth.payment_contract.clone(),
                eth.token_address.clone(),
            )))
        }
        QueueName::EnsRequest => anyhow::bail!(
            "{queue} needs a signing chain writer, which this binary does not configure"
        ),
        QueueName::EmailSend => {
            anyhow::bail!("{queue} is consumed by the email service, not by this process")
        }
    }
}

/// One broker session: connect, declare, dispatch until shutdown or connection loss
async fn run_session(
    config: &Config,
    queue: QueueName,
    handler: Arc<dyn JobHandler>,
    users: Arc<dyn UserDirectory>,
    shutdown: CancellationToken,
) -> Result<DispatchSummary, AppError> {
    let connection =
        BrokerConnection::connect(config.amqp_url.expose_secret(), config.broker.clone()).await?;
    let closed = connection.notify_closed();

    let consumer = QueueManager::open(connection.open_channel().await?).await?;
    consumer.declare_queue(queue).await?;
    let publisher = Arc::new(QueueManager::open(connection.open_channel().await?).await?);
    publisher.declare_outbound(QueueName::EmailSend).await?;

    let tag = format!("payment-watcher-{}", Uuid::new_v4());
    let deliveries = consumer.consume(queue, &tag).await?;

    let notifier = Arc::new(OutcomeNotifier::new(
        users,
        publisher,
        config.operator.clone(),
    ));
    let dispatcher = JobDispatcher::new(handler, notifier, config.dispatcher.clone());
    let result = dispatcher.run(deliveries, closed, shutdown).await;

    if let Err(e) = connection.close().await {
        warn!(error = %e, "Failed to close broker connection cleanly");
    }
    result
}

/// Keep a consumer running for `queue`, reconnecting after failures
async fn supervise(
    config: Arc<Config>,
    queue: QueueName,
    handler: Arc<dyn JobHandler>,
    users: Arc<dyn UserDirectory>,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        match run_session(
            &config,
            queue,
            Arc::clone(&handler),
            Arc::clone(&users),
            shutdown.clone(),
        )
        .await
        {
            Ok(summary) => {
                info!(queue = %queue, ?summary, "Consumer stopped");
                return;
            }
            Err(e) => {
                error!(
                    queue = %queue,
                    error = %e,
                    retry_in_secs = config.reconnect_delay.as_secs(),
                    "Consumer session ended, reconnecting"
                );
                tokio::select! {
                    _ = tokio::time::sleep(config.reconnect_delay) => {}
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.json_logs);

    info!("Payment watcher v{}", env!("CARGO_PKG_VERSION"));

    let users: Arc<dyn UserDirectory> = match &config.database_url {
        Some(url) => Arc::new(
            PostgresUserDirectory::with_defaults(url.expose_secret())
                .await
                .context("Failed to connect to user database")?,
        ),
        None => {
            warn!("DATABASE_URL not set, all notifications go to the operator");
            Arc::new(UnavailableUserDirectory)
        }
    };

    let mut handlers = Vec::with_capacity(config.queues.len());
    for queue in &config.queues {
        handlers.push((*queue, build_handler(&config, *queue)?));
    }

    let config = Arc::new(config);
    let shutdown = CancellationToken::new();
    let mut consumers = JoinSet::new();
    for (queue, handler) in handlers {
        info!(queue = %queue, "Starting consumer");
        consumers.spawn(supervise(
            Arc::clone(&config),
            queue,
            handler,
            Arc::clone(&users),
            shutdown.clone(),
        ));
    }

    shutdown_signal().await;
    info!("Shutting down, waiting for in-flight jobs");
    shutdown.cancel();

    while let Some(joined) = consumers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Consumer task failed");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
