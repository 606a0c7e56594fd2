use clap::{Arg, ArgMatches, Command};
use round_subscriber::subscriber::sync::HandlerResult;
use round_subscriber::transaction::MICRO_UNIT_DECIMALS;
use round_subscriber::utils::format_token_amount;
use round_subscriber::{
	AlgorandIndexerClient, AlgorandSubscriber, BoundedWatermarkStore, ErrorKind, EventHandler,
	FileWatermarkStore, InMemoryWatermarkStore, LedgerClient, MatchedEvent, Round, StopReason,
	SubscriberConfig, SubscriberError, WatermarkStore,
};
use serde::Serialize;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn cli() -> Command {
	Command::new("round-subscriber")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Follow an Algorand indexer and write filter matches as JSON lines")
		.arg(
			Arg::new("indexer-url")
				.long("indexer-url")
				.value_name("URL")
				.env("INDEXER_SERVER")
				.help("Indexer endpoint")
				.default_value("https://mainnet-idx.algonode.cloud"),
		)
		.arg(
			Arg::new("indexer-token")
				.long("indexer-token")
				.value_name("TOKEN")
				.env("INDEXER_TOKEN")
				.hide_env_values(true)
				.help("Indexer API token"),
		)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.help("Subscriber configuration (JSON)")
				.required(true),
		)
		.arg(
			Arg::new("watermark-file")
				.short('w')
				.long("watermark-file")
				.value_name("FILE")
				.help("Persist the watermark to this file; kept in memory otherwise"),
		)
		.arg(
			Arg::new("start-round")
				.long("start-round")
				.value_name("ROUND")
				.help("First round to process; defaults to the current tip for a fresh watermark")
				.value_parser(clap::value_parser!(u64)),
		)
		.arg(
			Arg::new("end-round")
				.long("end-round")
				.value_name("ROUND")
				.help("Stop after this round has been processed")
				.value_parser(clap::value_parser!(u64)),
		)
		.arg(
			Arg::new("output")
				.short('o')
				.long("output")
				.value_name("FILE")
				.help("Append matched events to this file instead of stdout"),
		)
		.arg(
			Arg::new("log-level")
				.short('l')
				.long("log-level")
				.value_name("LEVEL")
				.help("Log level")
				.value_parser(["error", "warn", "info", "debug", "trace"])
				.default_value("info"),
		)
}

/// One line of output per matched event.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventRecord<'a> {
	filter: &'a str,
	round: Round,
	transaction_id: &'a str,
	#[serde(rename = "type")]
	tx_type: &'a str,
	sender: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	receiver: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	asset_id: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	app_id: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	amount: Option<u64>,
	/// Amount in whole units, assuming six decimals.
	#[serde(skip_serializing_if = "Option::is_none")]
	amount_display: Option<String>,
}

impl<'a> From<&'a MatchedEvent> for EventRecord<'a> {
	fn from(event: &'a MatchedEvent) -> Self {
		let tx = &event.transaction;
		Self {
			filter: &event.filter_name,
			round: event.round,
			transaction_id: &tx.id,
			tx_type: tx.tx_type.as_str(),
			sender: &tx.sender,
			receiver: tx.receiver(),
			asset_id: tx.asset_id(),
			app_id: tx.app_id(),
			amount: tx.amount(),
			amount_display: tx
				.amount()
				.map(|a| format_token_amount(a, MICRO_UNIT_DECIMALS)),
		}
	}
}

/// Writes matched events as JSON lines.
#[derive(Clone)]
struct JsonLinesSink {
	writer: Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
}

impl JsonLinesSink {
	async fn open(path: Option<&String>) -> Result<Self, BoxError> {
		let writer: Box<dyn AsyncWrite + Send + Unpin> = match path {
			Some(path) => Box::new(
				tokio::fs::OpenOptions::new()
					.create(true)
					.append(true)
					.open(path)
					.await?,
			),
			None => Box::new(tokio::io::stdout()),
		};
		Ok(Self {
			writer: Arc::new(Mutex::new(writer)),
		})
	}

	async fn flush(&self) -> std::io::Result<()> {
		self.writer.lock().await.flush().await
	}
}

#[async_trait::async_trait]
impl EventHandler for JsonLinesSink {
	async fn handle(&self, event: &MatchedEvent) -> HandlerResult {
		let mut line = serde_json::to_vec(&EventRecord::from(event))?;
		line.push(b'\n');

		let mut writer = self.writer.lock().await;
		writer.write_all(&line).await?;
		writer.flush().await?;
		Ok(())
	}

	fn name(&self) -> &str {
		"json-lines"
	}
}

/// Build the watermark store from the CLI flags.
async fn watermark_store(
	matches: &ArgMatches,
	ledger: &dyn LedgerClient,
) -> Result<Arc<dyn WatermarkStore>, BoxError> {
	let start_round = matches.get_one::<u64>("start-round").copied();
	let end_round = matches.get_one::<u64>("end-round").copied();

	if let (Some(start), Some(end)) = (start_round, end_round) {
		if end < start {
			return Err(format!("--end-round {} is before --start-round {}", end, start).into());
		}
	}

	let initial = match start_round {
		Some(start) => start.saturating_sub(1),
		None => ledger.current_round().await?,
	};

	let store: Arc<dyn WatermarkStore> = match matches.get_one::<String>("watermark-file") {
		Some(path) => {
			info!("Using watermark file {}", path);
			Arc::new(FileWatermarkStore::new(path).with_default_round(initial))
		}
		None => Arc::new(InMemoryWatermarkStore::new(initial)),
	};

	if start_round.is_none() && end_round.is_none() {
		return Ok(store);
	}

	let mut bounded = BoundedWatermarkStore::new(store);
	if let Some(start) = start_round {
		bounded = bounded.with_start_round(start);
	}
	if let Some(end) = end_round {
		bounded = bounded.with_end_round(end);
	}
	Ok(Arc::new(bounded))
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed, so a failed
/// install does not look like a shutdown request.
async fn ctrl_c() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to listen for Ctrl-C: {}", e);
		std::future::pending::<()>().await;
	}
}

/// Resolves with the name of the first shutdown signal received.
async fn shutdown_signal() -> &'static str {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};
		match signal(SignalKind::terminate()) {
			Ok(mut sigterm) => tokio::select! {
				_ = ctrl_c() => "SIGINT",
				_ = sigterm.recv() => "SIGTERM",
			},
			Err(e) => {
				warn!("Failed to install SIGTERM handler: {}", e);
				ctrl_c().await;
				"SIGINT"
			}
		}
	}
	#[cfg(not(unix))]
	{
		ctrl_c().await;
		"SIGINT"
	}
}

async fn run(matches: ArgMatches) -> Result<StopReason, BoxError> {
	let config_path = matches
		.get_one::<String>("config")
		.ok_or("--config is required")?;
	let config = SubscriberConfig::from_path(config_path)?;

	let indexer_url = matches
		.get_one::<String>("indexer-url")
		.ok_or("--indexer-url is required")?;
	let ledger = Arc::new(AlgorandIndexerClient::new(
		indexer_url.as_str(),
		matches.get_one::<String>("indexer-token").cloned(),
	)?);
	info!("Created indexer client for {}", indexer_url);

	let watermark = watermark_store(&matches, ledger.as_ref()).await?;
	let sink = JsonLinesSink::open(matches.get_one::<String>("output")).await?;

	let filter_names: Vec<String> = config.filters.iter().map(|f| f.name.clone()).collect();
	let mut subscriber = AlgorandSubscriber::new(config, ledger, watermark)?;
	for name in &filter_names {
		subscriber.on(name, sink.clone())?;
	}
	subscriber
		.on_error(|e: &SubscriberError| {
			if e.is_fatal() || e.kind() == ErrorKind::LedgerRejected {
				error!("Error in subscriber: {}", e);
			} else {
				warn!("Error in subscriber: {}", e);
			}
		})?
		.on_poll(|summary| {
			if let Some((start, end)) = summary.synced_range {
				info!(
					"Processed rounds {}..={} ({} events), tip {}",
					start, end, summary.events_matched, summary.current_round
				);
			}
		})?;

	subscriber.start()?;

	let reason = tokio::select! {
		reason = subscriber.wait_until_stopped() => reason,
		signal = shutdown_signal() => {
			info!("Received {}; stopping subscriber...", signal);
			subscriber.stop(signal).await;
			subscriber.wait_until_stopped().await
		}
	};

	sink.flush().await?;
	Ok(reason)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
	let matches = cli().get_matches();

	let level: tracing::Level = matches
		.get_one::<String>("log-level")
		.and_then(|l| l.parse().ok())
		.unwrap_or(tracing::Level::INFO);
	let mut env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
	if let Ok(directive) = "reqwest=warn".parse() {
		env_filter = env_filter.add_directive(directive);
	}
	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	match run(matches).await {
		Ok(StopReason::Fatal(e)) => {
			error!("Subscriber stopped on a fatal error: {}", e);
			process::exit(1);
		}
		Ok(reason) => info!("Done: {}", reason),
		Err(e) => {
			error!("{}", e);
			process::exit(1);
		}
	}
}
