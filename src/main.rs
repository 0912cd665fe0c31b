use clap::{Parser, Subcommand};
use ledger_sync::config::EngineConfig;
use ledger_sync::parser::{ImportContext, ParserKind};
use ledger_sync::source::{HttpRecordSource, QueryParams, RecordSource};
use ledger_sync::sync::events::TracingProgress;
use ledger_sync::sync::state_persistence::StatePersistenceService;
use ledger_sync::sync::strategies::{CsvFileImport, SymbolSync, SyncStrategy, WindowedSync};
use ledger_sync::sync::{LedgerSyncOrchestrator, SyncContext, SyncError, SyncResult};

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ledger-sync")]
#[command(about = "Synchronize exchange and explorer data into a normalized ledger", long_about = None)]
struct Cli {
	/// JSON config file
	#[arg(short, long, global = true)]
	config: Option<PathBuf>,

	/// Log per-window progress
	#[arg(long, global = true)]
	debug: bool,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Import a CSV export; the format is detected from the header line
	Import {
		file: PathBuf,
		/// File import id (defaults to the file name)
		#[arg(long)]
		id: Option<String>,
	},
	/// Sync a JSON endpoint window by window
	Sync {
		/// Endpoint returning an array of records
		#[arg(long)]
		url: String,
		/// Connection id used for the cursor and ledger files
		#[arg(long)]
		connection: String,
		/// Parser name (e.g. binance-api-trades); detected per record when omitted
		#[arg(long)]
		parser: Option<ParserKind>,
		/// End of the range in ms since epoch (defaults to now)
		#[arg(long)]
		until: Option<i64>,
		/// Query each symbol separately (repeatable)
		#[arg(long = "symbol")]
		symbols: Vec<String>,
		/// JSON pointer to the record array, e.g. /result
		#[arg(long, default_value = "")]
		records_pointer: String,
		/// Address owned by the account, required by on-chain parsers
		#[arg(long)]
		wallet_address: Option<String>,
		/// Static request header as name:value (repeatable)
		#[arg(long = "header")]
		headers: Vec<String>,
		/// Query parameter carrying the window start
		#[arg(long, default_value = "startTime")]
		start_param: String,
		/// Query parameter carrying the window end
		#[arg(long, default_value = "endTime")]
		end_param: String,
		/// Query parameter carrying the symbol
		#[arg(long, default_value = "symbol")]
		symbol_param: String,
	},
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	let level = if cli.debug {
		tracing::Level::DEBUG
	} else {
		tracing::Level::INFO
	};
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let config = match EngineConfig::load(cli.config.as_deref()) {
		Ok(config) => EngineConfig {
			debug: config.debug || cli.debug,
			..config
		},
		Err(e) => {
			error!("Failed to load configuration: {}", e);
			return ExitCode::FAILURE;
		}
	};

	let token = CancellationToken::new();
	let interrupt = token.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			warn!("Interrupt received, letting in-flight fetches finish");
			interrupt.cancel();
		}
	});
	let ctx = SyncContext::new(Arc::new(TracingProgress), token).with_debug(config.debug);

	match run(cli.command, &config, &ctx).await {
		Ok(result) => {
			info!(
				"{:?}: {} logs, {} transactions, {} assets, cursor {}",
				result.status,
				result.rows,
				result.tx_map.len(),
				result.asset_map.len(),
				result.new_cursor
			);
			if !result.failures.is_empty() || !result.skipped_records.is_empty() {
				warn!(
					"{} windows failed and {} records were skipped; re-run to retry",
					result.failures.len(),
					result.skipped_records.len()
				);
			}
			ExitCode::SUCCESS
		}
		Err(e) => {
			error!("Sync failed: {}", e);
			ExitCode::FAILURE
		}
	}
}

async fn run(
	command: Commands,
	config: &EngineConfig,
	ctx: &SyncContext,
) -> Result<SyncResult, SyncError> {
	let persistence = Arc::new(StatePersistenceService::new(config.data_dir.clone()));
	let now = chrono::Utc::now().timestamp_millis();

	let (connection_id, strategy, until): (String, Box<dyn SyncStrategy>, i64) = match command {
		Commands::Import { file, id } => {
			let id = id
				.or_else(|| {
					file.file_name()
						.map(|name| name.to_string_lossy().into_owned())
				})
				.unwrap_or_else(|| "import".to_string());
			let strategy = CsvFileImport::new(file, ImportContext::file_import(&id));
			(id, Box::new(strategy), now)
		}
		Commands::Sync {
			url,
			connection,
			parser,
			until,
			symbols,
			records_pointer,
			wallet_address,
			headers,
			start_param,
			end_param,
			symbol_param,
		} => {
			let mut source = HttpRecordSource::new(&connection, &url, config.request_timeout())?
				.with_records_pointer(&records_pointer)
				.with_params(QueryParams {
					start: start_param,
					end: end_param,
					symbol: symbol_param,
				});
			for header in &headers {
				let (name, value) = header.split_once(':').ok_or_else(|| {
					SyncError::Config(format!("Header must be name:value, got '{}'", header))
				})?;
				source = source.with_header(name.trim(), value.trim());
			}

			let mut import = ImportContext::connection(&connection);
			if let Some(address) = &wallet_address {
				import = import.with_wallet_address(address);
			}

			let source: Arc<dyn RecordSource> = Arc::new(source);
			let strategy: Box<dyn SyncStrategy> = if symbols.is_empty() {
				Box::new(WindowedSync::new(
					source,
					parser.into(),
					import,
					config.pagination,
				))
			} else {
				Box::new(SymbolSync::new(
					source,
					parser.into(),
					import,
					config.pagination,
					symbols,
				))
			};
			(connection, strategy, until.unwrap_or(now))
		}
	};

	LedgerSyncOrchestrator::new(&connection_id, strategy, persistence)
		.with_persistence(config.enable_persistence)
		.with_default_since(config.default_since)
		.sync(until, ctx)
		.await
}
