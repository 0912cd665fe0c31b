use crate::config::PaginationOptions;
use crate::ledger::{AuditLog, Transaction};
use crate::parser::{ImportContext, ParseError, ParserKind, ParserOutput};
use crate::source::{FetchRequest, RawRecord, RecordSource};
use crate::sync::context::SyncContext;
use crate::sync::merge::Ranked;
use crate::sync::paginate::{paginate, paginate_exact, windows};
use crate::sync::types::SyncError;

use itertools::Itertools;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Source indices of one fetch start at `rank << 32`, so records of later windows sort after
/// records of earlier ones.
const RANK_SHIFT: u32 = 32;

/// Inclusive time range of a run (ms since epoch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRange {
	pub since: i64,
	pub until: i64,
}

/// Everything a strategy produced, tagged with fetch ranks for merging.
#[derive(Debug, Default)]
pub struct StrategyOutput {
	pub logs: Vec<Ranked<AuditLog>>,
	pub transactions: Vec<Ranked<Transaction>>,
	pub cancelled: bool,
	/// Where the next run resumes when this one was cancelled.
	pub resume_at: Option<i64>,
}

impl StrategyOutput {
	fn push(&mut self, rank: usize, output: ParserOutput) {
		self.logs
			.extend(output.logs.into_iter().map(|log| Ranked::new(rank, log)));
		self.transactions
			.extend(output.transactions.into_iter().map(|tx| Ranked::new(rank, tx)));
	}
}

/// Trait for different synchronization strategies
#[async_trait::async_trait]
pub trait SyncStrategy: Send + Sync {
	/// Fetch and parse everything in `range`.
	async fn sync(&self, range: SyncRange, ctx: &SyncContext) -> Result<StrategyOutput, SyncError>;

	/// Get the name of this strategy
	fn name(&self) -> &'static str;
}

/// How API records are matched to a parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserSelection {
	Fixed(ParserKind),
	/// Resolve each record from its key set.
	Detect,
}

impl From<Option<ParserKind>> for ParserSelection {
	fn from(kind: Option<ParserKind>) -> Self {
		kind.map_or(ParserSelection::Detect, ParserSelection::Fixed)
	}
}

/// Parse one fetched page. Rejected records are skipped and reported.
fn parse_page(
	records: Vec<RawRecord>,
	rank: usize,
	parser: ParserSelection,
	import: &ImportContext,
	ctx: &SyncContext,
	output: &mut StrategyOutput,
) {
	for (position, raw) in records.into_iter().enumerate() {
		let index = ((rank as u64) << RANK_SHIFT) | position as u64;
		let kind = match parser {
			ParserSelection::Fixed(kind) => Some(kind),
			ParserSelection::Detect => ParserKind::from_record_shape(&raw),
		};
		let Some(kind) = kind else {
			ctx.tracker()
				.record_skipped(index, "Unrecognized record shape".to_string());
			continue;
		};
		match kind.parse(&raw, index, import) {
			Ok(parsed) => output.push(rank, parsed),
			Err(e) => ctx.tracker().record_skipped(index, e.to_string()),
		}
	}
}

/// Strategy for endpoints paged by time window only
pub struct WindowedSync {
	source: Arc<dyn RecordSource>,
	parser: ParserSelection,
	import: ImportContext,
	options: PaginationOptions,
}

impl WindowedSync {
	pub fn new(
		source: Arc<dyn RecordSource>,
		parser: ParserSelection,
		import: ImportContext,
		options: PaginationOptions,
	) -> Self {
		Self {
			source,
			parser,
			import,
			options,
		}
	}
}

#[async_trait::async_trait]
impl SyncStrategy for WindowedSync {
	async fn sync(&self, range: SyncRange, ctx: &SyncContext) -> Result<StrategyOutput, SyncError> {
		info!(
			"Starting windowed sync of {} from {} to {}",
			self.source.name(),
			range.since,
			range.until
		);

		let source = &self.source;
		let pages = paginate(range.since, range.until, &self.options, ctx, |window| async move {
			let records = source.fetch(&FetchRequest::window(window)).await?;
			ctx.tracker().record_records(records.len());
			ctx.detail(&format!("{}: {} records in {}", source.name(), records.len(), window));
			Ok(records)
		})
		.await?;

		let mut output = StrategyOutput {
			cancelled: pages.cancelled,
			resume_at: pages.cancelled.then(|| pages.resume_at(range.since)),
			..StrategyOutput::default()
		};
		for page in pages.into_ranked() {
			parse_page(page.value, page.rank, self.parser, &self.import, ctx, &mut output);
		}
		Ok(output)
	}

	fn name(&self) -> &'static str {
		"WindowedSync"
	}
}

/// Strategy for endpoints that must be queried per symbol, each symbol paged by time window
pub struct SymbolSync {
	source: Arc<dyn RecordSource>,
	parser: ParserSelection,
	import: ImportContext,
	options: PaginationOptions,
	symbols: Vec<String>,
}

impl SymbolSync {
	pub fn new(
		source: Arc<dyn RecordSource>,
		parser: ParserSelection,
		import: ImportContext,
		options: PaginationOptions,
		symbols: Vec<String>,
	) -> Self {
		Self {
			source,
			parser,
			import,
			options,
			symbols,
		}
	}
}

#[async_trait::async_trait]
impl SyncStrategy for SymbolSync {
	async fn sync(&self, range: SyncRange, ctx: &SyncContext) -> Result<StrategyOutput, SyncError> {
		info!(
			"Starting per-symbol sync of {} for {} symbols",
			self.source.name(),
			self.symbols.len()
		);

		let (source, symbols, options) = (&self.source, &self.symbols, &self.options);
		// symbols one at a time, windows of a symbol concurrently
		let sequential = PaginationOptions {
			concurrency: 1,
			cooldown_ms: 0,
			..*options
		};
		let outer = paginate_exact(symbols.len(), &sequential, ctx, |index| async move {
			let symbol = &symbols[index];
			ctx.detail(&format!("Syncing {}", symbol));
			paginate(range.since, range.until, options, ctx, |window| async move {
				let request = FetchRequest::symbol(symbol.clone()).with_window(window);
				let records = source.fetch(&request).await?;
				ctx.tracker().record_records(records.len());
				Ok(records)
			})
			.await
		})
		.await?;

		let per_symbol = windows(range.since, range.until, options.window_ms)
			.len()
			.max(1);
		let mut output = StrategyOutput {
			cancelled: outer.cancelled || outer.pages.iter().any(|page| page.value.cancelled),
			..StrategyOutput::default()
		};
		if output.cancelled {
			// a symbol that never ran holds everything back to `since`
			let resume_at = (0..symbols.len())
				.map(|index| {
					outer
						.pages
						.iter()
						.find(|page| page.key == index)
						.map_or(range.since, |page| page.value.resume_at(range.since))
				})
				.min()
				.unwrap_or(range.since);
			output.resume_at = Some(resume_at);
		}

		for symbol_page in outer.into_ranked() {
			for window_page in symbol_page.value.into_ranked() {
				let rank = symbol_page.rank * per_symbol + window_page.rank;
				parse_page(window_page.value, rank, self.parser, &self.import, ctx, &mut output);
			}
		}
		Ok(output)
	}

	fn name(&self) -> &'static str {
		"SymbolSync"
	}
}

/// Strategy for one uploaded CSV export
///
/// The parser is resolved from the header line. Any parse error fails the whole file.
pub struct CsvFileImport {
	path: PathBuf,
	import: ImportContext,
}

impl CsvFileImport {
	pub fn new(path: PathBuf, import: ImportContext) -> Self {
		Self { path, import }
	}
}

#[async_trait::async_trait]
impl SyncStrategy for CsvFileImport {
	async fn sync(&self, _range: SyncRange, ctx: &SyncContext) -> Result<StrategyOutput, SyncError> {
		ctx.check_cancelled()?;
		let content = tokio::fs::read_to_string(&self.path).await?;
		let content = content.trim_start_matches('\u{feff}');

		let header = content.lines().next().unwrap_or_default();
		let kind = ParserKind::from_header(header).ok_or_else(|| {
			SyncError::UnsupportedFile(format!(
				"{}: unrecognized header '{}'",
				self.path.display(),
				header.trim()
			))
		})?;
		ctx.report(
			None,
			&format!("Importing {} as {}", self.path.display(), kind.name()),
		);

		let mut reader = csv::ReaderBuilder::new()
			.trim(csv::Trim::All)
			.from_reader(content.as_bytes());
		let headers = reader.headers()?.clone();

		let mut output = StrategyOutput::default();
		let mut rows = 0usize;
		// identical rows are separate fills; count them so content-derived ids stay unique
		let mut seen: HashMap<String, u32> = HashMap::new();
		for (position, record) in reader.records().enumerate() {
			ctx.check_cancelled()?;
			let row = position as u64 + 1;
			let fail = |source: ParseError| {
				error!("Import of {} failed at row {}: {}", self.path.display(), row, source);
				SyncError::Import { row, source }
			};

			let record = record.map_err(|e| fail(ParseError::MalformedRow(e.to_string())))?;
			let raw = RawRecord::from_csv_row(&headers, &record);
			let occurrence = seen.entry(record.iter().join("\u{1f}")).or_insert(0);
			let parsed = if *occurrence == 0 {
				kind.parse(&raw, position as u64, &self.import)
			} else {
				let import = self.import.clone().with_occurrence(*occurrence);
				kind.parse(&raw, position as u64, &import)
			}
			.map_err(fail)?;
			*occurrence += 1;

			output.push(0, parsed);
			rows += 1;
		}

		debug!("Parsed {} rows from {}", rows, self.path.display());
		ctx.tracker().record_records(rows);
		ctx.report(
			Some(100.0),
			&format!("Parsed {} rows from {}", rows, self.path.display()),
		);
		Ok(output)
	}

	fn name(&self) -> &'static str {
		"CsvFileImport"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::TransactionType;
	use crate::source::{FetchError, Window};
	use crate::sync::events::TracingProgress;
	use serde_json::json;
	use std::io::Write;
	use tokio_util::sync::CancellationToken;

	struct FixedTrades;

	#[async_trait::async_trait]
	impl RecordSource for FixedTrades {
		async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawRecord>, FetchError> {
			let window = request.window.unwrap_or(Window::new(0, 0));
			let symbol = request.symbol.clone().unwrap_or_else(|| "BTCUSDT".to_string());
			Ok(vec![
				RawRecord(json!({
					"symbol": symbol, "id": window.start, "orderId": 1, "price": "100",
					"qty": "1", "quoteQty": "100", "commission": "0.1", "commissionAsset": "USDT",
					"time": window.start, "isBuyer": true, "isMaker": false
				})),
				RawRecord(json!({ "unexpected": true })),
			])
		}

		fn name(&self) -> &str {
			"fixed"
		}
	}

	/// Cancels the run once the first symbol's second window is served.
	struct CancelMidSymbol(CancellationToken);

	#[async_trait::async_trait]
	impl RecordSource for CancelMidSymbol {
		async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawRecord>, FetchError> {
			let window = request.window.unwrap_or(Window::new(0, 0));
			if request.symbol.as_deref() == Some("BTCUSDT") && window.start == 1000 {
				self.0.cancel();
			}
			FixedTrades.fetch(request).await
		}

		fn name(&self) -> &str {
			"cancel-mid-symbol"
		}
	}

	fn options() -> PaginationOptions {
		PaginationOptions {
			window_ms: 1000,
			concurrency: 2,
			cooldown_ms: 0,
		}
	}

	#[tokio::test]
	async fn windowed_sync_detects_parser_and_skips_unknown_records() {
		let strategy = WindowedSync::new(
			Arc::new(FixedTrades),
			ParserSelection::Detect,
			ImportContext::connection("c1"),
			options(),
		);
		let ctx = SyncContext::tracing();
		let output = strategy
			.sync(SyncRange { since: 0, until: 2999 }, &ctx)
			.await
			.unwrap();

		assert_eq!(output.transactions.len(), 3);
		assert!(output
			.transactions
			.iter()
			.all(|tx| tx.item.tx_type == TransactionType::Swap));
		assert_eq!(ctx.tracker().get_stats().records_skipped, 3);
		// second window's first record
		let ranks: Vec<usize> = output.transactions.iter().map(|tx| tx.rank).collect();
		assert_eq!(ranks, vec![0, 1, 2]);
		assert!(output
			.logs
			.iter()
			.any(|log| log.item.import_index.source == 1 << 32));
	}

	#[tokio::test]
	async fn symbol_sync_ranks_by_symbol_then_window() {
		let strategy = SymbolSync::new(
			Arc::new(FixedTrades),
			ParserSelection::Fixed(ParserKind::BinanceApiTrades),
			ImportContext::connection("c1"),
			options(),
			vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
		);
		let ctx = SyncContext::tracing();
		let output = strategy
			.sync(SyncRange { since: 0, until: 1999 }, &ctx)
			.await
			.unwrap();

		let mut ids: Vec<(usize, String)> = output
			.transactions
			.iter()
			.map(|tx| (tx.rank, tx.item.id.clone()))
			.collect();
		ids.sort();
		assert_eq!(
			ids,
			vec![
				(0, "binance_BTCUSDT_0".to_string()),
				(1, "binance_BTCUSDT_1000".to_string()),
				(2, "binance_ETHUSDT_0".to_string()),
				(3, "binance_ETHUSDT_1000".to_string()),
			]
		);
		assert!(!output.cancelled);
	}

	#[tokio::test]
	async fn csv_import_reports_the_failing_row() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "Date(UTC),Pair,Side,Price,Executed,Amount,Fee").unwrap();
		writeln!(file, "2024-01-01 00:00:00,BTCUSDT,BUY,30000,1BTC,30000USDT,0.001BTC").unwrap();
		writeln!(file, "2024-01-01 00:00:01,BTCUSDT,HOLD,30000,1BTC,30000USDT,0.001BTC").unwrap();

		let strategy = CsvFileImport::new(file.path().to_path_buf(), ImportContext::file_import("f"));
		let err = strategy
			.sync(SyncRange { since: 0, until: 0 }, &SyncContext::tracing())
			.await
			.unwrap_err();
		match err {
			SyncError::Import { row, source } => {
				assert_eq!(row, 2);
				assert!(matches!(source, ParseError::UnknownValue { .. }));
			}
			other => panic!("unexpected error: {other}"),
		}
	}

	#[tokio::test]
	async fn csv_import_rejects_unknown_headers() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "when,what,how much").unwrap();
		let strategy = CsvFileImport::new(file.path().to_path_buf(), ImportContext::file_import("f"));
		let err = strategy
			.sync(SyncRange { since: 0, until: 0 }, &SyncContext::tracing())
			.await
			.unwrap_err();
		assert!(matches!(err, SyncError::UnsupportedFile(_)));
	}

	#[tokio::test]
	async fn symbol_sync_cancel_resumes_at_unrun_symbol() {
		let token = CancellationToken::new();
		let strategy = SymbolSync::new(
			Arc::new(CancelMidSymbol(token.clone())),
			ParserSelection::Fixed(ParserKind::BinanceApiTrades),
			ImportContext::connection("c1"),
			PaginationOptions {
				concurrency: 1,
				..options()
			},
			vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
		);
		let ctx = SyncContext::new(Arc::new(TracingProgress), token);
		let output = strategy
			.sync(SyncRange { since: 0, until: 2999 }, &ctx)
			.await
			.unwrap();

		assert!(output.cancelled);
		// ETHUSDT never ran, so nothing past `since` is settled for every symbol
		assert_eq!(output.resume_at, Some(0));
		let ids: Vec<&str> = output.transactions.iter().map(|tx| tx.item.id.as_str()).collect();
		assert_eq!(ids.len(), 2);
		assert!(ids.iter().all(|id| id.starts_with("binance_BTCUSDT_")));
	}

	#[tokio::test]
	async fn csv_import_keeps_identical_rows_apart() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "Date(UTC),Pair,Side,Price,Executed,Amount,Fee").unwrap();
		for _ in 0..2 {
			writeln!(file, "2024-01-01 00:00:00,BTCUSDT,BUY,30000,0.1BTC,3000USDT,0.0001BTC").unwrap();
		}

		let strategy = CsvFileImport::new(file.path().to_path_buf(), ImportContext::file_import("f"));
		let output = strategy
			.sync(SyncRange { since: 0, until: 0 }, &SyncContext::tracing())
			.await
			.unwrap();

		let mut ids: Vec<String> = output.transactions.iter().map(|tx| tx.item.id.clone()).collect();
		ids.sort();
		ids.dedup();
		assert_eq!(ids.len(), 2);
		assert_eq!(output.logs.len(), 6);
	}

	#[tokio::test]
	async fn csv_import_reports_ragged_rows_by_number() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "Date(UTC),Pair,Side,Price,Executed,Amount,Fee").unwrap();
		writeln!(file, "2024-01-01 00:00:00,BTCUSDT,BUY,30000,1BTC,30000USDT,0.001BTC").unwrap();
		writeln!(file, "2024-01-01 00:00:01,BTCUSDT,BUY").unwrap();

		let strategy = CsvFileImport::new(file.path().to_path_buf(), ImportContext::file_import("f"));
		let err = strategy
			.sync(SyncRange { since: 0, until: 0 }, &SyncContext::tracing())
			.await
			.unwrap_err();
		match err {
			SyncError::Import { row, source } => {
				assert_eq!(row, 2);
				assert!(matches!(source, ParseError::MalformedRow(_)));
			}
			other => panic!("unexpected error: {other}"),
		}
	}
}
