use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tradpoints::audit::{AuditExportFormat, render_audit_export, verify_audit_chain};
use tradpoints::clock::{Clock, SystemClock, format_rfc3339_millis, parse_rfc3339_millis};
use tradpoints::ledger::telemetry::{
    TelemetryError, TelemetryGuard, TelemetryOptions, init_telemetry,
};
use tradpoints::{
    LedgerConfig, PointsLedger, RevokeRequest, RevokeSelection, SearchQuery, SelectionStatus,
    SqliteLedgerStore,
};

#[derive(Debug, Parser)]
#[command(name = "tradpoints", about = "Points ledger administration")]
struct Cli {
    /// sqlite database; overrides `sqlite_path` from the config file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Ledger config (.toml, .yaml, .yml or .json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json_logs: bool,
    /// Log filter directives; `RUST_LOG` takes precedence.
    #[arg(long, global = true)]
    log_filter: Option<String>,
    #[cfg(feature = "otel")]
    #[arg(long, global = true)]
    otel: bool,
    #[cfg(feature = "otel")]
    #[arg(long, global = true)]
    otel_endpoint: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Award {
        #[arg(long)]
        user: String,
        #[arg(long)]
        points: i64,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        dedup_key: Option<String>,
    },
    Balance {
        #[arg(long)]
        user: String,
    },
    History {
        #[arg(long)]
        user: String,
    },
    Search {
        /// RFC 3339 timestamp or epoch milliseconds.
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    Revoke {
        #[arg(long)]
        user: String,
        /// Award event to reverse; repeat for several.
        #[arg(long = "event", conflicts_with = "amount")]
        events: Vec<String>,
        #[arg(long)]
        amount: Option<i64>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        justification: String,
        /// Second-factor code.
        #[arg(long)]
        code: String,
        #[arg(long)]
        actor: Option<String>,
    },
    Audit {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        since_ts_ms: Option<u64>,
    },
    AuditExport {
        #[arg(long, default_value = "jsonl")]
        format: String,
        #[arg(long, default_value_t = 10_000)]
        limit: usize,
        #[arg(long)]
        since_ts_ms: Option<u64>,
        #[arg(long)]
        before_ts_ms: Option<u64>,
        /// Defaults to stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    VerifyAudit {
        #[arg(long)]
        input: PathBuf,
    },
    Reconcile {
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        /// Write the reconstructed audit entries.
        #[arg(long)]
        repair: bool,
    },
    DoubleReversals {
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
    },
    #[cfg(feature = "http")]
    Serve {
        #[arg(long)]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let _telemetry = init_logging(&cli)?;

    if let Command::VerifyAudit { input } = &cli.command {
        let raw = std::fs::read_to_string(input)?;
        let verified = verify_audit_chain(&raw)?;
        println!("ok: {verified} records verified");
        return Ok(ExitCode::SUCCESS);
    }

    let config = match &cli.config {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::default(),
    };
    let db = cli
        .db
        .clone()
        .or_else(|| config.sqlite_path.clone())
        .ok_or("missing --db (or sqlite_path in --config)")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = SqliteLedgerStore::with_clock(db, Arc::clone(&clock));
    store.init().await?;
    let ledger = PointsLedger::new(
        Arc::new(store.clone()),
        Arc::new(store),
        config.build_second_factor(clock)?,
    )
    .with_options(config.ledger_options());

    let mut exit = ExitCode::SUCCESS;
    match cli.command {
        Command::Award {
            user,
            points,
            reason,
            dedup_key,
        } => {
            let event_id = match dedup_key {
                Some(key) => {
                    let outcome = ledger.award_once(&user, points, &reason, &key, None).await?;
                    if !outcome.is_created() {
                        eprintln!("already awarded for dedup key {key}");
                    }
                    outcome.event_id().to_string()
                }
                None => ledger.award(&user, points, &reason, None).await?,
            };
            println!("{event_id}");
        }
        Command::Balance { user } => {
            println!("{}", ledger.get_balance(&user).await?);
        }
        Command::History { user } => {
            for event in ledger.history(&user).await? {
                println!(
                    "{}\t{}\t{}\t{:+}\t{}",
                    format_rfc3339_millis(event.created_at_ms),
                    event.id,
                    event.action,
                    event.points,
                    event.reason_code
                );
            }
        }
        Command::Search {
            since,
            until,
            reason,
        } => {
            let query = SearchQuery {
                since_ms: parse_bound("--since", since.as_deref())?,
                until_ms: parse_bound("--until", until.as_deref())?,
                reason_code: reason,
            };
            let groups = ledger.search_events(&query).await?;
            println!("{}", serde_json::to_string_pretty(&groups)?);
        }
        Command::Revoke {
            user,
            events,
            amount,
            reason,
            justification,
            code,
            actor,
        } => {
            let selection = match amount {
                Some(amount) => RevokeSelection::Amount {
                    user_id: user,
                    amount,
                    reason_code: reason.clone(),
                },
                None => RevokeSelection::events(user, events),
            };
            let request = RevokeRequest {
                actor: actor.unwrap_or_else(|| config.audit_actor_default.clone()),
                selections: vec![selection],
                justification,
                auth_factor: code,
                batch_reason: reason,
            };
            let outcome = ledger.revoke(request).await?;
            for result in &outcome.results {
                match &result.status {
                    SelectionStatus::Reversed { event_id, amount } => {
                        println!("reversed {amount} from {} ({event_id})", result.user_id);
                    }
                    SelectionStatus::Failed { error } => {
                        eprintln!("failed for {}: {error}", result.user_id);
                    }
                }
            }
            println!("batch {}: audit {:?}", outcome.batch_id, outcome.audit);
            if !outcome.is_complete() {
                exit = ExitCode::from(2);
            }
        }
        Command::Audit { limit, since_ts_ms } => {
            let logs = ledger.audit_sink().list_audit(limit, since_ts_ms).await?;
            println!("{}", serde_json::to_string_pretty(&logs)?);
        }
        Command::AuditExport {
            format,
            limit,
            since_ts_ms,
            before_ts_ms,
            output,
        } => {
            let format = format.parse::<AuditExportFormat>()?;
            let logs = ledger
                .audit_sink()
                .list_audit_window(limit.max(1), since_ts_ms, before_ts_ms)
                .await?;
            let rendered = render_audit_export(format, logs)?;
            match output {
                Some(path) => tokio::fs::write(path, rendered).await?,
                None => print!("{rendered}"),
            }
        }
        Command::Reconcile {
            since,
            until,
            repair,
        } => {
            let since = parse_bound("--since", since.as_deref())?;
            let until = parse_bound("--until", until.as_deref())?;
            if repair {
                let written = ledger.repair_audit(since, until).await?;
                println!("wrote {} reconstructed audit entries", written.len());
            } else {
                let missing = ledger.reconcile_audit(since, until).await?;
                println!("{}", serde_json::to_string_pretty(&missing)?);
            }
        }
        Command::DoubleReversals { since, until } => {
            let doubles = ledger
                .find_double_reversals(
                    parse_bound("--since", since.as_deref())?,
                    parse_bound("--until", until.as_deref())?,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&doubles)?);
        }
        #[cfg(feature = "http")]
        Command::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| config.listen.clone());
            let state = tradpoints::LedgerHttpState::from_config(ledger, &config);
            let app = tradpoints::router(state);
            let listener = tokio::net::TcpListener::bind(&listen).await?;
            tracing::info!(%listen, "tradpoints http listening");
            axum::serve(listener, app).await?;
        }
        Command::VerifyAudit { .. } => {}
    }

    Ok(exit)
}

fn parse_bound(flag: &str, raw: Option<&str>) -> Result<Option<u64>, Box<dyn std::error::Error>> {
    match raw {
        None => Ok(None),
        Some(raw) => parse_rfc3339_millis(raw)
            .map(Some)
            .ok_or_else(|| format!("invalid {flag}: {raw}").into()),
    }
}

fn init_logging(cli: &Cli) -> Result<TelemetryGuard, TelemetryError> {
    let options = TelemetryOptions {
        filter: cli.log_filter.clone(),
        json_logs: cli.json_logs,
        #[cfg(feature = "otel")]
        export_spans: cli.otel,
        #[cfg(feature = "otel")]
        otlp_endpoint: cli.otel_endpoint.clone(),
        ..TelemetryOptions::default()
    };
    init_telemetry(&options)
}
