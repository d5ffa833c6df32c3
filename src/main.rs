use anyhow::{Context, Result};
use clap::Parser;
use querylens::cli::{Cli, OutputFormat};
use querylens::config::ProfilerConfig;
use querylens::profiler::Profiler;
use querylens::replay;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = match &args.config {
        Some(path) => ProfilerConfig::from_toml(path)?,
        None => ProfilerConfig::default(),
    };
    let config = args.apply_overrides(config);
    let profiler = Profiler::new(config).context("Invalid profiler configuration")?;

    let queries = replay::load_jsonl(&args.input)?;
    tracing::debug!(queries = queries.len(), input = %args.input.display(), "query log loaded");

    let session = profiler.start_session();
    let recorded = replay::replay_into(&session, &queries);
    if recorded < queries.len() {
        tracing::warn!(
            recorded,
            total = queries.len(),
            "some queries could not be aggregated"
        );
    }
    let snapshot = session.finish();

    let report = profiler.report(&snapshot, args.scope.into())?;
    match args.format {
        OutputFormat::Json => println!("{}", report.to_json_pretty()?),
        OutputFormat::Text => print!("{}", report.render_text()),
    }

    Ok(())
}
