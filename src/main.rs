use anyhow::Result;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tokmon::capture;
use tokmon::config::{Config, Settings};
use tokmon_core::usage::OutputMode;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings; a broken config file must not cost the user their output
    let mut settings = Settings::load(cli.config.as_ref()).unwrap_or_else(|e| {
        warn!("{:#}; using default settings", e);
        Settings::default()
    });
    settings.merge_env();
    settings.validate();

    let resolver = capture::system_resolver(&settings);
    let output = capture::run(
        &settings,
        &resolver,
        OutputMode::from_json_flag(cli.json),
        cli.raw.as_deref(),
    );
    println!("{}", output);

    // Failures are reported in the output; the exit status is always success
    Ok(())
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("tokmon=debug,tokmon_core=debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}
