use color_eyre::eyre::Result;
use mimalloc::MiMalloc;
use tessera::{
    args::parse_args,
    commands::{config_from, run_command},
};
use tessera_common::task_id_layer::{TaskIdJsonFormat, TaskIdLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(TaskIdLayer::new())
            .with(
                fmt::layer()
                    .event_format(TaskIdJsonFormat)
                    .with_writer(std::io::stderr),
            )
            .init();

        color_eyre::config::HookBuilder::default()
            .theme(color_eyre::config::Theme::new())
            .install()?;
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        color_eyre::install()?;
    }

    info!(?args, "Init");

    let config = config_from(args.config.as_deref())?;
    let output = run_command(args.command, config).await?;
    println!("{output}");

    Ok(())
}
