mod bot;
mod catalog;
mod clock;
mod config;
mod emote;
mod engine;
mod gate;
mod irc;
mod matcher;
mod sevengg;
mod twitch;
mod usage;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// `RUST_LOG` wins; otherwise info, or debug when the config asks for it.
fn init_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    // Deployments pass everything through the environment and ship no .env.
    dotenv::dotenv().ok();

    let config = Config::load()?;
    init_logging(config.debug);

    bot::run(config).await
}
