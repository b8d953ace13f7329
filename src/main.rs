use anyhow::Context;
use hppt::config::Config;
use hppt::handler::StaticFiles;
use hppt::server;
use tracing::Level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    let level: Level = cfg
        .server
        .log_level
        .parse()
        .with_context(|| format!("Invalid log level {:?}", cfg.server.log_level))?;
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(level)
        .init();

    let files = StaticFiles::new(&cfg.server.root_dir)?.with_cgi(cfg.server.cgi);
    tracing::info!(root = %files.root().display(), cgi = cfg.server.cgi, "Serving files");

    tokio::select! {
        res = server::listener::run(&cfg, files) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
