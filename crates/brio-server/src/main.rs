use clap::Parser;

#[derive(Parser)]
#[command(name = "brio-server", about = "Brio campaign orchestration server")]
struct Cli {
    /// Listen host
    #[arg(long, default_value = "127.0.0.1", env = "BRIO_HOST")]
    host: String,

    /// Listen port
    #[arg(long, default_value_t = 3340, env = "BRIO_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(long, default_value = "brio.db", env = "BRIO_DB")]
    db: String,

    /// Dispatcher worker count
    #[arg(long, default_value_t = 4, env = "BRIO_WORKERS")]
    workers: usize,

    /// Directory of YAML role-spec overrides
    #[arg(long, env = "BRIO_ROLES_DIR")]
    roles_dir: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = brio_server::ServerConfig {
        host: cli.host,
        port: cli.port,
        db_path: cli.db,
        workers: cli.workers,
        roles_dir: cli.roles_dir,
    };

    if let Err(e) = brio_server::serve(config).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
