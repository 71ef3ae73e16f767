use rocket_oidc_delegation::config::SampleConfig;
use std::env;
use std::process::ExitCode;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Clone, StructOpt)]
#[structopt(about = "OpenID Connect sample server with a delegated identity flow")]
pub struct Args {
    /// port to listen on, overrides PORT
    #[structopt(short, long)]
    port: Option<u16>,
    /// allow a plain http issuer, same as OIDC_TESTING=true
    #[structopt(long)]
    testing: bool,
}

impl Args {
    /// Environment lookup with command line flags taking precedence.
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "PORT" => self.port.map(|port| port.to_string()).or_else(|| env::var(key).ok()),
            "OIDC_TESTING" if self.testing => Some("true".to_string()),
            _ => env::var(key).ok(),
        }
    }
}

#[rocket::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::from_args();
    let config = match SampleConfig::from_lookup(|key| args.lookup(key)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        issuer = %config.oidc.issuer,
        port = config.port,
        testing = config.oidc.testing,
        "starting server"
    );

    let rocket = match rocket_oidc_delegation::setup(config).await {
        Ok(rocket) => rocket,
        Err(e) => {
            tracing::error!("OIDC ERROR: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = rocket.launch().await {
        tracing::error!("server failed: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
