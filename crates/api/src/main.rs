use std::process::ExitCode;

use tracing::instrument::WithSubscriber;
use tracing::{info, warn};

use grainlify_api::bootstrap::{Bootstrap, BootstrapError, log_fatal, os_signal};
use grainlify_infra::config::{self, Config};
use grainlify_observability::{LogSettings, bootstrap_dispatch, dispatch};

#[tokio::main]
async fn main() -> ExitCode {
    // Until the config is read, log at info with the default format.
    let early = bootstrap_dispatch();

    let loaded = config::load_dotenv();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => return fail(&early, e.into()),
    };

    let configured = match dispatch(&LogSettings::new(config.log_level.clone(), config.log_format)) {
        Ok(dispatch) => dispatch,
        Err(e) => return fail(&early, e.into()),
    };

    tracing::dispatcher::with_default(&configured, || match &loaded {
        Some(path) => info!(path = %path.display(), "loaded .env"),
        None => warn!("no .env file found, using process environment"),
    });

    match Bootstrap::new(config)
        .run(os_signal())
        .with_subscriber(configured)
        .await
    {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => exit_code(&e),
    }
}

fn fail(dispatch: &tracing::Dispatch, err: BootstrapError) -> ExitCode {
    tracing::dispatcher::with_default(dispatch, || log_fatal(&err));
    exit_code(&err)
}

fn exit_code(err: &BootstrapError) -> ExitCode {
    ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
}
