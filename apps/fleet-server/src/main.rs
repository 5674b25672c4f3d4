use std::process::ExitCode;

use fleet_server::config::Config;
use fleet_server::kernel;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    fleet_observability::init_tracing("fleet-server");

    let config = Config::load();
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        return ExitCode::FAILURE;
    }

    let state = match kernel::build_state(config) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to initialize state");
            return ExitCode::FAILURE;
        }
    };

    match kernel::serve(state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server exited with error");
            ExitCode::FAILURE
        }
    }
}
