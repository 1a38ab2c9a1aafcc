//! Piped-mode job runner.
//!
//! Reads one payload document from stdin, rehydrates the job context from
//! `MQAS_BOOTSTRAP` (falling back to `MQAS_DB_*` for the connection),
//! dispatches, and writes the outcome to the payload's `output` file.
//! Functions resolve from the builtins and from command modules found on
//! `MQAS_MODULES` and the payload's `modules`.

use mqas::config::RuntimeConfig;
use mqas::harness::{register_builtins, run_piped, CommandModuleLoader, FunctionRegistry};
use mqas::observability::init_tracing;
use mqas::store::SchemeConnector;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mqas-job: {e}");
            return ExitCode::from(2);
        }
    };
    init_tracing(&config.logging);

    let registry = FunctionRegistry::new();
    register_builtins(&registry);
    registry.add_loader(Arc::new(CommandModuleLoader::new()));
    for path in &config.runner.modules {
        registry.add_search_path(path.clone());
    }

    let code = run_piped(&registry, &config, Arc::new(SchemeConnector::new())).await;
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
