use clap::Parser as _;
use modernize_core::CancellationToken;
use modernize_core::diagnostics::{LOG_FILE_NAME, init_logging};
use modernize_core::llm::ModernizeLLM;
use modernize_translate::cli::{Args, initialize};
use modernize_translate::{ToolConfigs, convert_with, open_services};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let args = Args::parse();
    let config = match initialize(&args) {
        Ok(Some(config)) => config,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.log_filter, Some(&config.output.join(LOG_FILE_NAME))) {
        eprintln!("Warning: failed to open the log file: {e}");
    }

    let tools = match ToolConfigs::load(&config) {
        Ok(tools) => tools,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let inference = match ModernizeLLM::build(tools.llm_translation.llm.clone()) {
        Ok(llm) => Arc::new(llm),
        Err(e) => {
            error!("Failed to set up the inference service: {e}");
            return ExitCode::FAILURE;
        }
    };
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let services = open_services(&config, &tools, inference);
    match convert_with(&config, &tools, services, &cancel) {
        Ok(report) => {
            info!(
                "Go module tree written to {} ({} file(s) need full review)",
                config.output.display(),
                report
                    .files
                    .iter()
                    .filter(|f| f.review() == Some(go_validator::ReviewLevel::FullReview))
                    .count()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Cancels `cancel` on the first Ctrl-C. In-flight requests are aborted and nothing further is
/// written.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    let spawned = thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Ctrl-C will not cancel the run: {e}");
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted; cancelling the run");
                    cancel.cancel();
                }
            });
        });
    if let Err(e) = spawned {
        warn!("Ctrl-C will not cancel the run: {e}");
    }
}
