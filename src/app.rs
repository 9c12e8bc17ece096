use anyhow::{bail, Context};
use lsp_types::notification::{Exit, Initialized, Notification as _};
use lsp_types::request::{Initialize, Request as _, Shutdown};
use lsp_types::{ClientCapabilities, InitializeParams, InitializeResult, InitializedParams};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::Config;
use crate::lsp::process::ServerProcess;
use crate::lsp::transport::LspTransport;
use crate::lsp::types::{Outcome, Request, Response};
use crate::lsp::LspClient;

/// Run one initialize handshake against the configured server.
///
/// The server's stderr is drained and the process terminated whether or not
/// the exchange succeeded.
pub async fn run(config: Config) -> anyhow::Result<ExitCode> {
    let mut server = ServerProcess::spawn(&config.process)?;

    let status = match handshake(&mut server, &config).await {
        Ok(response) => match response.outcome {
            Outcome::Result(_) => ExitCode::SUCCESS,
            Outcome::Error(_) => ExitCode::FAILURE,
        },
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    };

    match server
        .drain_stderr(config.stderr_bytes, config.stderr_wait)
        .await
    {
        Ok(output) if output.is_empty() => {}
        Ok(output) => println!("Stderr: {}", String::from_utf8_lossy(&output)),
        Err(e) => warn!("failed to read server stderr: {}", e),
    }

    if let Err(e) = server.terminate() {
        warn!("failed to terminate server: {}", e);
    }

    Ok(status)
}

async fn handshake(server: &mut ServerProcess, config: &Config) -> anyhow::Result<Response> {
    let mut client = LspClient::new(server.transport());

    let params = initialize_params(config.send_process_id);
    let request = Request::new(1, Initialize::METHOD, serde_json::to_value(params)?);

    println!("Sending initialize request...");
    println!("Request: {}", serde_json::to_string_pretty(&request)?);

    let response = client
        .request(request, config.timeout)
        .await
        .context("initialize request failed")?;
    println!(
        "Initialize response: {}",
        serde_json::to_string_pretty(&response)?
    );

    match &response.outcome {
        Outcome::Result(result) => {
            log_server_info(result);
            if config.shutdown {
                shutdown(&mut client, config.timeout).await?;
            }
        }
        Outcome::Error(e) => warn!(code = e.code, "server rejected initialize: {}", e.message),
    }

    Ok(response)
}

fn initialize_params(send_process_id: bool) -> InitializeParams {
    InitializeParams {
        process_id: send_process_id.then(std::process::id),
        capabilities: ClientCapabilities::default(),
        ..Default::default()
    }
}

fn log_server_info(result: &serde_json::Value) {
    match serde_json::from_value::<InitializeResult>(result.clone()) {
        Ok(InitializeResult {
            server_info: Some(server_info),
            ..
        }) => info!(
            name = %server_info.name,
            version = server_info.version.as_deref().unwrap_or("unknown"),
            "server identified itself"
        ),
        Ok(_) => info!("server sent no serverInfo"),
        Err(e) => warn!("initialize result is not an InitializeResult: {}", e),
    }
}

async fn shutdown<T: LspTransport>(
    client: &mut LspClient<T>,
    deadline: Option<Duration>,
) -> anyhow::Result<()> {
    client
        .notify(
            Initialized::METHOD,
            serde_json::to_value(InitializedParams {})?,
        )
        .await?;

    let request = Request::new(2, Shutdown::METHOD, serde_json::Value::Null);
    let response = client
        .request(request, deadline)
        .await
        .context("shutdown request failed")?;
    if let Outcome::Error(e) = response.outcome {
        bail!("server rejected shutdown: {} ({})", e.message, e.code);
    }

    client.notify(Exit::METHOD, serde_json::Value::Null).await?;
    println!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_params_shape() {
        let params = serde_json::to_value(initialize_params(false)).unwrap();
        assert_eq!(params["processId"], serde_json::Value::Null);
        assert_eq!(params["capabilities"], serde_json::json!({}));

        let params = serde_json::to_value(initialize_params(true)).unwrap();
        assert_eq!(params["processId"], serde_json::json!(std::process::id()));
    }
}
