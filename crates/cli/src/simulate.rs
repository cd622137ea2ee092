//! `portcullis simulate`: drive a flow with a synthetic request.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};

use portcullis_core::{AttributeMap, ExternalContext, ExternalRequest};
use portcullis_eval::{ExecutionStatus, FlowExecution, FlowExecutor};

use crate::assembly;
use crate::settings::Settings;
use crate::{report_error, report_load_error, OutputFormat};

pub(crate) struct SimulateOptions<'a> {
    pub files: &'a [PathBuf],
    pub settings: &'a Settings,
    pub flow_id: &'a str,
    pub remote_user: Option<&'a str>,
    pub headers: &'a [String],
    pub params: &'a [String],
    /// Signalled in order each time the execution pauses.
    pub events: &'a [String],
    pub output: OutputFormat,
    pub quiet: bool,
}

pub(crate) fn cmd_simulate(opts: SimulateOptions<'_>) {
    let assembly = match assembly::assemble(opts.files, opts.settings) {
        Ok(a) => a,
        Err(e) => {
            report_load_error(&e, opts.output, opts.quiet);
            process::exit(1);
        }
    };

    let request = match build_request(opts.remote_user, opts.headers, opts.params) {
        Ok(r) => r,
        Err(msg) => {
            report_error(&msg, opts.output, opts.quiet);
            process::exit(1);
        }
    };

    match run(Arc::clone(&assembly.registry), &opts, request) {
        Ok(execution) => print_execution(&execution, opts.output, opts.quiet),
        Err(msg) => {
            report_error(&msg, opts.output, opts.quiet);
            process::exit(1);
        }
    }
}

fn run(
    registry: Arc<portcullis_core::FlowRegistry>,
    opts: &SimulateOptions<'_>,
    request: ExternalRequest,
) -> Result<FlowExecution, String> {
    let executor = FlowExecutor::new(registry);
    let mut execution = executor
        .launch(
            opts.flow_id,
            ExternalContext::new(request.clone()),
            AttributeMap::new(),
        )
        .map_err(|e| format!("error: {}", e))?;

    for event in opts.events {
        if !execution.is_paused() {
            return Err(format!(
                "error: execution ended before event '{}' could be signalled",
                event
            ));
        }
        execution = executor
            .resume(execution, event.as_str(), request.clone())
            .map_err(|e| format!("error: {}", e))?;
    }
    Ok(execution)
}

pub(crate) fn build_request(
    remote_user: Option<&str>,
    headers: &[String],
    params: &[String],
) -> Result<ExternalRequest, String> {
    let mut request = ExternalRequest::new();
    if let Some(user) = remote_user {
        request = request.with_remote_user(user);
    }
    for raw in headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| format!("error: invalid header '{}': expected 'Name: value'", raw))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| format!("error: invalid header name in '{}': {}", raw, e))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| format!("error: invalid header value in '{}': {}", raw, e))?;
        request = request.with_header(name, value);
    }
    for raw in params {
        let (name, value) = raw
            .split_once('=')
            .ok_or_else(|| format!("error: invalid parameter '{}': expected 'name=value'", raw))?;
        request = request.with_parameter(name, value);
    }
    Ok(request)
}

fn print_execution(execution: &FlowExecution, output: OutputFormat, quiet: bool) {
    let ctx = execution.context();
    let response = ctx.response();

    match output {
        OutputFormat::Json => {
            let headers: serde_json::Map<String, serde_json::Value> = response
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), serde_json::Value::from(v)))
                })
                .collect();
            let json = serde_json::json!({
                "status": execution.status(),
                "steps": execution.steps(),
                "response": {
                    "status": response.status.as_u16(),
                    "headers": headers,
                    "view": response.view,
                },
                "principal": ctx.principal(),
                "output": execution.output(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&json)
                    .unwrap_or_else(|e| format!("serialization error: {}", e))
            );
        }
        OutputFormat::Text => {
            if !quiet {
                for step in execution.steps() {
                    println!(
                        "{}.{} [{}] -> {}",
                        step.flow_id, step.state_id, step.state_type, step.result
                    );
                }
            }
            match execution.status() {
                ExecutionStatus::Paused { state_id, .. } => println!("paused at {}", state_id),
                ExecutionStatus::Ended { outcome, .. } => println!("ended ({})", outcome),
            }
            println!("http status: {}", response.status.as_u16());
            for (name, value) in &response.headers {
                if let Ok(value) = value.to_str() {
                    println!("{}: {}", name, value);
                }
            }
            if let Some(principal) = ctx.principal() {
                println!("principal: {}", principal);
            }
            if let Some(view) = &response.view {
                println!("view: {}", view.view_id);
            }
        }
    }
}
