//! # Taskmesh
//!
//! A local-first coordination engine for multi-agent work. One process keeps a
//! durable task board (human tasks split into agent tasks and ordered todos,
//! with prompt notes at each level) and a semantic discovery layer that ranks
//! registered tools and stored knowledge against natural-language queries.
//!
//! ## Layout
//!
//! - [`core`]: storage, schemas, validation, embeddings, vectors and the call router
//! - [`plugins`]: the task board, tool discovery and knowledge collections
//!
//! ## Calling convention
//!
//! Every operation is a named call taking a JSON object. The `serve` command
//! accepts newline-delimited [`core::rpc::RpcRequest`]s on stdin and answers
//! each with a [`core::rpc::RpcResponse`] on stdout. Calls run concurrently, so
//! responses may arrive out of order; correlate them by `id`.
//!
//! ## State
//!
//! All state lives under `<project>/.taskmesh/`:
//! `config.toml`, `data/tasks.db`, `data/discovery.db`, `data/vectors.db` and
//! the `data/broker.events.jsonl` audit log.

pub mod core;
pub mod plugins;

mod cli;

use crate::core::context::Context;
use crate::core::error::TaskmeshError;
use crate::core::rpc::{self, Router, RouterBuilder, RpcRequest, RpcResponse};
use crate::plugins::{discovery, knowledge, todo};
use clap::Parser;
use cli::{Cli, Command, OutputFormat};
use colored::Colorize;
use serde_json::Value as JsonValue;
use std::io::{BufRead, Write};
use std::sync::Mutex;

/// Builds the router holding every built-in capability.
pub fn build_router() -> Result<Router, TaskmeshError> {
    let mut builder = RouterBuilder::new();
    for cap in todo::capabilities()
        .into_iter()
        .chain(knowledge::capabilities())
        .chain(discovery::capabilities())
    {
        builder.install(cap)?;
    }
    Ok(builder.build())
}

fn respond(router: &Router, ctx: &Context, line: &str) -> RpcResponse {
    match serde_json::from_str::<RpcRequest>(line) {
        Ok(req) => router.handle(ctx, &req),
        Err(e) => rpc::error_response(
            rpc::default_request_id(),
            "invalid_request".to_string(),
            &JsonValue::Null,
            &TaskmeshError::ValidationError(format!("malformed request: {}", e)),
        ),
    }
}

/// Writes one full line. A writer poisoned by a panicking request is still usable.
fn write_line<W: Write>(output: &Mutex<W>, line: &str) -> std::io::Result<()> {
    let mut out = output.lock().unwrap_or_else(|p| p.into_inner());
    writeln!(out, "{}", line)?;
    out.flush()
}

/// Answers newline-delimited requests from `input` until EOF.
///
/// Each request runs on the rayon pool; responses are written whole, one per
/// line, in completion order.
pub fn serve<R, W>(router: &Router, ctx: &Context, input: R, output: W) -> Result<(), TaskmeshError>
where
    R: BufRead,
    W: Write + Send,
{
    let output = Mutex::new(output);
    let mut read_error = None;

    rayon::in_place_scope(|scope| {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let output = &output;
            scope.spawn(move |_| {
                let response = respond(router, ctx, &line);
                let encoded = match serde_json::to_string(&response) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        eprintln!("warn: failed to encode response {}: {}", response.id, e);
                        return;
                    }
                };
                if let Err(e) = write_line(output, &encoded) {
                    eprintln!("warn: failed to write response {}: {}", response.id, e);
                }
            });
        }
    });

    match read_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

pub fn run() -> Result<(), TaskmeshError> {
    let cli = Cli::parse();
    let project_root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let router = build_router()?;

    match cli.command {
        Command::Tools { format } => {
            let defs = router.registry().snapshot();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&defs)?),
                OutputFormat::Text => {
                    for def in defs {
                        println!("{} {}", def.name.bright_cyan().bold(), def.description.dimmed());
                    }
                }
            }
        }
        Command::Index => {
            let ctx = Context::open(&project_root)?;
            let report = discovery::index_tools(&ctx, &router.registry().snapshot())?;
            println!(
                "{} indexed {} tools",
                "✓".bright_green(),
                report.indexed.to_string().bright_white().bold()
            );
            for name in &report.removed {
                println!("  {} {}", "-".bright_red(), name.dimmed());
            }
        }
        Command::Reindex => {
            let ctx = Context::open(&project_root)?;
            let tools = discovery::reindex_tools(&ctx)?;
            let entries = knowledge::reindex_knowledge(&ctx)?;
            println!(
                "{} reindexed {} tools and {} knowledge entries",
                "✓".bright_green(),
                tools,
                entries
            );
        }
        Command::Call { op, params } => {
            let ctx = Context::open(&project_root)?;
            let params: JsonValue = serde_json::from_str(&params).map_err(|e| {
                TaskmeshError::ValidationError(format!("--params is not valid JSON: {}", e))
            })?;
            let response = router.handle(
                &ctx,
                &RpcRequest {
                    op,
                    params,
                    id: rpc::default_request_id(),
                },
            );
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                std::process::exit(1);
            }
        }
        Command::Serve { index_on_start } => {
            let ctx = Context::open(&project_root)?;
            if index_on_start {
                let report = discovery::index_tools(&ctx, &router.registry().snapshot())?;
                eprintln!("{} indexed {} tools", "✓".bright_green(), report.indexed);
            }
            let stdin = std::io::stdin();
            serve(&router, &ctx, stdin.lock(), std::io::stdout())?;
        }
    }
    Ok(())
}
