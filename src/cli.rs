//! CLI struct definitions for the taskmesh command-line interface.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "taskmesh",
    version = env!("CARGO_PKG_VERSION"),
    about = "Local-first coordination engine: human/agent task boards plus semantic tool and knowledge discovery."
)]
pub(crate) struct Cli {
    /// Project directory holding `.taskmesh/` (defaults to the current directory).
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Serve calls as newline-delimited JSON requests on stdin, responses on stdout.
    Serve {
        /// Index the registered tools before accepting calls.
        #[clap(long)]
        index_on_start: bool,
    },
    /// Invoke a single call and print its response envelope.
    Call {
        /// Call name, e.g. `coordinator_list_human_tasks`.
        op: String,
        /// JSON argument object.
        #[clap(long, default_value = "{}")]
        params: String,
    },
    /// List the registered tools.
    Tools {
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Index the registered tools for discovery.
    Index,
    /// Rebuild every vector entry from the document store.
    Reindex,
}
