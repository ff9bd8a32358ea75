// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "runa",
    about = "Agent execution runtime: run declarative agent documents against LLM tool loops",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose logging to stderr (same as DEBUG=1)
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an agent document once and print a summary
    Run {
        /// Path to the .agentuse document
        file: PathBuf,
        /// Task for the agent (defaults to "Follow your instructions.")
        #[arg(long, short)]
        prompt: Option<String>,
        /// Model override (provider:model[:suffix])
        #[arg(long, short)]
        model: Option<String>,
        /// Run timeout in seconds, overriding the document
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Parse an agent document and report problems without running it
    Validate {
        /// Path to the .agentuse document
        file: PathBuf,
    },
    /// Work with scheduled agents
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// List agents under a directory that declare a schedule
    List {
        /// Directory to scan for .agentuse files
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Run the scheduler for all scheduled agents under a directory
    Start {
        /// Directory to scan for .agentuse files
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}
