use std::path::PathBuf;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

/// Top-level CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "fichario",
    version,
    author,
    about = "Fichario document intake service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Increase logging verbosity (-v, -vv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the Fichario HTTP server.
    Serve(ServeArgs),
    /// Analyze a local PDF and print the ficha técnica JSON to stdout.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs;

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// PDF document to analyze.
    #[arg(value_name = "PDF")]
    pub input: PathBuf,
    /// PDF whose text layer replaces the built-in ficha template.
    #[arg(long, value_name = "PDF")]
    pub template: Option<PathBuf>,
    /// Send the locally extracted text layer instead of the raw PDF bytes.
    #[arg(long)]
    pub text_layer: bool,
}
