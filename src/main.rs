//! modelsync: versioned model-artifact sync with a remote file repository.
//!
//! ```text
//! modelsync [--config FILE] [--model-dir DIR] [--model NAME=VERSION]... [-v] upload [--overwrite] [--no-dedup-check] [--yes]
//! modelsync ... download [--force] [--yes]
//! modelsync ... check
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use modelsync::commands::{
    check::CheckArgs, download::DownloadArgs, upload::UploadArgs, GlobalArgs,
};
use modelsync::logging::init_logging;

#[derive(Parser, Debug)]
#[command(
    name = "modelsync",
    version,
    about = "Sync versioned model directories with a remote file repository"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload local model directories as the requested versions.
    Upload(UploadArgs),

    /// Switch local model directories to the requested versions.
    Download(DownloadArgs),

    /// Report pending downloads without changing anything.
    Check(CheckArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.global.load_config()?;

    // 文件日志的 guard 需要保留到进程结束
    let _guard = init_logging(&config.log, cli.global.verbose);

    match cli.command {
        Commands::Upload(args) => args.run(&config).await,
        Commands::Download(args) => args.run(&config).await,
        Commands::Check(args) => args.run(&config).await,
    }
}
