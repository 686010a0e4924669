mod cli;
mod commands;
mod formatting;
mod settings;

use std::process::ExitCode;

use cli::Commands;
use commands::{run_capture, run_ingest};
use settings::CaptureOverrides;

#[tokio::main]
async fn main() -> ExitCode {
    run().await
}

async fn run() -> ExitCode {
    let args = cli::parse();
    harcap_lib::logging::init(args.verbose);

    match args.command {
        Commands::Capture {
            url,
            timeout,
            block,
            no_block,
            viewport,
            har,
            format,
            output,
        } => {
            let overrides = CaptureOverrides {
                timeout_secs: timeout,
                block,
                no_block,
                viewport,
            };
            run_capture(args.config, url, overrides, har, format, output).await
        }
        Commands::Ingest {
            file,
            uploads_dir,
            format,
            output,
        } => run_ingest(args.config, file, uploads_dir, format, output).await,
    }
}
