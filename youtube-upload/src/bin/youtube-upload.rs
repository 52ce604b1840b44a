use clap::Parser;
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use youtube_upload::error::UploadError;
use youtube_upload::options::{self, Config, Options};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let args = Options::parse();
    let result = match Config::try_from(args) {
        Ok(config) => youtube_upload::run_blocking(config).map_err(UploadError::from_report),
        Err(e) => {
            println!("{}", options::usage());
            Err(e)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[{}] {e:#}", e.kind());
            // exit codes are all small and positive
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}
