mod cmd;

use clap::Parser;
use cmd::config::{CheckArgs, Effective};

#[derive(Parser)]
#[command(name = "fifo-check", about = "Проверка FIFO-порядка внутри message group")]
struct Cli {
    #[command(flatten)]
    args: CheckArgs,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let eff = match Effective::new(&cli.args) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    match cmd::run::run(eff).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
