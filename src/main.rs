// src/main.rs

use deploydag::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();

    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("deploydag error: {err:?}");
        std::process::exit(1);
    }

    if let Err(err) = run(args).await {
        eprintln!("deploydag error: {err}");
        if err.is_runtime() {
            eprintln!("already applied remote changes were not rolled back");
        }
        std::process::exit(err.exit_code());
    }
}
