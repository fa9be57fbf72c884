use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = dvrctl::Cli::parse();
    if let Err(err) = dvrctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
