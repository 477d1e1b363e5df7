use chartflow_cli::{command, run, CliArgs};

#[tokio::main]
async fn main() {
    let matches = command().get_matches();
    let code = run(CliArgs::from_matches(&matches)).await;
    std::process::exit(code);
}
