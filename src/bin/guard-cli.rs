use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for sentinel-guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    /// Admin API key (Bearer token)
    #[arg(short, long)]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall status of every component
    Status,
    /// Failover counters and circuit breaker state
    Store,
    /// Background task statistics and running tasks
    Tasks,
    /// Deadline statistics
    Deadlines,
    /// Show stored rate limit state for a caller
    Inspect { caller: String },
    /// Clear rate limit state for a caller
    Reset { caller: String },
    /// Force the store circuit breaker closed
    CircuitReset,
}

impl Commands {
    fn request(&self) -> (Method, String) {
        match self {
            Commands::Status => (Method::GET, "/admin/status".to_string()),
            Commands::Store => (Method::GET, "/admin/store".to_string()),
            Commands::Tasks => (Method::GET, "/admin/tasks".to_string()),
            Commands::Deadlines => (Method::GET, "/admin/deadlines".to_string()),
            Commands::Inspect { caller } => (Method::GET, format!("/admin/ratelimit/{}", caller)),
            Commands::Reset { caller } => (Method::DELETE, format!("/admin/ratelimit/{}", caller)),
            Commands::CircuitReset => (Method::POST, "/admin/store/circuit/reset".to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path) = cli.command.request();
    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
