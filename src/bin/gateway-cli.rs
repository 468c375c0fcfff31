use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Manage the backends of a running Trino gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Admin API key, if the gateway requires one
    #[arg(short, long, env = "GATEWAY_API_KEY")]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every registered backend
    List,
    /// List active backends
    Active,
    /// Register or replace a backend
    Add {
        name: String,
        proxy_to: String,
        /// Routing group; the gateway's default group when omitted
        #[arg(short, long)]
        group: Option<String>,
        #[arg(long)]
        inactive: bool,
    },
    /// Remove a backend
    Delete { name: String },
    /// Send traffic to a backend again
    Activate { name: String },
    /// Stop sending new queries to a backend
    Deactivate { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = format!("{}/gateway/backend", cli.url.trim_end_matches('/'));

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);
    }

    let request = match cli.command {
        Commands::List => client.get(format!("{}/all", base)),
        Commands::Active => client.get(format!("{}/active", base)),
        Commands::Add {
            name,
            proxy_to,
            group,
            inactive,
        } => client.post(format!("{}/modify/add", base)).json(&json!({
            "name": name,
            "proxy_to": proxy_to,
            "routing_group": group,
            "active": !inactive,
        })),
        Commands::Delete { name } => client.post(format!("{}/modify/delete", base)).body(name),
        Commands::Activate { name } => client.post(format!("{}/activate/{}", base, name)),
        Commands::Deactivate { name } => client.post(format!("{}/deactivate/{}", base, name)),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", status),
    }
    Ok(())
}
