use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "lifecyclectl")]
#[command(about = "Management CLI for the request lifecycle engine", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Admin API key; must match `admin.api_key` in the engine config
    #[arg(short, long, env = "LIFECYCLE_ADMIN_KEY", hide_env_values = true)]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check engine status
    Status,
    /// List in-flight requests
    Requests,
    /// Force-terminate an in-flight request
    Kill {
        /// Request id as shown by `requests`
        id: String,
        /// Reason sent to the client
        #[arg(short, long)]
        reason: Option<String>,
        /// HTTP status sent to the client
        #[arg(short, long)]
        status: Option<u16>,
    },
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

    let res = match cli.command {
        Commands::Status => {
            client.get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Requests => {
            client.get(format!("{}/admin/requests", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Kill { id, reason, status } => {
            client.delete(format!("{}/admin/requests/{}", cli.url, id))
                .headers(headers)
                .json(&json!({ "reason": reason, "status": status }))
                .send()
                .await?
        }
    };
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_key_is_required() {
        let cli = Cli::try_parse_from(["lifecyclectl", "--key", "s3cret", "status"]).unwrap();
        assert_eq!(cli.key, "s3cret");
        assert_eq!(cli.url, "http://localhost:8081");

        if std::env::var_os("LIFECYCLE_ADMIN_KEY").is_none() {
            let err = Cli::try_parse_from(["lifecyclectl", "status"]).err().unwrap();
            assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        }
    }
}
