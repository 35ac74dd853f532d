//! Cash gateway operator CLI
//!
//! Talks to a running gateway over its HTTP API.
//!
//! Usage:
//!   cargo run --bin cashctl -- request 7.50     # open a payment session
//!   cargo run --bin cashctl -- pay 5            # credit the session manually
//!   cargo run --bin cashctl -- status           # wait for the next payment event
//!   cargo run --bin cashctl -- metrics

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "cashctl")]
#[command(about = "Cash gateway operator CLI")]
struct Args {
    /// Gateway base URL
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    url: String,

    /// API base path on the gateway
    #[arg(long, default_value = "/api")]
    base_path: String,

    /// Request timeout in seconds (status waits up to 120 s on the server)
    #[arg(long, default_value_t = 130)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a payment session for an amount
    Request { amount: f64 },
    /// Credit the active session as if currency had been inserted
    Pay { amount: f64 },
    /// Wait for the next tubeStatus or paymentCompleted event
    Status,
    /// Dump Prometheus metrics
    Metrics,
}

fn endpoint(args: &Args, path: &str) -> String {
    let mut url = args.url.trim_end_matches('/').to_string();
    let base = args.base_path.trim_matches('/');
    if !base.is_empty() {
        url.push('/');
        url.push_str(base);
    }
    url.push('/');
    url.push_str(path.trim_start_matches('/'));
    url
}

async fn print_json(response: reqwest::Response) -> anyhow::Result<()> {
    let status = response.status();
    let body: Value = response.json().await.context("gateway returned a non-JSON body")?;
    println!("{} {}", status.as_u16(), serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        anyhow::bail!("gateway answered {status}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .http1_only()
        .build()
        .context("failed to build HTTP client")?;

    match &args.command {
        Command::Request { amount } => {
            let response = client
                .post(endpoint(&args, "efectivo/monto"))
                .json(&json!({ "amount": amount }))
                .send()
                .await
                .context("amount request failed")?;
            print_json(response).await
        }
        Command::Pay { amount } => {
            let response = client
                .post(endpoint(&args, "efectivo/pagar"))
                .json(&json!({ "amount": amount }))
                .send()
                .await
                .context("manual payment failed")?;
            print_json(response).await
        }
        Command::Status => {
            let response = client
                .get(endpoint(&args, "efectivo/estado"))
                .send()
                .await
                .context("status request failed")?;
            print_json(response).await
        }
        Command::Metrics => {
            let url = format!("{}/metrics", args.url.trim_end_matches('/'));
            let body = client
                .get(url)
                .send()
                .await
                .context("metrics request failed")?
                .text()
                .await?;
            print!("{body}");
            Ok(())
        }
    }
}
