use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use groq_ask::schema::{Answer, Question};
use serde_json::Value;

#[derive(Parser)]
struct Args {
    /// Endpoint URL to handle http request.
    #[clap(long, default_value = "http://127.0.0.1:8000/ask")]
    endpoint: String,

    /// Question to ask.
    #[clap(required = true)]
    question: Vec<String>,
}

async fn ask(endpoint: &str, question: String) -> anyhow::Result<String> {
    let response = reqwest::Client::builder()
        .no_proxy()
        .build()
        .context("failed to build HTTP client")?
        .post(endpoint)
        .json(&Question { question })
        .send()
        .await
        .with_context(|| format!("failed to reach {}", endpoint))?;

    let status = response.status();
    if status.is_success() {
        let answer: Answer = response
            .json()
            .await
            .context("response is not an answer body")?;
        return Ok(answer.answer);
    }

    let body: Value = response.json().await.unwrap_or(Value::Null);
    let detail = match &body["detail"] {
        Value::String(detail) => detail.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    bail!("{}: {}", status, detail)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match ask(&args.endpoint, args.question.join(" ")).await {
        Ok(answer) => {
            println!("{}", answer);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_has_context() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = format!("http://{}/ask", addr);
        let err = ask(&endpoint, "hello?".to_string()).await.unwrap_err();
        assert!(format!("{:#}", err).starts_with(&format!("failed to reach {}", endpoint)));
    }
}
