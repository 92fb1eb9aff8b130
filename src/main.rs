use std::io::{stdin, stdout, Write};

use nl_sql_assistant::{Chain, PipelineError, TextToSqlChain};
use tracing::error;
use tracing_subscriber::EnvFilter;

const FAILURE_NOTICE: &str = "Failed to process your request. Please try again.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let processor = match TextToSqlChain::initialize().await {
        Ok(processor) => processor,
        Err(e) => {
            error!(error = %e, "failed to initialize");
            eprintln!("Failed to connect to the database. Please check your credentials and try again.");
            return Err(e);
        }
    };

    loop {
        print!("How can I help you?: ");
        stdout().flush()?;

        let mut input = String::new();
        if stdin().read_line(&mut input)? == 0 {
            break;
        }

        let question = input.trim();
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        match processor.run(question.to_string()).await {
            Ok(answer) => println!("Answer: {}", answer),
            Err(e) => match e.downcast_ref::<PipelineError>() {
                Some(PipelineError::EmptyQuestion) => println!("{}", e),
                _ => {
                    error!(error = %e, "question failed");
                    println!("{}", FAILURE_NOTICE);
                }
            },
        }
    }

    Ok(())
}
