use std::io::Write;

use anyhow::Result;
use brello_ei::{
    evaluation::{is_farewell, FAREWELL},
    utils::{setup_logging, LogConfig},
    GenerationOverrides, ResponseGenerator,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    setup_logging(LogConfig {
        level: tracing::Level::INFO,
        timestamps: true,
        ..Default::default()
    })?;

    let model_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "TinyLlama/TinyLlama-1.1B-Chat-v1.0".to_string());

    info!(model_id = %model_id, "Initializing generator...");
    let mut generator = ResponseGenerator::builder()
        .with_model_id(model_id)
        .load()
        .await?;

    let reply = generator.generate_response(
        "I'm feeling really stressed about my presentation tomorrow.",
        &GenerationOverrides::new().temperature(0.5).param("max_new_tokens", 100),
    )?;
    println!("Brello EI 0: {}", reply);

    // Multi-turn chat until the user says goodbye
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if is_farewell(input) {
            println!("Brello EI 0: {}", FAREWELL);
            break;
        }

        let reply = generator.chat(input, true)?;
        println!("Brello EI 0: {}", reply);
        info!(turns = generator.history().len(), "Reply generated");
    }

    Ok(())
}
