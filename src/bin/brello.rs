use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use brello_ei::{
    config::{WeightDType, DEFAULT_MODEL_ID},
    evaluation::{is_farewell, EVALUATION_CASES, EXAMPLE_PROMPTS, FAREWELL, MODEL_OPTIONS, PROBE_PROMPT},
    model::HubResolver,
    publish::{create_package, upload, LogoStatus, ProcessHubCli, UploadRequest, DEFAULT_INCLUDE, DEFAULT_PACKAGE_DIR, DEFAULT_REPO_NAME},
    training::{Trainer, TrainingConfig},
    utils::{setup_logging, LogConfig},
    BrelloConfig, Features, GenerationOverrides, QuantizationMode, ResponseGenerator,
};

const BANNER: &str = "Brello EI 0 - Emotional Intelligence AI\nCreated by Epic Systems | Engineered by Rehan Temkar";

/// Brello EI 0 command-line tool
#[derive(Parser)]
#[command(name = "brello", version)]
struct Cli {
    /// Debug logging with source locations
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the example conversations, then chat interactively
    Chat {
        #[command(flatten)]
        model: ModelArgs,

        /// Go straight to interactive chat
        #[arg(long)]
        skip_examples: bool,

        /// Keep earlier exchanges in the prompt
        #[arg(long)]
        history: bool,
    },
    /// Check replies for expected empathetic keywords
    Evaluate {
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Try each suggested base model and report which ones work
    Options {
        #[arg(long)]
        device: Option<String>,
    },
    /// Fine-tune a base model on the built-in dialogues
    Train {
        /// JSON file with training settings
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        base_model: Option<String>,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        device: Option<String>,
    },
    /// Build the distribution directory
    Package {
        /// Extra files to copy into the package
        files: Vec<PathBuf>,

        #[arg(long, default_value = DEFAULT_PACKAGE_DIR)]
        dir: PathBuf,

        #[command(flatten)]
        model: ModelArgs,
    },
    /// Upload the package with huggingface-cli
    Upload {
        #[arg(long, default_value = DEFAULT_PACKAGE_DIR)]
        dir: PathBuf,

        /// Prompted for when omitted
        #[arg(long)]
        username: Option<String>,

        #[arg(long, default_value = DEFAULT_REPO_NAME)]
        repo: String,

        #[arg(long, default_value = DEFAULT_INCLUDE)]
        include: String,

        /// Prompted for when omitted
        #[arg(long)]
        logo: Option<PathBuf>,
    },
    /// Report compute devices and hub access
    Doctor {
        #[arg(long, default_value = DEFAULT_MODEL_ID)]
        model: String,
    },
}

#[derive(Args, Clone)]
struct ModelArgs {
    /// JSON configuration file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hub repository or local model directory
    #[arg(short, long)]
    model: Option<String>,

    /// cpu, cuda, cuda:N or metal
    #[arg(long)]
    device: Option<String>,

    #[arg(long)]
    load_in_4bit: bool,

    #[arg(long)]
    load_in_8bit: bool,

    /// f32, f16 or bf16
    #[arg(long)]
    dtype: Option<WeightDType>,

    /// Repository holding GGUF weights for quantized loading
    #[arg(long)]
    quantized_repo: Option<String>,
}

impl ModelArgs {
    fn to_config(&self) -> Result<BrelloConfig> {
        let mut config = match &self.config {
            Some(path) => BrelloConfig::from_file(path)?,
            None => BrelloConfig::default(),
        };
        if let Some(model) = &self.model {
            config.model.model_id = model.clone();
        }
        if let Some(device) = &self.device {
            config.model.device = Some(device.clone());
        }
        if self.load_in_4bit || self.load_in_8bit {
            config.model.quantization = QuantizationMode::from_flags(self.load_in_4bit, self.load_in_8bit)?;
        }
        if let Some(dtype) = self.dtype {
            config.model.dtype = Some(dtype);
        }
        if let Some(repo) = &self.quantized_repo {
            config.model.quantized_repo = Some(repo.clone());
        }
        config.validate()?;
        Ok(config)
    }

    async fn load(&self) -> Result<ResponseGenerator> {
        let config = self.to_config()?;
        let model_id = config.model.model_id.clone();
        println!("Loading Brello EI 0 model ({})...", model_id);

        match ResponseGenerator::builder().with_config(config).load().await {
            Ok(generator) => {
                println!("Model loaded successfully!");
                Ok(generator)
            }
            Err(e) => {
                eprintln!("Error loading model: {}", e);
                eprintln!("You may need to accept the model license on Hugging Face:");
                eprintln!("  https://huggingface.co/{}", model_id);
                eprintln!("and export HF_TOKEN with an access token.");
                Err(e.into())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::verbose(cli.verbose);
    log_config.file_path = cli.log_file.clone();
    setup_logging(log_config)?;

    println!("{}", BANNER);
    println!("{}", "=".repeat(50));

    match cli.command {
        Command::Chat {
            model,
            skip_examples,
            history,
        } => run_chat(&model, skip_examples, history).await,
        Command::Evaluate { model } => run_evaluation(&model).await,
        Command::Options { device } => run_options(device).await,
        Command::Train {
            config,
            base_model,
            output_dir,
            epochs,
            device,
        } => {
            let mut settings = match config {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("cannot read {}", path.display()))?;
                    serde_json::from_str(&raw).with_context(|| format!("cannot parse {}", path.display()))?
                }
                None => TrainingConfig::default(),
            };
            if let Some(base_model) = base_model {
                settings.base_model = base_model;
            }
            if let Some(output_dir) = output_dir {
                settings.output_dir = output_dir;
            }
            if let Some(epochs) = epochs {
                settings.epochs = epochs;
            }
            if device.is_some() {
                settings.device = device;
            }
            run_training(settings).await
        }
        Command::Package { files, dir, model } => {
            let config = model.to_config()?;
            let report = create_package(&dir, &files, &config)?;
            for path in &report.skipped {
                println!("Skipped missing file: {}", path.display());
            }
            println!("Package created at {}", report.dir.display());
            println!("  copied:    {}", report.copied.len());
            println!("  generated: {}", report.generated.len());
            println!("Next: add a logo (see UPLOAD_GUIDE.md), then run `brello upload`.");
            Ok(())
        }
        Command::Upload {
            dir,
            username,
            repo,
            include,
            logo,
        } => run_upload(dir, username, repo, include, logo),
        Command::Doctor { model } => run_doctor(&model).await,
    }
}

async fn run_chat(model: &ModelArgs, skip_examples: bool, history: bool) -> Result<()> {
    let mut generator = model.load().await?;

    if !skip_examples {
        println!("\nExample Emotional Intelligence Responses:");
        println!("{}", "-".repeat(50));
        for (i, message) in EXAMPLE_PROMPTS.iter().enumerate() {
            println!("\n{}. User: {}", i + 1, message);
            let reply = generator.generate_response(message, &GenerationOverrides::default())?;
            println!("Brello EI 0: {}", reply);
            println!("{}", "-".repeat(30));
        }
    }

    println!("\nInteractive Chat Mode");
    println!("Type 'quit' to exit");
    println!("{}", "-".repeat(30));

    let stdin = io::stdin();
    loop {
        let Some(input) = read_line(&stdin, "\nYou: ")? else {
            break;
        };
        if is_farewell(&input) {
            println!("Brello EI 0: {}", FAREWELL);
            break;
        }
        if input.is_empty() {
            continue;
        }
        match generator.chat(&input, history) {
            Ok(reply) => println!("Brello EI 0: {}", reply),
            Err(e) => eprintln!("Generation failed: {}", e),
        }
    }
    Ok(())
}

async fn run_evaluation(model: &ModelArgs) -> Result<()> {
    let mut generator = model.load().await?;

    println!("\nTesting Emotional Intelligence Responses...");
    for (i, case) in EVALUATION_CASES.iter().enumerate() {
        println!("\n{}. Testing: '{}'", i + 1, case.input);
        let start = Instant::now();
        match generator.generate_response(case.input, &GenerationOverrides::default()) {
            Ok(reply) => {
                println!("Response: {}", reply);
                println!("Generation time: {:.2}s", start.elapsed().as_secs_f64());
                let found = case.found_keywords(&reply);
                if found.is_empty() {
                    println!("Expected keywords not found: {:?}", case.expected_keywords);
                } else {
                    println!("Found emotional intelligence keywords: {:?}", found);
                }
            }
            Err(e) => println!("Response generation failed: {}", e),
        }
    }

    println!("\nTesting Chat Interface...");
    match generator.chat("Hello! How are you today?", false) {
        Ok(reply) => println!("Chat response: {}\nChat interface working!", reply),
        Err(e) => println!("Chat interface failed: {}", e),
    }

    println!("\nTesting Generation Parameters...");
    let runs = [
        ("Conservative", GenerationOverrides::new().temperature(0.5).param("max_new_tokens", 100)),
        ("Creative", GenerationOverrides::new().temperature(0.9).param("max_new_tokens", 200)),
    ];
    for (label, overrides) in runs {
        match generator.generate_response("I'm feeling stressed.", &overrides) {
            Ok(reply) => println!("{} response: {}", label, reply),
            Err(e) => println!("Generation parameters failed: {}", e),
        }
    }

    println!("\nAll tests completed!");
    Ok(())
}

async fn run_options(device: Option<String>) -> Result<()> {
    let mut working = Vec::new();

    for option in MODEL_OPTIONS {
        println!("\nTesting: {}", option.description);
        println!("Model: {}", option.model_id);
        println!("{}", "-".repeat(50));

        let mut builder = ResponseGenerator::builder().with_model_id(option.model_id);
        if let Some(device) = &device {
            builder = builder.with_device(device.clone());
        }
        let outcome = match builder.load().await {
            Ok(mut generator) => generator.generate_response(PROBE_PROMPT, &GenerationOverrides::default()),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(reply) => {
                println!("Input: {}", PROBE_PROMPT);
                println!("Response: {}", reply);
                println!("Model working!");
                working.push(option);
            }
            Err(e) => println!("Model failed: {}", e),
        }
    }

    println!("\nResults: {}/{} models working", working.len(), MODEL_OPTIONS.len());
    for option in &working {
        println!("  - {} - {}", option.model_id, option.description);
    }
    println!("\nTo use gated Llama models:");
    println!("1. Accept the license at https://huggingface.co/{}", DEFAULT_MODEL_ID);
    println!("2. Export HF_TOKEN with an access token");
    Ok(())
}

async fn run_training(settings: TrainingConfig) -> Result<()> {
    println!("Loading base model {}...", settings.base_model);
    let mut trainer = Trainer::prepare(settings).await?;

    println!("Starting emotional intelligence training...");
    let report = tokio::task::spawn_blocking(move || trainer.train())
        .await
        .context("training task panicked")??;

    info!(steps = report.optimizer_steps, loss = report.final_loss, "Training finished");
    println!("Training completed in {:.0}s ({} steps, final loss {:.4})", report.elapsed_secs, report.optimizer_steps, report.final_loss);
    println!("Model saved to: {}", report.output_dir.display());
    println!("Use it with: brello chat --model {}", report.output_dir.display());
    Ok(())
}

fn run_upload(
    dir: PathBuf,
    username: Option<String>,
    repo: String,
    include: String,
    logo: Option<PathBuf>,
) -> Result<()> {
    let stdin = io::stdin();

    let username = match username {
        Some(name) => name,
        None => read_line(&stdin, "Enter your Hugging Face username: ")?.unwrap_or_default(),
    };
    if username.trim().is_empty() {
        bail!("Username is required.");
    }

    let logo = match logo {
        Some(path) => Some(path),
        None => {
            let answer = read_line(&stdin, "\nDo you have a logo.png file to upload? (y/n): ")?.unwrap_or_default();
            if answer.eq_ignore_ascii_case("y") {
                read_line(&stdin, "Enter path to your logo.png file: ")?
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
            } else {
                None
            }
        }
    };

    let mut request = UploadRequest::new(username, dir);
    request.repo_name = repo;
    request.include = include;
    request.logo = logo;

    println!("Uploading to {}...", request.repo_id());
    let report = upload(&ProcessHubCli::default(), &request)?;

    if report.repo_created {
        println!("Repository created successfully!");
    } else {
        println!("Repository {} might already exist.", request.repo_name);
    }
    println!("Model files uploaded successfully!");
    match &report.logo {
        LogoStatus::NotRequested => {}
        LogoStatus::Uploaded => println!("Logo uploaded successfully!"),
        LogoStatus::Missing(path) => println!("Logo file not found: {}", path.display()),
        LogoStatus::Failed(reason) => println!("Logo upload failed: {}", reason),
    }
    println!("\nYour model is now available at: {}", report.url());
    Ok(())
}

async fn run_doctor(model: &str) -> Result<()> {
    println!("Checking compute devices...");
    print!("{}", Features::detect());

    println!("\nChecking model access for {}...", model);
    match HubResolver::new().check_access(model).await {
        Ok(files) => println!("Model access confirmed ({} files).", files),
        Err(e) => {
            println!("Model access not available: {}", e);
            println!("Visit https://huggingface.co/{} and accept the model license,", model);
            println!("then export HF_TOKEN with an access token.");
        }
    }
    Ok(())
}

/// Prompts and reads one trimmed line; `None` on end of input.
fn read_line(stdin: &io::Stdin, prompt: &str) -> Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut line = String::new();
    if stdin.lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}
