use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gencore::{SubmitRequest, Template, Value};
use genruntime::{Engine, EngineConfig, PipelineCompiler, StepRegistry};
use gensteps::{StubArtifactStore, StubInferenceBackend};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "genflow")]
#[command(about = "Template-driven generation pipeline engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a template file through the engine with stub backends
    Run {
        /// Path to template JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// User prompt to seed the job with
        #[arg(short, long)]
        prompt: String,

        /// Job parameters as a JSON object
        #[arg(long)]
        parameters: Option<String>,

        /// Number of queue workers
        #[arg(short, long, default_value_t = 2)]
        workers: usize,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Compile a template file without executing it
    Validate {
        /// Path to template JSON file
        file: PathBuf,
    },

    /// List available step types
    Steps,

    /// Write an example template
    Init {
        /// Output file path
        #[arg(short, long, default_value = "template.json")]
        output: PathBuf,
    },
}

fn builtin_registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    gensteps::register_builtin(
        &mut registry,
        Arc::new(StubInferenceBackend),
        Arc::new(StubArtifactStore::default()),
    );
    registry
}

fn load_template(file: &PathBuf) -> Result<Template> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading template {}", file.display()))?;
    serde_json::from_str(&raw).context("parsing template JSON")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            prompt,
            parameters,
            workers,
            verbose,
        } => {
            let filter = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| filter.into()),
                )
                .init();
            run_template(file, prompt, parameters, workers).await?;
        }

        Commands::Validate { file } => {
            validate_template(file)?;
        }

        Commands::Steps => {
            for step_type in builtin_registry().step_types() {
                println!("{step_type}");
            }
        }

        Commands::Init { output } => {
            let template = example_template();
            std::fs::write(&output, serde_json::to_string_pretty(&template)?)?;
            println!("Wrote example template to {}", output.display());
        }
    }

    Ok(())
}

async fn run_template(
    file: PathBuf,
    prompt: String,
    parameters: Option<String>,
    workers: usize,
) -> Result<()> {
    let template = load_template(&file)?;

    let parameters: HashMap<String, Value> = match parameters {
        Some(raw) => {
            let json: serde_json::Value =
                serde_json::from_str(&raw).context("parsing --parameters")?;
            match Value::from_json(json) {
                Value::Object(map) => map,
                _ => anyhow::bail!("--parameters must be a JSON object"),
            }
        }
        None => HashMap::new(),
    };

    let engine = Engine::start(
        builtin_registry(),
        EngineConfig {
            workers,
            ..EngineConfig::default()
        },
    );

    let template_id = engine.register_template(template).await;
    let mut events = engine.subscribe();
    let job = engine
        .submit(SubmitRequest {
            template_id,
            prompt,
            parameters,
        })
        .await?;
    println!("Submitted job {}", job.id);

    while let Ok(update) = events.recv().await {
        if update.job_id != job.id {
            continue;
        }
        println!("  {:?} {}%", update.status, update.progress);
        if update.is_terminal() {
            break;
        }
    }

    let job = engine.status(job.id).await?;
    match job.error {
        Some(error) => println!("Job failed: {} ({:?})", error.message, error.kind),
        None => {
            let artifacts: serde_json::Value = serde_json::Value::Object(
                job.artifacts
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            );
            println!("{}", serde_json::to_string_pretty(&artifacts)?);
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn validate_template(file: PathBuf) -> Result<()> {
    let template = load_template(&file)?;
    let registry = builtin_registry();
    match PipelineCompiler::new(&registry).compile(&template) {
        Ok(dag) => {
            println!(
                "OK: {} steps, terminal outputs: {:?}",
                dag.len(),
                dag.terminal_outputs
            );
            Ok(())
        }
        Err(err) => anyhow::bail!("template invalid: {err}"),
    }
}

fn example_template() -> Template {
    use gencore::StepSpec;

    Template::new("Photoreal portrait", "portrait")
        .with_step(
            StepSpec::new("enhance_0", "prompt.enhance")
                .with_param(
                    "style_prompts",
                    Value::Array(vec![
                        "highly detailed".into(),
                        "professional photography".into(),
                    ]),
                )
                .with_param("negative_prompt", "blurry, low quality")
                .reads("prompt")
                .writes("enhanced_prompt")
                .writes("negative_prompt")
                .writes("original_prompt"),
        )
        .with_step(
            StepSpec::new("generate_1", "image.generate")
                .reads("enhanced_prompt")
                .reads("negative_prompt")
                .reads("parameters")
                .writes("images")
                .writes("generation_metadata"),
        )
        .with_step(
            StepSpec::new("save_2", "artifact.save")
                .reads("images")
                .writes("saved_images")
                .writes("image_count"),
        )
}
