
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, OcrEngineKind, OllamaConfig};

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 PDF RAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config()?;

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure your local Ollama instance for embedding generation.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Answer Model").bold().yellow());
    configure_llm(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Vector Storage").bold().yellow());
    configure_vector_storage(&mut config)?;

    eprintln!();
    eprintln!("{}", style("OCR").bold().yellow());
    configure_ocr(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before uploading.");
    }

    if config.llm.api_key().is_none() {
        eprintln!(
            "{}",
            style(format!(
                "⚠ Warning: {} is not set, answers will fall back to an apology",
                config.llm.api_key_env
            ))
            .yellow()
        );
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!(
        "  Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Answer Model:").bold().yellow());
    eprintln!("  Endpoint: {}", style(&config.llm.base_url).cyan());
    eprintln!("  Model: {}", style(&config.llm.model).cyan());
    eprintln!(
        "  API key ({}): {}",
        config.llm.api_key_env,
        if config.llm.api_key().is_some() {
            style("set").green()
        } else {
            style("missing").red()
        }
    );

    eprintln!();
    eprintln!("{}", style("Vector Storage:").bold().yellow());
    eprintln!(
        "  Remote index: {} ({})",
        style(config.remote_index_uri()).cyan(),
        if config.vector.remote_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    eprintln!(
        "  Snapshots: {}",
        style(config.snapshot_dir().display()).cyan()
    );
    eprintln!("  Top K: {}", style(config.vector.top_k).cyan());

    eprintln!();
    eprintln!("{}", style("Extraction:").bold().yellow());
    eprintln!(
        "  OCR engine: {}",
        style(format!("{:?}", config.extraction.ocr_engine).to_lowercase()).cyan()
    );
    eprintln!(
        "  Chunking: {} words, {} overlap",
        style(config.chunking.chunk_size_words).cyan(),
        style(config.chunking.overlap_words).cyan()
    );
    eprintln!(
        "  Max upload: {} MB",
        style(config.upload.max_file_size_mb).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config() -> Result<Config> {
    let config_dir = Config::config_dir().context("Failed to resolve configuration directory")?;
    Config::load(&config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No usable configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: config_dir.clone(),
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(ollama.embedding_dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 64 and 4096")
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_embedding_dimension(dimension)?;

    Ok(())
}

fn configure_llm(config: &mut Config) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("Chat completion endpoint")
        .default(config.llm.base_url.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            url::Url::parse(input)
                .map(|_| ())
                .map_err(|_| "Endpoint must be a valid URL")
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Answer model")
        .default(config.llm.model.clone())
        .interact_text()?;

    let api_key_env: String = Input::new()
        .with_prompt("Environment variable holding the API key")
        .default(config.llm.api_key_env.clone())
        .interact_text()?;

    config.llm.base_url = base_url;
    config.llm.model = model;
    config.llm.api_key_env = api_key_env;
    Ok(())
}

fn configure_vector_storage(config: &mut Config) -> Result<()> {
    config.vector.remote_enabled = Confirm::new()
        .with_prompt("Use the LanceDB index (falls back to local snapshots when unreachable)?")
        .default(config.vector.remote_enabled)
        .interact()?;

    if config.vector.remote_enabled {
        let uri: String = Input::new()
            .with_prompt("LanceDB URI")
            .default(config.remote_index_uri())
            .interact_text()?;
        config.vector.remote_uri = if uri == config.vector_database_path().display().to_string() {
            None
        } else {
            Some(uri)
        };
    }

    Ok(())
}

fn configure_ocr(config: &mut Config) -> Result<()> {
    let engines = [
        OcrEngineKind::Tesseract,
        OcrEngineKind::Http,
        OcrEngineKind::Disabled,
    ];
    let labels = &["tesseract (local binary)", "http (OCR service)", "disabled"];
    let default_index = engines
        .iter()
        .position(|&engine| engine == config.extraction.ocr_engine)
        .unwrap_or(0);

    let index = Select::new()
        .with_prompt("OCR engine")
        .default(default_index)
        .items(labels)
        .interact()?;
    config.extraction.ocr_engine = engines[index];

    if config.extraction.ocr_engine == OcrEngineKind::Http {
        let url: String = Input::new()
            .with_prompt("OCR service URL")
            .default(
                config
                    .extraction
                    .ocr_service_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:8866/ocr".to_string()),
            )
            .interact_text()?;
        config.extraction.ocr_service_url = Some(url);
    }

    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
