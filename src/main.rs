use clap::{Parser, Subcommand};
use pdf_rag::Result;
use pdf_rag::commands::{ask_question, clear, search_chunks, serve_mcp, show_health, upload_pdf};
use pdf_rag::config::{run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pdf-rag")]
#[command(about = "Question answering over uploaded PDF documents, with an MCP server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama, the chat model and storage settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Extract, embed and store a PDF
    Upload {
        /// Path to the PDF file
        path: PathBuf,
        /// Run OCR even when the PDF has a usable text layer
        #[arg(long)]
        force_ocr: bool,
    },
    /// Ask a question about the uploaded documents
    Ask {
        /// The question to answer
        question: String,
    },
    /// Show the stored chunks closest to a query
    Search {
        /// Search query
        query: String,
        /// Maximum number of results
        #[arg(long, short, default_value_t = 5)]
        limit: usize,
    },
    /// Delete all stored vectors and the conversation history
    Clear {
        /// Only forget the conversation history
        #[arg(long)]
        memory_only: bool,
    },
    /// Check that the embedding backend and storage are reachable
    Health,
    /// Start MCP server on stdio
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Upload { path, force_ocr } => {
            upload_pdf(&path, force_ocr).await?;
        }
        Commands::Ask { question } => {
            ask_question(&question).await?;
        }
        Commands::Search { query, limit } => {
            search_chunks(&query, limit).await?;
        }
        Commands::Clear { memory_only } => {
            clear(memory_only).await?;
        }
        Commands::Health => {
            show_health().await?;
        }
        Commands::Serve => {
            serve_mcp().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn upload_command_with_path() {
        let cli = Cli::try_parse_from(["pdf-rag", "upload", "plans.pdf"]).expect("parses");

        let Commands::Upload { path, force_ocr } = cli.command else {
            panic!("expected upload command");
        };
        assert_eq!(path, PathBuf::from("plans.pdf"));
        assert!(!force_ocr);
    }

    #[test]
    fn upload_command_with_force_ocr() {
        let cli = Cli::try_parse_from(["pdf-rag", "upload", "scan.pdf", "--force-ocr"])
            .expect("parses");

        assert!(matches!(
            cli.command,
            Commands::Upload {
                force_ocr: true,
                ..
            }
        ));
    }

    #[test]
    fn ask_command_takes_one_question() {
        let cli = Cli::try_parse_from(["pdf-rag", "ask", "How wide is door D-1?"]).expect("parses");

        let Commands::Ask { question } = cli.command else {
            panic!("expected ask command");
        };
        assert_eq!(question, "How wide is door D-1?");
    }

    #[test]
    fn search_limit_defaults_and_overrides() {
        let cli = Cli::try_parse_from(["pdf-rag", "search", "door"]).expect("parses");
        assert!(matches!(cli.command, Commands::Search { limit: 5, .. }));

        let cli = Cli::try_parse_from(["pdf-rag", "search", "door", "--limit", "12"])
            .expect("parses");
        assert!(matches!(cli.command, Commands::Search { limit: 12, .. }));
    }

    #[test]
    fn clear_memory_only_flag() {
        let cli = Cli::try_parse_from(["pdf-rag", "clear"]).expect("parses");
        assert!(matches!(cli.command, Commands::Clear { memory_only: false }));

        let cli = Cli::try_parse_from(["pdf-rag", "clear", "--memory-only"]).expect("parses");
        assert!(matches!(cli.command, Commands::Clear { memory_only: true }));
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["pdf-rag", "config", "--show"]).expect("parses");
        assert!(matches!(cli.command, Commands::Config { show: true }));
    }

    #[test]
    fn health_and_serve_commands() {
        let cli = Cli::try_parse_from(["pdf-rag", "health"]).expect("parses");
        assert!(matches!(cli.command, Commands::Health));

        let cli = Cli::try_parse_from(["pdf-rag", "serve"]).expect("parses");
        assert!(matches!(cli.command, Commands::Serve));
    }

    #[test]
    fn missing_upload_path_is_an_error() {
        let err = Cli::try_parse_from(["pdf-rag", "upload"])
            .err()
            .expect("path is required");
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn invalid_command() {
        let err = Cli::try_parse_from(["pdf-rag", "crawl"])
            .err()
            .expect("unknown subcommand");
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn help_message() {
        let err = Cli::try_parse_from(["pdf-rag", "--help"])
            .err()
            .expect("help exits early");
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }
}
