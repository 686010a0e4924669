use clap::{Parser, Subcommand, ValueEnum};
use harcap_lib::{BlockPolicy, Viewport};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "harcap")]
#[command(
    version,
    about = "HAR Capture - Record the network trace of a headless page load as an HTTP Archive",
    long_about = "HAR Capture (harcap)\n\nModes:\n- capture: load a URL in an isolated headless browser and record its network activity as HAR 1.2.\n- ingest: validate and retain an externally produced HAR file.\n\nUse --help on any subcommand for details."
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Enable debug logging on stderr")]
    pub verbose: bool,

    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Optional config file (TOML); also read from HARCAP_CONFIG. CLI flags override config"
    )]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture the network trace of a page load
    Capture {
        #[arg(help = "Target URL; https:// is assumed when no scheme is given")]
        url: String,

        #[arg(
            long,
            value_name = "SECS",
            help = "Budget (seconds) for navigation plus network settle [default: 30]"
        )]
        timeout: Option<u64>,

        #[arg(
            long,
            value_name = "KINDS",
            value_parser = BlockPolicy::parse_list,
            conflicts_with = "no_block",
            help = "Resource kinds to abort (comma-separated, e.g. image,stylesheet,font,media)"
        )]
        block: Option<BlockPolicy>,

        #[arg(long, help = "Do not abort any requests")]
        no_block: bool,

        #[arg(long, help = "Viewport dimensions (WIDTHxHEIGHT) [default: 1280x800]")]
        viewport: Option<Viewport>,

        #[arg(
            long,
            value_name = "PATH",
            help = "Write the HAR file here instead of inlining it in the output"
        )]
        har: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "json", help = "Output format")]
        format: OutputFormat,

        #[arg(long, short, help = "Output file path (stdout if omitted)")]
        output: Option<PathBuf>,
    },

    /// Validate and retain an externally produced HAR file
    Ingest {
        #[arg(help = "HAR file to ingest")]
        file: PathBuf,

        #[arg(long, value_name = "DIR", help = "Directory retaining uploads")]
        uploads_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "json", help = "Output format")]
        format: OutputFormat,

        #[arg(long, short, help = "Output file path (stdout if omitted)")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Pretty,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands, OutputFormat};
    use clap::Parser;
    use harcap_lib::ResourceKind;

    #[test]
    fn capture_command_uses_defaults() {
        let cli = Cli::parse_from(["harcap", "capture", "example.com"]);
        match cli.command {
            Commands::Capture {
                url,
                timeout,
                block,
                no_block,
                viewport,
                har,
                format,
                output,
            } => {
                assert_eq!(url, "example.com");
                assert!(timeout.is_none());
                assert!(block.is_none());
                assert!(!no_block);
                assert!(viewport.is_none());
                assert!(har.is_none());
                assert_eq!(format, OutputFormat::Json);
                assert!(output.is_none());
            }
            _ => panic!("expected capture command"),
        }
        assert!(!cli.verbose);
    }

    #[test]
    fn capture_command_parses_overrides() {
        let cli = Cli::parse_from([
            "harcap",
            "--verbose",
            "capture",
            "https://example.com",
            "--timeout",
            "5",
            "--block",
            "images,fonts",
            "--viewport",
            "800x600",
            "--har",
            "out.har",
            "--format",
            "pretty",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Capture {
                timeout,
                block,
                viewport,
                har,
                format,
                ..
            } => {
                assert_eq!(timeout, Some(5));
                let block = block.expect("block list");
                assert!(block.blocks(ResourceKind::Image));
                assert!(block.blocks(ResourceKind::Font));
                assert!(!block.blocks(ResourceKind::Stylesheet));
                assert_eq!(viewport.map(|v| v.width), Some(800));
                assert_eq!(har.as_deref(), Some(std::path::Path::new("out.har")));
                assert_eq!(format, OutputFormat::Pretty);
            }
            _ => panic!("expected capture command"),
        }
    }

    #[test]
    fn block_rejects_document_and_conflicts_with_no_block() {
        assert!(Cli::try_parse_from(["harcap", "capture", "example.com", "--block", "document"]).is_err());
        assert!(Cli::try_parse_from(["harcap", "capture", "example.com", "--block", "image", "--no-block"]).is_err());
    }

    #[test]
    fn ingest_command_parses() {
        let cli = Cli::parse_from(["harcap", "ingest", "trace.har", "--uploads-dir", "/tmp/up"]);
        match cli.command {
            Commands::Ingest { file, uploads_dir, .. } => {
                assert_eq!(file.to_str(), Some("trace.har"));
                assert_eq!(uploads_dir.as_deref().and_then(|p| p.to_str()), Some("/tmp/up"));
            }
            _ => panic!("expected ingest command"),
        }
    }
}
