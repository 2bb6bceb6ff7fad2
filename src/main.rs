use anyhow::Result;
use clap::{Parser, Subcommand};
use rowgen::config::{Config, DEFAULT_CONFIG_FILE};
use rowgen::{analyze_project, codegen, migrations};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Project configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate Rust code from the schema, queries and migrations
    Generate {
        /// Directory to write the generated module into. Defaults to the configured output directory.
        #[arg(long)]
        out: Option<String>,
    },
    /// Analyse every SQL file and report the first error, writing nothing
    Check,
    /// Print the analysed model as JSON
    Inspect {
        /// Path to write the JSON. Prints to stdout if not set.
        #[arg(long)]
        out: Option<String>,
    },
    /// List the migrations in version order
    Migrations,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Generate { out } => {
            let project = analyze_project(&config)?;
            let written = codegen::generate_code(&project, &config, out.as_deref().map(Path::new))?;
            for path in written {
                println!("{}", path.display());
            }
        }
        Commands::Check => {
            let project = analyze_project(&config)?;
            println!(
                "ok: {} statements in {} namespaces, {} shared results, {} migrations",
                project.statements().count(),
                project.namespaces.len(),
                project.shared.results().count(),
                project.migrations.len()
            );
        }
        Commands::Inspect { out } => {
            let project = analyze_project(&config)?;
            let json = serde_json::to_string_pretty(&project)?;
            if let Some(path) = out {
                fs::write(path, json)?;
            } else {
                println!("{}", json);
            }
        }
        Commands::Migrations => {
            let set = migrations::inspect_migrations(&config.migrations_dir())?;
            for migration in set.iter() {
                println!(
                    "{:04}  {}  {}",
                    migration.version, migration.checksum, migration.file_name
                );
            }
            match set.latest() {
                Some(latest) => println!("latest: {}", latest),
                None => println!("no migrations"),
            }
        }
    }
    Ok(())
}
