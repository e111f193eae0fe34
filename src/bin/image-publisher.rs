//! Image Publisher CLI
//!
//! Publishes disk images to an image catalog

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image_publisher::catalog::CatalogReader;
use image_publisher::core::{ConfigLoadOptions, ConfigLoader, PublishError, PublisherConfig};
use image_publisher::orchestration::{ImageMetadata, PublishContext, PublishRequest};
use image_publisher::security::Credentials;
use image_publisher::{CatalogImageRecord, ImagePublisher};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Disk image publishing assistant
#[derive(Parser)]
#[command(name = "image-publisher")]
#[command(version)]
#[command(about = "Publish disk images to an image catalog", long_about = None)]
struct Cli {
    /// Configuration file (default: .image-publisher.yaml in the current directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish an image file
    Publish {
        /// Image name in the catalog
        name: String,

        /// Local image file
        file: PathBuf,

        /// Staging container for task imports
        #[arg(long)]
        container: Option<String>,

        #[arg(long)]
        disk_format: Option<String>,

        #[arg(long)]
        container_format: Option<String>,

        /// Make the image public
        #[arg(long)]
        public: bool,

        /// Minimum disk size in GB
        #[arg(long)]
        min_disk: Option<String>,

        /// Minimum RAM in MB
        #[arg(long)]
        min_ram: Option<String>,

        /// Protect the image from deletion
        #[arg(long)]
        protected: bool,

        /// Custom property, repeatable
        #[arg(long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,

        /// Import through an asynchronous task (v2 catalogs)
        #[arg(long)]
        use_tasks: bool,

        /// Return once data is uploaded, without waiting for the image to become active
        #[arg(long)]
        no_wait: bool,

        /// Overall timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Upload even if the same file is already published under this name
        #[arg(long)]
        allow_duplicates: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List images in the catalog
    List,

    /// Show one image by name or id
    Show {
        name_or_id: String,
    },

    /// Validate configuration
    CheckConfig,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\n❌ Error");
            eprintln!("{:#}", e);
            process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut load_options = ConfigLoadOptions::from_process_env();
    load_options.config_file = cli.config;
    let credentials = Credentials::from_env(&load_options.env);
    let config = ConfigLoader::load(load_options)
        .await
        .context("cannot load configuration")?;

    match cli.command {
        Commands::Publish {
            name,
            file,
            container,
            disk_format,
            container_format,
            public,
            min_disk,
            min_ram,
            protected,
            properties,
            use_tasks,
            no_wait,
            timeout,
            allow_duplicates,
            json,
        } => {
            let request = PublishRequest {
                name,
                artifact: file,
                digests: None,
                container,
                disk_format,
                container_format,
                metadata: ImageMetadata {
                    is_public: public,
                    min_disk,
                    min_ram,
                    protected: protected.then_some(true),
                    properties: parse_properties(&properties)?,
                    meta: BTreeMap::new(),
                },
                use_tasks: use_tasks.then_some(true),
                wait: no_wait.then_some(false),
                timeout: timeout.map(Duration::from_secs),
                allow_duplicates,
            };
            publish_command(config, credentials, request, json).await
        }
        Commands::List => list_command(config, credentials).await,
        Commands::Show { name_or_id } => show_command(config, credentials, &name_or_id).await,
        Commands::CheckConfig => check_config_command(&config),
    }
}

fn connect(config: PublisherConfig, credentials: Credentials) -> Result<Arc<PublishContext>> {
    let validation = ConfigLoader::validate(&config);
    if !validation.valid {
        anyhow::bail!("{}", ConfigLoader::format_validation_result(&validation));
    }
    Ok(Arc::new(PublishContext::connect(config, credentials)?))
}

async fn publish_command(
    config: PublisherConfig,
    credentials: Credentials,
    request: PublishRequest,
    json: bool,
) -> Result<i32> {
    if !json {
        println!("\n📦 image-publisher\n");
    }

    let mut publisher = ImagePublisher::new(connect(config, credentials)?);

    match publisher.publish(request).await {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(0);
            }

            if report.duplicate {
                println!("ℹ️  Already published, nothing uploaded");
            }
            if let Some(record) = &report.record {
                print_record(record);
            }
            println!("\nStrategy: {}", report.strategy);
            println!("State:    {:?}", report.state);
            println!("\n✅ Publishing completed in {}ms", report.duration_ms);
            Ok(0)
        }
        Err(e) => {
            eprintln!("\n❌ Publishing failed [{}]: {}", e.code(), e);
            for rollback_error in publisher.rollback_errors() {
                eprintln!("⚠️  {}", rollback_error);
            }
            print_suggestions(&e);
            Ok(1)
        }
    }
}

async fn list_command(config: PublisherConfig, credentials: Credentials) -> Result<i32> {
    let context = connect(config, credentials)?;
    let images = CatalogReader::new(context.catalog()).list().await?;

    if images.is_empty() {
        println!("No images");
        return Ok(0);
    }

    for image in images {
        println!(
            "{:<38} {:<10} {}",
            image.id.as_deref().unwrap_or("-"),
            image.status.as_str(),
            image.name
        );
    }
    Ok(0)
}

async fn show_command(
    config: PublisherConfig,
    credentials: Credentials,
    name_or_id: &str,
) -> Result<i32> {
    let context = connect(config, credentials)?;

    match CatalogReader::new(context.catalog()).find_one(name_or_id).await {
        Ok(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(0)
        }
        Err(e @ (PublishError::NotFound { .. } | PublishError::Ambiguous { .. })) => {
            eprintln!("❌ {}", e);
            print_suggestions(&e);
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

fn check_config_command(config: &PublisherConfig) -> Result<i32> {
    println!("\n🔍 Configuration Check\n");

    let result = ConfigLoader::validate(config);
    println!("{}", ConfigLoader::format_validation_result(&result));
    println!("\n{}", serde_yaml::to_string(config)?);

    Ok(if result.valid { 0 } else { 1 })
}

fn parse_properties(pairs: &[String]) -> Result<BTreeMap<String, serde_json::Value>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("property '{}' is not KEY=VALUE", pair))?;
            Ok((key.trim().to_string(), serde_json::Value::from(value)))
        })
        .collect()
}

fn print_record(record: &CatalogImageRecord) {
    println!("Image:    {}", record.name);
    println!("ID:       {}", record.id.as_deref().unwrap_or("-"));
    println!("Status:   {}", record.status);
    println!("Visible:  {}", record.visibility);
    if let Some(locator) = record.source_locator() {
        println!("Source:   {}", locator);
    }
}

fn print_suggestions(error: &PublishError) {
    let actions = error.suggested_actions();
    if actions.is_empty() {
        return;
    }
    eprintln!("\n💡 Suggested actions:");
    for action in actions {
        eprintln!("  - {}", action);
    }
}
