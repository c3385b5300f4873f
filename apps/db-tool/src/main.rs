//! CLI tool for class definitions and snapshot inspection.
//!
//! Provides commands for:
//! - Validating class definition files without touching data
//! - Applying class definitions to a data directory
//! - Summarizing the classes and objects stored in a snapshot

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use docbase_core::config::DbConfig;
use docbase_core::context::AppContext;
use docbase_core::schema::defined::{validate_definitions, ClassDefinition, DefinedSchemas, DefinedSchemasOptions};
use docbase_core::storage::persistence::{ClassSnapshot, SnapshotStore};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a class definitions file
    Check {
        /// JSON array of class definitions
        schemas: PathBuf,
    },
    /// Apply a class definitions file to a data directory
    Apply {
        schemas: PathBuf,
        #[arg(long)]
        data_dir: PathBuf,
        /// Drop empty classes that have no definition
        #[arg(long)]
        delete_extra_classes: bool,
        /// Drop and re-add fields whose type changed
        #[arg(long)]
        recreate_modified_fields: bool,
        /// Drop fields that have no definition
        #[arg(long)]
        strict: bool,
    },
    /// Print the classes stored in a data directory
    Inspect {
        #[arg(long)]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    match Cli::parse().command {
        Command::Check { schemas } => {
            let definitions = read_definitions(&schemas)?;
            validate_definitions(&definitions)?;
            println!("{}: {} class definitions are valid", schemas.display(), definitions.len());
        }
        Command::Apply {
            schemas,
            data_dir,
            delete_extra_classes,
            recreate_modified_fields,
            strict,
        } => {
            let options = DefinedSchemasOptions {
                delete_extra_classes,
                recreate_modified_fields,
                strict,
            };
            apply(&schemas, data_dir, options).await?;
        }
        Command::Inspect { data_dir } => {
            let store = SnapshotStore::new(&data_dir, &DbConfig::default());
            match store.load()? {
                Some(classes) => print!("{}", summarize(&classes)),
                None => bail!("no snapshot in {}", data_dir.display()),
            }
        }
    }
    Ok(())
}

fn read_definitions(path: &Path) -> anyhow::Result<Vec<ClassDefinition>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid class definitions in {}", path.display()))
}

async fn apply(schemas: &Path, data_dir: PathBuf, options: DefinedSchemasOptions) -> anyhow::Result<()> {
    let definitions = read_definitions(schemas)?;
    let ctx = AppContext::from_config(DbConfig {
        data_dir: Some(data_dir.clone()),
        ..Default::default()
    })?;
    ctx.initialize().await?;
    let report = DefinedSchemas::new(ctx.database.clone(), definitions, options)
        .execute()
        .await?;
    ctx.flush()?;
    info!("Snapshot written to {}", data_dir.display());

    if report.is_empty() {
        println!("Already up to date");
        return Ok(());
    }
    for class_name in &report.created_classes {
        println!("created class {}", class_name);
    }
    for (class_name, field) in &report.added_fields {
        println!("added field {}.{}", class_name, field);
    }
    for (class_name, field) in &report.recreated_fields {
        println!("recreated field {}.{}", class_name, field);
    }
    for (class_name, field) in &report.deleted_fields {
        println!("deleted field {}.{}", class_name, field);
    }
    for class_name in &report.updated_permissions {
        println!("updated permissions of {}", class_name);
    }
    for class_name in &report.updated_indexes {
        println!("updated indexes of {}", class_name);
    }
    for class_name in &report.deleted_classes {
        println!("deleted class {}", class_name);
    }
    Ok(())
}

/// One line per class: name, object count and declared fields.
fn summarize(classes: &[ClassSnapshot]) -> String {
    let mut out = String::new();
    for class in classes {
        let fields = match &class.schema {
            Some(schema) => schema
                .fields
                .iter()
                .map(|(name, field_type)| format!("{}: {}", name, field_type))
                .collect::<Vec<_>>()
                .join(", "),
            None => "-".to_string(),
        };
        out.push_str(&format!(
            "{:<24} {:>8} objects  {}\n",
            class.class_name,
            class.objects.len(),
            fields
        ));
    }
    out
}
