use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::value::RawValue;
use server_api::{
    orchestrator::{plan_config_files, plan_image_files},
    payload::{pull_request_title, render_pull_request_body},
    validate,
};
use shared::domain::{ImageUpload, SubmissionForm};
use storage::{SessionStore, SqliteSessionStore};

#[derive(Parser, Debug)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a submission file and print the files and pull request it
    /// would produce, without contacting GitHub.
    Preview {
        form: PathBuf,
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },
    /// Delete expired sessions from a SQLite session database.
    PurgeSessions {
        #[arg(long, default_value = "sqlite://./data/sessions.db")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Preview { form, images } => preview(&form, &images)?,
        Command::PurgeSessions { database_url } => {
            let store = SqliteSessionStore::new(&database_url).await?;
            let purged = store.purge_expired().await?;
            println!("purged {purged} expired session(s) from {database_url}");
        }
    }

    Ok(())
}

/// A submission written by hand. `gpioPins` may be an object or the JSON text
/// the form would send, and `tags` may be a list or a comma-separated string.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormFile {
    slug: Option<String>,
    board_name: Option<String>,
    description: Option<String>,
    chip_type: Option<String>,
    product_link: Option<String>,
    gpio_pins: Option<Box<RawValue>>,
    tags: Option<TagsField>,
    yaml_config: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagsField {
    Text(String),
    List(Vec<String>),
}

impl FormFile {
    fn into_form(self) -> SubmissionForm {
        SubmissionForm {
            slug: self.slug,
            board_name: self.board_name,
            description: self.description,
            chip_type: self.chip_type,
            product_link: self.product_link,
            // Raw text keeps the pin order exactly as written.
            gpio_pins: self.gpio_pins.map(|raw| {
                serde_json::from_str::<String>(raw.get()).unwrap_or_else(|_| raw.get().to_string())
            }),
            tags: self.tags.map(|tags| match tags {
                TagsField::Text(text) => text,
                TagsField::List(list) => list.join(","),
            }),
            yaml_config: self.yaml_config,
            images: Vec::new(),
        }
    }
}

fn read_form_file(raw: &str) -> Result<SubmissionForm> {
    let file: FormFile =
        serde_json::from_str(raw).context("submission file has unexpected field types")?;
    Ok(file.into_form())
}

fn preview(form_path: &Path, image_paths: &[PathBuf]) -> Result<()> {
    let raw = fs::read_to_string(form_path)
        .with_context(|| format!("failed to read {}", form_path.display()))?;
    let mut form = read_form_file(&raw)
        .with_context(|| format!("failed to parse {}", form_path.display()))?;

    for path in image_paths {
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        form.images.push(ImageUpload {
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            content_type: None,
            bytes,
        });
    }

    let submission = validate(form)?;
    let images = plan_image_files(&submission);
    let configs = plan_config_files(&submission);

    println!("files:");
    for file in images.iter().chain(configs.iter()) {
        println!("  {} ({} bytes)", file.path, file.content.len());
    }
    for file in &configs {
        println!("\n--- {} ---", file.path);
        println!("{}", String::from_utf8_lossy(&file.content));
    }

    let image_paths: Vec<String> = images.into_iter().map(|file| file.path).collect();
    println!("--- pull request ---");
    println!("title: {}\n", pull_request_title(&submission));
    println!("{}", render_pull_request_body(&submission, &image_paths));
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
