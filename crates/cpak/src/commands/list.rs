use clap::Args;
use itertools::Itertools;
use miette::Result;
use owo_colors::OwoColorize;
use std::path::PathBuf;

#[derive(Args)]
pub struct ListArgs {
    /// An input manifest
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,
}

impl ListArgs {
    pub fn handle(&self) -> Result<()> {
        let manifest = super::open_manifest(&self.file)?;

        let mode = if manifest.is_release() {
            "release"
        } else {
            "debug"
        };
        println!(
            "{} ({mode}, timestamp {})",
            manifest.path().display().bold(),
            manifest.timestamp()
        );
        println!(
            "loaders: {}",
            manifest
                .loaders()
                .iter()
                .map(|(id, loader)| format!("{}={id}", loader.display_name()))
                .join(", ")
        );

        if !manifest.is_release() {
            println!("items are stored as loose .dci files next to the manifest");
            return Ok(());
        }

        for container in manifest.containers() {
            println!(
                "{} ({} items)",
                container.path().display().bold(),
                container.entries().len()
            );
            for entry in container.entries() {
                let loader = manifest
                    .loader(entry.loader_id)
                    .map(|l| l.display_name())
                    .unwrap_or("?");
                let size = if entry.is_compressed() {
                    format!("{} -> {}", entry.compressed_size, entry.uncompressed_size)
                        .green()
                        .to_string()
                } else {
                    entry.uncompressed_size.to_string()
                };
                println!("  {} [{loader}] {size}", entry.name);
            }
        }

        Ok(())
    }
}
