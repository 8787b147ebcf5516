use clap::Args;
use cpak_content::{
    write::PackWriterOptions, BuildMode, PackWriter, StringTable, BYTE_ARRAY_LOADER_ID,
    STRING_TABLE_LOADER_ID, TEXT_LOADER_ID,
};
use miette::{miette, Context, IntoDiagnostic, Result};
use std::{
    fs::File,
    io::{self, Write},
    path::{Component, Path, PathBuf},
};
use tracing::info;
use walkdir::WalkDir;

#[derive(Args)]
pub struct PackArgs {
    /// An input directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A target manifest, containers are written next to it
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Write loose item files instead of bin containers
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Store every item uncompressed
    #[arg(long, default_value_t = false)]
    no_compress: bool,

    /// Largest size of a single bin container in bytes
    #[arg(long, value_name = "BYTES")]
    max_bin_size: Option<u64>,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

/// Loader used for a source file, picked by its extension
fn loader_for(path: &Path) -> u32 {
    match path.extension().and_then(|e| e.to_str()) {
        Some("txt") => TEXT_LOADER_ID,
        Some("stbl") => STRING_TABLE_LOADER_ID,
        _ => BYTE_ARRAY_LOADER_ID,
    }
}

/// Item name for a file below the input directory, always `/` separated
fn item_name(relative: &Path) -> Result<String> {
    relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part
                .to_str()
                .ok_or(miette!("unable to convert {} to a string", relative.display())),
            _ => Err(miette!("unexpected path component in {}", relative.display())),
        })
        .collect::<Result<Vec<_>>>()
        .map(|parts| parts.join("/"))
}

/// Parse `key=value` lines, skipping blank lines and `#` comments
fn parse_string_table(source: &str) -> Result<StringTable> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.split_once('=')
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .ok_or(miette!("expected key=value, found {line:?}"))
        })
        .collect()
}

impl PackArgs {
    pub fn handle(&self) -> Result<()> {
        info!("creating {}", &self.file.display());

        if !self.overwrite && self.file.exists() {
            return Err(miette!("{} already exists", self.file.display()));
        }

        let mut files = WalkDir::new(&self.directory)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
            .collect::<Vec<_>>();
        files.retain(|e| e.path() != self.file);

        if files.is_empty() {
            return Err(miette!("directory is empty"));
        }

        let target = self
            .file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let stem = self
            .file
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or(miette!("{} has no file name", self.file.display()))?;

        let options = PackWriterOptions::builder()
            .build_mode(if self.debug {
                BuildMode::Debug
            } else {
                BuildMode::Release
            })
            .compress(!self.no_compress)
            .maybe_max_bin_size(self.max_bin_size)
            .build();

        let mut pack = PackWriter::new(&target, stem, options)?;
        pack.declare_loader("ByteArray", BYTE_ARRAY_LOADER_ID)?;
        pack.declare_loader("Text", TEXT_LOADER_ID)?;
        pack.declare_loader("StringTable", STRING_TABLE_LOADER_ID)?;

        for file in files {
            let relative = file
                .path()
                .strip_prefix(&self.directory)
                .into_diagnostic()?;
            let name = item_name(relative)?;
            let loader = loader_for(relative);
            info!("packing {name}");

            pack.start_item(&name, loader)
                .context(format!("starting item for {}", relative.display()))?;

            if loader == STRING_TABLE_LOADER_ID {
                let source = std::fs::read_to_string(file.path())
                    .into_diagnostic()
                    .context(format!("reading {}", file.path().display()))?;
                parse_string_table(&source)
                    .context(format!("parsing {}", file.path().display()))?
                    .write_to(&mut pack)?;
                continue;
            }

            let mut f = File::open(file.path())
                .into_diagnostic()
                .context(format!("opening {}", file.path().display()))?;

            io::copy(&mut f, &mut pack)
                .into_diagnostic()
                .context(format!("copying {}", file.path().display()))?;
        }

        pack.flush().into_diagnostic()?;
        let path = pack.finish().context("finalizing pack")?;
        info!("wrote {}", path.display());

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use cpak_content::{BYTE_ARRAY_LOADER_ID, STRING_TABLE_LOADER_ID, TEXT_LOADER_ID};
    use pretty_assertions::assert_eq;

    use super::{item_name, loader_for, parse_string_table};

    #[test]
    fn loader_follows_extension() {
        assert_eq!(loader_for(Path::new("text/intro.txt")), TEXT_LOADER_ID);
        assert_eq!(loader_for(Path::new("strings/menu.stbl")), STRING_TABLE_LOADER_ID);
        assert_eq!(loader_for(Path::new("ui/logo.png")), BYTE_ARRAY_LOADER_ID);
        assert_eq!(loader_for(Path::new("README")), BYTE_ARRAY_LOADER_ID);
    }

    #[test]
    fn item_names_use_forward_slashes() -> miette::Result<()> {
        let relative = Path::new("ui").join("icons").join("close.png");
        assert_eq!(item_name(&relative)?, "ui/icons/close.png");
        assert!(item_name(Path::new("../escape")).is_err());
        Ok(())
    }

    #[test]
    fn string_table_source() -> miette::Result<()> {
        let table = parse_string_table("# menu\nplay = Play\n\nquit=Quit game\n")?;
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("quit"), Some("Quit game"));

        assert!(parse_string_table("no separator").is_err());
        Ok(())
    }
}
