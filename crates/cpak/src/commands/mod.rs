pub mod extract;
pub mod list;
pub mod pack;

use std::{fs::File, io::BufReader, path::Path};

use binrw::BinRead;
use cpak_content::{
    types::{LoaderTable, ManifestHeader},
    ByteArrayLoader, LoaderDescriptor, LoaderRegistry, PackManifest,
};
use miette::{Context, IntoDiagnostic, Result};
use tracing::debug;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Pack a directory into a manifest and its containers
    Pack(pack::PackArgs),
    /// Print the build info and entries of a manifest
    List(list::ListArgs),
    /// Extract every item of a manifest into a directory
    Extract(extract::ExtractArgs),
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Pack(pack) => pack.handle(),
            Commands::List(list) => list.handle(),
            Commands::Extract(extract) => extract.handle(),
        }
    }
}

/// Open any manifest, treating loaders this tool does not know as raw bytes
pub fn open_manifest(path: &Path) -> Result<PackManifest> {
    let mut reader = BufReader::new(
        File::open(path)
            .into_diagnostic()
            .context(format!("path: {}", path.display()))?,
    );
    ManifestHeader::read(&mut reader).into_diagnostic()?;
    let table = LoaderTable::read(&mut reader).into_diagnostic()?;

    let mut registry = LoaderRegistry::with_builtins();
    for (index, record) in table.loaders.iter().enumerate() {
        let name = record.name.to_str()?;
        if registry.resolve_name(name).is_none() {
            debug!(name, "reading unknown loader as raw bytes");
            registry.register(LoaderDescriptor::new::<ByteArrayLoader>(
                u32::MAX - index as u32,
                name,
            ))?;
        }
    }

    Ok(PackManifest::open(path, &registry)?)
}

#[cfg(test)]
mod test {
    use std::{ffi::OsStr, fs};

    use clap::Parser;
    use miette::{IntoDiagnostic, Result};
    use pretty_assertions::assert_eq;

    use super::{open_manifest, Commands};

    #[derive(Parser)]
    struct Cli {
        #[command(subcommand)]
        command: Commands,
    }

    fn run(args: &[&OsStr]) -> Result<()> {
        let cli = Cli::try_parse_from([OsStr::new("cpak")].into_iter().chain(args.iter().copied()))
            .into_diagnostic()?;
        cli.command.handle()
    }

    #[test]
    fn pack_then_extract() -> Result<()> {
        let source = tempfile::tempdir().into_diagnostic()?;
        fs::create_dir_all(source.path().join("text")).into_diagnostic()?;
        fs::create_dir_all(source.path().join("ui")).into_diagnostic()?;
        fs::write(source.path().join("text/intro.txt"), "hello").into_diagnostic()?;
        fs::write(source.path().join("text/menu.stbl"), "play=Play\nquit=Quit\n")
            .into_diagnostic()?;
        fs::write(source.path().join("ui/logo.png"), [0x89, b'P', b'N', b'G', 0, 0, 0, 0])
            .into_diagnostic()?;

        let output = tempfile::tempdir().into_diagnostic()?;
        let manifest_path = output.path().join("content.cpak");
        run(&[
            OsStr::new("pack"),
            OsStr::new("--directory"),
            source.path().as_os_str(),
            OsStr::new("--file"),
            manifest_path.as_os_str(),
        ])?;

        let manifest = open_manifest(&manifest_path)?;
        let names: Vec<_> = manifest.entries().map(|e| e.name.to_string()).collect();
        assert_eq!(names, vec!["text/intro.txt", "text/menu.stbl", "ui/logo.png"]);

        let extracted = output.path().join("extracted");
        let extract = [
            OsStr::new("extract"),
            OsStr::new("--file"),
            manifest_path.as_os_str(),
            OsStr::new("--directory"),
            extracted.as_os_str(),
        ];
        run(&extract)?;

        assert_eq!(
            fs::read_to_string(extracted.join("text/intro.txt")).into_diagnostic()?,
            "hello"
        );
        assert_eq!(
            fs::read(extracted.join("ui/logo.png")).into_diagnostic()?,
            vec![0x89, b'P', b'N', b'G', 0, 0, 0, 0]
        );
        assert!(extracted.join("text/menu.stbl").is_file());

        // existing files are kept unless --overwrite is passed
        assert!(run(&extract).is_err());
        let mut overwrite = extract.to_vec();
        overwrite.push(OsStr::new("--overwrite"));
        run(&overwrite)?;

        // packing again over an existing manifest needs --overwrite too
        assert!(run(&[
            OsStr::new("pack"),
            OsStr::new("--directory"),
            source.path().as_os_str(),
            OsStr::new("--file"),
            manifest_path.as_os_str(),
        ])
        .is_err());

        Ok(())
    }
}
