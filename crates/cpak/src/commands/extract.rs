use clap::Args;
use cpak_content::ContentManager;
use miette::{miette, Context, IntoDiagnostic, Result};
use std::{
    fs::File,
    io::Write,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};

#[derive(Args)]
pub struct ExtractArgs {
    /// An input manifest
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let manifest = Arc::new(super::open_manifest(&self.file)?);
        if !manifest.is_release() {
            warn!("debug builds keep every item in its own file, nothing to extract");
            return Ok(());
        }

        let names: Vec<_> = manifest.entries().map(|e| e.name.clone()).collect();
        let manager = ContentManager::new(manifest);

        for name in names {
            let escapes = Path::new(&*name)
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
            if escapes {
                warn!("skipping {name}, it would be written outside the target");
                continue;
            }

            let p = self.directory.join(&*name);
            info!("writing {}", p.display());

            let parent = p
                .parent()
                .ok_or(miette!("unable to find parent of {}", p.display()))?;
            std::fs::create_dir_all(parent).into_diagnostic()?;

            let mut out = if !self.overwrite {
                File::create_new(&p)
                    .into_diagnostic()
                    .context(format!("creating {}", &p.display()))?
            } else {
                File::create(&p)
                    .into_diagnostic()
                    .context(format!("creating {}", &p.display()))?
            };

            let data = manager.load_raw(&name)?;
            out.write_all(&data).into_diagnostic()?;
        }
        Ok(())
    }
}
