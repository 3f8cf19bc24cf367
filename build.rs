//! Build script rendering manual pages for `plz-controller`.
//!
//! One page is written for the top-level command and one per subcommand,
//! named `plz-controller.1` and `plz-controller-<subcommand>.1` in `OUT_DIR`.

use std::env;
use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

const BIN_NAME: &str = "plz-controller";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let raw_out = env::var_os("OUT_DIR")
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;
    let out_dir = Utf8PathBuf::from_path_buf(raw_out.into())
        .map_err(|path| io::Error::other(format!("OUT_DIR is not UTF-8: {}", path.display())))?;

    let command = Cli::command();
    render_page(&out_dir, BIN_NAME, command.clone())?;
    for subcommand in command.get_subcommands() {
        let page = format!("{BIN_NAME}-{}", subcommand.get_name());
        render_page(&out_dir, &page, subcommand.clone())?;
    }

    Ok(())
}

fn render_page(out_dir: &Utf8Path, page: &str, command: clap::Command) -> io::Result<()> {
    let mut buffer = Vec::new();
    Man::new(command).render(&mut buffer)?;
    fs::write(out_dir.join(format!("{page}.1")), buffer)
}
