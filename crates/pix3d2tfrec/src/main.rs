use anyhow::Result;
use clap::Parser;

use pix3d2tfrec::{convert, Config};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    convert::run(&config)?;

    Ok(())
}
