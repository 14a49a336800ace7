use std::{env, fs, io};

use log::info;
use recsys::{pipeline, specs::RunSpec};

const CONFIG_VAR: &str = "RECSYS_CONFIG";

fn main() -> io::Result<()> {
    env_logger::init();

    let path = env::var(CONFIG_VAR)
        .ok()
        .or_else(|| env::args().nth(1))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("usage: recsys <run.json>, or set {CONFIG_VAR}"),
            )
        })?;

    let spec: RunSpec = serde_json::from_slice(&fs::read(&path)?)?;
    info!("running {path}");

    let report = pipeline::run(&spec)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
