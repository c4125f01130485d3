use clap::Parser;
use rebar_edge::{EdgeCliArgs, EdgeConfig, service};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = EdgeConfig::try_from(EdgeCliArgs::parse())?;
    service::run(config)
}
