use clap::Parser;
use rebar_relay::{RelayCliArgs, RelayConfig, service};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = RelayConfig::try_from(RelayCliArgs::parse())?;
    service::run(config)
}
