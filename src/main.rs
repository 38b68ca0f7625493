use clap::Parser;

use driftchat::config::ServerArgs;

fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    driftchat::server::run(args)
}
