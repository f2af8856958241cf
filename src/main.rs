use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = wagerdesk::cli::Cli::parse();
    wagerdesk::cli::run(cli)
}
