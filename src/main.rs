use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = wiimote_rw::presentation::cli::Cli::parse();
    wiimote_rw::presentation::cli::run(cli)
}
