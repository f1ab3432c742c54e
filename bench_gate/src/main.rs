use anyhow::Result;
use bench_gate::cli;

fn main() -> Result<()> {
    cli::handle_calls()
}
