//! Tempo CLI - demo and stress drivers for the instrumentation library.

fn main() -> anyhow::Result<()> {
    tempo_cli::run()
}
