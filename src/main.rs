use anyhow::Context;

fn main() -> anyhow::Result<()> {
    hivemined::run().context("hivemined failed")
}
