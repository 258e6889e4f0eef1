//! Executable entry point for the toolhub server.
//!
//! All configuration comes from the environment; see the server crate's
//! `config` module for the variable reference.

fn main() -> anyhow::Result<()> {
    toolhub_server::run()
}
