use clap::{Parser, Subcommand};

/// Takagi — GitHub (or Discord, as Snowflake) as an OpenID Connect provider
#[derive(Parser)]
#[command(name = "takagi", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the provider server
    Serve {
        /// Port to bind
        #[arg(short, long, default_value = "8000")]
        port: u16,
    },

    /// Print a fresh JWK Set to stdout, suitable as the KEYSET value
    Keygen,

    /// Replace the managed keyset on disk, invalidating all issued tokens
    Rotate,
}
