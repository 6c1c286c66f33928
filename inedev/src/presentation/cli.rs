use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "inedev CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an empty container
    Init { container: PathBuf },

    /// List the container's streams: name, size, chunk count
    List { container: PathBuf },

    /// Stream a virtual file's bytes to stdout
    Cat { container: PathBuf, name: String },

    /// Write a file's contents into a stream, creating or truncating it
    Put {
        container: PathBuf,
        name: String,
        src: PathBuf,
    },

    /// Erase a virtual file
    Rm { container: PathBuf, name: String },

    /// Rename a virtual file
    Mv {
        container: PathBuf,
        from: String,
        to: String,
    },
}
