pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use clap::Parser;
use inecore::Result;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init { container } => handlers::handle_init(container),
        Commands::List { container } => handlers::handle_list(container),
        Commands::Cat { container, name } => handlers::handle_cat(container, name),
        Commands::Put { container, name, src } => handlers::handle_put(container, name, src),
        Commands::Rm { container, name } => handlers::handle_rm(container, name),
        Commands::Mv { container, from, to } => handlers::handle_mv(container, from, to),
    }
}
