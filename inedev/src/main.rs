mod application;
mod presentation;

use inecore::Result;

fn main() -> Result<()> {
    env_logger::init();
    application::run()
}
