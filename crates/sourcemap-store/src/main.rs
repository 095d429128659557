//! Source map store.
//!
//! A standalone web service that keeps the source maps of React Native builds, both container
//! builds and code push releases, and translates minified JavaScript stack traces back to their
//! original source locations.

mod cli;
mod endpoints;
mod logging;
mod server;


fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
