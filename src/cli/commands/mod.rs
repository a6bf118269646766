//! CLI command implementations.

mod config;
mod doctor;
mod ingest;
mod init;
mod list;
mod recontext;
mod remove;
mod search;

pub use config::run_config;
pub use doctor::run_doctor;
pub use ingest::{run_ingest, run_ingest_manifest, VideoArgs};
pub use init::run_init;
pub use list::run_list;
pub use recontext::run_recontext;
pub use remove::run_remove;
pub use search::run_search;
