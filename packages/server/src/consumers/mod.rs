pub mod ingest;

pub use ingest::spawn_consumers;
