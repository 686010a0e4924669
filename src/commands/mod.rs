mod capture;
mod ingest;

pub use capture::run_capture;
pub use ingest::run_ingest;
