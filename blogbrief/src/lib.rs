// Library interface for blogbrief modules
// This allows tests and the binary to import modules

pub mod error;
pub mod ingestion;
pub mod llm;
pub mod notifier;
pub mod processing;
pub mod scraping;
pub mod storage;
