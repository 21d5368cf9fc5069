pub mod bot;
pub mod catalog;
pub mod cleanup;
pub mod codec;
pub mod dispatcher;
pub mod ingestion;
pub mod ledger;
pub mod prober;
pub mod quality;
pub mod storage;
pub mod submission;
pub mod template;
