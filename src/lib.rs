//! cvefetch downloads the CVEs published by the NVD page by page and
//! appends them to a CSV file, resuming where the previous run stopped.

pub mod application;
pub mod fetchers;
pub mod models;
pub mod resume;
pub mod writers;
