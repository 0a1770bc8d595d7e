//! Web form front end for ResearchCrew: submit a topic, read the report in
//! the browser and download the saved Markdown file.

pub mod config;
pub mod error;
pub mod metrics;
pub mod pages;
pub mod routes;
pub mod state;
pub mod telemetry;
