//! Chartflow Adapters - production collaborators for a pipeline run
//!
//! Implements the collaborator traits of `chartflow-core` against real
//! services:
//! - [`HttpChartSession`] downloads chart images, one isolated client per context
//! - [`ClaudeVisionAnalyzer`] submits artifacts to the Anthropic messages API
//! - [`WebhookReporter`] renders an HTML report and posts it to a webhook
//! - [`JsonResultStore`] writes the result document atomically
//! - [`Credentials`] gathers required secrets from the environment

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod claude;
pub mod credentials;
pub mod http_session;
pub mod report;
pub mod store;

#[cfg(test)]
mod test_server;

pub use claude::ClaudeVisionAnalyzer;
pub use credentials::Credentials;
pub use http_session::HttpChartSession;
pub use report::{render_html, report_subject, WebhookReporter};
pub use store::JsonResultStore;
