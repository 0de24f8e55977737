//! ec-backend: AI endpoint adapters for the Energy Coach client.
//!
//! This crate provides the streaming delta reader shared by the chat and
//! report assistants, HTTP clients for the hosted endpoints, and a mock
//! provider for tests.

pub mod coach;
pub mod mock;
pub mod report;
pub mod sse;

pub use coach::{CoachClient, CoachError, CONNECTION_NOTICE, FALLBACK_NOTICE};
pub use mock::{MockConfig, MockResponse};
pub use report::{DraftRequest, DraftResponse, SectionAction, SectionRequest};
