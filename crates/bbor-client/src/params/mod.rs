//! Two-tier parameter pipeline for study submission.
//!
//! [`client::PostStudyClientParams`] takes the permissive caller-facing shape and
//! resolves it into a [`client::ResolvedStudyRequest`]. After uploads,
//! [`server::PostStudyServerParams`] re-checks everything against the
//! [`crate::FileRegistry`] and yields the wire payload.

pub mod client;
pub mod server;

use std::fmt;

/// File content held in memory together with its upload name.
#[derive(Clone, PartialEq, Eq)]
pub struct NamedBytes {
    pub name: String,
    pub content: Vec<u8>,
}

impl NamedBytes {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content,
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

impl fmt::Debug for NamedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedBytes")
            .field("name", &self.name)
            .field("len", &self.content.len())
            .finish()
    }
}

pub use client::{FileRef, MeasurementSource, PostStudyClientParams, ResolvedInput, ResolvedStudyRequest};
pub use server::{Attachment, PostStudyServerParams, StudyFields, StudyPayload};
