//! Client for the BBO-Rietveld remote refinement service.
//!
//! Study requests pass through two validation layers before anything is
//! sent: [`PostStudyClientParams::resolve`] normalizes the caller's request
//! against the server-held file registry, and
//! [`PostStudyServerParams::validate`] re-checks the canonical form.
//! [`BborClient`] owns the token and registries and drives both.

pub mod config;
pub mod constraints;
pub mod error;
pub mod models;
pub mod params;
pub mod parsers;
pub mod registry;
pub mod session;

pub use config::{ClientConfig, Server};
pub use constraints::{FileName, RandomSeed, SizeTier, StudyName, StudyNameBase, TrialCount};
pub use error::{ClientError, ConfigError, ParamsError, ParseError, Result, ValidationError};
pub use params::{
    NamedBytes, PostStudyClientParams, PostStudyServerParams, ResolvedStudyRequest, StudyPayload,
};
pub use registry::{FileKind, FileRegistry};
pub use session::{BborClient, StudySubmission, SyncReport, SyncSelection, SyncTarget};
