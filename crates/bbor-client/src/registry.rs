use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::{CIF_SUFFIXES, PRM_SUFFIXES};

/// Kind of server-held file with its own list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    #[serde(rename = "prm")]
    InstrumentParameter,
    #[serde(rename = "cif")]
    Phase,
    #[serde(rename = "seq")]
    Sequence,
}

impl FileKind {
    pub const ALL: [FileKind; 3] = [
        FileKind::InstrumentParameter,
        FileKind::Phase,
        FileKind::Sequence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::InstrumentParameter => "prm",
            FileKind::Phase => "cif",
            FileKind::Sequence => "seq",
        }
    }

    pub fn endpoint(self) -> String {
        format!("/file/{}", self.as_str())
    }

    /// Accepted local suffixes; `None` when the server takes any name.
    pub fn suffixes(self) -> Option<&'static [&'static str]> {
        match self {
            FileKind::InstrumentParameter => Some(PRM_SUFFIXES),
            FileKind::Phase => Some(CIF_SUFFIXES),
            FileKind::Sequence => None,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::InstrumentParameter => write!(f, "instrument parameter"),
            FileKind::Phase => write!(f, "phase"),
            FileKind::Sequence => write!(f, "sequence"),
        }
    }
}

impl FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prm" => Ok(FileKind::InstrumentParameter),
            "cif" => Ok(FileKind::Phase),
            "seq" => Ok(FileKind::Sequence),
            other => Err(format!("unknown file kind {:?}: expected prm, cif or seq", other)),
        }
    }
}

/// Server-confirmed file names for the authenticated account.
///
/// Lists are replaced wholesale on refresh. Validators only ever read them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRegistry {
    prm: Vec<String>,
    cif: Vec<String>,
    seq: Vec<String>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self, kind: FileKind) -> &[String] {
        match kind {
            FileKind::InstrumentParameter => &self.prm,
            FileKind::Phase => &self.cif,
            FileKind::Sequence => &self.seq,
        }
    }

    pub fn contains(&self, kind: FileKind, name: &str) -> bool {
        self.names(kind).iter().any(|n| n == name)
    }

    pub fn replace(&mut self, kind: FileKind, names: Vec<String>) {
        match kind {
            FileKind::InstrumentParameter => self.prm = names,
            FileKind::Phase => self.cif = names,
            FileKind::Sequence => self.seq = names,
        }
    }

    pub fn clear(&mut self) {
        for kind in FileKind::ALL {
            self.replace(kind, Vec::new());
        }
    }
}
