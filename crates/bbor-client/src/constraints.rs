//! Validated scalar values shared by both parameter models.
//!
//! Each type has a single checked constructor, so holding one is proof that
//! the bound was enforced before any request was built.

use std::fmt;
use std::ops::Deref;

use crate::config::{
    MAX_FILE_NAME_LENGTH, MAX_FILE_SIZE, MAX_MEAS_FILE_SIZE, MAX_N_TRIALS_TOTAL, MAX_RANDOM_SEED,
    MAX_STUDY_NAME_LENGTH, MIN_STUDY_NAME_LENGTH, STUDY_NAME_SUFFIX_RESERVE,
};
use crate::error::ValidationError;

pub(crate) fn check_length(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ValidationError::Bounds {
            field,
            detail: format!("length {} is outside [{}, {}]", len, min, max),
        });
    }
    Ok(())
}

/// Full study name as stored on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StudyName(String);

impl StudyName {
    pub fn new(value: &str) -> Result<Self, ValidationError> {
        Self::for_field("study_name", value)
    }

    pub(crate) fn for_field(field: &'static str, value: &str) -> Result<Self, ValidationError> {
        check_length(field, value, MIN_STUDY_NAME_LENGTH, MAX_STUDY_NAME_LENGTH)?;
        Ok(Self(value.to_string()))
    }

    /// `"{base}_s{seed:04}"`. Always fits because the base reserves the suffix room.
    pub fn from_base(base: &StudyNameBase, seed: RandomSeed) -> Self {
        Self(format!("{}_s{:04}", base.0, seed.get()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Study name prefix that still needs a seed suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StudyNameBase(String);

impl StudyNameBase {
    pub fn new(value: &str) -> Result<Self, ValidationError> {
        check_length(
            "study_name_base",
            value,
            MIN_STUDY_NAME_LENGTH,
            MAX_STUDY_NAME_LENGTH - STUDY_NAME_SUFFIX_RESERVE,
        )?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Number of trials, `0 < n < MAX_N_TRIALS_TOTAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrialCount(u32);

impl TrialCount {
    pub fn new(field: &'static str, value: u32) -> Result<Self, ValidationError> {
        if value == 0 || value >= MAX_N_TRIALS_TOTAL {
            return Err(ValidationError::Bounds {
                field,
                detail: format!("{} is outside (0, {})", value, MAX_N_TRIALS_TOTAL),
            });
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// Optimizer seed, `0 <= s < MAX_RANDOM_SEED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RandomSeed(u32);

impl RandomSeed {
    pub fn new(value: u32) -> Result<Self, ValidationError> {
        if value >= MAX_RANDOM_SEED {
            return Err(ValidationError::Bounds {
                field: "random_seed",
                detail: format!("{} is outside [0, {})", value, MAX_RANDOM_SEED),
            });
        }
        Ok(Self(value))
    }

    /// Uniform draw from `[0, MAX_RANDOM_SEED)`.
    pub fn generate<R: rand::Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(0..MAX_RANDOM_SEED))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RandomSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a file as the server stores it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileName(String);

fn is_file_name_char(c: char) -> bool {
    c.is_alphanumeric()
        || matches!(c, '_' | '-' | '.' | ' ')
        || ('\u{4E00}'..='\u{9FFF}').contains(&c)
        || ('\u{3040}'..='\u{309F}').contains(&c)
        || ('\u{30A0}'..='\u{30FF}').contains(&c)
}

impl FileName {
    pub fn new(field: &'static str, value: &str) -> Result<Self, ValidationError> {
        check_length(field, value, 1, MAX_FILE_NAME_LENGTH)?;
        if !value.chars().all(is_file_name_char) || value == "." || value == ".." {
            return Err(ValidationError::Pattern {
                field,
                value: value.to_string(),
            });
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased extension without the dot.
    pub fn extension(&self) -> Option<String> {
        self.0
            .rsplit_once('.')
            .filter(|(stem, _)| !stem.is_empty())
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }

    pub fn has_suffix(&self, suffixes: &[&str]) -> bool {
        self.extension()
            .map(|ext| suffixes.iter().any(|s| *s == ext))
            .unwrap_or(false)
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Deref for FileName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Size ceiling applied to an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeTier {
    /// Instrument-parameter, phase and sequence files.
    Small,
    /// Measurement files and project bundles.
    Large,
}

impl SizeTier {
    pub fn limit(self) -> u64 {
        match self {
            SizeTier::Small => MAX_FILE_SIZE,
            SizeTier::Large => MAX_MEAS_FILE_SIZE,
        }
    }

    pub fn check(self, field: &'static str, name: &str, size: u64) -> Result<(), ValidationError> {
        let limit = self.limit();
        if size > limit {
            return Err(ValidationError::FileTooLarge {
                field,
                name: name.to_string(),
                size,
                limit,
            });
        }
        Ok(())
    }
}

pub(crate) fn suffix_list(suffixes: &[&str]) -> String {
    suffixes
        .iter()
        .map(|s| format!("\".{}\"", s))
        .collect::<Vec<_>>()
        .join(" or ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn study_name_bounds() {
        assert!(StudyName::new("").is_err());
        assert!(StudyName::new("a").is_ok());
        assert!(StudyName::new(&"x".repeat(MAX_STUDY_NAME_LENGTH)).is_ok());
        assert!(StudyName::new(&"x".repeat(MAX_STUDY_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn base_name_reserves_suffix_room() {
        let max_base = MAX_STUDY_NAME_LENGTH - STUDY_NAME_SUFFIX_RESERVE;
        assert!(StudyNameBase::new(&"b".repeat(max_base + 1)).is_err());
        let base = StudyNameBase::new(&"b".repeat(max_base)).expect("base");
        let seed = RandomSeed::new(MAX_RANDOM_SEED - 1).expect("seed");
        let name = StudyName::from_base(&base, seed);
        assert_eq!(name.as_str().chars().count(), MAX_STUDY_NAME_LENGTH);
        assert!(StudyName::new(name.as_str()).is_ok());
    }

    #[test]
    fn synthesized_name_pads_seed() {
        let base = StudyNameBase::new("run").expect("base");
        let name = StudyName::from_base(&base, RandomSeed::new(42).expect("seed"));
        assert_eq!(name.as_str(), "run_s0042");
    }

    #[test]
    fn trial_count_is_exclusive_on_both_ends() {
        assert!(TrialCount::new("n_trials_total", 0).is_err());
        assert!(TrialCount::new("n_trials_total", 1).is_ok());
        assert!(TrialCount::new("n_trials_total", MAX_N_TRIALS_TOTAL - 1).is_ok());
        let err = TrialCount::new("n_trials_total", MAX_N_TRIALS_TOTAL).expect_err("upper");
        assert!(err.to_string().starts_with("n_trials_total"), "{}", err);
    }

    #[test]
    fn random_seed_bounds_and_generation() {
        assert!(RandomSeed::new(0).is_ok());
        assert!(RandomSeed::new(MAX_RANDOM_SEED).is_err());
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert!(RandomSeed::generate(&mut rng).get() < MAX_RANDOM_SEED);
        }
    }

    #[test]
    fn file_name_accepts_word_chars_and_cjk() {
        for ok in ["quartz.cif", "my file-01.instprm", "石英.cif", "ひらがな_カタカナ.prm"] {
            assert!(FileName::new("cif_filenames", ok).is_ok(), "{}", ok);
        }
    }

    #[test]
    fn file_name_rejects_separators_and_shell_metachars() {
        for bad in [
            "../x.cif", "a/b.cif", "a\\b.cif", "x;rm.cif", "$HOME.cif", "a|b", "a&b", "`x`",
            "a>b", "x*.cif", "..", "",
        ] {
            assert!(FileName::new("prm_filename", bad).is_err(), "{:?}", bad);
        }
        assert!(FileName::new("prm_filename", &"a".repeat(MAX_FILE_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn file_name_extension_is_case_insensitive() {
        let name = FileName::new("f", "Sample.XRDML").expect("name");
        assert_eq!(name.extension().as_deref(), Some("xrdml"));
        assert!(name.has_suffix(&["csv", "xrdml"]));
        assert!(FileName::new("f", ".cif").expect("dotfile").extension().is_none());
    }

    #[test]
    fn size_tiers() {
        assert!(SizeTier::Small.check("prmfile", "a.prm", MAX_FILE_SIZE).is_ok());
        assert!(SizeTier::Small.check("prmfile", "a.prm", MAX_FILE_SIZE + 1).is_err());
        assert!(SizeTier::Large.check("mfile", "a.csv", MAX_FILE_SIZE + 1).is_ok());
        assert!(SizeTier::Large.check("mfile", "a.csv", MAX_MEAS_FILE_SIZE + 1).is_err());
    }
}
