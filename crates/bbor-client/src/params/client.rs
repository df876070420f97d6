use rand::Rng;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::server::PostStudyServerParams;
use super::NamedBytes;
use crate::config::{
    CIF_SUFFIXES, DEFAULT_N_STARTUP_TRIALS, DEFAULT_N_TRIALS_TOTAL, GPX_SUFFIXES, LATEST_SEQUENCE,
    MAX_FILE_NAME_LENGTH, MEASUREMENT_SUFFIXES, PRM_SUFFIXES,
};
use crate::constraints::{
    check_length, suffix_list, FileName, RandomSeed, SizeTier, StudyName, StudyNameBase,
    TrialCount,
};
use crate::error::{ParamsError, ValidationError};
use crate::registry::{FileKind, FileRegistry};

/// Caller-facing study request.
///
/// Input files are given in exactly one of three ways: `inputdir`, `gpxfile`,
/// or the explicit set of measurement, instrument-parameter and phase files.
/// Instrument-parameter and phase files may be local paths (uploaded before
/// submission) or names already on the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostStudyClientParams {
    pub study_name: Option<String>,
    pub study_name_base: Option<String>,
    pub n_trials_total: u32,
    pub n_startup_trials: Option<u32>,
    pub random_seed: Option<u32>,
    pub inputdir: Option<PathBuf>,
    pub gpxfile: Option<PathBuf>,
    pub measurementfile: Option<PathBuf>,
    #[serde(skip)]
    pub measurement_upload: Option<NamedBytes>,
    pub prmfile: Option<PathBuf>,
    pub prm_filename: Option<String>,
    pub ciffiles: Option<Vec<PathBuf>>,
    pub cif_filenames: Option<Vec<String>>,
    pub overwrite_prmfile: bool,
    pub overwrite_ciffiles: bool,
    pub sequence: String,
    pub tags: Vec<String>,
    pub initialize_study: bool,
}

impl Default for PostStudyClientParams {
    fn default() -> Self {
        Self {
            study_name: None,
            study_name_base: None,
            n_trials_total: DEFAULT_N_TRIALS_TOTAL,
            n_startup_trials: None,
            random_seed: None,
            inputdir: None,
            gpxfile: None,
            measurementfile: None,
            measurement_upload: None,
            prmfile: None,
            prm_filename: None,
            ciffiles: None,
            cif_filenames: None,
            overwrite_prmfile: false,
            overwrite_ciffiles: false,
            sequence: LATEST_SEQUENCE.to_string(),
            tags: Vec::new(),
            initialize_study: false,
        }
    }
}

/// Where the measurement histogram comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeasurementSource {
    Path { path: PathBuf, name: FileName },
    InMemory(NamedBytes),
}

impl MeasurementSource {
    pub fn name(&self) -> &str {
        match self {
            MeasurementSource::Path { name, .. } => name.as_str(),
            MeasurementSource::InMemory(bytes) => &bytes.name,
        }
    }
}

/// An instrument-parameter or phase file reference after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRef {
    /// Local file still to be uploaded under `name`.
    Local {
        path: PathBuf,
        name: FileName,
        overwrite: bool,
    },
    /// Name already present in the registry.
    Registered(FileName),
}

impl FileRef {
    pub fn name(&self) -> &FileName {
        match self {
            FileRef::Local { name, .. } | FileRef::Registered(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedInput {
    ProjectBundle {
        path: PathBuf,
        name: FileName,
    },
    Measurement {
        measurement: MeasurementSource,
        prm: FileRef,
        cifs: Vec<FileRef>,
    },
}

/// Fully resolved request: concrete name, concrete seed, one input mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStudyRequest {
    pub study_name: StudyName,
    pub n_trials_total: TrialCount,
    pub n_startup_trials: Option<TrialCount>,
    pub random_seed: RandomSeed,
    /// True when the seed was drawn here rather than supplied.
    pub seed_generated: bool,
    pub input: ResolvedInput,
    pub sequence: String,
    pub tags: Vec<String>,
    pub initialize_study: bool,
}

impl ResolvedStudyRequest {
    /// Local files to upload, instrument parameters first, then phases in order.
    pub fn pending_uploads(&self) -> Vec<(FileKind, &Path, bool)> {
        let mut uploads = Vec::new();
        if let ResolvedInput::Measurement { prm, cifs, .. } = &self.input {
            if let FileRef::Local {
                path, overwrite, ..
            } = prm
            {
                uploads.push((FileKind::InstrumentParameter, path.as_path(), *overwrite));
            }
            for cif in cifs {
                if let FileRef::Local {
                    path, overwrite, ..
                } = cif
                {
                    uploads.push((FileKind::Phase, path.as_path(), *overwrite));
                }
            }
        }
        uploads
    }

    /// Builds the server-side model once uploads are done and payloads are loaded.
    ///
    /// An absent `n_startup_trials` becomes `min(DEFAULT_N_STARTUP_TRIALS, n_trials_total)`.
    pub fn to_server_params(
        &self,
        gpx: Option<NamedBytes>,
        measurement: Option<NamedBytes>,
    ) -> PostStudyServerParams {
        let total = self.n_trials_total.get();
        let startup = self
            .n_startup_trials
            .map(TrialCount::get)
            .unwrap_or_else(|| DEFAULT_N_STARTUP_TRIALS.min(total));
        let (prm_filename, cif_filenames) = match &self.input {
            ResolvedInput::Measurement { prm, cifs, .. } => (
                Some(prm.name().to_string()),
                Some(cifs.iter().map(|c| c.name().to_string()).collect()),
            ),
            ResolvedInput::ProjectBundle { .. } => (None, None),
        };
        PostStudyServerParams {
            study_name: self.study_name.as_str().to_string(),
            n_trials_total: total,
            n_startup_trials: startup,
            random_seed: self.random_seed.get(),
            gpx,
            measurement,
            prm_filename,
            cif_filenames,
            sequence: self.sequence.clone(),
            tags: self.tags.clone(),
            initialize_study: self.initialize_study,
        }
    }
}

enum StudyIdentity {
    Name(StudyName),
    Base(StudyNameBase),
}

/// Files found by scanning `inputdir`.
#[derive(Debug, Default)]
struct ScannedDir {
    gpx: Option<PathBuf>,
    measurement: Option<PathBuf>,
    prm: Option<PathBuf>,
    cifs: Vec<PathBuf>,
}

impl PostStudyClientParams {
    /// Resolves with a thread-local RNG for the seed draw.
    pub fn resolve_default(
        &self,
        registry: &FileRegistry,
    ) -> Result<ResolvedStudyRequest, ParamsError> {
        self.resolve(registry, &mut rand::thread_rng())
    }

    /// Validates and normalizes the request.
    ///
    /// Field bounds are checked first, then study-name exclusivity, the trial
    /// budget, input selection with file-reference resolution, and finally the
    /// seed draw and study-name synthesis.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        registry: &FileRegistry,
        rng: &mut R,
    ) -> Result<ResolvedStudyRequest, ParamsError> {
        let explicit_seed = self.random_seed.map(RandomSeed::new).transpose()?;
        let identity = self.check_study_identity()?;
        let (total, startup) = self.check_trial_budget()?;
        check_length("sequence", &self.sequence, 1, MAX_FILE_NAME_LENGTH)?;
        let input = self.resolve_input(registry)?;

        let (random_seed, seed_generated) = match explicit_seed {
            Some(seed) => (seed, false),
            None => {
                let seed = RandomSeed::generate(rng);
                info!(random_seed = seed.get(), "random_seed is generated");
                (seed, true)
            }
        };
        let study_name = match identity {
            StudyIdentity::Name(name) => name,
            StudyIdentity::Base(base) => {
                let name = StudyName::from_base(&base, random_seed);
                info!(study_name = name.as_str(), "study_name is generated");
                name
            }
        };

        Ok(ResolvedStudyRequest {
            study_name,
            n_trials_total: total,
            n_startup_trials: startup,
            random_seed,
            seed_generated,
            input,
            sequence: self.sequence.clone(),
            tags: self.tags.clone(),
            initialize_study: self.initialize_study,
        })
    }

    fn check_study_identity(&self) -> Result<StudyIdentity, ValidationError> {
        match (&self.study_name, &self.study_name_base) {
            (Some(_), Some(_)) => Err(ValidationError::exclusive(&[
                "study_name",
                "study_name_base",
            ])),
            (None, None) => Err(ValidationError::missing(
                "specify either study_name or study_name_base",
            )),
            (Some(name), None) => Ok(StudyIdentity::Name(StudyName::new(name)?)),
            (None, Some(base)) => Ok(StudyIdentity::Base(StudyNameBase::new(base)?)),
        }
    }

    fn check_trial_budget(&self) -> Result<(TrialCount, Option<TrialCount>), ValidationError> {
        let total = TrialCount::new("n_trials_total", self.n_trials_total)?;
        let startup = self
            .n_startup_trials
            .map(|n| TrialCount::new("n_startup_trials", n))
            .transpose()?;
        if let Some(startup) = startup {
            if startup > total {
                return Err(ValidationError::StartupExceedsTotal {
                    startup: startup.get(),
                    total: total.get(),
                });
            }
        }
        Ok((total, startup))
    }

    fn explicit_file_fields(&self) -> Vec<&'static str> {
        [
            ("measurementfile", self.measurementfile.is_some()),
            ("measurement_upload", self.measurement_upload.is_some()),
            ("prmfile", self.prmfile.is_some()),
            ("prm_filename", self.prm_filename.is_some()),
            ("ciffiles", self.ciffiles.is_some()),
            ("cif_filenames", self.cif_filenames.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, present)| present.then_some(field))
        .collect()
    }

    fn resolve_input(&self, registry: &FileRegistry) -> Result<ResolvedInput, ParamsError> {
        let explicit = self.explicit_file_fields();

        if let Some(dir) = &self.inputdir {
            if self.gpxfile.is_some() || !explicit.is_empty() {
                let mut fields = vec!["inputdir"];
                if self.gpxfile.is_some() {
                    fields.push("gpxfile");
                }
                fields.extend(explicit);
                return Err(ValidationError::MutualExclusivity { fields }.into());
            }
            let scanned = scan_input_dir(dir)?;
            return self.resolve_scanned(dir, scanned, registry);
        }

        if let Some(gpx) = &self.gpxfile {
            if !explicit.is_empty() {
                let mut fields = vec!["gpxfile"];
                fields.extend(explicit);
                return Err(ValidationError::MutualExclusivity { fields }.into());
            }
            return bundle_input(gpx);
        }

        if explicit.is_empty() {
            return Err(ValidationError::missing(
                "specify either inputdir, gpxfile, or a set of measurementfile, \
                 prmfile (or prm_filename) and ciffiles (or cif_filenames)",
            )
            .into());
        }

        let measurement = match (&self.measurementfile, &self.measurement_upload) {
            (Some(_), Some(_)) => {
                return Err(
                    ValidationError::exclusive(&["measurementfile", "measurement_upload"]).into(),
                )
            }
            (None, None) => {
                return Err(ValidationError::missing(
                    "measurementfile is required when prm or cif files are specified",
                )
                .into())
            }
            (Some(path), None) => local_measurement(path)?,
            (None, Some(upload)) => {
                let name = FileName::new("measurement_upload", &upload.name)?;
                check_suffix("measurement_upload", &name, MEASUREMENT_SUFFIXES)?;
                SizeTier::Large.check("measurement_upload", &upload.name, upload.size())?;
                MeasurementSource::InMemory(upload.clone())
            }
        };

        let prm = match (&self.prmfile, &self.prm_filename) {
            (Some(_), Some(_)) => {
                return Err(ValidationError::exclusive(&["prmfile", "prm_filename"]).into())
            }
            (None, None) => {
                return Err(ValidationError::missing(
                    "prmfile or prm_filename is required when a measurement file is specified",
                )
                .into())
            }
            (Some(path), None) => self.local_prm(path, registry)?,
            (None, Some(name)) => {
                registered_ref(FileKind::InstrumentParameter, "prm_filename", name, registry)?
            }
        };

        let cifs = match (&self.ciffiles, &self.cif_filenames) {
            (Some(_), Some(_)) => {
                return Err(ValidationError::exclusive(&["ciffiles", "cif_filenames"]).into())
            }
            (Some(paths), None) if !paths.is_empty() => paths
                .iter()
                .map(|path| self.local_cif(path, registry))
                .collect::<Result<Vec<_>, _>>()?,
            (None, Some(names)) if !names.is_empty() => names
                .iter()
                .map(|name| registered_ref(FileKind::Phase, "cif_filenames", name, registry))
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(ValidationError::missing(
                    "at least one of ciffiles or cif_filenames is required \
                     when a measurement file is specified",
                )
                .into())
            }
        };

        Ok(ResolvedInput::Measurement {
            measurement,
            prm,
            cifs,
        })
    }

    fn resolve_scanned(
        &self,
        dir: &Path,
        scanned: ScannedDir,
        registry: &FileRegistry,
    ) -> Result<ResolvedInput, ParamsError> {
        if let Some(gpx) = scanned.gpx {
            return bundle_input(&gpx);
        }
        let measurement = scanned.measurement.ok_or_else(|| {
            ValidationError::missing(format!(
                "{} contains no measurement file ({})",
                dir.display(),
                suffix_list(MEASUREMENT_SUFFIXES)
            ))
        })?;
        let prm = scanned.prm.ok_or_else(|| {
            ValidationError::missing(format!(
                "{} contains no instrument parameter file ({})",
                dir.display(),
                suffix_list(PRM_SUFFIXES)
            ))
        })?;
        if scanned.cifs.is_empty() {
            return Err(ValidationError::missing(format!(
                "{} contains no phase file ({})",
                dir.display(),
                suffix_list(CIF_SUFFIXES)
            ))
            .into());
        }
        Ok(ResolvedInput::Measurement {
            measurement: local_measurement(&measurement)?,
            prm: self.local_prm(&prm, registry)?,
            cifs: scanned
                .cifs
                .iter()
                .map(|path| self.local_cif(path, registry))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn local_prm(&self, path: &Path, registry: &FileRegistry) -> Result<FileRef, ParamsError> {
        let name = local_file("prmfile", path, PRM_SUFFIXES, SizeTier::Small)?;
        check_collision(
            FileKind::InstrumentParameter,
            &name,
            self.overwrite_prmfile,
            registry,
        )?;
        Ok(FileRef::Local {
            path: path.to_path_buf(),
            name,
            overwrite: self.overwrite_prmfile,
        })
    }

    fn local_cif(&self, path: &Path, registry: &FileRegistry) -> Result<FileRef, ParamsError> {
        let name = local_file("ciffiles", path, CIF_SUFFIXES, SizeTier::Small)?;
        check_collision(FileKind::Phase, &name, self.overwrite_ciffiles, registry)?;
        Ok(FileRef::Local {
            path: path.to_path_buf(),
            name,
            overwrite: self.overwrite_ciffiles,
        })
    }
}

fn check_suffix(
    field: &'static str,
    name: &FileName,
    suffixes: &[&str],
) -> Result<(), ValidationError> {
    if name.has_suffix(suffixes) {
        Ok(())
    } else {
        Err(ValidationError::Suffix {
            field,
            name: name.to_string(),
            expected: suffix_list(suffixes),
        })
    }
}

/// Checks that `path` is a regular file with an acceptable name, suffix and size.
fn local_file(
    field: &'static str,
    path: &Path,
    suffixes: &[&str],
    tier: SizeTier,
) -> Result<FileName, ValidationError> {
    let meta = fs::metadata(path).map_err(|_| ValidationError::FileNotFound {
        field,
        path: path.to_path_buf(),
    })?;
    if !meta.is_file() {
        return Err(ValidationError::FileNotFound {
            field,
            path: path.to_path_buf(),
        });
    }
    let raw = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = FileName::new(field, &raw)?;
    check_suffix(field, &name, suffixes)?;
    tier.check(field, &name, meta.len())?;
    Ok(name)
}

fn local_measurement(path: &Path) -> Result<MeasurementSource, ValidationError> {
    let name = local_file("measurementfile", path, MEASUREMENT_SUFFIXES, SizeTier::Large)?;
    Ok(MeasurementSource::Path {
        path: path.to_path_buf(),
        name,
    })
}

fn bundle_input(path: &Path) -> Result<ResolvedInput, ParamsError> {
    let name = local_file("gpxfile", path, GPX_SUFFIXES, SizeTier::Large)?;
    Ok(ResolvedInput::ProjectBundle {
        path: path.to_path_buf(),
        name,
    })
}

fn registered_ref(
    kind: FileKind,
    field: &'static str,
    name: &str,
    registry: &FileRegistry,
) -> Result<FileRef, ValidationError> {
    let name = FileName::new(field, name)?;
    if !registry.contains(kind, &name) {
        return Err(ValidationError::NotUploaded {
            field,
            name: name.into_inner(),
        });
    }
    Ok(FileRef::Registered(name))
}

fn check_collision(
    kind: FileKind,
    name: &FileName,
    overwrite: bool,
    registry: &FileRegistry,
) -> Result<(), ParamsError> {
    if registry.contains(kind, name) && !overwrite {
        return Err(ParamsError::NameCollision {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn lower_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Classifies the immediate files of `dir` by extension.
///
/// A project bundle ends the scan. Unknown extensions are ignored.
fn scan_input_dir(dir: &Path) -> Result<ScannedDir, ValidationError> {
    if !dir.is_dir() {
        return Err(ValidationError::FileNotFound {
            field: "inputdir",
            path: dir.to_path_buf(),
        });
    }
    let mut scanned = ScannedDir::default();
    let walker = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let Some(ext) = lower_extension(&path) else {
            continue;
        };
        let ext = ext.as_str();
        if GPX_SUFFIXES.contains(&ext) {
            scanned.gpx = Some(path);
            break;
        } else if MEASUREMENT_SUFFIXES.contains(&ext) {
            if let Some(previous) = scanned.measurement.replace(path) {
                warn!(ignored = %previous.display(), "inputdir holds several measurement files; using the last one");
            }
        } else if PRM_SUFFIXES.contains(&ext) {
            if let Some(previous) = scanned.prm.replace(path) {
                warn!(ignored = %previous.display(), "inputdir holds several instrument parameter files; using the last one");
            }
        } else if CIF_SUFFIXES.contains(&ext) {
            scanned.cifs.push(path);
        }
    }
    Ok(scanned)
}
