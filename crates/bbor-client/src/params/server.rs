use serde::Serialize;

use super::NamedBytes;
use crate::config::{GPX_SUFFIXES, LATEST_SEQUENCE, MEASUREMENT_SUFFIXES};
use crate::constraints::{suffix_list, FileName, RandomSeed, SizeTier, StudyName, TrialCount};
use crate::error::ValidationError;
use crate::registry::{FileKind, FileRegistry};

/// Canonical study request as the server expects it.
///
/// Usable on its own: [`PostStudyServerParams::validate`] re-checks every
/// rule without relying on the client-side model having run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostStudyServerParams {
    pub study_name: String,
    pub n_trials_total: u32,
    pub n_startup_trials: u32,
    pub random_seed: u32,
    pub gpx: Option<NamedBytes>,
    pub measurement: Option<NamedBytes>,
    pub prm_filename: Option<String>,
    pub cif_filenames: Option<Vec<String>>,
    pub sequence: String,
    pub tags: Vec<String>,
    pub initialize_study: bool,
}

/// Form fields of a study submission, named as on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudyFields {
    pub study_name: String,
    pub n_trials_total: u32,
    pub n_startup_trials: u32,
    pub random_seed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpx_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurement_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prm_filename: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cif_filenames: Vec<String>,
    pub sequence: String,
    pub tags: Vec<String>,
    pub initialize_study: bool,
}

/// File content sent inline with the submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub field: &'static str,
    pub file: NamedBytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyPayload {
    pub fields: StudyFields,
    pub attachments: Vec<Attachment>,
}

impl StudyPayload {
    /// Flattens the fields to form pairs. Lists repeat their key.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let f = &self.fields;
        let mut out = vec![
            ("study_name", f.study_name.clone()),
            ("n_trials_total", f.n_trials_total.to_string()),
            ("n_startup_trials", f.n_startup_trials.to_string()),
            ("random_seed", f.random_seed.to_string()),
        ];
        if let Some(name) = &f.gpx_filename {
            out.push(("gpx_filename", name.clone()));
        }
        if let Some(name) = &f.measurement_filename {
            out.push(("measurement_filename", name.clone()));
        }
        if let Some(name) = &f.prm_filename {
            out.push(("prm_filename", name.clone()));
        }
        for name in &f.cif_filenames {
            out.push(("cif_filenames", name.clone()));
        }
        out.push(("sequence", f.sequence.clone()));
        for tag in &f.tags {
            out.push(("tags", tag.clone()));
        }
        out.push(("initialize_study", f.initialize_study.to_string()));
        out
    }
}

const UPLOAD_FIELD: &str = "files";

impl PostStudyServerParams {
    /// Checks the request against structural rules and the registry and
    /// produces the submission payload.
    pub fn validate(self, registry: &FileRegistry) -> Result<StudyPayload, ValidationError> {
        let study_name = StudyName::new(&self.study_name)?;
        let total = TrialCount::new("n_trials_total", self.n_trials_total)?;
        let startup = TrialCount::new("n_startup_trials", self.n_startup_trials)?;
        if startup > total {
            return Err(ValidationError::StartupExceedsTotal {
                startup: startup.get(),
                total: total.get(),
            });
        }
        let seed = RandomSeed::new(self.random_seed)?;

        let gpx_filename = self
            .gpx
            .as_ref()
            .map(|gpx| check_payload("gpx_filename", gpx, GPX_SUFFIXES))
            .transpose()?;
        let measurement_filename = self
            .measurement
            .as_ref()
            .map(|m| check_payload("measurement_filename", m, MEASUREMENT_SUFFIXES))
            .transpose()?;

        match (&self.gpx, &self.measurement) {
            (Some(_), Some(_)) => {
                return Err(ValidationError::exclusive(&[
                    "gpx_filecontent",
                    "measurement_filecontent",
                ]))
            }
            (None, None) => {
                return Err(ValidationError::missing(
                    "specify either a gpx file or a measurement file",
                ))
            }
            (None, Some(_)) => {
                if self.prm_filename.is_none() {
                    return Err(ValidationError::missing(
                        "prm_filename is required when measurement file is specified",
                    ));
                }
                if self.cif_filenames.as_ref().map_or(true, Vec::is_empty) {
                    return Err(ValidationError::missing(
                        "cif_filenames is required when measurement file is specified",
                    ));
                }
            }
            (Some(_), None) => {
                if self.prm_filename.is_some() {
                    return Err(ValidationError::exclusive(&["gpx_filecontent", "prm_filename"]));
                }
                if self.cif_filenames.is_some() {
                    return Err(ValidationError::exclusive(&["gpx_filecontent", "cif_filenames"]));
                }
            }
        }

        let prm_filename = self
            .prm_filename
            .as_deref()
            .map(|name| {
                check_registered(FileKind::InstrumentParameter, "prm_filename", name, registry)
            })
            .transpose()?;
        let cif_filenames = self
            .cif_filenames
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|name| check_registered(FileKind::Phase, "cif_filenames", name, registry))
            .collect::<Result<Vec<_>, _>>()?;

        if self.sequence != LATEST_SEQUENCE && !registry.contains(FileKind::Sequence, &self.sequence)
        {
            return Err(ValidationError::UnknownSequence(self.sequence));
        }

        let fields = StudyFields {
            study_name: study_name.into_inner(),
            n_trials_total: total.get(),
            n_startup_trials: startup.get(),
            random_seed: seed.get(),
            gpx_filename,
            measurement_filename,
            prm_filename,
            cif_filenames,
            sequence: self.sequence,
            tags: self.tags,
            initialize_study: self.initialize_study,
        };
        let attachments = self
            .gpx
            .into_iter()
            .chain(self.measurement)
            .map(|file| Attachment {
                field: UPLOAD_FIELD,
                file,
            })
            .collect();
        Ok(StudyPayload {
            fields,
            attachments,
        })
    }
}

fn check_payload(
    field: &'static str,
    file: &NamedBytes,
    suffixes: &[&str],
) -> Result<String, ValidationError> {
    let name = FileName::new(field, &file.name)?;
    if !name.has_suffix(suffixes) {
        return Err(ValidationError::Suffix {
            field,
            name: file.name.clone(),
            expected: suffix_list(suffixes),
        });
    }
    SizeTier::Large.check(field, &file.name, file.size())?;
    Ok(name.into_inner())
}

fn check_registered(
    kind: FileKind,
    field: &'static str,
    name: &str,
    registry: &FileRegistry,
) -> Result<String, ValidationError> {
    let name = FileName::new(field, name)?;
    if !registry.contains(kind, &name) {
        return Err(ValidationError::NotUploaded {
            field,
            name: name.into_inner(),
        });
    }
    Ok(name.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_MEAS_FILE_SIZE;

    fn registry() -> FileRegistry {
        let mut registry = FileRegistry::new();
        registry.replace(FileKind::InstrumentParameter, vec!["inst.instprm".into()]);
        registry.replace(FileKind::Phase, vec!["quartz.cif".into(), "corundum.cif".into()]);
        registry.replace(FileKind::Sequence, vec!["v2".into()]);
        registry
    }

    fn measurement_params() -> PostStudyServerParams {
        PostStudyServerParams {
            study_name: "run_s0042".to_string(),
            n_trials_total: 100,
            n_startup_trials: 10,
            random_seed: 42,
            gpx: None,
            measurement: Some(NamedBytes::new("scan.csv", b"10.0,5.0\n".to_vec())),
            prm_filename: Some("inst.instprm".to_string()),
            cif_filenames: Some(vec!["quartz.cif".to_string(), "corundum.cif".to_string()]),
            sequence: LATEST_SEQUENCE.to_string(),
            tags: vec!["batch-a".to_string()],
            initialize_study: false,
        }
    }

    #[test]
    fn valid_measurement_request_produces_payload() {
        let payload = measurement_params().validate(&registry()).expect("valid");
        assert_eq!(payload.fields.measurement_filename.as_deref(), Some("scan.csv"));
        assert_eq!(payload.attachments.len(), 1);
        assert_eq!(payload.attachments[0].field, "files");
        assert_eq!(payload.attachments[0].file.name, "scan.csv");

        let form = payload.form_fields();
        let cifs: Vec<_> = form
            .iter()
            .filter(|(k, _)| *k == "cif_filenames")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(cifs, vec!["quartz.cif", "corundum.cif"]);
        assert!(form.contains(&("random_seed", "42".to_string())));
        assert!(!form.iter().any(|(k, _)| *k == "gpx_filename"));
    }

    #[test]
    fn serialized_fields_omit_absent_options() {
        let payload = measurement_params().validate(&registry()).expect("valid");
        let value = serde_json::to_value(&payload.fields).expect("json");
        assert!(value.get("gpx_filename").is_none());
        assert_eq!(value["n_startup_trials"], 10);
        assert_eq!(value["sequence"], "latest");
    }

    #[test]
    fn startup_above_total_fails() {
        let params = PostStudyServerParams {
            n_trials_total: 5,
            n_startup_trials: 6,
            ..measurement_params()
        };
        assert_eq!(
            params.validate(&registry()).expect_err("fail"),
            ValidationError::StartupExceedsTotal {
                startup: 6,
                total: 5
            }
        );
    }

    #[test]
    fn zero_startup_trials_fails_bounds() {
        let params = PostStudyServerParams {
            n_startup_trials: 0,
            ..measurement_params()
        };
        assert!(matches!(
            params.validate(&registry()),
            Err(ValidationError::Bounds {
                field: "n_startup_trials",
                ..
            })
        ));
    }

    #[test]
    fn measurement_without_prm_is_rejected() {
        let params = PostStudyServerParams {
            prm_filename: None,
            ..measurement_params()
        };
        let err = params.validate(&registry()).expect_err("fail");
        assert!(
            err.to_string()
                .contains("required when measurement file is specified"),
            "{}",
            err
        );
    }

    #[test]
    fn measurement_with_empty_cif_list_is_rejected() {
        let params = PostStudyServerParams {
            cif_filenames: Some(Vec::new()),
            ..measurement_params()
        };
        assert!(matches!(
            params.validate(&registry()),
            Err(ValidationError::MissingRequired { .. })
        ));
    }

    #[test]
    fn gpx_and_measurement_are_exclusive() {
        let params = PostStudyServerParams {
            gpx: Some(NamedBytes::new("p.gpx", b"gpx".to_vec())),
            ..measurement_params()
        };
        assert!(matches!(
            params.validate(&registry()),
            Err(ValidationError::MutualExclusivity { .. })
        ));
    }

    #[test]
    fn neither_payload_is_missing() {
        let params = PostStudyServerParams {
            measurement: None,
            ..measurement_params()
        };
        assert!(matches!(
            params.validate(&registry()),
            Err(ValidationError::MissingRequired { .. })
        ));
    }

    #[test]
    fn gpx_forbids_prm_and_cif_names() {
        let base = PostStudyServerParams {
            gpx: Some(NamedBytes::new("p.gpx", b"gpx".to_vec())),
            measurement: None,
            ..measurement_params()
        };
        let err = base.clone().validate(&registry()).expect_err("prm forbidden");
        assert_eq!(
            err,
            ValidationError::MutualExclusivity {
                fields: vec!["gpx_filecontent", "prm_filename"]
            }
        );

        let bundle_only = PostStudyServerParams {
            prm_filename: None,
            cif_filenames: None,
            ..base
        };
        let payload = bundle_only.validate(&registry()).expect("valid bundle");
        assert_eq!(payload.fields.gpx_filename.as_deref(), Some("p.gpx"));
        assert!(payload.fields.prm_filename.is_none());
        assert_eq!(payload.attachments.len(), 1);
    }

    #[test]
    fn unregistered_names_are_not_uploaded() {
        let params = PostStudyServerParams {
            cif_filenames: Some(vec!["quartz.cif".to_string(), "rutile.cif".to_string()]),
            ..measurement_params()
        };
        assert_eq!(
            params.validate(&registry()).expect_err("fail"),
            ValidationError::NotUploaded {
                field: "cif_filenames",
                name: "rutile.cif".to_string()
            }
        );

        let params = PostStudyServerParams {
            prm_filename: Some("other.prm".to_string()),
            ..measurement_params()
        };
        assert!(matches!(
            params.validate(&registry()),
            Err(ValidationError::NotUploaded {
                field: "prm_filename",
                ..
            })
        ));
    }

    #[test]
    fn names_with_separators_fail_pattern_before_registry() {
        let params = PostStudyServerParams {
            prm_filename: Some("../inst.instprm".to_string()),
            ..measurement_params()
        };
        assert!(matches!(
            params.validate(&registry()),
            Err(ValidationError::Pattern { .. })
        ));
    }

    #[test]
    fn sequence_must_be_registered_unless_latest() {
        let params = PostStudyServerParams {
            sequence: "v2".to_string(),
            ..measurement_params()
        };
        assert!(params.validate(&registry()).is_ok());

        let params = PostStudyServerParams {
            sequence: "v3".to_string(),
            ..measurement_params()
        };
        assert_eq!(
            params.validate(&registry()).expect_err("fail"),
            ValidationError::UnknownSequence("v3".to_string())
        );

        // "latest" validates even against an empty registry's sequence list.
        let mut empty_seq = registry();
        empty_seq.replace(FileKind::Sequence, Vec::new());
        assert!(measurement_params().validate(&empty_seq).is_ok());
    }

    #[test]
    fn oversized_measurement_fails() {
        let params = PostStudyServerParams {
            measurement: Some(NamedBytes::new(
                "scan.csv",
                vec![b'0'; MAX_MEAS_FILE_SIZE as usize + 1],
            )),
            ..measurement_params()
        };
        assert!(matches!(
            params.validate(&registry()),
            Err(ValidationError::FileTooLarge { .. })
        ));
    }
}
