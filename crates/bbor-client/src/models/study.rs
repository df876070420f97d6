use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{timestamp, Link};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialNum {
    pub num: u32,
    pub trial: Link,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestTrial {
    pub approach: String,
    pub trial_num: u32,
    pub trial: Link,
    #[serde(rename = "Rwp")]
    pub rwp: f64,
    #[serde(rename = "GOF")]
    pub gof: f64,
    #[serde(default)]
    pub staled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub catalog_id: Option<String>,
    pub catalog_name: Option<String>,
    pub beamline: Option<String>,
    pub facility: Option<String>,
    pub maker: Option<String>,
    #[serde(default)]
    pub attachment: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaveLengths {
    One(f64),
    Many(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamSpec {
    #[serde(rename = "type")]
    pub kind: String,
    /// `continuous` or `pulse`.
    pub structure: String,
    pub wave_lengths: Option<WaveLengths>,
}

/// Fields shared by every diffraction geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffractionBase {
    pub measurement_file: String,
    pub instrument: Instrument,
    /// e.g. `PXC-BB`.
    #[serde(rename = "type")]
    pub kind: String,
    pub sample_form: String,
    pub beam: BeamSpec,
    pub bank: u32,
    #[serde(default)]
    pub azimuth: Option<f64>,
    #[serde(default)]
    pub measurement_id: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantWavelength {
    #[serde(flatten)]
    pub base: DiffractionBase,
    pub gonio_radius: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "geometry")]
pub enum MonochromaticBeam {
    #[serde(rename = "Bragg-Brentano")]
    BraggBrentano(ConstantWavelength),
    #[serde(rename = "Debye-Scherrer")]
    DebyeScherrer(ConstantWavelength),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeOfFlight {
    #[serde(flatten)]
    pub base: DiffractionBase,
    pub geometry: String,
    pub flight_path: f64,
    pub two_theta: f64,
}

/// One measurement of a study, keyed by `method` then `geometry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum Diffraction {
    #[serde(rename = "CW")]
    ConstantWavelength(MonochromaticBeam),
    #[serde(rename = "TOF")]
    TimeOfFlight(TimeOfFlight),
}

impl Diffraction {
    pub fn base(&self) -> &DiffractionBase {
        match self {
            Diffraction::ConstantWavelength(MonochromaticBeam::BraggBrentano(cw))
            | Diffraction::ConstantWavelength(MonochromaticBeam::DebyeScherrer(cw)) => &cw.base,
            Diffraction::TimeOfFlight(tof) => &tof.base,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub space_group: String,
    pub crystal_system: String,
    #[serde(default)]
    pub formula: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub sample_id: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumableAttributes {
    #[serde(rename = "BBOR_version")]
    pub bbor_version: String,
    pub completed: bool,
    #[serde(with = "timestamp")]
    pub start_at: DateTime<Utc>,
    /// Duration as sent by the server.
    pub time_to_complete: Value,
    pub n_trials_total: u32,
    pub n_startup_trials: u32,
    pub python_version: String,
    pub optuna_version: String,
    pub gsas2_version: Value,
}

/// A refinement study and its trial index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    #[serde(alias = "_id")]
    pub id: String,
    pub status: String,
    pub trials: Vec<TrialNum>,
    #[serde(rename = "study_name")]
    pub name: String,
    pub user: Link,
    pub group: Link,
    #[serde(default)]
    pub resumables: Vec<ResumableAttributes>,
    #[serde(with = "timestamp")]
    pub start_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    pub n_trials_total: u32,
    pub n_startup_trials: u32,
    /// An integer, `"random"`, or null.
    pub random_seed: Value,
    pub random_seed_fix: u32,
    #[serde(default)]
    pub sequence_version: Option<String>,
    pub sequence_version_fix: String,
    #[serde(default)]
    pub sequence_kwargs: Option<Value>,
    #[serde(default = "unknown_step_count")]
    pub num_sequence_steps: i64,
    #[serde(default)]
    pub measurements: Vec<Diffraction>,
    #[serde(default)]
    pub samples: Vec<Sample>,
    pub path_in_obs: String,
    #[serde(default)]
    pub best_trials: Vec<BestTrial>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn unknown_step_count() -> i64 {
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn study_json() -> Value {
        json!({
            "_id": "st-1",
            "status": "running",
            "trials": [{"num": 0, "trial": {"collection": "trial", "id": "t0"}}],
            "study_name": "run_s0042",
            "user": {"collection": "user", "id": "u1"},
            "group": {"collection": "group", "id": "g1"},
            "start_at": "2025-01-01T00:00:00",
            "updated_at": "2025-01-01T01:00:00",
            "n_trials_total": 200,
            "n_startup_trials": 10,
            "random_seed": 42,
            "random_seed_fix": 42,
            "sequence_version_fix": "v2",
            "measurements": [{
                "method": "CW",
                "geometry": "Bragg-Brentano",
                "measurement_file": "scan.csv",
                "instrument": {"name": "desk", "type": "desktop"},
                "type": "PXC-BB",
                "sample_form": "powder",
                "beam": {"type": "X-ray", "structure": "continuous", "wave_lengths": [1.5406, 1.5444]},
                "bank": 1,
                "gonio_radius": 150.0
            }, {
                "method": "TOF",
                "geometry": "Debye-Scherrer",
                "measurement_file": "tof.csv",
                "instrument": {},
                "type": "PNT-DS",
                "sample_form": "powder",
                "beam": {"type": "neutron", "structure": "pulse", "wave_lengths": null},
                "bank": 2,
                "flight_path": 25.0,
                "two_theta": 90.0
            }],
            "path_in_obs": "obs/st-1",
            "best_trials": [{"approach": "lowestRwp", "trial_num": 0,
                             "trial": {"collection": "trial", "id": "t0"}, "Rwp": 8.1, "GOF": 1.3}]
        })
    }

    #[test]
    fn decodes_study_with_tagged_measurements() {
        let study: Study = serde_json::from_value(study_json()).expect("study");
        assert_eq!(study.name, "run_s0042");
        assert_eq!(study.num_sequence_steps, -1);
        assert_eq!(study.best_trials[0].rwp, 8.1);
        match &study.measurements[0] {
            Diffraction::ConstantWavelength(MonochromaticBeam::BraggBrentano(cw)) => {
                assert_eq!(cw.gonio_radius, 150.0);
                assert_eq!(cw.base.measurement_file, "scan.csv");
                assert_eq!(
                    cw.base.beam.wave_lengths,
                    Some(WaveLengths::Many(vec![1.5406, 1.5444]))
                );
            }
            other => panic!("unexpected measurement {other:?}"),
        }
        match &study.measurements[1] {
            Diffraction::TimeOfFlight(tof) => {
                assert_eq!(tof.flight_path, 25.0);
                assert_eq!(tof.base.bank, 2);
            }
            other => panic!("unexpected measurement {other:?}"),
        }
        assert_eq!(study.measurements[1].base().kind, "PNT-DS");
    }

    #[test]
    fn unknown_geometry_is_rejected() {
        let mut value = study_json();
        value["measurements"][0]["geometry"] = json!("Guinier");
        assert!(serde_json::from_value::<Study>(value).is_err());
    }
}
