use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{timestamp, Link};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantFloat {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A refined value with its standard uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPropagatedFloat {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub sig: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinableFloat {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub sig: Option<f64>,
    #[serde(default)]
    pub refine: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstrainableFloat {
    #[serde(flatten)]
    pub inner: RefinableFloat,
    #[serde(default)]
    pub is_constrained: bool,
}

/// Values with optional per-entry uncertainties. `sigs` is empty or as long as `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinableFloatList {
    pub values: Vec<f64>,
    #[serde(default)]
    pub sigs: Vec<Option<f64>>,
    #[serde(default)]
    pub refine: bool,
}

impl RefinableFloatList {
    pub fn is_consistent(&self) -> bool {
        self.sigs.is_empty() || self.sigs.len() == self.values.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MillerIndex {
    pub hkl: [i32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebyeScherrerSample {
    #[serde(rename = "Scale")]
    pub scale: RefinableFloat,
    #[serde(rename = "Absorption")]
    pub absorption: RefinableFloat,
    #[serde(rename = "DisplaceX")]
    pub displace_x: RefinableFloat,
    #[serde(rename = "DisplaceY")]
    pub displace_y: RefinableFloat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeOfFlightSample {
    #[serde(rename = "Scale")]
    pub scale: RefinableFloat,
    #[serde(rename = "Absorption")]
    pub absorption: RefinableFloat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BraggBrentanoSample {
    #[serde(rename = "Scale")]
    pub scale: RefinableFloat,
    #[serde(rename = "Shift")]
    pub shift: RefinableFloat,
    #[serde(rename = "Transparency")]
    pub transparency: RefinableFloat,
    #[serde(rename = "SurfRoughA")]
    pub surf_rough_a: RefinableFloat,
    #[serde(rename = "SurfRoughB")]
    pub surf_rough_b: RefinableFloat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SampleParameters {
    #[serde(rename = "DS")]
    DebyeScherrer(DebyeScherrerSample),
    #[serde(rename = "TOF")]
    TimeOfFlight(TimeOfFlightSample),
    #[serde(rename = "BB")]
    BraggBrentano(BraggBrentanoSample),
}

impl SampleParameters {
    pub fn scale(&self) -> &RefinableFloat {
        match self {
            SampleParameters::DebyeScherrer(p) => &p.scale,
            SampleParameters::TimeOfFlight(p) => &p.scale,
            SampleParameters::BraggBrentano(p) => &p.scale,
        }
    }
}

/// Profile terms common to constant-wavelength instruments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowderCwInstrument {
    #[serde(rename = "X")]
    pub x: RefinableFloat,
    #[serde(rename = "Y")]
    pub y: RefinableFloat,
    #[serde(rename = "Z")]
    pub z: RefinableFloat,
    #[serde(rename = "Zero")]
    pub zero: RefinableFloat,
    #[serde(rename = "U")]
    pub u: RefinableFloat,
    #[serde(rename = "V")]
    pub v: RefinableFloat,
    #[serde(rename = "W")]
    pub w: RefinableFloat,
    #[serde(rename = "Polariz.")]
    pub polariz: RefinableFloat,
    #[serde(rename = "SH/L")]
    pub sh_l: RefinableFloat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrayCwInstrument {
    #[serde(flatten)]
    pub profile: PowderCwInstrument,
    #[serde(rename = "I(L2)/I(L1)")]
    pub i2_i1: RefinableFloat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TofInstrument {
    #[serde(rename = "X")]
    pub x: RefinableFloat,
    #[serde(rename = "Y")]
    pub y: RefinableFloat,
    #[serde(rename = "Z")]
    pub z: RefinableFloat,
    #[serde(rename = "Zero")]
    pub zero: RefinableFloat,
    #[serde(rename = "sig-0")]
    pub sig0: RefinableFloat,
    #[serde(rename = "sig-1")]
    pub sig1: RefinableFloat,
    #[serde(rename = "sig-2")]
    pub sig2: RefinableFloat,
    #[serde(rename = "sig-q")]
    pub sigq: RefinableFloat,
    pub alpha: RefinableFloat,
    #[serde(rename = "beta-0")]
    pub beta0: RefinableFloat,
    #[serde(rename = "beta-1")]
    pub beta1: RefinableFloat,
    #[serde(rename = "beta-q")]
    pub betaq: RefinableFloat,
    #[serde(rename = "difA")]
    pub dif_a: RefinableFloat,
    #[serde(rename = "difB")]
    pub dif_b: RefinableFloat,
    #[serde(rename = "difC")]
    pub dif_c: RefinableFloat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InstrumentParameters {
    #[serde(rename = "PXC")]
    XrayConstantWavelength(XrayCwInstrument),
    #[serde(rename = "PNC")]
    NeutronConstantWavelength(PowderCwInstrument),
    #[serde(rename = "PNT")]
    NeutronTimeOfFlight(TofInstrument),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeParameters {
    pub a: ConstrainableFloat,
    pub b: ConstrainableFloat,
    pub c: ConstrainableFloat,
    pub alpha: ConstrainableFloat,
    pub beta: ConstrainableFloat,
    pub gamma: ConstrainableFloat,
    #[serde(default)]
    pub volume: Option<ErrorPropagatedFloat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomSite {
    pub x: ConstrainableFloat,
    pub y: ConstrainableFloat,
    pub z: ConstrainableFloat,
    pub frac: RefinableFloat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotropicAtom {
    #[serde(flatten)]
    pub site: AtomSite,
    #[serde(rename = "Uiso")]
    pub u_iso: RefinableFloat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnisotropicAtom {
    #[serde(flatten)]
    pub site: AtomSite,
    #[serde(rename = "U11")]
    pub u11: ConstrainableFloat,
    #[serde(rename = "U22")]
    pub u22: ConstrainableFloat,
    #[serde(rename = "U33")]
    pub u33: ConstrainableFloat,
    #[serde(rename = "U12", default)]
    pub u12: Option<ConstrainableFloat>,
    #[serde(rename = "U13", default)]
    pub u13: Option<ConstrainableFloat>,
    #[serde(rename = "U23", default)]
    pub u23: Option<ConstrainableFloat>,
}

/// Atom parameters keyed by displacement model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "adp_model", rename_all = "lowercase")]
pub enum AtomParameters {
    Isotropic(IsotropicAtom),
    Anisotropic(AnisotropicAtom),
}

impl AtomParameters {
    pub fn site(&self) -> &AtomSite {
        match self {
            AtomParameters::Isotropic(atom) => &atom.site,
            AtomParameters::Anisotropic(atom) => &atom.site,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fractions {
    pub phase_scale: RefinableFloat,
    #[serde(default)]
    pub wgt_frac: Option<ErrorPropagatedFloat>,
    #[serde(default)]
    pub mol_frac: Option<ErrorPropagatedFloat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniaxialBroadening {
    pub unique_axis: MillerIndex,
    pub equatorial: RefinableFloat,
    pub axial: RefinableFloat,
    #[serde(rename = "LGmix")]
    pub lg_mix: RefinableFloat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum SizeModel {
    Isotropic {
        size: RefinableFloat,
        #[serde(rename = "LGmix")]
        lg_mix: RefinableFloat,
    },
    Uniaxial(UniaxialBroadening),
    Ellipsoidal {
        #[serde(rename = "S11")]
        s11: RefinableFloat,
        #[serde(rename = "S22")]
        s22: RefinableFloat,
        #[serde(rename = "S33")]
        s33: RefinableFloat,
        #[serde(rename = "S12")]
        s12: RefinableFloat,
        #[serde(rename = "S13")]
        s13: RefinableFloat,
        #[serde(rename = "S23")]
        s23: RefinableFloat,
        #[serde(rename = "LGmix")]
        lg_mix: RefinableFloat,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum MustrainModel {
    Isotropic {
        strain: RefinableFloat,
        #[serde(rename = "LGmix")]
        lg_mix: RefinableFloat,
    },
    Uniaxial(UniaxialBroadening),
    /// Only `S400` is always present; the other terms depend on the Laue class.
    Generalized {
        #[serde(rename = "LGmix")]
        lg_mix: RefinableFloat,
        #[serde(flatten)]
        terms: BTreeMap<String, RefinableFloat>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model")]
pub enum PreferredOrientation {
    #[serde(rename = "March-Dollase")]
    MarchDollase {
        ratio: RefinableFloat,
        unique_axis: MillerIndex,
    },
    #[serde(rename = "Spherical-Harmonics")]
    SphericalHarmonics {
        order: u32,
        coeffs: RefinableFloatList,
        #[serde(default)]
        names: Option<Vec<String>>,
        #[serde(rename = "penaltyHKL", default)]
        penalty_hkl: Option<Vec<String>>,
        #[serde(rename = "zeroMRDtoler", default)]
        zero_mrd_toler: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Babinet {
    #[serde(rename = "A")]
    pub a: RefinableFloat,
    #[serde(rename = "U")]
    pub u: RefinableFloat,
}

/// Histogram-and-phase terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramPhase {
    pub frac: Fractions,
    #[serde(default)]
    pub size: Option<SizeModel>,
    #[serde(default)]
    pub mustrain: Option<MustrainModel>,
    #[serde(default)]
    pub hstrain: Option<BTreeMap<String, RefinableFloat>>,
    #[serde(default)]
    pub layer_disp: Option<RefinableFloat>,
    #[serde(default)]
    pub pref_ori: Option<PreferredOrientation>,
    #[serde(default)]
    pub extinction: Option<RefinableFloat>,
    #[serde(default)]
    pub babinet: Option<Babinet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseParameters {
    #[serde(rename = "LP")]
    pub lattice: LatticeParameters,
    pub atoms: BTreeMap<String, AtomParameters>,
    #[serde(rename = "HAP")]
    pub histogram: HistogramPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialBackground {
    /// GSAS-II background function name, e.g. `chebyschev-1`.
    pub func: String,
    pub coeffs: RefinableFloatList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundParameters {
    pub polynomial: PolynomialBackground,
    #[serde(default)]
    pub debyes: Vec<Value>,
    #[serde(default)]
    pub peaks: Vec<Value>,
}

/// Agreement factors and convergence report of one refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rvalues {
    pub aborted: bool,
    pub converged: bool,
    #[serde(rename = "Rwp")]
    pub rwp: Option<f64>,
    #[serde(rename = "GOF")]
    pub gof: Option<f64>,
    pub chi2: Option<f64>,
    pub message: Option<String>,
    #[serde(rename = "SVD0", default)]
    pub svd0: i64,
    #[serde(rename = "Nvar", default)]
    pub n_var: Option<u32>,
    #[serde(rename = "Nobs", default)]
    pub n_obs: Option<u32>,
    #[serde(default)]
    pub cycles: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Refinement state shared by stored refines and a trial's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineBody {
    pub sequence_index: u32,
    #[serde(rename = "SP")]
    pub sample: SampleParameters,
    #[serde(rename = "IP")]
    pub instrument: InstrumentParameters,
    pub phases: BTreeMap<String, PhaseParameters>,
    #[serde(rename = "BP")]
    pub background: BackgroundParameters,
    /// Refinement controls: algorithm, cycle limits, constraints.
    #[serde(rename = "RP")]
    pub controls: Value,
    #[serde(rename = "Rval")]
    pub rvalues: Rvalues,
}

/// One refinement step of a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refine {
    #[serde(alias = "_id")]
    pub id: String,
    pub parent_trial: Link,
    pub group: Link,
    #[serde(with = "timestamp")]
    pub start_at: DateTime<Utc>,
    pub time_to_complete: Value,
    #[serde(flatten)]
    pub body: RefineBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    #[serde(alias = "_id")]
    pub id: String,
    pub parent_study: Link,
    pub group: Link,
    #[serde(default)]
    pub refines: Vec<Link>,
    #[serde(default)]
    pub result_refine: Option<RefineBody>,
    #[serde(alias = "trial_num")]
    pub num: u32,
    pub is_randomly_sampled: bool,
    pub seed: i64,
    #[serde(with = "timestamp")]
    pub start_at: DateTime<Utc>,
    pub time_to_complete: Value,
    pub processed_by: String,
}

impl Trial {
    pub fn rwp(&self) -> Option<f64> {
        self.result_refine.as_ref().and_then(|r| r.rvalues.rwp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rf(value: f64) -> Value {
        json!({"value": value, "refine": true, "sig": null})
    }

    fn cf(value: f64) -> Value {
        json!({"value": value, "refine": false, "is_constrained": true})
    }

    fn refine_body() -> Value {
        json!({
            "sequence_index": 3,
            "SP": {"type": "BB", "Scale": rf(1.0), "Shift": rf(0.1),
                   "Transparency": rf(0.0), "SurfRoughA": rf(0.0), "SurfRoughB": rf(0.0)},
            "IP": {"type": "PXC", "X": rf(0.0), "Y": rf(0.0), "Z": rf(0.0), "Zero": rf(0.01),
                   "U": rf(2.0), "V": rf(-2.0), "W": rf(5.0), "Polariz.": rf(0.5),
                   "SH/L": rf(0.002), "I(L2)/I(L1)": rf(0.5)},
            "phases": {"quartz": {
                "LP": {"a": cf(4.9), "b": cf(4.9), "c": cf(5.4),
                       "alpha": cf(90.0), "beta": cf(90.0), "gamma": cf(120.0),
                       "volume": {"value": 113.0, "sig": 0.1}},
                "atoms": {"Si1": {"adp_model": "isotropic", "x": cf(0.47), "y": cf(0.0),
                                  "z": cf(0.0), "frac": rf(1.0), "Uiso": rf(0.01)}},
                "HAP": {"frac": {"phase_scale": rf(1.0)},
                        "size": {"model": "isotropic", "size": rf(1.0), "LGmix": rf(1.0)},
                        "mustrain": {"model": "generalized", "S400": rf(0.1), "S004": rf(0.2),
                                     "LGmix": rf(1.0)},
                        "pref_ori": {"model": "March-Dollase", "ratio": rf(1.0),
                                     "unique_axis": {"hkl": [0, 0, 1]}}}
            }},
            "BP": {"polynomial": {"func": "chebyschev-1",
                                  "coeffs": {"values": [1.0, 2.0], "sigs": [null, 0.1]}}},
            "RP": {"algorithm": "analytic Hessian", "max_cycles": 10},
            "Rval": {"aborted": false, "converged": true, "Rwp": 9.5, "GOF": 1.8,
                     "chi2": 3.2, "message": null, "SVD0": 0, "SVDvars": [],
                     "Nvar": 12, "Nobs": 4000, "cycles": 4}
        })
    }

    #[test]
    fn decodes_refine_with_parameter_unions() {
        let mut value = refine_body();
        value["_id"] = json!("r1");
        value["parent_trial"] = json!({"collection": "trial", "id": "t1"});
        value["group"] = json!({"collection": "group", "id": "g1"});
        value["start_at"] = json!("2025-01-01T00:00:00");
        value["time_to_complete"] = json!("PT12S");

        let refine: Refine = serde_json::from_value(value).expect("refine");
        assert_eq!(refine.id, "r1");
        assert_eq!(refine.body.sequence_index, 3);
        assert_eq!(refine.body.sample.scale().value, 1.0);
        match &refine.body.instrument {
            InstrumentParameters::XrayConstantWavelength(ip) => {
                assert_eq!(ip.i2_i1.value, 0.5);
                assert_eq!(ip.profile.polariz.value, 0.5);
            }
            other => panic!("unexpected instrument {other:?}"),
        }
        let quartz = &refine.body.phases["quartz"];
        assert!(quartz.lattice.a.is_constrained);
        assert_eq!(quartz.atoms["Si1"].site().x.inner.value, 0.47);
        match &quartz.histogram.mustrain {
            Some(MustrainModel::Generalized { terms, .. }) => {
                assert_eq!(terms.len(), 2);
                assert_eq!(terms["S004"].value, 0.2);
            }
            other => panic!("unexpected mustrain {other:?}"),
        }
        assert!(refine.body.background.polynomial.coeffs.is_consistent());
        assert_eq!(refine.body.rvalues.rwp, Some(9.5));
        assert!(refine.body.rvalues.extra.contains_key("SVDvars"));
    }

    #[test]
    fn trial_accepts_trial_num_alias() {
        let trial: Trial = serde_json::from_value(json!({
            "_id": "t1",
            "parent_study": {"collection": "study", "id": "s1"},
            "group": {"collection": "group", "id": "g1"},
            "refines": [{"collection": "refine", "id": "r1"}],
            "result_refine": refine_body(),
            "trial_num": 7,
            "is_randomly_sampled": true,
            "seed": 99,
            "start_at": "2025-01-01T00:00:00Z",
            "time_to_complete": 12.5,
            "processed_by": "worker-1"
        }))
        .expect("trial");
        assert_eq!(trial.num, 7);
        assert_eq!(trial.rwp(), Some(9.5));
    }

    #[test]
    fn unknown_sample_geometry_is_rejected() {
        let mut value = refine_body();
        value["SP"]["type"] = json!("XX");
        assert!(serde_json::from_value::<RefineBody>(value).is_err());
    }
}
