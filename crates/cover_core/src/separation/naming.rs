//! Output filename derivation for the separation chain.
//!
//! The separator names every output `<input_stem>_(<Label>)_<model_stem>.<ext>`,
//! so names accumulate the whole upstream history. Everything here is pure.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::descriptor::{
    model_stem, StageDescriptor, KARAOKE_SEPARATION, NOISE_REDUCTION, REVERB_PROCESSING,
};
use super::errors::NamingError;

/// Semantic role of a stage output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OutputRole {
    Vocal,
    Instrumental,
    /// The processed signal a de-reverb model keeps.
    Main,
    Reverb,
}

impl fmt::Display for OutputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputRole::Vocal => "vocal",
            OutputRole::Instrumental => "instrumental",
            OutputRole::Main => "main",
            OutputRole::Reverb => "reverb",
        };
        f.write_str(name)
    }
}

/// Labels each model writes, keyed by role.
fn model_labels(model_identifier: &str) -> Option<&'static [(OutputRole, &'static str)]> {
    const SEPARATOR: &[(OutputRole, &str)] = &[
        (OutputRole::Vocal, "Vocals"),
        (OutputRole::Instrumental, "Instrumental"),
    ];
    const DEREVERB: &[(OutputRole, &str)] = &[
        (OutputRole::Main, "No Reverb"),
        (OutputRole::Reverb, "Reverb"),
    ];

    match model_identifier {
        "Kim_Vocal_1.onnx" | "6_HP-Karaoke-UVR.pth" | "UVR-DeNoise.pth" => Some(SEPARATOR),
        "Reverb_HQ_By_FoxJoy.onnx" => Some(DEREVERB),
        _ => None,
    }
}

/// Which upstream role each stage consumes. The first stage reads the
/// copied source and has no entry.
fn input_role(stage_name: &str) -> Option<OutputRole> {
    match stage_name {
        KARAOKE_SEPARATION => Some(OutputRole::Vocal),
        REVERB_PROCESSING => Some(OutputRole::Vocal),
        NOISE_REDUCTION => Some(OutputRole::Main),
        _ => None,
    }
}

/// Filenames a stage is expected to produce, keyed by role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutputSet {
    stage_name: String,
    outputs: BTreeMap<OutputRole, String>,
}

impl StageOutputSet {
    pub fn new(stage_name: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn with(mut self, role: OutputRole, file_name: impl Into<String>) -> Self {
        self.outputs.insert(role, file_name.into());
        self
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    pub fn get(&self, role: OutputRole) -> Option<&str> {
        self.outputs.get(&role).map(String::as_str)
    }

    /// Filename for a role, or `RoleMissing`.
    pub fn require(&self, role: OutputRole) -> Result<&str, NamingError> {
        self.get(role).ok_or_else(|| NamingError::RoleMissing {
            stage: self.stage_name.clone(),
            role,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (OutputRole, &str)> {
        self.outputs.iter().map(|(role, name)| (*role, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Derive the outputs a stage will write for an input named `base_id`.
///
/// `base_id` is the stem of the consumed file; `extension` is the
/// configured output format.
pub fn expected_outputs(
    stage_name: &str,
    model_identifier: &str,
    base_id: &str,
    extension: &str,
) -> Result<StageOutputSet, NamingError> {
    if StageDescriptor::by_name(stage_name).is_none() {
        return Err(NamingError::UnknownStage(stage_name.to_string()));
    }
    let labels = model_labels(model_identifier)
        .ok_or_else(|| NamingError::UnknownModel(model_identifier.to_string()))?;

    let stem = model_stem(model_identifier);
    let set = labels
        .iter()
        .fold(StageOutputSet::new(stage_name), |set, (role, label)| {
            set.with(
                *role,
                format!("{}_({})_{}.{}", base_id, label, stem, extension),
            )
        });
    Ok(set)
}

/// Select which upstream output feeds `stage_name`.
///
/// Noise reduction reads the de-reverberated `Main` output of reverb
/// processing, skipping over the karaoke vocal.
pub fn next_input<'a>(
    stage_name: &str,
    upstream: &'a StageOutputSet,
) -> Result<&'a str, NamingError> {
    let role =
        input_role(stage_name).ok_or_else(|| NamingError::UnknownStage(stage_name.to_string()))?;
    upstream.require(role)
}

/// File stem (name without extension) of an output filename.
pub fn file_stem(file_name: &str) -> &str {
    file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name)
}
