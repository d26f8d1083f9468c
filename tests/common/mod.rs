//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use sds_qabot::ml::{GenerationParams, GenerationRequest, TextGenerator};
use sds_qabot::Config;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

pub const ACETONE_SHEET: &str = "Right to Know Hazardous Substance Fact Sheet
Common Name: ACETONE
Synonyms: Dimethyl Ketone; 2-Propanone
CAS Number: 67-64-1
DOT Number: UN 1090

SUMMARY
Acetone is a colorless liquid with a sweet odor. It is used as a solvent for fats, oils, waxes and lacquers, and in nail polish remover.

HEALTH HAZARDS
Contact can irritate the skin and eyes. Breathing Acetone can irritate the nose and throat. High exposure can cause headache, dizziness, lightheadedness and passing out. Repeated exposure may cause drying and cracking of the skin.

WORKPLACE EXPOSURE LIMITS
OSHA: The legal airborne permissible exposure limit is 1,000 ppm averaged over an 8-hour workshift. NIOSH: The recommended airborne exposure limit is 250 ppm averaged over a 10-hour workshift. ACGIH: The threshold limit value is 250 ppm averaged over an 8-hour workshift.

FIRE HAZARDS
Acetone is a FLAMMABLE LIQUID. Use dry chemical, CO2 or alcohol-resistant foam extinguishers. Vapors are heavier than air and may travel to a source of ignition and flash back. Containers may explode in a fire.

STORAGE
Store in tightly closed containers in a cool, well-ventilated area away from oxidizing agents, strong bases and reducing agents.";

pub const ACETALDEHYDE_SHEET: &str = "Right to Know Hazardous Substance Fact Sheet
Common Name: ACETALDEHYDE
Synonyms: Ethanal; Acetic Aldehyde
CAS Number: 75-07-0
DOT Number: UN 1089

SUMMARY
Acetaldehyde is a colorless liquid or gas with a fruity odor. It is used to make acetic acid, perfumes and dyes, and as a flavoring agent.

HEALTH HAZARDS
Acetaldehyde is a CARCINOGEN and may be a TERATOGEN. Contact can severely irritate and burn the skin and eyes. Breathing Acetaldehyde can irritate the nose, throat and lungs causing coughing and wheezing.

WORKPLACE EXPOSURE LIMITS
OSHA: The legal airborne permissible exposure limit is 200 ppm averaged over an 8-hour workshift. ACGIH: The threshold limit value is 25 ppm, which should not be exceeded at any time. Acetaldehyde may be a carcinogen in humans, so exposure should be reduced to the lowest possible level.

FIRE HAZARDS
Acetaldehyde is a FLAMMABLE LIQUID and a DANGEROUS FIRE HAZARD. Use dry chemical or alcohol-resistant foam extinguishers. Acetaldehyde can form explosive peroxides on exposure to air.";

/// Data directory with both fact sheets plus a file ingestion must skip
pub fn write_sheets(data_dir: &Path) {
    fs::create_dir_all(data_dir).unwrap();
    fs::write(data_dir.join("acetaldehyde.txt"), ACETALDEHYDE_SHEET).unwrap();
    fs::write(data_dir.join("acetone.txt"), ACETONE_SHEET).unwrap();
    fs::write(data_dir.join("notes.csv"), "not,a,fact,sheet").unwrap();
}

/// Default configuration rooted in `root`
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.data_dir = root.join("data");
    config.paths.vector_persist_dir = root.join("index");
    config.registry.root = root.join("registry");
    write_sheets(&config.paths.data_dir);
    config
}

/// Generator that records every request it is given
#[derive(Default)]
pub struct RecordingGenerator {
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl RecordingGenerator {
    pub fn contexts(&self) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.context.clone())
            .collect()
    }
}

#[async_trait]
impl TextGenerator for RecordingGenerator {
    fn name(&self) -> &str {
        "recording"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        _params: &GenerationParams,
    ) -> sds_qabot::Result<String> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        Ok(format!("answer {}", requests.len()))
    }
}
