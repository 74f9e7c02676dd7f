use crate::core::error::LabError;
use crate::core::token::Token;
use crate::core::traits::Trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Mutex;

/// Number of wells on a 96-well plate.
pub const WELLS: usize = 96;

/// The physical-operations collaborator. Calls are synchronous black boxes to
/// the engine.
pub trait Laboratory: Send + Sync {
    /// Brings a new piece of labware of the given kind into play.
    fn serve_labware(&self, traits: &Trait) -> Result<Token, LabError>;

    fn dispose(&self, obj: &Token) -> Result<(), LabError>;

    fn store(&self, obj: &Token, location: &str) -> Result<(), LabError>;

    fn save_artifacts(&self, data: &Token, location: &str) -> Result<(), LabError>;

    /// Dispenses one volume per well from `channel`.
    fn dispense(&self, obj: &Token, volumes: &[i64], channel: i64) -> Result<(), LabError>;

    /// Reads absorbance at three wavelengths, one array of 96 values each.
    fn read_absorbance(&self, obj: &Token) -> Result<Token, LabError>;
}

/// One call received by a [`SimulatedLab`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LabCall {
    Serve { id: String, traits: String },
    Dispose { id: String },
    Store { id: String, location: String },
    SaveArtifacts { location: String, data: serde_json::Value },
    Dispense { id: String, channel: i64, volumes: Vec<i64> },
    ReadAbsorbance { id: String },
}

/// An in-memory laboratory that hands out fresh labware identities and keeps
/// a journal of every call.
#[derive(Debug, Default)]
pub struct SimulatedLab {
    journal: Mutex<Vec<LabCall>>,
}

impl SimulatedLab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journal(&self) -> Vec<LabCall> {
        self.journal.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: LabCall) {
        log::info!("lab: {:?}", call);
        self.journal.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    fn object_id(obj: &Token) -> Result<String, LabError> {
        if !obj.is_object() {
            return Err(LabError::InvalidObject(format!("{} is not labware", obj.traits)));
        }
        obj.value
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| LabError::InvalidObject(format!("no identity in {}", obj.value)))
    }
}

impl Laboratory for SimulatedLab {
    fn serve_labware(&self, traits: &Trait) -> Result<Token, LabError> {
        if !traits.acceptable(&Trait::LABWARE) {
            return Err(LabError::Rejected(format!("cannot serve {}", traits)));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let value = json!({
            "id": id,
            "kind": traits.to_string(),
            "served_at": chrono::Utc::now().to_rfc3339(),
        });
        self.record(LabCall::Serve {
            id,
            traits: traits.to_string(),
        });
        Ok(Token::new(value, traits.clone()))
    }

    fn dispose(&self, obj: &Token) -> Result<(), LabError> {
        let id = Self::object_id(obj)?;
        self.record(LabCall::Dispose { id });
        Ok(())
    }

    fn store(&self, obj: &Token, location: &str) -> Result<(), LabError> {
        let id = Self::object_id(obj)?;
        self.record(LabCall::Store {
            id,
            location: location.to_string(),
        });
        Ok(())
    }

    fn save_artifacts(&self, data: &Token, location: &str) -> Result<(), LabError> {
        self.record(LabCall::SaveArtifacts {
            location: location.to_string(),
            data: data.value.clone(),
        });
        Ok(())
    }

    fn dispense(&self, obj: &Token, volumes: &[i64], channel: i64) -> Result<(), LabError> {
        let id = Self::object_id(obj)?;
        if volumes.len() != WELLS {
            return Err(LabError::Rejected(format!(
                "expected {} volumes, got {}",
                WELLS,
                volumes.len()
            )));
        }
        self.record(LabCall::Dispense {
            id,
            channel,
            volumes: volumes.to_vec(),
        });
        Ok(())
    }

    fn read_absorbance(&self, obj: &Token) -> Result<Token, LabError> {
        let id = Self::object_id(obj)?;
        self.record(LabCall::ReadAbsorbance { id });
        let readings = vec![vec![0.0_f64; WELLS]; 3];
        Ok(Token::new(json!(readings), Trait::spread(Trait::array(Trait::FLOAT))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_served_labware_has_distinct_identities() {
        let lab = SimulatedLab::new();
        let a = lab.serve_labware(&Trait::PLATE96).unwrap();
        let b = lab.serve_labware(&Trait::PLATE96).unwrap();
        assert_ne!(a.value["id"], b.value["id"]);
        assert_eq!(a.traits, Trait::PLATE96);
        assert_eq!(lab.journal().len(), 2);
    }

    #[test]
    fn test_serving_data_is_rejected() {
        let lab = SimulatedLab::new();
        assert!(matches!(lab.serve_labware(&Trait::INTEGER), Err(LabError::Rejected(_))));
    }

    #[test]
    fn test_dispense_checks_wells() {
        let lab = SimulatedLab::new();
        let plate = lab.serve_labware(&Trait::PLATE96).unwrap();
        assert!(lab.dispense(&plate, &[1, 2, 3], 0).is_err());
        lab.dispense(&plate, &[10; WELLS], 1).unwrap();
        assert!(matches!(
            lab.journal().last(),
            Some(LabCall::Dispense { channel: 1, .. })
        ));
    }

    #[test]
    fn test_read_absorbance_shape() {
        let lab = SimulatedLab::new();
        let plate = lab.serve_labware(&Trait::PLATE96).unwrap();
        let reading = lab.read_absorbance(&plate).unwrap();
        assert_eq!(reading.traits, Trait::spread(Trait::array(Trait::FLOAT)));
        assert_eq!(reading.value.as_array().unwrap().len(), 3);
        assert_eq!(reading.value[0].as_array().unwrap().len(), WELLS);
    }

    #[test]
    fn test_disposing_data_is_invalid() {
        let lab = SimulatedLab::new();
        let data = Token::new(1, Trait::INTEGER);
        assert!(matches!(lab.dispose(&data), Err(LabError::InvalidObject(_))));
    }
}
