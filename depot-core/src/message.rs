use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deployment::{DeploymentRecord, DeploymentStatus};
use crate::errors::{MessageError, ValidationError};
use crate::resources::Resources;

/// Wire snapshot of a [`DeploymentRecord`] taken at publish time.
///
/// Only scalar fields, no nested objects. Timestamps travel as RFC 3339
/// strings and the status as its lowercase name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentMessage {
    pub id: u64,
    pub name: String,
    pub cluster: u64,
    pub docker_image: String,
    pub required_cpu: f64,
    pub required_ram: f64,
    pub required_gpu: f64,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentMessage {
    /// Serializes the snapshot into a JSON message body.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses and validates a message body.
    pub fn decode(body: &[u8]) -> Result<Self, MessageError> {
        let message: DeploymentMessage = serde_json::from_slice(body)?;
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name"));
        }
        self.required().validate()
    }

    pub fn required(&self) -> Resources {
        Resources::new(self.required_cpu, self.required_ram, self.required_gpu)
    }
}

impl From<&DeploymentRecord> for DeploymentMessage {
    fn from(record: &DeploymentRecord) -> Self {
        DeploymentMessage {
            id: record.id,
            name: record.name.clone(),
            cluster: record.cluster_id,
            docker_image: record.docker_image.clone(),
            required_cpu: record.required.cpu,
            required_ram: record.required.ram,
            required_gpu: record.required.gpu,
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

impl From<DeploymentMessage> for DeploymentRecord {
    fn from(message: DeploymentMessage) -> Self {
        DeploymentRecord {
            id: message.id,
            required: message.required(),
            name: message.name,
            cluster_id: message.cluster,
            docker_image: message.docker_image,
            status: message.status,
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::Rng;
    use serde_json::{json, Value};

    fn record() -> DeploymentRecord {
        DeploymentRecord {
            id: 42,
            name: "trainer".to_string(),
            cluster_id: 3,
            docker_image: "ghcr.io/acme/trainer:2.0".to_string(),
            required: Resources::new(2.5, 16.0, 1.0),
            status: DeploymentStatus::Running,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_survives_the_wire() {
        let mut rng = rand::rng();
        for _ in 0..10_000 {
            let mut sent = record();
            sent.required = Resources::new(
                rng.random_range(0.0..64.0),
                rng.random_range(0.0..512.0),
                rng.random_range(0.0..8.0),
            );
            let body = DeploymentMessage::from(&sent).encode().unwrap();
            let decoded: DeploymentRecord = DeploymentMessage::decode(&body).unwrap().into();
            assert_eq!(decoded, sent, "body: {}", String::from_utf8_lossy(&body));
        }
    }

    #[test]
    fn test_wire_fields_are_flat_scalars() {
        let body = DeploymentMessage::from(&record()).encode().unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        let object = value.as_object().unwrap();

        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "cluster",
                "created_at",
                "docker_image",
                "id",
                "name",
                "required_cpu",
                "required_gpu",
                "required_ram",
                "status",
                "updated_at"
            ]
        );
        assert!(object.values().all(|v| !v.is_object() && !v.is_array()));
        assert_eq!(object["status"], json!("running"));
        assert_eq!(object["created_at"], json!("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn test_decode_accepts_offset_timestamps() {
        let body = json!({
            "id": 1, "name": "web", "cluster": 1, "docker_image": "nginx",
            "required_cpu": 1.0, "required_ram": 2.0, "required_gpu": 0.0,
            "status": "pending",
            "created_at": "2024-05-01T12:00:00.123456+02:00",
            "updated_at": "2024-05-01T12:00:00.123456+02:00"
        });
        let message = DeploymentMessage::decode(body.to_string().as_bytes()).unwrap();
        assert_eq!(
            message.created_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
                + chrono::Duration::microseconds(123_456)
        );
    }

    #[test]
    fn test_decode_rejects_garbage_and_bad_content() {
        assert!(matches!(
            DeploymentMessage::decode(b"not json"),
            Err(MessageError::Decode(_))
        ));

        let unknown_status = json!({
            "id": 1, "name": "web", "cluster": 1, "docker_image": "nginx",
            "required_cpu": 1.0, "required_ram": 2.0, "required_gpu": 0.0,
            "status": "exploded",
            "created_at": "2024-05-01T10:00:00Z", "updated_at": "2024-05-01T10:00:00Z"
        });
        assert!(matches!(
            DeploymentMessage::decode(unknown_status.to_string().as_bytes()),
            Err(MessageError::Decode(_))
        ));

        let negative = json!({
            "id": 1, "name": "web", "cluster": 1, "docker_image": "nginx",
            "required_cpu": -1.0, "required_ram": 2.0, "required_gpu": 0.0,
            "status": "pending",
            "created_at": "2024-05-01T10:00:00Z", "updated_at": "2024-05-01T10:00:00Z"
        });
        assert!(matches!(
            DeploymentMessage::decode(negative.to_string().as_bytes()),
            Err(MessageError::Invalid(ValidationError::NegativeResource { .. }))
        ));
    }
}
