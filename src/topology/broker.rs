//! Broker registration record, decoded from `<chroot>/brokers/ids/<id>`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::CoordinationError;

/// Immutable snapshot of one broker registration.
///
/// The id is the node name, not part of the stored JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broker {
    #[serde(skip)]
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "no_jmx")]
    pub jmx_port: i32,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub timestamp: String,
}

fn no_jmx() -> i32 {
    -1
}

impl Broker {
    pub fn decode(id: &str, data: &[u8]) -> Result<Self, CoordinationError> {
        let invalid = |reason: String| CoordinationError::InvalidData {
            path: format!("brokers/ids/{}", id),
            reason,
        };

        let mut broker: Broker = serde_json::from_slice(data).map_err(|e| invalid(e.to_string()))?;
        if broker.host.is_empty() {
            return Err(invalid("empty host".to_string()));
        }
        if broker.port == 0 {
            return Err(invalid("port must be > 0".to_string()));
        }
        broker.id = id.to_string();
        Ok(broker)
    }

    pub fn encode(&self) -> Vec<u8> {
        // Plain struct of strings and integers: serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Numeric ids compare as numbers, anything else falls back to text order
/// after all numeric ids.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRATION: &str =
        r#"{"jmx_port":-1,"timestamp":"1447157138058","host":"192.168.3.5","version":1,"port":9092}"#;

    #[test]
    fn decode_registration() {
        let b = Broker::decode("0", REGISTRATION.as_bytes()).unwrap();
        assert_eq!(b.id, "0");
        assert_eq!(b.host, "192.168.3.5");
        assert_eq!(b.port, 9092);
        assert_eq!(b.version, 1);
        assert_eq!(b.jmx_port, -1);
        assert_eq!(b.timestamp, "1447157138058");
        assert_eq!(b.addr(), "192.168.3.5:9092");
    }

    #[test]
    fn encode_keeps_every_field() {
        let b = Broker::decode("0", REGISTRATION.as_bytes()).unwrap();
        let reencoded: serde_json::Value = serde_json::from_slice(&b.encode()).unwrap();
        let original: serde_json::Value = serde_json::from_str(REGISTRATION).unwrap();
        assert_eq!(reencoded, original);
        assert_eq!(Broker::decode("0", &b.encode()).unwrap(), b);
    }

    #[test]
    fn zero_port_is_rejected() {
        let data = br#"{"host":"h","port":0}"#;
        assert!(matches!(
            Broker::decode("3", data),
            Err(CoordinationError::InvalidData { .. })
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Broker::decode("3", b"not json").is_err());
        assert!(Broker::decode("3", br#"{"host":"h","port":"9092"}"#).is_err());
    }

    #[test]
    fn ids_sort_numerically() {
        let mut ids = vec!["10", "2", "b", "1", "a"];
        ids.sort_by(|a, b| compare_ids(a, b));
        assert_eq!(ids, vec!["1", "2", "10", "a", "b"]);
    }
}
