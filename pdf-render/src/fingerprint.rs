use sha2::{Digest, Sha256};

use crate::types::CalendarEvent;

/// Hash of the event list, order-independent so reordering identical events
/// doesn't perturb the fingerprint.
pub fn hash_events(events: &[CalendarEvent]) -> String {
    let mut serialized: Vec<String> = events
        .iter()
        .map(|event| format!("{}|{}", event.date, event.title))
        .collect();
    serialized.sort();

    let mut hasher = Sha256::new();
    for line in &serialized {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// The tuple `(template_id, config_version, events_hash, library_version)`
/// collapsed into the object-store key fragment.
pub fn compute(
    template_id: &str,
    config_version: i64,
    events_hash: &str,
    library_version: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(template_id.as_bytes());
    hasher.update(b"|");
    hasher.update(config_version.to_le_bytes());
    hasher.update(b"|");
    hasher.update(events_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(library_version.as_bytes());
    hex::encode(hasher.finalize())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn event_hash_is_order_independent() {
        let a = vec![
            CalendarEvent {
                date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                title: "New Year".to_owned(),
            },
            CalendarEvent {
                date: NaiveDate::from_ymd_opt(2026, 2, 14).unwrap(),
                title: "Valentine's".to_owned(),
            },
        ];
        let mut b = a.clone();
        b.reverse();

        assert_eq!(hash_events(&a), hash_events(&b));
    }

    #[test]
    fn fingerprint_changes_with_config_version() {
        let events_hash = hash_events(&[]);
        let f1 = compute("tmpl", 1, &events_hash, "lib-v1");
        let f2 = compute("tmpl", 2, &events_hash, "lib-v1");
        assert_ne!(f1, f2);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let events_hash = hash_events(&[]);
        let f1 = compute("tmpl", 1, &events_hash, "lib-v1");
        let f2 = compute("tmpl", 1, &events_hash, "lib-v1");
        assert_eq!(f1, f2);
    }
}
