//! Auto-discovery of sensor fields the station has started sending.

use std::collections::BTreeSet;

use tracing::info;

use crate::sensor::RemappedPayload;
use crate::sensor::keys::CHILL_INDEX;
use crate::sensor::keys::HEAT_INDEX;
use crate::sensor::keys::OUTSIDE_HUMIDITY;
use crate::sensor::keys::OUTSIDE_TEMP;
use crate::sensor::keys::WIND_AZIMUT;
use crate::sensor::keys::WIND_DIR;
use crate::sensor::keys::WIND_SPEED;

/// Payload keys that are not in `enabled`, in payload order.
///
/// Returns `None` when every key is already enabled.
pub fn check_disabled(
    payload: &RemappedPayload,
    enabled: &[String],
    dev_debug: bool,
) -> Option<Vec<String>> {
    let mut missing = Vec::new();
    for key in payload.keys() {
        if dev_debug {
            info!("Checking {}", key);
        }
        if !enabled.iter().any(|e| e == key) {
            if dev_debug {
                info!("Add sensor ({}) to loading queue", key);
            }
            missing.push(key.clone());
        }
    }

    if missing.is_empty() { None } else { Some(missing) }
}

/// Expand a requested key set with the derived sensors its raw keys support.
///
/// Derived keys never appear in a payload; they are enabled whenever their
/// inputs are.
pub fn auto_enable_derived<'a, I>(requested: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut expanded: BTreeSet<String> = requested.into_iter().cloned().collect();

    if expanded.contains(WIND_DIR) {
        expanded.insert(WIND_AZIMUT.to_string());
    }
    if expanded.contains(OUTSIDE_TEMP) && expanded.contains(OUTSIDE_HUMIDITY) {
        expanded.insert(HEAT_INDEX.to_string());
    }
    if expanded.contains(OUTSIDE_TEMP) && expanded.contains(WIND_SPEED) {
        expanded.insert(CHILL_INDEX.to_string());
    }

    expanded
}

/// Keys that become visible once `added` joins `previous`: the added keys
/// themselves plus any derived key they newly enable.
pub fn newly_visible(previous: &[String], added: &[String]) -> Vec<String> {
    let before = auto_enable_derived(previous);
    let after = auto_enable_derived(previous.iter().chain(added));

    let mut keys: Vec<String> = added
        .iter()
        .filter(|k| !before.contains(*k))
        .cloned()
        .collect();
    for key in after.difference(&before) {
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(keys: &[&str]) -> RemappedPayload {
        keys.iter()
            .map(|k| (k.to_string(), "1".to_string()))
            .collect()
    }

    fn strings(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_check_disabled_returns_missing_in_payload_order() {
        let p = payload(&[WIND_SPEED, OUTSIDE_TEMP, WIND_DIR]);
        let enabled = strings(&[OUTSIDE_TEMP]);

        assert_eq!(
            check_disabled(&p, &enabled, false),
            Some(strings(&[WIND_SPEED, WIND_DIR]))
        );
    }

    #[test]
    fn test_check_disabled_none_when_all_enabled() {
        let p = payload(&[OUTSIDE_TEMP]);
        let enabled = strings(&[OUTSIDE_TEMP, WIND_DIR]);

        assert_eq!(check_disabled(&p, &enabled, true), None);
        assert_eq!(check_disabled(&payload(&[]), &[], false), None);
    }

    #[test]
    fn test_auto_enable_derived() {
        let expanded = auto_enable_derived(&strings(&[WIND_DIR, OUTSIDE_TEMP, OUTSIDE_HUMIDITY]));
        assert!(expanded.contains(WIND_AZIMUT));
        assert!(expanded.contains(HEAT_INDEX));
        assert!(!expanded.contains(CHILL_INDEX));

        let expanded = auto_enable_derived(&strings(&[OUTSIDE_TEMP, WIND_SPEED]));
        assert!(expanded.contains(CHILL_INDEX));
        assert!(!expanded.contains(WIND_AZIMUT));

        let expanded = auto_enable_derived(&strings(&[OUTSIDE_TEMP]));
        assert_eq!(expanded.len(), 1);
    }

    #[test]
    fn test_newly_visible_includes_derived() {
        let previous = strings(&[OUTSIDE_TEMP]);
        let added = strings(&[OUTSIDE_HUMIDITY, WIND_DIR]);

        assert_eq!(
            newly_visible(&previous, &added),
            strings(&[OUTSIDE_HUMIDITY, WIND_DIR, HEAT_INDEX, WIND_AZIMUT])
        );
    }

    #[test]
    fn test_newly_visible_skips_already_derived() {
        let previous = strings(&[OUTSIDE_TEMP, OUTSIDE_HUMIDITY]);
        let added = strings(&[HEAT_INDEX]);

        assert!(newly_visible(&previous, &added).is_empty());
    }
}
