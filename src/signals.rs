//! Business signals derived from a matched record.

use crate::models::{CustomerVehicleRecord, FieldState, SensorField};
use serde::Serialize;

/// Severity codes that mean a sensor needs service.
pub const DEFAULT_DUE_SEVERITIES: [i64; 2] = [2, 3];
/// Loyalty scores strictly below this qualify for the loyalty discount.
pub const LOYALTY_DISCOUNT_THRESHOLD: f64 = 30.0;
/// Profit scores strictly above this qualify for the insurance offer.
pub const INSURANCE_OFFER_THRESHOLD: f64 = 40.0;

/// Thresholds that turn record fields into signals.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalPolicy {
    pub due_severities: Vec<i64>,
    pub loyalty_threshold: f64,
    pub profit_threshold: f64,
}

impl Default for SignalPolicy {
    fn default() -> Self {
        Self {
            due_severities: DEFAULT_DUE_SEVERITIES.to_vec(),
            loyalty_threshold: LOYALTY_DISCOUNT_THRESHOLD,
            profit_threshold: INSURANCE_OFFER_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedSignals {
    /// Due sensors in declared sensor order.
    pub due_sensors: Vec<SensorField>,
    pub loyalty_offer: bool,
    pub insurance_offer: bool,
}

impl DerivedSignals {
    pub fn due_sensor_labels(&self) -> Vec<String> {
        self.due_sensors.iter().map(|s| s.label()).collect()
    }

    /// Due sensors joined with `", "`, empty when nothing is due.
    pub fn service_due_text(&self) -> String {
        self.due_sensor_labels().join(", ")
    }

    pub fn loyalty_field_state(&self) -> FieldState {
        self.loyalty_offer.into()
    }

    pub fn insurance_field_state(&self) -> FieldState {
        self.insurance_offer.into()
    }
}

/// Compute due sensors and offer eligibility for one record.
///
/// Missing scores never qualify for an offer and missing sensor readings are
/// never due.
pub fn derive(record: &CustomerVehicleRecord, policy: &SignalPolicy) -> DerivedSignals {
    let due_sensors = record
        .sensors
        .iter()
        .filter(|(_, value)| {
            value
                .map(|code| policy.due_severities.contains(&code))
                .unwrap_or(false)
        })
        .map(|(sensor, _)| sensor)
        .collect();

    DerivedSignals {
        due_sensors,
        loyalty_offer: record
            .lead_score_loyalty
            .is_some_and(|score| score < policy.loyalty_threshold),
        insurance_offer: record
            .lead_score_profit
            .is_some_and(|score| score > policy.profit_threshold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SensorReadings;

    fn record_with_scores(loyalty: Option<f64>, profit: Option<f64>) -> CustomerVehicleRecord {
        CustomerVehicleRecord {
            lead_score_loyalty: loyalty,
            lead_score_profit: profit,
            ..Default::default()
        }
    }

    #[test]
    fn test_engine_oil_scenario() {
        let record = CustomerVehicleRecord {
            vin: Some("X1".to_string()),
            lead_score_loyalty: Some(25.0),
            lead_score_profit: Some(50.0),
            sensors: SensorReadings([Some(3), Some(0), Some(0), Some(0), Some(0), Some(0), Some(0), Some(0)]),
            ..Default::default()
        };

        let signals = derive(&record, &SignalPolicy::default());

        assert_eq!(signals.due_sensor_labels(), vec!["engine oil"]);
        assert!(signals.loyalty_offer);
        assert!(signals.insurance_offer);
        assert_eq!(signals.loyalty_field_state(), FieldState::Green);
    }

    #[test]
    fn test_due_sensors_keep_declared_order() {
        let record = CustomerVehicleRecord {
            sensors: SensorReadings([None, Some(1), Some(2), Some(4), Some(3), None, Some(2), Some(-2)]),
            ..Default::default()
        };

        let signals = derive(&record, &SignalPolicy::default());

        assert_eq!(
            signals.due_sensors,
            vec![SensorField::BreakFront, SensorField::BreakFluid, SensorField::Inspection]
        );
        assert_eq!(signals.service_due_text(), "break front, break fluid, inspection");
    }

    #[test]
    fn test_nothing_due_gives_empty_text() {
        let signals = derive(&CustomerVehicleRecord::default(), &SignalPolicy::default());
        assert!(signals.due_sensors.is_empty());
        assert_eq!(signals.service_due_text(), "");
    }

    #[test]
    fn test_threshold_boundaries() {
        let policy = SignalPolicy::default();

        let at_boundary = derive(&record_with_scores(Some(30.0), Some(40.0)), &policy);
        assert!(!at_boundary.loyalty_offer);
        assert!(!at_boundary.insurance_offer);
        assert_eq!(at_boundary.insurance_field_state(), FieldState::Red);

        let inside = derive(&record_with_scores(Some(29.99), Some(40.01)), &policy);
        assert!(inside.loyalty_offer);
        assert!(inside.insurance_offer);
    }

    #[test]
    fn test_missing_scores_are_not_eligible() {
        let signals = derive(&record_with_scores(None, None), &SignalPolicy::default());
        assert!(!signals.loyalty_offer);
        assert!(!signals.insurance_offer);
    }

    #[test]
    fn test_policy_overrides_thresholds() {
        let policy = SignalPolicy {
            due_severities: vec![3],
            loyalty_threshold: 50.0,
            profit_threshold: 10.0,
        };
        let record = CustomerVehicleRecord {
            lead_score_loyalty: Some(45.0),
            lead_score_profit: Some(15.0),
            sensors: SensorReadings([Some(2), Some(3), None, None, None, None, None, None]),
            ..Default::default()
        };

        let signals = derive(&record, &policy);
        assert_eq!(signals.due_sensors, vec![SensorField::Tire]);
        assert!(signals.loyalty_offer);
        assert!(signals.insurance_offer);
    }
}
