use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============ Dataset Models ============

/// Column holding the generated message when a workbook is written back.
pub const MAIL_CONTENT_COLUMN: &str = "mail_content";

/// Field order used when a matched row is shown to the operator.
///
/// Columns missing from the uploaded dataset are skipped.
pub const DISPLAY_FIELDS: [&str; 27] = [
    "vin",
    "customer_id",
    "first_name",
    "last_name",
    "customer_age",
    "country",
    "city",
    "landkreis_verfügbares_einkommen",
    "brand",
    "model",
    "car_age",
    "mileage",
    "mileage_year",
    "dealer_assignment",
    "dealer_assignment_status",
    "lead_score_profit",
    "lead_score_loyalty",
    "customer_persona",
    "sensor_engine_oil",
    "sensor_tire",
    "sensor_break_front",
    "sensor_break_back",
    "sensor_break_fluid",
    "sensor_vehicle_check",
    "sensor_inspection",
    "sensor_drive_habits",
    "last_service_date",
];

/// One monitored vehicle subsystem, in the order reminders list them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorField {
    EngineOil,
    Tire,
    BreakFront,
    BreakBack,
    BreakFluid,
    VehicleCheck,
    Inspection,
    DriveHabits,
}

impl SensorField {
    /// All sensors in declared order.
    pub const ALL: [SensorField; 8] = [
        SensorField::EngineOil,
        SensorField::Tire,
        SensorField::BreakFront,
        SensorField::BreakBack,
        SensorField::BreakFluid,
        SensorField::VehicleCheck,
        SensorField::Inspection,
        SensorField::DriveHabits,
    ];

    /// Spreadsheet column name for this sensor.
    pub fn column(self) -> &'static str {
        match self {
            SensorField::EngineOil => "sensor_engine_oil",
            SensorField::Tire => "sensor_tire",
            SensorField::BreakFront => "sensor_break_front",
            SensorField::BreakBack => "sensor_break_back",
            SensorField::BreakFluid => "sensor_break_fluid",
            SensorField::VehicleCheck => "sensor_vehicle_check",
            SensorField::Inspection => "sensor_inspection",
            SensorField::DriveHabits => "sensor_drive_habits",
        }
    }

    /// Human-readable label: column name without the `sensor_` prefix,
    /// underscores turned into spaces.
    pub fn label(self) -> String {
        let column = self.column();
        column
            .strip_prefix("sensor_")
            .unwrap_or(column)
            .replace('_', " ")
    }
}

/// Sensor severity codes for one record, indexed like [`SensorField::ALL`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReadings(pub [Option<i64>; 8]);

impl SensorReadings {
    pub fn get(&self, sensor: SensorField) -> Option<i64> {
        self.0[sensor as usize]
    }

    pub fn set(&mut self, sensor: SensorField, value: Option<i64>) {
        self.0[sensor as usize] = value;
    }

    /// Iterates sensors with their readings in declared order.
    pub fn iter(&self) -> impl Iterator<Item = (SensorField, Option<i64>)> + '_ {
        SensorField::ALL.iter().copied().zip(self.0.iter().copied())
    }
}

/// One typed row of the customer/vehicle workbook.
///
/// Every field is optional: blank cells and missing columns both load as
/// `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerVehicleRecord {
    pub vin: Option<String>,
    pub customer_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub customer_age: Option<f64>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub car_age: Option<f64>,
    pub mileage: Option<f64>,
    pub mileage_year: Option<f64>,
    pub dealer_assignment: Option<String>,
    pub dealer_assignment_status: Option<String>,
    pub lead_score_loyalty: Option<f64>,
    pub lead_score_profit: Option<f64>,
    pub customer_persona: Option<String>,
    pub last_service_date: Option<String>,
    pub mail_content: Option<String>,
    pub sensors: SensorReadings,
}

impl CustomerVehicleRecord {
    /// First and last name joined by a space; missing parts render empty.
    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        )
    }
}

/// Reported when more than one row matches a lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateKeyWarning {
    pub key: String,
    /// Zero-based data row used for the reminder.
    pub selected_row: usize,
    /// Zero-based data rows that also matched and were ignored.
    pub ignored_rows: Vec<usize>,
}

// ============ Style Models ============

/// Register of the reminder text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Formality {
    Formal,
    #[default]
    Normal,
    Informal,
}

impl Formality {
    /// Parses English or German style names; anything else is `Normal`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "formal" | "formell" => Formality::Formal,
            "informal" | "informell" => Formality::Informal,
            _ => Formality::Normal,
        }
    }
}

/// Target length of the reminder text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl MessageLength {
    /// Parses English or German length names; anything else is `Medium`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "short" | "kurz" => MessageLength::Short,
            "long" | "lang" => MessageLength::Long,
            _ => MessageLength::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleOptions {
    pub formality: Formality,
    pub length: MessageLength,
}

impl StyleOptions {
    /// Builds options from raw form values, falling back to the defaults.
    pub fn from_raw(formality: Option<&str>, length: Option<&str>) -> Self {
        Self {
            formality: formality.map(Formality::parse).unwrap_or_default(),
            length: length.map(MessageLength::parse).unwrap_or_default(),
        }
    }
}

// ============ Output Models ============

/// Text produced for one request. Never cached or shared between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedMessage {
    pub text: String,
    pub generated_at: DateTime<Utc>,
}

impl GeneratedMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            generated_at: Utc::now(),
        }
    }
}

/// Colour the operator UI uses for an offer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldState {
    Green,
    Red,
}

impl From<bool> for FieldState {
    fn from(eligible: bool) -> Self {
        if eligible {
            FieldState::Green
        } else {
            FieldState::Red
        }
    }
}

/// Response body of the reminder endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ReminderResponse {
    pub mail_content: String,
    /// When the completion was received (UTC).
    pub generated_at: DateTime<Utc>,
    pub row_data: serde_json::Map<String, serde_json::Value>,
    pub loyalty_field_state: FieldState,
    pub insurance_field_state: FieldState,
    pub due_sensors: Vec<String>,
    pub service_due_text: String,
    pub duplicate_key_warning: Option<DuplicateKeyWarning>,
    pub persisted_to: String,
    pub dataset_checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_labels_strip_prefix() {
        assert_eq!(SensorField::EngineOil.label(), "engine oil");
        assert_eq!(SensorField::BreakFront.label(), "break front");
        assert_eq!(SensorField::DriveHabits.label(), "drive habits");
    }

    #[test]
    fn test_style_parsing_accepts_german_aliases() {
        let style = StyleOptions::from_raw(Some("formell"), Some("mittel lang"));
        assert_eq!(style.formality, Formality::Formal);
        assert_eq!(style.length, MessageLength::Medium);

        let style = StyleOptions::from_raw(Some(" Informal "), Some("KURZ"));
        assert_eq!(style.formality, Formality::Informal);
        assert_eq!(style.length, MessageLength::Short);
    }

    #[test]
    fn test_unknown_style_falls_back_to_defaults() {
        let style = StyleOptions::from_raw(Some("shouty"), Some("epic"));
        assert_eq!(style, StyleOptions::default());
        assert_eq!(style.formality, Formality::Normal);
        assert_eq!(style.length, MessageLength::Medium);

        assert_eq!(StyleOptions::from_raw(None, None), StyleOptions::default());
    }

    #[test]
    fn test_sensor_readings_follow_declared_order() {
        let mut readings = SensorReadings::default();
        readings.set(SensorField::Inspection, Some(3));

        assert_eq!(readings.get(SensorField::Inspection), Some(3));
        assert_eq!(readings.0[6], Some(3));
        let order: Vec<SensorField> = readings.iter().map(|(s, _)| s).collect();
        assert_eq!(order, SensorField::ALL.to_vec());
    }
}
