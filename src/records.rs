use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use polars::prelude::{DataType, Field, Schema, SchemaRef, TimeUnit};

pub const PATIENT_ID: &str = "PatientId";
pub const APPOINTMENT_ID: &str = "AppointmentID";
pub const GENDER: &str = "Gender";
pub const SCHEDULED_DAY: &str = "ScheduledDay";
pub const APPOINTMENT_DAY: &str = "AppointmentDay";
pub const AGE: &str = "Age";
pub const NEIGHBOURHOOD: &str = "Neighbourhood";
pub const SCHOLARSHIP: &str = "Scholarship";
pub const HIPERTENSION: &str = "Hipertension";
pub const DIABETES: &str = "Diabetes";
pub const ALCOHOLISM: &str = "Alcoholism";
pub const HANDCAP: &str = "Handcap";
pub const SMS_RECEIVED: &str = "SMS_received";
/// Header name as it appears in the raw file.
pub const RAW_NO_SHOW: &str = "No-show";
pub const NO_SHOW: &str = "No_show";

// derived
pub const DAY_GAP: &str = "Days_Between_Ad_Sd";
pub const DAY_GAP_GROUP: &str = "Days_Between_Ad_Sd_group";
pub const AGE_GROUP: &str = "Age_group";

pub const FLAG_FIELDS: [&str; 6] = [
    SCHOLARSHIP,
    HIPERTENSION,
    DIABETES,
    ALCOHOLISM,
    HANDCAP,
    SMS_RECEIVED,
];

lazy_static! {
    static ref RAW_SCHEMA: SchemaRef = Arc::new(AppointmentRecord::raw_schema());
}

/// Target types understood by `cleaner::cast_fields`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Timestamp,
    Boolean,
}

impl FieldType {
    pub fn dtype(&self) -> DataType {
        match self {
            FieldType::Integer => DataType::Int64,
            FieldType::Timestamp => DataType::Datetime(TimeUnit::Milliseconds, None),
            FieldType::Boolean => DataType::Boolean,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Integer => write!(f, "integer"),
            FieldType::Timestamp => write!(f, "timestamp"),
            FieldType::Boolean => write!(f, "boolean"),
        }
    }
}

pub struct AppointmentRecord {
}


impl AppointmentRecord {
    /// Column types used when reading the CSV. PatientId is read as a float
    /// because the published file stores some ids in scientific notation.
    pub fn raw_schema() -> Schema {
        Schema::from_iter(
            vec![
                Field::new(PATIENT_ID, DataType::Float64),
                Field::new(APPOINTMENT_ID, DataType::Int64),
                Field::new(GENDER, DataType::Utf8),
                Field::new(SCHEDULED_DAY, DataType::Utf8),
                Field::new(APPOINTMENT_DAY, DataType::Utf8),
                Field::new(AGE, DataType::Int64),
                Field::new(NEIGHBOURHOOD, DataType::Utf8),
                Field::new(SCHOLARSHIP, DataType::Int64),
                Field::new(HIPERTENSION, DataType::Int64),
                Field::new(DIABETES, DataType::Int64),
                Field::new(ALCOHOLISM, DataType::Int64),
                Field::new(HANDCAP, DataType::Int64),
                Field::new(SMS_RECEIVED, DataType::Int64),
                Field::new(RAW_NO_SHOW, DataType::Utf8),
            ])
    }

    pub fn shared_raw_schema() -> SchemaRef {
        RAW_SCHEMA.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_schema_covers_every_column() {
        let schema = AppointmentRecord::shared_raw_schema();
        assert_eq!(schema.len(), 14);
        assert_eq!(schema.get(AGE), Some(&DataType::Int64));
        assert_eq!(schema.get(RAW_NO_SHOW), Some(&DataType::Utf8));
        for flag in FLAG_FIELDS {
            assert!(schema.get(flag).is_some(), "missing {flag}");
        }
    }
}
