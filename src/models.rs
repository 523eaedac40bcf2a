use std::io::Write;

use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::schema::{doctors, patient_doctor_mappings, patients, users};

/// Registered account. The password hash never leaves the server.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(Pg))]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = doctors)]
#[diesel(check_for_backend(Pg))]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    pub specialty: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = doctors)]
pub struct NewDoctor {
    pub id: Uuid,
    pub name: String,
    pub specialty: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Patient gender, stored as text in the `patients.gender` column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }
}

impl ToSql<Text, Pg> for Gender {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for Gender {
    fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
        match value.as_bytes() {
            b"Male" => Ok(Gender::Male),
            b"Female" => Ok(Gender::Female),
            b"Other" => Ok(Gender::Other),
            other => Err(format!(
                "unrecognized gender value: {}",
                String::from_utf8_lossy(other)
            )
            .into()),
        }
    }
}

/// Inclusive age bounds enforced both here and by the table CHECK constraint.
pub const MIN_AGE: i32 = 0;
pub const MAX_AGE: i32 = 150;

pub fn validate_age(age: i32) -> Result<(), ApiError> {
    if (MIN_AGE..=MAX_AGE).contains(&age) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "age: must be between {MIN_AGE} and {MAX_AGE}"
        )))
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = patients)]
#[diesel(check_for_backend(Pg))]
pub struct Patient {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub age: i32,
    pub gender: Gender,
    pub created_at: DateTime<Utc>,
    pub added_by: Uuid,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = patients)]
pub struct NewPatient {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub age: i32,
    pub gender: Gender,
    pub created_at: DateTime<Utc>,
    pub added_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = patient_doctor_mappings)]
#[diesel(check_for_backend(Pg))]
pub struct PatientDoctorMapping {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = patient_doctor_mappings)]
pub struct NewPatientDoctorMapping {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

// ---- request / response types ----

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Deserialize)]
pub struct NewDoctorRequest {
    pub name: String,
    pub specialty: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = doctors)]
pub struct UpdateDoctorRequest {
    pub name: Option<String>,
    pub specialty: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl UpdateDoctorRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.specialty.is_none()
            && self.email.is_none()
            && self.phone.is_none()
    }
}

/// `added_by` and `created_at` are deliberately absent: both are stamped
/// server-side and caller-supplied values are ignored.
#[derive(Debug, Deserialize)]
pub struct NewPatientRequest {
    pub first_name: String,
    pub last_name: String,
    pub age: i32,
    pub gender: Gender,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = patients)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<Gender>,
}

impl UpdatePatientRequest {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.age.is_none()
            && self.gender.is_none()
    }
}

#[derive(Debug, Deserialize)]
pub struct NewMappingRequest {
    pub patient: Uuid,
    pub doctor: Uuid,
}

/// Mapping joined with the display names of both ends.
#[derive(Debug, Serialize)]
pub struct MappingResponse {
    pub id: Uuid,
    pub patient: Uuid,
    pub doctor: Uuid,
    pub patient_name: String,
    pub doctor_name: String,
    pub assigned_at: DateTime<Utc>,
}

impl MappingResponse {
    pub fn new(mapping: PatientDoctorMapping, patient_name: String, doctor_name: String) -> Self {
        Self {
            id: mapping.id,
            patient: mapping.patient_id,
            doctor: mapping.doctor_id,
            patient_name,
            doctor_name,
            assigned_at: mapping.assigned_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_bounds_are_inclusive() {
        assert!(validate_age(0).is_ok());
        assert!(validate_age(150).is_ok());
        assert!(validate_age(30).is_ok());
        assert!(validate_age(-1).is_err());
        assert!(validate_age(151).is_err());
    }

    #[test]
    fn out_of_range_age_is_a_validation_error() {
        match validate_age(200) {
            Err(ApiError::Validation(msg)) => assert!(msg.starts_with("age:")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn gender_accepts_only_the_fixed_choices() {
        assert_eq!(
            serde_json::from_str::<Gender>("\"Male\"").unwrap(),
            Gender::Male
        );
        assert_eq!(
            serde_json::from_str::<Gender>("\"Other\"").unwrap(),
            Gender::Other
        );
        assert!(serde_json::from_str::<Gender>("\"male\"").is_err());
        assert!(serde_json::from_str::<Gender>("\"Unknown\"").is_err());
    }

    #[test]
    fn user_serialization_omits_the_password_hash() {
        let user = User {
            id: Uuid::new_v4(),
            username: "jane@x.com".into(),
            email: "jane@x.com".into(),
            password_hash: "$argon2id$v=19$secret".into(),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["username"], "jane@x.com");
    }

    #[test]
    fn empty_update_requests_are_detected() {
        let update: UpdatePatientRequest = serde_json::from_str("{}").unwrap();
        assert!(update.is_empty());
        let update: UpdatePatientRequest = serde_json::from_str("{\"age\": 40}").unwrap();
        assert!(!update.is_empty());
    }

    #[test]
    fn replace_bodies_require_the_full_field_set() {
        // PUT bodies deserialize as the full request types, so a partial
        // body is rejected; PATCH bodies tolerate any subset.
        assert!(serde_json::from_str::<NewPatientRequest>("{\"first_name\": \"Jane\"}").is_err());
        assert!(serde_json::from_str::<NewPatientRequest>(
            "{\"first_name\": \"Jane\", \"last_name\": \"Doe\", \"age\": 30, \"gender\": \"Female\"}"
        )
        .is_ok());
        assert!(serde_json::from_str::<NewDoctorRequest>("{\"name\": \"Dr. Smith\"}").is_err());
        assert!(serde_json::from_str::<UpdateDoctorRequest>("{\"name\": \"Dr. Smith\"}").is_ok());
    }
}
