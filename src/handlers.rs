use actix_web::{web, HttpResponse};
use chrono::Utc;
use diesel::dsl::{exists, select};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{self, AuthConfig, AuthUser};
use crate::errors::ApiError;
use crate::models::{
    validate_age, Doctor, LoginRequest, MappingResponse, NewDoctor, NewDoctorRequest,
    NewMappingRequest, NewPatient, NewPatientDoctorMapping, NewPatientRequest, NewUser, Patient,
    PatientDoctorMapping, RefreshRequest, RegisterRequest, UpdateDoctorRequest,
    UpdatePatientRequest, User,
};
use crate::schema::{doctors, patient_doctor_mappings, patients, users};
use crate::DbPool;

type MappingRow = (PatientDoctorMapping, String, String, String);

// ---- credential store ----

// Handler to register a new user account
pub async fn register(
    pool: web::Data<DbPool>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = body.into_inner();
    if req.email.trim().is_empty() || !req.email.contains('@') {
        return Err(ApiError::Validation(
            "email: a valid email address is required".to_string(),
        ));
    }
    if req.password.is_empty() {
        return Err(ApiError::Validation(
            "password: this field may not be blank".to_string(),
        ));
    }

    // The email doubles as the login username.
    let (first_name, last_name) = auth::split_name(&req.name);
    let password_hash = auth::hash_password(&req.password)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: req.email.clone(),
        email: req.email,
        password_hash,
        first_name,
        last_name,
        created_at: Utc::now(),
    };

    let user = web::block(move || -> Result<User, ApiError> {
        let mut conn = pool.get()?;
        let taken: bool = select(exists(
            users::table.filter(users::username.eq(&new_user.username)),
        ))
        .get_result(&mut conn)?;
        if taken {
            return Err(ApiError::Validation(
                "username: a user with that username already exists".to_string(),
            ));
        }
        // The unique constraint on username backstops the check above.
        let user = diesel::insert_into(users::table)
            .values(&new_user)
            .returning(User::as_returning())
            .get_result(&mut conn)?;
        Ok(user)
    })
    .await??;

    tracing::info!(user_id = %user.id, "registered new user");
    Ok(HttpResponse::Created().json(user))
}

// Handler to authenticate a user and issue a token pair
pub async fn login(
    pool: web::Data<DbPool>,
    config: web::Data<AuthConfig>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = body.into_inner();
    let username = req.username.clone();

    let user = web::block(move || -> Result<Option<User>, ApiError> {
        let mut conn = pool.get()?;
        let user = users::table
            .filter(users::username.eq(&username))
            .select(User::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(user)
    })
    .await??;

    // Unknown username and wrong password produce the same message.
    let user = user.ok_or_else(|| {
        ApiError::Authentication("no active account found with the given credentials".to_string())
    })?;
    if !auth::verify_password(&req.password, &user.password_hash)? {
        return Err(ApiError::Authentication(
            "no active account found with the given credentials".to_string(),
        ));
    }

    let pair = auth::issue_token_pair(&user, &config)?;
    Ok(HttpResponse::Ok().json(pair))
}

// Handler to exchange a refresh token for a new access token
pub async fn refresh(
    config: web::Data<AuthConfig>,
    body: web::Json<RefreshRequest>,
) -> Result<HttpResponse, ApiError> {
    let access = auth::refresh_access_token(&body.refresh, &config)?;
    Ok(HttpResponse::Ok().json(json!({ "access": access })))
}

// ---- doctor registry ----

// Handler to list all doctors
pub async fn list_doctors(
    pool: web::Data<DbPool>,
    _user: AuthUser,
) -> Result<HttpResponse, ApiError> {
    let list = web::block(move || -> Result<Vec<Doctor>, ApiError> {
        let mut conn = pool.get()?;
        Ok(doctors::table
            .order(doctors::created_at.asc())
            .select(Doctor::as_select())
            .load(&mut conn)?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(list))
}

fn validate_doctor_fields(name: &str, specialty: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::Validation(
            "name: this field may not be blank".to_string(),
        ));
    }
    if specialty.trim().is_empty() {
        return Err(ApiError::Validation(
            "specialty: this field may not be blank".to_string(),
        ));
    }
    Ok(())
}

// Handler to create a new doctor
pub async fn create_doctor(
    pool: web::Data<DbPool>,
    _user: AuthUser,
    body: web::Json<NewDoctorRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = body.into_inner();
    validate_doctor_fields(&req.name, &req.specialty)?;

    let new_doctor = NewDoctor {
        id: Uuid::new_v4(),
        name: req.name,
        specialty: req.specialty,
        email: req.email,
        phone: req.phone,
        created_at: Utc::now(),
    };

    let doctor = web::block(move || -> Result<Doctor, ApiError> {
        let mut conn = pool.get()?;
        Ok(diesel::insert_into(doctors::table)
            .values(&new_doctor)
            .returning(Doctor::as_returning())
            .get_result(&mut conn)?)
    })
    .await??;
    Ok(HttpResponse::Created().json(doctor))
}

// Handler to get a doctor by ID
pub async fn get_doctor(
    pool: web::Data<DbPool>,
    _user: AuthUser,
    doctor_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = doctor_id.into_inner();
    let doctor = web::block(move || -> Result<Option<Doctor>, ApiError> {
        let mut conn = pool.get()?;
        Ok(doctors::table
            .find(id)
            .select(Doctor::as_select())
            .first(&mut conn)
            .optional()?)
    })
    .await??
    .ok_or_else(|| ApiError::NotFound("doctor not found".to_string()))?;
    Ok(HttpResponse::Ok().json(doctor))
}

// Handler to replace a doctor. PUT requires the full field set; a body with
// missing required fields is rejected at deserialization.
pub async fn replace_doctor(
    pool: web::Data<DbPool>,
    _user: AuthUser,
    doctor_id: web::Path<Uuid>,
    body: web::Json<NewDoctorRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = doctor_id.into_inner();
    let req = body.into_inner();
    validate_doctor_fields(&req.name, &req.specialty)?;

    let doctor = web::block(move || -> Result<Option<Doctor>, ApiError> {
        let mut conn = pool.get()?;
        Ok(diesel::update(doctors::table.find(id))
            .set((
                doctors::name.eq(req.name),
                doctors::specialty.eq(req.specialty),
                doctors::email.eq(req.email),
                doctors::phone.eq(req.phone),
            ))
            .returning(Doctor::as_returning())
            .get_result(&mut conn)
            .optional()?)
    })
    .await??
    .ok_or_else(|| ApiError::NotFound("doctor not found".to_string()))?;
    Ok(HttpResponse::Ok().json(doctor))
}

// Handler to partially update a doctor (PATCH)
pub async fn update_doctor(
    pool: web::Data<DbPool>,
    _user: AuthUser,
    doctor_id: web::Path<Uuid>,
    body: web::Json<UpdateDoctorRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = doctor_id.into_inner();
    let changes = body.into_inner();

    let doctor = web::block(move || -> Result<Option<Doctor>, ApiError> {
        let mut conn = pool.get()?;
        if changes.is_empty() {
            return Ok(doctors::table
                .find(id)
                .select(Doctor::as_select())
                .first(&mut conn)
                .optional()?);
        }
        Ok(diesel::update(doctors::table.find(id))
            .set(&changes)
            .returning(Doctor::as_returning())
            .get_result(&mut conn)
            .optional()?)
    })
    .await??
    .ok_or_else(|| ApiError::NotFound("doctor not found".to_string()))?;
    Ok(HttpResponse::Ok().json(doctor))
}

// Handler to delete a doctor
pub async fn delete_doctor(
    pool: web::Data<DbPool>,
    _user: AuthUser,
    doctor_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = doctor_id.into_inner();
    let deleted = web::block(move || -> Result<usize, ApiError> {
        let mut conn = pool.get()?;
        Ok(diesel::delete(doctors::table.find(id)).execute(&mut conn)?)
    })
    .await??;
    if deleted == 0 {
        return Err(ApiError::NotFound("doctor not found".to_string()));
    }
    Ok(HttpResponse::NoContent().finish())
}

// ---- patient registry ----
//
// Every query filters on `added_by`, so a patient owned by another user is
// indistinguishable from a missing one.

// Handler to list the caller's patients
pub async fn list_patients(
    pool: web::Data<DbPool>,
    user: AuthUser,
) -> Result<HttpResponse, ApiError> {
    let list = web::block(move || -> Result<Vec<Patient>, ApiError> {
        let mut conn = pool.get()?;
        Ok(patients::table
            .filter(patients::added_by.eq(user.id))
            .order(patients::created_at.desc())
            .select(Patient::as_select())
            .load(&mut conn)?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(list))
}

// Handler to create a new patient owned by the caller
pub async fn create_patient(
    pool: web::Data<DbPool>,
    user: AuthUser,
    body: web::Json<NewPatientRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = body.into_inner();
    validate_age(req.age)?;

    // `added_by` and `created_at` are stamped here, never taken from the body.
    let new_patient = NewPatient {
        id: Uuid::new_v4(),
        first_name: req.first_name,
        last_name: req.last_name,
        age: req.age,
        gender: req.gender,
        created_at: Utc::now(),
        added_by: user.id,
    };

    let patient = web::block(move || -> Result<Patient, ApiError> {
        let mut conn = pool.get()?;
        Ok(diesel::insert_into(patients::table)
            .values(&new_patient)
            .returning(Patient::as_returning())
            .get_result(&mut conn)?)
    })
    .await??;
    Ok(HttpResponse::Created().json(patient))
}

// Handler to get one of the caller's patients by ID
pub async fn get_patient(
    pool: web::Data<DbPool>,
    user: AuthUser,
    patient_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = patient_id.into_inner();
    let patient = web::block(move || -> Result<Option<Patient>, ApiError> {
        let mut conn = pool.get()?;
        Ok(patients::table
            .find(id)
            .filter(patients::added_by.eq(user.id))
            .select(Patient::as_select())
            .first(&mut conn)
            .optional()?)
    })
    .await??
    .ok_or_else(|| ApiError::NotFound("patient not found".to_string()))?;
    Ok(HttpResponse::Ok().json(patient))
}

// Handler to replace one of the caller's patients. PUT requires the full
// field set; `added_by` and `created_at` remain untouched.
pub async fn replace_patient(
    pool: web::Data<DbPool>,
    user: AuthUser,
    patient_id: web::Path<Uuid>,
    body: web::Json<NewPatientRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = patient_id.into_inner();
    let req = body.into_inner();
    validate_age(req.age)?;

    let patient = web::block(move || -> Result<Option<Patient>, ApiError> {
        let mut conn = pool.get()?;
        Ok(diesel::update(
            patients::table
                .find(id)
                .filter(patients::added_by.eq(user.id)),
        )
        .set((
            patients::first_name.eq(req.first_name),
            patients::last_name.eq(req.last_name),
            patients::age.eq(req.age),
            patients::gender.eq(req.gender),
        ))
        .returning(Patient::as_returning())
        .get_result(&mut conn)
        .optional()?)
    })
    .await??
    .ok_or_else(|| ApiError::NotFound("patient not found".to_string()))?;
    Ok(HttpResponse::Ok().json(patient))
}

// Handler to partially update one of the caller's patients (PATCH)
pub async fn update_patient(
    pool: web::Data<DbPool>,
    user: AuthUser,
    patient_id: web::Path<Uuid>,
    body: web::Json<UpdatePatientRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = patient_id.into_inner();
    let changes = body.into_inner();
    if let Some(age) = changes.age {
        validate_age(age)?;
    }

    let patient = web::block(move || -> Result<Option<Patient>, ApiError> {
        let mut conn = pool.get()?;
        if changes.is_empty() {
            return Ok(patients::table
                .find(id)
                .filter(patients::added_by.eq(user.id))
                .select(Patient::as_select())
                .first(&mut conn)
                .optional()?);
        }
        Ok(diesel::update(
            patients::table
                .find(id)
                .filter(patients::added_by.eq(user.id)),
        )
        .set(&changes)
        .returning(Patient::as_returning())
        .get_result(&mut conn)
        .optional()?)
    })
    .await??
    .ok_or_else(|| ApiError::NotFound("patient not found".to_string()))?;
    Ok(HttpResponse::Ok().json(patient))
}

// Handler to delete one of the caller's patients
pub async fn delete_patient(
    pool: web::Data<DbPool>,
    user: AuthUser,
    patient_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = patient_id.into_inner();
    let deleted = web::block(move || -> Result<usize, ApiError> {
        let mut conn = pool.get()?;
        Ok(diesel::delete(
            patients::table
                .find(id)
                .filter(patients::added_by.eq(user.id)),
        )
        .execute(&mut conn)?)
    })
    .await??;
    if deleted == 0 {
        return Err(ApiError::NotFound("patient not found".to_string()));
    }
    Ok(HttpResponse::NoContent().finish())
}

// ---- assignment ledger ----

// Handler to list every patient-doctor mapping. Deliberately unscoped: any
// authenticated user sees the global mapping set, unlike the patient list.
pub async fn list_mappings(
    pool: web::Data<DbPool>,
    _user: AuthUser,
) -> Result<HttpResponse, ApiError> {
    let rows = web::block(move || -> Result<Vec<MappingRow>, ApiError> {
        let mut conn = pool.get()?;
        Ok(patient_doctor_mappings::table
            .inner_join(patients::table)
            .inner_join(doctors::table)
            .order(patient_doctor_mappings::assigned_at.asc())
            .select((
                PatientDoctorMapping::as_select(),
                patients::first_name,
                patients::last_name,
                doctors::name,
            ))
            .load(&mut conn)?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(into_mapping_responses(rows)))
}

// Handler to assign a patient to a doctor
pub async fn create_mapping(
    pool: web::Data<DbPool>,
    _user: AuthUser,
    body: web::Json<NewMappingRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = body.into_inner();

    let response = web::block(move || -> Result<MappingResponse, ApiError> {
        let mut conn = pool.get()?;
        let patient = patients::table
            .find(req.patient)
            .select(Patient::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| ApiError::NotFound("patient not found".to_string()))?;
        let doctor = doctors::table
            .find(req.doctor)
            .select(Doctor::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| ApiError::NotFound("doctor not found".to_string()))?;

        let new_mapping = NewPatientDoctorMapping {
            id: Uuid::new_v4(),
            patient_id: req.patient,
            doctor_id: req.doctor,
            assigned_at: Utc::now(),
        };
        // The unique (patient_id, doctor_id) constraint decides duplicates,
        // including racing inserts.
        let mapping = diesel::insert_into(patient_doctor_mappings::table)
            .values(&new_mapping)
            .returning(PatientDoctorMapping::as_returning())
            .get_result(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(
                    DatabaseErrorKind::UniqueViolation,
                    _,
                ) => ApiError::Validation(
                    "this patient is already assigned to this doctor".to_string(),
                ),
                other => other.into(),
            })?;
        Ok(MappingResponse::new(
            mapping,
            patient.full_name(),
            doctor.name,
        ))
    })
    .await??;
    Ok(HttpResponse::Created().json(response))
}

// Handler to list all mappings for one patient. An unknown patient ID yields
// an empty list rather than a 404.
pub async fn list_mappings_for_patient(
    pool: web::Data<DbPool>,
    _user: AuthUser,
    patient_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = patient_id.into_inner();
    let rows = web::block(move || -> Result<Vec<MappingRow>, ApiError> {
        let mut conn = pool.get()?;
        Ok(patient_doctor_mappings::table
            .filter(patient_doctor_mappings::patient_id.eq(id))
            .inner_join(patients::table)
            .inner_join(doctors::table)
            .order(patient_doctor_mappings::assigned_at.asc())
            .select((
                PatientDoctorMapping::as_select(),
                patients::first_name,
                patients::last_name,
                doctors::name,
            ))
            .load(&mut conn)?)
    })
    .await??;
    Ok(HttpResponse::Ok().json(into_mapping_responses(rows)))
}

// Handler to delete a mapping by ID
pub async fn delete_mapping(
    pool: web::Data<DbPool>,
    _user: AuthUser,
    mapping_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = mapping_id.into_inner();
    let deleted = web::block(move || -> Result<usize, ApiError> {
        let mut conn = pool.get()?;
        Ok(diesel::delete(patient_doctor_mappings::table.find(id)).execute(&mut conn)?)
    })
    .await??;
    if deleted == 0 {
        return Err(ApiError::NotFound("mapping not found".to_string()));
    }
    Ok(HttpResponse::NoContent().finish())
}

fn into_mapping_responses(rows: Vec<MappingRow>) -> Vec<MappingResponse> {
    rows.into_iter()
        .map(|(mapping, first_name, last_name, doctor_name)| {
            MappingResponse::new(mapping, format!("{first_name} {last_name}"), doctor_name)
        })
        .collect()
}
