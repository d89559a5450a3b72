use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AttendanceError;

/// Congregation category a devotee belongs to and a sabha is held for.
///
/// Users are granted access per category, so this enum is also the unit of
/// data partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SabhaType {
    Bal,
    Yuvak,
    Mahila,
    Sanyukt,
}

impl SabhaType {
    pub const ALL: [SabhaType; 4] = [
        SabhaType::Bal,
        SabhaType::Yuvak,
        SabhaType::Mahila,
        SabhaType::Sanyukt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SabhaType::Bal => "bal",
            SabhaType::Yuvak => "yuvak",
            SabhaType::Mahila => "mahila",
            SabhaType::Sanyukt => "sanyukt",
        }
    }

    /// Human label, e.g. "Yuvak Sabha".
    pub fn display(&self) -> &'static str {
        match self {
            SabhaType::Bal => "Bal Sabha",
            SabhaType::Yuvak => "Yuvak Sabha",
            SabhaType::Mahila => "Mahila Sabha",
            SabhaType::Sanyukt => "Sanyukt Sabha",
        }
    }

    /// Prefix used for generated devotee ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            SabhaType::Bal => "b",
            SabhaType::Yuvak => "y",
            SabhaType::Mahila => "m",
            SabhaType::Sanyukt => "s",
        }
    }
}

impl fmt::Display for SabhaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SabhaType {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bal" => Ok(SabhaType::Bal),
            "yuvak" => Ok(SabhaType::Yuvak),
            "mahila" => Ok(SabhaType::Mahila),
            "sanyukt" => Ok(SabhaType::Sanyukt),
            _ => Err(AttendanceError::invalid(
                "Invalid sabha type. Must be one of: bal, yuvak, mahila, sanyukt",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl FromStr for Gender {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            other => Err(AttendanceError::invalid(format!("Invalid gender: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevoteeType {
    #[default]
    Haribhakt,
    Gunbhavi,
    Karyakar,
}

impl DevoteeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DevoteeType::Haribhakt => "haribhakt",
            DevoteeType::Gunbhavi => "gunbhavi",
            DevoteeType::Karyakar => "karyakar",
        }
    }
}

impl FromStr for DevoteeType {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "haribhakt" => Ok(DevoteeType::Haribhakt),
            "gunbhavi" => Ok(DevoteeType::Gunbhavi),
            "karyakar" => Ok(DevoteeType::Karyakar),
            other => Err(AttendanceError::invalid(format!("Invalid devotee type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    #[default]
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
        }
    }

    pub fn display(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Late => "Late",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            other => Err(AttendanceError::invalid(format!("Invalid status: {}", other))),
        }
    }
}

/// A registered devotee.
///
/// `id` is the document id and never changes; `devotee_id` is the number
/// printed on cards and typed into searches, and is unique across the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Devotee {
    pub id: String,
    pub devotee_id: String,
    #[serde(default)]
    pub devotee_type: DevoteeType,
    pub name: String,
    pub contact_number: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub age: Option<u32>,
    pub sabha_type: SabhaType,
    #[serde(default)]
    pub address_line: String,
    #[serde(default)]
    pub landmark: String,
    #[serde(default)]
    pub zone: String,
    pub join_date: NaiveDate,
    #[serde(default)]
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Field values for creating or overwriting a devotee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevoteeInput {
    /// Empty means "generate one from the sabha type prefix".
    #[serde(default)]
    pub devotee_id: String,
    #[serde(default)]
    pub devotee_type: DevoteeType,
    pub name: String,
    pub contact_number: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub age: Option<u32>,
    pub sabha_type: SabhaType,
    #[serde(default)]
    pub address_line: String,
    #[serde(default)]
    pub landmark: String,
    #[serde(default)]
    pub zone: String,
    pub join_date: NaiveDate,
    #[serde(default)]
    pub photo_url: Option<String>,
}

impl DevoteeInput {
    pub fn into_devotee(self, id: String, devotee_id: String) -> Devotee {
        Devotee {
            id,
            devotee_id,
            devotee_type: self.devotee_type,
            name: self.name,
            contact_number: self.contact_number,
            date_of_birth: self.date_of_birth,
            gender: self.gender,
            age: self.age,
            sabha_type: self.sabha_type,
            address_line: self.address_line,
            landmark: self.landmark,
            zone: self.zone,
            join_date: self.join_date,
            photo_url: self.photo_url,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sabha {
    pub id: String,
    pub date: NaiveDate,
    pub sabha_type: SabhaType,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub mandal: Option<String>,
    #[serde(default)]
    pub xetra: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSabha {
    pub date: NaiveDate,
    pub sabha_type: SabhaType,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub mandal: Option<String>,
    #[serde(default)]
    pub xetra: Option<String>,
}

/// One devotee's mark for one sabha. `devotee_id` holds the devotee's
/// document id, not the printed number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub devotee_id: String,
    pub sabha_id: String,
    #[serde(default)]
    pub status: AttendanceStatus,
    #[serde(default)]
    pub notes: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mandal {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
}

/// Application login, with the sabha types it may see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub allowed_sabha_types: Vec<SabhaType>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub can_delete: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Opaque document id, in the same 32-hex-digit shape for every collection.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
