//! JSON-file document store.
//!
//! Every collection lives in its own file under the data directory and is
//! held in memory behind one `RwLock`. A mutation works on a copy of the
//! collection it touches, writes that copy through a temp file in the same
//! directory, and only then replaces the in-memory collection. A failed write
//! therefore leaves both memory and disk as they were.

use chrono::{NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tempfile::NamedTempFile;

use crate::error::{AttendanceError, Result};
use crate::models::{
    new_id, AdminUser, AttendanceRecord, AttendanceStatus, Devotee, DevoteeInput, Mandal, NewSabha,
    Sabha, SabhaType,
};

lazy_static! {
    static ref PREFIXED_ID: Regex = Regex::new(r"^([a-z])(\d+)$").unwrap();
}

/// Prefix for generated ids when the sabha type is unknown.
const GENERAL_PREFIX: &str = "g";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collection {
    Devotees,
    Sabhas,
    Attendance,
    Mandals,
    Users,
}

impl Collection {
    const ALL: [Collection; 5] = [
        Collection::Devotees,
        Collection::Sabhas,
        Collection::Attendance,
        Collection::Mandals,
        Collection::Users,
    ];

    fn file_name(&self) -> &'static str {
        match self {
            Collection::Devotees => "devotees.json",
            Collection::Sabhas => "sabhas.json",
            Collection::Attendance => "attendance.json",
            Collection::Mandals => "mandals.json",
            Collection::Users => "users.json",
        }
    }
}

#[derive(Debug, Default)]
struct Collections {
    devotees: Vec<Devotee>,
    sabhas: Vec<Sabha>,
    attendance: Vec<AttendanceRecord>,
    mandals: Vec<Mandal>,
    users: Vec<AdminUser>,
}

/// Handle to the on-disk store. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct Database {
    root: PathBuf,
    inner: RwLock<Collections>,
}

impl Database {
    /// Open (or initialise) the store rooted at `root`.
    ///
    /// Creates the directory and an empty file for each missing collection.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            create_dir_all(&root)?;
        }

        for collection in Collection::ALL {
            let path = root.join(collection.file_name());
            if !path.exists() {
                fs::write(&path, b"[]")?;
            }
        }

        let data = Collections {
            devotees: load(&root, Collection::Devotees)?,
            sabhas: load(&root, Collection::Sabhas)?,
            attendance: load(&root, Collection::Attendance)?,
            mandals: load(&root, Collection::Mandals)?,
            users: load(&root, Collection::Users)?,
        };
        log::info!(
            "Opened store at {} ({} devotees, {} sabhas, {} attendance records)",
            root.display(),
            data.devotees.len(),
            data.sabhas.len(),
            data.attendance.len()
        );

        Ok(Database {
            root,
            inner: RwLock::new(data),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Collections>> {
        self.inner
            .read()
            .map_err(|_| AttendanceError::Storage("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collections>> {
        self.inner
            .write()
            .map_err(|_| AttendanceError::Storage("store lock poisoned".to_string()))
    }

    /// Write `rows` to a temp file next to the collection files.
    fn stage<T: Serialize>(&self, rows: &[T]) -> Result<NamedTempFile> {
        let json = serde_json::to_vec_pretty(rows)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        Ok(tmp)
    }

    fn commit(&self, tmp: NamedTempFile, collection: Collection) -> Result<()> {
        tmp.persist(self.root.join(collection.file_name()))
            .map_err(|e| AttendanceError::Io(e.error))?;
        Ok(())
    }

    fn persist<T: Serialize>(&self, collection: Collection, rows: &[T]) -> Result<()> {
        let tmp = self.stage(rows)?;
        self.commit(tmp, collection)
    }

    /// Replace a parent collection and the attendance file together.
    ///
    /// Both files are staged before either is renamed into place. If the
    /// attendance rename fails the parent file is put back to `parent_before`.
    fn persist_with_attendance<T: Serialize>(
        &self,
        parent: Collection,
        parent_rows: &[T],
        parent_before: &[T],
        attendance: &[AttendanceRecord],
    ) -> Result<()> {
        let parent_tmp = self.stage(parent_rows)?;
        let attendance_tmp = self.stage(attendance)?;

        self.commit(parent_tmp, parent)?;
        if let Err(e) = self.commit(attendance_tmp, Collection::Attendance) {
            if let Err(restore) = self.persist(parent, parent_before) {
                log::error!(
                    "Could not restore {} after failed write: {}",
                    parent.file_name(),
                    restore
                );
            }
            return Err(e);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Devotees
    // ---------------------------------------------------------------------

    /// Insert a devotee. An empty `devotee_id` is replaced with the next id
    /// for the devotee's sabha type.
    pub fn insert_devotee(&self, input: DevoteeInput) -> Result<Devotee> {
        let mut data = self.write()?;

        let devotee_id = match input.devotee_id.trim() {
            "" => next_devotee_id(&data.devotees, Some(input.sabha_type)),
            given => given.to_string(),
        };
        if data.devotees.iter().any(|d| d.devotee_id == devotee_id) {
            return Err(AttendanceError::Conflict(format!(
                "Devotee ID {} is already in use",
                devotee_id
            )));
        }

        let devotee = input.into_devotee(new_id(), devotee_id);
        let mut devotees = data.devotees.clone();
        devotees.push(devotee.clone());
        self.persist(Collection::Devotees, &devotees)?;
        data.devotees = devotees;
        log::info!("Added devotee {} ({})", devotee.name, devotee.devotee_id);
        Ok(devotee)
    }

    /// Overwrite a devotee's fields, keeping its document id and creation time.
    pub fn update_devotee(&self, id: &str, input: DevoteeInput) -> Result<Devotee> {
        let mut data = self.write()?;

        let index = data
            .devotees
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| AttendanceError::not_found("Devotee"))?;

        let devotee_id = match input.devotee_id.trim() {
            "" => data.devotees[index].devotee_id.clone(),
            given => given.to_string(),
        };
        if data
            .devotees
            .iter()
            .any(|d| d.id != id && d.devotee_id == devotee_id)
        {
            return Err(AttendanceError::Conflict(format!(
                "Devotee ID {} is already in use",
                devotee_id
            )));
        }

        let existing = &data.devotees[index];
        let mut updated = input.into_devotee(existing.id.clone(), devotee_id);
        updated.created_at = existing.created_at;
        updated.updated_at = Some(Utc::now());

        let mut devotees = data.devotees.clone();
        devotees[index] = updated.clone();
        self.persist(Collection::Devotees, &devotees)?;
        data.devotees = devotees;
        Ok(updated)
    }

    pub fn get_devotee(&self, id: &str) -> Result<Devotee> {
        self.read()?
            .devotees
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| AttendanceError::not_found("Devotee"))
    }

    /// Look a devotee up by the printed id.
    pub fn find_devotee_by_number(&self, devotee_id: &str) -> Result<Option<Devotee>> {
        Ok(self
            .read()?
            .devotees
            .iter()
            .find(|d| d.devotee_id == devotee_id)
            .cloned())
    }

    /// Devotees whose sabha type is in `types`.
    pub fn list_devotees(&self, types: &[SabhaType]) -> Result<Vec<Devotee>> {
        Ok(self
            .read()?
            .devotees
            .iter()
            .filter(|d| types.contains(&d.sabha_type))
            .cloned()
            .collect())
    }

    pub fn count_devotees(&self, types: &[SabhaType]) -> Result<usize> {
        Ok(self
            .read()?
            .devotees
            .iter()
            .filter(|d| types.contains(&d.sabha_type))
            .count())
    }

    /// Delete a devotee together with all of its attendance records.
    pub fn delete_devotee(&self, id: &str) -> Result<Devotee> {
        let mut data = self.write()?;
        let index = data
            .devotees
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| AttendanceError::not_found("Devotee"))?;
        let mut devotees = data.devotees.clone();
        let removed = devotees.remove(index);

        let attendance: Vec<AttendanceRecord> = data
            .attendance
            .iter()
            .filter(|a| a.devotee_id != removed.id)
            .cloned()
            .collect();
        let dropped = data.attendance.len() - attendance.len();

        if dropped > 0 {
            self.persist_with_attendance(
                Collection::Devotees,
                &devotees,
                &data.devotees,
                &attendance,
            )?;
        } else {
            self.persist(Collection::Devotees, &devotees)?;
        }
        data.devotees = devotees;
        data.attendance = attendance;
        log::info!(
            "Deleted devotee {} and {} attendance records",
            removed.devotee_id,
            dropped
        );
        Ok(removed)
    }

    /// Next free id for `sabha_type`: its prefix followed by one more than the
    /// highest number already used with that prefix.
    pub fn next_devotee_id(&self, sabha_type: Option<SabhaType>) -> Result<String> {
        Ok(next_devotee_id(&self.read()?.devotees, sabha_type))
    }

    /// Upsert rows by `devotee_id`. Returns `(created, updated)`.
    ///
    /// Existing devotees keep their document id and creation time, so their
    /// attendance history survives a re-import.
    pub fn import_devotees(&self, rows: &[DevoteeInput]) -> Result<(usize, usize)> {
        let mut data = self.write()?;
        let mut devotees = data.devotees.clone();
        let mut created = 0;
        let mut updated = 0;

        for row in rows {
            let devotee_id = match row.devotee_id.trim() {
                "" => next_devotee_id(&devotees, Some(row.sabha_type)),
                given => given.to_string(),
            };
            if row.name.trim().is_empty() {
                log::warn!("Skipping import row for {} with empty name", devotee_id);
                continue;
            }

            match devotees.iter().position(|d| d.devotee_id == devotee_id) {
                Some(index) => {
                    let existing = &devotees[index];
                    let mut replacement = row.clone().into_devotee(existing.id.clone(), devotee_id);
                    replacement.created_at = existing.created_at;
                    replacement.updated_at = Some(Utc::now());
                    devotees[index] = replacement;
                    updated += 1;
                }
                None => {
                    devotees.push(row.clone().into_devotee(new_id(), devotee_id));
                    created += 1;
                }
            }
        }

        self.persist(Collection::Devotees, &devotees)?;
        data.devotees = devotees;
        Ok((created, updated))
    }

    // ---------------------------------------------------------------------
    // Sabhas
    // ---------------------------------------------------------------------

    pub fn insert_sabha(&self, new: NewSabha) -> Result<Sabha> {
        let mut data = self.write()?;
        let sabha = Sabha {
            id: new_id(),
            date: new.date,
            sabha_type: new.sabha_type,
            location: new.location,
            start_time: new.start_time,
            end_time: new.end_time,
            mandal: new.mandal,
            xetra: new.xetra,
            created_at: Utc::now(),
        };
        let mut sabhas = data.sabhas.clone();
        sabhas.push(sabha.clone());
        self.persist(Collection::Sabhas, &sabhas)?;
        data.sabhas = sabhas;
        Ok(sabha)
    }

    pub fn get_sabha(&self, id: &str) -> Result<Sabha> {
        self.read()?
            .sabhas
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| AttendanceError::not_found("Sabha"))
    }

    /// Sabhas of the given types, newest first.
    pub fn list_sabhas(&self, types: &[SabhaType]) -> Result<Vec<Sabha>> {
        let mut sabhas: Vec<Sabha> = self
            .read()?
            .sabhas
            .iter()
            .filter(|s| types.contains(&s.sabha_type))
            .cloned()
            .collect();
        sabhas.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(sabhas)
    }

    /// Number of sabhas of the given types dated within `[from, to]`.
    pub fn count_sabhas_between(
        &self,
        types: &[SabhaType],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<usize> {
        Ok(self
            .read()?
            .sabhas
            .iter()
            .filter(|s| types.contains(&s.sabha_type) && s.date >= from && s.date <= to)
            .count())
    }

    /// Delete a sabha together with all of its attendance records.
    pub fn delete_sabha(&self, id: &str) -> Result<Sabha> {
        let mut data = self.write()?;
        let index = data
            .sabhas
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| AttendanceError::not_found("Sabha"))?;
        let mut sabhas = data.sabhas.clone();
        let removed = sabhas.remove(index);
        let attendance: Vec<AttendanceRecord> = data
            .attendance
            .iter()
            .filter(|a| a.sabha_id != removed.id)
            .cloned()
            .collect();

        self.persist_with_attendance(Collection::Sabhas, &sabhas, &data.sabhas, &attendance)?;
        data.sabhas = sabhas;
        data.attendance = attendance;
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Attendance
    // ---------------------------------------------------------------------

    /// Create or overwrite the mark of one devotee for one sabha.
    /// Returns `true` when a new record was created.
    pub fn upsert_attendance(
        &self,
        sabha_id: &str,
        devotee_id: &str,
        status: AttendanceStatus,
        notes: &str,
    ) -> Result<bool> {
        let mut data = self.write()?;
        if !data.sabhas.iter().any(|s| s.id == sabha_id) {
            return Err(AttendanceError::not_found("Sabha"));
        }
        if !data.devotees.iter().any(|d| d.id == devotee_id) {
            return Err(AttendanceError::not_found("Devotee"));
        }

        let mut attendance = data.attendance.clone();
        let created = apply_mark(&mut attendance, sabha_id, devotee_id, status, notes);
        self.persist(Collection::Attendance, &attendance)?;
        data.attendance = attendance;
        Ok(created)
    }

    /// Apply many marks for one sabha with a single write.
    /// Marks naming unknown devotees are skipped.
    pub fn upsert_attendance_many(
        &self,
        sabha_id: &str,
        marks: &[(String, AttendanceStatus, String)],
    ) -> Result<usize> {
        let mut data = self.write()?;
        if !data.sabhas.iter().any(|s| s.id == sabha_id) {
            return Err(AttendanceError::not_found("Sabha"));
        }

        let mut attendance = data.attendance.clone();
        let mut applied = 0;
        for (devotee_id, status, notes) in marks {
            if !data.devotees.iter().any(|d| &d.id == devotee_id) {
                log::warn!("Skipping mark for unknown devotee {}", devotee_id);
                continue;
            }
            apply_mark(&mut attendance, sabha_id, devotee_id, *status, notes);
            applied += 1;
        }

        self.persist(Collection::Attendance, &attendance)?;
        data.attendance = attendance;
        Ok(applied)
    }

    /// Give every devotee of the sabha's type an `absent` record unless they
    /// already have one. Returns the number of records created.
    pub fn seed_absent(&self, sabha: &Sabha) -> Result<usize> {
        let mut data = self.write()?;
        let devotee_ids: Vec<String> = data
            .devotees
            .iter()
            .filter(|d| d.sabha_type == sabha.sabha_type)
            .map(|d| d.id.clone())
            .collect();

        let mut attendance = data.attendance.clone();
        let mut created = 0;
        for devotee_id in devotee_ids {
            let exists = attendance
                .iter()
                .any(|a| a.sabha_id == sabha.id && a.devotee_id == devotee_id);
            if !exists {
                attendance.push(AttendanceRecord {
                    id: new_id(),
                    devotee_id,
                    sabha_id: sabha.id.clone(),
                    status: AttendanceStatus::Absent,
                    notes: String::new(),
                    timestamp: Utc::now(),
                });
                created += 1;
            }
        }

        if created > 0 {
            self.persist(Collection::Attendance, &attendance)?;
            data.attendance = attendance;
        }
        Ok(created)
    }

    pub fn attendance_for_sabha(&self, sabha_id: &str) -> Result<Vec<AttendanceRecord>> {
        Ok(self
            .read()?
            .attendance
            .iter()
            .filter(|a| a.sabha_id == sabha_id)
            .cloned()
            .collect())
    }

    pub fn attendance_for_devotee(&self, devotee_id: &str) -> Result<Vec<AttendanceRecord>> {
        Ok(self
            .read()?
            .attendance
            .iter()
            .filter(|a| a.devotee_id == devotee_id)
            .cloned()
            .collect())
    }

    pub fn all_attendance(&self) -> Result<Vec<AttendanceRecord>> {
        Ok(self.read()?.attendance.clone())
    }

    // ---------------------------------------------------------------------
    // Mandals
    // ---------------------------------------------------------------------

    pub fn insert_mandal(&self, name: &str, display_name: &str, created_by: &str) -> Result<Mandal> {
        let name = name.trim().to_lowercase();
        let display_name = display_name.trim().to_string();
        if name.is_empty() || display_name.is_empty() {
            return Err(AttendanceError::invalid("Name and display name are required."));
        }

        let mut data = self.write()?;
        if data.mandals.iter().any(|m| m.name == name) {
            return Err(AttendanceError::Conflict(format!(
                "Mandal \"{}\" already exists.",
                name
            )));
        }

        let mandal = Mandal {
            id: new_id(),
            name,
            display_name,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
        };
        let mut mandals = data.mandals.clone();
        mandals.push(mandal.clone());
        self.persist(Collection::Mandals, &mandals)?;
        data.mandals = mandals;
        Ok(mandal)
    }

    /// All mandals sorted by name.
    pub fn list_mandals(&self) -> Result<Vec<Mandal>> {
        let mut mandals = self.read()?.mandals.clone();
        mandals.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(mandals)
    }

    pub fn delete_mandal(&self, id: &str) -> Result<Mandal> {
        let mut data = self.write()?;
        let index = data
            .mandals
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| AttendanceError::not_found("Mandal"))?;
        let mut mandals = data.mandals.clone();
        let removed = mandals.remove(index);
        self.persist(Collection::Mandals, &mandals)?;
        data.mandals = mandals;
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------------

    pub fn insert_user(&self, user: AdminUser) -> Result<AdminUser> {
        let mut data = self.write()?;
        if data.users.iter().any(|u| u.username == user.username) {
            return Err(AttendanceError::Conflict("Username already exists".to_string()));
        }
        let mut users = data.users.clone();
        users.push(user.clone());
        self.persist(Collection::Users, &users)?;
        data.users = users;
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> Result<AdminUser> {
        self.read()?
            .users
            .iter()
            .find(|u| u.id == id && u.is_active)
            .cloned()
            .ok_or_else(|| AttendanceError::not_found("User"))
    }

    /// Active user with this username, if any.
    pub fn find_user_by_username(&self, username: &str) -> Result<Option<AdminUser>> {
        Ok(self
            .read()?
            .users
            .iter()
            .find(|u| u.username == username && u.is_active)
            .cloned())
    }

    /// All active users.
    pub fn list_users(&self) -> Result<Vec<AdminUser>> {
        Ok(self
            .read()?
            .users
            .iter()
            .filter(|u| u.is_active)
            .cloned()
            .collect())
    }

    /// Replace the stored user that has the same id.
    pub fn update_user(&self, user: AdminUser) -> Result<AdminUser> {
        let mut data = self.write()?;
        let index = data
            .users
            .iter()
            .position(|u| u.id == user.id)
            .ok_or_else(|| AttendanceError::not_found("User"))?;
        let mut users = data.users.clone();
        users[index] = user.clone();
        self.persist(Collection::Users, &users)?;
        data.users = users;
        Ok(user)
    }

    pub fn delete_user(&self, id: &str) -> Result<AdminUser> {
        let mut data = self.write()?;
        let index = data
            .users
            .iter()
            .position(|u| u.id == id)
            .ok_or_else(|| AttendanceError::not_found("User"))?;
        let mut users = data.users.clone();
        let removed = users.remove(index);
        self.persist(Collection::Users, &users)?;
        data.users = users;
        Ok(removed)
    }
}

fn load<T: DeserializeOwned>(root: &Path, collection: Collection) -> Result<Vec<T>> {
    let path = root.join(collection.file_name());
    let contents = fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&contents).map_err(|e| {
        AttendanceError::Storage(format!("failed to parse {}: {}", path.display(), e))
    })
}

fn apply_mark(
    attendance: &mut Vec<AttendanceRecord>,
    sabha_id: &str,
    devotee_id: &str,
    status: AttendanceStatus,
    notes: &str,
) -> bool {
    match attendance
        .iter_mut()
        .find(|a| a.sabha_id == sabha_id && a.devotee_id == devotee_id)
    {
        Some(record) => {
            record.status = status;
            record.notes = notes.to_string();
            record.timestamp = Utc::now();
            false
        }
        None => {
            attendance.push(AttendanceRecord {
                id: new_id(),
                devotee_id: devotee_id.to_string(),
                sabha_id: sabha_id.to_string(),
                status,
                notes: notes.to_string(),
                timestamp: Utc::now(),
            });
            true
        }
    }
}

fn next_devotee_id(devotees: &[Devotee], sabha_type: Option<SabhaType>) -> String {
    let prefix = sabha_type.map(|t| t.id_prefix()).unwrap_or(GENERAL_PREFIX);

    let max = devotees
        .iter()
        .filter_map(|d| PREFIXED_ID.captures(&d.devotee_id))
        .filter(|caps| &caps[1] == prefix)
        .filter_map(|caps| caps[2].parse::<u64>().ok())
        .max()
        .unwrap_or(0);

    format!("{}{}", prefix, max + 1)
}
