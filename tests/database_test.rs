use chrono::NaiveDate;
use tempfile::TempDir;

use temple_attendance::models::{AttendanceStatus, DevoteeInput, NewSabha, SabhaType};
use temple_attendance::{AttendanceError, Database};

fn input(devotee_id: &str, name: &str, sabha_type: SabhaType) -> DevoteeInput {
    DevoteeInput {
        devotee_id: devotee_id.to_string(),
        devotee_type: Default::default(),
        name: name.to_string(),
        contact_number: "9876543210".to_string(),
        date_of_birth: None,
        gender: None,
        age: None,
        sabha_type,
        address_line: String::new(),
        landmark: String::new(),
        zone: String::new(),
        join_date: NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
        photo_url: None,
    }
}

fn sabha(date: (i32, u32, u32), sabha_type: SabhaType) -> NewSabha {
    NewSabha {
        date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        sabha_type,
        location: "Main Hall".to_string(),
        start_time: None,
        end_time: None,
        mandal: None,
        xetra: None,
    }
}

#[test]
fn open_creates_every_collection_file() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("store");
    Database::open(&root).unwrap();

    for file in [
        "devotees.json",
        "sabhas.json",
        "attendance.json",
        "mandals.json",
        "users.json",
    ] {
        let contents = std::fs::read_to_string(root.join(file)).unwrap();
        assert_eq!(contents.trim(), "[]", "{} should start empty", file);
    }
}

#[test]
fn writes_survive_reopening() {
    let dir = TempDir::new().unwrap();
    let id = {
        let db = Database::open(dir.path()).unwrap();
        db.insert_devotee(input("", "Ram Patel", SabhaType::Yuvak))
            .unwrap()
            .id
    };

    let db = Database::open(dir.path()).unwrap();
    let devotee = db.get_devotee(&id).unwrap();
    assert_eq!(devotee.name, "Ram Patel");
    assert_eq!(devotee.devotee_id, "y1");
}

#[test]
fn generated_ids_follow_the_sabha_type_prefix() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();

    db.insert_devotee(input("y7", "First", SabhaType::Yuvak)).unwrap();
    let second = db.insert_devotee(input("", "Second", SabhaType::Yuvak)).unwrap();
    let bal = db.insert_devotee(input("", "Third", SabhaType::Bal)).unwrap();

    assert_eq!(second.devotee_id, "y8");
    assert_eq!(bal.devotee_id, "b1");
    assert_eq!(db.next_devotee_id(None).unwrap(), "g1");
}

#[test]
fn duplicate_devotee_id_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();

    let first = db.insert_devotee(input("1001", "First", SabhaType::Bal)).unwrap();
    let other = db.insert_devotee(input("1002", "Other", SabhaType::Bal)).unwrap();

    assert!(matches!(
        db.insert_devotee(input("1001", "Again", SabhaType::Bal)),
        Err(AttendanceError::Conflict(_))
    ));
    assert!(matches!(
        db.update_devotee(&other.id, input("1001", "Other", SabhaType::Bal)),
        Err(AttendanceError::Conflict(_))
    ));

    // Keeping its own id is fine.
    let renamed = db
        .update_devotee(&first.id, input("1001", "Renamed", SabhaType::Bal))
        .unwrap();
    assert_eq!(renamed.name, "Renamed");
    assert_eq!(renamed.created_at, first.created_at);
    assert!(renamed.updated_at.is_some());
}

#[test]
fn list_and_count_respect_sabha_types() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.insert_devotee(input("", "A", SabhaType::Bal)).unwrap();
    db.insert_devotee(input("", "B", SabhaType::Yuvak)).unwrap();
    db.insert_devotee(input("", "C", SabhaType::Yuvak)).unwrap();

    assert_eq!(db.count_devotees(&[SabhaType::Yuvak]).unwrap(), 2);
    assert_eq!(db.count_devotees(&[]).unwrap(), 0);
    assert_eq!(db.list_devotees(&SabhaType::ALL).unwrap().len(), 3);
}

#[test]
fn deleting_a_devotee_removes_their_attendance() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let keep = db.insert_devotee(input("", "Keep", SabhaType::Bal)).unwrap();
    let gone = db.insert_devotee(input("", "Gone", SabhaType::Bal)).unwrap();
    let s = db.insert_sabha(sabha((2024, 3, 3), SabhaType::Bal)).unwrap();
    assert_eq!(db.seed_absent(&s).unwrap(), 2);

    db.delete_devotee(&gone.id).unwrap();

    let records = db.attendance_for_sabha(&s.id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].devotee_id, keep.id);
    assert!(matches!(
        db.get_devotee(&gone.id),
        Err(AttendanceError::NotFound(_))
    ));
}

#[test]
fn deleting_a_sabha_removes_its_attendance() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let d = db.insert_devotee(input("", "Someone", SabhaType::Mahila)).unwrap();
    let first = db.insert_sabha(sabha((2024, 3, 3), SabhaType::Mahila)).unwrap();
    let second = db.insert_sabha(sabha((2024, 3, 10), SabhaType::Mahila)).unwrap();
    db.seed_absent(&first).unwrap();
    db.seed_absent(&second).unwrap();

    db.delete_sabha(&first.id).unwrap();

    let history = db.attendance_for_devotee(&d.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sabha_id, second.id);
}

#[test]
fn sabhas_are_listed_newest_first() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.insert_sabha(sabha((2024, 3, 3), SabhaType::Bal)).unwrap();
    db.insert_sabha(sabha((2024, 3, 17), SabhaType::Bal)).unwrap();
    db.insert_sabha(sabha((2024, 3, 10), SabhaType::Yuvak)).unwrap();

    let dates: Vec<String> = db
        .list_sabhas(&SabhaType::ALL)
        .unwrap()
        .iter()
        .map(|s| s.date.to_string())
        .collect();
    assert_eq!(dates, ["2024-03-17", "2024-03-10", "2024-03-03"]);

    let from = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let to = NaiveDate::from_ymd_opt(2024, 3, 17).unwrap();
    assert_eq!(db.count_sabhas_between(&[SabhaType::Bal], from, to).unwrap(), 1);
}

#[test]
fn one_record_per_devotee_and_sabha() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let d = db.insert_devotee(input("", "Someone", SabhaType::Bal)).unwrap();
    let s = db.insert_sabha(sabha((2024, 3, 3), SabhaType::Bal)).unwrap();

    assert!(db
        .upsert_attendance(&s.id, &d.id, AttendanceStatus::Late, "traffic")
        .unwrap());
    assert!(!db
        .upsert_attendance(&s.id, &d.id, AttendanceStatus::Present, "")
        .unwrap());
    assert_eq!(db.seed_absent(&s).unwrap(), 0);

    let records = db.attendance_for_sabha(&s.id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AttendanceStatus::Present);
    assert_eq!(records[0].notes, "");

    assert!(matches!(
        db.upsert_attendance("missing", &d.id, AttendanceStatus::Present, ""),
        Err(AttendanceError::NotFound(_))
    ));
}

#[test]
fn bulk_marks_skip_unknown_devotees() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let d = db.insert_devotee(input("", "Someone", SabhaType::Bal)).unwrap();
    let s = db.insert_sabha(sabha((2024, 3, 3), SabhaType::Bal)).unwrap();

    let marks = vec![
        (d.id.clone(), AttendanceStatus::Present, String::new()),
        ("nobody".to_string(), AttendanceStatus::Present, String::new()),
    ];
    assert_eq!(db.upsert_attendance_many(&s.id, &marks).unwrap(), 1);
    assert_eq!(db.all_attendance().unwrap().len(), 1);
}

#[test]
fn import_upserts_by_devotee_id() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let existing = db.insert_devotee(input("1001", "Old Name", SabhaType::Bal)).unwrap();

    let rows = vec![
        input("1001", "New Name", SabhaType::Bal),
        input("1002", "Fresh", SabhaType::Bal),
        input("", "Generated", SabhaType::Sanyukt),
    ];
    assert_eq!(db.import_devotees(&rows).unwrap(), (2, 1));

    let updated = db.find_devotee_by_number("1001").unwrap().unwrap();
    assert_eq!(updated.id, existing.id);
    assert_eq!(updated.name, "New Name");
    assert!(db.find_devotee_by_number("s1").unwrap().is_some());
}

#[test]
fn mandal_names_are_unique_and_lowercased() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();

    let mandal = db.insert_mandal(" Nikol ", "Nikol Mandal", "admin").unwrap();
    assert_eq!(mandal.name, "nikol");
    assert!(matches!(
        db.insert_mandal("NIKOL", "Again", "admin"),
        Err(AttendanceError::Conflict(_))
    ));
    assert!(matches!(
        db.insert_mandal("", "Blank", "admin"),
        Err(AttendanceError::Validation(_))
    ));

    db.insert_mandal("bapunagar", "Bapunagar", "admin").unwrap();
    let names: Vec<String> = db.list_mandals().unwrap().into_iter().map(|m| m.name).collect();
    assert_eq!(names, ["bapunagar", "nikol"]);

    db.delete_mandal(&mandal.id).unwrap();
    assert_eq!(db.list_mandals().unwrap().len(), 1);
}

#[test]
fn corrupt_collection_is_reported() {
    let dir = TempDir::new().unwrap();
    Database::open(dir.path()).unwrap();
    std::fs::write(dir.path().join("sabhas.json"), "{not json").unwrap();

    assert!(matches!(
        Database::open(dir.path()),
        Err(AttendanceError::Storage(_))
    ));
}

#[test]
fn failed_write_leaves_memory_unchanged() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("store");
    let db = Database::open(&root).unwrap();
    let kept = db.insert_devotee(input("y1", "Ram Patel", SabhaType::Yuvak)).unwrap();
    let s = db.insert_sabha(sabha((2024, 3, 10), SabhaType::Yuvak)).unwrap();
    db.seed_absent(&s).unwrap();

    std::fs::remove_dir_all(&root).unwrap();

    assert!(db.insert_devotee(input("b1", "Sita Shah", SabhaType::Bal)).is_err());
    assert!(db.find_devotee_by_number("b1").unwrap().is_none());
    assert!(db.delete_devotee(&kept.id).is_err());
    assert!(db.delete_sabha(&s.id).is_err());
    assert_eq!(db.get_devotee(&kept.id).unwrap().devotee_id, "y1");
    assert_eq!(db.attendance_for_sabha(&s.id).unwrap().len(), 1);
    assert!(db.insert_mandal("north", "North", "admin").is_err());
    assert!(db.list_mandals().unwrap().is_empty());

    // Once the directory is back the same insert goes through.
    std::fs::create_dir_all(&root).unwrap();
    let sita = db.insert_devotee(input("b1", "Sita Shah", SabhaType::Bal)).unwrap();
    assert_eq!(sita.devotee_id, "b1");
    assert_eq!(db.count_devotees(&SabhaType::ALL).unwrap(), 2);
}
