use chrono::NaiveDate;
use rust_xlsxwriter::Workbook;

use temple_attendance::loader::{self, FileKind, RowError};
use temple_attendance::models::{DevoteeType, Gender, SabhaType};
use temple_attendance::AttendanceError;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

#[test]
fn clean_csv_becomes_devotee_rows() {
    let csv = "\u{feff}Devotee_ID,Name,Contact_Number,Sabha_Type,Gender,Age,Address,Join_Date,Devotee_Type\n\
               1001,Ram Patel,9876543210,yuvak,M,21,\"12, Main Road\",2023-06-04,karyakar\n\
               ,Sita Shah,9876543211,Mahila,,,,,\n";

    let outcome = loader::parse_upload("devotees.csv", csv.as_bytes(), None, today()).unwrap();
    assert!(outcome.is_clean());
    assert_eq!(outcome.valid_rows.len(), 2);

    let ram = &outcome.valid_rows[0];
    assert_eq!(ram.devotee_id, "1001");
    assert_eq!(ram.sabha_type, SabhaType::Yuvak);
    assert_eq!(ram.gender, Some(Gender::Male));
    assert_eq!(ram.age, Some(21));
    assert_eq!(ram.address_line, "12, Main Road");
    assert_eq!(ram.devotee_type, DevoteeType::Karyakar);
    assert_eq!(ram.join_date, NaiveDate::from_ymd_opt(2023, 6, 4).unwrap());

    let sita = &outcome.valid_rows[1];
    assert_eq!(sita.devotee_id, "");
    assert_eq!(sita.sabha_type, SabhaType::Mahila);
    assert_eq!(sita.devotee_type, DevoteeType::default());
    assert_eq!(sita.join_date, today());
}

#[test]
fn row_errors_use_spreadsheet_numbering() {
    let csv = "name,contact_number,sabha_type,photo_url\n\
               Good,9876543210,bal,\n\
               \n\
               ,12345,seniors,ftp://x/y.png\n";

    let outcome = loader::parse_upload("list.csv", csv.as_bytes(), None, today()).unwrap();
    assert!(!outcome.is_clean());
    assert_eq!(outcome.valid_rows.len(), 1);
    assert_eq!(outcome.errors.len(), 1);

    let RowError { row, errors } = &outcome.errors[0];
    assert_eq!(*row, 4);
    assert_eq!(errors.len(), 4);
    assert!(errors.contains(&"Name is required".to_string()));
    assert!(errors.contains(&"Phone number must be at least 10 digits".to_string()));
    assert!(errors.contains(&"URL must start with http:// or https://".to_string()));
}

#[test]
fn filter_keeps_one_sabha_type() {
    let csv = "name,contact_number,sabha_type\n\
               A,9876543210,bal\n\
               B,9876543211,yuvak\n\
               C,9876543212,Bal\n";

    let outcome =
        loader::parse_upload("list.csv", csv.as_bytes(), Some(SabhaType::Bal), today()).unwrap();
    let names: Vec<&str> = outcome.valid_rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["A", "C"]);
}

#[test]
fn missing_columns_reject_the_file() {
    let csv = "name,phone\nA,9876543210\n";
    let err = loader::parse_upload("list.csv", csv.as_bytes(), None, today()).unwrap_err();
    match err {
        AttendanceError::Import(message) => {
            assert_eq!(message, "Missing required columns: contact_number, sabha_type")
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn upload_checks_size_type_and_content() {
    let big = vec![b'a'; loader::MAX_UPLOAD_BYTES + 1];
    assert!(matches!(
        loader::parse_upload("big.csv", &big, None, today()),
        Err(AttendanceError::Validation(_))
    ));
    assert!(matches!(
        loader::parse_upload("notes.txt", b"name", None, today()),
        Err(AttendanceError::Validation(_))
    ));
    assert!(matches!(
        loader::parse_upload("empty.csv", b"", None, today()),
        Err(AttendanceError::Import(_))
    ));
}

#[test]
fn excel_numbers_read_as_text() {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, header) in ["name", "contact_number", "sabha_type", "age"].iter().enumerate() {
        sheet.write_string(0, col as u16, *header).unwrap();
    }
    sheet.write_string(1, 0, "Ram Patel").unwrap();
    sheet.write_number(1, 1, 9876543210.0).unwrap();
    sheet.write_string(1, 2, "sanyukt").unwrap();
    sheet.write_number(1, 3, 40.0).unwrap();
    let bytes = workbook.save_to_buffer().unwrap();

    let outcome = loader::parse(FileKind::Excel, &bytes, None, today()).unwrap();
    assert!(outcome.is_clean());
    let row = &outcome.valid_rows[0];
    assert_eq!(row.contact_number, "9876543210");
    assert_eq!(row.sabha_type, SabhaType::Sanyukt);
    assert_eq!(row.age, Some(40));
}

#[test]
fn sabha_type_messages() {
    assert_eq!(
        loader::validate_sabha_type(" ").unwrap_err(),
        "Sabha type is required"
    );
    assert_eq!(loader::validate_sabha_type("YUVAK").unwrap(), SabhaType::Yuvak);
    assert!(loader::validate_sabha_type("kids").is_err());
}
