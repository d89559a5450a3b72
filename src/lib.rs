/*!
# Temple Attendance

A browser-based attendance register for a temple's weekly congregations, built in Rust.

## Overview

Devotees are registered once and belong to one sabha type (Bal, Yuvak, Mahila or
Sanyukt). Each sabha held for a type gets a mark per devotee of that type, which
sevaks set to present, late or absent. Users are limited to the sabha types an
administrator assigns them, and every page and export only shows those types.

## Architecture

### Web Layer
- **Technologies**: axum, Handlebars templates, cookie sessions
- **Key Components**:
  - Page handlers for devotees, sabhas, attendance, reports and administration
  - Authentication middleware that resolves the session cookie to a user
  - JSON responses for the pages' AJAX calls (search, inline marking, import progress)

### Domain Layer
- Attendance logic: creating sabhas with default absent marks, saving marks,
  dashboard figures, reports and analytics
- Role-based partitioning by sabha type
- Devotee import from CSV/Excel and chunked, concurrent writes of the rows
- CSV and colour-coded Excel exports
- Photo storage with generated initials avatars
- Absence notices through an email-to-SMS gateway

### Data Persistence Layer
- One JSON file per collection (devotees, sabhas, attendance, mandals, users)
- Whole-file atomic replacement on every write

## Modules

- **models**: Devotee, sabha, attendance, mandal and user records
- **database**: The JSON document store
- **access**: Per-user permissions by sabha type
- **query**: Devotee search and pagination
- **attendance**: Sabha, marking and reporting operations
- **loader**: CSV/Excel devotee import and validation
- **batch**: Chunked import jobs
- **downloader**: CSV and XLSX export
- **photos**: Devotee photos and avatars
- **mailer**: Absence notifications
- **login**: Passwords, users and sessions
- **app**: Configuration, state and routing (web feature)

## Routes

- `/login`, `/logout` - Authentication
- `/` - Dashboard
- `/devotees` - List, add, edit, delete, upload and export devotees
- `/sabhas` - List, add and delete sabhas; `/sabhas/:id/attendance` marks attendance
- `/attendance/report` - Filterable report with Excel and CSV exports
- `/mandals`, `/admin` - Administration
*/

pub mod access;
pub mod attendance;
pub mod batch;
pub mod database;
pub mod downloader;
pub mod error;
pub mod loader;
pub mod login;
pub mod mailer;
pub mod models;
pub mod photos;
pub mod query;

#[cfg(feature = "web")]
pub mod admin_panel;
#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod devotee_pages;
#[cfg(feature = "web")]
pub mod report_pages;
#[cfg(feature = "web")]
pub mod sabha_pages;
#[cfg(feature = "web")]
pub mod upload;
#[cfg(feature = "web")]
pub mod views;

pub use access::Permissions;
pub use database::Database;
pub use error::{AttendanceError, Result};
pub use models::*;
