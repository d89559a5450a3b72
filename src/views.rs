//! Server-side page templates.
//!
//! Templates are compiled into the binary and registered once at start-up.
//! Every page wraps itself in the `layout` partial block.

use axum::response::Html;
use handlebars::Handlebars;
use serde::Serialize;

use crate::error::{AttendanceError, Result};

const LAYOUT: &str = include_str!("templates/layout.hbs");

const PAGES: [(&str, &str); 16] = [
    ("login", include_str!("templates/login.hbs")),
    ("dashboard", include_str!("templates/dashboard.hbs")),
    ("profile", include_str!("templates/profile.hbs")),
    ("devotee_list", include_str!("templates/devotee_list.hbs")),
    ("devotee_form", include_str!("templates/devotee_form.hbs")),
    ("devotee_detail", include_str!("templates/devotee_detail.hbs")),
    ("sabha_list", include_str!("templates/sabha_list.hbs")),
    ("sabha_form", include_str!("templates/sabha_form.hbs")),
    ("mark_attendance", include_str!("templates/mark_attendance.hbs")),
    ("report", include_str!("templates/report.hbs")),
    ("upload", include_str!("templates/upload.hbs")),
    ("mandal_list", include_str!("templates/mandal_list.hbs")),
    ("mandal_form", include_str!("templates/mandal_form.hbs")),
    ("admin_dashboard", include_str!("templates/admin_dashboard.hbs")),
    ("user_form", include_str!("templates/user_form.hbs")),
    ("not_found", include_str!("templates/not_found.hbs")),
];

pub struct Views {
    registry: Handlebars<'static>,
}

impl Views {
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();
        registry
            .register_partial("layout", LAYOUT)
            .map_err(|e| AttendanceError::Template(e.to_string()))?;
        for (name, source) in PAGES {
            registry
                .register_template_string(name, source)
                .map_err(|e| AttendanceError::Template(format!("{}: {}", name, e)))?;
        }
        Ok(Views { registry })
    }

    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<Html<String>> {
        self.registry
            .render(name, data)
            .map(Html)
            .map_err(|e| AttendanceError::Template(format!("{}: {}", name, e)))
    }
}
