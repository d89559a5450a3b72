//! Absence notices sent to devotees' phones.
//!
//! Delivery goes through a [`Notifier`]. With SMTP configured the notice is
//! mailed to the phone number at an email-to-SMS gateway; otherwise it is
//! only logged.

#[cfg(feature = "web")]
use lettre::message::Mailbox;
#[cfg(feature = "web")]
use lettre::transport::smtp::authentication::Credentials;
#[cfg(feature = "web")]
use lettre::{Message, SmtpTransport, Transport};

use crate::database::Database;
#[cfg(feature = "web")]
use crate::error::AttendanceError;
use crate::error::Result;
use crate::models::{AttendanceStatus, Sabha};

/// Something that can deliver a short text message to a phone number.
pub trait Notifier: Send + Sync {
    fn send(&self, phone: &str, message: &str) -> Result<()>;
}

/// Writes notices to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, phone: &str, message: &str) -> Result<()> {
        log::info!(
            "Notice for {} (no SMTP configured): {}",
            international_number(phone),
            message.replace('\n', " ")
        );
        Ok(())
    }
}

/// Settings for [`SmtpNotifier`].
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from: String,
    /// Domain of the email-to-SMS gateway, e.g. `sms.example.net`.
    pub gateway: String,
}

#[cfg(feature = "web")]
pub struct SmtpNotifier {
    smtp: SmtpTransport,
    from: Mailbox,
    gateway: String,
}

#[cfg(feature = "web")]
impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let creds = Credentials::new(settings.username.clone(), settings.password.clone());
        let smtp = SmtpTransport::relay(&settings.host)
            .map_err(|e| AttendanceError::Notify(format!("invalid SMTP host: {}", e)))?
            .credentials(creds)
            .build();
        let from = settings
            .from
            .parse::<Mailbox>()
            .map_err(|e| AttendanceError::Notify(format!("invalid sender address: {}", e)))?;

        Ok(SmtpNotifier {
            smtp,
            from,
            gateway: settings.gateway.clone(),
        })
    }
}

#[cfg(feature = "web")]
impl Notifier for SmtpNotifier {
    fn send(&self, phone: &str, message: &str) -> Result<()> {
        let to = format!("{}@{}", international_number(phone), self.gateway);
        let email = Message::builder()
            .from(self.from.clone())
            .to(to
                .parse::<Mailbox>()
                .map_err(|e| AttendanceError::Notify(format!("invalid recipient {}: {}", to, e)))?)
            .subject("Temple Attendance")
            .body(message.to_string())
            .map_err(|e| AttendanceError::Notify(e.to_string()))?;

        self.smtp
            .send(&email)
            .map_err(|e| AttendanceError::Notify(e.to_string()))?;
        Ok(())
    }
}

/// Numbers without a country code are taken to be Indian.
pub fn international_number(phone: &str) -> String {
    let phone = phone.trim();
    if phone.starts_with('+') {
        phone.to_string()
    } else {
        format!("+91{}", phone)
    }
}

pub fn absence_message(devotee_name: &str, sabha: &Sabha, sender: &str) -> String {
    format!(
        "Temple Attendance\n\n\
         Dear {},\n\n\
         You were marked absent for {} on {}.\n\n\
         Please contact {} if this is incorrect.\n\n\
         Temple Administration",
        devotee_name,
        sabha.sabha_type.display(),
        sabha.date,
        sender
    )
}

/// Send an absence notice for every devotee marked absent at `sabha`.
///
/// # Returns
/// * `(sent, failed)`; a record whose devotee no longer exists counts as failed
pub fn notify_absentees(
    db: &Database,
    notifier: &dyn Notifier,
    sabha: &Sabha,
    sender: &str,
) -> Result<(usize, usize)> {
    let mut sent = 0;
    let mut failed = 0;

    for record in db.attendance_for_sabha(&sabha.id)? {
        if record.status != AttendanceStatus::Absent {
            continue;
        }
        let devotee = match db.get_devotee(&record.devotee_id) {
            Ok(devotee) => devotee,
            Err(e) => {
                log::warn!("No devotee for absence record {}: {}", record.id, e);
                failed += 1;
                continue;
            }
        };

        let message = absence_message(&devotee.name, sabha, sender);
        match notifier.send(&devotee.contact_number, &message) {
            Ok(()) => sent += 1,
            Err(e) => {
                log::error!("Failed to notify {}: {}", devotee.devotee_id, e);
                failed += 1;
            }
        }
    }

    log::info!(
        "Absence notices for sabha {}: {} sent, {} failed",
        sabha.id,
        sent,
        failed
    );
    Ok((sent, failed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn country_code_added_once() {
        assert_eq!(international_number("9876543210"), "+919876543210");
        assert_eq!(international_number("+14155550100"), "+14155550100");
    }
}
