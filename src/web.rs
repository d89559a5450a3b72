#![cfg(not(tarpaulin_include))]

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use temple_attendance::app::{self, AppState, Config};
use temple_attendance::attendance::seed_sample_data;
use temple_attendance::database::Database;
use temple_attendance::login::ensure_admin;
use temple_attendance::mailer::SmtpSettings;

/// Temple attendance web application
#[derive(Parser, Debug)]
#[command(name = "website")]
#[command(about = "Devotee, sabha and attendance tracking for a temple")]
struct Cli {
    /// Directory holding the JSON collections
    #[arg(long, env = "ATTENDANCE_DATA_DIR", default_value = "database", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web server (the default)
    Serve,
    /// Create an administrator with access to every sabha type
    CreateAdmin {
        #[arg(long, default_value = "admin")]
        username: String,
        #[arg(long, default_value = "admin@temple.com")]
        email: String,
        #[arg(long, default_value = "admin123")]
        password: String,
    },
    /// Load sample devotees and sabhas
    Seed,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Directory uploaded photos are stored in
    #[arg(long, env = "ATTENDANCE_MEDIA_DIR", default_value = "media")]
    media_dir: PathBuf,

    /// Address to listen on
    #[arg(long, env = "ATTENDANCE_BIND", default_value = "127.0.0.1:3000")]
    bind: String,

    /// Hours before a login session expires
    #[arg(long, env = "ATTENDANCE_SESSION_HOURS", default_value = "24")]
    session_hours: u64,

    /// Rows written per worker chunk during an import
    #[arg(long, env = "ATTENDANCE_BATCH_SIZE", default_value = "25")]
    batch_size: usize,

    /// Chunks written concurrently per import round
    #[arg(long, env = "ATTENDANCE_WORKERS", default_value = "4")]
    workers: usize,

    #[arg(long, env = "ATTENDANCE_SMTP_HOST")]
    smtp_host: Option<String>,

    #[arg(long, env = "ATTENDANCE_SMTP_USER", default_value = "")]
    smtp_user: String,

    #[arg(long, env = "ATTENDANCE_SMTP_PASSWORD", default_value = "", hide_env_values = true)]
    smtp_password: String,

    #[arg(long, env = "ATTENDANCE_SMTP_FROM", default_value = "attendance@temple.com")]
    smtp_from: String,

    /// Email-to-SMS gateway domain absence notices are sent through
    #[arg(long, env = "ATTENDANCE_SMS_GATEWAY", default_value = "")]
    sms_gateway: String,
}

impl ServeArgs {
    fn into_config(self, data_dir: PathBuf) -> Config {
        let smtp = self.smtp_host.map(|host| SmtpSettings {
            host,
            username: self.smtp_user,
            password: self.smtp_password,
            from: self.smtp_from,
            gateway: self.sms_gateway,
        });
        Config {
            data_dir,
            media_dir: self.media_dir,
            bind: self.bind,
            session_hours: self.session_hours,
            batch_size: self.batch_size,
            workers: self.workers,
            smtp,
        }
    }
}

/// Main entry point for the web application
///
/// Parses the command line, sets up logging and either serves the site or
/// runs one of the maintenance commands against the data directory.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli {
        data_dir,
        command,
        serve,
    } = Cli::parse();
    match command {
        Some(Command::CreateAdmin {
            username,
            email,
            password,
        }) => {
            let db = Database::open(&data_dir)?;
            let (user, created) = ensure_admin(&db, &username, &email, &password)?;
            if created {
                log::info!("Created administrator {}", user.username);
            } else {
                log::warn!("User {} already exists; nothing changed", user.username);
            }
            Ok(())
        }
        Some(Command::Seed) => {
            let db = Database::open(&data_dir)?;
            seed_sample_data(&db, app::today())?;
            Ok(())
        }
        Some(Command::Serve) | None => {
            let config = serve.into_config(data_dir);
            let state = AppState::new(config)?;
            if state.db.list_users()?.is_empty() {
                log::warn!("No users yet; run `website create-admin` to add one");
            }
            app::serve(Arc::new(state)).await
        }
    }
}
