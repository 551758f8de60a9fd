//! Command-line front end for the placeshare stores.
//!
//! Every command opens the database, runs one core operation and prints the
//! result as JSON on stdout. Failures go to stderr with a non-zero exit code:
//! `2` for rejected input or missing records, `1` for everything else.

use clap::{Parser, Subcommand};
use log::info;
use placeshare_core::db::open_with_config;
use placeshare_core::{
    check_integrity, init_logging, Coordinates, CoordinatorError, CoreConfig,
    CreatePlaceRequest, FixedGeocoder, LogConfig, PlaceCoordinator, PlaceService,
    PlaceServiceError, PlaceUpdate, SignupRequest, SqlitePlaceRepository,
    SqliteUserRepository, UserService, UserServiceError,
};
use rusqlite::Connection;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "placeshare")]
#[command(about = "Manage users and the places they share")]
struct Cli {
    /// SQLite database file; created and migrated on first use.
    #[arg(long, global = true, default_value = "placeshare.db")]
    db: PathBuf,
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Absolute directory for rotated log files.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = false)]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Users,
    /// Creates a place and links it to its creator.
    CreatePlace {
        #[arg(long)]
        creator: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        address: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(long)]
        image: Option<String>,
    },
    Place {
        id: String,
    },
    /// Lists the places owned by a user.
    Places {
        #[arg(long)]
        user: String,
    },
    UpdatePlace {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Deletes a place and unlinks it from its creator.
    DeletePlace {
        id: String,
    },
    /// Audits the Place/User links and fails when any are broken.
    Check,
}

struct CliFailure {
    message: String,
    exit: u8,
}

impl CliFailure {
    fn internal(message: impl ToString) -> Self {
        Self {
            message: message.to_string(),
            exit: 1,
        }
    }

    fn rejected(message: impl ToString) -> Self {
        Self {
            message: message.to_string(),
            exit: 2,
        }
    }
}

impl From<CoordinatorError> for CliFailure {
    fn from(value: CoordinatorError) -> Self {
        if value.status_code() < 500 {
            Self::rejected(value)
        } else {
            Self::internal(value)
        }
    }
}

impl From<UserServiceError> for CliFailure {
    fn from(value: UserServiceError) -> Self {
        match value {
            UserServiceError::Repo(_) => Self::internal(value),
            _ => Self::rejected(value),
        }
    }
}

impl From<PlaceServiceError> for CliFailure {
    fn from(value: PlaceServiceError) -> Self {
        match value {
            PlaceServiceError::Repo(_) => Self::internal(value),
            _ => Self::rejected(value),
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            eprintln!("{}", failure.message);
            ExitCode::from(failure.exit)
        }
    }
}

fn run() -> Result<(), CliFailure> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    if let Some(log) = config.log.as_ref() {
        init_logging(log).map_err(CliFailure::internal)?;
    }

    let conn = open_with_config(&config).map_err(CliFailure::internal)?;
    info!(
        "event=cli_command module=cli status=start command={}",
        command_name(&cli.command)
    );
    execute(&conn, &config, cli.command, cli.pretty)
}

fn build_config(cli: &Cli) -> CoreConfig {
    let log = match (cli.log_level.as_ref(), cli.log_dir.as_ref()) {
        (None, None) => None,
        (level, dir) => Some(LogConfig {
            level: level
                .cloned()
                .unwrap_or_else(|| placeshare_core::default_log_level().to_string()),
            dir: dir.cloned().unwrap_or_else(|| std::env::temp_dir().join("placeshare")),
        }),
    };
    CoreConfig {
        log,
        ..CoreConfig::with_database_file(&cli.db)
    }
}

fn execute(
    conn: &Connection,
    config: &CoreConfig,
    command: Commands,
    pretty: bool,
) -> Result<(), CliFailure> {
    match command {
        Commands::Signup {
            name,
            email,
            password,
        } => {
            let user = users(conn, config)?.signup(&SignupRequest {
                name,
                email,
                password,
            })?;
            emit(&user, pretty)
        }
        Commands::Login { email, password } => {
            let user = users(conn, config)?.login(&email, &password)?;
            emit(&user, pretty)
        }
        Commands::Users => emit(&users(conn, config)?.list_users()?, pretty),
        Commands::CreatePlace {
            creator,
            title,
            description,
            address,
            lat,
            lng,
            image,
        } => {
            let coordinator = PlaceCoordinator::sqlite(conn)
                .map_err(CliFailure::internal)?
                .with_default_image(config.default_place_image.as_str());
            let geocoder = FixedGeocoder::new(Coordinates::new(lat, lng));
            let place = coordinator.create_place_at_address(
                &CreatePlaceRequest {
                    title,
                    description,
                    address,
                    creator,
                    image,
                },
                &geocoder,
            )?;
            emit(&place, pretty)
        }
        Commands::Place { id } => emit(&places(conn)?.get_place(&id)?, pretty),
        Commands::Places { user } => emit(&places(conn)?.places_for_user(&user)?, pretty),
        Commands::UpdatePlace {
            id,
            title,
            description,
        } => {
            let place = places(conn)?.update_place(&id, &PlaceUpdate { title, description })?;
            emit(&place, pretty)
        }
        Commands::DeletePlace { id } => {
            let coordinator = PlaceCoordinator::sqlite(conn).map_err(CliFailure::internal)?;
            emit(&coordinator.delete_place_and_unlink(&id)?, pretty)
        }
        Commands::Check => {
            let report = check_integrity(conn).map_err(CliFailure::internal)?;
            emit(&report, pretty)?;
            if report.is_consistent() {
                Ok(())
            } else {
                Err(CliFailure::internal(format!(
                    "integrity check found {} violation(s)",
                    report.violations.len()
                )))
            }
        }
    }
}

fn users<'conn>(
    conn: &'conn Connection,
    config: &CoreConfig,
) -> Result<UserService<SqliteUserRepository<'conn>>, CliFailure> {
    let repo = SqliteUserRepository::try_new(conn).map_err(CliFailure::internal)?;
    Ok(UserService::new(repo).with_default_image(config.default_user_image.as_str()))
}

fn places(
    conn: &Connection,
) -> Result<PlaceService<SqlitePlaceRepository<'_>, SqliteUserRepository<'_>>, CliFailure> {
    Ok(PlaceService::new(
        SqlitePlaceRepository::try_new(conn).map_err(CliFailure::internal)?,
        SqliteUserRepository::try_new(conn).map_err(CliFailure::internal)?,
    ))
}

fn emit(value: &impl Serialize, pretty: bool) -> Result<(), CliFailure> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    println!("{}", rendered.map_err(CliFailure::internal)?);
    Ok(())
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Signup { .. } => "signup",
        Commands::Login { .. } => "login",
        Commands::Users => "users",
        Commands::CreatePlace { .. } => "create-place",
        Commands::Place { .. } => "place",
        Commands::Places { .. } => "places",
        Commands::UpdatePlace { .. } => "update-place",
        Commands::DeletePlace { .. } => "delete-place",
        Commands::Check => "check",
    }
}
