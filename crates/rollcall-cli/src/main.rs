use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

// `#[zbus::proxy]` generates `RollcallProxy` (async) and `RollcallProxyBlocking`.
#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn register_user(&self, user: &str) -> zbus::Result<String>;
    async fn get_user(&self, user: &str) -> zbus::Result<String>;
    async fn update_profile(&self, user: &str, update: &str) -> zbus::Result<String>;
    async fn replace_face_profile(&self, user: &str, embeddings: &str) -> zbus::Result<u32>;
    async fn mark_attendance(&self, user: &str, embeddings: &str) -> zbus::Result<String>;
    async fn attendance_history(&self, user: &str) -> zbus::Result<String>;
    async fn add_course(&self, title: &str, description: &str) -> zbus::Result<String>;
    async fn add_lesson(
        &self,
        course: &str,
        title: &str,
        description: &str,
        video_url: &str,
        pdf_url: &str,
    ) -> zbus::Result<String>;
    async fn list_courses(&self) -> zbus::Result<String>;
    async fn list_lessons(&self, course: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance and course CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new user
    Register {
        name: String,
        email: String,
        /// student or tutor
        #[arg(short, long, default_value = "student")]
        role: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date_of_birth: Option<String>,
        /// male, female or other
        #[arg(long)]
        gender: Option<String>,
    },
    /// Show a user
    Show { user: String },
    /// Edit profile fields; omitted flags keep their current value
    Profile {
        user: String,
        #[arg(long)]
        name: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        date_of_birth: Option<String>,
        /// male, female or other
        #[arg(long)]
        gender: Option<String>,
        /// Hosted image URL
        #[arg(long)]
        image: Option<String>,
    },
    /// Replace the stored face embeddings (at most 10)
    Enroll {
        user: String,
        /// JSON array of vectors, a path to a file holding one, or "-" for stdin
        embeddings: String,
    },
    /// Mark today's attendance from captured embeddings
    Attend {
        user: String,
        /// JSON array of vectors, a path to a file holding one, or "-" for stdin
        embeddings: String,
    },
    /// List attendance records
    History { user: String },
    /// Course catalog
    #[command(subcommand)]
    Course(CourseCommands),
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum CourseCommands {
    /// Create a course
    Add { title: String, description: String },
    /// Attach a lesson to a course
    Lesson {
        course: String,
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        video: String,
        /// URL of an already uploaded PDF
        #[arg(long, default_value = "")]
        pdf: String,
    },
    /// List courses
    List,
    /// List lessons of a course
    Lessons { course: String },
}

/// Resolve an embeddings argument: "-" reads stdin, an existing path is read,
/// anything else is taken as inline JSON.
fn read_embeddings(arg: &str) -> Result<String> {
    if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read embeddings from stdin")?;
        return Ok(buf);
    }
    if Path::new(arg).is_file() {
        return std::fs::read_to_string(arg).with_context(|| format!("failed to read {arg}"));
    }
    Ok(arg.to_string())
}

/// Build the registration request, leaving out unset optional fields.
fn registration_json(
    name: &str,
    email: &str,
    role: &str,
    date_of_birth: Option<&str>,
    gender: Option<&str>,
) -> String {
    let mut request = serde_json::json!({ "name": name, "email": email, "role": role });
    if let Some(dob) = date_of_birth {
        request["date_of_birth"] = dob.into();
    }
    if let Some(gender) = gender {
        request["gender"] = gender.into();
    }
    request.to_string()
}

/// Pretty-print a JSON reply, falling back to the raw string.
fn print_json(reply: &str) {
    match serde_json::from_str::<serde_json::Value>(reply) {
        Ok(v) => println!("{}", serde_json::to_string_pretty(&v).unwrap_or_else(|_| reply.to_string())),
        Err(_) => println!("{reply}"),
    }
}

/// Short label for a daemon error, e.g. `NotRecognized`.
fn error_kind(err: &zbus::Error) -> Option<String> {
    match err {
        zbus::Error::MethodError(name, _, _) => {
            name.as_str().rsplit('.').next().map(str::to_string)
        }
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    };
    let conn = conn.context("failed to connect to D-Bus")?;
    let proxy = RollcallProxy::new(&conn)
        .await
        .context("failed to create rollcalld proxy")?;

    let result = run(&proxy, cli.command).await;
    if let Err(err) = &result {
        if let Some(kind) = err.downcast_ref::<zbus::Error>().and_then(error_kind) {
            tracing::debug!(kind = %kind, "daemon rejected request");
        }
    }
    result
}

async fn run(proxy: &RollcallProxy<'_>, command: Commands) -> Result<()> {
    match command {
        Commands::Register {
            name,
            email,
            role,
            date_of_birth,
            gender,
        } => {
            let request = registration_json(
                &name,
                &email,
                &role,
                date_of_birth.as_deref(),
                gender.as_deref(),
            );
            let id = proxy.register_user(&request).await?;
            println!("Registered {name} as {id}");
        }
        Commands::Show { user } => print_json(&proxy.get_user(&user).await?),
        Commands::Profile {
            user,
            name,
            date_of_birth,
            gender,
            image,
        } => {
            let update = serde_json::json!({
                "name": name,
                "date_of_birth": date_of_birth,
                "gender": gender,
                "profile_image": image,
            });
            print_json(&proxy.update_profile(&user, &update.to_string()).await?);
        }
        Commands::Enroll { user, embeddings } => {
            let payload = read_embeddings(&embeddings)?;
            let count = proxy.replace_face_profile(&user, &payload).await?;
            if count == 0 {
                println!("Face profile cleared");
            } else {
                println!("Face profile replaced with {count} embedding(s)");
            }
        }
        Commands::Attend { user, embeddings } => {
            let payload = read_embeddings(&embeddings)?;
            match proxy.mark_attendance(&user, &payload).await {
                Ok(reply) => {
                    println!("Attendance marked");
                    print_json(&reply);
                }
                Err(err) => match error_kind(&err).as_deref() {
                    Some("NotRecognized") => anyhow::bail!("Face not recognized; attendance not marked"),
                    Some("AlreadyMarkedToday") => anyhow::bail!("Attendance already marked for today"),
                    Some("NoStoredEmbeddings") => {
                        anyhow::bail!("No face profile registered; run `rollcall enroll` first")
                    }
                    _ => return Err(err.into()),
                },
            }
        }
        Commands::History { user } => print_json(&proxy.attendance_history(&user).await?),
        Commands::Course(CourseCommands::Add { title, description }) => {
            print_json(&proxy.add_course(&title, &description).await?);
        }
        Commands::Course(CourseCommands::Lesson {
            course,
            title,
            description,
            video,
            pdf,
        }) => {
            print_json(&proxy.add_lesson(&course, &title, &description, &video, &pdf).await?);
        }
        Commands::Course(CourseCommands::List) => print_json(&proxy.list_courses().await?),
        Commands::Course(CourseCommands::Lessons { course }) => {
            print_json(&proxy.list_lessons(&course).await?)
        }
        Commands::Status => print_json(&proxy.status().await?),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_attend() {
        let cli = Cli::try_parse_from(["rollcall", "--session", "attend", "u1", "[[1, 0]]"]).unwrap();
        assert!(cli.session);
        match cli.command {
            Commands::Attend { user, embeddings } => {
                assert_eq!(user, "u1");
                assert_eq!(embeddings, "[[1, 0]]");
            }
            _ => panic!("expected attend"),
        }
    }

    #[test]
    fn test_register_sends_profile_fields() {
        let cli = Cli::try_parse_from([
            "rollcall",
            "register",
            "Grace",
            "grace@example.org",
            "--date-of-birth",
            "1906-12-09",
            "--gender",
            "female",
        ])
        .unwrap();
        let Commands::Register {
            name,
            email,
            role,
            date_of_birth,
            gender,
        } = cli.command
        else {
            panic!("expected register");
        };
        let request: serde_json::Value = serde_json::from_str(&registration_json(
            &name,
            &email,
            &role,
            date_of_birth.as_deref(),
            gender.as_deref(),
        ))
        .unwrap();
        assert_eq!(request["role"], "student");
        assert_eq!(request["date_of_birth"], "1906-12-09");
        assert_eq!(request["gender"], "female");

        let bare: serde_json::Value =
            serde_json::from_str(&registration_json("Ada", "ada@example.org", "tutor", None, None))
                .unwrap();
        assert!(bare.get("date_of_birth").is_none());
        assert!(bare.get("gender").is_none());
    }

    #[test]
    fn test_inline_embeddings_pass_through() {
        assert_eq!(read_embeddings("[[0.5, 0.5]]").unwrap(), "[[0.5, 0.5]]");
    }

    #[test]
    fn test_embeddings_from_file() {
        let path = std::env::temp_dir().join(format!("rollcall-cli-{}.json", std::process::id()));
        std::fs::write(&path, "[[1, 2, 3]]").unwrap();
        let read = read_embeddings(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(read, "[[1, 2, 3]]");
    }
}
