use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use image::RgbImage;
use rollcall_capture::{CameraSource, CaptureSession, JpegQuality, SyntheticCamera, V4lCamera};
use rollcall_client::{ApiClient, AttendanceFilter, StudentFilter};
use rollcall_core::{
    LiveError, LiveRecognition, MessageKind, PreviewSink, RecognitionEvent, RegistrationFlow,
    StatusMessage,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face-recognition attendance client")]
struct Cli {
    /// Recognition service base URL (overrides ROLLCALL_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CameraArgs {
    /// V4L2 device path (overrides ROLLCALL_CAMERA_DEVICE)
    #[arg(long)]
    device: Option<String>,
    /// Use a generated test pattern instead of a camera
    #[arg(long, conflicts_with = "device")]
    synthetic: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the recognition service is reachable
    Health,
    /// List V4L2 capture devices
    Devices,
    /// Save a still from the camera
    Snapshot {
        #[arg(short, long, default_value = "snapshot.jpg")]
        out: PathBuf,
        #[command(flatten)]
        camera: CameraArgs,
    },
    /// Register a student from a camera still
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        class_section: Option<String>,
        #[command(flatten)]
        camera: CameraArgs,
    },
    /// Run live recognition and print students as they are recognized
    Live {
        #[arg(long)]
        class_section: Option<String>,
        /// Stop after this many seconds (default: run until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,
        /// Keep the latest annotated frame in this file
        #[arg(long)]
        preview: Option<PathBuf>,
        #[command(flatten)]
        camera: CameraArgs,
    },
    /// List enrolled students
    Students {
        #[arg(long)]
        class_section: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },
    /// List attendance for a day
    Attendance {
        /// YYYY-MM-DD (default: today, per the service)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        class_section: Option<String>,
    },
    /// Mark a student present by hand
    Mark {
        student_id: String,
        #[arg(long)]
        class_section: Option<String>,
    },
    /// List class sections
    Classes,
    /// Create a class section
    AddClass {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove a student and their attendance history
    RemoveStudent { student_id: String },
    /// Show recent audit log entries
    Audit {
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }

    let client = ApiClient::new(&config.api_url, config.http_timeout())
        .context("invalid recognition service URL")?;

    match cli.command {
        Commands::Health => {
            if client.check_health().await {
                println!("{}: reachable", client.base_url());
            } else {
                bail!("{}: unreachable", client.base_url());
            }
        }
        Commands::Devices => {
            let devices = V4lCamera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Snapshot { out, camera } => {
            let mut session = CaptureSession::new(open_camera(&camera, &config));
            session.start().context("unable to access camera")?;
            let still = session.capture_frame(JpegQuality::SNAPSHOT)?;
            session.stop();
            std::fs::write(&out, still.bytes())
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Saved {}x{} snapshot to {}",
                still.width(),
                still.height(),
                out.display()
            );
        }
        Commands::Register {
            name,
            student_id,
            email,
            class_section,
            camera,
        } => {
            let class_section = class_section.unwrap_or_else(|| config.class_section.clone());
            register(
                client,
                open_camera(&camera, &config),
                &config,
                name,
                student_id,
                email.unwrap_or_default(),
                class_section,
            )
            .await?;
        }
        Commands::Live {
            class_section,
            duration,
            preview,
            camera,
        } => {
            live(
                client,
                open_camera(&camera, &config),
                &config,
                class_section,
                duration.map(Duration::from_secs),
                preview,
            )
            .await?;
        }
        Commands::Students {
            class_section,
            search,
        } => {
            let students = client
                .list_students(&StudentFilter {
                    class_section,
                    search,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&students)?);
        }
        Commands::Attendance {
            date,
            class_section,
        } => {
            let records = client
                .list_attendance(&AttendanceFilter {
                    date,
                    class_section,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Mark {
            student_id,
            class_section,
        } => {
            let body = client
                .mark_attendance_manually(&student_id, class_section.as_deref())
                .await?;
            print_message(&body);
        }
        Commands::Classes => {
            let classes = client.list_classes().await?;
            println!("{}", serde_json::to_string_pretty(&classes)?);
        }
        Commands::AddClass { name, description } => {
            let body = client.create_class(&name, description.as_deref()).await?;
            print_message(&body);
        }
        Commands::RemoveStudent { student_id } => {
            let body = client.delete_student(&student_id).await?;
            print_message(&body);
        }
        Commands::Audit { limit } => {
            let entries = client.audit_logs(limit).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    Ok(())
}

fn open_camera(args: &CameraArgs, config: &Config) -> Box<dyn CameraSource> {
    if args.synthetic {
        tracing::info!("using synthetic camera");
        return Box::new(SyntheticCamera::default());
    }
    let device = args.device.clone().unwrap_or_else(|| config.camera_device.clone());
    Box::new(V4lCamera::new(device))
}

fn print_message(body: &serde_json::Value) {
    match body.get("message").and_then(|m| m.as_str()) {
        Some(message) => println!("{message}"),
        None => println!("{body}"),
    }
}

fn print_status(message: &StatusMessage) {
    match message.kind {
        MessageKind::Success => println!("{}", message.text),
        MessageKind::Error => eprintln!("error: {}", message.text),
    }
}

async fn register(
    client: ApiClient,
    camera: Box<dyn CameraSource>,
    config: &Config,
    name: String,
    student_id: String,
    email: String,
    class_section: String,
) -> Result<()> {
    let mut flow = RegistrationFlow::new(client, camera, config.registration_settings());

    // Echo status messages as the flow publishes them.
    let mut views = flow.subscribe();
    let printer = tokio::spawn(async move {
        let mut last: Option<StatusMessage> = None;
        while views.changed().await.is_ok() {
            let message = views.borrow_and_update().message.clone();
            if message != last {
                if let Some(message) = &message {
                    print_status(message);
                }
                last = message;
            }
        }
    });

    let outcome = async {
        flow.start_camera().context("unable to access camera")?;
        flow.capture()?;
        flow.update_draft(|draft| {
            draft.name = name;
            draft.student_id = student_id;
            draft.email = email;
            draft.class_section = class_section;
        });
        flow.submit().await?;
        // Keep the success message up until the scheduled stop.
        flow.wait_for_camera_stop().await;
        anyhow::Ok(())
    }
    .await;

    drop(flow);
    let _ = printer.await;
    outcome
}

/// Writes the latest annotated preview frame to a file.
struct FilePreview {
    path: PathBuf,
}

impl PreviewSink for FilePreview {
    fn present(&self, frame: &RgbImage) {
        if let Err(e) = frame.save(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write preview");
        }
    }
}

/// Picks out live log entries that have not been printed yet.
///
/// Entries are keyed by student and timestamp, so a student who drops out of
/// the log and is recognized again gets printed again.
#[derive(Default)]
struct LogPrinter {
    shown: HashSet<(String, DateTime<Utc>)>,
    students: HashSet<String>,
}

impl LogPrinter {
    /// New entries of a most-recent-first log, oldest first.
    fn fresh<'a>(&mut self, log: &'a [RecognitionEvent]) -> Vec<&'a RecognitionEvent> {
        let fresh: Vec<_> = log
            .iter()
            .rev()
            .filter(|event| !self.shown.contains(&log_key(event)))
            .collect();
        // Evicted entries never come back, so only the current log is kept.
        self.shown = log.iter().map(log_key).collect();
        for event in &fresh {
            self.students.insert(event.student_id.clone());
        }
        fresh
    }

    /// Distinct students seen so far.
    fn students(&self) -> usize {
        self.students.len()
    }
}

fn log_key(event: &RecognitionEvent) -> (String, DateTime<Utc>) {
    (event.student_id.clone(), event.timestamp)
}

async fn live(
    client: ApiClient,
    camera: Box<dyn CameraSource>,
    config: &Config,
    class_section: Option<String>,
    duration: Option<Duration>,
    preview: Option<PathBuf>,
) -> Result<()> {
    let base_url = client.base_url().to_string();
    let mut settings = config.live_settings(class_section);
    settings.preview_interval = Duration::from_millis(500);

    let mut live = LiveRecognition::mount(client, camera, settings).await;
    if let Some(path) = preview {
        live = live.with_preview(Arc::new(FilePreview { path }));
    }

    live.start_camera().context("unable to access camera")?;
    match live.start_scanning() {
        Ok(()) => {}
        Err(LiveError::BackendUnavailable) => {
            live.stop_camera();
            bail!("recognition service at {base_url} is unreachable; start the backend and retry");
        }
        Err(e) => return Err(e.into()),
    }
    println!("Scanning class {}... (Ctrl-C to stop)", live.snapshot().class_section);

    let deadline = duration.map(|d| tokio::time::Instant::now() + d);
    let mut printer = LogPrinter::default();
    let mut last_error: Option<String> = None;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                let view = live.snapshot();
                for event in printer.fresh(&view.log) {
                    println!(
                        "{}  {} ({})  confidence {:.1}%",
                        event.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S"),
                        event.name,
                        event.student_id,
                        event.confidence_percent()
                    );
                }
                if view.error != last_error {
                    if let Some(error) = &view.error {
                        eprintln!("warning: {error}");
                    }
                    last_error = view.error;
                }
                if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                    break;
                }
            }
        }
    }

    live.stop_camera();
    println!("{} student(s) recognized", printer.students());
    Ok(())
}
