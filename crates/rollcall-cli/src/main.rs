use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rollcall_core::enroll::enroll_images;
use rollcall_core::image_io;
use rollcall_core::{
    AttendanceReport, AttendanceService, AttendanceStore, CascadeDetector, OnnxEmbedder, Reconciler,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod store;

use config::Config;
use store::JsonStore;

#[derive(Parser)]
#[command(name = "rollcall", about = "Classroom attendance from a single photo")]
struct Cli {
    /// Config file (default: $ROLLCALL_CONFIG, then $XDG_CONFIG_HOME/rollcall/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student from up to five reference photos
    Enroll {
        /// Student identifier
        #[arg(long)]
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Course to enroll the student in (repeatable)
        #[arg(long = "course")]
        courses: Vec<String>,
        /// Reference photos
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Take attendance for a course from a classroom photo
    Process {
        #[arg(long)]
        course: String,
        image: PathBuf,
        /// Write the annotated image and unrecognized crops here
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Persist the attendance record
        #[arg(long)]
        submit: bool,
    },
    /// Show stored attendance records, newest first
    History {
        #[arg(long)]
        course: Option<String>,
        /// Calendar date (UTC), YYYY-MM-DD
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show resolved configuration and model status
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll { id, name, courses, images } => enroll(&config, &id, &name, &courses, &images),
        Commands::Process { course, image, out_dir, submit } => {
            process(&config, &course, &image, out_dir.as_deref(), submit)
        }
        Commands::History { course, date } => history(&config, course.as_deref(), date),
        Commands::Status => status(&config),
    }
}

fn open_store(config: &Config) -> Result<JsonStore> {
    JsonStore::open(&config.enrollment_path(), &config.attendance_path())
        .with_context(|| format!("opening store in {}", config.data_dir.display()))
}

fn load_detector(config: &Config) -> Result<CascadeDetector> {
    let path = config.cascade_path();
    CascadeDetector::load(&path, config.detector.clone())
        .with_context(|| format!("loading face cascade {}", path.display()))
}

fn load_embedder(config: &Config) -> Result<OnnxEmbedder> {
    let path = config.embedding_model_path();
    OnnxEmbedder::load(&path, config.embedder.clone())
        .with_context(|| format!("loading embedding model {}", path.display()))
}

fn enroll(config: &Config, id: &str, name: &str, courses: &[String], paths: &[PathBuf]) -> Result<()> {
    let images = paths
        .iter()
        .map(|p| {
            let bytes = std::fs::read(p).with_context(|| format!("reading {}", p.display()))?;
            Ok((p.display().to_string(), bytes))
        })
        .collect::<Result<Vec<_>>>()?;

    let detector = load_detector(config)?;
    let embedder = load_embedder(config)?;
    let batch = enroll_images(&detector, &embedder, &images)?;

    let mut store = open_store(config)?;
    let enrollment = store.enrollment_mut();
    enrollment.add_student(id, name);
    enrollment.add_signatures(id, batch.signatures.clone())?;
    for course in courses {
        enrollment.enroll(course, id)?;
    }
    store.save()?;

    tracing::info!(identity = id, signatures = batch.signatures.len(), "student enrolled");
    println!(
        "Enrolled {name} ({id}) with {} signature(s){}",
        batch.signatures.len(),
        if courses.is_empty() {
            String::new()
        } else {
            format!(" in {}", courses.join(", "))
        }
    );
    for warning in &batch.warnings {
        println!("warning: {warning}");
    }
    Ok(())
}

fn process(config: &Config, course: &str, image: &Path, out_dir: Option<&Path>, submit: bool) -> Result<()> {
    let bytes = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;

    let reconciler = Reconciler::new(Arc::new(load_detector(config)?), Arc::new(load_embedder(config)?))
        .with_annotation(config.annotation.clone());
    let mut service = AttendanceService::new(
        open_store(config)?,
        reconciler,
        config.recognition.similarity_threshold,
    );

    let outcome = service.reconcile(course, &bytes)?;
    let timestamp = Utc::now();
    let report = AttendanceReport::from_outcome(course, timestamp, &outcome)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        std::fs::write(dir.join("annotated.jpg"), image_io::encode_jpeg(&outcome.annotated_image)?)?;
        for (i, crop) in outcome.unrecognized.iter().enumerate() {
            std::fs::write(dir.join(format!("unrecognized_{i}.jpg")), image_io::encode_jpeg(crop)?)?;
        }
        tracing::info!(dir = %dir.display(), "review images written");
    }

    if submit {
        service.submit(outcome.to_record(course, timestamp))?;
        eprintln!("Attendance recorded for {course}");
    }
    Ok(())
}

fn history(config: &Config, course: Option<&str>, date: Option<NaiveDate>) -> Result<()> {
    let store = open_store(config)?;
    let records = store.attendance_history(course, date)?;
    if records.is_empty() {
        println!("No attendance records");
        return Ok(());
    }
    for record in &records {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);

    let store = open_store(config)?;
    let enrollment = store.enrollment();
    println!(
        "store: {} student(s), {} course(s)",
        enrollment.student_count(),
        enrollment.course_ids().count()
    );

    match load_detector(config) {
        Ok(_) => println!("cascade: ok ({})", config.cascade_path().display()),
        Err(e) => println!("cascade: {e:#}"),
    }
    match load_embedder(config) {
        Ok(_) => println!("embedder: ok ({})", config.embedding_model_path().display()),
        Err(e) => println!("embedder: {e:#}"),
    }
    Ok(())
}
