use anyhow::{Context, Result};
use chromasort::{
    AdvancedClassificationResult, ClassificationEngine, ClassifierConfig, ClassifyPhase,
    DistanceMetric, FeatureWeights, ImageSource, ProgressEvent,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use walkdir::WalkDir;

const HISTORY_FILE: &str = ".history.jsonl";
const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"];

#[derive(Serialize, Deserialize, Debug)]
struct MoveEntry {
    from: String,
    to: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct SortHistoryRecord {
    timestamp: String,
    cluster: String,
    moves: Vec<MoveEntry>,
    action: String, // "moved"
}

#[derive(Parser, Debug)]
#[command(name = "chromasort", version, about = "Sort photos into color-coherent groups")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify images and print the resulting groups
    Classify {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        options: ClassifyOptions,
    },

    /// Classify images and move each group into its own folder
    Sort {
        /// Directory to sort
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Directory to create group folders in (default: `<dir>/sorted`)
        #[arg(long, value_name = "DIR")]
        target_dir: Option<PathBuf>,
        /// Only show what would be moved
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        #[command(flatten)]
        options: ClassifyOptions,
    },

    /// Work with sort history
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },
}

#[derive(Args, Debug)]
struct ClassifyOptions {
    /// JSON config file (overrides the user config file)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Fixed number of groups; skips the automatic search
    #[arg(short = 'k', long, value_name = "K")]
    clusters: Option<usize>,
    #[arg(long, value_name = "N")]
    min_clusters: Option<usize>,
    #[arg(long, value_name = "N")]
    max_clusters: Option<usize>,
    /// intersection, chi-square, bhattacharyya or correlation
    #[arg(long)]
    metric: Option<DistanceMetric>,
    /// Hue, lightness and saturation weights, e.g. `0.4,0.35,0.25`
    #[arg(long, value_name = "H,L,S")]
    weights: Option<FeatureWeights>,
    /// Analysis resolution in pixels
    #[arg(long, value_name = "PX")]
    size: Option<u32>,
    /// Extraction worker threads (default: all cores)
    #[arg(long, value_name = "N")]
    threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List all sort history records
    List {
        /// Directory that was sorted
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Move sorted files back to where they came from
    Restore {
        /// Directory that was sorted
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Restore a specific record index
        #[arg(long, conflicts_with = "all")]
        record: Option<usize>,
        /// Restore all records
        #[arg(long, conflicts_with = "record")]
        all: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("CHROMASORT_LOG")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialise logging")?;

    match cli.command {
        Commands::Classify {
            path,
            json,
            options,
        } => {
            let config = load_config(&options)?;
            println!("▶ Classifying images in: {}", path.display());
            let result = classify_directory(&path, config, None)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
        }

        Commands::Sort {
            path,
            target_dir,
            dry_run,
            yes,
            options,
        } => {
            let config = load_config(&options)?;
            let target = target_dir.unwrap_or_else(|| path.join("sorted"));
            println!("▶ Sorting images in: {}", path.display());
            let result = classify_directory(&path, config, Some(&target))?;
            print_result(&result);

            if result.is_empty() {
                return Ok(());
            }

            if !dry_run && !yes {
                let proceed = Confirm::new()
                    .with_prompt(format!(
                        "Move {} image(s) into {} folder(s) under {}?",
                        result.total_images,
                        result.n_clusters,
                        target.display()
                    ))
                    .default(false)
                    .interact()?;
                if !proceed {
                    println!("Aborted; no files were changed.");
                    return Ok(());
                }
            }

            sort_into_folders(&path, &target, &result, dry_run)?;
        }

        Commands::History { command } => match command {
            HistoryCmd::List { path } => list_history(&path)?,
            HistoryCmd::Restore { path, record, all } => restore_history(&path, record, all)?,
        },
    }

    Ok(())
}

/// Defaults, then the user config file, then `--config`, then individual flags.
fn load_config(options: &ClassifyOptions) -> Result<ClassifierConfig> {
    let mut config = ClassifierConfig::default();

    if let Some(user_config) = dirs::config_dir().map(|d| d.join("chromasort").join("config.json"))
    {
        if user_config.exists() {
            log::debug!("Loading user config from {:?}", user_config);
            config = ClassifierConfig::from_file(&user_config)
                .with_context(|| format!("Failed to load config {:?}", user_config))?;
        }
    }

    if let Some(path) = &options.config {
        config = ClassifierConfig::from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?;
    }

    if let Some(k) = options.clusters {
        config.n_clusters = Some(k);
    }
    if let Some(min) = options.min_clusters {
        config.min_clusters = min;
    }
    if let Some(max) = options.max_clusters {
        config.max_clusters = max;
    }
    if let Some(metric) = options.metric {
        config.metric = metric;
    }
    if let Some(weights) = options.weights {
        config.weights = weights;
    }
    if let Some(size) = options.size {
        config.analysis_size = size;
    }
    if let Some(threads) = options.threads {
        config.worker_threads = Some(threads);
    }

    Ok(config.validated())
}

/// Recursively walk `dir`, returning a Vec of image file paths. `skip` is left out of the walk.
fn scan_directory(dir: &Path, skip: Option<&Path>) -> Result<Vec<PathBuf>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for images…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut images = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| skip.is_none_or(|s| e.path() != s));
    for entry in walker.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_file() {
            if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
                if IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
                    images.push(path.to_path_buf());
                }
            }
        }
        spinner.tick();
    }
    spinner.finish_with_message(format!("Found {} image(s)", images.len()));
    Ok(images)
}

fn classify_directory(
    dir: &Path,
    config: ClassifierConfig,
    skip: Option<&Path>,
) -> Result<AdvancedClassificationResult> {
    let images: Vec<ImageSource> = scan_directory(dir, skip)?
        .into_iter()
        .map(ImageSource::from)
        .collect();

    let bar = ProgressBar::new(images.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let (tx, rx) = mpsc::channel::<ProgressEvent>();
    let reporter = {
        let bar = bar.clone();
        thread::spawn(move || {
            for event in rx {
                match event.phase {
                    ClassifyPhase::Extracting => {
                        bar.set_position(event.processed as u64);
                        let name = Path::new(&event.current)
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or(event.current);
                        bar.set_message(name);
                    }
                    ClassifyPhase::Clustering => bar.set_message("Clustering…"),
                    ClassifyPhase::Naming => bar.set_message("Naming groups…"),
                    ClassifyPhase::Complete => bar.set_message("Done"),
                }
            }
        })
    };

    let engine = ClassificationEngine::new(config).with_progress_sender(tx);
    let result = benchmark("classification", || engine.classify(&images));
    // Dropping the engine closes the progress channel.
    drop(engine);
    let _ = reporter.join();
    bar.finish_and_clear();

    Ok(result?)
}

fn print_result(result: &AdvancedClassificationResult) {
    for excluded in &result.excluded {
        eprintln!("⚠️  Skipped {}: {}", excluded.image_path, excluded.reason);
    }

    if result.is_empty() {
        println!("No images could be classified.");
        return;
    }

    println!(
        "Found {} group(s) across {} image(s) (silhouette {:.3}{}):",
        result.n_clusters,
        result.total_images,
        result.silhouette_score,
        if result.used_fallback { ", fallback partition" } else { "" }
    );
    for cluster in &result.clusters {
        let palette: Vec<&str> = cluster
            .representative
            .dominant_colors
            .iter()
            .map(|c| c.hex.as_str())
            .collect();
        println!("\n✨ {} ({} image(s))", cluster.name, cluster.image_count);
        println!(
            "   🎨 {} → {}",
            cluster.representative.image_path,
            palette.join(" ")
        );
        for image in &cluster.image_paths {
            println!("   ▶ {}", image);
        }
    }
}

fn sort_into_folders(
    root: &Path,
    target: &Path,
    result: &AdvancedClassificationResult,
    dry_run: bool,
) -> Result<()> {
    let history_file = root.join(HISTORY_FILE);
    let mut history_out = if dry_run {
        None
    } else {
        Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&history_file)
                .with_context(|| format!("Failed to open history file {:?}", history_file))?,
        )
    };

    for cluster in &result.clusters {
        let folder = target.join(&cluster.name);
        println!("\n📁 {}", folder.display());
        if !dry_run {
            fs::create_dir_all(&folder)
                .with_context(|| format!("Failed to create directory {:?}", folder))?;
        }

        let mut moves = Vec::new();
        let outcome = move_members(&cluster.image_paths, &folder, dry_run, &mut moves);

        // Files moved before a failure still get a record so they can be restored.
        if let Some(out) = history_out.as_mut() {
            if outcome.is_ok() || !moves.is_empty() {
                let record = SortHistoryRecord {
                    timestamp: Utc::now().to_rfc3339(),
                    cluster: cluster.name.clone(),
                    moves,
                    action: "moved".to_string(),
                };
                writeln!(out, "{}", serde_json::to_string(&record)?)?;
            }
        }
        outcome?;
    }

    if dry_run {
        println!("\n⚠️  Dry-run only; no files were changed.");
    } else {
        println!("\n✅ Recorded sort history in {}", history_file.display());
    }
    Ok(())
}

/// Move `images` into `folder`, appending each completed move to `moves`.
fn move_members(
    images: &[String],
    folder: &Path,
    dry_run: bool,
    moves: &mut Vec<MoveEntry>,
) -> Result<()> {
    for image in images {
        let src = Path::new(image);
        let file_name = src
            .file_name()
            .with_context(|| format!("No file name in {:?}", src))?;
        if dry_run {
            println!("   📦 [dry-run] MOVE {} → {}", src.display(), folder.display());
            continue;
        }

        let dest = unique_destination(folder, Path::new(file_name));
        fs::rename(src, &dest).with_context(|| format!("Failed to move {:?} → {:?}", src, dest))?;
        println!("   📦 Moved {} → {}", src.display(), dest.display());
        moves.push(MoveEntry {
            from: image.clone(),
            to: dest.to_string_lossy().into_owned(),
        });
    }
    Ok(())
}

/// `dir/name`, or `dir/stem_N.ext` with the first free N when that is taken.
fn unique_destination(dir: &Path, name: &Path) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = name.extension().map(|e| e.to_string_lossy().into_owned());
    (1..)
        .map(|n| match &ext {
            Some(ext) => dir.join(format!("{}_{}.{}", stem, n, ext)),
            None => dir.join(format!("{}_{}", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

fn read_history(history_file: &Path) -> Result<Vec<(SortHistoryRecord, String)>> {
    let f = File::open(history_file)
        .with_context(|| format!("Could not open history file {:?}", history_file))?;
    let reader = BufReader::new(f);

    let mut stored = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        match serde_json::from_str::<SortHistoryRecord>(&line) {
            Ok(rec) => stored.push((rec, line)),
            Err(err) => log::warn!("Skipping malformed history entry {}: {}", i, err),
        }
    }
    Ok(stored)
}

fn list_history(root: &Path) -> Result<()> {
    let stored = read_history(&root.join(HISTORY_FILE))?;

    println!("🗂️  Sort History:");
    for (i, (rec, _)) in stored.iter().enumerate() {
        println!(
            "[{}] {}\n     group: {}\n     files: {}\n     action: {}\n",
            i,
            rec.timestamp,
            rec.cluster,
            rec.moves.len(),
            rec.action
        );
    }
    Ok(())
}

fn restore_history(root: &Path, record: Option<usize>, all: bool) -> Result<()> {
    let history_file = root.join(HISTORY_FILE);
    let stored: Vec<(SortHistoryRecord, String)> = read_history(&history_file)?
        .into_iter()
        .filter(|(rec, _)| rec.action == "moved")
        .collect();

    if stored.is_empty() {
        anyhow::bail!("No valid 'moved' history records to restore");
    }

    let restore_indices: Vec<usize> = if all {
        (0..stored.len()).collect()
    } else {
        let idx = record.unwrap_or(stored.len() - 1);
        if idx >= stored.len() {
            anyhow::bail!(
                "Invalid history index {}; valid range is 0..{}",
                idx,
                stored.len() - 1
            );
        }
        vec![idx]
    };

    for &i in &restore_indices {
        let rec = &stored[i].0;
        println!(
            "🔄 Restoring {} files from group {} ({})...",
            rec.moves.len(),
            rec.cluster,
            rec.timestamp
        );
        for entry in &rec.moves {
            let src = Path::new(&entry.to);
            let dest = Path::new(&entry.from);

            if !src.exists() {
                eprintln!("⚠️ Source file {:?} does not exist; skipping", src);
                continue;
            }
            if dest.exists() {
                eprintln!("⚠️ Destination {:?} already exists; skipping", dest);
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
            fs::rename(src, dest)
                .with_context(|| format!("Failed to restore {:?} → {:?}", src, dest))?;
            println!("🔄 Restored {:?} → {:?}", src, dest);

            // Only succeeds once the group folder is empty.
            if let Some(folder) = src.parent() {
                let _ = fs::remove_dir(folder);
            }
        }
    }

    let remaining: Vec<String> = stored
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !restore_indices.contains(i))
        .map(|(_, (_, line))| line)
        .collect();
    let new_content = if remaining.is_empty() {
        String::new()
    } else {
        remaining.join("\n") + "\n"
    };
    fs::write(&history_file, new_content)
        .with_context(|| format!("Failed to update history file {:?}", history_file))?;

    println!(
        "🧹 Updated history, removed {} record(s)",
        restore_indices.len()
    );
    Ok(())
}

/// Run `f()`, log how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
