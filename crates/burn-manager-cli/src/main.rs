mod commands;
mod library;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use burn_manager_core::config::{self, non_overlapping_directories};
use burn_manager_core::hasher::{checksummer_for, verify_checksums};
use burn_manager_core::staging::stage_volume;
use burn_manager_core::{
    AppConfig, FolderIngestPipeline, LongRunningProcedure, ResultCode, VolumeId,
};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    let library_path = args
        .library
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.snapshot_path));

    let result = match args.command {
        Some(Commands::Ingest { paths }) => run_ingest(&config, &library_path, paths),
        Some(Commands::Sort {
            capacity,
            cluster,
            group,
        }) => run_sort(&config, &library_path, capacity, cluster, group),
        Some(Commands::Verify) => run_verify(&library_path),
        Some(Commands::Stage {
            volume,
            dest,
            skip_log,
        }) => run_stage(&library_path, volume, &dest, skip_log),
        Some(Commands::MarkBurned { volume }) => run_mark_burned(&library_path, volume),
        Some(Commands::Summary) => run_summary(&library_path),
        Some(Commands::RemoveFile { path }) => run_remove_file(&library_path, &path),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
            Ok(())
        }
        Some(Commands::ClearLibrary) => run_clear(&library_path),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = &result {
        error!("Error: {:#}", err);
    }
    result
}

fn run_ingest(config: &AppConfig, library_path: &Path, paths: Vec<String>) -> anyhow::Result<()> {
    let roots = if paths.is_empty() {
        config.root_paths.clone()
    } else {
        paths
    };
    let roots = non_overlapping_directories(roots);
    if roots.is_empty() {
        bail!("no folders given and no root_paths configured");
    }

    let dataset = Arc::new(library::load(library_path)?);
    let checksummer = checksummer_for(config.hash_type)
        .ok_or_else(|| anyhow!("hash type {:?} has no checksummer", config.hash_type))?;

    let ingest = FolderIngestPipeline::new(dataset.clone(), checksummer)
        .with_ignore_patterns(config.ignore_patterns.as_slice())
        .with_batch_size(config.checksum_batch_size)
        .with_reporter(Arc::new(CliReporter::new()));
    for root in &roots {
        ingest.add_folder_to_queue(root);
    }
    let handle = ingest.start_operation()?;
    ingest.end_when_complete();
    let report = handle.wait()?;

    info!(
        "{} files added, {} already present, {} problems",
        format!("{}", report.files_processed).green(),
        format!("{}", report.files_skipped).yellow(),
        format!("{}", report.failures.len()).red(),
    );
    for failure in &report.failures {
        warn!(
            "{}: {:?} ({})",
            failure.path.as_deref().unwrap_or("<no path>"),
            failure.status,
            failure.reason
        );
    }

    library::save(&dataset, library_path)
}

fn run_sort(
    config: &AppConfig,
    library_path: &Path,
    capacity: Option<u64>,
    cluster: Option<u64>,
    group: bool,
) -> anyhow::Result<()> {
    let capacity = capacity.unwrap_or(config.volume_capacity);
    let cluster = cluster.unwrap_or(config.cluster_size);
    if capacity == 0 || cluster == 0 {
        bail!("capacity and cluster size must be positive");
    }

    let dataset = library::load(library_path)?;
    let unplaceable = dataset.redistribute(cluster, capacity, group)?;

    info!(
        "{} volumes planned",
        format!("{}", dataset.volumes().len()).green()
    );
    for file in &unplaceable {
        warn!(
            "Not placed: {} ({:?} bytes)",
            file.path().unwrap_or_default(),
            file.size()
        );
    }

    library::save(&dataset, library_path)
}

fn run_verify(library_path: &Path) -> anyhow::Result<()> {
    let dataset = library::load(library_path)?;
    let failures = verify_checksums(&dataset.files().files());

    if failures.is_empty() {
        info!("{}", "All checksums match".green());
    } else {
        for failure in &failures {
            warn!(
                "{}: {:?} ({})",
                failure.path.as_deref().unwrap_or("<no path>"),
                failure.status,
                failure.reason
            );
        }
        info!("{} files failed verification", format!("{}", failures.len()).red());
    }

    library::save(&dataset, library_path)
}

fn run_stage(library_path: &Path, volume_id: VolumeId, dest: &Path, skip_log: bool) -> anyhow::Result<()> {
    let dataset = library::load(library_path)?;
    let volume = dataset
        .volumes()
        .find(volume_id)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no volume with id {}", volume_id))?;

    let code = stage_volume(&volume.lock(), dest, skip_log)?;
    match code {
        ResultCode::Successful => info!("{}", format!("Volume {} staged", volume_id).green()),
        ResultCode::FinishedWithErrors => warn!("Volume {} staged with errors", volume_id),
        other => bail!("staging volume {} failed: {}", volume_id, other),
    }

    library::save(&dataset, library_path)
}

fn run_mark_burned(library_path: &Path, volume_id: VolumeId) -> anyhow::Result<()> {
    let dataset = library::load(library_path)?;
    let volume = dataset
        .volumes()
        .find(volume_id)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no volume with id {}", volume_id))?;

    let times = {
        let mut volume = volume.lock();
        volume.mark_burned(Utc::now());
        volume.times_burned()
    };
    info!("Volume {} burned {} time(s)", volume_id, times);

    library::save(&dataset, library_path)
}

fn run_summary(library_path: &Path) -> anyhow::Result<()> {
    let dataset = library::load(library_path)?;
    let files = dataset.files();

    println!(
        "{} files, {} bytes, {} awaiting a burn",
        format!("{}", files.len()).cyan(),
        format!("{}", files.total_size()).cyan(),
        format!("{}", files.pending_files().len()).yellow(),
    );
    for volume in dataset.volumes().handles() {
        let volume = volume.lock();
        println!(
            "  [{}] {:<24} {:>6} files {:>14} / {:>14} bytes, burned {}x",
            volume.id(),
            volume.name,
            volume.len(),
            volume.space_used(),
            volume.capacity(),
            volume.times_burned()
        );
    }
    Ok(())
}

fn run_remove_file(library_path: &Path, path: &str) -> anyhow::Result<()> {
    let dataset = library::load(library_path)?;
    let Some(file) = dataset.files().get(path) else {
        bail!("{} is not in the library", path);
    };
    match dataset.remove_file(&file)? {
        ResultCode::Successful => info!("Removed {}", path),
        other => bail!("removing {} failed: {}", path, other),
    }
    library::save(&dataset, library_path)
}

fn run_clear(library_path: &Path) -> anyhow::Result<()> {
    if !prompt_confirm("Are you SURE you want to delete every file and volume?", Some(false))? {
        return Ok(());
    }
    let dataset = library::load(library_path)?;
    dataset.clear();
    println!("Library cleared");
    library::save(&dataset, library_path)
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
