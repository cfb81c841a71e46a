use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::MultiProgress;
use std::sync::Arc;
use std::time::Instant;

use idphoto_processor::cli::Args;
use idphoto_processor::identity::resolve_records;
use idphoto_processor::image_processing::batch::{
    effective_workers, submit_batch_with_progress, BatchJob, BatchOptions, BatchProcessor,
    BatchSummary, ProgressEvent,
};
use idphoto_processor::image_processing::face_detection::{
    FaceLocator, FacePolicy, ScriptFaceLocator,
};
use idphoto_processor::image_processing::face_detection_stub::NullFaceLocator;
use idphoto_processor::image_processing::watermark::Watermark;
use idphoto_processor::image_processing::{JobStatus, ProcessingConfig, ProcessingEngine};
use idphoto_processor::json_output::JsonMessage;
use idphoto_processor::matching::{discover_images, match_photos, MatchStrategy};
use idphoto_processor::organizer::OutputLayout;
use idphoto_processor::profile::{ComplianceProfile, ProfileCatalog};
use idphoto_processor::report::{profile_table, BatchReport};
use idphoto_processor::roster::Roster;
use idphoto_processor::utils::{
    create_progress_bar, error_println, format_bytes, format_duration, init_logging,
    validate_inputs, verbose_println, warn_println,
};

/// Human readable warning, or a log line when stdout carries JSON.
fn notice(json: bool, message: &str) {
    if json {
        tracing::warn!("{}", message);
    } else {
        warn_println(message);
    }
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let mut args = Args::parse();
    let config_profiles = args.load_and_merge_config()?;
    init_logging(args.verbose);
    let json = args.json_progress;

    if !json {
        println!("{}", style("ID Photo Processor").bold().blue());
        println!("{}", style("Compliance-sized ID photos from a roster").dim());
        println!();
    }

    let mut catalog = ProfileCatalog::builtin();
    catalog
        .merge(config_profiles)
        .context("Invalid profile definition in config file")?;

    if args.list_profiles {
        println!("{}", style("Available profiles:").bold());
        profile_table(&catalog).printstd();
        return Ok(());
    }

    validate_inputs(&args)?;

    let records_path = args
        .records
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--records is required"))?;
    let roster = Roster::load(&records_path)?;

    if args.list_columns {
        println!(
            "{}",
            style(format!("Columns in {}:", records_path.display())).bold()
        );
        for column in &roster.columns {
            println!("  {}", column);
        }
        println!("  ({} rows)", roster.len());
        return Ok(());
    }

    let options = args.resolver_options();
    let missing = options.missing_columns(&roster.columns);
    if !missing.is_empty() {
        return Err(anyhow::anyhow!(
            "Column(s) not found in {}: {}. Available: {}",
            records_path.display(),
            missing.join(", "),
            roster.columns.join(", ")
        ));
    }
    if args.match_strategy == MatchStrategy::ByColumn && args.match_column.is_none() {
        return Err(anyhow::anyhow!("--match by-column requires --match-column"));
    }

    let profiles = catalog.select(&args.profile_names())?;

    // Resolve identity records
    let resolution = resolve_records(&roster.rows, &options);
    for issue in resolution.warnings() {
        notice(json, &issue.to_string());
    }
    if resolution.has_errors() {
        for issue in resolution.errors() {
            if json {
                tracing::error!("{}", issue);
            } else {
                error_println(&issue.to_string());
            }
        }
        if !args.skip_invalid {
            let report = resolution
                .into_result()
                .err()
                .map(|r| r.to_string())
                .unwrap_or_default();
            return Err(anyhow::anyhow!(
                "{} (use --skip-invalid to leave those rows out)",
                report
            ));
        }
    }
    let records = resolution.records;
    verbose_println(
        args.verbose && !json,
        &format!("Resolved {} identity record(s)", records.len()),
    );

    // Discover and match photos
    let photos_dir = args
        .photos
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--photos is required"))?;
    let photos = discover_images(&photos_dir, &args.parse_extensions())?;
    let matches = match_photos(&records, &photos, args.match_strategy)?;

    for record in &matches.unmatched_records {
        notice(json, &format!("No photo for record '{}' (row {})", record.key, record.row_index));
    }
    for photo in &matches.unmatched_photos {
        notice(json, &format!("No record for photo {}", photo.display()));
    }
    for (record, candidates) in &matches.ambiguous {
        let names: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
        notice(
            json,
            &format!("Record '{}' matches several photos: {}", record.key, names.join(", ")),
        );
    }

    if matches.pairs.is_empty() {
        if json {
            JsonMessage::summary(&BatchSummary::default(), start_time.elapsed().as_secs_f64()).emit();
        } else {
            println!("{}", style("No photo could be matched to a record").red());
        }
        return Ok(());
    }

    // Output layout
    let layout = match &args.run_stamp {
        Some(stamp) => OutputLayout::new(&args.output, stamp.clone(), args.by_class),
        None => OutputLayout::stamped_now(&args.output, args.by_class),
    };
    if !args.dry_run {
        std::fs::create_dir_all(layout.run_dir()).with_context(|| {
            format!("Failed to create output directory: {}", layout.run_dir().display())
        })?;
    } else {
        verbose_println(
            args.verbose && !json,
            "Dry run mode: Skipping output directory creation",
        );
    }

    let locator: Arc<dyn FaceLocator> = match &args.detector {
        Some(program) => Arc::new(ScriptFaceLocator::new(program)?),
        None => {
            notice(
                json,
                "No face detector configured (--detector); every photo uses the centred crop",
            );
            Arc::new(NullFaceLocator)
        }
    };

    let watermark = match &args.watermark {
        Some(text) => Watermark::load(text, args.watermark_font.as_deref())?.map(Arc::new),
        None => None,
    };

    let profiles: Arc<[ComplianceProfile]> = profiles.into();
    let jobs: Vec<BatchJob> = matches
        .pairs
        .into_iter()
        .enumerate()
        .map(|(index, (record, photo))| BatchJob {
            index,
            record,
            photo,
            profiles: profiles.clone(),
        })
        .collect();
    let total = jobs.len();
    let workers = effective_workers(args.jobs, total);

    if args.verbose && !json {
        println!("{}", style("Configuration:").bold());
        println!("  Records: {}", records_path.display());
        println!("  Photos: {}", photos_dir.display());
        println!("  Run directory: {}", layout.run_dir().display());
        println!("  Naming columns: {:?}", options.naming.columns);
        println!("  Separator: {:?}", options.naming.separator);
        println!("  Text case: {}", options.naming.text_case);
        println!("  Match strategy: {}", args.match_strategy);
        for profile in profiles.iter() {
            println!("  Profile {}: {}", profile.name, profile.describe());
        }
        println!("  Face detector: {}", locator.name());
        println!("  Confidence floor: {}", args.confidence);
        if let Some(watermark) = &watermark {
            println!("  Watermark: {:?}", watermark.text());
        }
        println!("  Parallel jobs: {}", workers);
        if args.dry_run {
            println!("  Dry run mode: enabled (simulation only - no files will be created)");
        }
        println!();
    }

    let engine = ProcessingEngine::new(
        ProcessingConfig {
            layout: layout.clone(),
            face_policy: FacePolicy {
                confidence_floor: args.confidence,
            },
            copy_originals: args.copy_originals,
            debug_overlays: args.debug,
            dry_run: args.dry_run,
            watermark,
        },
        locator,
    );

    // Progress reporting
    let processor = Arc::new(BatchProcessor::new(total));
    let multi_progress = MultiProgress::new();
    let main_progress = if json {
        None
    } else {
        let pb = multi_progress.add(create_progress_bar(total as u64));
        pb.set_message("Processing photos");
        Some(pb)
    };

    let callback_processor = processor.clone();
    let callback_progress = main_progress.clone();
    let on_progress = move |event: &ProgressEvent| {
        callback_processor.increment();
        if json {
            JsonMessage::progress(
                event.completed,
                event.total,
                event.outcome.record_key.clone(),
                callback_processor.eta(),
            );
            if let Some(message) = JsonMessage::for_outcome(&event.outcome) {
                message.emit();
            }
        } else if let Some(pb) = &callback_progress {
            pb.set_position(event.completed as u64);
            match callback_processor.eta() {
                Some(eta) if event.completed < event.total => pb.set_message(format!(
                    "{} (~{} left)",
                    event.outcome.record_key,
                    format_duration(eta)
                )),
                _ => pb.set_message(event.outcome.record_key.clone()),
            }
        }
    };

    let handle = submit_batch_with_progress(
        Arc::new(engine),
        jobs,
        BatchOptions {
            workers,
            cancellation: None,
        },
        Box::new(on_progress),
    )
    .context("Failed to start the batch")?;
    let outcomes = handle.await_results();

    if let Some(pb) = &main_progress {
        pb.finish_with_message("✓ Processing complete!");
    }

    let summary = BatchSummary::from_outcomes(&outcomes);
    let total_time = start_time.elapsed();

    if json {
        JsonMessage::summary(&summary, total_time.as_secs_f64()).emit();
        return Ok(());
    }

    println!();
    let header = if args.dry_run {
        style("Dry Run Results Summary:").bold().cyan()
    } else {
        style("Results Summary:").bold().green()
    };
    println!("{}", header);

    let processed_label = if args.dry_run {
        "Would be written"
    } else {
        "Written"
    };
    println!(
        "  {}: {} of {} outputs",
        processed_label,
        style(summary.succeeded()).bold().green(),
        summary.results
    );
    let fallback = summary.count(JobStatus::FaceNotFoundFallback);
    if fallback > 0 {
        println!(
            "  Centred fallback (check manually): {}",
            style(fallback).bold().yellow()
        );
    }
    if summary.failed() > 0 {
        println!("  Failed: {}", style(summary.failed()).bold().red());
        for status in JobStatus::ALL {
            let count = summary.count(status);
            if count > 0 && !status.is_success() && status != JobStatus::Cancelled {
                println!("    {}: {}", status, count);
            }
        }
    }
    if summary.originals_copied > 0 {
        println!("  Originals copied: {}", summary.originals_copied);
    }
    if !args.dry_run {
        println!("  Bytes written: {}", format_bytes(summary.bytes_written));
        println!("  Output: {}", style(layout.run_dir().display()).cyan());
    }
    println!();
    println!(
        "  Total time: {} ({:.1} photos/s)",
        style(format_duration(total_time)).bold(),
        processor.items_per_second()
    );
    println!("  Success rate: {:.1}%", summary.success_rate());

    if args.report {
        BatchReport::from_outcomes(&outcomes, Some(layout.root.as_path())).print();
    }

    Ok(())
}
