use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reel_sift::cli::{Cli, Commands, OutputFormat, ProcessArgs};
use reel_sift::config::Config;
use reel_sift::output::{self, ProcessReport, RecordView};
use reel_sift::{utils, AwsTranscriber, ChatClassifier, InstagramExtractor, PostPipeline, RecordStore, ReelError};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `--format json` output stays clean
    let default_filter = if cli.verbose {
        "reel_sift=debug,reelsift=debug"
    } else {
        "reel_sift=info,reelsift=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::load(cli.config.as_deref()).await?;
    if let Some(db) = &cli.db {
        config.store.path = Some(db.clone());
    }

    match cli.command {
        Commands::Process(args) => {
            // Missing tools only matter for some stages, so this stays a warning
            let missing_deps = utils::check_dependencies().await;
            if !missing_deps.is_empty() {
                eprintln!("⚠️  Dependency check warnings:");
                for dep in missing_deps {
                    eprintln!("   • {}", dep);
                }
                eprintln!("   (Continuing anyway - tools may be available)");
            }

            if let Some(language) = &args.language {
                config.aws.language = Some(language.clone());
            }
            // cached stages never reach AWS, so an unset bucket only degrades transcription
            if args.needs_transcriber() {
                if let Err(e) = config.aws.require_bucket() {
                    tracing::warn!(error = %e, "Audio will be recorded as untranscribed");
                }
            }

            let store = RecordStore::open(&config.store_path()?)?;
            let download_dir = args
                .download_dir
                .clone()
                .unwrap_or_else(|| config.media.download_dir.clone());
            let pipeline = PostPipeline::new(
                store,
                Box::new(InstagramExtractor::new(config.media.yt_dlp_path.clone())),
                Box::new(AwsTranscriber::new(config.aws.clone()).await),
                Box::new(ChatClassifier::new(&config.classifier, args.api_key.clone())),
                download_dir,
            );

            let result = process(&pipeline, &args).await;
            pipeline.close()?;
            result?;
        }
        Commands::Show { url, format } => {
            let store = RecordStore::open(&config.store_path()?)?;
            let record = store.get(&url)?;
            store.close()?;

            match record {
                Some(record) => output::print_record(&record, &format)?,
                None => anyhow::bail!("No record stored for {}", url),
            }
        }
        Commands::List { limit } => {
            let store = RecordStore::open(&config.store_path()?)?;
            let records = store.recent(limit)?;
            store.close()?;
            output::print_recent(&records);
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => Config::config_path()?,
                };
                println!("Configuration file: {}", path.display());
                println!("Edit it to set aws.s3_bucket and the classifier settings, or run `reelsift config --show`.");
            }
        }
    }

    Ok(())
}

/// Run the selected stages in order: metadata, audio, download, classification
async fn process(pipeline: &PostPipeline, args: &ProcessArgs) -> Result<()> {
    let text = args.format == OutputFormat::Text;
    let url = args.url.as_str();

    let record = pipeline.ensure_metadata(url, args.force_refresh).await?;
    if text {
        output::print_metadata(&record);
    }

    if args.wants_audio() {
        let record = pipeline.ensure_transcription(url, args.force_refresh).await?;
        if text {
            output::print_audio(&record);
        }
    }

    let mut download = None;
    if args.wants_download() {
        match pipeline.download_media(url).await {
            Ok(media) => {
                if text {
                    output::print_download(&media);
                }
                download = Some(media);
            }
            Err(e) => {
                tracing::warn!(url, error = %format!("{:#}", e), "Media download failed");
                if text {
                    output::print_failure(&format!("Failed to download media: {:#}", e));
                }
            }
        }
    }

    let mut classification = None;
    if args.wants_classification() {
        match pipeline
            .ensure_classification(url, args.force_refresh, args.include_transcription())
            .await
        {
            Ok(Some(result)) => {
                if text {
                    output::print_classification(&result);
                }
                classification = Some(result);
            }
            Ok(None) => {
                if text {
                    output::print_failure("Classifier response could not be parsed, nothing stored");
                }
            }
            Err(e) if matches!(e.downcast_ref::<ReelError>(), Some(ReelError::ClassificationServiceError(_))) => {
                tracing::error!(url, error = %e, "Classification failed");
                if text {
                    output::print_failure(&e.to_string());
                }
            }
            Err(e) => return Err(e),
        }
    }

    if !text {
        let record = pipeline
            .record(url)?
            .ok_or_else(|| anyhow::anyhow!("Record for {} missing after processing", url))?;
        let report = ProcessReport {
            record: RecordView::from(&record),
            transcription: record.transcription(),
            download: download.as_ref(),
            classification: classification.as_ref(),
        };
        println!("{}", output::format_as_json(&report)?);
    }

    Ok(())
}
