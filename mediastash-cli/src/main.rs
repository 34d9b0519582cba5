use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use mediastash::{
    DownloadRequest, Error, Library, RepairRequest, Result, StashConfig, StashEvent,
    SubtitleSource,
};
use tracing::{error, info, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "mediastash", about = "Offline media library manager", version)]
struct Args {
    /// Library root directory.
    #[arg(long, default_value = "./library", global = true)]
    root: PathBuf,

    /// Path to the ffmpeg binary.
    #[arg(long, global = true)]
    ffmpeg: Option<String>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one episode into the library.
    Download {
        /// Unique episode id, e.g. "show-s01e03".
        episode_id: String,
        /// Stream URL to hand to the transcoder.
        url: String,
        /// Collection display name; forms the directory name.
        #[arg(long)]
        collection: String,
        /// Episode number within the collection.
        #[arg(long, default_value_t = 1)]
        number: u32,
        /// Extra HTTP header, "Name: Value". Repeatable.
        #[arg(long = "header")]
        headers: Vec<String>,
        /// Poster image URL.
        #[arg(long)]
        poster_url: Option<String>,
        /// Subtitle source, "lang=url". Repeatable.
        #[arg(long = "subtitle")]
        subtitles: Vec<String>,
    },
    /// List collections and their manifest state.
    List {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Register on-disk media missing from manifests.
    Reconcile,
    /// Fill poster and subtitle gaps in one collection.
    Repair {
        /// Collection display name.
        collection: String,
        #[arg(long)]
        poster_url: Option<String>,
        /// Subtitle source, "lang=url". Repeatable.
        #[arg(long = "subtitle")]
        subtitles: Vec<String>,
    },
    /// Delete a collection and everything in it.
    Delete {
        /// Collection display name.
        collection: String,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = StashConfig::default();
    if let Some(ffmpeg) = args.ffmpeg {
        config.ffmpeg_path = ffmpeg;
    }
    let library = Library::new(args.root, config)?;

    match args.command {
        Commands::Download {
            episode_id,
            url,
            collection,
            number,
            headers,
            poster_url,
            subtitles,
        } => {
            let request = DownloadRequest {
                episode_id: episode_id.clone(),
                collection: collection.clone(),
                episode_number: number,
                url,
                headers: parse_headers(&headers)?,
                poster_url,
                subtitles: parse_subtitles(&subtitles)?,
            };
            download(&library, request, &collection).await
        }
        Commands::List { json } => list(&library, json).await,
        Commands::Reconcile => {
            let report = library.reconcile().await?;
            println!(
                "registered {} new episode(s) across {} collection(s)",
                report.newly_registered,
                report.collections.len()
            );
            for c in &report.collections {
                println!("  {}: {} media file(s), {} new", c.name, c.episodes, c.newly_added);
            }
            Ok(())
        }
        Commands::Repair {
            collection,
            poster_url,
            subtitles,
        } => {
            let report = library
                .repair(&RepairRequest {
                    collection_dir: library.collection_dir(&collection),
                    poster_url,
                    subtitles: parse_subtitles(&subtitles)?,
                    display_name: Some(collection),
                })
                .await?;
            println!(
                "poster fixed: {}, subtitles added: {}, manifest updated: {}",
                report.poster_fixed, report.subtitles_added, report.manifest_updated
            );
            Ok(())
        }
        Commands::Delete { collection } => {
            library.delete_collection(&collection).await?;
            println!("deleted '{collection}'");
            Ok(())
        }
    }
}

/// Run one download to completion, printing progress. Ctrl-C cancels and
/// cleans up.
async fn download(library: &Library, request: DownloadRequest, collection: &str) -> Result<()> {
    // Subscribe before submitting so no event is missed.
    let mut events = library.subscribe();
    let episode_id = request.episode_id.clone();
    library.download(request).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, cancelling");
                library.cancel(&episode_id, Some(collection)).await?;
            }
            event = events.recv() => {
                let Ok(event) = event else {
                    return Err(Error::ProcessFailure("event stream closed".into()));
                };
                if event.episode_id() != episode_id {
                    continue;
                }
                match event {
                    StashEvent::Started { .. } => println!("started"),
                    StashEvent::Progress { sample, .. } => println!(
                        "{:>3}%  {}  eta {}  ({})",
                        sample.percent, sample.speed, sample.eta, sample.downloaded
                    ),
                    StashEvent::Completed { path, size, .. } => {
                        println!("done: {} ({size} bytes)", path.display());
                        return Ok(());
                    }
                    StashEvent::Failed { error, .. } => {
                        return Err(Error::ProcessFailure(error));
                    }
                    StashEvent::Cancelled { .. } => {
                        println!("cancelled");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn list(library: &Library, json: bool) -> Result<()> {
    let collections = library.list().await?;
    if json {
        let value: Vec<_> = collections
            .iter()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "dir": c.dir,
                    "episodes": c.episodes,
                    "playable_episodes": c.playable_episodes,
                    "has_poster": c.has_poster,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    if collections.is_empty() {
        println!("library is empty");
        return Ok(());
    }
    for c in collections {
        println!(
            "{}  ({}/{} playable{})",
            c.name,
            c.playable_episodes,
            c.episodes,
            if c.has_poster { ", poster" } else { "" }
        );
    }
    Ok(())
}

/// Parse repeated "Name: Value" header flags.
fn parse_headers(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|h| {
            h.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| Error::config(format!("invalid header '{h}', expected 'Name: Value'")))
        })
        .collect()
}

/// Parse repeated "lang=url" subtitle flags.
fn parse_subtitles(raw: &[String]) -> Result<Vec<SubtitleSource>> {
    raw.iter()
        .map(|s| {
            s.split_once('=')
                .map(|(lang, url)| SubtitleSource {
                    url: url.trim().to_string(),
                    lang: lang.trim().to_string(),
                    label: None,
                })
                .ok_or_else(|| Error::config(format!("invalid subtitle '{s}', expected 'lang=url'")))
        })
        .collect()
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
