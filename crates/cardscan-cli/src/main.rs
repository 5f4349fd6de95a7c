use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cardscan_core::localize::CardLocalizer;
use cardscan_core::ocr::TextEngine;
use cardscan_core::{
    matcher, CardFields, CardReader, EuclideanMatcher, ExtractionConfig, Matcher,
    OnnxFaceBackend, TesseractCli,
};
use clap::{Parser, Subcommand};
use image::DynamicImage;
use tracing_subscriber::EnvFilter;

mod config;
mod corpus;

use config::Config;
use corpus::CorpusStore;

#[derive(Parser)]
#[command(name = "cardscan", about = "Student ID card reader and face search")]
struct Cli {
    /// Extraction tunables (TOML); overrides CARDSCAN_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a card photo and print the parsed record as JSON
    Extract {
        image: PathBuf,
        /// Save the cropped portrait here
        #[arg(long)]
        portrait: Option<PathBuf>,
        /// Write the face embedding blob here
        #[arg(long)]
        embedding_out: Option<PathBuf>,
        /// Add the face embedding to the corpus
        #[arg(long)]
        enroll: bool,
        /// Corpus label (defaults to the parsed name, then the ID number)
        #[arg(long)]
        label: Option<String>,
    },
    /// Search the corpus for the face in a photo
    Search {
        image: PathBuf,
        #[arg(long)]
        tolerance: Option<f32>,
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Compare the faces in two photos
    Compare { a: PathBuf, b: PathBuf },
    /// Print the best transcription of a card photo
    Ocr { image: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let config_path = cli.config.as_ref().or(config.extraction_config.as_ref());
    let extraction = match config_path {
        Some(path) => ExtractionConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ExtractionConfig::default(),
    };

    match cli.command {
        Commands::Extract {
            image,
            portrait,
            embedding_out,
            enroll,
            label,
        } => {
            let mut reader = card_reader(&config, extraction)?;
            let record = reader.extract(&open_image(&image)?)?;

            println!("{}", serde_json::to_string_pretty(&record)?);
            println!("fields: {}/{}", record.fields_recovered(), CardFields::TOTAL);

            if let Some(path) = portrait {
                match &record.portrait {
                    Some(p) => {
                        p.image
                            .save(&path)
                            .with_context(|| format!("saving portrait {}", path.display()))?;
                        println!("portrait: {}", path.display());
                    }
                    None => println!("portrait: no face found"),
                }
            }

            if embedding_out.is_some() || enroll {
                let Some(embedding) = record.face_embedding.clone() else {
                    anyhow::bail!("no face embedding could be computed for {}", image.display());
                };
                if let Some(path) = embedding_out {
                    std::fs::write(&path, embedding.to_blob())
                        .with_context(|| format!("writing embedding {}", path.display()))?;
                    println!("embedding: {}", path.display());
                }
                if enroll {
                    let label = label
                        .or_else(|| record.fields.full_name.clone())
                        .or_else(|| record.fields.id_number.clone())
                        .unwrap_or_else(|| "unknown".to_string());
                    let store = CorpusStore::new(config.corpus_path.clone());
                    let id = store.enroll(&label, embedding)?;
                    println!("enrolled {label} as {id} in {}", store.path().display());
                }
            }
        }
        Commands::Search {
            image,
            tolerance,
            max_results,
        } => {
            let mut policy = extraction.matching.clone();
            if let Some(t) = tolerance {
                policy.tolerance = t;
            }
            if let Some(n) = max_results {
                policy.max_results = n;
            }

            let mut reader = card_reader(&config, extraction)?;
            let query = reader.embed(&open_image(&image)?)?;
            if query.is_none() {
                println!("no face found in {}", image.display());
                return Ok(());
            }

            let corpus = CorpusStore::new(config.corpus_path.clone()).load()?;
            let results = EuclideanMatcher::new(policy).rank(query.as_ref(), &corpus);
            if results.is_empty() {
                println!("no plausible match among {} enrolled faces", corpus.len());
            }
            for (rank, result) in results.iter().enumerate() {
                println!(
                    "{}. {} ({}) distance={:.4} similarity={:.2}% {}",
                    rank + 1,
                    result.label,
                    result.record_id,
                    result.distance,
                    result.similarity_percent(),
                    if result.is_match { "match" } else { "near-match" }
                );
            }
        }
        Commands::Compare { a, b } => {
            let tolerance = extraction.matching.tolerance;
            let mut reader = card_reader(&config, extraction)?;
            let first = reader
                .embed(&open_image(&a)?)?
                .with_context(|| format!("no face found in {}", a.display()))?;
            let second = reader
                .embed(&open_image(&b)?)?
                .with_context(|| format!("no face found in {}", b.display()))?;

            let distance = first.euclidean_distance(&second)?;
            println!("distance: {distance:.4}");
            println!("match: {}", distance <= tolerance);
            println!("similarity: {:.2}%", matcher::similarity_percent(distance));
        }
        Commands::Ocr { image } => {
            let image = open_image(&image)?;
            let located = CardLocalizer::new(extraction.localizer.clone()).localize(&image)?;
            let engine = TextEngine::new(Box::new(text_backend(&config)), extraction.ocr.clone());
            let best = engine.acquire(&located.card)?;
            println!(
                "variant: {} mode: {} score: {} rectified: {}",
                best.variant, best.mode, best.score, located.success
            );
            println!("{}", best.text);
        }
    }

    Ok(())
}

fn text_backend(config: &Config) -> TesseractCli {
    let backend = TesseractCli::new(config.tesseract.clone());
    match &config.tessdata {
        Some(dir) => backend.with_tessdata(dir.clone()),
        None => backend,
    }
}

fn card_reader(config: &Config, extraction: ExtractionConfig) -> Result<CardReader> {
    let faces = OnnxFaceBackend::load(&config.detector_model_path(), &config.recognizer_model_path())
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    tracing::info!(model_dir = %config.model_dir.display(), "face models loaded");
    Ok(CardReader::new(
        extraction,
        Box::new(text_backend(config)),
        Box::new(faces),
    ))
}

fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("opening image {}", path.display()))
}
