use std::process;
use std::sync::Arc;

use tracing_subscriber::{filter::LevelFilter, fmt};

use fichario_app::cli::{AnalyzeArgs, Cli, Commands};
use fichario_app::config;
use fichario_app::error::AppError;
use fichario_app::pdf::extract_text_from_pdf;
use fichario_app::services::{
    AnalyzerInput, DefaultIntakeProvider, DocumentAnalyzer, FICHA_TEMPLATE, GeminiAnalyzer,
    JobStore, UploadStore,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(determine_log_level(&cli));

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt().with_max_level(level).with_target(false).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    match cli.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Some(Commands::Serve(_)) => run_serve().await,
        Some(Commands::Analyze(args)) => run_analyze(args).await,
        None => {
            Cli::print_help();
            Ok(())
        }
    }
}

async fn run_serve() -> Result<(), AppError> {
    let config = config::load()?;
    let uploads = Arc::new(
        UploadStore::open(
            config.storage.upload_dir.clone(),
            config.server.upload.max_file_bytes.get(),
        )
        .await?,
    );
    let analyzer: Arc<dyn DocumentAnalyzer> = Arc::new(GeminiAnalyzer::from_env(
        config.analyzer.model.clone(),
        config.analyzer.api_base.clone(),
    )?);
    tracing::info!(uploads = %uploads.dir().display(), "starting server");
    let provider = DefaultIntakeProvider::new(
        uploads,
        JobStore::new(),
        analyzer,
        config.analyzer.ingestion,
    );

    fichario_server::serve(config.server, Arc::new(provider)).await?;
    Ok(())
}

async fn run_analyze(args: AnalyzeArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let analyzer = GeminiAnalyzer::from_env(config.analyzer.model, config.analyzer.api_base)?;

    let bytes = tokio::fs::read(&args.input)
        .await
        .map_err(|source| AppError::ReadInput {
            path: args.input.clone(),
            source,
        })?;

    let template = match &args.template {
        Some(path) => {
            let template_bytes =
                tokio::fs::read(path)
                    .await
                    .map_err(|source| AppError::ReadInput {
                        path: path.clone(),
                        source,
                    })?;
            Some(extract_text_from_pdf(&template_bytes)?)
        }
        None => None,
    };

    let input = if args.text_layer {
        AnalyzerInput::Text(extract_text_from_pdf(&bytes)?)
    } else {
        AnalyzerInput::PdfBytes(bytes)
    };

    let record = analyzer
        .analyze(input, Some(template.as_deref().unwrap_or(FICHA_TEMPLATE)))
        .await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
