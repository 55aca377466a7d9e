use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use visiontag_core::{
    cache::ResultCache, labels, security::parse_api_keys, AuthService, DetectionOptions,
    DetectionService, DetectionServiceProvider, DetectorBuilder, InferenceGate, ObjectDetector,
    ProviderConfig, RequestContext, SlidingWindowRateLimiter, StubDetector, TelemetryStore,
};

use visiontag_server::api::{self, AppState};
use visiontag_server::config::Settings;
use visiontag_server::logging;
use visiontag_server::shutdown::shutdown_signal;

#[derive(Parser)]
#[command(name = "visiontag-server", about = "Object tagging HTTP API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Path to a TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Path to the detector model weights
        #[arg(long)]
        model: Option<String>,

        /// Require an API key on every detect call
        #[arg(long)]
        auth_required: bool,

        /// Sliding-window rate limit per identity, per minute
        #[arg(long)]
        rate_limit: Option<usize>,

        /// Result cache TTL in seconds (0 disables caching)
        #[arg(long)]
        cache_ttl: Option<u64>,

        /// Result cache capacity
        #[arg(long)]
        cache_max_items: Option<usize>,

        /// Concurrent inference permit count
        #[arg(long)]
        max_concurrent_inference: Option<usize>,

        /// Per-call inference deadline in seconds
        #[arg(long)]
        inference_timeout: Option<u64>,

        /// Log level when RUST_LOG is unset
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Run detection on a local image file
    Detect {
        /// Image file to analyze
        image: PathBuf,

        /// Minimum confidence threshold
        #[arg(long, default_value_t = 0.7)]
        conf: f32,

        /// Maximum number of tags
        #[arg(long, default_value_t = 5)]
        max_tags: usize,

        /// Minimum bounding-box area as a fraction of the image area
        #[arg(long, default_value_t = 0.01)]
        min_area: f32,

        /// Allow "person" detections through
        #[arg(long)]
        include_person: bool,

        /// Print the full result as JSON instead of one tag per line
        #[arg(long)]
        json: bool,
    },

    /// Print the label catalog
    Labels,
}

/// Builder for the bundled fixture backend.
///
/// The repository treats the detection model as an external capability;
/// deployments wire a real one by implementing `ObjectDetector` +
/// `DetectorBuilder` and swapping this out here.
struct StubBackendBuilder {
    model_path: String,
}

impl DetectorBuilder for StubBackendBuilder {
    fn build(&self) -> Result<Arc<dyn ObjectDetector>, visiontag_core::DetectError> {
        tracing::warn!(
            model_path = %self.model_path,
            "no model backend compiled in; serving the stub backend"
        );
        Ok(Arc::new(StubDetector::new(Vec::new())))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            host,
            port,
            config,
            model,
            auth_required,
            rate_limit,
            cache_ttl,
            cache_max_items,
            max_concurrent_inference,
            inference_timeout,
            log_level,
        } => {
            let mut settings = Settings::load(config.as_deref())?;
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            if let Some(model) = model {
                settings.model_path = model;
            }
            if auth_required {
                settings.auth_required = true;
            }
            if let Some(rate_limit) = rate_limit {
                settings.rate_limit_per_minute = rate_limit;
            }
            if let Some(cache_ttl) = cache_ttl {
                settings.cache_ttl_seconds = cache_ttl;
            }
            if let Some(cache_max_items) = cache_max_items {
                settings.cache_max_items = cache_max_items;
            }
            if let Some(max_concurrent_inference) = max_concurrent_inference {
                settings.max_concurrent_inference = max_concurrent_inference;
            }
            if let Some(inference_timeout) = inference_timeout {
                settings.inference_timeout_seconds = inference_timeout;
            }
            if let Some(log_level) = log_level {
                settings.log_level = log_level.to_lowercase();
            }
            settings.clamp();
            run_serve(settings).await
        }
        Command::Detect {
            image,
            conf,
            max_tags,
            min_area,
            include_person,
            json,
        } => run_detect_file(image, conf, max_tags, min_area, include_person, json),
        Command::Labels => {
            for label in labels::catalog() {
                println!("{label}");
            }
            Ok(())
        }
    }
}

async fn run_serve(settings: Settings) -> anyhow::Result<()> {
    logging::init(&settings.log_level);

    let settings = Arc::new(settings);
    let telemetry = Arc::new(TelemetryStore::new(settings.recent_capacity));
    let api_keys = parse_api_keys(settings.api_keys.as_deref(), &settings.default_api_key);
    let auth = Arc::new(AuthService::new(settings.auth_required, &api_keys));
    let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(
        settings.rate_limit_per_minute,
        Duration::from_secs(60),
    ));
    let provider = Arc::new(DetectionServiceProvider::new(
        Arc::new(StubBackendBuilder {
            model_path: settings.model_path.clone(),
        }),
        ProviderConfig {
            max_dimension: settings.max_dimension,
            cache_max_items: settings.cache_max_items,
            cache_ttl: settings.cache_ttl(),
        },
        telemetry.clone(),
    ));
    let gate = Arc::new(InferenceGate::new(
        settings.max_concurrent_inference,
        settings.inference_timeout(),
    ));

    let state = AppState::new(
        settings.clone(),
        telemetry,
        auth,
        rate_limiter,
        provider,
        gate,
    );
    let app = api::create_router(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        version = Settings::version(),
        auth_required = settings.auth_required,
        rate_limit_per_minute = settings.rate_limit_per_minute,
        cache_ttl_seconds = settings.cache_ttl_seconds,
        "VisionTag serving on http://{addr}"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("VisionTag shutdown complete");
    Ok(())
}

fn run_detect_file(
    image: PathBuf,
    conf: f32,
    max_tags: usize,
    min_area: f32,
    include_person: bool,
    json: bool,
) -> anyhow::Result<()> {
    let payload = std::fs::read(&image)
        .map_err(|e| anyhow::anyhow!("could not read {}: {e}", image.display()))?;

    let options = DetectionOptions {
        confidence: conf,
        max_tags,
        min_area_ratio: min_area,
        include_person,
        ..DetectionOptions::default()
    }
    .normalized();

    // One-shot run: no cache, no gate, fixture backend.
    let telemetry = Arc::new(TelemetryStore::new(10));
    let service = DetectionService::new(
        Arc::new(StubDetector::new(Vec::new())),
        ResultCache::new(16, Duration::ZERO),
        telemetry,
        1280,
    );
    let ctx = RequestContext {
        source: "cli".to_string(),
        principal_id: "cli".to_string(),
        request_id: "cli".to_string(),
    };
    let result = service.detect(&payload, &options, &ctx)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.tags.is_empty() {
        println!("no tags");
    } else {
        for tag in &result.tags {
            println!("{tag}");
        }
    }
    Ok(())
}
