use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::application::{TableExportUseCase, TableImportUseCase, TemplateUseCase};
use crate::domain::error::Result;
use crate::infrastructure::codecs::TableCodecRegistry;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::db::exchange::repository::ExchangeRepository;
use crate::interfaces::http::{start_server, HttpState};

/// `RUST_LOG` wins over the configured level when set.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Open the database, wire the use cases and serve HTTP until shutdown.
pub async fn serve(config: AppConfig) -> Result<()> {
    let repository = Arc::new(ExchangeRepository::connect(&config.database).await?);
    info!(path = %config.database.path.display(), "Exchange database ready");

    let codecs = Arc::new(TableCodecRegistry::with_default_codecs());
    let state = HttpState {
        templates: TemplateUseCase::new(Arc::clone(&repository)),
        imports: TableImportUseCase::new(
            Arc::clone(&repository),
            Arc::clone(&codecs),
            config.import.max_upload_bytes,
        ),
        exports: TableExportUseCase::new(repository, codecs),
    };

    if config.auth.tokens.is_empty() && !config.auth.allow_anonymous {
        warn!("No API tokens configured and anonymous access is off; API requests will be rejected");
    }

    start_server(state, &config)?.await?;
    Ok(())
}

pub fn run() {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config.log_level);

    if let Err(e) = actix_web::rt::System::new().block_on(serve(config)) {
        error!(error = %e, "Server stopped");
        std::process::exit(1);
    }
}
