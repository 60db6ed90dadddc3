use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::path::PathBuf;

mod api;
mod blockchain;
mod config;

use config::{Config, CONFIG_ENV};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::mine_block,
        api::handlers::validate_chain,
        api::handlers::list_wallets,
        api::handlers::create_wallet,
        api::handlers::get_balance,
        api::handlers::tamper_scenario,
        api::handlers::forged_signature_scenario,
        api::handlers::double_spend_scenario
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::AdmissionPolicy,
            blockchain::Transaction,
            blockchain::crypto::Address,
            blockchain::crypto::DigitalSignature,
            blockchain::scenarios::AttackReport,
            api::handlers::ChainResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::MineRequest,
            api::handlers::MineResponse,
            api::handlers::ValidationResponse,
            api::handlers::WalletRequest,
            api::handlers::WalletResponse,
            api::handlers::BalanceResponse,
            api::handlers::TamperRequest,
            api::handlers::ForgedSignatureRequest,
            api::handlers::DoubleSpendRequest
        )
    ),
    tags(
        (name = "ledger", description = "Ledger API endpoints")
    ),
    info(
        title = "Ledger Simulator API",
        version = "0.1.0",
        description = "Signed transfers, proof-of-work blocks and chain audits",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

fn load_config() -> Result<Config, config::ConfigError> {
    let path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    if let Some(path) = &path {
        info!("Loading config from {}", path.display());
    }
    Config::load(path.as_deref())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, err));
        }
    };

    info!(
        "Creating ledger with difficulty {} and mining reward {}",
        config.ledger.difficulty, config.ledger.mining_reward
    );
    let state = web::Data::new(api::AppState::from_config(&config));

    for (name, address) in state.wallet_addresses() {
        info!("Wallet {} has address {}", name, address);
    }
    if let (Some(name), amount) = (&config.ledger.genesis_wallet, config.ledger.genesis_amount) {
        info!("Genesis block funds {} with {}", name, amount);
    }

    let bind = (config.server.host.clone(), config.server.port);
    info!("Starting HTTP server at http://{}:{}", bind.0, bind.1);

    // Start HTTP server
    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(bind)?
    .run()
    .await
}
