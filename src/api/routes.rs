use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
            .route("/transactions/new", web::post().to(handlers::new_transaction))
            .route("/mine", web::post().to(handlers::mine_block))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/wallets", web::get().to(handlers::list_wallets))
            .route("/wallets", web::post().to(handlers::create_wallet))
            .route("/balance/{address}", web::get().to(handlers::get_balance))
            .service(
                web::scope("/scenarios")
                    .route("/tamper", web::post().to(handlers::tamper_scenario))
                    .route("/forged-signature", web::post().to(handlers::forged_signature_scenario))
                    .route("/double-spend", web::post().to(handlers::double_spend_scenario)),
            ),
    );
}
