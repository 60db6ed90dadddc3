use actix_web::{web, HttpResponse};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use std::time::Duration;

use super::error::ApiError;
use super::state::AppState;
use crate::blockchain::scenarios;
use crate::blockchain::{Address, AdmissionPolicy, Block, Transaction};

/// Shared service state
pub type AppData = web::Data<AppState>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// Leading zero hex digits required of each block hash
    pub difficulty: usize,

    /// Amount credited to the miner of each block
    pub mining_reward: f64,

    /// Everything issued by coinbase transactions so far
    pub issued_supply: f64,

    /// Balance check applied to new transfers
    pub admission_policy: AdmissionPolicy,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain passes the audit
    pub is_valid: bool,

    /// First audit failure, if any
    pub audit_error: Option<String>,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// Name of the wallet that signs the transfer
    pub sender: String,

    /// Wallet name or address of the recipient
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,

    /// Size of the pending pool after admission
    pub pending: usize,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// Wallet name or address credited with the reward
    pub miner: String,

    /// Give up after this many milliseconds
    pub timeout_ms: Option<u64>,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block, absent when there was nothing to mine
    pub block: Option<Block>,
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub valid: bool,
    pub error: Option<String>,
}

/// Request for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletRequest {
    pub name: String,
}

/// A named wallet and its confirmed balance
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    pub name: String,
    pub address: String,
    pub balance: f64,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: f64,
}

/// Request for the tamper scenario
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TamperRequest {
    pub block_index: usize,
    pub tx_index: usize,
    /// Fraudulent amount written into the transaction
    pub amount: f64,
    /// Also recompute the tampered block's hash
    #[serde(default)]
    pub rehash: bool,
}

/// Request for the forged signature scenario
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ForgedSignatureRequest {
    /// Wallet whose signature is stolen
    pub victim: String,
    /// Recipient of the legitimate transfer
    pub recipient: String,
    /// Recipient of the forged transfer
    pub thief: String,
    pub amount: f64,
}

/// Request for the double spend scenario
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DoubleSpendRequest {
    /// Wallet that signs both transfers
    pub spender: String,
    pub first_recipient: String,
    pub second_recipient: String,
    /// Credited when the admitted transfers are mined
    pub miner: String,
    /// Give up mining after this many milliseconds
    pub timeout_ms: Option<u64>,
}

/// Request timeout, falling back to the configured one
fn mining_timeout(state: &AppState, timeout_ms: Option<u64>) -> Option<Duration> {
    timeout_ms.map(Duration::from_millis).or_else(|| state.mining_timeout())
}

/// Cancels `token` once `timeout` elapses
fn cancel_after(timeout: Option<Duration>, token: &CancellationToken) -> Option<JoinHandle<()>> {
    timeout.map(|timeout| {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel();
        })
    })
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its audit status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(state: AppData) -> Result<HttpResponse, ApiError> {
    let ledger = state.ledger();
    let audit = ledger.is_chain_valid();

    let response = ChainResponse {
        length: ledger.chain().len(),
        difficulty: ledger.difficulty(),
        mining_reward: ledger.mining_reward(),
        issued_supply: ledger.issued_supply(),
        admission_policy: ledger.admission_policy(),
        chain: ledger.chain().to_vec(),
        is_valid: audit.is_ok(),
        audit_error: audit.err().map(|err| err.to_string()),
    };

    Ok(HttpResponse::Ok().json(response))
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(state: AppData) -> Result<HttpResponse, ApiError> {
    let transactions = state.ledger().pending_transactions().to_vec();
    Ok(HttpResponse::Ok().json(transactions))
}

/// Create a new transaction
///
/// Signs a transfer with the named wallet and submits it to the pending pool
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction admitted", body = TransactionResponse),
        (status = 400, description = "Transaction rejected"),
        (status = 404, description = "Unknown sender wallet")
    )
)]
pub async fn new_transaction(
    state: AppData,
    transaction_req: web::Json<TransactionRequest>,
) -> Result<HttpResponse, ApiError> {
    let wallet = state.wallet(&transaction_req.sender)?;
    let recipient = state.resolve_address(&transaction_req.recipient)?;

    let mut transaction =
        Transaction::new(wallet.address().clone(), recipient, transaction_req.amount);
    transaction.sign(&wallet)?;

    let mut ledger = state.ledger();
    ledger.add_transaction(transaction)?;

    info!(
        "Admitted transfer of {} from {} to {}",
        transaction_req.amount, transaction_req.sender, transaction_req.recipient
    );

    let response = TransactionResponse {
        message: "Transaction will be added to Block".to_string(),
        block_index: ledger.chain().len() as u64,
        pending: ledger.pending_transactions().len(),
    };

    Ok(HttpResponse::Created().json(response))
}

/// Mine a new block
///
/// Seals all pending transactions plus the mining reward into a new block
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined, or nothing to mine", body = MineResponse),
        (status = 400, description = "Invalid miner"),
        (status = 408, description = "Mining cancelled by timeout"),
        (status = 409, description = "Chain moved while the block was mined")
    )
)]
pub async fn mine_block(
    state: AppData,
    mine_req: web::Json<MineRequest>,
) -> Result<HttpResponse, ApiError> {
    let miner = state.resolve_address(&mine_req.miner)?;

    // Snapshot under the lock, seal without it
    let (candidate, difficulty) = {
        let ledger = state.ledger();
        (ledger.prepare_block(&miner), ledger.difficulty())
    };
    let Some(mut block) = candidate else {
        return Ok(HttpResponse::Ok().json(MineResponse {
            message: "No pending transactions to mine".to_string(),
            block: None,
        }));
    };

    let token = CancellationToken::new();
    let timer = cancel_after(mining_timeout(&state, mine_req.timeout_ms), &token);

    let sealed = web::block(move || {
        block.mine_with_token(difficulty, &token).map(|_| block)
    })
    .await;

    if let Some(timer) = timer {
        timer.abort();
    }

    let block = match sealed?.and_then(|block| state.ledger().commit_block(block)) {
        Ok(block) => block,
        Err(err) => {
            warn!("{}", err);
            return Err(err.into());
        }
    };

    info!(
        "Block {} mined with {} transactions, hash {}",
        block.index(),
        block.transactions().len(),
        block.hash()
    );
    Ok(HttpResponse::Ok().json(MineResponse {
        message: "New Block Mined".to_string(),
        block: Some(block),
    }))
}

/// Audit the blockchain
///
/// Re-verifies every hash, link and signature
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain audit result", body = ValidationResponse)
    )
)]
pub async fn validate_chain(state: AppData) -> Result<HttpResponse, ApiError> {
    let response = match state.ledger().is_chain_valid() {
        Ok(()) => ValidationResponse {
            valid: true,
            error: None,
        },
        Err(err) => {
            warn!("Chain audit failed: {}", err);
            ValidationResponse {
                valid: false,
                error: Some(err.to_string()),
            }
        }
    };

    Ok(HttpResponse::Ok().json(response))
}

/// List wallets
///
/// Returns every named wallet with its confirmed balance
#[utoipa::path(
    get,
    path = "/api/v1/wallets",
    responses(
        (status = 200, description = "Wallets retrieved successfully", body = Vec<WalletResponse>)
    )
)]
pub async fn list_wallets(state: AppData) -> Result<HttpResponse, ApiError> {
    let wallets = state.wallet_addresses();
    let ledger = state.ledger();

    let response: Vec<WalletResponse> = wallets
        .into_iter()
        .map(|(name, address)| WalletResponse {
            balance: ledger.balance(&address),
            address: address.0,
            name,
        })
        .collect();

    Ok(HttpResponse::Ok().json(response))
}

/// Create a new wallet
///
/// Generates a keypair held in memory under the given name
#[utoipa::path(
    post,
    path = "/api/v1/wallets",
    request_body = WalletRequest,
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse),
        (status = 400, description = "Invalid name"),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn create_wallet(
    state: AppData,
    wallet_req: web::Json<WalletRequest>,
) -> Result<HttpResponse, ApiError> {
    let address = state.create_wallet(&wallet_req.name)?;
    info!("Created wallet {} with address {}", wallet_req.name, address);

    Ok(HttpResponse::Created().json(WalletResponse {
        name: wallet_req.name.trim().to_string(),
        address: address.0,
        balance: 0.0,
    }))
}

/// Get balance
///
/// Returns the confirmed balance of any address
#[utoipa::path(
    get,
    path = "/api/v1/balance/{address}",
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse),
        (status = 400, description = "Invalid address")
    )
)]
pub async fn get_balance(
    state: AppData,
    address: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let address = state.resolve_address(&address.into_inner())?;
    let balance = state.ledger().balance(&address);

    Ok(HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
    }))
}

/// Immutability attack
///
/// Rewrites a mined transaction on a copy of the chain and audits the copy
#[utoipa::path(
    post,
    path = "/api/v1/scenarios/tamper",
    request_body = TamperRequest,
    responses(
        (status = 200, description = "Attack report", body = scenarios::AttackReport),
        (status = 400, description = "No such block or transaction")
    )
)]
pub async fn tamper_scenario(
    state: AppData,
    tamper_req: web::Json<TamperRequest>,
) -> Result<HttpResponse, ApiError> {
    let ledger = state.ledger();
    let report = scenarios::immutability_attack(
        &ledger,
        tamper_req.block_index,
        tamper_req.tx_index,
        tamper_req.amount,
        tamper_req.rehash,
    )?;

    Ok(HttpResponse::Ok().json(report))
}

/// Forged signature attack
///
/// Pastes a legitimate signature onto a forged transfer and submits it to a copy of the ledger
#[utoipa::path(
    post,
    path = "/api/v1/scenarios/forged-signature",
    request_body = ForgedSignatureRequest,
    responses(
        (status = 200, description = "Attack report", body = scenarios::AttackReport),
        (status = 404, description = "Unknown victim wallet")
    )
)]
pub async fn forged_signature_scenario(
    state: AppData,
    forged_req: web::Json<ForgedSignatureRequest>,
) -> Result<HttpResponse, ApiError> {
    let victim = state.wallet(&forged_req.victim)?;
    let recipient = state.resolve_address(&forged_req.recipient)?;
    let thief = state.resolve_address(&forged_req.thief)?;

    let ledger = state.ledger();
    let report =
        scenarios::forged_signature_attack(&ledger, &victim, &recipient, &thief, forged_req.amount);

    Ok(HttpResponse::Ok().json(report))
}

/// Double spend attack
///
/// Submits two transfers of the same funds to a copy of the ledger
#[utoipa::path(
    post,
    path = "/api/v1/scenarios/double-spend",
    request_body = DoubleSpendRequest,
    responses(
        (status = 200, description = "Attack report", body = scenarios::AttackReport),
        (status = 404, description = "Unknown spender wallet"),
        (status = 408, description = "Mining cancelled by timeout")
    )
)]
pub async fn double_spend_scenario(
    state: AppData,
    spend_req: web::Json<DoubleSpendRequest>,
) -> Result<HttpResponse, ApiError> {
    let spender = state.wallet(&spend_req.spender)?;
    let first: Address = state.resolve_address(&spend_req.first_recipient)?;
    let second: Address = state.resolve_address(&spend_req.second_recipient)?;
    let miner: Address = state.resolve_address(&spend_req.miner)?;

    // Mine the drill on a copy without holding the live ledger
    let ledger = state.ledger().clone();
    let token = CancellationToken::new();
    let timer = cancel_after(mining_timeout(&state, spend_req.timeout_ms), &token);

    let drill = web::block(move || {
        scenarios::double_spend_attack(&ledger, &spender, &first, &second, &miner, &token)
    })
    .await;

    if let Some(timer) = timer {
        timer.abort();
    }

    match drill? {
        Ok(report) => Ok(HttpResponse::Ok().json(report)),
        Err(err) => {
            warn!("Double spend drill stopped: {}", err);
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::blockchain::scenarios::AttackReport;
    use crate::config::Config;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;

    fn test_data() -> AppData {
        let mut config = Config::default();
        config.ledger.difficulty = 1;
        web::Data::new(AppState::from_config(&config))
    }

    #[actix_web::test]
    async fn test_transfer_mine_and_balances() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(json!({ "sender": "alice", "recipient": "bob", "amount": 30.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(json!({ "miner": "miner" }))
            .to_request();
        let mined: MineResponse = test::call_and_read_body_json(&app, req).await;
        let block = mined.block.unwrap();
        assert_eq!(block.index(), 1);
        assert_eq!(block.transactions().len(), 2);

        let req = test::TestRequest::get().uri("/api/v1/wallets").to_request();
        let wallets: Vec<WalletResponse> = test::call_and_read_body_json(&app, req).await;
        let balance = |name: &str| wallets.iter().find(|w| w.name == name).unwrap().balance;
        assert_eq!(balance("alice"), 70.0);
        assert_eq!(balance("bob"), 30.0);
        assert_eq!(balance("miner"), 50.0);

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let validation: ValidationResponse = test::call_and_read_body_json(&app, req).await;
        assert!(validation.valid);
    }

    #[actix_web::test]
    async fn test_mine_times_out_and_keeps_pool() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(json!({ "sender": "alice", "recipient": "bob", "amount": 30.0 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        // Unreachable difficulty
        data.ledger().set_difficulty(64);

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(json!({ "miner": "miner", "timeout_ms": 100 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::REQUEST_TIMEOUT);

        let ledger = data.ledger();
        assert_eq!(ledger.chain().len(), 1);
        assert_eq!(ledger.pending_transactions().len(), 1);
    }

    #[actix_web::test]
    async fn test_reads_are_served_while_mining() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(json!({ "sender": "alice", "recipient": "bob", "amount": 30.0 }))
            .to_request();
        test::call_service(&app, req).await;
        data.ledger().set_difficulty(64);

        let mine = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(json!({ "miner": "miner", "timeout_ms": 500 }))
            .to_request();
        let mining = test::call_service(&app, mine);

        let read = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
            test::call_and_read_body_json(&app, req).await
        };

        let (mined, chain): (_, ChainResponse) = tokio::join!(mining, read);
        assert_eq!(chain.length, 1);
        assert_eq!(mined.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[actix_web::test]
    async fn test_chain_reports_settings() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let chain: ChainResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(chain.length, 1);
        assert_eq!(chain.difficulty, 1);
        assert_eq!(chain.issued_supply, 100.0);
        assert_eq!(chain.admission_policy, AdmissionPolicy::ConfirmedOnly);
        assert!(chain.is_valid);
    }

    #[actix_web::test]
    async fn test_double_spend_drill_times_out() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;
        data.ledger().set_difficulty(64);

        let req = test::TestRequest::post()
            .uri("/api/v1/scenarios/double-spend")
            .set_json(json!({
                "spender": "alice",
                "first_recipient": "bob",
                "second_recipient": "miner",
                "miner": "miner",
                "timeout_ms": 100
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(data.ledger().chain().len(), 1);
    }

    #[actix_web::test]
    async fn test_wallet_names_cannot_shadow_addresses() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;
        let bob = data.wallet("bob").unwrap();

        for name in ["COINBASE", bob.address().as_str()] {
            let req = test::TestRequest::post()
                .uri("/api/v1/wallets")
                .set_json(json!({ "name": name }))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[actix_web::test]
    async fn test_mine_with_empty_pool() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(json!({ "miner": "miner", "timeout_ms": 1000 }))
            .to_request();
        let mined: MineResponse = test::call_and_read_body_json(&app, req).await;

        assert!(mined.block.is_none());
        assert_eq!(data.ledger().chain().len(), 1);
    }

    #[actix_web::test]
    async fn test_rejections() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(json!({ "sender": "mallory", "recipient": "bob", "amount": 1.0 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(json!({ "sender": "bob", "recipient": "alice", "amount": 1.0 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/v1/balance/not-an-address").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        assert!(data.ledger().pending_transactions().is_empty());
    }

    #[actix_web::test]
    async fn test_tamper_scenario_leaves_chain_intact() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(json!({ "sender": "alice", "recipient": "bob", "amount": 10.0 }))
            .to_request();
        test::call_service(&app, req).await;
        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(json!({ "miner": "miner" }))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/scenarios/tamper")
            .set_json(json!({ "block_index": 1, "tx_index": 1, "amount": 9999.0 }))
            .to_request();
        let report: AttackReport = test::call_and_read_body_json(&app, req).await;
        assert!(report.defended);

        let req = test::TestRequest::post()
            .uri("/api/v1/scenarios/tamper")
            .set_json(json!({ "block_index": 0, "tx_index": 0, "amount": 1.0 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        assert!(data.ledger().is_chain_valid().is_ok());
    }

    #[actix_web::test]
    async fn test_signature_and_double_spend_scenarios() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/scenarios/forged-signature")
            .set_json(json!({ "victim": "alice", "recipient": "bob", "thief": "miner", "amount": 1000.0 }))
            .to_request();
        let report: AttackReport = test::call_and_read_body_json(&app, req).await;
        assert!(report.defended);

        let req = test::TestRequest::post()
            .uri("/api/v1/scenarios/double-spend")
            .set_json(json!({
                "spender": "alice",
                "first_recipient": "bob",
                "second_recipient": "miner",
                "miner": "miner"
            }))
            .to_request();
        let report: AttackReport = test::call_and_read_body_json(&app, req).await;
        assert!(!report.defended);

        // Drills never reach the live ledger
        assert_eq!(data.ledger().chain().len(), 1);
        assert!(data.ledger().pending_transactions().is_empty());
    }
}
