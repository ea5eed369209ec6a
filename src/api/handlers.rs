use actix_web::{web, HttpResponse, Responder};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::sync::{Mutex, MutexGuard};

use crate::blockchain::{Address, Block, Ledger, LedgerError, ProofOfWorkSealer, Transaction};

/// Shared ledger state
///
/// All appends go through the mutex, so there is a single writer.
pub type LedgerData = web::Data<Mutex<Ledger>>;

/// Errors that can occur while serving a request
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Ledger lock poisoned")]
    LockPoisoned,

    #[error("Mining worker failed: {0}")]
    Worker(String),
}

impl ApiError {
    fn to_response(&self) -> HttpResponse {
        let body = serde_json::json!({ "error": self.to_string() });

        match self {
            ApiError::Ledger(LedgerError::InsufficientFunds { .. }) => {
                HttpResponse::BadRequest().json(body)
            }
            ApiError::Ledger(_) => HttpResponse::Conflict().json(body),
            ApiError::LockPoisoned | ApiError::Worker(_) => {
                HttpResponse::InternalServerError().json(body)
            }
        }
    }
}

fn lock(ledger: &Mutex<Ledger>) -> Result<MutexGuard<'_, Ledger>, ApiError> {
    ledger.lock().map_err(|_| ApiError::LockPoisoned)
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address, omitted for a minted transaction
    pub from: Option<String>,

    /// The recipient's address
    pub to: String,

    /// The amount to transfer
    pub amount: f64,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The height of the block that will include this transaction
    pub block_index: usize,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The address credited with the mining reward
    pub reward_address: String,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    /// Whether the chain is valid
    pub valid: bool,

    /// Why validation failed, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    /// The address queried
    pub address: String,

    /// The balance derived from mined blocks
    pub balance: f64,
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    let ledger = match lock(&ledger) {
        Ok(ledger) => ledger,
        Err(err) => return err.to_response(),
    };

    let response = ChainResponse {
        length: ledger.chain().len(),
        chain: ledger.chain().to_vec(),
        is_valid: ledger.is_chain_valid(),
    };

    HttpResponse::Ok().json(response)
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_pending_transactions(ledger: LedgerData) -> impl Responder {
    match lock(&ledger) {
        Ok(ledger) => HttpResponse::Ok().json(ledger.pending_transactions()),
        Err(err) => err.to_response(),
    }
}

/// Create a new transaction
///
/// Adds a new transaction to the pending transactions
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Transaction rejected"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn new_transaction(
    ledger: LedgerData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let request = transaction_req.into_inner();
    let transaction = Transaction::new(
        request.from.map(Address::from),
        Address::from(request.to),
        request.amount,
    );

    let result = lock(&ledger).and_then(|mut ledger| {
        ledger.create_transaction(transaction)?;
        Ok(ledger.chain().len())
    });

    match result {
        Ok(block_index) => HttpResponse::Created().json(TransactionResponse {
            message: "Transaction will be added to Block".to_string(),
            block_index,
        }),
        Err(err) => {
            warn!("Rejected transaction: {}", err);
            err.to_response()
        }
    }
}

/// Seals the pending transactions without holding the ledger lock
///
/// The commit re-checks the tip; if another block landed meanwhile the
/// search restarts on the new tip.
fn mine_and_commit(ledger: &Mutex<Ledger>, reward_address: &str) -> Result<Block, ApiError> {
    mine_and_commit_with(ledger, reward_address, |block, sealer, difficulty| {
        sealer.seal(block, difficulty)
    })
}

fn mine_and_commit_with<F>(
    ledger: &Mutex<Ledger>,
    reward_address: &str,
    mut seal: F,
) -> Result<Block, ApiError>
where
    F: FnMut(&mut Block, ProofOfWorkSealer, usize),
{
    loop {
        let (mut candidate, sealer, difficulty) = {
            let ledger = lock(ledger)?;
            (ledger.candidate_block(), ledger.sealer(), ledger.difficulty())
        };

        seal(&mut candidate, sealer, difficulty);

        let mut ledger = lock(ledger)?;
        match ledger.commit_sealed_block(candidate, reward_address) {
            Ok(block) => return Ok(block.clone()),
            Err(LedgerError::StaleTip { .. }) => {
                warn!("Chain tip moved while mining, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Mine a new block
///
/// Creates a new block with all pending transactions
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 409, description = "Block could not be committed"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(ledger: LedgerData, mine_req: web::Json<MineRequest>) -> impl Responder {
    let reward_address = mine_req.into_inner().reward_address;

    let result = web::block(move || mine_and_commit(&ledger, &reward_address))
        .await
        .map_err(|err| ApiError::Worker(err.to_string()))
        .and_then(|result| result);

    match result {
        Ok(block) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
        }),
        Err(err) => {
            error!("Failed to mine block: {}", err);
            err.to_response()
        }
    }
}

/// Check if the blockchain is valid
///
/// Validates the entire blockchain
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn validate_chain(ledger: LedgerData) -> impl Responder {
    let ledger = match lock(&ledger) {
        Ok(ledger) => ledger,
        Err(err) => return err.to_response(),
    };

    let response = match ledger.validate() {
        Ok(()) => ValidationResponse {
            valid: true,
            error: None,
        },
        Err(err) => ValidationResponse {
            valid: false,
            error: Some(err.to_string()),
        },
    };

    HttpResponse::Ok().json(response)
}

/// Get address balance
///
/// Returns the balance of an address derived from mined blocks
#[utoipa::path(
    get,
    path = "/api/v1/balance/{address}",
    params(
        ("address" = String, Path, description = "Address to query")
    ),
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_balance(ledger: LedgerData, address: web::Path<String>) -> impl Responder {
    let address = address.into_inner();

    match lock(&ledger) {
        Ok(ledger) => {
            let balance = ledger.get_balance_of_address(&address);
            HttpResponse::Ok().json(BalanceResponse { address, balance })
        }
        Err(err) => err.to_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::config::LedgerConfig;
    use actix_web::{test, App};

    fn test_ledger() -> LedgerData {
        let ledger = Ledger::with_config(&LedgerConfig {
            difficulty: 1,
            ..LedgerConfig::default()
        })
        .unwrap();

        web::Data::new(Mutex::new(ledger))
    }

    #[actix_web::test]
    async fn test_transaction_mine_and_balance() {
        let ledger = test_ledger();
        let app = test::init_service(
            App::new()
                .app_data(ledger.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(serde_json::json!({ "from": "A", "to": "B", "amount": 100.0 }))
            .to_request();
        let resp: TransactionResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.block_index, 1);

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(serde_json::json!({ "reward_address": "M" }))
            .to_request();
        let resp: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.block.hash.starts_with('0'));
        assert_eq!(resp.block.index, 1);
        assert_eq!(resp.block.transactions.len(), 1);

        let req = test::TestRequest::get()
            .uri("/api/v1/balance/B")
            .to_request();
        let resp: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.balance, 100.0);

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let resp: ChainResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.length, 2);
        assert_eq!(resp.chain[1].index, 1);
        assert!(resp.is_valid);

        let req = test::TestRequest::get()
            .uri("/api/v1/transactions/pending")
            .to_request();
        let resp: Vec<Transaction> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp, vec![Transaction::reward("M", 100.0)]);
    }

    #[actix_web::test]
    async fn test_validate_endpoint() {
        let ledger = test_ledger();
        let app = test::init_service(
            App::new()
                .app_data(ledger.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let resp: ValidationResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.valid);
        assert!(resp.error.is_none());
    }

    #[actix_web::test]
    async fn test_overdraft_rejected() {
        let ledger = Ledger::with_config(&LedgerConfig {
            difficulty: 1,
            allow_overdraft: false,
            ..LedgerConfig::default()
        })
        .unwrap();
        let ledger = web::Data::new(Mutex::new(ledger));
        let app = test::init_service(
            App::new()
                .app_data(ledger.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(serde_json::json!({ "from": "A", "to": "B", "amount": 5.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[::core::prelude::v1::test]
    fn test_mine_retries_when_tip_moves() {
        let ledger = Mutex::new(
            Ledger::with_config(&LedgerConfig {
                difficulty: 1,
                ..LedgerConfig::default()
            })
            .unwrap(),
        );
        ledger
            .lock()
            .unwrap()
            .create_transaction(Transaction::transfer("A", "B", 7.0))
            .unwrap();

        let mut attempts = 0;
        let block = mine_and_commit_with(&ledger, "M", |candidate, sealer, difficulty| {
            attempts += 1;
            if attempts == 1 {
                // Another writer appends while this candidate is being sealed.
                ledger.lock().unwrap().mine_pending_transactions("other");
            }
            sealer.seal(candidate, difficulty);
        })
        .unwrap();

        assert_eq!(attempts, 2);

        let ledger = ledger.lock().unwrap();
        assert_eq!(ledger.chain().len(), 3);
        assert_eq!(block.index, 2);
        assert_eq!(block.previous_hash, ledger.chain()[1].hash);
        assert_eq!(block.hash, ledger.latest_block().hash);
        assert_eq!(block.transactions, vec![Transaction::reward("other", 100.0)]);
        assert_eq!(ledger.get_balance_of_address("B"), 7.0);
        assert!(ledger.is_chain_valid());
    }
}
