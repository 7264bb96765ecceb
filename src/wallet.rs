// Wallet Service
//
// Custodial deposit, withdrawal and internal transfer flows on top of a
// ledger store and a Lightning backend. Balances only move through
// `LedgerStore::adjust_balance`, and deposits are credited once, after
// winning the pending -> completed status transition.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::lightning::invoice::{decode_invoice, normalize_invoice, validate_invoice_amount};
use crate::lightning::{InvoiceState, LightningBackend, LightningError};
use crate::store::{
    Activity, LedgerStore, StoreError, Transaction, TransactionFilter, TransactionStatus,
    TransactionType,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositInvoice {
    pub payment_request: String,
    pub r_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositStatus {
    pub settled: bool,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalResult {
    pub payment_hash: String,
    pub new_balance: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub sender_transaction_id: Uuid,
    pub receiver_transaction_id: Uuid,
    pub sender_balance: i64,
    pub receiver_balance: i64,
}

/// Counts from one pass of the pending deposit poller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleSummary {
    pub checked: usize,
    pub settled: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub errors: usize,
}

/// Result of checking one pending deposit against the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DepositOutcome {
    Credited { new_balance: i64 },
    AlreadyCredited,
    Pending,
    Failed,
}

pub fn deposit_memo(amount: i64) -> String {
    format!("Deposit {} sats to Ganamos!", amount)
}

pub fn withdrawal_memo(amount: i64) -> String {
    format!("Withdrawal of {} sats from Ganamos!", amount)
}

#[derive(Clone)]
pub struct WalletService {
    store: Arc<dyn LedgerStore>,
    lightning: Arc<dyn LightningBackend>,
    invoice_expiry_secs: u64,
}

impl WalletService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        lightning: Arc<dyn LightningBackend>,
        invoice_expiry_secs: u64,
    ) -> Self {
        Self {
            store,
            lightning,
            invoice_expiry_secs,
        }
    }

    /// Create an invoice the user pays to fund their balance
    pub async fn create_deposit_invoice(
        &self,
        user_id: Uuid,
        amount: i64,
    ) -> LedgerResult<DepositInvoice> {
        if amount <= 0 {
            return Err(LedgerError::invalid("Amount must be a positive number of sats"));
        }
        self.require_profile(user_id).await?;

        let memo = deposit_memo(amount);
        let invoice = self
            .lightning
            .create_invoice(amount as u64, &memo, self.invoice_expiry_secs)
            .await?;

        let mut tx = Transaction::new(
            user_id,
            TransactionType::Deposit,
            amount,
            TransactionStatus::Pending,
            memo,
        );
        tx.r_hash_str = Some(invoice.r_hash.clone());
        tx.payment_request = Some(invoice.payment_request.clone());
        self.store.insert_transaction(&tx).await?;

        info!(user_id = %user_id, amount, r_hash = %invoice.r_hash, "Deposit invoice created");

        Ok(DepositInvoice {
            payment_request: invoice.payment_request,
            r_hash: invoice.r_hash,
        })
    }

    /// Check a deposit and credit it if the invoice has been paid
    pub async fn check_deposit_status(
        &self,
        user_id: Uuid,
        r_hash: &str,
    ) -> LedgerResult<DepositStatus> {
        let tx = self
            .store
            .find_transaction_by_r_hash(r_hash)
            .await?
            .filter(|tx| tx.tx_type == TransactionType::Deposit && tx.user_id == user_id)
            .ok_or_else(|| LedgerError::NotFound("Transaction not found".to_string()))?;

        match tx.status {
            TransactionStatus::Completed => self.completed_status(&tx).await,
            TransactionStatus::Failed => Ok(DepositStatus {
                settled: false,
                status: TransactionStatus::Failed,
                amount: None,
                new_balance: None,
            }),
            TransactionStatus::Pending => match self.settle_deposit(&tx).await? {
                DepositOutcome::Credited { new_balance } => Ok(DepositStatus {
                    settled: true,
                    status: TransactionStatus::Completed,
                    amount: Some(tx.amount),
                    new_balance: Some(new_balance),
                }),
                DepositOutcome::AlreadyCredited => self.completed_status(&tx).await,
                DepositOutcome::Pending => Ok(DepositStatus {
                    settled: false,
                    status: TransactionStatus::Pending,
                    amount: None,
                    new_balance: None,
                }),
                DepositOutcome::Failed => Ok(DepositStatus {
                    settled: false,
                    status: TransactionStatus::Failed,
                    amount: None,
                    new_balance: None,
                }),
            },
        }
    }

    /// One poller pass over every pending deposit
    pub async fn settle_pending_deposits(&self) -> LedgerResult<SettleSummary> {
        let pending = self
            .store
            .list_transactions(&TransactionFilter::pending_deposits())
            .await?;

        let mut summary = SettleSummary::default();
        for tx in pending {
            summary.checked += 1;
            match self.settle_deposit(&tx).await {
                Ok(DepositOutcome::Credited { .. }) => summary.settled += 1,
                Ok(DepositOutcome::AlreadyCredited) => {}
                Ok(DepositOutcome::Pending) => summary.still_pending += 1,
                Ok(DepositOutcome::Failed) => summary.failed += 1,
                Err(e) => {
                    warn!(transaction_id = %tx.id, "Failed to check pending deposit: {}", e);
                    summary.errors += 1;
                }
            }
        }

        debug!(checked = summary.checked, "Pending deposit sweep finished");
        Ok(summary)
    }

    /// Pay a BOLT11 invoice out of the user's balance
    pub async fn process_withdrawal(
        &self,
        user_id: Uuid,
        payment_request: &str,
        amount: i64,
    ) -> LedgerResult<WithdrawalResult> {
        if amount <= 0 {
            return Err(LedgerError::invalid("Invalid payment request or amount"));
        }
        let payment_request = normalize_invoice(payment_request);
        let decoded = decode_invoice(&payment_request)
            .map_err(|_| LedgerError::invalid("Invalid Lightning invoice"))?;

        if let Some(invoice_amount) = decoded.amount_sats {
            if !validate_invoice_amount(&payment_request, amount as u64) {
                return Err(LedgerError::invalid(format!(
                    "Invoice amount ({} sats) does not match withdrawal amount ({} sats)",
                    invoice_amount, amount
                )));
            }
        }
        self.require_profile(user_id).await?;

        let mut tx = Transaction::new(
            user_id,
            TransactionType::Withdrawal,
            amount,
            TransactionStatus::Pending,
            withdrawal_memo(amount),
        );
        tx.payment_request = Some(payment_request.clone());
        self.store.insert_transaction(&tx).await?;

        let debited_balance = match self.store.adjust_balance(user_id, -amount, false).await {
            Ok(balance) => balance,
            Err(e) => {
                self.mark_failed(&tx).await;
                if let StoreError::InsufficientBalance { .. } = e {
                    info!(user_id = %user_id, amount, "Withdrawal rejected: insufficient balance");
                }
                return Err(e.into());
            }
        };

        let forced_amount = decoded.amount_sats.is_none().then_some(amount as u64);
        let payment = match self.lightning.pay_invoice(&payment_request, forced_amount).await {
            Ok(payment) => payment,
            Err(e @ (LightningError::Http(_) | LightningError::InvalidResponse(_))) => {
                // Outcome unknown: keep the debit and leave the row pending
                error!(
                    transaction_id = %tx.id,
                    user_id = %user_id,
                    "Withdrawal payment outcome unknown, left pending for review: {}", e
                );
                return Err(e.into());
            }
            Err(e) => {
                warn!(transaction_id = %tx.id, user_id = %user_id, "Withdrawal payment failed: {}", e);
                self.mark_failed(&tx).await;
                if let Err(refund_err) = self.store.adjust_balance(user_id, amount, true).await {
                    error!(
                        transaction_id = %tx.id,
                        user_id = %user_id,
                        amount,
                        "Failed to refund withdrawal debit: {}", refund_err
                    );
                }
                return Err(e.into());
            }
        };

        if !self
            .store
            .transition_transaction(
                tx.id,
                TransactionStatus::Pending,
                TransactionStatus::Completed,
                Some(&payment.payment_hash),
            )
            .await?
        {
            warn!(transaction_id = %tx.id, "Withdrawal row changed state while paying");
        }

        let activity = Activity::for_transaction(
            &tx,
            serde_json::json!({ "amount": amount, "status": "completed" }),
        );
        if let Err(e) = self.store.insert_activity(&activity).await {
            warn!(transaction_id = %tx.id, "Failed to record withdrawal activity: {}", e);
        }

        info!(
            user_id = %user_id,
            amount,
            fee_sats = payment.fee_sats,
            payment_hash = %payment.payment_hash,
            "Withdrawal completed"
        );

        Ok(WithdrawalResult {
            payment_hash: payment.payment_hash,
            new_balance: debited_balance,
            amount,
        })
    }

    /// Move sats between two users without touching the Lightning node
    pub async fn transfer_sats(
        &self,
        from: Uuid,
        to: Uuid,
        amount: i64,
        memo: Option<&str>,
    ) -> LedgerResult<TransferResult> {
        if amount <= 0 {
            return Err(LedgerError::invalid("Amount must be a positive number of sats"));
        }
        if from == to {
            return Err(LedgerError::invalid("Cannot transfer sats to yourself"));
        }
        let sender = self.require_profile(from).await?;
        let receiver = self.require_profile(to).await?;

        let sender_balance = self.store.adjust_balance(from, -amount, false).await?;
        let receiver_balance = match self.store.adjust_balance(to, amount, true).await {
            Ok(balance) => balance,
            Err(e) => {
                if let Err(refund_err) = self.store.adjust_balance(from, amount, true).await {
                    error!(user_id = %from, amount, "Failed to refund transfer debit: {}", refund_err);
                }
                return Err(e.into());
            }
        };

        let sender_memo = memo.map(str::to_string).unwrap_or_else(|| {
            format!(
                "Transfer to {}",
                receiver.name.as_deref().unwrap_or("Ganamos user")
            )
        });
        let receiver_memo = memo.map(str::to_string).unwrap_or_else(|| {
            format!(
                "Transfer from {}",
                sender.name.as_deref().unwrap_or("Ganamos user")
            )
        });

        let outgoing = Transaction::new(
            from,
            TransactionType::Internal,
            -amount,
            TransactionStatus::Completed,
            sender_memo,
        );
        let incoming = Transaction::new(
            to,
            TransactionType::Internal,
            amount,
            TransactionStatus::Completed,
            receiver_memo,
        );
        for tx in [&outgoing, &incoming] {
            if let Err(e) = self.store.insert_transaction(tx).await {
                error!(transaction_id = %tx.id, user_id = %tx.user_id, "Failed to record transfer leg: {}", e);
                return Err(e.into());
            }
            let activity = Activity::for_transaction(tx, serde_json::json!({ "amount": tx.amount }));
            if let Err(e) = self.store.insert_activity(&activity).await {
                warn!(transaction_id = %tx.id, "Failed to record transfer activity: {}", e);
            }
        }

        info!(from = %from, to = %to, amount, "Internal transfer completed");

        Ok(TransferResult {
            sender_transaction_id: outgoing.id,
            receiver_transaction_id: incoming.id,
            sender_balance,
            receiver_balance,
        })
    }

    pub async fn get_balance(&self, user_id: Uuid) -> LedgerResult<i64> {
        Ok(self.require_profile(user_id).await?.balance)
    }

    async fn require_profile(&self, user_id: Uuid) -> LedgerResult<crate::store::Profile> {
        self.store
            .get_profile(user_id)
            .await?
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| LedgerError::NotFound("User profile not found".to_string()))
    }

    async fn completed_status(&self, tx: &Transaction) -> LedgerResult<DepositStatus> {
        let balance = self.get_balance(tx.user_id).await?;
        Ok(DepositStatus {
            settled: true,
            status: TransactionStatus::Completed,
            amount: Some(tx.amount),
            new_balance: Some(balance),
        })
    }

    async fn mark_failed(&self, tx: &Transaction) {
        match self
            .store
            .transition_transaction(tx.id, TransactionStatus::Pending, TransactionStatus::Failed, None)
            .await
        {
            Ok(true) => debug!(transaction_id = %tx.id, "Transaction marked failed"),
            Ok(false) => warn!(transaction_id = %tx.id, "Transaction was no longer pending"),
            Err(e) => error!(transaction_id = %tx.id, "Failed to mark transaction failed: {}", e),
        }
    }

    /// Put an uncredited deposit back to pending so the next check retries it
    async fn reopen_deposit(&self, tx: &Transaction) {
        match self
            .store
            .transition_transaction(
                tx.id,
                TransactionStatus::Completed,
                TransactionStatus::Pending,
                None,
            )
            .await
        {
            Ok(true) => info!(transaction_id = %tx.id, "Deposit reopened for retry"),
            Ok(false) => error!(transaction_id = %tx.id, "Deposit left completed without credit"),
            Err(e) => error!(
                transaction_id = %tx.id,
                "Failed to reopen uncredited deposit, needs manual review: {}", e
            ),
        }
    }

    async fn settle_deposit(&self, tx: &Transaction) -> LedgerResult<DepositOutcome> {
        let r_hash = tx
            .r_hash_str
            .as_deref()
            .ok_or_else(|| LedgerError::invalid("Deposit has no payment hash"))?;
        let invoice = self.lightning.check_invoice(r_hash).await?;

        if invoice.settled {
            if invoice.amount_paid_sats as i64 != tx.amount {
                warn!(
                    transaction_id = %tx.id,
                    expected = tx.amount,
                    paid = invoice.amount_paid_sats,
                    "Deposit paid amount differs from invoice amount, crediting the recorded amount"
                );
            }

            let won = self
                .store
                .transition_transaction(
                    tx.id,
                    TransactionStatus::Pending,
                    TransactionStatus::Completed,
                    None,
                )
                .await?;
            if !won {
                debug!(transaction_id = %tx.id, "Deposit already credited elsewhere");
                return Ok(DepositOutcome::AlreadyCredited);
            }

            let new_balance = match self.store.adjust_balance(tx.user_id, tx.amount, true).await {
                Ok(balance) => balance,
                Err(e) => {
                    error!(transaction_id = %tx.id, user_id = %tx.user_id, "Failed to credit deposit: {}", e);
                    self.reopen_deposit(tx).await;
                    return Err(e.into());
                }
            };
            let activity = Activity::for_transaction(
                tx,
                serde_json::json!({ "amount": tx.amount, "status": "completed" }),
            );
            if let Err(e) = self.store.insert_activity(&activity).await {
                warn!(transaction_id = %tx.id, "Failed to record deposit activity: {}", e);
            }

            info!(user_id = %tx.user_id, amount = tx.amount, new_balance, "Deposit credited");
            return Ok(DepositOutcome::Credited { new_balance });
        }

        if invoice.state == InvoiceState::Canceled {
            self.mark_failed(tx).await;
            info!(transaction_id = %tx.id, "Deposit invoice canceled or expired");
            return Ok(DepositOutcome::Failed);
        }

        Ok(DepositOutcome::Pending)
    }
}
