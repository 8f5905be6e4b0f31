//! Wallet service

use super::ref_type;
use super::refund_policy::{RefundBasis, RefundPolicy, calculate_refund};
use crate::audit::action;
use crate::automation::trace::LogTarget;
use crate::core::context::CoreContext;
use crate::db::repository::wallet::{self as wallet_repo, AdjustOutcome};
use crate::db::repository::{self, RepoError, order_item, vps as vps_repo, wallet_order};
use crate::orders::ApprovedBy;
use crate::orders::spec::{InstanceSpec, RefundItemSpec, RefundMeta, instance_period};
use serde_json::json;
use shared::models::{
    Order, OrderItem, TransactionType, VpsInstance, WalletOrder, WalletOrderStatus, WalletOrderType,
    WalletTransaction,
};
use shared::{AppError, AppResult, ErrorCode};
use sqlx::SqliteConnection;
use std::sync::Arc;

const DEFAULT_CURRENCY: &str = "CNY";
const NOTE_MAX: usize = 1000;

/// Ledger write inside the caller's transaction.
///
/// Re-applying the same `(user, ref_type, ref_id)` is a no-op returning
/// the current balance.
#[allow(clippy::too_many_arguments)]
pub async fn apply_adjustment(
    conn: &mut SqliteConnection,
    user_id: i64,
    amount: i64,
    ref_type: &str,
    ref_id: i64,
    note: &str,
    now: i64,
) -> AppResult<i64> {
    let tx_type = if amount >= 0 {
        TransactionType::Credit
    } else {
        TransactionType::Debit
    };
    match wallet_repo::adjust(conn, user_id, amount, tx_type, ref_type, ref_id, note, now).await? {
        AdjustOutcome::Applied { balance } => {
            tracing::info!(user_id, amount, ref_type, ref_id, balance, "Wallet adjusted");
            Ok(balance)
        }
        AdjustOutcome::AlreadyApplied { balance } => {
            tracing::debug!(user_id, ref_type, ref_id, "Wallet adjustment already applied");
            Ok(balance)
        }
        AdjustOutcome::Insufficient { balance } => Err(AppError::insufficient_balance()
            .with_detail("balance", balance)
            .with_detail("amount", amount)),
    }
}

#[derive(Clone)]
pub struct WalletService {
    ctx: Arc<CoreContext>,
}

impl WalletService {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self { ctx }
    }

    /// Single-shot balance mutation in its own transaction
    pub async fn adjust(&self, user_id: i64, amount: i64, ref_type: &str, ref_id: i64, note: &str) -> AppResult<i64> {
        let mut tx = repository::begin(&self.ctx.pool).await?;
        let balance = apply_adjustment(&mut tx, user_id, amount, ref_type, ref_id, note, self.ctx.now()).await?;
        repository::commit(tx).await?;
        Ok(balance)
    }

    pub async fn credit(&self, user_id: i64, amount: i64, ref_type: &str, ref_id: i64, note: &str) -> AppResult<i64> {
        if amount <= 0 {
            return Err(AppError::validation("credit amount must be positive"));
        }
        self.adjust(user_id, amount, ref_type, ref_id, note).await
    }

    pub async fn balance(&self, user_id: i64) -> AppResult<i64> {
        Ok(wallet_repo::balance(&self.ctx.pool, user_id).await?)
    }

    pub async fn transactions(&self, user_id: i64, limit: i64, offset: i64) -> AppResult<Vec<WalletTransaction>> {
        Ok(wallet_repo::list_transactions(&self.ctx.pool, user_id, limit, offset).await?)
    }

    pub async fn user_orders(&self, user_id: i64, limit: i64, offset: i64) -> AppResult<Vec<WalletOrder>> {
        Ok(wallet_order::list_by_user(&self.ctx.pool, user_id, limit, offset).await?)
    }

    pub async fn list_orders(
        &self,
        status: Option<WalletOrderStatus>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<WalletOrder>> {
        Ok(wallet_order::list_all(&self.ctx.pool, status, limit, offset).await?)
    }

    async fn load_order(&self, id: i64) -> AppResult<WalletOrder> {
        wallet_order::find_by_id(&self.ctx.pool, id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::WalletOrderNotFound))
    }

    fn check_request(amount: i64, note: Option<&str>) -> AppResult<()> {
        if amount <= 0 {
            return Err(AppError::validation("amount must be positive"));
        }
        if note.is_some_and(|n| n.chars().count() > NOTE_MAX) {
            return Err(AppError::validation("note too long"));
        }
        Ok(())
    }

    pub async fn request_recharge(&self, user_id: i64, amount: i64, note: Option<&str>) -> AppResult<WalletOrder> {
        Self::check_request(amount, note)?;
        let id = wallet_order::insert(
            &self.ctx.pool,
            user_id,
            WalletOrderType::Recharge,
            amount,
            DEFAULT_CURRENCY,
            note,
            "{}",
            self.ctx.now(),
        )
        .await?;
        tracing::info!(user_id, wallet_order_id = id, amount, "Recharge requested");
        self.load_order(id).await
    }

    /// Balance is checked here and debited again (atomically) on approval
    pub async fn request_withdraw(&self, user_id: i64, amount: i64, note: Option<&str>) -> AppResult<WalletOrder> {
        Self::check_request(amount, note)?;
        let balance = self.balance(user_id).await?;
        if balance < amount {
            return Err(AppError::insufficient_balance().with_detail("balance", balance));
        }
        let id = wallet_order::insert(
            &self.ctx.pool,
            user_id,
            WalletOrderType::Withdraw,
            amount,
            DEFAULT_CURRENCY,
            note,
            "{}",
            self.ctx.now(),
        )
        .await?;
        tracing::info!(user_id, wallet_order_id = id, amount, "Withdraw requested");
        self.load_order(id).await
    }

    /// Refundable amount for the instance right now
    pub async fn refund_quote(&self, vps: &VpsInstance) -> AppResult<i64> {
        let policy = RefundPolicy::load(&self.ctx.settings).await;
        let mut amount = vps.monthly_price;
        if amount <= 0
            && let Some(item_id) = vps.order_item_id
            && let Some(item) = order_item::find_by_id(&self.ctx.pool, item_id).await?
        {
            amount = item.amount;
        }
        let spec = InstanceSpec::parse(&vps.spec_json);
        let basis = RefundBasis {
            amount,
            created_at: vps.created_at,
            expire_at: vps.expire_at,
            period: instance_period(&spec, vps.created_at, vps.expire_at),
        };
        Ok(calculate_refund(&policy, &basis, self.ctx.now()))
    }

    async fn owned_instance(&self, user_id: i64, vps_id: i64) -> AppResult<VpsInstance> {
        vps_repo::find_by_id(&self.ctx.pool, vps_id)
            .await?
            .filter(|v| v.user_id == user_id)
            .ok_or_else(|| AppError::new(ErrorCode::VpsNotFound))
    }

    /// File a refund wallet order for an instance; auto-approved when the
    /// policy does not require review
    pub async fn request_refund(&self, user_id: i64, vps_id: i64, reason: &str) -> AppResult<WalletOrder> {
        if reason.chars().count() > NOTE_MAX {
            return Err(AppError::validation("reason too long"));
        }
        let vps = self.owned_instance(user_id, vps_id).await?;
        if wallet_order::find_pending_refund_for_vps(&self.ctx.pool, user_id, vps_id)
            .await?
            .is_some()
        {
            return Err(AppError::conflict("a refund request for this instance is already pending"));
        }
        let amount = self.refund_quote(&vps).await?;
        if amount <= 0 {
            return Err(AppError::forbidden("instance is outside the refund window"));
        }

        let meta = RefundMeta {
            vps_id: Some(vps.id),
            order_item_id: vps.order_item_id,
            reason: reason.to_string(),
            delete_on_approve: true,
            destroy_error: None,
            source_order_id: None,
        };
        let id = wallet_order::insert(
            &self.ctx.pool,
            user_id,
            WalletOrderType::Refund,
            amount,
            DEFAULT_CURRENCY,
            Some(reason).filter(|r| !r.is_empty()),
            &meta.to_json(),
            self.ctx.now(),
        )
        .await?;
        tracing::info!(user_id, vps_id, wallet_order_id = id, amount, "Refund requested");

        let policy = RefundPolicy::load(&self.ctx.settings).await;
        if !policy.requires_approval {
            return self.approve_order(id, ApprovedBy::System).await;
        }
        self.load_order(id).await
    }

    /// Refund written off when an admin deletes an instance (`refund_on_admin_delete`)
    pub async fn auto_refund_on_admin_delete(&self, vps: &VpsInstance) -> AppResult<Option<WalletOrder>> {
        let policy = RefundPolicy::load(&self.ctx.settings).await;
        if !policy.refund_on_admin_delete {
            return Ok(None);
        }
        let amount = self.refund_quote(vps).await?;
        if amount <= 0 {
            return Ok(None);
        }
        let meta = RefundMeta {
            vps_id: Some(vps.id),
            order_item_id: vps.order_item_id,
            reason: "admin delete".into(),
            delete_on_approve: false,
            destroy_error: None,
            source_order_id: None,
        };
        let id = wallet_order::insert(
            &self.ctx.pool,
            vps.user_id,
            WalletOrderType::Refund,
            amount,
            DEFAULT_CURRENCY,
            Some("admin delete"),
            &meta.to_json(),
            self.ctx.now(),
        )
        .await?;
        self.approve_order(id, ApprovedBy::System).await.map(Some)
    }

    /// Wallet order settling an approved refund order, approved as System.
    ///
    /// Replays find the wallet order filed by the first run. Returns `None`
    /// when the refund does not go to the wallet.
    pub async fn settle_order_refund(
        &self,
        order: &Order,
        item: &OrderItem,
        spec: &RefundItemSpec,
    ) -> AppResult<Option<WalletOrder>> {
        if !spec.refund_to_wallet || spec.refund_amount <= 0 {
            return Ok(None);
        }
        let existing = match wallet_order::find_refund_for_source_order(&self.ctx.pool, order.id).await? {
            Some(w) => w,
            None => {
                let meta = RefundMeta {
                    vps_id: Some(spec.vps_id),
                    order_item_id: Some(item.id),
                    reason: spec.reason.clone(),
                    delete_on_approve: false,
                    destroy_error: None,
                    source_order_id: Some(order.id),
                };
                let inserted = wallet_order::insert(
                    &self.ctx.pool,
                    order.user_id,
                    WalletOrderType::Refund,
                    spec.refund_amount,
                    DEFAULT_CURRENCY,
                    Some("vps refund"),
                    &meta.to_json(),
                    self.ctx.now(),
                )
                .await;
                let id = match inserted {
                    Ok(id) => id,
                    // Filed by a concurrent run
                    Err(RepoError::Duplicate(_)) => wallet_order::find_refund_for_source_order(&self.ctx.pool, order.id)
                        .await?
                        .ok_or_else(|| AppError::new(ErrorCode::WalletOrderNotFound))?
                        .id,
                    Err(e) => return Err(e.into()),
                };
                tracing::info!(order_id = order.id, wallet_order_id = id, amount = spec.refund_amount, "Refund wallet order filed");
                self.load_order(id).await?
            }
        };
        if existing.status != WalletOrderStatus::PendingReview {
            return Ok(Some(existing));
        }
        match self.approve_order(existing.id, ApprovedBy::System).await {
            Ok(w) => Ok(Some(w)),
            Err(e) if e.code == ErrorCode::Conflict => {
                let w = self.load_order(existing.id).await?;
                if w.status == WalletOrderStatus::Approved {
                    Ok(Some(w))
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Approve a pending wallet order and move the money, then destroy the
    /// instance for refunds flagged `delete_on_approve`.
    ///
    /// The ledger key is `("wallet_order", id)`, or `("vps_refund", order_id)`
    /// for wallet orders settling a refund order.
    pub async fn approve_order(&self, id: i64, by: ApprovedBy) -> AppResult<WalletOrder> {
        let order = self.load_order(id).await?;
        if order.status != WalletOrderStatus::PendingReview {
            return Err(AppError::conflict(format!("wallet order {id} is already {:?}", order.status)));
        }
        let amount = match order.order_type {
            WalletOrderType::Recharge | WalletOrderType::Refund => order.amount,
            WalletOrderType::Withdraw => -order.amount,
        };
        let note = match order.order_type {
            WalletOrderType::Recharge => "recharge",
            WalletOrderType::Withdraw => "withdraw",
            WalletOrderType::Refund => "refund",
        };
        let source_order = match order.order_type {
            WalletOrderType::Refund => RefundMeta::parse(&order.meta_json).source_order_id,
            _ => None,
        };
        let (ledger_ref, ledger_id) = match source_order {
            Some(source) => (ref_type::VPS_REFUND, source),
            None => (ref_type::WALLET_ORDER, id),
        };

        let now = self.ctx.now();
        let mut tx = repository::begin(&self.ctx.pool).await?;
        if !wallet_order::review(&mut *tx, id, WalletOrderStatus::Approved, by.admin_id(), None, now).await? {
            return Err(AppError::conflict(format!("wallet order {id} is no longer pending")));
        }
        apply_adjustment(&mut tx, order.user_id, amount, ledger_ref, ledger_id, note, now).await?;
        repository::commit(tx).await?;
        tracing::info!(wallet_order_id = id, user_id = order.user_id, amount, approved_by = %by, "Wallet order approved");

        if let ApprovedBy::Admin(admin_id) = by {
            self.ctx
                .audit
                .record(admin_id, action::WALLET_ORDER_APPROVE, "wallet_order", id, json!({ "amount": order.amount }))
                .await;
        }

        if order.order_type == WalletOrderType::Refund {
            self.destroy_refunded_instance(&order).await?;
        }
        self.load_order(id).await
    }

    async fn destroy_refunded_instance(&self, order: &WalletOrder) -> AppResult<()> {
        let mut meta = RefundMeta::parse(&order.meta_json);
        if !meta.delete_on_approve {
            return Ok(());
        }
        let Some(vps_id) = meta.vps_id else {
            return Ok(());
        };
        let Some(vps) = vps_repo::find_by_id(&self.ctx.pool, vps_id).await? else {
            return Ok(());
        };
        let target = LogTarget {
            order_id: None,
            order_item_id: vps.order_item_id,
        };
        if let Err(e) = self.ctx.destroy_instance(&vps, target).await {
            // Money already moved; keep the row for an operator retry
            tracing::error!(wallet_order_id = order.id, vps_id, error = %e, "Refund approved but host delete failed");
            meta.destroy_error = Some(e.message.clone());
            wallet_order::set_meta(&self.ctx.pool, order.id, &meta.to_json(), self.ctx.now()).await?;
        }
        Ok(())
    }

    pub async fn reject_order(&self, id: i64, admin_id: i64, reason: &str) -> AppResult<WalletOrder> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::validation("reason is required"));
        }
        if !wallet_order::review(
            &self.ctx.pool,
            id,
            WalletOrderStatus::Rejected,
            Some(admin_id),
            Some(reason),
            self.ctx.now(),
        )
        .await?
        {
            self.load_order(id).await?;
            return Err(AppError::conflict(format!("wallet order {id} is no longer pending")));
        }
        self.ctx
            .audit
            .record(admin_id, action::WALLET_ORDER_REJECT, "wallet_order", id, json!({ "reason": reason }))
            .await;
        self.load_order(id).await
    }

    /// Admin balance correction; each call is its own ledger entry
    pub async fn admin_adjust(&self, admin_id: i64, user_id: i64, amount: i64, note: &str) -> AppResult<i64> {
        if amount == 0 {
            return Err(AppError::validation("amount must not be zero"));
        }
        let now = self.ctx.now();
        let mut tx = repository::begin(&self.ctx.pool).await?;
        let ref_id = wallet_repo::next_ref_id(&mut *tx, user_id, ref_type::ADMIN_ADJUST).await?;
        let balance = apply_adjustment(&mut tx, user_id, amount, ref_type::ADMIN_ADJUST, ref_id, note, now).await?;
        repository::commit(tx).await?;
        self.ctx
            .audit
            .record(
                admin_id,
                action::WALLET_ADJUST,
                "wallet",
                user_id,
                json!({ "amount": amount, "note": note, "balance": balance }),
            )
            .await;
        Ok(balance)
    }
}
